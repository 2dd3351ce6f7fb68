//! Lowering of normalized expressions into classifier matches.
//!
//! Every top-level disjunct becomes either one concrete match or, when it
//! holds several value sets the classifier cannot AND natively, a
//! conjunction group: one match per set alternative, all carrying the same
//! fresh conjunction id with the clause count, so the classifier accepts
//! the rule only when one alternative of every clause matched.

use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};

use fxhash::FxBuildHasher;
use indexmap::IndexMap;
use mexpr_lex::{all_ones, format_int, format_masked};

use crate::expr::{Cmp, Expr, Operand, Relop};
use crate::fields::FieldId;
use crate::symtab::SymbolKind;

/// Caller-supplied resolution of string symbols to concrete ids, e.g. port
/// names to port numbers. Iteration order is the insertion order, which
/// keeps lowering deterministic.
pub type StringMap = IndexMap<String, u32, FxBuildHasher>;

/// One clause of a conjunction group.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Conjunction {
    pub id: u32,
    pub clause: u32,
    pub n_clauses: u32,
}

/// Concrete `(field, value, mask)` constraints of a single flow. An empty
/// match matches every packet.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct FlowMatch {
    fields: BTreeMap<FieldId, (u128, u128)>,
}

impl FlowMatch {
    pub fn is_catchall(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn fields(&self) -> impl Iterator<Item = (FieldId, u128, u128)> + '_ {
        self.fields.iter().map(|(field, (value, mask))| (*field, *value, *mask))
    }

    pub fn get(&self, field: FieldId) -> Option<(u128, u128)> {
        self.fields.get(&field).copied()
    }

    /// Adds a constraint, returning false if it contradicts an existing
    /// one on the same field.
    fn constrain(&mut self, field: FieldId, value: u128, mask: u128) -> bool {
        let (v, m) = self.fields.entry(field).or_insert((0, 0));
        if (*v ^ value) & (*m & mask) != 0 {
            return false;
        }
        *v |= value;
        *m |= mask;
        true
    }
}

impl Display for FlowMatch {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.is_catchall() {
            return f.write_str("any");
        }
        for (i, (field, value, mask)) in self.fields().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            if mask == all_ones(field.width()) {
                write!(f, "{}={}", field, format_int(value, field.format()))?;
            } else {
                write!(f, "{}={}", field, format_masked(value, mask, field.format()))?;
            }
        }
        Ok(())
    }
}

/// The deduplicated multiset of matches a normalized expression lowers to.
#[derive(Debug, Default)]
pub struct Matches {
    matches: IndexMap<FlowMatch, Vec<Conjunction>, FxBuildHasher>,
    n_conjunctions: u32,
}

impl Matches {
    pub fn len(&self) -> usize {
        self.matches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }

    /// Number of conjunction groups allocated during lowering.
    pub fn n_conjunctions(&self) -> u32 {
        self.n_conjunctions
    }

    pub fn iter(&self) -> impl Iterator<Item = (&FlowMatch, &[Conjunction])> {
        self.matches.iter().map(|(flow, conjunctions)| (flow, conjunctions.as_slice()))
    }

    fn add(&mut self, flow: FlowMatch, conjunctions: Vec<Conjunction>) {
        use indexmap::map::Entry;
        match self.matches.entry(flow) {
            Entry::Vacant(entry) => {
                entry.insert(conjunctions);
            }
            Entry::Occupied(mut entry) => {
                let existing = entry.get_mut();
                if existing.is_empty() || conjunctions.is_empty() {
                    // an unconditional match subsumes conjunction clauses
                    existing.clear();
                } else {
                    debug_assert_eq!(conjunctions.len(), 1);
                    existing.extend(conjunctions);
                }
            }
        }
    }
}

impl Display for Matches {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for (flow, conjunctions) in self.iter() {
            write!(f, "{flow}")?;
            for c in conjunctions {
                write!(f, " conjunction({}, {}/{})", c.id, c.clause, c.n_clauses)?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

pub fn to_matches(expr: &Expr, strings: &StringMap) -> Matches {
    let mut out = Matches::default();
    match expr {
        Expr::Boolean(true) => out.add(FlowMatch::default(), Vec::new()),
        Expr::Boolean(false) => {}
        Expr::Cmp(cmp) => add_cmp_flow(cmp, strings, &mut out),
        Expr::And(subs) => add_conjunction(subs, strings, &mut out),
        Expr::Or(subs) => {
            for sub in subs {
                match sub {
                    Expr::Cmp(cmp) => add_cmp_flow(cmp, strings, &mut out),
                    Expr::And(grand) => add_conjunction(grand, strings, &mut out),
                    _ => debug_assert!(false, "operand of a normalized OR"),
                }
            }
        }
    }
    out
}

fn field_of(cmp: &Cmp) -> FieldId {
    match cmp.symbol.kind() {
        SymbolKind::Field(field) | SymbolKind::StringField(field) => *field,
        _ => unreachable!("`{}` has no field; lower only annotated expressions", cmp.symbol.name()),
    }
}

/// The concrete alternatives a comparison leaf stands for. String
/// equality resolves through the map (unmapped names match nothing);
/// string disequality becomes every other mapped id.
fn cmp_alternatives(cmp: &Cmp, strings: &StringMap) -> Vec<(FieldId, u128, u128)> {
    let field = field_of(cmp);
    match &cmp.operand {
        Operand::Integer { value, mask } => {
            debug_assert_eq!(cmp.relop, Relop::Eq, "numeric comparisons lower as equalities");
            vec![(field, *value, *mask)]
        }
        Operand::String(s) => {
            let full = all_ones(field.width());
            match cmp.relop {
                Relop::Eq => strings
                    .get(s)
                    .map(|&id| (field, id as u128, full))
                    .into_iter()
                    .collect(),
                Relop::Ne => strings
                    .iter()
                    .filter(|(name, _)| *name != s)
                    .map(|(_, &id)| (field, id as u128, full))
                    .collect(),
                _ => {
                    debug_assert!(false, "ordering comparison on a string symbol");
                    Vec::new()
                }
            }
        }
    }
}

fn add_cmp_flow(cmp: &Cmp, strings: &StringMap, out: &mut Matches) {
    for (field, value, mask) in cmp_alternatives(cmp, strings) {
        let mut flow = FlowMatch::default();
        if flow.constrain(field, value, mask) {
            out.add(flow, Vec::new());
        }
    }
}

fn add_conjunction(children: &[Expr], strings: &StringMap, out: &mut Matches) {
    let mut base = FlowMatch::default();
    let mut clauses: Vec<Vec<(FieldId, u128, u128)>> = Vec::new();
    for child in children {
        let alternatives = match child {
            Expr::Cmp(cmp) => cmp_alternatives(cmp, strings),
            Expr::Or(grand) => grand
                .iter()
                .flat_map(|sub| match sub {
                    Expr::Cmp(cmp) => cmp_alternatives(cmp, strings),
                    _ => {
                        debug_assert!(false, "operand of a normalized AND");
                        Vec::new()
                    }
                })
                .collect(),
            _ => {
                debug_assert!(false, "operand of a normalized AND");
                return;
            }
        };
        match alternatives.len() {
            // an unmatchable constraint voids the whole disjunct
            0 => return,
            1 => {
                let (field, value, mask) = alternatives[0];
                if !base.constrain(field, value, mask) {
                    return;
                }
            }
            _ => clauses.push(alternatives),
        }
    }

    if clauses.is_empty() {
        out.add(base, Vec::new());
        return;
    }
    if clauses.len() == 1 {
        for (field, value, mask) in clauses.remove(0) {
            let mut flow = base.clone();
            if flow.constrain(field, value, mask) {
                out.add(flow, Vec::new());
            }
        }
        return;
    }

    out.n_conjunctions += 1;
    let id = out.n_conjunctions;
    let n_clauses = clauses.len() as u32;
    for (clause, alternatives) in clauses.into_iter().enumerate() {
        for (field, value, mask) in alternatives {
            let mut flow = base.clone();
            if flow.constrain(field, value, mask) {
                out.add(flow, vec![Conjunction { id, clause: clause as u32, n_clauses }]);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::symtab::SymTable;

    use super::*;

    fn symtab() -> SymTable {
        let mut symtab = SymTable::new();
        symtab.add_field("eth.type", FieldId::EthType, None, true);
        symtab.add_predicate("ip4", "eth.type == 0x800");
        symtab.add_predicate("ip6", "eth.type == 0x86dd");
        symtab.add_predicate("ip", "ip4 || ip6");
        symtab.add_field("ip.proto", FieldId::IpProto, Some("ip"), true);
        symtab.add_predicate("tcp", "ip.proto == 6");
        symtab.add_field("tcp.dst", FieldId::TcpDst, Some("tcp"), false);
        symtab.add_field("tcp.src", FieldId::TcpSrc, Some("tcp"), false);
        symtab.add_field("ip4.src", FieldId::Ip4Src, Some("ip4"), false);
        symtab.add_field("eth.src", FieldId::EthSrc, None, false);
        symtab.add_string("inport", FieldId::Reg(6), None);
        symtab.add_string("outport", FieldId::Reg(7), None);
        symtab
    }

    fn ports() -> StringMap {
        let mut ports = StringMap::default();
        ports.insert("eth0".to_string(), 5);
        ports.insert("eth1".to_string(), 6);
        ports.insert("LOCAL".to_string(), 0xfffe);
        ports
    }

    fn lowered(input: &str) -> String {
        let symtab = symtab();
        let expr = Expr::parse(input, &symtab)
            .expect(input)
            .annotate(&symtab)
            .expect(input)
            .simplify()
            .normalize();
        assert!(expr.is_normalized(), "{input}");
        expr.to_matches(&ports()).to_string()
    }

    #[test]
    fn single_conjunct_is_one_match() {
        assert_eq!(
            lowered("ip4 && tcp.dst == 80"),
            "eth.type=0x800,ip.proto=6,tcp.dst=80\n"
        );
    }

    #[test]
    fn set_alone_is_plain_matches() {
        assert_eq!(
            lowered("tcp.dst == {80, 443}"),
            "eth.type=0x800,ip.proto=6,tcp.dst=80\n\
             eth.type=0x86dd,ip.proto=6,tcp.dst=80\n\
             eth.type=0x800,ip.proto=6,tcp.dst=443\n\
             eth.type=0x86dd,ip.proto=6,tcp.dst=443\n"
        );
    }

    #[test]
    fn masked_value_is_one_match() {
        assert_eq!(
            lowered("ip4.src == 10.0.0.0/8"),
            "eth.type=0x800,ip4.src=10.0.0.0/8\n"
        );
    }

    #[test]
    fn single_bit_of_a_field() {
        assert_eq!(
            lowered("eth.src[0] == 1"),
            "eth.src=00:00:00:00:00:01/00:00:00:00:00:01\n"
        );
    }

    #[test]
    fn two_sets_become_a_conjunction_group() {
        let symtab = symtab();
        let expr = Expr::parse("tcp.dst == {80, 443} && tcp.src == {1, 2}", &symtab)
            .expect("parse")
            .simplify()
            .normalize();
        let matches = expr.to_matches(&ports());
        assert_eq!(matches.n_conjunctions(), 1);
        assert_eq!(
            matches.to_string(),
            "tcp.dst=80 conjunction(1, 0/2)\n\
             tcp.dst=443 conjunction(1, 0/2)\n\
             tcp.src=1 conjunction(1, 1/2)\n\
             tcp.src=2 conjunction(1, 1/2)\n"
        );
    }

    #[test]
    fn string_equality_resolves_through_the_map() {
        assert_eq!(lowered("inport == \"eth1\""), "reg6=6\n");
        assert_eq!(lowered("inport == \"missing\""), "");
    }

    #[test]
    fn string_disequality_matches_every_other_id() {
        assert_eq!(lowered("inport != \"eth0\""), "reg6=6\nreg6=65534\n");
    }

    #[test]
    fn string_disequalities_form_a_conjunction_group() {
        let symtab = symtab();
        let expr = Expr::parse("inport != \"eth0\" && outport != \"eth1\"", &symtab)
            .expect("parse")
            .simplify()
            .normalize();
        let matches = expr.to_matches(&ports());
        assert_eq!(matches.n_conjunctions(), 1);
        assert_eq!(
            matches.to_string(),
            "reg6=6 conjunction(1, 0/2)\n\
             reg6=65534 conjunction(1, 0/2)\n\
             reg7=5 conjunction(1, 1/2)\n\
             reg7=65534 conjunction(1, 1/2)\n"
        );
    }

    #[test]
    fn boolean_expressions() {
        let strings = StringMap::default();
        let always = Expr::Boolean(true).to_matches(&strings);
        assert_eq!(always.len(), 1);
        assert!(always.iter().next().is_some_and(|(flow, _)| flow.is_catchall()));
        let never = Expr::Boolean(false).to_matches(&strings);
        assert!(never.is_empty());
    }

    #[test]
    fn identical_matches_deduplicate() {
        assert_eq!(lowered("tcp.src == 1 || tcp.src == 1"), lowered("tcp.src == 1"));
    }
}
