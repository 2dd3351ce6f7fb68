//! Disjunctive normal form.
//!
//! The normalizer distributes `AND` over `OR` until every remaining `OR`
//! child of an `AND` is a single-symbol value set, merges same-symbol
//! comparisons along the way, and drops any top-level disjunct strictly
//! implied by another. Value sets deliberately survive inside `AND`s so
//! the matcher can install them as conjunction clauses instead of taking
//! their cross product.

use std::collections::{BTreeMap, BTreeSet};

use crate::crush::{self, CrushOutcome};
use crate::expr::{Cmp, Expr, Operand, Relop};

pub fn normalize(expr: Expr) -> Expr {
    match expr {
        Expr::And(subs) => normalize_and(subs),
        Expr::Or(subs) => normalize_or(subs),
        leaf => leaf,
    }
}

fn normalize_and(children: Vec<Expr>) -> Expr {
    let mut subs = Vec::with_capacity(children.len());
    for child in children {
        match normalize(child) {
            Expr::Boolean(true) => {}
            Expr::Boolean(false) => return Expr::Boolean(false),
            Expr::And(grand) => subs.extend(grand),
            e => subs.push(e),
        }
    }
    let mut subs = match crush::same_symbol(true, subs) {
        CrushOutcome::Boolean(b) => return Expr::Boolean(b),
        CrushOutcome::Children(subs) => subs,
    };
    if subs.is_empty() {
        return Expr::Boolean(true);
    }
    if subs.len() == 1 {
        return subs.remove(0);
    }

    // crush disjunction: distribute over an OR child that is not a value set
    let position = subs
        .iter()
        .position(|s| matches!(s, Expr::Or(_)) && s.comparison_symbol().is_none());
    if let Some(position) = position {
        if let Expr::Or(alternatives) = subs.remove(position) {
            let disjuncts = alternatives
                .into_iter()
                .map(|alternative| {
                    let mut conjunction = subs.clone();
                    conjunction.push(alternative);
                    normalize_and(conjunction)
                })
                .collect();
            return normalize_or(disjuncts);
        }
    }
    Expr::And(subs)
}

fn normalize_or(children: Vec<Expr>) -> Expr {
    let mut subs = Vec::with_capacity(children.len());
    for child in children {
        match normalize(child) {
            Expr::Boolean(false) => {}
            Expr::Boolean(true) => return Expr::Boolean(true),
            Expr::Or(grand) => subs.extend(grand),
            e => subs.push(e),
        }
    }
    let subs = match crush::same_symbol(false, subs) {
        CrushOutcome::Boolean(b) => return Expr::Boolean(b),
        CrushOutcome::Children(subs) => subs,
    };
    let mut subs = absorb(subs);
    match subs.len() {
        0 => Expr::Boolean(false),
        1 => subs.remove(0),
        _ => Expr::Or(subs),
    }
}

/// Drops every disjunct strictly implied by another; of equal disjuncts
/// the first stays.
fn absorb(subs: Vec<Expr>) -> Vec<Expr> {
    if subs.len() < 2 {
        return subs;
    }
    let maps: Vec<Option<ConstraintMap>> = subs.iter().map(constraint_map).collect();
    let n = subs.len();
    let keep: Vec<bool> = (0..n)
        .map(|i| {
            let Some(mi) = &maps[i] else {
                return true;
            };
            !(0..n).any(|j| {
                if i == j {
                    return false;
                }
                let Some(mj) = &maps[j] else {
                    return false;
                };
                implies(mi, mj) && (j < i || !implies(mj, mi))
            })
        })
        .collect();
    subs.into_iter()
        .zip(keep)
        .filter_map(|(sub, keep)| keep.then_some(sub))
        .collect()
}

/// Per-symbol constraint of one disjunct.
enum Constraint {
    NumEq { value: u128, mask: u128 },
    NumSet(Vec<(u128, u128)>),
    StrEq(String),
    StrSet(BTreeSet<String>),
    StrNe(BTreeSet<String>),
}

type ConstraintMap = BTreeMap<String, Constraint>;

fn constraint_map(expr: &Expr) -> Option<ConstraintMap> {
    let mut map = ConstraintMap::new();
    match expr {
        Expr::Cmp(_) | Expr::Or(_) => add_constraint(&mut map, expr)?,
        Expr::And(subs) => {
            for sub in subs {
                add_constraint(&mut map, sub)?;
            }
        }
        Expr::Boolean(_) => return None,
    }
    Some(map)
}

fn add_constraint(map: &mut ConstraintMap, member: &Expr) -> Option<()> {
    let name = member.comparison_symbol()?.name().to_string();
    let constraint = match member {
        Expr::Cmp(cmp) => cmp_constraint(cmp)?,
        Expr::Or(subs) => {
            let mut num = Vec::new();
            let mut strs = BTreeSet::new();
            for sub in subs {
                match sub {
                    Expr::Cmp(Cmp {
                        relop: Relop::Eq,
                        operand: Operand::Integer { value, mask },
                        ..
                    }) => num.push((*value, *mask)),
                    Expr::Cmp(Cmp {
                        relop: Relop::Eq,
                        operand: Operand::String(s),
                        ..
                    }) => {
                        strs.insert(s.clone());
                    }
                    _ => return None,
                }
            }
            match (num.is_empty(), strs.is_empty()) {
                (false, true) => Constraint::NumSet(num),
                (true, false) => Constraint::StrSet(strs),
                _ => return None,
            }
        }
        _ => return None,
    };
    use std::collections::btree_map::Entry;
    match map.entry(name) {
        Entry::Vacant(entry) => {
            entry.insert(constraint);
        }
        Entry::Occupied(mut entry) => match (entry.get_mut(), constraint) {
            (Constraint::StrNe(existing), Constraint::StrNe(more)) => existing.extend(more),
            // a symbol constrained twice in other ways is left to the matcher
            _ => return None,
        },
    }
    Some(())
}

fn cmp_constraint(cmp: &Cmp) -> Option<Constraint> {
    match (&cmp.operand, cmp.relop) {
        (Operand::Integer { value, mask }, Relop::Eq) => {
            Some(Constraint::NumEq { value: *value, mask: *mask })
        }
        (Operand::String(s), Relop::Eq) => Some(Constraint::StrEq(s.clone())),
        (Operand::String(s), Relop::Ne) => {
            Some(Constraint::StrNe(BTreeSet::from([s.clone()])))
        }
        _ => None,
    }
}

/// `a` implies `b` when every packet satisfying `a` satisfies `b`.
fn implies(a: &ConstraintMap, b: &ConstraintMap) -> bool {
    b.iter().all(|(name, cb)| match a.get(name) {
        Some(ca) => constraint_implies(ca, cb),
        None => false,
    })
}

fn num_eq_implies(value: u128, mask: u128, c: &Constraint) -> bool {
    match c {
        Constraint::NumEq { value: bv, mask: bm } => bm & !mask == 0 && value & bm == *bv,
        Constraint::NumSet(alts) => {
            alts.iter().any(|&(bv, bm)| bm & !mask == 0 && value & bm == bv)
        }
        _ => false,
    }
}

fn str_eq_implies(s: &str, c: &Constraint) -> bool {
    match c {
        Constraint::StrEq(v) => s == v,
        Constraint::StrSet(set) => set.contains(s),
        Constraint::StrNe(set) => !set.contains(s),
        _ => false,
    }
}

fn constraint_implies(a: &Constraint, b: &Constraint) -> bool {
    match a {
        Constraint::NumEq { value, mask } => num_eq_implies(*value, *mask, b),
        Constraint::NumSet(alts) => alts.iter().all(|&(v, m)| num_eq_implies(v, m, b)),
        Constraint::StrEq(s) => str_eq_implies(s, b),
        Constraint::StrSet(set) => set.iter().all(|s| str_eq_implies(s, b)),
        Constraint::StrNe(na) => matches!(b, Constraint::StrNe(nb) if nb.is_subset(na)),
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use crate::fields::FieldId;
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
        symtab.add_field("reg0", FieldId::Reg(0), None, false);
        symtab.add_field("reg1", FieldId::Reg(1), None, false);
        symtab.add_field("reg2", FieldId::Reg(2), None, false);
        symtab.add_string("inport", FieldId::Reg(6), None);
        symtab
    }

    fn normalized(input: &str) -> String {
        let symtab = symtab();
        let expr = Expr::parse(input, &symtab).expect(input).simplify().normalize();
        assert!(expr.is_normalized(), "{input}");
        expr.to_string()
    }

    #[rstest]
    #[case("tcp.dst == {80, 443}", "tcp.dst == 80 || tcp.dst == 443")]
    #[case(
        "reg0 == 1 && (reg1 == 2 || reg2 == 3)",
        "reg0 == 1 && reg1 == 2 || reg0 == 1 && reg2 == 3"
    )]
    #[case("reg0 == 1 && (reg1 == 2 || reg0 == 2)", "reg0 == 1 && reg1 == 2")]
    #[case("(reg0 == 1 && reg1 == 2) || reg0 == 1", "reg0 == 1")]
    #[case("reg0 == {1, 2} && reg0 == {2, 3}", "reg0 == 2")]
    #[case(
        "reg0 == {1, 2} && reg1 == {2, 3}",
        "(reg0 == 1 || reg0 == 2) && (reg1 == 2 || reg1 == 3)"
    )]
    #[case("reg0 == {1, 2} || reg0 == {2, 3}", "reg0 == 1 || reg0 == 2 || reg0 == 3")]
    #[case("inport == \"a\" || inport != \"b\"", "inport != \"b\"")]
    #[case("inport != \"a\" || inport != \"b\"", "1")]
    #[case("inport != \"a\" && inport != \"b\"", "inport != \"a\" && inport != \"b\"")]
    fn shapes(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(normalized(input), expected, "input: {input}");
    }

    #[test]
    fn prerequisites_collapse() {
        let symtab = symtab();
        let expr = Expr::parse("ip4 && tcp.dst == 80", &symtab)
            .expect("parse")
            .annotate(&symtab)
            .expect("annotate")
            .simplify()
            .normalize();
        assert!(expr.is_normalized());
        assert_eq!(
            expr.to_string(),
            "eth.type == 0x800 && ip.proto == 6 && tcp.dst == 80"
        );
    }

    #[test]
    fn normalized_form_allows_sets_under_and() {
        let symtab = symtab();
        let expr = Expr::parse("reg0 == {1, 2} && reg1 == {2, 3}", &symtab)
            .expect("parse")
            .simplify()
            .normalize();
        assert!(expr.is_normalized());
        assert!(matches!(&expr, Expr::And(subs) if subs.len() == 2));
    }

    #[test]
    fn distribution_terminates_and_preserves_invariants() {
        let symtab = symtab();
        let expr = Expr::parse(
            "(reg0 == 1 || reg1 == 1) && (reg0 == 2 || reg1 == 2) && (reg0 == 3 || reg2 == 3)",
            &symtab,
        )
        .expect("parse")
        .simplify()
        .normalize();
        assert!(expr.is_normalized());
        assert!(expr.honors_invariants());
    }
}
