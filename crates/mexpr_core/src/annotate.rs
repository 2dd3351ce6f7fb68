//! Predicate and sub-field expansion with prerequisite propagation.
//!
//! After annotation an expression mentions only concrete fields and string
//! symbols: predicate references are replaced by their (annotated)
//! defining expression, sub-field comparisons are shifted onto their base
//! field, and the prerequisite of every symbol along the way is conjoined
//! in front of the rewritten node. Expansion copies sub-trees, so the
//! symbol table is never mutated and the result owns its nodes.

use std::rc::Rc;

use tracing::trace;

use crate::{
    error::CompileError,
    expr::{Cmp, Expr, Operand, Relop},
    parse,
    symtab::{SymTable, Symbol, SymbolKind},
};

pub fn annotate(expr: Expr, symtab: &SymTable) -> Result<Expr, CompileError> {
    annotate_expr(expr, symtab, &mut Vec::new())
}

/// Builds the conjoined, annotated prerequisite of `symbol` alone, without
/// the symbol itself. `None` means the symbol is unconditional.
pub(crate) fn prereq_expr(
    symbol: &Rc<Symbol>,
    symtab: &SymTable,
) -> Result<Option<Expr>, CompileError> {
    let mut parts = Vec::new();
    let mut nesting = Vec::new();
    let mut current = Rc::clone(symbol);
    loop {
        if let Some(text) = current.prereq() {
            nesting.push(current.name().to_string());
            let result = parse_and_annotate(text, current.name(), symtab, &mut nesting);
            nesting.pop();
            parts.push(result?);
        }
        match current.kind() {
            SymbolKind::Subfield { parent, .. } => current = Rc::clone(parent),
            _ => break,
        }
    }
    if parts.is_empty() {
        Ok(None)
    } else {
        Ok(Some(Expr::conjoin(parts)))
    }
}

fn annotate_expr(
    expr: Expr,
    symtab: &SymTable,
    nesting: &mut Vec<String>,
) -> Result<Expr, CompileError> {
    match expr {
        Expr::Cmp(cmp) => annotate_cmp(cmp, symtab, nesting),
        Expr::And(subs) => {
            let subs = subs
                .into_iter()
                .map(|s| annotate_expr(s, symtab, nesting))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Expr::conjoin(subs))
        }
        Expr::Or(subs) => {
            let subs = subs
                .into_iter()
                .map(|s| annotate_expr(s, symtab, nesting))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Expr::disjoin(subs))
        }
        boolean @ Expr::Boolean(_) => Ok(boolean),
    }
}

fn parse_and_annotate(
    text: &str,
    owner: &str,
    symtab: &SymTable,
    nesting: &mut Vec<String>,
) -> Result<Expr, CompileError> {
    trace!(symbol = owner, text, "expanding");
    let parsed = parse::parse(text, symtab).map_err(|e| wrap(e, text, owner))?;
    annotate_expr(parsed, symtab, nesting).map_err(|e| wrap(e, text, owner))
}

fn wrap(error: CompileError, text: &str, owner: &str) -> CompileError {
    match error {
        // cycles and already-wrapped errors read better untouched
        CompileError::PrereqCycle { .. } | CompileError::Prerequisite { .. } => error,
        other => CompileError::Prerequisite {
            text: text.to_string(),
            symbol: owner.to_string(),
            source: Box::new(other),
        },
    }
}

fn annotate_cmp(
    cmp: Cmp,
    symtab: &SymTable,
    nesting: &mut Vec<String>,
) -> Result<Expr, CompileError> {
    if nesting.iter().any(|n| n == cmp.symbol.name()) {
        return Err(CompileError::PrereqCycle { name: cmp.symbol.name().to_string() });
    }

    // (owner, prerequisite text), innermost symbol first
    let mut pending: Vec<(String, String)> = Vec::new();
    let mut symbol = Rc::clone(&cmp.symbol);
    let mut operand = cmp.operand;
    if let Some(text) = symbol.prereq() {
        pending.push((symbol.name().to_string(), text.to_string()));
    }

    // rewrite sub-field comparisons onto the base field
    loop {
        let parent = match symbol.kind() {
            SymbolKind::Subfield { parent, ofs } => {
                if let Operand::Integer { value, mask } = operand {
                    operand = Operand::Integer { value: value << ofs, mask: mask << ofs };
                }
                Rc::clone(parent)
            }
            _ => break,
        };
        if let Some(text) = parent.prereq() {
            pending.push((parent.name().to_string(), text.to_string()));
        }
        symbol = parent;
    }

    let base = if let SymbolKind::Predicate(expansion) = symbol.kind() {
        let truth = cmp.relop == Relop::Ne;
        let expansion = expansion.clone();
        nesting.push(symbol.name().to_string());
        let result = parse_and_annotate(&expansion, symbol.name(), symtab, nesting);
        nesting.pop();
        let expanded = result?;
        if truth {
            expanded
        } else {
            expanded.negate()
        }
    } else {
        Expr::Cmp(Cmp { symbol, relop: cmp.relop, operand })
    };

    let mut parts = Vec::with_capacity(pending.len() + 1);
    for (owner, text) in pending {
        nesting.push(owner.clone());
        let result = parse_and_annotate(&text, &owner, symtab, nesting);
        nesting.pop();
        parts.push(result?);
    }
    parts.push(base);
    Ok(Expr::conjoin(parts))
}

#[cfg(test)]
mod tests {
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
        symtab.add_field("vlan.tci", FieldId::VlanTci, None, false);
        symtab.add_predicate("vlan.present", "vlan.tci[12]");
        symtab
            .add_subfield("vlan.pcp", Some("vlan.present"), "vlan.tci[13..15]")
            .expect("vlan.pcp");
        symtab.add_field("xreg0", FieldId::Xreg(0), None, false);
        symtab.add_field("bad_prereq", FieldId::Xreg(1), Some("xyzzy"), false);
        symtab.add_field("self_recurse", FieldId::Xreg(2), Some("self_recurse != 0"), false);
        symtab.add_field("mutual_recurse_1", FieldId::Reg(0), Some("mutual_recurse_2 != 0"), false);
        symtab.add_field("mutual_recurse_2", FieldId::Reg(1), Some("mutual_recurse_1 != 0"), false);
        symtab
    }

    fn annotated(input: &str) -> String {
        let symtab = symtab();
        let expr = Expr::parse(input, &symtab).expect(input);
        expr.annotate(&symtab).expect(input).to_string()
    }

    #[test]
    fn predicate_expansion() {
        assert_eq!(annotated("ip4"), "eth.type == 0x800");
        assert_eq!(annotated("!ip4"), "eth.type != 0x800");
        assert_eq!(annotated("ip"), "eth.type == 0x800 || eth.type == 0x86dd");
        assert_eq!(annotated("!ip"), "eth.type != 0x800 && eth.type != 0x86dd");
    }

    #[test]
    fn prereqs_conjoin_in_front() {
        assert_eq!(
            annotated("ip4 && tcp.dst == 80"),
            "eth.type == 0x800 && (eth.type == 0x800 || eth.type == 0x86dd) \
             && ip.proto == 6 && tcp.dst == 80"
        );
    }

    #[test]
    fn subfield_shifts_onto_base() {
        assert_eq!(
            annotated("vlan.pcp == 4"),
            "vlan.tci[12] != 0 && vlan.tci[13..15] == 4"
        );
    }

    #[test]
    fn plain_fields_are_untouched() {
        assert_eq!(annotated("xreg0[3] == 1"), "xreg0[3] == 1");
    }

    #[test]
    fn unknown_prereq_is_reported_with_context() {
        let symtab = symtab();
        let expr = Expr::parse("bad_prereq == 1", &symtab).expect("parse");
        match expr.annotate(&symtab) {
            Err(CompileError::Prerequisite { symbol, source, .. }) => {
                assert_eq!(symbol, "bad_prereq");
                assert!(matches!(*source, CompileError::UnknownSymbol { .. }));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn self_recursion_is_a_cycle() {
        let symtab = symtab();
        let expr = Expr::parse("self_recurse == 1", &symtab).expect("parse");
        assert_eq!(
            expr.annotate(&symtab),
            Err(CompileError::PrereqCycle { name: "self_recurse".to_string() })
        );
    }

    #[test]
    fn mutual_recursion_is_a_cycle() {
        let symtab = symtab();
        let expr = Expr::parse("mutual_recurse_1 == 1", &symtab).expect("parse");
        assert_eq!(
            expr.annotate(&symtab),
            Err(CompileError::PrereqCycle { name: "mutual_recurse_1".to_string() })
        );
    }
}
