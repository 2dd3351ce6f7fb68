//! Classifier lookups must agree with direct evaluation of the source
//! expression over every assignment.

use mexpr_cls::{Classifier, Packet};
use mexpr_core::prelude::*;

fn symtab() -> SymTable {
    let mut symtab = SymTable::new();
    symtab.add_field("a", FieldId::Reg(0), None, false);
    symtab.add_field("b", FieldId::Reg(1), None, false);
    symtab.add_field("c", FieldId::Reg(2), None, false);
    symtab
}

/// Evaluates `expr` directly; fields a, b, c are 3 bits each.
fn evaluate(expr: &Expr, a: u128, b: u128, c: u128) -> bool {
    match expr {
        Expr::Boolean(v) => *v,
        Expr::And(subs) => subs.iter().all(|s| evaluate(s, a, b, c)),
        Expr::Or(subs) => subs.iter().any(|s| evaluate(s, a, b, c)),
        Expr::Cmp(cmp) => {
            let field = match cmp.symbol.name() {
                "a" => a,
                "b" => b,
                "c" => c,
                other => panic!("unexpected symbol {other}"),
            };
            let Operand::Integer { value, mask } = &cmp.operand else {
                panic!("string comparison in a numeric-only test");
            };
            cmp.relop.evaluate(field & mask, *value)
        }
    }
}

fn check(input: &str) {
    let symtab = symtab();
    let expr = Expr::parse(input, &symtab).expect(input);
    let compiled = expr.clone().simplify().normalize();
    assert!(compiled.is_normalized(), "{input}");
    let matches = compiled.to_matches(&StringMap::default());

    let mut cls = Classifier::new();
    for (flow, conjunctions) in matches.iter() {
        cls.insert(flow.clone(), 0, conjunctions.to_vec());
    }

    for assignment in 0u32..1 << 9 {
        let (a, b, c) = (
            (assignment & 7) as u128,
            ((assignment >> 3) & 7) as u128,
            ((assignment >> 6) & 7) as u128,
        );
        let expected = evaluate(&expr, a, b, c);
        let mut packet = Packet::new();
        packet.set(FieldId::Reg(0), a).set(FieldId::Reg(1), b).set(FieldId::Reg(2), c);
        let found = cls.lookup(&packet).is_some();
        assert_eq!(
            found, expected,
            "{input} with a={a} b={b} c={c}, compiled to {compiled}"
        );
    }
}

#[test]
fn shared_conjunct_disjunction() {
    check("a == 1 && b == 2 || a == 1 && c == 3");
}

#[test]
fn sets_and_ranges() {
    check("a == {1, 2} && b == {2, 3}");
    check("a < 5 && b >= 3");
    check("a != 6 || b <= 1");
}

#[test]
fn negations_and_nesting() {
    check("!(a == 1 && (b == 2 || c == 3))");
    check("!(a != 1) && (b == 2 || b == 3)");
    check("(a == 1 || b == 1) && (a == 2 || c == 2)");
}

#[test]
fn masked_windows() {
    check("a[0..1] == 2 && b[1] == 1");
    check("a[1..2] != 1 || c == 0");
}

#[test]
fn degenerate_booleans() {
    check("1");
    check("0");
    check("a == 0 || 1");
    check("a == 0 && 0");
}
