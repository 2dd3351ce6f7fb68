//! Direct evaluation of annotated expressions under a variable
//! assignment, the oracle the transformation properties are checked
//! against.

use fxhash::FxHashMap;

use mexpr_core::expr::{Cmp, Expr, Operand, Relop};

/// Values for the fields an expression mentions, keyed by symbol name.
/// Missing numeric fields read as zero, missing strings as empty.
#[derive(Debug, Default)]
pub struct Assignment {
    pub ints: FxHashMap<String, u128>,
    pub strings: FxHashMap<String, String>,
}

pub fn evaluate(expr: &Expr, env: &Assignment) -> bool {
    match expr {
        Expr::Boolean(b) => *b,
        Expr::And(subs) => subs.iter().all(|s| evaluate(s, env)),
        Expr::Or(subs) => subs.iter().any(|s| evaluate(s, env)),
        Expr::Cmp(Cmp { symbol, relop, operand }) => match operand {
            Operand::String(expected) => {
                let actual = env.strings.get(symbol.name()).map(String::as_str).unwrap_or("");
                (actual == expected) == (*relop == Relop::Eq)
            }
            Operand::Integer { value, mask } => {
                let field = env.ints.get(symbol.name()).copied().unwrap_or(0);
                relop.evaluate(field & mask, *value)
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use mexpr_core::fields::FieldId;
    use mexpr_core::symtab::SymTable;

    use super::*;

    #[test]
    fn numeric_and_string_comparisons() {
        let mut symtab = SymTable::new();
        symtab.add_field("n0", FieldId::Reg(0), None, false);
        symtab.add_string("s0", FieldId::Reg(1), None);
        let expr = Expr::parse("n0 == 3 && s0 == \"1\"", &symtab).expect("parse");

        let mut env = Assignment::default();
        env.ints.insert("n0".to_string(), 3);
        env.strings.insert("s0".to_string(), "1".to_string());
        assert!(evaluate(&expr, &env));

        env.ints.insert("n0".to_string(), 2);
        assert!(!evaluate(&expr, &env));
    }

    #[test]
    fn masked_window() {
        let mut symtab = SymTable::new();
        symtab.add_field("n0", FieldId::Reg(0), None, false);
        let expr = Expr::parse("n0[1..2] == 2", &symtab).expect("parse");
        let mut env = Assignment::default();
        env.ints.insert("n0".to_string(), 0b101);
        assert!(evaluate(&expr, &env));
        env.ints.insert("n0".to_string(), 0b111);
        assert!(!evaluate(&expr, &env));
    }
}
