//! Algebraic simplification.
//!
//! Boolean identities fold away, same-symbol comparisons merge, and the
//! comparisons a flow table cannot install directly are rewritten into
//! unions of equalities:
//!
//! - `x < V` holds exactly when `x` agrees with `V` on some prefix and has
//!   a 0 where `V` has a 1 just below it; dually for `>`. `<=` and `>=`
//!   add the exact value. Each case is one prefix equality.
//! - `x != V` holds exactly when some masked bit of `x` differs from `V`,
//!   one single-bit equality per mask bit.
//! - A masked equality on a must-crack field becomes the union of the
//!   exact values the mask admits.
//!
//! String comparisons survive unchanged; the matcher resolves them.

use std::rc::Rc;

use mexpr_lex::{all_ones, contiguous_run};

use crate::crush::{self, CrushOutcome};
use crate::expr::{Cmp, Expr, Operand, Relop};
use crate::symtab::Symbol;

pub fn simplify(expr: Expr) -> Expr {
    match expr {
        Expr::Cmp(cmp) => simplify_cmp(cmp),
        Expr::And(subs) => simplify_andor(true, subs),
        Expr::Or(subs) => simplify_andor(false, subs),
        boolean @ Expr::Boolean(_) => boolean,
    }
}

fn simplify_andor(is_and: bool, children: Vec<Expr>) -> Expr {
    let mut out = Vec::with_capacity(children.len());
    for child in children {
        match simplify(child) {
            Expr::Boolean(b) if b == is_and => {}
            boolean @ Expr::Boolean(_) => return boolean,
            Expr::And(subs) if is_and => out.extend(subs),
            Expr::Or(subs) if !is_and => out.extend(subs),
            e => out.push(e),
        }
    }
    let mut out = match crush::same_symbol(is_and, out) {
        CrushOutcome::Boolean(b) => return Expr::Boolean(b),
        CrushOutcome::Children(children) => children,
    };
    match out.len() {
        0 => Expr::Boolean(is_and),
        1 => out.remove(0),
        _ if is_and => Expr::And(out),
        _ => Expr::Or(out),
    }
}

fn simplify_cmp(cmp: Cmp) -> Expr {
    let Cmp { symbol, relop, operand } = cmp;
    let (value, mask) = match operand {
        Operand::String(s) => {
            return Expr::Cmp(Cmp { symbol, relop, operand: Operand::String(s) });
        }
        Operand::Integer { value, mask } => (value, mask),
    };
    if symbol.is_predicate() {
        return Expr::Cmp(Cmp { symbol, relop, operand: Operand::Integer { value, mask } });
    }
    match relop {
        Relop::Eq => crack_masked_eq(symbol, value, mask),
        Relop::Ne => expand_ne(symbol, value, mask),
        ordering => expand_relational(symbol, ordering, value, mask),
    }
}

fn eq_cmp(symbol: &Rc<Symbol>, value: u128, mask: u128) -> Expr {
    Expr::Cmp(Cmp {
        symbol: Rc::clone(symbol),
        relop: Relop::Eq,
        operand: Operand::Integer { value, mask },
    })
}

fn crack_masked_eq(symbol: Rc<Symbol>, value: u128, mask: u128) -> Expr {
    let full = all_ones(symbol.width());
    if !symbol.must_crack() || mask == full {
        return eq_cmp(&symbol, value, mask);
    }
    let free = full & !mask;
    let mut alts = Vec::new();
    let mut sub: u128 = 0;
    loop {
        alts.push(eq_cmp(&symbol, value | sub, full));
        sub = sub.wrapping_sub(free) & free;
        if sub == 0 {
            break;
        }
    }
    Expr::disjoin(alts)
}

fn expand_ne(symbol: Rc<Symbol>, value: u128, mask: u128) -> Expr {
    let mut alts = Vec::new();
    let mut rest = mask;
    while rest != 0 {
        let bit = rest & rest.wrapping_neg();
        rest &= !bit;
        alts.push(eq_cmp(&symbol, !value & bit, bit));
    }
    Expr::disjoin(alts)
}

fn expand_relational(symbol: Rc<Symbol>, relop: Relop, value: u128, mask: u128) -> Expr {
    let Some((start, n_bits)) = contiguous_run(mask) else {
        // the parser only admits a single run of 1-bits here
        debug_assert!(mask == 0);
        return Expr::Boolean(matches!(relop, Relop::Le | Relop::Ge));
    };
    let lt = matches!(relop, Relop::Lt | Relop::Le);
    let mut alts = Vec::new();
    if matches!(relop, Relop::Le | Relop::Ge) {
        alts.push(eq_cmp(&symbol, value, mask));
    }
    for p in start..start + n_bits {
        let bit = 1u128 << p;
        if ((value & bit) != 0) == lt {
            let above = mask & !(bit | (bit - 1));
            let v = (value & above) | if lt { 0 } else { bit };
            alts.push(eq_cmp(&symbol, v, above | bit));
        }
    }
    Expr::disjoin(alts)
}
