//! # Expression AST
//!
//! ```text
//!  text -> parse -> annotate -> simplify -> normalize -> to_matches
//! ```
//!
//! An [Expr] is a tree of comparisons combined with `AND` and `OR`. Each
//! stage consumes its input and returns a rewritten tree (or an error);
//! after annotation the tree mentions only concrete fields and strings,
//! and after normalization it is an `OR` of `AND`s of comparison leaves
//! ready for [to_matches](Expr::to_matches).

use std::fmt::{self, Display, Formatter};
use std::rc::Rc;

use mexpr_lex::{all_ones, contiguous_run, format_int, format_masked, quote_string};

use crate::{
    annotate,
    error::CompileError,
    matches::{self, Matches, StringMap},
    normalize, parse, simplify,
    symtab::{SymTable, Symbol},
};

/// Relational operator of a comparison leaf.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Relop {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Relop {
    /// The operator satisfied exactly when `self` is not.
    pub fn negate(self) -> Relop {
        match self {
            Relop::Eq => Relop::Ne,
            Relop::Ne => Relop::Eq,
            Relop::Lt => Relop::Ge,
            Relop::Ge => Relop::Lt,
            Relop::Gt => Relop::Le,
            Relop::Le => Relop::Gt,
        }
    }

    pub fn is_ordering(self) -> bool {
        matches!(self, Relop::Lt | Relop::Le | Relop::Gt | Relop::Ge)
    }

    pub fn evaluate(self, a: u128, b: u128) -> bool {
        match self {
            Relop::Eq => a == b,
            Relop::Ne => a != b,
            Relop::Lt => a < b,
            Relop::Le => a <= b,
            Relop::Gt => a > b,
            Relop::Ge => a >= b,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Relop::Eq => "==",
            Relop::Ne => "!=",
            Relop::Lt => "<",
            Relop::Le => "<=",
            Relop::Gt => ">",
            Relop::Ge => ">=",
        }
    }
}

impl Display for Relop {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Right-hand side of a comparison.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Operand {
    /// Numeric constant under a mask; `value & !mask == 0` always holds.
    Integer { value: u128, mask: u128 },
    String(String),
}

/// A comparison leaf. For a bare predicate reference the operand is the
/// integer zero and the operator encodes the sense: `!= 0` is the
/// predicate itself, `== 0` its negation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Cmp {
    pub symbol: Rc<Symbol>,
    pub relop: Relop,
    pub operand: Operand,
}

/// A match expression.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Expr {
    Cmp(Cmp),
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Boolean(bool),
}

impl Expr {
    /// Parses `input` against `symtab` into an unannotated expression.
    pub fn parse(input: &str, symtab: &SymTable) -> Result<Expr, CompileError> {
        parse::parse(input, symtab)
    }

    /// Expands predicates and sub-fields and conjoins prerequisites.
    pub fn annotate(self, symtab: &SymTable) -> Result<Expr, CompileError> {
        annotate::annotate(self, symtab)
    }

    /// Applies algebraic identities, constant folding and the rewrites
    /// that turn ordering and inequality comparisons into equalities.
    pub fn simplify(self) -> Expr {
        simplify::simplify(self)
    }

    /// Rewrites a simplified expression into disjunctive normal form.
    pub fn normalize(self) -> Expr {
        normalize::normalize(self)
    }

    /// Lowers a normalized expression to classifier matches.
    pub fn to_matches(&self, strings: &StringMap) -> Matches {
        matches::to_matches(self, strings)
    }

    /// The logical complement, with negation pushed down to the leaves.
    pub fn negate(self) -> Expr {
        match self {
            Expr::Cmp(mut cmp) => {
                cmp.relop = cmp.relop.negate();
                Expr::Cmp(cmp)
            }
            Expr::And(subs) => Expr::Or(subs.into_iter().map(Expr::negate).collect()),
            Expr::Or(subs) => Expr::And(subs.into_iter().map(Expr::negate).collect()),
            Expr::Boolean(b) => Expr::Boolean(!b),
        }
    }

    /// Conjunction of `parts`, flattening nested `AND`s and never creating
    /// a one-child node.
    pub(crate) fn conjoin(parts: Vec<Expr>) -> Expr {
        Expr::join(true, parts)
    }

    /// Disjunction of `parts`, dually to [conjoin](Expr::conjoin).
    pub(crate) fn disjoin(parts: Vec<Expr>) -> Expr {
        Expr::join(false, parts)
    }

    fn join(is_and: bool, parts: Vec<Expr>) -> Expr {
        let mut out = Vec::with_capacity(parts.len());
        for part in parts {
            match part {
                Expr::And(subs) if is_and => out.extend(subs),
                Expr::Or(subs) if !is_and => out.extend(subs),
                e => out.push(e),
            }
        }
        match out.len() {
            0 => Expr::Boolean(is_and),
            1 => out.remove(0),
            _ if is_and => Expr::And(out),
            _ => Expr::Or(out),
        }
    }

    /// Structural invariants that every stage maintains: `AND`/`OR` nodes
    /// have at least two children and no child of the same operator, and
    /// numeric comparisons have no value bits outside their mask.
    pub fn honors_invariants(&self) -> bool {
        match self {
            Expr::Cmp(cmp) => match &cmp.operand {
                Operand::Integer { value, mask } => value & !mask == 0,
                Operand::String(_) => !cmp.relop.is_ordering(),
            },
            Expr::And(subs) => {
                subs.len() >= 2
                    && subs
                        .iter()
                        .all(|s| !matches!(s, Expr::And(_)) && s.honors_invariants())
            }
            Expr::Or(subs) => {
                subs.len() >= 2
                    && subs
                        .iter()
                        .all(|s| !matches!(s, Expr::Or(_)) && s.honors_invariants())
            }
            Expr::Boolean(_) => true,
        }
    }

    /// The symbol this expression compares when it acts as a comparison
    /// leaf: a single comparison, or an `AND`/`OR` whose members all
    /// compare one symbol (a value set).
    pub fn comparison_symbol(&self) -> Option<&Rc<Symbol>> {
        match self {
            Expr::Cmp(cmp) => Some(&cmp.symbol),
            Expr::And(subs) | Expr::Or(subs) => {
                let mut symbol = None;
                for sub in subs {
                    let Expr::Cmp(cmp) = sub else {
                        return None;
                    };
                    match symbol {
                        None => symbol = Some(&cmp.symbol),
                        Some(s) if s == &cmp.symbol => {}
                        Some(_) => return None,
                    }
                }
                symbol
            }
            Expr::Boolean(_) => None,
        }
    }

    /// True in the form produced by [normalize](Expr::normalize): an `OR`
    /// of `AND`s whose children are comparison leaves or single-symbol
    /// value sets.
    pub fn is_normalized(&self) -> bool {
        match self {
            Expr::Cmp(_) | Expr::Boolean(_) => true,
            Expr::And(subs) => subs.iter().all(|s| s.comparison_symbol().is_some()),
            Expr::Or(subs) => subs.iter().all(|s| match s {
                Expr::Or(_) => false,
                other => other.is_normalized(),
            }),
        }
    }
}

impl Display for Cmp {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let name = self.symbol.name();
        let (value, mask) = match &self.operand {
            Operand::String(s) => {
                return write!(f, "{} {} {}", name, self.relop, quote_string(s));
            }
            Operand::Integer { value, mask } => (value, mask),
        };
        if self.symbol.is_predicate() {
            return if self.relop == Relop::Ne {
                f.write_str(name)
            } else {
                write!(f, "!{name}")
            };
        }
        if *mask == all_ones(self.symbol.width()) {
            return write!(f, "{} {} {}", name, self.relop, format_int(*value, self.symbol.format()));
        }
        if let Some((ofs, n_bits)) = contiguous_run(*mask) {
            return if n_bits == 1 {
                write!(f, "{}[{}] {} {}", name, ofs, self.relop, value >> ofs)
            } else {
                write!(f, "{}[{}..{}] {} {}", name, ofs, ofs + n_bits - 1, self.relop, value >> ofs)
            };
        }
        write!(
            f,
            "{} {} {}",
            name,
            self.relop,
            format_masked(*value, *mask, self.symbol.format())
        )
    }
}

impl Display for Expr {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Boolean(b) => f.write_str(if *b { "1" } else { "0" }),
            Expr::Cmp(cmp) => write!(f, "{cmp}"),
            Expr::And(subs) => {
                for (i, sub) in subs.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" && ")?;
                    }
                    if matches!(sub, Expr::Or(_) | Expr::And(_)) {
                        write!(f, "({sub})")?;
                    } else {
                        write!(f, "{sub}")?;
                    }
                }
                Ok(())
            }
            Expr::Or(subs) => {
                for (i, sub) in subs.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" || ")?;
                    }
                    if matches!(sub, Expr::Or(_)) {
                        write!(f, "({sub})")?;
                    } else {
                        write!(f, "{sub}")?;
                    }
                }
                Ok(())
            }
        }
    }
}
