//! # mexpr_core
//!
//! Compiler for a Boolean match-expression language over symbolic packet
//! and register fields. Text is parsed against a [SymTable](symtab::SymTable),
//! annotated down to concrete fields, algebraically simplified, normalized
//! into disjunctive form and lowered into classifier matches with
//! conjunction groups.
//!
//! ## Example
//! ```no_run
//! use mexpr_core::prelude::*;
//!
//! let mut symtab = SymTable::new();
//! symtab.add_field("eth.type", FieldId::EthType, None, true);
//! symtab.add_predicate("ip4", "eth.type == 0x800");
//! symtab.add_field("tcp.dst", FieldId::TcpDst, None, false);
//!
//! let expr = Expr::parse("ip4 && tcp.dst == {80, 443}", &symtab)
//!     .and_then(|e| e.annotate(&symtab))
//!     .map(|e| e.simplify().normalize())
//!     .unwrap();
//! let matches = expr.to_matches(&StringMap::default());
//! ```

pub mod actions;
pub mod error;
pub mod expr;
pub mod fields;
pub mod matches;
pub mod symtab;

mod annotate;
mod crush;
mod normalize;
mod parse;
mod simplify;

#[allow(missing_docs)]
pub mod prelude {
    #[doc(hidden)]
    pub use crate::{
        actions::{parse_actions, Action, ParsedActions},
        error::CompileError,
        expr::{Cmp, Expr, Operand, Relop},
        fields::FieldId,
        matches::{Conjunction, FlowMatch, Matches, StringMap},
        symtab::{SymTable, Symbol, SymbolKind},
    };
}
