//! # Symbol table
//!
//! Binds names to match fields, predicates, sub-fields and string-valued
//! symbols. The table is read-only during a compile; prerequisites and
//! predicate expansions are stored as text and parsed on demand by the
//! annotator, which also detects reference cycles.

use std::fmt::{self, Debug, Formatter};
use std::rc::Rc;

use fxhash::FxBuildHasher;
use indexmap::IndexMap;
use mexpr_lex::IntFormat;

use crate::{error::CompileError, fields::FieldId, parse};

/// What a [Symbol] stands for.
#[derive(Debug)]
pub enum SymbolKind {
    /// A fixed-width numeric match field.
    Field(FieldId),
    /// A width-less symbol matched against a caller-supplied string map.
    StringField(FieldId),
    /// A named Boolean expression over other symbols.
    Predicate(String),
    /// A bit-range alias over another numeric symbol.
    Subfield { parent: Rc<Symbol>, ofs: u32 },
}

/// One named entry of a [SymTable].
pub struct Symbol {
    name: String,
    width: u32,
    prereq: Option<String>,
    must_crack: bool,
    kind: SymbolKind,
}

impl Symbol {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Width in bits; zero for string symbols and predicates.
    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn prereq(&self) -> Option<&str> {
        self.prereq.as_deref()
    }

    /// True if masked equalities on this symbol must be decomposed into
    /// exact-value equalities before installation.
    pub fn must_crack(&self) -> bool {
        self.must_crack
    }

    pub fn kind(&self) -> &SymbolKind {
        &self.kind
    }

    pub fn is_string(&self) -> bool {
        matches!(self.kind, SymbolKind::StringField(_))
    }

    pub fn is_predicate(&self) -> bool {
        matches!(self.kind, SymbolKind::Predicate(_))
    }

    /// Display format for constants compared against this symbol.
    pub fn format(&self) -> IntFormat {
        match &self.kind {
            SymbolKind::Field(field) | SymbolKind::StringField(field) => field.format(),
            SymbolKind::Predicate(_) | SymbolKind::Subfield { .. } => IntFormat::Decimal,
        }
    }
}

// Names are unique per table, so identity is the name.
impl PartialEq for Symbol {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for Symbol {}

impl Debug for Symbol {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Symbol")
            .field("name", &self.name)
            .field("width", &self.width)
            .field("kind", &self.kind)
            .finish()
    }
}

/// The symbol table consulted by the parser, annotator and matcher.
#[derive(Debug, Default)]
pub struct SymTable {
    symbols: IndexMap<String, Rc<Symbol>, FxBuildHasher>,
}

impl SymTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Rc<Symbol>> {
        self.symbols.get(name)
    }

    /// Registers a numeric match field.
    pub fn add_field(
        &mut self,
        name: &str,
        field: FieldId,
        prereq: Option<&str>,
        must_crack: bool,
    ) -> Rc<Symbol> {
        self.insert(Symbol {
            name: name.to_string(),
            width: field.width(),
            prereq: prereq.map(str::to_string),
            must_crack,
            kind: SymbolKind::Field(field),
        })
    }

    /// Registers a string-valued symbol backed by `field`.
    pub fn add_string(&mut self, name: &str, field: FieldId, prereq: Option<&str>) -> Rc<Symbol> {
        self.insert(Symbol {
            name: name.to_string(),
            width: 0,
            prereq: prereq.map(str::to_string),
            must_crack: false,
            kind: SymbolKind::StringField(field),
        })
    }

    /// Registers a named Boolean expression.
    pub fn add_predicate(&mut self, name: &str, expansion: &str) -> Rc<Symbol> {
        self.insert(Symbol {
            name: name.to_string(),
            width: 0,
            prereq: None,
            must_crack: false,
            kind: SymbolKind::Predicate(expansion.to_string()),
        })
    }

    /// Registers a bit-range alias, e.g. `add_subfield("reg0", None,
    /// "xreg0[32..63]")`. The slice must name a numeric symbol already in
    /// the table.
    pub fn add_subfield(
        &mut self,
        name: &str,
        prereq: Option<&str>,
        slice: &str,
    ) -> Result<Rc<Symbol>, CompileError> {
        let (parent, ofs, n_bits) = parse::parse_field(slice, self)?;
        if parent.is_string() || parent.is_predicate() {
            return Err(CompileError::TypeMismatch {
                msg: format!("`{}` is not a numeric field", parent.name()),
            });
        }
        Ok(self.insert(Symbol {
            name: name.to_string(),
            width: n_bits,
            prereq: prereq.map(str::to_string),
            must_crack: parent.must_crack(),
            kind: SymbolKind::Subfield { parent, ofs },
        }))
    }

    fn insert(&mut self, symbol: Symbol) -> Rc<Symbol> {
        let symbol = Rc::new(symbol);
        let prev = self.symbols.insert(symbol.name.clone(), Rc::clone(&symbol));
        assert!(prev.is_none(), "symbol `{}` registered twice", symbol.name);
        symbol
    }
}
