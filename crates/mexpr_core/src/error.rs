use thiserror::Error;

/// Errors surfaced by the compiler stages. Every stage reports the first
/// error it detects; downstream stages are never run on an erroneous
/// expression.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    #[error("lexical error at offset {offset}: {msg}")]
    Lex { msg: String, offset: usize },

    #[error("syntax error at offset {offset}: {msg}")]
    Syntax { msg: String, offset: usize },

    #[error("unknown symbol `{name}` at offset {offset}")]
    UnknownSymbol { name: String, offset: usize },

    #[error("type mismatch: {msg}")]
    TypeMismatch { msg: String },

    #[error("constant out of range: {msg}")]
    RangeOverflow { msg: String },

    #[error("prerequisite cycle: recursive reference to symbol `{name}`")]
    PrereqCycle { name: String },

    #[error("sub-field out of bounds: {msg}")]
    SubfieldOutOfBounds { msg: String },

    #[error("invalid mask: {msg}")]
    InvalidMask { msg: String },

    #[error("unresolved string `{name}`")]
    UnresolvedString { name: String },

    #[error("error in `{text}`, prerequisite or expansion of `{symbol}`: {source}")]
    Prerequisite {
        text: String,
        symbol: String,
        #[source]
        source: Box<CompileError>,
    },
}
