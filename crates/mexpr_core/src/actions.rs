//! # Action parsing
//!
//! Parses semicolon-terminated action bodies (`drop;`, `next;`, `output;`,
//! `field = constant;`, `outport = "port";`) over the same lexer and
//! symbol table as match expressions, and assembles the conjoined,
//! annotated prerequisite of every field the actions touch.

use std::fmt::{self, Display, Formatter};
use std::rc::Rc;

use mexpr_lex::{all_ones, format_int, quote_string, Lexer, Token};

use crate::{
    annotate,
    error::CompileError,
    expr::Expr,
    matches::StringMap,
    symtab::{SymTable, Symbol},
};

#[derive(Debug)]
pub enum Action {
    Drop,
    Next,
    Output,
    /// `symbol[ofs..ofs+n_bits-1] = value`
    SetField { symbol: Rc<Symbol>, ofs: u32, n_bits: u32, value: u128 },
    /// `symbol = "port"`, resolved against the caller's port map.
    SetPort { symbol: Rc<Symbol>, port: String },
}

impl Display for Action {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Action::Drop => f.write_str("drop;"),
            Action::Next => f.write_str("next;"),
            Action::Output => f.write_str("output;"),
            Action::SetField { symbol, ofs, n_bits, value } => {
                if *ofs == 0 && *n_bits == symbol.width() {
                    write!(f, "{} = {};", symbol.name(), format_int(*value, symbol.format()))
                } else if *n_bits == 1 {
                    write!(f, "{}[{}] = {};", symbol.name(), ofs, value)
                } else {
                    write!(f, "{}[{}..{}] = {};", symbol.name(), ofs, ofs + n_bits - 1, value)
                }
            }
            Action::SetPort { symbol, port } => {
                write!(f, "{} = {};", symbol.name(), quote_string(port))
            }
        }
    }
}

/// Actions together with the prerequisite expression their fields impose.
#[derive(Debug)]
pub struct ParsedActions {
    pub actions: Vec<Action>,
    pub prereqs: Option<Expr>,
}

pub fn parse_actions(
    input: &str,
    symtab: &SymTable,
    ports: &StringMap,
) -> Result<ParsedActions, CompileError> {
    let mut lexer = Lexer::new(input);
    let mut actions = Vec::new();
    let mut prereq_parts: Vec<Expr> = Vec::new();

    while *lexer.token() != Token::End {
        if let Token::Error(msg) = lexer.token() {
            return Err(CompileError::Lex { msg: msg.clone(), offset: lexer.offset() });
        }
        let Token::Id(name) = lexer.token() else {
            return Err(CompileError::Syntax {
                msg: "expecting action".to_string(),
                offset: lexer.offset(),
            });
        };
        let name = name.clone();
        match name.as_str() {
            "drop" | "next" | "output" => {
                lexer.advance();
                expect_semicolon(&mut lexer)?;
                actions.push(match name.as_str() {
                    "drop" => Action::Drop,
                    "next" => Action::Next,
                    _ => Action::Output,
                });
            }
            _ => {
                let action = parse_assignment(&mut lexer, symtab, ports, &mut prereq_parts)?;
                expect_semicolon(&mut lexer)?;
                actions.push(action);
            }
        }
    }

    if actions.iter().any(|a| matches!(a, Action::Drop)) && actions.len() > 1 {
        return Err(CompileError::Syntax {
            msg: "drop must be the only action".to_string(),
            offset: 0,
        });
    }
    let prereqs = match prereq_parts.len() {
        0 => None,
        _ => Some(Expr::conjoin(prereq_parts).simplify()),
    };
    Ok(ParsedActions { actions, prereqs })
}

fn expect_semicolon(lexer: &mut Lexer<'_>) -> Result<(), CompileError> {
    if lexer.try_match(&Token::Semicolon) {
        Ok(())
    } else {
        Err(CompileError::Syntax {
            msg: "expecting `;`".to_string(),
            offset: lexer.offset(),
        })
    }
}

fn parse_assignment(
    lexer: &mut Lexer<'_>,
    symtab: &SymTable,
    ports: &StringMap,
    prereq_parts: &mut Vec<Expr>,
) -> Result<Action, CompileError> {
    let (symbol, ofs, n_bits) = parse_lvalue(lexer, symtab)?;

    if !lexer.try_match(&Token::Equals) {
        return Err(CompileError::Syntax {
            msg: "expecting `=`".to_string(),
            offset: lexer.offset(),
        });
    }

    if let Some(prereq) = annotate::prereq_expr(&symbol, symtab)? {
        prereq_parts.push(prereq);
    }

    if symbol.is_string() {
        let Token::Str(port) = lexer.token() else {
            return Err(CompileError::TypeMismatch {
                msg: format!("`{}` must be assigned a string", symbol.name()),
            });
        };
        let port = port.clone();
        lexer.advance();
        if !ports.contains_key(&port) {
            return Err(CompileError::UnresolvedString { name: port });
        }
        return Ok(Action::SetPort { symbol, port });
    }

    let Token::Integer { value, .. } = lexer.token() else {
        return Err(CompileError::Syntax {
            msg: "expecting constant".to_string(),
            offset: lexer.offset(),
        });
    };
    let value = *value;
    if value & !all_ones(n_bits) != 0 {
        return Err(CompileError::RangeOverflow {
            msg: format!("constant does not fit in the {} bits of `{}`", n_bits, symbol.name()),
        });
    }
    lexer.advance();
    Ok(Action::SetField { symbol, ofs, n_bits, value })
}

/// A field reference `symbol` or `symbol[lo]` or `symbol[lo..hi]` as an
/// assignment destination.
fn parse_lvalue(
    lexer: &mut Lexer<'_>,
    symtab: &SymTable,
) -> Result<(Rc<Symbol>, u32, u32), CompileError> {
    let Token::Id(name) = lexer.token() else {
        return Err(CompileError::Syntax {
            msg: "expecting field name".to_string(),
            offset: lexer.offset(),
        });
    };
    let name = name.clone();
    let offset = lexer.offset();
    let Some(symbol) = symtab.get(&name) else {
        return Err(CompileError::UnknownSymbol { name, offset });
    };
    let symbol = Rc::clone(symbol);
    lexer.advance();
    if symbol.is_predicate() {
        return Err(CompileError::TypeMismatch {
            msg: format!("predicate `{}` cannot be assigned to", symbol.name()),
        });
    }

    if !lexer.try_match(&Token::LSquare) {
        let width = symbol.width();
        return Ok((symbol, 0, width));
    }
    if symbol.width() == 0 {
        return Err(CompileError::TypeMismatch {
            msg: format!("cannot select bits of `{}`", symbol.name()),
        });
    }
    let lo = expect_bit_index(lexer)?;
    let hi = if lexer.try_match(&Token::Ellipsis) { expect_bit_index(lexer)? } else { lo };
    if !lexer.try_match(&Token::RSquare) {
        return Err(CompileError::Syntax {
            msg: "expecting `]`".to_string(),
            offset: lexer.offset(),
        });
    }
    if lo > hi || hi >= symbol.width() {
        return Err(CompileError::SubfieldOutOfBounds {
            msg: format!(
                "bits [{lo}..{hi}] do not fit in the {} bits of `{}`",
                symbol.width(),
                symbol.name()
            ),
        });
    }
    Ok((symbol, lo, hi - lo + 1))
}

fn expect_bit_index(lexer: &mut Lexer<'_>) -> Result<u32, CompileError> {
    match lexer.token() {
        Token::Integer { value, .. } if *value <= u32::MAX as u128 => {
            let value = *value as u32;
            lexer.advance();
            Ok(value)
        }
        _ => Err(CompileError::Syntax {
            msg: "expecting a bit index".to_string(),
            offset: lexer.offset(),
        }),
    }
}
