//! Recursive-descent parser for the Boolean match grammar.
//!
//! ```text
//! expr     := and-expr ( '||' and-expr )*
//! and-expr := unary    ( '&&' unary    )*
//! unary    := '!' unary | primary
//! primary  := '(' expr ')'
//!           | '0' | '1'
//!           | symbol [ '[' N ( '..' M )? ']' ] ( relop rhs )?
//! rhs      := scalar | '{' scalar ( ',' scalar )* '}'
//! ```
//!
//! `!` is applied immediately by negating the parsed operand, so the AST
//! never contains a negation node. A bare numeric symbol means
//! `symbol != 0`; a bare predicate stands for the expression it names.

use std::rc::Rc;

use mexpr_lex::{all_ones, contiguous_run, Lexer, Token};

use crate::{
    error::CompileError,
    expr::{Cmp, Expr, Operand, Relop},
    symtab::{SymTable, Symbol},
};

/// Parses `input` into an unannotated expression.
pub fn parse(input: &str, symtab: &SymTable) -> Result<Expr, CompileError> {
    let mut parser = Parser { lexer: Lexer::new(input), symtab };
    let expr = parser.parse_or()?;
    parser.expect_end()?;
    Ok(expr)
}

/// Parses a field reference `symbol` or `symbol[lo]` or `symbol[lo..hi]`,
/// returning the symbol with the selected bit window.
pub(crate) fn parse_field(
    input: &str,
    symtab: &SymTable,
) -> Result<(Rc<Symbol>, u32, u32), CompileError> {
    let mut parser = Parser { lexer: Lexer::new(input), symtab };
    let (symbol, window) = parser.parse_symbol()?;
    parser.expect_end()?;
    let (ofs, n_bits) = window.unwrap_or((0, symbol.width()));
    Ok((symbol, ofs, n_bits))
}

struct Parser<'a> {
    lexer: Lexer<'a>,
    symtab: &'a SymTable,
}

impl Parser<'_> {
    fn syntax_error(&self, msg: &str) -> CompileError {
        CompileError::Syntax { msg: msg.to_string(), offset: self.lexer.offset() }
    }

    /// Turns a lexer error token into a compile error.
    fn check_lexer(&self) -> Result<(), CompileError> {
        if let Token::Error(msg) = self.lexer.token() {
            Err(CompileError::Lex { msg: msg.clone(), offset: self.lexer.offset() })
        } else {
            Ok(())
        }
    }

    fn expect_end(&mut self) -> Result<(), CompileError> {
        self.check_lexer()?;
        if *self.lexer.token() == Token::End {
            Ok(())
        } else {
            Err(self.syntax_error("unexpected tokens at end of input"))
        }
    }

    fn parse_or(&mut self) -> Result<Expr, CompileError> {
        let mut parts = vec![self.parse_and()?];
        while self.lexer.try_match(&Token::LogOr) {
            parts.push(self.parse_and()?);
        }
        Ok(Expr::disjoin(parts))
    }

    fn parse_and(&mut self) -> Result<Expr, CompileError> {
        let mut parts = vec![self.parse_unary()?];
        while self.lexer.try_match(&Token::LogAnd) {
            parts.push(self.parse_unary()?);
        }
        Ok(Expr::conjoin(parts))
    }

    fn parse_unary(&mut self) -> Result<Expr, CompileError> {
        if self.lexer.try_match(&Token::LogNot) {
            Ok(self.parse_unary()?.negate())
        } else {
            self.parse_primary()
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, CompileError> {
        self.check_lexer()?;
        if self.lexer.try_match(&Token::LParen) {
            let expr = self.parse_or()?;
            if !self.lexer.try_match(&Token::RParen) {
                return Err(self.syntax_error("expecting `)`"));
            }
            return Ok(expr);
        }
        match self.lexer.token() {
            Token::Integer { value, .. } if *value <= 1 => {
                let value = *value;
                self.lexer.advance();
                Ok(Expr::Boolean(value == 1))
            }
            Token::Id(_) => {
                let (symbol, window) = self.parse_symbol()?;
                self.parse_comparison(symbol, window)
            }
            _ => Err(self.syntax_error("expecting expression")),
        }
    }

    /// Parses a symbol reference with an optional `[lo..hi]` bit window.
    fn parse_symbol(&mut self) -> Result<(Rc<Symbol>, Option<(u32, u32)>), CompileError> {
        self.check_lexer()?;
        let Token::Id(name) = self.lexer.token() else {
            return Err(self.syntax_error("expecting field name"));
        };
        let name = name.clone();
        let offset = self.lexer.offset();
        let Some(symbol) = self.symtab.get(&name) else {
            return Err(CompileError::UnknownSymbol { name, offset });
        };
        let symbol = Rc::clone(symbol);
        self.lexer.advance();

        if !self.lexer.try_match(&Token::LSquare) {
            return Ok((symbol, None));
        }
        if symbol.width() == 0 {
            return Err(CompileError::TypeMismatch {
                msg: format!("cannot select bits of `{}`", symbol.name()),
            });
        }
        let lo = self.expect_bit_index()?;
        let hi = if self.lexer.try_match(&Token::Ellipsis) {
            self.expect_bit_index()?
        } else {
            lo
        };
        if !self.lexer.try_match(&Token::RSquare) {
            return Err(self.syntax_error("expecting `]`"));
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
        Ok((symbol, Some((lo, hi - lo + 1))))
    }

    fn expect_bit_index(&mut self) -> Result<u32, CompileError> {
        self.check_lexer()?;
        match self.lexer.token() {
            Token::Integer { value, .. } => {
                let value = *value;
                if value > u32::MAX as u128 {
                    return Err(CompileError::RangeOverflow {
                        msg: format!("{value} is not a valid bit index"),
                    });
                }
                self.lexer.advance();
                Ok(value as u32)
            }
            _ => Err(self.syntax_error("expecting a bit index")),
        }
    }

    fn peek_relop(&self) -> Option<Relop> {
        match self.lexer.token() {
            Token::Eq => Some(Relop::Eq),
            Token::Ne => Some(Relop::Ne),
            Token::Lt => Some(Relop::Lt),
            Token::Le => Some(Relop::Le),
            Token::Gt => Some(Relop::Gt),
            Token::Ge => Some(Relop::Ge),
            _ => None,
        }
    }

    fn parse_comparison(
        &mut self,
        symbol: Rc<Symbol>,
        window: Option<(u32, u32)>,
    ) -> Result<Expr, CompileError> {
        let Some(relop) = self.peek_relop() else {
            // bare reference
            if symbol.is_string() {
                return Err(CompileError::TypeMismatch {
                    msg: format!(
                        "string field `{}` must be compared against a string",
                        symbol.name()
                    ),
                });
            }
            if symbol.is_predicate() {
                return Ok(Expr::Cmp(Cmp {
                    symbol,
                    relop: Relop::Ne,
                    operand: Operand::Integer { value: 0, mask: 0 },
                }));
            }
            let (ofs, n_bits) = window.unwrap_or((0, symbol.width()));
            return Ok(Expr::Cmp(Cmp {
                symbol,
                relop: Relop::Ne,
                operand: Operand::Integer { value: 0, mask: all_ones(n_bits) << ofs },
            }));
        };
        self.lexer.advance();
        self.check_lexer()?;

        if symbol.is_predicate() {
            return Err(CompileError::TypeMismatch {
                msg: format!("predicate `{}` may only be tested as a bare truth value", symbol.name()),
            });
        }
        if relop.is_ordering() && symbol.must_crack() {
            return Err(CompileError::TypeMismatch {
                msg: format!("only == and != may be used with `{}`", symbol.name()),
            });
        }

        if *self.lexer.token() == Token::LCurly {
            if relop.is_ordering() {
                return Err(self.syntax_error("only == and != may be used with value sets"));
            }
            self.lexer.advance();
            let mut items = vec![self.parse_scalar(&symbol, window, relop)?];
            while self.lexer.try_match(&Token::Comma) {
                items.push(self.parse_scalar(&symbol, window, relop)?);
            }
            if !self.lexer.try_match(&Token::RCurly) {
                return Err(self.syntax_error("expecting `}`"));
            }
            return Ok(match relop {
                Relop::Eq => Expr::disjoin(items),
                _ => Expr::conjoin(items),
            });
        }
        self.parse_scalar(&symbol, window, relop)
    }

    fn parse_scalar(
        &mut self,
        symbol: &Rc<Symbol>,
        window: Option<(u32, u32)>,
        relop: Relop,
    ) -> Result<Expr, CompileError> {
        self.check_lexer()?;
        let expr = match self.lexer.token() {
            Token::Str(s) => {
                if !symbol.is_string() {
                    return Err(CompileError::TypeMismatch {
                        msg: format!(
                            "cannot compare numeric field `{}` against a string",
                            symbol.name()
                        ),
                    });
                }
                Expr::Cmp(Cmp {
                    symbol: Rc::clone(symbol),
                    relop,
                    operand: Operand::String(s.clone()),
                })
            }
            Token::Integer { value, .. } => {
                let value = *value;
                self.make_cmp(symbol, window, relop, value, None)?
            }
            Token::MaskedInteger { value, mask, .. } => {
                let (value, mask) = (*value, *mask);
                self.make_cmp(symbol, window, relop, value, Some(mask))?
            }
            _ => return Err(self.syntax_error("expecting constant")),
        };
        self.lexer.advance();
        Ok(expr)
    }

    fn make_cmp(
        &self,
        symbol: &Rc<Symbol>,
        window: Option<(u32, u32)>,
        relop: Relop,
        value: u128,
        explicit_mask: Option<u128>,
    ) -> Result<Expr, CompileError> {
        if symbol.is_string() {
            return Err(CompileError::TypeMismatch {
                msg: format!("string field `{}` must be compared against a string", symbol.name()),
            });
        }
        let (ofs, n_bits) = window.unwrap_or((0, symbol.width()));
        let field_ones = all_ones(n_bits);
        if value & !field_ones != 0 {
            return Err(CompileError::RangeOverflow {
                msg: format!("constant does not fit in the {} bits of `{}`", n_bits, symbol.name()),
            });
        }
        let mask = match explicit_mask {
            None => field_ones,
            Some(mask) => {
                if mask & !field_ones != 0 {
                    return Err(CompileError::RangeOverflow {
                        msg: format!("mask does not fit in the {} bits of `{}`", n_bits, symbol.name()),
                    });
                }
                if value & !mask != 0 {
                    return Err(CompileError::InvalidMask {
                        msg: "value has 1-bits that the mask clears".to_string(),
                    });
                }
                if relop.is_ordering() && contiguous_run(mask).is_none() {
                    return Err(CompileError::InvalidMask {
                        msg: "<, <=, > and >= require a mask with a single run of 1-bits"
                            .to_string(),
                    });
                }
                mask
            }
        };
        Ok(Expr::Cmp(Cmp {
            symbol: Rc::clone(symbol),
            relop,
            operand: Operand::Integer { value: value << ofs, mask: mask << ofs },
        }))
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
        symtab.add_field("tcp.dst", FieldId::TcpDst, Some("tcp"), false);
        symtab.add_field("ip4.src", FieldId::Ip4Src, Some("ip4"), false);
        symtab.add_field("vlan.tci", FieldId::VlanTci, None, false);
        symtab.add_field("xreg0", FieldId::Xreg(0), None, false);
        symtab.add_predicate("ip4", "eth.type == 0x800");
        symtab.add_string("inport", FieldId::Reg(6), None);
        symtab
            .add_subfield("vlan.vid", None, "vlan.tci[0..11]")
            .expect("vlan.vid");
        symtab
    }

    #[rstest]
    #[case("tcp.dst == 80", "tcp.dst == 80")]
    #[case("tcp.dst==0x50", "tcp.dst == 80")]
    #[case("tcp.dst == {80, 443}", "tcp.dst == 80 || tcp.dst == 443")]
    #[case("tcp.dst != {80, 443}", "tcp.dst != 80 && tcp.dst != 443")]
    #[case("tcp.dst == {80}", "tcp.dst == 80")]
    #[case("!(tcp.dst == 80)", "tcp.dst != 80")]
    #[case("!(tcp.dst < 80)", "tcp.dst >= 80")]
    #[case("tcp.dst", "tcp.dst != 0")]
    #[case("!tcp.dst", "tcp.dst == 0")]
    #[case("ip4", "ip4")]
    #[case("!ip4", "!ip4")]
    #[case("!!ip4", "ip4")]
    #[case("ip4 && tcp.dst == 80", "ip4 && tcp.dst == 80")]
    #[case("ip4 && tcp.dst == 80 || inport == \"eth0\"", "ip4 && tcp.dst == 80 || inport == \"eth0\"")]
    #[case("!(ip4 && tcp.dst == 80)", "!ip4 || tcp.dst != 80")]
    #[case("ip4.src == 10.0.0.0/8", "ip4.src == 10.0.0.0/8")]
    #[case("ip4.src == 10.0.0.1", "ip4.src == 10.0.0.1")]
    #[case("vlan.tci[13..15] == 4", "vlan.tci[13..15] == 4")]
    #[case("vlan.tci[12]", "vlan.tci[12] != 0")]
    #[case("!vlan.tci[12]", "vlan.tci[12] == 0")]
    #[case("vlan.vid == 9", "vlan.vid == 9")]
    #[case("xreg0[32..63] == 5", "xreg0[32..63] == 5")]
    #[case("tcp.dst >= 0x100/0xff00", "tcp.dst[8..15] >= 1")]
    #[case("1", "1")]
    #[case("0 || tcp.dst == 80", "0 || tcp.dst == 80")]
    #[case("inport == \"eth0\"", "inport == \"eth0\"")]
    #[case("inport != \"eth0\"", "inport != \"eth0\"")]
    #[case("!(inport == \"eth0\")", "inport != \"eth0\"")]
    fn round_trips(#[case] input: &str, #[case] formatted: &str) {
        let symtab = symtab();
        let expr = Expr::parse(input, &symtab).expect(input);
        assert!(expr.honors_invariants(), "{input}");
        assert_eq!(expr.to_string(), formatted, "input: {input}");
        // formatting is lossless over reparsing
        let again = Expr::parse(formatted, &symtab).expect(formatted);
        assert_eq!(again.to_string(), formatted);
    }

    #[rstest]
    #[case("tcp.dst == 80 || fake == 1")]
    #[case("fake")]
    fn unknown_symbol(#[case] input: &str) {
        assert!(matches!(
            Expr::parse(input, &symtab()),
            Err(CompileError::UnknownSymbol { .. })
        ));
    }

    #[rstest]
    #[case("tcp.dst == \"x\"")]
    #[case("inport == 1")]
    #[case("inport")]
    #[case("inport < \"a\"")]
    #[case("ip4 == 1")]
    #[case("inport[0]")]
    #[case("eth.type < 10")]
    fn type_mismatch(#[case] input: &str) {
        assert!(matches!(
            Expr::parse(input, &symtab()),
            Err(CompileError::TypeMismatch { .. })
        ));
    }

    #[rstest]
    #[case("tcp.dst == 65536")]
    #[case("vlan.vid == 4096")]
    #[case("vlan.tci[13..15] == 8")]
    fn range_overflow(#[case] input: &str) {
        assert!(matches!(
            Expr::parse(input, &symtab()),
            Err(CompileError::RangeOverflow { .. })
        ));
    }

    #[rstest]
    #[case("vlan.tci[12..16] == 1")]
    #[case("vlan.tci[3..2] == 1")]
    fn subfield_out_of_bounds(#[case] input: &str) {
        assert!(matches!(
            Expr::parse(input, &symtab()),
            Err(CompileError::SubfieldOutOfBounds { .. })
        ));
    }

    #[rstest]
    #[case("tcp.dst < 0x11/0x11")]
    #[case("tcp.dst == 3/2")]
    fn invalid_mask(#[case] input: &str) {
        assert!(matches!(
            Expr::parse(input, &symtab()),
            Err(CompileError::InvalidMask { .. })
        ));
    }

    #[rstest]
    #[case("tcp.dst ==")]
    #[case("tcp.dst == 80 ||")]
    #[case("(tcp.dst == 80")]
    #[case("tcp.dst == {}")]
    #[case("tcp.dst == 80 80")]
    #[case("tcp.dst < {80, 443}")]
    fn syntax_errors(#[case] input: &str) {
        assert!(matches!(
            Expr::parse(input, &symtab()),
            Err(CompileError::Syntax { .. })
        ));
    }

    #[test]
    fn lex_error_surfaces_with_offset() {
        match Expr::parse("tcp.dst == 1.2.3.400", &symtab()) {
            Err(CompileError::Lex { offset, .. }) => assert_eq!(offset, 11),
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
