//! # Lexer
//!
//! Turns match-expression text into a stream of [Token]s. Constants cover
//! decimal, hexadecimal, dotted-quad IPv4, colon-hex IPv6 and Ethernet
//! forms, each optionally masked with `value/mask` or `value/prefix-len`.
//! Formatting a token always produces text that lexes back to an
//! equivalent token.
//!
//! ## Example
//! ```no_run
//! use mexpr_lex::{Lexer, Token};
//!
//! let mut lexer = Lexer::new("tcp.dst == {80, 443}");
//! while *lexer.token() != Token::End {
//!     println!("{}", lexer.token());
//!     lexer.advance();
//! }
//! ```

mod token;

pub use token::{
    all_ones, contiguous_run, format_int, format_masked, prefix_mask, quote_string, IntFormat,
    Token,
};

use std::net::Ipv6Addr;

use nom::{
    character::complete::{char, digit1},
    combinator::all_consuming,
    sequence::tuple,
    IResult,
};

/// A restartable scanner over one input buffer. The current token and its
/// starting byte offset stay readable until [advance](Lexer::advance) is
/// called; an erroneous constant yields [Token::Error] and scanning
/// continues after it.
#[derive(Debug)]
pub struct Lexer<'a> {
    input: &'a str,
    pos: usize,
    token: Token,
    offset: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        let mut lexer = Lexer { input, pos: 0, token: Token::End, offset: 0 };
        lexer.advance();
        lexer
    }

    /// The token most recently scanned.
    pub fn token(&self) -> &Token {
        &self.token
    }

    /// Byte offset where the current token starts.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Scans the next token.
    pub fn advance(&mut self) {
        let rest = &self.input[self.pos..];
        let trimmed = rest.trim_start();
        self.pos += rest.len() - trimmed.len();
        self.offset = self.pos;
        let (token, used) = scan(trimmed);
        self.pos += used;
        self.token = token;
    }

    /// Consumes the current token if it equals `t`.
    pub fn try_match(&mut self, t: &Token) -> bool {
        if &self.token == t {
            self.advance();
            true
        } else {
            false
        }
    }
}

fn scan(input: &str) -> (Token, usize) {
    let mut chars = input.chars();
    let Some(c) = chars.next() else {
        return (Token::End, 0);
    };
    let two = input.get(..2).unwrap_or("");
    match c {
        '(' => (Token::LParen, 1),
        ')' => (Token::RParen, 1),
        '{' => (Token::LCurly, 1),
        '}' => (Token::RCurly, 1),
        '[' => (Token::LSquare, 1),
        ']' => (Token::RSquare, 1),
        ',' => (Token::Comma, 1),
        ';' => (Token::Semicolon, 1),
        '=' if two == "==" => (Token::Eq, 2),
        '=' => (Token::Equals, 1),
        '!' if two == "!=" => (Token::Ne, 2),
        '!' => (Token::LogNot, 1),
        '<' if two == "<=" => (Token::Le, 2),
        '<' => (Token::Lt, 1),
        '>' if two == ">=" => (Token::Ge, 2),
        '>' => (Token::Gt, 1),
        '&' if two == "&&" => (Token::LogAnd, 2),
        '&' => (Token::Amp, 1),
        '|' if two == "||" => (Token::LogOr, 2),
        '|' => (Token::Pipe, 1),
        '.' if two == ".." => (Token::Ellipsis, 2),
        '.' => (
            Token::Error("`.` is only valid as part of a constant or identifier".to_string()),
            1,
        ),
        '"' => scan_string(input),
        ':' if two == "::" => {
            let continues = input[2..]
                .chars()
                .next()
                .is_some_and(|c| c.is_ascii_hexdigit() || c == ':' || c == '.');
            if continues {
                scan_number(input)
            } else {
                (Token::ColonColon, 2)
            }
        }
        ':' => (
            Token::Error("`:` is only valid as part of `::` or a constant".to_string()),
            1,
        ),
        _ if c.is_ascii_digit() => scan_number(input),
        _ if c.is_ascii_alphabetic() || c == '_' => scan_id(input),
        _ => (Token::Error(format!("invalid character `{c}`")), c.len_utf8()),
    }
}

fn scan_id(input: &str) -> (Token, usize) {
    let end = input
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == '.'))
        .unwrap_or(input.len());
    (Token::Id(input[..end].to_string()), end)
}

fn scan_string(input: &str) -> (Token, usize) {
    let mut out = String::new();
    let mut bad: Option<String> = None;
    let mut iter = input.char_indices().skip(1);
    while let Some((i, c)) = iter.next() {
        match c {
            '"' => {
                return match bad {
                    None => (Token::Str(out), i + 1),
                    Some(msg) => (Token::Error(msg), i + 1),
                };
            }
            '\\' => match iter.next() {
                Some((_, e @ ('"' | '\\'))) => out.push(e),
                Some((_, e)) => {
                    bad.get_or_insert_with(|| format!("invalid escape sequence `\\{e}`"));
                }
                None => break,
            },
            _ => out.push(c),
        }
    }
    (Token::Error("unterminated string".to_string()), input.len())
}

fn scan_number(input: &str) -> (Token, usize) {
    let is_int_char =
        |c: char| c.is_ascii_hexdigit() || matches!(c, '.' | ':' | 'x' | 'X' | '/');
    let mut span = &input[..input.find(|c| !is_int_char(c)).unwrap_or(input.len())];
    // stop at `..` so bit ranges like `[0..2]` lex as three tokens
    if let Some(dotdot) = span.find("..") {
        span = &span[..dotdot];
    }
    let len = span.len();
    let (value_text, mask_text) = match span.split_once('/') {
        Some((v, m)) => (v, Some(m)),
        None => (span, None),
    };
    let (value, format) = match parse_literal(value_text) {
        Ok(parsed) => parsed,
        Err(msg) => return (Token::Error(msg), len),
    };
    let Some(mask_text) = mask_text else {
        return (Token::Integer { value, format }, len);
    };
    let (mask, mask_format) = match parse_literal(mask_text) {
        Ok(parsed) => parsed,
        Err(msg) => return (Token::Error(msg), len),
    };
    let mask = match (format, mask_format) {
        (IntFormat::Ipv4, IntFormat::Decimal) => {
            if mask > 32 {
                return (
                    Token::Error(format!("IPv4 prefix length {mask} is greater than 32")),
                    len,
                );
            }
            prefix_mask(32, mask as u32)
        }
        (IntFormat::Ipv6, IntFormat::Decimal) => {
            if mask > 128 {
                return (
                    Token::Error(format!("IPv6 prefix length {mask} is greater than 128")),
                    len,
                );
            }
            prefix_mask(128, mask as u32)
        }
        (IntFormat::Ipv4, IntFormat::Ipv4)
        | (IntFormat::Ipv6, IntFormat::Ipv6)
        | (IntFormat::Ethernet, IntFormat::Ethernet) => mask,
        (IntFormat::Decimal | IntFormat::Hexadecimal, IntFormat::Decimal | IntFormat::Hexadecimal) => {
            mask
        }
        _ => {
            return (
                Token::Error("value and mask have incompatible formats".to_string()),
                len,
            )
        }
    };
    (Token::MaskedInteger { value, mask, format }, len)
}

fn parse_literal(text: &str) -> Result<(u128, IntFormat), String> {
    if text.is_empty() {
        return Err("invalid numeric constant".to_string());
    }
    if text.contains('.') && !text.contains(':') {
        return parse_dotted_quad(text).map(|v| (v, IntFormat::Ipv4));
    }
    if text.contains(':') {
        if let Some(v) = parse_ethernet(text) {
            return Ok((v, IntFormat::Ethernet));
        }
        return match text.parse::<Ipv6Addr>() {
            Ok(addr) => Ok((u128::from(addr), IntFormat::Ipv6)),
            Err(_) => Err(format!("`{text}` is not a valid IPv6 or Ethernet constant")),
        };
    }
    if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        if hex.is_empty() {
            return Err("hexadecimal constant requires at least one digit".to_string());
        }
        return u128::from_str_radix(hex, 16)
            .map(|v| (v, IntFormat::Hexadecimal))
            .map_err(|_| format!("hexadecimal constant `{text}` is wider than 128 bits"));
    }
    text.parse::<u128>()
        .map(|v| (v, IntFormat::Decimal))
        .map_err(|_| format!("decimal constant `{text}` is out of range"))
}

/// `a.b.c.d` with each octet in 0..=255.
fn parse_dotted_quad(text: &str) -> Result<u128, String> {
    fn octet(input: &str) -> IResult<&str, u8> {
        let (rest, digits) = digit1(input)?;
        match digits.parse::<u8>() {
            Ok(n) => Ok((rest, n)),
            Err(_) => Err(nom::Err::Error(nom::error::Error::new(
                input,
                nom::error::ErrorKind::Digit,
            ))),
        }
    }

    let quad: IResult<&str, _> = all_consuming(tuple((
        octet,
        char('.'),
        octet,
        char('.'),
        octet,
        char('.'),
        octet,
    )))(text);
    match quad {
        Ok((_, (a, _, b, _, c, _, d))) => Ok(((a as u128) << 24)
            | ((b as u128) << 16)
            | ((c as u128) << 8)
            | d as u128),
        Err(_) => Err(format!("`{text}` is not a valid IPv4 constant")),
    }
}

/// Exactly six colon-separated pairs of hex digits.
fn parse_ethernet(text: &str) -> Option<u128> {
    let mut value: u128 = 0;
    let mut groups = 0;
    for part in text.split(':') {
        if part.len() != 2 || !part.chars().all(|c| c.is_ascii_hexdigit()) {
            return None;
        }
        value = value << 8 | u128::from_str_radix(part, 16).ok()?;
        groups += 1;
    }
    (groups == 6).then_some(value)
}

#[allow(missing_docs)]
pub mod prelude {
    #[doc(hidden)]
    pub use crate::{IntFormat, Lexer, Token};
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn lex_all(input: &str) -> Vec<Token> {
        let mut lexer = Lexer::new(input);
        let mut out = Vec::new();
        while *lexer.token() != Token::End {
            out.push(lexer.token().clone());
            lexer.advance();
        }
        out
    }

    #[test]
    fn integers() {
        assert_eq!(
            lex_all("80 0x50 0"),
            vec![
                Token::Integer { value: 80, format: IntFormat::Decimal },
                Token::Integer { value: 0x50, format: IntFormat::Hexadecimal },
                Token::Integer { value: 0, format: IntFormat::Decimal },
            ]
        );
    }

    #[test]
    fn addresses() {
        assert_eq!(
            lex_all("10.0.0.1 fe80::1 aa:bb:cc:dd:ee:ff"),
            vec![
                Token::Integer { value: 0x0a000001, format: IntFormat::Ipv4 },
                Token::Integer {
                    value: 0xfe80_0000_0000_0000_0000_0000_0000_0001,
                    format: IntFormat::Ipv6,
                },
                Token::Integer { value: 0xaabb_ccdd_eeff, format: IntFormat::Ethernet },
            ]
        );
    }

    #[test]
    fn masked_integers() {
        assert_eq!(
            lex_all("10.0.0.0/8 10.0.0.0/255.0.0.0 0x50/0xff 80/255"),
            vec![
                Token::MaskedInteger {
                    value: 0x0a000000,
                    mask: 0xff000000,
                    format: IntFormat::Ipv4,
                },
                Token::MaskedInteger {
                    value: 0x0a000000,
                    mask: 0xff000000,
                    format: IntFormat::Ipv4,
                },
                Token::MaskedInteger { value: 0x50, mask: 0xff, format: IntFormat::Hexadecimal },
                Token::MaskedInteger { value: 80, mask: 255, format: IntFormat::Decimal },
            ]
        );
    }

    #[test]
    fn operators_and_ranges() {
        assert_eq!(
            lex_all("x[0..2] == { 1 , 2 } && ! ( a != b ) || c :: ;"),
            vec![
                Token::Id("x".to_string()),
                Token::LSquare,
                Token::Integer { value: 0, format: IntFormat::Decimal },
                Token::Ellipsis,
                Token::Integer { value: 2, format: IntFormat::Decimal },
                Token::RSquare,
                Token::Eq,
                Token::LCurly,
                Token::Integer { value: 1, format: IntFormat::Decimal },
                Token::Comma,
                Token::Integer { value: 2, format: IntFormat::Decimal },
                Token::RCurly,
                Token::LogAnd,
                Token::LogNot,
                Token::LParen,
                Token::Id("a".to_string()),
                Token::Ne,
                Token::Id("b".to_string()),
                Token::RParen,
                Token::LogOr,
                Token::Id("c".to_string()),
                Token::ColonColon,
                Token::Semicolon,
            ]
        );
    }

    #[test]
    fn dotted_identifiers() {
        assert_eq!(
            lex_all("tcp.dst vlan.present"),
            vec![Token::Id("tcp.dst".to_string()), Token::Id("vlan.present".to_string())]
        );
    }

    #[test]
    fn strings() {
        assert_eq!(
            lex_all(r#""eth0" "a\"b\\c""#),
            vec![Token::Str("eth0".to_string()), Token::Str("a\"b\\c".to_string())]
        );
    }

    #[rstest]
    #[case(r#""abc"#, "unterminated string")]
    #[case(r#""a\qb""#, "invalid escape sequence `\\q`")]
    #[case("1.2.3.4.5", "`1.2.3.4.5` is not a valid IPv4 constant")]
    #[case("1.2.3.400", "`1.2.3.400` is not a valid IPv4 constant")]
    #[case("0x", "hexadecimal constant requires at least one digit")]
    #[case("10.0.0.0/33", "IPv4 prefix length 33 is greater than 32")]
    #[case(
        "340282366920938463463374607431768211456",
        "decimal constant `340282366920938463463374607431768211456` is out of range"
    )]
    fn errors(#[case] input: &str, #[case] msg: &str) {
        let tokens = lex_all(input);
        assert_eq!(tokens[0], Token::Error(msg.to_string()), "input: {input}");
    }

    #[test]
    fn error_is_restartable() {
        assert_eq!(
            lex_all(". 80"),
            vec![
                Token::Error("`.` is only valid as part of a constant or identifier".to_string()),
                Token::Integer { value: 80, format: IntFormat::Decimal },
            ]
        );
    }

    #[rstest]
    #[case("80")]
    #[case("0x50")]
    #[case("0")]
    #[case("10.0.0.0/8")]
    #[case("10.11.12.13/255.255.0.0")]
    #[case("aa:bb:cc:dd:ee:ff")]
    #[case("aa:bb:cc:00:00:00/ff:ff:ff:00:00:00")]
    #[case("fe80::1")]
    #[case("::1/64")]
    #[case("::0")]
    #[case("tcp.dst == {80, 443} && !vlan.present")]
    #[case("inport == \"eth\\\\0\\\"\"")]
    #[case("x[0..11] >= 0x20/0xff0 :: ; = & |")]
    fn format_round_trip(#[case] input: &str) {
        for token in lex_all(input) {
            let relexed = lex_all(&token.to_string());
            assert_eq!(relexed.len(), 1, "token `{token}` relexed as {relexed:?}");
            assert!(
                relexed[0].equivalent(&token),
                "token `{token}` relexed as `{}`",
                relexed[0]
            );
        }
    }
}
