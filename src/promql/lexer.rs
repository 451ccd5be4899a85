// Copyright 2025 The gmp-operator Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::promql::{
    Error, InvalidEscapeSnafu, UnexpectedCharacterSnafu, UnterminatedStringSnafu,
};
use std::fmt;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TokenKind {
    Ident(String),
    /// Literal starting with a digit or dot; a number or a duration depending
    /// on where it appears.
    Number(String),
    /// Unescaped string literal.
    Str(String),
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Comma,
    Colon,
    At,
    Assign,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Eql,
    Neq,
    Lte,
    Lss,
    Gte,
    Gtr,
    EqlRegex,
    NeqRegex,
    Eof,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Ident(s) => write!(f, "identifier \"{s}\""),
            TokenKind::Number(s) => write!(f, "number \"{s}\""),
            TokenKind::Str(s) => write!(f, "string {s:?}"),
            TokenKind::Eof => f.write_str("end of input"),
            other => write!(f, "\"{}\"", other.symbol()),
        }
    }
}

impl TokenKind {
    fn symbol(&self) -> &'static str {
        match self {
            TokenKind::LParen => "(",
            TokenKind::RParen => ")",
            TokenKind::LBrace => "{",
            TokenKind::RBrace => "}",
            TokenKind::LBracket => "[",
            TokenKind::RBracket => "]",
            TokenKind::Comma => ",",
            TokenKind::Colon => ":",
            TokenKind::At => "@",
            TokenKind::Assign => "=",
            TokenKind::Add => "+",
            TokenKind::Sub => "-",
            TokenKind::Mul => "*",
            TokenKind::Div => "/",
            TokenKind::Mod => "%",
            TokenKind::Pow => "^",
            TokenKind::Eql => "==",
            TokenKind::Neq => "!=",
            TokenKind::Lte => "<=",
            TokenKind::Lss => "<",
            TokenKind::Gte => ">=",
            TokenKind::Gtr => ">",
            TokenKind::EqlRegex => "=~",
            TokenKind::NeqRegex => "!~",
            _ => "",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    /// Byte offset into the input.
    pub pos: usize,
}

struct Lexer<'a> {
    input: &'a str,
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
    bracket_depth: usize,
}

/// Splits an expression into tokens. The result always ends with [`TokenKind::Eof`].
pub fn tokenize(input: &str) -> Result<Vec<Token>, Error> {
    let mut lexer = Lexer {
        input,
        chars: input.char_indices().peekable(),
        bracket_depth: 0,
    };
    let mut tokens = Vec::new();
    loop {
        let token = lexer.next_token()?;
        let done = token.kind == TokenKind::Eof;
        tokens.push(token);
        if done {
            return Ok(tokens);
        }
    }
}

impl Lexer<'_> {
    fn peek_char(&mut self) -> Option<char> {
        self.chars.peek().map(|&(_, c)| c)
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.peek_char() == Some(expected) {
            self.chars.next();
            true
        } else {
            false
        }
    }

    fn next_token(&mut self) -> Result<Token, Error> {
        self.skip_whitespace_and_comments();

        let Some((pos, c)) = self.chars.next() else {
            return Ok(Token {
                kind: TokenKind::Eof,
                pos: self.input.len(),
            });
        };

        let kind = match c {
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            '{' => TokenKind::LBrace,
            '}' => TokenKind::RBrace,
            '[' => {
                self.bracket_depth += 1;
                TokenKind::LBracket
            }
            ']' => {
                self.bracket_depth = self.bracket_depth.saturating_sub(1);
                TokenKind::RBracket
            }
            ',' => TokenKind::Comma,
            '@' => TokenKind::At,
            '+' => TokenKind::Add,
            '-' => TokenKind::Sub,
            '*' => TokenKind::Mul,
            '/' => TokenKind::Div,
            '%' => TokenKind::Mod,
            '^' => TokenKind::Pow,
            '=' if self.eat('=') => TokenKind::Eql,
            '=' if self.eat('~') => TokenKind::EqlRegex,
            '=' => TokenKind::Assign,
            '!' if self.eat('=') => TokenKind::Neq,
            '!' if self.eat('~') => TokenKind::NeqRegex,
            '<' if self.eat('=') => TokenKind::Lte,
            '<' => TokenKind::Lss,
            '>' if self.eat('=') => TokenKind::Gte,
            '>' => TokenKind::Gtr,
            ':' if self.bracket_depth > 0 => TokenKind::Colon,
            '"' | '\'' => TokenKind::Str(self.quoted(pos, c)?),
            '`' => TokenKind::Str(self.raw(pos)?),
            c if c.is_ascii_digit() => TokenKind::Number(self.number(pos)),
            '.' if self.peek_char().is_some_and(|n| n.is_ascii_digit()) => {
                TokenKind::Number(self.number(pos))
            }
            c if c.is_ascii_alphabetic() || c == '_' || c == ':' => {
                let ident = self.ident(pos);
                if ident.eq_ignore_ascii_case("inf") || ident.eq_ignore_ascii_case("nan") {
                    TokenKind::Number(ident)
                } else {
                    TokenKind::Ident(ident)
                }
            }
            ch => return UnexpectedCharacterSnafu { pos, ch }.fail(),
        };

        Ok(Token { kind, pos })
    }

    fn skip_whitespace_and_comments(&mut self) {
        while let Some(c) = self.peek_char() {
            if c.is_whitespace() {
                self.chars.next();
            } else if c == '#' {
                while let Some((_, c)) = self.chars.next() {
                    if c == '\n' {
                        break;
                    }
                }
            } else {
                break;
            }
        }
    }

    fn end_of(&mut self) -> usize {
        self.chars.peek().map_or(self.input.len(), |&(i, _)| i)
    }

    fn ident(&mut self, start: usize) -> String {
        while self
            .peek_char()
            .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
        {
            self.chars.next();
        }
        let end = self.end_of();
        self.input[start..end].to_owned()
    }

    fn number(&mut self, start: usize) -> String {
        let mut prev = self.input[start..].chars().next().unwrap_or_default();
        while let Some(c) = self.peek_char() {
            let exponent_sign = (c == '+' || c == '-')
                && (prev == 'e' || prev == 'E')
                && !self.input[start..].starts_with("0x")
                && !self.input[start..].starts_with("0X");
            if c.is_ascii_alphanumeric() || c == '.' || c == '_' || exponent_sign {
                self.chars.next();
                prev = c;
            } else {
                break;
            }
        }
        let end = self.end_of();
        self.input[start..end].to_owned()
    }

    fn raw(&mut self, pos: usize) -> Result<String, Error> {
        let mut out = String::new();
        for (_, c) in self.chars.by_ref() {
            if c == '`' {
                return Ok(out);
            }
            out.push(c);
        }
        UnterminatedStringSnafu { pos }.fail()
    }

    fn quoted(&mut self, pos: usize, quote: char) -> Result<String, Error> {
        let mut out = String::new();
        while let Some((i, c)) = self.chars.next() {
            match c {
                c if c == quote => return Ok(out),
                '\n' => break,
                '\\' => {
                    let Some((_, esc)) = self.chars.next() else {
                        break;
                    };
                    let decoded = match esc {
                        'a' => '\u{07}',
                        'b' => '\u{08}',
                        'f' => '\u{0c}',
                        'n' => '\n',
                        'r' => '\r',
                        't' => '\t',
                        'v' => '\u{0b}',
                        '\\' => '\\',
                        '"' => '"',
                        '\'' => '\'',
                        'x' => self.hex_escape(i, 2)?,
                        'u' => self.hex_escape(i, 4)?,
                        'U' => self.hex_escape(i, 8)?,
                        _ => return InvalidEscapeSnafu { pos: i }.fail(),
                    };
                    out.push(decoded);
                }
                c => out.push(c),
            }
        }
        UnterminatedStringSnafu { pos }.fail()
    }

    fn hex_escape(&mut self, pos: usize, digits: usize) -> Result<char, Error> {
        let mut value: u32 = 0;
        for _ in 0..digits {
            let digit = self
                .chars
                .next()
                .and_then(|(_, c)| c.to_digit(16))
                .ok_or_else(|| InvalidEscapeSnafu { pos }.build())?;
            value = value * 16 + digit;
        }
        char::from_u32(value).ok_or_else(|| InvalidEscapeSnafu { pos }.build())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<TokenKind> {
        tokenize(input)
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn test_selector_tokens() {
        assert_eq!(
            kinds(r#"up{job=~"a.*"}"#),
            vec![
                TokenKind::Ident("up".into()),
                TokenKind::LBrace,
                TokenKind::Ident("job".into()),
                TokenKind::EqlRegex,
                TokenKind::Str("a.*".into()),
                TokenKind::RBrace,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_subquery_colon_inside_brackets() {
        assert_eq!(
            kinds("x[5m:1m]"),
            vec![
                TokenKind::Ident("x".into()),
                TokenKind::LBracket,
                TokenKind::Number("5m".into()),
                TokenKind::Colon,
                TokenKind::Number("1m".into()),
                TokenKind::RBracket,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_recording_rule_names_keep_colons() {
        assert_eq!(
            kinds("job:up:sum"),
            vec![TokenKind::Ident("job:up:sum".into()), TokenKind::Eof]
        );
    }

    #[test]
    fn test_numbers_and_escapes() {
        assert_eq!(
            kinds(r#"1e-3 'a\'b' # trailing comment"#),
            vec![
                TokenKind::Number("1e-3".into()),
                TokenKind::Str("a'b".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_unterminated_string() {
        assert_eq!(
            tokenize(r#"up{a="b}"#),
            Err(Error::UnterminatedString { pos: 5 })
        );
    }
}
