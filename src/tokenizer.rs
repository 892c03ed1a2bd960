use log::debug;
use std::{
    fmt::{self, Display, Formatter},
    ops::Range,
};

use crate::error::{lex_error, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum TokenType {
    LeftParen,
    RightParen,
    LeftSquare,
    RightSquare,

    Comma,

    Plus,
    Minus,
    Star,
    Slash,
    Percent,

    Equal,
    Greater,
    Less,

    BangEqual,
    EqualEqual,
    GreaterEqual,
    LessEqual,

    Identifier(String),
    String(String),
    Integer(i64),
    Float(f64),

    Let,
    If,
    Then,
    Else,
    End,
    While,
    Do,
    Func,
    Return,
    Print,
    And,
    Or,
    Not,
    True,
    False,
    Nil,

    NewLine,
    EOF,
}

impl TokenType {
    pub fn is_keyword(&self) -> bool {
        matches!(
            self,
            TokenType::Let
                | TokenType::If
                | TokenType::Then
                | TokenType::Else
                | TokenType::End
                | TokenType::While
                | TokenType::Do
                | TokenType::Func
                | TokenType::Return
                | TokenType::Print
                | TokenType::And
                | TokenType::Or
                | TokenType::Not
                | TokenType::True
                | TokenType::False
                | TokenType::Nil
        )
    }

    pub fn is_literal(&self) -> bool {
        matches!(
            self,
            TokenType::String(_) | TokenType::Integer(_) | TokenType::Float(_)
        )
    }

    /// Human readable form used in parser diagnostics.
    pub fn describe(&self) -> String {
        match self {
            TokenType::NewLine => "newline".to_string(),
            TokenType::EOF => "end of input".to_string(),
            TokenType::String(s) => format!("string \"{}\"", s),
            other => format!("'{}'", other),
        }
    }
}

impl Display for TokenType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            TokenType::LeftParen => write!(f, "("),
            TokenType::RightParen => write!(f, ")"),
            TokenType::LeftSquare => write!(f, "["),
            TokenType::RightSquare => write!(f, "]"),
            TokenType::Comma => write!(f, ","),
            TokenType::Plus => write!(f, "+"),
            TokenType::Minus => write!(f, "-"),
            TokenType::Star => write!(f, "*"),
            TokenType::Slash => write!(f, "/"),
            TokenType::Percent => write!(f, "%"),
            TokenType::Equal => write!(f, "="),
            TokenType::Greater => write!(f, ">"),
            TokenType::Less => write!(f, "<"),
            TokenType::BangEqual => write!(f, "!="),
            TokenType::EqualEqual => write!(f, "=="),
            TokenType::GreaterEqual => write!(f, ">="),
            TokenType::LessEqual => write!(f, "<="),
            TokenType::Identifier(name) => write!(f, "{}", name),
            TokenType::String(s) => write!(f, "\"{}\"", s),
            TokenType::Integer(n) => write!(f, "{}", n),
            TokenType::Float(n) => write!(f, "{:?}", n),
            TokenType::Let => write!(f, "let"),
            TokenType::If => write!(f, "if"),
            TokenType::Then => write!(f, "then"),
            TokenType::Else => write!(f, "else"),
            TokenType::End => write!(f, "end"),
            TokenType::While => write!(f, "while"),
            TokenType::Do => write!(f, "do"),
            TokenType::Func => write!(f, "func"),
            TokenType::Return => write!(f, "return"),
            TokenType::Print => write!(f, "print"),
            TokenType::And => write!(f, "and"),
            TokenType::Or => write!(f, "or"),
            TokenType::Not => write!(f, "not"),
            TokenType::True => write!(f, "true"),
            TokenType::False => write!(f, "false"),
            TokenType::Nil => write!(f, "nil"),
            TokenType::NewLine => writeln!(f),
            TokenType::EOF => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub token_type: TokenType,
    pub line: usize,
    pub byte_span: Range<usize>,
}

pub fn tokenize(source: &str) -> Result<Vec<Token>> {
    let bytes = source.as_bytes();
    let n = bytes.len();
    let mut cursor = 0;
    let mut line_number = 1;
    let mut tokens = Vec::new();

    loop {
        let (start, end, token_type) = next_token(source, cursor, line_number)?;
        let byte_span = start..end;
        cursor = end;

        match token_type {
            TokenType::EOF => {
                tokens.push(Token {
                    token_type: TokenType::EOF,
                    line: line_number,
                    byte_span,
                });

                assert_eq!(cursor, n);
                debug!("tokenized {} tokens over {} lines", tokens.len(), line_number);

                return Ok(tokens);
            }
            TokenType::NewLine => {
                tokens.push(Token {
                    token_type,
                    line: line_number,
                    byte_span,
                });
                line_number += 1;
            }
            token_type => tokens.push(Token {
                token_type,
                line: line_number,
                byte_span,
            }),
        }
    }
}

// Scans one token starting at `cursor`, returning its byte range and type.
// Whitespace and comments in front of the token are skipped here.
fn next_token(source: &str, cursor: usize, line: usize) -> Result<(usize, usize, TokenType)> {
    let bytes = source.as_bytes();
    let n = bytes.len();
    let mut cursor = cursor;

    loop {
        while cursor < n && matches!(bytes[cursor], b' ' | b'\t' | b'\r') {
            cursor += 1;
        }

        if cursor < n && bytes[cursor] == b'#' {
            while cursor < n && bytes[cursor] != b'\n' {
                cursor += 1;
            }
            continue;
        }

        break;
    }

    if cursor == n {
        return Ok((cursor, cursor, TokenType::EOF));
    }

    let start = cursor;

    if bytes[cursor].is_ascii_digit()
        || (bytes[cursor] == b'.' && cursor + 1 < n && bytes[cursor + 1].is_ascii_digit())
    {
        let mut end = cursor;
        while end < n && bytes[end].is_ascii_digit() {
            end += 1;
        }

        let is_float = end < n && bytes[end] == b'.';
        if is_float {
            end += 1;
            while end < n && bytes[end].is_ascii_digit() {
                end += 1;
            }
        }

        let lexeme = &source[start..end];
        let token_type = if is_float {
            // A leading or trailing dot is accepted by padding the missing side.
            let padded = format!("0{}0", lexeme);
            match padded.parse::<f64>() {
                Ok(value) => TokenType::Float(value),
                Err(_) => return lex_error(format!("Invalid number '{}'", lexeme), line),
            }
        } else {
            match lexeme.parse::<i64>() {
                Ok(value) => TokenType::Integer(value),
                Err(_) => {
                    return lex_error(format!("Integer literal '{}' is too large", lexeme), line)
                }
            }
        };

        return Ok((start, end, token_type));
    }

    if bytes[cursor] == b'"' {
        let mut end = cursor + 1;

        while end < n && bytes[end] != b'"' && bytes[end] != b'\n' {
            end += 1;
        }

        if end >= n || bytes[end] == b'\n' {
            return lex_error("Unterminated string", line);
        }

        return Ok((
            start,
            end + 1,
            TokenType::String(source[start + 1..end].to_string()),
        ));
    }

    // Two character operators must win over their one character prefixes.
    if cursor + 1 < n {
        let token_type = match &bytes[cursor..cursor + 2] {
            b"==" => Some(TokenType::EqualEqual),
            b"!=" => Some(TokenType::BangEqual),
            b"<=" => Some(TokenType::LessEqual),
            b">=" => Some(TokenType::GreaterEqual),
            _ => None,
        };

        if let Some(token_type) = token_type {
            return Ok((start, cursor + 2, token_type));
        }
    }

    let token_type = match bytes[cursor] {
        b'\n' => Some(TokenType::NewLine),
        b'(' => Some(TokenType::LeftParen),
        b')' => Some(TokenType::RightParen),
        b'[' => Some(TokenType::LeftSquare),
        b']' => Some(TokenType::RightSquare),
        b',' => Some(TokenType::Comma),
        b'+' => Some(TokenType::Plus),
        b'-' => Some(TokenType::Minus),
        b'*' => Some(TokenType::Star),
        b'/' => Some(TokenType::Slash),
        b'%' => Some(TokenType::Percent),
        b'=' => Some(TokenType::Equal),
        b'<' => Some(TokenType::Less),
        b'>' => Some(TokenType::Greater),
        _ => None,
    };

    if let Some(token_type) = token_type {
        return Ok((start, cursor + 1, token_type));
    }

    if bytes[cursor].is_ascii_alphabetic() || bytes[cursor] == b'_' {
        let mut end = cursor + 1;

        while end < n && (bytes[end].is_ascii_alphanumeric() || bytes[end] == b'_') {
            end += 1;
        }

        let token_type = match &source[start..end] {
            "let" => TokenType::Let,
            "if" => TokenType::If,
            "then" => TokenType::Then,
            "else" => TokenType::Else,
            "end" => TokenType::End,
            "while" => TokenType::While,
            "do" => TokenType::Do,
            "func" => TokenType::Func,
            "return" => TokenType::Return,
            "print" => TokenType::Print,
            "and" => TokenType::And,
            "or" => TokenType::Or,
            "not" => TokenType::Not,
            "true" => TokenType::True,
            "false" => TokenType::False,
            "nil" => TokenType::Nil,
            name => TokenType::Identifier(name.to_string()),
        };

        return Ok((start, end, token_type));
    }

    let unexpected = source[cursor..].chars().next().unwrap_or('\0');
    lex_error(format!("Unexpected character '{}'", unexpected), line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use pretty_assertions::assert_eq;

    fn types(source: &str) -> Result<Vec<TokenType>> {
        Ok(tokenize(source)?
            .into_iter()
            .map(|token| token.token_type)
            .filter(|token_type| *token_type != TokenType::EOF)
            .collect())
    }

    #[test]
    fn test_numbers() -> Result<()> {
        assert_eq!(types("42")?, vec![TokenType::Integer(42)]);
        assert_eq!(types("0")?, vec![TokenType::Integer(0)]);
        assert_eq!(types("3.14")?, vec![TokenType::Float(3.14)]);
        assert_eq!(types(".5")?, vec![TokenType::Float(0.5)]);
        assert_eq!(types("5.")?, vec![TokenType::Float(5.0)]);
        assert!(tokenize("99999999999999999999").is_err());
        Ok(())
    }

    #[test]
    fn test_strings() -> Result<()> {
        assert_eq!(
            types("\"hello world\"")?,
            vec![TokenType::String("hello world".to_string())]
        );
        assert_eq!(types("\"\"")?, vec![TokenType::String(String::new())]);
        // no escape processing
        assert_eq!(
            types(r#""a\nb""#)?,
            vec![TokenType::String(r"a\nb".to_string())]
        );
        assert!(tokenize("\"open").is_err());
        assert!(tokenize("\"broken\nstring\"").is_err());
        Ok(())
    }

    #[test]
    fn test_keywords() -> Result<()> {
        assert_eq!(
            types("let if then else end while do func return print and or not true false nil")?,
            vec![
                TokenType::Let,
                TokenType::If,
                TokenType::Then,
                TokenType::Else,
                TokenType::End,
                TokenType::While,
                TokenType::Do,
                TokenType::Func,
                TokenType::Return,
                TokenType::Print,
                TokenType::And,
                TokenType::Or,
                TokenType::Not,
                TokenType::True,
                TokenType::False,
                TokenType::Nil,
            ]
        );
        Ok(())
    }

    #[test]
    fn test_keyword_prefixes_stay_identifiers() -> Result<()> {
        assert_eq!(
            types("lettuce endless android nil_value iffy")?,
            vec![
                TokenType::Identifier("lettuce".to_string()),
                TokenType::Identifier("endless".to_string()),
                TokenType::Identifier("android".to_string()),
                TokenType::Identifier("nil_value".to_string()),
                TokenType::Identifier("iffy".to_string()),
            ]
        );
        Ok(())
    }

    #[test]
    fn test_operators() -> Result<()> {
        assert_eq!(
            types("+ - * / % == != < <= > >= = ( ) [ ] ,")?,
            vec![
                TokenType::Plus,
                TokenType::Minus,
                TokenType::Star,
                TokenType::Slash,
                TokenType::Percent,
                TokenType::EqualEqual,
                TokenType::BangEqual,
                TokenType::Less,
                TokenType::LessEqual,
                TokenType::Greater,
                TokenType::GreaterEqual,
                TokenType::Equal,
                TokenType::LeftParen,
                TokenType::RightParen,
                TokenType::LeftSquare,
                TokenType::RightSquare,
                TokenType::Comma,
            ]
        );
        // no whitespace between operators
        assert_eq!(
            types("a<=b==c")?,
            vec![
                TokenType::Identifier("a".to_string()),
                TokenType::LessEqual,
                TokenType::Identifier("b".to_string()),
                TokenType::EqualEqual,
                TokenType::Identifier("c".to_string()),
            ]
        );
        Ok(())
    }

    #[test]
    fn test_comments() -> Result<()> {
        assert_eq!(types("# only a comment")?, Vec::<TokenType>::new());
        assert_eq!(types("42 # answer")?, vec![TokenType::Integer(42)]);
        assert_eq!(
            types("42 # comment\n99")?,
            vec![
                TokenType::Integer(42),
                TokenType::NewLine,
                TokenType::Integer(99)
            ]
        );
        Ok(())
    }

    #[test]
    fn test_newlines_are_kept_and_lines_counted() -> Result<()> {
        let tokens = tokenize("a\n\nb\nc")?;
        let newlines = tokens
            .iter()
            .filter(|token| token.token_type == TokenType::NewLine)
            .count();
        assert_eq!(newlines, 3);

        let lines: Vec<usize> = tokens
            .iter()
            .filter(|token| matches!(token.token_type, TokenType::Identifier(_)))
            .map(|token| token.line)
            .collect();
        assert_eq!(lines, vec![1, 3, 4]);

        assert!(tokens.windows(2).all(|pair| pair[0].line <= pair[1].line));
        assert_eq!(tokens.last().map(|t| &t.token_type), Some(&TokenType::EOF));
        Ok(())
    }

    #[test]
    fn test_byte_spans() -> Result<()> {
        let source = "let x = \"hi\"";
        let tokens = tokenize(source)?;
        let lexemes: Vec<&str> = tokens
            .iter()
            .map(|token| &source[token.byte_span.clone()])
            .collect();
        assert_eq!(lexemes, vec!["let", "x", "=", "\"hi\"", ""]);
        Ok(())
    }

    #[test]
    fn test_unexpected_character() {
        match tokenize("\n\nlet x = @") {
            Err(Error::Lex { message, line }) => {
                assert_eq!(line, 3);
                assert!(message.contains('@'));
            }
            other => panic!("expected lex error, got {:?}", other),
        }
        assert!(tokenize("let é = 1").is_err());
        assert!(tokenize("a ! b").is_err());
    }
}
