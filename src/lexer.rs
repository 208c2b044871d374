//! PDF lexer - tokenizes object syntax read from an input source
//!
//! Produces owned tokens so the parser can buffer lookahead (needed for
//! `num gen R` references) without re-seeking the input.

use crate::error::{Damage, Error, ErrorCode, Result};
use crate::input::InputSource;

/// Token types in PDF object syntax
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenType {
    /// End of input
    Eof,
    /// `[`
    ArrayOpen,
    /// `]`
    ArrayClose,
    /// `<<`
    DictOpen,
    /// `>>`
    DictClose,
    /// `/SomeName`
    Name,
    /// Literal or hex string
    String,
    /// Integer number
    Integer,
    /// Real number (decimal text kept verbatim)
    Real,
    /// `true` or `false`
    Boolean,
    /// `null`
    Null,
    /// Bare keyword: `obj`, `endobj`, `stream`, `R`, ...
    Word,
}

/// A token with its parsed value and input offset
#[derive(Debug, Clone)]
pub struct Token {
    pub token_type: TokenType,
    /// Name text (no slash), keyword text, or number text
    pub value: String,
    /// Decoded content of a String token; may be binary
    pub bytes: Vec<u8>,
    /// Offset of the token's first byte
    pub offset: u64,
}

impl Token {
    fn new(token_type: TokenType, value: impl Into<String>, offset: u64) -> Self {
        Self {
            token_type,
            value: value.into(),
            bytes: Vec::new(),
            offset,
        }
    }

    fn string(bytes: Vec<u8>, offset: u64) -> Self {
        Self {
            token_type: TokenType::String,
            value: String::new(),
            bytes,
            offset,
        }
    }

    pub fn is(&self, token_type: TokenType) -> bool {
        self.token_type == token_type
    }

    pub fn is_word(&self, word: &str) -> bool {
        self.token_type == TokenType::Word && self.value == word
    }

    pub fn as_integer(&self) -> Option<i64> {
        if self.token_type == TokenType::Integer {
            self.value.parse().ok()
        } else {
            None
        }
    }
}

fn is_whitespace(b: u8) -> bool {
    matches!(b, b'\0' | b'\t' | b'\n' | b'\x0c' | b'\r' | b' ')
}

fn is_delimiter(b: u8) -> bool {
    matches!(b, b'(' | b')' | b'<' | b'>' | b'[' | b']' | b'{' | b'}' | b'/' | b'%')
}

/// Tokenizer over an input source
pub struct Lexer<'a> {
    input: &'a mut dyn InputSource,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a mut dyn InputSource) -> Self {
        Self { input }
    }

    fn damaged(&mut self, offset: u64, message: impl Into<String>) -> Error {
        Damage::new(ErrorCode::DamagedPdf, self.input.name(), "", offset, message).into()
    }

    fn skip_whitespace_and_comments(&mut self) -> Result<()> {
        loop {
            match self.input.read_byte()? {
                None => return Ok(()),
                Some(b) if is_whitespace(b) => continue,
                Some(b'%') => {
                    // comment runs to end of line
                    loop {
                        match self.input.read_byte()? {
                            None | Some(b'\n') | Some(b'\r') => break,
                            Some(_) => continue,
                        }
                    }
                }
                Some(_) => {
                    self.input.unread_byte()?;
                    return Ok(());
                }
            }
        }
    }

    /// Read the next token
    pub fn next_token(&mut self) -> Result<Token> {
        self.skip_whitespace_and_comments()?;
        let offset = self.input.tell()?;
        let b = match self.input.read_byte()? {
            None => return Ok(Token::new(TokenType::Eof, "", offset)),
            Some(b) => b,
        };
        match b {
            b'[' => Ok(Token::new(TokenType::ArrayOpen, "[", offset)),
            b']' => Ok(Token::new(TokenType::ArrayClose, "]", offset)),
            b'<' => match self.input.read_byte()? {
                Some(b'<') => Ok(Token::new(TokenType::DictOpen, "<<", offset)),
                Some(_) => {
                    self.input.unread_byte()?;
                    self.lex_hex_string(offset)
                }
                None => Err(self.damaged(offset, "unterminated hex string")),
            },
            b'>' => match self.input.read_byte()? {
                Some(b'>') => Ok(Token::new(TokenType::DictClose, ">>", offset)),
                _ => Err(self.damaged(offset, "unexpected '>'")),
            },
            b'(' => self.lex_literal_string(offset),
            b'/' => self.lex_name(offset),
            b'+' | b'-' | b'.' | b'0'..=b'9' => self.lex_number(b, offset),
            b'{' | b'}' | b')' => Err(self.damaged(offset, format!("unexpected '{}'", b as char))),
            _ => self.lex_word(b, offset),
        }
    }

    fn lex_name(&mut self, offset: u64) -> Result<Token> {
        let mut name = String::new();
        loop {
            match self.input.read_byte()? {
                None => break,
                Some(b) if is_whitespace(b) || is_delimiter(b) => {
                    self.input.unread_byte()?;
                    break;
                }
                Some(b'#') => {
                    let hi = self.input.read_byte()?;
                    let lo = self.input.read_byte()?;
                    match (hi.and_then(hex_value), lo.and_then(hex_value)) {
                        (Some(hi), Some(lo)) => name.push((hi * 16 + lo) as char),
                        _ => return Err(self.damaged(offset, "invalid # escape in name")),
                    }
                }
                Some(b) => name.push(b as char),
            }
        }
        Ok(Token::new(TokenType::Name, name, offset))
    }

    fn lex_literal_string(&mut self, offset: u64) -> Result<Token> {
        let mut bytes = Vec::new();
        let mut depth = 1usize;
        loop {
            let b = self
                .input
                .read_byte()?
                .ok_or_else(|| self.damaged(offset, "unterminated string"))?;
            match b {
                b'(' => {
                    depth += 1;
                    bytes.push(b);
                }
                b')' => {
                    depth -= 1;
                    if depth == 0 {
                        break;
                    }
                    bytes.push(b);
                }
                b'\r' => {
                    // raw EOL inside a string normalizes to \n
                    match self.input.read_byte()? {
                        Some(b'\n') | None => {}
                        Some(_) => self.input.unread_byte()?,
                    }
                    bytes.push(b'\n');
                }
                b'\\' => {
                    let esc = self
                        .input
                        .read_byte()?
                        .ok_or_else(|| self.damaged(offset, "unterminated string"))?;
                    match esc {
                        b'n' => bytes.push(b'\n'),
                        b'r' => bytes.push(b'\r'),
                        b't' => bytes.push(b'\t'),
                        b'b' => bytes.push(0x08),
                        b'f' => bytes.push(0x0c),
                        b'(' | b')' | b'\\' => bytes.push(esc),
                        b'\n' => {}
                        b'\r' => {
                            // line continuation swallows CRLF
                            match self.input.read_byte()? {
                                Some(b'\n') | None => {}
                                Some(_) => self.input.unread_byte()?,
                            }
                        }
                        b'0'..=b'7' => {
                            let mut code = (esc - b'0') as u32;
                            for _ in 0..2 {
                                match self.input.read_byte()? {
                                    Some(d @ b'0'..=b'7') => {
                                        code = code * 8 + (d - b'0') as u32;
                                    }
                                    Some(_) => {
                                        self.input.unread_byte()?;
                                        break;
                                    }
                                    None => break,
                                }
                            }
                            bytes.push((code & 0xff) as u8);
                        }
                        other => bytes.push(other),
                    }
                }
                other => bytes.push(other),
            }
        }
        Ok(Token::string(bytes, offset))
    }

    fn lex_hex_string(&mut self, offset: u64) -> Result<Token> {
        let mut digits = Vec::new();
        loop {
            let b = self
                .input
                .read_byte()?
                .ok_or_else(|| self.damaged(offset, "unterminated hex string"))?;
            match b {
                b'>' => break,
                b if is_whitespace(b) => continue,
                b => match hex_value(b) {
                    Some(v) => digits.push(v),
                    None => return Err(self.damaged(offset, "invalid character in hex string")),
                },
            }
        }
        if digits.len() % 2 == 1 {
            digits.push(0);
        }
        let bytes = digits.chunks(2).map(|pair| pair[0] * 16 + pair[1]).collect();
        Ok(Token::string(bytes, offset))
    }

    fn lex_number(&mut self, first: u8, offset: u64) -> Result<Token> {
        let mut text = String::new();
        text.push(first as char);
        let mut saw_point = first == b'.';
        loop {
            match self.input.read_byte()? {
                Some(b @ b'0'..=b'9') => text.push(b as char),
                Some(b'.') if !saw_point => {
                    saw_point = true;
                    text.push('.');
                }
                Some(_) => {
                    self.input.unread_byte()?;
                    break;
                }
                None => break,
            }
        }
        if !text.bytes().any(|b| b.is_ascii_digit()) {
            return Err(self.damaged(offset, format!("invalid number: {text}")));
        }
        if saw_point {
            Ok(Token::new(TokenType::Real, text, offset))
        } else if text.parse::<i64>().is_ok() {
            Ok(Token::new(TokenType::Integer, text, offset))
        } else {
            // out-of-range integers degrade to reals
            Ok(Token::new(TokenType::Real, text, offset))
        }
    }

    fn lex_word(&mut self, first: u8, offset: u64) -> Result<Token> {
        let mut word = String::new();
        word.push(first as char);
        loop {
            match self.input.read_byte()? {
                None => break,
                Some(b) if is_whitespace(b) || is_delimiter(b) => {
                    self.input.unread_byte()?;
                    break;
                }
                Some(b) => word.push(b as char),
            }
        }
        let token = match word.as_str() {
            "true" => Token::new(TokenType::Boolean, "true", offset),
            "false" => Token::new(TokenType::Boolean, "false", offset),
            "null" => Token::new(TokenType::Null, "null", offset),
            _ => Token::new(TokenType::Word, word, offset),
        };
        Ok(token)
    }
}

fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::BufferInputSource;

    fn tokens(data: &[u8]) -> Vec<Token> {
        let mut input = BufferInputSource::from_slice("test", data);
        let mut lexer = Lexer::new(&mut input);
        let mut out = Vec::new();
        loop {
            let t = lexer.next_token().unwrap();
            let eof = t.is(TokenType::Eof);
            out.push(t);
            if eof {
                break;
            }
        }
        out
    }

    #[test]
    fn test_structural_tokens() {
        let ts = tokens(b"[ ] << >>");
        let kinds: Vec<TokenType> = ts.iter().map(|t| t.token_type).collect();
        assert_eq!(
            kinds,
            vec![
                TokenType::ArrayOpen,
                TokenType::ArrayClose,
                TokenType::DictOpen,
                TokenType::DictClose,
                TokenType::Eof
            ]
        );
    }

    #[test]
    fn test_numbers() {
        let ts = tokens(b"42 -17 +5 3.14 -.5 6.");
        assert_eq!(ts[0].as_integer(), Some(42));
        assert_eq!(ts[1].as_integer(), Some(-17));
        assert_eq!(ts[2].as_integer(), Some(5));
        assert!(ts[3].is(TokenType::Real));
        assert_eq!(ts[3].value, "3.14");
        assert!(ts[4].is(TokenType::Real));
        assert_eq!(ts[4].value, "-.5");
        assert!(ts[5].is(TokenType::Real));
        assert_eq!(ts[5].value, "6.");
    }

    #[test]
    fn test_names() {
        let ts = tokens(b"/Type /Name#20With#20Spaces /A/B");
        assert_eq!(ts[0].value, "Type");
        assert_eq!(ts[1].value, "Name With Spaces");
        assert_eq!(ts[2].value, "A");
        assert_eq!(ts[3].value, "B");
    }

    #[test]
    fn test_literal_string() {
        let ts = tokens(b"(hello (nested) \\(escaped\\) \\n \\101)");
        assert!(ts[0].is(TokenType::String));
        assert_eq!(ts[0].bytes, b"hello (nested) (escaped) \n A");
    }

    #[test]
    fn test_hex_string() {
        let ts = tokens(b"<48 65 6C6C 6F> <48656>");
        assert_eq!(ts[0].bytes, b"Hello");
        // odd digit count pads with zero
        assert_eq!(ts[1].bytes, vec![0x48, 0x65, 0x60]);
    }

    #[test]
    fn test_keywords() {
        let ts = tokens(b"true false null obj endobj stream R");
        assert!(ts[0].is(TokenType::Boolean));
        assert!(ts[1].is(TokenType::Boolean));
        assert!(ts[2].is(TokenType::Null));
        assert!(ts[3].is_word("obj"));
        assert!(ts[4].is_word("endobj"));
        assert!(ts[5].is_word("stream"));
        assert!(ts[6].is_word("R"));
    }

    #[test]
    fn test_comments_skipped() {
        let ts = tokens(b"% a comment\n42 % trailing\n7");
        assert_eq!(ts[0].as_integer(), Some(42));
        assert_eq!(ts[1].as_integer(), Some(7));
    }

    #[test]
    fn test_token_offsets() {
        let ts = tokens(b"  42 /Nm");
        assert_eq!(ts[0].offset, 2);
        assert_eq!(ts[1].offset, 5);
    }

    #[test]
    fn test_unterminated_string() {
        let mut input = BufferInputSource::from_slice("test", b"(never closed");
        let mut lexer = Lexer::new(&mut input);
        assert!(lexer.next_token().is_err());
    }
}
