//! Recursive-descent parser for PDF objects
//!
//! Reads tokens from an input source and produces [`Value`]s whose
//! container children are direct handles; `num gen R` references become
//! lazy indirect handles into the owning document. The parser never
//! resolves a reference itself, which is what keeps reference cycles
//! harmless during loading.

use std::collections::VecDeque;
use std::io::SeekFrom;

use crate::document::Document;
use crate::error::{Damage, Error, ErrorCode, Result};
use crate::handle::Handle;
use crate::input::InputSource;
use crate::lexer::{Lexer, Token, TokenType};
use crate::object::{Array, Dict, Name, ObjGen, PdfString, StreamData, StreamValue, Value};

/// Nesting bound for containers
const MAX_DEPTH: usize = 500;

pub(crate) struct ObjectParser<'a> {
    doc: &'a Document,
    input: &'a mut dyn InputSource,
    /// Object whose strings are being parsed, for decryption
    decrypt_og: Option<ObjGen>,
    peeked: VecDeque<Token>,
}

/// Result of parsing `num gen obj ... endobj`
pub(crate) struct ParsedObject {
    pub og: ObjGen,
    pub value: Value,
}

impl<'a> ObjectParser<'a> {
    pub fn new(doc: &'a Document, input: &'a mut dyn InputSource) -> Self {
        Self {
            doc,
            input,
            decrypt_og: None,
            peeked: VecDeque::new(),
        }
    }

    fn next(&mut self) -> Result<Token> {
        if let Some(t) = self.peeked.pop_front() {
            return Ok(t);
        }
        Lexer::new(self.input).next_token()
    }

    fn unread(&mut self, token: Token) {
        self.peeked.push_front(token);
    }

    fn damaged(&mut self, offset: u64, message: impl Into<String>) -> Error {
        Damage::new(
            ErrorCode::DamagedPdf,
            self.input.name(),
            "",
            offset,
            message,
        )
        .into()
    }

    /// Parse a complete indirect object at the current position
    ///
    /// The input must be positioned at `num gen obj`. For streams, the
    /// returned value's data source records the raw data offset with a
    /// zero length; the caller resolves `/Length` once parsing is over.
    pub fn parse_indirect(&mut self, expected: ObjGen) -> Result<ParsedObject> {
        let start = self.input.tell()?;
        let num = self
            .next()?
            .as_integer()
            .ok_or_else(|| self.damaged(start, "expected object number"))?;
        let generation = self
            .next()?
            .as_integer()
            .ok_or_else(|| self.damaged(start, "expected generation number"))?;
        let obj_kw = self.next()?;
        if !obj_kw.is_word("obj") {
            return Err(self.damaged(start, "expected 'obj' keyword"));
        }
        let og = ObjGen::new(num as u32, generation as u16);
        if num <= 0 || og != expected {
            return Err(self.damaged(
                start,
                format!("expected object {expected}, found object {og}"),
            ));
        }

        self.decrypt_og = Some(og);
        let value = self.parse_value(0)?;
        self.decrypt_og = None;

        let next = self.next()?;
        let value = if next.is_word("stream") {
            let dict = match value {
                Value::Dictionary(d) => d,
                _ => {
                    return Err(self.damaged(start, "'stream' keyword after non-dictionary object"))
                }
            };
            // the keyword is followed by exactly one EOL before the data
            match self.input.read_byte()? {
                Some(b'\r') => {
                    if self.input.read_byte()? != Some(b'\n') {
                        self.input.unread_byte()?;
                    }
                }
                Some(b'\n') => {}
                Some(_) => {
                    self.input.unread_byte()?;
                }
                None => return Err(self.damaged(start, "EOF after 'stream' keyword")),
            }
            let offset = self.input.tell()?;
            Value::Stream(StreamValue {
                dict: Handle::new(Value::Dictionary(dict)),
                data: StreamData::InFile { offset, length: 0 },
            })
        } else {
            // a missing endobj is tolerated
            if !next.is_word("endobj") {
                self.unread(next);
            }
            value
        };

        Ok(ParsedObject { og, value })
    }

    /// Parse one value; containers recurse
    pub fn parse_value(&mut self, depth: usize) -> Result<Value> {
        if depth > MAX_DEPTH {
            let offset = self.input.tell().unwrap_or(0);
            return Err(self.damaged(offset, "object nesting too deep"));
        }
        let token = self.next()?;
        match token.token_type {
            TokenType::Null => Ok(Value::Null),
            TokenType::Boolean => Ok(Value::Bool(token.value == "true")),
            TokenType::Real => Ok(Value::Real(token.value)),
            TokenType::Name => Ok(Value::Name(Name::new(&token.value))),
            TokenType::String => {
                let bytes = match self.decrypt_og {
                    Some(og) => self.doc.decrypt_string(token.bytes, og)?,
                    None => token.bytes,
                };
                Ok(Value::String(PdfString::new(bytes)))
            }
            TokenType::Integer => {
                // references appear inside containers as handles; a bare
                // top-level reference has no value representation and
                // degrades to null
                self.unread(token);
                let child = self.parse_child(depth)?;
                if child.is_indirect() {
                    return Ok(Value::Null);
                }
                Ok(child.value_clone())
            }
            TokenType::ArrayOpen => self.parse_array(depth),
            TokenType::DictOpen => self.parse_dict(depth),
            TokenType::Eof => Err(self.damaged(token.offset, "unexpected EOF")),
            other => Err(self.damaged(
                token.offset,
                format!("unexpected token {:?} ({})", other, token.value),
            )),
        }
    }

    fn parse_array(&mut self, depth: usize) -> Result<Value> {
        let mut items = Array::new();
        loop {
            let token = self.next()?;
            match token.token_type {
                TokenType::ArrayClose => break,
                TokenType::Eof => {
                    return Err(self.damaged(token.offset, "unterminated array"))
                }
                _ => {
                    self.unread(token);
                    let child = self.parse_child(depth + 1)?;
                    items.push(child);
                }
            }
        }
        Ok(Value::Array(items))
    }

    fn parse_dict(&mut self, depth: usize) -> Result<Value> {
        let mut dict = Dict::new();
        loop {
            let token = self.next()?;
            match token.token_type {
                TokenType::DictClose => break,
                TokenType::Name => {
                    let key = Name::new(&token.value);
                    let child = self.parse_child(depth + 1)?;
                    dict.insert(key, child);
                }
                TokenType::Eof => {
                    return Err(self.damaged(token.offset, "unterminated dictionary"))
                }
                other => {
                    return Err(self.damaged(
                        token.offset,
                        format!("dictionary key must be a name, got {other:?}"),
                    ))
                }
            }
        }
        Ok(Value::Dictionary(dict))
    }

    /// Parse a container child into a handle: references become lazy
    /// indirect handles, everything else a direct handle
    fn parse_child(&mut self, depth: usize) -> Result<Handle> {
        let token = self.next()?;
        if token.token_type == TokenType::Integer {
            let second = self.next()?;
            if second.token_type == TokenType::Integer {
                let third = self.next()?;
                if third.is_word("R") {
                    let num = token.as_integer().unwrap_or(0);
                    let generation = second.as_integer().unwrap_or(0);
                    if num <= 0 || !(0..=u16::MAX as i64).contains(&generation) {
                        return Ok(Handle::new_null());
                    }
                    return Ok(Handle::new_indirect(
                        self.doc.weak(),
                        ObjGen::new(num as u32, generation as u16),
                    ));
                }
                self.unread(third);
            }
            self.unread(second);
            return Ok(Handle::new(Value::Integer(token.as_integer().unwrap_or(0))));
        }
        self.unread(token);
        Ok(Handle::new(self.parse_value(depth)?))
    }

    /// Scan forward from `from` for `endstream`, recovering a missing or
    /// broken `/Length`
    pub fn recover_stream_length(&mut self, from: u64) -> Result<Option<usize>> {
        const WINDOW: usize = 1 << 24;
        let found = match self.input.find_first(b"endstream", from, WINDOW)? {
            Some(at) => at,
            None => return Ok(None),
        };
        // back off the EOL preceding the keyword
        let mut len = (found - from) as usize;
        if len >= 1 {
            self.input.seek(SeekFrom::Start(found - 1))?;
            if let Some(b @ (b'\n' | b'\r')) = self.input.read_byte()? {
                len -= 1;
                if b == b'\n' && len >= 1 {
                    self.input.seek(SeekFrom::Start(found - 2))?;
                    if self.input.read_byte()? == Some(b'\r') {
                        len -= 1;
                    }
                }
            }
        }
        self.input.seek(SeekFrom::Start(from))?;
        Ok(Some(len))
    }
}
