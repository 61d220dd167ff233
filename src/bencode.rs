//! Minimal bencode decoding, enough to parse tracker responses.
//!
//! Bencode carries four shapes: integers (`i42e`), byte strings
//! (`4:spam`), lists (`l...e`), and dictionaries (`d...e`) with byte-string
//! keys. Only decoding is implemented; the engine never produces bencode.

use std::collections::BTreeMap;

use thiserror::Error;

const MAX_DEPTH: usize = 32;

#[derive(Debug, Error)]
pub enum BencodeError {
    #[error("unexpected end of input")]
    UnexpectedEnd,

    #[error("invalid integer")]
    InvalidInteger,

    #[error("invalid string length")]
    InvalidLength,

    #[error("unexpected byte {0:#x} at offset {1}")]
    UnexpectedByte(u8, usize),

    #[error("nesting too deep")]
    TooDeep,

    #[error("trailing bytes after value")]
    TrailingBytes,
}

/// A decoded bencode value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Integer(i64),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Dict(BTreeMap<Vec<u8>, Value>),
}

impl Value {
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Bytes(b) => std::str::from_utf8(b).ok(),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&BTreeMap<Vec<u8>, Value>> {
        match self {
            Value::Dict(d) => Some(d),
            _ => None,
        }
    }
}

/// Decodes one complete bencode value; trailing bytes are an error.
pub fn decode(input: &[u8]) -> Result<Value, BencodeError> {
    let mut parser = Parser { input, at: 0 };
    let value = parser.value(0)?;
    if parser.at != input.len() {
        return Err(BencodeError::TrailingBytes);
    }
    Ok(value)
}

struct Parser<'a> {
    input: &'a [u8],
    at: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Result<u8, BencodeError> {
        self.input
            .get(self.at)
            .copied()
            .ok_or(BencodeError::UnexpectedEnd)
    }

    fn bump(&mut self) -> Result<u8, BencodeError> {
        let b = self.peek()?;
        self.at += 1;
        Ok(b)
    }

    fn value(&mut self, depth: usize) -> Result<Value, BencodeError> {
        if depth > MAX_DEPTH {
            return Err(BencodeError::TooDeep);
        }

        match self.peek()? {
            b'i' => self.integer(),
            b'l' => self.list(depth),
            b'd' => self.dict(depth),
            b'0'..=b'9' => Ok(Value::Bytes(self.bytes()?)),
            other => Err(BencodeError::UnexpectedByte(other, self.at)),
        }
    }

    fn integer(&mut self) -> Result<Value, BencodeError> {
        self.bump()?; // 'i'

        let start = self.at;
        if self.peek()? == b'-' {
            self.at += 1;
        }
        while self.peek()? != b'e' {
            if !self.peek()?.is_ascii_digit() {
                return Err(BencodeError::InvalidInteger);
            }
            self.at += 1;
        }

        let digits = &self.input[start..self.at];
        self.at += 1; // 'e'

        if digits.is_empty() || digits == b"-" {
            return Err(BencodeError::InvalidInteger);
        }
        // No leading zeros except "0" itself; "-0" is invalid.
        if digits == b"-0"
            || (digits.len() > 1 && digits[0] == b'0')
            || (digits.len() > 2 && digits[0] == b'-' && digits[1] == b'0')
        {
            return Err(BencodeError::InvalidInteger);
        }

        std::str::from_utf8(digits)
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Value::Integer)
            .ok_or(BencodeError::InvalidInteger)
    }

    fn bytes(&mut self) -> Result<Vec<u8>, BencodeError> {
        let start = self.at;
        while self.peek()? != b':' {
            if !self.peek()?.is_ascii_digit() {
                return Err(BencodeError::InvalidLength);
            }
            self.at += 1;
        }

        let len: usize = std::str::from_utf8(&self.input[start..self.at])
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or(BencodeError::InvalidLength)?;
        self.at += 1; // ':'

        if self.at + len > self.input.len() {
            return Err(BencodeError::UnexpectedEnd);
        }

        let bytes = self.input[self.at..self.at + len].to_vec();
        self.at += len;
        Ok(bytes)
    }

    fn list(&mut self, depth: usize) -> Result<Value, BencodeError> {
        self.bump()?; // 'l'

        let mut items = Vec::new();
        while self.peek()? != b'e' {
            items.push(self.value(depth + 1)?);
        }
        self.at += 1; // 'e'
        Ok(Value::List(items))
    }

    fn dict(&mut self, depth: usize) -> Result<Value, BencodeError> {
        self.bump()?; // 'd'

        let mut map = BTreeMap::new();
        while self.peek()? != b'e' {
            let key = self.bytes()?;
            let value = self.value(depth + 1)?;
            map.insert(key, value);
        }
        self.at += 1; // 'e'
        Ok(Value::Dict(map))
    }
}
