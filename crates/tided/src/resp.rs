//! RESP2 (REdis Serialization Protocol) codec
//!
//! Enough of RESP2 for redis-cli and the watch push frames.

use bytes::{Buf, BytesMut};
use thiserror::Error;

/// Maximum bulk string size (512MB)
const MAX_BULK_STRING_SIZE: usize = 512 * 1024 * 1024;

/// Maximum array size (1M elements)
const MAX_ARRAY_SIZE: usize = 1024 * 1024;

/// Maximum array nesting; commands are flat
const MAX_DEPTH: usize = 8;

/// Malformed client input
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// First byte is not a RESP2 type marker
    #[error("unknown RESP type byte {0:?}")]
    UnknownType(char),
    /// Simple string, error or header line is not UTF-8
    #[error("invalid UTF-8 in protocol line")]
    Utf8,
    /// Integer or length line does not parse
    #[error("invalid integer {0:?}")]
    Integer(String),
    /// Negative length other than the -1 null marker
    #[error("invalid length {0}")]
    Length(i64),
    /// Bulk string above the size limit
    #[error("bulk string too large: {0} bytes (max 512 MB)")]
    BulkTooLarge(usize),
    /// Array above the element limit
    #[error("array too large: {0} elements (max 1M)")]
    ArrayTooLarge(usize),
    /// Arrays nested deeper than the limit
    #[error("arrays nested deeper than {0} levels")]
    TooDeep(usize),
    /// Bulk string payload not followed by CRLF
    #[error("expected CRLF after bulk string")]
    MissingCrlf,
}

/// RESP data types
#[derive(Debug, Clone, PartialEq)]
pub enum RespValue {
    /// Simple string: +OK\r\n
    SimpleString(String),
    /// Error: -Error message\r\n
    Error(String),
    /// Integer: :1000\r\n
    Integer(i64),
    /// Bulk string: $6\r\nfoobar\r\n
    BulkString(Option<Vec<u8>>),
    /// Array: *2\r\n$3\r\nfoo\r\n$3\r\nbar\r\n
    Array(Option<Vec<RespValue>>),
}

impl RespValue {
    /// `+OK`
    pub fn ok() -> Self {
        RespValue::SimpleString("OK".to_string())
    }

    /// Error reply
    pub fn error(msg: impl Into<String>) -> Self {
        RespValue::Error(msg.into())
    }

    /// Non-null bulk string
    pub fn bulk(data: impl Into<Vec<u8>>) -> Self {
        RespValue::BulkString(Some(data.into()))
    }

    /// Null bulk string
    pub fn nil() -> Self {
        RespValue::BulkString(None)
    }

    /// Non-null array
    pub fn array(items: Vec<RespValue>) -> Self {
        RespValue::Array(Some(items))
    }

    /// Contents of a non-null bulk string
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            RespValue::BulkString(Some(data)) => Some(data),
            _ => None,
        }
    }

    /// Contents of a bulk string if it is valid UTF-8
    pub fn as_str(&self) -> Option<&str> {
        self.as_bytes().and_then(|b| std::str::from_utf8(b).ok())
    }

    /// Serialize to RESP format
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.write_to(&mut out);
        out
    }

    fn write_to(&self, out: &mut Vec<u8>) {
        match self {
            RespValue::SimpleString(s) => {
                out.push(b'+');
                out.extend_from_slice(s.as_bytes());
            }
            RespValue::Error(e) => {
                out.push(b'-');
                out.extend_from_slice(e.as_bytes());
            }
            RespValue::Integer(i) => out.extend_from_slice(format!(":{}", i).as_bytes()),
            RespValue::BulkString(None) => out.extend_from_slice(b"$-1"),
            RespValue::BulkString(Some(data)) => {
                out.extend_from_slice(format!("${}\r\n", data.len()).as_bytes());
                out.extend_from_slice(data);
            }
            RespValue::Array(None) => out.extend_from_slice(b"*-1"),
            RespValue::Array(Some(items)) => {
                out.extend_from_slice(format!("*{}\r\n", items.len()).as_bytes());
                for item in items {
                    item.write_to(out);
                }
                // Elements carry their own terminators
                return;
            }
        }
        out.extend_from_slice(b"\r\n");
    }

    /// Parse one value from the front of `buf`.
    ///
    /// Returns `Ok(None)` and leaves `buf` untouched when more data is needed.
    pub fn parse(buf: &mut BytesMut) -> Result<Option<RespValue>, ParseError> {
        let mut parser = Parser {
            buf: &buf[..],
            pos: 0,
            depth: 0,
        };
        match parser.value()? {
            Some(value) => {
                let consumed = parser.pos;
                buf.advance(consumed);
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }
}

struct Parser<'a> {
    buf: &'a [u8],
    pos: usize,
    /// Arrays currently open
    depth: usize,
}

impl<'a> Parser<'a> {
    fn value(&mut self) -> Result<Option<RespValue>, ParseError> {
        let Some(&type_byte) = self.buf.get(self.pos) else {
            return Ok(None);
        };
        self.pos += 1;

        match type_byte {
            b'+' => Ok(self.text()?.map(RespValue::SimpleString)),
            b'-' => Ok(self.text()?.map(RespValue::Error)),
            b':' => Ok(self.integer()?.map(RespValue::Integer)),
            b'$' => self.bulk_string(),
            b'*' => self.array(),
            other => Err(ParseError::UnknownType(other as char)),
        }
    }

    fn bulk_string(&mut self) -> Result<Option<RespValue>, ParseError> {
        let Some(len) = self.length()? else {
            return Ok(None);
        };
        let Some(len) = len else {
            return Ok(Some(RespValue::BulkString(None)));
        };
        if len > MAX_BULK_STRING_SIZE {
            return Err(ParseError::BulkTooLarge(len));
        }

        let end = self.pos + len;
        if self.buf.len() < end + 2 {
            return Ok(None);
        }
        if &self.buf[end..end + 2] != b"\r\n" {
            return Err(ParseError::MissingCrlf);
        }

        let data = self.buf[self.pos..end].to_vec();
        self.pos = end + 2;
        Ok(Some(RespValue::BulkString(Some(data))))
    }

    fn array(&mut self) -> Result<Option<RespValue>, ParseError> {
        let Some(len) = self.length()? else {
            return Ok(None);
        };
        let Some(len) = len else {
            return Ok(Some(RespValue::Array(None)));
        };
        if len > MAX_ARRAY_SIZE {
            return Err(ParseError::ArrayTooLarge(len));
        }
        if self.depth == MAX_DEPTH {
            return Err(ParseError::TooDeep(MAX_DEPTH));
        }

        self.depth += 1;
        let items = self.elements(len);
        self.depth -= 1;
        Ok(items?.map(|items| RespValue::Array(Some(items))))
    }

    fn elements(&mut self, len: usize) -> Result<Option<Vec<RespValue>>, ParseError> {
        let mut items = Vec::with_capacity(len);
        for _ in 0..len {
            match self.value()? {
                Some(item) => items.push(item),
                None => return Ok(None),
            }
        }
        Ok(Some(items))
    }

    /// Outer `None`: need more data. Inner `None`: null (-1).
    fn length(&mut self) -> Result<Option<Option<usize>>, ParseError> {
        match self.integer()? {
            None => Ok(None),
            Some(-1) => Ok(Some(None)),
            Some(len) if len < 0 => Err(ParseError::Length(len)),
            Some(len) => Ok(Some(Some(len as usize))),
        }
    }

    fn integer(&mut self) -> Result<Option<i64>, ParseError> {
        match self.text()? {
            None => Ok(None),
            Some(s) => s.parse().map(Some).map_err(|_| ParseError::Integer(s)),
        }
    }

    fn text(&mut self) -> Result<Option<String>, ParseError> {
        match self.line() {
            None => Ok(None),
            Some(line) => String::from_utf8(line.to_vec())
                .map(Some)
                .map_err(|_| ParseError::Utf8),
        }
    }

    fn line(&mut self) -> Option<&'a [u8]> {
        let buf = self.buf;
        let rest = &buf[self.pos..];
        let offset = rest.windows(2).position(|w| w == b"\r\n")?;
        let start = self.pos;
        self.pos += offset + 2;
        Some(&buf[start..start + offset])
    }
}
