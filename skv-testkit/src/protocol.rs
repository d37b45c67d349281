//! # Server-Side RESP2
//!
//! Incremental request parsing over a `BytesMut` buffer plus reply encoders
//! used by the fake servers.

use bytes::{Buf, BytesMut};

/// Request framing failure; the connection is dropped after replying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RespError {
    Protocol,
}

/// Parses RESP2 arrays of bulk strings.
#[derive(Debug, Default)]
pub struct RespParser;

impl RespParser {
    pub fn new() -> Self {
        RespParser
    }

    /// Parses one command from the front of `buf`.
    ///
    /// Returns `Ok(None)` when the buffer does not yet hold a full command;
    /// nothing is consumed in that case.
    pub fn parse(&mut self, buf: &mut BytesMut) -> Result<Option<Vec<Vec<u8>>>, RespError> {
        let (count, mut pos) = match read_header(buf, 0, b'*')? {
            Some(header) => header,
            None => return Ok(None),
        };

        let mut args = Vec::with_capacity(count);
        for _ in 0..count {
            let (len, next) = match read_header(buf, pos, b'$')? {
                Some(header) => header,
                None => return Ok(None),
            };
            pos = next;
            if buf.len() < pos + len + 2 {
                return Ok(None);
            }
            if &buf[pos + len..pos + len + 2] != b"\r\n" {
                return Err(RespError::Protocol);
            }
            args.push(buf[pos..pos + len].to_vec());
            pos += len + 2;
        }

        buf.advance(pos);
        Ok(Some(args))
    }
}

/// Reads a `<prefix><number>\r\n` header at `pos`; returns the number and the
/// offset just past the header.
fn read_header(buf: &[u8], pos: usize, prefix: u8) -> Result<Option<(usize, usize)>, RespError> {
    if pos >= buf.len() {
        return Ok(None);
    }
    if buf[pos] != prefix {
        return Err(RespError::Protocol);
    }
    let end = match buf[pos..].windows(2).position(|w| w == b"\r\n") {
        Some(offset) => pos + offset,
        None => return Ok(None),
    };
    let value = parse_usize(&buf[pos + 1..end])?;
    Ok(Some((value, end + 2)))
}

fn parse_usize(data: &[u8]) -> Result<usize, RespError> {
    if data.is_empty() {
        return Err(RespError::Protocol);
    }
    let mut value = 0usize;
    for &b in data {
        if !b.is_ascii_digit() {
            return Err(RespError::Protocol);
        }
        value = value.saturating_mul(10).saturating_add((b - b'0') as usize);
    }
    Ok(value)
}

pub fn resp_simple(message: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(message.len() + 3);
    buf.extend_from_slice(b"+");
    buf.extend_from_slice(message.as_bytes());
    buf.extend_from_slice(b"\r\n");
    buf
}

/// Error reply; `message` carries its own prefix (`ERR`, `NOAUTH`, ...).
pub fn resp_error(message: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(message.len() + 3);
    buf.extend_from_slice(b"-");
    buf.extend_from_slice(message.as_bytes());
    buf.extend_from_slice(b"\r\n");
    buf
}

pub fn resp_integer(value: i64) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(b":");
    buf.extend_from_slice(value.to_string().as_bytes());
    buf.extend_from_slice(b"\r\n");
    buf
}

pub fn resp_bulk(data: &[u8]) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(b"$");
    buf.extend_from_slice(data.len().to_string().as_bytes());
    buf.extend_from_slice(b"\r\n");
    buf.extend_from_slice(data);
    buf.extend_from_slice(b"\r\n");
    buf
}

pub fn resp_null() -> Vec<u8> {
    b"$-1\r\n".to_vec()
}

pub fn resp_null_array() -> Vec<u8> {
    b"*-1\r\n".to_vec()
}

/// Array of already-encoded replies.
pub fn resp_array(items: Vec<Vec<u8>>) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(b"*");
    buf.extend_from_slice(items.len().to_string().as_bytes());
    buf.extend_from_slice(b"\r\n");
    for item in items {
        buf.extend_from_slice(&item);
    }
    buf
}

/// Array of bulk strings.
pub fn resp_bulk_array<T: AsRef<[u8]>>(items: &[T]) -> Vec<u8> {
    resp_array(items.iter().map(|item| resp_bulk(item.as_ref())).collect())
}
