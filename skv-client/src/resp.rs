//! # RESP2 Encoding and Parsing
//!
//! Purpose: Encode client commands and parse server responses,
//! keeping allocations under control.
//!
//! ## Design Principles
//! 1. **State-Free Parsing**: Responses are parsed top-down with minimal state.
//! 2. **Buffer Reuse**: Caller provides buffers to avoid per-call allocations.
//! 3. **Binary-Safe**: Bulk strings are treated as raw bytes.
//! 4. **Fail Fast**: Invalid framing returns protocol errors immediately.

use std::io::{BufRead, Read};

use skv_common::{SkvError, SkvResult};

/// Largest bulk string accepted from a peer (Redis's own limit).
pub const MAX_BULK_LEN: i64 = 512 * 1024 * 1024;
/// Largest element count accepted in one array header.
pub const MAX_ARRAY_LEN: i64 = 1 << 24;
/// Deepest array nesting accepted in one reply.
pub const MAX_DEPTH: usize = 32;
/// Upper bound on buffer space reserved before payload bytes arrive.
const PREALLOC_LIMIT: usize = 64 * 1024;

/// RESP response value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    /// +OK or +PONG style responses.
    Simple(Vec<u8>),
    /// -ERR ... responses.
    Error(Vec<u8>),
    /// :123 responses.
    Integer(i64),
    /// $... bulk strings, with None for null.
    Bulk(Option<Vec<u8>>),
    /// *... arrays.
    Array(Vec<RespValue>),
    /// *-1 null array.
    Nil,
}

impl RespValue {
    /// Returns true for both null encodings.
    pub fn is_nil(&self) -> bool {
        matches!(self, RespValue::Nil | RespValue::Bulk(None))
    }

    /// Borrows the payload of a simple or bulk string.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            RespValue::Simple(data) => Some(data),
            RespValue::Bulk(Some(data)) => Some(data),
            _ => None,
        }
    }

    /// Converts a server error reply into `SkvError::Server`, passing other
    /// values through.
    pub fn into_result(self) -> SkvResult<RespValue> {
        match self {
            RespValue::Error(message) => Err(SkvError::Server {
                message: String::from_utf8_lossy(&message).into_owned(),
            }),
            other => Ok(other),
        }
    }
}

/// Encodes a RESP2 array command into the provided buffer.
pub fn encode_command(args: &[&[u8]], out: &mut Vec<u8>) {
    out.push(b'*');
    push_usize(out, args.len());
    out.extend_from_slice(b"\r\n");
    for arg in args {
        out.push(b'$');
        push_usize(out, arg.len());
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(arg);
        out.extend_from_slice(b"\r\n");
    }
}

/// Reads one RESP value from the buffered reader.
pub fn read_response<R: BufRead>(reader: &mut R, line_buf: &mut Vec<u8>) -> SkvResult<RespValue> {
    read_value(reader, line_buf, 0)
}

fn read_value<R: BufRead>(
    reader: &mut R,
    line_buf: &mut Vec<u8>,
    depth: usize,
) -> SkvResult<RespValue> {
    if depth > MAX_DEPTH {
        return Err(SkvError::Protocol);
    }
    read_line(reader, line_buf)?;
    if line_buf.is_empty() {
        return Err(SkvError::Protocol);
    }

    match line_buf[0] {
        b'+' => Ok(RespValue::Simple(line_buf[1..].to_vec())),
        b'-' => Ok(RespValue::Error(line_buf[1..].to_vec())),
        b':' => Ok(RespValue::Integer(parse_i64(&line_buf[1..])?)),
        b'$' => {
            let len = parse_i64(&line_buf[1..])?;
            parse_bulk_len(reader, len, line_buf)
        }
        b'*' => {
            let len = parse_i64(&line_buf[1..])?;
            parse_array_len(reader, len, line_buf, depth)
        }
        _ => Err(SkvError::Protocol),
    }
}

fn parse_bulk_len<R: BufRead>(
    reader: &mut R,
    len: i64,
    line_buf: &mut Vec<u8>,
) -> SkvResult<RespValue> {
    if len < 0 {
        return Ok(RespValue::Bulk(None));
    }
    if len > MAX_BULK_LEN {
        return Err(SkvError::Protocol);
    }
    let len = len as usize;
    // The header is untrusted; grow with the bytes actually received.
    let mut data = Vec::with_capacity(len.min(PREALLOC_LIMIT));
    reader.by_ref().take(len as u64).read_to_end(&mut data)?;
    if data.len() != len {
        return Err(SkvError::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "bulk string truncated",
        )));
    }

    let mut crlf = [0u8; 2];
    reader.read_exact(&mut crlf)?;
    if crlf != [b'\r', b'\n'] {
        return Err(SkvError::Protocol);
    }

    line_buf.clear();
    Ok(RespValue::Bulk(Some(data)))
}

fn parse_array_len<R: BufRead>(
    reader: &mut R,
    len: i64,
    line_buf: &mut Vec<u8>,
    depth: usize,
) -> SkvResult<RespValue> {
    if len < 0 {
        return Ok(RespValue::Nil);
    }
    if len == 0 {
        return Ok(RespValue::Array(Vec::new()));
    }
    if len > MAX_ARRAY_LEN {
        return Err(SkvError::Protocol);
    }

    let mut items = Vec::with_capacity((len as usize).min(1024));
    for _ in 0..len {
        items.push(read_value(reader, line_buf, depth + 1)?);
    }
    Ok(RespValue::Array(items))
}

fn read_line<R: BufRead>(reader: &mut R, buf: &mut Vec<u8>) -> SkvResult<()> {
    buf.clear();
    let bytes = reader.read_until(b'\n', buf)?;
    if bytes == 0 {
        return Err(SkvError::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "connection closed by peer",
        )));
    }
    if buf.len() < 2 || buf[buf.len() - 2] != b'\r' {
        return Err(SkvError::Protocol);
    }
    buf.truncate(buf.len() - 2);
    Ok(())
}

fn parse_i64(data: &[u8]) -> SkvResult<i64> {
    if data.is_empty() {
        return Err(SkvError::Protocol);
    }
    let mut negative = false;
    let mut idx = 0;
    if data[0] == b'-' {
        negative = true;
        idx = 1;
    }

    let mut value: i64 = 0;
    while idx < data.len() {
        let b = data[idx];
        if !b.is_ascii_digit() {
            return Err(SkvError::Protocol);
        }
        value = value.saturating_mul(10).saturating_add((b - b'0') as i64);
        idx += 1;
    }

    if negative {
        Ok(-value)
    } else {
        Ok(value)
    }
}

fn push_usize(out: &mut Vec<u8>, mut value: usize) {
    // Write digits into a small stack buffer to avoid heap allocations.
    let mut buf = [0u8; 20];
    let mut len = 0;
    if value == 0 {
        buf[0] = b'0';
        len = 1;
    } else {
        while value > 0 {
            buf[len] = b'0' + (value % 10) as u8;
            value /= 10;
            len += 1;
        }
    }
    for idx in (0..len).rev() {
        out.push(buf[idx]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn parse(input: &[u8]) -> SkvResult<RespValue> {
        let mut reader = Cursor::new(input.to_vec());
        let mut line = Vec::new();
        read_response(&mut reader, &mut line)
    }

    #[test]
    fn encodes_command() {
        let mut buf = Vec::new();
        encode_command(&[b"ROLE"], &mut buf);
        assert_eq!(&buf, b"*1\r\n$4\r\nROLE\r\n");
    }

    #[test]
    fn parses_sentinel_master_reply() {
        let resp = parse(b"*2\r\n$8\r\n10.0.0.1\r\n$4\r\n6379\r\n").unwrap();
        assert_eq!(
            resp,
            RespValue::Array(vec![
                RespValue::Bulk(Some(b"10.0.0.1".to_vec())),
                RespValue::Bulk(Some(b"6379".to_vec())),
            ])
        );
    }

    #[test]
    fn distinguishes_null_and_empty_arrays() {
        assert_eq!(parse(b"*-1\r\n").unwrap(), RespValue::Nil);
        assert_eq!(parse(b"*0\r\n").unwrap(), RespValue::Array(Vec::new()));
        assert!(parse(b"$-1\r\n").unwrap().is_nil());
    }

    #[test]
    fn parses_negative_integer() {
        assert_eq!(parse(b":-2\r\n").unwrap(), RespValue::Integer(-2));
    }

    #[test]
    fn error_reply_becomes_server_error() {
        let resp = parse(b"-NOAUTH Authentication required.\r\n").unwrap();
        match resp.into_result() {
            Err(SkvError::Server { message }) => assert!(message.starts_with("NOAUTH")),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn rejects_missing_crlf() {
        assert!(matches!(parse(b"+OK\n"), Err(SkvError::Protocol)));
    }

    #[test]
    fn eof_is_io_error() {
        assert!(matches!(parse(b""), Err(SkvError::Io(_))));
    }

    #[test]
    fn oversized_array_header_is_protocol_error() {
        assert!(matches!(
            parse(b"*4611686018427387903\r\n"),
            Err(SkvError::Protocol)
        ));
        assert!(matches!(
            parse(b"*9223372036854775807\r\n"),
            Err(SkvError::Protocol)
        ));
    }

    #[test]
    fn oversized_bulk_header_is_protocol_error() {
        assert!(matches!(
            parse(b"$4611686018427387903\r\n"),
            Err(SkvError::Protocol)
        ));
        assert!(matches!(parse(b"$536870913\r\n"), Err(SkvError::Protocol)));
    }

    #[test]
    fn large_header_with_short_body_does_not_preallocate() {
        // Within the caps, but the payload never arrives.
        assert!(matches!(parse(b"$536870912\r\nabc"), Err(SkvError::Io(_))));
        assert!(matches!(parse(b"*16777216\r\n:1\r\n"), Err(SkvError::Io(_))));
    }

    #[test]
    fn deep_nesting_is_protocol_error() {
        let mut input = b"*1\r\n".repeat(MAX_DEPTH + 1);
        input.extend_from_slice(b":1\r\n");
        assert!(matches!(parse(&input), Err(SkvError::Protocol)));

        let mut shallow = b"*1\r\n".repeat(MAX_DEPTH);
        shallow.extend_from_slice(b":1\r\n");
        assert!(parse(&shallow).is_ok());
    }
}
