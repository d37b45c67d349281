//! # Command Wrappers
//!
//! Typed pass-through methods over `Client::exec`. Routing is decided by the
//! command table in `client.rs`, never here.

use std::collections::HashMap;
use std::time::Duration;

use skv_common::{SkvError, SkvResult};

use crate::client::Client;
use crate::resp::RespValue;

impl Client {
    /// Pings the server. Returns the raw response payload.
    pub fn ping(&self) -> SkvResult<String> {
        into_string(self.exec(&[b"PING"])?)
    }

    pub fn echo(&self, message: &[u8]) -> SkvResult<Vec<u8>> {
        into_bytes(self.exec(&[b"ECHO", message])?)
    }

    /// Fetches server INFO output.
    pub fn info(&self) -> SkvResult<String> {
        into_string(self.exec(&[b"INFO"])?)
    }

    /// Removes every key of the selected database.
    pub fn flush_db(&self) -> SkvResult<()> {
        into_ok(self.exec(&[b"FLUSHDB"])?)
    }

    /// Removes every key of every database.
    pub fn flush_all(&self) -> SkvResult<()> {
        into_ok(self.exec(&[b"FLUSHALL"])?)
    }

    /// One `SCAN` step. Returns the next cursor (0 when done) and the keys.
    pub fn scan(&self, cursor: u64, pattern: &[u8]) -> SkvResult<(u64, Vec<Vec<u8>>)> {
        let cursor = cursor.to_string();
        into_scan(self.exec(&[b"SCAN", cursor.as_bytes(), b"MATCH", pattern])?)
    }

    /// Appends to a key's value. Returns the new length.
    pub fn append(&self, key: &[u8], value: &[u8]) -> SkvResult<i64> {
        into_integer(self.exec(&[b"APPEND", key, value])?)
    }

    pub fn get_range(&self, key: &[u8], start: i64, end: i64) -> SkvResult<Vec<u8>> {
        let (start, end) = (start.to_string(), end.to_string());
        into_bytes(self.exec(&[b"GETRANGE", key, start.as_bytes(), end.as_bytes()])?)
    }

    /// Overwrites part of a value. Returns the new length.
    pub fn set_range(&self, key: &[u8], offset: u64, value: &[u8]) -> SkvResult<i64> {
        let offset = offset.to_string();
        into_integer(self.exec(&[b"SETRANGE", key, offset.as_bytes(), value])?)
    }

    /// Sets a time-to-live on a key. Returns true when the TTL was set.
    pub fn expire(&self, key: &[u8], ttl: Duration) -> SkvResult<bool> {
        let seconds = ttl.as_secs().to_string();
        Ok(into_integer(self.exec(&[b"EXPIRE", key, seconds.as_bytes()])?)? > 0)
    }

    /// Sets a value for a key without expiration.
    pub fn set(&self, key: &[u8], value: &[u8]) -> SkvResult<bool> {
        into_stored(self.exec(&[b"SET", key, value])?)
    }

    /// Sets a value only when the key is absent. Returns false when it exists.
    pub fn set_nx(&self, key: &[u8], value: &[u8]) -> SkvResult<bool> {
        into_stored(self.exec(&[b"SET", key, value, b"NX"])?)
    }

    /// Sets a value and attaches an expiration in seconds.
    pub fn set_ex(&self, key: &[u8], value: &[u8], ttl: Duration) -> SkvResult<bool> {
        let seconds = ttl.as_secs().to_string();
        into_stored(self.exec(&[b"SET", key, value, b"EX", seconds.as_bytes()])?)
    }

    /// Fetches a value by key.
    ///
    /// Returns `Ok(None)` when the key is missing.
    pub fn get(&self, key: &[u8]) -> SkvResult<Option<Vec<u8>>> {
        into_optional(self.exec(&[b"GET", key])?)
    }

    /// Returns true when at least one of the keys exists.
    pub fn exists(&self, keys: &[&[u8]]) -> SkvResult<bool> {
        Ok(into_integer(self.exec(&with_command(b"EXISTS", None, keys))?)? > 0)
    }

    /// Deletes keys. Returns how many were removed.
    pub fn del(&self, keys: &[&[u8]]) -> SkvResult<i64> {
        into_integer(self.exec(&with_command(b"DEL", None, keys))?)
    }

    pub fn keys(&self, pattern: &[u8]) -> SkvResult<Vec<Vec<u8>>> {
        into_byte_list(self.exec(&[b"KEYS", pattern])?)
    }

    pub fn incr(&self, key: &[u8]) -> SkvResult<i64> {
        self.incr_by(key, 1)
    }

    pub fn incr_by(&self, key: &[u8], increment: i64) -> SkvResult<i64> {
        let increment = increment.to_string();
        into_integer(self.exec(&[b"INCRBY", key, increment.as_bytes()])?)
    }

    pub fn incr_by_float(&self, key: &[u8], increment: f64) -> SkvResult<f64> {
        let increment = increment.to_string();
        into_float(self.exec(&[b"INCRBYFLOAT", key, increment.as_bytes()])?)
    }

    pub fn decr(&self, key: &[u8]) -> SkvResult<i64> {
        self.incr_by(key, -1)
    }

    pub fn decr_by(&self, key: &[u8], decrement: i64) -> SkvResult<i64> {
        self.incr_by(key, -decrement)
    }

    pub fn decr_by_float(&self, key: &[u8], decrement: f64) -> SkvResult<f64> {
        self.incr_by_float(key, -decrement)
    }

    /// One `HSCAN` step. Returns the next cursor and the flat field/value list.
    pub fn hscan(&self, key: &[u8], cursor: u64, pattern: &[u8]) -> SkvResult<(u64, Vec<Vec<u8>>)> {
        let cursor = cursor.to_string();
        into_scan(self.exec(&[b"HSCAN", key, cursor.as_bytes(), b"MATCH", pattern])?)
    }

    /// Sets a hash field. Returns true when the field is new.
    pub fn hset(&self, key: &[u8], field: &[u8], value: &[u8]) -> SkvResult<bool> {
        Ok(into_integer(self.exec(&[b"HSET", key, field, value])?)? > 0)
    }

    pub fn hkeys(&self, key: &[u8]) -> SkvResult<Vec<Vec<u8>>> {
        into_byte_list(self.exec(&[b"HKEYS", key])?)
    }

    pub fn hexists(&self, key: &[u8], field: &[u8]) -> SkvResult<bool> {
        Ok(into_integer(self.exec(&[b"HEXISTS", key, field])?)? == 1)
    }

    /// Fetches a hash field; `Ok(None)` when the key or field is missing.
    pub fn hget(&self, key: &[u8], field: &[u8]) -> SkvResult<Option<Vec<u8>>> {
        into_optional(self.exec(&[b"HGET", key, field])?)
    }

    pub fn hget_all(&self, key: &[u8]) -> SkvResult<HashMap<Vec<u8>, Vec<u8>>> {
        let flat = into_byte_list(self.exec(&[b"HGETALL", key])?)?;
        if flat.len() % 2 != 0 {
            return Err(SkvError::UnexpectedResponse);
        }
        let mut map = HashMap::with_capacity(flat.len() / 2);
        let mut items = flat.into_iter();
        while let (Some(field), Some(value)) = (items.next(), items.next()) {
            map.insert(field, value);
        }
        Ok(map)
    }

    /// Deletes hash fields. Returns how many were removed.
    pub fn hdel(&self, key: &[u8], fields: &[&[u8]]) -> SkvResult<i64> {
        into_integer(self.exec(&with_command(b"HDEL", Some(key), fields))?)
    }

    pub fn hincr(&self, key: &[u8], field: &[u8]) -> SkvResult<i64> {
        self.hincr_by(key, field, 1)
    }

    pub fn hincr_by(&self, key: &[u8], field: &[u8], increment: i64) -> SkvResult<i64> {
        let increment = increment.to_string();
        into_integer(self.exec(&[b"HINCRBY", key, field, increment.as_bytes()])?)
    }

    pub fn hincr_by_float(&self, key: &[u8], field: &[u8], increment: f64) -> SkvResult<f64> {
        let increment = increment.to_string();
        into_float(self.exec(&[b"HINCRBYFLOAT", key, field, increment.as_bytes()])?)
    }

    pub fn hdecr(&self, key: &[u8], field: &[u8]) -> SkvResult<i64> {
        self.hincr_by(key, field, -1)
    }

    pub fn hdecr_by(&self, key: &[u8], field: &[u8], decrement: i64) -> SkvResult<i64> {
        self.hincr_by(key, field, -decrement)
    }

    pub fn hdecr_by_float(&self, key: &[u8], field: &[u8], decrement: f64) -> SkvResult<f64> {
        self.hincr_by_float(key, field, -decrement)
    }
}

fn with_command<'a>(command: &'a [u8], key: Option<&'a [u8]>, rest: &[&'a [u8]]) -> Vec<&'a [u8]> {
    let mut args = Vec::with_capacity(rest.len() + 2);
    args.push(command);
    args.extend(key);
    args.extend_from_slice(rest);
    args
}

fn into_ok(value: RespValue) -> SkvResult<()> {
    match value {
        RespValue::Simple(_) => Ok(()),
        _ => Err(SkvError::UnexpectedResponse),
    }
}

/// `SET` family: `+OK` stored, null reply not stored (NX on an existing key).
fn into_stored(value: RespValue) -> SkvResult<bool> {
    match value {
        RespValue::Simple(_) => Ok(true),
        value if value.is_nil() => Ok(false),
        _ => Err(SkvError::UnexpectedResponse),
    }
}

fn into_bytes(value: RespValue) -> SkvResult<Vec<u8>> {
    match value {
        RespValue::Simple(data) | RespValue::Bulk(Some(data)) => Ok(data),
        _ => Err(SkvError::UnexpectedResponse),
    }
}

fn into_string(value: RespValue) -> SkvResult<String> {
    String::from_utf8(into_bytes(value)?).map_err(|_| SkvError::UnexpectedResponse)
}

fn into_optional(value: RespValue) -> SkvResult<Option<Vec<u8>>> {
    if value.is_nil() {
        return Ok(None);
    }
    into_bytes(value).map(Some)
}

fn into_integer(value: RespValue) -> SkvResult<i64> {
    match value {
        RespValue::Integer(value) => Ok(value),
        _ => Err(SkvError::UnexpectedResponse),
    }
}

fn into_float(value: RespValue) -> SkvResult<f64> {
    let text = into_string(value)?;
    text.trim().parse().map_err(|_| SkvError::UnexpectedResponse)
}

fn into_byte_list(value: RespValue) -> SkvResult<Vec<Vec<u8>>> {
    match value {
        RespValue::Array(items) => items.into_iter().map(into_bytes).collect(),
        RespValue::Nil => Ok(Vec::new()),
        _ => Err(SkvError::UnexpectedResponse),
    }
}

/// Parses a `[cursor, [items...]]` scan reply.
fn into_scan(value: RespValue) -> SkvResult<(u64, Vec<Vec<u8>>)> {
    let mut parts = match value {
        RespValue::Array(parts) if parts.len() == 2 => parts,
        _ => return Err(SkvError::UnexpectedResponse),
    };
    let items = into_byte_list(parts.pop().ok_or(SkvError::UnexpectedResponse)?)?;
    let cursor = into_string(parts.pop().ok_or(SkvError::UnexpectedResponse)?)?;
    let cursor: u64 = cursor.parse().map_err(|_| SkvError::UnexpectedResponse)?;
    Ok((cursor, items))
}
