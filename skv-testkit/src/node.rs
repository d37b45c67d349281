//! # Fake Data Node
//!
//! A small in-memory RESP2 server standing in for one member of a
//! replication group. Tests flip its role, stop it, and read per-command
//! counters to observe what the client sent.
//!
//! Replicas reject writes with `READONLY`, the same way a real replica does,
//! so a client that keeps writing to a demoted master fails loudly.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;
use skv_common::Role;
use tracing::info;

use crate::protocol::{
    resp_array, resp_bulk, resp_bulk_array, resp_error, resp_integer, resp_null, resp_simple,
};
use crate::server::{glob_match, serve, CommandCounter, Handler, ServerHandle, Session};

const WRONGTYPE: &str = "WRONGTYPE Operation against a key holding the wrong kind of value";
const NOT_INTEGER: &str = "ERR value is not an integer or out of range";
const NOT_FLOAT: &str = "ERR value is not a valid float";
const DATABASES: u32 = 16;

const WRITE_COMMANDS: [&str; 14] = [
    "SET", "DEL", "APPEND", "SETRANGE", "EXPIRE", "INCRBY", "INCRBYFLOAT", "HSET", "HDEL",
    "HINCRBY", "HINCRBYFLOAT", "FLUSHDB", "FLUSHALL", "INCR",
];

#[derive(Debug, Clone)]
enum Value {
    Str(Vec<u8>),
    Hash(BTreeMap<Vec<u8>, Vec<u8>>),
}

type Keyspace = BTreeMap<Vec<u8>, Value>;

struct NodeState {
    role: Mutex<Role>,
    password: Option<String>,
    databases: Mutex<HashMap<u32, Keyspace>>,
    commands: CommandCounter,
}

/// In-memory data node on an ephemeral localhost port.
pub struct FakeNode {
    server: ServerHandle,
    state: Arc<NodeState>,
}

impl FakeNode {
    pub fn start(role: Role) -> anyhow::Result<Self> {
        Self::launch(role, None)
    }

    /// Starts a node that requires `AUTH password` before any other command.
    pub fn start_with_password(role: Role, password: &str) -> anyhow::Result<Self> {
        Self::launch(role, Some(password.to_string()))
    }

    fn launch(role: Role, password: Option<String>) -> anyhow::Result<Self> {
        let state = Arc::new(NodeState {
            role: Mutex::new(role),
            password,
            databases: Mutex::new(HashMap::new()),
            commands: CommandCounter::default(),
        });
        let server = serve(state.clone())?;
        info!(addr = server.addr(), role = %role, "fake node started");
        Ok(FakeNode { server, state })
    }

    pub fn addr(&self) -> &str {
        self.server.addr()
    }

    pub fn role(&self) -> Role {
        *self.state.role.lock()
    }

    /// Changes the role reported by `ROLE` (promotion or demotion).
    pub fn set_role(&self, role: Role) {
        *self.state.role.lock() = role;
    }

    /// How many times `command` was received, case-insensitive.
    pub fn command_count(&self, command: &str) -> usize {
        self.state.commands.get(command)
    }

    pub fn reset_counts(&self) {
        self.state.commands.reset();
    }

    pub fn connections_accepted(&self) -> usize {
        self.server.connections_accepted()
    }

    /// Connections the node is still serving.
    pub fn open_connections(&self) -> usize {
        self.server.open_connections()
    }

    /// Makes `shutdown` reset connections accepted from now on instead of
    /// closing them gracefully.
    pub fn reset_on_shutdown(&self) {
        self.server.reset_on_close();
    }

    /// Reads a string key from `database` directly, bypassing the protocol.
    pub fn stored(&self, database: u32, key: &[u8]) -> Option<Vec<u8>> {
        match self.state.databases.lock().get(&database)?.get(key)? {
            Value::Str(data) => Some(data.clone()),
            Value::Hash(_) => None,
        }
    }

    /// Stops the node; open connections are closed and new dials refused.
    pub fn shutdown(&mut self) {
        self.server.shutdown();
    }
}

impl Handler for NodeState {
    fn handle(&self, args: &[Vec<u8>], session: &mut Session) -> Vec<u8> {
        let command = String::from_utf8_lossy(&args[0]).to_ascii_uppercase();
        self.commands.record(command.as_bytes());

        if command == "AUTH" {
            return self.auth(args, session);
        }
        if self.password.is_some() && !session.authenticated {
            return resp_error("NOAUTH Authentication required.");
        }

        let role = *self.role.lock();
        if role == Role::Replica && WRITE_COMMANDS.contains(&command.as_str()) {
            return resp_error("READONLY You can't write against a read only replica.");
        }

        match command.as_str() {
            "PING" => match args.get(1) {
                Some(message) => resp_bulk(message),
                None => resp_simple("PONG"),
            },
            "ECHO" => match args.get(1) {
                Some(message) => resp_bulk(message),
                None => arity(&command),
            },
            "ROLE" => role_reply(role),
            "INFO" => {
                let info = format!("# Replication\r\nrole:{}\r\n", role_name(role));
                resp_bulk(info.as_bytes())
            }
            "SELECT" => {
                let index = args.get(1).and_then(|arg| parse_int(arg));
                match index {
                    Some(index) if (0..DATABASES as i64).contains(&index) => {
                        session.database = index as u32;
                        resp_simple("OK")
                    }
                    _ => resp_error("ERR DB index is out of range"),
                }
            }
            "FLUSHALL" => {
                self.databases.lock().clear();
                resp_simple("OK")
            }
            _ => {
                let mut databases = self.databases.lock();
                let keyspace = databases.entry(session.database).or_default();
                dispatch_data(&command, args, keyspace)
            }
        }
    }
}

impl NodeState {
    fn auth(&self, args: &[Vec<u8>], session: &mut Session) -> Vec<u8> {
        let expected = match &self.password {
            Some(password) => password,
            None => {
                return resp_error("ERR AUTH <password> called without any password configured")
            }
        };
        match args.get(1) {
            Some(given) if given.as_slice() == expected.as_bytes() => {
                session.authenticated = true;
                resp_simple("OK")
            }
            Some(_) => resp_error("WRONGPASS invalid username-password pair"),
            None => arity("AUTH"),
        }
    }
}

fn dispatch_data(command: &str, args: &[Vec<u8>], keyspace: &mut Keyspace) -> Vec<u8> {
    match command {
        "FLUSHDB" => {
            keyspace.clear();
            resp_simple("OK")
        }
        "SET" => set(args, keyspace),
        "GET" => match args.get(1) {
            Some(key) => match keyspace.get(key) {
                Some(Value::Str(data)) => resp_bulk(data),
                Some(Value::Hash(_)) => resp_error(WRONGTYPE),
                None => resp_null(),
            },
            None => arity(command),
        },
        "DEL" | "EXISTS" => {
            if args.len() < 2 {
                return arity(command);
            }
            let mut count = 0;
            for key in &args[1..] {
                let found = if command == "DEL" {
                    keyspace.remove(key).is_some()
                } else {
                    keyspace.contains_key(key)
                };
                if found {
                    count += 1;
                }
            }
            resp_integer(count)
        }
        "KEYS" => match args.get(1) {
            Some(pattern) => {
                let keys: Vec<&Vec<u8>> = keyspace
                    .keys()
                    .filter(|key| glob_match(pattern, key))
                    .collect();
                resp_bulk_array(&keys)
            }
            None => arity(command),
        },
        "SCAN" => scan(args, keyspace),
        "EXPIRE" => {
            // Keys never actually expire here; only existence is reported.
            match args.get(1) {
                Some(key) => resp_integer(keyspace.contains_key(key) as i64),
                None => arity(command),
            }
        }
        "APPEND" => {
            if args.len() != 3 {
                return arity(command);
            }
            match string_mut(keyspace, &args[1]) {
                Some(data) => {
                    data.extend_from_slice(&args[2]);
                    resp_integer(data.len() as i64)
                }
                None => resp_error(WRONGTYPE),
            }
        }
        "GETRANGE" => get_range(args, keyspace),
        "SETRANGE" => set_range(args, keyspace),
        "INCR" | "INCRBY" => {
            let delta = if command == "INCR" {
                Some(1)
            } else {
                args.get(2).and_then(|arg| parse_int(arg))
            };
            match (args.get(1), delta) {
                (Some(key), Some(delta)) => incr_string(keyspace, key, delta),
                (Some(_), None) => resp_error(NOT_INTEGER),
                _ => arity(command),
            }
        }
        "INCRBYFLOAT" => match (args.get(1), args.get(2).and_then(|arg| parse_float(arg))) {
            (Some(key), Some(delta)) => incr_float_string(keyspace, key, delta),
            (Some(_), None) => resp_error(NOT_FLOAT),
            _ => arity(command),
        },
        "HSET" | "HGET" | "HDEL" | "HKEYS" | "HEXISTS" | "HGETALL" | "HINCRBY" | "HINCRBYFLOAT"
        | "HSCAN" => dispatch_hash(command, args, keyspace),
        _ => resp_error(&format!("ERR unknown command '{}'", command)),
    }
}

fn dispatch_hash(command: &str, args: &[Vec<u8>], keyspace: &mut Keyspace) -> Vec<u8> {
    let key = match args.get(1) {
        Some(key) => key.clone(),
        None => return arity(command),
    };

    match command {
        "HSET" => {
            if args.len() < 4 || args.len() % 2 != 0 {
                return arity(command);
            }
            let hash = match hash_mut(keyspace, &key) {
                Some(hash) => hash,
                None => return resp_error(WRONGTYPE),
            };
            let mut added = 0;
            for pair in args[2..].chunks_exact(2) {
                if hash.insert(pair[0].clone(), pair[1].clone()).is_none() {
                    added += 1;
                }
            }
            resp_integer(added)
        }
        "HDEL" => {
            if args.len() < 3 {
                return arity(command);
            }
            let removed = match keyspace.get_mut(&key) {
                Some(Value::Hash(hash)) => args[2..]
                    .iter()
                    .filter(|field| hash.remove(*field).is_some())
                    .count(),
                Some(Value::Str(_)) => return resp_error(WRONGTYPE),
                None => 0,
            };
            if matches!(keyspace.get(&key), Some(Value::Hash(hash)) if hash.is_empty()) {
                keyspace.remove(&key);
            }
            resp_integer(removed as i64)
        }
        "HINCRBY" => match (args.get(2), args.get(3).and_then(|arg| parse_int(arg))) {
            (Some(field), Some(delta)) => {
                let hash = match hash_mut(keyspace, &key) {
                    Some(hash) => hash,
                    None => return resp_error(WRONGTYPE),
                };
                let current = match hash.get(field) {
                    Some(raw) => match parse_int(raw) {
                        Some(value) => value,
                        None => return resp_error("ERR hash value is not an integer"),
                    },
                    None => 0,
                };
                let next = current + delta;
                hash.insert(field.clone(), next.to_string().into_bytes());
                resp_integer(next)
            }
            (Some(_), None) => resp_error(NOT_INTEGER),
            _ => arity(command),
        },
        "HINCRBYFLOAT" => match (args.get(2), args.get(3).and_then(|arg| parse_float(arg))) {
            (Some(field), Some(delta)) => {
                let hash = match hash_mut(keyspace, &key) {
                    Some(hash) => hash,
                    None => return resp_error(WRONGTYPE),
                };
                let current = match hash.get(field) {
                    Some(raw) => match parse_float(raw) {
                        Some(value) => value,
                        None => return resp_error("ERR hash value is not a float"),
                    },
                    None => 0.0,
                };
                let next = format_float(current + delta);
                hash.insert(field.clone(), next.clone().into_bytes());
                resp_bulk(next.as_bytes())
            }
            (Some(_), None) => resp_error(NOT_FLOAT),
            _ => arity(command),
        },
        _ => {
            let hash = match keyspace.get(&key) {
                Some(Value::Hash(hash)) => hash.clone(),
                Some(Value::Str(_)) => return resp_error(WRONGTYPE),
                None => BTreeMap::new(),
            };
            read_hash(command, args, &hash)
        }
    }
}

fn read_hash(command: &str, args: &[Vec<u8>], hash: &BTreeMap<Vec<u8>, Vec<u8>>) -> Vec<u8> {
    match command {
        "HGET" => match args.get(2) {
            Some(field) => match hash.get(field) {
                Some(value) => resp_bulk(value),
                None => resp_null(),
            },
            None => arity(command),
        },
        "HEXISTS" => match args.get(2) {
            Some(field) => resp_integer(hash.contains_key(field) as i64),
            None => arity(command),
        },
        "HKEYS" => {
            let fields: Vec<&Vec<u8>> = hash.keys().collect();
            resp_bulk_array(&fields)
        }
        "HGETALL" => {
            let flat: Vec<&Vec<u8>> = hash.iter().flat_map(|(f, v)| [f, v]).collect();
            resp_bulk_array(&flat)
        }
        "HSCAN" => {
            let pattern = match_pattern(args.get(3..).unwrap_or_default());
            let flat: Vec<&Vec<u8>> = hash
                .iter()
                .filter(|(field, _)| glob_match(&pattern, field))
                .flat_map(|(f, v)| [f, v])
                .collect();
            resp_array(vec![resp_bulk(b"0"), resp_bulk_array(&flat)])
        }
        _ => resp_error(&format!("ERR unknown command '{}'", command)),
    }
}

fn set(args: &[Vec<u8>], keyspace: &mut Keyspace) -> Vec<u8> {
    if args.len() < 3 {
        return arity("SET");
    }
    let mut only_if_absent = false;
    let mut options = args[3..].iter();
    while let Some(option) = options.next() {
        let option = String::from_utf8_lossy(option).to_ascii_uppercase();
        match option.as_str() {
            "NX" => only_if_absent = true,
            "EX" | "PX" => match options.next().and_then(|arg| parse_int(arg)) {
                Some(ttl) if ttl > 0 => {}
                _ => return resp_error("ERR invalid expire time in 'set' command"),
            },
            _ => return resp_error("ERR syntax error"),
        }
    }

    if only_if_absent && keyspace.contains_key(&args[1]) {
        return resp_null();
    }
    keyspace.insert(args[1].clone(), Value::Str(args[2].clone()));
    resp_simple("OK")
}

fn scan(args: &[Vec<u8>], keyspace: &Keyspace) -> Vec<u8> {
    if args.len() < 2 {
        return arity("SCAN");
    }
    let pattern = match_pattern(&args[2..]);
    let keys: Vec<&Vec<u8>> = keyspace
        .keys()
        .filter(|key| glob_match(&pattern, key))
        .collect();
    resp_array(vec![resp_bulk(b"0"), resp_bulk_array(&keys)])
}

/// Reads an optional `MATCH pattern` clause; everything matches without one.
fn match_pattern(options: &[Vec<u8>]) -> Vec<u8> {
    options
        .chunks_exact(2)
        .find(|pair| pair[0].eq_ignore_ascii_case(b"MATCH"))
        .map(|pair| pair[1].clone())
        .unwrap_or_else(|| b"*".to_vec())
}

fn get_range(args: &[Vec<u8>], keyspace: &Keyspace) -> Vec<u8> {
    let (start, end) = match (
        args.get(2).and_then(|arg| parse_int(arg)),
        args.get(3).and_then(|arg| parse_int(arg)),
    ) {
        (Some(start), Some(end)) => (start, end),
        _ => return resp_error(NOT_INTEGER),
    };
    let data = match keyspace.get(&args[1]) {
        Some(Value::Str(data)) => data,
        Some(Value::Hash(_)) => return resp_error(WRONGTYPE),
        None => return resp_bulk(b""),
    };

    let len = data.len() as i64;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let end = if end < 0 { len + end } else { end.min(len - 1) };
    if len == 0 || start > end || start >= len {
        return resp_bulk(b"");
    }
    resp_bulk(&data[start as usize..=end as usize])
}

fn set_range(args: &[Vec<u8>], keyspace: &mut Keyspace) -> Vec<u8> {
    if args.len() != 4 {
        return arity("SETRANGE");
    }
    let offset = match parse_int(&args[2]) {
        Some(offset) if offset >= 0 => offset as usize,
        _ => return resp_error("ERR offset is out of range"),
    };
    match string_mut(keyspace, &args[1]) {
        Some(data) => {
            let value = &args[3];
            if data.len() < offset + value.len() {
                data.resize(offset + value.len(), 0);
            }
            data[offset..offset + value.len()].copy_from_slice(value);
            resp_integer(data.len() as i64)
        }
        None => resp_error(WRONGTYPE),
    }
}

fn incr_string(keyspace: &mut Keyspace, key: &[u8], delta: i64) -> Vec<u8> {
    let data = match string_mut(keyspace, key) {
        Some(data) => data,
        None => return resp_error(WRONGTYPE),
    };
    let current = if data.is_empty() {
        0
    } else {
        match parse_int(data) {
            Some(value) => value,
            None => return resp_error(NOT_INTEGER),
        }
    };
    let next = current + delta;
    *data = next.to_string().into_bytes();
    resp_integer(next)
}

fn incr_float_string(keyspace: &mut Keyspace, key: &[u8], delta: f64) -> Vec<u8> {
    let data = match string_mut(keyspace, key) {
        Some(data) => data,
        None => return resp_error(WRONGTYPE),
    };
    let current = if data.is_empty() {
        0.0
    } else {
        match parse_float(data) {
            Some(value) => value,
            None => return resp_error(NOT_FLOAT),
        }
    };
    let next = format_float(current + delta);
    *data = next.clone().into_bytes();
    resp_bulk(next.as_bytes())
}

/// String value for `key`, created empty when missing; `None` on a hash.
fn string_mut<'a>(keyspace: &'a mut Keyspace, key: &[u8]) -> Option<&'a mut Vec<u8>> {
    match keyspace
        .entry(key.to_vec())
        .or_insert_with(|| Value::Str(Vec::new()))
    {
        Value::Str(data) => Some(data),
        Value::Hash(_) => None,
    }
}

fn hash_mut<'a>(keyspace: &'a mut Keyspace, key: &[u8]) -> Option<&'a mut BTreeMap<Vec<u8>, Vec<u8>>> {
    match keyspace
        .entry(key.to_vec())
        .or_insert_with(|| Value::Hash(BTreeMap::new()))
    {
        Value::Hash(hash) => Some(hash),
        Value::Str(_) => None,
    }
}

fn role_reply(role: Role) -> Vec<u8> {
    match role {
        Role::Master => resp_array(vec![resp_bulk(b"master"), resp_integer(0), resp_array(Vec::new())]),
        Role::Replica => resp_array(vec![
            resp_bulk(b"slave"),
            resp_bulk(b"127.0.0.1"),
            resp_integer(6379),
            resp_bulk(b"connected"),
            resp_integer(0),
        ]),
    }
}

fn role_name(role: Role) -> &'static str {
    match role {
        Role::Master => "master",
        Role::Replica => "slave",
    }
}

fn arity(command: &str) -> Vec<u8> {
    resp_error(&format!(
        "ERR wrong number of arguments for '{}' command",
        command.to_ascii_lowercase()
    ))
}

fn parse_int(data: &[u8]) -> Option<i64> {
    std::str::from_utf8(data).ok()?.parse().ok()
}

fn parse_float(data: &[u8]) -> Option<f64> {
    let value: f64 = std::str::from_utf8(data).ok()?.parse().ok()?;
    value.is_finite().then_some(value)
}

fn format_float(value: f64) -> String {
    format!("{}", value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(keyspace: &mut Keyspace, args: &[&str]) -> Vec<u8> {
        let args: Vec<Vec<u8>> = args.iter().map(|arg| arg.as_bytes().to_vec()).collect();
        let command = String::from_utf8_lossy(&args[0]).to_ascii_uppercase();
        dispatch_data(&command, &args, keyspace)
    }

    #[test]
    fn set_nx_keeps_existing_value() {
        let mut keyspace = Keyspace::new();
        assert_eq!(call(&mut keyspace, &["SET", "k", "a"]), b"+OK\r\n".to_vec());
        assert_eq!(call(&mut keyspace, &["SET", "k", "b", "NX"]), b"$-1\r\n".to_vec());
        assert_eq!(call(&mut keyspace, &["GET", "k"]), b"$1\r\na\r\n".to_vec());
    }

    #[test]
    fn getrange_handles_negative_offsets() {
        let mut keyspace = Keyspace::new();
        call(&mut keyspace, &["SET", "k", "Hello World"]);
        assert_eq!(call(&mut keyspace, &["GETRANGE", "k", "0", "4"]), b"$5\r\nHello\r\n".to_vec());
        assert_eq!(call(&mut keyspace, &["GETRANGE", "k", "-5", "-1"]), b"$5\r\nWorld\r\n".to_vec());
        assert_eq!(call(&mut keyspace, &["GETRANGE", "k", "20", "30"]), b"$0\r\n\r\n".to_vec());
    }

    #[test]
    fn setrange_pads_with_zero_bytes() {
        let mut keyspace = Keyspace::new();
        assert_eq!(call(&mut keyspace, &["SETRANGE", "k", "3", "ab"]), b":5\r\n".to_vec());
        assert_eq!(
            call(&mut keyspace, &["GET", "k"]),
            b"$5\r\n\0\0\0ab\r\n".to_vec()
        );
    }

    #[test]
    fn incr_rejects_non_integer() {
        let mut keyspace = Keyspace::new();
        call(&mut keyspace, &["SET", "k", "abc"]);
        assert_eq!(call(&mut keyspace, &["INCRBY", "k", "1"]), resp_error(NOT_INTEGER));
    }

    #[test]
    fn hash_commands_reject_string_keys() {
        let mut keyspace = Keyspace::new();
        call(&mut keyspace, &["SET", "k", "v"]);
        assert_eq!(call(&mut keyspace, &["HSET", "k", "f", "v"]), resp_error(WRONGTYPE));
        assert_eq!(call(&mut keyspace, &["HGET", "k", "f"]), resp_error(WRONGTYPE));
    }

    #[test]
    fn hdel_removes_empty_hash() {
        let mut keyspace = Keyspace::new();
        call(&mut keyspace, &["HSET", "h", "f", "v"]);
        assert_eq!(call(&mut keyspace, &["HDEL", "h", "f", "missing"]), b":1\r\n".to_vec());
        assert_eq!(call(&mut keyspace, &["EXISTS", "h"]), b":0\r\n".to_vec());
    }

    #[test]
    fn replica_role_reply_says_slave() {
        assert!(role_reply(Role::Replica).starts_with(b"*5\r\n$5\r\nslave\r\n"));
        assert!(role_reply(Role::Master).starts_with(b"*3\r\n$6\r\nmaster\r\n"));
    }
}
