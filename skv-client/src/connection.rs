//! # Physical Connection
//!
//! Purpose: Open one stream to a resolved address, run the post-connect
//! handshake, and execute RESP commands over it.
//!
//! ## Design Principles
//! 1. **Immutable Transport**: `TransportConfig` is built once per client and
//!    shared by reference across every dial.
//! 2. **Buffer Reuse**: Each connection owns its line and write buffers.
//! 3. **Explicit Role State**: The declared role stays `None` until a `ROLE`
//!    query has been answered on this connection.

use std::io::{self, BufReader, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
#[cfg(unix)]
use std::os::unix::net::UnixStream;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::debug;

use skv_common::{Role, SkvError, SkvResult};

use crate::resp::{encode_command, read_response, RespValue};
use crate::tls::{TlsConnector, TlsStream};

/// Network family used to reach data nodes and discovery endpoints.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    /// `host:port` over TCP.
    #[default]
    Tcp,
    /// Unix domain socket path.
    Unix,
}

/// Transport parameters shared by every dial of a client.
#[derive(Debug, Clone, Default)]
pub struct TransportConfig {
    pub network: Network,
    /// Credential sent with `AUTH` after connecting.
    pub password: Option<String>,
    /// Database selected with `SELECT` when non-zero.
    pub database: u32,
    pub connect_timeout: Option<Duration>,
    pub read_timeout: Option<Duration>,
    pub write_timeout: Option<Duration>,
    pub tls: Option<TlsConnector>,
}

impl TransportConfig {
    /// Same transport without credential or database selection.
    ///
    /// Discovery endpoints only answer topology queries.
    pub fn for_discovery(&self) -> TransportConfig {
        TransportConfig {
            password: None,
            database: 0,
            ..self.clone()
        }
    }
}

/// Converts a configured duration into a socket timeout; zero disables it.
pub(crate) fn timeout_of(duration: Duration) -> Option<Duration> {
    if duration.is_zero() {
        None
    } else {
        Some(duration)
    }
}

enum Stream {
    Tcp(TcpStream),
    Tls(Box<TlsStream>),
    #[cfg(unix)]
    Unix(UnixStream),
}

impl Read for Stream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Stream::Tcp(s) => s.read(buf),
            Stream::Tls(s) => s.read(buf),
            #[cfg(unix)]
            Stream::Unix(s) => s.read(buf),
        }
    }
}

impl Write for Stream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Stream::Tcp(s) => s.write(buf),
            Stream::Tls(s) => s.write(buf),
            #[cfg(unix)]
            Stream::Unix(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Stream::Tcp(s) => s.flush(),
            Stream::Tls(s) => s.flush(),
            #[cfg(unix)]
            Stream::Unix(s) => s.flush(),
        }
    }
}

impl Stream {
    fn shutdown(&mut self) -> io::Result<()> {
        match self {
            Stream::Tcp(s) => s.shutdown(Shutdown::Both),
            Stream::Tls(s) => {
                s.conn.send_close_notify();
                // Best effort: the peer may already be gone.
                let _ = s.flush();
                s.sock.shutdown(Shutdown::Both)
            }
            #[cfg(unix)]
            Stream::Unix(s) => s.shutdown(Shutdown::Both),
        }
    }
}

/// Single physical connection with reusable buffers.
pub struct Connection {
    // Buffered reader reduces syscalls while still allowing direct writes.
    reader: BufReader<Stream>,
    line_buf: Vec<u8>,
    write_buf: Vec<u8>,
    addr: String,
    role: Option<Role>,
    last_validated: Instant,
    // Set once a transport or framing error leaves the stream unusable.
    broken: bool,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("addr", &self.addr)
            .field("role", &self.role)
            .field("last_validated", &self.last_validated)
            .field("broken", &self.broken)
            .finish()
    }
}

impl Connection {
    /// Dials `addr` and runs the AUTH/SELECT handshake.
    ///
    /// Every failure is reported as `ConnectFailed` naming the address.
    pub fn connect(addr: &str, transport: &TransportConfig) -> SkvResult<Self> {
        Self::open(addr, transport).map_err(|err| SkvError::connect_failed(addr, err))
    }

    fn open(addr: &str, transport: &TransportConfig) -> SkvResult<Self> {
        let stream = open_stream(addr, transport)?;
        let mut conn = Connection {
            reader: BufReader::new(stream),
            line_buf: Vec::with_capacity(128),
            write_buf: Vec::with_capacity(256),
            addr: addr.to_string(),
            role: None,
            last_validated: Instant::now(),
            broken: false,
        };

        if let Some(password) = &transport.password {
            conn.exec(&[b"AUTH", password.as_bytes()])?.into_result()?;
        }
        if transport.database != 0 {
            let db = transport.database.to_string();
            conn.exec(&[b"SELECT", db.as_bytes()])?.into_result()?;
        }

        debug!(addr, database = transport.database, "connection established");
        Ok(conn)
    }

    /// Executes a RESP command and returns the parsed response.
    ///
    /// Error replies are returned as `RespValue::Error`; only transport and
    /// framing failures are `Err`, and they mark the connection broken.
    pub fn exec(&mut self, args: &[&[u8]]) -> SkvResult<RespValue> {
        let response = self.round_trip(args);
        if let Err(err) = &response {
            if err.is_connection_fatal() {
                self.broken = true;
            }
        }
        response
    }

    fn round_trip(&mut self, args: &[&[u8]]) -> SkvResult<RespValue> {
        self.write_buf.clear();
        encode_command(args, &mut self.write_buf);

        let stream = self.reader.get_mut();
        stream.write_all(&self.write_buf)?;
        stream.flush()?;

        read_response(&mut self.reader, &mut self.line_buf)
    }

    /// Liveness probe.
    pub fn ping(&mut self) -> SkvResult<()> {
        match self.exec(&[b"PING"])?.into_result()? {
            RespValue::Simple(_) | RespValue::Bulk(Some(_)) => Ok(()),
            _ => Err(SkvError::UnexpectedResponse),
        }
    }

    /// Queries the node's replication role and records it on the connection.
    pub fn role(&mut self) -> SkvResult<Role> {
        let reply = self.exec(&[b"ROLE"])?.into_result()?;
        let name = match &reply {
            RespValue::Array(items) => items.first().and_then(RespValue::as_bytes),
            _ => None,
        };
        let role = name.and_then(Role::from_reply).ok_or(SkvError::UnexpectedResponse)?;
        self.role = Some(role);
        Ok(role)
    }

    /// Address this connection was dialed to.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Role from the most recent `ROLE` reply, if any.
    pub fn declared_role(&self) -> Option<Role> {
        self.role
    }

    /// True once an exec failed at the transport or framing level. A broken
    /// connection is never returned to a pool.
    pub fn is_broken(&self) -> bool {
        self.broken
    }

    pub fn last_validated(&self) -> Instant {
        self.last_validated
    }

    pub(crate) fn mark_validated(&mut self, at: Instant) {
        self.last_validated = at;
    }

    /// Closes both directions of the underlying stream.
    pub fn shutdown(&mut self) -> SkvResult<()> {
        self.reader.get_mut().shutdown()?;
        Ok(())
    }
}

fn open_stream(addr: &str, transport: &TransportConfig) -> SkvResult<Stream> {
    match transport.network {
        Network::Tcp => {
            let stream = connect_tcp(addr, transport.connect_timeout)?;
            stream.set_read_timeout(transport.read_timeout)?;
            stream.set_write_timeout(transport.write_timeout)?;
            // Disable Nagle to keep request latency low for small payloads.
            stream.set_nodelay(true)?;
            match &transport.tls {
                Some(tls) => Ok(Stream::Tls(Box::new(tls.connect(addr, stream)?))),
                None => Ok(Stream::Tcp(stream)),
            }
        }
        #[cfg(unix)]
        Network::Unix => {
            let stream = UnixStream::connect(addr)?;
            stream.set_read_timeout(transport.read_timeout)?;
            stream.set_write_timeout(transport.write_timeout)?;
            Ok(Stream::Unix(stream))
        }
        #[cfg(not(unix))]
        Network::Unix => Err(SkvError::Config(
            "unix sockets are not supported on this platform".to_string(),
        )),
    }
}

fn connect_tcp(addr: &str, timeout: Option<Duration>) -> SkvResult<TcpStream> {
    let candidates = addr
        .to_socket_addrs()
        .map_err(|_| SkvError::InvalidAddress(addr.to_string()))?;

    let mut last_err = None;
    for candidate in candidates {
        let attempt = match timeout {
            Some(timeout) => TcpStream::connect_timeout(&candidate, timeout),
            None => TcpStream::connect(candidate),
        };
        match attempt {
            Ok(stream) => return Ok(stream),
            Err(err) => last_err = Some(err),
        }
    }

    match last_err {
        Some(err) => Err(SkvError::Io(err)),
        None => Err(SkvError::InvalidAddress(addr.to_string())),
    }
}
