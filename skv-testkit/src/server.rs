//! # TCP Server
//!
//! Accept RESP2 connections on a private tokio runtime, parse commands, and
//! dispatch them to a `Handler`. Each fake node or Sentinel owns one server.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Runtime;
use tracing::{debug, warn};

use crate::protocol::{resp_error, RespError, RespParser};

/// Per-connection state kept by the server loop.
#[derive(Debug, Default)]
pub struct Session {
    pub authenticated: bool,
    pub database: u32,
}

/// Command handler behind a fake server.
pub trait Handler: Send + Sync + 'static {
    /// Produces the encoded reply for one command.
    fn handle(&self, args: &[Vec<u8>], session: &mut Session) -> Vec<u8>;
}

/// Case-insensitive command counters.
#[derive(Debug, Default)]
pub struct CommandCounter {
    counts: Mutex<HashMap<String, usize>>,
}

impl CommandCounter {
    pub fn record(&self, name: &[u8]) {
        let name = String::from_utf8_lossy(name).to_ascii_uppercase();
        *self.counts.lock().entry(name).or_insert(0) += 1;
    }

    pub fn get(&self, name: &str) -> usize {
        self.counts
            .lock()
            .get(&name.to_ascii_uppercase())
            .copied()
            .unwrap_or(0)
    }

    pub fn reset(&self) {
        self.counts.lock().clear();
    }
}

/// Running server; stopping it closes the listener and every open connection.
pub struct ServerHandle {
    addr: String,
    runtime: Option<Runtime>,
    accepted: Arc<AtomicUsize>,
    open: Arc<AtomicUsize>,
    reset_on_close: Arc<AtomicBool>,
}

impl ServerHandle {
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Number of TCP connections accepted so far.
    pub fn connections_accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    /// Number of connections whose serving task is still running.
    pub fn open_connections(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }

    /// Connections accepted from now on are reset (RST) rather than closed
    /// gracefully when the server stops.
    pub fn reset_on_close(&self) {
        self.reset_on_close.store(true, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.runtime.is_some()
    }

    /// Stops the server, dropping the listener and all connection tasks.
    pub fn shutdown(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_timeout(Duration::from_secs(1));
            debug!(addr = %self.addr, "fake server stopped");
        }
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Binds an ephemeral localhost port and serves `handler` on it.
pub fn serve(handler: Arc<dyn Handler>) -> anyhow::Result<ServerHandle> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()?;
    let listener = runtime.block_on(TcpListener::bind("127.0.0.1:0"))?;
    let addr = listener.local_addr()?.to_string();
    let accepted = Arc::new(AtomicUsize::new(0));
    let open = Arc::new(AtomicUsize::new(0));
    let reset_on_close = Arc::new(AtomicBool::new(false));

    let counter = accepted.clone();
    let gauge = open.clone();
    let reset = reset_on_close.clone();
    runtime.spawn(async move {
        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(pair) => pair,
                Err(err) => {
                    warn!(error = %err, "accept failed");
                    continue;
                }
            };
            counter.fetch_add(1, Ordering::SeqCst);
            if reset.load(Ordering::SeqCst) {
                // Zero linger turns the close on drop into a reset.
                #[allow(deprecated)]
                let linger = stream.set_linger(Some(Duration::ZERO));
                if let Err(err) = linger {
                    warn!(peer = %peer, error = %err, "set_linger failed");
                }
            }
            gauge.fetch_add(1, Ordering::SeqCst);
            let handler = handler.clone();
            let gauge = gauge.clone();
            tokio::spawn(async move {
                if let Err(err) = handle_connection(stream, handler).await {
                    debug!(peer = %peer, error = %err, "connection ended with error");
                }
                gauge.fetch_sub(1, Ordering::SeqCst);
            });
        }
    });

    Ok(ServerHandle {
        addr,
        runtime: Some(runtime),
        accepted,
        open,
        reset_on_close,
    })
}

/// Handles a single TCP client connection.
async fn handle_connection(mut stream: TcpStream, handler: Arc<dyn Handler>) -> std::io::Result<()> {
    let mut buffer = BytesMut::with_capacity(8 * 1024);
    let mut parser = RespParser::new();
    let mut session = Session::default();

    loop {
        let bytes = stream.read_buf(&mut buffer).await?;
        if bytes == 0 {
            break;
        }

        loop {
            match parser.parse(&mut buffer) {
                Ok(Some(args)) => {
                    let response = if args.is_empty() {
                        resp_error("ERR empty command")
                    } else {
                        handler.handle(&args, &mut session)
                    };
                    stream.write_all(&response).await?;
                }
                Ok(None) => break,
                Err(RespError::Protocol) => {
                    stream.write_all(&resp_error("ERR protocol error")).await?;
                    return Ok(());
                }
            }
        }
    }

    Ok(())
}

/// Redis-style glob match supporting `*`, `?` and literals.
pub fn glob_match(pattern: &[u8], text: &[u8]) -> bool {
    match pattern.split_first() {
        None => text.is_empty(),
        Some((b'*', rest)) => (0..=text.len()).any(|skip| glob_match(rest, &text[skip..])),
        Some((b'?', rest)) => !text.is_empty() && glob_match(rest, &text[1..]),
        Some((&c, rest)) => text.first() == Some(&c) && glob_match(rest, &text[1..]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glob_patterns() {
        assert!(glob_match(b"*", b"anything"));
        assert!(glob_match(b"user:*", b"user:42"));
        assert!(!glob_match(b"user:*", b"session:42"));
        assert!(glob_match(b"h?llo", b"hello"));
        assert!(!glob_match(b"h?llo", b"hllo"));
    }

    #[test]
    fn counters_are_case_insensitive() {
        let counter = CommandCounter::default();
        counter.record(b"ping");
        counter.record(b"PING");
        assert_eq!(counter.get("Ping"), 2);
        counter.reset();
        assert_eq!(counter.get("PING"), 0);
    }
}
