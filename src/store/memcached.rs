//! Memcached-backed [`SignalStore`].
//!
//! Speaks the memcached text protocol over a single TCP connection and
//! stores each control document as a JSON object, so any consumer that can
//! parse JSON can read directives without sharing code with this tool.

use super::{SignalStore, StoreError};
use crate::model::ControlDocument;
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufStream};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

pub const DEFAULT_PORT: u16 = 11211;

/// Above this, memcached interprets exptime as an absolute unix timestamp.
const MAX_RELATIVE_EXPIRY_SECS: u64 = 30 * 24 * 60 * 60;

const IO_TIMEOUT: Duration = Duration::from_secs(5);

pub struct MemcachedStore {
    addr: String,
    exptime: u32,
    conn: Mutex<Option<BufStream<TcpStream>>>,
}

impl MemcachedStore {
    /// `host` is `name` or `name:port`; the default memcached port is
    /// appended when none is given.
    pub fn new(host: &str) -> Self {
        let addr = if host.contains(':') {
            host.to_string()
        } else {
            format!("{host}:{DEFAULT_PORT}")
        };
        Self {
            addr,
            exptime: 0,
            conn: Mutex::new(None),
        }
    }

    /// Expire documents `ttl` after their last write. Without this,
    /// documents live until something outside this tool removes them.
    pub fn with_doc_ttl(mut self, ttl: Duration) -> Self {
        self.exptime = ttl.as_secs().min(MAX_RELATIVE_EXPIRY_SECS) as u32;
        self
    }

    async fn connect(&self) -> Result<BufStream<TcpStream>, StoreError> {
        let stream = tokio::time::timeout(IO_TIMEOUT, TcpStream::connect(&self.addr))
            .await
            .map_err(|_| StoreError::Timeout)?
            .map_err(|source| StoreError::Connect {
                addr: self.addr.clone(),
                source,
            })?;
        Ok(BufStream::new(stream))
    }

    async fn fetch(&self, key: &str) -> Result<ControlDocument, StoreError> {
        let mut guard = self.conn.lock().await;
        let conn = match guard.take() {
            Some(conn) => guard.insert(conn),
            None => guard.insert(self.connect().await?),
        };

        let res = get_on(conn, key).await;
        if res.is_err() {
            // Connection state is unknown after a failure; reconnect next time.
            *guard = None;
        }
        res
    }

    async fn store(&self, key: &str, payload: &[u8]) -> Result<(), StoreError> {
        let mut guard = self.conn.lock().await;
        let conn = match guard.take() {
            Some(conn) => guard.insert(conn),
            None => guard.insert(self.connect().await?),
        };

        let res = set_on(conn, key, payload, self.exptime).await;
        if res.is_err() {
            *guard = None;
        }
        res
    }
}

#[async_trait]
impl SignalStore for MemcachedStore {
    async fn get(&self, key: &str) -> Result<ControlDocument, StoreError> {
        validate_key(key)?;
        match tokio::time::timeout(IO_TIMEOUT, self.fetch(key)).await {
            Ok(res) => res,
            Err(_) => {
                *self.conn.lock().await = None;
                Err(StoreError::Timeout)
            }
        }
    }

    async fn set(&self, key: &str, doc: &ControlDocument) -> Result<(), StoreError> {
        validate_key(key)?;
        let payload = serde_json::to_vec(doc).map_err(StoreError::Encode)?;
        match tokio::time::timeout(IO_TIMEOUT, self.store(key, &payload)).await {
            Ok(res) => res,
            Err(_) => {
                *self.conn.lock().await = None;
                Err(StoreError::Timeout)
            }
        }
    }
}

/// Memcached keys: non-empty, at most 250 bytes, no whitespace or control
/// characters. Run names double as keys, so this is also where the
/// "non-empty run name" requirement lands.
fn validate_key(key: &str) -> Result<(), StoreError> {
    if key.is_empty() {
        return Err(StoreError::InvalidKey {
            key: key.to_string(),
            reason: "must not be empty",
        });
    }
    if key.len() > 250 {
        return Err(StoreError::InvalidKey {
            key: key.to_string(),
            reason: "exceeds 250 bytes",
        });
    }
    if !key.bytes().all(|b| b.is_ascii_graphic()) {
        return Err(StoreError::InvalidKey {
            key: key.to_string(),
            reason: "contains whitespace, control, or non-ascii bytes",
        });
    }
    Ok(())
}

async fn read_line(conn: &mut BufStream<TcpStream>) -> Result<String, StoreError> {
    let mut line = String::new();
    let n = conn.read_line(&mut line).await?;
    if n == 0 {
        return Err(StoreError::Protocol("connection closed".into()));
    }
    while line.ends_with('\n') || line.ends_with('\r') {
        line.pop();
    }
    Ok(line)
}

/// Parse the first reply line of `get`: `None` for a miss (`END`),
/// otherwise the payload length from `VALUE <key> <flags> <bytes>`.
fn parse_value_header(line: &str) -> Result<Option<usize>, StoreError> {
    if line == "END" {
        return Ok(None);
    }
    let mut parts = line.split_whitespace();
    if parts.next() != Some("VALUE") {
        return Err(StoreError::Protocol(line.to_string()));
    }
    let _key = parts.next();
    let _flags = parts.next();
    parts
        .next()
        .and_then(|n| n.parse().ok())
        .map(Some)
        .ok_or_else(|| StoreError::Protocol(line.to_string()))
}

async fn get_on(conn: &mut BufStream<TcpStream>, key: &str) -> Result<ControlDocument, StoreError> {
    conn.write_all(format!("get {key}\r\n").as_bytes()).await?;
    conn.flush().await?;

    let header = read_line(conn).await?;
    let len = match parse_value_header(&header)? {
        // Absence is not an error: the first directive for a run creates
        // its document.
        None => return Ok(ControlDocument::default()),
        Some(len) => len,
    };

    let mut payload = vec![0u8; len + 2];
    conn.read_exact(&mut payload).await?;
    payload.truncate(len);

    let trailer = read_line(conn).await?;
    if trailer != "END" {
        return Err(StoreError::Protocol(trailer));
    }

    serde_json::from_slice(&payload).map_err(|source| StoreError::Decode {
        key: key.to_string(),
        source,
    })
}

async fn set_on(
    conn: &mut BufStream<TcpStream>,
    key: &str,
    payload: &[u8],
    exptime: u32,
) -> Result<(), StoreError> {
    conn.write_all(format!("set {key} 0 {exptime} {}\r\n", payload.len()).as_bytes())
        .await?;
    conn.write_all(payload).await?;
    conn.write_all(b"\r\n").await?;
    conn.flush().await?;

    let reply = read_line(conn).await?;
    if reply != "STORED" {
        return Err(StoreError::Protocol(reply));
    }
    Ok(())
}
