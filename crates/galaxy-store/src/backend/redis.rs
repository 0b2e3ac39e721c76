//! Networked backend speaking RESP to a Redis-compatible store.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::resp::{RespConnection, RespValue};
use super::{Backend, Subscription};
use crate::error::{BackendError, BackendResult};

/// How often an idle subscriber thread checks whether its receiver is gone.
const SUBSCRIBER_POLL: Duration = Duration::from_secs(1);

/// Backend over a single request connection to the shared store.
///
/// The connection is opened lazily and reopened on the call after a
/// transport failure; the failing call itself returns the error, since
/// retry policy belongs to the caller.
pub struct RedisBackend {
    addr: String,
    timeout: Duration,
    conn: Mutex<Option<RespConnection>>,
}

impl std::fmt::Debug for RedisBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisBackend")
            .field("addr", &self.addr)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl RedisBackend {
    /// Create a backend for `addr` (host:port). No connection is made yet.
    pub fn new(addr: impl Into<String>, timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            timeout,
            conn: Mutex::new(None),
        }
    }

    /// Create a backend and verify the store answers `PING`.
    pub fn connect(addr: impl Into<String>, timeout: Duration) -> BackendResult<Self> {
        let backend = Self::new(addr, timeout);
        backend.ping()?;
        Ok(backend)
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn ping(&self) -> BackendResult<()> {
        match self.command(&["PING"])? {
            RespValue::Simple(pong) if pong == "PONG" => Ok(()),
            other => Err(BackendError::Protocol(format!("unexpected PING reply {other:?}"))),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<RespConnection>> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn command(&self, parts: &[&str]) -> BackendResult<RespValue> {
        let mut guard = self.lock();
        if guard.is_none() {
            debug!(addr = %self.addr, "connecting to registry");
            *guard = Some(RespConnection::open(&self.addr, self.timeout)?);
        }
        let Some(conn) = guard.as_mut() else {
            return Err(BackendError::Closed);
        };
        match conn.call(parts) {
            Ok(value) => Ok(value),
            Err(e @ BackendError::Server(_)) => Err(e),
            Err(e) => {
                // Stream position is unknown after a transport failure.
                *guard = None;
                warn!(addr = %self.addr, command = parts[0], error = %e, "registry connection dropped");
                Err(e)
            }
        }
    }
}

/// Escape glob metacharacters other than `*`.
fn escape_glob(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len());
    for c in pattern.chars() {
        if matches!(c, '?' | '[' | ']' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// `EXPIRE` for whole seconds, otherwise `PEXPIRE` rounded up so a nonzero
/// TTL never reaches the server as zero.
fn expire_args(ttl: Duration) -> (&'static str, String) {
    if ttl.subsec_nanos() == 0 {
        ("EXPIRE", ttl.as_secs().to_string())
    } else {
        ("PEXPIRE", ttl.as_nanos().div_ceil(1_000_000).to_string())
    }
}

fn into_map(values: Vec<String>) -> BackendResult<HashMap<String, String>> {
    if values.len() % 2 != 0 {
        return Err(BackendError::Protocol("odd HGETALL reply".to_string()));
    }
    let mut map = HashMap::with_capacity(values.len() / 2);
    let mut iter = values.into_iter();
    while let (Some(field), Some(value)) = (iter.next(), iter.next()) {
        map.insert(field, value);
    }
    Ok(map)
}

impl Backend for RedisBackend {
    fn keys(&self, pattern: &str) -> BackendResult<Vec<String>> {
        self.command(&["KEYS", &escape_glob(pattern)])?.into_strings()
    }

    fn get(&self, key: &str, field: &str) -> BackendResult<Option<String>> {
        self.command(&["HGET", key, field])?.into_string()
    }

    fn set(&self, key: &str, field: &str, value: &str) -> BackendResult<()> {
        self.command(&["HSET", key, field, value])?.into_integer()?;
        Ok(())
    }

    fn get_all(&self, key: &str) -> BackendResult<HashMap<String, String>> {
        into_map(self.command(&["HGETALL", key])?.into_strings()?)
    }

    fn set_multi(&self, key: &str, fields: &HashMap<String, String>) -> BackendResult<()> {
        if fields.is_empty() {
            return Ok(());
        }
        let mut parts = Vec::with_capacity(2 + fields.len() * 2);
        parts.push("HSET");
        parts.push(key);
        for (field, value) in fields {
            parts.push(field.as_str());
            parts.push(value.as_str());
        }
        self.command(&parts)?.into_integer()?;
        Ok(())
    }

    fn delete_multi(&self, key: &str, fields: &[&str]) -> BackendResult<usize> {
        if fields.is_empty() {
            return Ok(0);
        }
        let mut parts = vec!["HDEL", key];
        parts.extend_from_slice(fields);
        Ok(self.command(&parts)?.into_integer()?.max(0) as usize)
    }

    fn add_member(&self, key: &str, value: &str) -> BackendResult<bool> {
        Ok(self.command(&["SADD", key, value])?.into_integer()? == 1)
    }

    fn remove_member(&self, key: &str, value: &str) -> BackendResult<bool> {
        Ok(self.command(&["SREM", key, value])?.into_integer()? == 1)
    }

    fn members(&self, key: &str) -> BackendResult<Vec<String>> {
        self.command(&["SMEMBERS", key])?.into_strings()
    }

    fn expire(&self, key: &str, ttl: Duration) -> BackendResult<bool> {
        let (command, amount) = expire_args(ttl);
        Ok(self.command(&[command, key, &amount])?.into_integer()? == 1)
    }

    fn ttl(&self, key: &str) -> BackendResult<Option<Duration>> {
        // -2: no such key, -1: no expiry.
        let ms = self.command(&["PTTL", key])?.into_integer()?;
        Ok((ms >= 0).then(|| Duration::from_millis(ms as u64)))
    }

    fn delete(&self, key: &str) -> BackendResult<bool> {
        Ok(self.command(&["DEL", key])?.into_integer()? > 0)
    }

    fn notify(&self, channel: &str, value: &str) -> BackendResult<usize> {
        let reached = self.command(&["PUBLISH", channel, value])?.into_integer()?;
        debug!(%channel, reached, "notification published");
        Ok(reached.max(0) as usize)
    }

    fn subscribe(&self, channel: &str) -> BackendResult<Subscription> {
        let mut conn = RespConnection::open(&self.addr, self.timeout)?;
        // Confirmation is ["subscribe", channel, :count].
        let confirm = conn.call(&["SUBSCRIBE", channel])?;
        let confirmed = matches!(
            &confirm,
            RespValue::Array(Some(items))
                if items.first() == Some(&RespValue::Bulk(Some(b"subscribe".to_vec())))
        );
        if !confirmed {
            return Err(BackendError::Protocol(format!(
                "unexpected SUBSCRIBE reply {confirm:?}"
            )));
        }
        conn.set_read_timeout(Some(SUBSCRIBER_POLL))?;

        let (tx, rx) = mpsc::unbounded_channel();
        let name = channel.to_string();
        std::thread::Builder::new()
            .name(format!("galaxy-sub-{channel}"))
            .spawn(move || forward_messages(conn, &name, tx))?;
        debug!(%channel, addr = %self.addr, "subscribed");
        Ok(Subscription::new(channel, rx))
    }
}

/// Drain a subscribed connection into `tx` until either side goes away.
fn forward_messages(mut conn: RespConnection, channel: &str, tx: mpsc::UnboundedSender<String>) {
    while !tx.is_closed() {
        let frame = match conn.poll() {
            Ok(Some(frame)) => frame,
            Ok(None) => continue,
            Err(e) => {
                warn!(%channel, error = %e, "subscription connection lost");
                return;
            }
        };
        let parts = match frame.into_strings() {
            Ok(parts) => parts,
            Err(e) => {
                warn!(%channel, error = %e, "ignoring malformed pub/sub frame");
                continue;
            }
        };
        if let [kind, _, payload] = parts.as_slice()
            && kind == "message"
            && tx.send(payload.clone()).is_err()
        {
            break;
        }
    }
    debug!(%channel, "subscriber stopped");
}
