//! Backend — capability interface over the shared key-value store.
//!
//! Every Galaxy process (CLI invocation or agent) talks to the same backend.
//! The contract is the intersection of what a Redis-like store offers:
//! hash fields per key, unordered string sets, key expiry and
//! fire-and-forget publish/subscribe.
//!
//! # Implementations
//!
//! - [`RedisBackend`]: RESP over TCP to the shared store.
//! - [`MemoryBackend`]: in-process store with identical semantics, used by
//!   tests and single-process tooling.
//!
//! # Semantics shared by both
//!
//! - A hash or set with no remaining fields/members does not exist.
//! - Expired keys are invisible to every operation.
//! - Writing hash fields keeps an existing TTL.
//! - `keys` treats `*` as the only wildcard and matches the whole key.
//! - Notifications are at-most-once: subscribers connected after a publish
//!   never see it.

mod memory;
mod redis;
mod resp;

pub use memory::MemoryBackend;
pub use redis::RedisBackend;

use std::collections::HashMap;
use std::time::Duration;

use regex::Regex;
use tokio::sync::mpsc;

use crate::error::{BackendError, BackendResult};

/// Primitive operations the store and registry are built from.
///
/// Calls block on backend I/O and are bounded by the backend's network
/// timeout. Implementations are shared as `Arc<dyn Backend>`.
pub trait Backend: Send + Sync {
    /// Enumerate keys matching a glob pattern.
    fn keys(&self, pattern: &str) -> BackendResult<Vec<String>>;

    /// Read one hash field.
    fn get(&self, key: &str, field: &str) -> BackendResult<Option<String>>;

    /// Write one hash field.
    fn set(&self, key: &str, field: &str, value: &str) -> BackendResult<()>;

    /// Read every hash field. Empty when the key does not exist.
    fn get_all(&self, key: &str) -> BackendResult<HashMap<String, String>>;

    /// Write several hash fields in one operation.
    fn set_multi(&self, key: &str, fields: &HashMap<String, String>) -> BackendResult<()>;

    /// Remove hash fields. Returns how many existed.
    fn delete_multi(&self, key: &str, fields: &[&str]) -> BackendResult<usize>;

    /// Add to a set. Returns true when the member was not already present.
    fn add_member(&self, key: &str, value: &str) -> BackendResult<bool>;

    /// Remove from a set. Returns true when the member was present.
    fn remove_member(&self, key: &str, value: &str) -> BackendResult<bool>;

    /// Set members, in no particular order.
    fn members(&self, key: &str) -> BackendResult<Vec<String>>;

    /// Set a time-to-live on an existing key. Returns false if the key is absent.
    fn expire(&self, key: &str, ttl: Duration) -> BackendResult<bool>;

    /// Remaining time-to-live. `None` when the key is absent or never expires.
    fn ttl(&self, key: &str) -> BackendResult<Option<Duration>>;

    /// Remove a key with all of its fields or members.
    fn delete(&self, key: &str) -> BackendResult<bool>;

    /// Publish a value. Returns the number of subscribers reached.
    fn notify(&self, channel: &str, value: &str) -> BackendResult<usize>;

    /// Subscribe to values published on `channel` from now on.
    fn subscribe(&self, channel: &str) -> BackendResult<Subscription>;
}

/// Stream of values published on one channel.
///
/// Delivery is best effort. Treat every value as a hint to re-read
/// authoritative state. Dropping the subscription unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    channel: String,
    rx: mpsc::UnboundedReceiver<String>,
}

impl Subscription {
    pub(crate) fn new(channel: &str, rx: mpsc::UnboundedReceiver<String>) -> Self {
        Self {
            channel: channel.to_string(),
            rx,
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Wait for the next value. `None` once the backend side has gone away.
    pub async fn recv(&mut self) -> Option<String> {
        self.rx.recv().await
    }

    /// Blocking variant of [`Self::recv`] for synchronous callers.
    ///
    /// Panics if called from inside an async runtime.
    pub fn blocking_recv(&mut self) -> Option<String> {
        self.rx.blocking_recv()
    }

    /// Next value if one is already queued.
    pub fn try_recv(&mut self) -> Option<String> {
        self.rx.try_recv().ok()
    }
}

/// Compile a `*`-only glob into an anchored regex.
pub(crate) fn glob_regex(pattern: &str) -> BackendResult<Regex> {
    let body = pattern
        .split('*')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(".*");
    Regex::new(&format!("^{body}$"))
        .map_err(|e| BackendError::Protocol(format!("bad key pattern {pattern:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glob_star_matches_any_run() {
        let re = glob_regex("app:prod:*").unwrap();
        assert!(re.is_match("app:prod:foo"));
        assert!(re.is_match("app:prod:"));
        assert!(!re.is_match("app:staging:foo"));
        assert!(!re.is_match("xapp:prod:foo"));
    }

    #[test]
    fn glob_other_characters_are_literal() {
        let re = glob_regex("pool:a.b:*").unwrap();
        assert!(re.is_match("pool:a.b:web"));
        assert!(!re.is_match("pool:aXb:web"));

        let re = glob_regex("registry:?:[x]").unwrap();
        assert!(re.is_match("registry:?:[x]"));
        assert!(!re.is_match("registry:a:x"));
    }

    #[test]
    fn glob_multiple_wildcards() {
        let re = glob_regex("app:*:*").unwrap();
        assert!(re.is_match("app:prod:foo"));
        assert!(!re.is_match("pools:prod"));
    }
}
