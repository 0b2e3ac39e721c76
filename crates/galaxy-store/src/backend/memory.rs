//! In-process backend with the same contract as the networked one.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::debug;

use super::{Backend, Subscription, glob_regex};
use crate::error::{BackendError, BackendResult};

const WRONG_TYPE: &str = "WRONGTYPE Operation against a key holding the wrong kind of value";

#[derive(Debug, Clone)]
enum Value {
    Hash(HashMap<String, String>),
    Set(HashSet<String>),
}

impl Value {
    fn is_empty(&self) -> bool {
        match self {
            Value::Hash(fields) => fields.is_empty(),
            Value::Set(members) => members.is_empty(),
        }
    }
}

#[derive(Debug)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

#[derive(Default)]
struct MemoryState {
    entries: HashMap<String, Entry>,
    subscribers: HashMap<String, Vec<mpsc::UnboundedSender<String>>>,
    /// Added to the wall clock so tests can move time forward.
    skew: Duration,
}

impl MemoryState {
    fn now(&self) -> Instant {
        Instant::now() + self.skew
    }

    /// Drop `key` if its TTL has lapsed, then return whether it is live.
    fn evict_if_expired(&mut self, key: &str) -> bool {
        let now = self.now();
        match self.entries.get(key) {
            Some(entry) if entry.expires_at.is_some_and(|at| at <= now) => {
                self.entries.remove(key);
                false
            }
            Some(_) => true,
            None => false,
        }
    }

    fn live(&mut self, key: &str) -> Option<&mut Entry> {
        if self.evict_if_expired(key) {
            self.entries.get_mut(key)
        } else {
            None
        }
    }

    fn hash(&mut self, key: &str) -> BackendResult<Option<&mut HashMap<String, String>>> {
        match self.live(key) {
            Some(Entry {
                value: Value::Hash(fields),
                ..
            }) => Ok(Some(fields)),
            Some(_) => Err(BackendError::Server(WRONG_TYPE.to_string())),
            None => Ok(None),
        }
    }

    fn set(&mut self, key: &str) -> BackendResult<Option<&mut HashSet<String>>> {
        match self.live(key) {
            Some(Entry {
                value: Value::Set(members),
                ..
            }) => Ok(Some(members)),
            Some(_) => Err(BackendError::Server(WRONG_TYPE.to_string())),
            None => Ok(None),
        }
    }

    fn hash_or_insert(&mut self, key: &str) -> BackendResult<&mut HashMap<String, String>> {
        if self.hash(key)?.is_none() {
            self.entries.insert(
                key.to_string(),
                Entry {
                    value: Value::Hash(HashMap::new()),
                    expires_at: None,
                },
            );
        }
        self.hash(key)?
            .ok_or_else(|| BackendError::Protocol(format!("hash {key} vanished")))
    }

    fn set_or_insert(&mut self, key: &str) -> BackendResult<&mut HashSet<String>> {
        if self.set(key)?.is_none() {
            self.entries.insert(
                key.to_string(),
                Entry {
                    value: Value::Set(HashSet::new()),
                    expires_at: None,
                },
            );
        }
        self.set(key)?
            .ok_or_else(|| BackendError::Protocol(format!("set {key} vanished")))
    }

    /// Empty hashes and sets do not exist.
    fn drop_if_empty(&mut self, key: &str) {
        if self.entries.get(key).is_some_and(|e| e.value.is_empty()) {
            self.entries.remove(key);
        }
    }
}

/// Thread-safe in-memory backend.
///
/// Cloning shares the underlying state, so several stores, registries and
/// subscribers in one process can observe each other exactly as separate
/// processes would through the networked backend.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move this backend's clock forward, expiring keys whose TTL lapses.
    pub fn advance(&self, by: Duration) {
        let mut state = self.lock();
        state.skew += by;
        debug!(skew = ?state.skew, "memory backend clock advanced");
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for MemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("MemoryBackend")
            .field("keys", &state.entries.len())
            .field("channels", &state.subscribers.len())
            .finish()
    }
}

impl Backend for MemoryBackend {
    fn keys(&self, pattern: &str) -> BackendResult<Vec<String>> {
        let re = glob_regex(pattern)?;
        let mut state = self.lock();
        let now = state.now();
        state
            .entries
            .retain(|_, entry| entry.expires_at.is_none_or(|at| at > now));
        Ok(state
            .entries
            .keys()
            .filter(|k| re.is_match(k))
            .cloned()
            .collect())
    }

    fn get(&self, key: &str, field: &str) -> BackendResult<Option<String>> {
        let mut state = self.lock();
        Ok(state.hash(key)?.and_then(|fields| fields.get(field).cloned()))
    }

    fn set(&self, key: &str, field: &str, value: &str) -> BackendResult<()> {
        let mut state = self.lock();
        state
            .hash_or_insert(key)?
            .insert(field.to_string(), value.to_string());
        Ok(())
    }

    fn get_all(&self, key: &str) -> BackendResult<HashMap<String, String>> {
        let mut state = self.lock();
        Ok(state.hash(key)?.cloned().unwrap_or_default())
    }

    fn set_multi(&self, key: &str, fields: &HashMap<String, String>) -> BackendResult<()> {
        if fields.is_empty() {
            return Ok(());
        }
        let mut state = self.lock();
        let hash = state.hash_or_insert(key)?;
        for (field, value) in fields {
            hash.insert(field.clone(), value.clone());
        }
        Ok(())
    }

    fn delete_multi(&self, key: &str, fields: &[&str]) -> BackendResult<usize> {
        let mut state = self.lock();
        let removed = match state.hash(key)? {
            Some(hash) => fields.iter().filter(|f| hash.remove(**f).is_some()).count(),
            None => 0,
        };
        state.drop_if_empty(key);
        Ok(removed)
    }

    fn add_member(&self, key: &str, value: &str) -> BackendResult<bool> {
        let mut state = self.lock();
        Ok(state.set_or_insert(key)?.insert(value.to_string()))
    }

    fn remove_member(&self, key: &str, value: &str) -> BackendResult<bool> {
        let mut state = self.lock();
        let removed = match state.set(key)? {
            Some(members) => members.remove(value),
            None => false,
        };
        state.drop_if_empty(key);
        Ok(removed)
    }

    fn members(&self, key: &str) -> BackendResult<Vec<String>> {
        let mut state = self.lock();
        Ok(state
            .set(key)?
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default())
    }

    fn expire(&self, key: &str, ttl: Duration) -> BackendResult<bool> {
        let mut state = self.lock();
        let at = state.now() + ttl;
        if ttl.is_zero() {
            return Ok(state.evict_if_expired(key) && state.entries.remove(key).is_some());
        }
        match state.live(key) {
            Some(entry) => {
                entry.expires_at = Some(at);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn ttl(&self, key: &str) -> BackendResult<Option<Duration>> {
        let mut state = self.lock();
        let now = state.now();
        Ok(state
            .live(key)
            .and_then(|entry| entry.expires_at)
            .map(|at| at.saturating_duration_since(now)))
    }

    fn delete(&self, key: &str) -> BackendResult<bool> {
        let mut state = self.lock();
        let existed = state.evict_if_expired(key);
        state.entries.remove(key);
        Ok(existed)
    }

    fn notify(&self, channel: &str, value: &str) -> BackendResult<usize> {
        let mut state = self.lock();
        let Some(senders) = state.subscribers.get_mut(channel) else {
            return Ok(0);
        };
        senders.retain(|tx| tx.send(value.to_string()).is_ok());
        let reached = senders.len();
        if senders.is_empty() {
            state.subscribers.remove(channel);
        }
        debug!(%channel, reached, "notification published");
        Ok(reached)
    }

    fn subscribe(&self, channel: &str) -> BackendResult<Subscription> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock()
            .subscribers
            .entry(channel.to_string())
            .or_default()
            .push(tx);
        debug!(%channel, "subscribed");
        Ok(Subscription::new(channel, rx))
    }
}
