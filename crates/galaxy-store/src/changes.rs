//! Change notices published on `changes:{env}`.
//!
//! A notice only says that something moved. Consumers re-read the store
//! instead of trusting the payload, and must cope with notices that are
//! missed or repeated.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::backend::Subscription;
use crate::error::{StoreError, StoreResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    AppCreated,
    AppUpdated,
    AppDeleted,
    Restart,
    Assigned,
    Unassigned,
    PoolCreated,
    PoolDeleted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeNotice {
    pub env: String,
    pub kind: ChangeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pool: Option<String>,
    /// Config id at the time of the change, when there is one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
}

impl ChangeNotice {
    pub fn app(env: &str, app: &str, kind: ChangeKind) -> Self {
        Self {
            env: env.to_string(),
            kind,
            app: Some(app.to_string()),
            pool: None,
            id: None,
        }
    }

    pub fn pool(env: &str, pool: &str, kind: ChangeKind) -> Self {
        Self {
            env: env.to_string(),
            kind,
            app: None,
            pool: Some(pool.to_string()),
            id: None,
        }
    }

    pub fn with_id(mut self, id: u64) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_pool(mut self, pool: &str) -> Self {
        self.pool = Some(pool.to_string());
        self
    }

    pub fn encode(&self) -> StoreResult<String> {
        serde_json::to_string(self).map_err(|e| StoreError::Serialize(e.to_string()))
    }

    pub fn decode(payload: &str) -> StoreResult<Self> {
        serde_json::from_str(payload).map_err(|e| StoreError::Deserialize(e.to_string()))
    }
}

/// Decoded view over a change subscription.
#[derive(Debug)]
pub struct ChangeWatcher {
    subscription: Subscription,
}

impl ChangeWatcher {
    pub(crate) fn new(subscription: Subscription) -> Self {
        Self { subscription }
    }

    pub fn channel(&self) -> &str {
        self.subscription.channel()
    }

    /// Next notice. `None` once the subscription has ended.
    pub async fn next(&mut self) -> Option<ChangeNotice> {
        loop {
            let payload = self.subscription.recv().await?;
            if let Some(notice) = self.decode(&payload) {
                return Some(notice);
            }
        }
    }

    /// Blocking variant of [`Self::next`]. Panics inside an async runtime.
    pub fn blocking_next(&mut self) -> Option<ChangeNotice> {
        loop {
            let payload = self.subscription.blocking_recv()?;
            if let Some(notice) = self.decode(&payload) {
                return Some(notice);
            }
        }
    }

    /// Next already-queued notice, skipping undecodable ones.
    pub fn try_next(&mut self) -> Option<ChangeNotice> {
        while let Some(payload) = self.subscription.try_recv() {
            if let Some(notice) = self.decode(&payload) {
                return Some(notice);
            }
        }
        None
    }

    fn decode(&self, payload: &str) -> Option<ChangeNotice> {
        match ChangeNotice::decode(payload) {
            Ok(notice) => Some(notice),
            Err(e) => {
                warn!(channel = %self.channel(), error = %e, "dropping undecodable change notice");
                None
            }
        }
    }
}
