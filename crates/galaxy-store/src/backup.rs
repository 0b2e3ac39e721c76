//! Backup documents for `app:backup` / `app:restore`.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::app_config::AppConfig;
use crate::error::{StoreError, StoreResult};

/// Snapshot of app configs taken from one environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Backup {
    /// Unix seconds when the backup was taken.
    pub time: u64,
    pub env: String,
    pub apps: Vec<AppConfig>,
}

impl Backup {
    pub fn new(env: impl Into<String>, apps: Vec<AppConfig>) -> Self {
        Self {
            time: epoch_secs(),
            env: env.into(),
            apps,
        }
    }

    pub fn to_json(&self) -> StoreResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| StoreError::Serialize(e.to_string()))
    }

    pub fn from_json(json: &str) -> StoreResult<Self> {
        serde_json::from_str(json).map_err(|e| StoreError::Deserialize(e.to_string()))
    }

    pub fn app(&self, name: &str) -> Option<&AppConfig> {
        self.apps.iter().find(|app| app.name() == name)
    }
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
