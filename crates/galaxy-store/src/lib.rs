//! galaxy-store — authoritative app and pool configuration for Galaxy.
//!
//! Built on a [`Backend`] offering only primitive operations (hash fields,
//! string sets, expiry and publish/subscribe) shared by every CLI
//! invocation and agent in the cluster.
//!
//! # Architecture
//!
//! - [`Store`] maps environments, pools and apps onto backend keys (see
//!   [`keys`]) and publishes a [`ChangeNotice`] after each mutation.
//! - [`AppConfig`] is the versioned record persisted per app; its
//!   [`AppConfig::id`] orders configs of the same app by recency.
//! - [`RedisBackend`] talks RESP to the shared store; [`MemoryBackend`]
//!   implements the same contract in process.
//!
//! `Store` is `Clone` + `Send` + `Sync` (backed by `Arc<dyn Backend>`) and
//! its calls block on backend I/O.

pub mod app_config;
pub mod backend;
pub mod backup;
pub mod changes;
pub mod error;
pub mod keys;
pub mod store;

pub use app_config::AppConfig;
pub use backend::{Backend, MemoryBackend, RedisBackend, Subscription};
pub use backup::Backup;
pub use changes::{ChangeKind, ChangeNotice, ChangeWatcher};
pub use error::{BackendError, BackendResult, StoreError, StoreResult};
pub use store::Store;
