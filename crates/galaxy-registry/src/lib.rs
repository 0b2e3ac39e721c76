//! galaxy-registry — which containers are running, and where.
//!
//! Registrations are ephemeral. An agent writes one per running container
//! and keeps refreshing its TTL while the container is healthy; when the
//! refresh stops, the backend expires the record. Nothing sweeps.
//!
//! # Architecture
//!
//! ```text
//! RegistrationHeartbeat (tokio task, one per container)
//!   └── ServiceRegistry::register every interval
//!         └── registry:{env}:{pool}:{container}  hash + TTL
//! ```

pub mod error;
pub mod heartbeat;
pub mod registry;

pub use error::{RegistryError, RegistryResult};
pub use heartbeat::RegistrationHeartbeat;
pub use registry::{ServiceRegistration, ServiceRegistry};
