//! Service registry — TTL-bound records of running containers.
//!
//! Each record lives at `registry:{env}:{pool}:{container}` as a hash with
//! a backend TTL. A record that is readable is live; an absent one means
//! the container is not under registry tracking, which is not an error.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use galaxy_core::validate_name;
use galaxy_store::Backend;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{RegistryError, RegistryResult};

pub const REGISTRY_PREFIX: &str = "registry";

pub fn registration_key(env: &str, pool: &str, container_id: &str) -> String {
    format!("{REGISTRY_PREFIX}:{env}:{pool}:{container_id}")
}

fn registration_pattern(env: &str, pool: &str) -> String {
    format!("{REGISTRY_PREFIX}:{env}:{pool}:*")
}

/// One running container as seen by the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRegistration {
    pub container_id: String,
    pub image: String,
    /// Name of the app the container runs, when known.
    pub app: String,
    pub external_ip: String,
    pub external_port: u16,
    pub internal_ip: String,
    pub internal_port: u16,
    pub started_at: DateTime<Utc>,
    /// When the record lapses unless refreshed. Only set on records read
    /// back from the registry.
    pub expires: Option<DateTime<Utc>>,
}

impl ServiceRegistration {
    pub fn new(container_id: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            container_id: container_id.into(),
            image: image.into(),
            app: String::new(),
            external_ip: String::new(),
            external_port: 0,
            internal_ip: String::new(),
            internal_port: 0,
            started_at: Utc::now(),
            expires: None,
        }
    }

    pub fn with_app(mut self, app: impl Into<String>) -> Self {
        self.app = app.into();
        self
    }

    pub fn with_external(mut self, ip: impl Into<String>, port: u16) -> Self {
        self.external_ip = ip.into();
        self.external_port = port;
        self
    }

    pub fn with_internal(mut self, ip: impl Into<String>, port: u16) -> Self {
        self.internal_ip = ip.into();
        self.internal_port = port;
        self
    }

    pub fn with_started_at(mut self, started_at: DateTime<Utc>) -> Self {
        self.started_at = started_at;
        self
    }

    /// `host:port` reachable from outside the cluster, or empty.
    pub fn external_addr(&self) -> String {
        join_addr(&self.external_ip, self.external_port)
    }

    /// `host:port` reachable inside the cluster, or empty.
    pub fn internal_addr(&self) -> String {
        join_addr(&self.internal_ip, self.internal_port)
    }

    /// Static fields as stored in the backend. `expires` is not stored;
    /// it comes from the key's TTL.
    fn to_fields(&self) -> HashMap<String, String> {
        HashMap::from([
            ("container_id".to_string(), self.container_id.clone()),
            ("image".to_string(), self.image.clone()),
            ("app".to_string(), self.app.clone()),
            ("external_ip".to_string(), self.external_ip.clone()),
            ("external_port".to_string(), self.external_port.to_string()),
            ("internal_ip".to_string(), self.internal_ip.clone()),
            ("internal_port".to_string(), self.internal_port.to_string()),
            ("started_at".to_string(), self.started_at.to_rfc3339()),
        ])
    }

    fn from_fields(
        fields: &HashMap<String, String>,
        expires: Option<DateTime<Utc>>,
    ) -> RegistryResult<Self> {
        let text = |field: &str| fields.get(field).cloned().unwrap_or_default();
        let port = |field: &'static str| -> RegistryResult<u16> {
            match fields.get(field).map(String::as_str) {
                None | Some("") => Ok(0),
                Some(raw) => raw.parse().map_err(|_| RegistryError::InvalidField {
                    field,
                    value: raw.to_string(),
                }),
            }
        };
        let started_at = match fields.get("started_at") {
            Some(raw) => DateTime::parse_from_rfc3339(raw)
                .map_err(|_| RegistryError::InvalidField {
                    field: "started_at",
                    value: raw.clone(),
                })?
                .with_timezone(&Utc),
            None => DateTime::<Utc>::UNIX_EPOCH,
        };

        Ok(Self {
            container_id: text("container_id"),
            image: text("image"),
            app: text("app"),
            external_ip: text("external_ip"),
            external_port: port("external_port")?,
            internal_ip: text("internal_ip"),
            internal_port: port("internal_port")?,
            started_at,
            expires,
        })
    }
}

fn join_addr(ip: &str, port: u16) -> String {
    if ip.is_empty() {
        String::new()
    } else {
        format!("{ip}:{port}")
    }
}

/// Reads and writes registrations. Cheap to clone.
#[derive(Clone)]
pub struct ServiceRegistry {
    backend: Arc<dyn Backend>,
    ttl: Duration,
}

impl std::fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl ServiceRegistry {
    pub fn new(backend: Arc<dyn Backend>, ttl: Duration) -> Self {
        Self { backend, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn ttl_delta(&self) -> RegistryResult<TimeDelta> {
        TimeDelta::from_std(self.ttl).map_err(|_| RegistryError::InvalidField {
            field: "ttl",
            value: format!("{:?}", self.ttl),
        })
    }

    /// Write or refresh a registration and return its new expiry.
    ///
    /// Static fields are only rewritten when they differ from the stored
    /// ones; the TTL is refreshed on every call.
    pub fn register(
        &self,
        env: &str,
        pool: &str,
        registration: &ServiceRegistration,
    ) -> RegistryResult<DateTime<Utc>> {
        validate_name("env", env)?;
        validate_name("pool", pool)?;
        validate_name("container", &registration.container_id)?;
        let ttl = self.ttl_delta()?;

        let key = registration_key(env, pool, &registration.container_id);
        let fields = registration.to_fields();
        let stored = self.backend.get_all(&key)?;
        let fresh = stored.is_empty();
        if stored != fields {
            self.backend.set_multi(&key, &fields)?;
            debug!(%key, "registration fields written");
        }
        let expired = match self.backend.expire(&key, self.ttl) {
            Ok(true) => Ok(()),
            // Lapsed between the read and the expire.
            Ok(false) => self
                .backend
                .set_multi(&key, &fields)
                .and_then(|()| self.backend.expire(&key, self.ttl))
                .map(drop),
            Err(e) => Err(e),
        };
        if let Err(e) = expired {
            // A hash without a TTL would never lapse.
            if fresh && let Err(cleanup) = self.backend.delete(&key) {
                warn!(%key, error = %cleanup, "failed to remove registration without a ttl");
            }
            return Err(e.into());
        }

        if fresh {
            info!(
                %env,
                %pool,
                container = %registration.container_id,
                external = %registration.external_addr(),
                "container registered"
            );
        }
        Ok(Utc::now() + ttl)
    }

    /// Look up one container. `None` when it was never registered or its
    /// registration has expired.
    pub fn get_service_registration(
        &self,
        env: &str,
        pool: &str,
        container_id: &str,
    ) -> RegistryResult<Option<ServiceRegistration>> {
        validate_name("env", env)?;
        validate_name("pool", pool)?;
        validate_name("container", container_id)?;

        let key = registration_key(env, pool, container_id);
        let fields = self.backend.get_all(&key)?;
        if fields.is_empty() {
            return Ok(None);
        }
        let remaining = match self.backend.ttl(&key)? {
            Some(remaining) => remaining,
            None => {
                // Written without its TTL by an interrupted register.
                if !self.backend.expire(&key, self.ttl)? {
                    return Ok(None);
                }
                warn!(%key, ttl = ?self.ttl, "restored missing registration ttl");
                self.ttl
            }
        };
        let expires = TimeDelta::from_std(remaining)
            .ok()
            .map(|remaining| Utc::now() + remaining);
        ServiceRegistration::from_fields(&fields, expires).map(Some)
    }

    /// Live registrations in `env`/`pool`, sorted by container id.
    pub fn list_registrations(
        &self,
        env: &str,
        pool: &str,
    ) -> RegistryResult<Vec<ServiceRegistration>> {
        validate_name("env", env)?;
        validate_name("pool", pool)?;

        let prefix_len = registration_key(env, pool, "").len();
        let mut registrations = Vec::new();
        for key in self.backend.keys(&registration_pattern(env, pool))? {
            let container_id = &key[prefix_len..];
            if container_id.is_empty() {
                continue;
            }
            // Expired since the scan.
            if let Some(registration) = self.get_service_registration(env, pool, container_id)? {
                registrations.push(registration);
            }
        }
        registrations.sort_by(|a, b| a.container_id.cmp(&b.container_id));
        Ok(registrations)
    }

    /// Remove a registration ahead of its TTL. Returns whether one existed.
    pub fn unregister(&self, env: &str, pool: &str, container_id: &str) -> RegistryResult<bool> {
        validate_name("env", env)?;
        validate_name("pool", pool)?;
        validate_name("container", container_id)?;
        let removed = self
            .backend
            .delete(&registration_key(env, pool, container_id))?;
        if removed {
            info!(%env, %pool, container = %container_id, "container unregistered");
        }
        Ok(removed)
    }
}
