//! Registration heartbeat — keeps one container's registration alive.
//!
//! The task re-registers every `interval`, which must be comfortably
//! shorter than the registry TTL. Backend errors are logged and the loop
//! carries on; if the process dies the registration lapses within one TTL.
//! Registry calls block on backend I/O, so they run on the blocking pool.

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::error::RegistryResult;
use crate::registry::{ServiceRegistration, ServiceRegistry};

/// Handle to a running heartbeat task.
pub struct RegistrationHeartbeat {
    handle: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
    registry: ServiceRegistry,
    env: String,
    pool: String,
    container_id: String,
    unregister_on_stop: bool,
}

impl RegistrationHeartbeat {
    /// Register now and keep refreshing every `interval` until stopped.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(
        registry: ServiceRegistry,
        env: impl Into<String>,
        pool: impl Into<String>,
        registration: ServiceRegistration,
        interval: Duration,
    ) -> Self {
        let env = env.into();
        let pool = pool.into();
        let container_id = registration.container_id.clone();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(run_heartbeat_loop(
            registry.clone(),
            env.clone(),
            pool.clone(),
            registration,
            interval,
            shutdown_rx,
        ));
        info!(%env, %pool, container = %container_id, ?interval, "registration heartbeat started");

        Self {
            handle,
            shutdown_tx,
            registry,
            env,
            pool,
            container_id,
            unregister_on_stop: false,
        }
    }

    /// Remove the registration when the heartbeat is stopped, instead of
    /// letting it lapse.
    pub fn with_unregister_on_stop(mut self, unregister: bool) -> Self {
        self.unregister_on_stop = unregister;
        self
    }

    pub fn container_id(&self) -> &str {
        &self.container_id
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Stop refreshing and wait for the task to finish.
    pub async fn stop(self) -> RegistryResult<()> {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.handle.await {
            error!(container = %self.container_id, error = %e, "heartbeat task failed");
        }
        if self.unregister_on_stop {
            let (registry, env, pool, container) = (
                self.registry.clone(),
                self.env.clone(),
                self.pool.clone(),
                self.container_id.clone(),
            );
            match tokio::task::spawn_blocking(move || registry.unregister(&env, &pool, &container))
                .await
            {
                Ok(result) => {
                    result?;
                }
                Err(e) => error!(container = %self.container_id, error = %e, "unregister task failed"),
            }
        }
        info!(env = %self.env, pool = %self.pool, container = %self.container_id, "registration heartbeat stopped");
        Ok(())
    }
}

async fn run_heartbeat_loop(
    registry: ServiceRegistry,
    env: String,
    pool: String,
    registration: ServiceRegistration,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let container = registration.container_id.clone();
    debug!(%env, %pool, %container, "heartbeat loop starting");

    loop {
        let refresh = {
            let (registry, env, pool, registration) = (
                registry.clone(),
                env.clone(),
                pool.clone(),
                registration.clone(),
            );
            tokio::task::spawn_blocking(move || registry.register(&env, &pool, &registration))
        };
        match refresh.await {
            Ok(Ok(expires)) => debug!(%container, %expires, "registration refreshed"),
            Ok(Err(e)) => error!(%env, %pool, %container, error = %e, "failed to refresh registration"),
            Err(e) => error!(%container, error = %e, "registration refresh task failed"),
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.changed() => {
                debug!(%container, "heartbeat loop shutting down");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use galaxy_store::{Backend, BackendResult, MemoryBackend, Subscription};
    use std::collections::HashMap;
    use std::sync::Arc;

    fn registry(backend: &MemoryBackend, ttl: Duration) -> ServiceRegistry {
        ServiceRegistry::new(Arc::new(backend.clone()), ttl)
    }

    #[tokio::test]
    async fn keeps_registration_alive() {
        let backend = MemoryBackend::new();
        let registry = registry(&backend, Duration::from_secs(2));
        let heartbeat = RegistrationHeartbeat::spawn(
            registry.clone(),
            "prod",
            "web",
            ServiceRegistration::new("abc123", "img:1"),
            Duration::from_millis(20),
        );

        for _ in 0..3 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            // Without a refresh since the last advance this would lapse.
            backend.advance(Duration::from_millis(1500));
            tokio::time::sleep(Duration::from_millis(100)).await;
            assert!(registry
                .get_service_registration("prod", "web", "abc123")
                .unwrap()
                .is_some());
        }
        assert!(heartbeat.is_running());
        heartbeat.stop().await.unwrap();
    }

    #[tokio::test]
    async fn stopped_registration_lapses() {
        let backend = MemoryBackend::new();
        let registry = registry(&backend, Duration::from_secs(2));
        let heartbeat = RegistrationHeartbeat::spawn(
            registry.clone(),
            "prod",
            "web",
            ServiceRegistration::new("abc123", "img:1"),
            Duration::from_millis(20),
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
        heartbeat.stop().await.unwrap();

        assert!(registry
            .get_service_registration("prod", "web", "abc123")
            .unwrap()
            .is_some());
        backend.advance(Duration::from_secs(3));
        assert!(registry
            .get_service_registration("prod", "web", "abc123")
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn unregister_on_stop() {
        let backend = MemoryBackend::new();
        let registry = registry(&backend, Duration::from_secs(60));
        let heartbeat = RegistrationHeartbeat::spawn(
            registry.clone(),
            "prod",
            "web",
            ServiceRegistration::new("abc123", "img:1"),
            Duration::from_secs(30),
        )
        .with_unregister_on_stop(true);
        assert_eq!(heartbeat.container_id(), "abc123");

        tokio::time::sleep(Duration::from_millis(50)).await;
        heartbeat.stop().await.unwrap();
        assert!(registry
            .get_service_registration("prod", "web", "abc123")
            .unwrap()
            .is_none());
    }

    /// Memory backend whose hash reads stall like a slow network call.
    struct SlowReads {
        inner: MemoryBackend,
        delay: Duration,
    }

    impl Backend for SlowReads {
        fn keys(&self, pattern: &str) -> BackendResult<Vec<String>> {
            self.inner.keys(pattern)
        }
        fn get(&self, key: &str, field: &str) -> BackendResult<Option<String>> {
            self.inner.get(key, field)
        }
        fn set(&self, key: &str, field: &str, value: &str) -> BackendResult<()> {
            self.inner.set(key, field, value)
        }
        fn get_all(&self, key: &str) -> BackendResult<HashMap<String, String>> {
            std::thread::sleep(self.delay);
            self.inner.get_all(key)
        }
        fn set_multi(&self, key: &str, fields: &HashMap<String, String>) -> BackendResult<()> {
            self.inner.set_multi(key, fields)
        }
        fn delete_multi(&self, key: &str, fields: &[&str]) -> BackendResult<usize> {
            self.inner.delete_multi(key, fields)
        }
        fn add_member(&self, key: &str, value: &str) -> BackendResult<bool> {
            self.inner.add_member(key, value)
        }
        fn remove_member(&self, key: &str, value: &str) -> BackendResult<bool> {
            self.inner.remove_member(key, value)
        }
        fn members(&self, key: &str) -> BackendResult<Vec<String>> {
            self.inner.members(key)
        }
        fn expire(&self, key: &str, ttl: Duration) -> BackendResult<bool> {
            self.inner.expire(key, ttl)
        }
        fn ttl(&self, key: &str) -> BackendResult<Option<Duration>> {
            self.inner.ttl(key)
        }
        fn delete(&self, key: &str) -> BackendResult<bool> {
            self.inner.delete(key)
        }
        fn notify(&self, channel: &str, value: &str) -> BackendResult<usize> {
            self.inner.notify(channel, value)
        }
        fn subscribe(&self, channel: &str) -> BackendResult<Subscription> {
            self.inner.subscribe(channel)
        }
    }

    #[tokio::test]
    async fn slow_backend_does_not_stall_the_runtime() {
        let backend = SlowReads {
            inner: MemoryBackend::new(),
            delay: Duration::from_millis(500),
        };
        let registry = ServiceRegistry::new(Arc::new(backend), Duration::from_secs(60));
        let heartbeat = RegistrationHeartbeat::spawn(
            registry,
            "prod",
            "web",
            ServiceRegistration::new("abc123", "img:1"),
            Duration::from_secs(30),
        );

        // Single-threaded runtime: a blocked worker would delay this timer.
        let started = std::time::Instant::now();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(started.elapsed() < Duration::from_millis(300));

        heartbeat.stop().await.unwrap();
    }
}
