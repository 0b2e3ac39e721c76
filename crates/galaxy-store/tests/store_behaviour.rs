//! Store behaviour across processes sharing one backend.
//!
//! Each `Store` built from a clone of the same `MemoryBackend` stands in
//! for a separate CLI invocation or agent.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use galaxy_store::*;

fn shared() -> (MemoryBackend, Store) {
    let backend = MemoryBackend::new();
    let store = Store::new(Arc::new(backend.clone()));
    (backend, store)
}

#[test]
fn app_lifecycle() {
    let (_, store) = shared();

    assert!(!store.app_exists("foo", "prod").unwrap());
    assert!(store.create_app("foo", "prod").unwrap());
    assert!(store.app_exists("foo", "prod").unwrap());

    assert!(store.delete_app("foo", "prod").unwrap());
    assert!(!store.app_exists("foo", "prod").unwrap());

    // Deleting again is a no-op.
    assert!(!store.delete_app("foo", "prod").unwrap());
}

#[test]
fn create_pool_twice() {
    let (_, store) = shared();
    store.create_app("foo", "prod").unwrap();

    assert!(store.create_pool("web", "prod").unwrap());
    store.assign("foo", "prod", "web").unwrap();

    assert!(!store.create_pool("web", "prod").unwrap());
    assert_eq!(store.list_assignments("prod", "web").unwrap(), ["foo"]);
}

#[test]
fn delete_pool_requires_empty() {
    let (_, store) = shared();
    store.create_app("foo", "prod").unwrap();
    store.create_app("bar", "prod").unwrap();
    store.create_pool("web", "prod").unwrap();
    store.assign("foo", "prod", "web").unwrap();
    store.assign("bar", "prod", "web").unwrap();

    assert!(!store.delete_pool("web", "prod").unwrap());
    assert_eq!(store.list_assignments("prod", "web").unwrap(), ["bar", "foo"]);
    assert_eq!(store.list_pools("prod").unwrap(), ["web"]);

    store.unassign("foo", "prod", "web").unwrap();
    store.unassign("bar", "prod", "web").unwrap();
    assert!(store.delete_pool("web", "prod").unwrap());
    assert!(store.list_pools("prod").unwrap().is_empty());
}

#[test]
fn delete_app_leaves_no_orphans() {
    let (_, store) = shared();
    store.create_app("foo", "prod").unwrap();
    store.create_app("bar", "prod").unwrap();
    for pool in ["web", "worker"] {
        store.create_pool(pool, "prod").unwrap();
        store.assign("foo", "prod", pool).unwrap();
    }
    store.assign("bar", "prod", "web").unwrap();

    store.delete_app("foo", "prod").unwrap();

    assert_eq!(store.list_assignments("prod", "web").unwrap(), ["bar"]);
    assert!(store.list_assignments("prod", "worker").unwrap().is_empty());
    assert!(store.list_assignments_for_app("foo", "prod").unwrap().is_empty());
    // Explicitly created pools survive losing their last member.
    assert_eq!(store.list_pools("prod").unwrap(), ["web", "worker"]);
}

#[test]
fn key_patterns_stay_inside_one_env() {
    let (backend, store) = shared();
    store.create_app("foo", "prod").unwrap();
    store.create_app("bar", "prod").unwrap();
    store.create_app("baz", "staging").unwrap();

    let mut keys = backend.keys("app:prod:*").unwrap();
    keys.sort();
    assert_eq!(keys, ["app:prod:bar", "app:prod:foo"]);
}

#[test]
fn envs_are_separate_namespaces() {
    let (_, store) = shared();
    store.create_app("foo", "prod").unwrap();
    store.create_app("foo", "staging").unwrap();
    store
        .update_app("foo", "staging", |c| c.set_version("img:2"))
        .unwrap();

    assert_eq!(store.get_app("foo", "prod").unwrap().unwrap().version(), "");
    assert_eq!(
        store.get_app("foo", "staging").unwrap().unwrap().version(),
        "img:2"
    );
    assert_eq!(store.list_envs().unwrap(), ["prod", "staging"]);
}

#[test]
fn concurrent_writers_last_write_wins() {
    let (backend, a) = shared();
    let b = Store::new(Arc::new(backend));
    a.create_app("foo", "prod").unwrap();

    let mut from_a = a.get_app("foo", "prod").unwrap().unwrap();
    let mut from_b = b.get_app("foo", "prod").unwrap().unwrap();
    from_a.env_set("WRITER", "a");
    from_b.env_set("WRITER", "b");

    a.set_app(&from_a, "prod").unwrap();
    b.set_app(&from_b, "prod").unwrap();

    let stored = a.get_app("foo", "prod").unwrap().unwrap();
    assert_eq!(stored.env_get("WRITER"), Some("b"));
    // Both writes started from the same base and carry the same revision.
    assert_eq!(from_a.revision(), from_b.revision());
}

#[test]
fn backup_and_restore() {
    let (_, store) = shared();
    store.create_app("foo", "prod").unwrap();
    store
        .update_app("foo", "prod", |c| {
            c.set_version("img:1");
            c.env_set("A", "1");
        })
        .unwrap();
    store.create_app("bar", "prod").unwrap();

    let backup = store.backup("prod", &[]).unwrap();
    let json = backup.to_json().unwrap();
    let backup = Backup::from_json(&json).unwrap();
    assert_eq!(backup.apps.len(), 2);

    // Into an empty environment everything is restored.
    let restored = store.restore("staging", &backup, false).unwrap();
    assert_eq!(restored, ["bar", "foo"]);
    assert_eq!(
        store.get_app("foo", "staging").unwrap().unwrap().env_get("A"),
        Some("1")
    );

    // Existing apps are kept unless forced.
    store
        .update_app("foo", "staging", |c| c.set_version("img:9"))
        .unwrap();
    assert!(store.restore("staging", &backup, false).unwrap().is_empty());
    assert_eq!(
        store.get_app("foo", "staging").unwrap().unwrap().version(),
        "img:9"
    );

    let before = store.get_app("foo", "staging").unwrap().unwrap().id();
    store.restore("staging", &backup, true).unwrap();
    let after = store.get_app("foo", "staging").unwrap().unwrap();
    assert_eq!(after.version(), "img:1");
    assert!(after.id() > before);
}

#[test]
fn backup_of_named_apps_skips_missing() {
    let (_, store) = shared();
    store.create_app("foo", "prod").unwrap();
    let backup = store
        .backup("prod", &["foo".to_string(), "ghost".to_string()])
        .unwrap();
    assert_eq!(backup.apps.len(), 1);
    assert!(backup.app("foo").is_some());
}

#[tokio::test]
async fn watcher_sees_changes_from_another_store() {
    let (backend, writer) = shared();
    let reader = Store::new(Arc::new(backend));
    let mut watcher = reader.watch("prod").unwrap();

    writer.create_app("foo", "prod").unwrap();
    let config = writer
        .update_app("foo", "prod", |c| c.set_version("img:1"))
        .unwrap()
        .unwrap();
    // Other environments use other channels.
    writer.create_app("foo", "staging").unwrap();

    let created = tokio::time::timeout(Duration::from_secs(1), watcher.next())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(created.kind, ChangeKind::AppCreated);
    assert_eq!(created.app.as_deref(), Some("foo"));

    let updated = watcher.next().await.unwrap();
    assert_eq!(updated.kind, ChangeKind::AppUpdated);
    assert_eq!(updated.id, Some(config.id()));
    assert!(watcher.try_next().is_none());
}

#[test]
fn watcher_drops_garbage_payloads() {
    let (backend, store) = shared();
    let mut watcher = store.watch("prod").unwrap();

    backend.notify("changes:prod", "not json").unwrap();
    store.notify_restart("foo", "prod").unwrap();

    let notice = watcher.try_next().unwrap();
    assert_eq!(notice.kind, ChangeKind::Restart);
}

/// Assigns `api` to `pool:prod:web` from "another process" right after the
/// first read of that pool's members.
#[derive(Default)]
struct AssignAfterCheck {
    inner: MemoryBackend,
    fired: AtomicBool,
}

impl Backend for AssignAfterCheck {
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
        let members = self.inner.members(key)?;
        if key == "pool:prod:web" && !self.fired.swap(true, Ordering::SeqCst) {
            self.inner.add_member(key, "api")?;
        }
        Ok(members)
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

#[test]
fn delete_pool_keeps_assignment_made_after_its_check() {
    let backend = Arc::new(AssignAfterCheck::default());
    backend.inner.add_member("pools:prod", "web").unwrap();
    let store = Store::new(backend.clone());

    assert!(store.delete_pool("web", "prod").unwrap());
    assert_eq!(store.list_assignments("prod", "web").unwrap(), ["api"]);
}
