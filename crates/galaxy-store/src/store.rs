//! Store — environments, pools, apps and their configs over a [`Backend`].
//!
//! There is no transaction or lock anywhere in here. Every write is safe to
//! repeat, reads heal what a half-finished multi-step write left behind,
//! and concurrent config writes resolve last-write-wins.

use std::collections::BTreeSet;
use std::sync::Arc;

use galaxy_core::validate_name;
use tracing::{debug, info, warn};

use crate::app_config::AppConfig;
use crate::backend::Backend;
use crate::backup::Backup;
use crate::changes::{ChangeKind, ChangeNotice, ChangeWatcher};
use crate::error::StoreResult;
use crate::keys;

/// Shared handle to the configuration store. Cheap to clone.
#[derive(Clone)]
pub struct Store {
    backend: Arc<dyn Backend>,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").finish_non_exhaustive()
    }
}

impl Store {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    fn publish(&self, notice: ChangeNotice) -> StoreResult<usize> {
        let channel = keys::changes_channel(&notice.env);
        let reached = self.backend.notify(&channel, &notice.encode()?)?;
        debug!(%channel, kind = ?notice.kind, reached, "change published");
        Ok(reached)
    }

    // ── Apps ───────────────────────────────────────────────────────

    pub fn app_exists(&self, app: &str, env: &str) -> StoreResult<bool> {
        validate_name("app", app)?;
        validate_name("env", env)?;
        Ok(!self.backend.get_all(&keys::app_key(env, app))?.is_empty())
    }

    /// Persist an empty config for `app`. Returns false when it already
    /// exists, leaving the stored config untouched.
    pub fn create_app(&self, app: &str, env: &str) -> StoreResult<bool> {
        if self.app_exists(app, env)? {
            debug!(%env, %app, "app already exists");
            return Ok(false);
        }
        let config = AppConfig::new(app, "");
        self.backend
            .set_multi(&keys::app_key(env, app), &config.to_fields()?)?;
        info!(%env, %app, "app created");
        self.publish(ChangeNotice::app(env, app, ChangeKind::AppCreated).with_id(config.id()))?;
        Ok(true)
    }

    /// Remove `app` and every pool assignment it has in `env`. Returns
    /// whether the config existed. Assignments are swept even when it did
    /// not, which clears members left behind by an interrupted delete.
    pub fn delete_app(&self, app: &str, env: &str) -> StoreResult<bool> {
        validate_name("app", app)?;
        validate_name("env", env)?;
        let existed = self.backend.delete(&keys::app_key(env, app))?;

        let mut unassigned = 0;
        for pool in self.list_pools(env)? {
            if self.backend.remove_member(&keys::pool_key(env, &pool), app)? {
                unassigned += 1;
                if !existed {
                    warn!(%env, %pool, %app, "removed orphaned pool member");
                }
            }
        }

        if existed {
            info!(%env, %app, unassigned, "app deleted");
        }
        if existed || unassigned > 0 {
            self.publish(ChangeNotice::app(env, app, ChangeKind::AppDeleted))?;
        }
        Ok(existed)
    }

    pub fn get_app(&self, app: &str, env: &str) -> StoreResult<Option<AppConfig>> {
        validate_name("app", app)?;
        validate_name("env", env)?;
        let fields = self.backend.get_all(&keys::app_key(env, app))?;
        if fields.is_empty() {
            return Ok(None);
        }
        AppConfig::from_fields(&fields).map(Some)
    }

    /// Write `config` in one multi-field operation and publish an update.
    /// Last write wins.
    pub fn set_app(&self, config: &AppConfig, env: &str) -> StoreResult<()> {
        validate_name("app", config.name())?;
        validate_name("env", env)?;
        self.backend
            .set_multi(&keys::app_key(env, config.name()), &config.to_fields()?)?;
        debug!(
            %env,
            app = %config.name(),
            id = config.id(),
            digest = %config.digest(),
            "app config stored"
        );
        self.publish(
            ChangeNotice::app(env, config.name(), ChangeKind::AppUpdated).with_id(config.id()),
        )?;
        Ok(())
    }

    /// Read, apply `update`, write back. `None` when the app does not exist.
    pub fn update_app<F>(&self, app: &str, env: &str, update: F) -> StoreResult<Option<AppConfig>>
    where
        F: FnOnce(&mut AppConfig),
    {
        let Some(mut config) = self.get_app(app, env)? else {
            return Ok(None);
        };
        update(&mut config);
        self.set_app(&config, env)?;
        Ok(Some(config))
    }

    /// Every app config in `env`, sorted by name.
    pub fn list_apps(&self, env: &str) -> StoreResult<Vec<AppConfig>> {
        validate_name("env", env)?;
        let mut apps = Vec::new();
        for key in self.backend.keys(&keys::app_pattern(env))? {
            let Some(name) = keys::name_of(&key) else {
                continue;
            };
            // Deleted since the scan.
            if let Some(config) = self.get_app(name, env)? {
                apps.push(config);
            }
        }
        apps.sort_by(|a, b| a.name().cmp(b.name()));
        Ok(apps)
    }

    /// Ask running instances of `app` to restart without changing its config.
    pub fn notify_restart(&self, app: &str, env: &str) -> StoreResult<usize> {
        validate_name("app", app)?;
        validate_name("env", env)?;
        info!(%env, %app, "restart requested");
        self.publish(ChangeNotice::app(env, app, ChangeKind::Restart))
    }

    /// Subscribe to change notices for `env`.
    pub fn watch(&self, env: &str) -> StoreResult<ChangeWatcher> {
        validate_name("env", env)?;
        let subscription = self.backend.subscribe(&keys::changes_channel(env))?;
        Ok(ChangeWatcher::new(subscription))
    }

    // ── Backup ─────────────────────────────────────────────────────

    /// Snapshot the named apps, or every app when `apps` is empty.
    /// Names that do not exist are skipped.
    pub fn backup(&self, env: &str, apps: &[String]) -> StoreResult<Backup> {
        let configs = if apps.is_empty() {
            self.list_apps(env)?
        } else {
            let mut configs = Vec::with_capacity(apps.len());
            for app in apps {
                match self.get_app(app, env)? {
                    Some(config) => configs.push(config),
                    None => warn!(%env, %app, "app not found, skipping backup"),
                }
            }
            configs
        };
        info!(%env, apps = configs.len(), "backup taken");
        Ok(Backup::new(env, configs))
    }

    /// Write the configs in `backup` into `env`. Existing apps are skipped
    /// unless `force`, in which case the restored config is given a revision
    /// past the stored one. Returns the names written.
    pub fn restore(&self, env: &str, backup: &Backup, force: bool) -> StoreResult<Vec<String>> {
        validate_name("env", env)?;
        let mut restored = Vec::new();
        for config in &backup.apps {
            let mut config = config.clone();
            if let Some(existing) = self.get_app(config.name(), env)? {
                if !force {
                    info!(%env, app = %config.name(), "app exists, not restoring");
                    continue;
                }
                config.advance_revision_past(existing.revision());
            }
            self.set_app(&config, env)?;
            info!(%env, app = %config.name(), id = config.id(), "app restored");
            restored.push(config.name().to_string());
        }
        Ok(restored)
    }

    // ── Pools ──────────────────────────────────────────────────────

    /// Mark `pool` created. Returns false, without writing, when it was
    /// already created or already has assigned apps.
    pub fn create_pool(&self, pool: &str, env: &str) -> StoreResult<bool> {
        validate_name("pool", pool)?;
        validate_name("env", env)?;
        if !self.backend.members(&keys::pool_key(env, pool))?.is_empty() {
            debug!(%env, %pool, "pool already has members");
            return Ok(false);
        }
        let created = self.backend.add_member(&keys::pools_key(env), pool)?;
        if created {
            info!(%env, %pool, "pool created");
            self.publish(ChangeNotice::pool(env, pool, ChangeKind::PoolCreated))?;
        }
        Ok(created)
    }

    /// Delete `pool` if nothing is assigned to it. Returns false, leaving
    /// the pool as it is, while any app is still assigned.
    pub fn delete_pool(&self, pool: &str, env: &str) -> StoreResult<bool> {
        validate_name("pool", pool)?;
        validate_name("env", env)?;
        let pool_key = keys::pool_key(env, pool);
        let assigned = self.backend.members(&pool_key)?;
        if !assigned.is_empty() {
            info!(%env, %pool, assigned = assigned.len(), "pool still has assigned apps");
            return Ok(false);
        }
        // The member set is already empty; deleting its key could only drop
        // an assignment made after the check.
        let removed = self.backend.remove_member(&keys::pools_key(env), pool)?;
        if removed {
            info!(%env, %pool, "pool deleted");
            self.publish(ChangeNotice::pool(env, pool, ChangeKind::PoolDeleted))?;
        }
        Ok(true)
    }

    /// Assign `app` to `pool`. The app is expected to exist. Returns false
    /// when it was already assigned.
    pub fn assign(&self, app: &str, env: &str, pool: &str) -> StoreResult<bool> {
        validate_name("app", app)?;
        validate_name("env", env)?;
        validate_name("pool", pool)?;
        let added = self.backend.add_member(&keys::pool_key(env, pool), app)?;
        if added {
            info!(%env, %pool, %app, "app assigned");
            self.publish(ChangeNotice::app(env, app, ChangeKind::Assigned).with_pool(pool))?;
        }
        Ok(added)
    }

    /// Remove `app` from `pool`. Returns false when it was not assigned.
    pub fn unassign(&self, app: &str, env: &str, pool: &str) -> StoreResult<bool> {
        validate_name("app", app)?;
        validate_name("env", env)?;
        validate_name("pool", pool)?;
        let removed = self.backend.remove_member(&keys::pool_key(env, pool), app)?;
        if removed {
            info!(%env, %pool, %app, "app unassigned");
            self.publish(ChangeNotice::app(env, app, ChangeKind::Unassigned).with_pool(pool))?;
        }
        Ok(removed)
    }

    // ── Listing ────────────────────────────────────────────────────

    /// Every environment with a pool or an app, sorted.
    pub fn list_envs(&self) -> StoreResult<Vec<String>> {
        let mut envs = BTreeSet::new();
        for pattern in [
            format!("{}:*", keys::POOLS_PREFIX),
            format!("{}:*:*", keys::POOL_PREFIX),
            format!("{}:*:*", keys::APP_PREFIX),
        ] {
            for key in self.backend.keys(&pattern)? {
                if let Some(env) = keys::env_of(&key) {
                    envs.insert(env.to_string());
                }
            }
        }
        Ok(envs.into_iter().collect())
    }

    /// Created pools plus pools that have members, sorted.
    pub fn list_pools(&self, env: &str) -> StoreResult<Vec<String>> {
        validate_name("env", env)?;
        let mut pools: BTreeSet<String> = self
            .backend
            .members(&keys::pools_key(env))?
            .into_iter()
            .collect();
        for key in self.backend.keys(&keys::pool_pattern(env))? {
            if let Some(pool) = keys::name_of(&key) {
                pools.insert(pool.to_string());
            }
        }
        Ok(pools.into_iter().collect())
    }

    /// Apps assigned to `pool`, sorted.
    pub fn list_assignments(&self, env: &str, pool: &str) -> StoreResult<Vec<String>> {
        validate_name("env", env)?;
        validate_name("pool", pool)?;
        let mut apps = self.backend.members(&keys::pool_key(env, pool))?;
        apps.sort();
        Ok(apps)
    }

    /// Pools in `env` that `app` is assigned to, sorted.
    pub fn list_assignments_for_app(&self, app: &str, env: &str) -> StoreResult<Vec<String>> {
        validate_name("app", app)?;
        let mut pools = Vec::new();
        for pool in self.list_pools(env)? {
            if self.list_assignments(env, &pool)?.iter().any(|a| a == app) {
                pools.push(pool);
            }
        }
        Ok(pools)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::error::StoreError;

    fn store() -> Store {
        Store::new(Arc::new(MemoryBackend::new()))
    }

    #[test]
    fn create_is_idempotent() {
        let store = store();
        assert!(store.create_app("foo", "prod").unwrap());
        store
            .update_app("foo", "prod", |c| c.set_version("img:1"))
            .unwrap();

        assert!(!store.create_app("foo", "prod").unwrap());
        let config = store.get_app("foo", "prod").unwrap().unwrap();
        assert_eq!(config.version(), "img:1");
    }

    #[test]
    fn get_missing_app_is_none() {
        let store = store();
        assert!(store.get_app("nope", "prod").unwrap().is_none());
        assert!(store.update_app("nope", "prod", |c| c.set_version("x")).unwrap().is_none());
        assert!(!store.app_exists("nope", "prod").unwrap());
    }

    #[test]
    fn set_app_round_trips() {
        let store = store();
        let mut config = AppConfig::new("foo", "registry.foo.com/foobar:abc234");
        config.env_set("PORT", "8080");
        store.set_app(&config, "prod").unwrap();

        let stored = store.get_app("foo", "prod").unwrap().unwrap();
        assert_eq!(stored, config);
        assert_eq!(stored.container_name(), config.container_name());
    }

    #[test]
    fn update_advances_id() {
        let store = store();
        store.create_app("foo", "prod").unwrap();
        let before = store.get_app("foo", "prod").unwrap().unwrap().id();

        let after = store
            .update_app("foo", "prod", |c| c.env_set("A", "1"))
            .unwrap()
            .unwrap()
            .id();
        assert!(after > before);
        assert_eq!(store.get_app("foo", "prod").unwrap().unwrap().id(), after);
    }

    #[test]
    fn list_apps_sorted() {
        let store = store();
        for app in ["zeta", "alpha", "mid"] {
            store.create_app(app, "prod").unwrap();
        }
        store.create_app("other", "staging").unwrap();

        let names: Vec<_> = store
            .list_apps("prod")
            .unwrap()
            .iter()
            .map(|c| c.name().to_string())
            .collect();
        assert_eq!(names, ["alpha", "mid", "zeta"]);
    }

    #[test]
    fn invalid_names_are_rejected() {
        let store = store();
        assert!(matches!(
            store.create_app("a:b", "prod"),
            Err(StoreError::InvalidName(_))
        ));
        assert!(matches!(
            store.create_pool("web", "pr od"),
            Err(StoreError::InvalidName(_))
        ));
        assert!(matches!(store.list_pools("*"), Err(StoreError::InvalidName(_))));
    }

    #[test]
    fn pools_listed_from_both_sources() {
        let store = store();
        store.create_pool("web", "prod").unwrap();
        store.create_app("foo", "prod").unwrap();
        // Assigned without an explicit create.
        store.assign("foo", "prod", "worker").unwrap();

        assert_eq!(store.list_pools("prod").unwrap(), ["web", "worker"]);
        assert!(!store.create_pool("worker", "prod").unwrap());
    }

    #[test]
    fn delete_unknown_pool_is_true() {
        assert!(store().delete_pool("ghost", "prod").unwrap());
    }

    #[test]
    fn assign_and_unassign_report_change() {
        let store = store();
        store.create_app("foo", "prod").unwrap();
        assert!(store.assign("foo", "prod", "web").unwrap());
        assert!(!store.assign("foo", "prod", "web").unwrap());
        assert_eq!(store.list_assignments_for_app("foo", "prod").unwrap(), ["web"]);

        assert!(store.unassign("foo", "prod", "web").unwrap());
        assert!(!store.unassign("foo", "prod", "web").unwrap());
        assert!(store.list_assignments("prod", "web").unwrap().is_empty());
    }

    #[test]
    fn list_envs_unions_every_source() {
        let store = store();
        store.create_app("foo", "prod").unwrap();
        store.create_pool("web", "staging").unwrap();
        store.assign("bar", "dev", "web").unwrap();

        assert_eq!(store.list_envs().unwrap(), ["dev", "prod", "staging"]);
    }

    #[test]
    fn delete_sweeps_orphaned_members() {
        let store = store();
        // An assignment whose app config is already gone.
        store.assign("ghost", "prod", "web").unwrap();

        assert!(!store.delete_app("ghost", "prod").unwrap());
        assert!(store.list_assignments("prod", "web").unwrap().is_empty());
    }

    #[test]
    fn mutations_publish_changes() {
        let store = store();
        let mut watcher = store.watch("prod").unwrap();

        store.create_app("foo", "prod").unwrap();
        store.create_pool("web", "prod").unwrap();
        store.assign("foo", "prod", "web").unwrap();
        store.notify_restart("foo", "prod").unwrap();

        let kinds: Vec<_> = std::iter::from_fn(|| watcher.try_next())
            .map(|n| n.kind)
            .collect();
        assert_eq!(
            kinds,
            [
                ChangeKind::AppCreated,
                ChangeKind::PoolCreated,
                ChangeKind::Assigned,
                ChangeKind::Restart
            ]
        );
    }

    #[test]
    fn no_op_writes_stay_quiet() {
        let store = store();
        store.create_app("foo", "prod").unwrap();
        let mut watcher = store.watch("prod").unwrap();

        store.create_app("foo", "prod").unwrap();
        store.unassign("foo", "prod", "web").unwrap();
        store.delete_pool("web", "prod").unwrap();
        assert!(watcher.try_next().is_none());
    }

    #[test]
    fn set_app_notifies_even_when_unchanged() {
        let store = store();
        let config = AppConfig::new("foo", "img:1");
        store.set_app(&config, "prod").unwrap();
        let mut watcher = store.watch("prod").unwrap();

        store.set_app(&config, "prod").unwrap();
        let notice = watcher.try_next().unwrap();
        assert_eq!(notice.kind, ChangeKind::AppUpdated);
        assert_eq!(notice.id, Some(config.id()));
    }
}
