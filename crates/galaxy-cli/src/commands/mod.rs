pub mod app;
pub mod config;
pub mod pool;
pub mod status;

use std::sync::Arc;

use anyhow::{Context as _, bail};
use galaxy_core::GalaxyConfig;
use galaxy_registry::ServiceRegistry;
use galaxy_store::{Backend, RedisBackend, Store};
use tracing::debug;

/// Everything a command needs: resolved configuration plus store and
/// registry handles over one backend.
pub struct Context {
    pub config: GalaxyConfig,
    pub store: Store,
    pub registry: ServiceRegistry,
}

impl Context {
    /// Build handles over the networked backend. No connection is made
    /// until the first command touches the store.
    pub fn connect(config: GalaxyConfig) -> Self {
        debug!(registry = %config.registry, "using registry");
        let backend = Arc::new(RedisBackend::new(&config.registry, config.timeout()));
        Self::with_backend(config, backend)
    }

    pub fn with_backend(config: GalaxyConfig, backend: Arc<dyn Backend>) -> Self {
        let registry = ServiceRegistry::new(backend.clone(), config.ttl());
        Self {
            store: Store::new(backend),
            registry,
            config,
        }
    }

    pub fn env(&self) -> anyhow::Result<&str> {
        self.config
            .env
            .as_deref()
            .context("no environment selected: pass --env or set GALAXY_ENV")
    }

    pub fn pool(&self) -> anyhow::Result<&str> {
        self.config
            .pool
            .as_deref()
            .context("no pool selected: pass --pool or set GALAXY_POOL")
    }

    /// Environments to list: the selected one, or all of them.
    pub fn envs(&self) -> anyhow::Result<Vec<String>> {
        match &self.config.env {
            Some(env) => Ok(vec![env.clone()]),
            None => Ok(self.store.list_envs()?),
        }
    }

    /// Fail unless `app` exists in the selected environment.
    pub fn ensure_app(&self, app: &str) -> anyhow::Result<&str> {
        let env = self.env()?;
        if !self.store.app_exists(app, env)? {
            bail!("app {app} does not exist in {env}; create it with app:create");
        }
        Ok(env)
    }
}

/// Render rows as left-aligned columns separated by `" | "`.
pub fn format_table(header: &[&str], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = header.iter().map(|h| h.len()).collect();
    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            if let Some(width) = widths.get_mut(i) {
                *width = (*width).max(cell.chars().count());
            }
        }
    }

    let render = |cells: Vec<&str>| {
        cells
            .iter()
            .zip(&widths)
            .map(|(cell, &width)| format!("{cell:<width$}"))
            .collect::<Vec<_>>()
            .join(" | ")
            .trim_end()
            .to_string()
    };

    let mut lines = vec![render(header.to_vec())];
    for row in rows {
        lines.push(render(row.iter().map(String::as_str).collect()));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use galaxy_store::MemoryBackend;

    pub(crate) fn context(env: Option<&str>, pool: Option<&str>) -> Context {
        let config = GalaxyConfig {
            env: env.map(str::to_string),
            pool: pool.map(str::to_string),
            ..GalaxyConfig::default()
        };
        Context::with_backend(config, Arc::new(MemoryBackend::new()))
    }

    #[test]
    fn table_columns_align() {
        let table = format_table(
            &["NAME", "VERSION"],
            &[
                vec!["api".to_string(), "img:1".to_string()],
                vec!["worker-long".to_string(), String::new()],
            ],
        );
        assert_eq!(
            table,
            "NAME        | VERSION\napi         | img:1\nworker-long |"
        );
    }

    #[test]
    fn missing_selection_is_a_clear_error() {
        let ctx = context(None, None);
        assert!(ctx.env().unwrap_err().to_string().contains("--env"));
        assert!(ctx.pool().unwrap_err().to_string().contains("--pool"));
    }

    #[test]
    fn ensure_app_requires_existence() {
        let ctx = context(Some("prod"), None);
        assert!(ctx.ensure_app("api").is_err());
        ctx.store.create_app("api", "prod").unwrap();
        assert_eq!(ctx.ensure_app("api").unwrap(), "prod");
    }
}
