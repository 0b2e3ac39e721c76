//! Backend key layout owned by the store.
//!
//! Keys are `:`-separated and always start with a type prefix followed by the
//! environment, so a glob such as `app:prod:*` stays inside one environment.
//!
//! | key                  | type | contents                      |
//! |----------------------|------|-------------------------------|
//! | `app:{env}:{app}`    | hash | [`crate::AppConfig`] fields   |
//! | `pools:{env}`        | set  | explicitly created pool names |
//! | `pool:{env}:{pool}`  | set  | app names assigned to a pool  |
//!
//! Change notifications are published on `changes:{env}`.

pub const APP_PREFIX: &str = "app";
pub const POOLS_PREFIX: &str = "pools";
pub const POOL_PREFIX: &str = "pool";
pub const CHANGES_PREFIX: &str = "changes";

pub fn app_key(env: &str, app: &str) -> String {
    format!("{APP_PREFIX}:{env}:{app}")
}

/// Glob over every app config key in `env`.
pub fn app_pattern(env: &str) -> String {
    format!("{APP_PREFIX}:{env}:*")
}

pub fn pools_key(env: &str) -> String {
    format!("{POOLS_PREFIX}:{env}")
}

pub fn pool_key(env: &str, pool: &str) -> String {
    format!("{POOL_PREFIX}:{env}:{pool}")
}

/// Glob over every pool assignment set in `env`.
pub fn pool_pattern(env: &str) -> String {
    format!("{POOL_PREFIX}:{env}:*")
}

pub fn changes_channel(env: &str) -> String {
    format!("{CHANGES_PREFIX}:{env}")
}

/// Environment segment of any store key (`app:prod:web` → `prod`).
pub fn env_of(key: &str) -> Option<&str> {
    let mut parts = key.splitn(3, ':');
    parts.next()?;
    parts.next().filter(|env| !env.is_empty())
}

/// Trailing name segment of a three-part key (`pool:prod:web` → `web`).
pub fn name_of(key: &str) -> Option<&str> {
    let mut parts = key.splitn(3, ':');
    parts.next()?;
    parts.next()?;
    parts.next().filter(|name| !name.is_empty())
}
