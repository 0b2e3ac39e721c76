//! galaxy-core — shared pieces used by every Galaxy crate.
//!
//! - [`GalaxyConfig`]: client configuration read from `galaxy.toml` and
//!   `GALAXY_*` environment variables.
//! - [`names`]: validation for environment, pool and app names, which are
//!   embedded verbatim into backend keys.

pub mod config;
pub mod names;

pub use config::{ConfigError, ConfigResult, GalaxyConfig};
pub use names::{NameError, validate_name};
