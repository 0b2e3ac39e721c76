//! galaxy — manage apps, pools and configuration across environments.
//!
//! # Usage
//!
//! ```text
//! galaxy --env prod app:create api
//! galaxy --env prod app:deploy api registry.example.com/api:1.4.2
//! galaxy --env prod --pool web pool:assign api
//! galaxy --env prod --pool web status
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use galaxy_core::GalaxyConfig;

mod commands;

use commands::Context;

#[derive(Parser)]
#[command(
    name = "galaxy",
    about = "Galaxy — deploy containers to pools of hosts",
    version,
    propagate_version = true
)]
struct Cli {
    /// Address (host:port[,host:port,..]) of the shared registry store.
    #[arg(long, global = true)]
    registry: Option<String>,

    /// Environment to operate on.
    #[arg(long, global = true)]
    env: Option<String>,

    /// Pool to operate on.
    #[arg(long, global = true)]
    pool: Option<String>,

    /// Path to galaxy.toml (default: ~/.galaxy/galaxy.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List apps.
    #[command(name = "app")]
    App,

    /// Create an app.
    #[command(name = "app:create")]
    AppCreate { app: String },

    /// Delete an app and its pool assignments.
    #[command(name = "app:delete")]
    AppDelete { app: String },

    /// Deploy a new image version of an app.
    #[command(name = "app:deploy")]
    AppDeploy {
        app: String,
        #[arg(id = "image", value_name = "VERSION")]
        version: String,
    },

    /// Ask running instances of an app to restart.
    #[command(name = "app:restart")]
    AppRestart { app: String },

    /// Write app configs as JSON (all apps when none are named).
    #[command(name = "app:backup")]
    AppBackup {
        apps: Vec<String>,
        /// Output file (default: stdout).
        #[arg(long)]
        file: Option<PathBuf>,
    },

    /// Restore app configs from a backup (all apps when none are named).
    #[command(name = "app:restore")]
    AppRestore {
        apps: Vec<String>,
        /// Input file (default: stdin).
        #[arg(long)]
        file: Option<PathBuf>,
        /// Overwrite apps that already exist.
        #[arg(long)]
        force: bool,
    },

    /// List an app's environment variables.
    #[command(name = "config")]
    Config { app: String },

    /// Print selected environment variables.
    #[command(name = "config:get")]
    ConfigGet {
        app: String,
        #[arg(required = true)]
        keys: Vec<String>,
    },

    /// Set environment variables (KEY=VALUE).
    #[command(name = "config:set")]
    ConfigSet {
        app: String,
        #[arg(required = true)]
        pairs: Vec<String>,
    },

    /// Remove environment variables.
    #[command(name = "config:unset")]
    ConfigUnset {
        app: String,
        #[arg(required = true)]
        keys: Vec<String>,
    },

    /// List pools and their assigned apps.
    #[command(name = "pool")]
    Pool,

    /// Create the selected pool.
    #[command(name = "pool:create")]
    PoolCreate,

    /// Delete the selected pool. Refused while apps are assigned.
    #[command(name = "pool:delete")]
    PoolDelete,

    /// Assign an app to the selected pool.
    #[command(name = "pool:assign")]
    PoolAssign { app: String },

    /// Remove an app from the selected pool.
    #[command(name = "pool:unassign")]
    PoolUnassign { app: String },

    /// Show registered containers in the selected pool.
    #[command(name = "status")]
    Status {
        /// Look up only these container ids.
        containers: Vec<String>,
    },

    /// Print change notices for the selected environment as they arrive.
    #[command(name = "watch")]
    Watch,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("galaxy=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = GalaxyConfig::load(cli.config.as_deref())?;
    if let Some(registry) = cli.registry {
        config.registry = registry;
    }
    if cli.env.is_some() {
        config.env = cli.env;
    }
    if cli.pool.is_some() {
        config.pool = cli.pool;
    }
    config.validate()?;

    let ctx = Context::connect(config);

    match cli.command {
        Commands::App => commands::app::list(&ctx),
        Commands::AppCreate { app } => commands::app::create(&ctx, &app),
        Commands::AppDelete { app } => commands::app::delete(&ctx, &app),
        Commands::AppDeploy { app, version } => commands::app::deploy(&ctx, &app, &version),
        Commands::AppRestart { app } => commands::app::restart(&ctx, &app),
        Commands::AppBackup { apps, file } => commands::app::backup(&ctx, &apps, file.as_deref()),
        Commands::AppRestore { apps, file, force } => {
            commands::app::restore(&ctx, &apps, file.as_deref(), force)
        }
        Commands::Config { app } => commands::config::list(&ctx, &app),
        Commands::ConfigGet { app, keys } => commands::config::get(&ctx, &app, &keys),
        Commands::ConfigSet { app, pairs } => commands::config::set(&ctx, &app, &pairs),
        Commands::ConfigUnset { app, keys } => commands::config::unset(&ctx, &app, &keys),
        Commands::Pool => commands::pool::list(&ctx),
        Commands::PoolCreate => commands::pool::create(&ctx),
        Commands::PoolDelete => commands::pool::delete(&ctx),
        Commands::PoolAssign { app } => commands::pool::assign(&ctx, &app),
        Commands::PoolUnassign { app } => commands::pool::unassign(&ctx, &app),
        Commands::Status { containers } => commands::status::status(&ctx, &containers),
        Commands::Watch => commands::status::watch(&ctx),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn colon_subcommands_parse() {
        let cli = Cli::try_parse_from([
            "galaxy", "--env", "prod", "config:set", "api", "A=1", "B=2",
        ])
        .unwrap();
        assert_eq!(cli.env.as_deref(), Some("prod"));
        match cli.command {
            Commands::ConfigSet { app, pairs } => {
                assert_eq!(app, "api");
                assert_eq!(pairs, ["A=1", "B=2"]);
            }
            _ => panic!("wrong subcommand"),
        }
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["galaxy", "status", "--pool", "web", "abc123"]).unwrap();
        assert_eq!(cli.pool.as_deref(), Some("web"));
        assert!(matches!(cli.command, Commands::Status { containers } if containers == ["abc123"]));
    }

    #[test]
    fn restore_flags() {
        let cli = Cli::try_parse_from(["galaxy", "app:restore", "--file", "b.json", "--force"])
            .unwrap();
        match cli.command {
            Commands::AppRestore { apps, file, force } => {
                assert!(apps.is_empty());
                assert_eq!(file, Some(PathBuf::from("b.json")));
                assert!(force);
            }
            _ => panic!("wrong subcommand"),
        }
    }
}
