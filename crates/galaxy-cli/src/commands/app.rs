//! `galaxy app*` — create, deploy, restart and back up apps.

use std::io::Read;
use std::path::Path;

use anyhow::{Context as _, bail};
use galaxy_store::Backup;

use super::{Context, format_table};

pub fn list(ctx: &Context) -> anyhow::Result<()> {
    let mut rows = Vec::new();
    for env in ctx.envs()? {
        for config in ctx.store.list_apps(&env)? {
            let pools = ctx.store.list_assignments_for_app(config.name(), &env)?;
            rows.push(vec![
                config.name().to_string(),
                env.clone(),
                pools.join(","),
                config.version().to_string(),
                config.id().to_string(),
            ]);
        }
    }
    println!(
        "{}",
        format_table(&["NAME", "ENV", "POOLS", "VERSION", "ID"], &rows)
    );
    Ok(())
}

pub fn create(ctx: &Context, app: &str) -> anyhow::Result<()> {
    let env = ctx.env()?;
    if ctx.store.create_app(app, env)? {
        println!("Created {app} in {env}.");
    } else {
        println!("{app} already exists in {env}.");
    }
    Ok(())
}

pub fn delete(ctx: &Context, app: &str) -> anyhow::Result<()> {
    let env = ctx.env()?;
    // Runs even for a missing app so stale pool assignments are swept.
    if !ctx.store.delete_app(app, env)? {
        bail!("app {app} does not exist in {env}");
    }
    println!("Deleted {app} from {env}.");
    Ok(())
}

pub fn deploy(ctx: &Context, app: &str, version: &str) -> anyhow::Result<()> {
    let env = ctx.ensure_app(app)?;
    if version.trim().is_empty() {
        bail!("no version given for {app}");
    }
    let config = ctx
        .store
        .update_app(app, env, |config| config.set_version(version))?
        .with_context(|| format!("{app} was deleted while deploying"))?;
    println!(
        "Deployed {app} {version} to {env} as {}.",
        config.container_name()
    );
    Ok(())
}

pub fn restart(ctx: &Context, app: &str) -> anyhow::Result<()> {
    let env = ctx.ensure_app(app)?;
    let reached = ctx.store.notify_restart(app, env)?;
    println!("Restart of {app} in {env} sent to {reached} listener(s).");
    Ok(())
}

pub fn backup(ctx: &Context, apps: &[String], file: Option<&Path>) -> anyhow::Result<()> {
    let env = ctx.env()?;
    let backup = ctx.store.backup(env, apps)?;
    let json = backup.to_json()?;
    match file {
        Some(path) => {
            std::fs::write(path, json)
                .with_context(|| format!("failed to write {}", path.display()))?;
            eprintln!(
                "Backed up {} app(s) from {env} to {}.",
                backup.apps.len(),
                path.display()
            );
        }
        None => println!("{json}"),
    }
    Ok(())
}

pub fn restore(
    ctx: &Context,
    apps: &[String],
    file: Option<&Path>,
    force: bool,
) -> anyhow::Result<()> {
    let env = ctx.env()?;
    let json = match file {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?,
        None => {
            let mut json = String::new();
            std::io::stdin().read_to_string(&mut json)?;
            json
        }
    };
    let backup = select_apps(Backup::from_json(&json)?, apps)?;
    let restored = ctx.store.restore(env, &backup, force)?;

    for app in &backup.apps {
        if !restored.iter().any(|name| name == app.name()) {
            println!("Skipped {}: already exists in {env} (use --force).", app.name());
        }
    }
    println!("Restored {} app(s) into {env}.", restored.len());
    Ok(())
}

/// Keep only the named apps, failing on names the backup does not hold.
fn select_apps(mut backup: Backup, apps: &[String]) -> anyhow::Result<Backup> {
    if apps.is_empty() {
        return Ok(backup);
    }
    if let Some(missing) = apps.iter().find(|app| backup.app(app).is_none()) {
        bail!("{missing} is not in the backup");
    }
    backup.apps.retain(|config| apps.iter().any(|app| app == config.name()));
    Ok(backup)
}
