//! `galaxy config*` — an app's environment variables.

use anyhow::{Context as _, bail};

use super::Context;

pub fn list(ctx: &Context, app: &str) -> anyhow::Result<()> {
    let env = ctx.ensure_app(app)?;
    let config = ctx
        .store
        .get_app(app, env)?
        .with_context(|| format!("{app} was deleted while reading"))?;
    for (key, value) in config.env() {
        println!("{key}={value}");
    }
    Ok(())
}

pub fn get(ctx: &Context, app: &str, keys: &[String]) -> anyhow::Result<()> {
    let env = ctx.ensure_app(app)?;
    let config = ctx
        .store
        .get_app(app, env)?
        .with_context(|| format!("{app} was deleted while reading"))?;
    for key in keys {
        if let Some(value) = config.env_get(key) {
            println!("{key}={value}");
        }
    }
    Ok(())
}

pub fn set(ctx: &Context, app: &str, pairs: &[String]) -> anyhow::Result<()> {
    let env = ctx.ensure_app(app)?;
    let parsed = pairs
        .iter()
        .map(String::as_str)
        .map(parse_pair)
        .collect::<anyhow::Result<Vec<_>>>()?;

    let config = ctx
        .store
        .update_app(app, env, |config| {
            for (key, value) in parsed {
                config.env_set(key, value);
            }
        })?
        .with_context(|| format!("{app} was deleted while updating"))?;
    println!("Updated {app} in {env} (id {}).", config.id());
    Ok(())
}

pub fn unset(ctx: &Context, app: &str, keys: &[String]) -> anyhow::Result<()> {
    let env = ctx.ensure_app(app)?;
    let config = ctx
        .store
        .update_app(app, env, |config| {
            for key in keys {
                config.env_unset(key);
            }
        })?
        .with_context(|| format!("{app} was deleted while updating"))?;
    println!("Updated {app} in {env} (id {}).", config.id());
    Ok(())
}

/// Split `KEY=VALUE`. The value may be empty or contain `=`.
fn parse_pair(pair: &str) -> anyhow::Result<(&str, &str)> {
    match pair.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => Ok((key.trim(), value)),
        _ => bail!("expected KEY=VALUE, got {pair:?}"),
    }
}
