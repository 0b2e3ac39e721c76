//! `galaxy pool*` — pools and app assignment.

use super::{Context, format_table};

pub fn list(ctx: &Context) -> anyhow::Result<()> {
    let mut rows = Vec::new();
    for env in ctx.envs()? {
        for pool in ctx.store.list_pools(&env)? {
            let apps = ctx.store.list_assignments(&env, &pool)?;
            rows.push(vec![env.clone(), pool, apps.join(",")]);
        }
    }
    println!("{}", format_table(&["ENV", "POOL", "APPS"], &rows));
    Ok(())
}

pub fn create(ctx: &Context) -> anyhow::Result<()> {
    let (env, pool) = (ctx.env()?, ctx.pool()?);
    if ctx.store.create_pool(pool, env)? {
        println!("Created pool {pool} in {env}.");
    } else {
        println!("Pool {pool} already exists in {env}.");
    }
    Ok(())
}

pub fn delete(ctx: &Context) -> anyhow::Result<()> {
    let (env, pool) = (ctx.env()?, ctx.pool()?);
    if ctx.store.delete_pool(pool, env)? {
        println!("Deleted pool {pool} from {env}.");
    } else {
        let apps = ctx.store.list_assignments(env, pool)?;
        anyhow::bail!(
            "pool {pool} in {env} still has apps assigned ({}); unassign them first",
            apps.join(", ")
        );
    }
    Ok(())
}

pub fn assign(ctx: &Context, app: &str) -> anyhow::Result<()> {
    let env = ctx.ensure_app(app)?;
    let pool = ctx.pool()?;
    if ctx.store.assign(app, env, pool)? {
        println!("Assigned {app} to {pool} in {env}.");
    } else {
        println!("{app} is already assigned to {pool} in {env}.");
    }
    Ok(())
}

pub fn unassign(ctx: &Context, app: &str) -> anyhow::Result<()> {
    let (env, pool) = (ctx.env()?, ctx.pool()?);
    if ctx.store.unassign(app, env, pool)? {
        println!("Unassigned {app} from {pool} in {env}.");
    } else {
        println!("{app} is not assigned to {pool} in {env}.");
    }
    Ok(())
}
