//! `galaxy status` and `galaxy watch`.

use chrono::{TimeDelta, Utc};
use galaxy_registry::ServiceRegistration;

use super::{Context, format_table};

const HEADER: [&str; 6] = ["CONTAINER ID", "IMAGE", "EXTERNAL", "INTERNAL", "CREATED", "EXPIRES"];

pub fn status(ctx: &Context, containers: &[String]) -> anyhow::Result<()> {
    let (env, pool) = (ctx.env()?, ctx.pool()?);

    let rows: Vec<Vec<String>> = if containers.is_empty() {
        ctx.registry
            .list_registrations(env, pool)?
            .iter()
            .map(registered_row)
            .collect()
    } else {
        let mut rows = Vec::with_capacity(containers.len());
        for container in containers {
            // Running but untracked containers are listed without registry data.
            let row = match ctx.registry.get_service_registration(env, pool, container)? {
                Some(registration) => registered_row(&registration),
                None => vec![
                    short_id(container),
                    String::new(),
                    String::new(),
                    String::new(),
                    String::new(),
                    String::new(),
                ],
            };
            rows.push(row);
        }
        rows
    };

    println!("{}", format_table(&HEADER, &rows));
    Ok(())
}

fn registered_row(registration: &ServiceRegistration) -> Vec<String> {
    let now = Utc::now();
    vec![
        short_id(&registration.container_id),
        registration.image.clone(),
        registration.external_addr(),
        registration.internal_addr(),
        format!("{} ago", human_duration(now - registration.started_at)),
        registration
            .expires
            .map(|at| format!("In {}", human_duration(at - now)))
            .unwrap_or_default(),
    ]
}

fn short_id(id: &str) -> String {
    id.chars().take(12).collect()
}

/// Largest whole unit: `45s`, `3m`, `2h`, `4d`.
fn human_duration(delta: TimeDelta) -> String {
    let secs = delta.num_seconds().max(0);
    match secs {
        0..60 => format!("{secs}s"),
        60..3600 => format!("{}m", secs / 60),
        3600..86400 => format!("{}h", secs / 3600),
        _ => format!("{}d", secs / 86400),
    }
}

/// Print change notices until interrupted.
pub fn watch(ctx: &Context) -> anyhow::Result<()> {
    let env = ctx.env()?;
    let mut watcher = ctx.store.watch(env)?;
    eprintln!("Watching {} (Ctrl-C to stop)", watcher.channel());

    while let Some(notice) = watcher.blocking_next() {
        let subject = match (&notice.app, &notice.pool) {
            (Some(app), Some(pool)) => format!("{app} @ {pool}"),
            (Some(app), None) => app.clone(),
            (None, Some(pool)) => pool.clone(),
            (None, None) => String::new(),
        };
        let id = notice.id.map(|id| format!(" id={id}")).unwrap_or_default();
        println!("{} {:?} {subject}{id}", notice.env, notice.kind);
    }
    anyhow::bail!("change subscription for {env} closed")
}
