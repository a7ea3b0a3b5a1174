use crate::output::{fmt_opt_time, fmt_time, print_json};
use anyhow::Context;
use chrono::{DateTime, Utc};
use pressmill_core::{
    config::Config,
    rotator,
    state::{is_due, LockOwner},
    types::PostStatus,
};
use serde::Serialize;
use std::path::Path;

#[derive(Serialize)]
struct LockView<'a> {
    #[serde(flatten)]
    owner: &'a LockOwner,
    stale: bool,
}

#[derive(Serialize)]
struct StatusOutput<'a> {
    site: &'a str,
    last_post_at: Option<DateTime<Utc>>,
    next_due_at: Option<DateTime<Utc>>,
    due_now: bool,
    rotation_cursor: usize,
    next_product: Option<&'a str>,
    portfolio_size: usize,
    lock: Option<LockView<'a>>,
    published: usize,
    failed: usize,
    withdrawn: usize,
}

pub fn run(root: &Path, json: bool) -> anyhow::Result<()> {
    let config = Config::load(root).context("failed to load config")?;
    let store = super::open_store(root)?;
    let state = store.run_state().context("failed to read run state")?;
    let ledger = store.ledger().context("failed to read ledger")?;
    let now = Utc::now();

    let count = |status: PostStatus| ledger.iter().filter(|r| r.status == status).count();
    let cursor = state.cursor_for(config.portfolio.len());
    let next_product = rotator::next(&config.portfolio, cursor)
        .ok()
        .map(|(p, _)| p.name.as_str());

    let out = StatusOutput {
        site: &config.site.name,
        last_post_at: state.last_post_at,
        next_due_at: state.next_due_at(config.posting.interval()),
        due_now: is_due(&state, &ledger, &config.posting, now),
        rotation_cursor: cursor,
        next_product,
        portfolio_size: config.portfolio.len(),
        lock: state.lock_owner.as_ref().map(|owner| LockView {
            owner,
            stale: owner.is_stale(now, config.posting.stale_lock_timeout()),
        }),
        published: count(PostStatus::Published),
        failed: count(PostStatus::Failed),
        withdrawn: count(PostStatus::Withdrawn),
    };

    if json {
        return print_json(&out);
    }

    println!("Site:        {}", out.site);
    println!("Last post:   {}", fmt_opt_time(out.last_post_at));
    let next_due = match out.next_due_at {
        Some(_) if out.due_now => "now".to_string(),
        Some(t) => fmt_time(t),
        None => "now (nothing published yet)".to_string(),
    };
    println!("Next due:    {next_due}");
    match out.next_product {
        Some(name) => println!(
            "Next topic:  {name} ({}/{})",
            out.rotation_cursor + 1,
            out.portfolio_size
        ),
        None => println!("Next topic:  (portfolio is empty)"),
    }
    match &out.lock {
        Some(lock) => println!(
            "Lock:        held by run {} (pid {}) since {}{}",
            lock.owner.run_id,
            lock.owner.pid,
            fmt_time(lock.owner.acquired_at),
            if lock.stale { " [stale]" } else { "" }
        ),
        None => println!("Lock:        free"),
    }
    println!(
        "Posts:       {} published, {} failed, {} withdrawn",
        out.published, out.failed, out.withdrawn
    );
    Ok(())
}
