use crate::output::{fmt_time, print_json};
use anyhow::Context;
use pressmill_core::config::Config;
use std::path::Path;

pub fn run(root: &Path, json: bool) -> anyhow::Result<()> {
    Config::load(root).context("failed to load config")?;
    let store = super::open_store(root)?;
    let previous = store.force_unlock().context("failed to clear lock")?;

    if json {
        return print_json(&serde_json::json!({ "released": previous }));
    }
    match previous {
        Some(owner) => println!(
            "Released lock held by run {} (pid {}) since {}.",
            owner.run_id,
            owner.pid,
            fmt_time(owner.acquired_at)
        ),
        None => println!("No lock held."),
    }
    Ok(())
}
