use crate::output::print_json;
use anyhow::Context;
use chrono::Utc;
use pressmill_core::scheduler::Maintainer;
use std::path::Path;

pub fn run(root: &Path, json: bool) -> anyhow::Result<()> {
    let config = super::load_config(root)?;
    let store = super::open_store(root)?;
    let maintainer = Maintainer::new(root, &config, &store).context("failed to set up publisher")?;

    let report = maintainer.repair(Utc::now()).context("repair failed")?;

    if json {
        return print_json(&report);
    }
    if report.is_clean() {
        println!("Site is consistent with the ledger. Index rebuilt.");
        return Ok(());
    }
    for slug in &report.restored {
        println!("  restored:      {slug}");
    }
    for file in &report.orphans_removed {
        println!("  removed:       {file}");
    }
    for slug in &report.unrecoverable {
        println!("  unrecoverable: {slug} (no stored article; left out of the index)");
    }
    Ok(())
}
