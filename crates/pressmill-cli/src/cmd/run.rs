use crate::output::print_json;
use anyhow::Context;
use chrono::Utc;
use pressmill_core::{
    scheduler::{CycleOptions, Scheduler},
    types::{CycleOutcome, SkipReason},
};
use std::path::Path;

// ---------------------------------------------------------------------------
// RunExit: typed non-zero exit codes returned to main
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum RunExit {
    /// The cycle ran but had nothing to do.
    Skipped(SkipReason),
    CycleFailed { product: String },
    /// `config validate` found error-level problems.
    InvalidConfig { errors: usize },
}

impl RunExit {
    pub fn exit_code(&self) -> i32 {
        match self {
            RunExit::CycleFailed { .. } => 1,
            RunExit::InvalidConfig { .. } => 2,
            RunExit::Skipped(_) => 3,
        }
    }
}

impl std::fmt::Display for RunExit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunExit::Skipped(reason) => write!(f, "cycle skipped ({reason})"),
            RunExit::CycleFailed { product } => write!(f, "cycle failed for '{product}'"),
            RunExit::InvalidConfig { errors } => {
                write!(f, "config validation found {errors} error(s)")
            }
        }
    }
}

impl std::error::Error for RunExit {}

// ---------------------------------------------------------------------------
// run
// ---------------------------------------------------------------------------

pub fn run(root: &Path, force: bool, json: bool) -> anyhow::Result<()> {
    let config = super::load_config(root)?;
    let store = super::open_store(root)?;
    let generator = super::build_generator(&config)?;
    let scheduler =
        Scheduler::new(root, &config, &store, &generator).context("failed to set up publisher")?;

    let outcome = scheduler
        .run_cycle_with(CycleOptions {
            now: Utc::now(),
            force,
        })
        .context("posting cycle aborted")?;

    if json {
        print_json(&outcome)?;
    } else {
        match &outcome {
            CycleOutcome::Published { slug } => {
                let page = pressmill_core::paths::post_page_path(&config.output_dir(root), slug);
                println!("Published {slug} → {}", page.display());
            }
            CycleOutcome::Skipped { reason } => println!("Skipped: {}", describe_skip(*reason)),
            CycleOutcome::Failed { product, error } => {
                println!("Failed for '{product}': {error}");
            }
        }
    }

    match outcome {
        CycleOutcome::Published { .. } => Ok(()),
        CycleOutcome::Skipped { reason } => Err(RunExit::Skipped(reason).into()),
        CycleOutcome::Failed { product, .. } => Err(RunExit::CycleFailed { product }.into()),
    }
}

fn describe_skip(reason: SkipReason) -> &'static str {
    match reason {
        SkipReason::Locked => "another run is in progress (locked)",
        SkipReason::NotDue => "next post is not due yet (not_due)",
        SkipReason::EmptyPortfolio => "the portfolio is empty (empty_portfolio)",
    }
}
