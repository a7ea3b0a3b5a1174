use crate::output::{fmt_time, print_json, print_table};
use anyhow::Context;
use chrono::Utc;
use clap::Subcommand;
use pressmill_core::{config::Config, scheduler::Maintainer, types::PostStatus};
use std::path::Path;

// ---------------------------------------------------------------------------
// Subcommand types
// ---------------------------------------------------------------------------

#[derive(Subcommand)]
pub enum PostsSubcommand {
    /// List the ledger, oldest first
    List {
        /// Only show posts with this status (published, failed, withdrawn)
        #[arg(long)]
        status: Option<String>,
    },

    /// Take a post (or every post) off the site
    Withdraw {
        /// Slug of the post to withdraw
        #[arg(required_unless_present = "all", conflicts_with = "all")]
        slug: Option<String>,
        /// Withdraw every published post
        #[arg(long)]
        all: bool,
        /// Confirm --all
        #[arg(long, requires = "all")]
        yes: bool,
    },
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub fn run(root: &Path, subcmd: PostsSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        PostsSubcommand::List { status } => list(root, status.as_deref(), json),
        PostsSubcommand::Withdraw { slug, all, yes } => {
            withdraw(root, slug.as_deref(), all, yes, json)
        }
    }
}

// ---------------------------------------------------------------------------
// list
// ---------------------------------------------------------------------------

fn list(root: &Path, status: Option<&str>, json: bool) -> anyhow::Result<()> {
    let filter = status.map(str::parse::<PostStatus>).transpose()?;
    Config::load(root).context("failed to load config")?;
    let store = super::open_store(root)?;
    let records: Vec<_> = store
        .ledger()
        .context("failed to read ledger")?
        .into_iter()
        .filter(|r| filter.map_or(true, |s| r.status == s))
        .collect();

    if json {
        return print_json(&records);
    }

    if records.is_empty() {
        println!("No posts.");
        return Ok(());
    }

    let rows = records
        .iter()
        .map(|r| {
            let detail = match (&r.failure, r.status) {
                (Some(reason), PostStatus::Failed) => reason.clone(),
                _ => r.title.clone(),
            };
            vec![
                r.seq.to_string(),
                r.slug.clone(),
                r.status.to_string(),
                fmt_time(r.timestamp),
                r.product.clone(),
                detail,
            ]
        })
        .collect();
    print_table(&["SEQ", "SLUG", "STATUS", "TIME", "PRODUCT", "TITLE"], rows);
    Ok(())
}

// ---------------------------------------------------------------------------
// withdraw
// ---------------------------------------------------------------------------

fn withdraw(
    root: &Path,
    slug: Option<&str>,
    all: bool,
    yes: bool,
    json: bool,
) -> anyhow::Result<()> {
    if all && !yes {
        anyhow::bail!("refusing to withdraw every post without --yes");
    }

    let config = super::load_config(root)?;
    let store = super::open_store(root)?;
    let maintainer = Maintainer::new(root, &config, &store).context("failed to set up publisher")?;
    let now = Utc::now();

    let withdrawn = match slug {
        Some(slug) if !all => maintainer
            .withdraw(slug, now)
            .with_context(|| format!("failed to withdraw '{slug}'"))?,
        _ => maintainer
            .withdraw_all(now)
            .context("failed to withdraw posts")?,
    };

    if json {
        return print_json(&withdrawn);
    }
    if withdrawn.is_empty() {
        println!("Nothing to withdraw.");
    }
    for record in &withdrawn {
        println!("Withdrawn {} ({})", record.slug, record.title);
    }
    Ok(())
}
