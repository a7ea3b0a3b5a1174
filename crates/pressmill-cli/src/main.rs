mod cmd;
mod output;
mod root;

use clap::{Parser, Subcommand};
use cmd::{config::ConfigSubcommand, posts::PostsSubcommand, run::RunExit};
use pressmill_core::PressmillError;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "pressmill",
    about = "Scheduled affiliate article generation and static-site publishing",
    version,
    propagate_version = true
)]
struct Cli {
    /// Site root (default: auto-detect from .pressmill/)
    #[arg(long, global = true, env = "PRESSMILL_ROOT")]
    root: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scaffold config and state in the current site root
    Init,

    /// Run one posting cycle (publishes only when a post is due)
    Run {
        /// Publish now even if the posting interval has not elapsed
        #[arg(long)]
        force: bool,
    },

    /// Show schedule, rotation and lock state
    Status,

    /// List and withdraw published posts
    Posts {
        #[command(subcommand)]
        subcommand: PostsSubcommand,
    },

    /// Rebuild missing pages, remove orphans and rewrite the index
    Repair,

    /// Clear a held cycle lock
    Unlock,

    /// Inspect the configuration
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Run { .. } => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let root = root::resolve_root(cli.root.as_deref());

    let result = match cli.command {
        Commands::Init => cmd::init::run(&root),
        Commands::Run { force } => cmd::run::run(&root, force, cli.json),
        Commands::Status => cmd::status::run(&root, cli.json),
        Commands::Posts { subcommand } => cmd::posts::run(&root, subcommand, cli.json),
        Commands::Repair => cmd::repair::run(&root, cli.json),
        Commands::Unlock => cmd::unlock::run(&root, cli.json),
        Commands::Config { subcommand } => cmd::config::run(&root, subcommand, cli.json),
    };

    if let Err(e) = result {
        // Outcomes were already reported by the command; only the code remains.
        if let Some(exit) = e.downcast_ref::<RunExit>() {
            std::process::exit(exit.exit_code());
        }
        eprintln!("error: {e:#}");
        std::process::exit(exit_code(&e));
    }
}

/// Configuration problems exit 2, everything else 1.
fn exit_code(e: &anyhow::Error) -> i32 {
    let config_error = e.chain().any(|cause| {
        matches!(
            cause.downcast_ref::<PressmillError>(),
            Some(PressmillError::Config(_) | PressmillError::NotInitialized | PressmillError::Yaml(_))
        )
    });
    if config_error {
        2
    } else {
        1
    }
}
