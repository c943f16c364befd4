//! # Guardlight CLI (`gl`)
//!
//! ## Usage
//!
//! ```bash
//! gl --config ./config/guardlight.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `gl init` | Create the SQLite database and run schema migrations |
//! | `gl adapters` | List configured parsers, analyzers and reporters |
//! | `gl submit <file> --owner <uuid>` | Queue a submission |
//! | `gl run` | Run dispatcher, sweep, listener and built-in adapters |
//! | `gl jobs` | List jobs that are not finished |
//! | `gl status <id>` | Show a submission and its analyses |
//! | `gl results --owner <uuid>` | All submissions of an owner as JSON |
//! | `gl export <id> --out-dir <dir>` | Write a submission's processed text to a file |
//! | `gl theme add <file> --owner <uuid>` | Store a theme |
//! | `gl theme list --owner <uuid>` | List an owner's themes |
//!
//! Logging goes to stderr and is controlled by `RUST_LOG`.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use guardlight::{adapters, config, export, jobs, migrate, run, status, submit, themes};

/// Guardlight CLI: job orchestration and analysis pipeline.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/guardlight.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "gl",
    about = "Guardlight: job orchestration and analysis pipeline",
    version,
    long_about = "Guardlight parses submitted content, splits it per analyzer, runs every \
    chunk through its analyzer, aggregates the results and hands them to a reporter. \
    Every step is a persisted job dispatched under per-adapter concurrency limits."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/guardlight.toml`.
    #[arg(long, global = true, default_value = "./config/guardlight.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and the jobs, submissions, analyses
    /// and themes tables. Safe to run more than once.
    Init,

    /// List configured adapters.
    ///
    /// Adapter kinds without configuration fall back to the built-in ones.
    Adapters,

    /// Queue a submission for analysis.
    ///
    /// The request is validated against the configured adapters,
    /// deduplicated by content digest, stored, and its parse job enqueued.
    Submit {
        /// JSON request file.
        file: PathBuf,

        /// Owner of the submission.
        #[arg(long)]
        owner: Uuid,
    },

    /// Run the pipeline.
    ///
    /// Starts the built-in adapters, the result listener, the dispatcher
    /// tick and the stale-job sweep.
    Run {
        /// Stop once no job is queued or in progress.
        #[arg(long)]
        until_idle: bool,

        /// Give up after this many seconds.
        #[arg(long)]
        timeout_secs: Option<u64>,
    },

    /// List jobs that are not finished.
    Jobs,

    /// Show a submission and its analyses.
    Status {
        /// Submission UUID.
        id: Uuid,
    },

    /// Print every submission of an owner as JSON, newest first.
    Results {
        #[arg(long)]
        owner: Uuid,
    },

    /// Write the processed text of a parsed submission to a file.
    ///
    /// The file lands under `<out-dir>/<category>/<two letters>/` and is
    /// named after the title.
    Export {
        /// Submission UUID.
        id: Uuid,

        #[arg(long, default_value = "./exports")]
        out_dir: PathBuf,
    },

    /// Manage stored themes.
    Theme {
        #[command(subcommand)]
        action: ThemeAction,
    },
}

#[derive(Subcommand)]
enum ThemeAction {
    /// Store or replace a theme from a JSON file.
    Add {
        file: PathBuf,
        #[arg(long)]
        owner: Uuid,
    },
    /// List an owner's themes.
    List {
        #[arg(long)]
        owner: Uuid,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "guardlight=info,guardlight_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Adapters => {
            adapters::list_adapters(&cfg);
        }
        Commands::Submit { file, owner } => {
            submit::run_submit(&cfg, &file, owner).await?;
        }
        Commands::Run {
            until_idle,
            timeout_secs,
        } => {
            run::run_engine(&cfg, until_idle, timeout_secs.map(Duration::from_secs)).await?;
        }
        Commands::Jobs => {
            jobs::list_jobs(&cfg).await?;
        }
        Commands::Status { id } => {
            status::run_status(&cfg, id).await?;
        }
        Commands::Results { owner } => {
            status::run_results(&cfg, owner).await?;
        }
        Commands::Export { id, out_dir } => {
            export::run_export(&cfg, id, &out_dir).await?;
        }
        Commands::Theme { action } => match action {
            ThemeAction::Add { file, owner } => {
                themes::run_theme_add(&cfg, &file, owner).await?;
            }
            ThemeAction::List { owner } => {
                themes::run_theme_list(&cfg, owner).await?;
            }
        },
    }

    Ok(())
}
