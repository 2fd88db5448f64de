//! # kb-gateway CLI (`kbg`)
//!
//! ## Usage
//!
//! ```bash
//! kbg --config ./config/kbg.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `kbg init` | Create the database and both corpora |
//! | `kbg upload <path>` | Ingest a file or directory of regulations |
//! | `kbg documents` | List documents grouped by version lineage |
//! | `kbg group <name>` | Show one lineage |
//! | `kbg set-latest <id>` | Manually choose the latest document of a lineage |
//! | `kbg sync` | Reconcile the registry with the corpus store |
//! | `kbg corrections ...` | Review user-submitted corrections |
//! | `kbg feedback ...` | Dispute an answer from a session transcript |
//! | `kbg ask "<question>"` | Ask a question over both corpora |
//! | `kbg serve` | Start the HTTP API |
//!
//! Logs go to stderr and are filtered with `RUST_LOG` (default `info`).

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use kb_gateway::app::App;
use kb_gateway::commands;
use kb_gateway::config;
use kb_gateway::models::{CorrectionStatus, CorpusType};
use kb_gateway::server;

/// Regulation knowledge-base gateway: version lineages for uploaded
/// documents and admin-approved corrections that outrank them.
#[derive(Parser)]
#[command(name = "kbg", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/kbg.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database schema and both corpora. Safe to re-run.
    Init,

    /// Ingest a file, or every supported file in a directory.
    ///
    /// Files already registered under the same name in the target corpus
    /// are skipped. Per-file failures are reported and do not stop the batch.
    Upload {
        path: PathBuf,

        /// Target corpus: `primary` or `correction`.
        #[arg(long, default_value = "primary")]
        corpus: CorpusType,

        /// Version group to use instead of the one derived from the file name.
        #[arg(long)]
        group: Option<String>,

        /// Recorded as the uploader.
        #[arg(long)]
        user: Option<String>,
    },

    /// List registered documents grouped by version lineage.
    ///
    /// `*` marks the latest document of each lineage.
    Documents {
        /// Case-insensitive substring of the file name or group.
        #[arg(long)]
        search: Option<String>,
    },

    /// Show every document of one version group.
    Group { name: String },

    /// Make a document the latest of its version group.
    SetLatest { id: String },

    /// Reconcile the registry against the corpus store.
    Sync {
        /// Only print what the corpus store holds.
        #[arg(long, conflicts_with = "reset")]
        list: bool,

        /// Delete every document from both corpora and clear the registry.
        #[arg(long)]
        reset: bool,
    },

    /// Review corrections.
    Corrections {
        #[command(subcommand)]
        action: CorrectionAction,
    },

    /// Dispute the assistant answer at a position in a session transcript.
    Feedback {
        #[arg(long)]
        session: String,

        /// Zero-based position of the assistant message in the session.
        #[arg(long)]
        message_index: usize,

        /// What was wrong, in the user's words.
        #[arg(long)]
        text: String,

        #[arg(long)]
        user: String,
    },

    /// Ask a question.
    Ask {
        question: String,

        /// Continue (and record into) a session transcript.
        #[arg(long)]
        session: Option<String>,

        /// Search only the primary corpus.
        #[arg(long)]
        no_corrections: bool,
    },

    /// Start the HTTP API on `[server].bind`.
    Serve,
}

#[derive(Subcommand)]
enum CorrectionAction {
    /// List corrections, newest first.
    List {
        /// `pending`, `approved`, `rejected`, or `superseded`.
        #[arg(long)]
        status: Option<CorrectionStatus>,
    },
    /// Counts per status.
    Stats,
    /// Approve a pending correction and ingest it into the correction corpus.
    Approve {
        id: String,
        #[arg(long)]
        reviewer: String,
    },
    /// Reject a pending correction.
    Reject {
        id: String,
        #[arg(long)]
        reviewer: String,
        #[arg(long)]
        reason: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .try_init()
        .ok();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    let app = App::open(cfg).await?;

    match cli.command {
        Commands::Serve => return server::run_server(app).await,
        Commands::Init => commands::run_init(&app).await?,
        Commands::Upload {
            path,
            corpus,
            group,
            user,
        } => commands::run_upload(&app, &path, corpus, group, user).await?,
        Commands::Documents { search } => commands::run_documents(&app, search.as_deref()).await?,
        Commands::Group { name } => commands::run_group(&app, &name).await?,
        Commands::SetLatest { id } => commands::run_set_latest(&app, &id).await?,
        Commands::Sync { list, reset } => commands::run_sync(&app, list, reset).await?,
        Commands::Corrections { action } => match action {
            CorrectionAction::List { status } => {
                commands::run_corrections_list(&app, status).await?
            }
            CorrectionAction::Stats => commands::run_corrections_stats(&app).await?,
            CorrectionAction::Approve { id, reviewer } => {
                commands::run_approve(&app, &id, &reviewer).await?
            }
            CorrectionAction::Reject {
                id,
                reviewer,
                reason,
            } => commands::run_reject(&app, &id, &reviewer, &reason).await?,
        },
        Commands::Feedback {
            session,
            message_index,
            text,
            user,
        } => commands::run_feedback(&app, &session, message_index, &text, &user).await?,
        Commands::Ask {
            question,
            session,
            no_corrections,
        } => commands::run_ask(&app, &question, session.as_deref(), !no_corrections).await?,
    }

    app.pool.close().await;
    Ok(())
}
