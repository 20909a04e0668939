//! # rctx
//!
//! Snapshot a repository, chunk and embed it, then search it or ask
//! questions that are answered with citations into the source.
//!
//! ## Usage
//!
//! ```bash
//! rctx --config ./config/rctx.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `rctx init` | Create the retrieval index and the local store directory |
//! | `rctx ingest <owner/repo>` | Store a snapshot of a commit and its manifest |
//! | `rctx parse <owner/repo>` | Chunk an ingested commit |
//! | `rctx embed <owner/repo>` | Embed a parsed commit |
//! | `rctx run <owner/repo>` | Ingest, parse and embed in one go |
//! | `rctx search <owner/repo> "<query>"` | Nearest chunks to a query |
//! | `rctx ask <owner/repo> "<question>"` | Cited answer from retrieved chunks |
//! | `rctx status <owner/repo>` | Stage and counts of the latest (or a branch's) commit |
//!
//! ## Examples
//!
//! ```bash
//! rctx init
//! rctx run acme/widgets --branch main
//! rctx ask acme/widgets "How are retries configured?" --branch main
//! ```
//!
//! Configuration errors (invalid settings, missing credentials) exit with
//! status 2; other failures exit with status 1.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use repo_context::commands;
use repo_context::config;
use repo_context::error::PipelineError;
use repo_context::progress::ProgressMode;

/// Repository snapshot, retrieval and question answering.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/rctx.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "rctx",
    about = "Snapshot, chunk, embed and query source repositories",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/rctx.toml")]
    config: PathBuf,

    /// Stage progress on stderr: `auto` (human when stderr is a TTY), `off`,
    /// `human` or `json`.
    #[arg(long, global = true, default_value = "auto", value_parser = parse_progress)]
    progress: ProgressMode,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the retrieval index and the local store directory. Idempotent.
    Init,

    /// Store a snapshot of one commit.
    ///
    /// Without `--ref`, the branch given by `--branch` is ingested, else `HEAD`.
    Ingest {
        /// Repository as `owner/repo`.
        #[arg(value_parser = parse_repo)]
        repo: (String, String),
        /// Branch, tag or commit SHA to ingest.
        #[arg(long = "ref")]
        reference: Option<String>,
        /// Branch whose ref pointer should name the ingested commit.
        #[arg(long)]
        branch: Option<String>,
        /// Fetch and filter without writing anything.
        #[arg(long)]
        dry_run: bool,
    },

    /// Chunk an ingested commit.
    Parse {
        #[arg(value_parser = parse_repo)]
        repo: (String, String),
        /// Commit SHA. Defaults to the branch (or latest) pointer.
        #[arg(long)]
        commit: Option<String>,
        #[arg(long)]
        branch: Option<String>,
    },

    /// Embed a parsed commit with the configured provider.
    Embed {
        #[arg(value_parser = parse_repo)]
        repo: (String, String),
        #[arg(long)]
        commit: Option<String>,
        #[arg(long)]
        branch: Option<String>,
    },

    /// Ingest, parse and embed one commit.
    Run {
        #[arg(value_parser = parse_repo)]
        repo: (String, String),
        #[arg(long = "ref")]
        reference: Option<String>,
        #[arg(long)]
        branch: Option<String>,
    },

    /// Nearest chunks to a query.
    Search {
        #[arg(value_parser = parse_repo)]
        repo: (String, String),
        query: String,
        /// Number of hits (defaults to `[retrieval] top_k`).
        #[arg(long)]
        top_k: Option<usize>,
        #[arg(long)]
        json: bool,
    },

    /// Answer a question from retrieved chunks, with citations.
    Ask {
        #[arg(value_parser = parse_repo)]
        repo: (String, String),
        question: String,
        #[arg(long)]
        branch: Option<String>,
        /// Read chunk text from this commit instead of the ref pointer's.
        #[arg(long)]
        commit: Option<String>,
        #[arg(long)]
        top_k: Option<usize>,
        #[arg(long)]
        json: bool,
    },

    /// Show the stage and counts of the latest (or a branch's) commit.
    Status {
        #[arg(value_parser = parse_repo)]
        repo: (String, String),
        #[arg(long)]
        branch: Option<String>,
        #[arg(long)]
        json: bool,
    },
}

/// Parse `owner/repo`.
fn parse_repo(s: &str) -> Result<(String, String), String> {
    match s.split_once('/') {
        Some((owner, repo))
            if !owner.is_empty() && !repo.is_empty() && !repo.contains('/') =>
        {
            Ok((owner.to_string(), repo.to_string()))
        }
        _ => Err(format!("expected OWNER/REPO, got '{}'", s)),
    }
}

fn parse_progress(s: &str) -> Result<ProgressMode, String> {
    match s {
        "auto" => Ok(ProgressMode::default_for_tty()),
        "off" => Ok(ProgressMode::Off),
        "human" => Ok(ProgressMode::Human),
        "json" => Ok(ProgressMode::Json),
        other => Err(format!(
            "unknown progress mode '{}': use auto, off, human or json",
            other
        )),
    }
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let cfg = config::load_config(&cli.config)?;
    let progress = cli.progress;

    match cli.command {
        Commands::Init => commands::run_init(&cfg).await,
        Commands::Ingest {
            repo: (owner, repo),
            reference,
            branch,
            dry_run,
        } => {
            let reference = reference
                .or_else(|| branch.clone())
                .unwrap_or_else(|| "HEAD".to_string());
            commands::run_ingest(
                &cfg,
                &owner,
                &repo,
                &reference,
                branch.as_deref(),
                dry_run,
                progress,
            )
            .await
        }
        Commands::Parse {
            repo: (owner, repo),
            commit,
            branch,
        } => {
            commands::run_parse(
                &cfg,
                &owner,
                &repo,
                commit.as_deref(),
                branch.as_deref(),
                progress,
            )
            .await
        }
        Commands::Embed {
            repo: (owner, repo),
            commit,
            branch,
        } => {
            commands::run_embed(
                &cfg,
                &owner,
                &repo,
                commit.as_deref(),
                branch.as_deref(),
                progress,
            )
            .await
        }
        Commands::Run {
            repo: (owner, repo),
            reference,
            branch,
        } => {
            let reference = reference
                .or_else(|| branch.clone())
                .unwrap_or_else(|| "HEAD".to_string());
            commands::run_all(&cfg, &owner, &repo, &reference, branch.as_deref(), progress).await
        }
        Commands::Search {
            repo: (owner, repo),
            query,
            top_k,
            json,
        } => commands::run_search(&cfg, &owner, &repo, &query, top_k, json).await,
        Commands::Ask {
            repo: (owner, repo),
            question,
            branch,
            commit,
            top_k,
            json,
        } => {
            commands::run_ask(
                &cfg,
                &owner,
                &repo,
                &question,
                branch.as_deref(),
                commit.as_deref(),
                top_k,
                json,
            )
            .await
        }
        Commands::Status {
            repo: (owner, repo),
            branch,
            json,
        } => commands::run_status(&cfg, &owner, &repo, branch.as_deref(), json).await,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) if PipelineError::is_config(&e) => {
            eprintln!("{:#}", e);
            ExitCode::from(2)
        }
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
