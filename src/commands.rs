//! `rctx` command implementations.
//!
//! Each function opens the configured store, index and providers, runs one
//! command and prints its result to stdout. Logs and progress go to stderr.

use std::sync::Arc;

use anyhow::{bail, Result};

use crate::answer::{ask, AnswerSettings, AskRequest};
use crate::blob_store::{open_store, BlobStore};
use crate::chunk::ChunkParams;
use crate::config::Config;
use crate::embed_cmd::EmbedOptions;
use crate::embedding::create_embedder;
use crate::generation::create_generator;
use crate::index::{open_index, RetrievalIndex};
use crate::layout::RepoLayout;
use crate::pipeline::{Pipeline, RunSettings};
use crate::progress::{ProgressMode, StageProgressReporter};
use crate::resolve::resolve_commit;
use crate::search::{format_hits, search_text};
use crate::source::open_source;
use crate::status::{format_status, repo_status};

/// Store, index and key layout for one repository.
struct Workspace {
    store: Arc<dyn BlobStore>,
    index: Arc<dyn RetrievalIndex>,
    layout: RepoLayout,
}

impl Workspace {
    async fn open(config: &Config, owner: &str, repo: &str) -> Result<Self> {
        Ok(Self {
            store: open_store(&config.store)?,
            index: open_index(&config.index).await?,
            layout: RepoLayout::new(&config.workspace.tenant, owner, repo),
        })
    }

    fn pipeline<'a>(&'a self, progress: &'a dyn StageProgressReporter) -> Pipeline<'a> {
        Pipeline {
            store: self.store.as_ref(),
            index: self.index.as_ref(),
            layout: self.layout.clone(),
            progress,
        }
    }

    /// Explicit commit, else the branch (or latest) pointer.
    async fn commit(&self, commit: Option<&str>, branch: Option<&str>) -> Result<String> {
        match commit {
            Some(c) => Ok(c.to_string()),
            None => resolve_commit(self.store.as_ref(), &self.layout, branch).await,
        }
    }
}

fn embed_options(config: &Config) -> EmbedOptions {
    EmbedOptions {
        batch_size: config.embedding.batch_size,
        partition_size: config.embedding.partition_size,
    }
}

/// Create the index tables and, for the filesystem backend, the store root.
pub async fn run_init(config: &Config) -> Result<()> {
    open_index(&config.index).await?;
    if config.store.backend == "filesystem" {
        std::fs::create_dir_all(&config.store.root)?;
    }
    println!("init");
    println!("  index: {}", config.index.path.display());
    match config.store.backend.as_str() {
        "filesystem" => println!("  store: {}", config.store.root.display()),
        _ => println!(
            "  store: s3://{}",
            config.store.bucket.as_deref().unwrap_or_default()
        ),
    }
    println!("ok");
    Ok(())
}

pub async fn run_ingest(
    config: &Config,
    owner: &str,
    repo: &str,
    reference: &str,
    branch: Option<&str>,
    dry_run: bool,
    progress: ProgressMode,
) -> Result<()> {
    let ws = Workspace::open(config, owner, repo).await?;
    let source = open_source(&config.source)?;
    let reporter = progress.reporter();
    let pipeline = ws.pipeline(reporter.as_ref());
    let manifest = pipeline
        .ingest(
            source.as_ref(),
            reference,
            branch,
            &config.filters.to_filter(),
            dry_run,
        )
        .await?;
    let archive_bytes = if config.source.save_tarball && !dry_run {
        Some(pipeline.archive(source.as_ref(), &manifest.commit).await?)
    } else {
        None
    };

    if dry_run {
        println!("ingest {}/{} (dry-run)", owner, repo);
    } else {
        println!("ingest {}/{}", owner, repo);
    }
    println!("  commit: {}", manifest.commit);
    println!("  files seen: {}", manifest.stats.files_seen);
    println!("  files kept: {}", manifest.stats.files_kept);
    println!("  files skipped: {}", manifest.stats.files_skipped);
    println!("  bytes kept: {}", manifest.stats.bytes_kept);
    if let Some(bytes) = archive_bytes {
        println!("  archive: {} bytes", bytes);
    }
    println!("ok");
    Ok(())
}

pub async fn run_parse(
    config: &Config,
    owner: &str,
    repo: &str,
    commit: Option<&str>,
    branch: Option<&str>,
    progress: ProgressMode,
) -> Result<()> {
    let ws = Workspace::open(config, owner, repo).await?;
    let commit = ws.commit(commit, branch).await?;
    let reporter = progress.reporter();
    let index = ws
        .pipeline(reporter.as_ref())
        .parse(
            &commit,
            &ChunkParams::from(&config.chunking),
            &config.chunking.model_label,
        )
        .await?;

    println!("parse {}/{}", owner, repo);
    println!("  commit: {}", commit);
    println!("  files parsed: {}", crate::parse::files_in(&index));
    println!("  chunks: {}", index.chunks.len());
    println!("ok");
    Ok(())
}

pub async fn run_embed(
    config: &Config,
    owner: &str,
    repo: &str,
    commit: Option<&str>,
    branch: Option<&str>,
    progress: ProgressMode,
) -> Result<()> {
    let embedder = create_embedder(&config.embedding)?;
    let ws = Workspace::open(config, owner, repo).await?;
    let commit = ws.commit(commit, branch).await?;
    let reporter = progress.reporter();
    let summary = ws
        .pipeline(reporter.as_ref())
        .embed(&commit, embedder.as_ref(), embed_options(config))
        .await?;

    println!("embed {}/{}", owner, repo);
    println!("  commit: {}", commit);
    println!("  provider: {} ({} dims)", summary.provider, summary.dim);
    println!("  vectors: {}", summary.total_vectors);
    println!("  partitions: {}", summary.parts);
    println!("ok");
    Ok(())
}

/// Ingest, parse and (when a provider is configured) embed.
pub async fn run_all(
    config: &Config,
    owner: &str,
    repo: &str,
    reference: &str,
    branch: Option<&str>,
    progress: ProgressMode,
) -> Result<()> {
    let embedder = if config.embedding.is_enabled() {
        Some(create_embedder(&config.embedding)?)
    } else {
        None
    };
    let ws = Workspace::open(config, owner, repo).await?;
    let source = open_source(&config.source)?;
    let reporter = progress.reporter();
    let settings = RunSettings {
        reference: reference.to_string(),
        branch: branch.map(str::to_string),
        filters: config.filters.to_filter(),
        chunking: ChunkParams::from(&config.chunking),
        chunk_model: config.chunking.model_label.clone(),
        embed: embed_options(config),
        save_tarball: config.source.save_tarball,
    };
    let summary = ws
        .pipeline(reporter.as_ref())
        .run(source.as_ref(), embedder.as_deref(), &settings)
        .await?;

    println!("run {}/{}", owner, repo);
    println!("  commit: {}", summary.commit);
    println!("  stage: {}", summary.stage);
    println!("  files parsed: {}", summary.files);
    println!("  chunks: {}", summary.chunks);
    match summary.vectors {
        Some(v) => println!("  vectors: {}", v),
        None => println!("  vectors: skipped (embedding disabled)"),
    }
    println!("ok");
    Ok(())
}

pub async fn run_search(
    config: &Config,
    owner: &str,
    repo: &str,
    query: &str,
    top_k: Option<usize>,
    json: bool,
) -> Result<()> {
    let embedder = create_embedder(&config.embedding)?;
    let ws = Workspace::open(config, owner, repo).await?;
    let hits = search_text(
        ws.index.as_ref(),
        embedder.as_ref(),
        owner,
        repo,
        query,
        top_k.unwrap_or(config.retrieval.top_k),
    )
    .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&hits)?);
    } else {
        print!("{}", format_hits(&hits));
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
pub async fn run_ask(
    config: &Config,
    owner: &str,
    repo: &str,
    question: &str,
    branch: Option<&str>,
    commit: Option<&str>,
    top_k: Option<usize>,
    json: bool,
) -> Result<()> {
    if question.trim().is_empty() {
        bail!("question must not be empty");
    }
    // Providers first, so missing credentials surface before any I/O.
    let embedder = create_embedder(&config.embedding)?;
    let generator = create_generator(&config.generation)?;
    let ws = Workspace::open(config, owner, repo).await?;

    let request = AskRequest {
        owner,
        repo,
        question,
        branch,
        commit,
        top_k: top_k.unwrap_or(config.retrieval.top_k),
    };
    let settings = AnswerSettings {
        max_tokens: config.generation.max_tokens,
        temperature: config.generation.temperature,
    };
    let response = ask(
        ws.store.as_ref(),
        &ws.layout,
        ws.index.as_ref(),
        embedder.as_ref(),
        generator.as_ref(),
        &request,
        settings,
    )
    .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
        return Ok(());
    }
    println!("{}", response.answer);
    if !response.citations.is_empty() {
        println!();
        println!("Sources:");
        for c in &response.citations {
            println!("  [{}] {}:{}-{}", c.id, c.file_path, c.start_line, c.end_line);
        }
    }
    Ok(())
}

pub async fn run_status(
    config: &Config,
    owner: &str,
    repo: &str,
    branch: Option<&str>,
    json: bool,
) -> Result<()> {
    let ws = Workspace::open(config, owner, repo).await?;
    let status = repo_status(ws.store.as_ref(), &ws.layout, ws.index.as_ref(), branch).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        print!("{}", format_status(&status));
    }
    Ok(())
}
