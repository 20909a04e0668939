//! Per-commit stage machine: `Ingested → Parsed → Embedded`.
//!
//! Each stage reads only its upstream artifact, writes its own artifacts,
//! then records the transition in `parse/status.json` and the retrieval
//! index. A failure leaves the commit at its last completed stage, and any
//! stage can be re-run from there.

use anyhow::Result;
use serde::Serialize;

use crate::blob_store::BlobStore;
use crate::chunk::ChunkParams;
use crate::embed_cmd::{embed_commit, EmbedOptions, EmbedSummary};
use crate::embedding::Embedder;
use crate::index::{IndexSink, RetrievalIndex};
use crate::ingest::{ingest, store_archive};
use crate::layout::RepoLayout;
use crate::models::{ChunkIndex, CommitStage, FilterConfig, Manifest};
use crate::parse::{files_in, parse_commit};
use crate::progress::{Stage, StageProgressEvent, StageProgressReporter};
use crate::source::RepoSource;
use crate::status::{read_status, stage_status, write_status};

/// Everything a full run needs besides the capabilities.
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub reference: String,
    pub branch: Option<String>,
    pub filters: FilterConfig,
    pub chunking: ChunkParams,
    pub chunk_model: String,
    pub embed: EmbedOptions,
    /// Store the commit's tarball next to its manifest.
    pub save_tarball: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub commit: String,
    pub stage: CommitStage,
    pub files: usize,
    pub chunks: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vectors: Option<usize>,
}

/// The stages of one repository, bound to its storage.
pub struct Pipeline<'a> {
    pub store: &'a dyn BlobStore,
    pub index: &'a dyn RetrievalIndex,
    pub layout: RepoLayout,
    pub progress: &'a dyn StageProgressReporter,
}

impl Pipeline<'_> {
    fn repo_label(&self) -> String {
        format!("{}/{}", self.layout.owner, self.layout.repo)
    }

    fn started(&self, stage: Stage) {
        self.progress.report(StageProgressEvent::Started {
            stage,
            repo: self.repo_label(),
        });
    }

    fn finished(&self, stage: Stage, commit: &str, items: usize) {
        self.progress.report(StageProgressEvent::Finished {
            stage,
            repo: self.repo_label(),
            commit: commit.to_string(),
            items: items as u64,
        });
    }

    /// Ingest a snapshot. A dry run writes nothing, not even status.
    pub async fn ingest(
        &self,
        source: &dyn RepoSource,
        reference: &str,
        branch: Option<&str>,
        filters: &FilterConfig,
        dry_run: bool,
    ) -> Result<Manifest> {
        self.started(Stage::Ingest);
        let target = (!dry_run).then_some(self.store);
        let manifest = ingest(source, target, &self.layout, reference, branch, filters).await?;

        if !dry_run {
            write_status(
                self.store,
                &self.layout,
                &manifest.commit,
                &stage_status(CommitStage::Ingested),
            )
            .await?;
            self.index
                .upsert_commit(
                    &self.layout.owner,
                    &self.layout.repo,
                    &manifest.commit,
                    &manifest.ingested_at,
                )
                .await?;
        }
        self.finished(Stage::Ingest, &manifest.commit, manifest.files.len());
        Ok(manifest)
    }

    /// Store the source's tarball of an ingested commit. Does not change
    /// the commit's stage.
    pub async fn archive(&self, source: &dyn RepoSource, commit: &str) -> Result<u64> {
        store_archive(source, self.store, &self.layout, commit).await
    }

    pub async fn parse(
        &self,
        commit: &str,
        params: &ChunkParams,
        chunk_model: &str,
    ) -> Result<ChunkIndex> {
        self.started(Stage::Parse);
        let chunk_index = parse_commit(self.store, &self.layout, commit, params, chunk_model).await?;
        self.index
            .replace_chunks(
                &self.layout.owner,
                &self.layout.repo,
                commit,
                &chunk_index.chunks,
            )
            .await?;

        let mut status = stage_status(CommitStage::Parsed);
        status.files_parsed = Some(files_in(&chunk_index));
        status.chunks = Some(chunk_index.chunks.len());
        status.model = Some(chunk_model.to_string());
        write_status(self.store, &self.layout, commit, &status).await?;

        self.finished(Stage::Parse, commit, chunk_index.chunks.len());
        Ok(chunk_index)
    }

    pub async fn embed(
        &self,
        commit: &str,
        embedder: &dyn Embedder,
        options: EmbedOptions,
    ) -> Result<EmbedSummary> {
        self.started(Stage::Embed);
        let sink = IndexSink {
            index: self.index,
            owner: &self.layout.owner,
            repo: &self.layout.repo,
        };
        let summary =
            embed_commit(self.store, &self.layout, commit, embedder, Some(&sink), options).await?;

        // keep the parse counts from the previous transition
        let previous = read_status(self.store, &self.layout, commit).await?;
        let mut status = stage_status(CommitStage::Embedded);
        if let Some(previous) = previous {
            status.files_parsed = previous.files_parsed;
            status.chunks = previous.chunks;
            status.model = previous.model;
        }
        status.provider = Some(summary.provider.clone());
        status.total_vectors = Some(summary.total_vectors);
        write_status(self.store, &self.layout, commit, &status).await?;

        self.finished(Stage::Embed, commit, summary.total_vectors);
        Ok(summary)
    }

    /// Run every stage for one reference. Embedding is skipped when no
    /// embedder is given, leaving the commit `Parsed`.
    pub async fn run(
        &self,
        source: &dyn RepoSource,
        embedder: Option<&dyn Embedder>,
        settings: &RunSettings,
    ) -> Result<RunSummary> {
        let manifest = self
            .ingest(
                source,
                &settings.reference,
                settings.branch.as_deref(),
                &settings.filters,
                false,
            )
            .await?;
        let commit = manifest.commit;
        if settings.save_tarball {
            self.archive(source, &commit).await?;
        }

        let chunk_index = self
            .parse(&commit, &settings.chunking, &settings.chunk_model)
            .await?;

        let mut summary = RunSummary {
            commit: commit.clone(),
            stage: CommitStage::Parsed,
            files: files_in(&chunk_index),
            chunks: chunk_index.chunks.len(),
            vectors: None,
        };
        if let Some(embedder) = embedder {
            let embedded = self.embed(&commit, embedder, settings.embed).await?;
            summary.stage = CommitStage::Embedded;
            summary.vectors = Some(embedded.total_vectors);
        }
        Ok(summary)
    }
}
