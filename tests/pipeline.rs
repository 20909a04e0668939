//! End-to-end pipeline tests against in-memory backends.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use repo_context::answer::{ask, synthesize, AnswerSettings, AskRequest, NOTHING_RELEVANT, NO_CONTEXT};
use repo_context::blob_store::memory::InMemoryBlobStore;
use repo_context::blob_store::{self, BlobStore};
use repo_context::chunk::ChunkParams;
use repo_context::embed_cmd::{load_embeddings_index, EmbedOptions};
use repo_context::embedding::Embedder;
use repo_context::error::PipelineError;
use repo_context::generation::{GenerateOptions, Generator};
use repo_context::index::memory::InMemoryIndex;
use repo_context::index::RetrievalIndex;
use repo_context::layout::RepoLayout;
use repo_context::models::{ChunkText, CommitStage, FilterConfig, Manifest, Snippet};
use repo_context::normalize::{chunk_id, short_hash};
use repo_context::parse::load_chunk_index;
use repo_context::pipeline::{Pipeline, RunSettings};
use repo_context::progress::NoProgress;
use repo_context::resolve::resolve_commit;
use repo_context::source::{EntryKind, RepoSource, TreeEntry, TreeListing};
use repo_context::status::read_status;

const COMMIT: &str = "0123456789abcdef0123456789abcdef01234567";

struct FakeSource {
    files: Vec<(String, Vec<u8>)>,
}

impl FakeSource {
    fn new(files: Vec<(&str, String)>) -> Self {
        Self {
            files: files
                .into_iter()
                .map(|(p, t)| (p.to_string(), t.into_bytes()))
                .collect(),
        }
    }

    fn object_id(path: &str) -> String {
        format!("obj-{}", path)
    }
}

#[async_trait]
impl RepoSource for FakeSource {
    fn name(&self) -> &str {
        "fake"
    }

    async fn resolve_commit(&self, _: &str, _: &str, reference: &str) -> Result<String> {
        match reference {
            "main" | "HEAD" => Ok(COMMIT.to_string()),
            other => Err(PipelineError::CommitResolution {
                owner: "acme".into(),
                repo: "widgets".into(),
                reference: other.into(),
                reason: "unknown ref".into(),
            }
            .into()),
        }
    }

    async fn list_tree(&self, _: &str, _: &str, _: &str) -> Result<TreeListing> {
        Ok(TreeListing {
            entries: self
                .files
                .iter()
                .map(|(p, b)| TreeEntry {
                    path: p.clone(),
                    kind: EntryKind::Blob,
                    sha: Self::object_id(p),
                    size: Some(b.len() as u64),
                })
                .collect(),
            truncated: false,
        })
    }

    async fn fetch_blob(&self, _: &str, _: &str, sha: &str) -> Result<Vec<u8>> {
        self.files
            .iter()
            .find(|(p, _)| Self::object_id(p) == sha)
            .map(|(_, b)| b.clone())
            .ok_or_else(|| anyhow!("no blob {}", sha))
    }

    async fn fetch_archive(&self, _: &str, _: &str, commit: &str) -> Result<Vec<u8>> {
        assert_eq!(commit, COMMIT);
        Ok(ARCHIVE.to_vec())
    }
}

const ARCHIVE: &[u8] = b"\x1f\x8b\x08\x00fake-tarball";

/// Counts a handful of known words, with one slot for everything else.
struct WordEmbedder {
    fail: bool,
    calls: AtomicUsize,
}

const VOCABULARY: [&str; 7] = [
    "retry",
    "backoff",
    "exponential",
    "widgets",
    "install",
    "const",
    "value",
];

impl WordEmbedder {
    fn new() -> Self {
        Self {
            fail: false,
            calls: AtomicUsize::new(0),
        }
    }

    fn vector(text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; VOCABULARY.len() + 1];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let word = word.to_lowercase();
            let slot = VOCABULARY
                .iter()
                .position(|known| *known == word)
                .unwrap_or(VOCABULARY.len());
            v[slot] += 1.0;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt().max(1.0);
        v.iter().map(|x| x / norm).collect()
    }
}

#[async_trait]
impl Embedder for WordEmbedder {
    fn name(&self) -> &str {
        "words"
    }

    fn dim(&self) -> usize {
        VOCABULARY.len() + 1
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(PipelineError::Provider {
                provider: "words".into(),
                status: Some(503),
                message: "unavailable".into(),
            }
            .into());
        }
        Ok(texts.iter().map(|t| Self::vector(t)).collect())
    }
}

/// Cites the first id in the context block.
struct CitingGenerator {
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl CitingGenerator {
    fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Generator for CitingGenerator {
    fn name(&self) -> &str {
        "citing"
    }

    async fn generate(&self, prompt: &str, _options: &GenerateOptions) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.to_string());
        let first = prompt
            .split("Context:\n[")
            .nth(1)
            .and_then(|rest| rest.split(']').next())
            .unwrap_or("none");
        Ok(format!("Retries back off exponentially [{}].", first))
    }
}

fn no_filters() -> FilterConfig {
    FilterConfig {
        include: vec![],
        exclude: vec![],
        max_file_kb: 800,
    }
}

fn settings() -> RunSettings {
    RunSettings {
        reference: "main".into(),
        branch: Some("main".into()),
        filters: no_filters(),
        chunking: ChunkParams::default(),
        chunk_model: "chunker-v0.1".into(),
        embed: EmbedOptions {
            batch_size: 64,
            partition_size: 2000,
        },
        save_tarball: false,
    }
}

fn repo_files() -> Vec<(&'static str, String)> {
    let big: String = (1..=1000)
        .map(|i| format!("const VALUE_{:04}: u32 = {};\n", i, i))
        .collect();
    vec![
        (
            "README.md",
            "# Widgets\n\nA widget library.\n\n## Install\n\ncargo add widgets\n".to_string(),
        ),
        (
            "src/retry.rs",
            "/// Retry with exponential backoff.\npub fn backoff(attempt: u32) -> u64 {\n    1 << attempt\n}\n"
                .to_string(),
        ),
        ("src/consts.rs", big),
        ("LICENSE", "MIT License\n".to_string()),
        ("LICENSE.copy", "MIT License\n".to_string()),
        ("logo.png", "\u{0}PNG".to_string()),
    ]
}

fn layout() -> RepoLayout {
    RepoLayout::new("default", "acme", "widgets")
}

#[tokio::test]
async fn test_full_run_reaches_embedded() {
    let store = InMemoryBlobStore::new();
    let index = InMemoryIndex::new();
    let source = FakeSource::new(repo_files());
    let embedder = WordEmbedder::new();
    let pipeline = Pipeline {
        store: &store,
        index: &index,
        layout: layout(),
        progress: &NoProgress,
    };

    let summary = pipeline
        .run(&source, Some(&embedder), &settings())
        .await
        .unwrap();
    assert_eq!(summary.commit, COMMIT);
    assert_eq!(summary.stage, CommitStage::Embedded);
    assert_eq!(summary.files, 3);

    // LICENSE and LICENSE.copy share one blob; the png was skipped as binary
    let manifest: Manifest = blob_store::get_json(&store, &layout().manifest(COMMIT))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(manifest.files.len(), 5);
    assert_eq!(manifest.skipped.len(), 1);
    let license_keys: Vec<_> = manifest
        .files
        .iter()
        .filter(|f| f.path.starts_with("LICENSE"))
        .map(|f| f.stored_at.clone())
        .collect();
    assert_eq!(license_keys[0], license_keys[1]);

    // the 1000-line file ends exactly at line 1000 with 20-line overlaps
    let consts: Vec<ChunkText> = blob_store::get_jsonl(
        &store,
        &layout().chunk_file(COMMIT, &short_hash("src/consts.rs")),
    )
    .await
    .unwrap()
    .unwrap();
    assert!(consts.len() > 1);
    assert_eq!(consts.last().unwrap().record.end_line, 1000);
    for pair in consts.windows(2) {
        assert_eq!(pair[0].record.end_line - pair[1].record.start_line + 1, 20);
    }

    // markdown with small sections is a single chunk
    let chunk_index = load_chunk_index(&store, &layout(), COMMIT)
        .await
        .unwrap()
        .unwrap();
    let readme: Vec<_> = chunk_index
        .chunks
        .iter()
        .filter(|c| c.file_path == "README.md")
        .collect();
    assert_eq!(readme.len(), 1);
    assert!(chunk_index.chunks.iter().all(|c| !c.file_path.starts_with("LICENSE")));

    let embeddings = load_embeddings_index(&store, &layout(), COMMIT)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(embeddings.total_vectors, chunk_index.chunks.len());
    assert_eq!(embeddings.provider, "words");

    let status = read_status(&store, &layout(), COMMIT).await.unwrap().unwrap();
    assert_eq!(status.stage, CommitStage::Embedded);
    assert_eq!(status.chunks, Some(chunk_index.chunks.len()));
    assert_eq!(status.total_vectors, Some(embeddings.total_vectors));

    let counts = index.counts("acme", "widgets").await.unwrap();
    assert_eq!(counts.commits, 1);
    assert_eq!(counts.embeddings as usize, chunk_index.chunks.len());

    assert_eq!(
        resolve_commit(&store, &layout(), Some("main")).await.unwrap(),
        COMMIT
    );
}

#[tokio::test]
async fn test_ask_cites_retrieved_chunk() {
    let store = InMemoryBlobStore::new();
    let index = InMemoryIndex::new();
    let embedder = WordEmbedder::new();
    let pipeline = Pipeline {
        store: &store,
        index: &index,
        layout: layout(),
        progress: &NoProgress,
    };
    pipeline
        .run(&FakeSource::new(repo_files()), Some(&embedder), &settings())
        .await
        .unwrap();

    let generator = CitingGenerator::new();
    let request = AskRequest {
        owner: "acme",
        repo: "widgets",
        question: "retry with exponential backoff",
        branch: Some("main"),
        commit: None,
        top_k: 3,
    };
    let response = ask(
        &store,
        &layout(),
        &index,
        &embedder,
        &generator,
        &request,
        AnswerSettings {
            max_tokens: 400,
            temperature: 0.1,
        },
    )
    .await
    .unwrap();

    assert_eq!(response.commit.as_deref(), Some(COMMIT));
    assert_eq!(response.hits.len(), 3);
    assert_eq!(response.hits[0].file_path, "src/retry.rs");
    for pair in response.hits.windows(2) {
        assert!(pair[0].distance <= pair[1].distance);
    }
    assert_eq!(response.citations.len(), 1);
    assert_eq!(response.citations[0].id, chunk_id("src/retry.rs", 0));
    assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_ask_without_embeddings_skips_generator() {
    let store = InMemoryBlobStore::new();
    let index = InMemoryIndex::new();
    let embedder = WordEmbedder::new();
    let generator = CitingGenerator::new();

    let request = AskRequest {
        owner: "acme",
        repo: "widgets",
        question: "anything?",
        branch: None,
        commit: None,
        top_k: 8,
    };
    let response = ask(
        &store,
        &layout(),
        &index,
        &embedder,
        &generator,
        &request,
        AnswerSettings {
            max_tokens: 400,
            temperature: 0.1,
        },
    )
    .await
    .unwrap();

    assert_eq!(response.answer, NOTHING_RELEVANT);
    assert!(response.hits.is_empty());
    assert!(response.citations.is_empty());
    assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_ask_with_missing_chunk_text_reports_locations() {
    let store = InMemoryBlobStore::new();
    let index = InMemoryIndex::new();
    let embedder = WordEmbedder::new();
    let pipeline = Pipeline {
        store: &store,
        index: &index,
        layout: layout(),
        progress: &NoProgress,
    };
    pipeline
        .run(&FakeSource::new(repo_files()), Some(&embedder), &settings())
        .await
        .unwrap();

    for path in ["README.md", "src/retry.rs", "src/consts.rs"] {
        store.remove(&layout().chunk_file(COMMIT, &short_hash(path)));
    }

    let generator = CitingGenerator::new();
    let request = AskRequest {
        owner: "acme",
        repo: "widgets",
        question: "backoff",
        branch: None,
        commit: None,
        top_k: 4,
    };
    let response = ask(
        &store,
        &layout(),
        &index,
        &embedder,
        &generator,
        &request,
        AnswerSettings {
            max_tokens: 400,
            temperature: 0.1,
        },
    )
    .await
    .unwrap();

    assert_eq!(response.answer, NO_CONTEXT);
    assert!(!response.hits.is_empty());
    assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_failed_embed_leaves_commit_parsed_and_is_rerunnable() {
    let store = InMemoryBlobStore::new();
    let index = InMemoryIndex::new();
    let pipeline = Pipeline {
        store: &store,
        index: &index,
        layout: layout(),
        progress: &NoProgress,
    };
    let broken = WordEmbedder {
        fail: true,
        calls: AtomicUsize::new(0),
    };

    let err = pipeline
        .run(&FakeSource::new(repo_files()), Some(&broken), &settings())
        .await
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<PipelineError>(),
        Some(PipelineError::Provider { status: Some(503), .. })
    ));
    let status = read_status(&store, &layout(), COMMIT).await.unwrap().unwrap();
    assert_eq!(status.stage, CommitStage::Parsed);
    assert!(load_embeddings_index(&store, &layout(), COMMIT)
        .await
        .unwrap()
        .is_none());

    let summary = pipeline
        .embed(COMMIT, &WordEmbedder::new(), settings().embed)
        .await
        .unwrap();
    assert!(summary.total_vectors > 0);
    let status = read_status(&store, &layout(), COMMIT).await.unwrap().unwrap();
    assert_eq!(status.stage, CommitStage::Embedded);
    assert!(status.files_parsed.is_some());
}

#[tokio::test]
async fn test_run_without_embedder_stops_at_parsed() {
    let store = InMemoryBlobStore::new();
    let index = InMemoryIndex::new();
    let pipeline = Pipeline {
        store: &store,
        index: &index,
        layout: layout(),
        progress: &NoProgress,
    };
    let summary = pipeline
        .run(&FakeSource::new(repo_files()), None, &settings())
        .await
        .unwrap();
    assert_eq!(summary.stage, CommitStage::Parsed);
    assert!(summary.vectors.is_none());
    assert_eq!(index.counts("acme", "widgets").await.unwrap().embeddings, 0);
}

#[tokio::test]
async fn test_dry_run_ingest_writes_nothing() {
    let store = InMemoryBlobStore::new();
    let index = InMemoryIndex::new();
    let pipeline = Pipeline {
        store: &store,
        index: &index,
        layout: layout(),
        progress: &NoProgress,
    };
    let manifest = pipeline
        .ingest(
            &FakeSource::new(repo_files()),
            "main",
            Some("main"),
            &no_filters(),
            true,
        )
        .await
        .unwrap();
    assert_eq!(manifest.commit, COMMIT);
    assert_eq!(store.put_count(), 0);
    assert!(!store.exists(&layout().latest_ref()).await.unwrap());
    assert_eq!(index.counts("acme", "widgets").await.unwrap().commits, 0);
}

#[tokio::test]
async fn test_citations_only_include_supplied_snippets() {
    struct Fixed;

    #[async_trait]
    impl Generator for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }
        async fn generate(&self, _: &str, _: &GenerateOptions) -> Result<String> {
            Ok("See [aabbccddeeff-0002] and [aabbccddeeff-0005].".into())
        }
    }

    let snippets: Vec<Snippet> = [1, 2, 3]
        .iter()
        .map(|n| Snippet {
            id: format!("aabbccddeeff-{:04}", n),
            file_path: "src/lib.rs".into(),
            start_line: 1,
            end_line: 2,
            text: "x".into(),
        })
        .collect();

    let answer = synthesize(&Fixed, "q", &snippets, 400, 0.1).await.unwrap();
    let ids: HashMap<_, _> = answer
        .citations
        .iter()
        .map(|c| (c.id.as_str(), c.file_path.as_str()))
        .collect();
    assert_eq!(ids.len(), 1);
    assert!(ids.contains_key("aabbccddeeff-0002"));
}

#[tokio::test]
async fn test_run_with_tarball_stores_archive() {
    let store = InMemoryBlobStore::new();
    let index = InMemoryIndex::new();
    let pipeline = Pipeline {
        store: &store,
        index: &index,
        layout: layout(),
        progress: &NoProgress,
    };
    let settings = RunSettings {
        save_tarball: true,
        ..settings()
    };

    let summary = pipeline
        .run(&FakeSource::new(repo_files()), None, &settings)
        .await
        .unwrap();
    assert_eq!(summary.stage, CommitStage::Parsed);

    let key = layout().archive(COMMIT);
    assert!(key.ends_with(&format!("commits/{}/repo.tar.gz", COMMIT)));
    assert_eq!(store.get(&key).await.unwrap().unwrap(), ARCHIVE);
    assert_eq!(store.content_type(&key).as_deref(), Some(blob_store::GZIP));
}

#[tokio::test]
async fn test_run_without_tarball_stores_no_archive() {
    let store = InMemoryBlobStore::new();
    let index = InMemoryIndex::new();
    let pipeline = Pipeline {
        store: &store,
        index: &index,
        layout: layout(),
        progress: &NoProgress,
    };

    pipeline
        .run(&FakeSource::new(repo_files()), None, &settings())
        .await
        .unwrap();
    assert!(!store.exists(&layout().archive(COMMIT)).await.unwrap());
}
