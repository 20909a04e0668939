//! Cited answers over retrieved chunks.
//!
//! [`synthesize`] builds a context block from snippets, asks the generator
//! to answer from that context only, and keeps as citations the snippets
//! whose `[chunk-id]` token actually appears in the answer.
//!
//! [`ask`] is the whole question flow: embed, retrieve, resolve the
//! commit, load chunk texts, synthesize. It returns fixed answers without
//! calling the generator when nothing was retrieved or no text could be
//! loaded.

use std::collections::HashSet;
use std::sync::OnceLock;

use anyhow::{bail, Result};
use regex::Regex;
use serde::Serialize;
use tracing::{debug, info};

use crate::blob_store::BlobStore;
use crate::embedding::{embed_query, Embedder};
use crate::generation::{GenerateOptions, Generator};
use crate::index::RetrievalIndex;
use crate::layout::RepoLayout;
use crate::models::{Citation, SearchHit, Snippet};
use crate::resolve::resolve_commit;
use crate::search::search;
use crate::text_loader::load_chunk_texts;

pub const NOTHING_RELEVANT: &str = "I couldn't find anything relevant in this repo.";
pub const NO_CONTEXT: &str = "I found candidate locations, but couldn't load their text context.";

const SYSTEM_PROMPT: &str = "You answer questions about a codebase.
- Use ONLY the provided context. If it does not contain the answer, say you don't know.
- Cite sources inline as [chunk-id] wherever you use them.
- Be concise and accurate.";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Answer {
    pub answer: String,
    pub citations: Vec<Citation>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AskResponse {
    pub answer: String,
    pub citations: Vec<Citation>,
    pub hits: Vec<SearchHit>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AskRequest<'a> {
    pub owner: &'a str,
    pub repo: &'a str,
    pub question: &'a str,
    /// Ref pointer to read when no explicit commit is given.
    pub branch: Option<&'a str>,
    pub commit: Option<&'a str>,
    pub top_k: usize,
}

fn citation_regex() -> &'static Regex {
    static CITATION: OnceLock<Regex> = OnceLock::new();
    CITATION.get_or_init(|| Regex::new(r"\[([0-9a-f]{12}-\d{4})\]").expect("valid citation regex"))
}

/// Distinct chunk ids cited as `[xxxxxxxxxxxx-NNNN]`, in order of first use.
pub fn cited_ids(answer: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    citation_regex()
        .captures_iter(answer)
        .map(|c| c[1].to_string())
        .filter(|id| seen.insert(id.clone()))
        .collect()
}

/// One entry per snippet: `[id] path:start-end`, the text, then `---`.
pub fn build_context_block(snippets: &[Snippet]) -> String {
    snippets
        .iter()
        .map(|s| {
            format!(
                "[{}] {}:{}-{}\n{}\n---",
                s.id, s.file_path, s.start_line, s.end_line, s.text
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn build_prompt(question: &str, context: &str) -> String {
    format!(
        "Question:\n{}\n\nContext:\n{}\n\nInstructions:\n\
         - Answer the question using the context.\n\
         - Put citations such as [3339a3abe4b6-0001] in the sentences they support.\n\
         - If the context is insufficient, say so.",
        question, context
    )
}

pub async fn synthesize(
    generator: &dyn Generator,
    question: &str,
    snippets: &[Snippet],
    max_tokens: u32,
    temperature: f32,
) -> Result<Answer> {
    let context = build_context_block(snippets);
    let options = GenerateOptions {
        system_prompt: SYSTEM_PROMPT.to_string(),
        max_tokens,
        temperature,
    };
    let answer = generator
        .generate(&build_prompt(question, &context), &options)
        .await?;

    let cited: HashSet<String> = cited_ids(&answer).into_iter().collect();
    let citations = snippets
        .iter()
        .filter(|s| cited.contains(&s.id))
        .map(Citation::from)
        .collect();
    Ok(Answer { answer, citations })
}

/// Generation settings for [`ask`].
#[derive(Debug, Clone, Copy)]
pub struct AnswerSettings {
    pub max_tokens: u32,
    pub temperature: f32,
}

pub async fn ask(
    store: &dyn BlobStore,
    layout: &RepoLayout,
    index: &dyn RetrievalIndex,
    embedder: &dyn Embedder,
    generator: &dyn Generator,
    request: &AskRequest<'_>,
    settings: AnswerSettings,
) -> Result<AskResponse> {
    if request.question.trim().is_empty() {
        bail!("question must not be empty");
    }

    let vector = embed_query(embedder, request.question).await?;
    let hits = search(
        index,
        request.owner,
        request.repo,
        &vector,
        request.top_k,
        embedder.name(),
    )
    .await?;
    if hits.is_empty() {
        debug!(owner = request.owner, repo = request.repo, "no hits");
        return Ok(AskResponse {
            answer: NOTHING_RELEVANT.to_string(),
            citations: Vec::new(),
            hits,
            commit: None,
        });
    }

    let commit = match request.commit {
        Some(c) => c.to_string(),
        None => resolve_commit(store, layout, request.branch).await?,
    };

    let ids: Vec<String> = hits.iter().map(|h| h.id.clone()).collect();
    let texts = load_chunk_texts(store, layout, &commit, &ids).await?;
    let snippets = texts.ordered(&ids);
    if snippets.is_empty() {
        return Ok(AskResponse {
            answer: NO_CONTEXT.to_string(),
            citations: Vec::new(),
            hits,
            commit: Some(commit),
        });
    }

    let answer = synthesize(
        generator,
        request.question,
        &snippets,
        settings.max_tokens,
        settings.temperature,
    )
    .await?;
    info!(
        owner = request.owner,
        repo = request.repo,
        commit = %commit,
        snippets = snippets.len(),
        citations = answer.citations.len(),
        "answer generated"
    );
    Ok(AskResponse {
        answer: answer.answer,
        citations: answer.citations,
        hits,
        commit: Some(commit),
    })
}
