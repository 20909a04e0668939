//! Code and markdown chunkers.
//!
//! Splits a file's normalized text into retrieval-sized [`ChunkText`]s:
//!
//! - **Code**: fixed line windows sized so a window approximates the token
//!   budget, bounded by `min_lines..=max_lines`, sliding forward by
//!   `window - overlap` lines.
//! - **Markdown**: sections split at heading lines (outside fenced code
//!   blocks), merged greedily while the merged text stays under 90% of the
//!   token budget.
//!
//! Every chunk's text is an exact slice `text[byte_start..byte_end]` of the
//! input. Ids, hashes and token counts are assigned afterwards, the same
//! way for both strategies, so identical input always yields identical
//! chunks.

use std::sync::OnceLock;

use regex::Regex;

use crate::config::ChunkingConfig;
use crate::lang;
use crate::models::{ChunkRecord, ChunkText};
use crate::normalize::{approx_tokens, chunk_id, content_hash};

/// Approximate bytes-per-token ratio.
const CHARS_PER_TOKEN: usize = 4;

/// Average line length assumed when a file has no lines to measure.
const DEFAULT_LINE_LEN: usize = 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkParams {
    pub target_tokens: usize,
    pub max_lines: usize,
    pub min_lines: usize,
    pub overlap_lines: usize,
}

impl From<&ChunkingConfig> for ChunkParams {
    fn from(c: &ChunkingConfig) -> Self {
        Self {
            target_tokens: c.target_tokens,
            max_lines: c.max_lines,
            min_lines: c.min_lines,
            overlap_lines: c.overlap_lines,
        }
    }
}

impl Default for ChunkParams {
    fn default() -> Self {
        Self::from(&ChunkingConfig::default())
    }
}

/// A chunk before identity is assigned. Lines are 1-based and inclusive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawChunk {
    pub start_line: usize,
    pub end_line: usize,
    pub byte_start: usize,
    pub byte_end: usize,
}

/// Chunk one file and assign ids, hashes and token counts.
pub fn chunk_file(
    path: &str,
    file_sha: &str,
    lang_tag: &str,
    text: &str,
    params: &ChunkParams,
) -> Vec<ChunkText> {
    let raw = if lang::is_markdown(lang_tag) {
        chunk_markdown(text, params)
    } else {
        chunk_code(text, params)
    };

    raw.into_iter()
        .enumerate()
        .map(|(ordinal, r)| {
            let body = &text[r.byte_start..r.byte_end];
            ChunkText {
                record: ChunkRecord {
                    id: chunk_id(path, ordinal),
                    file_path: path.to_string(),
                    file_sha: file_sha.to_string(),
                    lang: lang_tag.to_string(),
                    start_line: r.start_line,
                    end_line: r.end_line,
                    byte_start: r.byte_start,
                    byte_end: r.byte_end,
                    token_count: approx_tokens(body),
                    hash: content_hash(body),
                },
                text: body.to_string(),
            }
        })
        .collect()
}

/// Byte spans `(start, end)` of each line, excluding the `\n`. A trailing
/// newline does not start an extra line.
fn line_spans(text: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut start = 0;
    for (i, b) in text.bytes().enumerate() {
        if b == b'\n' {
            spans.push((start, i));
            start = i + 1;
        }
    }
    if start < text.len() {
        spans.push((start, text.len()));
    }
    spans
}

/// Lines per code window for this text.
pub fn code_window(text: &str, params: &ChunkParams) -> usize {
    let spans = line_spans(text);
    let avg_line_len = if spans.is_empty() {
        DEFAULT_LINE_LEN
    } else {
        let total: usize = spans.iter().map(|(s, e)| e - s).sum();
        (total / spans.len()).max(10)
    };
    let for_target = params.target_tokens * CHARS_PER_TOKEN / avg_line_len;
    for_target.max(params.min_lines).min(params.max_lines).max(1)
}

/// Sliding line windows with overlap.
pub fn chunk_code(text: &str, params: &ChunkParams) -> Vec<RawChunk> {
    let spans = line_spans(text);
    if spans.is_empty() {
        return Vec::new();
    }
    let window = code_window(text, params);

    let mut chunks = Vec::new();
    let mut i = 0;
    while i < spans.len() {
        let start = i;
        let end = (i + window).min(spans.len());
        chunks.push(RawChunk {
            start_line: start + 1,
            end_line: end,
            byte_start: spans[start].0,
            byte_end: spans[end - 1].1,
        });

        if end >= spans.len() {
            break;
        }
        i = end.saturating_sub(params.overlap_lines);
        if i <= start {
            i = end;
        }
    }
    chunks
}

fn heading_regex() -> &'static Regex {
    static HEADING: OnceLock<Regex> = OnceLock::new();
    HEADING.get_or_init(|| Regex::new(r"^#{1,6}[ \t]+\S").expect("valid heading regex"))
}

/// Byte offsets where a heading line starts, ignoring fenced code blocks.
fn heading_offsets(text: &str) -> Vec<usize> {
    let heading = heading_regex();
    let mut offsets = Vec::new();
    let mut in_fence = false;
    for (start, end) in line_spans(text) {
        let line = &text[start..end];
        let trimmed = line.trim_start();
        if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
            in_fence = !in_fence;
            continue;
        }
        if !in_fence && heading.is_match(line) {
            offsets.push(start);
        }
    }
    offsets
}

/// Heading sections merged up to 90% of the token budget.
pub fn chunk_markdown(text: &str, params: &ChunkParams) -> Vec<RawChunk> {
    let mut bounds = vec![0];
    bounds.extend(heading_offsets(text).into_iter().filter(|&o| o > 0));
    bounds.push(text.len());

    // (start, end) of each non-empty section, trailing whitespace excluded.
    let sections = bounds.windows(2).filter_map(|w| {
        let (start, end) = (w[0], w[1]);
        let trimmed = text[start..end].trim_end().len();
        (!text[start..end].trim().is_empty()).then_some((start, start + trimmed))
    });

    let budget = params.target_tokens * 9 / 10;
    let mut merged: Vec<(usize, usize)> = Vec::new();
    let mut acc: Option<(usize, usize)> = None;
    for (start, end) in sections {
        acc = match acc {
            Some((acc_start, _)) if approx_tokens(&text[acc_start..end]) < budget => {
                Some((acc_start, end))
            }
            Some(done) => {
                merged.push(done);
                Some((start, end))
            }
            None => Some((start, end)),
        };
    }
    merged.extend(acc);

    merged
        .into_iter()
        .map(|(start, end)| {
            let start_line = 1 + text[..start].matches('\n').count();
            let end_line = start_line + text[start..end].matches('\n').count();
            RawChunk {
                start_line,
                end_line,
                byte_start: start,
                byte_end: end,
            }
        })
        .collect()
}
