//! Chunk text loading for retrieved chunk ids.
//!
//! Ids are grouped by their file-id prefix and each file's chunk-text
//! artifact is read once. A missing or unreadable artifact only drops that
//! file's ids; the caller sees them as absent from [`ChunkTexts::found`].

use std::collections::{HashMap, HashSet};

use anyhow::Result;
use tracing::{debug, warn};

use crate::blob_store::{self, BlobStore};
use crate::layout::RepoLayout;
use crate::models::{ChunkText, Snippet};
use crate::normalize::file_id_of;

#[derive(Debug, Default)]
pub struct ChunkTexts {
    pub found: HashMap<String, Snippet>,
    /// File ids whose artifact does not exist.
    pub missing_files: Vec<String>,
    /// File ids whose artifact could not be read or decoded.
    pub failed_files: Vec<String>,
}

impl ChunkTexts {
    /// Snippets for `ids` that were found, in the order of `ids`.
    pub fn ordered(&self, ids: &[String]) -> Vec<Snippet> {
        ids.iter()
            .filter_map(|id| self.found.get(id).cloned())
            .collect()
    }
}

pub async fn load_chunk_texts(
    store: &dyn BlobStore,
    layout: &RepoLayout,
    commit: &str,
    ids: &[String],
) -> Result<ChunkTexts> {
    // file id -> requested chunk ids, in first-seen order
    let mut groups: Vec<(&str, HashSet<&str>)> = Vec::new();
    for id in ids {
        let file_id = file_id_of(id);
        match groups.iter_mut().find(|(f, _)| *f == file_id) {
            Some((_, wanted)) => {
                wanted.insert(id.as_str());
            }
            None => groups.push((file_id, HashSet::from([id.as_str()]))),
        }
    }

    let mut result = ChunkTexts::default();
    for (file_id, wanted) in groups {
        let key = layout.chunk_file(commit, file_id);
        let records = match blob_store::get_jsonl::<ChunkText>(store, &key).await {
            Ok(Some(records)) => records,
            Ok(None) => {
                debug!(key = %key, "chunk text artifact missing");
                result.missing_files.push(file_id.to_string());
                continue;
            }
            Err(e) => {
                warn!(key = %key, error = %e, "chunk text artifact unreadable");
                result.failed_files.push(file_id.to_string());
                continue;
            }
        };

        for chunk in records {
            if !wanted.contains(chunk.record.id.as_str()) {
                continue;
            }
            result.found.insert(
                chunk.record.id.clone(),
                Snippet {
                    id: chunk.record.id,
                    file_path: chunk.record.file_path,
                    start_line: chunk.record.start_line,
                    end_line: chunk.record.end_line,
                    text: chunk.text,
                },
            );
        }
    }
    Ok(result)
}
