//! In-memory lexical index over a workspace tree.
//!
//! Files are sliced into fixed-size line windows and scored with
//! normalized term frequency. The index is built once per run, on the
//! first retrieve, and is never invalidated afterwards; writes made
//! later in the same run are not reflected.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use ignore::WalkBuilder;
use serde::Serialize;

pub const CHUNK_LINES: usize = 200;
pub const MAX_FILE_BYTES: u64 = 1_048_576;
pub const MAX_DEPTH: usize = 12;
pub const SNIPPET_MAX_CHARS: usize = 2000;

/// One fixed-size line window of a file.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub path: PathBuf,
    pub rel_path: String,
    pub line_start: usize,
    pub line_end: usize,
    pub text: String,
    pub term_counts: HashMap<String, usize>,
    pub token_count: usize,
}

/// One retrieve hit, ready for display and history.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub path: String,
    pub rel_path: String,
    pub line_start: usize,
    pub line_end: usize,
    pub snippet: String,
    pub score: f64,
}

#[derive(Debug, Default)]
pub struct WorkspaceIndex {
    chunks: Vec<Chunk>,
}

impl WorkspaceIndex {
    /// Walk `root` and chunk every readable text file. Oversized,
    /// binary, and unreadable files are skipped rather than failing the
    /// whole build.
    #[must_use]
    pub fn build(root: &Path) -> Self {
        let mut chunks = Vec::new();
        let walker = WalkBuilder::new(root)
            .hidden(false)
            .git_ignore(true)
            .require_git(false)
            .max_depth(Some(MAX_DEPTH))
            .build();
        for entry in walker.flatten() {
            let path = entry.path();
            if !entry.file_type().is_some_and(|t| t.is_file()) {
                continue;
            }
            if has_skipped_component(path) {
                continue;
            }
            if entry.metadata().map(|m| m.len()).unwrap_or(u64::MAX) > MAX_FILE_BYTES {
                continue;
            }
            let Ok(text) = std::fs::read_to_string(path) else {
                continue;
            };
            let rel = path
                .strip_prefix(root)
                .unwrap_or(path)
                .to_string_lossy()
                .to_string();
            chunk_file(path, &rel, &text, &mut chunks);
        }
        Self { chunks }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    #[must_use]
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Score every chunk against the query and return the `top_k` best.
    /// Score = Σ over query terms of tf / chunk token count; chunks
    /// scoring 0 are not eligible. Ties keep build order.
    #[must_use]
    pub fn search(&self, query: &str, top_k: usize) -> Vec<SearchHit> {
        let mut terms = tokenize(query);
        terms.sort();
        terms.dedup();
        if terms.is_empty() {
            return Vec::new();
        }
        let mut scored: Vec<(usize, f64)> = self
            .chunks
            .iter()
            .enumerate()
            .filter_map(|(i, chunk)| {
                let score = score_chunk(chunk, &terms);
                (score > 0.0).then_some((i, score))
            })
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored
            .into_iter()
            .take(top_k)
            .map(|(i, score)| {
                let chunk = &self.chunks[i];
                SearchHit {
                    path: chunk.path.to_string_lossy().to_string(),
                    rel_path: chunk.rel_path.clone(),
                    line_start: chunk.line_start,
                    line_end: chunk.line_end,
                    snippet: snippet_of(&chunk.text),
                    score: round4(score),
                }
            })
            .collect()
    }

    #[cfg(test)]
    fn from_chunks(chunks: Vec<Chunk>) -> Self {
        Self { chunks }
    }
}

fn chunk_file(path: &Path, rel: &str, text: &str, out: &mut Vec<Chunk>) {
    let lines: Vec<&str> = text.lines().collect();
    if lines.is_empty() {
        return;
    }
    for (window_idx, window) in lines.chunks(CHUNK_LINES).enumerate() {
        let line_start = window_idx * CHUNK_LINES + 1;
        let chunk_text = window.join("\n");
        let mut term_counts = HashMap::new();
        let mut token_count = 0usize;
        for token in tokenize(&chunk_text) {
            *term_counts.entry(token).or_insert(0) += 1;
            token_count += 1;
        }
        out.push(Chunk {
            path: path.to_path_buf(),
            rel_path: rel.to_string(),
            line_start,
            line_end: line_start + window.len() - 1,
            text: chunk_text,
            term_counts,
            token_count,
        });
    }
}

fn score_chunk(chunk: &Chunk, terms: &[String]) -> f64 {
    if chunk.token_count == 0 {
        return 0.0;
    }
    terms
        .iter()
        .map(|term| {
            let tf = chunk.term_counts.get(term).copied().unwrap_or(0);
            tf as f64 / chunk.token_count as f64
        })
        .sum()
}

/// Lowercase alphanumeric-plus-underscore tokens in source order.
/// Callers that need a term set dedup afterwards.
fn tokenize(text: &str) -> Vec<String> {
    let mut seen = Vec::new();
    let mut current = String::new();
    for ch in text.chars() {
        if ch.is_alphanumeric() || ch == '_' {
            current.extend(ch.to_lowercase());
        } else if !current.is_empty() {
            seen.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        seen.push(current);
    }
    seen
}

fn snippet_of(text: &str) -> String {
    skipper_core::truncate_preview(text, SNIPPET_MAX_CHARS)
}

fn round4(score: f64) -> f64 {
    (score * 10_000.0).round() / 10_000.0
}

fn has_skipped_component(path: &Path) -> bool {
    path.components().any(|c| {
        matches!(
            c.as_os_str().to_str(),
            Some(".git") | Some("target") | Some("node_modules") | Some(".skipper")
        )
    })
}
