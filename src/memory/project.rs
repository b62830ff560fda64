//! Project memory
//!
//! A per-run embedding index over the workspace files. `refresh` walks the
//! tree and re-embeds only files whose `(mtime_ns, size_bytes)` changed;
//! retrieval scores snapshots against a query embedding and boosts files the
//! controller recently touched. Nothing here survives the run.

use moka::future::Cache;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tracing::debug;
use walkdir::WalkDir;

use crate::error::{Error, Result};
use crate::llm::OllamaClient;
use crate::pruner::cosine_similarity;
use crate::trace::EventLog;

/// Byte cap when reading a file for summarization/embedding
const MAX_FILE_BYTES: usize = 200_000;
/// Character cap on the embedded content excerpt
const EMBED_EXCERPT_CHARS: usize = 5_000;
/// Character cap on the one-line summary
const SUMMARY_CHARS: usize = 180;
/// Query-embedding LRU capacity
const QUERY_CACHE_ITEMS: u64 = 32;

/// Directory names excluded from indexing wherever they appear
const IGNORED_ROOTS: [&str; 9] = [
    ".git",
    ".venv",
    "venv",
    "node_modules",
    "dist",
    "build",
    "coverage",
    "__pycache__",
    crate::trace::LOG_DIR_NAME,
];

/// One indexed workspace file
#[derive(Debug, Clone)]
pub struct FileSnapshot {
    /// Workspace-relative path with forward slashes
    pub relative_path: String,
    /// Modification time in nanoseconds since the epoch
    pub mtime_ns: u128,
    /// File size in bytes
    pub size_bytes: u64,
    /// One-line summary (first three non-empty lines)
    pub summary: String,
    /// Embedding of path + summary + content excerpt
    pub embedding: Vec<f32>,
    /// Times the controller touched this file (retrieval tiebreaker)
    pub touched_count: u32,
    /// Times the file content changed across refreshes
    pub change_count: u32,
}

/// One retrieval hit
#[derive(Debug, Clone)]
pub struct RetrievedFile {
    /// Workspace-relative path
    pub relative_path: String,
    /// Boosted score used for ordering
    pub score: f64,
    /// Cosine similarity before the touch bonus
    pub base_score: f64,
    /// Applied touch bonus
    pub touch_boost: f64,
    /// Snapshot summary
    pub summary: String,
    /// File size in bytes
    pub size_bytes: u64,
}

/// Embedding index over one workspace
pub struct ProjectMemory {
    workspace_root: PathBuf,
    client: OllamaClient,
    embedding_model: String,
    log: EventLog,
    snapshots: HashMap<String, FileSnapshot>,
    query_cache: Cache<String, Vec<f32>>,
}

impl ProjectMemory {
    pub fn new(
        workspace_root: PathBuf,
        client: OllamaClient,
        embedding_model: impl Into<String>,
        log: EventLog,
    ) -> Self {
        ProjectMemory {
            workspace_root,
            client,
            embedding_model: embedding_model.into(),
            log,
            snapshots: HashMap::new(),
            query_cache: Cache::builder().max_capacity(QUERY_CACHE_ITEMS).build(),
        }
    }

    /// Number of indexed files
    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    /// Whether the index is empty
    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    /// Snapshot lookup by relative path
    pub fn snapshot(&self, relative_path: &str) -> Option<&FileSnapshot> {
        self.snapshots.get(relative_path)
    }

    /// Walk the workspace and bring the index up to date.
    ///
    /// Unchanged `(mtime_ns, size_bytes)` pairs are skipped; changed files
    /// are re-read (capped) and re-embedded; vanished files are dropped.
    pub async fn refresh(&mut self) -> Result<()> {
        let mut discovered: HashSet<String> = HashSet::new();
        let mut embedded = 0usize;

        let mut entries: Vec<walkdir::DirEntry> = WalkDir::new(&self.workspace_root)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .collect();
        entries.sort_by(|a, b| a.path().cmp(b.path()));

        for entry in entries {
            let Ok(relative) = entry.path().strip_prefix(&self.workspace_root) else {
                continue;
            };
            let rel = relative.to_string_lossy().replace('\\', "/");
            if ignore_path(&rel) {
                continue;
            }
            let Ok(metadata) = entry.metadata() else {
                continue;
            };

            let mtime_ns = metadata
                .modified()
                .ok()
                .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
                .map(|duration| duration.as_nanos())
                .unwrap_or_default();
            let size_bytes = metadata.len();

            discovered.insert(rel.clone());
            if let Some(existing) = self.snapshots.get(&rel) {
                if existing.mtime_ns == mtime_ns && existing.size_bytes == size_bytes {
                    continue;
                }
            }

            let content = safe_read_text(entry.path());
            let summary = summarize_file(&rel, &content);
            let embedding = self
                .client
                .embed(&self.embedding_model, &embedding_text(&rel, &summary, &content))
                .await?;
            embedded += 1;

            let (touched_count, change_count) = match self.snapshots.get(&rel) {
                Some(existing) => (existing.touched_count, existing.change_count + 1),
                None => (0, 0),
            };
            self.snapshots.insert(
                rel.clone(),
                FileSnapshot {
                    relative_path: rel,
                    mtime_ns,
                    size_bytes,
                    summary,
                    embedding,
                    touched_count,
                    change_count,
                },
            );
        }

        self.snapshots.retain(|path, _| discovered.contains(path));
        debug!("Project memory refresh: {} files, {} embedded", self.snapshots.len(), embedded);
        self.log.record(
            "memory_refresh",
            json!({"files": self.snapshots.len(), "embedded": embedded}),
        );
        Ok(())
    }

    /// Bump the touch counter of a recently edited file
    pub fn mark_touched(&mut self, relative_path: &str) {
        let key = relative_path.trim();
        if key.is_empty() {
            return;
        }
        if let Some(snapshot) = self.snapshots.get_mut(key) {
            snapshot.touched_count += 1;
        }
    }

    /// Retrieve the `top_k` most relevant files for a query
    pub async fn retrieve(&self, query: &str, top_k: usize) -> Result<Vec<RetrievedFile>> {
        if self.snapshots.is_empty() {
            return Ok(Vec::new());
        }

        let query_vector = self.query_embedding(query.trim()).await?;
        let mut scored: Vec<RetrievedFile> = self
            .snapshots
            .values()
            .map(|snapshot| {
                let base_score = cosine_similarity(&query_vector, &snapshot.embedding);
                let touch_boost = (snapshot.touched_count as f64 * 0.02).min(0.12);
                RetrievedFile {
                    relative_path: snapshot.relative_path.clone(),
                    score: base_score + touch_boost,
                    base_score,
                    touch_boost,
                    summary: snapshot.summary.clone(),
                    size_bytes: snapshot.size_bytes,
                }
            })
            .collect();

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k.clamp(1, scored.len()));
        Ok(scored)
    }

    /// Full content of a workspace file, empty string on any failure
    pub fn read_full_file(&self, relative_path: &str) -> String {
        let Ok(target) = crate::sandbox::resolve_path_in_workspace(&self.workspace_root, relative_path)
        else {
            return String::new();
        };
        if !target.is_file() {
            return String::new();
        }
        safe_read_text(&target)
    }

    /// Render retrieval hits as a prompt section: scored listing plus the
    /// full content of the top N files, trimmed with an explicit marker
    pub fn build_retrieval_context(
        &self,
        retrieved: &[RetrievedFile],
        include_full_top_n: usize,
        max_full_chars: usize,
    ) -> String {
        if retrieved.is_empty() {
            return "No retrieved files.".to_string();
        }

        let mut lines: Vec<String> = vec!["Retrieved relevant files:".to_string()];
        for item in retrieved {
            lines.push(format!(
                "- {} (score={:.4}, touch_boost={:.2}) :: {}",
                item.relative_path, item.score, item.touch_boost, item.summary
            ));
        }

        lines.push(String::new());
        lines.push("Top file contents (full for high-relevance files):".to_string());
        for item in retrieved.iter().take(include_full_top_n) {
            let mut content = self.read_full_file(&item.relative_path);
            let total_chars = content.chars().count();
            if total_chars > max_full_chars {
                content = content.chars().take(max_full_chars).collect();
                content.push_str(&format!("\n...<trimmed {} chars>", total_chars - max_full_chars));
            }
            lines.push(format!("--- FILE: {} ---", item.relative_path));
            lines.push(if content.is_empty() { "<empty>".to_string() } else { content });
        }

        lines.join("\n")
    }

    async fn query_embedding(&self, query: &str) -> Result<Vec<f32>> {
        let client = self.client.clone();
        let model = self.embedding_model.clone();
        let text = query.to_string();
        self.query_cache
            .try_get_with(query.to_string(), async move { client.embed(&model, &text).await })
            .await
            .map_err(|error| Error::Transport(error.to_string()))
    }
}

fn ignore_path(rel: &str) -> bool {
    rel.split('/').any(|part| {
        IGNORED_ROOTS.contains(&part) || part.starts_with('.')
    })
}

fn safe_read_text(path: &Path) -> String {
    let Ok(raw) = std::fs::read(path) else {
        return String::new();
    };
    let capped = &raw[..raw.len().min(MAX_FILE_BYTES)];
    String::from_utf8_lossy(capped).to_string()
}

fn summarize_file(rel: &str, content: &str) -> String {
    let stripped = content.trim();
    if stripped.is_empty() {
        return format!("{rel}: empty file");
    }
    let preview: String = stripped
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .take(3)
        .collect::<Vec<&str>>()
        .join(" ");
    if preview.chars().count() > SUMMARY_CHARS {
        let truncated: String = preview.chars().take(SUMMARY_CHARS).collect();
        format!("{rel}: {truncated}...")
    } else {
        format!("{rel}: {preview}")
    }
}

fn embedding_text(rel: &str, summary: &str, content: &str) -> String {
    let excerpt: String = content.chars().take(EMBED_EXCERPT_CHARS).collect();
    format!("path: {rel}\nsummary: {summary}\ncontent_excerpt:\n{excerpt}")
}
