//! Repository indexing orchestrator: walk → chunk → tag → embed → store.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use coderag_llm::LlmProvider;
use futures::StreamExt;

use crate::chunker::{ChunkerConfig, chunk_source};
use crate::error::{Dependency, IndexError, Result};
use crate::languages::{detect_language, is_indexable};
use crate::store::CodeStore;
use crate::tagger::{Chunk, contextualize_for_embedding, tag};

/// Indexer configuration.
#[derive(Debug, Clone)]
pub struct IndexerConfig {
    pub chunker: ChunkerConfig,
    /// Files read and chunked concurrently (default: 4).
    pub workers: usize,
    /// Texts per embedder call (default: 32).
    pub embed_batch_size: usize,
    /// Points per vector index upsert (default: 100).
    pub upsert_batch_size: usize,
    pub include_tests: bool,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            chunker: ChunkerConfig::default(),
            workers: 4,
            embed_batch_size: 32,
            upsert_batch_size: 100,
            include_tests: false,
        }
    }
}

/// Summary of an indexing run.
#[derive(Debug, Default)]
pub struct IndexReport {
    pub repo: String,
    pub files_scanned: usize,
    pub files_indexed: usize,
    pub chunks_created: usize,
    pub chunks_skipped: usize,
    pub chunks_removed: usize,
    pub errors: Vec<String>,
    pub duration_ms: u64,
}

/// Repository name used when none is given: the root directory's name.
#[must_use]
pub fn default_repo_name(root: &Path) -> String {
    root.canonicalize()
        .ok()
        .as_deref()
        .unwrap_or(root)
        .file_name()
        .map_or_else(|| "repo".to_owned(), |n| n.to_string_lossy().into_owned())
}

/// Indexable files under `root` as (absolute, repo-relative) pairs, sorted by relative path.
fn collect_files(root: &Path, include_tests: bool) -> Vec<(PathBuf, String)> {
    let mut files: Vec<(PathBuf, String)> = ignore::WalkBuilder::new(root)
        .hidden(true)
        .git_ignore(true)
        .build()
        .flatten()
        .filter(|e| e.file_type().is_some_and(|ft| ft.is_file()))
        .filter_map(|e| {
            let rel = e.path().strip_prefix(root).unwrap_or(e.path());
            is_indexable(rel, include_tests).then(|| {
                let rel = rel
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                (e.path().to_path_buf(), rel)
            })
        })
        .collect();
    files.sort_by(|a, b| a.1.cmp(&b.1));
    files
}

/// Read, chunk and tag one file. A whitespace-only file yields no chunks.
async fn chunk_file(
    abs_path: PathBuf,
    rel_path: String,
    repo: String,
    config: ChunkerConfig,
) -> Result<Vec<Chunk>> {
    let source = tokio::fs::read_to_string(&abs_path).await?;
    let Some(lang) = detect_language(&abs_path) else {
        return Ok(Vec::new());
    };
    if source.trim().is_empty() {
        return Ok(Vec::new());
    }

    tokio::task::spawn_blocking(move || {
        let _span = tracing::info_span!("chunk_file", file = %rel_path).entered();
        chunk_source(&source, &config)
            .into_iter()
            .map(|c| tag(c, &repo, &rel_path, lang))
            .collect()
    })
    .await
    .map_err(|e| IndexError::Other(format!("chunking task failed: {e}")))
}

/// Orchestrates indexing of repositories into one [`CodeStore`].
pub struct CodeIndexer<P: LlmProvider> {
    store: CodeStore,
    provider: Arc<P>,
    config: IndexerConfig,
}

impl<P: LlmProvider> CodeIndexer<P> {
    #[must_use]
    pub fn new(store: CodeStore, provider: Arc<P>, config: IndexerConfig) -> Self {
        Self {
            store,
            provider,
            config,
        }
    }

    /// Index every source file under `root` as repository `repo`.
    ///
    /// Re-indexing replaces the repository's chunk set: unchanged chunks are kept without
    /// re-embedding, changed and new chunks are upserted by id, and ids no longer produced
    /// are deleted. Unreadable files are recorded in the report and skipped; their
    /// previously stored chunks are kept.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::EmptyRepository`] if no chunks were produced, after removing
    /// the repository's stored chunks of files that no longer exist,
    /// [`IndexError::DependencyUnavailable`] if the embedder fails, or a store error.
    pub async fn index_repo(&self, root: &Path, repo: &str) -> Result<IndexReport> {
        let start = Instant::now();
        let mut report = IndexReport {
            repo: repo.to_owned(),
            ..IndexReport::default()
        };

        let files = collect_files(root, self.config.include_tests);
        report.files_scanned = files.len();
        let total = files.len();
        tracing::info!(repo, total, "indexing started");

        let chunker = &self.config.chunker;
        let results: Vec<(String, Result<Vec<Chunk>>)> = futures::stream::iter(files)
            .map(|(abs_path, rel_path)| {
                let task = chunk_file(abs_path, rel_path.clone(), repo.to_owned(), chunker.clone());
                async move { (rel_path, task.await) }
            })
            .buffered(self.config.workers.max(1))
            .collect()
            .await;

        let mut chunks: Vec<Chunk> = Vec::new();
        let mut failed: HashSet<String> = HashSet::new();
        for (i, (rel_path, result)) in results.into_iter().enumerate() {
            match result {
                Ok(file_chunks) => {
                    tracing::debug!(
                        file = %rel_path,
                        progress = format_args!("{}/{total}", i + 1),
                        chunks = file_chunks.len(),
                    );
                    if !file_chunks.is_empty() {
                        report.files_indexed += 1;
                    }
                    chunks.extend(file_chunks);
                }
                Err(e) => {
                    tracing::warn!(file = %rel_path, "skipping file: {e}");
                    report.errors.push(format!("{rel_path}: {e}"));
                    failed.insert(rel_path);
                }
            }
        }

        let existing = self.store.stored_chunks(repo).await?;
        let current: HashSet<&str> = chunks.iter().map(|c| c.id.as_str()).collect();
        let stale: Vec<String> = existing
            .iter()
            .filter(|(id, stored)| {
                !current.contains(id.as_str()) && !failed.contains(&stored.file_path)
            })
            .map(|(id, _)| id.clone())
            .collect();

        if chunks.is_empty() {
            if !stale.is_empty() {
                tracing::info!(repo, removed = stale.len(), "no source left, removing stored chunks");
            }
            self.store.remove(stale).await?;
            return Err(IndexError::EmptyRepository {
                repo: repo.to_owned(),
            });
        }

        let sample = self
            .provider
            .embed("dimension check")
            .await
            .map_err(|e| IndexError::unavailable(Dependency::Embedder, e))?;
        self.store
            .ensure_collection(u64::try_from(sample.len())?)
            .await?;

        let (unchanged, fresh): (Vec<Chunk>, Vec<Chunk>) = chunks.into_iter().partition(|c| {
            existing
                .get(&c.id)
                .is_some_and(|stored| stored.content_hash == c.content_hash)
        });
        report.chunks_skipped = unchanged.len();

        for batch in fresh.chunks(self.config.upsert_batch_size.max(1)) {
            let vectors = self.embed_batch(batch).await?;
            self.store.upsert_chunks(batch, vectors).await?;
            report.chunks_created += batch.len();
            tracing::debug!(
                repo,
                stored = report.chunks_created,
                total = fresh.len(),
                "batch stored"
            );
        }

        report.chunks_removed = stale.len();
        self.store.remove(stale).await?;

        report.duration_ms = u64::try_from(start.elapsed().as_millis())?;
        tracing::info!(
            repo,
            files = report.files_indexed,
            created = report.chunks_created,
            skipped = report.chunks_skipped,
            removed = report.chunks_removed,
            errors = report.errors.len(),
            duration_ms = report.duration_ms,
            "indexing finished"
        );
        Ok(report)
    }

    async fn embed_batch(&self, chunks: &[Chunk]) -> Result<Vec<Vec<f32>>> {
        let texts: Vec<String> = chunks.iter().map(contextualize_for_embedding).collect();
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.config.embed_batch_size.max(1)) {
            let embedded = self
                .provider
                .embed_batch(batch)
                .await
                .map_err(|e| IndexError::unavailable(Dependency::Embedder, e))?;
            vectors.extend(embedded);
        }
        Ok(vectors)
    }
}
