//! Chunk persistence on top of a [`VectorStore`] collection.

use std::collections::HashMap;
use std::sync::Arc;

use coderag_store::{VectorFilter, VectorPoint, VectorStore, VectorStoreError};

use crate::error::{IndexError, Result};
use crate::tagger::Chunk;

pub const DEFAULT_COLLECTION: &str = "coderag_chunks";

/// Payload field holding the repository name.
const REPO_FIELD: &str = "repo";

/// Identity of a chunk already in the collection, as read back by [`CodeStore::stored_chunks`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredChunk {
    pub file_path: String,
    pub content_hash: String,
}

/// A search result with its decoded chunk.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub chunk: Chunk,
    pub score: f32,
}

/// Vector collection holding tagged chunks, keyed by chunk id.
#[derive(Clone)]
pub struct CodeStore {
    store: Arc<dyn VectorStore>,
    collection: String,
}

impl std::fmt::Debug for CodeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodeStore")
            .field("collection", &self.collection)
            .finish_non_exhaustive()
    }
}

fn chunk_to_payload(chunk: &Chunk) -> Result<HashMap<String, serde_json::Value>> {
    match serde_json::to_value(chunk)? {
        serde_json::Value::Object(map) => Ok(map.into_iter().collect()),
        other => Err(IndexError::Other(format!(
            "chunk serialized to non-object payload: {other}"
        ))),
    }
}

fn payload_to_chunk(
    payload: HashMap<String, serde_json::Value>,
) -> std::result::Result<Chunk, serde_json::Error> {
    serde_json::from_value(serde_json::Value::Object(payload.into_iter().collect()))
}

impl CodeStore {
    #[must_use]
    pub fn new(store: Arc<dyn VectorStore>, collection: impl Into<String>) -> Self {
        Self {
            store,
            collection: collection.into(),
        }
    }

    /// # Errors
    ///
    /// Returns an error if the collection cannot be created.
    pub async fn ensure_collection(&self, vector_size: u64) -> Result<()> {
        self.store
            .ensure_collection(&self.collection, vector_size)
            .await?;
        Ok(())
    }

    /// Upsert chunks with their embeddings. Equal ids replace existing entries.
    ///
    /// # Errors
    ///
    /// Returns an error if payload encoding or the upsert fails.
    pub async fn upsert_chunks(&self, chunks: &[Chunk], vectors: Vec<Vec<f32>>) -> Result<()> {
        if chunks.len() != vectors.len() {
            return Err(IndexError::Other(format!(
                "{} chunks but {} vectors",
                chunks.len(),
                vectors.len()
            )));
        }
        let points = chunks
            .iter()
            .zip(vectors)
            .map(|(chunk, vector)| {
                Ok(VectorPoint {
                    id: chunk.id.clone(),
                    vector,
                    payload: chunk_to_payload(chunk)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        self.store.upsert(&self.collection, points).await?;
        Ok(())
    }

    /// Nearest chunks to `vector`, best first, optionally restricted to one repository.
    ///
    /// Hits whose payload no longer decodes as a chunk are skipped.
    ///
    /// # Errors
    ///
    /// Returns the underlying store error, including a missing collection.
    pub async fn search(
        &self,
        vector: Vec<f32>,
        limit: usize,
        repo: Option<&str>,
        score_threshold: Option<f32>,
    ) -> std::result::Result<Vec<SearchHit>, VectorStoreError> {
        let filter = repo.map(|r| VectorFilter::text_equals(REPO_FIELD, r));
        let limit = u64::try_from(limit).unwrap_or(u64::MAX);
        let points = self
            .store
            .search(&self.collection, vector, limit, filter, score_threshold)
            .await?;

        Ok(points
            .into_iter()
            .filter_map(|point| match payload_to_chunk(point.payload) {
                Ok(chunk) => Some(SearchHit {
                    chunk,
                    score: point.score,
                }),
                Err(e) => {
                    tracing::warn!(id = %point.id, "skipping undecodable chunk payload: {e}");
                    None
                }
            })
            .collect())
    }

    /// File path and content hash of every stored chunk of `repo`, keyed by chunk id.
    ///
    /// A missing collection yields an empty map.
    ///
    /// # Errors
    ///
    /// Returns an error if the scroll fails.
    pub async fn stored_chunks(&self, repo: &str) -> Result<HashMap<String, StoredChunk>> {
        let points = match self
            .store
            .scroll(
                &self.collection,
                Some(VectorFilter::text_equals(REPO_FIELD, repo)),
            )
            .await
        {
            Ok(points) => points,
            Err(VectorStoreError::MissingCollection(_)) => return Ok(HashMap::new()),
            Err(e) => return Err(e.into()),
        };

        let field = |payload: &HashMap<String, serde_json::Value>, key: &str| {
            payload
                .get(key)
                .and_then(serde_json::Value::as_str)
                .unwrap_or_default()
                .to_owned()
        };
        Ok(points
            .into_iter()
            .map(|point| {
                let stored = StoredChunk {
                    file_path: field(&point.payload, "file_path"),
                    content_hash: field(&point.payload, "content_hash"),
                };
                (point.id, stored)
            })
            .collect())
    }

    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub async fn remove(&self, ids: Vec<String>) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        self.store.delete_by_ids(&self.collection, ids).await?;
        Ok(())
    }

    /// Drop the whole collection, every repository included. Returns whether it existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the existence check or the delete fails.
    pub async fn reset(&self) -> Result<bool> {
        if !self.store.collection_exists(&self.collection).await? {
            return Ok(false);
        }
        self.store.delete_collection(&self.collection).await?;
        tracing::info!(collection = %self.collection, "collection dropped");
        Ok(true)
    }
}
