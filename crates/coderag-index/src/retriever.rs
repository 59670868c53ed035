//! Query embedding and over-fetching vector search.

use std::sync::Arc;
use std::time::Duration;

use coderag_llm::LlmProvider;

use crate::error::{Dependency, IndexError, Result};
use crate::store::{CodeStore, SearchHit};

/// A chunk with its vector similarity to the query.
pub type RetrievalResult = SearchHit;

pub const DEFAULT_K: usize = 5;

#[derive(Debug, Clone)]
pub struct Query {
    pub text: String,
    /// Restrict results to one repository.
    pub repo: Option<String>,
    /// Requested result count; bounded by [`RetrievalConfig::max_k`].
    pub k: usize,
}

impl Query {
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            repo: None,
            k: DEFAULT_K,
        }
    }

    #[must_use]
    pub fn with_repo(mut self, repo: impl Into<String>) -> Self {
        self.repo = Some(repo.into());
        self
    }

    #[must_use]
    pub fn with_k(mut self, k: usize) -> Self {
        self.k = k;
        self
    }
}

/// Retrieval configuration.
#[derive(Debug, Clone)]
pub struct RetrievalConfig {
    /// Upper bound applied to every query's `k` (default: 20).
    pub max_k: usize,
    /// Candidates fetched per requested result (default: 3.0).
    pub overfetch_factor: f32,
    /// Minimum cosine similarity to accept (default: 0.3).
    pub score_threshold: f32,
    pub embed_timeout: Duration,
    pub search_timeout: Duration,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            max_k: 20,
            overfetch_factor: 3.0,
            score_threshold: 0.3,
            embed_timeout: Duration::from_secs(30),
            search_timeout: Duration::from_secs(10),
        }
    }
}

/// Number of candidates to request for `k` final results.
#[must_use]
pub fn overfetch_count(k: usize, factor: f32) -> usize {
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    let wanted = (k as f64 * f64::from(factor.max(1.0))).ceil() as usize;
    wanted.max(k)
}

pub struct CodeRetriever<P: LlmProvider> {
    store: CodeStore,
    provider: Arc<P>,
    config: RetrievalConfig,
}

impl<P: LlmProvider> CodeRetriever<P> {
    #[must_use]
    pub fn new(store: CodeStore, provider: Arc<P>, config: RetrievalConfig) -> Self {
        Self {
            store,
            provider,
            config,
        }
    }

    /// The `k` actually served for a requested `k`.
    #[must_use]
    pub fn effective_k(&self, requested: usize) -> usize {
        requested.min(self.config.max_k)
    }

    /// Embed the query and fetch candidates, best similarity first.
    ///
    /// An unavailable, empty or slow vector index yields an empty list.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::DependencyUnavailable`] if the embedder fails or misses its
    /// deadline.
    pub async fn retrieve(&self, query: &Query) -> Result<Vec<RetrievalResult>> {
        let k = self.effective_k(query.k);
        if k == 0 {
            return Ok(Vec::new());
        }

        let vector = match tokio::time::timeout(
            self.config.embed_timeout,
            self.provider.embed(&query.text),
        )
        .await
        {
            Ok(Ok(vector)) => vector,
            Ok(Err(e)) => return Err(IndexError::unavailable(Dependency::Embedder, e)),
            Err(_) => {
                return Err(IndexError::unavailable(
                    Dependency::Embedder,
                    format!("no response within {:?}", self.config.embed_timeout),
                ));
            }
        };

        let limit = overfetch_count(k, self.config.overfetch_factor);
        let search = self.store.search(
            vector,
            limit,
            query.repo.as_deref(),
            Some(self.config.score_threshold),
        );
        let mut hits = match tokio::time::timeout(self.config.search_timeout, search).await {
            Ok(Ok(hits)) => hits,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "vector index unavailable, continuing without context");
                return Ok(Vec::new());
            }
            Err(_) => {
                tracing::warn!(
                    timeout_ms = self.config.search_timeout.as_millis(),
                    "vector search timed out, continuing without context"
                );
                return Ok(Vec::new());
            }
        };

        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        tracing::debug!(
            candidates = hits.len(),
            k,
            limit,
            repo = query.repo.as_deref().unwrap_or("*"),
            "retrieved candidates"
        );
        Ok(hits)
    }
}
