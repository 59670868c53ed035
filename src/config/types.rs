use std::fmt;
use std::time::Duration;

use coderag_index::chunker::ChunkerConfig;
use coderag_index::{BudgetUnit, ContextConfig, IndexerConfig, RerankConfig, RetrievalConfig};
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub llm: LlmConfig,
    pub store: StoreConfig,
    pub index: IndexConfig,
    pub retrieval: RetrievalSection,
    pub rerank: RerankSection,
    pub context: ContextSection,
    pub timeouts: TimeoutConfig,
    #[serde(skip)]
    pub secrets: ResolvedSecrets,
}

/// Generation backend selector. Embeddings always come from Ollama.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    Ollama,
    Claude,
}

impl ProviderKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ollama => "ollama",
            Self::Claude => "claude",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: ProviderKind,
    pub base_url: String,
    pub model: String,
    pub embedding_model: String,
    pub claude_model: String,
    pub claude_max_tokens: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::Ollama,
            base_url: "http://localhost:11434".into(),
            model: "codestral".into(),
            embedding_model: "qwen3-embedding".into(),
            claude_model: "claude-sonnet-4-20250514".into(),
            claude_max_tokens: 4096,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub qdrant_url: String,
    pub collection: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            qdrant_url: "http://localhost:6334".into(),
            collection: coderag_index::store::DEFAULT_COLLECTION.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    pub max_chunk_size: usize,
    pub overlap: usize,
    pub workers: usize,
    pub embed_batch_size: usize,
    pub upsert_batch_size: usize,
    pub include_tests: bool,
}

impl Default for IndexConfig {
    fn default() -> Self {
        let chunker = ChunkerConfig::default();
        let indexer = IndexerConfig::default();
        Self {
            max_chunk_size: chunker.max_chunk_size,
            overlap: chunker.overlap,
            workers: indexer.workers,
            embed_batch_size: indexer.embed_batch_size,
            upsert_batch_size: indexer.upsert_batch_size,
            include_tests: indexer.include_tests,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RetrievalSection {
    pub default_k: usize,
    pub max_k: usize,
    pub overfetch_factor: f32,
    pub score_threshold: f32,
}

impl Default for RetrievalSection {
    fn default() -> Self {
        let defaults = RetrievalConfig::default();
        Self {
            default_k: coderag_index::retriever::DEFAULT_K,
            max_k: defaults.max_k,
            overfetch_factor: defaults.overfetch_factor,
            score_threshold: defaults.score_threshold,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RerankSection {
    pub similarity_weight: f32,
    pub lexical_weight: f32,
    pub function_boost: f32,
    pub duplicate_threshold: f32,
}

impl Default for RerankSection {
    fn default() -> Self {
        let defaults = RerankConfig::default();
        Self {
            similarity_weight: defaults.similarity_weight,
            lexical_weight: defaults.lexical_weight,
            function_boost: defaults.function_boost,
            duplicate_threshold: defaults.duplicate_threshold,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ContextSection {
    pub budget: usize,
    pub unit: BudgetUnit,
}

impl Default for ContextSection {
    fn default() -> Self {
        let defaults = ContextConfig::default();
        Self {
            budget: defaults.budget,
            unit: defaults.unit,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub embedding_seconds: u64,
    pub search_seconds: u64,
    pub llm_seconds: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            embedding_seconds: 30,
            search_seconds: 10,
            llm_seconds: 120,
        }
    }
}

pub struct Secret(String);

impl Secret {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

#[derive(Debug, Default)]
pub struct ResolvedSecrets {
    pub claude_api_key: Option<Secret>,
}

impl Config {
    #[must_use]
    pub fn indexer_config(&self) -> IndexerConfig {
        IndexerConfig {
            chunker: ChunkerConfig {
                max_chunk_size: self.index.max_chunk_size,
                overlap: self.index.overlap,
            },
            workers: self.index.workers,
            embed_batch_size: self.index.embed_batch_size,
            upsert_batch_size: self.index.upsert_batch_size,
            include_tests: self.index.include_tests,
        }
    }

    #[must_use]
    pub fn retrieval_config(&self) -> RetrievalConfig {
        RetrievalConfig {
            max_k: self.retrieval.max_k,
            overfetch_factor: self.retrieval.overfetch_factor,
            score_threshold: self.retrieval.score_threshold,
            embed_timeout: Duration::from_secs(self.timeouts.embedding_seconds),
            search_timeout: Duration::from_secs(self.timeouts.search_seconds),
        }
    }

    #[must_use]
    pub fn rerank_config(&self) -> RerankConfig {
        RerankConfig {
            similarity_weight: self.rerank.similarity_weight,
            lexical_weight: self.rerank.lexical_weight,
            function_boost: self.rerank.function_boost,
            duplicate_threshold: self.rerank.duplicate_threshold,
        }
    }

    #[must_use]
    pub fn context_config(&self) -> ContextConfig {
        ContextConfig {
            budget: self.context.budget,
            unit: self.context.unit,
        }
    }

    #[must_use]
    pub fn generation_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.llm_seconds)
    }
}
