//! Syntax-aware code chunking and retrieval-augmented question answering.
//!
//! Indexing detects module and function boundaries in Elixir source with a block-nesting
//! scan, packs them into size-bounded overlapping chunks, tags each chunk with provenance
//! and a stable id, and stores embeddings in a vector index. Answering embeds the question,
//! over-fetches candidates, reranks them with a composite relevance score, packs the best
//! into a budgeted context and hands it to a generative model.

pub mod boundary;
pub mod chunker;
pub mod context;
pub mod error;
pub mod indexer;
pub mod languages;
pub mod pipeline;
pub mod rerank;
pub mod retriever;
pub mod store;
pub mod tagger;

pub use context::{BudgetUnit, Context, ContextConfig};
pub use error::{Dependency, IndexError, Result};
pub use indexer::{CodeIndexer, IndexReport, IndexerConfig};
pub use pipeline::{Answer, CodeAssistant};
pub use rerank::{RankedChunk, RerankConfig, Reranker};
pub use retriever::{CodeRetriever, Query, RetrievalConfig, RetrievalResult};
pub use store::CodeStore;
pub use tagger::Chunk;
