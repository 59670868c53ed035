//! Vector index abstraction used by the code index: a `VectorStore` trait with a Qdrant
//! backend and a brute-force in-memory backend.

pub mod in_memory_store;
pub mod qdrant_ops;
pub mod vector_store;

pub use in_memory_store::InMemoryVectorStore;
pub use qdrant_ops::QdrantOps;
pub use vector_store::{
    FieldCondition, FieldValue, ScoredVectorPoint, StoredPoint, VectorFilter, VectorPoint,
    VectorStore, VectorStoreError,
};
