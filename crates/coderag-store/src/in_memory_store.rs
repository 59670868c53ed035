use std::collections::HashMap;
use std::sync::RwLock;

use crate::vector_store::{
    BoxFuture, FieldValue, ScoredVectorPoint, StoredPoint, VectorFilter, VectorPoint, VectorStore,
    VectorStoreError,
};

struct Entry {
    vector: Vec<f32>,
    payload: HashMap<String, serde_json::Value>,
}

struct InMemoryCollection {
    points: HashMap<String, Entry>,
}

/// Brute-force cosine index held in process memory.
pub struct InMemoryVectorStore {
    collections: RwLock<HashMap<String, InMemoryCollection>>,
}

impl InMemoryVectorStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
        }
    }

    /// Number of points stored in `collection`, zero if it does not exist.
    #[must_use]
    pub fn len(&self, collection: &str) -> usize {
        self.collections
            .read()
            .map(|cols| cols.get(collection).map_or(0, |c| c.points.len()))
            .unwrap_or(0)
    }

    #[must_use]
    pub fn is_empty(&self, collection: &str) -> bool {
        self.len(collection) == 0
    }
}

impl Default for InMemoryVectorStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryVectorStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryVectorStore").finish_non_exhaustive()
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

fn matches_filter(payload: &HashMap<String, serde_json::Value>, filter: &VectorFilter) -> bool {
    for cond in &filter.must {
        let Some(val) = payload.get(&cond.field) else {
            return false;
        };
        if !field_matches(val, &cond.value) {
            return false;
        }
    }
    for cond in &filter.must_not {
        if let Some(val) = payload.get(&cond.field)
            && field_matches(val, &cond.value)
        {
            return false;
        }
    }
    true
}

fn field_matches(val: &serde_json::Value, expected: &FieldValue) -> bool {
    match expected {
        FieldValue::Integer(i) => val.as_i64() == Some(*i),
        FieldValue::Text(s) => val.as_str() == Some(s.as_str()),
    }
}

impl VectorStore for InMemoryVectorStore {
    fn ensure_collection(
        &self,
        collection: &str,
        _vector_size: u64,
    ) -> BoxFuture<'_, Result<(), VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let mut cols = self
                .collections
                .write()
                .map_err(|e| VectorStoreError::Collection(e.to_string()))?;
            cols.entry(collection)
                .or_insert_with(|| InMemoryCollection {
                    points: HashMap::new(),
                });
            Ok(())
        })
    }

    fn collection_exists(&self, collection: &str) -> BoxFuture<'_, Result<bool, VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let cols = self
                .collections
                .read()
                .map_err(|e| VectorStoreError::Collection(e.to_string()))?;
            Ok(cols.contains_key(&collection))
        })
    }

    fn delete_collection(&self, collection: &str) -> BoxFuture<'_, Result<(), VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let mut cols = self
                .collections
                .write()
                .map_err(|e| VectorStoreError::Collection(e.to_string()))?;
            cols.remove(&collection);
            Ok(())
        })
    }

    fn upsert(
        &self,
        collection: &str,
        points: Vec<VectorPoint>,
    ) -> BoxFuture<'_, Result<(), VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let mut cols = self
                .collections
                .write()
                .map_err(|e| VectorStoreError::Upsert(e.to_string()))?;
            let col = cols
                .get_mut(&collection)
                .ok_or(VectorStoreError::MissingCollection(collection.clone()))?;
            for p in points {
                col.points.insert(
                    p.id,
                    Entry {
                        vector: p.vector,
                        payload: p.payload,
                    },
                );
            }
            Ok(())
        })
    }

    fn search(
        &self,
        collection: &str,
        vector: Vec<f32>,
        limit: u64,
        filter: Option<VectorFilter>,
        score_threshold: Option<f32>,
    ) -> BoxFuture<'_, Result<Vec<ScoredVectorPoint>, VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let cols = self
                .collections
                .read()
                .map_err(|e| VectorStoreError::Search(e.to_string()))?;
            let col = cols
                .get(&collection)
                .ok_or(VectorStoreError::MissingCollection(collection.clone()))?;

            let f = filter.unwrap_or_default();
            let threshold = score_threshold.unwrap_or(f32::NEG_INFINITY);

            let mut scored: Vec<ScoredVectorPoint> = col
                .points
                .iter()
                .filter(|(_, e)| matches_filter(&e.payload, &f))
                .map(|(id, e)| ScoredVectorPoint {
                    id: id.clone(),
                    score: cosine_similarity(&vector, &e.vector),
                    payload: e.payload.clone(),
                })
                .filter(|p| p.score >= threshold)
                .collect();

            scored.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
            scored.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
            Ok(scored)
        })
    }

    fn delete_by_ids(
        &self,
        collection: &str,
        ids: Vec<String>,
    ) -> BoxFuture<'_, Result<(), VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            if ids.is_empty() {
                return Ok(());
            }
            let mut cols = self
                .collections
                .write()
                .map_err(|e| VectorStoreError::Delete(e.to_string()))?;
            let col = cols
                .get_mut(&collection)
                .ok_or(VectorStoreError::MissingCollection(collection.clone()))?;
            for id in &ids {
                col.points.remove(id);
            }
            Ok(())
        })
    }

    fn scroll(
        &self,
        collection: &str,
        filter: Option<VectorFilter>,
    ) -> BoxFuture<'_, Result<Vec<StoredPoint>, VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let cols = self
                .collections
                .read()
                .map_err(|e| VectorStoreError::Scroll(e.to_string()))?;
            let col = cols
                .get(&collection)
                .ok_or(VectorStoreError::MissingCollection(collection.clone()))?;

            let f = filter.unwrap_or_default();
            let mut points: Vec<StoredPoint> = col
                .points
                .iter()
                .filter(|(_, e)| matches_filter(&e.payload, &f))
                .map(|(id, e)| StoredPoint {
                    id: id.clone(),
                    payload: e.payload.clone(),
                })
                .collect();
            points.sort_by(|a, b| a.id.cmp(&b.id));
            Ok(points)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn point(id: &str, vector: Vec<f32>, repo: &str) -> VectorPoint {
        VectorPoint {
            id: id.into(),
            vector,
            payload: HashMap::from([("repo".into(), serde_json::json!(repo))]),
        }
    }

    #[tokio::test]
    async fn ensure_collection_idempotent() {
        let store = InMemoryVectorStore::new();
        assert!(!store.collection_exists("code").await.unwrap());
        store.ensure_collection("code", 3).await.unwrap();
        store.ensure_collection("code", 3).await.unwrap();
        assert!(store.collection_exists("code").await.unwrap());
    }

    #[tokio::test]
    async fn delete_collection_removes() {
        let store = InMemoryVectorStore::new();
        store.ensure_collection("code", 3).await.unwrap();
        store.delete_collection("code").await.unwrap();
        assert!(!store.collection_exists("code").await.unwrap());
    }

    #[tokio::test]
    async fn upsert_replaces_by_id() {
        let store = InMemoryVectorStore::new();
        store.ensure_collection("code", 3).await.unwrap();
        store
            .upsert("code", vec![point("a", vec![1.0, 0.0, 0.0], "backend")])
            .await
            .unwrap();
        store
            .upsert("code", vec![point("a", vec![0.0, 1.0, 0.0], "backend")])
            .await
            .unwrap();
        assert_eq!(store.len("code"), 1);
    }

    #[tokio::test]
    async fn search_orders_by_similarity() {
        let store = InMemoryVectorStore::new();
        store.ensure_collection("code", 3).await.unwrap();
        store
            .upsert(
                "code",
                vec![
                    point("a", vec![1.0, 0.0, 0.0], "backend"),
                    point("b", vec![0.6, 0.8, 0.0], "backend"),
                ],
            )
            .await
            .unwrap();

        let results = store
            .search("code", vec![1.0, 0.0, 0.0], 2, None, None)
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].id, "a");
        assert!((results[0].score - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn search_applies_filter_and_threshold() {
        let store = InMemoryVectorStore::new();
        store.ensure_collection("code", 3).await.unwrap();
        store
            .upsert(
                "code",
                vec![
                    point("a", vec![1.0, 0.0, 0.0], "backend"),
                    point("b", vec![0.9, 0.1, 0.0], "schemas"),
                    point("c", vec![0.0, 1.0, 0.0], "backend"),
                ],
            )
            .await
            .unwrap();

        let results = store
            .search(
                "code",
                vec![1.0, 0.0, 0.0],
                10,
                Some(VectorFilter::text_equals("repo", "backend")),
                Some(0.5),
            )
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "a");
    }

    #[tokio::test]
    async fn search_missing_collection_errors() {
        let store = InMemoryVectorStore::new();
        let err = store
            .search("absent", vec![1.0], 1, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, VectorStoreError::MissingCollection(_)));
    }

    #[tokio::test]
    async fn delete_by_ids_removes_points() {
        let store = InMemoryVectorStore::new();
        store.ensure_collection("code", 3).await.unwrap();
        store
            .upsert("code", vec![point("a", vec![1.0, 0.0, 0.0], "backend")])
            .await
            .unwrap();
        store.delete_by_ids("code", vec!["a".into()]).await.unwrap();
        assert!(store.is_empty("code"));
    }

    #[tokio::test]
    async fn scroll_filters_by_payload() {
        let store = InMemoryVectorStore::new();
        store.ensure_collection("code", 3).await.unwrap();
        store
            .upsert(
                "code",
                vec![
                    point("b", vec![1.0, 0.0, 0.0], "backend"),
                    point("a", vec![1.0, 0.0, 0.0], "backend"),
                    point("c", vec![1.0, 0.0, 0.0], "schemas"),
                ],
            )
            .await
            .unwrap();

        let points = store
            .scroll("code", Some(VectorFilter::text_equals("repo", "backend")))
            .await
            .unwrap();
        let ids: Vec<_> = points.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, ["a", "b"]);
    }

    #[test]
    fn cosine_similarity_orthogonal_and_zero() {
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < f32::EPSILON);
        assert!(cosine_similarity(&[0.0, 0.0], &[0.0, 1.0]).abs() < f32::EPSILON);
    }

    proptest! {
        #[test]
        fn cosine_similarity_bounded(
            a in proptest::collection::vec(-10.0f32..10.0, 4),
            b in proptest::collection::vec(-10.0f32..10.0, 4),
        ) {
            let s = cosine_similarity(&a, &b);
            prop_assert!((-1.0001..=1.0001).contains(&s));
        }
    }
}
