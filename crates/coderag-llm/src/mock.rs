//! Test-only mock provider with deterministic embeddings.

use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::LlmError;
use crate::provider::{LlmProvider, Message};

#[derive(Debug, Clone)]
pub enum MockEmbedding {
    /// Every text maps to the same vector.
    Fixed(Vec<f32>),
    /// Hashed bag-of-words over identifier tokens, L2-normalized, with the given dimension.
    Hashed(usize),
}

#[derive(Debug, Clone)]
pub struct MockProvider {
    responses: Arc<Mutex<Vec<String>>>,
    requests: Arc<Mutex<Vec<Vec<Message>>>>,
    pub default_response: String,
    pub embedding: MockEmbedding,
    pub supports_embeddings: bool,
    pub fail_chat: bool,
    pub fail_embed: bool,
    /// Milliseconds to sleep before returning a response.
    pub delay_ms: u64,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self {
            responses: Arc::new(Mutex::new(Vec::new())),
            requests: Arc::new(Mutex::new(Vec::new())),
            default_response: "mock response".into(),
            embedding: MockEmbedding::Fixed(vec![0.0; 384]),
            supports_embeddings: false,
            fail_chat: false,
            fail_embed: false,
            delay_ms: 0,
        }
    }
}

impl MockProvider {
    #[must_use]
    pub fn with_responses(responses: Vec<String>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses)),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn failing() -> Self {
        Self {
            fail_chat: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_hashed_embeddings(mut self, dims: usize) -> Self {
        self.embedding = MockEmbedding::Hashed(dims.max(1));
        self.supports_embeddings = true;
        self
    }

    #[must_use]
    pub fn with_fixed_embedding(mut self, vector: Vec<f32>) -> Self {
        self.embedding = MockEmbedding::Fixed(vector);
        self.supports_embeddings = true;
        self
    }

    #[must_use]
    pub fn with_failing_embeddings(mut self) -> Self {
        self.fail_embed = true;
        self.supports_embeddings = true;
        self
    }

    #[must_use]
    pub fn with_delay(mut self, ms: u64) -> Self {
        self.delay_ms = ms;
        self
    }

    /// Message lists received by `chat`, oldest first. Shared between clones.
    #[must_use]
    pub fn recorded_requests(&self) -> Vec<Vec<Message>> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn vector_for(&self, text: &str) -> Vec<f32> {
        match &self.embedding {
            MockEmbedding::Fixed(v) => v.clone(),
            MockEmbedding::Hashed(dims) => hashed_bag_of_words(text, *dims),
        }
    }

    async fn pause(&self) {
        if self.delay_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.delay_ms)).await;
        }
    }
}

fn hashed_bag_of_words(text: &str, dims: usize) -> Vec<f32> {
    let mut vector = vec![0.0_f32; dims];
    for token in text
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|t| !t.is_empty())
    {
        let mut hasher = DefaultHasher::new();
        token.to_lowercase().hash(&mut hasher);
        #[allow(clippy::cast_possible_truncation)]
        let slot = (hasher.finish() % dims as u64) as usize;
        vector[slot] += 1.0;
    }
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for x in &mut vector {
            *x /= norm;
        }
    }
    vector
}

impl LlmProvider for MockProvider {
    async fn chat(&self, messages: &[Message]) -> Result<String, LlmError> {
        self.pause().await;
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(messages.to_vec());
        if self.fail_chat {
            return Err(LlmError::Other("mock LLM error".into()));
        }
        let mut responses = self.responses.lock().unwrap_or_else(PoisonError::into_inner);
        if responses.is_empty() {
            Ok(self.default_response.clone())
        } else {
            Ok(responses.remove(0))
        }
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        self.pause().await;
        if !self.supports_embeddings {
            return Err(LlmError::EmbedUnsupported {
                provider: "mock".into(),
            });
        }
        if self.fail_embed {
            return Err(LlmError::Unavailable);
        }
        Ok(self.vector_for(text))
    }

    fn supports_embeddings(&self) -> bool {
        self.supports_embeddings
    }

    #[allow(clippy::unnecessary_literal_bound)]
    fn name(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn responses_are_consumed_in_order() {
        let mock = MockProvider::with_responses(vec!["one".into(), "two".into()]);
        assert_eq!(mock.chat(&[]).await.unwrap(), "one");
        assert_eq!(mock.chat(&[]).await.unwrap(), "two");
        assert_eq!(mock.chat(&[]).await.unwrap(), "mock response");
    }

    #[tokio::test]
    async fn chat_requests_are_recorded_across_clones() {
        let mock = MockProvider::default();
        let clone = mock.clone();
        clone.chat(&[Message::user("hello")]).await.unwrap();
        let recorded = mock.recorded_requests();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0][0].content, "hello");
    }

    #[tokio::test]
    async fn failing_chat_errors() {
        assert!(MockProvider::failing().chat(&[]).await.is_err());
    }

    #[tokio::test]
    async fn embed_unsupported_by_default() {
        let err = MockProvider::default().embed("x").await.unwrap_err();
        assert!(matches!(err, LlmError::EmbedUnsupported { .. }));
    }

    #[tokio::test]
    async fn hashed_embeddings_are_deterministic_and_normalized() {
        let mock = MockProvider::default().with_hashed_embeddings(64);
        let a = mock.embed("defmodule Billing do").await.unwrap();
        let b = mock.embed("defmodule Billing do").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn hashed_embedding_of_empty_text_is_zero() {
        let v = hashed_bag_of_words("  ", 8);
        assert!(v.iter().all(|x| *x == 0.0));
    }

    #[tokio::test]
    async fn failing_embeddings_report_unavailable() {
        let mock = MockProvider::default().with_failing_embeddings();
        assert!(matches!(mock.embed("x").await, Err(LlmError::Unavailable)));
    }
}
