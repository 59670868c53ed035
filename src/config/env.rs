use std::str::FromStr;

use super::{Config, Secret};

/// Parse `name` into `T`, logging and discarding values that do not parse.
fn parsed<T: FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!("ignoring invalid {name} value: {raw}");
            None
        }
    }
}

impl Config {
    pub(crate) fn apply_env_overrides(&mut self) {
        self.apply_env_overrides_llm();
        self.apply_env_overrides_pipeline();
        self.apply_env_secrets();
    }

    fn apply_env_overrides_llm(&mut self) {
        if let Ok(v) = std::env::var("CODERAG_LLM_PROVIDER") {
            if let Ok(kind) = serde_json::from_value(serde_json::Value::String(v.to_lowercase())) {
                self.llm.provider = kind;
            } else {
                tracing::warn!("ignoring invalid CODERAG_LLM_PROVIDER value: {v}");
            }
        }
        if let Ok(v) = std::env::var("CODERAG_LLM_BASE_URL") {
            self.llm.base_url = v;
        }
        if let Ok(v) = std::env::var("CODERAG_LLM_MODEL") {
            self.llm.model = v;
        }
        if let Ok(v) = std::env::var("CODERAG_LLM_EMBEDDING_MODEL") {
            self.llm.embedding_model = v;
        }
        if let Ok(v) = std::env::var("CODERAG_CLAUDE_MODEL") {
            self.llm.claude_model = v;
        }
        if let Some(n) = parsed("CODERAG_CLAUDE_MAX_TOKENS") {
            self.llm.claude_max_tokens = n;
        }
        if let Ok(v) = std::env::var("CODERAG_QDRANT_URL") {
            self.store.qdrant_url = v;
        }
        if let Ok(v) = std::env::var("CODERAG_COLLECTION") {
            self.store.collection = v;
        }
    }

    fn apply_env_overrides_pipeline(&mut self) {
        if let Some(n) = parsed("CODERAG_MAX_CHUNK_SIZE") {
            self.index.max_chunk_size = n;
        }
        if let Some(n) = parsed("CODERAG_CHUNK_OVERLAP") {
            self.index.overlap = n;
        }
        if let Some(n) = parsed("CODERAG_INDEX_WORKERS") {
            self.index.workers = n;
        }
        if let Some(enabled) = parsed("CODERAG_INCLUDE_TESTS") {
            self.index.include_tests = enabled;
        }
        if let Some(k) = parsed("CODERAG_DEFAULT_K") {
            self.retrieval.default_k = k;
        }
        if let Some(k) = parsed("CODERAG_MAX_K") {
            self.retrieval.max_k = k;
        }
        if let Some(t) = parsed("CODERAG_SCORE_THRESHOLD") {
            self.retrieval.score_threshold = t;
        }
        if let Some(budget) = parsed("CODERAG_CONTEXT_BUDGET") {
            self.context.budget = budget;
        }
        if let Some(secs) = parsed("CODERAG_TIMEOUT_EMBEDDING") {
            self.timeouts.embedding_seconds = secs;
        }
        if let Some(secs) = parsed("CODERAG_TIMEOUT_SEARCH") {
            self.timeouts.search_seconds = secs;
        }
        if let Some(secs) = parsed("CODERAG_TIMEOUT_LLM") {
            self.timeouts.llm_seconds = secs;
        }
    }

    fn apply_env_secrets(&mut self) {
        let key = std::env::var("CODERAG_CLAUDE_API_KEY")
            .or_else(|_| std::env::var("ANTHROPIC_API_KEY"))
            .ok()
            .filter(|k| !k.trim().is_empty());
        if let Some(key) = key {
            self.secrets.claude_api_key = Some(Secret::new(key));
        }
    }
}
