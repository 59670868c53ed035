mod env;
mod types;


pub use types::*;

use std::path::Path;

use anyhow::{Context, bail};

impl Config {
    /// Load configuration from a TOML file with env var overrides.
    ///
    /// Falls back to defaults when the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str::<Self>(&content).context("failed to parse config file")?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Reject combinations no component can run with.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first offending setting.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.index.max_chunk_size == 0 {
            bail!("index.max_chunk_size must be greater than zero");
        }
        if self.index.overlap >= self.index.max_chunk_size {
            bail!(
                "index.overlap ({}) must be smaller than index.max_chunk_size ({})",
                self.index.overlap,
                self.index.max_chunk_size
            );
        }
        if self.retrieval.max_k == 0 {
            bail!("retrieval.max_k must be greater than zero");
        }
        if self.retrieval.default_k > self.retrieval.max_k {
            bail!(
                "retrieval.default_k ({}) exceeds retrieval.max_k ({})",
                self.retrieval.default_k,
                self.retrieval.max_k
            );
        }
        if self.retrieval.overfetch_factor.is_nan() || self.retrieval.overfetch_factor < 1.0 {
            bail!("retrieval.overfetch_factor must be at least 1.0");
        }
        if !(-1.0..=1.0).contains(&self.retrieval.score_threshold) {
            bail!("retrieval.score_threshold must lie in [-1.0, 1.0]");
        }
        if !(0.0..=1.0).contains(&self.rerank.duplicate_threshold) {
            bail!("rerank.duplicate_threshold must lie in [0.0, 1.0]");
        }
        if self.context.budget == 0 {
            bail!("context.budget must be greater than zero");
        }
        if self.store.collection.trim().is_empty() {
            bail!("store.collection must not be empty");
        }
        if self.llm.provider == ProviderKind::Claude && self.secrets.claude_api_key.is_none() {
            bail!("claude provider requires CODERAG_CLAUDE_API_KEY or ANTHROPIC_API_KEY");
        }
        Ok(())
    }
}
