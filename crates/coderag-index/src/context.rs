//! Budgeted packing of ranked chunks into grounding context.

use std::fmt::Write;

use serde::Deserialize;

use crate::rerank::RankedChunk;

/// Notice handed to the generator in place of context when nothing relevant was found.
pub const NO_GROUNDING_NOTICE: &str = "No relevant code was found in the indexed repositories for this question. \
Answer from general knowledge and state clearly that the answer is not grounded in the codebase.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BudgetUnit {
    #[default]
    Chars,
    /// Estimated as characters / 4.
    Tokens,
}

#[derive(Debug, Clone)]
pub struct ContextConfig {
    /// Maximum combined size of included chunk texts (default: 8000).
    pub budget: usize,
    pub unit: BudgetUnit,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            budget: 8000,
            unit: BudgetUnit::Chars,
        }
    }
}

#[must_use]
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count() / 4
}

impl BudgetUnit {
    #[must_use]
    pub fn measure(self, text: &str) -> usize {
        match self {
            Self::Chars => text.chars().count(),
            Self::Tokens => estimate_tokens(text),
        }
    }
}

/// Grounding material for one query.
#[derive(Debug, Clone, Default)]
pub struct Context {
    pub chunks: Vec<RankedChunk>,
    /// At least one lower-ranked chunk was dropped to stay within budget.
    pub truncated: bool,
}

impl Context {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Combined size of the included chunk texts in `unit`.
    #[must_use]
    pub fn size(&self, unit: BudgetUnit) -> usize {
        self.chunks.iter().map(|c| unit.measure(&c.chunk.text)).sum()
    }
}

/// Append chunks in rank order until the next one would exceed the budget.
///
/// Chunks are never cut: the first chunk that does not fit ends assembly.
#[must_use]
pub fn assemble_context(ranked: Vec<RankedChunk>, config: &ContextConfig) -> Context {
    let total = ranked.len();
    let mut used = 0usize;
    let mut chunks = Vec::with_capacity(total);

    for item in ranked {
        let cost = config.unit.measure(&item.chunk.text);
        if used + cost > config.budget {
            break;
        }
        used += cost;
        chunks.push(item);
    }

    let truncated = chunks.len() < total;
    if truncated {
        tracing::debug!(
            kept = chunks.len(),
            dropped = total - chunks.len(),
            used,
            budget = config.budget,
            "context truncated to budget"
        );
    }
    Context { chunks, truncated }
}

/// Render context as XML for the generation prompt, or the no-grounding notice when empty.
#[must_use]
pub fn format_context(context: &Context) -> String {
    if context.is_empty() {
        return NO_GROUNDING_NOTICE.to_owned();
    }

    let mut out = String::from("<code_context>\n");
    for ranked in &context.chunks {
        let chunk = &ranked.chunk;
        let _ = write!(
            out,
            "  <chunk repo=\"{}\" file=\"{}\" lines=\"{}-{}\" kind=\"{}\"",
            chunk.repo,
            chunk.file_path,
            chunk.start_line,
            chunk.end_line,
            chunk.symbol_kind.as_str(),
        );
        if let Some(name) = &chunk.symbol_name {
            let _ = write!(out, " name=\"{name}\"");
        }
        if let Some(module) = &chunk.module {
            let _ = write!(out, " module=\"{module}\"");
        }
        let _ = writeln!(out, " score=\"{:.2}\">", ranked.similarity);
        out.push_str(chunk.text.trim_end_matches('\n'));
        out.push_str("\n  </chunk>\n");
    }
    out.push_str("</code_context>");
    out
}
