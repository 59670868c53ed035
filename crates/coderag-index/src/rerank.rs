//! Composite re-scoring and near-duplicate suppression of retrieval candidates.
//!
//! Composite score = `similarity_weight * minmax(similarity) + lexical_weight * lexical`
//! plus `function_boost` for function chunks. Candidates are walked best first; one whose
//! token set is a near-duplicate of an accepted chunk is skipped.

use std::cmp::Ordering;
use std::collections::HashSet;

use crate::chunker::SymbolKind;
use crate::retriever::RetrievalResult;
use crate::tagger::Chunk;

/// Words that carry no distinguishing signal in a code question.
const STOP_WORDS: &[&str] = &[
    "a", "all", "an", "and", "any", "are", "as", "at", "be", "by", "can", "code", "could", "did",
    "do", "does", "example", "examples", "find", "for", "from", "get", "how", "i", "in", "is",
    "it", "its", "me", "my", "of", "on", "or", "our", "please", "should", "show", "some", "that",
    "the", "there", "these", "this", "those", "to", "use", "used", "using", "was", "we", "what",
    "when", "where", "which", "who", "why", "with", "would", "you", "your",
];

#[derive(Debug, Clone)]
pub struct RerankConfig {
    /// Weight of min-max normalized vector similarity (default: 0.7).
    pub similarity_weight: f32,
    /// Weight of the query-term overlap signal (default: 0.3).
    pub lexical_weight: f32,
    /// Added to function chunks (default: 0.1).
    pub function_boost: f32,
    /// Token-set Jaccard similarity at or above which a candidate is a near-duplicate
    /// (default: 0.85).
    pub duplicate_threshold: f32,
}

impl Default for RerankConfig {
    fn default() -> Self {
        Self {
            similarity_weight: 0.7,
            lexical_weight: 0.3,
            function_boost: 0.1,
            duplicate_threshold: 0.85,
        }
    }
}

/// A selected chunk with its score breakdown.
#[derive(Debug, Clone)]
pub struct RankedChunk {
    pub chunk: Chunk,
    /// Raw vector similarity from retrieval.
    pub similarity: f32,
    pub lexical: f32,
    pub score: f32,
}

/// Lowercased identifier-like tokens of `text`.
fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
}

/// Distinguishing query terms: length at least 2, stop words removed, deduplicated.
#[must_use]
pub fn query_terms(query: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    tokens(query)
        .filter(|t| t.chars().count() >= 2 && !STOP_WORDS.contains(&t.as_str()))
        .filter(|t| seen.insert(t.clone()))
        .collect()
}

/// Fraction of `terms` found verbatim in `text` (case-insensitive).
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn lexical_overlap(terms: &[String], text: &str) -> f32 {
    if terms.is_empty() {
        return 0.0;
    }
    let lowered = text.to_lowercase();
    let hits = terms.iter().filter(|t| lowered.contains(t.as_str())).count();
    hits as f32 / terms.len() as f32
}

#[allow(clippy::cast_precision_loss)]
fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f32 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let shared = a.intersection(b).count();
    let union = a.len() + b.len() - shared;
    shared as f32 / union as f32
}

struct Scored {
    ranked: RankedChunk,
    text_chars: usize,
}

fn compare(a: &Scored, b: &Scored) -> Ordering {
    b.ranked
        .score
        .total_cmp(&a.ranked.score)
        .then_with(|| b.ranked.similarity.total_cmp(&a.ranked.similarity))
        .then_with(|| a.text_chars.cmp(&b.text_chars))
        .then_with(|| a.ranked.chunk.file_path.cmp(&b.ranked.chunk.file_path))
        .then_with(|| a.ranked.chunk.start_line.cmp(&b.ranked.chunk.start_line))
}

#[derive(Debug, Clone, Default)]
pub struct Reranker {
    config: RerankConfig,
}

impl Reranker {
    #[must_use]
    pub fn new(config: RerankConfig) -> Self {
        Self { config }
    }

    /// Select at most `k` candidates by composite score, skipping near-duplicates.
    ///
    /// Returns fewer than `k` chunks when candidates run out or are duplicates.
    #[must_use]
    pub fn rerank(&self, query: &str, candidates: Vec<RetrievalResult>, k: usize) -> Vec<RankedChunk> {
        if k == 0 || candidates.is_empty() {
            return Vec::new();
        }

        let (min, max) = candidates
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), c| {
                (lo.min(c.score), hi.max(c.score))
            });
        let spread = max - min;
        let terms = query_terms(query);

        let mut scored: Vec<Scored> = candidates
            .into_iter()
            .map(|candidate| {
                let normalized = if spread > f32::EPSILON {
                    (candidate.score - min) / spread
                } else {
                    1.0
                };
                let lexical = lexical_overlap(&terms, &candidate.chunk.text);
                let boost = if candidate.chunk.symbol_kind == SymbolKind::Function {
                    self.config.function_boost
                } else {
                    0.0
                };
                let score = self.config.similarity_weight * normalized
                    + self.config.lexical_weight * lexical
                    + boost;
                Scored {
                    text_chars: candidate.chunk.text.chars().count(),
                    ranked: RankedChunk {
                        chunk: candidate.chunk,
                        similarity: candidate.score,
                        lexical,
                        score,
                    },
                }
            })
            .collect();
        scored.sort_by(compare);

        let mut accepted: Vec<RankedChunk> = Vec::with_capacity(k);
        let mut accepted_tokens: Vec<HashSet<String>> = Vec::with_capacity(k);
        let mut skipped = 0usize;
        for candidate in scored {
            if accepted.len() == k {
                break;
            }
            let candidate_tokens: HashSet<String> = tokens(&candidate.ranked.chunk.text).collect();
            if accepted_tokens
                .iter()
                .any(|t| jaccard(t, &candidate_tokens) >= self.config.duplicate_threshold)
            {
                skipped += 1;
                continue;
            }
            accepted_tokens.push(candidate_tokens);
            accepted.push(candidate.ranked);
        }

        tracing::debug!(selected = accepted.len(), duplicates = skipped, k, "reranked");
        accepted
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::chunker::{ChunkerConfig, chunk_source};
    use crate::languages::Lang;
    use crate::tagger::tag;

    fn candidate(path: &str, source: &str, score: f32) -> RetrievalResult {
        let assembled = chunk_source(source, &ChunkerConfig::default()).remove(0);
        RetrievalResult {
            chunk: tag(assembled, "backend", path, Lang::Elixir),
            score,
        }
    }

    fn paths(ranked: &[RankedChunk]) -> Vec<&str> {
        ranked.iter().map(|r| r.chunk.file_path.as_str()).collect()
    }

    #[test]
    fn query_terms_drop_stop_words_and_short_tokens() {
        assert_eq!(
            query_terms("How do I create an Invoice with a discount? invoice x"),
            vec!["create", "invoice", "discount"]
        );
        assert!(query_terms("how do I").is_empty());
    }

    #[test]
    fn lexical_overlap_fraction() {
        let terms = query_terms("invoice discount total");
        let overlap = lexical_overlap(&terms, "def apply_discount(invoice), do: invoice");
        assert!((overlap - 2.0 / 3.0).abs() < 1e-6);
        assert!(lexical_overlap(&[], "anything").abs() < f32::EPSILON);
    }

    #[test]
    fn jaccard_bounds() {
        let a: HashSet<String> = tokens("a b c").collect();
        let b: HashSet<String> = tokens("a b d").collect();
        assert!((jaccard(&a, &b) - 0.5).abs() < 1e-6);
        assert!((jaccard(&a, &a) - 1.0).abs() < f32::EPSILON);
        assert!((jaccard(&HashSet::new(), &HashSet::new()) - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn empty_input_or_zero_k() {
        let reranker = Reranker::default();
        assert!(reranker.rerank("q", Vec::new(), 5).is_empty());
        assert!(
            reranker
                .rerank("q", vec![candidate("a.ex", "def a, do: 1\n", 0.9)], 0)
                .is_empty()
        );
    }

    #[test]
    fn lexical_signal_can_outrank_similarity() {
        let candidates = vec![
            candidate("close.ex", "defmodule Close do\nend\n", 0.80),
            candidate("match.ex", "defmodule Refund do\n  @moduledoc \"refund flow\"\nend\n", 0.78),
            candidate("far.ex", "defmodule Far do\nend\n", 0.40),
        ];
        let ranked = Reranker::default().rerank("refund", candidates, 3);
        assert_eq!(paths(&ranked), vec!["match.ex", "close.ex", "far.ex"]);
        assert!((ranked[0].lexical - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn function_chunks_are_boosted() {
        let candidates = vec![
            candidate("module.ex", "defmodule M do\nend\n", 0.5),
            candidate("function.ex", "def run(x), do: x\n", 0.5),
        ];
        let ranked = Reranker::default().rerank("zzz", candidates, 2);
        assert_eq!(paths(&ranked), vec!["function.ex", "module.ex"]);
        assert!((ranked[0].score - 0.8).abs() < 1e-6);
        assert!((ranked[1].score - 0.7).abs() < 1e-6);
    }

    #[test]
    fn ties_break_on_similarity_then_length_then_path() {
        let candidates = vec![
            candidate("b.ex", "def b1, do: :b\n", 0.5),
            candidate("a.ex", "def a1, do: :a\n", 0.5),
            candidate("long.ex", "def longer_name, do: :long\n", 0.5),
        ];
        let ranked = Reranker::default().rerank("zzz", candidates, 3);
        assert_eq!(paths(&ranked), vec!["a.ex", "b.ex", "long.ex"]);
    }

    #[test]
    fn near_duplicates_are_skipped_not_padded() {
        let body = "def total(items), do: Enum.sum(items)\n";
        let candidates = vec![
            candidate("a.ex", body, 0.9),
            candidate("b.ex", body, 0.85),
            candidate("c.ex", body, 0.8),
        ];
        let ranked = Reranker::default().rerank("total", candidates, 3);
        assert_eq!(paths(&ranked), vec!["a.ex"]);
    }

    fn arb_candidate() -> impl Strategy<Value = RetrievalResult> {
        (
            "[a-z]{1,6}",
            prop::collection::vec("[a-e]{1,3}", 1..6),
            0.0f32..1.0,
        )
            .prop_map(|(name, words, score)| {
                let source = format!("def f_{name}, do: [{}]\n", words.join(", "));
                candidate(&format!("lib/{name}.ex"), &source, score)
            })
    }

    proptest! {
        #[test]
        fn output_bounded_and_free_of_near_duplicates(
            candidates in prop::collection::vec(arb_candidate(), 0..20),
            k in 0usize..10,
            query in "[a-e ]{0,12}",
        ) {
            let config = RerankConfig::default();
            let threshold = config.duplicate_threshold;
            let ranked = Reranker::new(config).rerank(&query, candidates, k);
            prop_assert!(ranked.len() <= k);
            for (i, a) in ranked.iter().enumerate() {
                let ta: HashSet<String> = tokens(&a.chunk.text).collect();
                for b in &ranked[i + 1..] {
                    let tb: HashSet<String> = tokens(&b.chunk.text).collect();
                    prop_assert!(jaccard(&ta, &tb) < threshold);
                }
            }
            for pair in ranked.windows(2) {
                prop_assert!(pair[0].score >= pair[1].score);
            }
        }
    }
}
