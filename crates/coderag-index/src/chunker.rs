//! Greedy boundary packing with character overlap.
//!
//! Sizes are measured in characters. The size budget applies to the fresh content of a
//! chunk; the overlap seed copied from the previous chunk's tail comes on top of it.
//! Dropping the first `overlap_chars` characters of every chunk and concatenating the rest
//! reproduces the source exactly.

use serde::{Deserialize, Serialize};

use crate::boundary::{Boundary, BoundaryKind, detect_boundaries};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SymbolKind {
    Module,
    Function,
    /// Chunk spans more than one boundary.
    Mixed,
    Other,
}

impl SymbolKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Module => "module",
            Self::Function => "function",
            Self::Mixed => "mixed",
            Self::Other => "other",
        }
    }
}

impl From<BoundaryKind> for SymbolKind {
    fn from(kind: BoundaryKind) -> Self {
        match kind {
            BoundaryKind::Module => Self::Module,
            BoundaryKind::Function => Self::Function,
            BoundaryKind::Other => Self::Other,
        }
    }
}

/// Chunker configuration.
#[derive(Debug, Clone)]
pub struct ChunkerConfig {
    /// Budget for fresh content per chunk, in characters (default: 1000).
    pub max_chunk_size: usize,
    /// Characters copied from the end of the previous chunk (default: 200).
    pub overlap: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            max_chunk_size: 1000,
            overlap: 200,
        }
    }
}

/// Chunk text plus the structural metadata the tagger needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledChunk {
    pub text: String,
    pub start_line: usize,
    pub end_line: usize,
    /// Leading characters of `text` repeated from the previous chunk.
    pub overlap_chars: usize,
    pub symbol_kind: SymbolKind,
    /// Dominant symbol: the only one, or the largest in a mixed chunk.
    pub symbol_name: Option<String>,
    pub module: Option<String>,
    /// Names of every boundary packed into the chunk, in source order.
    pub symbols: Vec<String>,
    /// Position among the slices of a boundary too large for one chunk.
    pub slice_index: Option<usize>,
    /// A single line longer than the budget.
    pub oversized: bool,
}

/// Detect boundaries in `source` and pack them into chunks.
#[must_use]
pub fn chunk_source(source: &str, config: &ChunkerConfig) -> Vec<AssembledChunk> {
    let boundaries = detect_boundaries(source);
    assemble_chunks(source, &boundaries, config)
}

/// Pack a boundary partition of `source` into chunks.
///
/// Boundaries that fit the budget are merged greedily with their neighbours. Oversized
/// modules are descended into; other oversized boundaries are sliced at line granularity,
/// the first slice unseeded and later slices seeded from their predecessor.
#[must_use]
pub fn assemble_chunks(
    source: &str,
    boundaries: &[Boundary],
    config: &ChunkerConfig,
) -> Vec<AssembledChunk> {
    let mut assembler = Assembler::new(source, config);
    assembler.walk(boundaries, None);
    assembler.flush();
    assembler.out
}

struct Line {
    start: usize,
    end: usize,
    chars: usize,
}

struct Part {
    kind: BoundaryKind,
    name: Option<String>,
    module: Option<String>,
    chars: usize,
}

struct Pending {
    fresh_start: usize,
    fresh_end: usize,
    last_line: usize,
    fresh_chars: usize,
    parts: Vec<Part>,
}

struct Meta {
    symbol_kind: SymbolKind,
    symbol_name: Option<String>,
    module: Option<String>,
    symbols: Vec<String>,
    slice_index: Option<usize>,
    oversized: bool,
}

struct Assembler<'a> {
    source: &'a str,
    lines: Vec<Line>,
    max: usize,
    overlap: usize,
    pending: Option<Pending>,
    /// Byte range of the most recently emitted chunk text.
    last_text: Option<(usize, usize)>,
    out: Vec<AssembledChunk>,
}

/// Byte offset where the last `n` characters of `text[start..end]` begin.
fn tail_start(text: &str, start: usize, end: usize, n: usize) -> usize {
    if n == 0 {
        return end;
    }
    text[start..end]
        .char_indices()
        .rev()
        .nth(n - 1)
        .map_or(start, |(i, _)| start + i)
}

impl<'a> Assembler<'a> {
    fn new(source: &'a str, config: &ChunkerConfig) -> Self {
        let mut offset = 0;
        let lines = source
            .split_inclusive('\n')
            .map(|line| {
                let start = offset;
                offset += line.len();
                Line {
                    start,
                    end: offset,
                    chars: line.chars().count(),
                }
            })
            .collect();
        Self {
            source,
            lines,
            max: config.max_chunk_size.max(1),
            overlap: config.overlap,
            pending: None,
            last_text: None,
            out: Vec::new(),
        }
    }

    fn range_chars(&self, start_line: usize, end_line: usize) -> usize {
        self.lines[start_line - 1..end_line]
            .iter()
            .map(|l| l.chars)
            .sum()
    }

    fn line_of(&self, offset: usize) -> usize {
        self.lines.partition_point(|l| l.start <= offset).max(1)
    }

    fn walk(&mut self, boundaries: &[Boundary], module: Option<&str>) {
        for boundary in boundaries {
            let scope = match boundary.kind {
                BoundaryKind::Module => boundary.name.as_deref().or(module),
                _ => module,
            };
            let size = self.range_chars(boundary.start_line, boundary.end_line);
            if size <= self.max {
                self.push_whole(boundary, scope, size);
            } else if boundary.children.is_empty() {
                self.flush();
                self.slice(boundary, scope);
            } else {
                self.walk(&boundary.children, scope);
            }
        }
    }

    fn push_whole(&mut self, boundary: &Boundary, module: Option<&str>, size: usize) {
        if self
            .pending
            .as_ref()
            .is_some_and(|p| p.fresh_chars + size > self.max)
        {
            self.flush();
        }
        let start = self.lines[boundary.start_line - 1].start;
        let end = self.lines[boundary.end_line - 1].end;
        let pending = self.pending.get_or_insert_with(|| Pending {
            fresh_start: start,
            fresh_end: start,
            last_line: boundary.start_line,
            fresh_chars: 0,
            parts: Vec::new(),
        });
        pending.fresh_end = end;
        pending.last_line = boundary.end_line;
        pending.fresh_chars += size;
        pending.parts.push(Part {
            kind: boundary.kind,
            name: boundary.name.clone(),
            module: module.map(str::to_owned),
            chars: size,
        });
    }

    fn flush(&mut self) {
        let Some(pending) = self.pending.take() else {
            return;
        };
        let meta = summarize(pending.parts);
        self.emit(
            pending.fresh_start,
            pending.fresh_end,
            pending.last_line,
            true,
            meta,
        );
    }

    fn slice(&mut self, boundary: &Boundary, module: Option<&str>) {
        let mut index = 0;
        let mut window_start = boundary.start_line;
        let mut window_chars = 0;

        for line in boundary.start_line..=boundary.end_line {
            let chars = self.lines[line - 1].chars;
            if window_chars > 0 && window_chars + chars > self.max {
                self.emit_slice(boundary, module, window_start, line - 1, index, window_chars);
                index += 1;
                window_start = line;
                window_chars = 0;
            }
            window_chars += chars;
        }
        self.emit_slice(
            boundary,
            module,
            window_start,
            boundary.end_line,
            index,
            window_chars,
        );
    }

    fn emit_slice(
        &mut self,
        boundary: &Boundary,
        module: Option<&str>,
        start_line: usize,
        end_line: usize,
        index: usize,
        chars: usize,
    ) {
        let meta = Meta {
            symbol_kind: boundary.kind.into(),
            symbol_name: boundary.name.clone(),
            module: module.map(str::to_owned),
            symbols: boundary.name.iter().cloned().collect(),
            slice_index: Some(index),
            oversized: chars > self.max,
        };
        self.emit(
            self.lines[start_line - 1].start,
            self.lines[end_line - 1].end,
            end_line,
            index > 0,
            meta,
        );
    }

    fn emit(&mut self, fresh_start: usize, fresh_end: usize, end_line: usize, seeded: bool, meta: Meta) {
        let text_start = match self.last_text {
            Some((prev_start, prev_end)) if seeded && prev_end == fresh_start => {
                tail_start(self.source, prev_start, prev_end, self.overlap)
            }
            _ => fresh_start,
        };
        let overlap_chars = self.source[text_start..fresh_start].chars().count();
        self.out.push(AssembledChunk {
            text: self.source[text_start..fresh_end].to_owned(),
            start_line: self.line_of(text_start),
            end_line,
            overlap_chars,
            symbol_kind: meta.symbol_kind,
            symbol_name: meta.symbol_name,
            module: meta.module,
            symbols: meta.symbols,
            slice_index: meta.slice_index,
            oversized: meta.oversized,
        });
        self.last_text = Some((text_start, fresh_end));
    }
}

fn summarize(parts: Vec<Part>) -> Meta {
    let mut symbols: Vec<String> = Vec::new();
    for name in parts.iter().filter_map(|p| p.name.as_ref()) {
        if symbols.last() != Some(name) {
            symbols.push(name.clone());
        }
    }

    let dominant = parts
        .iter()
        .enumerate()
        .max_by(|(ia, a), (ib, b)| a.chars.cmp(&b.chars).then(ib.cmp(ia)))
        .map(|(i, _)| i)
        .unwrap_or_default();
    let module = parts
        .iter()
        .find_map(|p| p.module.clone())
        .filter(|first| parts.iter().all(|p| p.module.as_ref().is_none_or(|m| m == first)))
        .or_else(|| parts.first().and_then(|p| p.module.clone()));

    let symbol_kind = if parts.len() == 1 {
        parts[0].kind.into()
    } else {
        SymbolKind::Mixed
    };
    let symbol_name = parts.get(dominant).and_then(|p| p.name.clone());

    Meta {
        symbol_kind,
        symbol_name,
        module,
        symbols,
        slice_index: None,
        oversized: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn boundary(kind: BoundaryKind, name: &str, start_line: usize, end_line: usize) -> Boundary {
        Boundary {
            kind,
            name: Some(name.to_owned()),
            start_line,
            end_line,
            children: Vec::new(),
        }
    }

    fn reconstruct(chunks: &[AssembledChunk]) -> String {
        chunks
            .iter()
            .map(|c| c.text.chars().skip(c.overlap_chars).collect::<String>())
            .collect()
    }

    #[test]
    fn small_boundaries_merge_and_large_one_slices() {
        let source = "123456789\n".repeat(220);
        let boundaries = vec![
            boundary(BoundaryKind::Function, "a", 1, 10),
            boundary(BoundaryKind::Function, "b", 11, 20),
            boundary(BoundaryKind::Function, "c", 21, 220),
        ];
        let config = ChunkerConfig {
            max_chunk_size: 1000,
            overlap: 100,
        };
        let chunks = assemble_chunks(&source, &boundaries, &config);

        assert_eq!(chunks.len(), 3);
        let sizes: Vec<usize> = chunks.iter().map(|c| c.text.chars().count()).collect();
        assert_eq!(sizes, vec![200, 1000, 1100]);

        assert_eq!(chunks[0].symbol_kind, SymbolKind::Mixed);
        assert_eq!(chunks[0].symbols, vec!["a", "b"]);
        assert_eq!((chunks[0].start_line, chunks[0].end_line), (1, 20));
        assert_eq!(chunks[0].overlap_chars, 0);

        assert_eq!(chunks[1].symbol_kind, SymbolKind::Function);
        assert_eq!(chunks[1].slice_index, Some(0));
        assert_eq!(chunks[1].overlap_chars, 0);
        assert_eq!((chunks[1].start_line, chunks[1].end_line), (21, 120));

        assert_eq!(chunks[2].slice_index, Some(1));
        assert_eq!(chunks[2].overlap_chars, 100);
        assert_eq!((chunks[2].start_line, chunks[2].end_line), (111, 220));

        assert_eq!(reconstruct(&chunks), source);
    }

    #[test]
    fn overlap_never_exceeds_previous_chunk() {
        let source = "ab\n".to_owned() + &"x".repeat(19) + "\n";
        let boundaries = vec![
            boundary(BoundaryKind::Other, "head", 1, 1),
            boundary(BoundaryKind::Function, "body", 2, 2),
        ];
        let config = ChunkerConfig {
            max_chunk_size: 20,
            overlap: 200,
        };
        let chunks = assemble_chunks(&source, &boundaries, &config);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].overlap_chars, 3);
        assert!(chunks[1].text.starts_with("ab\n"));
        assert_eq!(chunks[1].start_line, 1);
        assert!(!chunks[1].oversized);
    }

    #[test]
    fn single_long_line_is_flagged() {
        let source = format!("short\n{}\nshort\n", "y".repeat(50));
        let boundaries = vec![boundary(BoundaryKind::Function, "f", 1, 3)];
        let config = ChunkerConfig {
            max_chunk_size: 10,
            overlap: 0,
        };
        let chunks = assemble_chunks(&source, &boundaries, &config);
        assert_eq!(chunks.len(), 3);
        assert!(!chunks[0].oversized);
        assert!(chunks[1].oversized);
        assert_eq!(chunks[1].slice_index, Some(1));
        assert!(!chunks[2].oversized);
        assert_eq!(reconstruct(&chunks), source);
    }

    #[test]
    fn oversized_module_is_descended() {
        let mut source = String::from("defmodule Shop.Cart do\n  @moduledoc false\n");
        for name in ["add", "remove", "total"] {
            source.push_str(&format!("\n  def {name}(cart) do\n"));
            for i in 0..6 {
                source.push_str(&format!("    step_{i}(cart)\n"));
            }
            source.push_str("  end\n");
        }
        source.push_str("end\n");

        let config = ChunkerConfig {
            max_chunk_size: 150,
            overlap: 20,
        };
        let chunks = chunk_source(&source, &config);

        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.module.as_deref() == Some("Shop.Cart")));
        assert_eq!(chunks[0].symbol_kind, SymbolKind::Module);
        let named: Vec<_> = chunks.iter().filter_map(|c| c.symbol_name.as_deref()).collect();
        for name in ["add", "remove", "total"] {
            assert!(named.contains(&name), "missing {name}: {named:?}");
        }
        assert_eq!(reconstruct(&chunks), source);
    }

    #[test]
    fn small_file_is_one_chunk() {
        let source = "defmodule A do\n  def a, do: 1\nend\n";
        let chunks = chunk_source(source, &ChunkerConfig::default());
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].symbol_kind, SymbolKind::Module);
        assert_eq!(chunks[0].symbol_name.as_deref(), Some("A"));
        assert_eq!(chunks[0].module.as_deref(), Some("A"));
        assert_eq!(chunks[0].text, source);
    }

    #[test]
    fn empty_source_has_no_chunks() {
        assert!(chunk_source("", &ChunkerConfig::default()).is_empty());
    }

    #[test]
    fn tail_start_handles_multibyte() {
        let s = "aé€b";
        assert_eq!(&s[tail_start(s, 0, s.len(), 2)..], "€b");
        assert_eq!(tail_start(s, 0, s.len(), 10), 0);
        assert_eq!(tail_start(s, 0, s.len(), 0), s.len());
    }

    fn arb_source() -> impl Strategy<Value = String> {
        prop::collection::vec(
            prop_oneof![
                "[a-z é]{0,40}".prop_map(|l| format!("  {l}\n")),
                "[a-z]{1,6}".prop_map(|n| format!("def f_{n} do\n  :ok\nend\n")),
                "[A-Z][a-z]{1,6}".prop_map(|n| format!("defmodule {n} do\n  def run, do: 1\nend\n")),
            ],
            1..40,
        )
        .prop_map(|parts| parts.concat())
    }

    proptest! {
        #[test]
        fn chunks_reconstruct_source(
            source in arb_source(),
            max in 10usize..400,
            overlap in 0usize..100,
        ) {
            let config = ChunkerConfig { max_chunk_size: max, overlap };
            let chunks = chunk_source(&source, &config);
            prop_assert_eq!(reconstruct(&chunks), source);
        }

        #[test]
        fn chunks_respect_budget(
            source in arb_source(),
            max in 10usize..400,
            overlap in 0usize..100,
        ) {
            let config = ChunkerConfig { max_chunk_size: max, overlap };
            let chunks = chunk_source(&source, &config);
            for (i, chunk) in chunks.iter().enumerate() {
                let total = chunk.text.chars().count();
                prop_assert!(chunk.overlap_chars <= overlap);
                if i > 0 {
                    prop_assert!(chunk.overlap_chars <= chunks[i - 1].text.chars().count());
                }
                if !chunk.oversized {
                    prop_assert!(total - chunk.overlap_chars <= max);
                    prop_assert!(total <= max + overlap);
                }
                prop_assert!(chunk.start_line <= chunk.end_line);
            }
        }
    }
}
