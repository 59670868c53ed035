//! Chunk metadata: stable identifiers, content hashes and embedding text.

use serde::{Deserialize, Serialize};

use crate::chunker::{AssembledChunk, SymbolKind};
use crate::languages::Lang;

/// Namespace for deterministic chunk ids.
const CHUNK_ID_NAMESPACE: uuid::Uuid = uuid::Uuid::from_bytes([
    0x3c, 0x9e, 0x51, 0x2a, 0x7b, 0x04, 0x4f, 0x8d, 0xa1, 0x6e, 0x02, 0xd7, 0x95, 0x3b, 0xc8, 0x41,
]);

/// A tagged, retrievable unit of source code. Serialized as the vector payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub repo: String,
    pub file_path: String,
    pub language: Lang,
    pub symbol_kind: SymbolKind,
    pub symbol_name: Option<String>,
    pub module: Option<String>,
    #[serde(default)]
    pub symbols: Vec<String>,
    pub start_line: usize,
    pub end_line: usize,
    pub text: String,
    pub size_chars: usize,
    #[serde(default)]
    pub overlap_chars: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slice_index: Option<usize>,
    #[serde(default)]
    pub oversized: bool,
    pub content_hash: String,
}

/// Deterministic id for the chunk at `start_line..=end_line` of `file_path` in `repo`.
#[must_use]
pub fn chunk_id(repo: &str, file_path: &str, start_line: usize, end_line: usize) -> String {
    let key = format!("{repo}\0{file_path}\0{start_line}\0{end_line}");
    uuid::Uuid::new_v5(&CHUNK_ID_NAMESPACE, key.as_bytes()).to_string()
}

pub(crate) fn blake3_hex(input: &str) -> String {
    blake3::hash(input.as_bytes()).to_hex().to_string()
}

/// Attach identity and provenance to an assembled chunk.
#[must_use]
pub fn tag(assembled: AssembledChunk, repo: &str, file_path: &str, language: Lang) -> Chunk {
    Chunk {
        id: chunk_id(repo, file_path, assembled.start_line, assembled.end_line),
        repo: repo.to_owned(),
        file_path: file_path.to_owned(),
        language,
        symbol_kind: assembled.symbol_kind,
        symbol_name: assembled.symbol_name,
        module: assembled.module,
        symbols: assembled.symbols,
        start_line: assembled.start_line,
        end_line: assembled.end_line,
        size_chars: assembled.text.chars().count(),
        content_hash: blake3_hex(&assembled.text),
        text: assembled.text,
        overlap_chars: assembled.overlap_chars,
        slice_index: assembled.slice_index,
        oversized: assembled.oversized,
    }
}

/// Text sent to the embedder: a short metadata header followed by the code.
#[must_use]
pub fn contextualize_for_embedding(chunk: &Chunk) -> String {
    let mut text = String::with_capacity(chunk.text.len() + 256);

    text.push_str("# ");
    text.push_str(&chunk.file_path);
    text.push('\n');

    if let Some(module) = &chunk.module {
        text.push_str("# Module: ");
        text.push_str(module);
        text.push('\n');
    }

    if !chunk.symbols.is_empty() {
        text.push_str("# Symbols: ");
        text.push_str(&chunk.symbols.join(", "));
        text.push('\n');
    }

    text.push_str("# Type: ");
    text.push_str(chunk.symbol_kind.as_str());
    text.push('\n');

    text.push_str(&chunk.text);
    text
}

/// Short header for display in retrieved results.
#[must_use]
pub fn chunk_display_header(chunk: &Chunk) -> String {
    let name = chunk
        .symbol_name
        .as_deref()
        .unwrap_or(chunk.symbol_kind.as_str());
    format!(
        "{} :: {} (lines {}-{})",
        chunk.file_path, name, chunk.start_line, chunk.end_line
    )
}
