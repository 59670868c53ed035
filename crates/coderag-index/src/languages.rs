//! Source file selection.

use std::path::Path;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lang {
    Elixir,
}

impl Lang {
    /// Identifier used in payloads and embedding headers.
    #[must_use]
    pub fn id(self) -> &'static str {
        match self {
            Self::Elixir => "elixir",
        }
    }
}

impl std::fmt::Display for Lang {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

/// Detect language from file extension.
#[must_use]
pub fn detect_language(path: &Path) -> Option<Lang> {
    match path.extension()?.to_str()? {
        "ex" | "exs" => Some(Lang::Elixir),
        _ => None,
    }
}

/// Mix build output and fetched dependencies.
const SKIPPED_DIRS: &[&str] = &["_build", "deps"];

const TEST_DIRS: &[&str] = &["test", "tests"];

/// Whether `path` (relative to the repository root) should be indexed.
///
/// Files under a `test` directory are skipped unless `include_tests` is set.
#[must_use]
pub fn is_indexable(path: &Path, include_tests: bool) -> bool {
    if detect_language(path).is_none() {
        return false;
    }
    path.components().all(|c| {
        let Some(name) = c.as_os_str().to_str() else {
            return true;
        };
        !SKIPPED_DIRS.contains(&name) && (include_tests || !TEST_DIRS.contains(&name))
    })
}
