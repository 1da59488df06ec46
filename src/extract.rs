//! Text-extraction adapter (§1 out-of-scope external collaborator).
//!
//! The core only depends on the [`TextExtractor`] trait. [`PlainTextExtractor`]
//! reads any file as lossy UTF-8, matching the Indexer's "plain read when no
//! extractor" fallback (§4.5) for extensions without a registered extractor.

use std::path::Path;

use crate::error::Result;

pub trait TextExtractor: Send + Sync {
    /// Extract document text from the file at `path`.
    fn extract(&self, path: &Path) -> Result<String>;

    /// File extensions (without leading dot, lowercase) this extractor claims.
    /// An empty slice means "fallback for anything unclaimed".
    fn extensions(&self) -> &[&str] {
        &[]
    }
}

pub struct PlainTextExtractor;

impl TextExtractor for PlainTextExtractor {
    fn extract(&self, path: &Path) -> Result<String> {
        let bytes = std::fs::read(path)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_utf8_lossily() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("note.txt");
        std::fs::write(&path, "hello world").unwrap();
        let text = PlainTextExtractor.extract(&path).unwrap();
        assert_eq!(text, "hello world");
    }
}
