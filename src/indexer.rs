//! Coordinates Storage + Vector Index + Keyword Index maintenance, and
//! incremental filesystem synchronization (§4.5).

use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use uuid::Uuid;

use crate::embeddings::Embedder;
use crate::error::{Error, Result};
use crate::extract::TextExtractor;
use crate::keyword_index::KeywordIndex;
use crate::processing::chunker;
use crate::storage::Storage;
use crate::types::{
    Document, DocumentInput, Metadata, MetadataValue, META_SOURCE_MTIME, META_SOURCE_PATH, META_SOURCE_SIZE,
};
use crate::vector_index::VectorIndex;

pub struct Indexer {
    storage: Arc<dyn Storage>,
    vector_index: Arc<dyn VectorIndex>,
    keyword_index: Arc<dyn KeywordIndex>,
    embedder: Arc<dyn Embedder>,
    extractor: Arc<dyn TextExtractor>,
    chunk_size: usize,
    chunk_overlap: usize,
}

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Keyword-index title transform: `foo_bar_baz.pptx` tokenizes as `foo bar baz`.
fn keyword_title(title: &str) -> String {
    title.replace('_', " ")
}

impl Indexer {
    pub fn new(
        storage: Arc<dyn Storage>,
        vector_index: Arc<dyn VectorIndex>,
        keyword_index: Arc<dyn KeywordIndex>,
        embedder: Arc<dyn Embedder>,
        extractor: Arc<dyn TextExtractor>,
        chunk_size: usize,
        chunk_overlap: usize,
    ) -> Self {
        Self {
            storage,
            vector_index,
            keyword_index,
            embedder,
            extractor,
            chunk_size,
            chunk_overlap,
        }
    }

    /// Preprocess, chunk, embed, and write a document across all three
    /// backends in order Storage -> Vector -> Keyword (§3 ownership note).
    pub fn index_document(&self, mut input: DocumentInput) -> Result<Document> {
        if input.id.trim().is_empty() {
            input.id = Uuid::new_v4().to_string();
        }
        let content = chunker::preprocess(&input.content);
        let now = now_secs();

        let document = Document {
            id: input.id.clone(),
            title: input.title.clone(),
            content: content.clone(),
            metadata: input.metadata.clone(),
            created_at: now,
            updated_at: now,
        };
        self.storage.create_document(&document)?;

        let raw_chunks = chunker::chunk(&content, self.chunk_size, self.chunk_overlap);
        let raw_chunks = if raw_chunks.is_empty() {
            vec![chunker::Chunk { content: String::new(), chunk_index: 0 }]
        } else {
            raw_chunks
        };

        let texts: Vec<&str> = raw_chunks.iter().map(|c| c.content.as_str()).collect();
        let embeddings = self.embedder.embed_batch(&texts)?;

        let single = raw_chunks.len() == 1;
        let mut chunks = Vec::with_capacity(raw_chunks.len());
        let mut vector_ids = Vec::with_capacity(raw_chunks.len());
        let mut vectors = Vec::with_capacity(raw_chunks.len());

        for (raw, embedding) in raw_chunks.into_iter().zip(embeddings.into_iter()) {
            let chunk_id = if single {
                format!("{}_0", document.id)
            } else {
                format!("{}_{}", document.id, Uuid::new_v4().simple())
            };
            vector_ids.push(chunk_id.clone());
            vectors.push(embedding);
            chunks.push(crate::types::Chunk {
                id: chunk_id,
                document_id: document.id.clone(),
                content: raw.content,
                chunk_index: raw.chunk_index,
                embedding: Vec::new(),
                created_at: now,
            });
        }

        self.storage.batch_create_chunks(&chunks)?;
        self.vector_index.add(&vector_ids, &vectors)?;
        self.keyword_index
            .index(&document.id, &keyword_title(&document.title), &document.content)?;

        Ok(document)
    }

    /// Index a single file, skipping it if (path, mtime, size) is unchanged
    /// from the last indexed version (§4.5 incremental sync).
    pub fn index_file(&self, path: &Path, allowed_exts: Option<&[String]>) -> Result<()> {
        let absolute = std::fs::canonicalize(path)?;
        let meta = std::fs::metadata(&absolute)?;
        if !meta.is_file() {
            return Err(Error::invalid(format!("{} is not a regular file", absolute.display())));
        }

        if let Some(allowed) = allowed_exts {
            let ext = absolute
                .extension()
                .map(|e| e.to_string_lossy().to_lowercase())
                .unwrap_or_default();
            if !allowed.iter().any(|e| e.trim_start_matches('.').to_lowercase() == ext) {
                return Err(Error::invalid(format!("extension .{ext} is not allowed")));
            }
        }

        let mtime_ns = meta
            .modified()
            .ok()
            .and_then(|m| m.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_nanos().to_string())
            .unwrap_or_else(|| "0".to_string());
        let size = meta.len().to_string();
        let path_str = absolute.to_string_lossy().to_string();
        let doc_id = crate::fileid::file_doc_id(&absolute);

        if let Ok(existing) = self.storage.get_document(&doc_id) {
            if metadata_matches(&existing.metadata, &path_str, &mtime_ns, &size) {
                self.keyword_index
                    .index(&doc_id, &keyword_title(&existing.title), &existing.content)?;
                return Ok(());
            }
            self.delete_document(&doc_id)?;
        }

        let text = self.extractor.extract(&absolute)?;

        let title = absolute
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path_str.clone());

        let mut metadata: Metadata = Metadata::new();
        metadata.insert(META_SOURCE_PATH.to_string(), MetadataValue::String(path_str));
        metadata.insert(META_SOURCE_MTIME.to_string(), MetadataValue::String(mtime_ns));
        metadata.insert(META_SOURCE_SIZE.to_string(), MetadataValue::String(size));

        self.index_document(DocumentInput {
            id: doc_id,
            title,
            content: text,
            metadata,
        })?;
        Ok(())
    }

    /// Recursively walk `dir`, calling [`Indexer::index_file`] on every
    /// regular file. A single file's extraction failure aborts only that
    /// file (§4.5 failure model).
    pub fn index_directory(&self, dir: &Path, allowed_exts: Option<&[String]>) -> Result<()> {
        for entry in walkdir::WalkDir::new(dir).into_iter().filter_map(|e| e.ok()) {
            if entry.file_type().is_file() {
                if let Err(err) = self.index_file(entry.path(), allowed_exts) {
                    tracing::warn!(path = %entry.path().display(), error = %err, "failed to index file");
                }
            }
        }
        Ok(())
    }

    /// Keyword -> Vector -> Storage delete order (§4.5, §3).
    pub fn delete_document(&self, id: &str) -> Result<()> {
        self.keyword_index.delete(id)?;
        let chunks = self.storage.get_chunks_by_document(id)?;
        let chunk_ids: Vec<String> = chunks.into_iter().map(|c| c.id).collect();
        self.vector_index.remove(&chunk_ids)?;
        self.storage.delete_chunks_by_document(id)?;
        self.storage.delete_document(id)?;
        Ok(())
    }
}

fn metadata_matches(metadata: &Metadata, path: &str, mtime_ns: &str, size: &str) -> bool {
    metadata.get(META_SOURCE_PATH).and_then(|v| v.as_str()) == Some(path)
        && metadata.get(META_SOURCE_MTIME).and_then(|v| v.as_str()) == Some(mtime_ns)
        && metadata.get(META_SOURCE_SIZE).and_then(|v| v.as_str()) == Some(size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::HashEmbedder;
    use crate::extract::PlainTextExtractor;
    use crate::keyword_index::TantivyKeywordIndex;
    use crate::storage::SqliteStorage;
    use crate::vector_index::BruteForceIndex;

    fn build_indexer(dim: usize) -> (tempfile::TempDir, Indexer) {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
        let vector_index = Arc::new(BruteForceIndex::new(dim));
        let keyword_index = Arc::new(TantivyKeywordIndex::open(&dir.path().join("kw")).unwrap());
        let embedder = Arc::new(HashEmbedder::new(dim));
        let extractor = Arc::new(PlainTextExtractor);
        let indexer = Indexer::new(storage, vector_index, keyword_index, embedder, extractor, 200, 50);
        (dir, indexer)
    }

    #[test]
    fn index_document_creates_storage_rows_and_vectors() {
        let (_dir, indexer) = build_indexer(16);
        let doc = indexer
            .index_document(DocumentInput {
                id: "doc1".to_string(),
                title: "Report".to_string(),
                content: "hello world this is a test document".to_string(),
                metadata: Metadata::new(),
            })
            .unwrap();
        assert_eq!(doc.id, "doc1");
    }

    #[test]
    fn index_file_then_reindex_unchanged_is_keyword_only() {
        let (dir, indexer) = build_indexer(16);
        let file_path = dir.path().join("notes.txt");
        std::fs::write(&file_path, "hello from disk").unwrap();

        indexer.index_file(&file_path, None).unwrap();
        // Re-indexing the same unchanged file should not error and should
        // leave the document intact.
        indexer.index_file(&file_path, None).unwrap();

        let doc_id = crate::fileid::file_doc_id(std::fs::canonicalize(&file_path).unwrap());
        assert!(indexer.storage.get_document(&doc_id).is_ok());
    }

    #[test]
    fn delete_document_removes_chunks_and_vectors() {
        let (_dir, indexer) = build_indexer(16);
        indexer
            .index_document(DocumentInput {
                id: "doc1".to_string(),
                title: "Report".to_string(),
                content: "alpha beta gamma delta epsilon zeta eta".to_string(),
                metadata: Metadata::new(),
            })
            .unwrap();
        indexer.delete_document("doc1").unwrap();
        assert!(indexer.storage.get_document("doc1").is_err());
    }
}
