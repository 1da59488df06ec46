//! Authoritative metadata store for documents and chunks (§4.1).

use std::path::Path;

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{Error, Result};
use crate::types::{Chunk, Document, Metadata};

/// Capability set for document/chunk persistence. A trait object so the
/// Indexer and Hybrid Search Engine depend on the interface, not a concrete
/// backend (§9 design notes: polymorphism via trait objects).
pub trait Storage: Send + Sync {
    fn create_document(&self, doc: &Document) -> Result<()>;
    fn get_document(&self, id: &str) -> Result<Document>;
    fn update_document(&self, doc: &Document) -> Result<()>;
    fn delete_document(&self, id: &str) -> Result<()>;
    fn list_documents(&self, offset: usize, limit: usize) -> Result<Vec<Document>>;

    fn create_chunk(&self, chunk: &Chunk) -> Result<()>;
    fn get_chunk(&self, id: &str) -> Result<Chunk>;
    fn get_chunks_by_document(&self, document_id: &str) -> Result<Vec<Chunk>>;
    fn delete_chunks_by_document(&self, document_id: &str) -> Result<()>;
    /// All-or-nothing: either every chunk is persisted or none is (§4.1).
    fn batch_create_chunks(&self, chunks: &[Chunk]) -> Result<()>;

    fn count_documents(&self) -> Result<u64>;
    fn count_chunks(&self) -> Result<u64>;

    fn close(&self) -> Result<()>;
}

/// `rusqlite`-backed implementation of [`Storage`]. The connection is guarded
/// by a single mutex, giving the single-writer discipline the spec requires
/// (WAL mode still allows concurrent readers to proceed during a writer's
/// transaction).
pub struct SqliteStorage {
    conn: Mutex<Connection>,
}

impl SqliteStorage {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(Error::from)?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(Error::from)?;
        conn.pragma_update(None, "foreign_keys", "ON")
            .map_err(Error::from)?;
        let storage = Self { conn: Mutex::new(conn) };
        storage.migrate()?;
        Ok(storage)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(Error::from)?;
        conn.pragma_update(None, "foreign_keys", "ON")
            .map_err(Error::from)?;
        let storage = Self { conn: Mutex::new(conn) };
        storage.migrate()?;
        Ok(storage)
    }

    fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS documents (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                content TEXT NOT NULL,
                metadata TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS document_chunks (
                id TEXT PRIMARY KEY,
                document_id TEXT NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
                content TEXT NOT NULL,
                chunk_index INTEGER NOT NULL,
                created_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_chunks_document ON document_chunks(document_id);
            CREATE INDEX IF NOT EXISTS idx_chunks_document_index
                ON document_chunks(document_id, chunk_index);",
        )
        .map_err(Error::from)?;
        Ok(())
    }

    fn row_to_document(row: &rusqlite::Row) -> rusqlite::Result<(String, String, String, String, i64, i64)> {
        Ok((
            row.get(0)?,
            row.get(1)?,
            row.get(2)?,
            row.get(3)?,
            row.get(4)?,
            row.get(5)?,
        ))
    }

    fn decode_document(
        (id, title, content, metadata_json, created_at, updated_at): (String, String, String, String, i64, i64),
    ) -> Result<Document> {
        let metadata: Metadata = serde_json::from_str(&metadata_json)
            .map_err(|e| Error::backend(format!("corrupt metadata for {id}: {e}")))?;
        Ok(Document {
            id,
            title,
            content,
            metadata,
            created_at,
            updated_at,
        })
    }
}

impl Storage for SqliteStorage {
    fn create_document(&self, doc: &Document) -> Result<()> {
        let metadata_json = serde_json::to_string(&doc.metadata)
            .map_err(|e| Error::backend(format!("metadata serialization: {e}")))?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO documents (id, title, content, metadata, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                content = excluded.content,
                metadata = excluded.metadata,
                updated_at = excluded.updated_at",
            params![
                doc.id,
                doc.title,
                doc.content,
                metadata_json,
                doc.created_at,
                doc.updated_at
            ],
        )
        .map_err(Error::from)?;
        Ok(())
    }

    fn get_document(&self, id: &str) -> Result<Document> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT id, title, content, metadata, created_at, updated_at
                 FROM documents WHERE id = ?1",
                params![id],
                Self::row_to_document,
            )
            .optional()
            .map_err(Error::from)?
            .ok_or_else(|| Error::not_found(format!("document {id}")))?;
        Self::decode_document(row)
    }

    fn update_document(&self, doc: &Document) -> Result<()> {
        self.create_document(doc)
    }

    fn delete_document(&self, id: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM documents WHERE id = ?1", params![id])
            .map_err(Error::from)?;
        Ok(())
    }

    fn list_documents(&self, offset: usize, limit: usize) -> Result<Vec<Document>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT id, title, content, metadata, created_at, updated_at
                 FROM documents ORDER BY created_at ASC LIMIT ?1 OFFSET ?2",
            )
            .map_err(Error::from)?;
        let rows = stmt
            .query_map(params![limit as i64, offset as i64], Self::row_to_document)
            .map_err(Error::from)?;
        let mut docs = Vec::new();
        for row in rows {
            docs.push(Self::decode_document(row.map_err(Error::from)?)?);
        }
        Ok(docs)
    }

    fn create_chunk(&self, chunk: &Chunk) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO document_chunks (id, document_id, content, chunk_index, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET
                content = excluded.content,
                chunk_index = excluded.chunk_index",
            params![
                chunk.id,
                chunk.document_id,
                chunk.content,
                chunk.chunk_index,
                chunk.created_at
            ],
        )
        .map_err(Error::from)?;
        Ok(())
    }

    fn get_chunk(&self, id: &str) -> Result<Chunk> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT id, document_id, content, chunk_index, created_at
             FROM document_chunks WHERE id = ?1",
            params![id],
            |row| {
                Ok(Chunk {
                    id: row.get(0)?,
                    document_id: row.get(1)?,
                    content: row.get(2)?,
                    chunk_index: row.get(3)?,
                    embedding: Vec::new(),
                    created_at: row.get(4)?,
                })
            },
        )
        .optional()
        .map_err(Error::from)?
        .ok_or_else(|| Error::not_found(format!("chunk {id}")))
    }

    fn get_chunks_by_document(&self, document_id: &str) -> Result<Vec<Chunk>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT id, document_id, content, chunk_index, created_at
                 FROM document_chunks WHERE document_id = ?1 ORDER BY chunk_index ASC",
            )
            .map_err(Error::from)?;
        let rows = stmt
            .query_map(params![document_id], |row| {
                Ok(Chunk {
                    id: row.get(0)?,
                    document_id: row.get(1)?,
                    content: row.get(2)?,
                    chunk_index: row.get(3)?,
                    embedding: Vec::new(),
                    created_at: row.get(4)?,
                })
            })
            .map_err(Error::from)?;
        let mut chunks = Vec::new();
        for row in rows {
            chunks.push(row.map_err(Error::from)?);
        }
        Ok(chunks)
    }

    fn delete_chunks_by_document(&self, document_id: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "DELETE FROM document_chunks WHERE document_id = ?1",
            params![document_id],
        )
        .map_err(Error::from)?;
        Ok(())
    }

    fn batch_create_chunks(&self, chunks: &[Chunk]) -> Result<()> {
        if chunks.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(Error::from)?;
        for chunk in chunks {
            tx.execute(
                "INSERT INTO document_chunks (id, document_id, content, chunk_index, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(id) DO UPDATE SET
                    content = excluded.content,
                    chunk_index = excluded.chunk_index",
                params![
                    chunk.id,
                    chunk.document_id,
                    chunk.content,
                    chunk.chunk_index,
                    chunk.created_at
                ],
            )
            .map_err(Error::from)?;
        }
        tx.commit().map_err(Error::from)?;
        Ok(())
    }

    fn count_documents(&self) -> Result<u64> {
        let conn = self.conn.lock();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM documents", [], |row| row.get(0))
            .map_err(Error::from)?;
        Ok(count as u64)
    }

    fn count_chunks(&self) -> Result<u64> {
        let conn = self.conn.lock();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM document_chunks", [], |row| row.get(0))
            .map_err(Error::from)?;
        Ok(count as u64)
    }

    fn close(&self) -> Result<()> {
        // rusqlite closes the connection on drop; nothing to flush explicitly
        // with WAL checkpointing handled by sqlite itself.
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn sample_document(id: &str) -> Document {
        Document {
            id: id.to_string(),
            title: "Report".to_string(),
            content: "hello world".to_string(),
            metadata: HashMap::new(),
            created_at: 1000,
            updated_at: 1000,
        }
    }

    #[test]
    fn create_and_get_roundtrips() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let doc = sample_document("doc1");
        storage.create_document(&doc).unwrap();
        let fetched = storage.get_document("doc1").unwrap();
        assert_eq!(fetched.title, "Report");
    }

    #[test]
    fn get_missing_document_is_not_found() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let err = storage.get_document("missing").unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn delete_document_cascades_to_chunks() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let doc = sample_document("doc1");
        storage.create_document(&doc).unwrap();
        storage
            .create_chunk(&Chunk {
                id: "doc1_0".into(),
                document_id: "doc1".into(),
                content: "hello".into(),
                chunk_index: 0,
                embedding: Vec::new(),
                created_at: 1000,
            })
            .unwrap();

        storage.delete_document("doc1").unwrap();

        assert!(storage.get_chunk("doc1_0").is_err());
        assert!(storage.get_chunks_by_document("doc1").unwrap().is_empty());
    }

    #[test]
    fn batch_create_chunks_is_atomic() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let doc = sample_document("doc1");
        storage.create_document(&doc).unwrap();

        let chunks = vec![
            Chunk {
                id: "doc1_0".into(),
                document_id: "doc1".into(),
                content: "a".into(),
                chunk_index: 0,
                embedding: Vec::new(),
                created_at: 1000,
            },
            Chunk {
                id: "doc1_1".into(),
                document_id: "doc1".into(),
                content: "b".into(),
                chunk_index: 1,
                embedding: Vec::new(),
                created_at: 1000,
            },
        ];
        storage.batch_create_chunks(&chunks).unwrap();
        assert_eq!(storage.get_chunks_by_document("doc1").unwrap().len(), 2);
    }

    #[test]
    fn list_documents_paginates() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        for i in 0..5 {
            storage
                .create_document(&sample_document(&format!("doc{i}")))
                .unwrap();
        }
        let page = storage.list_documents(1, 2).unwrap();
        assert_eq!(page.len(), 2);
    }
}
