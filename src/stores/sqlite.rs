//! SQLite-backed chunk store over `tokio_rusqlite`.

use std::path::Path;

use async_trait::async_trait;
use tokio_rusqlite::Connection;

use crate::chunking::ChunkMethod;
use crate::types::IngestError;

use super::{ChunkStore, StoredChunk};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS chunks (
    id TEXT PRIMARY KEY,
    knowledge_base_id TEXT NOT NULL,
    source_url TEXT NOT NULL,
    chunk_index INTEGER NOT NULL,
    total_chunks INTEGER NOT NULL,
    content TEXT NOT NULL,
    start_char_index INTEGER NOT NULL,
    end_char_index INTEGER NOT NULL,
    overlap_with_previous INTEGER NOT NULL,
    chunk_method TEXT NOT NULL,
    token_count INTEGER NOT NULL,
    checksum TEXT NOT NULL,
    embedding TEXT
);
CREATE INDEX IF NOT EXISTS idx_chunks_kb_url
    ON chunks (knowledge_base_id, source_url);
";

/// Chunk store persisted in a SQLite database file.
///
/// Embeddings are stored as JSON arrays alongside the chunk row; this store
/// deliberately builds no vector index, it is the system-of-record for the
/// retrieval layer to read from.
#[derive(Clone)]
pub struct SqliteChunkStore {
    conn: Connection,
}

impl SqliteChunkStore {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, IngestError> {
        let conn = Connection::open(path)
            .await
            .map_err(|err| IngestError::Storage(err.to_string()))?;
        Self::init(conn).await
    }

    /// In-memory database, handy for tests.
    pub async fn open_in_memory() -> Result<Self, IngestError> {
        let conn = Connection::open_in_memory()
            .await
            .map_err(|err| IngestError::Storage(err.to_string()))?;
        Self::init(conn).await
    }

    async fn init(conn: Connection) -> Result<Self, IngestError> {
        conn.call(|conn| {
            conn.execute_batch(SCHEMA)
                .map_err(tokio_rusqlite::Error::Rusqlite)
        })
        .await
        .map_err(|err| IngestError::Storage(err.to_string()))?;
        Ok(Self { conn })
    }

}

const SELECT_COLUMNS: &str = "id, knowledge_base_id, source_url, chunk_index, total_chunks, \
     content, start_char_index, end_char_index, overlap_with_previous, chunk_method, \
     token_count, checksum, embedding";

#[async_trait]
impl ChunkStore for SqliteChunkStore {
    async fn find_chunks_by_source_url(
        &self,
        knowledge_base_id: &str,
        url: &str,
    ) -> Result<Vec<StoredChunk>, IngestError> {
        let kb = knowledge_base_id.to_string();
        let url = url.to_string();
        self.conn
            .call(move |conn| {
                let mut stmt = conn
                    .prepare(&format!(
                        "SELECT {SELECT_COLUMNS} FROM chunks \
                         WHERE knowledge_base_id = ?1 AND source_url = ?2 \
                         ORDER BY chunk_index ASC"
                    ))
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                let rows = stmt
                    .query_map([&kb, &url], |row| {
                        let method: String = row.get(9)?;
                        let embedding: Option<String> = row.get(12)?;
                        Ok(StoredChunk {
                            id: row.get(0)?,
                            knowledge_base_id: row.get(1)?,
                            source_url: row.get(2)?,
                            chunk_index: row.get::<_, i64>(3)? as usize,
                            total_chunks: row.get::<_, i64>(4)? as usize,
                            content: row.get(5)?,
                            start_char_index: row.get::<_, i64>(6)? as usize,
                            end_char_index: row.get::<_, i64>(7)? as usize,
                            overlap_with_previous: row.get::<_, i64>(8)? as usize,
                            chunk_method: method.parse().unwrap_or(ChunkMethod::FixedSize),
                            token_count: row.get::<_, i64>(10)? as usize,
                            checksum: row.get(11)?,
                            embedding: embedding
                                .and_then(|raw| serde_json::from_str(raw.as_str()).ok()),
                        })
                    })
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                let mut chunks = Vec::new();
                for row in rows {
                    chunks.push(row.map_err(tokio_rusqlite::Error::Rusqlite)?);
                }
                Ok(chunks)
            })
            .await
            .map_err(|err| IngestError::Storage(err.to_string()))
    }

    async fn delete_chunks_by_source_url(
        &self,
        knowledge_base_id: &str,
        url: &str,
    ) -> Result<usize, IngestError> {
        let kb = knowledge_base_id.to_string();
        let url = url.to_string();
        self.conn
            .call(move |conn| {
                let deleted = conn
                    .execute(
                        "DELETE FROM chunks WHERE knowledge_base_id = ?1 AND source_url = ?2",
                        [&kb, &url],
                    )
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                Ok(deleted)
            })
            .await
            .map_err(|err| IngestError::Storage(err.to_string()))
    }

    async fn insert_chunks(&self, chunks: Vec<StoredChunk>) -> Result<(), IngestError> {
        if chunks.is_empty() {
            return Ok(());
        }
        self.conn
            .call(move |conn| {
                let tx = conn.transaction().map_err(tokio_rusqlite::Error::Rusqlite)?;
                {
                    let mut stmt = tx
                        .prepare(
                            "INSERT INTO chunks (id, knowledge_base_id, source_url, chunk_index, \
                             total_chunks, content, start_char_index, end_char_index, \
                             overlap_with_previous, chunk_method, token_count, checksum, embedding) \
                             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                        )
                        .map_err(tokio_rusqlite::Error::Rusqlite)?;
                    for chunk in &chunks {
                        let embedding = chunk
                            .embedding
                            .as_ref()
                            .map(|v| serde_json::to_string(v).unwrap_or_default());
                        stmt.execute((
                            &chunk.id,
                            &chunk.knowledge_base_id,
                            &chunk.source_url,
                            chunk.chunk_index as i64,
                            chunk.total_chunks as i64,
                            &chunk.content,
                            chunk.start_char_index as i64,
                            chunk.end_char_index as i64,
                            chunk.overlap_with_previous as i64,
                            chunk.chunk_method.as_str(),
                            chunk.token_count as i64,
                            &chunk.checksum,
                            embedding,
                        ))
                        .map_err(tokio_rusqlite::Error::Rusqlite)?;
                    }
                }
                tx.commit().map_err(tokio_rusqlite::Error::Rusqlite)?;
                Ok(())
            })
            .await
            .map_err(|err| IngestError::Storage(err.to_string()))
    }

    async fn count(&self) -> Result<usize, IngestError> {
        self.conn
            .call(|conn| {
                let count: i64 = conn
                    .query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                Ok(count as usize)
            })
            .await
            .map_err(|err| IngestError::Storage(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(kb: &str, url: &str, index: usize, checksum: &str) -> StoredChunk {
        StoredChunk {
            id: format!("{kb}:{url}#{index}"),
            knowledge_base_id: kb.to_string(),
            source_url: url.to_string(),
            chunk_index: index,
            total_chunks: 3,
            content: format!("content {index}"),
            start_char_index: index * 10,
            end_char_index: index * 10 + 9,
            overlap_with_previous: if index == 0 { 0 } else { 5 },
            chunk_method: ChunkMethod::Structural,
            token_count: 33,
            checksum: checksum.to_string(),
            embedding: Some(vec![0.1, 0.2, 0.3]),
        }
    }

    #[tokio::test]
    async fn round_trips_chunk_rows() {
        let store = SqliteChunkStore::open_in_memory().await.unwrap();
        let url = "https://docs.example.com/guide";
        store
            .insert_chunks(vec![
                chunk("kb", url, 1, "sum"),
                chunk("kb", url, 0, "sum"),
                chunk("kb", url, 2, "sum"),
            ])
            .await
            .unwrap();

        let found = store.find_chunks_by_source_url("kb", url).await.unwrap();
        assert_eq!(found.len(), 3);
        // Ordered by chunk_index regardless of insert order.
        assert_eq!(
            found.iter().map(|c| c.chunk_index).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
        assert_eq!(found[0].chunk_method, ChunkMethod::Structural);
        assert_eq!(found[0].embedding.as_deref(), Some(&[0.1f32, 0.2, 0.3][..]));
        assert_eq!(found[1].overlap_with_previous, 5);
    }

    #[tokio::test]
    async fn delete_scopes_to_kb_and_url() {
        let store = SqliteChunkStore::open_in_memory().await.unwrap();
        store
            .insert_chunks(vec![
                chunk("kb1", "https://a/x", 0, "s"),
                chunk("kb1", "https://a/y", 0, "s"),
                chunk("kb2", "https://a/x", 0, "s"),
            ])
            .await
            .unwrap();

        let deleted = store
            .delete_chunks_by_source_url("kb1", "https://a/x")
            .await
            .unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(store.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chunks.db");
        {
            let store = SqliteChunkStore::open(&path).await.unwrap();
            store
                .insert_chunks(vec![chunk("kb", "https://a/x", 0, "s")])
                .await
                .unwrap();
        }
        let store = SqliteChunkStore::open(&path).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 1);
    }
}
