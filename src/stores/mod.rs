//! Chunk persistence, partitioned by knowledge base and source URL.
//!
//! The [`ChunkStore`] trait is the storage contract the crawl coordinator
//! consumes: read a URL's current generation (for checksum comparison),
//! delete it, and insert the replacement. Storage is partitioned by
//! `source_url`, so concurrent writes for different URLs never conflict; the
//! delete-then-insert for one URL is not atomic with respect to readers, and
//! a brief window of stale or missing chunks during replacement is accepted.

pub mod sqlite;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::chunking::ChunkMethod;
use crate::types::IngestError;

pub use sqlite::SqliteChunkStore;

/// A persisted chunk record.
///
/// Downstream search and answer generation depend on these exact fields, so
/// their names and meanings are load-bearing: `token_count` includes overlap
/// tokens once the overlap pass has applied, and every chunk of one crawl
/// generation carries the same `checksum`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StoredChunk {
    pub id: String,
    pub knowledge_base_id: String,
    pub source_url: String,
    pub chunk_index: usize,
    pub total_chunks: usize,
    pub content: String,
    pub start_char_index: usize,
    pub end_char_index: usize,
    /// Tokens duplicated from the previous chunk's tail.
    pub overlap_with_previous: usize,
    pub chunk_method: ChunkMethod,
    pub token_count: usize,
    /// Content fingerprint inherited from the extracted page.
    pub checksum: String,
    pub embedding: Option<Vec<f32>>,
}

/// Storage contract for chunk generations.
#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// All chunks currently stored for one URL, in `chunk_index` order.
    async fn find_chunks_by_source_url(
        &self,
        knowledge_base_id: &str,
        url: &str,
    ) -> Result<Vec<StoredChunk>, IngestError>;

    /// Deletes every chunk for one URL; returns how many were removed.
    async fn delete_chunks_by_source_url(
        &self,
        knowledge_base_id: &str,
        url: &str,
    ) -> Result<usize, IngestError>;

    /// Inserts a new generation of chunks.
    async fn insert_chunks(&self, chunks: Vec<StoredChunk>) -> Result<(), IngestError>;

    /// Total number of stored chunks.
    async fn count(&self) -> Result<usize, IngestError>;
}

/// In-memory store for tests and small single-process deployments.
#[derive(Debug, Default)]
pub struct MemoryChunkStore {
    chunks: Mutex<Vec<StoredChunk>>,
}

impl MemoryChunkStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything stored, for assertions.
    pub fn all(&self) -> Vec<StoredChunk> {
        self.chunks.lock().clone()
    }
}

#[async_trait]
impl ChunkStore for MemoryChunkStore {
    async fn find_chunks_by_source_url(
        &self,
        knowledge_base_id: &str,
        url: &str,
    ) -> Result<Vec<StoredChunk>, IngestError> {
        let mut found: Vec<StoredChunk> = self
            .chunks
            .lock()
            .iter()
            .filter(|c| c.knowledge_base_id == knowledge_base_id && c.source_url == url)
            .cloned()
            .collect();
        found.sort_by_key(|c| c.chunk_index);
        Ok(found)
    }

    async fn delete_chunks_by_source_url(
        &self,
        knowledge_base_id: &str,
        url: &str,
    ) -> Result<usize, IngestError> {
        let mut chunks = self.chunks.lock();
        let before = chunks.len();
        chunks.retain(|c| !(c.knowledge_base_id == knowledge_base_id && c.source_url == url));
        Ok(before - chunks.len())
    }

    async fn insert_chunks(&self, mut new_chunks: Vec<StoredChunk>) -> Result<(), IngestError> {
        self.chunks.lock().append(&mut new_chunks);
        Ok(())
    }

    async fn count(&self) -> Result<usize, IngestError> {
        Ok(self.chunks.lock().len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn sample_chunk(kb: &str, url: &str, index: usize) -> StoredChunk {
        StoredChunk {
            id: format!("{url}#{index}"),
            knowledge_base_id: kb.to_string(),
            source_url: url.to_string(),
            chunk_index: index,
            total_chunks: 2,
            content: format!("chunk body {index}"),
            start_char_index: index * 100,
            end_char_index: index * 100 + 90,
            overlap_with_previous: if index == 0 { 0 } else { 12 },
            chunk_method: ChunkMethod::Semantic,
            token_count: 40,
            checksum: "sum-1".to_string(),
            embedding: Some(vec![0.25, 0.5]),
        }
    }

    #[tokio::test]
    async fn memory_store_partitions_by_kb_and_url() {
        let store = MemoryChunkStore::new();
        store
            .insert_chunks(vec![
                sample_chunk("kb1", "https://a.example/x", 0),
                sample_chunk("kb1", "https://a.example/x", 1),
                sample_chunk("kb1", "https://a.example/y", 0),
                sample_chunk("kb2", "https://a.example/x", 0),
            ])
            .await
            .unwrap();

        let found = store
            .find_chunks_by_source_url("kb1", "https://a.example/x")
            .await
            .unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].chunk_index, 0);

        let deleted = store
            .delete_chunks_by_source_url("kb1", "https://a.example/x")
            .await
            .unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(store.count().await.unwrap(), 2);
    }
}
