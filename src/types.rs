//! Error taxonomy and crawl job results shared across the pipeline.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::resilience::RemoteError;

/// Errors produced while ingesting a documentation site.
///
/// Only [`IngestError::Sitemap`] is fatal for a whole crawl job; every other
/// variant is scoped to a single URL (or a single remote call) and is
/// aggregated into the job result instead of aborting the batch.
#[derive(Debug, Error)]
pub enum IngestError {
    /// The sitemap could not be fetched or parsed. Aborts the whole job.
    #[error("sitemap fetch failed: {0}")]
    Sitemap(String),

    /// Content extraction failed for one URL.
    #[error("content extraction failed for {url}: {message}")]
    Extraction { url: String, message: String },

    /// A remote operation failed after retry/breaker handling.
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// The embedding service returned a different number of vectors than
    /// texts requested. Fatal for that page's chunk set.
    #[error("embedding count mismatch: requested {requested}, received {received}")]
    EmbeddingCountMismatch { requested: usize, received: usize },

    /// Chunk storage read or write failed.
    #[error("storage error: {0}")]
    Storage(String),

    /// Local I/O failure.
    #[error("I/O error: {0}")]
    Io(String),
}

/// Outcome of processing a single URL.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlOutcome {
    /// Whether the URL was handled to completion (including checksum no-ops).
    pub processed: bool,
    /// Chunks inserted where no prior generation existed.
    pub created: usize,
    /// Chunks inserted as a replacement for a deleted prior generation.
    pub updated: usize,
}

impl UrlOutcome {
    /// A no-op success: the page was unchanged and nothing was written.
    pub fn unchanged() -> Self {
        Self {
            processed: true,
            created: 0,
            updated: 0,
        }
    }
}

/// Aggregate result of one crawl job, finalized when the job ends.
///
/// Per-URL failures are collected into [`errors`](Self::errors) as flat
/// strings so callers always receive a structured, inspectable outcome even
/// on partial failure.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CrawlJobResult {
    pub urls_processed: usize,
    pub chunks_created: usize,
    pub chunks_updated: usize,
    pub errors: Vec<String>,
    pub processing_time_ms: u64,
}

impl CrawlJobResult {
    /// Folds one URL outcome into the aggregate.
    pub(crate) fn record(&mut self, outcome: UrlOutcome) {
        if outcome.processed {
            self.urls_processed += 1;
        }
        self.chunks_created += outcome.created;
        self.chunks_updated += outcome.updated;
    }

    /// Returns `true` if every URL completed without error.
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}
