//! Crawl orchestration: sitemap fan-out, change detection, chunking,
//! embedding, and chunk-generation replacement.
//!
//! One crawl turns a sitemap into independently processed URL units. Two
//! backpressure layers bound the load this puts on external systems: a
//! concurrency cap within each URL batch plus a pacing delay between
//! batches (for the source site), and embedding sub-batches (for the
//! inference service). Neither exists for correctness; tasks may complete
//! in any order and aggregation never assumes one.
//!
//! Failure isolation is the invariant that matters: a URL that fails
//! extraction, embedding, or storage is recorded in the job's error list and
//! never aborts its batch. Only a sitemap fetch failure fails the job.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use crate::chunking::{ChunkingEngine, ChunkingResult};
use crate::dispatch::{CrawlTask, EnqueueOptions, TaskDispatcher};
use crate::resilience::ResilientRemoteClient;
use crate::sources::{ContentExtractor, SitemapEntry, SitemapSource};
use crate::stores::{ChunkStore, StoredChunk};
use crate::types::{CrawlJobResult, IngestError, UrlOutcome};

/// Pacing and batching knobs for one coordinator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CrawlConfig {
    /// URLs per batch.
    pub batch_size: usize,
    /// Simultaneously in-flight URL tasks within a batch.
    pub max_concurrent_urls: usize,
    /// Delay between successive batches.
    pub batch_pacing: Duration,
    /// Chunk texts per embedding call.
    pub embed_batch_size: usize,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            max_concurrent_urls: 3,
            batch_pacing: Duration::from_secs(1),
            embed_batch_size: 3,
        }
    }
}

impl CrawlConfig {
    #[must_use]
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }

    #[must_use]
    pub fn with_max_concurrent_urls(mut self, limit: usize) -> Self {
        self.max_concurrent_urls = limit.max(1);
        self
    }

    #[must_use]
    pub fn with_batch_pacing(mut self, pacing: Duration) -> Self {
        self.batch_pacing = pacing;
        self
    }

    #[must_use]
    pub fn with_embed_batch_size(mut self, size: usize) -> Self {
        self.embed_batch_size = size.max(1);
        self
    }
}

/// Orchestrates one crawl of a documentation site into a knowledge base.
#[derive(Clone)]
pub struct CrawlCoordinator {
    sitemap: Arc<dyn SitemapSource>,
    extractor: Arc<dyn ContentExtractor>,
    store: Arc<dyn ChunkStore>,
    remote: Arc<ResilientRemoteClient>,
    chunker: Arc<ChunkingEngine>,
    config: CrawlConfig,
}

impl CrawlCoordinator {
    pub fn new(
        sitemap: Arc<dyn SitemapSource>,
        extractor: Arc<dyn ContentExtractor>,
        store: Arc<dyn ChunkStore>,
        remote: Arc<ResilientRemoteClient>,
    ) -> Self {
        Self {
            sitemap,
            extractor,
            store,
            remote,
            chunker: Arc::new(ChunkingEngine::default()),
            config: CrawlConfig::default(),
        }
    }

    #[must_use]
    pub fn with_chunker(mut self, chunker: ChunkingEngine) -> Self {
        self.chunker = Arc::new(chunker);
        self
    }

    #[must_use]
    pub fn with_config(mut self, config: CrawlConfig) -> Self {
        self.config = config;
        self
    }

    /// Runs one crawl job end to end.
    ///
    /// A sitemap fetch failure aborts the job with zero URLs processed; every
    /// other failure is per-URL and lands in the result's error list.
    pub async fn crawl(
        &self,
        knowledge_base_id: &str,
        sitemap_url: &Url,
        is_initial_crawl: bool,
    ) -> CrawlJobResult {
        let started = std::time::Instant::now();
        let mut result = CrawlJobResult::default();

        let entries = match self.sitemap.fetch_sitemap(sitemap_url).await {
            Ok(entries) => entries,
            Err(err) => {
                warn!(%sitemap_url, error = %err, "sitemap fetch failed, aborting job");
                result.errors.push(err.to_string());
                result.processing_time_ms = started.elapsed().as_millis() as u64;
                return result;
            }
        };
        info!(
            %sitemap_url,
            urls = entries.len(),
            initial = is_initial_crawl,
            "starting crawl"
        );

        for (batch_index, batch) in entries.chunks(self.config.batch_size).enumerate() {
            if batch_index > 0 {
                tokio::time::sleep(self.config.batch_pacing).await;
            }

            let limiter = Arc::new(Semaphore::new(self.config.max_concurrent_urls));
            let mut tasks: JoinSet<(Url, Result<UrlOutcome, IngestError>)> = JoinSet::new();
            for entry in batch.iter().cloned() {
                let this = self.clone();
                let kb = knowledge_base_id.to_string();
                let limiter = Arc::clone(&limiter);
                tasks.spawn(async move {
                    let location = entry.location.clone();
                    let Ok(_permit) = limiter.acquire_owned().await else {
                        return (
                            location,
                            Err(IngestError::Io("concurrency limiter closed".into())),
                        );
                    };
                    let outcome = this.process_url(&entry, &kb, is_initial_crawl).await;
                    (location, outcome)
                });
            }

            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok((_, Ok(outcome))) => result.record(outcome),
                    Ok((url, Err(err))) => result.errors.push(format!("{url}: {err}")),
                    Err(join_err) => result.errors.push(format!("url task panicked: {join_err}")),
                }
            }
        }

        result.processing_time_ms = started.elapsed().as_millis() as u64;
        info!(
            urls_processed = result.urls_processed,
            chunks_created = result.chunks_created,
            chunks_updated = result.chunks_updated,
            errors = result.errors.len(),
            "crawl finished"
        );
        result
    }

    /// Processes one URL: extract, change-detect, chunk, embed, persist.
    ///
    /// Idempotent for unchanged content on non-initial crawls: the second
    /// call with an equal checksum is a no-op success. Embeddings for a page
    /// are all-or-nothing; nothing is written to the store until every chunk
    /// has its vector.
    pub async fn process_url(
        &self,
        entry: &SitemapEntry,
        knowledge_base_id: &str,
        is_initial_crawl: bool,
    ) -> Result<UrlOutcome, IngestError> {
        let url = &entry.location;
        let content = self.extractor.extract_from_url(url).await?;

        if !is_initial_crawl {
            let existing = self
                .store
                .find_chunks_by_source_url(knowledge_base_id, url.as_str())
                .await?;
            if let Some(first) = existing.first() {
                if first.checksum == content.checksum {
                    debug!(%url, "content unchanged, skipping");
                    return Ok(UrlOutcome::unchanged());
                }
            }
        }

        let chunked = self.chunker.chunk(&content);
        if chunked.chunks.is_empty() {
            // A changed page with no chunkable content still supersedes its
            // prior generation; leaving the old chunks live would serve
            // content the page no longer has.
            if !is_initial_crawl {
                let deleted = self
                    .store
                    .delete_chunks_by_source_url(knowledge_base_id, url.as_str())
                    .await?;
                if deleted > 0 {
                    info!(%url, deleted, "page emptied, removed prior generation");
                    return Ok(UrlOutcome::unchanged());
                }
            }
            info!(%url, "no chunkable content, marking processed");
            return Ok(UrlOutcome::unchanged());
        }
        debug!(
            %url,
            chunks = chunked.chunks.len(),
            method = %chunked.method,
            total_tokens = chunked.total_tokens,
            "chunked page"
        );

        let texts: Vec<String> = chunked.chunks.iter().map(|c| c.content.clone()).collect();
        let mut embeddings = Vec::with_capacity(texts.len());
        for sub_batch in texts.chunks(self.config.embed_batch_size) {
            embeddings.extend(self.remote.embed_batch(sub_batch).await?);
        }

        let records = self.assemble_records(knowledge_base_id, &content.checksum, url, chunked, embeddings);
        let total = records.len();

        let deleted = if is_initial_crawl {
            0
        } else {
            self.store
                .delete_chunks_by_source_url(knowledge_base_id, url.as_str())
                .await?
        };
        self.store.insert_chunks(records).await?;

        if deleted > 0 {
            debug!(%url, deleted, inserted = total, "replaced chunk generation");
            Ok(UrlOutcome {
                processed: true,
                created: 0,
                updated: total,
            })
        } else {
            Ok(UrlOutcome {
                processed: true,
                created: total,
                updated: 0,
            })
        }
    }

    /// Fans a sitemap out into per-URL tasks on an external queue instead of
    /// processing in-process. Batches after the first are delayed by the
    /// pacing interval so queue workers inherit the same site backpressure.
    pub async fn dispatch_urls(
        &self,
        dispatcher: &dyn TaskDispatcher,
        knowledge_base_id: &str,
        sitemap_url: &Url,
        is_initial_crawl: bool,
    ) -> Result<usize, IngestError> {
        let entries = self.sitemap.fetch_sitemap(sitemap_url).await?;
        for (index, entry) in entries.iter().enumerate() {
            let batch_index = (index / self.config.batch_size) as u32;
            let options = EnqueueOptions {
                delay: Some(self.config.batch_pacing * batch_index),
                priority: None,
            };
            dispatcher
                .enqueue(
                    CrawlTask::ProcessUrl {
                        knowledge_base_id: knowledge_base_id.to_string(),
                        entry: entry.clone(),
                        is_initial_crawl,
                    },
                    options,
                )
                .await?;
        }
        Ok(entries.len())
    }

    fn assemble_records(
        &self,
        knowledge_base_id: &str,
        checksum: &str,
        url: &Url,
        chunked: ChunkingResult,
        embeddings: Vec<crate::embeddings::Embedding>,
    ) -> Vec<StoredChunk> {
        let total = chunked.chunks.len();
        chunked
            .chunks
            .into_iter()
            .zip(embeddings)
            .enumerate()
            .map(|(index, (chunk, embedding))| StoredChunk {
                id: Uuid::new_v4().to_string(),
                knowledge_base_id: knowledge_base_id.to_string(),
                source_url: url.to_string(),
                chunk_index: index,
                total_chunks: total,
                content: chunk.content,
                start_char_index: chunk.start,
                end_char_index: chunk.end,
                overlap_with_previous: chunk.overlap_tokens,
                chunk_method: chunked.method,
                token_count: chunk.token_count,
                checksum: checksum.to_string(),
                embedding: Some(embedding.vector),
            })
            .collect()
    }
}
