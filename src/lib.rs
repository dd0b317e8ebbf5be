//! Sitesmith turns external documentation sites into retrievable,
//! embeddable knowledge bases.
//!
//! ```text
//! Sitemap URL ──► sources::SitemapSource ──► SitemapEntry list
//!                                   │
//! Per URL ──► sources::ContentExtractor ──► ExtractedContent (+ checksum)
//!                                   │
//!             crawl::CrawlCoordinator ──► change detection (checksum skip)
//!                                   │
//!             chunking::ChunkingEngine ──► token-bounded, overlapped chunks
//!                                   │
//!             resilience::ResilientRemoteClient ──► embeddings (retry + breaker)
//!                                   │
//!             stores::ChunkStore ──► replace-or-insert chunk generations
//!                                   │
//!             CrawlJobResult ──► downstream search & answer generation
//! ```
//!
//! The crawl coordinator isolates failures per URL and per remote-operation
//! kind: a page that fails extraction or embedding is recorded and skipped,
//! and a tripped circuit for one operation kind never blocks another.

pub mod chunking;
pub mod crawl;
pub mod dispatch;
pub mod embeddings;
pub mod resilience;
pub mod sources;
pub mod stores;
pub mod types;

pub use chunking::{ChunkMethod, ChunkerConfig, ChunkingEngine, ChunkingResult};
pub use crawl::{CrawlConfig, CrawlCoordinator};
pub use embeddings::{Embedding, EmbeddingTransport, MockEmbeddingTransport};
pub use resilience::{OperationKind, RemoteError, RemotePolicy, ResilientRemoteClient};
pub use sources::{ContentExtractor, ExtractedContent, SitemapEntry, SitemapSource};
pub use stores::{ChunkStore, MemoryChunkStore, StoredChunk};
pub use types::{CrawlJobResult, IngestError, UrlOutcome};
