//! Job-queue enqueue contract for fanning crawl work out of process.
//!
//! The queue transport itself is out of scope; only this contract matters to
//! the pipeline. Payloads are plain serde values so any backend that can
//! carry JSON can carry them.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::sources::SitemapEntry;
use crate::types::IngestError;

/// A unit of crawl work for queue workers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CrawlTask {
    /// Process a single URL; the worker calls
    /// [`CrawlCoordinator::process_url`](crate::crawl::CrawlCoordinator::process_url).
    ProcessUrl {
        knowledge_base_id: String,
        entry: SitemapEntry,
        is_initial_crawl: bool,
    },
    /// Run a whole crawl job.
    CrawlSitemap {
        knowledge_base_id: String,
        sitemap_url: Url,
        is_initial_crawl: bool,
    },
}

/// Scheduling hints attached to an enqueued task.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnqueueOptions {
    /// Earliest-start delay.
    pub delay: Option<Duration>,
    /// Backend-specific priority; higher runs sooner.
    pub priority: Option<i32>,
}

/// Enqueue contract the coordinator uses to dispatch per-URL work.
#[async_trait]
pub trait TaskDispatcher: Send + Sync {
    async fn enqueue(&self, task: CrawlTask, options: EnqueueOptions) -> Result<(), IngestError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crawl_task_round_trips_through_json() {
        let task = CrawlTask::ProcessUrl {
            knowledge_base_id: "kb-7".into(),
            entry: SitemapEntry::new(Url::parse("https://docs.example.com/intro").unwrap()),
            is_initial_crawl: true,
        };
        let json = serde_json::to_string(&task).unwrap();
        assert!(json.contains("\"type\":\"process_url\""));
        let back: CrawlTask = serde_json::from_str(&json).unwrap();
        assert_eq!(back, task);
    }
}
