//! External content collaborators: sitemap discovery and page extraction.
//!
//! The crawl coordinator only depends on the [`SitemapSource`] and
//! [`ContentExtractor`] traits; the HTTP implementations in [`sitemap`] and
//! [`extract`] are thin wrappers kept deliberately simple so tests can swap
//! in deterministic fakes.

pub mod extract;
pub mod sitemap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::types::IngestError;

pub use extract::HttpContentExtractor;
pub use sitemap::HttpSitemapSource;

/// A single entry from a sitemap.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SitemapEntry {
    /// The page URL.
    pub location: Url,
    /// Last modification date, when the sitemap provides one.
    pub last_modified: Option<DateTime<Utc>>,
    /// Change frequency hint.
    pub change_frequency: Option<ChangeFrequency>,
    /// Relative priority (0.0 to 1.0).
    pub priority: Option<f32>,
}

impl SitemapEntry {
    /// Creates an entry with no optional metadata.
    pub fn new(location: Url) -> Self {
        Self {
            location,
            last_modified: None,
            change_frequency: None,
            priority: None,
        }
    }
}

/// Change frequency hints from sitemap `<changefreq>` elements.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeFrequency {
    Always,
    Hourly,
    Daily,
    Weekly,
    Monthly,
    Yearly,
    Never,
}

impl std::str::FromStr for ChangeFrequency {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "always" => Ok(Self::Always),
            "hourly" => Ok(Self::Hourly),
            "daily" => Ok(Self::Daily),
            "weekly" => Ok(Self::Weekly),
            "monthly" => Ok(Self::Monthly),
            "yearly" => Ok(Self::Yearly),
            "never" => Ok(Self::Never),
            _ => Err(()),
        }
    }
}

/// A heading located in the extracted plain text.
///
/// `offset` is the byte index of the heading's text within
/// [`ExtractedContent::plain_text`], emitted by the extractor while it builds
/// the text. Downstream code must never re-derive heading positions by
/// substring search; heading text can recur elsewhere on a page.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heading {
    pub text: String,
    /// Heading level, 1 through 6.
    pub level: u8,
    /// Byte offset into the plain text where this heading starts.
    pub offset: usize,
}

/// Content extracted from one page, the unit the chunker operates on.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExtractedContent {
    pub source_url: Url,
    pub title: String,
    pub plain_text: String,
    /// Headings in document order, with offsets into `plain_text`.
    pub heading_hierarchy: Vec<Heading>,
    /// Deterministic fingerprint of the extracted content. Equality against
    /// a previously stored checksum means the page is unchanged.
    pub checksum: String,
}

/// Fetches and parses a sitemap into URL entries.
///
/// A failure here is terminal for the whole crawl job; nothing else in the
/// pipeline aborts a job.
#[async_trait]
pub trait SitemapSource: Send + Sync {
    async fn fetch_sitemap(&self, url: &Url) -> Result<Vec<SitemapEntry>, IngestError>;
}

/// Extracts title, plain text, and heading offsets from one page.
///
/// A failure here is scoped to the URL being processed.
#[async_trait]
pub trait ContentExtractor: Send + Sync {
    async fn extract_from_url(&self, url: &Url) -> Result<ExtractedContent, IngestError>;
}
