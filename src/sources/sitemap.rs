//! HTTP sitemap fetching and XML parsing.
//!
//! Handles both standard `<urlset>` sitemaps and `<sitemapindex>` indexes
//! that point at child sitemaps. Child sitemaps are fetched with bounded
//! recursion so a cyclic index cannot loop forever.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use quick_xml::Reader;
use quick_xml::events::Event;
use reqwest::Client;
use url::Url;

use super::{ChangeFrequency, SitemapEntry, SitemapSource};
use crate::types::IngestError;

const FETCH_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_INDEX_DEPTH: usize = 2;
const MAX_CHILD_SITEMAPS: usize = 10;

/// Parsed sitemap content, either leaf entries or an index of child sitemaps.
pub(crate) enum SitemapContent {
    Entries(Vec<SitemapEntry>),
    Index(Vec<Url>),
}

/// Fetches sitemaps over HTTP and parses them with a streaming XML reader.
#[derive(Clone, Debug)]
pub struct HttpSitemapSource {
    client: Client,
}

impl HttpSitemapSource {
    pub fn new() -> Result<Self, IngestError> {
        let client = Client::builder()
            .timeout(FETCH_TIMEOUT)
            .user_agent(concat!("sitesmith/", env!("CARGO_PKG_VERSION")))
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .map_err(|e| IngestError::Sitemap(format!("failed to build http client: {e}")))?;
        Ok(Self { client })
    }

    /// Wraps an existing client, letting callers share connection pools.
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SitemapSource for HttpSitemapSource {
    async fn fetch_sitemap(&self, url: &Url) -> Result<Vec<SitemapEntry>, IngestError> {
        fetch_recursive(self.client.clone(), url.clone(), 0).await
    }
}

fn fetch_recursive(
    client: Client,
    url: Url,
    depth: usize,
) -> Pin<Box<dyn Future<Output = Result<Vec<SitemapEntry>, IngestError>> + Send>> {
    Box::pin(async move {
        if depth > MAX_INDEX_DEPTH {
            return Err(IngestError::Sitemap(format!(
                "sitemap index nesting exceeds depth {MAX_INDEX_DEPTH} at {url}"
            )));
        }

        tracing::debug!(%url, depth, "fetching sitemap");

        let response = client
            .get(url.clone())
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| IngestError::Sitemap(format!("fetch {url} failed: {e}")))?;
        let xml = response
            .text()
            .await
            .map_err(|e| IngestError::Sitemap(format!("read {url} body failed: {e}")))?;

        match parse_sitemap(&xml)? {
            SitemapContent::Entries(entries) => Ok(entries),
            SitemapContent::Index(children) => {
                let mut all = Vec::new();
                for child in children.into_iter().take(MAX_CHILD_SITEMAPS) {
                    match fetch_recursive(client.clone(), child.clone(), depth + 1).await {
                        Ok(entries) => all.extend(entries),
                        Err(e) => {
                            // One broken child sitemap should not sink the rest.
                            tracing::warn!(%child, error = %e, "skipping child sitemap");
                        }
                    }
                }
                Ok(all)
            }
        }
    })
}

/// Parses sitemap XML, detecting whether the root is `<urlset>` or
/// `<sitemapindex>`.
pub(crate) fn parse_sitemap(xml: &str) -> Result<SitemapContent, IngestError> {
    if is_sitemap_index(xml) {
        parse_index(xml)
    } else {
        parse_urlset(xml)
    }
}

fn is_sitemap_index(xml: &str) -> bool {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                return e.local_name().as_ref() == b"sitemapindex";
            }
            Ok(Event::Eof) | Err(_) => return false,
            _ => {}
        }
        buf.clear();
    }
}

fn parse_urlset(xml: &str) -> Result<SitemapContent, IngestError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut entries = Vec::new();
    let mut buf = Vec::new();

    let mut in_url = false;
    let mut current_element: Option<String> = None;
    let mut location: Option<Url> = None;
    let mut last_modified: Option<DateTime<Utc>> = None;
    let mut change_frequency: Option<ChangeFrequency> = None;
    let mut priority: Option<f32> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).to_string();
                match name.as_str() {
                    "url" => {
                        in_url = true;
                        location = None;
                        last_modified = None;
                        change_frequency = None;
                        priority = None;
                    }
                    "loc" | "lastmod" | "changefreq" | "priority" if in_url => {
                        current_element = Some(name);
                    }
                    _ => {}
                }
            }
            Ok(Event::End(e)) => {
                if e.local_name().as_ref() == b"url" && in_url {
                    if let Some(location) = location.take() {
                        entries.push(SitemapEntry {
                            location,
                            last_modified: last_modified.take(),
                            change_frequency: change_frequency.take(),
                            priority: priority.take(),
                        });
                    }
                    in_url = false;
                }
                current_element = None;
            }
            Ok(Event::Text(e)) => {
                if let Some(element) = current_element.as_deref() {
                    let text = e
                        .unescape()
                        .map_err(|e| IngestError::Sitemap(format!("invalid xml text: {e}")))?;
                    let text = text.trim();
                    match element {
                        "loc" => location = Url::parse(text).ok(),
                        "lastmod" => last_modified = parse_lastmod(text),
                        "changefreq" => change_frequency = text.parse().ok(),
                        "priority" => priority = parse_priority(text),
                        _ => {}
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(IngestError::Sitemap(format!("xml parse error: {e}")));
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(SitemapContent::Entries(entries))
}

fn parse_index(xml: &str) -> Result<SitemapContent, IngestError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut children = Vec::new();
    let mut buf = Vec::new();

    let mut in_sitemap = false;
    let mut in_loc = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"sitemap" => in_sitemap = true,
                b"loc" if in_sitemap => in_loc = true,
                _ => {}
            },
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"sitemap" => in_sitemap = false,
                b"loc" => in_loc = false,
                _ => {}
            },
            Ok(Event::Text(e)) => {
                if in_loc {
                    let text = e
                        .unescape()
                        .map_err(|e| IngestError::Sitemap(format!("invalid xml text: {e}")))?;
                    if let Ok(url) = Url::parse(text.trim()) {
                        children.push(url);
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(IngestError::Sitemap(format!("xml parse error: {e}")));
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(SitemapContent::Index(children))
}

/// Parses a `<lastmod>` value, accepting full RFC 3339 timestamps as well as
/// the common date-only form.
fn parse_lastmod(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(date.and_hms_opt(0, 0, 0)?.and_utc());
    }
    if let Ok(dt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S") {
        return Some(dt.and_utc());
    }
    tracing::debug!(value = %s, "unparseable lastmod");
    None
}

fn parse_priority(s: &str) -> Option<f32> {
    s.parse::<f32>().ok().map(|p| p.clamp(0.0, 1.0))
}
