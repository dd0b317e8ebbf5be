//! HTTP page fetching and plain-text extraction.
//!
//! The extractor walks the parsed DOM once, building the plain text and
//! recording each heading's byte offset as it is appended. Offsets therefore
//! always point into the exact text the chunker receives, even when the same
//! heading wording appears elsewhere on the page.

use std::time::Duration;

use async_trait::async_trait;
use ego_tree::NodeRef;
use reqwest::Client;
use scraper::node::Node;
use scraper::{ElementRef, Html, Selector};
use sha2::{Digest, Sha256};
use url::Url;

use super::{ContentExtractor, ExtractedContent, Heading};
use crate::types::IngestError;

const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Tags whose subtree is boilerplate rather than documentation content.
const SKIP_TAGS: &[&str] = &[
    "script", "style", "noscript", "template", "nav", "header", "footer", "aside",
];

/// Tags that start a new block of text.
const BLOCK_TAGS: &[&str] = &[
    "p", "div", "section", "article", "main", "ul", "ol", "li", "table", "tr", "pre",
    "blockquote", "figure", "br", "hr",
];

/// Fetches pages over HTTP and extracts title, plain text, and headings.
#[derive(Clone, Debug)]
pub struct HttpContentExtractor {
    client: Client,
}

impl HttpContentExtractor {
    pub fn new() -> Result<Self, IngestError> {
        let client = Client::builder()
            .timeout(FETCH_TIMEOUT)
            .user_agent(concat!("sitesmith/", env!("CARGO_PKG_VERSION")))
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .map_err(|e| IngestError::Io(format!("failed to build http client: {e}")))?;
        Ok(Self { client })
    }

    /// Wraps an existing client, letting callers share connection pools.
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ContentExtractor for HttpContentExtractor {
    async fn extract_from_url(&self, url: &Url) -> Result<ExtractedContent, IngestError> {
        let extraction_error = |message: String| IngestError::Extraction {
            url: url.to_string(),
            message,
        };

        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| extraction_error(format!("fetch failed: {e}")))?;
        let html = response
            .text()
            .await
            .map_err(|e| extraction_error(format!("read body failed: {e}")))?;

        Ok(extract_from_html(url, &html))
    }
}

/// Extracts content from already-fetched HTML. Parsing never fails; a page
/// with no usable body simply yields empty plain text.
pub fn extract_from_html(url: &Url, html: &str) -> ExtractedContent {
    let document = Html::parse_document(html);

    let mut plain_text = String::new();
    let mut headings = Vec::new();

    let body_selector = Selector::parse("body").ok();
    let body = body_selector
        .as_ref()
        .and_then(|sel| document.select(sel).next())
        .unwrap_or_else(|| document.root_element());
    walk(*body, &mut plain_text, &mut headings);
    truncate_trailing_whitespace(&mut plain_text);

    let title = page_title(&document)
        .or_else(|| headings.first().map(|h| h.text.clone()))
        .unwrap_or_else(|| url.to_string());

    let checksum = checksum_hex(&plain_text);

    ExtractedContent {
        source_url: url.clone(),
        title,
        plain_text,
        heading_hierarchy: headings,
        checksum,
    }
}

fn page_title(document: &Html) -> Option<String> {
    let selector = Selector::parse("title").ok()?;
    let element = document.select(&selector).next()?;
    let title = collapse_whitespace(element.text());
    if title.is_empty() { None } else { Some(title) }
}

/// Hex-encoded SHA-256 of the plain text.
fn checksum_hex(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Walks `node`'s children in document order, appending text and recording
/// heading offsets at the moment each heading's text is pushed.
fn walk(node: NodeRef<'_, Node>, out: &mut String, headings: &mut Vec<Heading>) {
    for child in node.children() {
        match child.value() {
            Node::Text(text) => append_inline(out, &text.text),
            Node::Element(element) => {
                let name = element.name();
                if SKIP_TAGS.contains(&name) {
                    continue;
                }
                if let Some(level) = heading_level(name) {
                    push_block_break(out);
                    let offset = out.len();
                    let text = ElementRef::wrap(child)
                        .map(|el| collapse_whitespace(el.text()))
                        .unwrap_or_default();
                    if !text.is_empty() {
                        out.push_str(&text);
                        headings.push(Heading {
                            text,
                            level,
                            offset,
                        });
                        push_block_break(out);
                    }
                } else if BLOCK_TAGS.contains(&name) {
                    push_block_break(out);
                    walk(child, out, headings);
                    push_block_break(out);
                } else {
                    walk(child, out, headings);
                }
            }
            _ => {}
        }
    }
}

fn heading_level(tag: &str) -> Option<u8> {
    match tag {
        "h1" => Some(1),
        "h2" => Some(2),
        "h3" => Some(3),
        "h4" => Some(4),
        "h5" => Some(5),
        "h6" => Some(6),
        _ => None,
    }
}

/// Appends a text node, collapsing internal whitespace and inserting a
/// single separating space when joining onto existing inline text.
fn append_inline(out: &mut String, text: &str) {
    let mut words = text.split_whitespace();
    let Some(first) = words.next() else {
        return;
    };
    if !out.is_empty() && !out.ends_with(char::is_whitespace) {
        out.push(' ');
    }
    out.push_str(first);
    for word in words {
        out.push(' ');
        out.push_str(word);
    }
}

/// Ends the current block with a paragraph break, at most one in a row.
fn push_block_break(out: &mut String) {
    truncate_trailing_whitespace(out);
    if !out.is_empty() {
        out.push_str("\n\n");
    }
}

fn truncate_trailing_whitespace(out: &mut String) {
    let trimmed = out.trim_end().len();
    out.truncate(trimmed);
}

fn collapse_whitespace<'a>(parts: impl Iterator<Item = &'a str>) -> String {
    let mut collapsed = String::new();
    for part in parts {
        append_inline(&mut collapsed, part);
    }
    collapsed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page_url() -> Url {
        Url::parse("https://docs.example.com/guide").unwrap()
    }

    const PAGE: &str = r#"<html>
  <head><title>  Guide &mdash; Example Docs </title><style>body { color: red }</style></head>
  <body>
    <nav><a href="/">Home</a></nav>
    <h1>Getting Started</h1>
    <p>Install the tool first.</p>
    <h2>Configuration</h2>
    <p>Edit the config file. Getting Started is linked above.</p>
    <script>console.log("hidden")</script>
  </body>
</html>"#;

    #[test]
    fn extracts_title_and_text() {
        let content = extract_from_html(&page_url(), PAGE);
        assert!(content.title.starts_with("Guide"));
        assert!(content.plain_text.starts_with("Getting Started"));
        assert!(content.plain_text.contains("Install the tool first."));
        assert!(!content.plain_text.contains("console.log"));
        assert!(!content.plain_text.contains("Home"));
    }

    #[test]
    fn heading_offsets_point_at_their_own_text() {
        let content = extract_from_html(&page_url(), PAGE);
        assert_eq!(content.heading_hierarchy.len(), 2);

        let h1 = &content.heading_hierarchy[0];
        assert_eq!(h1.text, "Getting Started");
        assert_eq!(h1.level, 1);
        assert_eq!(&content.plain_text[h1.offset..h1.offset + h1.text.len()], "Getting Started");

        // The h2 offset must point at the heading element, not at the later
        // paragraph that repeats the h1 wording.
        let h2 = &content.heading_hierarchy[1];
        assert_eq!(h2.text, "Configuration");
        assert_eq!(h2.level, 2);
        assert_eq!(&content.plain_text[h2.offset..h2.offset + h2.text.len()], "Configuration");
        assert!(h2.offset > h1.offset);
    }

    #[test]
    fn checksum_is_stable_and_content_sensitive() {
        let a = extract_from_html(&page_url(), PAGE);
        let b = extract_from_html(&page_url(), PAGE);
        assert_eq!(a.checksum, b.checksum);
        assert_eq!(a.checksum.len(), 64);

        let changed = PAGE.replace("Install the tool", "Install the binary");
        let c = extract_from_html(&page_url(), &changed);
        assert_ne!(a.checksum, c.checksum);
    }

    #[test]
    fn empty_body_yields_empty_text() {
        let content = extract_from_html(&page_url(), "<html><body></body></html>");
        assert!(content.plain_text.is_empty());
        assert!(content.heading_hierarchy.is_empty());
        assert_eq!(content.title, page_url().to_string());
    }

    #[test]
    fn whitespace_is_collapsed() {
        let html = "<body><p>one\n   two\tthree</p><p>four</p></body>";
        let content = extract_from_html(&page_url(), html);
        assert_eq!(content.plain_text, "one two three\n\nfour");
    }
}
