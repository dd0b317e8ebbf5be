//! Embedding transport boundary: the raw wire abstraction the resilient
//! client wraps.
//!
//! [`HttpEmbeddingTransport`] talks to the inference service's batch embed
//! endpoint; [`MockEmbeddingTransport`] produces deterministic vectors for
//! tests and offline runs.

use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::resilience::RemoteError;

/// One embedding vector with its dimensionality.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub vector: Vec<f32>,
    pub dimension: usize,
}

/// Order- and length-preserving batch embedding.
///
/// Implementations classify their failures: 4xx-equivalent problems map to
/// [`RemoteError::Permanent`], timeouts and 5xx-equivalent problems to
/// [`RemoteError::Transient`]. Length mismatches are the caller's concern
/// (the resilient client treats them as fatal for the batch).
#[async_trait]
pub trait EmbeddingTransport: Send + Sync {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Embedding>, RemoteError>;
}

#[derive(Serialize)]
struct BatchEmbedRequest<'a> {
    texts: &'a [String],
    normalize: bool,
}

#[derive(Deserialize)]
struct BatchEmbedResponse {
    embeddings: Vec<Vec<f32>>,
    dimensions: usize,
    #[allow(dead_code)]
    count: usize,
}

/// Transport for the inference service's `POST {base}/api/ml/embed/batch`.
#[derive(Clone, Debug)]
pub struct HttpEmbeddingTransport {
    client: reqwest::Client,
    endpoint: Url,
    api_key: Option<String>,
}

impl HttpEmbeddingTransport {
    pub fn new(base_url: Url) -> Result<Self, RemoteError> {
        let endpoint = base_url
            .join("api/ml/embed/batch")
            .map_err(|err| RemoteError::Permanent(format!("invalid embed endpoint: {err}")))?;
        Ok(Self {
            client: reqwest::Client::new(),
            endpoint,
            api_key: None,
        })
    }

    /// Attaches a bearer token to every request.
    #[must_use]
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }
}

#[async_trait]
impl EmbeddingTransport for HttpEmbeddingTransport {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Embedding>, RemoteError> {
        let mut request = self.client.post(self.endpoint.clone()).json(&BatchEmbedRequest {
            texts,
            normalize: true,
        });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(classify_reqwest_error)?;
        let status = response.status();
        if status.is_client_error() {
            return Err(RemoteError::Permanent(format!(
                "embed endpoint returned {status}"
            )));
        }
        if !status.is_success() {
            return Err(RemoteError::Transient(format!(
                "embed endpoint returned {status}"
            )));
        }

        let body: BatchEmbedResponse = response
            .json()
            .await
            .map_err(|err| RemoteError::Transient(format!("malformed embed response: {err}")))?;

        Ok(body
            .embeddings
            .into_iter()
            .map(|vector| Embedding {
                dimension: if body.dimensions > 0 {
                    body.dimensions
                } else {
                    vector.len()
                },
                vector,
            })
            .collect())
    }
}

fn classify_reqwest_error(err: reqwest::Error) -> RemoteError {
    // Everything that reaches the network (timeouts, refused connections,
    // dropped sockets) is transient; only request construction is not.
    if err.is_builder() {
        RemoteError::Permanent(err.to_string())
    } else {
        RemoteError::Transient(err.to_string())
    }
}

/// Deterministic in-memory transport for tests.
///
/// The same text always produces the same vector; different texts diverge.
/// Failure knobs let tests exercise the retry and mismatch paths.
#[derive(Debug)]
pub struct MockEmbeddingTransport {
    dimension: usize,
    short_count: Option<usize>,
    transient_failures: AtomicU32,
}

impl MockEmbeddingTransport {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            short_count: None,
            transient_failures: AtomicU32::new(0),
        }
    }

    /// Return at most `count` embeddings regardless of the input length,
    /// simulating a truncating remote service.
    #[must_use]
    pub fn with_short_count(mut self, count: usize) -> Self {
        self.short_count = Some(count);
        self
    }

    /// Fail the next `count` calls transiently before succeeding.
    #[must_use]
    pub fn with_transient_failures(self, count: u32) -> Self {
        self.transient_failures.store(count, Ordering::SeqCst);
        self
    }

    fn vector_for(&self, text: &str) -> Vec<f32> {
        // FNV-style rolling hash, fanned out across the dimensions.
        let mut state: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in text.bytes() {
            state ^= u64::from(byte);
            state = state.wrapping_mul(0x0000_0100_0000_01b3);
        }
        (0..self.dimension)
            .map(|i| {
                let mixed = state.wrapping_add(i as u64).wrapping_mul(0x9e37_79b9_7f4a_7c15);
                (mixed >> 40) as f32 / (1u64 << 24) as f32
            })
            .collect()
    }
}

#[async_trait]
impl EmbeddingTransport for MockEmbeddingTransport {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Embedding>, RemoteError> {
        let remaining = self.transient_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.transient_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(RemoteError::Transient("mock transport unavailable".into()));
        }

        let take = self.short_count.unwrap_or(texts.len()).min(texts.len());
        Ok(texts[..take]
            .iter()
            .map(|text| Embedding {
                vector: self.vector_for(text),
                dimension: self.dimension,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_embeddings_are_deterministic() {
        let transport = MockEmbeddingTransport::new(16);
        let texts: Vec<String> = ["hello world", "goodbye world", "hello world"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        let first = transport.embed(&texts).await.unwrap();
        let second = transport.embed(&texts).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first[0], first[2]);
        assert_ne!(first[0], first[1]);
        assert_eq!(first[0].vector.len(), 16);
    }

    #[tokio::test]
    async fn mock_transient_failures_deplete() {
        let transport = MockEmbeddingTransport::new(4).with_transient_failures(2);
        let texts = vec!["text".to_string()];
        assert!(transport.embed(&texts).await.is_err());
        assert!(transport.embed(&texts).await.is_err());
        assert!(transport.embed(&texts).await.is_ok());
    }
}
