//! Resilient access to the external inference service.
//!
//! [`ResilientRemoteClient`] wraps remote operations behind a uniform
//! [`call`](ResilientRemoteClient::call) that composes two layers:
//!
//! * a circuit breaker per [`OperationKind`], checked once per outer call;
//!   exhausting retries on one kind (say OCR) never blocks another (say
//!   embeddings);
//! * bounded exponential-backoff retry underneath the breaker check, with
//!   permanent (4xx-class) errors never retried.
//!
//! Breaker state is owned by the client instance and scoped to this process.
//! Horizontally scaled deployments get independent circuits per process;
//! centralizing that state would add a round trip to every call and is left
//! to the deployment to decide.

pub mod breaker;
pub mod retry;

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;
use tracing::debug;

use crate::embeddings::{Embedding, EmbeddingTransport};
use crate::types::IngestError;
use breaker::CircuitBreaker;

pub use breaker::BreakerState;

/// Logical remote operation kinds served by the inference service.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Embed,
    Classify,
    Generate,
    Ocr,
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Embed => "embed",
            Self::Classify => "classify",
            Self::Generate => "generate",
            Self::Ocr => "ocr",
        };
        f.write_str(name)
    }
}

/// Errors surfaced by resilient remote calls.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RemoteError {
    /// Timeout, 5xx, or network failure; retried per backoff policy.
    #[error("transient remote failure: {0}")]
    Transient(String),

    /// 4xx-equivalent failure; never retried.
    #[error("permanent remote failure: {0}")]
    Permanent(String),

    /// Raised before any network attempt when the operation's breaker is
    /// open: the service is considered unavailable for this kind.
    #[error("operation '{0}' unavailable: circuit open")]
    CircuitOpen(OperationKind),
}

/// Resilience policy for one operation kind.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemotePolicy {
    /// Consecutive failures in CLOSED before the breaker opens.
    pub failure_threshold: u32,
    /// How long an open breaker rejects calls before trialing again.
    pub reset_timeout: Duration,
    /// Trial calls permitted in HALF_OPEN before re-opening.
    pub half_open_max_attempts: u32,
    /// Total attempts per outer call, including the first.
    pub max_retries: u32,
    /// Base backoff delay; attempt `k` waits `retry_delay × 2^(k-1)`.
    pub retry_delay: Duration,
    /// Budget for a single transport attempt.
    pub call_timeout: Duration,
}

impl Default for RemotePolicy {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(300),
            half_open_max_attempts: 3,
            max_retries: 3,
            retry_delay: Duration::from_secs(1),
            call_timeout: Duration::from_secs(30),
        }
    }
}

impl RemotePolicy {
    /// A failure-lenient policy for slow, flaky operation kinds (OCR-class):
    /// twice the failure threshold and a longer per-attempt budget.
    pub fn lenient() -> Self {
        Self {
            failure_threshold: 10,
            call_timeout: Duration::from_secs(120),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    #[must_use]
    pub fn with_reset_timeout(mut self, timeout: Duration) -> Self {
        self.reset_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_half_open_max_attempts(mut self, attempts: u32) -> Self {
        self.half_open_max_attempts = attempts;
        self
    }

    #[must_use]
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    #[must_use]
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    #[must_use]
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }
}

/// Wraps remote operations with retry-with-backoff and per-kind circuit
/// breaking, plus typed convenience methods over the embedding transport.
pub struct ResilientRemoteClient {
    transport: Arc<dyn EmbeddingTransport>,
    policies: HashMap<OperationKind, RemotePolicy>,
    breakers: Mutex<HashMap<OperationKind, CircuitBreaker>>,
}

impl ResilientRemoteClient {
    /// Creates a client with per-kind default policies: OCR gets the lenient
    /// profile, everything else the strict default.
    pub fn new(transport: Arc<dyn EmbeddingTransport>) -> Self {
        let mut policies = HashMap::new();
        policies.insert(OperationKind::Embed, RemotePolicy::default());
        policies.insert(OperationKind::Classify, RemotePolicy::default());
        policies.insert(OperationKind::Generate, RemotePolicy::default());
        policies.insert(OperationKind::Ocr, RemotePolicy::lenient());
        Self {
            transport,
            policies,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    /// Overrides the policy for one operation kind.
    #[must_use]
    pub fn with_policy(mut self, kind: OperationKind, policy: RemotePolicy) -> Self {
        self.policies.insert(kind, policy);
        self
    }

    pub fn policy(&self, kind: OperationKind) -> RemotePolicy {
        self.policies.get(&kind).cloned().unwrap_or_default()
    }

    /// Current breaker state for one operation kind.
    pub fn breaker_state(&self, kind: OperationKind) -> BreakerState {
        self.breakers
            .lock()
            .get(&kind)
            .map(|b| b.state())
            .unwrap_or(BreakerState::Closed)
    }

    /// Runs `op` under the operation kind's breaker and retry policy.
    ///
    /// The breaker is checked once per outer call, not per retry attempt;
    /// a retried call records exactly one breaker outcome. Any successful
    /// attempt records a success (closing a half-open breaker); a call that
    /// exhausts its retries, or fails permanently, records one failure.
    pub async fn call<T, F, Fut>(&self, kind: OperationKind, op: F) -> Result<T, RemoteError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RemoteError>>,
    {
        let policy = self.policy(kind);

        {
            let mut breakers = self.breakers.lock();
            let breaker = breakers
                .entry(kind)
                .or_insert_with(|| Self::breaker_for(&policy));
            if !breaker.try_acquire(Instant::now()) {
                debug!(%kind, "breaker open, rejecting call");
                return Err(RemoteError::CircuitOpen(kind));
            }
        }

        let result = retry::run_with_retry(&policy, kind, op).await;

        let mut breakers = self.breakers.lock();
        let breaker = breakers
            .entry(kind)
            .or_insert_with(|| Self::breaker_for(&policy));
        match &result {
            Ok(_) => breaker.record_success(),
            Err(RemoteError::CircuitOpen(_)) => {}
            Err(_) => breaker.record_failure(Instant::now()),
        }
        result
    }

    /// Embeds a batch of texts, preserving order.
    ///
    /// The returned vector has exactly one embedding per input text; a length
    /// mismatch from the transport is a fatal error for this call.
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>, IngestError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let transport = Arc::clone(&self.transport);
        let owned: Vec<String> = texts.to_vec();
        let embeddings = self
            .call(OperationKind::Embed, move || {
                let transport = Arc::clone(&transport);
                let texts = owned.clone();
                async move { transport.embed(&texts).await }
            })
            .await?;

        if embeddings.len() != texts.len() {
            return Err(IngestError::EmbeddingCountMismatch {
                requested: texts.len(),
                received: embeddings.len(),
            });
        }
        Ok(embeddings)
    }

    fn breaker_for(policy: &RemotePolicy) -> CircuitBreaker {
        CircuitBreaker::new(
            policy.failure_threshold,
            policy.reset_timeout,
            policy.half_open_max_attempts,
        )
    }
}
