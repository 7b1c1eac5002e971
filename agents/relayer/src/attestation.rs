//! Client for the upstream attestation service.
//!
//! The upstream offers exactly one relevant endpoint, an unauthenticated
//! per-transaction lookup: `GET /v2/messages/{domain}?transactionHash={hash}`.
//! There is no batch, listing, or push variant, so every job is polled
//! individually behind the process-wide rate limiter.

use std::time::Duration;

use reqwest::StatusCode;
use tracing::debug;

use relay_core::attestation::{AttestationEnvelope, AttestationResult};

/// Per-call timeout for upstream lookups.
const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(10);

/// Result of one attestation lookup, in the terms the poller acts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// The upstream has not indexed the transaction yet.
    NotFound,
    /// The upstream throttled us; the whole cycle must back off.
    Throttled,
    /// Transport failure or unexpected status; retry next cycle.
    Unavailable(String),
    /// Indexed, but the attestation is not ready.
    Pending,
    /// A complete attestation.
    Ready(AttestationResult),
}

/// Thin reqwest wrapper around the lookup endpoint.
#[derive(Debug, Clone)]
pub struct AttestationClient {
    http: reqwest::Client,
    base_url: String,
}

impl AttestationClient {
    /// Client against `base_url` (environment-dependent).
    pub fn new(base_url: impl Into<String>) -> eyre::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(UPSTREAM_TIMEOUT)
            .build()?;
        Ok(AttestationClient {
            http,
            base_url: base_url.into(),
        })
    }

    /// Look up the attestation for one burn transaction.
    pub async fn poll(&self, source_domain: u32, tx_hash: &str) -> PollOutcome {
        let url = format!(
            "{}/v2/messages/{}?transactionHash={}",
            self.base_url, source_domain, tx_hash
        );
        let response = match self.http.get(&url).send().await {
            Ok(response) => response,
            Err(e) => return PollOutcome::Unavailable(e.to_string()),
        };
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        debug!(source_domain, tx_hash, %status, "attestation lookup");
        interpret_response(status, &body)
    }
}

/// Map an upstream response to a [`PollOutcome`]. Pure; the poller's unit
/// tests drive it directly.
pub fn interpret_response(status: StatusCode, body: &str) -> PollOutcome {
    if status == StatusCode::NOT_FOUND {
        return PollOutcome::NotFound;
    }
    if status == StatusCode::TOO_MANY_REQUESTS {
        return PollOutcome::Throttled;
    }
    if !status.is_success() {
        return PollOutcome::Unavailable(format!("upstream status {status}"));
    }

    let envelope: AttestationEnvelope = match serde_json::from_str(body) {
        Ok(envelope) => envelope,
        Err(e) => return PollOutcome::Unavailable(format!("malformed upstream body: {e}")),
    };
    // only the first entry is consumed; any additional attestations for the
    // same transaction are dropped
    let Some(entry) = envelope.messages.first() else {
        return PollOutcome::Pending;
    };
    if !entry.is_complete() {
        return PollOutcome::Pending;
    }
    match entry.decode() {
        Ok(result) => PollOutcome::Ready(result),
        Err(e) => PollOutcome::Unavailable(format!("undecodable attestation: {e}")),
    }
}
