//! Attestation poller.
//!
//! Each cycle drains a bounded batch of the oldest `pending`/`polling`
//! jobs, looks each one up against the upstream attestation service, and
//! advances jobs whose attestation is complete and whose payload survives
//! validation. An upstream throttle signal aborts the remainder of the
//! cycle and backs the whole poller off; nothing else ever escapes a cycle.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use derive_new::new;
use ethers::types::Address;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{info, info_span, instrument::Instrumented, warn, Instrument};
use tokio_util::sync::CancellationToken;

use relay_base::{CoreMetrics, JobStore, JobUpdate, RateLimiter, StoreError};
use relay_core::{BurnMessage, JobStatus, RelayJob};

use crate::attestation::{AttestationClient, PollOutcome};

/// Most jobs advanced per cycle; bounds per-cycle latency variance.
const POLL_BATCH_SIZE: u32 = 20;
/// Global back-off after an upstream throttle signal.
const THROTTLE_BACKOFF: Duration = Duration::from_secs(60);

/// Reason persisted when a job ages out before its attestation arrives.
pub const ATTESTATION_TIMEOUT_ERROR: &str = "attestation_timeout";

#[derive(Debug, PartialEq, Eq)]
enum CycleOutcome {
    Completed,
    Throttled,
    Interrupted,
}

/// Advances jobs from `pending`/`polling` to `attested` or `failed`.
#[derive(new)]
pub struct AttestationPoller {
    store: JobStore,
    client: AttestationClient,
    limiter: Arc<RateLimiter>,
    metrics: CoreMetrics,
    router: Address,
    poll_cycle_interval: Duration,
    attestation_timeout: Duration,
    shutdown: CancellationToken,
}

impl AttestationPoller {
    pub fn spawn(self) -> Instrumented<JoinHandle<eyre::Result<()>>> {
        let span = info_span!("AttestationPoller");
        tokio::spawn(async move { self.run().await }).instrument(span)
    }

    async fn run(self) -> eyre::Result<()> {
        info!(
            interval_ms = self.poll_cycle_interval.as_millis() as u64,
            "attestation poller started"
        );
        loop {
            if self.shutdown.is_cancelled() {
                return Ok(());
            }
            match self.cycle().await {
                Ok(CycleOutcome::Throttled) => {
                    warn!(
                        backoff_secs = THROTTLE_BACKOFF.as_secs(),
                        "upstream throttled; backing off"
                    );
                    tokio::select! {
                        _ = self.shutdown.cancelled() => return Ok(()),
                        _ = sleep(THROTTLE_BACKOFF) => {}
                    }
                }
                Ok(CycleOutcome::Interrupted) => return Ok(()),
                Ok(CycleOutcome::Completed) => {}
                Err(e) => warn!(error = %e, "poll cycle failed"),
            }
            tokio::select! {
                _ = self.shutdown.cancelled() => return Ok(()),
                _ = sleep(self.poll_cycle_interval) => {}
            }
        }
    }

    /// One pass over the oldest pollable jobs.
    async fn cycle(&self) -> Result<CycleOutcome, StoreError> {
        let batch = self
            .store
            .list_by_status(&[JobStatus::Pending, JobStatus::Polling], POLL_BATCH_SIZE)
            .await?;
        for job in &batch {
            if self.shutdown.is_cancelled() {
                return Ok(CycleOutcome::Interrupted);
            }
            if self.process_job(job).await? == CycleOutcome::Throttled {
                return Ok(CycleOutcome::Throttled);
            }
        }
        Ok(CycleOutcome::Completed)
    }

    async fn process_job(&self, job: &RelayJob) -> Result<CycleOutcome, StoreError> {
        let age = Utc::now()
            .signed_duration_since(job.created_at)
            .to_std()
            .unwrap_or_default();
        if age > self.attestation_timeout {
            warn!(
                tx_hash = %job.tx_hash,
                age_secs = age.as_secs(),
                "attestation timed out"
            );
            self.metrics.observe_poll("timeout");
            self.store
                .update(
                    &job.tx_hash,
                    JobUpdate {
                        status: Some(JobStatus::Failed),
                        error_message: Some(ATTESTATION_TIMEOUT_ERROR.to_owned()),
                        ..Default::default()
                    },
                )
                .await?;
            return Ok(CycleOutcome::Completed);
        }

        // persisted before the upstream call, so a crash mid-poll leaves the
        // job resumable instead of stuck in `pending`
        if job.status == JobStatus::Pending {
            self.store
                .update(
                    &job.tx_hash,
                    JobUpdate {
                        status: Some(JobStatus::Polling),
                        ..Default::default()
                    },
                )
                .await?;
        }

        self.limiter.acquire().await;
        match self.client.poll(job.source_domain, &job.tx_hash).await {
            PollOutcome::Throttled => {
                self.metrics.observe_poll("throttled");
                return Ok(CycleOutcome::Throttled);
            }
            PollOutcome::NotFound => {
                self.metrics.observe_poll("not_found");
                self.bump_attempts(job).await?;
            }
            PollOutcome::Pending => {
                self.metrics.observe_poll("pending");
                self.bump_attempts(job).await?;
            }
            PollOutcome::Unavailable(reason) => {
                warn!(tx_hash = %job.tx_hash, %reason, "upstream unavailable");
                self.metrics.observe_poll("unavailable");
                self.bump_attempts(job).await?;
            }
            PollOutcome::Ready(result) => {
                self.handle_attestation(job, result).await?;
            }
        }
        Ok(CycleOutcome::Completed)
    }

    async fn bump_attempts(&self, job: &RelayJob) -> Result<(), StoreError> {
        self.store
            .update(
                &job.tx_hash,
                JobUpdate {
                    increment_poll_attempts: true,
                    ..Default::default()
                },
            )
            .await
    }

    async fn handle_attestation(
        &self,
        job: &RelayJob,
        result: relay_core::attestation::AttestationResult,
    ) -> Result<(), StoreError> {
        let burn = match BurnMessage::parse(&result.message, self.router) {
            Ok(burn) => burn,
            Err(e) => {
                warn!(tx_hash = %job.tx_hash, error = %e, "attested payload rejected");
                self.metrics.observe_poll("invalid");
                return self
                    .store
                    .update(
                        &job.tx_hash,
                        JobUpdate {
                            status: Some(JobStatus::Failed),
                            error_message: Some(e.to_string()),
                            increment_poll_attempts: true,
                            ..Default::default()
                        },
                    )
                    .await;
            }
        };

        if burn.unrestricted_caller {
            warn!(
                tx_hash = %job.tx_hash,
                "destination caller is unrestricted; claim is exposed to front-running"
            );
        }
        info!(
            tx_hash = %job.tx_hash,
            amount = %burn.amount,
            nonce = ?burn.nonce,
            "attestation complete"
        );
        self.metrics.observe_poll("ready");
        self.store
            .update(
                &job.tx_hash,
                JobUpdate {
                    status: Some(JobStatus::Attested),
                    attested_message: Some(result.message),
                    attestation: Some(result.attestation),
                    attestation_nonce: Some(result.event_nonce),
                    mint_recipient: Some(format!("{:?}", burn.mint_recipient)),
                    destination_domain: Some(burn.destination_domain),
                    amount: Some(burn.amount_decimal()),
                    attested_at: Some(Utc::now()),
                    increment_poll_attempts: true,
                    ..Default::default()
                },
            )
            .await
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use std::collections::HashMap;
    use std::net::SocketAddr;

    use axum::extract::{Path, Query, State};
    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::Router;
    use chrono::Duration as ChronoDuration;
    use ethers::types::{H256, U256};

    use relay_core::message::MIN_MESSAGE_LEN;

    fn router_address() -> Address {
        "0x00000000000000000000000000000000000000aa"
            .parse()
            .unwrap()
    }

    fn valid_payload() -> Vec<u8> {
        let mut bytes = vec![0u8; MIN_MESSAGE_LEN];
        bytes[12..44].copy_from_slice(H256::from_low_u64_be(7).as_bytes());
        bytes[120..140].copy_from_slice(router_address().as_bytes());
        bytes[196..216].copy_from_slice(router_address().as_bytes());
        let mut word = [0u8; 32];
        U256::from(5_000u64).to_big_endian(&mut word);
        bytes[216..248].copy_from_slice(&word);
        bytes
    }

    /// Canned upstream responses keyed by transaction hash.
    type Responses = Arc<HashMap<String, (StatusCode, String)>>;

    async fn lookup(
        State(responses): State<Responses>,
        Path(_domain): Path<u32>,
        Query(params): Query<HashMap<String, String>>,
    ) -> (StatusCode, String) {
        let tx_hash = params.get("transactionHash").cloned().unwrap_or_default();
        responses
            .get(&tx_hash)
            .cloned()
            .unwrap_or((StatusCode::NOT_FOUND, "{}".into()))
    }

    async fn mock_upstream(responses: HashMap<String, (StatusCode, String)>) -> String {
        let app = Router::new()
            .route("/v2/messages/:domain", get(lookup))
            .with_state(Arc::new(responses));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr: SocketAddr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    async fn poller_against(
        responses: HashMap<String, (StatusCode, String)>,
        attestation_timeout: Duration,
    ) -> (tempfile::TempDir, JobStore, AttestationPoller) {
        let base_url = mock_upstream(responses).await;
        let dir = tempfile::tempdir().unwrap();
        let store = JobStore::connect(&dir.path().join("relay.db")).await.unwrap();
        let poller = AttestationPoller::new(
            store.clone(),
            AttestationClient::new(base_url).unwrap(),
            Arc::new(RateLimiter::default()),
            CoreMetrics::new().unwrap(),
            router_address(),
            Duration::from_millis(10),
            attestation_timeout,
            CancellationToken::new(),
        );
        (dir, store, poller)
    }

    fn hash(n: u8) -> String {
        format!("0x{}", hex::encode([n; 32]))
    }

    fn complete_response(payload: &[u8]) -> (StatusCode, String) {
        let body = serde_json::json!({
            "messages": [{
                "message": format!("0x{}", hex::encode(payload)),
                "attestation": "0xbeef",
                "eventNonce": "77",
                "status": "complete",
            }]
        });
        (StatusCode::OK, body.to_string())
    }

    #[tokio::test]
    async fn complete_attestation_advances_to_attested() {
        let responses = HashMap::from([(hash(1), complete_response(&valid_payload()))]);
        let (_dir, store, poller) = poller_against(responses, Duration::from_secs(1800)).await;
        store
            .create(&relay_core::RelayJob::new_pending(hash(1), 3, Utc::now()))
            .await
            .unwrap();

        assert_eq!(poller.cycle().await.unwrap(), CycleOutcome::Completed);

        let job = store.get(&hash(1)).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Attested);
        assert_eq!(job.attested_message.unwrap(), valid_payload());
        assert_eq!(job.attestation.unwrap(), vec![0xbe, 0xef]);
        assert_eq!(job.attestation_nonce.as_deref(), Some("77"));
        assert_eq!(job.destination_domain, Some(0));
        assert_eq!(job.amount.as_deref(), Some("5000"));
        assert_eq!(job.poll_attempts, 1);
        assert!(job.attested_at.is_some());
    }

    #[tokio::test]
    async fn unindexed_job_moves_to_polling_and_counts_the_attempt() {
        let (_dir, store, poller) = poller_against(HashMap::new(), Duration::from_secs(1800)).await;
        store
            .create(&relay_core::RelayJob::new_pending(hash(1), 3, Utc::now()))
            .await
            .unwrap();

        poller.cycle().await.unwrap();

        let job = store.get(&hash(1)).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Polling);
        assert_eq!(job.poll_attempts, 1);
        assert!(job.error_message.is_none());
    }

    #[tokio::test]
    async fn throttle_aborts_the_cycle_without_advancing_later_jobs() {
        let responses = HashMap::from([(
            hash(1),
            (StatusCode::TOO_MANY_REQUESTS, "{}".to_owned()),
        )]);
        let (_dir, store, poller) = poller_against(responses, Duration::from_secs(1800)).await;
        let early = Utc::now() - ChronoDuration::seconds(10);
        store
            .create(&relay_core::RelayJob::new_pending(hash(1), 3, early))
            .await
            .unwrap();
        store
            .create(&relay_core::RelayJob::new_pending(hash(2), 3, Utc::now()))
            .await
            .unwrap();

        assert_eq!(poller.cycle().await.unwrap(), CycleOutcome::Throttled);

        // the second job was never touched
        let untouched = store.get(&hash(2)).await.unwrap().unwrap();
        assert_eq!(untouched.status, JobStatus::Pending);
        assert_eq!(untouched.poll_attempts, 0);
    }

    #[tokio::test]
    async fn aged_job_fails_with_attestation_timeout() {
        let (_dir, store, poller) = poller_against(HashMap::new(), Duration::from_secs(60)).await;
        let stale = Utc::now() - ChronoDuration::seconds(120);
        store
            .create(&relay_core::RelayJob::new_pending(hash(1), 3, stale))
            .await
            .unwrap();

        poller.cycle().await.unwrap();

        let job = store.get(&hash(1)).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error_message.as_deref(), Some(ATTESTATION_TIMEOUT_ERROR));
        assert_eq!(job.poll_attempts, 0);
    }

    #[tokio::test]
    async fn invalid_payload_fails_with_validator_reason() {
        // destination domain 3 instead of the local domain
        let mut payload = valid_payload();
        payload[8..12].copy_from_slice(&3u32.to_be_bytes());
        let responses = HashMap::from([(hash(1), complete_response(&payload))]);
        let (_dir, store, poller) = poller_against(responses, Duration::from_secs(1800)).await;
        store
            .create(&relay_core::RelayJob::new_pending(hash(1), 3, Utc::now()))
            .await
            .unwrap();

        poller.cycle().await.unwrap();

        let job = store.get(&hash(1)).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(
            job.error_message.as_deref(),
            Some("destination domain 3 != 0")
        );
        assert_eq!(job.poll_attempts, 1);
    }

    #[tokio::test]
    async fn pending_attestation_only_counts_the_attempt() {
        let body = serde_json::json!({
            "messages": [{
                "message": "0x00",
                "attestation": "PENDING",
                "eventNonce": "1",
                "status": "complete",
            }]
        });
        let responses = HashMap::from([(hash(1), (StatusCode::OK, body.to_string()))]);
        let (_dir, store, poller) = poller_against(responses, Duration::from_secs(1800)).await;
        store
            .create(&relay_core::RelayJob::new_pending(hash(1), 3, Utc::now()))
            .await
            .unwrap();

        poller.cycle().await.unwrap();
        poller.cycle().await.unwrap();

        let job = store.get(&hash(1)).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Polling);
        assert_eq!(job.poll_attempts, 2);
    }
}
