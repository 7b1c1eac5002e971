//! Destination submitter.
//!
//! Submissions are strictly sequential: one in-flight transaction at a
//! time, so the signer's nonce is managed implicitly and every failure is
//! attributable to exactly one job. Each attested job is dry-run first
//! (most terminal conditions surface there before any fee is spent), then
//! broadcast with a simulation-derived gas budget, persisted as
//! `submitted` before the receipt wait, and finally classified from the
//! receipt's event logs.
//!
//! Jobs found in `submitted` — left behind by a crash or a receipt-wait
//! timeout — are rescued by looking up the receipt for their recorded
//! destination hash before any new work is taken.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use derive_new::new;
use ethers::contract::ContractError;
use ethers::middleware::SignerMiddleware;
use ethers::providers::{Http, Middleware, PendingTransaction, Provider};
use ethers::signers::LocalWallet;
use ethers::types::{Bytes, TransactionReceipt, H256, U256};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, instrument::Instrumented, warn, Instrument};

use relay_base::{CoreMetrics, JobStore, JobUpdate, StoreError};
use relay_core::{JobStatus, RelayJob};

use crate::contracts::{classify_receipt_logs, BurnRouter};

/// Middleware stack the submitter signs with.
pub type RelayerMiddleware = SignerMiddleware<Provider<Http>, LocalWallet>;

/// Safety margin applied to the simulation's gas estimate, i.e. 20%.
const GAS_MARGIN_NUMERATOR: u64 = 120;
const GAS_MARGIN_DENOMINATOR: u64 = 100;

/// How long to wait for one confirmation before giving the slot back.
const RECEIPT_TIMEOUT: Duration = Duration::from_secs(150);
const RECEIPT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Floor between iterations so a failing job cannot spin the loop.
const MIN_ITERATION_DELAY: Duration = Duration::from_secs(1);

/// Revert-reason fragments that guarantee a retry can never succeed.
pub const TERMINAL_REVERT_SUBSTRINGS: &[&str] = &[
    "transfer settled",
    "nonce already used",
    "invalid destination domain",
    "invalid destination caller",
    "invalid mint recipient",
    "invalid fee",
];

/// Whether a submission error message signals permanent contract-layer
/// rejection.
pub fn is_terminal_revert(message: &str) -> bool {
    let lowered = message.to_lowercase();
    TERMINAL_REVERT_SUBSTRINGS
        .iter()
        .any(|fragment| lowered.contains(fragment))
}

#[derive(Debug)]
enum ReceiptWait {
    Found(TransactionReceipt),
    Dropped,
    TimedOut,
    Failed(String),
}

/// Drains `attested` jobs into terminal states, one at a time.
#[derive(new)]
pub struct Submitter {
    store: JobStore,
    contract: BurnRouter<RelayerMiddleware>,
    client: Arc<RelayerMiddleware>,
    relay_fee: U256,
    max_retries: u32,
    poll_interval: Duration,
    metrics: CoreMetrics,
    shutdown: CancellationToken,
}

impl Submitter {
    pub fn spawn(self) -> Instrumented<JoinHandle<eyre::Result<()>>> {
        let span = info_span!("Submitter");
        tokio::spawn(async move { self.run().await }).instrument(span)
    }

    async fn run(self) -> eyre::Result<()> {
        info!(relay_fee = %self.relay_fee, "submitter started");
        self.recover_submitted().await;

        loop {
            if self.shutdown.is_cancelled() {
                return Ok(());
            }
            let worked = match self.next_job().await {
                Ok(Some(job)) => {
                    self.process_job(&job).await;
                    true
                }
                Ok(None) => false,
                Err(e) => {
                    error!(error = %e, "failed to fetch next job");
                    false
                }
            };
            let delay = if worked {
                MIN_ITERATION_DELAY
            } else {
                self.poll_interval.max(MIN_ITERATION_DELAY)
            };
            tokio::select! {
                _ = self.shutdown.cancelled() => return Ok(()),
                _ = sleep(delay) => {}
            }
        }
    }

    /// A `submitted` job stranded by a receipt-wait timeout takes priority
    /// over new work; otherwise the oldest `attested` job.
    async fn next_job(&self) -> Result<Option<RelayJob>, StoreError> {
        if let Some(stranded) = self.store.oldest_by_status(JobStatus::Submitted).await? {
            return Ok(Some(stranded));
        }
        self.store.oldest_by_status(JobStatus::Attested).await
    }

    async fn process_job(&self, job: &RelayJob) {
        let result = match job.status {
            JobStatus::Submitted => self.rescue(job).await,
            _ => self.submit(job).await,
        };
        if let Err(e) = result {
            error!(tx_hash = %job.tx_hash, error = %e, "store update failed mid-submission");
        }
    }

    /// Startup sweep closing the crash-after-broadcast window.
    async fn recover_submitted(&self) {
        let stranded = match self
            .store
            .list_by_status(&[JobStatus::Submitted], u32::MAX)
            .await
        {
            Ok(jobs) => jobs,
            Err(e) => {
                error!(error = %e, "cannot list submitted jobs for recovery");
                return;
            }
        };
        if stranded.is_empty() {
            return;
        }
        info!(count = stranded.len(), "recovering jobs left in submitted");
        for job in &stranded {
            if self.shutdown.is_cancelled() {
                return;
            }
            if let Err(e) = self.rescue(job).await {
                error!(tx_hash = %job.tx_hash, error = %e, "recovery sweep store update failed");
            }
        }
    }

    /// Finalize a job whose destination transaction was already broadcast.
    async fn rescue(&self, job: &RelayJob) -> Result<(), StoreError> {
        let Some(dest_tx_hash) = job.dest_tx_hash.as_deref() else {
            // submitted without a recorded hash should be impossible
            return self
                .fail_job(job, "submitted job has no destination hash".to_owned())
                .await;
        };
        let Ok(tx_hash) = dest_tx_hash.parse::<H256>() else {
            return self
                .fail_job(job, format!("unparseable destination hash {dest_tx_hash}"))
                .await;
        };

        match self.client.get_transaction_receipt(tx_hash).await {
            Ok(Some(receipt)) => {
                info!(tx_hash = %job.tx_hash, dest_tx_hash, "found receipt for stranded job");
                self.finalize(job, receipt).await
            }
            Ok(None) => match self.client.get_transaction(tx_hash).await {
                Ok(Some(_)) => {
                    info!(tx_hash = %job.tx_hash, dest_tx_hash, "stranded transaction still pending");
                    match self.wait_for_receipt(tx_hash).await {
                        ReceiptWait::Found(receipt) => self.finalize(job, receipt).await,
                        ReceiptWait::Dropped => {
                            self.apply_failure(job, "transaction dropped from mempool".to_owned())
                                .await
                        }
                        ReceiptWait::TimedOut => {
                            warn!(tx_hash = %job.tx_hash, "receipt still outstanding; will retry rescue");
                            Ok(())
                        }
                        ReceiptWait::Failed(reason) => {
                            warn!(tx_hash = %job.tx_hash, %reason, "receipt wait failed; will retry rescue");
                            Ok(())
                        }
                    }
                }
                Ok(None) => {
                    // dropped before inclusion: safe to rebroadcast
                    warn!(tx_hash = %job.tx_hash, dest_tx_hash, "transaction dropped; requeueing");
                    self.apply_failure(job, "transaction dropped from mempool".to_owned())
                        .await
                }
                Err(e) => {
                    warn!(tx_hash = %job.tx_hash, error = %e, "transaction lookup failed; will retry rescue");
                    Ok(())
                }
            },
            Err(e) => {
                warn!(tx_hash = %job.tx_hash, error = %e, "receipt lookup failed; will retry rescue");
                Ok(())
            }
        }
    }

    async fn submit(&self, job: &RelayJob) -> Result<(), StoreError> {
        let (Some(message), Some(attestation)) =
            (job.attested_message.clone(), job.attestation.clone())
        else {
            return self
                .fail_job(job, "attested job is missing its payload".to_owned())
                .await;
        };

        let call = self.contract.receive_and_forward(
            Bytes::from(message),
            Bytes::from(attestation),
            self.relay_fee,
        );

        // dry-run: catches already-settled transfers, consumed nonces and
        // policy violations before a fee is spent
        if let Err(e) = call.call().await {
            return self.apply_failure(job, describe_contract_error(&e)).await;
        }

        let gas_estimate = match call.estimate_gas().await {
            Ok(estimate) => estimate,
            Err(e) => return self.apply_failure(job, describe_contract_error(&e)).await,
        };
        let gas_limit = gas_estimate * GAS_MARGIN_NUMERATOR / GAS_MARGIN_DENOMINATOR;
        let call = call.gas(gas_limit);

        let pending = match call.send().await {
            Ok(pending) => pending,
            Err(e) => return self.apply_failure(job, describe_contract_error(&e)).await,
        };
        let dest_tx_hash: H256 = *pending;
        drop(pending);

        info!(
            tx_hash = %job.tx_hash,
            dest_tx_hash = ?dest_tx_hash,
            gas_limit = %gas_limit,
            "dispatched destination transaction"
        );
        // persisted before the receipt wait so a crash here is recoverable
        self.store
            .update(
                &job.tx_hash,
                JobUpdate {
                    status: Some(JobStatus::Submitted),
                    dest_tx_hash: Some(format!("{dest_tx_hash:?}")),
                    submitted_at: Some(Utc::now()),
                    ..Default::default()
                },
            )
            .await?;

        match self.wait_for_receipt(dest_tx_hash).await {
            ReceiptWait::Found(receipt) => self.finalize(job, receipt).await,
            ReceiptWait::Dropped => {
                self.apply_failure(job, "transaction dropped from mempool".to_owned())
                    .await
            }
            ReceiptWait::TimedOut => {
                // left in `submitted`; the rescue path picks it up next
                error!(tx_hash = %job.tx_hash, "timed out waiting for receipt");
                Ok(())
            }
            ReceiptWait::Failed(reason) => {
                error!(tx_hash = %job.tx_hash, %reason, "receipt wait failed");
                Ok(())
            }
        }
    }

    async fn wait_for_receipt(&self, tx_hash: H256) -> ReceiptWait {
        let pending = PendingTransaction::new(tx_hash, self.client.provider())
            .confirmations(1)
            .interval(RECEIPT_POLL_INTERVAL);
        match timeout(RECEIPT_TIMEOUT, pending).await {
            Ok(Ok(Some(receipt))) => ReceiptWait::Found(receipt),
            Ok(Ok(None)) => ReceiptWait::Dropped,
            Ok(Err(e)) => ReceiptWait::Failed(e.to_string()),
            Err(_) => ReceiptWait::TimedOut,
        }
    }

    async fn finalize(&self, job: &RelayJob, receipt: TransactionReceipt) -> Result<(), StoreError> {
        if receipt.status == Some(0.into()) {
            return self
                .apply_failure(
                    job,
                    format!("transaction {:?} reverted on-chain", receipt.transaction_hash),
                )
                .await;
        }

        let classification = classify_receipt_logs(&receipt.logs);
        if classification.recovered_nonce {
            warn!(tx_hash = %job.tx_hash, "destination recovered from a consumed nonce");
        }
        match classification.outcome {
            Some(relay_core::RelayOutcome::OperatorRouted) => {
                warn!(tx_hash = %job.tx_hash, "payload lacked routing data; funds went to the operator wallet");
            }
            None => {
                warn!(tx_hash = %job.tx_hash, "confirmed without a recognizable outcome event");
            }
            _ => {}
        }

        info!(
            tx_hash = %job.tx_hash,
            outcome = ?classification.outcome,
            block = ?receipt.block_number,
            "relay confirmed"
        );
        self.metrics.observe_submission("confirmed");
        self.store
            .update(
                &job.tx_hash,
                JobUpdate {
                    status: Some(JobStatus::Confirmed),
                    outcome: classification.outcome,
                    dest_block_number: receipt.block_number.map(|b| b.as_u64() as i64),
                    confirmed_at: Some(Utc::now()),
                    ..Default::default()
                },
            )
            .await
    }

    async fn apply_failure(&self, job: &RelayJob, reason: String) -> Result<(), StoreError> {
        apply_submission_failure(&self.store, &self.metrics, self.max_retries, job, reason).await
    }

    async fn fail_job(&self, job: &RelayJob, reason: String) -> Result<(), StoreError> {
        error!(tx_hash = %job.tx_hash, %reason, "job failed");
        self.metrics.observe_submission("terminal");
        self.store
            .update(
                &job.tx_hash,
                JobUpdate {
                    status: Some(JobStatus::Failed),
                    error_message: Some(reason),
                    increment_retry_count: true,
                    ..Default::default()
                },
            )
            .await
    }
}

fn describe_contract_error(e: &ContractError<RelayerMiddleware>) -> String {
    e.decode_revert::<String>().unwrap_or_else(|| e.to_string())
}

/// Apply the terminal/transient retry policy for one failed submission.
///
/// Terminal failures go straight to `failed`. Transient failures count
/// against `max_retries`; below the cap the job re-enters `attested` and
/// becomes available to the next iteration.
async fn apply_submission_failure(
    store: &JobStore,
    metrics: &CoreMetrics,
    max_retries: u32,
    job: &RelayJob,
    reason: String,
) -> Result<(), StoreError> {
    if is_terminal_revert(&reason) {
        error!(tx_hash = %job.tx_hash, %reason, "terminal submission failure");
        metrics.observe_submission("terminal");
        return store
            .update(
                &job.tx_hash,
                JobUpdate {
                    status: Some(JobStatus::Failed),
                    error_message: Some(reason),
                    increment_retry_count: true,
                    ..Default::default()
                },
            )
            .await;
    }

    let exhausted = job.retry_count + 1 >= max_retries;
    if exhausted {
        error!(
            tx_hash = %job.tx_hash,
            %reason,
            retries = job.retry_count + 1,
            "transient failures exhausted retries"
        );
        metrics.observe_submission("exhausted");
    } else {
        warn!(
            tx_hash = %job.tx_hash,
            %reason,
            retries = job.retry_count + 1,
            "transient submission failure; requeueing"
        );
        metrics.observe_submission("transient");
    }
    store
        .update(
            &job.tx_hash,
            JobUpdate {
                status: Some(if exhausted {
                    JobStatus::Failed
                } else {
                    JobStatus::Attested
                }),
                error_message: Some(reason),
                increment_retry_count: true,
                ..Default::default()
            },
        )
        .await
}
