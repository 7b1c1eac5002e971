//! Prometheus metrics shared across the relayer's components.

use prometheus::{Encoder, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder};

use relay_core::JobStatus;

/// Process-wide metrics registry and the series the relayer maintains.
#[derive(Debug, Clone)]
pub struct CoreMetrics {
    registry: Registry,
    job_statuses: IntGaugeVec,
    poll_results: IntCounterVec,
    submissions: IntCounterVec,
}

impl CoreMetrics {
    /// Create and register all series under the `relayer` namespace.
    pub fn new() -> prometheus::Result<CoreMetrics> {
        let registry = Registry::new();

        let job_statuses = IntGaugeVec::new(
            Opts::new("jobs", "Relay jobs by lifecycle status").namespace("relayer"),
            &["status"],
        )?;
        let poll_results = IntCounterVec::new(
            Opts::new("attestation_polls", "Attestation poll calls by result").namespace("relayer"),
            &["result"],
        )?;
        let submissions = IntCounterVec::new(
            Opts::new("submissions", "Destination submissions by result").namespace("relayer"),
            &["result"],
        )?;

        registry.register(Box::new(job_statuses.clone()))?;
        registry.register(Box::new(poll_results.clone()))?;
        registry.register(Box::new(submissions.clone()))?;

        Ok(CoreMetrics {
            registry,
            job_statuses,
            poll_results,
            submissions,
        })
    }

    /// Refresh the per-status job gauge.
    pub fn set_job_count(&self, status: JobStatus, count: i64) {
        self.job_statuses
            .with_label_values(&[status.as_str()])
            .set(count);
    }

    /// Count one attestation poll result (`ready`, `pending`, `not_found`,
    /// `throttled`, `unavailable`, `invalid`).
    pub fn observe_poll(&self, result: &str) {
        self.poll_results.with_label_values(&[result]).inc();
    }

    /// Count one submission result (`confirmed`, `terminal`, `transient`).
    pub fn observe_submission(&self, result: &str) {
        self.submissions.with_label_values(&[result]).inc();
    }

    /// Gather all series into a plaintext report.
    pub fn gather(&self) -> prometheus::Result<Vec<u8>> {
        let collected = self.registry.gather();
        let mut out = Vec::with_capacity(16 * 1024);
        TextEncoder::new().encode(&collected, &mut out)?;
        Ok(out)
    }
}
