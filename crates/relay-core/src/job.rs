use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a relay job.
///
/// Ordered: `pending → polling → attested → submitted → confirmed`. `failed`
/// is a terminal sink reachable from every non-terminal state. The only
/// permitted re-entry is `attested → attested`, which a transient submission
/// failure uses to requeue the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Admitted by intake, not yet polled.
    Pending,
    /// At least one attestation poll has been issued.
    Polling,
    /// Attestation in hand, waiting for submission.
    Attested,
    /// Destination transaction broadcast, receipt outstanding.
    Submitted,
    /// Destination transaction confirmed; `outcome` is set.
    Confirmed,
    /// Terminal failure; `error_message` holds the final reason.
    Failed,
}

impl JobStatus {
    /// Canonical lowercase name, used for storage and API bodies.
    pub const fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Polling => "polling",
            JobStatus::Attested => "attested",
            JobStatus::Submitted => "submitted",
            JobStatus::Confirmed => "confirmed",
            JobStatus::Failed => "failed",
        }
    }

    /// Whether no further transition may leave this state.
    pub const fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Confirmed | JobStatus::Failed)
    }

    /// Whether the state machine permits moving from `self` to `next`.
    pub fn permits(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        match (self, next) {
            (Pending, Polling)
            | (Polling, Attested)
            | (Attested, Submitted)
            | (Submitted, Confirmed) => true,
            // transient submission failure requeues the job
            (Attested, Attested) => true,
            (from, Failed) => !from.is_terminal(),
            _ => false,
        }
    }

    /// All states, in lifecycle order.
    pub const ALL: [JobStatus; 6] = [
        JobStatus::Pending,
        JobStatus::Polling,
        JobStatus::Attested,
        JobStatus::Submitted,
        JobStatus::Confirmed,
        JobStatus::Failed,
    ];
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "polling" => Ok(JobStatus::Polling),
            "attested" => Ok(JobStatus::Attested),
            "submitted" => Ok(JobStatus::Submitted),
            "confirmed" => Ok(JobStatus::Confirmed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status {other:?}")),
        }
    }
}

/// Terminal classification of a confirmed relay, read off the receipt logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelayOutcome {
    /// Funds reached the intended recipient through the primary path.
    Forwarded,
    /// The downstream leg failed; funds went to the sender-designated
    /// fallback address.
    Fallback,
    /// The payload lacked valid routing data; funds went to the
    /// operator-controlled wallet.
    OperatorRouted,
}

impl RelayOutcome {
    /// Canonical lowercase name, used for storage and API bodies.
    pub const fn as_str(&self) -> &'static str {
        match self {
            RelayOutcome::Forwarded => "forwarded",
            RelayOutcome::Fallback => "fallback",
            RelayOutcome::OperatorRouted => "operator_routed",
        }
    }
}

impl fmt::Display for RelayOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for RelayOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "forwarded" => Ok(RelayOutcome::Forwarded),
            "fallback" => Ok(RelayOutcome::Fallback),
            "operator_routed" => Ok(RelayOutcome::OperatorRouted),
            other => Err(format!("unknown relay outcome {other:?}")),
        }
    }
}

/// A relay job as persisted in the store.
///
/// The source transaction hash is the primary key and sole idempotency key;
/// it is normalized to lowercase before it ever reaches this struct.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayJob {
    /// Lowercase 0x-prefixed 32-byte source transaction hash.
    pub tx_hash: String,
    /// Domain the burn was observed on.
    pub source_domain: u32,
    /// Current lifecycle state.
    pub status: JobStatus,
    /// Raw attested payload, set once on the `attested` transition.
    pub attested_message: Option<Vec<u8>>,
    /// Attestation bytes covering `attested_message`.
    pub attestation: Option<Vec<u8>>,
    /// Upstream event nonce accompanying the attestation.
    pub attestation_nonce: Option<String>,
    /// Mint recipient decoded from the payload (router address).
    pub mint_recipient: Option<String>,
    /// Destination domain decoded from the payload.
    pub destination_domain: Option<u32>,
    /// Burn amount as a decimal string.
    pub amount: Option<String>,
    /// Destination transaction hash, set when broadcast.
    pub dest_tx_hash: Option<String>,
    /// Block the destination transaction landed in.
    pub dest_block_number: Option<i64>,
    /// Set iff `status == Confirmed`.
    pub outcome: Option<RelayOutcome>,
    /// Latest failure reason.
    pub error_message: Option<String>,
    /// Number of attestation polls issued for this job.
    pub poll_attempts: u32,
    /// Number of failed submission attempts.
    pub retry_count: u32,
    /// Intake time.
    pub created_at: DateTime<Utc>,
    /// Set once on the `attested` transition.
    pub attested_at: Option<DateTime<Utc>>,
    /// Set once when the destination transaction is broadcast.
    pub submitted_at: Option<DateTime<Utc>>,
    /// Set once on the `confirmed` transition.
    pub confirmed_at: Option<DateTime<Utc>>,
    /// Refreshed on every mutation.
    pub updated_at: DateTime<Utc>,
}

impl RelayJob {
    /// A freshly admitted job: `pending`, empty optional fields, zeroed
    /// counters, `created_at == updated_at == now`.
    pub fn new_pending(tx_hash: String, source_domain: u32, now: DateTime<Utc>) -> RelayJob {
        RelayJob {
            tx_hash,
            source_domain,
            status: JobStatus::Pending,
            attested_message: None,
            attestation: None,
            attestation_nonce: None,
            mint_recipient: None,
            destination_domain: None,
            amount: None,
            dest_tx_hash: None,
            dest_block_number: None,
            outcome: None,
            error_message: None,
            poll_attempts: 0,
            retry_count: 0,
            created_at: now,
            attested_at: None,
            submitted_at: None,
            confirmed_at: None,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn status_graph_permits_forward_path_only() {
        use JobStatus::*;
        assert!(Pending.permits(Polling));
        assert!(Polling.permits(Attested));
        assert!(Attested.permits(Submitted));
        assert!(Submitted.permits(Confirmed));
        assert!(Attested.permits(Attested));

        assert!(!Polling.permits(Pending));
        assert!(!Attested.permits(Polling));
        assert!(!Submitted.permits(Attested));
        assert!(!Pending.permits(Attested));
        assert!(!Confirmed.permits(Submitted));
    }

    #[test]
    fn failed_reachable_from_non_terminal_only() {
        use JobStatus::*;
        for status in JobStatus::ALL {
            assert_eq!(status.permits(Failed), !status.is_terminal());
        }
    }

    #[test]
    fn status_round_trips_through_strings() {
        for status in JobStatus::ALL {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
        assert!("minted".parse::<JobStatus>().is_err());
    }

    #[test]
    fn outcome_serde_uses_snake_case() {
        let json = serde_json::to_string(&RelayOutcome::OperatorRouted).unwrap();
        assert_eq!(json, "\"operator_routed\"");
    }
}
