//! Destination router bindings and receipt classification.
//!
//! The router's interface is consumed, never reimplemented: one call,
//! `receiveAndForward`, and four events whose `topic0` discriminants are
//! derived at build time from the canonical signatures and matched
//! literally against receipt logs.

use ethers::contract::EthEvent;
use ethers::prelude::abigen;
use ethers::types::Log;

use relay_core::RelayOutcome;

abigen!(
    BurnRouter,
    r#"[
        function receiveAndForward(bytes message, bytes attestation, uint256 relayFee)
        event Relayed(uint32 indexed sourceDomain, bytes32 sourceSender, bytes32 nonce, uint256 amount, uint256 relayFee)
        event FallbackTriggered(address indexed fallbackRecipient, uint256 amount, uint256 relayFee)
        event RecoveredFromConsumedNonce(bytes32 indexed nonce, uint256 amount)
        event OperatorRouted(bytes32 indexed transferId, bytes32 nonce, uint256 amount, string reason)
    ]"#
);

/// What a confirmed receipt's logs say happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiptClassification {
    /// Primary outcome, `None` when no recognized event is present.
    pub outcome: Option<RelayOutcome>,
    /// Whether a `RecoveredFromConsumedNonce` event co-occurred.
    pub recovered_nonce: bool,
}

/// Classify a receipt's logs by matching each log's first topic against the
/// known event signatures. Deterministic in the log set; the first primary
/// event encountered wins.
pub fn classify_receipt_logs(logs: &[Log]) -> ReceiptClassification {
    let relayed = RelayedFilter::signature();
    let fallback = FallbackTriggeredFilter::signature();
    let operator_routed = OperatorRoutedFilter::signature();
    let recovered = RecoveredFromConsumedNonceFilter::signature();

    let mut classification = ReceiptClassification {
        outcome: None,
        recovered_nonce: false,
    };
    for log in logs {
        let Some(topic0) = log.topics.first() else {
            continue;
        };
        if *topic0 == recovered {
            classification.recovered_nonce = true;
            continue;
        }
        if classification.outcome.is_some() {
            continue;
        }
        classification.outcome = if *topic0 == relayed {
            Some(RelayOutcome::Forwarded)
        } else if *topic0 == fallback {
            Some(RelayOutcome::Fallback)
        } else if *topic0 == operator_routed {
            Some(RelayOutcome::OperatorRouted)
        } else {
            None
        };
    }
    classification
}
