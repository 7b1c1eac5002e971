//! DTOs for the upstream attestation service.
//!
//! A successful lookup returns an ordered `messages` array; only the first
//! entry is consumed. An attestation is usable once the entry's `status` is
//! `complete` and its `attestation` field is no longer the `PENDING`
//! placeholder.

use serde::{Deserialize, Serialize};

use crate::utils::decode_hex;

/// Entry status the upstream reports for a fully attested message.
pub const STATUS_COMPLETE: &str = "complete";

/// Placeholder the upstream returns in `attestation` while signing is in
/// flight, even when `status` already reads `complete`.
pub const ATTESTATION_PENDING: &str = "PENDING";

/// Body of a 200 response from the attestation lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttestationEnvelope {
    /// Ordered attestation entries for the queried transaction.
    pub messages: Vec<AttestationEntry>,
}

/// One attested message as returned by the upstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttestationEntry {
    /// Hex-encoded attested payload.
    pub message: String,
    /// Hex-encoded attestation, or [`ATTESTATION_PENDING`].
    pub attestation: String,
    /// Upstream event nonce, an opaque decimal string.
    #[serde(rename = "eventNonce", default)]
    pub event_nonce: String,
    /// Upstream processing status.
    pub status: String,
}

impl AttestationEntry {
    /// Whether the entry carries a usable attestation.
    pub fn is_complete(&self) -> bool {
        self.status == STATUS_COMPLETE && self.attestation != ATTESTATION_PENDING
    }

    /// Decode the hex payloads into an [`AttestationResult`].
    pub fn decode(&self) -> Result<AttestationResult, hex::FromHexError> {
        Ok(AttestationResult {
            message: decode_hex(&self.message)?,
            attestation: decode_hex(&self.attestation)?,
            event_nonce: self.event_nonce.clone(),
        })
    }
}

/// A decoded, ready-to-submit attestation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttestationResult {
    /// Raw attested payload bytes.
    pub message: Vec<u8>,
    /// Raw attestation bytes.
    pub attestation: Vec<u8>,
    /// Upstream event nonce.
    pub event_nonce: String,
}

#[cfg(test)]
mod test {
    use super::*;

    fn entry(status: &str, attestation: &str) -> AttestationEntry {
        AttestationEntry {
            message: "0x0102".into(),
            attestation: attestation.into(),
            event_nonce: "12".into(),
            status: status.into(),
        }
    }

    #[test]
    fn pending_placeholder_is_not_complete() {
        // upstream reports complete before the signature lands
        assert!(!entry(STATUS_COMPLETE, ATTESTATION_PENDING).is_complete());
        assert!(!entry("pending_confirmations", "0xdead").is_complete());
        assert!(entry(STATUS_COMPLETE, "0xdead").is_complete());
    }

    #[test]
    fn decodes_hex_payloads() {
        let decoded = entry(STATUS_COMPLETE, "0xdead").decode().unwrap();
        assert_eq!(decoded.message, vec![0x01, 0x02]);
        assert_eq!(decoded.attestation, vec![0xde, 0xad]);
        assert_eq!(decoded.event_nonce, "12");
    }

    #[test]
    fn envelope_deserializes_upstream_shape() {
        let body = r#"{"messages":[{"message":"0x00","attestation":"PENDING","eventNonce":"55","status":"complete"}]}"#;
        let envelope: AttestationEnvelope = serde_json::from_str(body).unwrap();
        assert_eq!(envelope.messages.len(), 1);
        assert_eq!(envelope.messages[0].event_nonce, "55");
        assert!(!envelope.messages[0].is_complete());
    }
}
