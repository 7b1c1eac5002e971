use ethers_core::types::{Address, H256};

use crate::domain::LOCAL_DOMAIN;

/// Rejection reasons produced by the burn-message validator.
///
/// The rendered strings are persisted verbatim as a failed job's error and
/// surfaced over the intake API, so their wording is part of the contract.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MessageError {
    /// Payload ends before the amount field.
    #[error("message too short")]
    TooShort,
    /// The payload is bound to a different destination ledger.
    #[error("destination domain {0} != {LOCAL_DOMAIN}")]
    WrongDestinationDomain(u32),
    /// The caller restriction names neither the router nor anyone.
    #[error("destinationCaller {0:?} != router or zero")]
    CallerNotRouterOrZero(H256),
    /// The minted funds would land somewhere other than the router.
    #[error("mintRecipient {0:?} != router {1:?}")]
    RecipientNotRouter(Address, Address),
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn renders_canonical_strings() {
        assert_eq!(MessageError::TooShort.to_string(), "message too short");
        assert_eq!(
            MessageError::WrongDestinationDomain(5).to_string(),
            "destination domain 5 != 0"
        );
        let caller = H256::from_low_u64_be(0xbeef);
        assert!(MessageError::CallerNotRouterOrZero(caller)
            .to_string()
            .ends_with("!= router or zero"));
    }
}
