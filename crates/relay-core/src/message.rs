//! Fixed-offset codec for the attested burn message.
//!
//! The payload is a packed binary message: a 148-byte outer header followed
//! by the burn body. All multi-byte integers are big-endian and every field
//! the relay reads sits at an absolute byte offset. Parsing is pure; the
//! caller decides what to do with the destination-caller warning flag.

use ethers_core::types::{Address, H256, U256};

use crate::domain::LOCAL_DOMAIN;
use crate::error::MessageError;
use crate::utils::{address_from_bytes32, bytes32_from_address};

const DESTINATION_DOMAIN_OFFSET: usize = 8;
const NONCE_OFFSET: usize = 12;
const DESTINATION_CALLER_OFFSET: usize = 108;
const MINT_RECIPIENT_OFFSET: usize = 184;
const AMOUNT_OFFSET: usize = 216;

/// Header through the amount field inclusive.
pub const MIN_MESSAGE_LEN: usize = AMOUNT_OFFSET + 32;

/// The fields of an attested burn message the relay binds to local policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BurnMessage {
    /// Destination domain the payload is bound to (always the local domain
    /// after validation).
    pub destination_domain: u32,
    /// 32-byte settlement nonce; `(source_domain, nonce)` is the canonical
    /// settlement key.
    pub nonce: H256,
    /// Mint recipient (the router) decoded from the low 20 bytes of the
    /// recipient word.
    pub mint_recipient: Address,
    /// Burn amount.
    pub amount: U256,
    /// True when the destination caller is unrestricted. An all-zero caller
    /// is accepted but leaves the claim open to front-running; callers
    /// should log a warning when set.
    pub unrestricted_caller: bool,
}

impl BurnMessage {
    /// Parse `bytes` and bind it to the local `router`.
    ///
    /// Validates, in order: minimum length, destination domain, destination
    /// caller (router or zero), mint recipient (low 20 bytes must be the
    /// router). Returns the first violation found.
    pub fn parse(bytes: &[u8], router: Address) -> Result<BurnMessage, MessageError> {
        if bytes.len() < MIN_MESSAGE_LEN {
            return Err(MessageError::TooShort);
        }

        let destination_domain = u32::from_be_bytes(
            bytes[DESTINATION_DOMAIN_OFFSET..DESTINATION_DOMAIN_OFFSET + 4]
                .try_into()
                .expect("length checked above"),
        );
        if destination_domain != LOCAL_DOMAIN {
            return Err(MessageError::WrongDestinationDomain(destination_domain));
        }

        let nonce = H256::from_slice(&bytes[NONCE_OFFSET..NONCE_OFFSET + 32]);

        let destination_caller =
            H256::from_slice(&bytes[DESTINATION_CALLER_OFFSET..DESTINATION_CALLER_OFFSET + 32]);
        let unrestricted_caller = destination_caller.is_zero();
        if !unrestricted_caller && destination_caller != bytes32_from_address(router) {
            return Err(MessageError::CallerNotRouterOrZero(destination_caller));
        }

        let recipient_word =
            H256::from_slice(&bytes[MINT_RECIPIENT_OFFSET..MINT_RECIPIENT_OFFSET + 32]);
        let mint_recipient = address_from_bytes32(recipient_word);
        if mint_recipient != router {
            return Err(MessageError::RecipientNotRouter(mint_recipient, router));
        }

        let amount = U256::from_big_endian(&bytes[AMOUNT_OFFSET..AMOUNT_OFFSET + 32]);

        Ok(BurnMessage {
            destination_domain,
            nonce,
            mint_recipient,
            amount,
            unrestricted_caller,
        })
    }

    /// The amount rendered as a decimal string, the form the store keeps.
    pub fn amount_decimal(&self) -> String {
        self.amount.to_string()
    }
}
