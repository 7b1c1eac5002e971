//! Core types for the burn-and-mint relay.
//!
//! This crate is I/O-free: it defines the relay job model, the known source
//! domains, the attested burn-message codec, and the DTOs exchanged with the
//! upstream attestation service. Everything that talks to a database, a
//! chain, or the network lives in `relay-base` and the agent crates.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod attestation;
pub mod domain;
mod error;
mod job;
pub mod message;
pub mod utils;

pub use error::MessageError;
pub use job::{JobStatus, RelayJob, RelayOutcome};
pub use message::BurnMessage;
