//! The relayer drives burn-and-mint transfers from their attested state
//! through to terminal confirmation on the destination ledger.
//!
//! Three loops share one durable job store: the intake API admits jobs, the
//! attestation poller advances them to `attested`, and the submitter signs
//! and broadcasts them to the destination router and classifies the result.

#![forbid(unsafe_code)]

use eyre::Result;

use relay_base::Settings;

use crate::relayer::Relayer;

mod attestation;
mod contracts;
mod poller;
mod relayer;
mod server;
mod submitter;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    relay_base::trace::init_tracing();

    let settings = Settings::load()?;
    let relayer = Relayer::from_settings(settings).await?;
    relayer.run().await
}
