//! Environment-driven configuration.
//!
//! Every option of the relayer is an environment variable. Options with a
//! safe default fall back to it; the four deployment-specific options
//! (`ROUTER_ADDRESS`, `ETHEREUM_RPC_URL`, `RELAYER_PRIVATE_KEY`,
//! `TRANSMITTER_ADDRESS`) have none, and a missing one aborts startup with a
//! diagnostic naming the variable.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use config::{Config, Environment};
use ethers_core::types::{Address, U256};
use eyre::{eyre, Result, WrapErr};
use serde::Deserialize;

/// Upstream attestation API base for production domains.
pub const MAINNET_ATTESTATION_BASE: &str = "https://iris-api.circle.com";
/// Upstream attestation API base for test domains.
pub const TESTNET_ATTESTATION_BASE: &str = "https://iris-api-sandbox.circle.com";

#[derive(Debug, Deserialize)]
struct RawSettings {
    #[serde(default)]
    is_testnet: bool,
    router_address: String,
    ethereum_rpc_url: String,
    relayer_private_key: String,
    transmitter_address: String,
    #[serde(default = "default_api_port")]
    api_port: u16,
    #[serde(default = "default_poll_cycle_interval_ms")]
    poll_cycle_interval_ms: u64,
    #[serde(default = "default_attestation_timeout_ms")]
    attestation_timeout_ms: u64,
    #[serde(default = "default_max_retries")]
    max_retries: u32,
    #[serde(default = "default_submitter_poll_interval_ms")]
    submitter_poll_interval_ms: u64,
    #[serde(default = "default_relay_fee")]
    relay_fee: String,
    #[serde(default = "default_db_path")]
    db_path: String,
}

fn default_api_port() -> u16 {
    3000
}
fn default_poll_cycle_interval_ms() -> u64 {
    2_000
}
fn default_attestation_timeout_ms() -> u64 {
    1_800_000
}
fn default_max_retries() -> u32 {
    3
}
fn default_submitter_poll_interval_ms() -> u64 {
    2_000
}
fn default_relay_fee() -> String {
    "0".to_owned()
}
fn default_db_path() -> String {
    "./data/relay.db".to_owned()
}

/// Fully parsed runtime configuration, immutable after startup.
#[derive(Clone)]
pub struct Settings {
    /// Selects the upstream attestation base URL.
    pub is_testnet: bool,
    /// Destination router contract the submitter drives.
    pub router_address: Address,
    /// Destination RPC endpoint.
    pub ethereum_rpc_url: String,
    /// Hex private key of the submitting signer. Never logged.
    pub relayer_private_key: String,
    /// Message transmitter the router forwards to on-chain.
    pub transmitter_address: Address,
    /// Intake API listen port.
    pub api_port: u16,
    /// Sleep between poller cycles.
    pub poll_cycle_interval: Duration,
    /// Age beyond which an unattested job fails.
    pub attestation_timeout: Duration,
    /// Transient submission failures tolerated before a job fails.
    pub max_retries: u32,
    /// Sleep when the submitter finds no work.
    pub submitter_poll_interval: Duration,
    /// Fee claim passed to the router, bounded on-chain by the payload.
    pub relay_fee: U256,
    /// SQLite database file.
    pub db_path: PathBuf,
}

impl Settings {
    /// Load from the process environment.
    pub fn load() -> Result<Self> {
        let raw: RawSettings = Config::builder()
            .add_source(Environment::default().try_parsing(true))
            .build()
            .wrap_err("failed to read environment")?
            .try_deserialize()
            .wrap_err("invalid or missing configuration (required: ROUTER_ADDRESS, ETHEREUM_RPC_URL, RELAYER_PRIVATE_KEY, TRANSMITTER_ADDRESS)")?;
        Settings::from_raw(raw)
    }

    fn from_raw(raw: RawSettings) -> Result<Self> {
        let router_address = raw
            .router_address
            .parse::<Address>()
            .map_err(|e| eyre!("ROUTER_ADDRESS is not a valid address: {e}"))?;
        let transmitter_address = raw
            .transmitter_address
            .parse::<Address>()
            .map_err(|e| eyre!("TRANSMITTER_ADDRESS is not a valid address: {e}"))?;
        let relay_fee = U256::from_dec_str(&raw.relay_fee)
            .map_err(|e| eyre!("RELAY_FEE is not a decimal integer: {e}"))?;

        Ok(Settings {
            is_testnet: raw.is_testnet,
            router_address,
            ethereum_rpc_url: raw.ethereum_rpc_url,
            relayer_private_key: raw.relayer_private_key,
            transmitter_address,
            api_port: raw.api_port,
            poll_cycle_interval: Duration::from_millis(raw.poll_cycle_interval_ms),
            attestation_timeout: Duration::from_millis(raw.attestation_timeout_ms),
            max_retries: raw.max_retries,
            submitter_poll_interval: Duration::from_millis(raw.submitter_poll_interval_ms),
            relay_fee,
            db_path: PathBuf::from(raw.db_path),
        })
    }

    /// Base URL of the upstream attestation API for this environment.
    pub fn attestation_base_url(&self) -> &'static str {
        if self.is_testnet {
            TESTNET_ATTESTATION_BASE
        } else {
            MAINNET_ATTESTATION_BASE
        }
    }
}

// The signer key must not leak through error reports or startup banners.
impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("is_testnet", &self.is_testnet)
            .field("router_address", &self.router_address)
            .field("ethereum_rpc_url", &self.ethereum_rpc_url)
            .field("relayer_private_key", &"<redacted>")
            .field("transmitter_address", &self.transmitter_address)
            .field("api_port", &self.api_port)
            .field("poll_cycle_interval", &self.poll_cycle_interval)
            .field("attestation_timeout", &self.attestation_timeout)
            .field("max_retries", &self.max_retries)
            .field("submitter_poll_interval", &self.submitter_poll_interval)
            .field("relay_fee", &self.relay_fee)
            .field("db_path", &self.db_path)
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn raw() -> RawSettings {
        RawSettings {
            is_testnet: false,
            router_address: "0x00000000000000000000000000000000000000aa".into(),
            ethereum_rpc_url: "http://localhost:8545".into(),
            relayer_private_key:
                "0101010101010101010101010101010101010101010101010101010101010101".into(),
            transmitter_address: "0x00000000000000000000000000000000000000bb".into(),
            api_port: default_api_port(),
            poll_cycle_interval_ms: default_poll_cycle_interval_ms(),
            attestation_timeout_ms: default_attestation_timeout_ms(),
            max_retries: default_max_retries(),
            submitter_poll_interval_ms: default_submitter_poll_interval_ms(),
            relay_fee: default_relay_fee(),
            db_path: default_db_path(),
        }
    }

    #[test]
    fn defaults_resolve() {
        let settings = Settings::from_raw(raw()).unwrap();
        assert_eq!(settings.api_port, 3000);
        assert_eq!(settings.poll_cycle_interval, Duration::from_secs(2));
        assert_eq!(settings.attestation_timeout, Duration::from_secs(1_800));
        assert_eq!(settings.max_retries, 3);
        assert_eq!(settings.relay_fee, U256::zero());
        assert_eq!(settings.attestation_base_url(), MAINNET_ATTESTATION_BASE);
    }

    #[test]
    fn testnet_flag_selects_sandbox() {
        let mut raw = raw();
        raw.is_testnet = true;
        let settings = Settings::from_raw(raw).unwrap();
        assert_eq!(settings.attestation_base_url(), TESTNET_ATTESTATION_BASE);
    }

    #[test]
    fn malformed_router_address_is_fatal() {
        let mut raw = raw();
        raw.router_address = "not-an-address".into();
        let err = Settings::from_raw(raw).unwrap_err();
        assert!(err.to_string().contains("ROUTER_ADDRESS"));
    }

    #[test]
    fn debug_redacts_the_signer_key() {
        let rendered = format!("{:?}", Settings::from_raw(raw()).unwrap());
        assert!(!rendered.contains("0101010101"));
        assert!(rendered.contains("<redacted>"));
    }
}
