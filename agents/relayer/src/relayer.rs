//! Agent wiring: settings → store → signer → components.
//!
//! Three long-lived loops share the process: the intake server, the
//! attestation poller, and the submitter. They communicate only through
//! the job store. A single cancellation token, triggered by ctrl-c, is
//! observed by all of them at the top of each iteration.

use std::sync::Arc;

use ethers::middleware::SignerMiddleware;
use ethers::providers::{Http, Middleware, Provider};
use ethers::signers::{LocalWallet, Signer};
use eyre::{Result, WrapErr};
use futures::future::select_all;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, instrument::Instrumented, warn, Instrument};

use relay_base::{CoreMetrics, JobStore, RateLimiter, Settings};

use crate::attestation::AttestationClient;
use crate::contracts::BurnRouter;
use crate::poller::AttestationPoller;
use crate::server::ServerState;
use crate::submitter::{RelayerMiddleware, Submitter};

/// The assembled relayer, ready to run.
pub struct Relayer {
    settings: Settings,
    store: JobStore,
    metrics: CoreMetrics,
    client: Arc<RelayerMiddleware>,
    contract: BurnRouter<RelayerMiddleware>,
}

impl Relayer {
    /// Build every component from settings. Fatal conditions (unreachable
    /// store, invalid signer key, unreachable RPC) surface here and abort
    /// startup.
    pub async fn from_settings(settings: Settings) -> Result<Relayer> {
        let store = JobStore::connect(&settings.db_path)
            .await
            .wrap_err("failed to open job store")?;
        let metrics = CoreMetrics::new().wrap_err("failed to register metrics")?;

        let provider = Provider::<Http>::try_from(settings.ethereum_rpc_url.as_str())
            .wrap_err("ETHEREUM_RPC_URL is not a valid endpoint")?;
        let chain_id = provider
            .get_chainid()
            .await
            .wrap_err("destination RPC unreachable")?;
        let wallet: LocalWallet = settings
            .relayer_private_key
            .parse()
            .wrap_err("RELAYER_PRIVATE_KEY is not a valid key")?;
        let wallet = wallet.with_chain_id(chain_id.as_u64());
        let signer_address = wallet.address();
        let client = Arc::new(SignerMiddleware::new(provider, wallet));
        let contract = BurnRouter::new(settings.router_address, client.clone());

        info!(
            chain_id = chain_id.as_u64(),
            signer = ?signer_address,
            router = ?settings.router_address,
            transmitter = ?settings.transmitter_address,
            testnet = settings.is_testnet,
            db_path = ?settings.db_path,
            "relayer configured"
        );

        Ok(Relayer {
            settings,
            store,
            metrics,
            client,
            contract,
        })
    }

    /// Run all components until one exits or shutdown is requested.
    pub async fn run(self) -> Result<()> {
        let shutdown = CancellationToken::new();
        spawn_shutdown_listener(shutdown.clone());

        let poller = AttestationPoller::new(
            self.store.clone(),
            AttestationClient::new(self.settings.attestation_base_url())?,
            Arc::new(RateLimiter::default()),
            self.metrics.clone(),
            self.settings.router_address,
            self.settings.poll_cycle_interval,
            self.settings.attestation_timeout,
            shutdown.clone(),
        );
        let submitter = Submitter::new(
            self.store.clone(),
            self.contract,
            self.client,
            self.settings.relay_fee,
            self.settings.max_retries,
            self.settings.submitter_poll_interval,
            self.metrics.clone(),
            shutdown.clone(),
        );
        let server = ServerState::new(self.store, self.metrics);

        let api_port = self.settings.api_port;
        let server_shutdown = shutdown.clone();
        let server_task: Instrumented<JoinHandle<Result<()>>> =
            tokio::spawn(async move { server.serve(api_port, server_shutdown).await })
                .instrument(info_span!("IntakeApi"));

        let tasks = vec![poller.spawn(), submitter.spawn(), server_task];
        let (first, _, remaining) = select_all(tasks).await;

        // one component stopping stops the agent; drain the rest
        shutdown.cancel();
        for task in remaining {
            let _ = tokio::time::timeout(Duration::from_secs(5), task).await;
        }

        match first {
            Ok(result) => result,
            Err(join_error) => {
                warn!(error = %join_error, "component task panicked");
                Err(join_error.into())
            }
        }
    }
}

fn spawn_shutdown_listener(shutdown: CancellationToken) {
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for shutdown signal");
            return;
        }
        info!("shutdown signal received");
        shutdown.cancel();
    });
}
