//! Wires configuration into running tasks.
//!
//! Per chain: event monitor, retry worker and, when a subgraph is configured,
//! the ownership task. Globally: purgatory and voting-escrow reconciliation.
//! Every task shares one [`CancellationToken`]; a shutdown signal cancels it
//! and the shell waits for the tasks to finish their current iteration.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use ddocache_validator::Validator;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::{ChainConfig, Config, DecryptorMode};
use crate::context::{ChainContext, PublishPolicy};
use crate::decryptor::{Decryptor, LocalDecryptor, ProviderDecryptor};
use crate::graph::GraphClient;
use crate::listener::{EventMonitor, RpcProvider};
use crate::rbac::RbacClient;
use crate::reconcile::{FeedClient, OwnershipTask, PurgatoryTask, VeAllocateTask};
use crate::retry::RetryWorker;
use crate::storage::Storage;

/// Context type used by the running service.
pub type LiveContext = ChainContext<RpcProvider, Decryptor, GraphClient>;

/// Owns the shared resources and the task set.
pub struct IndexerShell {
    config: Config,
    storage: Storage,
    validator: Arc<Validator>,
    cancel: CancellationToken,
}

impl IndexerShell {
    /// Connect the database and load the validator schemas.
    pub async fn new(config: Config) -> Result<Self> {
        let storage = Storage::new(
            &config.database.url,
            Some(config.database.max_connections),
            Some(config.database.min_connections),
        )
        .await
        .context("Failed to connect to database")?;

        storage
            .run_migrations()
            .await
            .context("Failed to run migrations")?;

        let validator = Validator::new().context("Failed to load DDO schemas")?;

        Ok(Self {
            config,
            storage,
            validator: Arc::new(validator),
            cancel: CancellationToken::new(),
        })
    }

    /// Token cancelled on shutdown.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn decryptor(&self) -> Result<Decryptor> {
        let settings = &self.config.decryptor;
        Ok(match settings.mode {
            DecryptorMode::Provider => Decryptor::Provider(ProviderDecryptor::new(
                &settings.private_key,
                Duration::from_secs(settings.timeout_secs),
            )?),
            DecryptorMode::Local => Decryptor::Local(LocalDecryptor::from_hex(&settings.private_key)?),
        })
    }

    async fn chain_context(
        &self,
        chain: &ChainConfig,
        decryptor: Decryptor,
        rbac: Option<RbacClient>,
    ) -> Result<Arc<LiveContext>> {
        let provider = RpcProvider::new(&chain.rpc_url, chain.factory)
            .with_context(|| format!("Failed to create RPC provider for chain {}", chain.chain_id))?;

        let remote = provider
            .chain_id()
            .await
            .with_context(|| format!("RPC for chain {} is unreachable", chain.chain_id))?;
        if remote != chain.chain_id {
            anyhow::bail!(
                "RPC {} serves chain {} but the config says {}",
                chain.rpc_url,
                remote,
                chain.chain_id
            );
        }

        let graph = GraphClient::new(chain.subgraph_url.clone())?;

        Ok(Arc::new(ChainContext {
            chain_id: chain.chain_id,
            network: chain.network.clone(),
            chain: provider,
            storage: self.storage.clone(),
            validator: self.validator.clone(),
            decryptor,
            graph,
            rbac,
            policy: PublishPolicy {
                allowed_publishers: self.config.policy.allowed_publishers.clone(),
                allowed_validators: self.config.policy.allowed_validators.clone(),
            },
            monitor: self.config.monitor.settings_for(chain),
            retry: self.config.retry.policy(),
        }))
    }

    /// Spawn every task, wait for a shutdown signal, then drain.
    pub async fn run(self) -> Result<()> {
        let decryptor = self.decryptor()?;
        let rbac = self
            .config
            .policy
            .rbac_server_url
            .as_deref()
            .map(RbacClient::new)
            .transpose()?;

        let mut tasks: JoinSet<Result<()>> = JoinSet::new();
        let retry_interval = Duration::from_secs(self.config.retry.worker_interval_secs);
        let ownership_interval =
            Duration::from_secs(self.config.reconciliation.ownership_interval_secs);

        for chain in &self.config.chains {
            let ctx = self
                .chain_context(chain, decryptor.clone(), rbac.clone())
                .await?;

            info!(
                chain_id = chain.chain_id,
                network = %chain.network,
                "Chain configured (start block {}, chunk {}, confirmations {})",
                ctx.monitor.start_block,
                ctx.monitor.chunk_size,
                ctx.monitor.confirmations
            );

            let monitor = EventMonitor::new(ctx.clone());
            if self.config.monitor.ignore_last_block {
                monitor.reset_to_start().await?;
            }
            let cancel = self.cancel.clone();
            tasks.spawn(async move { monitor.run(cancel).await });

            let worker = RetryWorker::new(ctx.clone(), retry_interval);
            let cancel = self.cancel.clone();
            tasks.spawn(async move { worker.run(cancel).await });

            if chain.subgraph_url.is_some() {
                let ownership = OwnershipTask::new(ctx, ownership_interval);
                let cancel = self.cancel.clone();
                tasks.spawn(async move { ownership.run(cancel).await });
            }
        }

        let reconcile = &self.config.reconciliation;
        let feeds = FeedClient::new()?;

        if reconcile.asset_purgatory_url.is_some() || reconcile.account_purgatory_url.is_some() {
            let mut purgatory = PurgatoryTask::new(
                self.storage.clone(),
                feeds.clone(),
                reconcile.asset_purgatory_url.clone(),
                reconcile.account_purgatory_url.clone(),
                Duration::from_secs(reconcile.purgatory_interval_mins * 60),
            );
            let cancel = self.cancel.clone();
            tasks.spawn(async move { purgatory.run(cancel).await });
        }

        if reconcile.veallocate_url.is_some() {
            let mut ve = VeAllocateTask::new(
                self.storage.clone(),
                feeds,
                reconcile.veallocate_url.clone(),
                Duration::from_secs(reconcile.veallocate_interval_mins * 60),
            );
            let cancel = self.cancel.clone();
            tasks.spawn(async move { ve.run(cancel).await });
        }

        info!("Indexer is running with {} tasks. Press Ctrl+C to stop.", tasks.len());

        tokio::select! {
            _ = shutdown_signal() => {}
            _ = self.cancel.cancelled() => {}
        }
        self.cancel.cancel();

        info!("Waiting for tasks to finish");
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("Task failed: {:#}", e),
                Err(e) => error!("Task panicked: {}", e),
            }
        }

        self.storage.close().await;
        info!("Indexer stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                warn!("Failed to install SIGTERM handler: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, stopping tasks");
}
