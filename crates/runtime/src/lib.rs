//! Process bootstrap: telemetry setup and the wiring of configuration into
//! the client router, enrichment engine, stores, and processing use-case.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use roster_backend_api::{ChatProcessor, ProcessUseCase, ResultCache, TaskStore};
use roster_config::AppConfig;
use roster_engine::{Enricher, EnricherConfig};
use roster_telegram::{
    ClientRouter, CredentialPrompt, GrammersSession, MessengerSession, TerminalPrompt,
    UpstreamClient,
};

pub mod telemetry {
    use anyhow::Result;
    use tracing_subscriber::EnvFilter;

    use roster_config::LoggingConfig;

    /// Installs the global tracing subscriber. The configured level seeds
    /// the default filter (`RUST_LOG` still wins) and `format = json`
    /// switches to the JSON formatter.
    pub fn init_tracing(logging: &LoggingConfig) -> Result<()> {
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(logging.level.clone()));

        if logging.format == "json" {
            let subscriber = tracing_subscriber::fmt()
                .json()
                .with_env_filter(env_filter)
                .finish();
            tracing::subscriber::set_global_default(subscriber)
                .map_err(|error| anyhow::anyhow!("failed to set tracing subscriber: {error}"))
        } else {
            let subscriber = tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .finish();
            tracing::subscriber::set_global_default(subscriber)
                .map_err(|error| anyhow::anyhow!("failed to set tracing subscriber: {error}"))
        }
    }
}

pub struct BackendServices {
    pub router: Arc<ClientRouter>,
    pub task_store: Arc<TaskStore>,
    pub cache: Arc<ResultCache>,
    pub processor: Arc<dyn ChatProcessor>,
    sweeps: CancellationToken,
}

impl BackendServices {
    pub async fn initialise(config: &AppConfig) -> anyhow::Result<Self> {
        let prompt: Arc<dyn CredentialPrompt> = Arc::new(TerminalPrompt);
        let clients: Vec<Arc<UpstreamClient>> = config
            .telegram
            .servers
            .iter()
            .map(|server| {
                let session: Arc<dyn MessengerSession> =
                    Arc::new(GrammersSession::new(server.clone(), prompt.clone()));
                Arc::new(UpstreamClient::new(session))
            })
            .collect();

        let router = ClientRouter::new(clients, config.telegram.health_check_interval());
        router.warm_up();
        info!(
            clients = router.healthy_count(),
            "client router initialised"
        );

        let enricher = Enricher::new(
            router.clone(),
            EnricherConfig {
                pool_size: config.enrichment.pool_size,
                client_retry_pause: config.enrichment.client_retry_pause(),
                operation_timeout: config.enrichment.operation_timeout(),
                ..EnricherConfig::default()
            },
        );

        let task_store = Arc::new(TaskStore::new());
        let cache = Arc::new(ResultCache::new());
        let sweeps = CancellationToken::new();
        let _ = task_store.spawn_cleanup(config.server.cleanup_interval(), sweeps.clone());
        let _ = cache.spawn_cleanup(config.server.cleanup_interval(), sweeps.clone());

        let processor: Arc<dyn ChatProcessor> = Arc::new(ProcessUseCase::new(
            cache.clone(),
            enricher,
            config.processing.cache_ttl(),
            config.processing.task_timeout(),
        ));

        Ok(Self {
            router,
            task_store,
            cache,
            processor,
            sweeps,
        })
    }

    /// Stops the sweep loops and the router's health loop.
    pub async fn shutdown(&self) {
        self.sweeps.cancel();
        self.router.stop().await;
    }
}

pub async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::warn!(?error, "failed to listen for shutdown signal");
    }
    info!("shutdown signal received");
}
