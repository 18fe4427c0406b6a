use std::sync::Arc;

use anyhow::{Result, bail};
use rmcp::transport::streamable_http_server::{StreamableHttpService, session::local::LocalSessionManager};
use tokio_util::sync::CancellationToken;

use genstudio::{
    config::AppConfig,
    mcp_server::StudioServer,
    orchestrator::{DispatchMode, Orchestrator},
    providers::ProviderSet,
    queue::{JobQueue, QueueConfig},
    router::{ModelRegistry, ModelRouter},
    storage::LocalFileStorage,
    store::FileGenerationStore,
    telemetry,
    types::ProviderId,
    web::{self, AppState, RoutePaths},
    worker::Worker,
};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    telemetry::init_tracing();
    let config = AppConfig::from_env()?;
    let bind_address = config.bind_address();
    let mcp_path = config.scoped_path("/mcp");

    let mut registry = ModelRegistry::builtin();
    for provider in ProviderId::ALL {
        let unconfigured = config.router.credentials.get(provider).is_none()
            || (provider == ProviderId::Higgsfield && config.router.higgsfield_application.is_none());
        if unconfigured {
            tracing::warn!(provider = %provider, "provider not configured, its models are disabled");
            registry = registry.without_provider(provider);
        }
    }
    if registry.is_empty() {
        bail!("no provider is configured; set MODELS_LABS_API_KEY, XAI_API_KEY or HIGGSFIELD_API_KEY");
    }
    let router = Arc::new(ModelRouter::new(registry, config.router.clone())?);

    let client = reqwest::Client::new();
    let download_base_url = format!("{}/downloads", config.cache_base_url.trim_end_matches("/cache"));
    let storage = Arc::new(
        LocalFileStorage::new(config.cache_dir.clone(), config.cache_base_url.clone())
            .with_signing(config.signing_secret.clone(), &download_base_url)
            .with_client(client.clone()),
    );
    let records = Arc::new(FileGenerationStore::new(config.data_dir.clone()));
    let queue = Arc::new(JobQueue::open(QueueConfig::default(), config.data_dir.join("queue.json")).await?);
    let orchestrator = Orchestrator::new(
        router,
        ProviderSet::builtin(client),
        records,
        storage.clone(),
        queue,
    )
    .with_fallbacks(config.fallbacks.clone())
    .with_asset_urls(config.asset_urls);
    let worker = Worker::new(orchestrator.clone());
    worker.recover_interrupted().await?;

    let background_mode = if config.worker_interval.is_some() || config.worker_secret.is_some() {
        DispatchMode::Queued
    } else {
        DispatchMode::Detached
    };
    let orchestrator_for_service = orchestrator.clone();
    let service = StreamableHttpService::new(
        move || Ok(StudioServer::new(orchestrator_for_service.clone(), background_mode)),
        LocalSessionManager::default().into(),
        Default::default(),
    );

    let state = AppState {
        orchestrator,
        worker: worker.clone(),
        storage,
        asset_urls: config.asset_urls,
        worker_secret: config.worker_secret.clone(),
    };
    let app = web::routes(state, &RoutePaths::for_config(&config)).nest_service(&mcp_path, service);

    let cancel = CancellationToken::new();
    let worker_handle = config
        .worker_interval
        .map(|interval| tokio::spawn(worker.run(interval, cancel.clone())));

    let tcp_listener = tokio::net::TcpListener::bind(&bind_address).await?;
    tracing::info!(
        address = %bind_address,
        mcp_path = %mcp_path,
        cache_dir = %config.cache_dir.display(),
        data_dir = %config.data_dir.display(),
        asset_urls = %config.asset_urls,
        background_mode = ?background_mode,
        "genstudio MCP HTTP server started"
    );

    let shutdown = cancel.clone();
    axum::serve(tcp_listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown requested");
            shutdown.cancel();
        })
        .await?;

    cancel.cancel();
    if let Some(handle) = worker_handle {
        let _ = handle.await;
    }
    Ok(())
}
