//! HTTP server command implementation.

use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use egoflow::backend::{HttpReasoningBackend, ReasoningBackend};
use egoflow::cleanup;
use egoflow::config::{self, Config};
use egoflow::connection::ConnectionRegistry;
use egoflow::exchange::Orchestrator;
use egoflow::server::{self, AppState};
use egoflow::store::{BlobStore, DurableStore, FileBlobStore, MemoryStore};

pub async fn run(
    config_path: &str,
    host_override: Option<IpAddr>,
    port_override: Option<u16>,
    backend_url_override: Option<String>,
) -> Result<()> {
    let mut config = Config::load(config_path).await?;

    // CLI overrides config
    if let Some(host) = host_override {
        config.server.host = host.to_string();
    }
    if let Some(port) = port_override {
        config.server.port = port;
    }
    if let Some(url) = backend_url_override {
        config.backend.base_url = url;
    }

    let blob_dir = config::resolve_path(Path::new(config_path), &config.storage.blob_dir);
    info!(path = %blob_dir.display(), "Blob store initialized");

    let backend: Arc<dyn ReasoningBackend> = Arc::new(
        HttpReasoningBackend::new(&config.backend.base_url, config.backend.timeout())
            .context("Failed to build reasoning backend client")?,
    );
    info!(base_url = %config.backend.base_url, "Reasoning backend configured");

    let store: Arc<dyn DurableStore> = Arc::new(MemoryStore::new());
    let blobs: Arc<dyn BlobStore> = Arc::new(FileBlobStore::new(blob_dir));

    let orchestrator = Arc::new(Orchestrator::new(
        backend,
        store.clone(),
        blobs.clone(),
        config.orchestrator.clone(),
    ));

    let (registry, registry_task) = ConnectionRegistry::spawn();

    let sweeper_shutdown = CancellationToken::new();
    let sweeper = cleanup::spawn_attachment_sweeper(
        store,
        blobs,
        config.storage.retention(),
        config.storage.cleanup_interval(),
        sweeper_shutdown.clone(),
    );

    let state = AppState {
        orchestrator,
        registry: registry.clone(),
        connection: config.connection.clone(),
        api_token: config.server.api_token.clone(),
        keep_alive_interval_seconds: config.server.keep_alive_interval_seconds,
        max_connections: config.server.max_connections,
    };
    let app = server::build_app(state, config.server.request_timeout_seconds);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .with_context(|| {
            format!(
                "Invalid listen address {}:{}",
                config.server.host, config.server.port
            )
        })?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, version = egoflow::build_info::VERSION, "Server listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Closing client connections...");
    registry.shutdown().await;
    if let Err(e) = registry_task.await {
        warn!(error = %e, "Connection registry ended abnormally");
    }

    sweeper_shutdown.cancel();
    if let Err(e) = sweeper.await {
        warn!(error = %e, "Attachment sweeper ended abnormally");
    }

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
        _ = terminate => info!("Received SIGTERM, shutting down..."),
    }
}
