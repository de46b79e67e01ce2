//! Fairytale Studio gateway binary
//!
//! Wires configuration, persistence, media storage and vendor clients into
//! the router and serves it until Ctrl+C or SIGTERM.

use anyhow::Context;
use fairytale_common::{
    config::{AppConfig, ImageProvider, PersistenceBackend},
    d1::{D1Client, D1Store},
    db::{DbPool, Repository, StoryStore},
    metrics,
    storage::create_media_store,
};
use fairytale_gateway::{create_router, observability::prometheus_builder, AppState};
use fairytale_generation::{
    create_image_generator, CosyVoiceClient, DeepSeekClient, PipelineSettings, PipelineVendors,
    StoryPipeline,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const SESSION_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = AppConfig::load().context("failed to load configuration")?;

    init_tracing(&config);

    info!(
        "Starting {} v{}",
        config.observability.service_name,
        fairytale_common::VERSION
    );

    let prometheus = if config.observability.metrics_enabled {
        let handle = prometheus_builder()
            .context("invalid histogram buckets")?
            .install_recorder()
            .context("failed to install Prometheus recorder")?;
        metrics::register_metrics();
        Some(handle)
    } else {
        None
    };

    if config.auth.password.is_empty() && config.auth.require_login {
        warn!("auth.password is empty; every login will be rejected");
    }

    let store = connect_store(&config).await?;
    let media = create_media_store(&config.storage).await?;
    info!(backend = media.backend_name(), "Media storage ready");

    if config.image.provider == ImageProvider::Jimeng && config.image.jimeng.access_key_id.is_empty() {
        warn!("Jimeng selected without an access key; image requests will fail");
    }
    let images = create_image_generator(&config.image)?;
    info!(
        provider = images.provider_name(),
        mirror = config.image.mirror_to_storage,
        "Image generator ready"
    );

    let vendors = PipelineVendors {
        writer: Arc::new(DeepSeekClient::new(&config.text)?),
        images,
        speech: Arc::new(CosyVoiceClient::new(&config.speech)),
        media,
        store,
    };
    let pipeline = StoryPipeline::new(vendors, PipelineSettings::from(&config))?;

    let addr = config.bind_address();
    let state = AppState::new(config, pipeline, prometheus)?;

    spawn_session_sweeper(&state);

    let app = create_router(state);

    info!("Listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.observability.log_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    if config.observability.json_logging {
        builder.json().init();
    } else {
        builder.pretty().init();
    }
}

/// Build the configured story store, creating tables for the relational backend
async fn connect_store(config: &AppConfig) -> anyhow::Result<Arc<dyn StoryStore>> {
    let store: Arc<dyn StoryStore> = match config.persistence.backend {
        PersistenceBackend::Database => {
            info!("Connecting to database...");
            let pool = DbPool::new(&config.database).await?;
            pool.ensure_schema().await?;
            Arc::new(Repository::new(pool))
        }
        PersistenceBackend::D1 => {
            let client = D1Client::new(&config.d1)?;
            Arc::new(D1Store::new(client))
        }
    };

    if let Err(e) = store.ping().await {
        // D1 may be reachable later; the readiness check reports it
        warn!(backend = store.backend_name(), error = %e, "Story store not reachable at startup");
    }

    info!(backend = store.backend_name(), "Story store ready");
    Ok(store)
}

/// Drop expired sessions once a minute
fn spawn_session_sweeper(state: &AppState) {
    let sessions = state.sessions.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(SESSION_SWEEP_INTERVAL);
        loop {
            interval.tick().await;
            let purged = sessions.purge_expired().await;
            if purged > 0 {
                tracing::debug!(purged, "Expired sessions removed");
            }
        }
    });
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, starting shutdown..."),
        _ = terminate => info!("Received SIGTERM, starting shutdown..."),
    }
}
