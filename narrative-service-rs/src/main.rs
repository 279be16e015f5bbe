// narrative-service-rs/src/main.rs
// Main entry point for the narrative service.
// Wires the stores, generator and task manager together and serves the HTTP API.

use std::sync::Arc;

use config_rs::{get_formatted_service_name, LoggingSettings, ServiceSettings, NARRATIVE_SERVICE};
use narrative_service::api::{create_router, AppState};
use narrative_service::generator::{CachingGenerator, HttpNarrativeGenerator, NarrativeGenerator};
use narrative_service::logging::init_tracing;
use narrative_service::manager::{TaskManager, TaskManagerConfig};
use narrative_service::store::{
    DurableTaskStore, FastStore, FileDurableStore, MemoryFastStore, RedisFastStore,
};
use narrative_service::webhook::HttpWebhookNotifier;
use rca_model::{IdentifierResolver, MapLookup};
use tracing::{error, info, warn};

async fn fast_store(settings: &ServiceSettings) -> Arc<dyn FastStore> {
    match &settings.fast_store_url {
        Some(url) => match RedisFastStore::connect(url).await {
            Ok(store) => Arc::new(store),
            Err(err) => {
                warn!(error = %err, "redis unavailable, falling back to in-memory fast tier");
                Arc::new(MemoryFastStore::new())
            }
        },
        None => {
            info!("no fast store URL configured, using in-memory fast tier");
            Arc::new(MemoryFastStore::new())
        }
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to listen for shutdown signal");
    }
    info!("shutdown signal received");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Must precede ServiceSettings::from_env, which logs while checking values.
    init_tracing(&LoggingSettings::from_env())?;
    let settings = ServiceSettings::from_env();

    let fast = fast_store(&settings).await;

    let http_generator: Arc<dyn NarrativeGenerator> =
        Arc::new(HttpNarrativeGenerator::new(&settings.llm)?);
    let generator: Arc<dyn NarrativeGenerator> = if settings.cache.enabled {
        Arc::new(CachingGenerator::new(
            http_generator,
            Arc::clone(&fast),
            settings.cache.ttl,
        ))
    } else {
        http_generator
    };

    let notifier = Arc::new(HttpWebhookNotifier::new(settings.webhook_timeout));
    let mut manager = TaskManager::new(
        fast,
        generator,
        notifier,
        TaskManagerConfig::from(&settings),
    );

    if let Some(dir) = &settings.durable_store_dir {
        let durable: Arc<dyn DurableTaskStore> = Arc::new(FileDurableStore::open(dir.clone()).await?);
        info!(dir = %dir.display(), "durable task history enabled");
        manager = manager.with_durable(durable);
    }

    if let Some(path) = &settings.identifier_map {
        match MapLookup::from_json_file(path) {
            Ok(lookup) => {
                info!(entries = lookup.len(), "identifier map loaded");
                manager = manager.with_resolver(IdentifierResolver::new(Arc::new(lookup)));
            }
            Err(err) => warn!(path = %path.display(), error = %err, "identifier map not loaded"),
        }
    }

    let state = AppState::new(Arc::new(manager), settings.pipeline.clone());
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(settings.bind_addr).await?;
    info!(
        service = %get_formatted_service_name(NARRATIVE_SERVICE),
        addr = %settings.bind_addr,
        "listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}
