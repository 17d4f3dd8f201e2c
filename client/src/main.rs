//! StaySharp sync daemon.
//!
//! Keeps a local sharpening log in step with the spreadsheet endpoint until
//! interrupted.

use staysharp_engine::normalize::sanitize_knives;
use staysharp_engine::{KnifeRecord, Store};
use staysharp_sync::{
    Config, FileBackend, RemoteClient, Scheduler, SyncEvent, SyncService, Trigger,
};
use std::path::Path;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "staysharp_sync=debug,staysharp_engine=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;
    tracing::info!("Starting StaySharp sync against {}", config.endpoint);

    let backend = FileBackend::open(&config.data_dir)?;
    tracing::info!("Data directory: {}", backend.dir().display());

    let defaults = match &config.catalog_defaults {
        Some(path) => load_catalog_defaults(path),
        None => Vec::new(),
    };
    let store = Store::new(Box::new(backend)).with_catalog_defaults(defaults);

    let remote = RemoteClient::new(&config)?;
    let service = SyncService::new(remote, store);
    tokio::spawn(log_events(service.subscribe()));

    let (scheduler, handle) =
        Scheduler::new(service, config.pull_interval, config.flush_interval);
    handle.trigger(Trigger::Startup).await;

    scheduler
        .run(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for Ctrl-C: {}", err);
            }
        })
        .await;

    tracing::info!("Stopped");
    Ok(())
}

/// Bundled catalog used until the remote one has been fetched.
fn load_catalog_defaults(path: &Path) -> Vec<KnifeRecord> {
    let rows = std::fs::read_to_string(path)
        .map_err(|e| e.to_string())
        .and_then(|raw| {
            serde_json::from_str::<Vec<serde_json::Value>>(&raw).map_err(|e| e.to_string())
        });
    match rows {
        Ok(rows) => sanitize_knives(&rows),
        Err(err) => {
            tracing::warn!("Ignoring catalog defaults at {}: {}", path.display(), err);
            Vec::new()
        }
    }
}

async fn log_events(mut events: tokio::sync::broadcast::Receiver<SyncEvent>) {
    loop {
        match events.recv().await {
            Ok(SyncEvent::Notice(notice)) => tracing::warn!("{}", notice.message),
            Ok(SyncEvent::Failed { error, .. }) if !error.is_retryable() => {
                tracing::error!("Sync needs attention: {}", error)
            }
            Ok(event) => tracing::trace!(?event),
            Err(RecvError::Lagged(skipped)) => tracing::debug!(skipped, "Event log lagged"),
            Err(RecvError::Closed) => break,
        }
    }
}
