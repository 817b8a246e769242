//! HTTP server for booking waste collections with Zeromonos.

mod config;
mod error;
mod principal;
mod routes;

use std::future;
use std::sync::Arc;

use anyhow::{Context, Result};
use reqwest::Client;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};
use zeromonos_catalog_geoapi::GeoApiCatalog;
use zeromonos_core::{
    BookingService, BookingStore, Clock, RandomTokenGenerator, SystemClock, TokenGenerator,
};
use zeromonos_store_memory::InMemoryBookingStore;

use crate::config::Config;

const DEFAULT_LOG_FILTER: &str = "zeromonos_server=info,zeromonos_core=info,zeromonos_store_memory=info,zeromonos_catalog_geoapi=info,tower_http=debug";

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let config = Config::from_env().context("loading configuration")?;

    // Store + service setup
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let tokens: Arc<dyn TokenGenerator> = Arc::new(RandomTokenGenerator);
    let store: Arc<dyn BookingStore> = match &config.data_file {
        Some(path) => {
            let store = InMemoryBookingStore::open(path, Arc::clone(&clock), tokens)
                .await
                .with_context(|| format!("loading bookings from {}", path.display()))?;
            info!(path = %path.display(), "Bookings persisted to snapshot file");
            Arc::new(store)
        }
        None => {
            warn!("ZEROMONOS_DATA_FILE unset, bookings are kept in memory only");
            Arc::new(InMemoryBookingStore::new(Arc::clone(&clock), tokens))
        }
    };

    let client = Client::builder().user_agent("zeromonos/0.1").build()?;
    let catalog = Arc::new(GeoApiCatalog::new(client, config.catalog.clone()));
    let service = BookingService::new(store, clock, config.schedule.clone()).with_catalog(catalog);

    let app = routes::router(Arc::new(service)).layer(TraceLayer::new_for_http());

    let addr = config.bind_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(addr = %addr, "Zeromonos listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving HTTP")?;

    info!("Zeromonos stopped");
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .with(fmt::layer().with_target(false))
        .init();
}

async fn shutdown_signal() {
    if let Err(err) = signal::ctrl_c().await {
        warn!(error = %err, "Could not listen for shutdown signal");
        // keep serving; the process can still be killed
        future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
