use std::sync::Arc;

use anyhow::Context;
use tokio::{net::TcpListener, signal, sync::mpsc};
use tower_http::{
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::info;

use storefront_api as api;
use api::config::StorageBackend;
use api::repositories::{InMemoryOrderRepository, OrderRepository, SeaOrmOrderRepository};
use api::services::carts::{CartStore, InMemoryCartStore, SeaOrmCartStore};
use api::services::catalog::{CatalogGateway, HttpCatalogGateway};
use api::services::settlement::SettlementService;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = api::config::load_config().context("failed to load configuration")?;
    api::config::init_tracing(&cfg.log_level, cfg.log_json);

    // Domain event plumbing: services publish, one background task consumes.
    let (event_tx, event_rx) = mpsc::channel(1024);
    let event_sender = api::events::EventSender::new(event_tx);
    tokio::spawn(api::events::process_events(event_rx));

    // Storage backend is decided once, here. The rest of the process only
    // ever sees the trait objects.
    let (carts, orders): (Arc<dyn CartStore>, Arc<dyn OrderRepository>) =
        match cfg.storage_backend {
            StorageBackend::Database => {
                let db = Arc::new(
                    api::db::connect(&cfg.database_url)
                        .await
                        .context("failed to connect to database")?,
                );
                info!("using database-backed cart and order storage");
                (
                    Arc::new(SeaOrmCartStore::new(db.clone(), cfg.currency.clone())),
                    Arc::new(SeaOrmOrderRepository::new(db)),
                )
            }
            StorageBackend::InMemory => {
                info!("using in-memory cart and order storage");
                (
                    Arc::new(InMemoryCartStore::new(cfg.currency.clone())),
                    Arc::new(InMemoryOrderRepository::new()),
                )
            }
        };

    let catalog: Arc<dyn CatalogGateway> =
        Arc::new(HttpCatalogGateway::new(cfg.catalog.endpoint.clone()));
    let gateway = api::payments::build_gateway(&cfg.payment);

    let settlement = Arc::new(SettlementService::new(
        orders.clone(),
        carts.clone(),
        catalog,
        gateway,
        event_sender.clone(),
        cfg.currency.clone(),
        cfg.provider_timeout(),
    ));

    let state = Arc::new(api::AppState {
        carts,
        orders,
        settlement,
        event_sender,
    });

    let app = api::app_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .layer(TimeoutLayer::new(std::time::Duration::from_secs(30)));

    let addr = cfg.listen_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!(addr = %addr, provider = %cfg.payment.provider, "storefront API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}
