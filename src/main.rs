use mimalloc::MiMalloc;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

use std::sync::Arc;

use actix_web::{web, App, HttpServer};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use flowgate::api::rest::{configure, AppState};
use flowgate::config::Config;
use flowgate::engine::Engine;
use flowgate::errors::CoreError;
use flowgate::globals::Thresholds;
use flowgate::metrics;
use flowgate::netmap::Netmap;
use flowgate::store::postgres::PostgresStore;
use flowgate::store::ClientStore;
use flowgate::subscriber;
use flowgate::Core;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("flowgate=info".parse()?))
        .init();

    info!("FlowGate starting...");

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "flowgate.yaml".to_owned());
    let config = Config::load(&config_path)?;

    metrics::init_metrics();

    let core = match initialize(&config).await {
        Ok(core) => {
            metrics::set_health_status(true);
            core
        }
        Err(err) => {
            error!(error = %err, "failed to initialize core");
            metrics::set_health_status(false);
            return Err(Box::new(err));
        }
    };
    let core = Arc::new(core);

    let shutdown_token = CancellationToken::new();

    let rest_addr = format!("0.0.0.0:{}", config.rest_port);
    info!(address = %rest_addr, "REST server listening");

    let rest_core = Arc::clone(&core);
    let rest_server = HttpServer::new(move || {
        let state = AppState {
            core: Arc::clone(&rest_core),
        };
        App::new()
            .app_data(web::Data::new(state))
            .configure(configure)
    })
    .workers(num_cpus::get())
    .bind(&rest_addr)?
    .run();

    let rest_handle = rest_server.handle();
    let rest_token = shutdown_token.clone();

    let rest_shutdown_task = tokio::spawn(async move {
        rest_token.cancelled().await;
        info!("REST server shutting down");
        rest_handle.stop(true).await;
    });

    let rest_server_task = tokio::spawn(async move {
        if let Err(e) = rest_server.await {
            error!(error = %e, "REST server error");
        }
        info!("REST server stopped");
    });

    tokio::signal::ctrl_c().await?;
    info!("Received shutdown signal, initiating graceful shutdown");

    shutdown_token.cancel();

    let shutdown_timeout = std::time::Duration::from_secs(10);
    let _ = tokio::time::timeout(shutdown_timeout, async {
        let _ = tokio::join!(rest_shutdown_task, rest_server_task);
    })
    .await;

    info!("Shutdown complete");
    Ok(())
}

/// Assembles the core: bypass lists, the live thresholds, the Postgres
/// store and its pool, and the three threshold-subscriber tasks — mirroring
/// `initialize_nnbc`'s `parse_config` -> `start_threads` -> `clear_connections`
/// sequence, including the single retry on `clear_connections` after a
/// one-second pause (spec.md §5, grounded in `nnbc.c`).
async fn initialize(config: &Config) -> Result<Core, CoreError> {
    let whitelist = Netmap::parse(&config.whitelist)?;
    let proxylist = Netmap::parse(&config.proxylist)?;

    let thresholds = Arc::new(Thresholds::new(config.first_touch));
    thresholds.set_under_attack(config.initial_under_attack);

    let postgres_store = Arc::new(
        PostgresStore::connect(config.postgres.clone(), config.pool_size).await?,
    );
    let store: Arc<dyn ClientStore> = postgres_store.clone();

    subscriber::spawn_all(&config.redis_url, config.channels.clone(), Arc::clone(&thresholds))
        .await?;

    if let Err(err) = store.clear_connections().await {
        warn!(error = %err, "clear_connections failed, retrying once");
        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
        if let Err(err) = store.clear_connections().await {
            error!(error = %err, "clear_connections failed again, proceeding anyway");
        }
    }

    tokio::spawn(report_pool_gauges(postgres_store));

    let engine = Engine::new(store, thresholds);
    Ok(Core::new(whitelist, proxylist, engine))
}

/// Reports the connection pool's `(allocated, idle)` counts to the metrics
/// gauges on a fixed interval, since the pool itself has no push hook.
async fn report_pool_gauges(store: Arc<PostgresStore>) {
    let mut ticker = tokio::time::interval(std::time::Duration::from_secs(15));
    loop {
        ticker.tick().await;
        let (allocated, idle) = store.pool_stats();
        metrics::set_pool_gauges(allocated, idle);
    }
}
