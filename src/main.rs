//! Purchase lifecycle service
//!
//! ```text
//! ┌──────────┐    ┌─────────────┐    ┌──────────┐    ┌─────────────┐
//! │ Gateway  │───▶│ Coordinator │───▶│  Store   │    │ Settlement/ │
//! │  (HTTP)  │    │ (apply+CAS) │    │ (PG/mem) │    │   Assets    │
//! └──────────┘    └─────────────┘    └──────────┘    └─────────────┘
//!                        ▲                                  ▲
//!                 ┌─────────────┐                           │
//!                 │ Reconciler  │──── effects after write ──┘
//!                 │  (timers)   │
//!                 └─────────────┘
//! ```

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::watch;

use purchase_lifecycle::config::AppConfig;
use purchase_lifecycle::db::Database;
use purchase_lifecycle::gateway::{self, state::AppState};
use purchase_lifecycle::logging::init_logging;
use purchase_lifecycle::purchase::{
    AssetJanitor, EffectDispatcher, HttpAssetJanitor, HttpSettlementClient, LoggingAssetJanitor,
    LoggingSettlementClient, MemoryPurchaseStore, PgPurchaseStore, PurchaseCoordinator,
    PurchaseStore, ReconciliationWorker, SettlementClient, SystemClock,
};

fn get_arg(names: &[&str]) -> Option<String> {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if names.contains(&args[i].as_str()) && i + 1 < args.len() {
            return Some(args[i + 1].clone());
        }
    }
    None
}

fn get_env() -> String {
    get_arg(&["--env", "-e"]).unwrap_or_else(|| "dev".to_string())
}

fn build_effects(config: &AppConfig) -> anyhow::Result<EffectDispatcher> {
    let timeout = config.lifecycle.effect_timeout();

    let settlement: Arc<dyn SettlementClient> = match &config.collaborators.settlement_url {
        Some(url) => Arc::new(
            HttpSettlementClient::new(url.clone(), timeout)
                .context("Failed to build settlement client")?,
        ),
        None => {
            tracing::warn!("No settlement_url configured; settlements are only logged");
            Arc::new(LoggingSettlementClient)
        }
    };

    let janitor: Arc<dyn AssetJanitor> = match &config.collaborators.asset_url {
        Some(url) => Arc::new(
            HttpAssetJanitor::new(url.clone(), timeout).context("Failed to build asset client")?,
        ),
        None => {
            tracing::warn!("No asset_url configured; asset deletions are only logged");
            Arc::new(LoggingAssetJanitor)
        }
    };

    Ok(EffectDispatcher::new(settlement, janitor, timeout))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for ctrl-c: {}", e);
        return;
    }
    tracing::info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = get_env();
    let mut config = AppConfig::load(&env)?;
    if let Some(port) = get_arg(&["--port", "-p"]) {
        config.gateway.port = port.parse().context("--port must be a valid u16")?;
    }

    let _guard = init_logging(&config);
    tracing::info!(
        "Starting purchase_lifecycle {} (env={})",
        env!("BUILD_VERSION"),
        env
    );

    let (store, pg_db): (Arc<dyn PurchaseStore>, Option<Arc<Database>>) =
        match &config.postgres_url {
            Some(url) => {
                let db = Arc::new(
                    Database::connect(url)
                        .await
                        .context("Failed to connect to PostgreSQL")?,
                );
                let store = PgPurchaseStore::new(db.pool().clone());
                store.init_schema().await?;
                (Arc::new(store), Some(db))
            }
            None => {
                tracing::warn!("No postgres_url configured; using in-memory store");
                (Arc::new(MemoryPurchaseStore::new()), None)
            }
        };

    let coordinator = Arc::new(PurchaseCoordinator::with_clock(
        store,
        build_effects(&config)?,
        Arc::new(SystemClock),
        config.lifecycle.windows(),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = ReconciliationWorker::new(coordinator.clone(), config.lifecycle.worker());
    let worker_handle = tokio::spawn(async move { worker.run(shutdown_rx).await });

    let state = Arc::new(AppState::new(coordinator, pg_db));
    let served = gateway::run_server(
        &config.gateway.host,
        config.gateway.port,
        state,
        shutdown_signal(),
    )
    .await;

    let _ = shutdown_tx.send(true);
    if let Err(e) = worker_handle.await {
        tracing::error!("Reconciliation worker panicked: {}", e);
    }

    served
}
