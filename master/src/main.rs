mod failover;
mod handlers;
mod scheduling;
mod state;

use crate::state::AppState;
use anyhow::Context;
use common::storage::DEFAULT_PAGE_SIZE;
use std::env;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

pub const WORKER_HEARTBEAT_TIMEOUT_SECS: u64 = 20;
pub const FAILOVER_SWEEP_INTERVAL_SECS: u64 = 5;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("master=debug,tower_http=info")),
        )
        .init();

    let bind = env::var("MASTER_BIND").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
    let page_size = match env::var("LIST_PAGE_SIZE") {
        Ok(v) => v
            .parse::<usize>()
            .with_context(|| format!("LIST_PAGE_SIZE inválido: {v}"))?,
        Err(_) => DEFAULT_PAGE_SIZE,
    };

    let state = AppState::new(page_size);

    // router HTTP
    let app = handlers::build_router(state.clone());

    // detector de workers caídos en segundo plano
    let failover_state = state.clone();
    tokio::spawn(async move {
        failover::run_failover_loop(failover_state).await;
    });

    let listener = TcpListener::bind(&bind)
        .await
        .with_context(|| format!("no se pudo escuchar en {bind}"))?;
    info!(
        "master escuchando en {} (page size={})",
        listener.local_addr()?,
        page_size
    );

    axum::serve(listener, app).await?;
    Ok(())
}
