// src/server/spawner.rs

//! Spawns the server's long-running background tasks.

use super::context::ServerContext;
use super::metrics_server;
use anyhow::{Result, anyhow};
use tracing::info;

/// Spawns the relay coordinator and, if enabled, the metrics server.
pub fn spawn_all(ctx: &mut ServerContext) -> Result<()> {
    let shutdown_tx = &ctx.shutdown_tx;
    let background_tasks = &mut ctx.background_tasks;

    // --- Relay Coordinator ---
    let coordinator = ctx
        .init
        .coordinator
        .take()
        .ok_or_else(|| anyhow!("Relay coordinator was already spawned"))?;
    let shutdown_rx_relay = shutdown_tx.subscribe();
    background_tasks.spawn(async move {
        coordinator.run(shutdown_rx_relay).await;
        Ok(())
    });

    // --- Metrics Server ---
    if ctx.state.config.metrics.enabled {
        let metrics_state = ctx.state.clone();
        let shutdown_rx_metrics = shutdown_tx.subscribe();
        background_tasks.spawn(async move {
            metrics_server::run_metrics_server(metrics_state, shutdown_rx_metrics).await
        });
    } else {
        info!("Prometheus metrics server is disabled in the configuration.");
    }

    info!("All background tasks have been spawned.");
    Ok(())
}
