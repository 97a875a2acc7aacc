//! Run command implementation.

use crate::server::{start_server, ServerState};
use anyhow::Result;
use k2w_core::{Config, Pipeline};
use std::sync::Arc;
use tracing::info;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

/// Run the fan-out pipeline until interrupted.
pub async fn run(
    mut config: Config,
    bootstrap_servers: Option<String>,
    topic: Option<String>,
    consumer_group: Option<String>,
    base_path: Option<String>,
) -> Result<()> {
    // Apply CLI overrides
    if let Some(servers) = bootstrap_servers {
        config.kafka.bootstrap_servers = servers.split(',').map(String::from).collect();
    }
    if let Some(t) = topic {
        config.kafka.topic = t;
    }
    if let Some(g) = consumer_group {
        config.kafka.consumer_group = g;
    }
    if let Some(p) = base_path {
        config.object_store.base_path = p;
    }

    info!(
        topic = %config.kafka.topic,
        group = %config.kafka.consumer_group,
        base_path = %config.object_store.base_path,
        "Starting pipeline"
    );

    let health_port = config.monitoring.health_port;
    let metrics_port = config.monitoring.metrics_port;

    let mut pipeline = Pipeline::new(config).await?;
    let shutdown_tx = pipeline.shutdown_signal();

    // The HTTP server shares the pipeline's own health and metrics handles
    let server_state = Arc::new(ServerState {
        health: pipeline.health(),
        metrics: pipeline.metrics(),
    });

    let server_shutdown_rx = shutdown_tx.subscribe();
    tokio::spawn(start_server(
        server_state,
        health_port,
        metrics_port,
        server_shutdown_rx,
    ));

    // Handle shutdown signals (SIGINT and SIGTERM)
    let shutdown_signal = shutdown_tx.clone();
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            let mut sigterm =
                signal(SignalKind::terminate()).expect("Failed to install SIGTERM handler");

            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("Received SIGINT (Ctrl+C), initiating graceful drain");
                }
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, initiating graceful drain");
                }
            }
        }

        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
            info!("Received Ctrl+C, initiating graceful drain");
        }

        let _ = shutdown_signal.send(());
    });

    pipeline.run().await?;

    info!("Pipeline stopped");
    Ok(())
}
