//! HTTP server for health and metrics endpoints.

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use k2w_core::health::{ComponentStatus, HealthCheck, HealthStatus};
use k2w_core::metrics::PipelineMetrics;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info};

/// Shared state for HTTP endpoints.
pub struct ServerState {
    pub health: Arc<HealthCheck>,
    pub metrics: Arc<PipelineMetrics>,
}

/// Health response structure.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub uptime_seconds: u64,
    pub components: std::collections::HashMap<String, ComponentStatusResponse>,
}

/// Component status response.
#[derive(Debug, Serialize)]
pub struct ComponentStatusResponse {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl From<&ComponentStatus> for ComponentStatusResponse {
    fn from(status: &ComponentStatus) -> Self {
        match status {
            ComponentStatus::Healthy => ComponentStatusResponse {
                status: "healthy".to_string(),
                message: None,
            },
            ComponentStatus::Degraded(msg) => ComponentStatusResponse {
                status: "degraded".to_string(),
                message: Some(msg.clone()),
            },
            ComponentStatus::Unhealthy(msg) => ComponentStatusResponse {
                status: "unhealthy".to_string(),
                message: Some(msg.clone()),
            },
            ComponentStatus::Unknown => ComponentStatusResponse {
                status: "unknown".to_string(),
                message: None,
            },
        }
    }
}

/// Start the HTTP server for health and metrics.
pub async fn start_server(
    state: Arc<ServerState>,
    health_port: u16,
    metrics_port: u16,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    // Start health server
    let health_state = Arc::clone(&state);
    let health_addr = SocketAddr::from(([0, 0, 0, 0], health_port));
    let health_router = Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(healthz_handler))
        .route("/readyz", get(readyz_handler))
        .with_state(health_state);

    let health_listener = match tokio::net::TcpListener::bind(health_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(error = %e, port = health_port, "Failed to bind health server");
            return;
        }
    };

    info!(port = health_port, "Health server started");

    // Start metrics server
    let metrics_state = Arc::clone(&state);
    let metrics_addr = SocketAddr::from(([0, 0, 0, 0], metrics_port));
    let metrics_router = Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(metrics_state);

    let metrics_listener = match tokio::net::TcpListener::bind(metrics_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(error = %e, port = metrics_port, "Failed to bind metrics server");
            return;
        }
    };

    info!(port = metrics_port, "Metrics server started");

    let health_server = async {
        axum::serve(health_listener, health_router)
            .await
            .map_err(|e| error!(error = %e, "Health server error"))
    };

    let metrics_server = async {
        axum::serve(metrics_listener, metrics_router)
            .await
            .map_err(|e| error!(error = %e, "Metrics server error"))
    };

    tokio::select! {
        _ = health_server => {}
        _ = metrics_server => {}
        _ = shutdown_rx.recv() => {
            info!("HTTP servers shutting down");
        }
    }
}

/// Health endpoint handler.
async fn health_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    let overall = state.health.overall();
    let statuses = state.health.components();

    let components: std::collections::HashMap<String, ComponentStatusResponse> = statuses
        .iter()
        .map(|(k, v)| (k.clone(), ComponentStatusResponse::from(v)))
        .collect();

    let status_str = match overall {
        HealthStatus::Healthy => "healthy",
        HealthStatus::Degraded => "degraded",
        HealthStatus::Unhealthy => "unhealthy",
    };

    let response = HealthResponse {
        status: status_str.to_string(),
        uptime_seconds: state.health.uptime_seconds(),
        components,
    };

    let status_code = match overall {
        HealthStatus::Healthy => StatusCode::OK,
        HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(response))
}

/// Kubernetes liveness probe handler.
async fn healthz_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    if state.health.overall() != HealthStatus::Unhealthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// Kubernetes readiness probe handler.
async fn readyz_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    if state.health.is_operational() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// Prometheus metrics endpoint handler.
async fn metrics_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    let metrics = &state.metrics;
    let histogram = metrics.write_duration_histogram();

    // Format metrics in Prometheus text format
    let mut output = String::with_capacity(4096);

    let counters: [(&str, &str, u64); 12] = [
        (
            "k2w_messages_consumed_total",
            "Total messages consumed from Kafka",
            metrics.messages_total(),
        ),
        (
            "k2w_invalid_messages_total",
            "Total payloads rejected by the decoder",
            metrics.invalid_messages_total(),
        ),
        (
            "k2w_events_decoded_total",
            "Total events decoded successfully",
            metrics.events_decoded_total(),
        ),
        (
            "k2w_routed_order_total",
            "Events routed to the order lane",
            metrics.routed_order_total(),
        ),
        (
            "k2w_routed_inventory_total",
            "Events routed to the inventory lane",
            metrics.routed_inventory_total(),
        ),
        (
            "k2w_routed_user_activity_total",
            "Events routed to the user activity lane",
            metrics.routed_user_activity_total(),
        ),
        (
            "k2w_object_writes_total",
            "Total object store writes",
            metrics.object_writes_total(),
        ),
        (
            "k2w_object_write_errors_total",
            "Total failed object store writes",
            metrics.object_write_errors_total(),
        ),
        (
            "k2w_warehouse_rows_total",
            "Total rows appended to warehouse tables",
            metrics.warehouse_rows_total(),
        ),
        (
            "k2w_warehouse_write_errors_total",
            "Total failed warehouse appends",
            metrics.warehouse_write_errors_total(),
        ),
        (
            "k2w_schema_violations_total",
            "Total rows rejected by schema validation",
            metrics.schema_violations_total(),
        ),
        (
            "k2w_offset_commits_total",
            "Total offset commit batches",
            metrics.offset_commits_total(),
        ),
    ];

    for (name, help, value) in counters {
        output.push_str(&format!("# HELP {} {}\n", name, help));
        output.push_str(&format!("# TYPE {} counter\n", name));
        output.push_str(&format!("{} {}\n\n", name, value));
    }

    output.push_str("# HELP k2w_in_flight_messages Messages currently being processed\n");
    output.push_str("# TYPE k2w_in_flight_messages gauge\n");
    output.push_str(&format!("k2w_in_flight_messages {}\n\n", metrics.in_flight()));

    output.push_str("# HELP k2w_write_duration_seconds Time spent in sink writes\n");
    output.push_str("# TYPE k2w_write_duration_seconds histogram\n");

    for (le, count) in &histogram.buckets {
        output.push_str(&format!(
            "k2w_write_duration_seconds_bucket{{le=\"{}\"}} {}\n",
            le, count
        ));
    }
    output.push_str(&format!(
        "k2w_write_duration_seconds_bucket{{le=\"+Inf\"}} {}\n",
        histogram.inf_bucket
    ));
    output.push_str(&format!(
        "k2w_write_duration_seconds_sum {}\n",
        histogram.sum_seconds
    ));
    output.push_str(&format!(
        "k2w_write_duration_seconds_count {}\n",
        histogram.count
    ));

    (
        StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        output,
    )
}
