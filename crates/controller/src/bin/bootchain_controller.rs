/*
 * 5D Labs Bootchain - Controller Service
 * Copyright (C) 2025 5D Labs
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published
 * by the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program. If not, see <https://www.gnu.org/licenses/>.
 */

//! Controller Service - Kubernetes Controller for `BootDependency` CRDs
//!
//! This service:
//! - Watches `BootDependency` resources and reports dependency readiness
//! - Serves the Deployment mutation and `BootDependency` validation webhooks
//! - Provides health, readiness and metrics endpoints

use anyhow::Context as _;
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use bootchain_controller::tasks::{
    config::{ControllerConfig, LogFormat},
    metrics::{MetricsCollector, MetricsSink},
    probe::Prober,
    run_task_controller,
    status::StatusAggregator,
    store::{KubeDependencyStore, KubeEventSink, KubeStatusSink},
    types::Context as TaskContext,
};
use bootchain_controller::webhook::{self, AdmissionState};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::{
    timeout::TimeoutLayer,
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{error, info, warn, Level};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_CONFIG_PATH: &str = "/config/config.yaml";

#[derive(Clone)]
struct AppState {
    metrics: Arc<MetricsCollector>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let controller_config = load_controller_config();
    init_tracing(controller_config.log_format);

    controller_config
        .validate()
        .context("invalid controller configuration")?;

    info!(
        "Starting 5D Labs Bootchain Controller v{}",
        env!("CARGO_PKG_VERSION")
    );

    let client = kube::Client::try_default()
        .await
        .context("failed to create Kubernetes client")?;
    info!("Connected to Kubernetes cluster");

    let controller_config = Arc::new(controller_config);
    let metrics = Arc::new(MetricsCollector::new());
    let prober = Prober::from_config(&controller_config)?;

    let task_context = Arc::new(TaskContext {
        config: controller_config.clone(),
        aggregator: StatusAggregator::new(prober),
        status: Arc::new(KubeStatusSink::new(client.clone())),
        events: Arc::new(KubeEventSink::new(client.clone())),
        metrics: metrics.clone() as Arc<dyn MetricsSink>,
    });

    // Start the controller in the background
    let controller_handle = {
        let client = client.clone();
        tokio::spawn(async move {
            if let Err(e) = run_task_controller(client, task_context).await {
                error!("Controller error: {}", e);
            }
        })
    };

    let admission = AdmissionState {
        store: Arc::new(KubeDependencyStore::new(client.clone())),
        images: Arc::new(controller_config.images.clone()),
    };

    // Build the HTTP router
    let app = Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/metrics", get(metrics_handler))
        .with_state(AppState { metrics })
        .merge(webhook::router(admission))
        .layer(
            ServiceBuilder::new()
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                        .on_request(DefaultOnRequest::new().level(Level::DEBUG))
                        .on_response(DefaultOnResponse::new().level(Level::INFO)),
                )
                .layer(TimeoutLayer::new(Duration::from_secs(10))),
        );

    let bind_address = &controller_config.server.bind_address;
    let listener = tokio::net::TcpListener::bind(bind_address)
        .await
        .with_context(|| format!("failed to bind {bind_address}"))?;
    info!("Controller HTTP server listening on {}", bind_address);

    // Run the server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    controller_handle.abort();
    info!("Controller service stopped");
    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,kube=warn".into());
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

fn load_controller_config() -> ControllerConfig {
    let override_path = std::env::var("BOOTCHAIN_CONFIG_PATH").ok();
    let config_path = override_path
        .as_deref()
        .filter(|path| Path::new(path).exists())
        .unwrap_or(DEFAULT_CONFIG_PATH);

    // Tracing is not initialised yet, so report on stderr
    match ControllerConfig::from_mounted_file(config_path) {
        Ok(cfg) => {
            eprintln!("Loaded controller configuration from {config_path}");
            cfg
        }
        Err(err) => {
            eprintln!("Failed to load configuration from {config_path}: {err}. Using defaults.");
            ControllerConfig::default()
        }
    }
}

async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "bootchain-controller",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn readiness_check() -> Json<Value> {
    Json(json!({
        "status": "ready",
        "service": "bootchain-controller",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.export_prometheus_metrics(),
    )
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown");
}
