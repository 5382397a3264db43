//! Probes and Prometheus metrics.
//!
//! Serves `/healthz` (process alive), `/readyz` (startup reconciliation
//! done) and `/metrics` (text exposition format).

use crate::error::ControllerError;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use prometheus::{IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tower_http::trace::TraceLayer;
use tracing::info;

/// Controller metrics, registered in a private registry.
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub accepted_offers: IntGauge,
    pub free_subnets: IntGauge,
    pub used_subnets: IntGauge,
    /// Reconciles by result ("success" or "error")
    pub reconciliations: IntCounterVec,
    pub config_changes: IntCounter,
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics")
            .field("accepted_offers", &self.accepted_offers.get())
            .field("free_subnets", &self.free_subnets.get())
            .field("used_subnets", &self.used_subnets.get())
            .finish_non_exhaustive()
    }
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("peering".to_string()), None)?;

        let accepted_offers = IntGauge::new("accepted_offers", "ResourceOffers currently accepted")?;
        let free_subnets = IntGauge::new("free_subnets", "Subnet pool blocks available for remapping")?;
        let used_subnets = IntGauge::new("used_subnets", "Subnets reserved locally or assigned to peers")?;
        let reconciliations = IntCounterVec::new(
            Opts::new("reconciliations_total", "ResourceOffer reconciles by result"),
            &["result"],
        )?;
        let config_changes = IntCounter::new("config_changes_total", "ClusterConfig snapshots applied")?;

        registry.register(Box::new(accepted_offers.clone()))?;
        registry.register(Box::new(free_subnets.clone()))?;
        registry.register(Box::new(used_subnets.clone()))?;
        registry.register(Box::new(reconciliations.clone()))?;
        registry.register(Box::new(config_changes.clone()))?;

        Ok(Self {
            registry,
            accepted_offers,
            free_subnets,
            used_subnets,
            reconciliations,
            config_changes,
        })
    }

    pub fn set_pool_counts(&self, free: usize, used: usize) {
        self.free_subnets.set(i64::try_from(free).unwrap_or(i64::MAX));
        self.used_subnets.set(i64::try_from(used).unwrap_or(i64::MAX));
    }

    pub fn set_accepted_offers(&self, accepted: usize) {
        self.accepted_offers.set(i64::try_from(accepted).unwrap_or(i64::MAX));
    }

    pub fn record_reconcile(&self, success: bool) {
        let result = if success { "success" } else { "error" };
        self.reconciliations.with_label_values(&[result]).inc();
    }

    /// Text exposition of every registered metric.
    pub fn render(&self) -> Result<String, prometheus::Error> {
        TextEncoder::new().encode_to_string(&self.registry.gather())
    }
}

/// Shared state of the probes/metrics server.
#[derive(Debug, Clone)]
pub struct ServerState {
    pub metrics: Arc<Metrics>,
    pub ready: Arc<AtomicBool>,
}

impl ServerState {
    pub fn new(metrics: Arc<Metrics>) -> Self {
        Self {
            metrics,
            ready: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn set_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
    }
}

pub fn router(state: ServerState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serves probes and metrics on `addr` until the listener fails.
pub async fn serve(addr: SocketAddr, state: ServerState) -> Result<(), ControllerError> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Probes and metrics listening on {}", addr);
    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn healthz() -> &'static str {
    "ok"
}

async fn readyz(State(state): State<ServerState>) -> (StatusCode, &'static str) {
    if state.ready.load(Ordering::SeqCst) {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "starting")
    }
}

async fn metrics(State(state): State<ServerState>) -> Response {
    match state.metrics.render() {
        Ok(body) => ([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}
