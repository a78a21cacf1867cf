use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

use herald_core::health::{healthz, not_found};
use herald_core::middleware::{correlation_id_layer, propagate_correlation_id_layer};

use crate::handlers::ops::{outbox_stats, readyz};
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        // Health
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // Outbox
        .route("/outbox/stats", get(outbox_stats))
        .fallback(not_found)
        .with_state(state)
        .layer(propagate_correlation_id_layer())
        .layer(TraceLayer::new_for_http())
        .layer(correlation_id_layer())
}
