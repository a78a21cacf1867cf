use axum::{Json, extract::State, http::StatusCode};

use herald_core::error::AppError;
use herald_core::health::readiness;

use crate::domain::repository::OutboxStore;
use crate::domain::types::OutboxStats;
use crate::state::AppState;

/// `GET /readyz`: ready while the database answers.
pub async fn readyz(State(state): State<AppState>) -> StatusCode {
    let ready = match state.db.ping().await {
        Ok(()) => true,
        Err(err) => {
            tracing::warn!(error = %err, "database ping failed");
            false
        }
    };
    readiness(ready)
}

/// `GET /outbox/stats`: row count per status.
pub async fn outbox_stats(State(state): State<AppState>) -> Result<Json<OutboxStats>, AppError> {
    let stats = state.outbox_store().status_counts().await?;
    Ok(Json(stats))
}
