//! Alert Routes

use axum::{extract::State, Json};
use alerting::Alert;
use chrono::Utc;
use tracing::debug;

use crate::error::ApiError;
use crate::extract::AuthContext;
use crate::SharedState;

/// Current alerts of the caller's organization, computed on every request
pub async fn get_alerts(
    State(state): State<SharedState>,
    ctx: AuthContext,
) -> Result<Json<Vec<Alert>>, ApiError> {
    let state = state.read().await;
    let alerts = state
        .alerts
        .aggregate(&state.repository, ctx.organization_id, Utc::now())?;

    metrics::counter!("budget_alerts_generated_total").increment(alerts.len() as u64);
    debug!("{} alerts for organization {}", alerts.len(), ctx.organization_id);

    Ok(Json(alerts))
}
