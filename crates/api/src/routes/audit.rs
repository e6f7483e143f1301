//! Audit log

use axum::{
    extract::{Query, State},
    Json,
};
use auth::Role;
use serde::Deserialize;
use storage::AuditEntry;

use crate::error::ApiError;
use crate::extract::AuthContext;
use crate::SharedState;

const DEFAULT_LIMIT: usize = 100;
const MAX_LIMIT: usize = 500;

#[derive(Debug, Default, Deserialize)]
pub struct AuditQuery {
    pub limit: Option<usize>,
}

/// Newest entries first
pub async fn list(
    State(state): State<SharedState>,
    ctx: AuthContext,
    Query(query): Query<AuditQuery>,
) -> Result<Json<Vec<AuditEntry>>, ApiError> {
    ctx.require(Role::Admin)?;
    let state = state.read().await;
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT);
    Ok(Json(state.repository.audit_entries(ctx.organization_id, limit)?))
}
