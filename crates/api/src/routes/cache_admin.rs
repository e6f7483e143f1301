//! Reference cache administration

use axum::{
    extract::{Query, State},
    http::HeaderMap,
    Json,
};
use auth::{AuthError, Role};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::ApiError;
use crate::extract::{presents_key, AuthContext, OPERATOR_KEY_HEADER};
use crate::SharedState;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClearScope {
    /// The caller's organization
    #[default]
    Organization,
    /// Every organization; admin holding the operator key only
    All,
}

#[derive(Debug, Default, Deserialize)]
pub struct ClearQuery {
    #[serde(default)]
    pub scope: ClearScope,
}

#[derive(Debug, Serialize)]
pub struct ClearResponse {
    pub scope: ClearScope,
    pub cleared: usize,
}

pub async fn clear(
    State(state): State<SharedState>,
    ctx: AuthContext,
    headers: HeaderMap,
    Query(query): Query<ClearQuery>,
) -> Result<Json<ClearResponse>, ApiError> {
    let cleared = match query.scope {
        ClearScope::Organization => {
            ctx.require(Role::Manager)?;
            state.read().await.cache.invalidate_organization(ctx.organization_id)
        }
        ClearScope::All => {
            ctx.require(Role::Admin)?;
            let state = state.read().await;
            if !presents_key(&headers, OPERATOR_KEY_HEADER, state.operator_key.as_ref()) {
                return Err(AuthError::NotOperator.into());
            }
            state.cache.clear_all()
        }
    };

    info!("User {} cleared {} cache entries ({:?})", ctx.user.id, cleared, query.scope);
    Ok(Json(ClearResponse {
        scope: query.scope,
        cleared,
    }))
}
