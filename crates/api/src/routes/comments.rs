//! Budget line comments

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use auth::Role;
use chrono::Utc;
use data_validator::{normalizer, Normalize, Validate, ValidationErrors, ValidationResult, Validator};
use serde::Deserialize;
use storage::{AuditAction, BudgetLine, Comment};
use uuid::Uuid;

use super::{audit, checked};
use crate::error::ApiError;
use crate::extract::{AuthContext, Payload};
use crate::SharedState;

#[derive(Debug, Deserialize)]
pub struct CommentRequest {
    pub body: String,
}

impl Normalize for CommentRequest {
    fn normalize(self) -> Self {
        Self {
            body: normalizer::text(&self.body),
        }
    }
}

impl Validate for CommentRequest {
    fn validate(&self, validator: &Validator) -> Result<(), ValidationErrors> {
        let mut result = ValidationResult::new();
        result.check(validator.validate_comment("body", &self.body));
        result.into_result()
    }
}

pub async fn list(
    State(state): State<SharedState>,
    ctx: AuthContext,
    Path(line_id): Path<Uuid>,
) -> Result<Json<Vec<Comment>>, ApiError> {
    let state = state.read().await;
    state.repository.get::<BudgetLine>(ctx.organization_id, line_id)?;

    let comments = state.repository.find(ctx.organization_id, |c: &Comment| {
        c.budget_line_id == line_id
    })?;
    Ok(Json(comments))
}

/// Any member may comment
pub async fn create(
    State(state): State<SharedState>,
    ctx: AuthContext,
    Path(line_id): Path<Uuid>,
    Payload(body): Payload<CommentRequest>,
) -> Result<(StatusCode, Json<Comment>), ApiError> {
    let state = state.read().await;
    let line = state.repository.get::<BudgetLine>(ctx.organization_id, line_id)?;
    let body = checked(&state.validator, body)?;

    let comment = state.repository.insert(Comment {
        id: Uuid::new_v4(),
        organization_id: ctx.organization_id,
        budget_line_id: line.id,
        author_id: ctx.user.id,
        body: body.body,
        created_at: Utc::now(),
    })?;
    audit(&state, &ctx, AuditAction::Create, &comment, format!("commented on {}", line.name));

    Ok((StatusCode::CREATED, Json(comment)))
}

/// Authors may delete their own comments; admins may delete any
pub async fn remove(
    State(state): State<SharedState>,
    ctx: AuthContext,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let state = state.read().await;

    let comment = state.repository.get::<Comment>(ctx.organization_id, id)?;
    if comment.author_id != ctx.user.id {
        ctx.require(Role::Admin)?;
    }

    state.repository.delete::<Comment>(ctx.organization_id, id)?;
    audit(&state, &ctx, AuditAction::Delete, &comment, "deleted comment");

    Ok(StatusCode::NO_CONTENT)
}
