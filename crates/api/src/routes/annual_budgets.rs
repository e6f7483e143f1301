//! Organization-wide annual envelopes

use axum::{extract::State, http::StatusCode, Json};
use alerting::{reporting, AnnualSummary};
use auth::Role;
use data_validator::{Normalize, Validate, ValidationErrors, ValidationResult, Validator};
use serde::Deserialize;
use storage::{AnnualBudget, AuditAction, BudgetLine};

use super::{audit, checked};
use crate::error::ApiError;
use crate::extract::{AuthContext, Payload};
use crate::SharedState;

#[derive(Debug, Deserialize)]
pub struct AnnualBudgetRequest {
    pub year: i32,
    pub fonctionnement: f64,
    pub investissement: f64,
}

impl Normalize for AnnualBudgetRequest {
    fn normalize(self) -> Self {
        self
    }
}

impl Validate for AnnualBudgetRequest {
    fn validate(&self, validator: &Validator) -> Result<(), ValidationErrors> {
        let mut result = ValidationResult::new();
        result
            .check(validator.validate_year("year", self.year))
            .check(validator.validate_amount("fonctionnement", self.fonctionnement))
            .check(validator.validate_amount("investissement", self.investissement));
        result.into_result()
    }
}

/// Annual envelopes next to the amounts their budget lines plan
pub async fn list(
    State(state): State<SharedState>,
    ctx: AuthContext,
) -> Result<Json<Vec<AnnualSummary>>, ApiError> {
    let state = state.read().await;
    let budgets = state.repository.list::<AnnualBudget>(ctx.organization_id)?;
    let lines = state.repository.list::<BudgetLine>(ctx.organization_id)?;
    Ok(Json(reporting::annual_summaries(&budgets, &lines)))
}

/// Create or replace the envelope of one year
pub async fn upsert(
    State(state): State<SharedState>,
    ctx: AuthContext,
    Payload(body): Payload<AnnualBudgetRequest>,
) -> Result<(StatusCode, Json<AnnualBudget>), ApiError> {
    ctx.require(Role::Manager)?;
    let state = state.read().await;
    let body = checked(&state.validator, body)?;

    let (budget, created) = state.repository.upsert_annual_budget(
        ctx.organization_id,
        body.year,
        body.fonctionnement,
        body.investissement,
    )?;
    let (action, status) = if created {
        (AuditAction::Create, StatusCode::CREATED)
    } else {
        (AuditAction::Update, StatusCode::OK)
    };
    audit(
        &state,
        &ctx,
        action,
        &budget,
        format!("set {} envelope to {:.2}", budget.year, budget.total()),
    );

    Ok((status, Json(budget)))
}
