//! Report Routes

use axum::{
    extract::{Query, State},
    Json,
};
use alerting::{reporting, MonthlyTotal};
use chrono::{Datelike, Utc};
use serde::{Deserialize, Serialize};
use storage::Invoice;

use crate::error::ApiError;
use crate::extract::AuthContext;
use crate::SharedState;

#[derive(Debug, Default, Deserialize)]
pub struct MonthlyQuery {
    pub year: Option<i32>,
}

#[derive(Debug, Serialize)]
pub struct MonthlyReport {
    pub year: i32,
    pub months: Vec<MonthlyTotal>,
    pub total: f64,
    pub count: usize,
}

/// Invoiced amounts per month of issue; defaults to the current year
pub async fn monthly_invoices(
    State(state): State<SharedState>,
    ctx: AuthContext,
    Query(query): Query<MonthlyQuery>,
) -> Result<Json<MonthlyReport>, ApiError> {
    let state = state.read().await;
    let year = query.year.unwrap_or_else(|| Utc::now().year());
    state
        .validator
        .validate_year("year", year)
        .map_err(data_validator::ValidationErrors::from)?;

    let invoices = state.repository.list::<Invoice>(ctx.organization_id)?;
    let months = reporting::monthly_invoice_totals(&invoices, year);

    Ok(Json(MonthlyReport {
        year,
        total: months.iter().map(|m| m.total).sum(),
        count: months.iter().map(|m| m.count).sum(),
        months,
    }))
}
