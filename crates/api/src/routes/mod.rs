//! API route handlers

mod alerts;
mod allocations;
mod annual_budgets;
mod audit;
mod budget_lines;
mod cache_admin;
mod comments;
mod contracts;
mod invitations;
mod invoices;
mod organizations;
mod poles;
mod reference;
mod reports;
mod services;
mod sessions;
mod users;
mod yearly_budgets;

use crate::error::ApiError;
use crate::extract::AuthContext;
use crate::{AppState, SharedState};
use axum::routing::{delete, get, patch, post, put};
use axum::Router;
use data_validator::{Normalize, Validate, Validator};
use metrics::counter;
use serde::{Deserialize, Deserializer};
use storage::{AuditAction, Scoped};
use tracing::error;
use uuid::Uuid;

/// Routes mounted under `/api/v1`
pub fn router() -> Router<SharedState> {
    Router::new()
        // Sessions & tenancy
        .route("/sessions", post(sessions::create).delete(sessions::destroy))
        .route("/organizations", get(organizations::list).post(organizations::create))
        .route(
            "/organizations/current",
            get(organizations::current)
                .put(organizations::update)
                .patch(organizations::update),
        )
        .route("/users", get(users::list))
        .route(
            "/users/:id",
            get(users::get).patch(users::update_role).delete(users::remove),
        )
        .route("/invitations", get(invitations::list).post(invitations::create))
        .route("/invitations/:id", delete(invitations::revoke))
        .route("/invitations/:id/accept", post(invitations::accept))
        // Organizational structure
        .route("/services", get(services::list).post(services::create))
        .route(
            "/services/:id",
            get(services::get).put(services::update).delete(services::remove),
        )
        .route("/poles", get(poles::list).post(poles::create))
        .route(
            "/poles/:id",
            get(poles::get).put(poles::update).delete(poles::remove),
        )
        .route(
            "/budget-domains",
            get(reference::list_domains).post(reference::create_domain),
        )
        .route("/budget-domains/:id", delete(reference::delete_domain))
        .route(
            "/budget-types",
            get(reference::list_types).post(reference::create_type),
        )
        .route("/budget-types/:id", delete(reference::delete_type))
        // Budget data
        .route("/budget-lines", get(budget_lines::list).post(budget_lines::create))
        .route(
            "/budget-lines/:id",
            get(budget_lines::get)
                .put(budget_lines::replace)
                .patch(budget_lines::patch)
                .delete(budget_lines::remove),
        )
        .route(
            "/budget-lines/:id/comments",
            get(comments::list).post(comments::create),
        )
        .route("/comments/:id", delete(comments::remove))
        .route(
            "/budget-lines/:id/allocations",
            get(allocations::list).post(allocations::create),
        )
        .route(
            "/allocations/:id",
            patch(allocations::update).delete(allocations::remove),
        )
        .route("/invoices", get(invoices::list).post(invoices::create))
        .route(
            "/invoices/:id",
            get(invoices::get)
                .put(invoices::replace)
                .patch(invoices::patch)
                .delete(invoices::remove),
        )
        .route("/contracts", get(contracts::list).post(contracts::create))
        .route(
            "/contracts/:id",
            get(contracts::get)
                .put(contracts::replace)
                .patch(contracts::patch)
                .delete(contracts::remove),
        )
        .route(
            "/yearly-budgets",
            get(yearly_budgets::list).post(yearly_budgets::create),
        )
        .route(
            "/yearly-budgets/:id",
            put(yearly_budgets::update).delete(yearly_budgets::remove),
        )
        .route(
            "/annual-budgets",
            get(annual_budgets::list).post(annual_budgets::upsert),
        )
        // Derived views
        .route("/alerts", get(alerts::get_alerts))
        .route("/reports/invoices/monthly", get(reports::monthly_invoices))
        .route("/audit-logs", get(audit::list))
        .route("/cache/clear", post(cache_admin::clear))
}

/// Deserializer for optional PATCH fields: an absent field gives `None`,
/// an explicit `null` gives `Some(None)` and clears the stored value.
pub(crate) fn nullable<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Normalize then validate a request body
pub(crate) fn checked<T: Normalize + Validate>(validator: &Validator, body: T) -> Result<T, ApiError> {
    let body = body.normalize();
    body.validate(validator)?;
    Ok(body)
}

/// Append an audit entry for a write on `record`
pub(crate) fn audit<T: Scoped>(
    state: &AppState,
    ctx: &AuthContext,
    action: AuditAction,
    record: &T,
    summary: impl Into<String>,
) {
    audit_entity(
        state,
        ctx.organization_id,
        ctx.user.id,
        action,
        T::KIND,
        record.id(),
        summary,
    );
}

/// Append an audit entry for a write that is already stored.
///
/// A failure is logged and counted; the write itself stands.
pub(crate) fn audit_entity(
    state: &AppState,
    organization_id: Uuid,
    user_id: Uuid,
    action: AuditAction,
    entity: &str,
    entity_id: Uuid,
    summary: impl Into<String>,
) {
    if let Err(e) = state
        .repository
        .record_audit(organization_id, user_id, action, entity, entity_id, summary)
    {
        counter!("budget_audit_failures_total").increment(1);
        error!("Failed to audit {:?} of {} {}: {}", action, entity, entity_id, e);
    }
}
