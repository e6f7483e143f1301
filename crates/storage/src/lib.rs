//! Storage Layer
//!
//! Organization-scoped persistence with repository pattern. Every scoped
//! record is only visible to callers of its own organization.

mod models;
mod repository;

pub use models::{
    AnnualBudget, AuditAction, AuditEntry, BudgetDomain, BudgetLine, BudgetLineTotals,
    BudgetType, Comment, Contract, ExpenseKind, Invitation, Invoice, InvoiceStatus, Membership,
    Organization, Pole, PoleAllocation, Scoped, Service, User, YearlyBudget,
};
pub use repository::{HasTable, Repository};

use thiserror::Error;
use uuid::Uuid;

/// Storage errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: Uuid },

    /// A uniqueness or integrity rule would be broken
    #[error("{field}: {message}")]
    Conflict { field: &'static str, message: String },

    /// A field references a record that does not exist in the organization
    #[error("{field}: unknown {kind} {id}")]
    InvalidReference {
        field: &'static str,
        kind: &'static str,
        id: Uuid,
    },
}

impl StorageError {
    pub fn conflict(field: &'static str, message: impl Into<String>) -> Self {
        StorageError::Conflict {
            field,
            message: message.into(),
        }
    }
}
