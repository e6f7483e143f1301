//! Domain Records

use auth::Role;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A record owned by exactly one organization
pub trait Scoped: Clone + Send + 'static {
    /// Entity name used in errors and audit entries
    const KIND: &'static str;

    fn id(&self) -> Uuid;
    fn organization_id(&self) -> Uuid;
}

macro_rules! scoped {
    ($($ty:ty => $kind:literal),* $(,)?) => {
        $(
            impl Scoped for $ty {
                const KIND: &'static str = $kind;

                fn id(&self) -> Uuid {
                    self.id
                }

                fn organization_id(&self) -> Uuid {
                    self.organization_id
                }
            }
        )*
    };
}

/// Tenant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Organization {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// Application user, shared across organizations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// Link between a user and an organization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Membership {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub user_id: Uuid,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

/// Pending or accepted invitation to join an organization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invitation {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub email: String,
    pub role: Role,
    #[serde(skip_serializing)]
    pub token: String,
    pub invited_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub accepted_at: Option<DateTime<Utc>>,
}

impl Invitation {
    pub fn is_pending(&self) -> bool {
        self.accepted_at.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Service {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub name: String,
    pub code: String,
}

/// Sub-unit of a service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pole {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub service_id: Uuid,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetDomain {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetType {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub name: String,
}

/// Operating vs. capital expenditure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExpenseKind {
    Fonctionnement,
    Investissement,
}

/// A tracked expenditure category
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetLine {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub year: i32,
    pub kind: ExpenseKind,
    pub service_id: Option<Uuid>,
    pub domain_id: Option<Uuid>,
    pub type_id: Option<Uuid>,
    pub budget_amount: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Budget vs. invoiced amounts of one budget line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetLineTotals {
    pub budget_line_id: Uuid,
    pub name: String,
    pub year: i32,
    pub budget_amount: f64,
    pub invoiced_amount: f64,
}

impl BudgetLineTotals {
    pub fn remaining(&self) -> f64 {
        self.budget_amount - self.invoiced_amount
    }

    pub fn is_overspent(&self) -> bool {
        self.invoiced_amount > self.budget_amount
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub budget_line_id: Uuid,
    pub author_id: Uuid,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

/// Share of a budget line assigned to a pole
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoleAllocation {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub budget_line_id: Uuid,
    pub pole_id: Uuid,
    pub amount: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvoiceStatus {
    Pending,
    Paid,
    /// Marked overdue by a manager
    Late,
    Cancelled,
}

impl InvoiceStatus {
    /// Whether the invoice counts towards its budget line
    pub fn is_billable(self) -> bool {
        self != InvoiceStatus::Cancelled
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub budget_line_id: Uuid,
    pub contract_id: Option<Uuid>,
    pub number: String,
    pub supplier: String,
    pub amount: f64,
    pub issue_date: NaiveDate,
    pub due_date: NaiveDate,
    pub status: InvoiceStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contract {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub budget_line_id: Option<Uuid>,
    pub name: String,
    pub supplier: String,
    pub amount: f64,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub created_at: DateTime<Utc>,
}

/// Planned amount of a budget line for one year
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct YearlyBudget {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub budget_line_id: Uuid,
    pub year: i32,
    pub amount: f64,
}

/// Organization-wide envelope for one year
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnualBudget {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub year: i32,
    pub fonctionnement: f64,
    pub investissement: f64,
    pub updated_at: DateTime<Utc>,
}

impl AnnualBudget {
    pub fn total(&self) -> f64 {
        self.fonctionnement + self.investissement
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditAction {
    Create,
    Update,
    Delete,
}

/// One write performed through the API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub user_id: Uuid,
    pub action: AuditAction,
    pub entity: String,
    pub entity_id: Uuid,
    pub summary: String,
    pub at: DateTime<Utc>,
}

scoped! {
    Membership => "membership",
    Invitation => "invitation",
    Service => "service",
    Pole => "pole",
    BudgetDomain => "budget_domain",
    BudgetType => "budget_type",
    BudgetLine => "budget_line",
    Comment => "comment",
    PoleAllocation => "pole_allocation",
    Invoice => "invoice",
    Contract => "contract",
    YearlyBudget => "yearly_budget",
    AnnualBudget => "annual_budget",
    AuditEntry => "audit_entry",
}
