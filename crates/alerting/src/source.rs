//! Record reads needed by the aggregator

use crate::AlertError;
use storage::{BudgetLineTotals, Contract, Invoice, Repository};
use uuid::Uuid;

/// Read access to the records alerts are derived from
pub trait AlertSource {
    fn contracts(&self, organization_id: Uuid) -> Result<Vec<Contract>, AlertError>;
    fn invoices(&self, organization_id: Uuid) -> Result<Vec<Invoice>, AlertError>;
    fn budget_line_totals(&self, organization_id: Uuid) -> Result<Vec<BudgetLineTotals>, AlertError>;
}

impl AlertSource for Repository {
    fn contracts(&self, organization_id: Uuid) -> Result<Vec<Contract>, AlertError> {
        Ok(self.list::<Contract>(organization_id)?)
    }

    fn invoices(&self, organization_id: Uuid) -> Result<Vec<Invoice>, AlertError> {
        Ok(self.list::<Invoice>(organization_id)?)
    }

    fn budget_line_totals(&self, organization_id: Uuid) -> Result<Vec<BudgetLineTotals>, AlertError> {
        Ok(Repository::budget_line_totals(self, organization_id)?)
    }
}
