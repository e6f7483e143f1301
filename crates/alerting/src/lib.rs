//! Alerting and Reporting
//!
//! Derives alerts from an organization's records (expiring contracts,
//! overdue invoices, overspent budget lines) and computes the invoice and
//! annual budget reports.

mod aggregator;
pub mod reporting;
mod source;

pub use aggregator::{Alert, AlertAggregator, AlertConfig, AlertKind, AlertSeverity};
pub use reporting::{AnnualSummary, MonthlyTotal};
pub use source::AlertSource;

use thiserror::Error;

/// Alerting errors
#[derive(Debug, Error)]
pub enum AlertError {
    /// A read needed for the aggregation failed; no partial result is produced
    #[error("Alert source unavailable: {0}")]
    Source(#[from] storage::StorageError),
}
