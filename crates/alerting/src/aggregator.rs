//! Alert Aggregator Implementation

use crate::{AlertError, AlertSource};
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use storage::{BudgetLineTotals, Contract, Invoice, InvoiceStatus};
use tracing::{debug, info};
use uuid::Uuid;

/// Alert configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    /// Contracts ending within this many days raise a warning (default: 30)
    pub expiry_window_days: i64,
    /// Maximum alerts per category (default: 5)
    pub max_per_category: usize,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            expiry_window_days: 30,
            max_per_category: 5,
        }
    }
}

/// Record category an alert was derived from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertKind {
    Contract,
    Invoice,
    Budget,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::Contract => "contract",
            AlertKind::Invoice => "invoice",
            AlertKind::Budget => "budget",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Warning,
    Error,
}

/// A derived, never persisted alert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: AlertKind,
    pub severity: AlertSeverity,
    pub title: String,
    pub message: String,
    pub date: DateTime<Utc>,
}

impl Alert {
    fn new(
        kind: AlertKind,
        record_id: Uuid,
        severity: AlertSeverity,
        title: &str,
        message: String,
        date: DateTime<Utc>,
    ) -> Self {
        Self {
            id: format!("{}-{}", kind.as_str(), record_id),
            kind,
            severity,
            title: title.to_string(),
            message,
            date,
        }
    }
}

/// Derives alerts from an organization's contracts, invoices and budget lines
#[derive(Debug, Clone, Default)]
pub struct AlertAggregator {
    config: AlertConfig,
}

impl AlertAggregator {
    /// Create a new aggregator
    pub fn new(config: AlertConfig) -> Self {
        info!("Creating alert aggregator with config: {:?}", config);
        Self { config }
    }

    pub fn config(&self) -> &AlertConfig {
        &self.config
    }

    /// Compute every alert of an organization.
    ///
    /// All three reads must succeed; the first failure aborts the whole
    /// aggregation.
    pub fn aggregate<S: AlertSource + ?Sized>(
        &self,
        source: &S,
        organization_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<Alert>, AlertError> {
        let contracts = source.contracts(organization_id)?;
        let invoices = source.invoices(organization_id)?;
        let totals = source.budget_line_totals(organization_id)?;

        let mut alerts = self.contract_alerts(&contracts, now.date_naive());
        alerts.extend(self.invoice_alerts(&invoices));
        alerts.extend(self.budget_alerts(&totals, now));

        debug!("Computed {} alert(s) for {}", alerts.len(), organization_id);
        Ok(alerts)
    }

    /// Contracts ending within `[today, today + window]`, soonest first
    pub fn contract_alerts(&self, contracts: &[Contract], today: NaiveDate) -> Vec<Alert> {
        let horizon = today + Duration::days(self.config.expiry_window_days);

        let mut expiring: Vec<&Contract> = contracts
            .iter()
            .filter(|c| c.end_date >= today && c.end_date <= horizon)
            .collect();
        expiring.sort_by(|a, b| a.end_date.cmp(&b.end_date).then_with(|| a.name.cmp(&b.name)));

        expiring
            .into_iter()
            .take(self.config.max_per_category)
            .map(|c| {
                let days = (c.end_date - today).num_days();
                Alert::new(
                    AlertKind::Contract,
                    c.id,
                    AlertSeverity::Warning,
                    "Contract expiring soon",
                    format!(
                        "Contract \"{}\" with {} ends on {} ({} day{} left)",
                        c.name,
                        c.supplier,
                        c.end_date,
                        days,
                        if days == 1 { "" } else { "s" }
                    ),
                    start_of_day(c.end_date),
                )
            })
            .collect()
    }

    /// Invoices marked late, earliest due date first.
    ///
    /// Classification only looks at the stored status, not at the dates.
    pub fn invoice_alerts(&self, invoices: &[Invoice]) -> Vec<Alert> {
        let mut late: Vec<&Invoice> = invoices
            .iter()
            .filter(|i| i.status == InvoiceStatus::Late)
            .collect();
        late.sort_by(|a, b| a.due_date.cmp(&b.due_date).then_with(|| a.number.cmp(&b.number)));

        late.into_iter()
            .take(self.config.max_per_category)
            .map(|i| {
                Alert::new(
                    AlertKind::Invoice,
                    i.id,
                    AlertSeverity::Error,
                    "Overdue invoice",
                    format!(
                        "Invoice {} from {} ({:.2}) was due on {}",
                        i.number, i.supplier, i.amount, i.due_date
                    ),
                    start_of_day(i.due_date),
                )
            })
            .collect()
    }

    /// Budget lines whose invoiced amount exceeds the budget, largest
    /// overspend first. Dated `now`.
    pub fn budget_alerts(&self, totals: &[BudgetLineTotals], now: DateTime<Utc>) -> Vec<Alert> {
        let mut overspent: Vec<&BudgetLineTotals> =
            totals.iter().filter(|t| t.is_overspent()).collect();
        overspent.sort_by(|a, b| a.remaining().total_cmp(&b.remaining()));

        overspent
            .into_iter()
            .take(self.config.max_per_category)
            .map(|t| {
                Alert::new(
                    AlertKind::Budget,
                    t.budget_line_id,
                    AlertSeverity::Error,
                    "Budget line overspent",
                    format!(
                        "\"{}\" ({}): invoiced {:.2} exceeds budget {:.2} by {:.2}",
                        t.name,
                        t.year,
                        t.invoiced_amount,
                        t.budget_amount,
                        -t.remaining()
                    ),
                    now,
                )
            })
            .collect()
    }
}

fn start_of_day(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use storage::StorageError;

    #[derive(Default)]
    struct Fixture {
        contracts: Vec<Contract>,
        invoices: Vec<Invoice>,
        totals: Vec<BudgetLineTotals>,
        failing: bool,
    }

    impl AlertSource for Fixture {
        fn contracts(&self, _: Uuid) -> Result<Vec<Contract>, AlertError> {
            Ok(self.contracts.clone())
        }

        fn invoices(&self, _: Uuid) -> Result<Vec<Invoice>, AlertError> {
            if self.failing {
                return Err(StorageError::DatabaseError("connection reset".to_string()).into());
            }
            Ok(self.invoices.clone())
        }

        fn budget_line_totals(&self, _: Uuid) -> Result<Vec<BudgetLineTotals>, AlertError> {
            Ok(self.totals.clone())
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 19, 9, 30, 0).unwrap()
    }

    fn today() -> NaiveDate {
        now().date_naive()
    }

    fn contract(end_in_days: i64) -> Contract {
        Contract {
            id: Uuid::new_v4(),
            organization_id: Uuid::nil(),
            budget_line_id: None,
            name: format!("Maintenance +{}", end_in_days),
            supplier: "ACME".to_string(),
            amount: 12_000.0,
            start_date: today() - Duration::days(365),
            end_date: today() + Duration::days(end_in_days),
            created_at: now(),
        }
    }

    fn invoice(due_in_days: i64, status: InvoiceStatus) -> Invoice {
        Invoice {
            id: Uuid::new_v4(),
            organization_id: Uuid::nil(),
            budget_line_id: Uuid::new_v4(),
            contract_id: None,
            number: format!("F-{}", due_in_days),
            supplier: "ACME".to_string(),
            amount: 480.0,
            issue_date: today() - Duration::days(60),
            due_date: today() + Duration::days(due_in_days),
            status,
            created_at: now(),
        }
    }

    fn totals(budget: f64, invoiced: f64) -> BudgetLineTotals {
        BudgetLineTotals {
            budget_line_id: Uuid::new_v4(),
            name: "Licences".to_string(),
            year: 2026,
            budget_amount: budget,
            invoiced_amount: invoiced,
        }
    }

    #[test]
    fn test_no_qualifying_records_means_no_alerts() {
        let fixture = Fixture {
            contracts: vec![contract(-1), contract(31), contract(400)],
            invoices: vec![
                invoice(-20, InvoiceStatus::Pending),
                invoice(-3, InvoiceStatus::Paid),
            ],
            totals: vec![totals(100.0, 100.0), totals(100.0, 20.0)],
            ..Default::default()
        };

        let alerts = AlertAggregator::default()
            .aggregate(&fixture, Uuid::nil(), now())
            .unwrap();
        assert!(alerts.is_empty());
    }

    #[test]
    fn test_one_alert_per_category() {
        let fixture = Fixture {
            contracts: vec![contract(10)],
            invoices: vec![invoice(-5, InvoiceStatus::Late)],
            totals: vec![totals(1_000.0, 1_250.0)],
            ..Default::default()
        };

        let alerts = AlertAggregator::default()
            .aggregate(&fixture, Uuid::nil(), now())
            .unwrap();

        assert_eq!(alerts.len(), 3);
        let kinds: Vec<_> = alerts.iter().map(|a| (a.kind, a.severity)).collect();
        assert_eq!(
            kinds,
            vec![
                (AlertKind::Contract, AlertSeverity::Warning),
                (AlertKind::Invoice, AlertSeverity::Error),
                (AlertKind::Budget, AlertSeverity::Error),
            ]
        );
        assert_eq!(alerts[2].date, now());
        assert!(alerts[0].id.starts_with("contract-"));
    }

    #[test]
    fn test_contract_window_is_inclusive() {
        let aggregator = AlertAggregator::default();
        let alerts = aggregator.contract_alerts(&[contract(0), contract(30)], today());
        assert_eq!(alerts.len(), 2);
    }

    #[test]
    fn test_contracts_sorted_soonest_first() {
        let aggregator = AlertAggregator::default();
        let contracts = vec![contract(20), contract(3), contract(12)];
        let alerts = aggregator.contract_alerts(&contracts, today());

        let dates: Vec<_> = alerts.iter().map(|a| a.date).collect();
        let mut sorted = dates.clone();
        sorted.sort();
        assert_eq!(dates, sorted);
        assert!(alerts[0].message.contains("3 days left"));
    }

    #[test]
    fn test_late_status_alone_decides_overdue() {
        let aggregator = AlertAggregator::default();
        // Due in the future but marked late; overdue by date but still pending.
        let invoices = vec![
            invoice(15, InvoiceStatus::Late),
            invoice(-30, InvoiceStatus::Pending),
        ];
        let alerts = aggregator.invoice_alerts(&invoices);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].id, format!("invoice-{}", invoices[0].id));
    }

    #[test]
    fn test_budget_alerts_largest_overspend_first() {
        let aggregator = AlertAggregator::default();
        let small = totals(100.0, 110.0);
        let large = totals(100.0, 400.0);
        let alerts = aggregator.budget_alerts(&[small, large.clone()], now());
        assert_eq!(alerts[0].id, format!("budget-{}", large.budget_line_id));
    }

    #[test]
    fn test_read_failure_aborts_aggregation() {
        let fixture = Fixture {
            contracts: vec![contract(1)],
            failing: true,
            ..Default::default()
        };
        let result = AlertAggregator::default().aggregate(&fixture, Uuid::nil(), now());
        assert!(matches!(result, Err(AlertError::Source(_))));
    }

    #[test]
    fn test_wire_format() {
        let alert = AlertAggregator::default()
            .invoice_alerts(&[invoice(-1, InvoiceStatus::Late)])
            .remove(0);
        let json = serde_json::to_value(&alert).unwrap();
        assert_eq!(json["type"], "invoice");
        assert_eq!(json["severity"], "error");
    }

    proptest! {
        #[test]
        fn prop_categories_are_capped(
            contract_days in proptest::collection::vec(0i64..=30, 0..40),
            late_invoices in 0usize..40,
            overspent_lines in 0usize..40,
        ) {
            let fixture = Fixture {
                contracts: contract_days.iter().map(|d| contract(*d)).collect(),
                invoices: (0..late_invoices).map(|i| invoice(-(i as i64), InvoiceStatus::Late)).collect(),
                totals: (0..overspent_lines).map(|i| totals(10.0, 11.0 + i as f64)).collect(),
                ..Default::default()
            };

            let alerts = AlertAggregator::default()
                .aggregate(&fixture, Uuid::nil(), now())
                .unwrap();

            for kind in [AlertKind::Contract, AlertKind::Invoice, AlertKind::Budget] {
                prop_assert!(alerts.iter().filter(|a| a.kind == kind).count() <= 5);
            }
            prop_assert_eq!(
                alerts.iter().filter(|a| a.kind == AlertKind::Contract).count(),
                contract_days.len().min(5)
            );
        }
    }
}
