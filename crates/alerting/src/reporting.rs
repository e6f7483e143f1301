//! Invoice and budget reports

use chrono::Datelike;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use storage::{AnnualBudget, BudgetLine, ExpenseKind, Invoice};

/// Invoiced amount of one calendar month
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthlyTotal {
    /// 1 = January
    pub month: u32,
    pub total: f64,
    pub count: usize,
}

/// Sum invoices per month of issue for `year`.
///
/// Always returns twelve entries; cancelled invoices are ignored.
pub fn monthly_invoice_totals(invoices: &[Invoice], year: i32) -> Vec<MonthlyTotal> {
    let mut months: Vec<MonthlyTotal> = (1..=12)
        .map(|month| MonthlyTotal {
            month,
            total: 0.0,
            count: 0,
        })
        .collect();

    for invoice in invoices
        .iter()
        .filter(|i| i.status.is_billable() && i.issue_date.year() == year)
    {
        let slot = &mut months[invoice.issue_date.month0() as usize];
        slot.total += invoice.amount;
        slot.count += 1;
    }

    months
}

/// Annual envelope next to what the year's budget lines plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnualSummary {
    pub year: i32,
    pub fonctionnement: f64,
    pub investissement: f64,
    pub total: f64,
    pub planned_fonctionnement: f64,
    pub planned_investissement: f64,
}

/// One summary per annual budget, ordered by year
pub fn annual_summaries(budgets: &[AnnualBudget], lines: &[BudgetLine]) -> Vec<AnnualSummary> {
    let mut planned: BTreeMap<(i32, bool), f64> = BTreeMap::new();
    for line in lines {
        let capital = line.kind == ExpenseKind::Investissement;
        *planned.entry((line.year, capital)).or_insert(0.0) += line.budget_amount;
    }

    let mut summaries: Vec<AnnualSummary> = budgets
        .iter()
        .map(|b| AnnualSummary {
            year: b.year,
            fonctionnement: b.fonctionnement,
            investissement: b.investissement,
            total: b.total(),
            planned_fonctionnement: planned.get(&(b.year, false)).copied().unwrap_or(0.0),
            planned_investissement: planned.get(&(b.year, true)).copied().unwrap_or(0.0),
        })
        .collect();
    summaries.sort_by_key(|s| s.year);
    summaries
}
