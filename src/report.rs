// src/report.rs

//! Read-only summary of the invoice table, as the dashboard shows it.
//!
//! The action buckets here are keyword matches for display. They are not a
//! second classifier; `rules` is the only place status and action are
//! decided.

use crate::invoice_db::StoredInvoice;
use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use std::sync::LazyLock;

static CRITICAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)urgent|overdue|approval").expect("valid pattern"));
static SCHEDULED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)schedule|pay").expect("valid pattern"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionBucket {
    Critical,
    Scheduled,
    Other,
}

pub fn bucket_for(action: &str) -> ActionBucket {
    if CRITICAL.is_match(action) {
        ActionBucket::Critical
    } else if SCHEDULED.is_match(action) {
        ActionBucket::Scheduled
    } else {
        ActionBucket::Other
    }
}

#[derive(Debug, Default, PartialEq)]
pub struct Report {
    pub total_invoices: usize,
    pub total_amount: f64,
    pub average_amount: f64,
    /// Ascending by amount.
    pub amount_by_vendor: Vec<(String, f64)>,
    pub status_counts: BTreeMap<String, usize>,
    pub critical: usize,
    pub scheduled: usize,
    pub paid_count: usize,
    pub paid_amount: f64,
}

impl Report {
    pub fn build(rows: &[StoredInvoice]) -> Self {
        let mut report = Report {
            total_invoices: rows.len(),
            ..Default::default()
        };

        let mut by_vendor: HashMap<String, f64> = HashMap::new();
        for row in rows {
            report.total_amount += row.amount;

            let vendor = row.vendor.clone().unwrap_or_else(|| "Unknown".to_string());
            *by_vendor.entry(vendor).or_default() += row.amount;

            let status = row.status.clone().unwrap_or_else(|| "Unknown".to_string());
            *report.status_counts.entry(status).or_default() += 1;

            match bucket_for(&row.recommended_action) {
                ActionBucket::Critical => report.critical += 1,
                ActionBucket::Scheduled => report.scheduled += 1,
                ActionBucket::Other => {}
            }

            if row.status.as_deref() == Some("Paid") {
                report.paid_count += 1;
                report.paid_amount += row.amount;
            }
        }

        if !rows.is_empty() {
            report.average_amount = report.total_amount / rows.len() as f64;
        }

        let mut vendors: Vec<_> = by_vendor.into_iter().collect();
        vendors.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        report.amount_by_vendor = vendors;
        report
    }

    pub fn print(&self) {
        println!("\n--- Invoice Report ---");
        println!("Invoices processed : {}", self.total_invoices);
        println!("Total amount       : {:.2}", self.total_amount);
        println!("Average amount     : {:.2}", self.average_amount);

        println!("\nStatus distribution:");
        for (status, count) in &self.status_counts {
            println!("  {status:<16} {count}");
        }

        println!("\nAmount by vendor:");
        for (vendor, amount) in &self.amount_by_vendor {
            println!("  {vendor:<32} {amount:>12.2}");
        }

        println!("\nActions:");
        println!("  critical attention : {}", self.critical);
        println!("  scheduled          : {}", self.scheduled);
        println!(
            "  completed          : {} ({:.2} paid)",
            self.paid_count, self.paid_amount
        );
        println!("--- End ---\n");
    }
}
