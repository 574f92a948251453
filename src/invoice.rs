// src/invoice.rs

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;
use time::Date;
use time::macros::format_description;

/// The fields the model is asked to return, nothing more.
///
/// Decoding is lenient: models routinely answer `"Amount": "1,200.00"` or
/// give line items as objects, and none of that should cost a retry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedFields {
    #[serde(rename = "Invoice_ID", default, deserialize_with = "lenient_string")]
    pub invoice_id: Option<String>,
    #[serde(rename = "Vendor", default, deserialize_with = "lenient_string")]
    pub vendor: Option<String>,
    /// Kept raw; coerced to a number by [`ExtractedFields::amount`].
    #[serde(rename = "Amount", default, deserialize_with = "lenient_amount")]
    pub amount: Option<Value>,
    #[serde(rename = "Issue_Date", default, deserialize_with = "lenient_string")]
    pub issue_date: Option<String>,
    #[serde(rename = "Due_Date", default, deserialize_with = "lenient_string")]
    pub due_date: Option<String>,
    #[serde(rename = "Items", default, deserialize_with = "lenient_items")]
    pub items: Vec<String>,
    #[serde(rename = "Store_Location", default, deserialize_with = "lenient_string")]
    pub location: Option<String>,
    /// `"Paid"` or `"Unpaid"` per the prompt, but never trusted blindly.
    #[serde(rename = "Payment_Status", default, deserialize_with = "lenient_string")]
    pub payment_status: Option<String>,
}

fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(value_to_text(Value::deserialize(deserializer)?))
}

/// serde_json refuses numbers beyond `f64` (`1e400`). The literal is fully
/// consumed before that error, so dropping it leaves the rest of the object
/// readable and the amount falls back to `0.0`.
fn lenient_amount<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Value::deserialize(deserializer)
        .ok()
        .filter(|v| !v.is_null()))
}

fn lenient_items<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Array(values) => values.into_iter().filter_map(value_to_text).collect(),
        other => value_to_text(other).into_iter().collect(),
    })
}

fn value_to_text(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}

impl ExtractedFields {
    /// Amount as a finite number. Anything unparseable becomes `0.0`.
    pub fn amount(&self) -> f64 {
        let parsed = match &self.amount {
            Some(Value::Number(n)) => n.as_f64(),
            Some(Value::String(s)) => s.trim().replace(',', "").parse::<f64>().ok(),
            _ => None,
        };
        parsed.filter(|v| v.is_finite()).unwrap_or(0.0)
    }

    pub fn issue_date(&self) -> Option<Date> {
        parse_iso_date(self.issue_date.as_deref()?)
    }

    pub fn due_date(&self) -> Option<Date> {
        parse_iso_date(self.due_date.as_deref()?)
    }

    /// Strict, case-insensitive `paid`. `"unpaid"` must not match.
    pub fn is_paid(&self) -> bool {
        self.payment_status
            .as_deref()
            .is_some_and(|s| s.trim().eq_ignore_ascii_case("paid"))
    }
}

/// Parse `YYYY-MM-DD`; anything else is treated as absent.
pub fn parse_iso_date(s: &str) -> Option<Date> {
    Date::parse(s.trim(), format_description!("[year]-[month]-[day]")).ok()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Status {
    Paid,
    Pending,
    Overdue,
    ReviewRequired,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Paid => "Paid",
            Status::Pending => "Pending",
            Status::Overdue => "Overdue",
            Status::ReviewRequired => "Review Required",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecommendedAction {
    Archive,
    ManagerApproval,
    ContactVendor,
    SchedulePayment,
    ManualReview,
}

impl RecommendedAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecommendedAction::Archive => "Archive",
            RecommendedAction::ManagerApproval => "Requires Manager Approval",
            RecommendedAction::ContactVendor => "Urgent: Contact Vendor & Pay",
            RecommendedAction::SchedulePayment => "Schedule for Payment",
            RecommendedAction::ManualReview => "Manual Review",
        }
    }
}

impl fmt::Display for RecommendedAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status and action always travel together.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub status: Status,
    pub action: RecommendedAction,
}

impl Classification {
    pub const fn new(status: Status, action: RecommendedAction) -> Self {
        Self { status, action }
    }
}

/// One classified invoice, ready to be appended to the store.
#[derive(Debug, Clone, PartialEq)]
pub struct InvoiceRecord {
    pub invoice_id: Option<String>,
    pub vendor: Option<String>,
    pub amount: f64,
    pub issue_date: Option<Date>,
    pub due_date: Option<Date>,
    pub items: Vec<String>,
    pub location: Option<String>,
    pub classification: Classification,
}

impl InvoiceRecord {
    pub fn new(fields: ExtractedFields, classification: Classification) -> Self {
        Self {
            amount: fields.amount(),
            issue_date: fields.issue_date(),
            due_date: fields.due_date(),
            invoice_id: fields.invoice_id,
            vendor: fields.vendor,
            items: fields.items,
            location: fields.location,
            classification,
        }
    }

    /// Items flattened to a single text column.
    pub fn items_text(&self) -> String {
        serde_json::to_string(&self.items).unwrap_or_default()
    }

    pub fn status(&self) -> Status {
        self.classification.status
    }

    pub fn action(&self) -> RecommendedAction {
        self.classification.action
    }
}
