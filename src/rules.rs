// src/rules.rs

use crate::invoice::{Classification, ExtractedFields, RecommendedAction, Status};
use std::panic::{self, AssertUnwindSafe};
use time::{Date, OffsetDateTime};
use tracing::{debug, warn};

/// Invoices above this amount need a manager's sign-off.
pub const HIGH_VALUE_THRESHOLD: f64 = 5000.0;

const FALLBACK: Classification =
    Classification::new(Status::ReviewRequired, RecommendedAction::ManualReview);

/// Classify against today's date (local time, UTC when the local offset
/// cannot be determined).
///
/// Never fails: should a rule blow up, the invoice is sent to manual
/// review instead of taking the batch down with it.
pub fn evaluate(fields: &ExtractedFields) -> Classification {
    evaluate_with(fields, || {
        OffsetDateTime::now_local()
            .unwrap_or_else(|_| OffsetDateTime::now_utc())
            .date()
    })
}

/// [`evaluate`] with the clock supplied by the caller. A panic in either the
/// clock or the rules yields `Review Required` / `Manual Review`.
pub fn evaluate_with(fields: &ExtractedFields, today: impl FnOnce() -> Date) -> Classification {
    match panic::catch_unwind(AssertUnwindSafe(|| evaluate_on(fields, today()))) {
        Ok(result) => result,
        Err(_) => {
            warn!(invoice_id = ?fields.invoice_id, "Rule evaluation failed, flagging for review");
            FALLBACK
        }
    }
}

/// Classify against an explicit `today`. First matching rule wins:
///
/// 1. paid → `Paid` / Archive
/// 2. amount > 5000 → `Pending` / manager approval
/// 3. due date strictly before today → `Overdue` / contact vendor
/// 4. otherwise → `Pending` / schedule payment
///
/// The high-value check deliberately precedes the overdue check: a large
/// overdue invoice goes to a manager, not straight to payment.
pub fn evaluate_on(fields: &ExtractedFields, today: Date) -> Classification {
    let amount = fields.amount();
    let due_date = fields.due_date();

    let result = if fields.is_paid() {
        Classification::new(Status::Paid, RecommendedAction::Archive)
    } else if amount > HIGH_VALUE_THRESHOLD {
        Classification::new(Status::Pending, RecommendedAction::ManagerApproval)
    } else if due_date.is_some_and(|due| due < today) {
        Classification::new(Status::Overdue, RecommendedAction::ContactVendor)
    } else {
        Classification::new(Status::Pending, RecommendedAction::SchedulePayment)
    };

    debug!(
        amount,
        due_date = ?due_date,
        payment_status = ?fields.payment_status,
        status = %result.status,
        action = %result.action,
        "Business rules applied"
    );
    result
}
