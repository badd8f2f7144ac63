//! Transaction lifecycle reconciliation.
//!
//! Every asynchronous outcome signal (STK callback or status-query result)
//! funnels through [`reconcile`], which enforces the legal transitions:
//!
//! ```text
//! Pending ──result "0" + settlement metadata──▶ Completed (terminal)
//! Pending ──any other result code────────────▶ Failed    (terminal)
//! ```
//!
//! Terminal records are never moved again; re-delivered or conflicting
//! signals only refresh `result_desc`. A nominal-success signal without
//! settlement metadata is an upstream contract violation and is surfaced as
//! a reconciliation error rather than a business failure.

use tracing::{info, warn};

use crate::errors::{AppError, Result};
use crate::models::callback::MetadataItem;
use crate::models::transaction::{PaymentTransaction, TransactionStatus, TransactionUpdate};
use crate::store::TransactionStore;

/// Result code the gateway uses for a successful settlement.
pub const SUCCESS_RESULT_CODE: &str = "0";

/// Normalized outcome signal for a known `checkout_request_id`.
///
/// Callbacks carry settlement metadata on success; status-query results
/// never do.
#[derive(Debug, Clone)]
pub struct ReconciliationSignal {
    pub result_code: String,
    pub result_desc: String,
    pub metadata: Option<SettlementMetadata>,
}

impl ReconciliationSignal {
    pub fn is_success(&self) -> bool {
        self.result_code == SUCCESS_RESULT_CODE
    }
}

/// Settlement fields present only on successful completions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementMetadata {
    pub amount: u64,
    pub receipt_number: String,
    pub transaction_date: String,
    pub phone_number: String,
}

impl SettlementMetadata {
    /// Extract the settlement fields from the callback's `Name`/`Value`
    /// item list. All four recognized items are required; anything missing
    /// is reported by name so a truncated callback is caught here instead
    /// of surfacing as a half-populated record.
    pub fn from_items(items: &[MetadataItem]) -> Result<Self> {
        let mut amount = None;
        let mut receipt_number = None;
        let mut transaction_date = None;
        let mut phone_number = None;

        for item in items {
            match item.name.as_str() {
                "Amount" => amount = item_amount(&item.value),
                "MpesaReceiptNumber" => receipt_number = item_string(&item.value),
                "TransactionDate" => transaction_date = item_string(&item.value),
                "PhoneNumber" => phone_number = item_string(&item.value),
                _ => {}
            }
        }

        let mut missing = Vec::new();
        if amount.is_none() {
            missing.push("Amount");
        }
        if receipt_number.is_none() {
            missing.push("MpesaReceiptNumber");
        }
        if transaction_date.is_none() {
            missing.push("TransactionDate");
        }
        if phone_number.is_none() {
            missing.push("PhoneNumber");
        }
        match (amount, receipt_number, transaction_date, phone_number) {
            (Some(amount), Some(receipt_number), Some(transaction_date), Some(phone_number)) => {
                Ok(SettlementMetadata {
                    amount,
                    receipt_number,
                    transaction_date,
                    phone_number,
                })
            }
            _ => Err(AppError::reconciliation(format!(
                "callback metadata missing items: {}",
                missing.join(", ")
            ))),
        }
    }
}

// The gateway is loose about item value types: amounts arrive as integers
// or floats, phone numbers and dates as integers or strings.
fn item_string(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn item_amount(value: &serde_json::Value) -> Option<u64> {
    if let Some(n) = value.as_u64() {
        return Some(n);
    }
    if let Some(f) = value.as_f64() {
        if f > 0.0 && f.fract() == 0.0 {
            return Some(f as u64);
        }
    }
    value.as_str().and_then(|s| s.parse().ok())
}

/// Apply an outcome signal to the stored transaction.
///
/// The transition runs as a compare-and-update against `Pending`, so a
/// callback and a status query racing on the same record cannot both win;
/// the loser falls through to the terminal no-op path and only refreshes
/// the result description.
pub async fn reconcile(
    store: &dyn TransactionStore,
    checkout_request_id: &str,
    signal: ReconciliationSignal,
) -> Result<PaymentTransaction> {
    let update = if signal.is_success() {
        let metadata = signal.metadata.as_ref().ok_or_else(|| {
            AppError::reconciliation(format!(
                "result code {} without settlement metadata for {}",
                signal.result_code, checkout_request_id
            ))
        })?;
        TransactionUpdate {
            status: Some(TransactionStatus::Completed),
            result_desc: Some(signal.result_desc.clone()),
            mpesa_receipt_number: Some(metadata.receipt_number.clone()),
            transaction_date: Some(metadata.transaction_date.clone()),
        }
    } else {
        TransactionUpdate {
            status: Some(TransactionStatus::Failed),
            result_desc: Some(signal.result_desc.clone()),
            ..Default::default()
        }
    };

    if let Some(transaction) = store
        .apply_transition(checkout_request_id, TransactionStatus::Pending, update)
        .await?
    {
        info!(
            checkout_request_id,
            status = transaction.status.as_str(),
            "transaction reconciled"
        );
        return Ok(transaction);
    }

    // No Pending record matched: either the id is unknown or the record is
    // already terminal (duplicate or late signal).
    let transaction = store
        .find_by_checkout_request_id(checkout_request_id)
        .await?
        .ok_or_else(|| AppError::TransactionNotFound(checkout_request_id.to_string()))?;

    warn!(
        checkout_request_id,
        status = transaction.status.as_str(),
        result_code = %signal.result_code,
        "signal for settled transaction; keeping terminal state"
    );
    store
        .apply_update(
            checkout_request_id,
            TransactionUpdate::description(signal.result_desc),
        )
        .await
}
