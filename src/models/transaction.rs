// models/transaction.rs
use chrono::{DateTime, Utc};
use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};

/// Status of a push payment attempt.
///
/// `Pending` is the only non-terminal state; once a transaction reaches
/// `Completed` or `Failed` its status never changes again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "Pending",
            TransactionStatus::Completed => "Completed",
            TransactionStatus::Failed => "Failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransactionStatus::Pending)
    }
}

/// One record per initiated STK push request.
///
/// `checkout_request_id` is the gateway-issued correlation id and is unique
/// across all records; it joins the outbound request to every later callback
/// or status-query signal. `mpesa_receipt_number` and `transaction_date` are
/// written exactly once, on the transition into `Completed`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentTransaction {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub full_name: Option<String>,
    pub phone_number: String,
    pub amount: u64,
    pub checkout_request_id: String,
    pub mpesa_receipt_number: Option<String>,
    pub transaction_date: Option<String>,
    pub status: TransactionStatus,
    pub result_desc: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Fields supplied by the orchestrator when persisting a freshly accepted
/// push request. Everything else is store-assigned.
#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub full_name: Option<String>,
    pub phone_number: String,
    pub amount: u64,
    pub checkout_request_id: String,
}

/// Partial update applied during reconciliation. Only these four fields are
/// ever mutated after creation.
#[derive(Debug, Clone, Default)]
pub struct TransactionUpdate {
    pub status: Option<TransactionStatus>,
    pub result_desc: Option<String>,
    pub mpesa_receipt_number: Option<String>,
    pub transaction_date: Option<String>,
}

impl TransactionUpdate {
    pub fn description(result_desc: impl Into<String>) -> Self {
        TransactionUpdate {
            result_desc: Some(result_desc.into()),
            ..Default::default()
        }
    }
}
