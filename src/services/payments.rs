// services/payments.rs
use std::sync::Arc;

use tracing::{info, warn};

use crate::errors::{AppError, Result};
use crate::lifecycle::{reconcile, ReconciliationSignal, SettlementMetadata};
use crate::models::callback::StkCallback;
use crate::models::transaction::{NewTransaction, PaymentTransaction};
use crate::services::mpesa_gateway::{PaymentGateway, PushOutcome, StkPushResponse, StkQueryResponse};
use crate::store::TransactionStore;

/// Orchestrates the three external operations: initiate a push, receive the
/// asynchronous callback, and actively query a transaction's status.
///
/// Collaborators are injected, never ambient: the gateway client owns all
/// outbound network traffic, the store owns the durable record, and the
/// lifecycle module owns every state transition.
#[derive(Clone)]
pub struct PaymentService {
    gateway: Arc<dyn PaymentGateway>,
    store: Arc<dyn TransactionStore>,
}

impl PaymentService {
    pub fn new(gateway: Arc<dyn PaymentGateway>, store: Arc<dyn TransactionStore>) -> Self {
        PaymentService { gateway, store }
    }

    /// Validate the caller's input and submit the push request. A record is
    /// created only when the gateway accepts the request; rejections persist
    /// nothing and surface the gateway's own description.
    pub async fn initiate(
        &self,
        full_name: Option<String>,
        phone_number: Option<String>,
        amount: Option<String>,
    ) -> Result<StkPushResponse> {
        let full_name = required_field(full_name, "full_name")?;
        let phone_number = required_field(phone_number, "phone_number")?;
        let amount = required_field(amount, "amount")?;

        phone_number
            .parse::<u64>()
            .map_err(|_| AppError::validation("Invalid phone number."))?;
        let amount: u64 = amount
            .parse()
            .map_err(|_| AppError::validation("Invalid amount."))?;
        if amount == 0 {
            return Err(AppError::validation("Invalid amount."));
        }

        match self.gateway.submit_push(&phone_number, amount).await? {
            PushOutcome::Accepted {
                checkout_request_id,
                response,
            } => {
                let transaction = self
                    .store
                    .create(NewTransaction {
                        full_name: Some(full_name),
                        phone_number,
                        amount,
                        checkout_request_id,
                    })
                    .await?;
                info!(
                    checkout_request_id = %transaction.checkout_request_id,
                    "push accepted; pending transaction recorded"
                );
                Ok(response)
            }
            PushOutcome::Rejected { code, description } => {
                warn!(code = %code, "push request rejected by gateway");
                Err(AppError::PushRejected(description))
            }
        }
    }

    /// Apply an STK callback to the stored transaction and return the
    /// updated snapshot.
    pub async fn handle_callback(&self, callback: StkCallback) -> Result<PaymentTransaction> {
        info!(
            checkout_request_id = %callback.checkout_request_id,
            merchant_request_id = %callback.merchant_request_id,
            result_code = callback.result_code,
            "received STK callback"
        );

        // Metadata is only meaningful on nominal success; a failure callback
        // never carries settlement fields.
        let metadata = if callback.result_code == 0 {
            match &callback.callback_metadata {
                Some(metadata) => Some(SettlementMetadata::from_items(&metadata.items)?),
                None => None,
            }
        } else {
            None
        };

        let signal = ReconciliationSignal {
            result_code: callback.result_code.to_string(),
            result_desc: callback.result_desc,
            metadata,
        };
        reconcile(self.store.as_ref(), &callback.checkout_request_id, signal).await
    }

    /// Actively query the gateway for a transaction's outcome, reconciling
    /// the stored record when the response carries a final result code.
    pub async fn query(&self, checkout_request_id: Option<String>) -> Result<StkQueryResponse> {
        let checkout_request_id = required_field(checkout_request_id, "checkout_request_id")?;

        // Unknown ids are rejected before any outbound call is made.
        if self
            .store
            .find_by_checkout_request_id(&checkout_request_id)
            .await?
            .is_none()
        {
            return Err(AppError::TransactionNotFound(checkout_request_id));
        }

        let response = self.gateway.query_status(&checkout_request_id).await?;

        if let Some(result_code) = &response.result_code {
            let signal = ReconciliationSignal {
                result_code: result_code.clone(),
                result_desc: response.result_desc.clone().unwrap_or_default(),
                metadata: None,
            };
            match reconcile(self.store.as_ref(), &checkout_request_id, signal).await {
                Ok(transaction) => info!(
                    checkout_request_id = %checkout_request_id,
                    status = transaction.status.as_str(),
                    "status query reconciled transaction"
                ),
                // A query can confirm settlement but never carries the
                // receipt; completion waits for the callback.
                Err(AppError::ReconciliationError(_)) => warn!(
                    checkout_request_id = %checkout_request_id,
                    "gateway reports settlement; awaiting callback for receipt"
                ),
                Err(e) => return Err(e),
            }
        }

        Ok(response)
    }
}

fn required_field(value: Option<String>, name: &str) -> Result<String> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| AppError::validation(format!("{} is required.", name)))
}
