use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use mongodb::bson::oid::ObjectId;

use crate::errors::{AppError, Result};
use crate::models::transaction::{
    NewTransaction, PaymentTransaction, TransactionStatus, TransactionUpdate,
};
use crate::store::TransactionStore;

/// In-memory transaction store, used by the test suite and local runs
/// without a database. The mutex gives the same per-record serialization
/// guarantee as the Mongo compare-and-update.
#[derive(Debug, Default)]
pub struct InMemoryTransactionStore {
    transactions: Mutex<HashMap<String, PaymentTransaction>>,
}

impl InMemoryTransactionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn apply_fields(transaction: &mut PaymentTransaction, update: &TransactionUpdate) {
    if let Some(status) = update.status {
        transaction.status = status;
    }
    if let Some(result_desc) = &update.result_desc {
        transaction.result_desc = Some(result_desc.clone());
    }
    if let Some(receipt) = &update.mpesa_receipt_number {
        transaction.mpesa_receipt_number = Some(receipt.clone());
    }
    if let Some(date) = &update.transaction_date {
        transaction.transaction_date = Some(date.clone());
    }
}

#[async_trait]
impl TransactionStore for InMemoryTransactionStore {
    async fn create(&self, new: NewTransaction) -> Result<PaymentTransaction> {
        let mut transactions = self.transactions.lock().unwrap();
        if transactions.contains_key(&new.checkout_request_id) {
            return Err(AppError::DuplicateCheckoutRequestId(new.checkout_request_id));
        }

        let transaction = PaymentTransaction {
            id: Some(ObjectId::new()),
            full_name: new.full_name,
            phone_number: new.phone_number,
            amount: new.amount,
            checkout_request_id: new.checkout_request_id.clone(),
            mpesa_receipt_number: None,
            transaction_date: None,
            status: TransactionStatus::Pending,
            result_desc: None,
            created_at: Utc::now(),
        };
        transactions.insert(new.checkout_request_id, transaction.clone());
        Ok(transaction)
    }

    async fn find_by_checkout_request_id(
        &self,
        checkout_request_id: &str,
    ) -> Result<Option<PaymentTransaction>> {
        let transactions = self.transactions.lock().unwrap();
        Ok(transactions.get(checkout_request_id).cloned())
    }

    async fn apply_update(
        &self,
        checkout_request_id: &str,
        update: TransactionUpdate,
    ) -> Result<PaymentTransaction> {
        let mut transactions = self.transactions.lock().unwrap();
        let transaction = transactions
            .get_mut(checkout_request_id)
            .ok_or_else(|| AppError::TransactionNotFound(checkout_request_id.to_string()))?;
        apply_fields(transaction, &update);
        Ok(transaction.clone())
    }

    async fn apply_transition(
        &self,
        checkout_request_id: &str,
        expected: TransactionStatus,
        update: TransactionUpdate,
    ) -> Result<Option<PaymentTransaction>> {
        let mut transactions = self.transactions.lock().unwrap();
        match transactions.get_mut(checkout_request_id) {
            Some(transaction) if transaction.status == expected => {
                apply_fields(transaction, &update);
                Ok(Some(transaction.clone()))
            }
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_transaction(checkout_request_id: &str) -> NewTransaction {
        NewTransaction {
            full_name: Some("John Doe".to_string()),
            phone_number: "254700000000".to_string(),
            amount: 100,
            checkout_request_id: checkout_request_id.to_string(),
        }
    }

    #[tokio::test]
    async fn create_assigns_pending_status_and_id() {
        let store = InMemoryTransactionStore::new();
        let transaction = store.create(new_transaction("ws_CO_1")).await.unwrap();

        assert_eq!(transaction.status, TransactionStatus::Pending);
        assert!(transaction.id.is_some());
        assert!(transaction.mpesa_receipt_number.is_none());
        assert!(transaction.transaction_date.is_none());
    }

    #[tokio::test]
    async fn create_rejects_duplicate_checkout_request_id() {
        let store = InMemoryTransactionStore::new();
        store.create(new_transaction("ws_CO_1")).await.unwrap();

        let err = store.create(new_transaction("ws_CO_1")).await.unwrap_err();
        assert!(matches!(err, AppError::DuplicateCheckoutRequestId(_)));

        // The original record must be untouched.
        let kept = store
            .find_by_checkout_request_id("ws_CO_1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(kept.status, TransactionStatus::Pending);
    }

    #[tokio::test]
    async fn apply_update_fails_for_unknown_id() {
        let store = InMemoryTransactionStore::new();
        let err = store
            .apply_update("missing", TransactionUpdate::description("late signal"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::TransactionNotFound(_)));
    }

    #[tokio::test]
    async fn apply_transition_is_a_compare_and_update() {
        let store = InMemoryTransactionStore::new();
        store.create(new_transaction("ws_CO_1")).await.unwrap();

        let update = TransactionUpdate {
            status: Some(TransactionStatus::Failed),
            result_desc: Some("Request cancelled by user".to_string()),
            ..Default::default()
        };
        let updated = store
            .apply_transition("ws_CO_1", TransactionStatus::Pending, update.clone())
            .await
            .unwrap();
        assert_eq!(updated.unwrap().status, TransactionStatus::Failed);

        // Second transition expecting Pending no longer matches.
        let second = store
            .apply_transition("ws_CO_1", TransactionStatus::Pending, update)
            .await
            .unwrap();
        assert!(second.is_none());
    }
}
