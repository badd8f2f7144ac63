use async_trait::async_trait;
use chrono::Utc;
use mongodb::bson::{doc, oid::ObjectId, Document};
use mongodb::error::{ErrorKind, WriteFailure};
use mongodb::options::{IndexOptions, ReturnDocument};
use mongodb::{Collection, Database, IndexModel};

use crate::errors::{AppError, Result};
use crate::models::transaction::{
    NewTransaction, PaymentTransaction, TransactionStatus, TransactionUpdate,
};
use crate::store::TransactionStore;

const COLLECTION: &str = "mpesa_transactions";

/// MongoDB-backed transaction store.
///
/// Uniqueness of `checkout_request_id` is enforced by a unique index, and
/// transitions go through `find_one_and_update` with the expected status in
/// the filter, so racing reconciliation attempts for the same record are
/// serialized by the database.
#[derive(Debug, Clone)]
pub struct MongoTransactionStore {
    collection: Collection<PaymentTransaction>,
}

impl MongoTransactionStore {
    pub fn new(db: &Database) -> Self {
        MongoTransactionStore {
            collection: db.collection(COLLECTION),
        }
    }

    /// Create the unique index on `checkout_request_id`. Called once at
    /// startup; a second creation attempt with a colliding id then fails
    /// with E11000 instead of overwriting.
    pub async fn ensure_indexes(&self) -> Result<()> {
        let index = IndexModel::builder()
            .keys(doc! { "checkout_request_id": 1 })
            .options(IndexOptions::builder().unique(true).build())
            .build();
        self.collection.create_index(index).await?;
        Ok(())
    }
}

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    match err.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(write_error)) => write_error.code == 11000,
        _ => false,
    }
}

fn update_document(update: &TransactionUpdate) -> Document {
    let mut set = doc! {};
    if let Some(status) = update.status {
        set.insert("status", status.as_str());
    }
    if let Some(result_desc) = &update.result_desc {
        set.insert("result_desc", result_desc.as_str());
    }
    if let Some(receipt) = &update.mpesa_receipt_number {
        set.insert("mpesa_receipt_number", receipt.as_str());
    }
    if let Some(date) = &update.transaction_date {
        set.insert("transaction_date", date.as_str());
    }
    set
}

#[async_trait]
impl TransactionStore for MongoTransactionStore {
    async fn create(&self, new: NewTransaction) -> Result<PaymentTransaction> {
        let transaction = PaymentTransaction {
            id: Some(ObjectId::new()),
            full_name: new.full_name,
            phone_number: new.phone_number,
            amount: new.amount,
            checkout_request_id: new.checkout_request_id,
            mpesa_receipt_number: None,
            transaction_date: None,
            status: TransactionStatus::Pending,
            result_desc: None,
            created_at: Utc::now(),
        };

        match self.collection.insert_one(&transaction).await {
            Ok(_) => Ok(transaction),
            Err(e) if is_duplicate_key(&e) => Err(AppError::DuplicateCheckoutRequestId(
                transaction.checkout_request_id,
            )),
            Err(e) => Err(e.into()),
        }
    }

    async fn find_by_checkout_request_id(
        &self,
        checkout_request_id: &str,
    ) -> Result<Option<PaymentTransaction>> {
        let found = self
            .collection
            .find_one(doc! { "checkout_request_id": checkout_request_id })
            .await?;
        Ok(found)
    }

    async fn apply_update(
        &self,
        checkout_request_id: &str,
        update: TransactionUpdate,
    ) -> Result<PaymentTransaction> {
        self.collection
            .find_one_and_update(
                doc! { "checkout_request_id": checkout_request_id },
                doc! { "$set": update_document(&update) },
            )
            .return_document(ReturnDocument::After)
            .await?
            .ok_or_else(|| AppError::TransactionNotFound(checkout_request_id.to_string()))
    }

    async fn apply_transition(
        &self,
        checkout_request_id: &str,
        expected: TransactionStatus,
        update: TransactionUpdate,
    ) -> Result<Option<PaymentTransaction>> {
        let updated = self
            .collection
            .find_one_and_update(
                doc! {
                    "checkout_request_id": checkout_request_id,
                    "status": expected.as_str(),
                },
                doc! { "$set": update_document(&update) },
            )
            .return_document(ReturnDocument::After)
            .await?;
        Ok(updated)
    }
}
