pub mod memory;
pub mod mongo;

use async_trait::async_trait;

use crate::errors::Result;
use crate::models::transaction::{
    NewTransaction, PaymentTransaction, TransactionStatus, TransactionUpdate,
};

pub use memory::InMemoryTransactionStore;
pub use mongo::MongoTransactionStore;

/// Durable record of every payment attempt, keyed by the gateway-issued
/// `checkout_request_id`.
///
/// Reconciliation signals for the same record may race (a callback and a
/// status query arriving together); `apply_transition` is the
/// compare-and-update primitive that serializes them, so a record that has
/// already reached a terminal status can never be moved again.
#[async_trait]
pub trait TransactionStore: Send + Sync {
    /// Persist a new `Pending` transaction. Fails with
    /// `DuplicateCheckoutRequestId` if the correlation id already exists.
    async fn create(&self, new: NewTransaction) -> Result<PaymentTransaction>;

    async fn find_by_checkout_request_id(
        &self,
        checkout_request_id: &str,
    ) -> Result<Option<PaymentTransaction>>;

    /// Unconditional partial update. Fails with `TransactionNotFound` if no
    /// record matches.
    async fn apply_update(
        &self,
        checkout_request_id: &str,
        update: TransactionUpdate,
    ) -> Result<PaymentTransaction>;

    /// Atomic compare-and-update: applies `update` only if the record's
    /// current status equals `expected`, returning the updated record.
    /// Returns `Ok(None)` when the record is missing or its status has
    /// already moved on.
    async fn apply_transition(
        &self,
        checkout_request_id: &str,
        expected: TransactionStatus,
        update: TransactionUpdate,
    ) -> Result<Option<PaymentTransaction>>;
}
