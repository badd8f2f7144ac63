use std::sync::Arc;

use crate::services::payments::PaymentService;

#[derive(Clone)]
pub struct AppState {
    pub payments: Arc<PaymentService>,
}

impl AppState {
    pub fn new(payments: Arc<PaymentService>) -> Self {
        AppState { payments }
    }
}
