//! End-to-end reconciliation tests.
//!
//! These drive the `PaymentService` orchestrator against the in-memory
//! transaction store and a scripted stub gateway, covering the full
//! lifecycle: push acceptance/rejection, callback settlement, duplicate and
//! conflicting signals, and active status queries.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use rstest::rstest;

use mpesa_push_api::errors::{AppError, Result};
use mpesa_push_api::models::callback::CallbackEnvelope;
use mpesa_push_api::models::transaction::TransactionStatus;
use mpesa_push_api::services::mpesa_gateway::{
    PaymentGateway, PushOutcome, StkPushResponse, StkQueryResponse,
};
use mpesa_push_api::services::payments::PaymentService;
use mpesa_push_api::store::{InMemoryTransactionStore, TransactionStore};

/// Gateway double returning scripted outcomes and counting calls.
struct StubGateway {
    push_outcome: Option<PushOutcome>,
    query_response: Option<StkQueryResponse>,
    fail_transport: bool,
    push_calls: AtomicUsize,
    query_calls: AtomicUsize,
}

impl StubGateway {
    fn accepting(checkout_request_id: &str) -> Self {
        let response = StkPushResponse {
            merchant_request_id: Some("29115-34620561-1".to_string()),
            checkout_request_id: Some(checkout_request_id.to_string()),
            response_code: "0".to_string(),
            response_description: "Success. Request accepted for processing".to_string(),
            customer_message: Some("Success. Request accepted for processing".to_string()),
        };
        StubGateway {
            push_outcome: Some(PushOutcome::Accepted {
                checkout_request_id: checkout_request_id.to_string(),
                response,
            }),
            query_response: None,
            fail_transport: false,
            push_calls: AtomicUsize::new(0),
            query_calls: AtomicUsize::new(0),
        }
    }

    fn rejecting(description: &str) -> Self {
        StubGateway {
            push_outcome: Some(PushOutcome::Rejected {
                code: "1".to_string(),
                description: description.to_string(),
            }),
            query_response: None,
            fail_transport: false,
            push_calls: AtomicUsize::new(0),
            query_calls: AtomicUsize::new(0),
        }
    }

    fn failing_transport() -> Self {
        StubGateway {
            push_outcome: None,
            query_response: None,
            fail_transport: true,
            push_calls: AtomicUsize::new(0),
            query_calls: AtomicUsize::new(0),
        }
    }

    fn with_query_result(mut self, result_code: Option<&str>, result_desc: Option<&str>) -> Self {
        self.query_response = Some(StkQueryResponse {
            response_code: "0".to_string(),
            response_description: "The service request has been accepted successsfully".to_string(),
            merchant_request_id: Some("29115-34620561-1".to_string()),
            checkout_request_id: None,
            result_code: result_code.map(str::to_string),
            result_desc: result_desc.map(str::to_string),
        });
        self
    }
}

#[async_trait]
impl PaymentGateway for StubGateway {
    async fn submit_push(&self, _phone_number: &str, _amount: u64) -> Result<PushOutcome> {
        self.push_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_transport {
            return Err(AppError::GatewayError("connection timed out".to_string()));
        }
        Ok(self.push_outcome.clone().expect("no push outcome scripted"))
    }

    async fn query_status(&self, _checkout_request_id: &str) -> Result<StkQueryResponse> {
        self.query_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_transport {
            return Err(AppError::GatewayError("connection timed out".to_string()));
        }
        Ok(self
            .query_response
            .clone()
            .expect("no query response scripted"))
    }
}

fn service_with(
    gateway: StubGateway,
) -> (PaymentService, Arc<StubGateway>, Arc<InMemoryTransactionStore>) {
    let gateway = Arc::new(gateway);
    let store = Arc::new(InMemoryTransactionStore::new());
    let service = PaymentService::new(gateway.clone(), store.clone());
    (service, gateway, store)
}

fn initiate_args() -> (Option<String>, Option<String>, Option<String>) {
    (
        Some("John Doe".to_string()),
        Some("254700000000".to_string()),
        Some("100".to_string()),
    )
}

fn completed_callback_json(checkout_request_id: &str) -> serde_json::Value {
    serde_json::json!({
        "Body": {
            "stkCallback": {
                "MerchantRequestID": "29115-34620561-1",
                "CheckoutRequestID": checkout_request_id,
                "ResultCode": 0,
                "ResultDesc": "The service request is processed successfully.",
                "CallbackMetadata": {
                    "Item": [
                        { "Name": "Amount", "Value": 100 },
                        { "Name": "MpesaReceiptNumber", "Value": "ABC123" },
                        { "Name": "TransactionDate", "Value": 20240101120000u64 },
                        { "Name": "PhoneNumber", "Value": 254700000000u64 }
                    ]
                }
            }
        }
    })
}

fn parse_callback(value: serde_json::Value) -> CallbackEnvelope {
    serde_json::from_value(value).expect("envelope should deserialize")
}

#[tokio::test]
async fn accepted_push_records_exactly_one_pending_transaction() {
    let (service, _, store) = service_with(StubGateway::accepting("67890"));
    let (name, phone, amount) = initiate_args();

    let response = service.initiate(name, phone, amount).await.unwrap();
    assert_eq!(response.response_code, "0");
    assert_eq!(response.checkout_request_id.as_deref(), Some("67890"));

    let transaction = store
        .find_by_checkout_request_id("67890")
        .await
        .unwrap()
        .expect("record should exist");
    assert_eq!(transaction.status, TransactionStatus::Pending);
    assert_eq!(transaction.phone_number, "254700000000");
    assert_eq!(transaction.amount, 100);
    assert_eq!(transaction.full_name.as_deref(), Some("John Doe"));
}

#[tokio::test]
async fn rejected_push_persists_nothing_and_reports_gateway_description() {
    let (service, _, store) = service_with(StubGateway::rejecting("Invalid Amount"));
    let (name, phone, amount) = initiate_args();

    let err = service.initiate(name, phone, amount).await.unwrap_err();
    match err {
        AppError::PushRejected(description) => assert_eq!(description, "Invalid Amount"),
        other => panic!("expected PushRejected, got {other:?}"),
    }

    // Any later callback finds no record.
    let envelope = parse_callback(completed_callback_json("67890"));
    let err = service
        .handle_callback(envelope.body.stk_callback)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::TransactionNotFound(_)));
    assert!(store
        .find_by_checkout_request_id("67890")
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn transport_failure_surfaces_as_gateway_error() {
    let (service, _, _) = service_with(StubGateway::failing_transport());
    let (name, phone, amount) = initiate_args();

    let err = service.initiate(name, phone, amount).await.unwrap_err();
    assert!(matches!(err, AppError::GatewayError(_)));
}

#[rstest]
#[case(None, Some("254700000000"), Some("100"))]
#[case(Some("John Doe"), None, Some("100"))]
#[case(Some("John Doe"), Some("254700000000"), None)]
#[case(Some("John Doe"), Some("not-a-phone"), Some("100"))]
#[case(Some("John Doe"), Some("254700000000"), Some("ten"))]
#[case(Some("John Doe"), Some("254700000000"), Some("0"))]
#[tokio::test]
async fn invalid_input_is_rejected_before_the_gateway_is_called(
    #[case] name: Option<&str>,
    #[case] phone: Option<&str>,
    #[case] amount: Option<&str>,
) {
    let (service, gateway, _) = service_with(StubGateway::accepting("67890"));

    let err = service
        .initiate(
            name.map(str::to_string),
            phone.map(str::to_string),
            amount.map(str::to_string),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::ValidationError(_)));
    assert_eq!(gateway.push_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn duplicate_checkout_request_id_is_a_conflict() {
    let (service, _, _) = service_with(StubGateway::accepting("67890"));
    let (name, phone, amount) = initiate_args();
    service
        .initiate(name.clone(), phone.clone(), amount.clone())
        .await
        .unwrap();

    let err = service.initiate(name, phone, amount).await.unwrap_err();
    assert!(matches!(err, AppError::DuplicateCheckoutRequestId(_)));
}

#[tokio::test]
async fn completing_callback_settles_the_pending_transaction() {
    let (service, _, _) = service_with(StubGateway::accepting("67890"));
    let (name, phone, amount) = initiate_args();
    service.initiate(name, phone, amount).await.unwrap();

    let envelope = parse_callback(completed_callback_json("67890"));
    let transaction = service
        .handle_callback(envelope.body.stk_callback)
        .await
        .unwrap();

    assert_eq!(transaction.status, TransactionStatus::Completed);
    assert_eq!(transaction.mpesa_receipt_number.as_deref(), Some("ABC123"));
    assert_eq!(
        transaction.transaction_date.as_deref(),
        Some("20240101120000")
    );
}

#[tokio::test]
async fn replayed_and_conflicting_callbacks_leave_terminal_state_intact() {
    let (service, _, store) = service_with(StubGateway::accepting("67890"));
    let (name, phone, amount) = initiate_args();
    service.initiate(name, phone, amount).await.unwrap();

    let envelope = parse_callback(completed_callback_json("67890"));
    service
        .handle_callback(envelope.body.stk_callback)
        .await
        .unwrap();

    // Replay of the same callback.
    let envelope = parse_callback(completed_callback_json("67890"));
    service
        .handle_callback(envelope.body.stk_callback)
        .await
        .unwrap();

    // Conflicting failure callback after completion.
    let conflicting = parse_callback(serde_json::json!({
        "Body": {
            "stkCallback": {
                "MerchantRequestID": "29115-34620561-1",
                "CheckoutRequestID": "67890",
                "ResultCode": 1032,
                "ResultDesc": "Request cancelled by user"
            }
        }
    }));
    let transaction = service
        .handle_callback(conflicting.body.stk_callback)
        .await
        .unwrap();

    assert_eq!(transaction.status, TransactionStatus::Completed);
    assert_eq!(transaction.mpesa_receipt_number.as_deref(), Some("ABC123"));

    let stored = store
        .find_by_checkout_request_id("67890")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, TransactionStatus::Completed);
    assert_eq!(stored.transaction_date.as_deref(), Some("20240101120000"));
}

#[tokio::test]
async fn failing_callback_marks_the_transaction_failed() {
    let (service, _, _) = service_with(StubGateway::accepting("67890"));
    let (name, phone, amount) = initiate_args();
    service.initiate(name, phone, amount).await.unwrap();

    let envelope = parse_callback(serde_json::json!({
        "Body": {
            "stkCallback": {
                "MerchantRequestID": "29115-34620561-1",
                "CheckoutRequestID": "67890",
                "ResultCode": 1032,
                "ResultDesc": "Request cancelled by user"
            }
        }
    }));
    let transaction = service
        .handle_callback(envelope.body.stk_callback)
        .await
        .unwrap();

    assert_eq!(transaction.status, TransactionStatus::Failed);
    assert_eq!(
        transaction.result_desc.as_deref(),
        Some("Request cancelled by user")
    );
    assert!(transaction.mpesa_receipt_number.is_none());
}

#[tokio::test]
async fn nominal_success_callback_without_metadata_is_a_reconciliation_error() {
    let (service, _, store) = service_with(StubGateway::accepting("67890"));
    let (name, phone, amount) = initiate_args();
    service.initiate(name, phone, amount).await.unwrap();

    let envelope = parse_callback(serde_json::json!({
        "Body": {
            "stkCallback": {
                "MerchantRequestID": "29115-34620561-1",
                "CheckoutRequestID": "67890",
                "ResultCode": 0,
                "ResultDesc": "The service request is processed successfully."
            }
        }
    }));
    let err = service
        .handle_callback(envelope.body.stk_callback)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::ReconciliationError(_)));

    let stored = store
        .find_by_checkout_request_id("67890")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, TransactionStatus::Pending);
}

#[tokio::test]
async fn query_for_unknown_id_is_not_found_without_calling_the_gateway() {
    let (service, gateway, _) =
        service_with(StubGateway::accepting("67890").with_query_result(None, None));

    let err = service
        .query(Some("ws_CO_missing".to_string()))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::TransactionNotFound(_)));
    assert_eq!(gateway.query_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn query_requires_a_checkout_request_id() {
    let (service, _, _) = service_with(StubGateway::accepting("67890"));

    let err = service.query(None).await.unwrap_err();
    assert!(matches!(err, AppError::ValidationError(_)));

    let err = service.query(Some("  ".to_string())).await.unwrap_err();
    assert!(matches!(err, AppError::ValidationError(_)));
}

#[tokio::test]
async fn query_with_failure_result_reconciles_the_record_to_failed() {
    let gateway = StubGateway::accepting("67890")
        .with_query_result(Some("1032"), Some("Request cancelled by user"));
    let (service, _, store) = service_with(gateway);
    let (name, phone, amount) = initiate_args();
    service.initiate(name, phone, amount).await.unwrap();

    let response = service.query(Some("67890".to_string())).await.unwrap();
    assert_eq!(response.result_code.as_deref(), Some("1032"));

    let stored = store
        .find_by_checkout_request_id("67890")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, TransactionStatus::Failed);
    assert_eq!(
        stored.result_desc.as_deref(),
        Some("Request cancelled by user")
    );
}

#[tokio::test]
async fn query_confirming_settlement_leaves_completion_to_the_callback() {
    let gateway = StubGateway::accepting("67890")
        .with_query_result(Some("0"), Some("The service request is processed successfully."));
    let (service, _, store) = service_with(gateway);
    let (name, phone, amount) = initiate_args();
    service.initiate(name, phone, amount).await.unwrap();

    // The query reports success but carries no settlement metadata, so the
    // record must stay Pending until the callback delivers the receipt.
    let response = service.query(Some("67890".to_string())).await.unwrap();
    assert_eq!(response.result_code.as_deref(), Some("0"));

    let stored = store
        .find_by_checkout_request_id("67890")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, TransactionStatus::Pending);
    assert!(stored.mpesa_receipt_number.is_none());

    let envelope: CallbackEnvelope =
        serde_json::from_value(completed_callback_json("67890")).unwrap();
    let transaction = service
        .handle_callback(envelope.body.stk_callback)
        .await
        .unwrap();
    assert_eq!(transaction.status, TransactionStatus::Completed);
}

#[tokio::test]
async fn query_with_pending_result_only_returns_the_raw_response() {
    // No ResultCode yet: the push is still being processed.
    let gateway = StubGateway::accepting("67890").with_query_result(None, None);
    let (service, _, store) = service_with(gateway);
    let (name, phone, amount) = initiate_args();
    service.initiate(name, phone, amount).await.unwrap();

    let response = service.query(Some("67890".to_string())).await.unwrap();
    assert!(response.result_code.is_none());

    let stored = store
        .find_by_checkout_request_id("67890")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, TransactionStatus::Pending);
}

#[test]
fn malformed_envelope_fails_to_deserialize() {
    let bad = serde_json::json!({ "Body": { "unexpected": true } });
    assert!(serde_json::from_value::<CallbackEnvelope>(bad).is_err());
}
