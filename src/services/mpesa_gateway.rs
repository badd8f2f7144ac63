// services/mpesa_gateway.rs
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as base64, Engine as _};
use chrono::Utc;
use reqwest::{header, Client};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{error, info};

use crate::config::MpesaConfig;
use crate::errors::{AppError, Result};

/// Seam between the orchestrator and the Daraja API. The production
/// implementation is [`MpesaGateway`]; tests inject stubs.
///
/// The client never touches the transaction store and never interprets
/// settlement outcomes; it only distinguishes transport/protocol failures
/// from parsed gateway responses.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn submit_push(&self, phone_number: &str, amount: u64) -> Result<PushOutcome>;

    async fn query_status(&self, checkout_request_id: &str) -> Result<StkQueryResponse>;
}

#[derive(Debug, Deserialize)]
pub struct AuthResponse {
    pub access_token: String,
}

#[derive(Debug, Serialize)]
pub struct StkPushRequest {
    #[serde(rename = "BusinessShortCode")]
    pub business_short_code: String,
    #[serde(rename = "Password")]
    pub password: String,
    #[serde(rename = "Timestamp")]
    pub timestamp: String,
    #[serde(rename = "TransactionType")]
    pub transaction_type: String,
    #[serde(rename = "Amount")]
    pub amount: String,
    #[serde(rename = "PartyA")]
    pub party_a: String,
    #[serde(rename = "PartyB")]
    pub party_b: String,
    #[serde(rename = "PhoneNumber")]
    pub phone_number: String,
    #[serde(rename = "CallBackURL")]
    pub callback_url: String,
    #[serde(rename = "AccountReference")]
    pub account_reference: String,
    #[serde(rename = "TransactionDesc")]
    pub transaction_desc: String,
}

/// Raw acceptance response from the STK push endpoint. Rejections may omit
/// the request ids, so those stay optional here; [`PushOutcome`] carries the
/// type-safe split.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StkPushResponse {
    #[serde(rename = "MerchantRequestID", default, skip_serializing_if = "Option::is_none")]
    pub merchant_request_id: Option<String>,
    #[serde(rename = "CheckoutRequestID", default, skip_serializing_if = "Option::is_none")]
    pub checkout_request_id: Option<String>,
    #[serde(rename = "ResponseCode")]
    pub response_code: String,
    #[serde(rename = "ResponseDescription", default)]
    pub response_description: String,
    #[serde(rename = "CustomerMessage", default, skip_serializing_if = "Option::is_none")]
    pub customer_message: Option<String>,
}

/// Business-level outcome of a push submission. Transport failures are
/// `Err(GatewayError)` instead, so the three cases cannot be conflated.
#[derive(Debug, Clone)]
pub enum PushOutcome {
    Accepted {
        checkout_request_id: String,
        response: StkPushResponse,
    },
    Rejected {
        code: String,
        description: String,
    },
}

#[derive(Debug, Serialize)]
pub struct StkQueryRequest {
    #[serde(rename = "BusinessShortCode")]
    pub business_short_code: String,
    #[serde(rename = "Password")]
    pub password: String,
    #[serde(rename = "Timestamp")]
    pub timestamp: String,
    #[serde(rename = "CheckoutRequestID")]
    pub checkout_request_id: String,
}

/// Parsed status-query response. `ResultCode`/`ResultDesc` are present only
/// once the transaction has a final outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StkQueryResponse {
    #[serde(rename = "ResponseCode")]
    pub response_code: String,
    #[serde(rename = "ResponseDescription", default)]
    pub response_description: String,
    #[serde(rename = "MerchantRequestID", default, skip_serializing_if = "Option::is_none")]
    pub merchant_request_id: Option<String>,
    #[serde(rename = "CheckoutRequestID", default, skip_serializing_if = "Option::is_none")]
    pub checkout_request_id: Option<String>,
    #[serde(rename = "ResultCode", default, skip_serializing_if = "Option::is_none")]
    pub result_code: Option<String>,
    #[serde(rename = "ResultDesc", default, skip_serializing_if = "Option::is_none")]
    pub result_desc: Option<String>,
}

/// Response code the gateway uses when a push request is accepted for
/// processing. Acceptance says nothing about settlement; that arrives later
/// through the callback or the status query.
const ACCEPTED_RESPONSE_CODE: &str = "0";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct MpesaGateway {
    config: MpesaConfig,
    client: Client,
    cached_token: Arc<RwLock<Option<(String, chrono::DateTime<Utc>)>>>,
}

impl MpesaGateway {
    pub fn new(config: MpesaConfig) -> Self {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("Failed to create HTTP client");

        MpesaGateway {
            config,
            client,
            cached_token: Arc::new(RwLock::new(None)),
        }
    }

    fn format_phone_number(&self, phone: &str) -> String {
        let phone = phone.trim();
        if phone.starts_with("254") && phone.len() == 12 {
            return phone.to_string();
        }
        if phone.starts_with("07") && phone.len() == 10 {
            return format!("254{}", &phone[1..]);
        }
        if phone.starts_with('7') && phone.len() == 9 {
            return format!("254{}", phone);
        }
        phone.to_string()
    }

    fn generate_password(&self, timestamp: &str) -> String {
        let password_string = format!(
            "{}{}{}",
            self.config.short_code, self.config.passkey, timestamp
        );
        base64.encode(password_string)
    }

    pub async fn get_access_token(&self) -> Result<String> {
        {
            let cached = self.cached_token.read().unwrap();
            if let Some((token, expiry)) = cached.as_ref() {
                if *expiry > Utc::now() + chrono::Duration::minutes(5) {
                    return Ok(token.clone());
                }
            }
        }

        info!("Requesting new access token");
        let auth_string = format!(
            "{}:{}",
            self.config.consumer_key, self.config.consumer_secret
        );
        let encoded_auth = base64.encode(auth_string);

        let response = self
            .client
            .get(self.config.auth_url())
            .header(header::AUTHORIZATION, format!("Basic {}", encoded_auth))
            .send()
            .await
            .map_err(|e| AppError::AuthError(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!("Failed to get access token: {} - {}", status, body);
            return Err(AppError::AuthError(format!("auth endpoint returned {}", status)));
        }

        let auth_response: AuthResponse = response
            .json()
            .await
            .map_err(|e| AppError::AuthError(format!("malformed auth response: {}", e)))?;

        {
            // Daraja tokens live ~1h; refresh a little early.
            let expiry_time = Utc::now() + chrono::Duration::minutes(55);
            let mut cached = self.cached_token.write().unwrap();
            *cached = Some((auth_response.access_token.clone(), expiry_time));
        }

        Ok(auth_response.access_token)
    }
}

#[async_trait]
impl PaymentGateway for MpesaGateway {
    async fn submit_push(&self, phone_number: &str, amount: u64) -> Result<PushOutcome> {
        info!("STK push for {} - KSh {}", phone_number, amount);

        let access_token = self.get_access_token().await?;
        let formatted_phone = self.format_phone_number(phone_number);
        let timestamp = Utc::now().format("%Y%m%d%H%M%S").to_string();
        let password = self.generate_password(&timestamp);

        let stk_request = StkPushRequest {
            business_short_code: self.config.short_code.clone(),
            password,
            timestamp,
            transaction_type: "CustomerPayBillOnline".to_string(),
            amount: amount.to_string(),
            party_a: formatted_phone.clone(),
            party_b: self.config.short_code.clone(),
            phone_number: formatted_phone,
            callback_url: self.config.callback_url.clone(),
            account_reference: "CompanyXLTD".to_string(),
            transaction_desc: "Payment of X".to_string(),
        };

        let response = self
            .client
            .post(self.config.stk_push_url())
            .header(header::AUTHORIZATION, format!("Bearer {}", access_token))
            .header(header::CONTENT_TYPE, "application/json")
            .json(&stk_request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!("STK push failed: {} - {}", status, body);
            return Err(AppError::gateway(format!("push endpoint returned {}", status)));
        }

        let push_response: StkPushResponse = response
            .json()
            .await
            .map_err(|e| AppError::gateway(format!("malformed push response: {}", e)))?;

        if push_response.response_code == ACCEPTED_RESPONSE_CODE {
            let checkout_request_id =
                push_response.checkout_request_id.clone().ok_or_else(|| {
                    AppError::gateway("accepted push response without CheckoutRequestID")
                })?;
            info!("STK push accepted: {}", checkout_request_id);
            Ok(PushOutcome::Accepted {
                checkout_request_id,
                response: push_response,
            })
        } else {
            Ok(PushOutcome::Rejected {
                code: push_response.response_code,
                description: push_response.response_description,
            })
        }
    }

    async fn query_status(&self, checkout_request_id: &str) -> Result<StkQueryResponse> {
        let access_token = self.get_access_token().await?;
        let timestamp = Utc::now().format("%Y%m%d%H%M%S").to_string();
        let password = self.generate_password(&timestamp);

        let query_request = StkQueryRequest {
            business_short_code: self.config.short_code.clone(),
            password,
            timestamp,
            checkout_request_id: checkout_request_id.to_string(),
        };

        let response = self
            .client
            .post(self.config.stk_query_url())
            .header(header::AUTHORIZATION, format!("Bearer {}", access_token))
            .header(header::CONTENT_TYPE, "application/json")
            .json(&query_request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!("Status query failed: {} - {}", status, body);
            return Err(AppError::gateway(format!("query endpoint returned {}", status)));
        }

        // Parse the body before inspecting result codes.
        let query_response: StkQueryResponse = response
            .json()
            .await
            .map_err(|e| AppError::gateway(format!("malformed query response: {}", e)))?;
        Ok(query_response)
    }
}
