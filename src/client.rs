use async_trait::async_trait;
use dotenv::dotenv;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info};

/// Gateway application status code meaning "transaction succeeded" /
/// "funds captured". Every other code is a definitive decline.
pub const GATEWAY_SUCCESS_CODE: i64 = 1;

// Gateway calls are a single bounded round trip; no retries anywhere.
const GATEWAY_TIMEOUT_SECS: u64 = 10;

/// Payment adapter failures.
///
/// `GatewayRejected` means the gateway answered and said no.
/// `Transport` and `MalformedResponse` mean we do not know what the gateway
/// did; during verification both leave the payment state ambiguous.
#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("gateway rejected the transaction: {0}")]
    GatewayRejected(String),
    #[error("gateway transport failure: {0}")]
    Transport(String),
    #[error("malformed gateway response: {0}")]
    MalformedResponse(String),
}

/// Parsed result of a verify call that reached the gateway. `success` is
/// true only for the dedicated success code; any other code is a decline,
/// not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyOutcome {
    pub success: bool,
    pub code: i64,
    pub message: String,
}

#[derive(Debug, Serialize)]
struct CreateTransactionRequest<'a> {
    pin: &'a str,
    amount: u64,
    callback_url: &'a str,
    mobile: &'a str,
    invoice_id: &'a str,
    description: &'a str,
}

#[derive(Debug, Deserialize)]
struct CreateTransactionResponse {
    status: i64,
    #[serde(default)]
    token: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Serialize)]
struct VerifyTransactionRequest<'a> {
    pin: &'a str,
    amount: u64,
    transaction_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct VerifyTransactionResponse {
    status: i64,
    #[serde(default)]
    message: String,
}

/// Seam between the booking workflow and the external payment gateway.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Register a transaction with the gateway and return the hosted
    /// redirect URL the visitor should be sent to.
    async fn create_transaction(
        &self,
        amount: u64,
        invoice_id: &str,
        phone_number: &str,
        callback_url: &str,
    ) -> Result<String, PaymentError>;

    /// Ask the gateway whether funds for a transaction were captured.
    async fn verify_transaction(
        &self,
        amount: u64,
        transaction_id: &str,
    ) -> Result<VerifyOutcome, PaymentError>;
}

/// HTTP client for the payment gateway
pub struct GatewayClient {
    client: Client,
    pin: String,
    endpoint: String,
    redirect_base: String,
}

impl GatewayClient {
    /// Create a new gateway client from environment variables
    pub fn new() -> Self {
        dotenv().ok();

        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(GATEWAY_TIMEOUT_SECS))
                .build()
                .expect("Failed to build gateway HTTP client"),
            pin: env::var("GATEWAY_PIN").expect("GATEWAY_PIN must be set in environment"),
            endpoint: env::var("GATEWAY_API_ENDPOINT")
                .expect("GATEWAY_API_ENDPOINT must be set in environment"),
            redirect_base: env::var("GATEWAY_REDIRECT_BASE")
                .expect("GATEWAY_REDIRECT_BASE must be set in environment"),
        }
    }
}

#[async_trait]
impl PaymentGateway for GatewayClient {
    async fn create_transaction(
        &self,
        amount: u64,
        invoice_id: &str,
        phone_number: &str,
        callback_url: &str,
    ) -> Result<String, PaymentError> {
        let url = format!("{}/transaction/create", self.endpoint);
        let request = CreateTransactionRequest {
            pin: &self.pin,
            amount,
            callback_url,
            mobile: phone_number,
            invoice_id,
            description: "Appointment booking",
        };

        info!(
            "Requesting gateway transaction for invoice {} ({} units)",
            invoice_id, amount
        );
        debug!("Gateway URL: {}", url);

        let res = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                error!("Gateway create call failed for invoice {}: {}", invoice_id, e);
                PaymentError::Transport(e.to_string())
            })?;

        let status = res.status();
        info!("Gateway create responded with status: {}", status);
        if !status.is_success() {
            return Err(PaymentError::GatewayRejected(format!(
                "gateway returned HTTP {}",
                status
            )));
        }

        let body = res
            .json::<CreateTransactionResponse>()
            .await
            .map_err(|e| PaymentError::MalformedResponse(e.to_string()))?;

        if body.status != GATEWAY_SUCCESS_CODE {
            return Err(PaymentError::GatewayRejected(format!(
                "status {}: {}",
                body.status, body.message
            )));
        }
        if body.token.is_empty() {
            return Err(PaymentError::MalformedResponse(
                "gateway reported success without a transaction token".to_string(),
            ));
        }

        Ok(format!("{}{}", self.redirect_base, body.token))
    }

    async fn verify_transaction(
        &self,
        amount: u64,
        transaction_id: &str,
    ) -> Result<VerifyOutcome, PaymentError> {
        let url = format!("{}/transaction/verify", self.endpoint);
        let request = VerifyTransactionRequest {
            pin: &self.pin,
            amount,
            transaction_id,
        };

        info!("Verifying gateway transaction {}", transaction_id);
        debug!("Gateway URL: {}", url);

        let res = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                error!(
                    "Gateway verify call failed for transaction {}: {}",
                    transaction_id, e
                );
                PaymentError::Transport(e.to_string())
            })?;

        let status = res.status();
        info!("Gateway verify responded with status: {}", status);
        // An HTTP-level failure here leaves the funds state unknown, which
        // is a transport problem, not a decline.
        if !status.is_success() {
            return Err(PaymentError::Transport(format!(
                "gateway returned HTTP {}",
                status
            )));
        }

        let body = res
            .json::<VerifyTransactionResponse>()
            .await
            .map_err(|e| PaymentError::MalformedResponse(e.to_string()))?;

        Ok(VerifyOutcome {
            success: body.status == GATEWAY_SUCCESS_CODE,
            code: body.status,
            message: body.message,
        })
    }
}
