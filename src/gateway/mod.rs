//! Boundary to the external payment processor.
//!
//! The payment service only talks to [`PaymentGateway`]; the PayPal REST
//! client is one implementation and tests substitute scripted ones.

use async_trait::async_trait;
use thiserror::Error;

pub mod paypal;

pub use paypal::PayPalGateway;

/// Gateway failures, split by what the caller is allowed to do next.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    /// Timeouts, 5xx, throttling, connection resets. Safe to retry.
    #[error("transient gateway failure: {0}")]
    Transient(String),

    /// Policy or compliance denial. Retrying the same request will not help.
    #[error("gateway rejected the request: {code}")]
    Rejected { code: String, message: String },

    /// The gateway had already captured this transaction, typically on an
    /// earlier attempt whose answer never arrived. Look the capture up.
    #[error("transaction was already captured")]
    AlreadyCaptured,

    /// Anything else the gateway said that we do not know how to act on.
    #[error("unexpected gateway response: {0}")]
    Unexpected(String),
}

impl GatewayError {
    pub fn is_transient(&self) -> bool {
        matches!(self, GatewayError::Transient(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Intent {
    pub transaction_id: String,
    pub status: String,
    pub approve_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureOutcome {
    Completed { capture_id: Option<String> },
    /// The gateway answered but did not confirm the capture.
    Other(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Refund {
    pub refund_id: String,
    pub status: String,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_intent(
        &self,
        amount: i64,
        currency: &str,
        idempotency_key: Option<&str>,
    ) -> Result<Intent, GatewayError>;

    async fn capture(&self, transaction_id: &str) -> Result<CaptureOutcome, GatewayError>;

    /// Reads back where a transaction stands without changing it.
    async fn capture_status(
        &self,
        transaction_id: &str,
    ) -> Result<CaptureOutcome, GatewayError>;

    async fn refund(
        &self,
        capture_id: &str,
        amount: i64,
        currency: &str,
    ) -> Result<Refund, GatewayError>;

    async fn void(&self, transaction_id: &str) -> Result<(), GatewayError>;
}

/// Minor units to the gateway's decimal string, e.g. `1999` -> `"19.99"`.
pub fn format_amount(minor: i64) -> String {
    let sign = if minor < 0 { "-" } else { "" };
    let abs = minor.unsigned_abs();
    format!("{sign}{}.{:02}", abs / 100, abs % 100)
}
