use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::models::Payment;

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreatePaymentRequest {
    /// Minor units (cents).
    pub amount: i64,
    pub currency: String,
    /// Repeating a key returns the payment created by the first request.
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CashOnDeliveryRequest {
    pub amount: i64,
    pub currency: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RefundPaymentRequest {
    pub amount: i64,
    pub currency: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CreatedPayment {
    pub payment: Payment,
    /// Where the payer approves the intent, when the gateway returned one.
    pub approve_url: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RefundReceipt {
    pub refund_id: String,
    pub status: String,
    pub payment: Payment,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PaymentList {
    pub items: Vec<Payment>,
}
