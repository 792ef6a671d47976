use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, de::DeserializeOwned};
use serde_json::json;
use tokio::sync::Mutex;
use tracing::instrument;

use super::{CaptureOutcome, GatewayError, Intent, PaymentGateway, Refund, format_amount};
use crate::config::GatewayConfig;

/// Issues PayPal reports for requests that will never succeed as sent.
const REJECTION_ISSUES: &[&str] = &[
    "INSTRUMENT_DECLINED",
    "PAYER_ACTION_REQUIRED",
    "COMPLIANCE_VIOLATION",
    "TRANSACTION_REFUSED",
    "PAYER_CANNOT_PAY",
    "PAYEE_ACCOUNT_RESTRICTED",
    "MAX_NUMBER_OF_PAYMENT_ATTEMPTS_EXCEEDED",
];

/// PayPal's answer to capturing an order a second time.
const ALREADY_CAPTURED_ISSUE: &str = "ORDER_ALREADY_CAPTURED";

const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);

struct CachedToken {
    value: String,
    expires_at: Instant,
}

/// PayPal Orders v2 client.
pub struct PayPalGateway {
    http: Client,
    config: GatewayConfig,
    token: Mutex<Option<CachedToken>>,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Deserialize)]
struct Link {
    href: String,
    rel: String,
}

#[derive(Deserialize)]
struct OrderResponse {
    id: String,
    status: String,
    #[serde(default)]
    links: Vec<Link>,
    #[serde(default)]
    purchase_units: Vec<PurchaseUnit>,
}

impl OrderResponse {
    fn into_capture_outcome(self) -> CaptureOutcome {
        if self.status != "COMPLETED" {
            return CaptureOutcome::Other(self.status);
        }
        let capture_id = self
            .purchase_units
            .into_iter()
            .filter_map(|unit| unit.payments)
            .flat_map(|payments| payments.captures)
            .map(|capture| capture.id)
            .next();
        CaptureOutcome::Completed { capture_id }
    }
}

#[derive(Deserialize)]
struct PurchaseUnit {
    payments: Option<UnitPayments>,
}

#[derive(Deserialize)]
struct UnitPayments {
    #[serde(default)]
    captures: Vec<CaptureResponse>,
}

#[derive(Deserialize)]
struct CaptureResponse {
    id: String,
}

#[derive(Deserialize)]
struct RefundResponse {
    id: String,
    status: String,
}

#[derive(Deserialize, Default)]
struct ErrorBody {
    #[serde(default)]
    name: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    details: Vec<ErrorDetail>,
}

#[derive(Deserialize)]
struct ErrorDetail {
    issue: String,
    #[serde(default)]
    description: String,
}

impl PayPalGateway {
    pub fn new(config: GatewayConfig) -> Result<Self, GatewayError> {
        let http = Client::builder()
            .timeout(config.call_timeout)
            .connect_timeout(config.call_timeout)
            .build()
            .map_err(|e| GatewayError::Unexpected(format!("http client: {e}")))?;
        Ok(Self {
            http,
            config,
            token: Mutex::new(None),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn access_token(&self) -> Result<String, GatewayError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.expires_at > Instant::now() {
                return Ok(token.value.clone());
            }
        }

        let request = self
            .http
            .post(self.url("/v1/oauth2/token"))
            .basic_auth(&self.config.client_id, Some(&self.config.client_secret))
            .form(&[("grant_type", "client_credentials")]);
        let response: TokenResponse = self.execute(request).await?;

        let lifetime = Duration::from_secs(response.expires_in).saturating_sub(TOKEN_REFRESH_MARGIN);
        *cached = Some(CachedToken {
            value: response.access_token.clone(),
            expires_at: Instant::now() + lifetime,
        });
        Ok(response.access_token)
    }

    /// Sends an authenticated call. A 401 drops the cached token so the next
    /// attempt fetches a fresh one.
    async fn call<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, GatewayError> {
        let token = self.access_token().await?;
        let (status, body) = send(request.bearer_auth(token)).await?;
        if status == StatusCode::UNAUTHORIZED {
            *self.token.lock().await = None;
        }
        decode(status, &body)
    }

    async fn execute<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, GatewayError> {
        let (status, body) = send(request).await?;
        decode(status, &body)
    }
}

async fn send(request: RequestBuilder) -> Result<(StatusCode, String), GatewayError> {
    let response = request.send().await.map_err(transport_error)?;
    let status = response.status();
    let body = response.text().await.map_err(transport_error)?;
    Ok((status, body))
}

fn decode<T: DeserializeOwned>(status: StatusCode, body: &str) -> Result<T, GatewayError> {
    if !status.is_success() {
        return Err(classify(status, body));
    }
    // void answers 204 with no body
    let body = if body.trim().is_empty() { "null" } else { body };
    serde_json::from_str(body)
        .map_err(|e| GatewayError::Unexpected(format!("undecodable body ({status}): {e}")))
}

fn transport_error(err: reqwest::Error) -> GatewayError {
    if err.is_timeout() || err.is_connect() || err.is_request() || err.is_body() {
        GatewayError::Transient(err.to_string())
    } else {
        GatewayError::Unexpected(err.to_string())
    }
}

/// Sort a non-2xx answer into retryable, rejected or unknown.
pub(crate) fn classify(status: StatusCode, body: &str) -> GatewayError {
    if status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::UNAUTHORIZED
    {
        return GatewayError::Transient(format!("http {status}"));
    }

    let parsed: ErrorBody = serde_json::from_str(body).unwrap_or_default();
    if parsed
        .details
        .iter()
        .any(|d| d.issue == ALREADY_CAPTURED_ISSUE)
    {
        return GatewayError::AlreadyCaptured;
    }
    if let Some(detail) = parsed
        .details
        .iter()
        .find(|d| REJECTION_ISSUES.contains(&d.issue.as_str()))
    {
        return GatewayError::Rejected {
            code: detail.issue.clone(),
            message: detail.description.clone(),
        };
    }

    let name = if parsed.name.is_empty() {
        status.to_string()
    } else {
        parsed.name
    };
    GatewayError::Unexpected(format!("{name}: {}", parsed.message))
}

#[async_trait]
impl PaymentGateway for PayPalGateway {
    #[instrument(skip(self, idempotency_key))]
    async fn create_intent(
        &self,
        amount: i64,
        currency: &str,
        idempotency_key: Option<&str>,
    ) -> Result<Intent, GatewayError> {
        let body = json!({
            "intent": "CAPTURE",
            "purchase_units": [{
                "amount": {
                    "currency_code": currency,
                    "value": format_amount(amount),
                }
            }]
        });
        let mut request = self.http.post(self.url("/v2/checkout/orders")).json(&body);
        if let Some(key) = idempotency_key {
            request = request.header("PayPal-Request-Id", key);
        }

        let order: OrderResponse = self.call(request).await?;
        let approve_url = order
            .links
            .into_iter()
            .find(|link| link.rel == "approve" || link.rel == "payer-action")
            .map(|link| link.href);

        Ok(Intent {
            transaction_id: order.id,
            status: order.status,
            approve_url,
        })
    }

    /// The request id is derived from the transaction, so a retry after a
    /// lost answer replays the first result instead of capturing again.
    #[instrument(skip(self))]
    async fn capture(&self, transaction_id: &str) -> Result<CaptureOutcome, GatewayError> {
        let request = self
            .http
            .post(self.url(&format!("/v2/checkout/orders/{transaction_id}/capture")))
            .header("PayPal-Request-Id", format!("capture-{transaction_id}"))
            .json(&json!({}));
        let order: OrderResponse = self.call(request).await?;
        Ok(order.into_capture_outcome())
    }

    #[instrument(skip(self))]
    async fn capture_status(
        &self,
        transaction_id: &str,
    ) -> Result<CaptureOutcome, GatewayError> {
        let request = self
            .http
            .get(self.url(&format!("/v2/checkout/orders/{transaction_id}")));
        let order: OrderResponse = self.call(request).await?;
        Ok(order.into_capture_outcome())
    }

    #[instrument(skip(self))]
    async fn refund(
        &self,
        capture_id: &str,
        amount: i64,
        currency: &str,
    ) -> Result<Refund, GatewayError> {
        let body = json!({
            "amount": {
                "value": format_amount(amount),
                "currency_code": currency,
            }
        });
        let request = self
            .http
            .post(self.url(&format!("/v2/payments/captures/{capture_id}/refund")))
            .json(&body);
        let refund: RefundResponse = self.call(request).await?;
        Ok(Refund {
            refund_id: refund.id,
            status: refund.status,
        })
    }

    #[instrument(skip(self))]
    async fn void(&self, transaction_id: &str) -> Result<(), GatewayError> {
        let request = self
            .http
            .post(self.url(&format!("/v2/checkout/orders/{transaction_id}/void")))
            .json(&json!({}));
        let _: serde_json::Value = self.call(request).await?;
        Ok(())
    }
}
