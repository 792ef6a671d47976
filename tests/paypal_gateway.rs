use std::time::Duration;

use marketplace_checkout::{
    config::GatewayConfig,
    gateway::{CaptureOutcome, GatewayError, PayPalGateway, PaymentGateway},
};
use serde_json::json;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{body_partial_json, header, method, path},
};

async fn gateway_for(server: &MockServer) -> PayPalGateway {
    gateway_with_timeout(server, GatewayConfig::default().call_timeout).await
}

async fn gateway_with_timeout(server: &MockServer, call_timeout: Duration) -> PayPalGateway {
    Mock::given(method("POST"))
        .and(path("/v1/oauth2/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "A21AAF",
            "token_type": "Bearer",
            "expires_in": 32400
        })))
        .expect(1)
        .mount(server)
        .await;

    PayPalGateway::new(GatewayConfig {
        base_url: server.uri(),
        client_id: "client".into(),
        client_secret: "secret".into(),
        call_timeout,
        ..GatewayConfig::default()
    })
    .expect("build gateway")
}

#[tokio::test]
async fn create_intent_sends_amount_and_request_id() {
    let server = MockServer::start().await;
    let gateway = gateway_for(&server).await;

    Mock::given(method("POST"))
        .and(path("/v2/checkout/orders"))
        .and(header("authorization", "Bearer A21AAF"))
        .and(header("PayPal-Request-Id", "key-1"))
        .and(body_partial_json(json!({
            "intent": "CAPTURE",
            "purchase_units": [{ "amount": { "currency_code": "USD", "value": "19.99" } }]
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "id": "5O190127TN364715T",
            "status": "CREATED",
            "links": [
                { "href": "https://api.sandbox.paypal.com/v2/checkout/orders/5O190127TN364715T", "rel": "self" },
                { "href": "https://www.sandbox.paypal.com/checkoutnow?token=5O190127TN364715T", "rel": "approve" }
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let intent = gateway
        .create_intent(1999, "USD", Some("key-1"))
        .await
        .expect("create intent");

    assert_eq!(intent.transaction_id, "5O190127TN364715T");
    assert_eq!(intent.status, "CREATED");
    assert_eq!(
        intent.approve_url.as_deref(),
        Some("https://www.sandbox.paypal.com/checkoutnow?token=5O190127TN364715T")
    );
}

#[tokio::test]
async fn completed_capture_yields_capture_id_and_token_is_reused() {
    let server = MockServer::start().await;
    let gateway = gateway_for(&server).await;

    Mock::given(method("POST"))
        .and(path("/v2/checkout/orders/TX1/capture"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "id": "TX1",
            "status": "COMPLETED",
            "purchase_units": [{
                "payments": { "captures": [{ "id": "3C679366HH908993F", "status": "COMPLETED" }] }
            }]
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v2/checkout/orders/TX2/capture"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "id": "TX2",
            "status": "PAYER_ACTION_REQUIRED"
        })))
        .mount(&server)
        .await;

    let outcome = gateway.capture("TX1").await.expect("capture");
    assert_eq!(
        outcome,
        CaptureOutcome::Completed {
            capture_id: Some("3C679366HH908993F".into())
        }
    );

    let outcome = gateway.capture("TX2").await.expect("capture");
    assert_eq!(outcome, CaptureOutcome::Other("PAYER_ACTION_REQUIRED".into()));
}

#[tokio::test]
async fn capture_errors_are_classified() {
    let server = MockServer::start().await;
    let gateway = gateway_for(&server).await;

    Mock::given(method("POST"))
        .and(path("/v2/checkout/orders/DECLINED/capture"))
        .respond_with(ResponseTemplate::new(422).set_body_json(json!({
            "name": "UNPROCESSABLE_ENTITY",
            "message": "The requested action could not be performed.",
            "details": [{ "issue": "INSTRUMENT_DECLINED", "description": "The instrument presented was declined." }]
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v2/checkout/orders/BUSY/capture"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v2/checkout/orders/UNKNOWN/capture"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "name": "RESOURCE_NOT_FOUND",
            "message": "The specified resource does not exist."
        })))
        .mount(&server)
        .await;

    assert!(matches!(
        gateway.capture("DECLINED").await,
        Err(GatewayError::Rejected { code, .. }) if code == "INSTRUMENT_DECLINED"
    ));
    assert!(matches!(
        gateway.capture("BUSY").await,
        Err(GatewayError::Transient(_))
    ));
    assert!(matches!(
        gateway.capture("UNKNOWN").await,
        Err(GatewayError::Unexpected(_))
    ));
}

#[tokio::test]
async fn refund_and_void_hit_their_endpoints() {
    let server = MockServer::start().await;
    let gateway = gateway_for(&server).await;

    Mock::given(method("POST"))
        .and(path("/v2/payments/captures/CAP1/refund"))
        .and(body_partial_json(json!({
            "amount": { "value": "5.00", "currency_code": "EUR" }
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "id": "1JU08902781691411",
            "status": "COMPLETED"
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v2/checkout/orders/TX9/void"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let refund = gateway.refund("CAP1", 500, "EUR").await.expect("refund");
    assert_eq!(refund.refund_id, "1JU08902781691411");
    assert_eq!(refund.status, "COMPLETED");

    gateway.void("TX9").await.expect("void");
}

#[tokio::test]
async fn capture_after_a_lost_answer_is_read_back_from_the_order() {
    let server = MockServer::start().await;
    let gateway = gateway_with_timeout(&server, Duration::from_millis(300)).await;

    // first answer arrives too late; the retry finds the order captured
    Mock::given(method("POST"))
        .and(path("/v2/checkout/orders/TX9/capture"))
        .and(header("PayPal-Request-Id", "capture-TX9"))
        .respond_with(
            ResponseTemplate::new(201)
                .set_body_json(json!({ "id": "TX9", "status": "COMPLETED" }))
                .set_delay(Duration::from_secs(2)),
        )
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v2/checkout/orders/TX9/capture"))
        .and(header("PayPal-Request-Id", "capture-TX9"))
        .respond_with(ResponseTemplate::new(422).set_body_json(json!({
            "name": "UNPROCESSABLE_ENTITY",
            "message": "The requested action could not be performed.",
            "details": [{ "issue": "ORDER_ALREADY_CAPTURED", "description": "Order already captured." }]
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v2/checkout/orders/TX9"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "TX9",
            "status": "COMPLETED",
            "purchase_units": [{
                "payments": { "captures": [{ "id": "9LK21", "status": "COMPLETED" }] }
            }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    assert!(matches!(
        gateway.capture("TX9").await,
        Err(GatewayError::Transient(_))
    ));
    assert_eq!(
        gateway.capture("TX9").await,
        Err(GatewayError::AlreadyCaptured)
    );
    assert_eq!(
        gateway.capture_status("TX9").await,
        Ok(CaptureOutcome::Completed {
            capture_id: Some("9LK21".into())
        })
    );
}
