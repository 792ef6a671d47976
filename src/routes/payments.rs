use axum::{
    Json, Router,
    extract::{Path, State},
    middleware::from_fn_with_state,
    routing::{get, post},
};
use uuid::Uuid;

use crate::{
    dto::payments::{
        CashOnDeliveryRequest, CreatePaymentRequest, CreatedPayment, PaymentList,
        RefundPaymentRequest, RefundReceipt,
    },
    error::AppResult,
    middleware::auth::{ADMIN_ONLY, ANY_ROLE, AuthUser, RoleGuard, require_roles},
    models::Payment,
    response::{ApiResponse, Meta},
    state::AppState,
};

/// Capture and cancel take the gateway transaction id in the `{id}` slot;
/// the router needs one parameter name per position.
pub fn router() -> Router<AppState> {
    let payer = Router::new()
        .route("/", post(create_payment))
        .route("/cash-on-delivery", post(cash_on_delivery))
        .route("/history", get(payment_history))
        .route("/{id}", get(payment_status))
        .route("/{id}/capture", post(capture_payment))
        .route("/{id}/cancel", post(cancel_payment))
        .route_layer(from_fn_with_state(RoleGuard(ANY_ROLE), require_roles));

    let admin = Router::new()
        .route("/{id}/refund", post(refund_payment))
        .route("/{id}/mark-refunded", post(mark_refunded))
        .route_layer(from_fn_with_state(RoleGuard(ADMIN_ONLY), require_roles));

    payer.merge(admin)
}

#[utoipa::path(
    post,
    path = "/api/payments",
    request_body = CreatePaymentRequest,
    responses(
        (status = 200, description = "Payment intent created", body = ApiResponse<CreatedPayment>),
        (status = 400, description = "Bad request"),
        (status = 402, description = "Payment rejected"),
        (status = 502, description = "Payment provider unavailable"),
    ),
    security(("bearer_auth" = [])),
    tag = "Payments"
)]
pub async fn create_payment(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<CreatePaymentRequest>,
) -> AppResult<Json<ApiResponse<CreatedPayment>>> {
    let created = state
        .payments
        .create(
            user.user_id,
            payload.amount,
            &payload.currency,
            payload.idempotency_key,
        )
        .await?;
    Ok(Json(ApiResponse::success(
        "Payment created",
        created,
        Some(Meta::empty()),
    )))
}

#[utoipa::path(
    post,
    path = "/api/payments/cash-on-delivery",
    request_body = CashOnDeliveryRequest,
    responses(
        (status = 200, description = "Cash on delivery payment recorded", body = ApiResponse<Payment>),
        (status = 400, description = "Bad request"),
    ),
    security(("bearer_auth" = [])),
    tag = "Payments"
)]
pub async fn cash_on_delivery(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<CashOnDeliveryRequest>,
) -> AppResult<Json<ApiResponse<Payment>>> {
    let payment = state
        .payments
        .cash_on_delivery(user.user_id, payload.amount, &payload.currency)
        .await?;
    Ok(Json(ApiResponse::success(
        "Payment created",
        payment,
        Some(Meta::empty()),
    )))
}

#[utoipa::path(
    post,
    path = "/api/payments/{id}/capture",
    params(("id" = String, Path, description = "Gateway transaction id")),
    responses(
        (status = 200, description = "Payment captured", body = ApiResponse<Payment>),
        (status = 402, description = "Payment rejected"),
        (status = 404, description = "Not Found"),
        (status = 409, description = "Already captured or capture in progress"),
        (status = 502, description = "Payment provider unavailable"),
    ),
    security(("bearer_auth" = [])),
    tag = "Payments"
)]
pub async fn capture_payment(
    State(state): State<AppState>,
    user: AuthUser,
    Path(transaction_id): Path<String>,
) -> AppResult<Json<ApiResponse<Payment>>> {
    let payment = state
        .payments
        .capture(&transaction_id, user.user_id)
        .await?;
    Ok(Json(ApiResponse::success(
        "Payment captured",
        payment,
        Some(Meta::empty()),
    )))
}

#[utoipa::path(
    post,
    path = "/api/payments/{id}/cancel",
    params(("id" = String, Path, description = "Gateway transaction id")),
    responses(
        (status = 200, description = "Payment voided", body = ApiResponse<Payment>),
        (status = 404, description = "Not Found"),
        (status = 409, description = "Payment is not pending"),
    ),
    security(("bearer_auth" = [])),
    tag = "Payments"
)]
pub async fn cancel_payment(
    State(state): State<AppState>,
    user: AuthUser,
    Path(transaction_id): Path<String>,
) -> AppResult<Json<ApiResponse<Payment>>> {
    let payment = state
        .payments
        .cancel(&transaction_id, user.user_id)
        .await?;
    Ok(Json(ApiResponse::success(
        "Payment cancelled",
        payment,
        Some(Meta::empty()),
    )))
}

#[utoipa::path(
    get,
    path = "/api/payments/history",
    responses(
        (status = 200, description = "Caller's payments, newest first", body = ApiResponse<PaymentList>)
    ),
    security(("bearer_auth" = [])),
    tag = "Payments"
)]
pub async fn payment_history(
    State(state): State<AppState>,
    user: AuthUser,
) -> AppResult<Json<ApiResponse<PaymentList>>> {
    let items = state.payments.history(user.user_id).await?;
    let meta = Meta::all(items.len());
    Ok(Json(ApiResponse::success(
        "Ok",
        PaymentList { items },
        Some(meta),
    )))
}

#[utoipa::path(
    get,
    path = "/api/payments/{id}",
    params(("id" = Uuid, Path, description = "Payment id")),
    responses(
        (status = 200, description = "Payment", body = ApiResponse<Payment>),
        (status = 404, description = "Not Found"),
    ),
    security(("bearer_auth" = [])),
    tag = "Payments"
)]
pub async fn payment_status(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<Payment>>> {
    let payment = state.payments.status(id, user.user_id).await?;
    Ok(Json(ApiResponse::success("OK", payment, Some(Meta::empty()))))
}

#[utoipa::path(
    post,
    path = "/api/payments/{id}/refund",
    params(("id" = Uuid, Path, description = "Payment id")),
    request_body = RefundPaymentRequest,
    responses(
        (status = 200, description = "Refund issued", body = ApiResponse<RefundReceipt>),
        (status = 400, description = "Bad request"),
        (status = 403, description = "Forbidden"),
        (status = 409, description = "Payment is not captured"),
    ),
    security(("bearer_auth" = [])),
    tag = "Admin"
)]
pub async fn refund_payment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<RefundPaymentRequest>,
) -> AppResult<Json<ApiResponse<RefundReceipt>>> {
    let receipt = state
        .payments
        .refund(id, payload.amount, &payload.currency)
        .await?;
    Ok(Json(ApiResponse::success(
        "Refund issued",
        receipt,
        Some(Meta::empty()),
    )))
}

#[utoipa::path(
    post,
    path = "/api/payments/{id}/mark-refunded",
    params(("id" = Uuid, Path, description = "Payment id")),
    responses(
        (status = 200, description = "Payment marked refunded", body = ApiResponse<Payment>),
        (status = 403, description = "Forbidden"),
        (status = 409, description = "Payment is not captured"),
    ),
    security(("bearer_auth" = [])),
    tag = "Admin"
)]
pub async fn mark_refunded(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<Payment>>> {
    let payment = state.payments.mark_refunded(id).await?;
    Ok(Json(ApiResponse::success(
        "Payment marked refunded",
        payment,
        Some(Meta::empty()),
    )))
}
