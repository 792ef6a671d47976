use axum::{
    Json, Router,
    extract::{Path, Query, State},
    middleware::from_fn_with_state,
    routing::{get, patch, post},
};
use serde_json::json;
use uuid::Uuid;

use crate::{
    dto::orders::{CheckoutRequest, CompleteOrderRequest, OrderList, UpdateOrderStatusRequest},
    error::{AppError, AppResult},
    middleware::auth::{ADMIN_ONLY, ANY_ROLE, AuthUser, Role, RoleGuard, SELLER_OR_ADMIN, require_roles},
    models::{Order, OrderWithItems},
    response::{ApiResponse, Meta},
    routes::params::{MyOrdersQuery, OrderListQuery, RecentOrdersQuery, SortOrder},
    state::AppState,
};

pub fn router() -> Router<AppState> {
    let customer = Router::new()
        .route("/checkout", post(checkout))
        .route("/initiate", post(initiate))
        .route("/mine", get(my_orders))
        .route("/mine/active", get(my_active_orders))
        .route("/{id}", get(get_order).delete(delete_order))
        .route("/{id}/complete", patch(complete_order))
        .route("/{id}/cancel", patch(cancel_order))
        .route_layer(from_fn_with_state(RoleGuard(ANY_ROLE), require_roles));

    let fulfilment = Router::new()
        .route("/{id}/status", patch(update_order_status))
        .route_layer(from_fn_with_state(RoleGuard(SELLER_OR_ADMIN), require_roles));

    let admin = Router::new()
        .route("/", get(list_orders))
        .route("/recent", get(recent_orders))
        .route_layer(from_fn_with_state(RoleGuard(ADMIN_ONLY), require_roles));

    customer.merge(fulfilment).merge(admin)
}

#[utoipa::path(
    post,
    path = "/api/orders/checkout",
    request_body = CheckoutRequest,
    responses(
        (status = 200, description = "Cart turned into a pending order", body = ApiResponse<OrderWithItems>),
        (status = 400, description = "Cart is empty"),
    ),
    security(("bearer_auth" = [])),
    tag = "Orders"
)]
pub async fn checkout(
    State(state): State<AppState>,
    user: AuthUser,
    payload: Option<Json<CheckoutRequest>>,
) -> AppResult<Json<ApiResponse<OrderWithItems>>> {
    let Json(payload) = payload.unwrap_or_default();
    let order = state
        .checkout
        .checkout(user.user_id, payload.shipping_address)
        .await?;
    Ok(Json(ApiResponse::success(
        "Checkout success",
        order,
        Some(Meta::empty()),
    )))
}

#[utoipa::path(
    post,
    path = "/api/orders/initiate",
    responses(
        (status = 200, description = "Pending order opened, cart kept", body = ApiResponse<OrderWithItems>),
        (status = 400, description = "Cart is empty"),
    ),
    security(("bearer_auth" = [])),
    tag = "Orders"
)]
pub async fn initiate(
    State(state): State<AppState>,
    user: AuthUser,
) -> AppResult<Json<ApiResponse<OrderWithItems>>> {
    let order = state.checkout.initiate(user.user_id).await?;
    Ok(Json(ApiResponse::success(
        "Order initiated",
        order,
        Some(Meta::empty()),
    )))
}

#[utoipa::path(
    patch,
    path = "/api/orders/{id}/complete",
    params(("id" = Uuid, Path, description = "Order id")),
    request_body = CompleteOrderRequest,
    responses(
        (status = 200, description = "Order completed", body = ApiResponse<Order>),
        (status = 404, description = "Order or payment not found"),
        (status = 409, description = "Order is not pending"),
    ),
    security(("bearer_auth" = [])),
    tag = "Orders"
)]
pub async fn complete_order(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<CompleteOrderRequest>,
) -> AppResult<Json<ApiResponse<Order>>> {
    let order = state
        .checkout
        .complete_order(id, user.user_id, &payload.shipping_address, payload.payment_id)
        .await?;
    Ok(Json(ApiResponse::success(
        "Order completed",
        order,
        Some(Meta::empty()),
    )))
}

#[utoipa::path(
    get,
    path = "/api/orders/mine",
    params(MyOrdersQuery),
    responses(
        (status = 200, description = "Caller's orders, newest first", body = ApiResponse<OrderList>)
    ),
    security(("bearer_auth" = [])),
    tag = "Orders"
)]
pub async fn my_orders(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<MyOrdersQuery>,
) -> AppResult<Json<ApiResponse<OrderList>>> {
    let items = state.orders.find_by_user(user.user_id, query.status).await?;
    let meta = Meta::all(items.len());
    Ok(Json(ApiResponse::success(
        "Ok",
        OrderList { items },
        Some(meta),
    )))
}

#[utoipa::path(
    get,
    path = "/api/orders/mine/active",
    responses(
        (status = 200, description = "Caller's orders that are not cancelled", body = ApiResponse<OrderList>)
    ),
    security(("bearer_auth" = [])),
    tag = "Orders"
)]
pub async fn my_active_orders(
    State(state): State<AppState>,
    user: AuthUser,
) -> AppResult<Json<ApiResponse<OrderList>>> {
    let items = state.orders.find_active_by_user(user.user_id).await?;
    let meta = Meta::all(items.len());
    Ok(Json(ApiResponse::success(
        "Ok",
        OrderList { items },
        Some(meta),
    )))
}

#[utoipa::path(
    get,
    path = "/api/orders/{id}",
    params(("id" = Uuid, Path, description = "Order id")),
    responses(
        (status = 200, description = "Order with items", body = ApiResponse<OrderWithItems>),
        (status = 404, description = "Not Found"),
    ),
    security(("bearer_auth" = [])),
    tag = "Orders"
)]
pub async fn get_order(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<OrderWithItems>>> {
    // plain users only see their own orders; anything else reads as missing
    let order = state
        .orders
        .find_by_id(id)
        .await?
        .filter(|found| user.role != Role::User || found.order.user_id == user.user_id)
        .ok_or(AppError::NotFound)?;
    Ok(Json(ApiResponse::success("OK", order, Some(Meta::empty()))))
}

#[utoipa::path(
    patch,
    path = "/api/orders/{id}/cancel",
    params(("id" = Uuid, Path, description = "Order id")),
    responses(
        (status = 200, description = "Order cancelled", body = ApiResponse<Order>),
        (status = 403, description = "Forbidden"),
        (status = 409, description = "Order can no longer be cancelled"),
    ),
    security(("bearer_auth" = [])),
    tag = "Orders"
)]
pub async fn cancel_order(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<Order>>> {
    let order = state.checkout.cancel_order(id, &user).await?;
    Ok(Json(ApiResponse::success(
        "Order cancelled",
        order,
        Some(Meta::empty()),
    )))
}

#[utoipa::path(
    delete,
    path = "/api/orders/{id}",
    params(("id" = Uuid, Path, description = "Order id")),
    responses(
        (status = 200, description = "Order deleted"),
        (status = 403, description = "Forbidden"),
        (status = 409, description = "Order has a captured payment"),
    ),
    security(("bearer_auth" = [])),
    tag = "Orders"
)]
pub async fn delete_order(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<serde_json::Value>>> {
    state.checkout.delete_order(id, &user).await?;
    Ok(Json(ApiResponse::success(
        "Order deleted",
        json!({ "id": id }),
        Some(Meta::empty()),
    )))
}

#[utoipa::path(
    get,
    path = "/api/orders",
    params(
        ("page" = Option<i64>, Query, description = "Page number, default 1"),
        ("per_page" = Option<i64>, Query, description = "Items per page, default 20"),
        ("status" = Option<String>, Query, description = "Filter by status"),
        ("sort_order" = Option<String>, Query, description = "Sort order: asc, desc")
    ),
    responses(
        (status = 200, description = "All orders (admin only)", body = ApiResponse<OrderList>),
        (status = 403, description = "Forbidden"),
    ),
    security(("bearer_auth" = [])),
    tag = "Admin"
)]
pub async fn list_orders(
    State(state): State<AppState>,
    Query(query): Query<OrderListQuery>,
) -> AppResult<Json<ApiResponse<OrderList>>> {
    let (page, limit, offset) = query.pagination().normalize();
    let newest_first = query.sort_order.unwrap_or_default() == SortOrder::Desc;
    let (items, total) = state
        .orders
        .page(query.status, limit as u64, offset as u64, newest_first)
        .await?;

    let meta = Meta::new(page, limit, total as i64);
    Ok(Json(ApiResponse::success(
        "Ok",
        OrderList { items },
        Some(meta),
    )))
}

#[utoipa::path(
    get,
    path = "/api/orders/recent",
    params(RecentOrdersQuery),
    responses(
        (status = 200, description = "Newest orders (admin only)", body = ApiResponse<OrderList>),
        (status = 403, description = "Forbidden"),
    ),
    security(("bearer_auth" = [])),
    tag = "Admin"
)]
pub async fn recent_orders(
    State(state): State<AppState>,
    Query(query): Query<RecentOrdersQuery>,
) -> AppResult<Json<ApiResponse<OrderList>>> {
    let items = state.orders.find_recent(query.limit).await?;
    let meta = Meta::all(items.len());
    Ok(Json(ApiResponse::success(
        "Ok",
        OrderList { items },
        Some(meta),
    )))
}

#[utoipa::path(
    patch,
    path = "/api/orders/{id}/status",
    params(("id" = Uuid, Path, description = "Order id")),
    request_body = UpdateOrderStatusRequest,
    responses(
        (status = 200, description = "Status changed", body = ApiResponse<Order>),
        (status = 403, description = "Forbidden"),
        (status = 409, description = "Transition not allowed from the current status"),
    ),
    security(("bearer_auth" = [])),
    tag = "Orders"
)]
pub async fn update_order_status(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateOrderStatusRequest>,
) -> AppResult<Json<ApiResponse<Order>>> {
    let order = state
        .orders
        .update_status(id, payload.status, &user)
        .await?;
    Ok(Json(ApiResponse::success(
        "Order status updated",
        order,
        Some(Meta::empty()),
    )))
}
