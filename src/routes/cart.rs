use axum::{
    Json, Router,
    extract::{Path, State},
    middleware::from_fn_with_state,
    routing::{get, patch, post},
};
use serde_json::json;
use uuid::Uuid;

use crate::{
    dto::cart::{AddToCartRequest, SetQuantityRequest},
    error::AppResult,
    middleware::auth::{ANY_ROLE, AuthUser, RoleGuard, require_roles},
    models::Cart,
    response::{ApiResponse, Meta},
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(get_cart).delete(clear_cart))
        .route("/items", post(add_item))
        .route(
            "/items/{product_id}",
            patch(set_item_quantity).delete(remove_item),
        )
        .route_layer(from_fn_with_state(RoleGuard(ANY_ROLE), require_roles))
}

#[utoipa::path(
    get,
    path = "/api/cart",
    responses(
        (status = 200, description = "Current cart, created empty on first access", body = ApiResponse<Cart>)
    ),
    security(("bearer_auth" = [])),
    tag = "Cart"
)]
pub async fn get_cart(
    State(state): State<AppState>,
    user: AuthUser,
) -> AppResult<Json<ApiResponse<Cart>>> {
    let cart = state.carts.get_or_create(user.user_id).await?;
    Ok(Json(ApiResponse::success("OK", cart, Some(Meta::empty()))))
}

#[utoipa::path(
    post,
    path = "/api/cart/items",
    request_body = AddToCartRequest,
    responses(
        (status = 200, description = "Item added, quantity accumulates", body = ApiResponse<Cart>),
        (status = 400, description = "Bad request"),
        (status = 404, description = "Product not found"),
    ),
    security(("bearer_auth" = [])),
    tag = "Cart"
)]
pub async fn add_item(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<AddToCartRequest>,
) -> AppResult<Json<ApiResponse<Cart>>> {
    let cart = state
        .carts
        .add_item(user.user_id, payload.product_id, payload.quantity)
        .await?;
    Ok(Json(ApiResponse::success(
        "Item added to cart",
        cart,
        Some(Meta::empty()),
    )))
}

#[utoipa::path(
    patch,
    path = "/api/cart/items/{product_id}",
    params(("product_id" = Uuid, Path, description = "Product id")),
    request_body = SetQuantityRequest,
    responses(
        (status = 200, description = "Quantity set", body = ApiResponse<Cart>),
        (status = 400, description = "Bad request"),
        (status = 404, description = "Cart, line or product not found"),
    ),
    security(("bearer_auth" = [])),
    tag = "Cart"
)]
pub async fn set_item_quantity(
    State(state): State<AppState>,
    user: AuthUser,
    Path(product_id): Path<Uuid>,
    Json(payload): Json<SetQuantityRequest>,
) -> AppResult<Json<ApiResponse<Cart>>> {
    let cart = state
        .carts
        .set_item_quantity(user.user_id, product_id, payload.quantity)
        .await?;
    Ok(Json(ApiResponse::success(
        "Cart updated",
        cart,
        Some(Meta::empty()),
    )))
}

#[utoipa::path(
    delete,
    path = "/api/cart/items/{product_id}",
    params(("product_id" = Uuid, Path, description = "Product id")),
    responses(
        (status = 200, description = "Item removed if present", body = ApiResponse<Cart>),
    ),
    security(("bearer_auth" = [])),
    tag = "Cart"
)]
pub async fn remove_item(
    State(state): State<AppState>,
    user: AuthUser,
    Path(product_id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<Cart>>> {
    let cart = state.carts.remove_item(user.user_id, product_id).await?;
    Ok(Json(ApiResponse::success(
        "Item removed from cart",
        cart,
        Some(Meta::empty()),
    )))
}

#[utoipa::path(
    delete,
    path = "/api/cart",
    responses(
        (status = 200, description = "Cart cleared"),
    ),
    security(("bearer_auth" = [])),
    tag = "Cart"
)]
pub async fn clear_cart(
    State(state): State<AppState>,
    user: AuthUser,
) -> AppResult<Json<ApiResponse<serde_json::Value>>> {
    let cleared = state.carts.clear(user.user_id).await?;
    Ok(Json(ApiResponse::success(
        "Cart cleared",
        json!({ "cleared": cleared }),
        Some(Meta::empty()),
    )))
}
