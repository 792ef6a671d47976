use axum::{Router, middleware::from_fn_with_state};

use crate::{middleware::auth::authenticate, state::AppState};

pub mod auth;
pub mod cart;
pub mod doc;
pub mod health;
pub mod orders;
pub mod params;
pub mod payments;

/// Everything under `/api`. Only `/auth` is reachable without a bearer token;
/// each protected group adds its own role set on top.
pub fn create_api_router(state: AppState) -> Router<AppState> {
    let protected = Router::new()
        .nest("/cart", cart::router())
        .nest("/orders", orders::router())
        .nest("/payments", payments::router())
        .route_layer(from_fn_with_state(state, authenticate));

    Router::new().nest("/auth", auth::router()).merge(protected)
}
