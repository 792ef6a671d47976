use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

use crate::response::{ApiResponse, Meta};

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Not Found")]
    NotFound,

    /// Payment lookups conflate "missing" and "not yours" so non-owners
    /// learn nothing about other users' transactions.
    #[error("Not Found")]
    NotFoundOrUnauthorized,

    #[error("Bad Request {0}")]
    InvalidArgument(String),

    #[error("Cart is empty")]
    EmptyCart,

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Forbidden")]
    Forbidden,

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("{0}")]
    PaymentRejected(String),

    #[error("Payment provider unavailable, please try again later")]
    PaymentGateway(String),

    #[error("ORM error")]
    OrmError(#[from] sea_orm::DbErr),

    #[error("Internal Server Error")]
    Internal(#[from] anyhow::Error),
}

#[derive(Serialize)]
struct ErrorData {
    error: String,
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::NotFound | AppError::NotFoundOrUnauthorized => StatusCode::NOT_FOUND,
            AppError::InvalidArgument(_) | AppError::EmptyCart => StatusCode::BAD_REQUEST,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::PaymentRejected(_) => StatusCode::PAYMENT_REQUIRED,
            AppError::PaymentGateway(_) => StatusCode::BAD_GATEWAY,
            AppError::OrmError(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        match &self {
            AppError::OrmError(err) => tracing::error!(error = %err, "database failure"),
            AppError::Internal(err) => tracing::error!(error = %err, "internal failure"),
            AppError::PaymentGateway(detail) => {
                tracing::warn!(detail = %detail, "payment gateway failure")
            }
            _ => {}
        }

        let message = self.to_string();
        let body = ApiResponse {
            message: message.clone(),
            data: Some(ErrorData { error: message }),
            meta: Some(Meta::empty()),
        };

        (status, axum::Json(body)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ownership_failures_look_like_missing_records() {
        assert_eq!(
            AppError::NotFoundOrUnauthorized.to_string(),
            AppError::NotFound.to_string()
        );
        assert_eq!(
            AppError::NotFoundOrUnauthorized.status_code(),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn gateway_detail_is_not_exposed() {
        let err = AppError::PaymentGateway("upstream 503: pool exhausted".into());
        assert!(!err.to_string().contains("pool exhausted"));
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
    }
}
