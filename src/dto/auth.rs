use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// New accounts always start with the `user` role.
#[derive(Deserialize, Debug, ToSchema)]
pub struct RegisterRequest {
    /// Stored trimmed and lower-cased; must be unique.
    pub email: String,
    /// At least 8 characters.
    pub password: String,
}

#[derive(Deserialize, Debug, ToSchema)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Send back as `Authorization: <token_type> <token>`.
#[derive(Debug, Serialize, ToSchema)]
pub struct LoginResponse {
    pub token: String,
    pub token_type: String,
    /// Seconds until the token stops being accepted.
    pub expires_in: i64,
}
