//! The `{message, data, meta}` envelope every endpoint answers with,
//! errors included.

use serde::Serialize;
use utoipa::ToSchema;

/// Paging details. Single-record answers leave every field out.
#[derive(Debug, Serialize, ToSchema, Clone)]
pub struct Meta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub per_page: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<i64>,
}

impl Meta {
    pub fn new(page: i64, per_page: i64, total: i64) -> Self {
        Self {
            page: Some(page),
            per_page: Some(per_page),
            total: Some(total),
        }
    }

    pub fn empty() -> Self {
        Self {
            page: None,
            per_page: None,
            total: None,
        }
    }

    /// An unpaginated list: everything on page one.
    pub fn all(total: usize) -> Self {
        let total = i64::try_from(total).unwrap_or(i64::MAX);
        Self::new(1, total, total)
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ApiResponse<T> {
    pub message: String,
    pub data: Option<T>,
    pub meta: Option<Meta>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(message: impl Into<String>, data: T, meta: Option<Meta>) -> Self {
        Self {
            message: message.into(),
            data: Some(data),
            meta,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_meta_serializes_without_paging_fields() {
        let body = serde_json::to_value(ApiResponse::success("OK", 1, Some(Meta::empty())))
            .expect("serialize");
        assert_eq!(body, serde_json::json!({ "message": "OK", "data": 1, "meta": {} }));
    }

    #[test]
    fn full_lists_report_a_single_page() {
        let meta = Meta::all(3);
        assert_eq!((meta.page, meta.per_page, meta.total), (Some(1), Some(3), Some(3)));
    }
}
