use axum::Json;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub page: i64,
    pub limit: i64,
    pub total_count: i64,
    pub total_pages: i64,
}

impl Pagination {
    /// `limit == -1` 表示一次返回全部
    pub fn new(page: i64, limit: i64, total_count: i64) -> Self {
        let total_pages = if limit <= 0 {
            1
        } else {
            (total_count + limit - 1) / limit
        };
        Self {
            page,
            limit,
            total_count,
            total_pages,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pagination: Option<Pagination>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            message: None,
            data: Some(data),
            pagination: None,
        }
    }

    pub fn with_message(mut self, message: &str) -> Self {
        self.message = Some(message.to_string());
        self
    }

    pub fn with_pagination(mut self, pagination: Pagination) -> Self {
        self.pagination = Some(pagination);
        self
    }
}

pub fn success_to_api_response<T: Serialize>(data: T) -> Json<ApiResponse<T>> {
    Json(ApiResponse::success(data))
}

pub fn message_to_api_response(message: &str) -> Json<ApiResponse<()>> {
    Json(ApiResponse {
        success: true,
        message: Some(message.to_string()),
        data: None,
        pagination: None,
    })
}
