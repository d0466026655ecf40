use axum::{
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;

use crate::response::ApiResponse;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Unauthenticated")]
    Unauthenticated,

    #[error("Forbidden")]
    Forbidden,

    #[error("Invalid {field}: {message}")]
    InvalidRequest { field: String, message: String },

    #[error("Not Found")]
    NotFound,

    #[error("Insufficient stock for {product}: {available} available, {requested} requested")]
    InsufficientStock {
        product: String,
        available: i32,
        requested: i32,
    },

    #[error("Invalid status: {0}")]
    InvalidStatus(String),

    #[error("Internal Server Error")]
    OrmError(#[from] sea_orm::DbErr),

    #[error("Internal Server Error")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        AppError::InvalidRequest {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Unauthenticated => StatusCode::UNAUTHORIZED,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::InsufficientStock { .. } => StatusCode::CONFLICT,
            AppError::InvalidStatus(_) => StatusCode::BAD_REQUEST,
            AppError::OrmError(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            AppError::Unauthenticated => "unauthenticated",
            AppError::Forbidden => "forbidden",
            AppError::InvalidRequest { .. } => "invalid_request",
            AppError::NotFound => "not_found",
            AppError::InsufficientStock { .. } => "insufficient_stock",
            AppError::InvalidStatus(_) => "invalid_status",
            AppError::OrmError(_) | AppError::Internal(_) => "internal",
        }
    }
}

/// Error detail rendered in the `data` slot of the response envelope.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorData {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub available: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requested: Option<i32>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let mut detail = ErrorData {
            error: self.code().to_string(),
            field: None,
            product: None,
            available: None,
            requested: None,
        };

        match &self {
            AppError::OrmError(err) => {
                tracing::error!(error = %err, "database failure");
            }
            AppError::Internal(err) => {
                tracing::error!(error = ?err, "internal failure");
            }
            AppError::InvalidRequest { field, .. } => {
                detail.field = Some(field.clone());
            }
            AppError::InsufficientStock {
                product,
                available,
                requested,
            } => {
                detail.product = Some(product.clone());
                detail.available = Some(*available);
                detail.requested = Some(*requested);
            }
            _ => {}
        }

        // Internal causes stay in the logs; the client only sees the display text.
        let body = ApiResponse::failure(self.to_string(), detail);
        (status, axum::Json(body)).into_response()
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::invalid("body", rejection.body_text())
    }
}

impl From<PathRejection> for AppError {
    fn from(rejection: PathRejection) -> Self {
        AppError::invalid("path", rejection.body_text())
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        AppError::invalid("query", rejection.body_text())
    }
}

pub type AppResult<T> = Result<T, AppError>;
