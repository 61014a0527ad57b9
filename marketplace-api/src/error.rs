use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel_async::pooled_connection::PoolError;
use serde::Serialize;
use thiserror::Error;

/// Reasons an order line cannot be reserved. Raised inside the order
/// transaction, which is rolled back before the error leaves the service.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InventoryError {
    #[error("product {product_id} not found")]
    ProductNotFound { product_id: i32 },

    #[error("product {product_id} is not active")]
    ProductInactive { product_id: i32 },

    #[error(
        "insufficient stock for product {product_id}: requested {requested}, available {available} (short by {})",
        .requested - .available
    )]
    InsufficientStock {
        product_id: i32,
        requested: i32,
        available: i32,
    },
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Inventory(#[from] InventoryError),

    #[error("authentication required")]
    Unauthorized,

    #[error("invalid email or password")]
    InvalidCredentials,

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("database error: {0}")]
    Database(DieselError),

    #[error("connection pool error: {0}")]
    Pool(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: &'static str,
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) | AppError::Inventory(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized | AppError::InvalidCredentials => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Database(_) | AppError::Pool(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "VALIDATION_FAILED",
            AppError::Inventory(InventoryError::ProductNotFound { .. }) => "PRODUCT_NOT_FOUND",
            AppError::Inventory(InventoryError::ProductInactive { .. }) => "PRODUCT_INACTIVE",
            AppError::Inventory(InventoryError::InsufficientStock { .. }) => "INSUFFICIENT_STOCK",
            AppError::Unauthorized => "UNAUTHORIZED",
            AppError::InvalidCredentials => "INVALID_CREDENTIALS",
            AppError::Forbidden(_) => "FORBIDDEN",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Conflict(_) => "CONFLICT",
            AppError::Database(_) | AppError::Pool(_) | AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        AppError::Forbidden(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        AppError::NotFound(message.into())
    }
}

impl From<DieselError> for AppError {
    fn from(e: DieselError) -> Self {
        match e {
            DieselError::NotFound => AppError::NotFound("record not found".to_string()),
            DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, ref info) => {
                AppError::Conflict(format!("already exists: {}", info.message()))
            }
            DieselError::DatabaseError(DatabaseErrorKind::ForeignKeyViolation, ref info) => {
                AppError::Conflict(format!("still referenced: {}", info.message()))
            }
            other => AppError::Database(other),
        }
    }
}

impl From<bb8::RunError<PoolError>> for AppError {
    fn from(e: bb8::RunError<PoolError>) -> Self {
        AppError::Pool(e.to_string())
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(e: validator::ValidationErrors) -> Self {
        AppError::Validation(e.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
            "internal server error".to_string()
        } else {
            self.to_string()
        };

        let body = ErrorResponse {
            error: message,
            code: self.code(),
        };
        (status, Json(body)).into_response()
    }
}
