use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        match self {
            AppError::Config(msg) => {
                HttpResponse::ServiceUnavailable().json(json!({ "error": msg }))
            }
            AppError::Database(_) => {
                HttpResponse::InternalServerError().json(json!({ "error": "internal server error" }))
            }
        }
    }
}

// NOTE: actix-web provides a blanket From<T: ResponseError> for actix_web::Error
