use rocket::http::Status;
use rocket::response::{self, Responder};
use rocket::{Request, Response};
use rocket_okapi::r#gen::OpenApiGenerator;
use rocket_okapi::okapi::openapi3::Responses;
use rocket_okapi::response::OpenApiResponderInner;
use serde::Serialize;
use std::io::Cursor;
use thiserror::Error;

use crate::store::StoreError;
use crate::token::TokenError;

pub type OptOutResult<T> = Result<T, OptOutError>;

/// Errors raised by the subscription core.
#[derive(Debug, Error)]
pub enum OptOutError {
    /// A required field was blank. Caller error, never retried.
    #[error("{0}")]
    InvalidArgument(String),
    /// Token tampered, malformed or signed with another key.
    #[error("invalid signature")]
    InvalidSignature,
    /// Bounce processing was invoked without a processor.
    #[error("process_opt_outs not configured")]
    NotConfigured,
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl From<TokenError> for OptOutError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::InvalidArgument(field) => {
                OptOutError::InvalidArgument(format!("Missing {field}"))
            }
            TokenError::InvalidSignature => OptOutError::InvalidSignature,
        }
    }
}

/// JSON error responder for the admin API.
#[derive(Debug)]
pub enum ApiError {
    DatabaseError(String),
    NotFound(String),
    BadRequest(String),
    Unauthorized,
    InternalError(String),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
}

impl<'r> Responder<'r, 'static> for ApiError {
    fn respond_to(self, _: &'r Request<'_>) -> response::Result<'static> {
        let (status, error_type, message) = match self {
            ApiError::DatabaseError(msg) => {
                log::error!("database error: {}", msg);
                (
                    Status::InternalServerError,
                    "DatabaseError",
                    "Database unavailable".to_string(),
                )
            }
            ApiError::NotFound(msg) => {
                log::debug!("not found: {}", msg);
                (Status::NotFound, "NotFound", msg)
            }
            ApiError::BadRequest(msg) => {
                log::debug!("bad request: {}", msg);
                (Status::BadRequest, "BadRequest", msg)
            }
            ApiError::Unauthorized => (
                Status::Unauthorized,
                "Unauthorized",
                "Missing or invalid admin token".to_string(),
            ),
            ApiError::InternalError(msg) => {
                log::error!("internal error: {}", msg);
                (Status::InternalServerError, "InternalError", msg)
            }
        };

        let error_response = ErrorResponse {
            error: error_type.to_string(),
            message,
        };

        let json = serde_json::to_string(&error_response)
            .unwrap_or_else(|_| r#"{"error":"SerializationError","message":"Failed to serialize error"}"#.to_string());

        Response::build()
            .status(status)
            .header(rocket::http::ContentType::JSON)
            .sized_body(json.len(), Cursor::new(json))
            .ok()
    }
}

impl OpenApiResponderInner for ApiError {
    fn responses(_generator: &mut OpenApiGenerator) -> rocket_okapi::Result<Responses> {
        Ok(Responses::default())
    }
}

impl From<OptOutError> for ApiError {
    fn from(err: OptOutError) -> Self {
        match err {
            OptOutError::InvalidArgument(msg) => ApiError::BadRequest(msg),
            OptOutError::InvalidSignature => ApiError::BadRequest("Invalid token".to_string()),
            OptOutError::NotConfigured => ApiError::InternalError(err.to_string()),
            OptOutError::Store(store_err) => ApiError::DatabaseError(store_err.to_string()),
        }
    }
}
