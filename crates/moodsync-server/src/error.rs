use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use moodsync_shared::error::IdentityError;
use moodsync_shared::protocol::{ErrorBody, ErrorCode};
use thiserror::Error;

use crate::remote::RemoteStoreError;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Missing identity payload")]
    MissingIdentity,

    #[error("Identity signature rejected")]
    InvalidSignature,

    #[error("Identity payload carries no usable user")]
    InvalidUser,

    #[error("Rate limited: {0}")]
    RateLimited(&'static str),

    #[error("User no longer exists")]
    UserMissing,

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Store error: {0}")]
    Store(#[from] RemoteStoreError),

    #[error("Method not allowed")]
    MethodNotAllowed,

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Invalid username")]
    InvalidUsername,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ServerError {
    pub fn status_and_code(&self) -> (StatusCode, ErrorCode) {
        match self {
            ServerError::MissingIdentity => {
                (StatusCode::UNAUTHORIZED, ErrorCode::MissingIdentityPayload)
            }
            ServerError::InvalidSignature => (StatusCode::UNAUTHORIZED, ErrorCode::InvalidSignature),
            ServerError::InvalidUser => (StatusCode::UNAUTHORIZED, ErrorCode::InvalidUser),
            ServerError::RateLimited(_) => (StatusCode::TOO_MANY_REQUESTS, ErrorCode::RateLimited),
            ServerError::UserMissing => (StatusCode::GONE, ErrorCode::UserMissing),
            ServerError::StoreUnavailable(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, ErrorCode::DbError)
            }
            ServerError::Store(RemoteStoreError::UsernameTaken) => {
                (StatusCode::CONFLICT, ErrorCode::UsernameTaken)
            }
            ServerError::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, ErrorCode::DbError),
            ServerError::MethodNotAllowed => {
                (StatusCode::METHOD_NOT_ALLOWED, ErrorCode::MethodNotAllowed)
            }
            ServerError::BadRequest(_) => (StatusCode::BAD_REQUEST, ErrorCode::BadRequest),
            ServerError::InvalidUsername => (StatusCode::BAD_REQUEST, ErrorCode::InvalidUsername),
            ServerError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, ErrorCode::ServerError),
        }
    }
}

impl From<IdentityError> for ServerError {
    fn from(err: IdentityError) -> Self {
        match err {
            IdentityError::MissingPayload => ServerError::MissingIdentity,
            IdentityError::InvalidUser => ServerError::InvalidUser,
            IdentityError::MissingHash
            | IdentityError::InvalidHash
            | IdentityError::SignatureMismatch
            | IdentityError::InvalidKey => ServerError::InvalidSignature,
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        if status.is_server_error() {
            tracing::error!(error = %self, code = %code, "request failed");
        } else {
            tracing::debug!(error = %self, code = %code, "request rejected");
        }

        (status, axum::Json(ErrorBody::new(code))).into_response()
    }
}
