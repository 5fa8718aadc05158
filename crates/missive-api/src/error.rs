use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::error;

use missive_guard::Rejection;
use missive_threads::ThreadError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Rejected(#[from] Rejection),

    #[error("not found")]
    NotFound,

    #[error("only the sender may edit a message")]
    NotSender,

    #[error("{0}")]
    BadRequest(&'static str),

    #[error("{0}")]
    Conflict(&'static str),

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("service unavailable")]
    Unavailable(anyhow::Error),

    #[error("internal error")]
    Internal,
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self::Unavailable(err)
    }
}

impl From<ThreadError> for ApiError {
    fn from(err: ThreadError) -> Self {
        match err {
            ThreadError::NotFound => Self::NotFound,
            ThreadError::Unavailable(source) => Self::Unavailable(source),
        }
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Rejected(Rejection::RateLimited { .. }) => StatusCode::TOO_MANY_REQUESTS,
            Self::Rejected(Rejection::OutsideAllowedHours { .. }) => StatusCode::FORBIDDEN,
            Self::Rejected(Rejection::Unauthorized) => StatusCode::UNAUTHORIZED,
            Self::Rejected(Rejection::Forbidden) => StatusCode::FORBIDDEN,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::NotSender => StatusCode::FORBIDDEN,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::InvalidCredentials => StatusCode::UNAUTHORIZED,
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let Self::Unavailable(source) = &self {
            error!("Persistence error: {:#}", source);
        }

        let status = self.status();
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
