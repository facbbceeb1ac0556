use axum::http::StatusCode;
use axum::Json;
use chorus_contracts::{ErrorBody, ErrorResponse};
use chorus_kernel::{TransitionError, ValidationError};
use thiserror::Error;

use crate::engines::{ResolutionError, SynthesisError};
use crate::journal::JournalError;
use crate::store::StoreError;

/// Terminal failure of one conversation request.
#[derive(Debug, Error)]
pub enum ConversationError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("intent resolution failed: {0}")]
    ResolutionFailed(#[from] ResolutionError),
    #[error("speech synthesis failed: {0}")]
    SynthesisFailed(#[from] SynthesisError),
    #[error("dispatch invariant broken: {0}")]
    Dispatch(#[from] TransitionError),
}

impl ConversationError {
    pub fn code(&self) -> &'static str {
        match self {
            ConversationError::Validation(err) => err.code(),
            ConversationError::ResolutionFailed(_) => "resolution_failed",
            ConversationError::SynthesisFailed(_) => "synthesis_failed",
            ConversationError::Dispatch(_) => "dispatch_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ConversationError::Validation(_) => StatusCode::BAD_REQUEST,
            ConversationError::ResolutionFailed(_) | ConversationError::SynthesisFailed(_) => {
                StatusCode::BAD_GATEWAY
            }
            ConversationError::Dispatch(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Startup failures: anything that keeps the service from being built.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("invalid listen_addr: {0}")]
    ListenAddr(String),
    #[error("bind failed: {0}")]
    Bind(std::io::Error),
    #[error("serve failed: {0}")]
    Serve(std::io::Error),
    #[error("unsupported nlu language: {0}")]
    Language(#[from] ValidationError),
    #[error("http client setup failed: {0}")]
    HttpClient(#[from] reqwest::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Journal(#[from] JournalError),
}

pub type ApiError = (StatusCode, Json<ErrorResponse>);

pub fn api_error(status: StatusCode, code: &str, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: ErrorBody {
                code: code.to_string(),
                message: message.into(),
                details: None,
            },
        }),
    )
}

impl From<ConversationError> for ApiError {
    fn from(err: ConversationError) -> Self {
        api_error(err.status(), err.code(), err.to_string())
    }
}
