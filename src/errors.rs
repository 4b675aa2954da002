use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

/// Machine-checkable error kind carried by every remote error response.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, AsRefStr, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    Mismatch,
    RateLimit,
    TransientNetwork,
    TerminalBusiness,
    Internal,
}

/// Error payload as returned by a remote collaborator: a kind plus a human-readable message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub kind: ErrorKind,
    pub message: String,
}

#[derive(Debug, thiserror::Error, Serialize)]
pub enum ServiceError {
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    /// The unit code is valid but belongs to a different order line.
    #[error("Product mismatch: {0}")]
    Mismatch(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimitExceeded(String),

    #[error("Transient network error: {0}")]
    TransientNetwork(String),

    /// A lifecycle transition was invoked from a state where it is not legal.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Refund amount {requested} exceeds remaining refundable balance {remaining}")]
    BalanceExceeded {
        requested: Decimal,
        remaining: Decimal,
    },

    #[error("Event error: {0}")]
    EventError(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("Other error: {0}")]
    Other(
        #[from]
        #[serde(skip)]
        anyhow::Error,
    ),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl From<ErrorResponse> for ServiceError {
    fn from(response: ErrorResponse) -> Self {
        let message = response.message;
        match response.kind {
            ErrorKind::Validation => Self::ValidationError(message),
            ErrorKind::NotFound => Self::NotFound(message),
            ErrorKind::Conflict => Self::Conflict(message),
            ErrorKind::Mismatch => Self::Mismatch(message),
            ErrorKind::RateLimit => Self::RateLimitExceeded(message),
            ErrorKind::TransientNetwork => Self::TransientNetwork(message),
            ErrorKind::TerminalBusiness => Self::InvalidState(message),
            ErrorKind::Internal => Self::InternalError(message),
        }
    }
}

impl ServiceError {
    /// Returns the machine-checkable kind for this error.
    /// This is the single source of truth for error classification.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ValidationError(_) => ErrorKind::Validation,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::Mismatch(_) => ErrorKind::Mismatch,
            Self::RateLimitExceeded(_) => ErrorKind::RateLimit,
            Self::TransientNetwork(_) => ErrorKind::TransientNetwork,
            Self::InvalidState(_) | Self::BalanceExceeded { .. } => ErrorKind::TerminalBusiness,
            Self::EventError(_) | Self::InternalError(_) | Self::Other(_) => ErrorKind::Internal,
        }
    }

    /// Rate-limit and transient network failures may succeed on a later attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::RateLimit | ErrorKind::TransientNetwork)
    }

    pub fn is_mismatch(&self) -> bool {
        matches!(self, Self::Mismatch(_))
    }

    /// Returns the error message suitable for operators.
    /// Internal errors return generic messages to avoid leaking implementation details.
    pub fn response_message(&self) -> String {
        match self {
            Self::EventError(_) | Self::InternalError(_) | Self::Other(_) => {
                "Internal error".to_string()
            }
            Self::BalanceExceeded { .. } => "Refund exceeds remaining balance".to_string(),
            _ => self.to_string(),
        }
    }

    pub fn to_response(&self) -> ErrorResponse {
        ErrorResponse {
            kind: self.kind(),
            message: self.response_message(),
        }
    }

    pub(crate) fn invalid_transition(entity: &str, from: impl std::fmt::Display, to: &str) -> Self {
        ServiceError::InvalidState(format!(
            "cannot move {} from {} to {}",
            entity, from, to
        ))
    }
}
