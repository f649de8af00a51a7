use thiserror::Error;

use crate::ports::{GatewayError, StoreError};

/// Business-rule outcomes that stop a command without mutating the ledger.
///
/// These are expected results and are reported back to the user as a reply,
/// never raised as errors.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Rejection {
    SelfGrant,
    DuplicateGrant,
    CooldownExceeded { remaining: u32 },
    Unauthorized,
    UnknownCommand,
}

impl Rejection {
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::SelfGrant => "self_grant",
            Self::DuplicateGrant => "duplicate_grant",
            Self::CooldownExceeded { .. } => "cooldown_exceeded",
            Self::Unauthorized => "unauthorized",
            Self::UnknownCommand => "unknown_command",
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),
    #[error("not found: {0}")]
    NotFound(String),
}

impl From<StoreError> for ApplicationError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Unavailable(message) => Self::UpstreamUnavailable(message),
            StoreError::Decode(message) => {
                Self::UpstreamUnavailable(format!("ledger store returned bad data: {message}"))
            }
        }
    }
}

impl From<GatewayError> for ApplicationError {
    fn from(value: GatewayError) -> Self {
        match value {
            GatewayError::NotFound(what) => Self::NotFound(what),
            GatewayError::RateLimited { .. } => {
                Self::UpstreamUnavailable("messaging gateway rate limited the request".to_owned())
            }
            GatewayError::Unavailable(message) | GatewayError::Api(message) => {
                Self::UpstreamUnavailable(message)
            }
        }
    }
}
