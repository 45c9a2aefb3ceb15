use brewlink_protocol::{ErrorBody, ErrorCode, ProtocolError, SessionId};
use thiserror::Error;

use crate::storage::StorageError;

#[derive(Error, Debug)]
pub enum BrewError {
    #[error("device already has an open session: {0}")]
    Conflict(SessionId),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("device busy, retry in {retry_after_ms} ms")]
    Busy { retry_after_ms: u64 },

    #[error("persistence error: {0}")]
    Persistence(#[from] StorageError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("recipe unavailable: {0}")]
    Recipe(String),
}

impl BrewError {
    pub fn code(&self) -> ErrorCode {
        match self {
            BrewError::Conflict(_) => ErrorCode::Conflict,
            BrewError::NotFound(_) => ErrorCode::NotFound,
            BrewError::InvalidState(_) => ErrorCode::InvalidState,
            BrewError::Busy { .. } => ErrorCode::Busy,
            BrewError::Persistence(_) => ErrorCode::Persistence,
            BrewError::Protocol(_) => ErrorCode::InvalidRequest,
            BrewError::Recipe(_) => ErrorCode::RecipeUnavailable,
        }
    }

    /// Convert to protocol error code and sanitized message.
    ///
    /// Storage and recipe failures carry paths and OS detail; those stay in
    /// the server log and never reach the device.
    pub fn to_error_code(&self) -> (ErrorCode, String) {
        match self {
            BrewError::Persistence(_) => (
                ErrorCode::Persistence,
                "failed to persist session record".to_string(),
            ),
            BrewError::Recipe(_) => (
                ErrorCode::RecipeUnavailable,
                "recipe could not be loaded".to_string(),
            ),
            _ => (self.code(), self.to_string()),
        }
    }

    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            BrewError::Busy { retry_after_ms } => Some(*retry_after_ms),
            _ => None,
        }
    }

    pub fn to_body(&self) -> ErrorBody {
        let (code, message) = self.to_error_code();
        ErrorBody {
            code,
            message,
            retry_after_ms: self.retry_after_ms(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn persistence_message_is_sanitized() {
        let err = BrewError::from(StorageError::Io(io::Error::other(
            "/var/lib/brewlink/sessions/live/abc.json: disk full",
        )));
        let (code, message) = err.to_error_code();
        assert_eq!(code, ErrorCode::Persistence);
        assert!(!message.contains("/var/lib"));
    }

    #[test]
    fn busy_carries_retry_hint() {
        let body = BrewError::Busy {
            retry_after_ms: 2000,
        }
        .to_body();
        assert_eq!(body.code, ErrorCode::Busy);
        assert_eq!(body.retry_after_ms, Some(2000));
    }

    #[test]
    fn protocol_errors_are_invalid_requests() {
        let err = BrewError::from(ProtocolError::MissingField("uid"));
        assert_eq!(err.code(), ErrorCode::InvalidRequest);
        assert_eq!(err.to_error_code().1, "missing required field `uid`");
    }
}
