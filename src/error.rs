//! Error types of the session engine
//!
//! Rejected answers are not errors; they are reported as
//! [`crate::answers::SubmitOutcome`] values.

use serde::Serialize;
use thiserror::Error;

use crate::{ids::UserId, state::Phase};

/// An operation is invalid for the current settings or participants
#[derive(Error, Serialize, Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    /// Registration cannot close without participants
    #[error("no participants registered")]
    NoParticipants,
    /// The submitted settings failed validation
    #[error("invalid settings: {0}")]
    InvalidSettings(String),
    /// The theme is blank
    #[error("theme cannot be empty")]
    EmptyTheme,
    /// The referenced user has not joined
    #[error("user is not a participant")]
    NotAParticipant,
    /// The session is full
    #[error("participant limit reached")]
    TooManyParticipants,
}

/// An operation was invoked in an incompatible lifecycle phase
#[derive(Error, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateError {
    /// No session exists for the chat
    #[error("no session exists")]
    NoSession,
    /// The session is in a phase that does not accept the operation
    #[error("operation not allowed while {0:?}")]
    WrongPhase(Phase),
}

/// The question supplier failed or returned unusable data
#[derive(Error, Serialize, Debug, Clone, PartialEq, Eq)]
pub enum SupplierError {
    /// The supplier could not be reached or reported a failure
    #[error("supplier unavailable: {0}")]
    Unavailable(String),
    /// The supplier answered with data that cannot be used
    #[error("supplier returned malformed data: {0}")]
    Malformed(String),
    /// Every attempt produced only unusable or repeated questions
    #[error("no usable question after {attempts} attempts")]
    Exhausted {
        /// Number of generation calls made
        attempts: usize,
    },
}

/// Persistence failed
#[derive(Error, Serialize, Debug, Clone, PartialEq, Eq)]
#[error("recorder failed: {0}")]
pub struct RecorderError(pub String);

/// Errors returned by session operations
#[derive(Error, Serialize, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// See [`ConfigurationError`]
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    /// See [`StateError`]
    #[error(transparent)]
    State(#[from] StateError),
    /// Only the admin may perform the operation
    #[error("user {0} is not the admin")]
    Forbidden(UserId),
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        assert_eq!(
            ConfigurationError::NoParticipants.to_string(),
            "no participants registered"
        );
        assert_eq!(
            SupplierError::Exhausted { attempts: 3 }.to_string(),
            "no usable question after 3 attempts"
        );
        assert_eq!(
            Error::from(StateError::WrongPhase(Phase::Idle)).to_string(),
            "operation not allowed while Idle"
        );
        assert_eq!(
            Error::Forbidden(UserId::from(7)).to_string(),
            "user 7 is not the admin"
        );
    }
}
