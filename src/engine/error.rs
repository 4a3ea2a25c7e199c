//! Errors reported by the engine.
//!
//! None of these are returned from `dispatch`. They travel on the event
//! channel and in [`DispatchOutcome`](super::DispatchOutcome), so every
//! variant is `Clone`.

use thiserror::Error;

use crate::persistence::PersistenceError;
use crate::state::{ActionParseError, ActionTag};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// Pre-dispatch validation found a critical problem.
    #[error("{tag} rejected: {reason}")]
    ActionRejected { tag: ActionTag, reason: String },

    /// The reduced state broke an invariant that auto-fix could not repair.
    #[error("{tag} produced an invalid state: {reason}")]
    InvariantViolation { tag: ActionTag, reason: String },

    #[error("middleware '{name}' failed: {message}")]
    Middleware { name: String, message: String },

    #[error("subscriber {id} failed: {message}")]
    Subscriber { id: u64, message: String },

    #[error("unknown action type '{0}'")]
    UnknownAction(String),

    #[error(transparent)]
    MalformedAction(ActionParseError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error("undo replay failed: {0}")]
    Replay(String),

    /// A panic was caught inside the pipeline.
    #[error("{stage} panicked: {message}")]
    Panicked { stage: &'static str, message: String },
}

impl From<ActionParseError> for EngineError {
    fn from(err: ActionParseError) -> Self {
        match err {
            ActionParseError::UnknownTag(tag) => Self::UnknownAction(tag),
            other => Self::MalformedAction(other),
        }
    }
}

/// Failure returned by a middleware `before` hook.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct MiddlewareError(pub String);

impl MiddlewareError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Failure returned by a subscriber callback.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct SubscriberError(pub String);

impl SubscriberError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_errors_classified() {
        let unknown: EngineError = ActionParseError::UnknownTag("WARP".to_string()).into();
        assert_eq!(unknown, EngineError::UnknownAction("WARP".to_string()));

        let malformed: EngineError = ActionParseError::InvalidEnvelope("eof".to_string()).into();
        assert!(matches!(malformed, EngineError::MalformedAction(_)));
    }

    #[test]
    fn test_messages() {
        let err = EngineError::ActionRejected {
            tag: ActionTag::LevelTransitionStart,
            reason: "UNKNOWN_ZONE".to_string(),
        };
        assert_eq!(err.to_string(), "LEVEL_TRANSITION_START rejected: UNKNOWN_ZONE");
        assert_eq!(
            EngineError::Persistence(PersistenceError::NoSave).to_string(),
            "no saved game"
        );
    }
}
