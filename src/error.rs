//! Engine-level error taxonomy.
//!
//! Every public operation either completes with a result or fails with one
//! classified error; nothing is swallowed. [`EngineError::kind`] maps each
//! variant onto the retry policy callers should apply: validation and
//! conflict errors prompt correction, not-found errors are definitive, and
//! only transient errors warrant a retry affordance.

use thiserror::Error;
use uuid::Uuid;
use validator::ValidationErrors;

use crate::dao::storage::{RecordKind, StorageError};
use crate::state::{AbortError, ApplyError, PlanError};

/// Errors surfaced by the engine's public operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed input; never retried.
    #[error("invalid input: {0}")]
    Validation(String),
    /// The referenced game does not exist.
    #[error("game `{0}` not found")]
    GameNotFound(Uuid),
    /// The referenced question does not exist.
    #[error("question `{0}` not found")]
    QuestionNotFound(Uuid),
    /// The referenced player session does not exist.
    #[error("session `{0}` not found")]
    SessionNotFound(Uuid),
    /// The question belongs to a different game than the session.
    #[error("question `{question_id}` does not belong to game `{game_id}`")]
    QuestionNotInGame {
        /// Question that was submitted against.
        question_id: Uuid,
        /// Game the submitting session belongs to.
        game_id: Uuid,
    },
    /// The session already recorded a result for this question.
    #[error("session `{session_id}` already answered question `{question_id}`")]
    AlreadyAnswered {
        /// Session that re-submitted.
        session_id: Uuid,
        /// Question that was already answered.
        question_id: Uuid,
    },
    /// A game cannot start without questions.
    #[error("game has no questions")]
    NoQuestions,
    /// Operation cannot be performed in the current state.
    #[error("invalid state: {0}")]
    InvalidState(String),
    /// Store failure that survived the bounded retry budget.
    #[error("store unavailable")]
    StoreUnavailable(#[source] StorageError),
    /// A host phase transition exceeded its timeout.
    #[error("operation timed out")]
    Timeout,
}

/// Coarse classification driving caller-side handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed input; correct and resubmit.
    Validation,
    /// Referenced record absent; definitive.
    NotFound,
    /// Definitive rejection of a valid request.
    Conflict,
    /// Possibly recoverable; a retry affordance is appropriate.
    Transient,
}

impl EngineError {
    /// Classify this error per the engine taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Validation(_) => ErrorKind::Validation,
            EngineError::GameNotFound(_)
            | EngineError::QuestionNotFound(_)
            | EngineError::SessionNotFound(_)
            | EngineError::QuestionNotInGame { .. } => ErrorKind::NotFound,
            EngineError::AlreadyAnswered { .. }
            | EngineError::NoQuestions
            | EngineError::InvalidState(_) => ErrorKind::Conflict,
            EngineError::StoreUnavailable(_) | EngineError::Timeout => ErrorKind::Transient,
        }
    }
}

impl From<ValidationErrors> for EngineError {
    fn from(err: ValidationErrors) -> Self {
        EngineError::Validation(format!("validation failed: {err}"))
    }
}

impl From<StorageError> for EngineError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Unavailable { .. } => EngineError::StoreUnavailable(err),
            StorageError::NotFound { kind, id } => match kind {
                RecordKind::Game => EngineError::GameNotFound(id),
                RecordKind::Question => EngineError::QuestionNotFound(id),
                RecordKind::PlayerSession => EngineError::SessionNotFound(id),
            },
            StorageError::Conflict { message } => EngineError::InvalidState(message),
        }
    }
}

impl From<PlanError> for EngineError {
    fn from(err: PlanError) -> Self {
        match err {
            PlanError::AlreadyPending => {
                EngineError::InvalidState("phase transition already pending".into())
            }
            PlanError::InvalidTransition(invalid) => EngineError::InvalidState(invalid.to_string()),
        }
    }
}

impl From<ApplyError> for EngineError {
    fn from(err: ApplyError) -> Self {
        match err {
            ApplyError::NoPending => EngineError::InvalidState("no transition is pending".into()),
            ApplyError::IdMismatch { .. } => {
                EngineError::InvalidState("pending transition does not match".into())
            }
            ApplyError::PhaseMismatch { expected, actual } => EngineError::InvalidState(format!(
                "phase changed during transition (expected {expected:?}, got {actual:?})"
            )),
            ApplyError::VersionMismatch { expected, actual } => EngineError::InvalidState(format!(
                "state version mismatch during transition (expected {expected}, got {actual})"
            )),
        }
    }
}

impl From<AbortError> for EngineError {
    fn from(err: AbortError) -> Self {
        match err {
            AbortError::NoPending => EngineError::InvalidState("no pending transition".into()),
            AbortError::IdMismatch { .. } => {
                EngineError::InvalidState("transition plan does not match".into())
            }
        }
    }
}
