//! Score ledger: applies answer submissions to player sessions with
//! idempotence and atomicity guarantees.

use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;

use crate::dao::models::PlayerSessionRecord;
use crate::dao::storage::{Patch, RecordKind, RecordStore, SessionPatch, StorageError};
use crate::error::EngineError;

/// Outcome of one answer submission.
#[derive(Debug, Clone)]
pub struct ScoreResult {
    /// Whether the submitted answer matched the canonical correct answer.
    pub correct: bool,
    /// Points credited (zero for incorrect answers).
    pub awarded: u32,
    /// The session score after the write.
    pub new_score: u32,
    /// Canonical correct answer, for caller-side feedback.
    pub correct_answer: String,
    /// Authoritative session record after the write, usable for an
    /// optimistic local merge until the change feed confirms it.
    pub session: PlayerSessionRecord,
}

/// Applies answer submissions against the authoritative store.
///
/// The score increment happens inside the store as a single read-modify-write
/// of the session record, so two concurrent correct submissions for different
/// questions by the same session cannot lose an increment, and a duplicate
/// submission for the same question is rejected with a conflict even when the
/// local pre-check races it.
#[derive(Clone)]
pub struct ScoreLedger {
    store: Arc<dyn RecordStore>,
}

impl ScoreLedger {
    /// Build a ledger over the given store handle.
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    /// Record `answer` for `question_id` on behalf of `session_id`.
    ///
    /// Incorrect answers are recorded without score change. Errors are never
    /// retried here; transient store failures ride the store's own bounded
    /// retry and surface as [`EngineError::StoreUnavailable`] once exhausted.
    pub async fn submit_answer(
        &self,
        session_id: Uuid,
        question_id: Uuid,
        answer: &str,
    ) -> Result<ScoreResult, EngineError> {
        let session = self
            .store
            .get(RecordKind::PlayerSession, session_id)
            .await?
            .and_then(|record| record.into_session())
            .ok_or(EngineError::SessionNotFound(session_id))?;

        let question = self
            .store
            .get(RecordKind::Question, question_id)
            .await?
            .and_then(|record| record.into_question())
            .ok_or(EngineError::QuestionNotFound(question_id))?;

        if question.game_id != session.game_id {
            return Err(EngineError::QuestionNotInGame {
                question_id,
                game_id: session.game_id,
            });
        }

        if session.has_answered(question_id) {
            return Err(EngineError::AlreadyAnswered {
                session_id,
                question_id,
            });
        }

        let correct = answer == question.correct_answer;
        let award = if correct { question.points } else { 0 };

        let updated = self
            .store
            .update(
                RecordKind::PlayerSession,
                session_id,
                Patch::Session(SessionPatch::RecordAnswer {
                    question_id,
                    answer: answer.to_string(),
                    award,
                }),
            )
            .await
            .map_err(|err| match err {
                // A concurrent duplicate slipped past the pre-check; the
                // store's conditional write is the authoritative guard.
                StorageError::Conflict { .. } => EngineError::AlreadyAnswered {
                    session_id,
                    question_id,
                },
                other => other.into(),
            })?
            .into_session()
            .ok_or_else(|| EngineError::InvalidState("store returned a non-session record".into()))?;

        debug!(
            %session_id,
            %question_id,
            correct,
            award,
            score = updated.score,
            "answer recorded"
        );

        Ok(ScoreResult {
            correct,
            awarded: award,
            new_score: updated.score,
            correct_answer: question.correct_answer,
            session: updated,
        })
    }
}
