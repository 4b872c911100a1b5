use std::time::SystemTime;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle phase of a game as persisted in the store.
///
/// Only the host writes this field; player clients replicate it through the
/// change feed and never mutate it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum StoredPhase {
    /// Questions are being authored; no current question exists.
    Lobby,
    /// The quiz is running and `current_index` points at the live question.
    InProgress {
        /// Zero-based index of the current question in presentation order.
        current_index: usize,
    },
    /// Terminal phase; the pointer ran past the last question or the host
    /// ended the quiz early.
    Completed,
}

/// Aggregate quiz instance persisted by the storage layer.
///
/// The record id doubles as the human-shared join code.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GameRecord {
    /// Primary key of the game.
    pub id: Uuid,
    /// Per-record revision, bumped by the store on every update.
    pub rev: u64,
    /// Store-global insertion sequence.
    pub created_seq: u64,
    /// Creation timestamp for auditing/debugging.
    pub created_at: SystemTime,
    /// Display title of the quiz.
    pub title: String,
    /// Free-form description shown to players while joining.
    pub description: String,
    /// Category label chosen by the host.
    pub category: String,
    /// Lifecycle phase and current-question pointer.
    pub phase: StoredPhase,
}

/// One scored prompt belonging to exactly one game. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QuestionRecord {
    /// Primary key of the question.
    pub id: Uuid,
    /// Per-record revision (stays 0; questions are never updated).
    pub rev: u64,
    /// Store-global insertion sequence.
    pub created_seq: u64,
    /// Creation timestamp for auditing/debugging.
    pub created_at: SystemTime,
    /// Game this question belongs to.
    pub game_id: Uuid,
    /// Presentation order index within the game, assigned by the host at
    /// creation time so replicas can place the question without having
    /// observed its predecessors.
    pub position: usize,
    /// Prompt text shown to players.
    pub text: String,
    /// Canonical correct answer; submissions are compared by exact string
    /// match, independent of any display ordering.
    pub correct_answer: String,
    /// Exactly three incorrect answers.
    pub incorrect_answers: [String; 3],
    /// Points awarded for a correct answer.
    pub points: u32,
}

impl QuestionRecord {
    /// All four answers in stored order (correct first). Display shuffling is
    /// a presentation concern layered on top of this.
    pub fn answers(&self) -> Vec<String> {
        let mut all = Vec::with_capacity(4);
        all.push(self.correct_answer.clone());
        all.extend(self.incorrect_answers.iter().cloned());
        all
    }
}

/// One player's participation record and score within a game.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlayerSessionRecord {
    /// Primary key of the session; used as the player's join handle and as
    /// the leaderboard row key.
    pub id: Uuid,
    /// Per-record revision, bumped by the store on every update.
    pub rev: u64,
    /// Store-global insertion sequence; breaks leaderboard ties so ranks are
    /// reproducible across clients.
    pub created_seq: u64,
    /// Creation timestamp for auditing/debugging.
    pub created_at: SystemTime,
    /// Game this session belongs to.
    pub game_id: Uuid,
    /// Display name chosen by the player; not required to be unique.
    pub player_name: String,
    /// Cumulative score; non-negative and monotonically non-decreasing.
    pub score: u32,
    /// Answers recorded so far, keyed by question id. Presence of a key is
    /// the double-credit guard for that question.
    pub answers: IndexMap<Uuid, String>,
}

impl PlayerSessionRecord {
    /// Whether this session already recorded an answer for `question_id`.
    pub fn has_answered(&self, question_id: Uuid) -> bool {
        self.answers.contains_key(&question_id)
    }
}
