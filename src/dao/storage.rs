use std::error::Error;
use std::fmt;

use futures::future::BoxFuture;
use thiserror::Error;
use uuid::Uuid;

use crate::dao::models::{GameRecord, PlayerSessionRecord, QuestionRecord, StoredPhase};

/// Result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Error raised by storage backends regardless of the underlying database.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Backend could not be reached or failed mid-operation.
    #[error("storage unavailable: {message}")]
    Unavailable {
        /// Human readable description of the failure.
        message: String,
        /// Underlying backend error.
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
    /// The referenced record does not exist.
    #[error("{kind} `{id}` not found")]
    NotFound {
        /// Kind of the missing record.
        kind: RecordKind,
        /// Identity that was looked up.
        id: Uuid,
    },
    /// A conditional write was rejected by the store.
    #[error("conflict: {message}")]
    Conflict {
        /// Description of the rejected condition.
        message: String,
    },
}

impl StorageError {
    /// Construct an unavailable error from any backend failure.
    pub fn unavailable(message: String, source: impl Error + Send + Sync + 'static) -> Self {
        StorageError::Unavailable {
            message,
            source: Box::new(source),
        }
    }

    /// Whether retrying the same logical operation could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StorageError::Unavailable { .. })
    }
}

/// The three record kinds managed by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    /// Quiz instances.
    Game,
    /// Scored prompts.
    Question,
    /// Player participation records.
    PlayerSession,
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordKind::Game => write!(f, "game"),
            RecordKind::Question => write!(f, "question"),
            RecordKind::PlayerSession => write!(f, "player session"),
        }
    }
}

/// A full record of any kind, as stored and as carried by change feed events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    /// A game record.
    Game(GameRecord),
    /// A question record.
    Question(QuestionRecord),
    /// A player session record.
    PlayerSession(PlayerSessionRecord),
}

impl Record {
    /// Kind tag of this record.
    pub fn kind(&self) -> RecordKind {
        match self {
            Record::Game(_) => RecordKind::Game,
            Record::Question(_) => RecordKind::Question,
            Record::PlayerSession(_) => RecordKind::PlayerSession,
        }
    }

    /// Stable identity of this record.
    pub fn id(&self) -> Uuid {
        match self {
            Record::Game(game) => game.id,
            Record::Question(question) => question.id,
            Record::PlayerSession(session) => session.id,
        }
    }

    /// Per-record revision assigned by the store.
    pub fn rev(&self) -> u64 {
        match self {
            Record::Game(game) => game.rev,
            Record::Question(question) => question.rev,
            Record::PlayerSession(session) => session.rev,
        }
    }

    /// Identity of the game this record belongs to (a game belongs to itself).
    pub fn game_scope(&self) -> Uuid {
        match self {
            Record::Game(game) => game.id,
            Record::Question(question) => question.game_id,
            Record::PlayerSession(session) => session.game_id,
        }
    }

    /// Unwrap into a game record, if this is one.
    pub fn into_game(self) -> Option<GameRecord> {
        match self {
            Record::Game(game) => Some(game),
            _ => None,
        }
    }

    /// Unwrap into a question record, if this is one.
    pub fn into_question(self) -> Option<QuestionRecord> {
        match self {
            Record::Question(question) => Some(question),
            _ => None,
        }
    }

    /// Unwrap into a player session record, if this is one.
    pub fn into_session(self) -> Option<PlayerSessionRecord> {
        match self {
            Record::PlayerSession(session) => Some(session),
            _ => None,
        }
    }
}

/// Key filter applied to queries and change feed subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyPredicate {
    /// Match the single record with this identity.
    ById(Uuid),
    /// Match every record belonging to this game.
    ByGame(Uuid),
    /// Match every record of the kind.
    All,
}

impl KeyPredicate {
    /// Whether `record` satisfies this predicate.
    pub fn matches(&self, record: &Record) -> bool {
        match self {
            KeyPredicate::ById(id) => record.id() == *id,
            KeyPredicate::ByGame(game_id) => record.game_scope() == *game_id,
            KeyPredicate::All => true,
        }
    }
}

/// Result ordering for queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryOrder {
    /// Ascending by store insertion sequence (creation order).
    CreationAsc,
    /// Descending by score, ties by creation order; only meaningful for
    /// player sessions, other kinds fall back to creation order.
    ScoreDesc,
}

/// Field payload for inserting a new record; the store assigns identity,
/// revision, sequence, and timestamps.
#[derive(Debug, Clone)]
pub enum RecordDraft {
    /// A new game, starting in the lobby phase.
    Game(GameDraft),
    /// A new question appended to a game.
    Question(QuestionDraft),
    /// A new player session with a zero score.
    PlayerSession(SessionDraft),
}

/// Fields required to create a game.
#[derive(Debug, Clone)]
pub struct GameDraft {
    /// Display title.
    pub title: String,
    /// Free-form description.
    pub description: String,
    /// Category label.
    pub category: String,
}

/// Fields required to create a question.
#[derive(Debug, Clone)]
pub struct QuestionDraft {
    /// Owning game.
    pub game_id: Uuid,
    /// Presentation order index assigned by the host.
    pub position: usize,
    /// Prompt text.
    pub text: String,
    /// Canonical correct answer.
    pub correct_answer: String,
    /// Exactly three incorrect answers.
    pub incorrect_answers: [String; 3],
    /// Points awarded on a correct answer.
    pub points: u32,
}

/// Fields required to create a player session.
#[derive(Debug, Clone)]
pub struct SessionDraft {
    /// Game being joined.
    pub game_id: Uuid,
    /// Display name chosen by the player.
    pub player_name: String,
}

/// Typed mutation applied to an existing record.
#[derive(Debug, Clone)]
pub enum Patch {
    /// Host-only phase/pointer write on a game record.
    Game(GamePatch),
    /// Score ledger write on a player session record.
    Session(SessionPatch),
}

/// Replaces the lifecycle phase of a game.
#[derive(Debug, Clone)]
pub struct GamePatch {
    /// New phase, including the current-question pointer.
    pub phase: StoredPhase,
}

/// Mutations of a player session.
#[derive(Debug, Clone)]
pub enum SessionPatch {
    /// Record an answer for a question and credit `award` points, all under
    /// the record lock. The new score is computed from the stored value, and
    /// the write is rejected with a conflict when the question was already
    /// answered by this session, which makes duplicate submissions safe.
    RecordAnswer {
        /// Question being answered.
        question_id: Uuid,
        /// The submitted answer, stored verbatim.
        answer: String,
        /// Points to add; zero for incorrect answers.
        award: u32,
    },
}

/// Abstraction over the shared transactional record store.
///
/// Methods return boxed futures so the trait stays object safe behind
/// `Arc<dyn RecordStore>`.
pub trait RecordStore: Send + Sync {
    /// Fetch a single record by kind and id.
    fn get(&self, kind: RecordKind, id: Uuid) -> BoxFuture<'static, StorageResult<Option<Record>>>;

    /// Fetch every record of `kind` matching `predicate`, ordered by `order`.
    fn query(
        &self,
        kind: RecordKind,
        predicate: KeyPredicate,
        order: QueryOrder,
    ) -> BoxFuture<'static, StorageResult<Vec<Record>>>;

    /// Insert a new record, returning the stored form with identity assigned.
    fn insert(&self, draft: RecordDraft) -> BoxFuture<'static, StorageResult<Record>>;

    /// Apply a typed patch to an existing record, returning the updated form.
    fn update(
        &self,
        kind: RecordKind,
        id: Uuid,
        patch: Patch,
    ) -> BoxFuture<'static, StorageResult<Record>>;

    /// Cheap liveness probe.
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
}
