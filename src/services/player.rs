//! Player surface: a replicated, read-only view of one game plus the
//! player's own answer submissions.
//!
//! Players never drive the lifecycle; they observe the host's phase writes
//! through the change feed and render whatever they have replicated so far.
//! A player's view may lag the host pointer (rendering as waiting) but can
//! never lead it.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};
use uuid::Uuid;
use validator::Validate;

use crate::dao::models::{GameRecord, QuestionRecord, StoredPhase};
use crate::dao::storage::{KeyPredicate, RecordDraft, RecordKind, RecordStore, SessionDraft};
use crate::dto::{CurrentQuestion, JoinGameInput, QuestionView};
use crate::error::EngineError;
use crate::feed::{ChangeEvent, ChangeFeed, EventKind};
use crate::projection::{LeaderboardProjection, LeaderboardRow};
use crate::services::host::{Connection, enqueue_into};
use crate::services::ledger::{ScoreLedger, ScoreResult};
use crate::services::reconciler::{Baseline, Reconciler};

/// Everything a player knows about the game, fed exclusively by baselines
/// and change feed events. Only the connection worker writes it.
#[derive(Debug, Default)]
struct PlayerView {
    game: Option<GameRecord>,
    questions: BTreeMap<usize, QuestionRecord>,
    board: LeaderboardProjection,
}

impl PlayerView {
    /// Fold a reconciled baseline in. Existing rows win when newer, so a
    /// baseline that raced a feed delivery cannot roll the view back.
    fn merge_baseline(&mut self, baseline: Baseline) {
        self.merge_game(baseline.game);
        for question in baseline.questions {
            self.merge_question(question);
        }
        for session in baseline.sessions {
            self.board.upsert(session);
        }
    }

    fn apply(&mut self, event: ChangeEvent) {
        use crate::dao::storage::Record;

        match event.record {
            Record::Game(game) => self.merge_game(game),
            Record::Question(question) => self.merge_question(question),
            Record::PlayerSession(session) => {
                self.board.upsert(session);
            }
        }
    }

    fn merge_game(&mut self, game: GameRecord) {
        match &self.game {
            Some(existing) if game.rev <= existing.rev => {}
            _ => self.game = Some(game),
        }
    }

    fn merge_question(&mut self, question: QuestionRecord) {
        // Questions are immutable after creation; the first copy observed
        // for a position is final.
        self.questions.entry(question.position).or_insert(question);
    }

    fn current_question(&self) -> CurrentQuestion {
        let Some(game) = &self.game else {
            return CurrentQuestion::Waiting;
        };
        match game.phase {
            StoredPhase::Lobby => CurrentQuestion::Waiting,
            StoredPhase::Completed => CurrentQuestion::Completed,
            StoredPhase::InProgress { current_index } => {
                match self.questions.get(&current_index) {
                    Some(record) => {
                        CurrentQuestion::Question(QuestionView::new(record, self.questions.len()))
                    }
                    // The phase write outran the question insert; render as
                    // waiting until the record arrives.
                    None => CurrentQuestion::Waiting,
                }
            }
        }
    }
}

/// Player-side handle to one game session.
pub struct PlayerClient {
    feed: ChangeFeed,
    ledger: ScoreLedger,
    reconciler: Reconciler,
    game_id: Uuid,
    session_id: Uuid,
    player_name: String,
    view: Arc<Mutex<PlayerView>>,
    events: Option<mpsc::UnboundedSender<ChangeEvent>>,
    connection: Option<Connection>,
}

impl PlayerClient {
    /// Join `game_id` under the given display name, creating a fresh
    /// session record and attaching to the change feed. Joining mid-game is
    /// allowed; the baseline brings the late joiner up to date.
    pub async fn join(
        store: Arc<dyn RecordStore>,
        feed: ChangeFeed,
        game_id: Uuid,
        input: &JoinGameInput,
    ) -> Result<Self, EngineError> {
        input.validate()?;

        // Reject unknown games before creating a session record.
        store
            .get(RecordKind::Game, game_id)
            .await?
            .ok_or(EngineError::GameNotFound(game_id))?;

        let session = store
            .insert(RecordDraft::PlayerSession(SessionDraft {
                game_id,
                player_name: input.player_name.clone(),
            }))
            .await?
            .into_session()
            .ok_or_else(|| {
                EngineError::InvalidState("store returned a non-session record".into())
            })?;

        let mut client = Self {
            feed,
            ledger: ScoreLedger::new(store.clone()),
            reconciler: Reconciler::new(store),
            game_id,
            session_id: session.id,
            player_name: session.player_name.clone(),
            view: Arc::new(Mutex::new(PlayerView::default())),
            events: None,
            connection: None,
        };
        client.reconnect().await?;
        Ok(client)
    }

    /// Session identity of this player.
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Display name this player joined under.
    pub fn player_name(&self) -> &str {
        &self.player_name
    }

    /// Whether change feed delivery is currently attached.
    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// Detach from the change feed. Local state is kept but goes stale
    /// until [`PlayerClient::reconnect`] re-establishes a baseline.
    pub fn disconnect(&mut self) {
        self.events = None;
        self.connection = None;
    }

    /// Attach to the change feed and reconcile: subscribe first, fetch the
    /// baseline, then let the worker replay whatever queued up in between.
    /// Safe to call when already connected; the old attachment is replaced.
    pub async fn reconnect(&mut self) -> Result<(), EngineError> {
        self.disconnect();

        let (sender, mut receiver) = mpsc::unbounded_channel();
        let subscriptions = vec![
            self.feed.subscribe(
                RecordKind::Game,
                KeyPredicate::ById(self.game_id),
                enqueue_into(sender.clone()),
            ),
            self.feed.subscribe(
                RecordKind::Question,
                KeyPredicate::ByGame(self.game_id),
                enqueue_into(sender.clone()),
            ),
            self.feed.subscribe(
                RecordKind::PlayerSession,
                KeyPredicate::ByGame(self.game_id),
                enqueue_into(sender.clone()),
            ),
        ];

        let baseline = self.reconciler.establish(self.game_id).await?;
        self.view.lock().await.merge_baseline(baseline);

        let view = self.view.clone();
        let worker = tokio::spawn(async move {
            while let Some(event) = receiver.recv().await {
                view.lock().await.apply(event);
            }
        });

        self.events = Some(sender);
        self.connection = Some(Connection::new(subscriptions, worker));
        Ok(())
    }

    /// Submit an answer for a question through the score ledger.
    ///
    /// On success the authoritative post-write session record is merged
    /// into the local view as an optimistic overlay, so the player's own
    /// score is visible immediately; the feed's later delivery of the same
    /// revision collapses into a no-op.
    pub async fn submit_answer(
        &self,
        question_id: Uuid,
        answer: &str,
    ) -> Result<ScoreResult, EngineError> {
        let result = self
            .ledger
            .submit_answer(self.session_id, question_id, answer)
            .await?;

        if let Some(events) = &self.events {
            let _ = events.send(ChangeEvent {
                kind: EventKind::Update,
                record: crate::dao::storage::Record::PlayerSession(result.session.clone()),
            });
        }

        Ok(result)
    }

    /// What this player currently sees.
    pub async fn current_question(&self) -> CurrentQuestion {
        self.view.lock().await.current_question()
    }

    /// This player's score as replicated locally.
    pub async fn my_score(&self) -> u32 {
        self.view
            .lock()
            .await
            .board
            .get(self.session_id)
            .map(|session| session.score)
            .unwrap_or(0)
    }

    /// Sorted leaderboard as currently replicated at this player.
    pub async fn leaderboard_snapshot(&self) -> Vec<LeaderboardRow> {
        self.view.lock().await.board.snapshot()
    }

    /// Number of questions replicated so far.
    pub async fn known_question_count(&self) -> usize {
        self.view.lock().await.questions.len()
    }
}
