//! Host surface: authoritative control of one game's lifecycle.
//!
//! The host owns the state machine and the question list. Player sessions
//! are not authoritative here; the host replicates them through the change
//! feed like any other observer and projects them into its leaderboard.

use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::info;
use uuid::Uuid;
use validator::Validate;

use crate::config::EngineConfig;
use crate::dao::models::{GameRecord, QuestionRecord};
use crate::dao::storage::{
    GameDraft, GamePatch, KeyPredicate, Patch, QuestionDraft, RecordDraft, RecordKind, RecordStore,
};
use crate::dto::{CreateGameInput, CurrentQuestion, GameSummary, QuestionInput, QuestionView};
use crate::error::EngineError;
use crate::feed::{ChangeEvent, ChangeFeed, SubscriptionHandle};
use crate::projection::{LeaderboardProjection, LeaderboardRow};
use crate::services::reconciler::Reconciler;
use crate::state::{GameEvent, GamePhase, GameStateMachine, HostState};

/// Live change-feed attachment of one client: the forwarding subscriptions
/// and the worker that drains their shared queue.
///
/// Feed handlers only enqueue; the worker is the sole writer of the local
/// view, applying one event at a time. Dropping the connection drops every
/// queue sender, which lets the worker run the queue dry and exit.
pub(crate) struct Connection {
    _subscriptions: Vec<SubscriptionHandle>,
    _worker: JoinHandle<()>,
}

impl Connection {
    pub(crate) fn new(subscriptions: Vec<SubscriptionHandle>, worker: JoinHandle<()>) -> Self {
        Self {
            _subscriptions: subscriptions,
            _worker: worker,
        }
    }
}

/// Forwarding handler pushing feed events onto a client's worker queue.
pub(crate) fn enqueue_into(
    sender: mpsc::UnboundedSender<ChangeEvent>,
) -> impl FnMut(ChangeEvent) + Send + 'static {
    move |event| {
        // The worker going away just means this client is shutting down.
        let _ = sender.send(event);
    }
}

/// Host-side handle to one game.
pub struct HostClient {
    store: Arc<dyn RecordStore>,
    game: GameRecord,
    state: HostState,
    questions: Mutex<Vec<QuestionRecord>>,
    board: Arc<Mutex<LeaderboardProjection>>,
    _connection: Connection,
}

impl HostClient {
    /// Create a brand-new game in the lobby phase and return its host handle.
    pub async fn create_game(
        store: Arc<dyn RecordStore>,
        feed: &ChangeFeed,
        config: &EngineConfig,
        input: &CreateGameInput,
    ) -> Result<Self, EngineError> {
        input.validate()?;

        let game = store
            .insert(RecordDraft::Game(GameDraft {
                title: input.title.clone(),
                description: input.description.clone(),
                category: input.category_or_default(),
            }))
            .await?
            .into_game()
            .ok_or_else(|| EngineError::InvalidState("store returned a non-game record".into()))?;

        info!(game_id = %game.id, title = %game.title, "game created");

        let machine = GameStateMachine::new();
        Self::attach(store, feed, config, game, machine, Vec::new()).await
    }

    /// Re-open an existing game, resuming the state machine from its
    /// persisted phase.
    pub async fn resume(
        store: Arc<dyn RecordStore>,
        feed: &ChangeFeed,
        config: &EngineConfig,
        game_id: Uuid,
    ) -> Result<Self, EngineError> {
        // Pre-flight existence check; the post-subscribe baseline inside
        // `attach` is the one the projection is seeded from.
        let baseline = Reconciler::new(store.clone()).establish(game_id).await?;
        let machine = GameStateMachine::resume(baseline.game.phase.into());

        info!(%game_id, phase = ?baseline.game.phase, "game resumed");

        Self::attach(store, feed, config, baseline.game, machine, baseline.questions).await
    }

    async fn attach(
        store: Arc<dyn RecordStore>,
        feed: &ChangeFeed,
        config: &EngineConfig,
        game: GameRecord,
        machine: GameStateMachine,
        questions: Vec<QuestionRecord>,
    ) -> Result<Self, EngineError> {
        let board = Arc::new(Mutex::new(LeaderboardProjection::new()));
        let (sender, mut receiver) = mpsc::unbounded_channel();

        // Subscribe before the baseline fetch; events racing the fetch sit
        // in the queue and are replayed idempotently by the worker.
        let subscriptions = vec![feed.subscribe(
            RecordKind::PlayerSession,
            KeyPredicate::ByGame(game.id),
            enqueue_into(sender),
        )];

        let baseline = Reconciler::new(store.clone()).establish(game.id).await?;
        // The worker has not started yet, so replacing wholesale is safe;
        // events queued during the fetch replay afterwards under the rev
        // guard.
        board.lock().await.reset(baseline.sessions);

        let worker_board = board.clone();
        let worker = tokio::spawn(async move {
            while let Some(event) = receiver.recv().await {
                worker_board.lock().await.apply(&event);
            }
        });

        Ok(Self {
            store,
            game,
            state: HostState::new(machine, Some(config.transition_timeout)),
            questions: Mutex::new(questions),
            board,
            _connection: Connection::new(subscriptions, worker),
        })
    }

    /// Identity of the hosted game; doubles as the join code.
    pub fn game_id(&self) -> Uuid {
        self.game.id
    }

    /// Game metadata with the live phase.
    pub async fn summary(&self) -> GameSummary {
        let mut summary = GameSummary::from(&self.game);
        summary.phase = self.state.phase().await.into();
        summary
    }

    /// Current lifecycle phase.
    pub async fn phase(&self) -> GamePhase {
        self.state.phase().await
    }

    /// Append a question while the game is still in the lobby.
    pub async fn add_question(
        &self,
        input: &QuestionInput,
    ) -> Result<QuestionRecord, EngineError> {
        input.validate()?;

        if self.state.phase().await != GamePhase::Lobby {
            return Err(EngineError::InvalidState(
                "questions can only be added while the game is in the lobby".into(),
            ));
        }

        let mut questions = self.questions.lock().await;
        let incorrect_answers: [String; 3] = input
            .incorrect_answers
            .clone()
            .try_into()
            .map_err(|_| EngineError::Validation("expected exactly 3 incorrect answers".into()))?;

        let record = self
            .store
            .insert(RecordDraft::Question(QuestionDraft {
                game_id: self.game.id,
                position: questions.len(),
                text: input.text.clone(),
                correct_answer: input.correct_answer.clone(),
                incorrect_answers,
                points: input.points,
            }))
            .await?
            .into_question()
            .ok_or_else(|| {
                EngineError::InvalidState("store returned a non-question record".into())
            })?;

        questions.push(record.clone());
        Ok(record)
    }

    /// Start the quiz at the first question. Fails while the game has no
    /// questions; the lobby phase is kept on failure.
    pub async fn start_game(&self) -> Result<GamePhase, EngineError> {
        if self.questions.lock().await.is_empty() {
            return Err(EngineError::NoQuestions);
        }
        self.transition(GameEvent::Start).await
    }

    /// Move the current-question pointer forward; completes the quiz when
    /// the pointer would pass the last question.
    pub async fn advance_question(&self) -> Result<GamePhase, EngineError> {
        let question_count = self.questions.lock().await.len();
        self.transition(GameEvent::Advance { question_count }).await
    }

    /// End the quiz early from any in-progress question.
    pub async fn end_game(&self) -> Result<GamePhase, EngineError> {
        self.transition(GameEvent::End).await
    }

    /// Run one lifecycle transition, persisting the target phase to the
    /// store before the local state machine commits it.
    async fn transition(&self, event: GameEvent) -> Result<GamePhase, EngineError> {
        let store = self.store.clone();
        let game_id = self.game.id;

        let (_, next) = self
            .state
            .run_transition(event, |to| async move {
                store
                    .update(
                        RecordKind::Game,
                        game_id,
                        Patch::Game(GamePatch { phase: to.into() }),
                    )
                    .await?;
                Ok(())
            })
            .await?;

        info!(%game_id, ?event, phase = ?next, "phase transition applied");
        Ok(next)
    }

    /// What the host currently presents.
    pub async fn current_question(&self) -> CurrentQuestion {
        match self.state.phase().await {
            GamePhase::Lobby => CurrentQuestion::Waiting,
            GamePhase::Completed => CurrentQuestion::Completed,
            GamePhase::InProgress { current_index } => {
                let questions = self.questions.lock().await;
                match questions.get(current_index) {
                    Some(record) => {
                        CurrentQuestion::Question(QuestionView::new(record, questions.len()))
                    }
                    None => CurrentQuestion::Waiting,
                }
            }
        }
    }

    /// Number of questions authored so far.
    pub async fn question_count(&self) -> usize {
        self.questions.lock().await.len()
    }

    /// Sorted leaderboard as currently replicated at the host.
    pub async fn leaderboard_snapshot(&self) -> Vec<LeaderboardRow> {
        self.board.lock().await.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::dao::memory::MemoryStore;
    use crate::dao::models::StoredPhase;

    fn game_input() -> CreateGameInput {
        CreateGameInput {
            title: "Geography night".into(),
            description: String::new(),
            category: None,
        }
    }

    fn question_input(text: &str) -> QuestionInput {
        QuestionInput {
            text: text.into(),
            correct_answer: "right".into(),
            incorrect_answers: vec!["wrong".into(), "worse".into(), "worst".into()],
            points: 10,
        }
    }

    async fn engine() -> (Arc<dyn RecordStore>, ChangeFeed, EngineConfig) {
        let feed = ChangeFeed::new(64);
        let store: Arc<dyn RecordStore> = Arc::new(MemoryStore::new(feed.clone()));
        (store, feed, EngineConfig::default())
    }

    #[tokio::test]
    async fn create_starts_in_the_lobby() {
        let (store, feed, config) = engine().await;
        let host = HostClient::create_game(store, &feed, &config, &game_input())
            .await
            .unwrap();

        assert_eq!(host.phase().await, GamePhase::Lobby);
        assert_eq!(host.current_question().await, CurrentQuestion::Waiting);
        assert_eq!(host.summary().await.phase, StoredPhase::Lobby);
    }

    #[tokio::test]
    async fn start_without_questions_is_rejected() {
        let (store, feed, config) = engine().await;
        let host = HostClient::create_game(store, &feed, &config, &game_input())
            .await
            .unwrap();

        let err = host.start_game().await.unwrap_err();
        assert!(matches!(err, EngineError::NoQuestions));
        assert_eq!(host.phase().await, GamePhase::Lobby);
    }

    #[tokio::test]
    async fn questions_take_contiguous_positions() {
        let (store, feed, config) = engine().await;
        let host = HostClient::create_game(store, &feed, &config, &game_input())
            .await
            .unwrap();

        let first = host.add_question(&question_input("one")).await.unwrap();
        let second = host.add_question(&question_input("two")).await.unwrap();
        assert_eq!(first.position, 0);
        assert_eq!(second.position, 1);
        assert_eq!(host.question_count().await, 2);
    }

    #[tokio::test]
    async fn adding_questions_after_start_is_rejected() {
        let (store, feed, config) = engine().await;
        let host = HostClient::create_game(store, &feed, &config, &game_input())
            .await
            .unwrap();
        host.add_question(&question_input("one")).await.unwrap();
        host.start_game().await.unwrap();

        let err = host.add_question(&question_input("two")).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidState(_)));
    }

    #[tokio::test]
    async fn advancing_past_the_last_question_completes_and_persists() {
        let (store, feed, config) = engine().await;
        let host = HostClient::create_game(store.clone(), &feed, &config, &game_input())
            .await
            .unwrap();
        host.add_question(&question_input("one")).await.unwrap();
        host.add_question(&question_input("two")).await.unwrap();

        assert_eq!(
            host.start_game().await.unwrap(),
            GamePhase::InProgress { current_index: 0 }
        );
        assert_eq!(
            host.advance_question().await.unwrap(),
            GamePhase::InProgress { current_index: 1 }
        );
        assert_eq!(host.advance_question().await.unwrap(), GamePhase::Completed);
        assert_eq!(host.current_question().await, CurrentQuestion::Completed);

        let stored = store
            .get(RecordKind::Game, host.game_id())
            .await
            .unwrap()
            .unwrap()
            .into_game()
            .unwrap();
        assert_eq!(stored.phase, StoredPhase::Completed);
    }

    #[tokio::test]
    async fn failed_phase_write_keeps_the_local_phase() {
        let (_, feed, config) = engine().await;
        let memory = MemoryStore::new(feed.clone());
        let store: Arc<dyn RecordStore> = Arc::new(memory.clone());

        let host = HostClient::create_game(store, &feed, &config, &game_input())
            .await
            .unwrap();
        host.add_question(&question_input("one")).await.unwrap();

        memory.fail_next(1);
        let err = host.start_game().await.unwrap_err();
        assert!(matches!(err, EngineError::StoreUnavailable(_)));
        assert_eq!(host.phase().await, GamePhase::Lobby);

        // The fault was one-shot; the next attempt goes through.
        host.start_game().await.unwrap();
        assert_eq!(
            host.phase().await,
            GamePhase::InProgress { current_index: 0 }
        );
    }

    #[tokio::test]
    async fn resume_picks_up_the_persisted_phase_and_questions() {
        let (store, feed, config) = engine().await;
        let game_id = {
            let host = HostClient::create_game(store.clone(), &feed, &config, &game_input())
                .await
                .unwrap();
            host.add_question(&question_input("one")).await.unwrap();
            host.add_question(&question_input("two")).await.unwrap();
            host.start_game().await.unwrap();
            host.game_id()
        };

        let host = HostClient::resume(store, &feed, &config, game_id)
            .await
            .unwrap();
        assert_eq!(
            host.phase().await,
            GamePhase::InProgress { current_index: 0 }
        );
        assert_eq!(host.question_count().await, 2);
        assert_eq!(host.advance_question().await.unwrap(),
            GamePhase::InProgress { current_index: 1 });
    }

    #[tokio::test]
    async fn host_board_tracks_session_inserts() {
        use crate::dao::storage::SessionDraft;

        let (store, feed, config) = engine().await;
        let host = HostClient::create_game(store.clone(), &feed, &config, &game_input())
            .await
            .unwrap();

        store
            .insert(RecordDraft::PlayerSession(SessionDraft {
                game_id: host.game_id(),
                player_name: "alice".into(),
            }))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        let rows = host.leaderboard_snapshot().await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].player_name, "alice");
        assert_eq!(rows[0].score, 0);
    }
}
