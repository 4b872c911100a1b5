//! Baseline fetch used when a client connects or reconnects.
//!
//! The caller subscribes to the change feed first, then establishes a
//! baseline here, then replays events buffered during the fetch. Because
//! replay is idempotent (identity plus revision), events that the baseline
//! already reflects collapse into no-ops and the client converges on the
//! store state regardless of how fetch and delivery interleave.

use std::sync::Arc;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::dao::models::{GameRecord, PlayerSessionRecord, QuestionRecord, StoredPhase};
use crate::dao::storage::{KeyPredicate, QueryOrder, RecordKind, RecordStore};
use crate::error::EngineError;

/// Consistent-enough snapshot of one game at connection time.
#[derive(Debug, Clone)]
pub struct Baseline {
    /// The game record, including its persisted phase.
    pub game: GameRecord,
    /// All questions of the game, sorted by presentation position.
    pub questions: Vec<QuestionRecord>,
    /// All player sessions of the game, in join order.
    pub sessions: Vec<PlayerSessionRecord>,
}

impl Baseline {
    /// Question at a presentation position, if it has been observed.
    pub fn question_at(&self, position: usize) -> Option<&QuestionRecord> {
        self.questions
            .iter()
            .find(|question| question.position == position)
    }
}

/// Fetches connection-time baselines from the authoritative store.
#[derive(Clone)]
pub struct Reconciler {
    store: Arc<dyn RecordStore>,
}

impl Reconciler {
    /// Build a reconciler over the given store handle.
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    /// Fetch the full current state of `game_id`.
    pub async fn establish(&self, game_id: Uuid) -> Result<Baseline, EngineError> {
        let game = self
            .store
            .get(RecordKind::Game, game_id)
            .await?
            .and_then(|record| record.into_game())
            .ok_or(EngineError::GameNotFound(game_id))?;

        let mut questions: Vec<QuestionRecord> = self
            .store
            .query(
                RecordKind::Question,
                KeyPredicate::ByGame(game_id),
                QueryOrder::CreationAsc,
            )
            .await?
            .into_iter()
            .filter_map(|record| record.into_question())
            .collect();
        questions.sort_by_key(|question| question.position);

        let sessions: Vec<PlayerSessionRecord> = self
            .store
            .query(
                RecordKind::PlayerSession,
                KeyPredicate::ByGame(game_id),
                QueryOrder::CreationAsc,
            )
            .await?
            .into_iter()
            .filter_map(|record| record.into_session())
            .collect();

        check_baseline(&game, &questions);
        debug!(
            %game_id,
            questions = questions.len(),
            sessions = sessions.len(),
            phase = ?game.phase,
            "baseline established"
        );

        Ok(Baseline {
            game,
            questions,
            sessions,
        })
    }
}

/// Sanity checks on persisted state. Anomalies are logged, not fatal: a
/// current-question pointer past the known set simply renders as waiting
/// until the missing question record arrives on the feed.
fn check_baseline(game: &GameRecord, questions: &[QuestionRecord]) {
    for (expected, question) in questions.iter().enumerate() {
        if question.position != expected {
            warn!(
                game_id = %game.id,
                question_id = %question.id,
                position = question.position,
                expected,
                "question positions are not contiguous"
            );
            break;
        }
    }

    if let StoredPhase::InProgress { current_index } = game.phase
        && current_index >= questions.len()
    {
        warn!(
            game_id = %game.id,
            current_index,
            questions = questions.len(),
            "persisted question pointer is beyond the known question set"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dao::memory::MemoryStore;
    use crate::dao::storage::{GameDraft, QuestionDraft, RecordDraft, SessionDraft};
    use crate::feed::ChangeFeed;

    async fn seeded_store() -> (Arc<dyn RecordStore>, Uuid) {
        let store: Arc<dyn RecordStore> = Arc::new(MemoryStore::new(ChangeFeed::new(64)));
        let game_id = store
            .insert(RecordDraft::Game(GameDraft {
                title: "baseline test".into(),
                description: String::new(),
                category: "other".into(),
            }))
            .await
            .unwrap()
            .id();
        (store, game_id)
    }

    fn question_draft(game_id: Uuid, position: usize) -> RecordDraft {
        RecordDraft::Question(QuestionDraft {
            game_id,
            position,
            text: format!("question {position}"),
            correct_answer: "yes".into(),
            incorrect_answers: ["no".into(), "maybe".into(), "later".into()],
            points: 10,
        })
    }

    #[tokio::test]
    async fn baseline_is_complete_and_position_sorted() {
        let (store, game_id) = seeded_store().await;

        // Insert questions out of presentation order.
        for position in [2usize, 0, 1] {
            store.insert(question_draft(game_id, position)).await.unwrap();
        }
        for name in ["alice", "bob"] {
            store
                .insert(RecordDraft::PlayerSession(SessionDraft {
                    game_id,
                    player_name: name.into(),
                }))
                .await
                .unwrap();
        }

        let baseline = Reconciler::new(store).establish(game_id).await.unwrap();
        assert_eq!(baseline.game.id, game_id);
        assert_eq!(
            baseline
                .questions
                .iter()
                .map(|q| q.position)
                .collect::<Vec<_>>(),
            [0, 1, 2]
        );
        assert_eq!(baseline.sessions.len(), 2);
        assert_eq!(baseline.question_at(1).unwrap().text, "question 1");
        assert!(baseline.question_at(3).is_none());
    }

    #[tokio::test]
    async fn unknown_game_is_reported() {
        let (store, _) = seeded_store().await;
        let err = Reconciler::new(store)
            .establish(Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::GameNotFound(_)));
    }

    #[tokio::test]
    async fn records_of_other_games_are_excluded() {
        let (store, game_id) = seeded_store().await;
        let other_game = store
            .insert(RecordDraft::Game(GameDraft {
                title: "another quiz".into(),
                description: String::new(),
                category: "other".into(),
            }))
            .await
            .unwrap()
            .id();

        store.insert(question_draft(game_id, 0)).await.unwrap();
        store.insert(question_draft(other_game, 0)).await.unwrap();

        let baseline = Reconciler::new(store).establish(game_id).await.unwrap();
        assert_eq!(baseline.questions.len(), 1);
        assert_eq!(baseline.questions[0].game_id, game_id);
    }
}
