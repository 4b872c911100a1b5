//! In-memory store backend wired to the change feed.
//!
//! Every committed mutation publishes exactly one [`ChangeEvent`]. Updates
//! publish while still holding the record entry, so feed subscribers observe
//! events for the same record in write order.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::SystemTime;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::future::BoxFuture;
use indexmap::IndexMap;
use thiserror::Error;
use uuid::Uuid;

use crate::dao::models::{GameRecord, PlayerSessionRecord, QuestionRecord, StoredPhase};
use crate::dao::storage::{
    KeyPredicate, Patch, QueryOrder, Record, RecordDraft, RecordKind, RecordStore, SessionPatch,
    StorageError, StorageResult,
};
use crate::feed::{ChangeEvent, ChangeFeed, EventKind};

/// Marker error used by the fault injection gate.
#[derive(Debug, Error)]
#[error("injected fault")]
struct InjectedFault;

/// Shared-memory store backend, usable as the authoritative store in tests
/// and demos.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<MemoryInner>,
}

struct MemoryInner {
    games: DashMap<Uuid, GameRecord>,
    questions: DashMap<Uuid, QuestionRecord>,
    sessions: DashMap<Uuid, PlayerSessionRecord>,
    seq: AtomicU64,
    fail_next: AtomicU32,
    feed: ChangeFeed,
}

impl MemoryStore {
    /// Create an empty store publishing mutations to `feed`.
    pub fn new(feed: ChangeFeed) -> Self {
        Self {
            inner: Arc::new(MemoryInner {
                games: DashMap::new(),
                questions: DashMap::new(),
                sessions: DashMap::new(),
                seq: AtomicU64::new(0),
                fail_next: AtomicU32::new(0),
                feed,
            }),
        }
    }

    /// Make the next `count` operations fail with a transient error, to
    /// exercise retry paths.
    pub fn fail_next(&self, count: u32) {
        self.inner.fail_next.store(count, Ordering::SeqCst);
    }
}

impl MemoryInner {
    fn fault_gate(&self) -> StorageResult<()> {
        let mut remaining = self.fail_next.load(Ordering::SeqCst);
        loop {
            if remaining == 0 {
                return Ok(());
            }
            match self.fail_next.compare_exchange(
                remaining,
                remaining - 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => {
                    return Err(StorageError::unavailable(
                        "injected transient failure".into(),
                        InjectedFault,
                    ));
                }
                Err(current) => remaining = current,
            }
        }
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn publish(&self, kind: EventKind, record: Record) {
        self.feed.publish(ChangeEvent { kind, record });
    }

    fn get_record(&self, kind: RecordKind, id: Uuid) -> Option<Record> {
        match kind {
            RecordKind::Game => self.games.get(&id).map(|r| Record::Game(r.clone())),
            RecordKind::Question => self.questions.get(&id).map(|r| Record::Question(r.clone())),
            RecordKind::PlayerSession => self
                .sessions
                .get(&id)
                .map(|r| Record::PlayerSession(r.clone())),
        }
    }

    fn query_records(
        &self,
        kind: RecordKind,
        predicate: KeyPredicate,
        order: QueryOrder,
    ) -> Vec<Record> {
        let mut records: Vec<Record> = match kind {
            RecordKind::Game => self
                .games
                .iter()
                .map(|r| Record::Game(r.clone()))
                .collect(),
            RecordKind::Question => self
                .questions
                .iter()
                .map(|r| Record::Question(r.clone()))
                .collect(),
            RecordKind::PlayerSession => self
                .sessions
                .iter()
                .map(|r| Record::PlayerSession(r.clone()))
                .collect(),
        };
        records.retain(|record| predicate.matches(record));

        match order {
            QueryOrder::CreationAsc => {
                records.sort_by_key(created_seq_of);
            }
            QueryOrder::ScoreDesc => {
                records.sort_by(|a, b| {
                    score_of(b)
                        .cmp(&score_of(a))
                        .then(created_seq_of(a).cmp(&created_seq_of(b)))
                });
            }
        }
        records
    }

    fn insert_record(&self, draft: RecordDraft) -> Record {
        let id = Uuid::new_v4();
        let created_seq = self.next_seq();
        let created_at = SystemTime::now();

        let record = match draft {
            RecordDraft::Game(game) => {
                let record = GameRecord {
                    id,
                    rev: 0,
                    created_seq,
                    created_at,
                    title: game.title,
                    description: game.description,
                    category: game.category,
                    phase: StoredPhase::Lobby,
                };
                self.games.insert(id, record.clone());
                Record::Game(record)
            }
            RecordDraft::Question(question) => {
                let record = QuestionRecord {
                    id,
                    rev: 0,
                    created_seq,
                    created_at,
                    game_id: question.game_id,
                    position: question.position,
                    text: question.text,
                    correct_answer: question.correct_answer,
                    incorrect_answers: question.incorrect_answers,
                    points: question.points,
                };
                self.questions.insert(id, record.clone());
                Record::Question(record)
            }
            RecordDraft::PlayerSession(session) => {
                let record = PlayerSessionRecord {
                    id,
                    rev: 0,
                    created_seq,
                    created_at,
                    game_id: session.game_id,
                    player_name: session.player_name,
                    score: 0,
                    answers: IndexMap::new(),
                };
                self.sessions.insert(id, record.clone());
                Record::PlayerSession(record)
            }
        };

        // The id escapes only through the return value, so no update to this
        // record can be published before this insert event.
        self.publish(EventKind::Insert, record.clone());
        record
    }

    fn update_record(&self, kind: RecordKind, id: Uuid, patch: Patch) -> StorageResult<Record> {
        match (kind, patch) {
            (RecordKind::Game, Patch::Game(patch)) => match self.games.entry(id) {
                Entry::Occupied(mut entry) => {
                    let game = entry.get_mut();
                    game.phase = patch.phase;
                    game.rev += 1;
                    let record = Record::Game(game.clone());
                    // Published under the entry lock to keep per-record order.
                    self.publish(EventKind::Update, record.clone());
                    Ok(record)
                }
                Entry::Vacant(_) => Err(StorageError::NotFound { kind, id }),
            },
            (RecordKind::PlayerSession, Patch::Session(patch)) => match self.sessions.entry(id) {
                Entry::Occupied(mut entry) => {
                    let session = entry.get_mut();
                    let SessionPatch::RecordAnswer {
                        question_id,
                        answer,
                        award,
                    } = patch;

                    if session.answers.contains_key(&question_id) {
                        return Err(StorageError::Conflict {
                            message: format!(
                                "session `{id}` already answered question `{question_id}`"
                            ),
                        });
                    }

                    session.answers.insert(question_id, answer);
                    // Read-modify-write against the stored value; callers
                    // never supply an absolute score.
                    session.score += award;
                    session.rev += 1;
                    let record = Record::PlayerSession(session.clone());
                    self.publish(EventKind::Update, record.clone());
                    Ok(record)
                }
                Entry::Vacant(_) => Err(StorageError::NotFound { kind, id }),
            },
            (kind, patch) => Err(StorageError::Conflict {
                message: format!("patch {patch:?} does not apply to record kind `{kind}`"),
            }),
        }
    }
}

fn created_seq_of(record: &Record) -> u64 {
    match record {
        Record::Game(game) => game.created_seq,
        Record::Question(question) => question.created_seq,
        Record::PlayerSession(session) => session.created_seq,
    }
}

fn score_of(record: &Record) -> u32 {
    match record {
        Record::PlayerSession(session) => session.score,
        _ => 0,
    }
}

impl RecordStore for MemoryStore {
    fn get(&self, kind: RecordKind, id: Uuid) -> BoxFuture<'static, StorageResult<Option<Record>>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            inner.fault_gate()?;
            Ok(inner.get_record(kind, id))
        })
    }

    fn query(
        &self,
        kind: RecordKind,
        predicate: KeyPredicate,
        order: QueryOrder,
    ) -> BoxFuture<'static, StorageResult<Vec<Record>>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            inner.fault_gate()?;
            Ok(inner.query_records(kind, predicate, order))
        })
    }

    fn insert(&self, draft: RecordDraft) -> BoxFuture<'static, StorageResult<Record>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            inner.fault_gate()?;
            Ok(inner.insert_record(draft))
        })
    }

    fn update(
        &self,
        kind: RecordKind,
        id: Uuid,
        patch: Patch,
    ) -> BoxFuture<'static, StorageResult<Record>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            inner.fault_gate()?;
            inner.update_record(kind, id, patch)
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let inner = self.inner.clone();
        Box::pin(async move { inner.fault_gate() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dao::storage::{GameDraft, SessionDraft};

    fn store() -> MemoryStore {
        MemoryStore::new(ChangeFeed::new(64))
    }

    async fn seed_session(store: &MemoryStore) -> PlayerSessionRecord {
        let game = store
            .insert(RecordDraft::Game(GameDraft {
                title: "store test".into(),
                description: String::new(),
                category: "other".into(),
            }))
            .await
            .unwrap()
            .into_game()
            .unwrap();

        store
            .insert(RecordDraft::PlayerSession(SessionDraft {
                game_id: game.id,
                player_name: "ada".into(),
            }))
            .await
            .unwrap()
            .into_session()
            .unwrap()
    }

    #[tokio::test]
    async fn record_answer_is_atomic_and_rejects_duplicates() {
        let store = store();
        let session = seed_session(&store).await;
        let question_id = Uuid::new_v4();

        let patch = || {
            Patch::Session(SessionPatch::RecordAnswer {
                question_id,
                answer: "Paris".into(),
                award: 100,
            })
        };

        let updated = store
            .update(RecordKind::PlayerSession, session.id, patch())
            .await
            .unwrap()
            .into_session()
            .unwrap();
        assert_eq!(updated.score, 100);
        assert_eq!(updated.rev, 1);

        let err = store
            .update(RecordKind::PlayerSession, session.id, patch())
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Conflict { .. }));

        let current = store
            .get(RecordKind::PlayerSession, session.id)
            .await
            .unwrap()
            .unwrap()
            .into_session()
            .unwrap();
        assert_eq!(current.score, 100);
    }

    #[tokio::test]
    async fn concurrent_increments_do_not_lose_updates() {
        let store = store();
        let session = seed_session(&store).await;

        let mut tasks = Vec::new();
        for n in 0..10u32 {
            let store = store.clone();
            let session_id = session.id;
            tasks.push(tokio::spawn(async move {
                store
                    .update(
                        RecordKind::PlayerSession,
                        session_id,
                        Patch::Session(SessionPatch::RecordAnswer {
                            question_id: Uuid::new_v4(),
                            answer: format!("answer {n}"),
                            award: 10,
                        }),
                    )
                    .await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let current = store
            .get(RecordKind::PlayerSession, session.id)
            .await
            .unwrap()
            .unwrap()
            .into_session()
            .unwrap();
        assert_eq!(current.score, 100);
        assert_eq!(current.answers.len(), 10);
    }

    #[tokio::test]
    async fn fault_injection_surfaces_transient_errors() {
        let store = store();
        store.fail_next(2);

        assert!(store.health_check().await.is_err());
        assert!(store.health_check().await.is_err());
        assert!(store.health_check().await.is_ok());
    }

    #[tokio::test]
    async fn queries_filter_and_order() {
        let store = store();
        let game = store
            .insert(RecordDraft::Game(GameDraft {
                title: "ordering".into(),
                description: String::new(),
                category: "other".into(),
            }))
            .await
            .unwrap()
            .into_game()
            .unwrap();

        for name in ["first", "second", "third"] {
            store
                .insert(RecordDraft::PlayerSession(SessionDraft {
                    game_id: game.id,
                    player_name: name.into(),
                }))
                .await
                .unwrap();
        }

        let sessions = store
            .query(
                RecordKind::PlayerSession,
                KeyPredicate::ByGame(game.id),
                QueryOrder::CreationAsc,
            )
            .await
            .unwrap();
        let names: Vec<String> = sessions
            .into_iter()
            .map(|r| r.into_session().unwrap().player_name)
            .collect();
        assert_eq!(names, ["first", "second", "third"]);

        let unrelated = store
            .query(
                RecordKind::PlayerSession,
                KeyPredicate::ByGame(Uuid::new_v4()),
                QueryOrder::CreationAsc,
            )
            .await
            .unwrap();
        assert!(unrelated.is_empty());
    }

    #[tokio::test]
    async fn score_order_sorts_descending_with_join_order_ties() {
        let store = store();
        let game = store
            .insert(RecordDraft::Game(GameDraft {
                title: "scores".into(),
                description: String::new(),
                category: "other".into(),
            }))
            .await
            .unwrap()
            .into_game()
            .unwrap();

        for (name, award) in [("low", 10), ("high", 50), ("tied", 10)] {
            let session = store
                .insert(RecordDraft::PlayerSession(SessionDraft {
                    game_id: game.id,
                    player_name: name.into(),
                }))
                .await
                .unwrap();
            store
                .update(
                    RecordKind::PlayerSession,
                    session.id(),
                    Patch::Session(SessionPatch::RecordAnswer {
                        question_id: Uuid::new_v4(),
                        answer: "x".into(),
                        award,
                    }),
                )
                .await
                .unwrap();
        }

        let names: Vec<String> = store
            .query(
                RecordKind::PlayerSession,
                KeyPredicate::ByGame(game.id),
                QueryOrder::ScoreDesc,
            )
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.into_session().unwrap().player_name)
            .collect();
        assert_eq!(names, ["high", "low", "tied"]);
    }
}
