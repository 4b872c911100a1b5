//! Derived, sorted view of every player session in a game.

use indexmap::IndexMap;
use uuid::Uuid;

use crate::dao::models::PlayerSessionRecord;
use crate::dao::storage::Record;
use crate::feed::ChangeEvent;

/// One rendered leaderboard row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaderboardRow {
    /// One-based rank after sorting.
    pub rank: usize,
    /// Session identity (row key).
    pub session_id: Uuid,
    /// Player display name.
    pub player_name: String,
    /// Latest known score.
    pub score: u32,
}

/// Mapping from session identity to its latest known record.
///
/// Updates are full-record upserts by identity (replace, not merge), guarded
/// by the record revision so duplicate or stale deliveries are no-ops. This
/// is sound because the feed orders events per record; no cross-record
/// ordering is assumed.
#[derive(Debug, Default)]
pub struct LeaderboardProjection {
    rows: IndexMap<Uuid, PlayerSessionRecord>,
}

impl LeaderboardProjection {
    /// Create an empty projection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole projection with a reconciled baseline.
    pub fn reset(&mut self, sessions: Vec<PlayerSessionRecord>) {
        self.rows.clear();
        for session in sessions {
            self.rows.insert(session.id, session);
        }
    }

    /// Apply a change feed event. Non-session records are ignored. Returns
    /// whether the projection changed.
    pub fn apply(&mut self, event: &ChangeEvent) -> bool {
        match &event.record {
            Record::PlayerSession(session) => self.upsert(session.clone()),
            _ => false,
        }
    }

    /// Upsert a session record by identity, keeping whichever revision is
    /// newest. Returns whether the projection changed.
    pub fn upsert(&mut self, session: PlayerSessionRecord) -> bool {
        match self.rows.get_mut(&session.id) {
            Some(existing) => {
                if session.rev <= existing.rev {
                    return false;
                }
                *existing = session;
                true
            }
            None => {
                self.rows.insert(session.id, session);
                true
            }
        }
    }

    /// Latest known record for a session, if observed.
    pub fn get(&self, session_id: Uuid) -> Option<&PlayerSessionRecord> {
        self.rows.get(&session_id)
    }

    /// Number of sessions observed.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether no session has been observed yet.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Full session set sorted score-descending, ties broken by session
    /// creation order so ranks are deterministic across clients.
    pub fn snapshot(&self) -> Vec<LeaderboardRow> {
        let mut sessions: Vec<&PlayerSessionRecord> = self.rows.values().collect();
        sessions.sort_by(|a, b| {
            b.score
                .cmp(&a.score)
                .then(a.created_seq.cmp(&b.created_seq))
        });
        sessions
            .into_iter()
            .enumerate()
            .map(|(index, session)| LeaderboardRow {
                rank: index + 1,
                session_id: session.id,
                player_name: session.player_name.clone(),
                score: session.score,
            })
            .collect()
    }
}
