use std::time::Instant;

use thiserror::Error;
use uuid::Uuid;

use crate::dao::models::StoredPhase;

/// Lifecycle phases of a quiz, authoritative at the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GamePhase {
    /// Questions are being authored; no current question.
    Lobby,
    /// The quiz is running.
    InProgress {
        /// Zero-based index of the current question.
        current_index: usize,
    },
    /// Terminal phase; no transitions lead out of it.
    Completed,
}

impl From<GamePhase> for StoredPhase {
    fn from(phase: GamePhase) -> Self {
        match phase {
            GamePhase::Lobby => StoredPhase::Lobby,
            GamePhase::InProgress { current_index } => StoredPhase::InProgress { current_index },
            GamePhase::Completed => StoredPhase::Completed,
        }
    }
}

impl From<StoredPhase> for GamePhase {
    fn from(phase: StoredPhase) -> Self {
        match phase {
            StoredPhase::Lobby => GamePhase::Lobby,
            StoredPhase::InProgress { current_index } => GamePhase::InProgress { current_index },
            StoredPhase::Completed => GamePhase::Completed,
        }
    }
}

/// Events that can be applied to the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameEvent {
    /// Host starts the quiz at question zero. The no-questions guard lives in
    /// the host surface; a start event always carries at least one question.
    Start,
    /// Host moves the current-question pointer forward by one; runs the quiz
    /// out when the pointer would pass the last question.
    Advance {
        /// Number of questions in the game at the time of the event.
        question_count: usize,
    },
    /// Host ends the quiz early.
    End,
}

/// Error returned when attempting to apply an invalid transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition: {event:?} cannot be applied while in {from:?}")]
pub struct InvalidTransition {
    /// The phase the state machine was in when the invalid event arrived.
    pub from: GamePhase,
    /// The event that cannot be applied from this phase.
    pub event: GameEvent,
}

/// Errors that can occur when planning a state machine transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    /// A transition is already pending and must be applied or aborted.
    AlreadyPending,
    /// The requested transition is not valid from the current phase.
    InvalidTransition(InvalidTransition),
}

/// Errors that can occur when applying a planned transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyError {
    /// No transition is currently pending.
    NoPending,
    /// Plan id does not match the pending plan.
    IdMismatch {
        /// Expected plan id.
        expected: PlanId,
        /// Provided plan id.
        got: PlanId,
    },
    /// Phase changed since the plan was created.
    PhaseMismatch {
        /// Phase when the plan was created.
        expected: GamePhase,
        /// Current phase.
        actual: GamePhase,
    },
    /// Version changed since the plan was created.
    VersionMismatch {
        /// Version expected after applying this transition.
        expected: usize,
        /// Version the machine would actually move to.
        actual: usize,
    },
}

/// Errors that can occur when aborting a planned transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortError {
    /// No transition is currently pending.
    NoPending,
    /// Plan id does not match the pending plan.
    IdMismatch {
        /// Expected plan id.
        expected: PlanId,
        /// Provided plan id.
        got: PlanId,
    },
}

/// Unique identifier for a planned state transition.
pub type PlanId = Uuid;

/// A transition that has been validated but not yet applied. The host
/// persists the target phase to the store between `plan` and `apply`, and
/// aborts the plan when the write fails.
#[derive(Debug, Clone)]
pub struct Plan {
    /// Unique identifier for this plan.
    pub id: PlanId,
    /// Phase the state machine is currently in.
    pub from: GamePhase,
    /// Phase the state machine will transition to.
    pub to: GamePhase,
    /// Event that triggered this transition.
    pub event: GameEvent,
    /// Version number after applying this transition.
    pub version_next: usize,
    /// Timestamp when this plan was created.
    pub pending_since: Instant,
}

/// Snapshot of the current state machine state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    /// Current phase of the state machine.
    pub phase: GamePhase,
    /// Version number (increments on each applied transition).
    pub version: usize,
    /// Target phase of the pending transition, if any.
    pub pending: Option<GamePhase>,
}

/// Host-side state machine governing the quiz lifecycle.
///
/// Players never hold one of these; they replicate the stored phase through
/// the change feed and only observe it.
#[derive(Debug, Clone)]
pub struct GameStateMachine {
    phase: GamePhase,
    version: usize,
    pending: Option<Plan>,
}

impl Default for GameStateMachine {
    fn default() -> Self {
        Self {
            phase: GamePhase::Lobby,
            version: 0,
            pending: None,
        }
    }
}

impl GameStateMachine {
    /// Create a new state machine initialised in the lobby.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a state machine resuming from a persisted phase.
    pub fn resume(phase: GamePhase) -> Self {
        Self {
            phase,
            version: 0,
            pending: None,
        }
    }

    /// Inspect the current phase.
    pub fn phase(&self) -> GamePhase {
        self.phase
    }

    /// Create a snapshot of the current state machine state.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            phase: self.phase,
            version: self.version,
            pending: self.pending.as_ref().map(|plan| plan.to),
        }
    }

    /// Plan a transition by validating that the event can be applied from the
    /// current phase. Returns a plan that must later be applied or aborted.
    pub fn plan(&mut self, event: GameEvent) -> Result<Plan, PlanError> {
        if self.pending.is_some() {
            return Err(PlanError::AlreadyPending);
        }

        let next = self
            .compute_transition(event)
            .map_err(PlanError::InvalidTransition)?;

        let plan = Plan {
            id: Uuid::new_v4(),
            from: self.phase,
            to: next,
            event,
            version_next: self.version + 1,
            pending_since: Instant::now(),
        };

        self.pending = Some(plan.clone());

        Ok(plan)
    }

    /// Apply a planned transition, moving the state machine to the next
    /// phase. Returns the new phase.
    pub fn apply(&mut self, plan_id: PlanId) -> Result<GamePhase, ApplyError> {
        let plan = self.pending.take().ok_or(ApplyError::NoPending)?;

        if plan.id != plan_id {
            let expected = plan.id;
            self.pending = Some(plan);
            return Err(ApplyError::IdMismatch {
                expected,
                got: plan_id,
            });
        }

        if self.phase != plan.from {
            return Err(ApplyError::PhaseMismatch {
                expected: plan.from,
                actual: self.phase,
            });
        }

        if self.version + 1 != plan.version_next {
            return Err(ApplyError::VersionMismatch {
                expected: plan.version_next,
                actual: self.version + 1,
            });
        }

        self.phase = plan.to;
        self.version = plan.version_next;
        self.pending = None;

        Ok(self.phase)
    }

    /// Abort a planned transition without applying it.
    pub fn abort(&mut self, plan_id: PlanId) -> Result<(), AbortError> {
        let plan = self.pending.as_ref().ok_or(AbortError::NoPending)?;

        if plan.id != plan_id {
            return Err(AbortError::IdMismatch {
                expected: plan.id,
                got: plan_id,
            });
        }

        self.pending = None;
        Ok(())
    }

    /// Compute the target phase for an event, if the transition is valid.
    ///
    /// No backward transitions exist and nothing leads out of `Completed`.
    fn compute_transition(&self, event: GameEvent) -> Result<GamePhase, InvalidTransition> {
        let next = match (self.phase, event) {
            (GamePhase::Lobby, GameEvent::Start) => GamePhase::InProgress { current_index: 0 },
            (GamePhase::InProgress { current_index }, GameEvent::Advance { question_count }) => {
                if current_index + 1 < question_count {
                    GamePhase::InProgress {
                        current_index: current_index + 1,
                    }
                } else {
                    GamePhase::Completed
                }
            }
            (GamePhase::InProgress { .. }, GameEvent::End) => GamePhase::Completed,
            (from, event) => return Err(InvalidTransition { from, event }),
        };

        Ok(next)
    }
}
