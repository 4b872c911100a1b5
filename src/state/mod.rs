//! Host-side shared state: the authoritative state machine and its
//! transition protocol.

/// Lifecycle state machine and its plan/apply/abort protocol.
pub mod state_machine;

use std::time::Duration;

use tokio::sync::{Mutex, RwLock};
use tokio::time::timeout;
use tracing::warn;

use crate::error::EngineError;

pub use self::state_machine::{
    AbortError, ApplyError, GameEvent, GamePhase, GameStateMachine, InvalidTransition, Plan,
    PlanError, PlanId, Snapshot,
};

/// Shared wrapper around the state machine serializing phase transitions.
///
/// A transition is planned, the target phase is persisted to the store, and
/// the plan is applied only once the write succeeded; on failure or timeout
/// the plan is aborted and the phase is unchanged. The gate mutex keeps
/// concurrent host calls from interleaving their plans.
pub struct HostState {
    machine: RwLock<GameStateMachine>,
    transition_gate: Mutex<()>,
    transition_timeout: Option<Duration>,
}

impl HostState {
    /// Wrap a state machine with the given per-transition timeout.
    pub fn new(machine: GameStateMachine, transition_timeout: Option<Duration>) -> Self {
        Self {
            machine: RwLock::new(machine),
            transition_gate: Mutex::new(()),
            transition_timeout,
        }
    }

    /// Snapshot the current phase.
    pub async fn phase(&self) -> GamePhase {
        self.machine.read().await.phase()
    }

    /// Snapshot the full state machine state.
    pub async fn snapshot(&self) -> Snapshot {
        self.machine.read().await.snapshot()
    }

    async fn plan_transition(&self, event: GameEvent) -> Result<Plan, PlanError> {
        let mut machine = self.machine.write().await;
        machine.plan(event)
    }

    async fn apply_planned_transition(&self, plan_id: PlanId) -> Result<GamePhase, ApplyError> {
        let mut machine = self.machine.write().await;
        machine.apply(plan_id)
    }

    async fn abort_transition(&self, plan_id: PlanId) -> Result<(), AbortError> {
        let mut machine = self.machine.write().await;
        machine.abort(plan_id)
    }

    /// Run one phase transition: plan `event`, execute `work` with the
    /// planned target phase (typically the store write persisting it), then
    /// apply the plan. `work` failing or timing out aborts the plan.
    pub async fn run_transition<F, Fut, T>(
        &self,
        event: GameEvent,
        work: F,
    ) -> Result<(T, GamePhase), EngineError>
    where
        F: FnOnce(GamePhase) -> Fut,
        Fut: Future<Output = Result<T, EngineError>>,
    {
        let gate = self.transition_gate.lock().await;
        let Plan {
            id: plan_id, to, ..
        } = self.plan_transition(event).await?;

        let work_future = work(to);
        let outcome = if let Some(limit) = self.transition_timeout {
            match timeout(limit, work_future).await {
                Ok(result) => result,
                Err(_) => {
                    if let Err(abort_err) = self.abort_transition(plan_id).await {
                        warn!(
                            ?event,
                            plan_id = %plan_id,
                            error = ?abort_err,
                            "failed to abort transition after timeout"
                        );
                    }
                    drop(gate);
                    return Err(EngineError::Timeout);
                }
            }
        } else {
            work_future.await
        };

        match outcome {
            Ok(value) => {
                let next = self.apply_planned_transition(plan_id).await?;
                drop(gate);
                Ok((value, next))
            }
            Err(err) => {
                if let Err(abort_err) = self.abort_transition(plan_id).await {
                    warn!(
                        ?event,
                        plan_id = %plan_id,
                        error = ?abort_err,
                        "failed to abort transition after work error"
                    );
                }
                drop(gate);
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn successful_work_applies_the_plan() {
        let state = HostState::new(GameStateMachine::new(), None);
        let (_, next) = state
            .run_transition(GameEvent::Start, |to| async move {
                assert_eq!(to, GamePhase::InProgress { current_index: 0 });
                Ok(())
            })
            .await
            .unwrap();
        assert_eq!(next, GamePhase::InProgress { current_index: 0 });
        assert_eq!(state.phase().await, next);
    }

    #[tokio::test]
    async fn failing_work_aborts_and_keeps_the_phase() {
        let state = HostState::new(GameStateMachine::new(), None);
        let err = state
            .run_transition(GameEvent::Start, |_| async {
                Err::<(), _>(EngineError::InvalidState("boom".into()))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidState(_)));
        assert_eq!(state.phase().await, GamePhase::Lobby);
        assert!(state.snapshot().await.pending.is_none());
    }

    #[tokio::test]
    async fn slow_work_times_out_and_aborts() {
        let state = HostState::new(GameStateMachine::new(), Some(Duration::from_millis(10)));
        let err = state
            .run_transition(GameEvent::Start, |_| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Timeout));
        assert_eq!(state.phase().await, GamePhase::Lobby);
    }
}
