//! Client-facing services built on the store, the feed, and the state
//! machine.

/// Host-side control surface.
pub mod host;
/// Answer scoring.
pub mod ledger;
/// Player-side replicated view.
pub mod player;
/// Connection-time baseline fetch.
pub mod reconciler;

pub use self::host::HostClient;
pub use self::ledger::{ScoreLedger, ScoreResult};
pub use self::player::PlayerClient;
pub use self::reconciler::{Baseline, Reconciler};
