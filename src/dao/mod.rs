//! Typed access to the shared transactional record store.

/// In-memory store backend.
pub mod memory;
/// Record definitions shared across layers.
pub mod models;
/// Bounded-backoff retry decorator.
pub mod retry;
/// Storage abstraction and error types.
pub mod storage;
