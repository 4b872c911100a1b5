//! Bounded-backoff retry decorator for store backends.
//!
//! Only transient failures are retried; `NotFound` and `Conflict` are
//! definitive answers from the store and surface immediately. Retries repeat
//! the same logical operation, so a replayed `RecordAnswer` patch can never
//! double-credit (the store rejects the duplicate with a conflict).

use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::time::sleep;
use tracing::warn;
use uuid::Uuid;

use crate::config::RetryPolicy;
use crate::dao::storage::{
    KeyPredicate, Patch, QueryOrder, Record, RecordDraft, RecordKind, RecordStore, StorageResult,
};

/// Store decorator retrying transient failures with exponential backoff.
#[derive(Clone)]
pub struct RetryingStore {
    inner: Arc<dyn RecordStore>,
    policy: RetryPolicy,
}

impl RetryingStore {
    /// Wrap `inner` with the given retry policy.
    pub fn new(inner: Arc<dyn RecordStore>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

async fn with_retry<T, F>(policy: RetryPolicy, mut op: F) -> StorageResult<T>
where
    F: FnMut() -> BoxFuture<'static, StorageResult<T>>,
{
    let mut delay = policy.initial_backoff();
    let mut attempt = 1u32;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < policy.max_attempts => {
                warn!(attempt, error = %err, "transient store failure; retrying");
                sleep(delay).await;
                delay = (delay * 2).min(policy.max_backoff());
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

impl RecordStore for RetryingStore {
    fn get(&self, kind: RecordKind, id: Uuid) -> BoxFuture<'static, StorageResult<Option<Record>>> {
        let inner = self.inner.clone();
        let policy = self.policy;
        Box::pin(with_retry(policy, move || inner.get(kind, id)))
    }

    fn query(
        &self,
        kind: RecordKind,
        predicate: KeyPredicate,
        order: QueryOrder,
    ) -> BoxFuture<'static, StorageResult<Vec<Record>>> {
        let inner = self.inner.clone();
        let policy = self.policy;
        Box::pin(with_retry(policy, move || {
            inner.query(kind, predicate, order)
        }))
    }

    fn insert(&self, draft: RecordDraft) -> BoxFuture<'static, StorageResult<Record>> {
        let inner = self.inner.clone();
        let policy = self.policy;
        Box::pin(with_retry(policy, move || inner.insert(draft.clone())))
    }

    fn update(
        &self,
        kind: RecordKind,
        id: Uuid,
        patch: Patch,
    ) -> BoxFuture<'static, StorageResult<Record>> {
        let inner = self.inner.clone();
        let policy = self.policy;
        Box::pin(with_retry(policy, move || {
            inner.update(kind, id, patch.clone())
        }))
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let inner = self.inner.clone();
        let policy = self.policy;
        Box::pin(with_retry(policy, move || inner.health_check()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dao::memory::MemoryStore;
    use crate::feed::ChangeFeed;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff_ms: 1,
            max_backoff_ms: 5,
        }
    }

    #[tokio::test]
    async fn transient_failures_below_budget_succeed() {
        let memory = MemoryStore::new(ChangeFeed::new(8));
        memory.fail_next(2);
        let store = RetryingStore::new(Arc::new(memory), fast_policy(3));

        store.health_check().await.unwrap();
    }

    #[tokio::test]
    async fn exhausted_budget_surfaces_the_failure() {
        let memory = MemoryStore::new(ChangeFeed::new(8));
        memory.fail_next(5);
        let store = RetryingStore::new(Arc::new(memory), fast_policy(3));

        let err = store.health_check().await.unwrap_err();
        assert!(err.is_transient());
    }
}
