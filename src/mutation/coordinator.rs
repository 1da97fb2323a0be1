//! Optimistic mutation coordinator
//!
//! Writes land in the cache immediately; the remote write follows once the
//! key has been quiet for the debounce window. Each key runs through
//!
//! ```text
//! Idle → Pending ⇄ Pending (value replaced, timer reset)
//!          ↓ timer fires
//!        InFlight → Committed → Idle
//!                 → RolledBack → Idle (cache reverted)
//! ```
//!
//! A write arriving while the key is in flight is applied to the cache and
//! buffered. When the commit resolves, a new cycle starts with the buffered
//! value unless it already matches what the remote store holds.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, oneshot};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::state::{commit_fn, Buffered, CommitFn, KeyState, MutationEvent, MutationPhase, Waiter};
use crate::cache::{CacheStore, Namespace};
use crate::config::MutationConfig;
use crate::remote::RemoteStore;
use crate::types::{CacheError, CommitError, Document, Result};

// =============================================================================
// Commit Functions
// =============================================================================

/// Commit through [`RemoteStore::write_field`], using the mutation key as the
/// document id.
pub fn remote_commit(remote: Arc<dyn RemoteStore>, collection: impl Into<String>) -> CommitFn {
    let collection = collection.into();
    commit_fn(move |key, value| {
        let remote = Arc::clone(&remote);
        let collection = collection.clone();
        async move { remote.write_field(&collection, &key, &value).await.map(|_| ()) }
    })
}

// =============================================================================
// Coordinator
// =============================================================================

struct MutationInner {
    store: Arc<CacheStore>,
    namespace: Namespace,
    config: MutationConfig,
    pending: DashMap<String, KeyState>,
    events: broadcast::Sender<MutationEvent>,
    disposed: AtomicBool,
}

/// Applies mutations locally and synchronizes them to the remote store in
/// the background.
///
/// Dropping the coordinator disposes it: pending and in-flight keys are
/// rolled back and their waiters fail with [`CommitError::Cancelled`].
pub struct OptimisticMutationCoordinator {
    inner: Arc<MutationInner>,
}

impl OptimisticMutationCoordinator {
    /// Create a coordinator writing into `namespace` of `store`
    pub fn new(store: Arc<CacheStore>, namespace: Namespace, config: MutationConfig) -> Result<Self> {
        config.validate()?;
        if !store.has_namespace(&namespace) {
            return Err(CacheError::UnknownNamespace(namespace.to_string()));
        }

        info!(
            namespace = %namespace,
            debounce_ms = config.debounce_ms,
            commit_timeout_ms = config.commit_timeout_ms,
            "OptimisticMutationCoordinator initialized"
        );

        let (events, _) = broadcast::channel(config.event_capacity);
        Ok(Self {
            inner: Arc::new(MutationInner {
                store,
                namespace,
                config,
                pending: DashMap::new(),
                events,
                disposed: AtomicBool::new(false),
            }),
        })
    }

    /// Create with default configuration
    pub fn with_defaults(store: Arc<CacheStore>, namespace: Namespace) -> Result<Self> {
        Self::new(store, namespace, MutationConfig::default())
    }

    /// Apply `value` to the cache now and schedule its commit.
    ///
    /// Never suspends. The outcome is reported through [`subscribe`](Self::subscribe).
    /// Must be called within a Tokio runtime.
    pub fn mutate<T: Serialize + ?Sized>(&self, key: &str, value: &T, commit: CommitFn) -> Result<()> {
        let value = serde_json::to_value(value)?;
        self.submit(key, value, commit, None)
    }

    /// Like [`mutate`](Self::mutate), then wait for the commit that carries
    /// this value to resolve.
    pub async fn mutate_await<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        commit: CommitFn,
    ) -> std::result::Result<(), CommitError> {
        let value = serde_json::to_value(value).map_err(CacheError::from)?;
        let (tx, rx) = oneshot::channel();
        self.submit(key, value, commit, Some(tx))?;
        rx.await.unwrap_or(Err(CommitError::Cancelled))
    }

    /// Receive an event for every resolved commit cycle
    pub fn subscribe(&self) -> broadcast::Receiver<MutationEvent> {
        self.inner.events.subscribe()
    }

    /// Keys currently pending or in flight
    pub fn pending_count(&self) -> usize {
        self.inner.pending.len()
    }

    /// Phase of `key`, `None` when idle
    pub fn phase(&self, key: &str) -> Option<MutationPhase> {
        self.inner.pending.get(key).map(|state| state.phase)
    }

    pub fn namespace(&self) -> &Namespace {
        &self.inner.namespace
    }

    /// Cancel every timer and in-flight commit, restore each key's previous
    /// value and fail its waiters. Later mutations return
    /// [`CacheError::Disposed`].
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::SeqCst) {
            return;
        }

        let keys: Vec<String> = self
            .inner
            .pending
            .iter()
            .map(|entry| entry.key().clone())
            .collect();

        let mut rolled_back = 0;
        for key in keys {
            let Some((key, mut state)) = self.inner.pending.remove(&key) else {
                continue;
            };
            if let Some(task) = state.task.take() {
                task.abort();
            }
            restore(&self.inner, &key, state.previous.clone());
            state.notify_all(&Err(CommitError::Cancelled));
            let _ = self.inner.events.send(MutationEvent::RolledBack {
                key,
                error: CommitError::Cancelled,
            });
            rolled_back += 1;
        }

        info!(rolled_back, "OptimisticMutationCoordinator disposed");
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }

    fn submit(&self, key: &str, value: Document, commit: CommitFn, waiter: Option<Waiter>) -> Result<()> {
        if self.inner.disposed.load(Ordering::SeqCst) {
            return Err(CacheError::Disposed);
        }
        if key.is_empty() {
            return Err(CacheError::InvalidKey("key must not be empty".into()));
        }

        let inner = &self.inner;
        let deadline = Instant::now() + inner.config.debounce();

        // Cache writes happen under the key's entry lock so they are ordered
        // with the driver's rollbacks
        match inner.pending.entry(key.to_string()) {
            Entry::Occupied(mut entry) => {
                inner.store.set_document(&inner.namespace, key, value.clone(), None)?;
                let state = entry.get_mut();
                match state.phase {
                    MutationPhase::Pending => {
                        state.desired = value;
                        state.commit = commit;
                        state.deadline = deadline;
                        state.waiters.extend(waiter);
                        debug!(key, "Pending mutation replaced, debounce reset");
                    }
                    MutationPhase::InFlight => {
                        let mut waiters = state
                            .buffered
                            .take()
                            .map(|buffered| buffered.waiters)
                            .unwrap_or_default();
                        waiters.extend(waiter);
                        state.buffered = Some(Buffered { value, commit, waiters });
                        debug!(key, "Mutation buffered behind in-flight commit");
                    }
                }
            }
            Entry::Vacant(entry) => {
                let previous = inner.store.get_document(&inner.namespace, key)?;
                inner.store.set_document(&inner.namespace, key, value.clone(), None)?;

                let mut state = KeyState::new(previous, value, deadline, commit);
                state.waiters.extend(waiter);
                let task = tokio::spawn(drive(Arc::clone(inner), key.to_string()));
                state.task = Some(task.abort_handle());
                entry.insert(state);
                debug!(key, debounce_ms = inner.config.debounce_ms, "Mutation pending");
            }
        }

        Ok(())
    }
}

impl Drop for OptimisticMutationCoordinator {
    fn drop(&mut self) {
        self.dispose();
    }
}

// =============================================================================
// Per-key Driver
// =============================================================================

/// Runs every commit cycle of one key, then exits when the key goes idle
async fn drive(inner: Arc<MutationInner>, key: String) {
    loop {
        let deadline = match inner.pending.get(&key) {
            Some(state) => state.deadline,
            None => return,
        };
        tokio::time::sleep_until(deadline).await;

        let (desired, commit, noop, attempt) = match inner.pending.get_mut(&key) {
            Some(mut state) => {
                // Debounce was reset while sleeping
                if state.deadline > Instant::now() {
                    continue;
                }
                state.phase = MutationPhase::InFlight;
                let noop = state.is_noop();
                if !(noop && inner.config.skip_noop_commits) {
                    state.attempts += 1;
                }
                (state.desired.clone(), Arc::clone(&state.commit), noop, state.attempts)
            }
            None => return,
        };

        let result = if noop && inner.config.skip_noop_commits {
            None
        } else {
            Some(run_commit(&inner, &key, desired, commit, attempt).await)
        };

        if !settle(&inner, &key, result) {
            return;
        }
    }
}

async fn run_commit(
    inner: &MutationInner,
    key: &str,
    desired: Document,
    commit: CommitFn,
    attempt: u32,
) -> std::result::Result<(), CommitError> {
    let timeout = inner.config.commit_timeout();
    debug!(key, attempt, "Committing mutation");

    match tokio::time::timeout(timeout, commit(key.to_string(), desired)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(CommitError::Remote(e)),
        Err(_) => Err(CommitError::Timeout(timeout)),
    }
}

/// Resolve the in-flight cycle of `key`. Returns true when a buffered write
/// starts another cycle.
///
/// `result` is `None` for a skipped no-op cycle.
fn settle(
    inner: &MutationInner,
    key: &str,
    result: Option<std::result::Result<(), CommitError>>,
) -> bool {
    let mut entry = match inner.pending.entry(key.to_string()) {
        Entry::Occupied(entry) => entry,
        Entry::Vacant(_) => return false,
    };

    let (event, restart) = {
        let state = entry.get_mut();

        let (event, outcome, settled) = match result {
            None => (
                MutationEvent::Skipped { key: key.to_string() },
                Ok(()),
                Some(state.desired.clone()),
            ),
            Some(Ok(())) => (
                MutationEvent::Committed { key: key.to_string() },
                Ok(()),
                Some(state.desired.clone()),
            ),
            Some(Err(error)) => (
                MutationEvent::RolledBack {
                    key: key.to_string(),
                    error: error.clone(),
                },
                Err(error),
                state.previous.clone(),
            ),
        };
        state.notify(&outcome);

        match state.buffered.take() {
            Some(buffered) if Some(&buffered.value) != settled.as_ref() => {
                // Cache already shows the buffered value
                state.previous = settled;
                state.desired = buffered.value;
                state.commit = buffered.commit;
                state.waiters = buffered.waiters;
                state.phase = MutationPhase::Pending;
                state.deadline = Instant::now() + inner.config.debounce();
                (event, true)
            }
            buffered => {
                // A buffered value equal to the settled one needs no write
                if let Some(buffered) = buffered {
                    for waiter in buffered.waiters {
                        let _ = waiter.send(Ok(()));
                    }
                }
                if outcome.is_err() {
                    restore(inner, key, settled);
                }
                (event, false)
            }
        }
    };

    match &event {
        MutationEvent::RolledBack { error, .. } => {
            warn!(key, error = %error, restart, "Mutation rolled back");
        }
        MutationEvent::Committed { .. } => debug!(key, restart, "Mutation committed"),
        MutationEvent::Skipped { .. } => debug!(key, "Mutation skipped, value unchanged"),
    }
    let _ = inner.events.send(event);

    if !restart {
        entry.remove();
    }
    restart
}

/// Put the cache back to `previous`, removing the key if it had no value
fn restore(inner: &MutationInner, key: &str, previous: Option<Document>) {
    let restored = match previous {
        Some(value) => inner.store.set_document(&inner.namespace, key, value, None),
        None => inner.store.remove(&inner.namespace, key).map(|_| ()),
    };
    if let Err(e) = restored {
        warn!(key, error = %e, "Failed to restore cached value");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RemoteError;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn counting_commit(calls: Arc<AtomicUsize>, fail: bool) -> CommitFn {
        commit_fn(move |_, _| {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                if fail {
                    Err(RemoteError::Unavailable("offline".into()))
                } else {
                    Ok(())
                }
            }
        })
    }

    fn coordinator() -> (Arc<CacheStore>, OptimisticMutationCoordinator) {
        let store = Arc::new(CacheStore::with_defaults());
        let mutations =
            OptimisticMutationCoordinator::with_defaults(Arc::clone(&store), Namespace::Volatile).unwrap();
        (store, mutations)
    }

    #[tokio::test(start_paused = true)]
    async fn test_mutation_applies_locally_then_commits() {
        let (store, mutations) = coordinator();
        let calls = Arc::new(AtomicUsize::new(0));

        mutations.mutate("fav", &true, counting_commit(Arc::clone(&calls), false)).unwrap();
        assert_eq!(store.get::<bool>(&Namespace::Volatile, "fav").unwrap(), Some(true));
        assert_eq!(mutations.phase("fav"), Some(MutationPhase::Pending));

        tokio::time::sleep(Duration::from_millis(600)).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(mutations.phase("fav"), None);
        assert_eq!(store.get::<bool>(&Namespace::Volatile, "fav").unwrap(), Some(true));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_commit_removes_previously_absent_key() {
        let (store, mutations) = coordinator();
        let calls = Arc::new(AtomicUsize::new(0));

        let result = mutations
            .mutate_await("fav", &true, counting_commit(Arc::clone(&calls), true))
            .await;

        assert!(matches!(result, Err(CommitError::Remote(_))));
        assert!(!store.contains(&Namespace::Volatile, "fav").unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_noop_cycle_skips_write() {
        let (store, mutations) = coordinator();
        store.set(&Namespace::Volatile, "fav", &false, None).unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let mut events = mutations.subscribe();

        mutations.mutate("fav", &true, counting_commit(Arc::clone(&calls), false)).unwrap();
        mutations.mutate("fav", &false, counting_commit(Arc::clone(&calls), false)).unwrap();
        tokio::time::sleep(Duration::from_millis(600)).await;

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(events.recv().await.unwrap(), MutationEvent::Skipped { key: "fav".into() });
    }

    #[tokio::test]
    async fn test_misuse_rejected() {
        let (_, mutations) = coordinator();
        let commit = commit_fn(|_, _| async { Ok::<(), RemoteError>(()) });

        assert!(matches!(
            mutations.mutate("", &1, Arc::clone(&commit)),
            Err(CacheError::InvalidKey(_))
        ));

        mutations.dispose();
        assert_eq!(mutations.mutate("k", &1, Arc::clone(&commit)), Err(CacheError::Disposed));
        assert_eq!(
            mutations.mutate_await("k", &1, commit).await,
            Err(CommitError::Rejected(CacheError::Disposed))
        );
    }

    #[test]
    fn test_unknown_namespace_rejected() {
        let store = Arc::new(CacheStore::with_defaults());
        let result = OptimisticMutationCoordinator::with_defaults(store, Namespace::custom("nope"));
        assert!(matches!(result, Err(CacheError::UnknownNamespace(_))));
    }
}
