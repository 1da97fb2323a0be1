//! Per-key mutation state

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tokio::time::Instant;

use crate::types::{CommitError, Document, RemoteError};

/// Remote write for one key. Receives the key and the value to persist.
pub type CommitFn =
    Arc<dyn Fn(String, Document) -> BoxFuture<'static, Result<(), RemoteError>> + Send + Sync>;

/// Wrap an async closure as a [`CommitFn`]
pub fn commit_fn<F, Fut>(f: F) -> CommitFn
where
    F: Fn(String, Document) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), RemoteError>> + Send + 'static,
{
    Arc::new(move |key, value| f(key, value).boxed())
}

/// Where a key is in its commit cycle. Keys with no entry are idle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationPhase {
    /// Written locally, waiting for the debounce window to close
    Pending,
    /// Remote write in progress
    InFlight,
}

/// Outcome of a commit cycle, broadcast to subscribers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationEvent {
    /// Remote write succeeded
    Committed { key: String },
    /// Remote write failed or timed out; the cache was reverted
    RolledBack { key: String, error: CommitError },
    /// Value ended where it started, nothing was written
    Skipped { key: String },
}

impl MutationEvent {
    pub fn key(&self) -> &str {
        match self {
            Self::Committed { key } | Self::RolledBack { key, .. } | Self::Skipped { key } => key,
        }
    }
}

pub(crate) type Waiter = oneshot::Sender<Result<(), CommitError>>;

/// A write that arrived while the key was in flight
pub(crate) struct Buffered {
    pub(crate) value: Document,
    pub(crate) commit: CommitFn,
    pub(crate) waiters: Vec<Waiter>,
}

pub(crate) struct KeyState {
    pub(crate) phase: MutationPhase,
    /// Value before the cycle started; `None` if the key was absent
    pub(crate) previous: Option<Document>,
    pub(crate) desired: Document,
    pub(crate) deadline: Instant,
    pub(crate) commit: CommitFn,
    /// Remote writes issued for this key since it left idle
    pub(crate) attempts: u32,
    pub(crate) waiters: Vec<Waiter>,
    pub(crate) buffered: Option<Buffered>,
    /// Driver task for this key
    pub(crate) task: Option<AbortHandle>,
}

impl KeyState {
    pub(crate) fn new(
        previous: Option<Document>,
        desired: Document,
        deadline: Instant,
        commit: CommitFn,
    ) -> Self {
        Self {
            phase: MutationPhase::Pending,
            previous,
            desired,
            deadline,
            commit,
            attempts: 0,
            waiters: Vec::new(),
            buffered: None,
            task: None,
        }
    }

    /// Cycle would leave the remote value unchanged
    pub(crate) fn is_noop(&self) -> bool {
        self.previous.as_ref() == Some(&self.desired)
    }

    /// Resolve every waiter of the current cycle
    pub(crate) fn notify(&mut self, result: &Result<(), CommitError>) {
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(result.clone());
        }
    }

    /// Resolve every waiter, including those of a buffered write
    pub(crate) fn notify_all(&mut self, result: &Result<(), CommitError>) {
        self.notify(result);
        if let Some(buffered) = self.buffered.as_mut() {
            for waiter in buffered.waiters.drain(..) {
                let _ = waiter.send(result.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn noop_commit() -> CommitFn {
        commit_fn(|_, _| async { Ok::<(), RemoteError>(()) })
    }

    #[test]
    fn test_noop_detection() {
        let now = Instant::now();
        assert!(KeyState::new(Some(json!(false)), json!(false), now, noop_commit()).is_noop());
        assert!(!KeyState::new(Some(json!(false)), json!(true), now, noop_commit()).is_noop());
        assert!(!KeyState::new(None, json!(false), now, noop_commit()).is_noop());
    }

    #[tokio::test]
    async fn test_notify_all_reaches_buffered_waiters() {
        let mut state = KeyState::new(None, json!(1), Instant::now(), noop_commit());
        let (tx1, rx1) = oneshot::channel();
        let (tx2, rx2) = oneshot::channel();
        state.waiters.push(tx1);
        state.buffered = Some(Buffered {
            value: json!(2),
            commit: noop_commit(),
            waiters: vec![tx2],
        });

        state.notify_all(&Err(CommitError::Cancelled));

        assert_eq!(rx1.await.unwrap(), Err(CommitError::Cancelled));
        assert_eq!(rx2.await.unwrap(), Err(CommitError::Cancelled));
    }

    #[test]
    fn test_event_key() {
        let event = MutationEvent::RolledBack {
            key: "fav".into(),
            error: CommitError::Cancelled,
        };
        assert_eq!(event.key(), "fav");
    }
}
