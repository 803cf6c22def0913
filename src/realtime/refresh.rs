//! Coalesced refresh triggering.
//!
//! Channel events and the fallback timer both call
//! [`RefreshController::request_refresh`]. At most one fetch runs at a
//! time. Requests arriving while a fetch is in flight join a single
//! trailing fetch that starts once the current one finishes, so a change
//! signalled mid-fetch is never lost and never causes more than one
//! extra round trip.

use std::fmt::Display;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use miette::Diagnostic;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, warn};

#[derive(Error, Diagnostic, Debug, Clone, PartialEq, Eq)]
pub enum RefreshError {
    #[error("Refresh failed: {message}")]
    #[diagnostic(code(dashboard::refresh::failed))]
    Failed { message: String },

    #[error("Refresh was abandoned before completing")]
    #[diagnostic(code(dashboard::refresh::aborted))]
    Aborted,
}

pub type RefreshOutcome = Result<(), RefreshError>;

type FetchFn = dyn Fn() -> BoxFuture<'static, Result<(), String>> + Send + Sync;
type Round = watch::Sender<Option<RefreshOutcome>>;

#[derive(Default)]
struct Rounds {
    running: Option<Round>,
    queued: Option<Round>,
}

struct Inner {
    fetch: Box<FetchFn>,
    rounds: Mutex<Rounds>,
    fetches: AtomicU64,
}

impl Inner {
    fn rounds(&self) -> MutexGuard<'_, Rounds> {
        self.rounds.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Deduplicating front for a data-fetching callback. Cloning is cheap and
/// clones share the same in-flight state.
#[derive(Clone)]
pub struct RefreshController {
    inner: Arc<Inner>,
}

impl RefreshController {
    pub fn new<F, Fut, E>(fetch: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        let fetch = move || -> BoxFuture<'static, Result<(), String>> {
            let fut = fetch();
            Box::pin(async move { fut.await.map_err(|e| e.to_string()) })
        };
        Self {
            inner: Arc::new(Inner {
                fetch: Box::new(fetch),
                rounds: Mutex::new(Rounds::default()),
                fetches: AtomicU64::new(0),
            }),
        }
    }

    /// Ask for fresh data and wait for the outcome of the fetch this call
    /// was folded into.
    pub async fn request_refresh(&self) -> RefreshOutcome {
        let mut rx = {
            let mut rounds = self.inner.rounds();
            if rounds.running.is_none() {
                let (tx, rx) = watch::channel(None);
                rounds.running = Some(tx);
                spawn_fetch_loop(Arc::clone(&self.inner));
                rx
            } else if let Some(queued) = &rounds.queued {
                debug!("Refresh already queued, joining it");
                queued.subscribe()
            } else {
                debug!("Refresh in flight, queueing one trailing refresh");
                let (tx, rx) = watch::channel(None);
                rounds.queued = Some(tx);
                rx
            }
        };

        match rx.wait_for(Option::is_some).await {
            Ok(outcome) => outcome.clone().unwrap_or(Err(RefreshError::Aborted)),
            Err(_) => Err(RefreshError::Aborted),
        }
    }

    pub fn is_refreshing(&self) -> bool {
        self.inner.rounds().running.is_some()
    }

    /// Underlying fetches started so far.
    pub fn fetch_count(&self) -> u64 {
        self.inner.fetches.load(Ordering::Acquire)
    }
}

fn spawn_fetch_loop(inner: Arc<Inner>) {
    tokio::spawn(async move {
        loop {
            inner.fetches.fetch_add(1, Ordering::AcqRel);
            let result = AssertUnwindSafe(async { (inner.fetch)().await })
                .catch_unwind()
                .await;

            let outcome = match result {
                Ok(Ok(())) => Ok(()),
                Ok(Err(message)) => {
                    warn!("Refresh failed: {}", message);
                    Err(RefreshError::Failed { message })
                }
                Err(_) => {
                    error!("Refresh callback panicked");
                    Err(RefreshError::Failed {
                        message: "refresh callback panicked".to_string(),
                    })
                }
            };

            let (finished, more) = {
                let mut rounds = inner.rounds();
                let finished = rounds.running.take();
                rounds.running = rounds.queued.take();
                (finished, rounds.running.is_some())
            };
            if let Some(finished) = finished {
                finished.send_replace(Some(outcome));
            }
            if !more {
                break;
            }
        }
    });
}
