//! Registration Liveness Task
//!
//! One task per registered node. The task calls `keep` until the first
//! success, sleeping a fixed interval between failures, and then exits; lease
//! renewal from that point on belongs to the store. There is no retry limit.
//!
//! State machine: `Pending -> Done`, or `Pending -> Cancelled` when the caller
//! cancels through the handle. Neither terminal state goes back to `Pending`.

use crate::observability::{events, metrics};
use crate::store::KvStore;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::AbortHandle;

/// Lifecycle of one registration task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationState {
    /// `keep` has not succeeded yet; the task is attempting or backing off
    Pending,
    /// `keep` succeeded once and the task exited
    Done,
    /// The task was cancelled before `keep` succeeded
    Cancelled,
}

impl RegistrationState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, RegistrationState::Pending)
    }
}

struct Registration {
    service: String,
    key: String,
    state: watch::Sender<RegistrationState>,
    attempts: AtomicU64,
}

impl Registration {
    /// Move out of `Pending`. Only the first transition wins.
    fn finish(&self, outcome: RegistrationState) -> bool {
        let finished = self.state.send_if_modified(|state| {
            if *state == RegistrationState::Pending {
                *state = outcome;
                true
            } else {
                false
            }
        });
        if finished {
            metrics::registration_finished();
        }
        finished
    }
}

/// Handle to a registration task held by the registry.
///
/// Dropping the handle does not stop the task.
#[derive(Clone)]
pub struct RegistrationHandle {
    inner: Arc<Registration>,
    abort: AbortHandle,
}

impl RegistrationHandle {
    /// Spawn the liveness task for `key`. Must be called within a Tokio runtime.
    pub(crate) fn spawn(
        store: Arc<dyn KvStore>,
        service: String,
        key: String,
        value: Vec<u8>,
        retry_interval: Duration,
    ) -> Self {
        let (state, _) = watch::channel(RegistrationState::Pending);
        let inner = Arc::new(Registration {
            service,
            key,
            state,
            attempts: AtomicU64::new(0),
        });

        metrics::registration_started();
        let task = tokio::spawn(keep_registered(
            store,
            value,
            retry_interval,
            inner.clone(),
        ));

        Self {
            inner,
            abort: task.abort_handle(),
        }
    }

    /// Store key being registered
    pub fn key(&self) -> &str {
        &self.inner.key
    }

    /// Service the node was registered under
    pub fn service(&self) -> &str {
        &self.inner.service
    }

    pub fn state(&self) -> RegistrationState {
        *self.inner.state.borrow()
    }

    /// Number of `keep` attempts started so far
    pub fn attempts(&self) -> u64 {
        self.inner.attempts.load(Ordering::Acquire)
    }

    /// Wait until the task leaves `Pending` and return the final state
    pub async fn wait(&self) -> RegistrationState {
        let mut rx = self.inner.state.subscribe();
        let result = rx.wait_for(|state| state.is_terminal()).await.map(|state| *state);
        result.unwrap_or_else(|_| self.state())
    }

    /// Cancel the task if `keep` has not succeeded yet.
    ///
    /// Returns `false` when the registration already finished. A `keep` call
    /// in flight at the moment of cancellation is dropped mid-way, so the key
    /// may or may not exist in the store afterwards.
    pub fn cancel(&self) -> bool {
        if !self.inner.finish(RegistrationState::Cancelled) {
            return false;
        }
        self.abort.abort();
        events::registration_cancelled(&self.inner.key, self.attempts());
        true
    }
}

impl std::fmt::Debug for RegistrationHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistrationHandle")
            .field("service", &self.inner.service)
            .field("key", &self.inner.key)
            .field("state", &self.state())
            .field("attempts", &self.attempts())
            .finish()
    }
}

async fn keep_registered(
    store: Arc<dyn KvStore>,
    value: Vec<u8>,
    retry_interval: Duration,
    registration: Arc<Registration>,
) {
    loop {
        let attempt = registration.attempts.fetch_add(1, Ordering::AcqRel) + 1;

        match store.keep(&registration.key, &value).await {
            Ok(()) => {
                metrics::record_registration_attempt(&registration.service, true);
                if registration.finish(RegistrationState::Done) {
                    events::registration_succeeded(&registration.key, attempt);
                }
                return;
            }
            Err(e) => {
                metrics::record_registration_attempt(&registration.service, false);
                events::registration_attempt_failed(
                    &registration.key,
                    attempt,
                    &e.to_string(),
                    retry_interval,
                );
                tokio::time::sleep(retry_interval).await;
            }
        }
    }
}
