//! Single-flight session renewal.
//!
//! When several requests hit an expired access token at once, only one of
//! them may spend the refresh token: refresh tokens are single-use or rate
//! limited server-side, so parallel renewals would race and sign the user
//! out. The coordinator admits the first caller as the leader and queues the
//! rest; all of them receive the leader's outcome.
//!
//! # States
//!
//! - `Idle` - no renewal outstanding
//! - `Renewing` - one renewal call in flight, with the callers waiting on it
//!
//! The `Idle -> Renewing` check-and-set happens under a mutex that is never
//! held across an `.await`. The renewal itself runs on a spawned task, so a
//! leader whose future is dropped does not strand the callers queued behind
//! it.
//!
//! # Settlement
//!
//! - Success: the credential store is replaced, then every waiter receives
//!   the new credential in arrival order
//! - Failure: the credential store is cleared, then every waiter receives the
//!   same [`RenewalError`]
//!
//! The store is only touched if it still holds the credential the renewal
//! started from. A logout or a fresh login while the call is in flight wins;
//! the waiters still receive the outcome.
//!
//! Store update and the return to `Idle` happen under the same lock, so a
//! caller admitted after settlement always observes the settled store.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use secrecy::SecretString;
use tokio::sync::oneshot;

use crate::credential::{Credential, CredentialStore};
use crate::error::RenewalError;

type Outcome = Result<Credential, RenewalError>;
type Waiter = oneshot::Sender<Outcome>;

enum Flight {
    Idle,
    Renewing {
        /// Access token of the credential being renewed.
        basis: SecretString,
        waiters: Vec<Waiter>,
    },
}

/// How a caller was admitted.
enum Admission {
    /// The store already holds a credential other than the rejected one.
    Reuse(Credential),
    /// Queued behind an in-flight renewal.
    Joined,
    /// Owns a new renewal, starting from this credential.
    Lead(Credential),
    /// Nothing to renew with; the store has been cleared.
    NoRefreshToken,
}

/// Coordinates credential renewal for one client instance.
pub struct RenewalCoordinator {
    credentials: Arc<CredentialStore>,
    flight: Mutex<Flight>,
    timeout: Option<Duration>,
    started: AtomicU64,
}

impl std::fmt::Debug for RenewalCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenewalCoordinator")
            .field("renewing", &self.is_renewing())
            .field("timeout", &self.timeout)
            .field("renewals_started", &self.renewals_started())
            .finish_non_exhaustive()
    }
}

impl RenewalCoordinator {
    /// Create a coordinator that settles into `credentials`.
    ///
    /// `timeout` bounds each renewal attempt; `None` waits as long as the
    /// transport does.
    #[must_use]
    pub const fn new(credentials: Arc<CredentialStore>, timeout: Option<Duration>) -> Self {
        Self {
            credentials,
            flight: Mutex::new(Flight::Idle),
            timeout,
            started: AtomicU64::new(0),
        }
    }

    /// Whether a renewal is currently in flight.
    #[must_use]
    pub fn is_renewing(&self) -> bool {
        matches!(*self.lock_flight(), Flight::Renewing { .. })
    }

    /// Number of renewal calls started over the coordinator's lifetime.
    #[must_use]
    pub fn renewals_started(&self) -> u64 {
        self.started.load(Ordering::Relaxed)
    }

    /// Obtain a credential that replaces `rejected`.
    ///
    /// `rejected` is the access token the server just refused (`None` if the
    /// request went out without one). If the store already holds a different
    /// credential and nothing is in flight, that credential is returned
    /// without a new renewal. Otherwise the caller either starts a renewal
    /// with `renew` or waits for the one in flight; `renew` is only invoked
    /// by the caller that starts the renewal.
    ///
    /// # Errors
    ///
    /// Returns the renewal's `RenewalError`. The credential store is empty
    /// afterwards unless the session was replaced while the renewal ran.
    pub async fn obtain_fresh_credential<F, Fut>(
        self: &Arc<Self>,
        rejected: Option<&SecretString>,
        renew: F,
    ) -> Result<Credential, RenewalError>
    where
        F: FnOnce(Credential) -> Fut,
        Fut: Future<Output = Outcome> + Send + 'static,
    {
        let (waiter, outcome) = oneshot::channel();

        match self.admit(rejected, waiter) {
            Admission::Reuse(credential) => return Ok(credential),
            Admission::NoRefreshToken => return Err(RenewalError::MissingRefreshToken),
            Admission::Joined => drop(renew),
            Admission::Lead(current) => {
                let attempt = renew(current);
                let settlement = Settlement {
                    coordinator: Arc::clone(self),
                    settled: false,
                };
                let timeout = self.timeout;
                tokio::spawn(async move {
                    let outcome = match timeout {
                        Some(limit) => tokio::time::timeout(limit, attempt)
                            .await
                            .unwrap_or(Err(RenewalError::TimedOut(limit))),
                        None => attempt.await,
                    };
                    settlement.settle(outcome);
                });
            }
        }

        outcome.await.unwrap_or(Err(RenewalError::Abandoned))
    }

    fn admit(&self, rejected: Option<&SecretString>, waiter: Waiter) -> Admission {
        let mut flight = self.lock_flight();

        if let Flight::Renewing { waiters, .. } = &mut *flight {
            waiters.push(waiter);
            tracing::debug!(queued = waiters.len(), "Joined in-flight session renewal");
            return Admission::Joined;
        }

        match self.credentials.get() {
            Some(current) if rejected.is_none_or(|token| !current.has_access_token(token)) => {
                tracing::debug!("Reusing credential renewed by an earlier caller");
                Admission::Reuse(current)
            }
            Some(current) if current.refresh_token.is_some() => {
                *flight = Flight::Renewing {
                    basis: current.access_token.clone(),
                    waiters: vec![waiter],
                };
                self.started.fetch_add(1, Ordering::Relaxed);
                tracing::info!(owner_id = %current.owner_id, "Starting session renewal");
                Admission::Lead(current)
            }
            _ => {
                self.credentials.clear();
                tracing::warn!("Access token rejected and no refresh token is available");
                Admission::NoRefreshToken
            }
        }
    }

    fn settle(&self, outcome: &Outcome) {
        let (waiters, applied) = {
            let mut flight = self.lock_flight();
            match std::mem::replace(&mut *flight, Flight::Idle) {
                Flight::Renewing { basis, waiters } => {
                    let next = outcome.as_ref().ok().cloned();
                    let applied = self.credentials.replace_if_current(&basis, next);
                    (waiters, applied)
                }
                Flight::Idle => (Vec::new(), false),
            }
        };

        match outcome {
            _ if !applied => tracing::info!(
                waiters = waiters.len(),
                "Session changed during renewal, credential store left as is"
            ),
            Ok(_) => tracing::info!(waiters = waiters.len(), "Session renewed"),
            Err(e) => tracing::warn!(
                waiters = waiters.len(),
                error = %e,
                "Session renewal failed, credential cleared"
            ),
        }

        for waiter in waiters {
            // A waiter whose caller went away has dropped its receiver.
            let _ = waiter.send(outcome.clone());
        }
    }

    fn lock_flight(&self) -> MutexGuard<'_, Flight> {
        self.flight.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Settles the flight exactly once, failing it with `Abandoned` if the
/// renewal task is torn down before producing an outcome.
struct Settlement {
    coordinator: Arc<RenewalCoordinator>,
    settled: bool,
}

impl Settlement {
    fn settle(mut self, outcome: Outcome) {
        self.settled = true;
        self.coordinator.settle(&outcome);
    }
}

impl Drop for Settlement {
    fn drop(&mut self) {
        if !self.settled {
            self.coordinator.settle(&Err(RenewalError::Abandoned));
        }
    }
}
