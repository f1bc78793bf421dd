//! Result-code classification and the connection-loss retry policy.
//!
//! Business logic never sees `ConnectionLoss`: [`RetryPolicy::run`] re-issues
//! the operation until it produces an [`Outcome`] or a fatal error.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::{CoordinationError, ResultCode};

/// The non-fatal outcomes of an operation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome<T> {
    /// The operation succeeded.
    Done(T),

    /// The addressed node does not exist.
    NoNode,

    /// A node already exists at the addressed path.
    NodeExists,
}

impl<T> Outcome<T> {
    /// Returns the value of a successful outcome.
    pub fn done(self) -> Option<T> {
        match self {
            Self::Done(value) => Some(value),
            Self::NoNode | Self::NodeExists => None,
        }
    }
}

/// What to do with the result of an operation.
#[derive(Debug)]
pub enum Disposition<T, E> {
    /// Issue the same request again.
    Retry(E),

    /// Hand the outcome to business logic.
    Proceed(Outcome<T>),

    /// Give up; the awaiting caller fails.
    Fail(E),
}

/// Maps an operation result to a [`Disposition`].
pub fn classify<T, E: CoordinationError>(result: Result<T, E>) -> Disposition<T, E> {
    match result {
        Ok(value) => Disposition::Proceed(Outcome::Done(value)),
        Err(err) => match err.code() {
            ResultCode::ConnectionLoss => Disposition::Retry(err),
            ResultCode::NoNode => Disposition::Proceed(Outcome::NoNode),
            ResultCode::NodeExists => Disposition::Proceed(Outcome::NodeExists),
            ResultCode::Ok | ResultCode::OtherError => Disposition::Fail(err),
        },
    }
}

/// How connection-loss retries are paced and bounded.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts before giving up, `None` for no limit.
    pub max_attempts: Option<u32>,

    /// Delay before the first retry. Doubled for each following retry.
    pub initial_backoff: Duration,

    /// Upper bound for the delay between retries.
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: None,
            initial_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Retries without delay and without limit.
    #[must_use]
    pub const fn immediate() -> Self {
        Self {
            max_attempts: None,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    /// Limits the number of attempts.
    #[must_use]
    pub const fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// Runs `attempt` until it yields an outcome.
    ///
    /// # Errors
    ///
    /// Returns the error of a fatal attempt, or the last connection-loss
    /// error once `max_attempts` is exhausted.
    pub async fn run<T, E, F, Fut>(&self, operation: &str, mut attempt: F) -> Result<Outcome<T>, E>
    where
        E: CoordinationError,
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<T, E>> + Send,
    {
        let mut attempts = 0u32;
        let mut backoff = self.initial_backoff;

        loop {
            attempts = attempts.saturating_add(1);

            match classify(attempt().await) {
                Disposition::Proceed(outcome) => return Ok(outcome),
                Disposition::Fail(err) => return Err(err),
                Disposition::Retry(err) => {
                    if self.max_attempts.is_some_and(|max| attempts >= max) {
                        warn!("{operation} still losing connection after {attempts} attempts: {err}");
                        return Err(err);
                    }

                    debug!("{operation} lost connection (attempt {attempts}), retrying");

                    if !backoff.is_zero() {
                        tokio::time::sleep(backoff).await;
                    }
                    backoff = (backoff * 2).min(self.max_backoff);
                }
            }
        }
    }
}
