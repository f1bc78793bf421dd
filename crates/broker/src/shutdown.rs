use std::sync::Arc;

use convoy_coordination::{CoordinationClient, Outcome, RetryPolicy, WatchEvent};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Latch released once the shutdown node exists.
#[derive(Clone, Debug)]
pub struct ShutdownSignal {
    path: Arc<str>,
    signaled: Arc<watch::Sender<bool>>,
    token: CancellationToken,
}

impl ShutdownSignal {
    /// Creates an unreleased latch for the node at `path`.
    ///
    /// Waiters give up when `token` is cancelled.
    pub fn new(path: impl Into<String>, token: CancellationToken) -> Self {
        let (signaled, _) = watch::channel(false);
        Self {
            path: Arc::from(path.into()),
            signaled: Arc::new(signaled),
            token,
        }
    }

    /// The watched node.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Whether the shutdown node has been seen.
    #[must_use]
    pub fn is_signaled_shutdown(&self) -> bool {
        *self.signaled.borrow()
    }

    /// Releases the latch.
    pub fn signal(&self) {
        self.signaled.send_if_modified(|signaled| !std::mem::replace(signaled, true));
    }

    /// Blocks until the latch is released.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Interrupted`] if the token is cancelled first.
    pub async fn wait_for_shutdown(&self) -> Result<()> {
        let mut signaled = self.signaled.subscribe();
        let released = async { signaled.wait_for(|signaled| *signaled).await.is_ok() };

        tokio::select! {
            biased;
            true = released => Ok(()),
            () = self.token.cancelled() => Err(Error::Interrupted),
        }
    }

    /// Keeps a watch on the shutdown node and releases the latch once it
    /// exists. Returns after releasing, or when the token is cancelled.
    ///
    /// # Errors
    ///
    /// Returns the coordination error of a fatal attempt.
    pub async fn watch<C: CoordinationClient>(&self, client: &C, retry: &RetryPolicy) -> Result<()> {
        let path = &*self.path;

        loop {
            let outcome = tokio::select! {
                () = self.token.cancelled() => return Ok(()),
                outcome = retry.run("exists", || client.exists_watched(path)) => {
                    outcome.map_err(Error::coordination)?
                }
            };

            let Outcome::Done((stat, watch)) = outcome else {
                continue;
            };

            if stat.is_some() {
                info!("shutdown requested through {path}");
                self.signal();
                return Ok(());
            }

            let event = tokio::select! {
                () = self.token.cancelled() => return Ok(()),
                event = watch.fired() => event,
            };

            debug!("shutdown watch on {path} fired: {event:?}");
            if event == WatchEvent::SessionClosed {
                return Ok(());
            }
        }
    }
}
