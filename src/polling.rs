//! Bounded poll-until-condition primitive.
//!
//! Re-reads a remote value at a fixed interval until a predicate holds or a
//! deadline passes. The final sleep is clipped to the deadline, so the call
//! returns at most one fetch duration after it. A timeout only stops the local
//! wait; the remote operation keeps going.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use uuid::Uuid;

use crate::error::Result;
use crate::model::SourceFileStatus;
use crate::remote::RemoteCaseClient;

/// Default interval between status reads.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Result of a bounded wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome<T> {
    /// The predicate held for this value.
    Satisfied(T),
    /// The deadline passed. Carries the last value read, if any.
    TimedOut { last: Option<T> },
}

impl<T> PollOutcome<T> {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::TimedOut { .. })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PollingWaiter {
    interval: Duration,
}

impl Default for PollingWaiter {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL)
    }
}

impl PollingWaiter {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    /// Poll `fetch` until `predicate` holds or `timeout` elapses.
    ///
    /// Fetch errors are returned immediately; the waiter does not retry
    /// failed reads.
    pub async fn wait_until<T, F, Fut, P>(
        &self,
        mut fetch: F,
        predicate: P,
        timeout: Duration,
    ) -> Result<PollOutcome<T>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
        P: Fn(&T) -> bool,
    {
        let deadline = Instant::now() + timeout;
        let mut polls: u32 = 0;

        loop {
            let value = fetch().await?;
            polls += 1;
            if predicate(&value) {
                tracing::trace!(polls, "Poll condition satisfied");
                return Ok(PollOutcome::Satisfied(value));
            }

            let now = Instant::now();
            if now >= deadline {
                tracing::debug!(
                    polls,
                    timeout_ms = timeout.as_millis() as u64,
                    "Poll deadline passed"
                );
                return Ok(PollOutcome::TimedOut { last: Some(value) });
            }

            tokio::time::sleep(self.interval.min(deadline - now)).await;
        }
    }

    /// Wait for a source file to reach `READY` or `ERROR`.
    ///
    /// Returns the observed terminal status, or the synthetic
    /// [`SourceFileStatus::Timeout`] when the deadline passes first.
    pub async fn wait_for_file_ready_or_timeout(
        &self,
        client: &dyn RemoteCaseClient,
        file_id: Uuid,
        timeout: Duration,
    ) -> Result<SourceFileStatus> {
        let outcome = self
            .wait_until(
                move || async move { client.get_file(file_id).await.map(|f| f.status) },
                |status| matches!(status, SourceFileStatus::Ready | SourceFileStatus::Error),
                timeout,
            )
            .await?;

        Ok(match outcome {
            PollOutcome::Satisfied(status) => status,
            PollOutcome::TimedOut { .. } => SourceFileStatus::Timeout,
        })
    }
}
