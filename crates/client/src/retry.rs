//! Bounded retry with linear backoff.

use std::{fmt::Display, future::Future, time::Duration};

use {tokio_util::sync::CancellationToken, tracing::debug};

/// Retry schedule: up to `attempts` tries, waiting `backoff * n` after the
/// n-th failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    /// Schedule for sends and fetches.
    pub const SEND: Self = Self {
        attempts: 10,
        backoff: Duration::from_millis(250),
    };

    /// Schedule for bookkeeping calls that must not be dropped, such as
    /// route logs and completions after a handler failure.
    pub const PATIENT: Self = Self {
        attempts: 40,
        backoff: Duration::from_millis(250),
    };

    #[must_use]
    pub const fn new(attempts: u32, backoff: Duration) -> Self {
        Self { attempts, backoff }
    }

    /// Run `operation` until it succeeds or the attempt budget is spent.
    /// Success returns immediately; the last error is returned once the
    /// budget is exhausted. Zero attempts behaves as one.
    pub async fn run<T, E, F, Fut>(&self, mut operation: F) -> Result<T, E>
    where
        E: Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let attempts = self.attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match operation().await {
                Ok(value) => return Ok(value),
                Err(error) if attempt < attempts => {
                    debug!(attempt, error = %error, "retrying after failure");
                    tokio::time::sleep(self.backoff * attempt).await;
                }
                Err(error) => return Err(error),
            }
        }
    }

    /// Like [`run`](Self::run), but give up once `cancel` fires: checked
    /// before each attempt and raced against the backoff sleep. An attempt
    /// already in flight is never interrupted. Returns `None` when
    /// cancellation won, the operation's final result otherwise.
    pub async fn run_until_cancelled<T, E, F, Fut>(
        &self,
        cancel: &CancellationToken,
        mut operation: F,
    ) -> Option<Result<T, E>>
    where
        E: Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let attempts = self.attempts.max(1);
        let mut attempt = 0;
        loop {
            if cancel.is_cancelled() {
                return None;
            }
            attempt += 1;
            match operation().await {
                Ok(value) => return Some(Ok(value)),
                Err(error) if attempt < attempts => {
                    debug!(attempt, error = %error, "retrying after failure");
                    tokio::select! {
                        () = tokio::time::sleep(self.backoff * attempt) => {}
                        () = cancel.cancelled() => return None,
                    }
                }
                Err(error) => return Some(Err(error)),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::SEND
    }
}
