//! Bounded-retry invoker used by every convergence check.
//!
//! An operation reports one of three [Outcome]s per attempt. Only
//! [Outcome::Retryable] makes the poller sleep and try again. The poller
//! knows nothing about what it is polling.

use std::future::Future;
use std::time::Duration;

use log::{debug, trace, warn};
use thiserror::Error;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::config::PollConfiguration;
use crate::network::ServiceError;

/// Result of one probe attempt.
#[derive(Debug)]
pub enum Outcome<T> {
    Success(T),
    Retryable(String),
    Fatal(anyhow::Error),
}

impl<T> Outcome<T> {
    /// Maps a service call into an outcome. Transient failures are retried,
    /// permanent ones are not.
    pub fn from_service<F>(result: Result<T, ServiceError>, on_success: F) -> Self
    where
        F: FnOnce(T) -> Outcome<T>,
    {
        match result {
            Ok(value) => on_success(value),
            Err(ServiceError::Transient(reason)) => Outcome::Retryable(reason),
            Err(err @ ServiceError::Permanent(_)) => Outcome::Fatal(err.into()),
        }
    }
}

#[derive(Error, Debug)]
pub enum PollError {
    #[error("gave up after {attempts} attempts: {reason}")]
    Exhausted { attempts: usize, reason: String },
    #[error("{0}")]
    Fatal(anyhow::Error),
    #[error("cancelled after {attempts} attempts")]
    Cancelled { attempts: usize },
}

#[derive(Debug, Clone)]
pub struct Poller {
    delay: Duration,
    max_attempts: usize,
    cancellation: CancellationToken,
}

impl Poller {
    pub fn new(delay: Duration, max_attempts: usize) -> Self {
        Self {
            delay,
            max_attempts: max_attempts.max(1),
            cancellation: CancellationToken::new(),
        }
    }

    pub fn from_config(config: &PollConfiguration) -> Self {
        Self::new(Duration::from_millis(config.delay_ms), config.attempts)
    }

    pub fn with_cancellation(self, cancellation: CancellationToken) -> Self {
        Self {
            cancellation,
            ..self
        }
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    /// Calls `operation` until it succeeds, fails fatally, or the attempt
    /// budget is spent. `operation` receives the 1-based attempt number.
    ///
    /// There is no sleep after the last attempt, so the worst case wait is
    /// `delay * (max_attempts - 1)`.
    pub async fn invoke<T, F, Fut>(&self, label: &str, mut operation: F) -> Result<T, PollError>
    where
        F: FnMut(usize) -> Fut,
        Fut: Future<Output = Outcome<T>>,
    {
        let mut attempt = 0;
        loop {
            if self.cancellation.is_cancelled() {
                return Err(PollError::Cancelled { attempts: attempt });
            }
            attempt += 1;

            match operation(attempt).await {
                Outcome::Success(value) => {
                    trace!("{label}: converged on attempt {attempt}");
                    return Ok(value);
                }
                Outcome::Fatal(err) => {
                    debug!("{label}: fatal on attempt {attempt}: {err}");
                    return Err(PollError::Fatal(err));
                }
                Outcome::Retryable(reason) => {
                    if attempt >= self.max_attempts {
                        warn!("{label}: exhausted {attempt} attempts: {reason}");
                        return Err(PollError::Exhausted {
                            attempts: attempt,
                            reason,
                        });
                    }
                    debug!(
                        "{label}: attempt {attempt}/{} not converged ({reason}), retrying in {:?}",
                        self.max_attempts, self.delay
                    );
                    tokio::select! {
                        _ = self.cancellation.cancelled() => {
                            return Err(PollError::Cancelled { attempts: attempt });
                        }
                        _ = sleep(self.delay) => {}
                    }
                }
            }
        }
    }

    /// Issues a single network call, repeating it only while the network
    /// reports a transient failure.
    pub async fn call<T, F, Fut>(&self, label: &str, mut operation: F) -> Result<T, PollError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = crate::network::Result<T>>,
    {
        self.invoke(label, |_| {
            let call = operation();
            async move { Outcome::from_service(call.await, Outcome::Success) }
        })
        .await
    }
}
