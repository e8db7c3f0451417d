use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;

use crate::config::RecoveryConfig;

/// Classified failure surfaced by any bot component
#[derive(Debug, Error)]
pub enum BotError {
    #[error("network error: {0}")]
    Network(String),
    #[error("exchange api error (status {status}): {message}")]
    Api { status: u16, message: String },
    #[error("malformed data: {0}")]
    Data(String),
    #[error("internal error: {0}")]
    Internal(String),
    #[error("strategy error: {0}")]
    Strategy(String),
    #[error("external dependency error: {0}")]
    External(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Network,
    Api,
    Data,
    Internal,
    Strategy,
    External,
}

impl BotError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BotError::Network(_) => ErrorKind::Network,
            BotError::Api { .. } => ErrorKind::Api,
            BotError::Data(_) => ErrorKind::Data,
            BotError::Internal(_) => ErrorKind::Internal,
            BotError::Strategy(_) => ErrorKind::Strategy,
            BotError::External(_) => ErrorKind::External,
        }
    }

    /// Transient failures are worth retrying; logic and data failures are not
    pub fn is_retryable(&self) -> bool {
        match self {
            BotError::Network(_) | BotError::External(_) => true,
            BotError::Api { status, .. } => *status == 429 || *status >= 500,
            BotError::Data(_) | BotError::Internal(_) | BotError::Strategy(_) => false,
        }
    }
}

impl From<reqwest::Error> for BotError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() {
            BotError::Network(err.to_string())
        } else if let Some(status) = err.status() {
            BotError::Api {
                status: status.as_u16(),
                message: err.to_string(),
            }
        } else if err.is_decode() {
            BotError::Data(err.to_string())
        } else {
            BotError::External(err.to_string())
        }
    }
}

impl From<serde_json::Error> for BotError {
    fn from(err: serde_json::Error) -> Self {
        BotError::Data(err.to_string())
    }
}

/// Terminal result of a recovery attempt
#[derive(Debug)]
pub enum RecoveryOutcome<T> {
    Recovered { value: T, attempts: u32 },
    /// Retries exhausted but a last-known-good value was substituted
    Degraded { value: T, error: BotError, attempts: u32 },
    GaveUp { error: BotError, attempts: u32 },
    /// Shutdown requested mid-backoff
    Aborted,
}

impl<T> RecoveryOutcome<T> {
    pub fn into_value(self) -> Option<T> {
        match self {
            RecoveryOutcome::Recovered { value, .. }
            | RecoveryOutcome::Degraded { value, .. } => Some(value),
            _ => None,
        }
    }
}

/// Bounded exponential-backoff retry with shutdown awareness
///
/// Non-retryable errors short-circuit, retryable ones back off between
/// attempts. A shutdown signal during backoff aborts immediately rather
/// than finishing the schedule.
#[derive(Debug, Clone)]
pub struct RecoveryExecutor {
    config: RecoveryConfig,
    shutdown: watch::Receiver<bool>,
}

impl RecoveryExecutor {
    pub fn new(config: RecoveryConfig, shutdown: watch::Receiver<bool>) -> Self {
        Self { config, shutdown }
    }

    pub async fn run<T, F, Fut>(&self, op_name: &str, operation: F) -> RecoveryOutcome<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, BotError>>,
    {
        let mut shutdown = self.shutdown.clone();
        for attempt in 1..=self.config.max_attempts {
            match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::info!(op = op_name, attempt, "operation recovered");
                    }
                    return RecoveryOutcome::Recovered {
                        value,
                        attempts: attempt,
                    };
                }
                Err(error) if !error.is_retryable() => {
                    tracing::error!(op = op_name, %error, "non-retryable failure");
                    return RecoveryOutcome::GaveUp {
                        error,
                        attempts: attempt,
                    };
                }
                Err(error) if attempt == self.config.max_attempts => {
                    tracing::error!(op = op_name, %error, attempt, "retries exhausted");
                    return RecoveryOutcome::GaveUp {
                        error,
                        attempts: attempt,
                    };
                }
                Err(error) => {
                    let backoff = self.backoff_delay(attempt);
                    tracing::warn!(
                        op = op_name,
                        %error,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        "transient failure, backing off"
                    );
                    if *shutdown.borrow() {
                        tracing::info!(op = op_name, "recovery aborted by shutdown");
                        return RecoveryOutcome::Aborted;
                    }
                    tokio::select! {
                        _ = tokio::time::sleep(backoff) => {}
                        _ = shutdown.changed() => {
                            if *shutdown.borrow() {
                                tracing::info!(op = op_name, "recovery aborted by shutdown");
                                return RecoveryOutcome::Aborted;
                            }
                        }
                    }
                }
            }
        }
        RecoveryOutcome::Aborted
    }

    /// Like `run`, but substitutes a last-known-good value when retries are
    /// exhausted and one is available
    pub async fn run_with_fallback<T, F, Fut>(
        &self,
        op_name: &str,
        operation: F,
        fallback: Option<T>,
    ) -> RecoveryOutcome<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, BotError>>,
    {
        match self.run(op_name, operation).await {
            RecoveryOutcome::GaveUp { error, attempts } => match fallback {
                Some(value) => {
                    tracing::warn!(op = op_name, %error, "degrading to last known good value");
                    RecoveryOutcome::Degraded {
                        value,
                        error,
                        attempts,
                    }
                }
                None => RecoveryOutcome::GaveUp { error, attempts },
            },
            other => other,
        }
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = self
            .config
            .base_backoff_ms
            .saturating_mul(1u64 << (attempt - 1).min(16));
        Duration::from_millis(exp.min(self.config.max_backoff_ms))
    }
}
