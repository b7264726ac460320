//! Publishing derived records to the store.
//!
//! [`MetricPublisher`] owns the startup health check and the write retry
//! policy: a bounded number of attempts, each under its own fresh timeout,
//! with exponential backoff and jitter between them. A record that cannot be
//! written is reported to the caller and dropped.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tracing::{debug, warn};

use crate::client::{ClientError, HealthStatus, MetricStore};
use crate::config::PublisherConfig;
use crate::reading::DerivedMetricRecord;

/// Default base delay for exponential backoff (in milliseconds).
const DEFAULT_BASE_DELAY_MS: u64 = 100;

/// Maximum delay between retries (in milliseconds).
const MAX_RETRY_DELAY_MS: u64 = 5_000;

/// The startup health check did not pass.
#[derive(Debug)]
pub enum HealthError {
    /// The server could not be queried
    Unreachable(ClientError),

    /// The query did not finish within the timeout
    Timeout(Duration),

    /// The server answered with a status other than "pass"
    Unhealthy {
        status: String,
        message: Option<String>,
    },
}

impl std::fmt::Display for HealthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthError::Unreachable(e) => write!(f, "failed to check InfluxDB health: {}", e),
            HealthError::Timeout(t) => write!(f, "InfluxDB health check timed out after {:?}", t),
            HealthError::Unhealthy { status, message } => write!(
                f,
                "InfluxDB did not pass health check: status {}; message '{}'",
                status,
                message.as_deref().unwrap_or("")
            ),
        }
    }
}

impl std::error::Error for HealthError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            HealthError::Unreachable(e) => Some(e),
            _ => None,
        }
    }
}

/// A record could not be written within the attempt budget.
#[derive(Debug)]
pub struct PublishError {
    /// Attempts made before giving up
    pub attempts: u32,

    pub last_error: ClientError,
}

impl std::fmt::Display for PublishError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "All {} write attempts exhausted. Last error: {}",
            self.attempts, self.last_error
        )
    }
}

impl std::error::Error for PublishError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.last_error)
    }
}

/// Outcome of a successful publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishReport {
    /// Attempts used, including the successful one
    pub attempts: u32,
}

/// Statistics about publish operations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishStats {
    /// Records written successfully
    pub records_published: u64,

    /// Records dropped after failing
    pub records_failed: u64,

    /// Write attempts made, successful or not
    pub attempts: u64,
}

#[derive(Default)]
struct AtomicStats {
    records_published: AtomicU64,
    records_failed: AtomicU64,
    attempts: AtomicU64,
}

/// Forwards records to a [`MetricStore`] with bounded retries.
pub struct MetricPublisher<M> {
    store: M,
    attempts: u32,
    timeout: Duration,
    base_delay: Duration,
    stats: AtomicStats,
}

impl<M: MetricStore> MetricPublisher<M> {
    pub fn new(store: M, config: &PublisherConfig) -> Self {
        Self::with_settings(store, config.attempts, config.timeout)
    }

    /// Create a publisher with explicit retry settings.
    pub fn with_settings(store: M, attempts: u32, timeout: Duration) -> Self {
        Self {
            store,
            attempts: attempts.max(1),
            timeout,
            base_delay: Duration::from_millis(DEFAULT_BASE_DELAY_MS),
            stats: AtomicStats::default(),
        }
    }

    /// Override the first backoff delay.
    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    /// Query store health once, bounded by the request timeout.
    ///
    /// # Errors
    ///
    /// Returns `HealthError` if the query fails, times out, or the status is
    /// not "pass".
    pub async fn check_health(&self) -> Result<HealthStatus, HealthError> {
        let health = match tokio::time::timeout(self.timeout, self.store.health()).await {
            Ok(Ok(health)) => health,
            Ok(Err(e)) => return Err(HealthError::Unreachable(e)),
            Err(_) => return Err(HealthError::Timeout(self.timeout)),
        };

        if !health.is_pass() {
            return Err(HealthError::Unhealthy {
                status: health.status,
                message: health.message,
            });
        }
        Ok(health)
    }

    /// Write a record, retrying up to the attempt budget.
    ///
    /// Every error is retried, each attempt under its own timeout.
    pub async fn publish(&self, record: &DerivedMetricRecord) -> Result<PublishReport, PublishError> {
        let mut attempt = 0;

        loop {
            if attempt > 0 {
                let delay = self.calculate_backoff_delay(attempt - 1);
                debug!(
                    attempt = attempt + 1,
                    max_attempts = self.attempts,
                    delay_ms = delay.as_millis() as u64,
                    "Retrying write after failure"
                );
                tokio::time::sleep(delay).await;
            }
            attempt += 1;
            self.stats.attempts.fetch_add(1, Ordering::Relaxed);

            let error = match tokio::time::timeout(self.timeout, self.store.write(record)).await {
                Ok(Ok(())) => {
                    self.stats.records_published.fetch_add(1, Ordering::Relaxed);
                    return Ok(PublishReport { attempts: attempt });
                }
                Ok(Err(e)) => e,
                Err(_) => ClientError::Timeout,
            };

            if attempt >= self.attempts {
                self.stats.records_failed.fetch_add(1, Ordering::Relaxed);
                return Err(PublishError {
                    attempts: attempt,
                    last_error: error,
                });
            }

            warn!(
                error = %error,
                transient = error.is_retryable(),
                attempt = attempt,
                max_attempts = self.attempts,
                "Write failed, will retry"
            );
        }
    }

    /// Calculate the backoff delay before retry number `retry` (0-based).
    ///
    /// Uses exponential backoff with jitter:
    /// delay = min(base_delay * 2^retry + jitter, max_delay)
    fn calculate_backoff_delay(&self, retry: u32) -> Duration {
        let base_delay = self.base_delay.as_millis() as u64;

        let exponential_delay = base_delay.saturating_mul(1 << retry.min(10));

        // Add jitter (up to 25% of the delay)
        let jitter = rand::random::<u64>() % (exponential_delay / 4 + 1);

        let total_delay = exponential_delay.saturating_add(jitter).min(MAX_RETRY_DELAY_MS);

        Duration::from_millis(total_delay)
    }

    pub fn stats(&self) -> PublishStats {
        PublishStats {
            records_published: self.stats.records_published.load(Ordering::Relaxed),
            records_failed: self.stats.records_failed.load(Ordering::Relaxed),
            attempts: self.stats.attempts.load(Ordering::Relaxed),
        }
    }
}
