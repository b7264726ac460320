//! The sampling loop.
//!
//! The scheduler starts in STARTING, runs the store health check, and either
//! fails (the caller exits) or enters RUNNING. In RUNNING it fires one
//! iteration immediately and then one per interval until shut down:
//!
//! ```text
//! read sensor -> validate -> derive record -> publish
//! ```
//!
//! A failure at any step is logged and abandons only that iteration.
//! Iterations never overlap. If one overruns the interval, the next starts
//! right away and missed ticks are not replayed.

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::client::MetricStore;
use crate::config::Config;
use crate::publisher::{HealthError, MetricPublisher};
use crate::reading::{DerivedMetricRecord, RecordTarget, ValidationRanges};
use crate::sensor::{Sensor, SensorReader};

/// Sending half of the shutdown signal.
///
/// Triggering it, or dropping it, asks the loop to stop.
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

impl ShutdownTrigger {
    pub fn trigger(&self) {
        // No receivers left means nobody is running; nothing to stop.
        let _ = self.tx.send(true);
    }
}

/// Receiving half of the shutdown signal, checked between steps.
#[derive(Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    pub fn channel() -> (ShutdownTrigger, Shutdown) {
        let (tx, rx) = watch::channel(false);
        (ShutdownTrigger { tx }, Shutdown { rx })
    }

    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow() || self.rx.has_changed().is_err()
    }

    /// Resolve once shutdown has been requested.
    pub async fn wait(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                // Trigger dropped
                return;
            }
        }
    }
}

/// How one iteration ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterationOutcome {
    Published { attempts: u32 },
    SensorFailed,
    Rejected,
    PublishFailed,
    /// Shutdown was observed between steps
    Cancelled,
}

/// Counters accumulated by [`Scheduler::run`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub iterations: u64,
    pub published: u64,
    pub sensor_failures: u64,
    pub rejected: u64,
    pub publish_failures: u64,
}

impl RunSummary {
    fn record(&mut self, outcome: IterationOutcome) {
        self.iterations += 1;
        match outcome {
            IterationOutcome::Published { .. } => self.published += 1,
            IterationOutcome::SensorFailed => self.sensor_failures += 1,
            IterationOutcome::Rejected => self.rejected += 1,
            IterationOutcome::PublishFailed => self.publish_failures += 1,
            IterationOutcome::Cancelled => {}
        }
    }
}

/// Drives the read, validate, derive and publish cycle.
pub struct Scheduler<S, M> {
    reader: SensorReader<S>,
    publisher: MetricPublisher<M>,
    ranges: ValidationRanges,
    target: RecordTarget,
    interval: Duration,
    log_readings: bool,
}

impl<S: Sensor, M: MetricStore> Scheduler<S, M> {
    pub fn new(sensor: S, publisher: MetricPublisher<M>, config: &Config) -> Self {
        Self {
            reader: SensorReader::new(sensor),
            publisher,
            ranges: config.ranges,
            target: config.target.clone(),
            interval: config.log_interval,
            log_readings: config.log_readings,
        }
    }

    /// Override the sampling interval.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn publisher(&self) -> &MetricPublisher<M> {
        &self.publisher
    }

    /// Check store health, then sample until shutdown.
    ///
    /// # Errors
    ///
    /// Returns `HealthError` if the health check fails; no iteration runs.
    pub async fn run(&self, mut shutdown: Shutdown) -> Result<RunSummary, HealthError> {
        let health = self.publisher.check_health().await?;
        info!(
            status = %health.status,
            name = health.name.as_deref().unwrap_or("unknown"),
            version = health.version.as_deref().unwrap_or("unknown"),
            "InfluxDB health check passed"
        );

        let mut summary = RunSummary::default();
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            interval_secs = self.interval.as_secs_f64(),
            sensor_name = %self.target.sensor_name,
            "Sampling loop started"
        );

        loop {
            // The first tick completes immediately.
            tokio::select! {
                biased;
                _ = shutdown.wait() => break,
                _ = ticker.tick() => {}
            }

            let outcome = self.run_iteration(&shutdown).await;
            summary.record(outcome);
            if outcome == IterationOutcome::Cancelled {
                break;
            }
        }

        info!(iterations = summary.iterations, "Sampling loop stopped");
        Ok(summary)
    }

    /// Run one read, validate, derive and publish cycle.
    pub async fn run_iteration(&self, shutdown: &Shutdown) -> IterationOutcome {
        let reading = match self.reader.read().await {
            Ok(reading) => reading,
            Err(e) => {
                error!(
                    attempted_at = %e.attempted_at,
                    attempts = e.attempts,
                    error = %e.last_fault,
                    "failed to read sensor"
                );
                return IterationOutcome::SensorFailed;
            }
        };

        if shutdown.is_triggered() {
            return IterationOutcome::Cancelled;
        }

        let record = match DerivedMetricRecord::derive(&reading, &self.ranges, &self.target) {
            Ok(record) => record,
            Err(e) => {
                warn!(
                    quantity = %e.quantity,
                    value = e.value,
                    min = e.range.min(),
                    max = e.range.max(),
                    at = %reading.timestamp,
                    "reading outside valid range, skipping"
                );
                return IterationOutcome::Rejected;
            }
        };

        if self.log_readings {
            info!(
                "temperature {:.1} degF ({:.1} degC); humidity {:.1}%; approx. dew point {:.1} degF",
                reading.temperature_fahrenheit(),
                reading.temperature_celsius,
                reading.relative_humidity_percent,
                reading.dew_point_fahrenheit()
            );
        }

        if shutdown.is_triggered() {
            return IterationOutcome::Cancelled;
        }

        match self.publisher.publish(&record).await {
            Ok(report) => {
                debug!(attempts = report.attempts, "Point written");
                IterationOutcome::Published {
                    attempts: report.attempts,
                }
            }
            Err(e) => {
                error!(error = %e, attempts = e.attempts, "failed to write point to influx");
                IterationOutcome::PublishFailed
            }
        }
    }
}
