//! Scripted fakes for the sensor and store seams.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use reqwest::StatusCode;

use crate::client::{ClientError, HealthStatus, MetricStore};
use crate::reading::{DerivedMetricRecord, Reading};
use crate::sensor::{Sensor, SensorError, SensorFault};

/// Scripted outcome of one store call.
#[derive(Debug, Clone)]
pub enum StoreStep {
    Ok,
    Status(StatusCode),
    /// Never completes; only a timeout ends it
    Hang,
}

/// Store fake that records writes and replays a script.
///
/// Once the script runs out every call succeeds.
#[derive(Clone)]
pub struct FakeStore {
    health: Arc<Mutex<Option<Result<HealthStatus, StoreStep>>>>,
    writes: Arc<Mutex<VecDeque<StoreStep>>>,
    write_calls: Arc<AtomicUsize>,
    health_calls: Arc<AtomicUsize>,
    recorded: Arc<Mutex<Vec<DerivedMetricRecord>>>,
}

impl FakeStore {
    pub fn new() -> Self {
        Self {
            health: Arc::new(Mutex::new(None)),
            writes: Arc::new(Mutex::new(VecDeque::new())),
            write_calls: Arc::new(AtomicUsize::new(0)),
            health_calls: Arc::new(AtomicUsize::new(0)),
            recorded: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_health_status(self, status: &str) -> Self {
        *self.health.lock().unwrap() = Some(Ok(HealthStatus {
            status: status.to_string(),
            name: Some("influxdb".to_string()),
            message: Some(format!("status {}", status)),
            version: None,
        }));
        self
    }

    pub fn with_health_failure(self, step: StoreStep) -> Self {
        *self.health.lock().unwrap() = Some(Err(step));
        self
    }

    pub fn with_writes(self, steps: Vec<StoreStep>) -> Self {
        self.writes.lock().unwrap().extend(steps);
        self
    }

    pub fn write_calls(&self) -> usize {
        self.write_calls.load(Ordering::SeqCst)
    }

    pub fn health_calls(&self) -> usize {
        self.health_calls.load(Ordering::SeqCst)
    }

    pub fn recorded(&self) -> Vec<DerivedMetricRecord> {
        self.recorded.lock().unwrap().clone()
    }
}

async fn play(step: StoreStep) -> Result<(), ClientError> {
    match step {
        StoreStep::Ok => Ok(()),
        StoreStep::Status(code) => Err(ClientError::Status {
            code,
            message: "scripted failure".to_string(),
        }),
        StoreStep::Hang => {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        }
    }
}

impl MetricStore for FakeStore {
    async fn health(&self) -> Result<HealthStatus, ClientError> {
        self.health_calls.fetch_add(1, Ordering::SeqCst);
        let scripted = self.health.lock().unwrap().clone();
        match scripted {
            None => Ok(HealthStatus {
                status: "pass".to_string(),
                name: None,
                message: None,
                version: None,
            }),
            Some(Ok(status)) => Ok(status),
            Some(Err(step)) => {
                play(step).await?;
                Err(ClientError::Parse("scripted health failure".to_string()))
            }
        }
    }

    async fn write(&self, record: &DerivedMetricRecord) -> Result<(), ClientError> {
        self.write_calls.fetch_add(1, Ordering::SeqCst);
        let step = self.writes.lock().unwrap().pop_front().unwrap_or(StoreStep::Ok);
        let result = play(step).await;
        if result.is_ok() {
            self.recorded.lock().unwrap().push(record.clone());
        }
        result
    }
}

/// Sensor fake replaying a fixed sequence; `None` entries fail.
///
/// Once the script runs out it repeats the last entry.
pub struct ScriptedSensor {
    script: VecDeque<Option<(f64, f64)>>,
    last: Option<(f64, f64)>,
    reads: Arc<AtomicUsize>,
}

impl ScriptedSensor {
    pub fn new(script: Vec<Option<(f64, f64)>>) -> Self {
        Self {
            script: script.into(),
            last: None,
            reads: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Shared counter of `read` calls.
    pub fn read_counter(&self) -> Arc<AtomicUsize> {
        self.reads.clone()
    }
}

impl Sensor for ScriptedSensor {
    fn read(&mut self) -> Result<Reading, SensorError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if let Some(next) = self.script.pop_front() {
            self.last = next;
        }
        let attempted_at = Utc::now();
        match self.last {
            Some((t, h)) => Ok(Reading::new(t, h, attempted_at)),
            None => Err(SensorError {
                attempted_at,
                attempts: 12,
                last_fault: SensorFault::Simulated,
            }),
        }
    }
}
