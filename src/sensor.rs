//! Sensor capability and the async reader wrapped around it.
//!
//! A [`Sensor`] is a blocking, stateful piece of hardware that retries
//! internally and reports only the final outcome. [`SensorReader`] moves each
//! read onto the blocking thread pool so the runtime is never stalled.
//!
//! The hardware implementation, [`IioDhtSensor`], reads the Linux `dht11` IIO
//! driver, which speaks the DHT22/AM2302 single-wire protocol in the kernel.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::config::SensorConfig;
use crate::reading::Reading;

/// Root of the IIO device tree in sysfs.
pub const IIO_DEVICES_ROOT: &str = "/sys/bus/iio/devices";

/// The DHT22 needs about two seconds between conversions.
pub const DHT_SETTLE_DELAY: Duration = Duration::from_secs(2);

const TEMPERATURE_FILE: &str = "in_temp_input";
const HUMIDITY_FILE: &str = "in_humidityrelative_input";

/// Why a single read attempt failed.
#[derive(Debug)]
pub enum SensorFault {
    /// No IIO device is bound to the configured pin
    DeviceNotFound { gpio_pin: u32 },

    /// Reading a sysfs attribute failed (the driver reports EIO/ETIMEDOUT on bad frames)
    Io { path: PathBuf, source: io::Error },

    /// The attribute did not contain an integer
    Parse { path: PathBuf, value: String },

    /// Fault injected by the simulated sensor
    Simulated,

    /// The blocking read task could not run to completion
    Internal(String),
}

impl std::fmt::Display for SensorFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SensorFault::DeviceNotFound { gpio_pin } => {
                write!(f, "no dht11 IIO device found for GPIO pin {}", gpio_pin)
            }
            SensorFault::Io { path, source } => write!(f, "failed to read {}: {}", path.display(), source),
            SensorFault::Parse { path, value } => {
                write!(f, "unexpected value '{}' in {}", value, path.display())
            }
            SensorFault::Simulated => write!(f, "simulated sensor fault"),
            SensorFault::Internal(e) => write!(f, "sensor task failed: {}", e),
        }
    }
}

/// Final failure of a sensor read after all internal attempts.
#[derive(Debug)]
pub struct SensorError {
    /// Instant the read was started
    pub attempted_at: DateTime<Utc>,

    /// Number of attempts made
    pub attempts: u32,

    pub last_fault: SensorFault,
}

impl std::fmt::Display for SensorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "failed to read sensor for {} after {} attempt(s): {}",
            self.attempted_at, self.attempts, self.last_fault
        )
    }
}

impl std::error::Error for SensorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.last_fault {
            SensorFault::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// A temperature/humidity sensor.
///
/// Implementations block and retry internally; callers see one outcome.
pub trait Sensor: Send + 'static {
    fn read(&mut self) -> Result<Reading, SensorError>;
}

/// Run `attempt` up to `max_attempts` times, sleeping `settle_delay` between failures.
///
/// The returned reading (or error) is stamped with the instant the first
/// attempt started.
pub fn read_with_retry<F>(max_attempts: u32, settle_delay: Duration, mut attempt: F) -> Result<Reading, SensorError>
where
    F: FnMut() -> Result<(f64, f64), SensorFault>,
{
    let attempted_at = Utc::now();
    let max_attempts = max_attempts.max(1);
    let mut made = 0;

    loop {
        made += 1;
        match attempt() {
            Ok((temperature_celsius, humidity)) => {
                return Ok(Reading::new(temperature_celsius, humidity, attempted_at));
            }
            Err(fault) => {
                debug!(attempt = made, max_attempts = max_attempts, error = %fault, "Sensor read attempt failed");
                if made >= max_attempts {
                    return Err(SensorError {
                        attempted_at,
                        attempts: made,
                        last_fault: fault,
                    });
                }
                if !settle_delay.is_zero() {
                    std::thread::sleep(settle_delay);
                }
            }
        }
    }
}

/// Async handle to a blocking [`Sensor`].
pub struct SensorReader<S> {
    sensor: Arc<Mutex<S>>,
}

impl<S> Clone for SensorReader<S> {
    fn clone(&self) -> Self {
        Self {
            sensor: self.sensor.clone(),
        }
    }
}

impl<S: Sensor> SensorReader<S> {
    pub fn new(sensor: S) -> Self {
        Self {
            sensor: Arc::new(Mutex::new(sensor)),
        }
    }

    /// Read the sensor on the blocking pool.
    pub async fn read(&self) -> Result<Reading, SensorError> {
        let sensor = self.sensor.clone();
        let started = Utc::now();

        let joined = tokio::task::spawn_blocking(move || {
            // An earlier read panicked while holding the lock
            let mut sensor = sensor.lock().unwrap_or_else(|poisoned| {
                warn!("Previous sensor read panicked, recovering");
                PoisonError::into_inner(poisoned)
            });
            sensor.read()
        })
        .await;

        match joined {
            Ok(result) => result,
            Err(e) => Err(SensorError {
                attempted_at: started,
                attempts: 0,
                last_fault: SensorFault::Internal(e.to_string()),
            }),
        }
    }
}

/// DHT22/AM2302 read through the kernel `dht11` IIO driver.
pub struct IioDhtSensor {
    iio_root: PathBuf,
    explicit_device: Option<PathBuf>,
    resolved_device: Option<PathBuf>,
    gpio_pin: u32,
    max_retries: u32,
    settle_delay: Duration,
}

impl IioDhtSensor {
    pub fn new(config: &SensorConfig) -> Self {
        Self::with_root(IIO_DEVICES_ROOT, config)
    }

    /// Create a sensor that searches `iio_root` instead of the sysfs default.
    pub fn with_root(iio_root: impl Into<PathBuf>, config: &SensorConfig) -> Self {
        Self {
            iio_root: iio_root.into(),
            explicit_device: config.iio_device.clone(),
            resolved_device: None,
            gpio_pin: config.gpio_pin,
            max_retries: config.max_retries,
            settle_delay: DHT_SETTLE_DELAY,
        }
    }

    pub fn with_settle_delay(mut self, settle_delay: Duration) -> Self {
        self.settle_delay = settle_delay;
        self
    }

    /// Device directory in use, locating it by pin if needed.
    pub fn device_dir(&mut self) -> Result<PathBuf, SensorFault> {
        if let Some(dir) = &self.explicit_device {
            return Ok(dir.clone());
        }
        if let Some(dir) = &self.resolved_device {
            return Ok(dir.clone());
        }
        let dir = find_dht_device(&self.iio_root, self.gpio_pin)?;
        debug!(device = %dir.display(), gpio_pin = self.gpio_pin, "Located dht11 IIO device");
        self.resolved_device = Some(dir.clone());
        Ok(dir)
    }

    fn read_once(&mut self) -> Result<(f64, f64), SensorFault> {
        let dir = self.device_dir()?;
        let result = read_milli(&dir.join(TEMPERATURE_FILE))
            .and_then(|t| read_milli(&dir.join(HUMIDITY_FILE)).map(|h| (t, h)));

        // The device can disappear if the overlay is reloaded; search again next time.
        if let Err(SensorFault::Io { source, .. }) = &result {
            if source.kind() == io::ErrorKind::NotFound {
                self.resolved_device = None;
            }
        }
        result
    }
}

impl Sensor for IioDhtSensor {
    fn read(&mut self) -> Result<Reading, SensorError> {
        let max_retries = self.max_retries;
        let settle_delay = self.settle_delay;
        read_with_retry(max_retries, settle_delay, || self.read_once())
    }
}

/// Find the IIO device whose `name` is `dht11@<pin>`.
///
/// Device tree unit addresses are hex, so both `dht11@11` and `dht11@17`
/// match pin 17.
pub fn find_dht_device(iio_root: &Path, gpio_pin: u32) -> Result<PathBuf, SensorFault> {
    let hex = format!("dht11@{:x}", gpio_pin);
    let dec = format!("dht11@{}", gpio_pin);

    let entries = fs::read_dir(iio_root).map_err(|_| SensorFault::DeviceNotFound { gpio_pin })?;
    let mut candidates: Vec<PathBuf> = entries.filter_map(|e| e.ok()).map(|e| e.path()).collect();
    candidates.sort();

    candidates
        .into_iter()
        .find(|dir| match fs::read_to_string(dir.join("name")) {
            Ok(name) => {
                let name = name.trim();
                name == hex || name == dec
            }
            Err(_) => false,
        })
        .ok_or(SensorFault::DeviceNotFound { gpio_pin })
}

/// Read an IIO attribute holding an integer in thousandths.
fn read_milli(path: &Path) -> Result<f64, SensorFault> {
    let raw = fs::read_to_string(path).map_err(|source| SensorFault::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let value: i64 = raw.trim().parse().map_err(|_| SensorFault::Parse {
        path: path.to_path_buf(),
        value: raw.trim().to_string(),
    })?;
    Ok(value as f64 / 1000.0)
}
