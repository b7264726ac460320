//! Configuration module for the sensor logger.
//!
//! Configuration comes from Go-style command-line flags (`-influx-server URL`,
//! `-influx-server=URL` or `--influx-server URL`). Every flag can also be supplied
//! through a `DHT_LOGGER_*` environment variable; flags win over the environment.
//! The result is an immutable [`Config`] built once at startup.

use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::reading::{RecordTarget, ValidationRange, ValidationRanges};

/// Default measurement name written to the store
pub const DEFAULT_MEASUREMENT_NAME: &str = "temperature_humidity";

/// Default GPIO pin the sensor data line is attached to
pub const DEFAULT_GPIO_PIN: u32 = 4;

/// Default seconds between samples
pub const DEFAULT_LOG_INTERVAL_SECS: u64 = 60;

/// Default per-request timeout for the store, in seconds
pub const DEFAULT_INFLUX_TIMEOUT_SECS: u64 = 3;

/// Default number of write attempts per record
pub const DEFAULT_INFLUX_ATTEMPTS: u32 = 3;

/// Default number of sensor read attempts per sample
pub const DEFAULT_MAX_RETRIES: u32 = 12;

const DEFAULT_TEMP_MIN: f64 = -40.0;
const DEFAULT_TEMP_MAX: f64 = 80.0;
const DEFAULT_HUMID_MIN: f64 = 0.0;
const DEFAULT_HUMID_MAX: f64 = 100.0;

/// Description of one accepted flag.
struct FlagSpec {
    name: &'static str,
    env: &'static str,
    takes_value: bool,
    help: &'static str,
}

const FLAGS: &[FlagSpec] = &[
    FlagSpec {
        name: "influx-server",
        env: "DHT_LOGGER_INFLUX_SERVER",
        takes_value: true,
        help: "InfluxDB server, including protocol and port, eg. 'http://192.168.1.1:8086'. Required.",
    },
    FlagSpec {
        name: "influx-username",
        env: "DHT_LOGGER_INFLUX_USERNAME",
        takes_value: true,
        help: "InfluxDB username.",
    },
    FlagSpec {
        name: "influx-password",
        env: "DHT_LOGGER_INFLUX_PASSWORD",
        takes_value: true,
        help: "InfluxDB password.",
    },
    FlagSpec {
        name: "influx-bucket",
        env: "DHT_LOGGER_INFLUX_BUCKET",
        takes_value: true,
        help: "InfluxDB bucket, in the form 'database/retention-policy', or just 'database' for the default retention policy. Required.",
    },
    FlagSpec {
        name: "sensor-name",
        env: "DHT_LOGGER_SENSOR_NAME",
        takes_value: true,
        help: "Value for the sensor_name tag in InfluxDB. Required.",
    },
    FlagSpec {
        name: "measurement-name",
        env: "DHT_LOGGER_MEASUREMENT_NAME",
        takes_value: true,
        help: "InfluxDB measurement name (default: temperature_humidity).",
    },
    FlagSpec {
        name: "gpio-pin",
        env: "DHT_LOGGER_GPIO_PIN",
        takes_value: true,
        help: "GPIO pin the sensor is connected to (default: 4).",
    },
    FlagSpec {
        name: "log-readings",
        env: "DHT_LOGGER_LOG_READINGS",
        takes_value: false,
        help: "Log temperature/humidity readings to standard error.",
    },
    FlagSpec {
        name: "log-interval",
        env: "DHT_LOGGER_LOG_INTERVAL",
        takes_value: true,
        help: "Seconds between readings (default: 60).",
    },
    FlagSpec {
        name: "influx-timeout",
        env: "DHT_LOGGER_INFLUX_TIMEOUT",
        takes_value: true,
        help: "Seconds before an InfluxDB request is abandoned (default: 3).",
    },
    FlagSpec {
        name: "influx-attempts",
        env: "DHT_LOGGER_INFLUX_ATTEMPTS",
        takes_value: true,
        help: "Write attempts per reading (default: 3).",
    },
    FlagSpec {
        name: "max-retries",
        env: "DHT_LOGGER_MAX_RETRIES",
        takes_value: true,
        help: "Sensor read attempts per reading (default: 12).",
    },
    FlagSpec {
        name: "temp-min",
        env: "DHT_LOGGER_TEMP_MIN",
        takes_value: true,
        help: "Lowest plausible temperature in degC (default: -40).",
    },
    FlagSpec {
        name: "temp-max",
        env: "DHT_LOGGER_TEMP_MAX",
        takes_value: true,
        help: "Highest plausible temperature in degC (default: 80).",
    },
    FlagSpec {
        name: "humid-min",
        env: "DHT_LOGGER_HUMID_MIN",
        takes_value: true,
        help: "Lowest plausible relative humidity in percent (default: 0).",
    },
    FlagSpec {
        name: "humid-max",
        env: "DHT_LOGGER_HUMID_MAX",
        takes_value: true,
        help: "Highest plausible relative humidity in percent (default: 100).",
    },
    FlagSpec {
        name: "iio-device",
        env: "DHT_LOGGER_IIO_DEVICE",
        takes_value: true,
        help: "IIO device directory of the dht11 driver (default: found by GPIO pin).",
    },
    FlagSpec {
        name: "simulate",
        env: "DHT_LOGGER_SIMULATE",
        takes_value: false,
        help: "Use a simulated sensor instead of the hardware.",
    },
];

/// Connection and retry settings for the remote store.
#[derive(Debug, Clone, PartialEq)]
pub struct PublisherConfig {
    /// Server base URL without trailing slash
    pub server_url: String,

    pub username: String,

    pub password: String,

    /// `database/retention-policy` or `database`
    pub bucket: String,

    /// Timeout applied to each request attempt and to the health check
    pub timeout: Duration,

    /// Maximum write attempts per record
    pub attempts: u32,
}

impl PublisherConfig {
    /// Token sent in the `Authorization` header, if any credential was given.
    pub fn auth_token(&self) -> Option<String> {
        if self.username.is_empty() && self.password.is_empty() {
            None
        } else {
            Some(format!("{}:{}", self.username, self.password))
        }
    }
}

/// Sensor hardware settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensorConfig {
    pub gpio_pin: u32,

    /// Read attempts the sensor makes before reporting failure
    pub max_retries: u32,

    /// Explicit IIO device directory; located by pin when `None`
    pub iio_device: Option<PathBuf>,

    pub simulate: bool,
}

/// Process-wide configuration, immutable after startup.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub publisher: PublisherConfig,
    pub sensor: SensorConfig,
    pub target: RecordTarget,
    pub ranges: ValidationRanges,
    pub log_readings: bool,
    pub log_interval: Duration,
}

/// Error type for configuration loading failures
#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
    pub flag: Option<String>,
}

impl ConfigError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            flag: None,
        }
    }

    fn for_flag(flag: &str, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            flag: Some(flag.to_string()),
        }
    }
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.flag {
            Some(flag) => write!(f, "Configuration error for -{}: {}", flag, self.message),
            None => write!(f, "Configuration error: {}", self.message),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Flag values gathered from the command line, with environment fallback.
struct RawValues<F> {
    flags: HashMap<&'static str, String>,
    env: F,
}

impl<F> RawValues<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, name: &str) -> Option<String> {
        if let Some(value) = self.flags.get(name) {
            return Some(value.clone());
        }
        let spec = find_flag(name)?;
        (self.env)(spec.env).filter(|v| !v.is_empty())
    }

    fn string_or(&self, name: &str, default: &str) -> String {
        self.get(name).unwrap_or_else(|| default.to_string())
    }

    fn required(&self, name: &str) -> Result<String, ConfigError> {
        match self.get(name) {
            Some(value) if !value.trim().is_empty() => Ok(value),
            _ => Err(ConfigError::for_flag(name, "must be supplied")),
        }
    }

    fn parsed_or<T: FromStr>(&self, name: &str, default: T) -> Result<T, ConfigError> {
        match self.get(name) {
            Some(value) => value.trim().parse().map_err(|_| {
                ConfigError::for_flag(name, format!("'{}' is not a valid number", value))
            }),
            None => Ok(default),
        }
    }

    fn bool_flag(&self, name: &str) -> Result<bool, ConfigError> {
        match self.get(name) {
            Some(value) => parse_bool(&value)
                .ok_or_else(|| ConfigError::for_flag(name, format!("'{}' is not a valid boolean", value))),
            None => Ok(false),
        }
    }
}

fn find_flag(name: &str) -> Option<&'static FlagSpec> {
    FLAGS.iter().find(|spec| spec.name == name)
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim() {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Some(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Some(false),
        _ => None,
    }
}

/// Strip one or two leading dashes and split off an inline `=value`.
fn split_flag(arg: &str) -> Option<(&str, Option<&str>)> {
    let body = arg.strip_prefix("--").or_else(|| arg.strip_prefix('-'))?;
    if body.is_empty() || body.starts_with('-') {
        return None;
    }
    match body.split_once('=') {
        Some((name, value)) => Some((name, Some(value))),
        None => Some((body, None)),
    }
}

impl Config {
    /// Load configuration from the process arguments and environment.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a required flag is missing, a flag is unknown,
    /// or a value does not parse or is out of bounds.
    pub fn from_args_and_env() -> Result<Self, ConfigError> {
        Self::parse(std::env::args().skip(1), |key| std::env::var(key).ok())
    }

    /// Returns true if `-h` or `-help` (one or two dashes) is given as a flag.
    ///
    /// The value of a flag that takes one is skipped, so `-influx-password -h`
    /// is a password, not a help request.
    pub fn wants_help<I, S>(args: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            let Some((name, inline)) = split_flag(arg.as_ref()) else {
                continue;
            };
            if matches!(name, "h" | "help") {
                return true;
            }
            if inline.is_none() && find_flag(name).is_some_and(|spec| spec.takes_value) {
                args.next();
            }
        }
        false
    }

    /// Parse configuration from explicit arguments (program name excluded)
    /// and an environment lookup function.
    pub fn parse<I, S, F>(args: I, env: F) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
        F: Fn(&str) -> Option<String>,
    {
        let flags = Self::collect_flags(args)?;
        let raw = RawValues { flags, env };

        let server_url = raw.required("influx-server")?;
        let server_url = server_url.trim().trim_end_matches('/').to_string();
        if !(server_url.starts_with("http://") || server_url.starts_with("https://")) {
            return Err(ConfigError::for_flag(
                "influx-server",
                format!("'{}' must start with http:// or https://", server_url),
            ));
        }
        let bucket = raw.required("influx-bucket")?;
        let sensor_name = raw.required("sensor-name")?;

        let measurement_name = raw.string_or("measurement-name", DEFAULT_MEASUREMENT_NAME);
        if measurement_name.trim().is_empty() {
            return Err(ConfigError::for_flag("measurement-name", "must not be empty"));
        }

        let timeout_secs: u64 = raw.parsed_or("influx-timeout", DEFAULT_INFLUX_TIMEOUT_SECS)?;
        if timeout_secs == 0 {
            return Err(ConfigError::for_flag("influx-timeout", "must be greater than 0"));
        }

        let attempts: u32 = raw.parsed_or("influx-attempts", DEFAULT_INFLUX_ATTEMPTS)?;
        if attempts == 0 {
            return Err(ConfigError::for_flag("influx-attempts", "must be greater than 0"));
        }

        let max_retries: u32 = raw.parsed_or("max-retries", DEFAULT_MAX_RETRIES)?;
        if max_retries == 0 {
            return Err(ConfigError::for_flag("max-retries", "must be greater than 0"));
        }

        let interval_secs: u64 = raw.parsed_or("log-interval", DEFAULT_LOG_INTERVAL_SECS)?;
        if interval_secs == 0 {
            return Err(ConfigError::for_flag("log-interval", "must be greater than 0"));
        }

        let temperature = Self::range(&raw, "temp-min", "temp-max", DEFAULT_TEMP_MIN, DEFAULT_TEMP_MAX)?;
        let humidity = Self::range(&raw, "humid-min", "humid-max", DEFAULT_HUMID_MIN, DEFAULT_HUMID_MAX)?;

        Ok(Self {
            publisher: PublisherConfig {
                server_url,
                username: raw.string_or("influx-username", ""),
                password: raw.string_or("influx-password", ""),
                bucket,
                timeout: Duration::from_secs(timeout_secs),
                attempts,
            },
            sensor: SensorConfig {
                gpio_pin: raw.parsed_or("gpio-pin", DEFAULT_GPIO_PIN)?,
                max_retries,
                iio_device: raw.get("iio-device").map(PathBuf::from),
                simulate: raw.bool_flag("simulate")?,
            },
            target: RecordTarget::new(measurement_name, sensor_name),
            ranges: ValidationRanges { temperature, humidity },
            log_readings: raw.bool_flag("log-readings")?,
            log_interval: Duration::from_secs(interval_secs),
        })
    }

    /// Collect `-name value` pairs from the command line.
    fn collect_flags<I, S>(args: I) -> Result<HashMap<&'static str, String>, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut flags = HashMap::new();
        let mut args = args.into_iter();

        while let Some(arg) = args.next() {
            let arg = arg.as_ref();
            let (name, inline) = split_flag(arg)
                .ok_or_else(|| ConfigError::new(format!("unexpected argument '{}'", arg)))?;
            let spec = find_flag(name)
                .ok_or_else(|| ConfigError::new(format!("flag provided but not defined: -{}", name)))?;

            let value = if spec.takes_value {
                match inline {
                    Some(value) => value.to_string(),
                    None => args
                        .next()
                        .map(|v| v.as_ref().to_string())
                        .ok_or_else(|| ConfigError::for_flag(spec.name, "flag needs an argument"))?,
                }
            } else {
                inline.unwrap_or("true").to_string()
            };

            flags.insert(spec.name, value);
        }

        Ok(flags)
    }

    fn range<F>(
        raw: &RawValues<F>,
        min_flag: &str,
        max_flag: &str,
        default_min: f64,
        default_max: f64,
    ) -> Result<ValidationRange, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let min: f64 = raw.parsed_or(min_flag, default_min)?;
        let max: f64 = raw.parsed_or(max_flag, default_max)?;
        ValidationRange::new(min, max).ok_or_else(|| {
            ConfigError::for_flag(
                min_flag,
                format!("range [{}, {}] is empty or not finite (check -{})", min, max, max_flag),
            )
        })
    }

    /// Usage text listing every flag.
    pub fn usage() -> String {
        let mut usage = String::from("Usage of dht-influx-logger:\n");
        for spec in FLAGS {
            let arg = if spec.takes_value { " value" } else { "" };
            usage.push_str(&format!("  -{}{}\n    \t{} (env: {})\n", spec.name, arg, spec.help, spec.env));
        }
        usage
    }
}
