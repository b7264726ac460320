//! Reading and record types for the sampling loop.
//!
//! A [`Reading`] is what the sensor produced. It only becomes a
//! [`DerivedMetricRecord`] after both values pass their [`ValidationRange`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Tag key carrying the configured sensor name.
pub const SENSOR_NAME_TAG: &str = "sensor_name";

/// Field keys written for every record.
pub const FIELD_TEMPERATURE_F: &str = "temperature_f";
pub const FIELD_TEMPERATURE_C: &str = "temperature_c";
pub const FIELD_HUMIDITY: &str = "humidity";
pub const FIELD_DEW_POINT_F: &str = "dew_point_f";

/// One raw sample from the sensor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// Temperature in degrees Celsius
    pub temperature_celsius: f64,

    /// Relative humidity in percent (not clamped)
    pub relative_humidity_percent: f64,

    /// Instant the read was started
    pub timestamp: DateTime<Utc>,
}

impl Reading {
    pub fn new(temperature_celsius: f64, relative_humidity_percent: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            temperature_celsius,
            relative_humidity_percent,
            timestamp,
        }
    }

    /// Temperature converted to Fahrenheit.
    pub fn temperature_fahrenheit(&self) -> f64 {
        celsius_to_fahrenheit(self.temperature_celsius)
    }

    /// Linear dew point approximation in Fahrenheit.
    pub fn dew_point_fahrenheit(&self) -> f64 {
        dew_point_fahrenheit(self.temperature_fahrenheit(), self.relative_humidity_percent)
    }
}

pub fn celsius_to_fahrenheit(celsius: f64) -> f64 {
    celsius * 1.8 + 32.0
}

/// Approximate dew point: subtract 0.36 °F per percent of humidity below saturation.
///
/// This is not a psychrometric formula. Existing dashboards depend on its exact
/// output, so keep it as is.
pub fn dew_point_fahrenheit(temperature_f: f64, relative_humidity_percent: f64) -> f64 {
    temperature_f - ((100.0 - relative_humidity_percent) * (9.0 / 25.0))
}

/// Which measured quantity a range applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quantity {
    Temperature,
    Humidity,
}

impl std::fmt::Display for Quantity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Quantity::Temperature => write!(f, "temperature"),
            Quantity::Humidity => write!(f, "humidity"),
        }
    }
}

/// Inclusive bounds for a measured quantity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValidationRange {
    min: f64,
    max: f64,
}

impl ValidationRange {
    /// Create a range. Returns `None` if a bound is not finite or `min > max`.
    pub fn new(min: f64, max: f64) -> Option<Self> {
        if !min.is_finite() || !max.is_finite() || min > max {
            return None;
        }
        Some(Self { min, max })
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }

    /// Both ends are inclusive. NaN is never contained.
    pub fn contains(&self, value: f64) -> bool {
        self.min <= value && value <= self.max
    }
}

/// Bounds applied to every reading before it is published.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValidationRanges {
    pub temperature: ValidationRange,
    pub humidity: ValidationRange,
}

impl Default for ValidationRanges {
    /// The AM2302 datasheet limits: -40..80 °C and 0..100 %.
    fn default() -> Self {
        Self {
            temperature: ValidationRange { min: -40.0, max: 80.0 },
            humidity: ValidationRange { min: 0.0, max: 100.0 },
        }
    }
}

impl ValidationRanges {
    /// Check a reading against both ranges, temperature first.
    pub fn validate(&self, reading: &Reading) -> Result<(), ValidationError> {
        if !self.temperature.contains(reading.temperature_celsius) {
            return Err(ValidationError {
                quantity: Quantity::Temperature,
                value: reading.temperature_celsius,
                range: self.temperature,
            });
        }
        if !self.humidity.contains(reading.relative_humidity_percent) {
            return Err(ValidationError {
                quantity: Quantity::Humidity,
                value: reading.relative_humidity_percent,
                range: self.humidity,
            });
        }
        Ok(())
    }
}

/// A reading fell outside its plausible range.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationError {
    pub quantity: Quantity,
    pub value: f64,
    pub range: ValidationRange,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} outside valid range [{}, {}]",
            self.quantity, self.value, self.range.min, self.range.max
        )
    }
}

impl std::error::Error for ValidationError {}

/// Identifies where records go: measurement name and sensor tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordTarget {
    pub measurement_name: String,
    pub sensor_name: String,
}

impl RecordTarget {
    pub fn new(measurement_name: impl Into<String>, sensor_name: impl Into<String>) -> Self {
        Self {
            measurement_name: measurement_name.into(),
            sensor_name: sensor_name.into(),
        }
    }
}

/// The tagged, timestamped point sent to the store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DerivedMetricRecord {
    pub measurement_name: String,
    pub tags: BTreeMap<String, String>,
    pub fields: BTreeMap<String, f64>,
    /// Instant the reading was taken, not when it was published
    pub timestamp: DateTime<Utc>,
}

impl DerivedMetricRecord {
    /// Validate a reading and derive the record from it.
    pub fn derive(
        reading: &Reading,
        ranges: &ValidationRanges,
        target: &RecordTarget,
    ) -> Result<Self, ValidationError> {
        ranges.validate(reading)?;
        Ok(Self::from_valid_reading(reading, target))
    }

    fn from_valid_reading(reading: &Reading, target: &RecordTarget) -> Self {
        let temperature_f = reading.temperature_fahrenheit();
        let dew_point_f = dew_point_fahrenheit(temperature_f, reading.relative_humidity_percent);

        let mut tags = BTreeMap::new();
        tags.insert(SENSOR_NAME_TAG.to_string(), target.sensor_name.clone());

        let mut fields = BTreeMap::new();
        fields.insert(FIELD_TEMPERATURE_F.to_string(), temperature_f);
        fields.insert(FIELD_TEMPERATURE_C.to_string(), reading.temperature_celsius);
        fields.insert(FIELD_HUMIDITY.to_string(), reading.relative_humidity_percent);
        fields.insert(FIELD_DEW_POINT_F.to_string(), dew_point_f);

        Self {
            measurement_name: target.measurement_name.clone(),
            tags,
            fields,
            timestamp: reading.timestamp,
        }
    }

    pub fn field(&self, key: &str) -> Option<f64> {
        self.fields.get(key).copied()
    }

    pub fn sensor_name(&self) -> Option<&str> {
        self.tags.get(SENSOR_NAME_TAG).map(String::as_str)
    }
}
