//! Simulated sensor for running the logger without hardware.
//!
//! The simulator produces a slow random walk that keeps returning to indoor
//! conditions, and fails a configurable share of attempts, so the retry and
//! validation paths get exercised on a desk.

use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::reading::Reading;
use crate::sensor::{read_with_retry, Sensor, SensorError, SensorFault};

/// Share of the distance back to the base values recovered each reading.
const REVERSION: f64 = 0.05;

/// Configuration for the simulated sensor.
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    /// Starting temperature in degC
    pub base_temperature: f64,

    /// Starting relative humidity in percent
    pub base_humidity: f64,

    /// Largest temperature change per reading
    pub temperature_step: f64,

    /// Largest humidity change per reading
    pub humidity_step: f64,

    /// Probability (0.0 - 1.0) that a single attempt fails
    pub failure_rate: f64,

    /// Attempts per reading
    pub max_retries: u32,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            base_temperature: 21.0,
            base_humidity: 45.0,
            temperature_step: 0.3,
            humidity_step: 1.5,
            failure_rate: 0.1, // the real sensor drops roughly one frame in ten
            max_retries: 12,
        }
    }
}

/// Random-walk temperature/humidity source.
pub struct SimulatedSensor {
    config: SimulatorConfig,
    rng: StdRng,
    temperature: f64,
    humidity: f64,
}

impl SimulatedSensor {
    pub fn new(config: SimulatorConfig) -> Self {
        Self::with_rng(config, StdRng::from_entropy())
    }

    /// Create a deterministic simulator.
    pub fn seeded(config: SimulatorConfig, seed: u64) -> Self {
        Self::with_rng(config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(config: SimulatorConfig, rng: StdRng) -> Self {
        Self {
            temperature: config.base_temperature,
            humidity: config.base_humidity,
            config,
            rng,
        }
    }

    fn step(&mut self) -> Result<(f64, f64), SensorFault> {
        if self.config.failure_rate > 0.0 && self.rng.gen_bool(self.config.failure_rate.min(1.0)) {
            return Err(SensorFault::Simulated);
        }

        // Drift back toward the base values so long runs stay near them
        self.temperature += (self.config.base_temperature - self.temperature) * REVERSION;
        self.humidity += (self.config.base_humidity - self.humidity) * REVERSION;

        let t_step = self.config.temperature_step;
        let h_step = self.config.humidity_step;
        if t_step > 0.0 {
            self.temperature += self.rng.gen_range(-t_step..=t_step);
        }
        if h_step > 0.0 {
            self.humidity += self.rng.gen_range(-h_step..=h_step);
        }
        self.humidity = self.humidity.clamp(0.0, 100.0);

        // The sensor resolves 0.1 units
        Ok((round_tenth(self.temperature), round_tenth(self.humidity)))
    }
}

impl Sensor for SimulatedSensor {
    fn read(&mut self) -> Result<Reading, SensorError> {
        let max_retries = self.config.max_retries;
        read_with_retry(max_retries, Duration::ZERO, || self.step())
    }
}

fn round_tenth(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
