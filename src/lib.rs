//! DHT Influx Logger Library
//!
//! This library provides the components of a sensor-to-InfluxDB sampling daemon:
//!
//! - **config**: Flag and environment based configuration
//! - **reading**: Readings, validation ranges and derived metric records
//! - **sensor**: The sensor capability, its retry loop and the IIO DHT22 driver
//! - **simulator**: A random-walk sensor for running without hardware
//! - **line_protocol**: InfluxDB line protocol encoding
//! - **client**: InfluxDB HTTP client behind the `MetricStore` trait
//! - **publisher**: Health check and retrying, timeout-bounded writes
//! - **scheduler**: The periodic read, validate, derive, publish loop
//!
//! # Example
//!
//! ```no_run
//! use dht_influx_logger::client::InfluxClient;
//! use dht_influx_logger::config::Config;
//! use dht_influx_logger::publisher::MetricPublisher;
//! use dht_influx_logger::scheduler::{Scheduler, Shutdown};
//! use dht_influx_logger::simulator::{SimulatedSensor, SimulatorConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = Config::parse(
//!         ["-influx-server", "http://localhost:8086", "-influx-bucket", "home", "-sensor-name", "desk"],
//!         |_| None,
//!     )
//!     .expect("Failed to load config");
//!
//!     let client = InfluxClient::new(&config.publisher).expect("Failed to create client");
//!     let publisher = MetricPublisher::new(client, &config.publisher);
//!     let sensor = SimulatedSensor::new(SimulatorConfig::default());
//!     let scheduler = Scheduler::new(sensor, publisher, &config);
//!
//!     let (_trigger, shutdown) = Shutdown::channel();
//!     scheduler.run(shutdown).await.ok();
//! }
//! ```

// Module declarations
pub mod client;
pub mod config;
pub mod line_protocol;
pub mod publisher;
pub mod reading;
pub mod scheduler;
pub mod sensor;
pub mod simulator;

#[cfg(test)]
mod testing;

// Re-export commonly used types at crate root for convenience
pub use client::{ClientError, HealthStatus, InfluxClient, MetricStore};
pub use config::{Config, ConfigError, PublisherConfig, SensorConfig};
pub use publisher::{HealthError, MetricPublisher, PublishError, PublishReport, PublishStats};
pub use reading::{DerivedMetricRecord, Reading, RecordTarget, ValidationError, ValidationRange, ValidationRanges};
pub use scheduler::{IterationOutcome, RunSummary, Scheduler, Shutdown, ShutdownTrigger};
pub use sensor::{IioDhtSensor, Sensor, SensorError, SensorFault, SensorReader};
pub use simulator::{SimulatedSensor, SimulatorConfig};
