//! DHT Influx Logger - temperature/humidity sampling daemon
//!
//! Reads a DHT22/AM2302 sensor on a fixed interval and writes each valid
//! reading to InfluxDB as a point with derived Fahrenheit and dew point fields.
//!
//! ## Features
//!
//! - Sensor reads retried inside the sensor capability
//! - Out-of-range readings discarded before publishing
//! - Writes retried with backoff, each attempt under its own timeout
//! - Graceful shutdown on SIGINT/SIGTERM
//!
//! ## Configuration
//!
//! Run with `-h` for the full flag list. Required:
//!
//! - `-influx-server`: InfluxDB URL, eg. `http://192.168.1.1:8086`
//! - `-influx-bucket`: `database/retention-policy` or `database`
//! - `-sensor-name`: value of the `sensor_name` tag
//!
//! `RUST_LOG` sets the logging filter (default: info).

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use dht_influx_logger::client::InfluxClient;
use dht_influx_logger::config::Config;
use dht_influx_logger::publisher::MetricPublisher;
use dht_influx_logger::scheduler::{Scheduler, Shutdown, ShutdownTrigger};
use dht_influx_logger::sensor::{IioDhtSensor, Sensor};
use dht_influx_logger::simulator::{SimulatedSensor, SimulatorConfig};

#[tokio::main]
async fn main() {
    if Config::wants_help(std::env::args().skip(1)) {
        print!("{}", Config::usage());
        return;
    }

    // Initialize tracing subscriber with environment filter
    init_tracing();

    let config = match Config::from_args_and_env() {
        Ok(config) => {
            info!(
                influx_server = %config.publisher.server_url,
                bucket = %config.publisher.bucket,
                sensor_name = %config.target.sensor_name,
                gpio_pin = config.sensor.gpio_pin,
                interval_secs = config.log_interval.as_secs(),
                "Configuration loaded"
            );
            config
        }
        Err(e) => {
            eprintln!("{}\n", e);
            eprint!("{}", Config::usage());
            std::process::exit(1);
        }
    };

    if config.sensor.simulate {
        let sensor = SimulatedSensor::new(SimulatorConfig {
            max_retries: config.sensor.max_retries,
            ..SimulatorConfig::default()
        });
        info!("Using simulated sensor");
        run(sensor, &config).await;
    } else {
        let sensor = IioDhtSensor::new(&config.sensor);
        run(sensor, &config).await;
    }
}

/// Build the publisher, start the loop and wait for it to stop.
async fn run<S: Sensor>(sensor: S, config: &Config) {
    let client = match InfluxClient::new(&config.publisher) {
        Ok(client) => client,
        Err(e) => {
            error!(error = %e, "Failed to create InfluxDB client");
            std::process::exit(1);
        }
    };

    let publisher = MetricPublisher::new(client, &config.publisher);
    let scheduler = Scheduler::new(sensor, publisher, config);

    let (trigger, shutdown) = Shutdown::channel();
    tokio::spawn(wait_for_signal(trigger));

    match scheduler.run(shutdown).await {
        Ok(summary) => {
            let stats = scheduler.publisher().stats();
            info!(
                iterations = summary.iterations,
                published = summary.published,
                sensor_failures = summary.sensor_failures,
                rejected = summary.rejected,
                publish_failures = summary.publish_failures,
                write_attempts = stats.attempts,
                "Logger stopped"
            );
        }
        Err(e) => {
            error!(error = %e, "Startup health check failed");
            std::process::exit(1);
        }
    }
}

/// Trigger shutdown on SIGINT or SIGTERM.
async fn wait_for_signal(trigger: ShutdownTrigger) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                if let Err(e) = tokio::signal::ctrl_c().await {
                    error!(error = %e, "Failed to listen for shutdown signal");
                    // Keep the trigger alive so the loop is not stopped by mistake.
                    std::future::pending::<()>().await;
                }
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
    }

    info!("Shutdown signal received, stopping after the current step...");
    trigger.trigger();
}

/// Initialize the tracing subscriber with environment-based filtering.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();
}
