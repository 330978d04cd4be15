// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Telemetry Bridge CLI
//!
//! # Usage
//!
//! ```bash
//! # Run against real brokers (`mqtt` and `influx` features, both default)
//! INFLUX_TOKEN=... INFLUX_ORG=acme INFLUX_BUCKET=sensors telemetry-bridge
//!
//! # Using a configuration file
//! telemetry-bridge --config bridge.toml
//!
//! # In-memory clients, replaying one JSON payload per line
//! telemetry-bridge --mock --replay readings.jsonl
//!
//! # Check what the codec makes of a payload
//! telemetry-bridge decode payload.json
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use telemetry_bridge::broker::{BrokerClient, MockBrokerClient};
use telemetry_bridge::sink::log::MockLogProducer;
use telemetry_bridge::sink::timeseries::{MockTimeSeriesConnector, TimeSeriesConnector};
use telemetry_bridge::{Bridge, BridgeConfig, BridgeStats};
use tracing_subscriber::EnvFilter;

/// Telemetry Bridge
#[derive(Parser, Debug)]
#[command(name = "telemetry-bridge")]
#[command(about = "Bridge sensor readings from a pub/sub broker to a log stream and a time-series store")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Use in-memory broker, producer and time-series clients
    #[arg(long)]
    mock: bool,

    /// Feed each line of FILE through the mock broker, then exit
    #[arg(long, requires = "mock")]
    replay: Option<PathBuf>,

    /// Topic used for replayed messages
    #[arg(long, default_value = "sensors/replay")]
    replay_topic: String,

    /// Statistics reporting interval (seconds, 0 to disable)
    #[arg(long, default_value = "30")]
    stats_interval: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate example configuration file
    GenConfig {
        /// Output file path
        #[arg(short, long, default_value = "bridge.toml")]
        output: PathBuf,
    },

    /// Validate a configuration file
    Validate {
        /// Configuration file path
        #[arg(short, long)]
        config: PathBuf,
    },

    /// Decode a payload file and print the reading
    Decode {
        /// Payload file (one JSON object)
        file: PathBuf,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    if let Some(cmd) = args.command {
        return match cmd {
            Commands::GenConfig { output } => cmd_gen_config(&output),
            Commands::Validate { config } => cmd_validate(&config),
            Commands::Decode { file } => cmd_decode(&file),
        };
    }

    tracing::info!(version = env!("CARGO_PKG_VERSION"), mock = args.mock, "Starting telemetry bridge");

    if args.mock {
        run_mock(&args)
    } else {
        let config =
            BridgeConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
        config.log_summary();
        run_live(&config, args.stats_interval)
    }
}

fn run_mock(args: &Args) -> Result<()> {
    // Mock runs do not need real credentials, so no validation here.
    let mut config = match args.config {
        Some(ref path) => BridgeConfig::from_file(path).context("Failed to load configuration")?,
        None => BridgeConfig::example(),
    };
    config.apply_env();
    config.log_summary();

    let broker = Arc::new(MockBrokerClient::new());
    let producer = MockLogProducer::new();
    let connector = MockTimeSeriesConnector::new();
    let bridge = Bridge::new(&config, broker.clone(), &producer.factory(), connector.clone());

    let replay = args.replay.clone();
    let topic = args.replay_topic.clone();
    serve(&bridge, args.stats_interval, replay.is_none(), || match replay {
        Some(ref path) => replay_file(&broker, &topic, path),
        None => Ok(()),
    })?;

    tracing::info!(
        records = producer.records().len(),
        points = connector.points().len(),
        "Mock sinks received"
    );
    Ok(())
}

fn replay_file(broker: &MockBrokerClient, topic: &str, path: &Path) -> Result<()> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read replay file {}", path.display()))?;

    let mut delivered = 0usize;
    for line in content.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if broker.deliver(topic, line.as_bytes()) {
            delivered += 1;
        }
    }
    tracing::info!(delivered, file = %path.display(), "Replay finished");
    Ok(())
}

#[cfg(all(feature = "mqtt", feature = "influx"))]
fn run_live(config: &BridgeConfig, stats_interval: u64) -> Result<()> {
    use telemetry_bridge::broker::mqtt::MqttBrokerClient;
    use telemetry_bridge::sink::influx::InfluxConnector;

    let broker = Arc::new(MqttBrokerClient::new());
    let connector = InfluxConnector::new(config.timeseries.clone());
    let bridge = Bridge::assemble(config, broker, live_log_sink(config), connector);
    serve(&bridge, stats_interval, true, || Ok(()))
}

#[cfg(not(all(feature = "mqtt", feature = "influx")))]
fn run_live(_config: &BridgeConfig, _stats_interval: u64) -> Result<()> {
    anyhow::bail!(
        "live mode needs the `mqtt` and `influx` features; rebuild with \
         `--features mqtt` or run with --mock"
    )
}

#[cfg(all(feature = "mqtt", feature = "influx", feature = "kafka"))]
fn live_log_sink(config: &BridgeConfig) -> Arc<telemetry_bridge::LogSinkClient> {
    use telemetry_bridge::sink::kafka::KafkaProducerFactory;

    Arc::new(telemetry_bridge::LogSinkClient::new(
        &config.log_sink,
        &KafkaProducerFactory,
    ))
}

#[cfg(all(feature = "mqtt", feature = "influx", not(feature = "kafka")))]
fn live_log_sink(config: &BridgeConfig) -> Arc<telemetry_bridge::LogSinkClient> {
    tracing::warn!("Built without the `kafka` feature, log sink disabled");
    Arc::new(telemetry_bridge::LogSinkClient::uninitialized(
        &config.log_sink,
    ))
}

/// Start the bridge, run `on_started`, then wait for Ctrl+C (if `wait`)
/// while reporting stats, and shut down.
fn serve<B, C, F>(bridge: &Bridge<B, C>, stats_interval: u64, wait: bool, on_started: F) -> Result<()>
where
    B: BrokerClient + 'static,
    C: TimeSeriesConnector + 'static,
    F: FnOnce() -> Result<()>,
{
    if let Err(e) = bridge.start() {
        bridge.shutdown();
        return Err(e).context("Failed to connect to broker");
    }

    let started = on_started();

    if started.is_ok() && wait {
        let (stop_tx, stop_rx) = crossbeam::channel::bounded::<()>(1);
        ctrlc::set_handler(move || {
            tracing::info!("Received Ctrl+C, shutting down...");
            let _ = stop_tx.try_send(());
        })
        .context("Failed to install Ctrl+C handler")?;

        if stats_interval == 0 {
            let _ = stop_rx.recv();
        } else {
            let interval = Duration::from_secs(stats_interval);
            while let Err(crossbeam::channel::RecvTimeoutError::Timeout) =
                stop_rx.recv_timeout(interval)
            {
                log_stats(&bridge.stats(), "Bridge statistics");
            }
        }
    }

    bridge.shutdown();
    log_stats(&bridge.stats(), "Final statistics");
    started
}

fn log_stats(stats: &BridgeStats, label: &str) {
    let d = &stats.dispatch;
    tracing::info!(
        received = d.received,
        dispatched = d.dispatched,
        malformed = d.malformed,
        incomplete = d.incomplete,
        log_failures = d.log_failures,
        timeseries_failures = d.timeseries_failures,
        reconnects = stats.subscriber.reconnects,
        handler_panics = stats.subscriber.handler_panics,
        log_delivered = stats.log_sink.delivered,
        log_skipped = stats.log_sink.skipped,
        timeseries_reinits = stats.timeseries_reinits,
        "{}",
        label
    );
}

fn cmd_gen_config(output: &Path) -> Result<()> {
    let toml_str = toml::to_string_pretty(&BridgeConfig::example())
        .context("Failed to serialize configuration")?;

    let content = format!(
        r#"# Telemetry Bridge Configuration
# Generated by telemetry-bridge gen-config
#
# Environment variables override file values:
#   MQTT_BROKER, MQTT_CLIENT_ID, MQTT_TOPIC_FILTER,
#   KAFKA_BROKERS, KAFKA_TOPIC, KAFKA_CLIENT_ID,
#   INFLUX_URL, INFLUX_TOKEN, INFLUX_ORG, INFLUX_BUCKET

{}
"#,
        toml_str
    );

    std::fs::write(output, content)
        .with_context(|| format!("Failed to write {}", output.display()))?;
    println!("Generated configuration file: {}", output.display());
    Ok(())
}

fn cmd_validate(path: &Path) -> Result<()> {
    let result = BridgeConfig::from_file(path).and_then(|mut config| {
        config.apply_env();
        config.validate().map(|()| config)
    });

    match result {
        Ok(config) => {
            println!("Configuration valid!");
            println!();
            println!(
                "Broker:      {} (filter '{}')",
                config.broker.url, config.broker.topic_filter
            );
            println!(
                "Log sink:    {} -> {}",
                config.log_sink.brokers, config.log_sink.topic
            );
            println!(
                "Time-series: {} (org '{}', bucket '{}')",
                config.timeseries.url, config.timeseries.org, config.timeseries.bucket
            );
            Ok(())
        }
        Err(e) => {
            eprintln!("Configuration invalid: {}", e);
            std::process::exit(1);
        }
    }
}

fn cmd_decode(path: &Path) -> Result<()> {
    let payload =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;

    match telemetry_bridge::decode(&payload) {
        Ok(reading) => {
            println!("{}", serde_json::to_string_pretty(&reading)?);
            Ok(())
        }
        Err(e) => {
            eprintln!("Rejected ({}): {}", e.kind(), e);
            std::process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_args_parse() {
        let args = Args::parse_from([
            "telemetry-bridge",
            "--mock",
            "--replay",
            "readings.jsonl",
            "--stats-interval",
            "0",
        ]);
        assert!(args.mock);
        assert_eq!(args.replay, Some(PathBuf::from("readings.jsonl")));
        assert_eq!(args.replay_topic, "sensors/replay");
        assert_eq!(args.stats_interval, 0);
    }

    #[test]
    fn test_replay_requires_mock() {
        let result = Args::try_parse_from(["telemetry-bridge", "--replay", "x.jsonl"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_mock_replay_run() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"{{"sensorType":"temperature","sensorId":"s1","value":21.0,"timestamp":1}}"#
        )
        .unwrap();
        writeln!(file, "{{not a json}}").unwrap();

        let config = BridgeConfig::example();
        let broker = Arc::new(MockBrokerClient::new());
        let producer = MockLogProducer::new();
        let connector = MockTimeSeriesConnector::new();
        let bridge = Bridge::new(&config, broker.clone(), &producer.factory(), connector.clone());

        serve(&bridge, 0, false, || {
            replay_file(&broker, "sensors/replay", file.path())
        })
        .unwrap();

        let stats = bridge.stats();
        assert_eq!(stats.dispatch.received, 2);
        assert_eq!(stats.dispatch.dispatched, 1);
        assert_eq!(stats.dispatch.malformed, 1);
        assert_eq!(producer.records().len(), 1);
        assert_eq!(connector.points().len(), 1);
    }
}
