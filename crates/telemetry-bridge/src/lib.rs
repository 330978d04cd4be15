// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Telemetry Bridge
//!
//! Subscribes to sensor readings on a publish/subscribe broker and fans
//! each valid reading out to a log stream and a time-series store.
//!
//! # Pipeline
//!
//! ```text
//! broker --(topic, payload)--> IngestDispatcher --decode--> Reading
//!                                    |
//!                     +--------------+--------------+
//!                     v                             v
//!              LogSinkClient                TimeSeriesSinkClient
//!         (key = sensorId, raw bytes)   (point, lazy reinit on failure)
//! ```
//!
//! The two sinks are independent: a failure or panic in one never prevents
//! delivery to the other, and nothing propagates back to the broker link.
//!
//! # Features
//!
//! - `influx` (default): InfluxDB v2 HTTP writer
//! - `kafka`: rdkafka log producer
//! - `mqtt`: rumqttc broker client
//!
//! Mock clients for all three are always available.
//!
//! # Configuration File
//!
//! ```toml
//! [broker]
//! url = "tcp://localhost:1883"
//! topic_filter = "sensors/#"
//!
//! [log_sink]
//! brokers = "localhost:9093"
//! topic = "sensores_cloud"
//!
//! [timeseries]
//! url = "http://localhost:8086"
//! token = "my-token"
//! org = "my-org"
//! bucket = "sensors"
//! ```

pub mod bridge;
pub mod broker;
pub mod codec;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod reading;
pub mod sink;

pub use bridge::{Bridge, BridgeStats};
pub use broker::{BrokerClient, BrokerSubscriber, LinkState, MessageHandler};
pub use codec::{decode, DecodeError};
pub use config::{BridgeConfig, ConfigError};
pub use dispatcher::{DispatchStatsSnapshot, IngestDispatcher};
pub use error::{BrokerError, ClientError, SinkError};
pub use reading::Reading;
pub use sink::log::LogSinkClient;
pub use sink::timeseries::TimeSeriesSinkClient;
pub use sink::{LogSink, TimeSeriesSink};
