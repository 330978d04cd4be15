// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Outbound sinks.
//!
//! - [`log`]: keyed, fire-and-forget publish of raw payloads to a log stream
//! - [`timeseries`]: structured points to a time-series store, lazily
//!   re-initialized after failures

pub mod buffer;
pub mod line_protocol;
pub mod log;
pub mod timeseries;

#[cfg(feature = "influx")]
pub mod influx;

#[cfg(feature = "kafka")]
pub mod kafka;

use crate::error::SinkError;
use crate::reading::Reading;

/// Destination for raw payloads, keyed for partition affinity.
pub trait LogSink: Send + Sync {
    /// Publish `value` under `key`.
    ///
    /// A record needs a value, and an empty slice counts as no value.
    /// [`LogSinkClient`](log::LogSinkClient) rejects it with
    /// [`SinkError::Precondition`] before reaching the producer.
    fn send(&self, key: &str, value: &[u8]) -> Result<(), SinkError>;
}

/// Destination for decoded readings.
pub trait TimeSeriesSink: Send + Sync {
    fn write(&self, reading: &Reading, origin_topic: Option<&str>) -> Result<(), SinkError>;
}
