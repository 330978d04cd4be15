// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Ingestion dispatcher.
//!
//! Decodes each inbound message and fans the reading out to both sinks.
//! The sinks are isolated from each other: an error or panic in one is
//! logged and counted, and the other is still called. Nothing propagates
//! back to the broker's delivery thread.

use crate::broker::MessageHandler;
use crate::codec::{self, DecodeError};
use crate::error::{panic_message, SinkError};
use crate::reading::Reading;
use crate::sink::{LogSink, TimeSeriesSink};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Dispatch counters.
#[derive(Debug, Default)]
pub struct DispatchStats {
    received: AtomicU64,
    dispatched: AtomicU64,
    malformed: AtomicU64,
    incomplete: AtomicU64,
    log_failures: AtomicU64,
    timeseries_failures: AtomicU64,
}

/// Point-in-time copy of [`DispatchStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStatsSnapshot {
    pub received: u64,
    /// Messages that decoded and were handed to the sinks
    pub dispatched: u64,
    pub malformed: u64,
    pub incomplete: u64,
    pub log_failures: u64,
    pub timeseries_failures: u64,
}

impl DispatchStats {
    pub fn snapshot(&self) -> DispatchStatsSnapshot {
        DispatchStatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            incomplete: self.incomplete.load(Ordering::Relaxed),
            log_failures: self.log_failures.load(Ordering::Relaxed),
            timeseries_failures: self.timeseries_failures.load(Ordering::Relaxed),
        }
    }
}

/// Which sink a failure came from.
#[derive(Debug, Clone, Copy)]
enum SinkKind {
    Log,
    TimeSeries,
}

impl SinkKind {
    fn name(self) -> &'static str {
        match self {
            SinkKind::Log => "log",
            SinkKind::TimeSeries => "timeseries",
        }
    }
}

/// Decode-then-fan-out handler registered on the broker subscriber.
pub struct IngestDispatcher {
    log_sink: Arc<dyn LogSink>,
    ts_sink: Arc<dyn TimeSeriesSink>,
    stats: DispatchStats,
}

impl IngestDispatcher {
    pub fn new(log_sink: Arc<dyn LogSink>, ts_sink: Arc<dyn TimeSeriesSink>) -> Self {
        Self {
            log_sink,
            ts_sink,
            stats: DispatchStats::default(),
        }
    }

    pub fn stats(&self) -> DispatchStatsSnapshot {
        self.stats.snapshot()
    }

    fn reject(&self, topic: &str, payload: &[u8], err: &DecodeError) {
        let raw = String::from_utf8_lossy(payload);
        match err {
            DecodeError::Malformed(_) => {
                self.stats.malformed.fetch_add(1, Ordering::Relaxed);
                tracing::error!(topic, payload = %raw, error = %err, "Dropping malformed message");
            }
            DecodeError::Incomplete(_) => {
                self.stats.incomplete.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(topic, payload = %raw, error = %err, "Dropping incomplete reading");
            }
        }
    }

    fn dispatch(&self, topic: &str, payload: &[u8], reading: &Reading) {
        self.stats.dispatched.fetch_add(1, Ordering::Relaxed);

        self.guarded(SinkKind::Log, &reading.sensor_id, || {
            self.log_sink.send(&reading.sensor_id, payload)
        });
        self.guarded(SinkKind::TimeSeries, &reading.sensor_id, || {
            self.ts_sink.write(reading, Some(topic))
        });
    }

    /// Run one sink call, containing both errors and panics.
    fn guarded<F>(&self, kind: SinkKind, sensor_id: &str, call: F)
    where
        F: FnOnce() -> Result<(), SinkError>,
    {
        let failure = match catch_unwind(AssertUnwindSafe(call)) {
            Ok(Ok(())) => return,
            Ok(Err(e)) => e.to_string(),
            Err(panic) => format!("panic: {}", panic_message(panic.as_ref())),
        };

        let counter = match kind {
            SinkKind::Log => &self.stats.log_failures,
            SinkKind::TimeSeries => &self.stats.timeseries_failures,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        tracing::error!(
            sink = kind.name(),
            sensor_id,
            error = %failure,
            "Sink call failed"
        );
    }
}

impl MessageHandler for IngestDispatcher {
    fn on_message(&self, topic: &str, payload: &[u8]) {
        self.stats.received.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(topic, bytes = payload.len(), "Message received");

        match codec::decode(payload) {
            Ok(reading) => self.dispatch(topic, payload, &reading),
            Err(e) => self.reject(topic, payload, &e),
        }
    }
}
