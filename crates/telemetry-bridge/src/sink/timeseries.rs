// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Time-series sink with lazy re-initialization.
//!
//! The client is probed (ping) when created. A failed probe is logged and
//! leaves the sink uninitialized; the next write retries initialization
//! under the same lock that guards the client slot, so concurrent writers
//! never build two clients.

use crate::error::{ClientError, SinkError};
use crate::reading::{Reading, UNKNOWN};
use crate::sink::line_protocol::{Point, WritePrecision};
use crate::sink::TimeSeriesSink;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Tag carrying the sensor identifier.
pub const TAG_SENSOR_ID: &str = "sensorId";
/// Tag carrying the installation site.
pub const TAG_LOCATION: &str = "location";
/// Tag carrying the topic the reading arrived on.
pub const TAG_ORIGIN_TOPIC: &str = "originTopic";
/// Tag carrying the measurement kind.
pub const TAG_SENSOR_TYPE: &str = "sensorType";

/// A connected time-series client.
pub trait TimeSeriesClient: Send + Sync {
    /// Connectivity probe.
    fn ping(&self) -> Result<(), ClientError>;

    /// Queue a point for background writing. Must not block on network I/O.
    fn write_point(&self, point: Point) -> Result<(), ClientError>;

    /// Flush queued points within `timeout`, then release resources.
    fn close(&self, timeout: Duration) -> Result<(), ClientError>;
}

/// Creates clients. Called once at startup and again for each lazy reinit.
pub trait TimeSeriesConnector: Send + Sync {
    fn connect(&self) -> Result<Box<dyn TimeSeriesClient>, ClientError>;
}

/// Build the point written for `reading`.
pub fn reading_point(reading: &Reading, origin_topic: Option<&str>) -> Point {
    let origin = origin_topic.filter(|t| !t.is_empty()).unwrap_or(UNKNOWN);

    Point::measurement(reading.sensor_type.as_str())
        .tag(TAG_SENSOR_ID, reading.sensor_id.as_str())
        .tag(TAG_LOCATION, reading.location_or_unknown())
        .tag(TAG_ORIGIN_TOPIC, origin)
        .tag(TAG_SENSOR_TYPE, reading.sensor_type.as_str())
        .field("value", reading.value)
        .field("timestamp", reading.timestamp)
        .time(reading.timestamp, WritePrecision::Ms)
}

/// Time-series sink client.
pub struct TimeSeriesSinkClient<C: TimeSeriesConnector> {
    connector: C,
    close_timeout: Duration,
    /// Client slot. Also the reinit lock.
    client: Mutex<Option<Arc<dyn TimeSeriesClient>>>,
    closed: AtomicBool,
    reinit_count: AtomicU64,
}

impl<C: TimeSeriesConnector> TimeSeriesSinkClient<C> {
    /// Create the sink and attempt a first initialization.
    pub fn new(connector: C, close_timeout: Duration) -> Self {
        let client = initialize(&connector);
        Self {
            connector,
            close_timeout,
            client: Mutex::new(client),
            closed: AtomicBool::new(false),
            reinit_count: AtomicU64::new(0),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.client.lock().is_some()
    }

    /// Number of lazy re-initialization attempts so far.
    pub fn reinit_count(&self) -> u64 {
        self.reinit_count.load(Ordering::Relaxed)
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// Flush and release the client. Later calls do nothing.
    pub fn close(&self) -> Result<(), SinkError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let client = self.client.lock().take();
        if let Some(client) = client {
            tracing::info!("Closing time-series client");
            client.close(self.close_timeout).map_err(SinkError::Close)?;
        }
        Ok(())
    }

    fn acquire(&self) -> Result<Arc<dyn TimeSeriesClient>, SinkError> {
        let mut slot = self.client.lock();

        if let Some(client) = slot.as_ref() {
            return Ok(Arc::clone(client));
        }
        if self.closed.load(Ordering::SeqCst) {
            return Err(SinkError::Unavailable("time-series sink closed".into()));
        }

        self.reinit_count.fetch_add(1, Ordering::Relaxed);
        tracing::info!("Time-series client not initialized, attempting reinit");

        match initialize(&self.connector) {
            Some(client) => {
                *slot = Some(Arc::clone(&client));
                Ok(client)
            }
            None => Err(SinkError::Unavailable(
                "time-series client could not be initialized".into(),
            )),
        }
    }

    fn discard(&self, failed: &Arc<dyn TimeSeriesClient>) {
        let mut slot = self.client.lock();
        if slot.as_ref().is_some_and(|c| Arc::ptr_eq(c, failed)) {
            *slot = None;
        }
    }
}

impl<C: TimeSeriesConnector> TimeSeriesSink for TimeSeriesSinkClient<C> {
    fn write(&self, reading: &Reading, origin_topic: Option<&str>) -> Result<(), SinkError> {
        if !reading.is_complete() {
            tracing::warn!(
                sensor_id = %reading.sensor_id,
                sensor_type = %reading.sensor_type,
                "Skipping reading without sensor id or type"
            );
            return Ok(());
        }

        let client = self.acquire()?;
        let point = reading_point(reading, origin_topic);

        match client.write_point(point) {
            Ok(()) => {
                tracing::trace!(sensor_id = %reading.sensor_id, "Point queued");
                Ok(())
            }
            Err(ClientError::Closed) => {
                // Writer died underneath us; next write reinitializes.
                self.discard(&client);
                Err(SinkError::Unavailable("time-series client closed".into()))
            }
            Err(e) => Err(SinkError::Publish(e)),
        }
    }
}

/// Connect and probe. Failures are logged, never raised.
fn initialize<C: TimeSeriesConnector + ?Sized>(connector: &C) -> Option<Arc<dyn TimeSeriesClient>> {
    let client = match connector.connect() {
        Ok(client) => client,
        Err(e) => {
            tracing::error!(error = %e, "Failed to create time-series client");
            return None;
        }
    };

    if let Err(e) = client.ping() {
        tracing::error!(error = %e, "Time-series store unreachable");
        if let Err(e) = client.close(Duration::ZERO) {
            tracing::debug!(error = %e, "Closing probe client failed");
        }
        return None;
    }

    tracing::info!("Time-series client initialized");
    Some(Arc::from(client))
}

// ============================================================================
// Mock Implementation for Testing
// ============================================================================

#[derive(Default)]
struct MockStoreState {
    points: Mutex<Vec<Point>>,
    connects: AtomicU64,
    pings: AtomicU64,
    closes: AtomicU64,
    fail_connects: AtomicU64,
    fail_pings: AtomicU64,
    fail_writes: AtomicBool,
    fail_close: AtomicBool,
}

/// In-memory store. Clones share state.
///
/// `fail_next_connects(n)` and `fail_next_pings(n)` make the next `n`
/// attempts fail, which drives the lazy reinit path.
#[derive(Clone, Default)]
pub struct MockTimeSeriesConnector {
    state: Arc<MockStoreState>,
}

impl MockTimeSeriesConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next_connects(&self, n: u64) {
        self.state.fail_connects.store(n, Ordering::SeqCst);
    }

    pub fn fail_next_pings(&self, n: u64) {
        self.state.fail_pings.store(n, Ordering::SeqCst);
    }

    /// Make every write on live clients report `Closed`.
    pub fn set_fail_writes(&self, fail: bool) {
        self.state.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Make `close` on live clients report a flush failure.
    pub fn set_fail_close(&self, fail: bool) {
        self.state.fail_close.store(fail, Ordering::SeqCst);
    }

    /// Points written so far, across every client.
    pub fn points(&self) -> Vec<Point> {
        self.state.points.lock().clone()
    }

    pub fn connect_calls(&self) -> u64 {
        self.state.connects.load(Ordering::SeqCst)
    }

    pub fn ping_calls(&self) -> u64 {
        self.state.pings.load(Ordering::SeqCst)
    }

    pub fn close_calls(&self) -> u64 {
        self.state.closes.load(Ordering::SeqCst)
    }
}

fn take_failure(counter: &AtomicU64) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

impl TimeSeriesConnector for MockTimeSeriesConnector {
    fn connect(&self) -> Result<Box<dyn TimeSeriesClient>, ClientError> {
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        if take_failure(&self.state.fail_connects) {
            return Err(ClientError::Connect("mock connect failure".into()));
        }
        Ok(Box::new(MockTimeSeriesClient {
            state: Arc::clone(&self.state),
        }))
    }
}

struct MockTimeSeriesClient {
    state: Arc<MockStoreState>,
}

impl TimeSeriesClient for MockTimeSeriesClient {
    fn ping(&self) -> Result<(), ClientError> {
        self.state.pings.fetch_add(1, Ordering::SeqCst);
        if take_failure(&self.state.fail_pings) {
            return Err(ClientError::Ping("mock ping failure".into()));
        }
        Ok(())
    }

    fn write_point(&self, point: Point) -> Result<(), ClientError> {
        if self.state.fail_writes.load(Ordering::SeqCst) {
            return Err(ClientError::Closed);
        }
        self.state.points.lock().push(point);
        Ok(())
    }

    fn close(&self, _timeout: Duration) -> Result<(), ClientError> {
        self.state.closes.fetch_add(1, Ordering::SeqCst);
        if self.state.fail_close.load(Ordering::SeqCst) {
            return Err(ClientError::Other("flush: mock timeout".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::line_protocol::FieldValue;

    fn sink(connector: &MockTimeSeriesConnector) -> TimeSeriesSinkClient<MockTimeSeriesConnector> {
        TimeSeriesSinkClient::new(connector.clone(), Duration::from_secs(1))
    }

    fn reading() -> Reading {
        Reading::new("temperature", "sensor_1", 24.5, 1_700_000_000_000).with_location("growlab")
    }

    #[test]
    fn test_reading_point_shape() {
        let point = reading_point(&reading(), Some("sensors/temperature"));

        assert_eq!(point.measurement_name(), "temperature");
        assert_eq!(point.tag_value("sensorId"), Some("sensor_1"));
        assert_eq!(point.tag_value("location"), Some("growlab"));
        assert_eq!(point.tag_value("originTopic"), Some("sensors/temperature"));
        assert_eq!(point.tag_value("sensorType"), Some("temperature"));
        assert_eq!(point.field_value("value"), Some(&FieldValue::Float(24.5)));
        assert_eq!(
            point.field_value("timestamp"),
            Some(&FieldValue::Integer(1_700_000_000_000))
        );
        assert_eq!(
            point.timestamp(),
            Some((1_700_000_000_000, WritePrecision::Ms))
        );
    }

    #[test]
    fn test_reading_point_defaults_unknown() {
        let reading = Reading::new("humidity", "h1", 50.0, 1);
        let point = reading_point(&reading, None);

        assert_eq!(point.tag_value("location"), Some("unknown"));
        assert_eq!(point.tag_value("originTopic"), Some("unknown"));
    }

    #[test]
    fn test_write_queues_point() {
        let connector = MockTimeSeriesConnector::new();
        let sink = sink(&connector);

        assert!(sink.is_initialized());
        sink.write(&reading(), Some("sensors/temperature")).unwrap();

        assert_eq!(connector.points().len(), 1);
        assert_eq!(sink.reinit_count(), 0);
    }

    #[test]
    fn test_incomplete_reading_skipped() {
        let connector = MockTimeSeriesConnector::new();
        connector.fail_next_connects(1);
        let sink = sink(&connector);

        let reading = Reading::new("temperature", "", 1.0, 1);
        assert!(sink.write(&reading, None).is_ok());
        assert!(connector.points().is_empty());
        // Skipped before any reinit attempt
        assert_eq!(sink.reinit_count(), 0);
    }

    #[test]
    fn test_failed_ping_defers_to_first_write() {
        let connector = MockTimeSeriesConnector::new();
        connector.fail_next_pings(1);
        let sink = sink(&connector);

        assert!(!sink.is_initialized());
        // Probe client released
        assert_eq!(connector.close_calls(), 1);

        sink.write(&reading(), None).unwrap();
        assert!(sink.is_initialized());
        assert_eq!(sink.reinit_count(), 1);
        assert_eq!(connector.connect_calls(), 2);
        assert_eq!(connector.points().len(), 1);
    }

    #[test]
    fn test_reinit_failure_is_unavailable() {
        let connector = MockTimeSeriesConnector::new();
        connector.fail_next_connects(2);
        let sink = sink(&connector);

        let err = sink.write(&reading(), None).unwrap_err();
        assert!(matches!(err, SinkError::Unavailable(_)));

        sink.write(&reading(), None).unwrap();
        assert_eq!(sink.reinit_count(), 2);
        assert_eq!(connector.points().len(), 1);
    }

    #[test]
    fn test_closed_client_discarded() {
        let connector = MockTimeSeriesConnector::new();
        let sink = sink(&connector);

        connector.set_fail_writes(true);
        let err = sink.write(&reading(), None).unwrap_err();
        assert!(matches!(err, SinkError::Unavailable(_)));
        assert!(!sink.is_initialized());

        connector.set_fail_writes(false);
        sink.write(&reading(), None).unwrap();
        assert_eq!(sink.reinit_count(), 1);
    }

    #[test]
    fn test_close_idempotent_and_final() {
        let connector = MockTimeSeriesConnector::new();
        let sink = sink(&connector);

        sink.close().unwrap();
        sink.close().unwrap();
        assert_eq!(connector.close_calls(), 1);

        let err = sink.write(&reading(), None).unwrap_err();
        assert!(matches!(err, SinkError::Unavailable(_)));
        assert_eq!(sink.reinit_count(), 0);
        assert_eq!(connector.connect_calls(), 1);
    }

    #[test]
    fn test_close_failure_reported_as_close() {
        let connector = MockTimeSeriesConnector::new();
        let sink = sink(&connector);
        connector.set_fail_close(true);

        let err = sink.close().unwrap_err();
        assert!(matches!(err, SinkError::Close(_)));
        assert_eq!(err.to_string(), "close failed: flush: mock timeout");

        // Still closed for good
        assert!(sink.close().is_ok());
        assert_eq!(connector.close_calls(), 1);
    }
}
