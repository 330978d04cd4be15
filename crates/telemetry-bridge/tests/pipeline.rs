// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! End-to-end pipeline tests with mock broker, producer and store.

use std::sync::Arc;
use std::thread;
use telemetry_bridge::broker::{MockBrokerClient, QoS};
use telemetry_bridge::config::LogSinkConfig;
use telemetry_bridge::sink::log::{LogProducer, MockLogProducer};
use telemetry_bridge::sink::timeseries::MockTimeSeriesConnector;
use telemetry_bridge::{
    Bridge, BridgeConfig, ClientError, LinkState, LogSink, LogSinkClient, Reading, SinkError,
    TimeSeriesSink, TimeSeriesSinkClient,
};

const GROWLAB: &[u8] = br#"{"sensorType":"temperature","location":"growlab","sensorId":"sensor_1","value":24.5,"timestamp":1700000000000}"#;

struct Harness {
    broker: Arc<MockBrokerClient>,
    producer: MockLogProducer,
    connector: MockTimeSeriesConnector,
    bridge: Bridge<MockBrokerClient, MockTimeSeriesConnector>,
}

impl Harness {
    fn new() -> Self {
        Self::with(MockLogProducer::new(), MockTimeSeriesConnector::new())
    }

    fn with(producer: MockLogProducer, connector: MockTimeSeriesConnector) -> Self {
        let config = BridgeConfig::example();
        let broker = Arc::new(MockBrokerClient::new());
        let bridge = Bridge::new(&config, broker.clone(), &producer.factory(), connector.clone());
        bridge.start().expect("start");
        Self {
            broker,
            producer,
            connector,
            bridge,
        }
    }
}

#[test]
fn test_reading_fans_out_to_both_sinks() {
    let h = Harness::new();

    assert!(h.broker.deliver("sensors/temperature", GROWLAB));

    let records = h.producer.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].topic, "sensores_cloud");
    assert_eq!(records[0].key.as_deref(), Some("sensor_1"));
    assert_eq!(records[0].value, GROWLAB);

    let points = h.connector.points();
    assert_eq!(points.len(), 1);
    assert_eq!(
        points[0].to_line_protocol().unwrap(),
        "temperature,location=growlab,originTopic=sensors/temperature,sensorId=sensor_1,sensorType=temperature value=24.5,timestamp=1700000000000i 1700000000000"
    );

    let stats = h.bridge.stats();
    assert_eq!(stats.dispatch.received, 1);
    assert_eq!(stats.dispatch.dispatched, 1);
}

#[test]
fn test_missing_sensor_id_reaches_no_sink() {
    let h = Harness::new();

    h.broker.deliver(
        "sensors/humidity",
        br#"{"sensorType":"humidity","sensorId":null,"value":55.0,"timestamp":1700000000000}"#,
    );

    assert!(h.producer.records().is_empty());
    assert_eq!(h.producer.send_calls(), 0);
    assert!(h.connector.points().is_empty());
    assert_eq!(h.bridge.stats().dispatch.incomplete, 1);
}

#[test]
fn test_malformed_payload_reaches_no_sink() {
    let h = Harness::new();

    h.broker.deliver("sensors/temperature", b"{not a json}");

    assert_eq!(h.producer.send_calls(), 0);
    assert!(h.connector.points().is_empty());

    let stats = h.bridge.stats().dispatch;
    assert_eq!(stats.malformed, 1);
    assert_eq!(stats.dispatched, 0);
}

#[test]
fn test_resubscribes_after_reconnect() {
    let h = Harness::new();
    assert_eq!(h.bridge.state(), LinkState::Subscribed);

    h.broker.drop_connection("keepalive timeout");
    assert_eq!(h.bridge.state(), LinkState::ConnectionLost);
    // Nothing arrives while the link is down
    assert!(!h.broker.deliver("sensors/temperature", GROWLAB));

    h.broker.reconnect();
    assert_eq!(h.bridge.state(), LinkState::Subscribed);
    assert_eq!(
        h.broker.subscriptions(),
        vec![
            ("sensors/#".to_string(), QoS::AtLeastOnce),
            ("sensors/#".to_string(), QoS::AtLeastOnce),
        ]
    );

    assert!(h.broker.deliver("sensors/temperature", GROWLAB));
    assert_eq!(h.connector.points().len(), 1);
    assert_eq!(h.bridge.stats().subscriber.reconnects, 1);
}

#[test]
fn test_unavailable_store_does_not_block_log() {
    let connector = MockTimeSeriesConnector::new();
    connector.fail_next_connects(u64::MAX);
    let h = Harness::with(MockLogProducer::new(), connector);

    for _ in 0..3 {
        h.broker.deliver("sensors/temperature", GROWLAB);
    }

    assert_eq!(h.producer.records().len(), 3);
    assert!(h.connector.points().is_empty());

    let stats = h.bridge.stats();
    assert_eq!(stats.dispatch.timeseries_failures, 3);
    assert_eq!(stats.dispatch.log_failures, 0);
    // One reinit attempt per failed write
    assert_eq!(stats.timeseries_reinits, 3);
}

#[test]
fn test_failing_producer_does_not_block_store() {
    let producer = MockLogProducer::new();
    producer.set_fail_send(true);
    let h = Harness::with(producer, MockTimeSeriesConnector::new());

    h.broker.deliver("sensors/temperature", GROWLAB);

    assert_eq!(h.connector.points().len(), 1);
    assert_eq!(h.bridge.stats().dispatch.log_failures, 1);
}

#[test]
fn test_uninitialized_log_sink_skips_quietly() {
    let config = BridgeConfig::example();
    let broker = Arc::new(MockBrokerClient::new());
    let connector = MockTimeSeriesConnector::new();
    let factory = |_: &LogSinkConfig| -> Result<Box<dyn LogProducer>, ClientError> {
        Err(ClientError::Connect("brokers unreachable".into()))
    };
    let bridge = Bridge::new(&config, broker.clone(), &factory, connector.clone());
    bridge.start().unwrap();

    broker.deliver("sensors/temperature", GROWLAB);

    assert!(!bridge.log_sink().is_initialized());
    assert_eq!(connector.points().len(), 1);
    let stats = bridge.stats();
    assert_eq!(stats.log_sink.skipped, 1);
    assert_eq!(stats.dispatch.log_failures, 0);
}

#[test]
fn test_empty_log_value_never_reaches_producer() {
    let producer = MockLogProducer::new();
    let sink = LogSinkClient::with_producer(&LogSinkConfig::default(), Arc::new(producer.clone()));

    let err = sink.send("sensor_1", &[]).unwrap_err();

    assert!(matches!(err, SinkError::Precondition(_)));
    assert_eq!(producer.send_calls(), 0);
}

#[test]
fn test_shutdown_releases_once() {
    let h = Harness::new();

    h.bridge.shutdown();
    h.bridge.shutdown();

    assert_eq!(h.bridge.state(), LinkState::Closed);
    assert_eq!(h.broker.disconnect_calls(), 1);
    assert_eq!(h.broker.close_calls(), 1);
    assert_eq!(h.producer.close_calls(), 1);
    assert_eq!(h.connector.close_calls(), 1);

    // Writes after close neither reinit nor reach the store
    let reading = Reading::new("temperature", "sensor_1", 1.0, 1);
    let err = h.bridge.timeseries_sink().write(&reading, None).unwrap_err();
    assert!(matches!(err, SinkError::Unavailable(_)));
    assert_eq!(h.bridge.timeseries_sink().reinit_count(), 0);
}

#[test]
fn test_lazy_reinit_once_per_failure() {
    let connector = MockTimeSeriesConnector::new();
    connector.fail_next_pings(1);
    let h = Harness::with(MockLogProducer::new(), connector);

    assert!(!h.bridge.timeseries_sink().is_initialized());

    for _ in 0..5 {
        h.broker.deliver("sensors/temperature", GROWLAB);
    }

    assert_eq!(h.connector.points().len(), 5);
    assert_eq!(h.bridge.timeseries_sink().reinit_count(), 1);
    assert_eq!(h.connector.connect_calls(), 2);
}

#[test]
fn test_concurrent_writers_share_one_reinit() {
    let connector = MockTimeSeriesConnector::new();
    connector.fail_next_pings(1);
    let sink = Arc::new(TimeSeriesSinkClient::new(
        connector.clone(),
        std::time::Duration::from_secs(1),
    ));

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let sink = Arc::clone(&sink);
            thread::spawn(move || {
                let reading = Reading::new("temperature", format!("sensor_{}", i), 20.0, 1);
                sink.write(&reading, Some("sensors/temperature"))
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap().unwrap();
    }

    assert_eq!(sink.reinit_count(), 1);
    assert_eq!(connector.connect_calls(), 2);
    assert_eq!(connector.points().len(), 8);
}
