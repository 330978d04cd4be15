// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Log stream sink.
//!
//! Publishes raw payloads keyed by sensor id. Delivery is at-most-once and
//! best-effort: the producer owns retries, and the delivery callback only
//! logs the outcome.

use crate::config::LogSinkConfig;
use crate::error::{ClientError, SinkError};
use crate::sink::LogSink;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// One record submitted to the producer.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    pub topic: String,
    pub key: Option<String>,
    pub value: Vec<u8>,
}

/// Where a record landed.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordMetadata {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

/// Invoked once per record, from the producer's I/O thread.
pub type DeliveryCallback = Box<dyn FnOnce(Result<RecordMetadata, ClientError>) + Send>;

/// Asynchronous record producer.
pub trait LogProducer: Send + Sync {
    /// Enqueue a record. Must not block on network I/O.
    fn send(&self, record: LogRecord, on_delivery: DeliveryCallback) -> Result<(), ClientError>;

    /// Flush outstanding records within `timeout`, then release resources.
    fn close(&self, timeout: Duration) -> Result<(), ClientError>;
}

/// Builds a producer from configuration.
pub trait LogProducerFactory {
    fn create(&self, config: &LogSinkConfig) -> Result<Box<dyn LogProducer>, ClientError>;
}

impl<F> LogProducerFactory for F
where
    F: Fn(&LogSinkConfig) -> Result<Box<dyn LogProducer>, ClientError>,
{
    fn create(&self, config: &LogSinkConfig) -> Result<Box<dyn LogProducer>, ClientError> {
        self(config)
    }
}

#[derive(Debug, Default)]
struct SendCounters {
    submitted: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
    skipped: AtomicU64,
}

/// Snapshot of log sink counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LogSinkStats {
    /// Records accepted by the producer.
    pub submitted: u64,
    /// Records acknowledged by the log broker.
    pub delivered: u64,
    /// Records refused at submit time or failed at delivery.
    pub failed: u64,
    /// Sends dropped because no producer was available.
    pub skipped: u64,
}

/// Log sink client.
pub struct LogSinkClient {
    topic: String,
    close_timeout: Duration,
    producer: Mutex<Option<Arc<dyn LogProducer>>>,
    counters: Arc<SendCounters>,
}

impl LogSinkClient {
    /// Create the producer through `factory`.
    ///
    /// A factory failure is logged and leaves the client uninitialized;
    /// sends then become warnings.
    pub fn new(config: &LogSinkConfig, factory: &dyn LogProducerFactory) -> Self {
        let producer = match factory.create(config) {
            Ok(producer) => {
                tracing::info!(
                    brokers = %config.brokers,
                    topic = %config.topic,
                    "Log producer initialized"
                );
                Some(Arc::from(producer))
            }
            Err(e) => {
                tracing::error!(
                    brokers = %config.brokers,
                    error = %e,
                    "Failed to initialize log producer"
                );
                None
            }
        };
        Self::build(config, producer)
    }

    /// Use an existing producer.
    pub fn with_producer(config: &LogSinkConfig, producer: Arc<dyn LogProducer>) -> Self {
        Self::build(config, Some(producer))
    }

    /// Client without a producer. Every send is skipped with a warning.
    pub fn uninitialized(config: &LogSinkConfig) -> Self {
        Self::build(config, None)
    }

    fn build(config: &LogSinkConfig, producer: Option<Arc<dyn LogProducer>>) -> Self {
        Self {
            topic: config.topic.clone(),
            close_timeout: config.close_timeout(),
            producer: Mutex::new(producer),
            counters: Arc::new(SendCounters::default()),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn is_initialized(&self) -> bool {
        self.producer.lock().is_some()
    }

    /// Flush and release the producer. Later calls do nothing.
    pub fn close(&self) -> Result<(), SinkError> {
        let producer = self.producer.lock().take();
        match producer {
            Some(producer) => {
                tracing::info!(topic = %self.topic, "Closing log producer");
                producer
                    .close(self.close_timeout)
                    .map_err(SinkError::Close)?;
                Ok(())
            }
            None => Ok(()),
        }
    }

    pub fn stats(&self) -> LogSinkStats {
        LogSinkStats {
            submitted: self.counters.submitted.load(Ordering::Relaxed),
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            skipped: self.counters.skipped.load(Ordering::Relaxed),
        }
    }
}

impl LogSink for LogSinkClient {
    fn send(&self, key: &str, value: &[u8]) -> Result<(), SinkError> {
        // Empty is the missing value.
        if value.is_empty() {
            return Err(SinkError::Precondition("log record value is required"));
        }

        // Clone out so a concurrent close() never waits on a submit.
        let producer = self.producer.lock().clone();
        let Some(producer) = producer else {
            self.counters.skipped.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                topic = %self.topic,
                key,
                "Log producer not initialized, dropping record"
            );
            return Ok(());
        };

        let record = LogRecord {
            topic: self.topic.clone(),
            key: Some(key.to_string()),
            value: value.to_vec(),
        };

        let counters = Arc::clone(&self.counters);
        let key_owned = key.to_string();
        let on_delivery: DeliveryCallback = Box::new(move |result| match result {
            Ok(meta) => {
                counters.delivered.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    topic = %meta.topic,
                    partition = meta.partition,
                    offset = meta.offset,
                    key = %key_owned,
                    "Record delivered"
                );
            }
            Err(e) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                tracing::error!(key = %key_owned, error = %e, "Record delivery failed");
            }
        });

        match producer.send(record, on_delivery) {
            Ok(()) => {
                self.counters.submitted.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(e) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                Err(SinkError::Publish(e))
            }
        }
    }
}

// ============================================================================
// Mock Implementation for Testing
// ============================================================================

#[derive(Default)]
struct MockProducerState {
    records: Mutex<Vec<LogRecord>>,
    send_calls: AtomicU64,
    close_calls: AtomicU64,
    fail_send: AtomicBool,
    fail_delivery: AtomicBool,
    fail_close: AtomicBool,
    closed: AtomicBool,
}

/// In-memory producer. Clones share state, so a test can keep one handle
/// and give another to the sink.
#[derive(Clone, Default)]
pub struct MockLogProducer {
    state: Arc<MockProducerState>,
}

impl MockLogProducer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse records at submit time.
    pub fn set_fail_send(&self, fail: bool) {
        self.state.fail_send.store(fail, Ordering::SeqCst);
    }

    /// Accept records but report delivery failure.
    pub fn set_fail_delivery(&self, fail: bool) {
        self.state.fail_delivery.store(fail, Ordering::SeqCst);
    }

    /// Report a flush failure from `close`.
    pub fn set_fail_close(&self, fail: bool) {
        self.state.fail_close.store(fail, Ordering::SeqCst);
    }

    /// Records accepted and delivered so far.
    pub fn records(&self) -> Vec<LogRecord> {
        self.state.records.lock().clone()
    }

    pub fn send_calls(&self) -> u64 {
        self.state.send_calls.load(Ordering::SeqCst)
    }

    pub fn close_calls(&self) -> u64 {
        self.state.close_calls.load(Ordering::SeqCst)
    }

    /// Factory handing out clones of this producer.
    pub fn factory(&self) -> impl LogProducerFactory + '_ {
        move |_: &LogSinkConfig| -> Result<Box<dyn LogProducer>, ClientError> {
            Ok(Box::new(self.clone()))
        }
    }
}

impl LogProducer for MockLogProducer {
    fn send(&self, record: LogRecord, on_delivery: DeliveryCallback) -> Result<(), ClientError> {
        self.state.send_calls.fetch_add(1, Ordering::SeqCst);
        if self.state.closed.load(Ordering::SeqCst) {
            return Err(ClientError::Closed);
        }
        if self.state.fail_send.load(Ordering::SeqCst) {
            return Err(ClientError::Other("mock send failure".into()));
        }

        if self.state.fail_delivery.load(Ordering::SeqCst) {
            on_delivery(Err(ClientError::Other("mock delivery failure".into())));
            return Ok(());
        }

        let meta = {
            let mut records = self.state.records.lock();
            records.push(record.clone());
            RecordMetadata {
                topic: record.topic,
                partition: 0,
                offset: records.len() as i64 - 1,
            }
        };
        on_delivery(Ok(meta));
        Ok(())
    }

    fn close(&self, _timeout: Duration) -> Result<(), ClientError> {
        self.state.close_calls.fetch_add(1, Ordering::SeqCst);
        self.state.closed.store(true, Ordering::SeqCst);
        if self.state.fail_close.load(Ordering::SeqCst) {
            return Err(ClientError::Other("flush: mock timeout".into()));
        }
        Ok(())
    }
}
