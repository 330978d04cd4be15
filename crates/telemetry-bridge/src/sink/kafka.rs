// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Kafka log producer (rdkafka).
//!
//! Uses a `ThreadedProducer`: sends only enqueue into librdkafka, and the
//! producer's polling thread runs delivery callbacks.

use crate::config::LogSinkConfig;
use crate::error::ClientError;
use crate::sink::log::{
    DeliveryCallback, LogProducer, LogProducerFactory, LogRecord, RecordMetadata,
};
use parking_lot::Mutex;
use rdkafka::config::ClientConfig;
use rdkafka::message::Message;
use rdkafka::producer::{BaseRecord, DeliveryResult, Producer, ProducerContext, ThreadedProducer};
use rdkafka::util::Timeout;
use rdkafka::ClientContext;
use std::time::Duration;

/// Callback slot carried through librdkafka as the delivery opaque.
struct PendingDelivery(Mutex<Option<DeliveryCallback>>);

struct DeliveryReporter;

impl ClientContext for DeliveryReporter {}

impl ProducerContext for DeliveryReporter {
    type DeliveryOpaque = Box<PendingDelivery>;

    fn delivery(&self, result: &DeliveryResult<'_>, opaque: Self::DeliveryOpaque) {
        let Some(callback) = opaque.0.lock().take() else {
            return;
        };
        let outcome = match result {
            Ok(msg) => Ok(RecordMetadata {
                topic: msg.topic().to_string(),
                partition: msg.partition(),
                offset: msg.offset(),
            }),
            Err((e, _)) => Err(ClientError::Other(e.to_string())),
        };
        callback(outcome);
    }
}

/// rdkafka-backed [`LogProducer`].
pub struct KafkaProducer {
    inner: ThreadedProducer<DeliveryReporter>,
}

impl LogProducer for KafkaProducer {
    fn send(&self, record: LogRecord, on_delivery: DeliveryCallback) -> Result<(), ClientError> {
        let opaque = Box::new(PendingDelivery(Mutex::new(Some(on_delivery))));

        let mut base: BaseRecord<'_, str, [u8], Box<PendingDelivery>> =
            BaseRecord::with_opaque_to(&record.topic, opaque).payload(record.value.as_slice());
        if let Some(key) = record.key.as_deref() {
            base = base.key(key);
        }

        self.inner
            .send(base)
            .map_err(|(e, _)| ClientError::Other(e.to_string()))
    }

    fn close(&self, timeout: Duration) -> Result<(), ClientError> {
        let pending = self.inner.in_flight_count();
        tracing::debug!(pending, ?timeout, "Flushing log producer");
        self.inner
            .flush(Timeout::After(timeout))
            .map_err(|e| ClientError::Other(format!("flush: {}", e)))
    }
}

/// Creates [`KafkaProducer`]s.
#[derive(Debug, Default, Clone, Copy)]
pub struct KafkaProducerFactory;

impl LogProducerFactory for KafkaProducerFactory {
    fn create(&self, config: &LogSinkConfig) -> Result<Box<dyn LogProducer>, ClientError> {
        let inner: ThreadedProducer<DeliveryReporter> = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("client.id", &config.client_id)
            .set("reconnect.backoff.ms", config.reconnect_backoff_ms.to_string())
            .set(
                "reconnect.backoff.max.ms",
                config.reconnect_backoff_max_ms.to_string(),
            )
            .create_with_context(DeliveryReporter)
            .map_err(|e| ClientError::Connect(e.to_string()))?;

        Ok(Box::new(KafkaProducer { inner }))
    }
}
