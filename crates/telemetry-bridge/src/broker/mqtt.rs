// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! MQTT broker client (rumqttc, synchronous API).
//!
//! A `mqtt-delivery` thread drives the connection iterator and raises
//! [`BrokerCallback`] events. After a connection error the iterator
//! reconnects on the next poll, so auto-reconnect is a matter of polling
//! again after a short pause.
//!
//! `subscribe` only queues the request. The SUBACK is matched back to its
//! filter by packet id, and a refused filter is reported through
//! [`BrokerCallback::subscribe_rejected`].

use super::{BrokerCallback, BrokerClient, ConnectOptions, QoS};
use crate::error::BrokerError;
use crossbeam::channel::{self, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use rumqttc::{
    Client, ConnectReturnCode, Connection, Event, MqttOptions, Outgoing, Packet, SubAck,
    SubscribeReasonCode,
};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

const DEFAULT_PORT: u16 = 1883;
const REQUEST_CAPACITY: usize = 64;
const RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// Subscriptions waiting for their SUBACK.
#[derive(Default)]
struct PendingSubscriptions {
    /// Queued with the client, packet id not assigned yet.
    queued: VecDeque<String>,
    /// Sent, keyed by packet id.
    sent: HashMap<u16, String>,
}

impl PendingSubscriptions {
    fn on_sent(&mut self, pkid: u16) {
        if let Some(filter) = self.queued.pop_front() {
            self.sent.insert(pkid, filter);
        }
    }

    fn on_acked(&mut self, pkid: u16) -> Option<String> {
        self.sent.remove(&pkid)
    }
}

#[derive(Default)]
struct Link {
    connected: AtomicBool,
    stop: AtomicBool,
    pending: Mutex<PendingSubscriptions>,
}

/// rumqttc-backed [`BrokerClient`].
pub struct MqttBrokerClient {
    link: Arc<Link>,
    reconnect_delay: Duration,
    client: Mutex<Option<Client>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Default for MqttBrokerClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MqttBrokerClient {
    pub fn new() -> Self {
        Self::with_reconnect_delay(RECONNECT_DELAY)
    }

    /// Pause between reconnect attempts after a connection loss.
    pub fn with_reconnect_delay(reconnect_delay: Duration) -> Self {
        Self {
            link: Arc::new(Link::default()),
            reconnect_delay,
            client: Mutex::new(None),
            worker: Mutex::new(None),
        }
    }

    fn shutdown(&self) {
        self.link.stop.store(true, Ordering::SeqCst);
        self.link.connected.store(false, Ordering::SeqCst);
        self.client.lock().take();
    }
}

/// Split `tcp://host:port` into host and port.
pub fn parse_server_uri(uri: &str) -> Result<(String, u16), BrokerError> {
    let invalid = |reason: &str| BrokerError::Connect {
        uri: uri.to_string(),
        reason: reason.to_string(),
    };

    let rest = ["tcp://", "mqtt://"]
        .iter()
        .find_map(|scheme| uri.strip_prefix(scheme))
        .unwrap_or(uri);
    if rest.contains("://") {
        return Err(invalid("unsupported scheme"));
    }

    let (host, port) = match rest.rsplit_once(':') {
        Some((host, port)) => {
            let port = port.parse::<u16>().map_err(|_| invalid("invalid port"))?;
            (host, port)
        }
        None => (rest, DEFAULT_PORT),
    };

    if host.is_empty() {
        return Err(invalid("missing host"));
    }
    Ok((host.to_string(), port))
}

fn to_mqtt_qos(qos: QoS) -> rumqttc::QoS {
    match qos {
        QoS::AtMostOnce => rumqttc::QoS::AtMostOnce,
        QoS::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
        QoS::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
    }
}

impl BrokerClient for MqttBrokerClient {
    fn connect(
        &self,
        options: &ConnectOptions,
        callback: Arc<dyn BrokerCallback>,
    ) -> Result<(), BrokerError> {
        let (host, port) = parse_server_uri(&options.server_uri)?;

        let mut mqtt_options = MqttOptions::new(options.client_id.clone(), host, port);
        mqtt_options.set_keep_alive(options.keep_alive);
        mqtt_options.set_clean_session(options.clean_session);

        let (client, connection) = Client::new(mqtt_options, REQUEST_CAPACITY);
        {
            let mut slot = self.client.lock();
            if slot.is_some() {
                return Err(BrokerError::Connect {
                    uri: options.server_uri.clone(),
                    reason: "client already connected".into(),
                });
            }
            // Stored before the delivery thread starts so that subscribe()
            // works from inside the first connect_complete.
            *slot = Some(client);
        }
        self.link.stop.store(false, Ordering::SeqCst);

        let (ready_tx, ready_rx) = channel::bounded(1);
        let delivery = DeliveryLoop {
            link: Arc::clone(&self.link),
            callback,
            server_uri: options.server_uri.clone(),
            auto_reconnect: options.automatic_reconnect,
            reconnect_delay: self.reconnect_delay,
        };
        let handle = std::thread::Builder::new()
            .name("mqtt-delivery".into())
            .spawn(move || delivery.run(connection, ready_tx))
            .map_err(|e| {
                self.shutdown();
                BrokerError::Connect {
                    uri: options.server_uri.clone(),
                    reason: format!("spawn delivery thread: {}", e),
                }
            })?;
        *self.worker.lock() = Some(handle);

        match ready_rx.recv_timeout(options.connect_timeout) {
            Ok(Ok(())) => Ok(()),
            Ok(Err(reason)) => {
                self.shutdown();
                Err(BrokerError::Connect {
                    uri: options.server_uri.clone(),
                    reason,
                })
            }
            Err(RecvTimeoutError::Timeout) => {
                self.shutdown();
                Err(BrokerError::Timeout {
                    uri: options.server_uri.clone(),
                    timeout: options.connect_timeout,
                })
            }
            Err(RecvTimeoutError::Disconnected) => {
                self.shutdown();
                Err(BrokerError::Connect {
                    uri: options.server_uri.clone(),
                    reason: "delivery thread exited".into(),
                })
            }
        }
    }

    fn subscribe(&self, filter: &str, qos: QoS) -> Result<(), BrokerError> {
        let slot = self.client.lock();
        let client = slot.as_ref().ok_or(BrokerError::NotConnected)?;

        self.link.pending.lock().queued.push_back(filter.to_string());
        client
            .try_subscribe(filter, to_mqtt_qos(qos))
            .map_err(|e| {
                self.link.pending.lock().queued.pop_back();
                BrokerError::Subscribe {
                    filter: filter.to_string(),
                    reason: e.to_string(),
                }
            })
    }

    fn is_connected(&self) -> bool {
        self.link.connected.load(Ordering::SeqCst)
    }

    fn disconnect(&self) -> Result<(), BrokerError> {
        self.link.stop.store(true, Ordering::SeqCst);
        self.link.connected.store(false, Ordering::SeqCst);
        let slot = self.client.lock();
        match slot.as_ref() {
            Some(client) => client
                .try_disconnect()
                .map_err(|e| BrokerError::Disconnect(e.to_string())),
            None => Ok(()),
        }
    }

    fn close(&self) -> Result<(), BrokerError> {
        self.shutdown();
        if let Some(handle) = self.worker.lock().take() {
            // The thread exits on its next poll; only reap it if already done.
            if handle.is_finished() && handle.join().is_err() {
                tracing::error!("MQTT delivery thread panicked");
            }
        }
        Ok(())
    }
}

struct DeliveryLoop {
    link: Arc<Link>,
    callback: Arc<dyn BrokerCallback>,
    server_uri: String,
    auto_reconnect: bool,
    reconnect_delay: Duration,
}

impl DeliveryLoop {
    fn run(self, mut connection: Connection, ready_tx: Sender<Result<(), String>>) {
        let mut ready = Some(ready_tx);
        let mut ever_connected = false;

        for notification in connection.iter() {
            if self.link.stop.load(Ordering::SeqCst) {
                break;
            }

            match notification {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    if ack.code != ConnectReturnCode::Success {
                        let reason = format!("connection refused: {:?}", ack.code);
                        if let Some(tx) = ready.take() {
                            let _ = tx.send(Err(reason));
                            break;
                        }
                        tracing::warn!(reason = %reason, "Broker refused reconnect");
                        continue;
                    }

                    // Packet ids from the previous session never get acked.
                    self.link.pending.lock().sent.clear();
                    self.link.connected.store(true, Ordering::SeqCst);
                    self.callback.connect_complete(ever_connected, &self.server_uri);
                    ever_connected = true;
                    if let Some(tx) = ready.take() {
                        let _ = tx.send(Ok(()));
                    }
                }
                Ok(Event::Outgoing(Outgoing::Subscribe(pkid))) => {
                    self.link.pending.lock().on_sent(pkid);
                }
                Ok(Event::Incoming(Packet::SubAck(ack))) => self.on_suback(&ack),
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    self.callback.message_arrived(&publish.topic, &publish.payload);
                }
                Ok(_) => {}
                Err(e) => {
                    if let Some(tx) = ready.take() {
                        let _ = tx.send(Err(e.to_string()));
                        break;
                    }
                    if self.link.stop.load(Ordering::SeqCst) {
                        break;
                    }
                    if self.link.connected.swap(false, Ordering::SeqCst) {
                        self.callback.connection_lost(&e.to_string());
                    }
                    if !self.auto_reconnect {
                        break;
                    }
                    std::thread::sleep(self.reconnect_delay);
                }
            }
        }

        self.link.connected.store(false, Ordering::SeqCst);
        tracing::debug!("MQTT delivery thread stopped");
    }

    fn on_suback(&self, ack: &SubAck) {
        let filter = self.link.pending.lock().on_acked(ack.pkid);
        let refused = ack
            .return_codes
            .iter()
            .any(|code| matches!(code, SubscribeReasonCode::Failure));
        if !refused {
            tracing::debug!(pkid = ack.pkid, "Subscription acknowledged");
            return;
        }

        let filter = filter.unwrap_or_else(|| "<unknown>".to_string());
        let reason = format!("SUBACK failure for packet {}", ack.pkid);
        self.callback.subscribe_rejected(&filter, &reason);
    }
}
