// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! In-memory broker client for tests and `--mock` runs.
//!
//! Events are raised synchronously on the calling thread, which stands in
//! for the delivery thread of a real client.

use super::{BrokerCallback, BrokerClient, ConnectOptions, QoS};
use crate::error::BrokerError;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Scriptable [`BrokerClient`].
#[derive(Default)]
pub struct MockBrokerClient {
    connected: AtomicBool,
    fail_connect: AtomicBool,
    fail_subscribe: AtomicBool,
    server_uri: Mutex<String>,
    callback: Mutex<Option<Arc<dyn BrokerCallback>>>,
    subscriptions: Mutex<Vec<(String, QoS)>>,
    connect_calls: AtomicU64,
    subscribe_calls: AtomicU64,
    disconnect_calls: AtomicU64,
    close_calls: AtomicU64,
}

impl MockBrokerClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_connect(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_subscribe(&self, fail: bool) {
        self.fail_subscribe.store(fail, Ordering::SeqCst);
    }

    /// Successful subscriptions, in order.
    pub fn subscriptions(&self) -> Vec<(String, QoS)> {
        self.subscriptions.lock().clone()
    }

    pub fn connect_calls(&self) -> u64 {
        self.connect_calls.load(Ordering::SeqCst)
    }

    pub fn subscribe_calls(&self) -> u64 {
        self.subscribe_calls.load(Ordering::SeqCst)
    }

    pub fn disconnect_calls(&self) -> u64 {
        self.disconnect_calls.load(Ordering::SeqCst)
    }

    pub fn close_calls(&self) -> u64 {
        self.close_calls.load(Ordering::SeqCst)
    }

    fn callback(&self) -> Option<Arc<dyn BrokerCallback>> {
        self.callback.lock().clone()
    }

    /// Deliver a message as if it arrived from the broker.
    ///
    /// Returns false when not connected (nothing delivered).
    pub fn deliver(&self, topic: &str, payload: &[u8]) -> bool {
        if !self.is_connected() {
            return false;
        }
        match self.callback() {
            Some(cb) => {
                cb.message_arrived(topic, payload);
                true
            }
            None => false,
        }
    }

    /// Simulate a dropped connection.
    pub fn drop_connection(&self, cause: &str) {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(cb) = self.callback() {
            cb.connection_lost(cause);
        }
    }

    /// Simulate the broker refusing an accepted subscription.
    pub fn reject_subscription(&self, filter: &str, reason: &str) {
        if let Some(cb) = self.callback() {
            cb.subscribe_rejected(filter, reason);
        }
    }

    /// Simulate the automatic reconnect completing.
    pub fn reconnect(&self) {
        if self.connected.swap(true, Ordering::SeqCst) {
            return;
        }
        let uri = self.server_uri.lock().clone();
        if let Some(cb) = self.callback() {
            cb.connect_complete(true, &uri);
        }
    }
}

impl BrokerClient for MockBrokerClient {
    fn connect(
        &self,
        options: &ConnectOptions,
        callback: Arc<dyn BrokerCallback>,
    ) -> Result<(), BrokerError> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(BrokerError::Connect {
                uri: options.server_uri.clone(),
                reason: "mock connect failure".into(),
            });
        }

        *self.server_uri.lock() = options.server_uri.clone();
        *self.callback.lock() = Some(Arc::clone(&callback));
        self.connected.store(true, Ordering::SeqCst);

        callback.connect_complete(false, &options.server_uri);
        Ok(())
    }

    fn subscribe(&self, filter: &str, qos: QoS) -> Result<(), BrokerError> {
        self.subscribe_calls.fetch_add(1, Ordering::SeqCst);
        if !self.is_connected() {
            return Err(BrokerError::NotConnected);
        }
        if self.fail_subscribe.load(Ordering::SeqCst) {
            return Err(BrokerError::Subscribe {
                filter: filter.to_string(),
                reason: "mock subscribe failure".into(),
            });
        }
        self.subscriptions.lock().push((filter.to_string(), qos));
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn disconnect(&self) -> Result<(), BrokerError> {
        self.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn close(&self) -> Result<(), BrokerError> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
        self.callback.lock().take();
        Ok(())
    }
}
