// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Inbound broker link.
//!
//! [`BrokerClient`] is the wire client seam. [`BrokerSubscriber`] drives it:
//! connect, subscribe, resubscribe after every reconnect, and hand each
//! message to the registered [`MessageHandler`].

pub mod mock;
#[cfg(feature = "mqtt")]
pub mod mqtt;
pub mod subscriber;

pub use mock::MockBrokerClient;
pub use subscriber::{BrokerSubscriber, LinkState, SubscriberStats};

use crate::config::BrokerConfig;
use crate::error::BrokerError;
use std::sync::Arc;
use std::time::Duration;

/// Delivery guarantee requested on subscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QoS {
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

/// Connection parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectOptions {
    pub server_uri: String,
    pub client_id: String,
    pub clean_session: bool,
    pub automatic_reconnect: bool,
    pub connect_timeout: Duration,
    pub keep_alive: Duration,
}

impl ConnectOptions {
    pub fn from_config(config: &BrokerConfig) -> Self {
        Self {
            server_uri: config.url.clone(),
            client_id: config.client_id.clone(),
            clean_session: true,
            automatic_reconnect: config.auto_reconnect,
            connect_timeout: config.connect_timeout(),
            keep_alive: config.keep_alive(),
        }
    }
}

/// Link events raised by a [`BrokerClient`] on its delivery thread.
pub trait BrokerCallback: Send + Sync {
    /// Raised for every established connection, the first one included.
    fn connect_complete(&self, reconnect: bool, server_uri: &str);

    fn connection_lost(&self, cause: &str);

    /// The broker refused a subscription that the client had accepted.
    fn subscribe_rejected(&self, filter: &str, reason: &str);

    fn message_arrived(&self, topic: &str, payload: &[u8]);
}

/// Wire-level publish/subscribe client.
pub trait BrokerClient: Send + Sync {
    /// Connect and return once the first connection is established or failed.
    fn connect(
        &self,
        options: &ConnectOptions,
        callback: Arc<dyn BrokerCallback>,
    ) -> Result<(), BrokerError>;

    /// Request a subscription. `Ok` means the request was accepted for
    /// sending; a later broker refusal arrives as
    /// [`BrokerCallback::subscribe_rejected`].
    fn subscribe(&self, filter: &str, qos: QoS) -> Result<(), BrokerError>;

    fn is_connected(&self) -> bool;

    fn disconnect(&self) -> Result<(), BrokerError>;

    /// Release client resources. Called once, after any disconnect.
    fn close(&self) -> Result<(), BrokerError>;
}

/// Receiver of raw inbound messages.
pub trait MessageHandler: Send + Sync {
    fn on_message(&self, topic: &str, payload: &[u8]);
}

impl<F> MessageHandler for F
where
    F: Fn(&str, &[u8]) + Send + Sync,
{
    fn on_message(&self, topic: &str, payload: &[u8]) {
        self(topic, payload)
    }
}
