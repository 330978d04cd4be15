// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Broker subscriber state machine.
//!
//! ```text
//! Disconnected -> Connecting -> Connected -> Subscribed
//!                      ^                         |
//!                      +---- ConnectionLost <----+
//!
//! any state -> Closed (terminal)
//! ```
//!
//! Every `connect_complete` event, first connection or automatic reconnect,
//! re-issues the subscription: the session is clean, so the broker forgets
//! it on each reconnect.

use super::{BrokerCallback, BrokerClient, ConnectOptions, MessageHandler, QoS};
use crate::config::BrokerConfig;
use crate::error::{panic_message, BrokerError};
use parking_lot::{Mutex, RwLock};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Link state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
    Subscribed,
    ConnectionLost,
    Closed,
}

/// Subscriber statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscriberStats {
    /// Messages handed to the handler
    pub messages_received: u64,
    /// Handler invocations that panicked
    pub handler_panics: u64,
    pub subscribe_attempts: u64,
    pub subscribe_failures: u64,
    /// Automatic reconnects completed
    pub reconnects: u64,
    pub connection_losses: u64,
}

#[derive(Default)]
struct Counters {
    messages_received: AtomicU64,
    handler_panics: AtomicU64,
    subscribe_attempts: AtomicU64,
    subscribe_failures: AtomicU64,
    reconnects: AtomicU64,
    connection_losses: AtomicU64,
}

struct Shared<C: BrokerClient> {
    options: ConnectOptions,
    topic_filter: String,
    client: Arc<C>,
    handler: RwLock<Option<Arc<dyn MessageHandler>>>,
    state: Mutex<LinkState>,
    counters: Counters,
}

/// Forwards client events to the subscriber without keeping it alive.
struct LinkEvents<C: BrokerClient> {
    shared: Weak<Shared<C>>,
}

impl<C: BrokerClient + 'static> BrokerCallback for LinkEvents<C> {
    fn connect_complete(&self, reconnect: bool, server_uri: &str) {
        if let Some(shared) = self.shared.upgrade() {
            shared.on_connect_complete(reconnect, server_uri);
        }
    }

    fn connection_lost(&self, cause: &str) {
        if let Some(shared) = self.shared.upgrade() {
            shared.on_connection_lost(cause);
        }
    }

    fn subscribe_rejected(&self, filter: &str, reason: &str) {
        if let Some(shared) = self.shared.upgrade() {
            shared.on_subscribe_rejected(filter, reason);
        }
    }

    fn message_arrived(&self, topic: &str, payload: &[u8]) {
        if let Some(shared) = self.shared.upgrade() {
            shared.on_message_arrived(topic, payload);
        }
    }
}

/// Drives a [`BrokerClient`] and dispatches inbound messages.
pub struct BrokerSubscriber<C: BrokerClient + 'static> {
    shared: Arc<Shared<C>>,
}

impl<C: BrokerClient + 'static> Clone for BrokerSubscriber<C> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<C: BrokerClient + 'static> BrokerSubscriber<C> {
    pub fn new(config: &BrokerConfig, client: Arc<C>) -> Self {
        Self {
            shared: Arc::new(Shared {
                options: ConnectOptions::from_config(config),
                topic_filter: config.topic_filter.clone(),
                client,
                handler: RwLock::new(None),
                state: Mutex::new(LinkState::Disconnected),
                counters: Counters::default(),
            }),
        }
    }

    /// Register the message handler. Must happen before [`connect`](Self::connect).
    pub fn set_handler(&self, handler: Arc<dyn MessageHandler>) {
        *self.shared.handler.write() = Some(handler);
    }

    pub fn state(&self) -> LinkState {
        *self.shared.state.lock()
    }

    pub fn topic_filter(&self) -> &str {
        &self.shared.topic_filter
    }

    pub fn client(&self) -> &Arc<C> {
        &self.shared.client
    }

    /// Connect and subscribe.
    ///
    /// A connect failure is returned and leaves the link `Disconnected`.
    /// A subscribe failure is only logged; the next reconnect retries it.
    pub fn connect(&self) -> Result<(), BrokerError> {
        let shared = &self.shared;

        if shared.handler.read().is_none() {
            return Err(BrokerError::Precondition(
                "message handler must be registered before connect",
            ));
        }

        {
            let mut state = shared.state.lock();
            match *state {
                LinkState::Closed => return Err(BrokerError::Closed),
                LinkState::Disconnected => *state = LinkState::Connecting,
                other => {
                    tracing::warn!(state = ?other, "Broker link already started");
                    return Ok(());
                }
            }
        }

        tracing::info!(
            uri = %shared.options.server_uri,
            client_id = %shared.options.client_id,
            "Connecting to broker"
        );

        let events: Arc<dyn BrokerCallback> = Arc::new(LinkEvents {
            shared: Arc::downgrade(shared),
        });

        if let Err(e) = shared.client.connect(&shared.options, events) {
            shared.transition(LinkState::Connecting, LinkState::Disconnected);
            tracing::error!(uri = %shared.options.server_uri, error = %e, "Broker connect failed");
            return Err(e);
        }

        // Clients that raise connect_complete before returning have already
        // subscribed.
        if shared.transition(LinkState::Connecting, LinkState::Connected) {
            let _ = shared.subscribe();
        }
        Ok(())
    }

    /// Subscribe to the configured filter at least-once.
    pub fn subscribe(&self) -> Result<(), BrokerError> {
        self.shared.subscribe()
    }

    /// Disconnect if connected, then release the client. Later calls do nothing.
    pub fn close(&self) -> Result<(), BrokerError> {
        let shared = &self.shared;
        {
            let mut state = shared.state.lock();
            if *state == LinkState::Closed {
                return Ok(());
            }
            *state = LinkState::Closed;
        }

        let mut result = Ok(());

        if shared.client.is_connected() {
            tracing::info!(uri = %shared.options.server_uri, "Disconnecting from broker");
            if let Err(e) = shared.client.disconnect() {
                tracing::error!(error = %e, "Broker disconnect failed");
                result = Err(e);
            }
        }

        if let Err(e) = shared.client.close() {
            tracing::error!(error = %e, "Releasing broker client failed");
            if result.is_ok() {
                result = Err(e);
            }
        }

        tracing::info!("Broker link closed");
        result
    }

    pub fn stats(&self) -> SubscriberStats {
        let c = &self.shared.counters;
        SubscriberStats {
            messages_received: c.messages_received.load(Ordering::Relaxed),
            handler_panics: c.handler_panics.load(Ordering::Relaxed),
            subscribe_attempts: c.subscribe_attempts.load(Ordering::Relaxed),
            subscribe_failures: c.subscribe_failures.load(Ordering::Relaxed),
            reconnects: c.reconnects.load(Ordering::Relaxed),
            connection_losses: c.connection_losses.load(Ordering::Relaxed),
        }
    }
}

impl<C: BrokerClient> Shared<C> {
    /// Move `from -> to`. Returns false if the state was something else.
    fn transition(&self, from: LinkState, to: LinkState) -> bool {
        let mut state = self.state.lock();
        if *state == from {
            *state = to;
            true
        } else {
            false
        }
    }

    /// Set `to` unless closed. Returns false if closed.
    fn set_unless_closed(&self, to: LinkState) -> bool {
        let mut state = self.state.lock();
        if *state == LinkState::Closed {
            return false;
        }
        *state = to;
        true
    }

    fn subscribe(&self) -> Result<(), BrokerError> {
        if !self.client.is_connected() {
            tracing::warn!(filter = %self.topic_filter, "Not connected, skipping subscribe");
            return Err(BrokerError::NotConnected);
        }

        self.counters.subscribe_attempts.fetch_add(1, Ordering::Relaxed);
        match self.client.subscribe(&self.topic_filter, QoS::AtLeastOnce) {
            Ok(()) => {
                self.set_unless_closed(LinkState::Subscribed);
                tracing::info!(filter = %self.topic_filter, "Subscribed");
                Ok(())
            }
            Err(e) => {
                self.counters.subscribe_failures.fetch_add(1, Ordering::Relaxed);
                tracing::error!(filter = %self.topic_filter, error = %e, "Subscribe failed");
                Err(e)
            }
        }
    }

    fn on_connect_complete(&self, reconnect: bool, server_uri: &str) {
        if !self.set_unless_closed(LinkState::Connected) {
            tracing::debug!("Ignoring connect event on closed link");
            return;
        }
        if reconnect {
            self.counters.reconnects.fetch_add(1, Ordering::Relaxed);
            tracing::info!(uri = server_uri, "Reconnected to broker");
        } else {
            tracing::info!(uri = server_uri, "Connected to broker");
        }
        let _ = self.subscribe();
    }

    fn on_connection_lost(&self, cause: &str) {
        if !self.set_unless_closed(LinkState::ConnectionLost) {
            return;
        }
        self.counters.connection_losses.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(
            cause,
            auto_reconnect = self.options.automatic_reconnect,
            "Broker connection lost"
        );
    }

    fn on_subscribe_rejected(&self, filter: &str, reason: &str) {
        self.counters.subscribe_failures.fetch_add(1, Ordering::Relaxed);
        tracing::error!(filter, reason, "Broker rejected subscription");
        self.transition(LinkState::Subscribed, LinkState::Connected);
    }

    fn on_message_arrived(&self, topic: &str, payload: &[u8]) {
        let handler = self.handler.read().clone();
        let Some(handler) = handler else {
            tracing::warn!(topic, "No handler registered, dropping message");
            return;
        };

        self.counters.messages_received.fetch_add(1, Ordering::Relaxed);
        let outcome = catch_unwind(AssertUnwindSafe(|| handler.on_message(topic, payload)));
        if let Err(panic) = outcome {
            self.counters.handler_panics.fetch_add(1, Ordering::Relaxed);
            tracing::error!(
                topic,
                panic = %panic_message(panic.as_ref()),
                "Message handler panicked"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MockBrokerClient;
    use std::sync::atomic::AtomicUsize;

    fn config() -> BrokerConfig {
        BrokerConfig {
            url: "tcp://mock:1883".into(),
            client_id: "test".into(),
            ..Default::default()
        }
    }

    fn subscriber() -> (BrokerSubscriber<MockBrokerClient>, Arc<MockBrokerClient>) {
        let client = Arc::new(MockBrokerClient::new());
        let sub = BrokerSubscriber::new(&config(), Arc::clone(&client));
        (sub, client)
    }

    fn counting_handler() -> (Arc<dyn MessageHandler>, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let handler = move |_: &str, _: &[u8]| {
            c.fetch_add(1, Ordering::SeqCst);
        };
        (Arc::new(handler), count)
    }

    #[test]
    fn test_connect_requires_handler() {
        let (sub, client) = subscriber();

        let err = sub.connect().unwrap_err();
        assert!(matches!(err, BrokerError::Precondition(_)));
        assert_eq!(client.connect_calls(), 0);
        assert_eq!(sub.state(), LinkState::Disconnected);
    }

    #[test]
    fn test_connect_subscribes_once() {
        let (sub, client) = subscriber();
        sub.set_handler(counting_handler().0);

        sub.connect().unwrap();

        assert_eq!(sub.state(), LinkState::Subscribed);
        assert_eq!(
            client.subscriptions(),
            vec![("sensors/#".to_string(), QoS::AtLeastOnce)]
        );
    }

    #[test]
    fn test_connect_failure_leaves_disconnected() {
        let (sub, client) = subscriber();
        sub.set_handler(counting_handler().0);
        client.set_fail_connect(true);

        let err = sub.connect().unwrap_err();
        assert!(matches!(err, BrokerError::Connect { .. }));
        assert_eq!(sub.state(), LinkState::Disconnected);

        // A later attempt may succeed
        client.set_fail_connect(false);
        sub.connect().unwrap();
        assert_eq!(sub.state(), LinkState::Subscribed);
    }

    #[test]
    fn test_subscribe_failure_stays_connected() {
        let (sub, client) = subscriber();
        sub.set_handler(counting_handler().0);
        client.set_fail_subscribe(true);

        sub.connect().unwrap();
        assert_eq!(sub.state(), LinkState::Connected);
        assert_eq!(sub.stats().subscribe_failures, 1);
    }

    #[test]
    fn test_broker_rejection_reverts_to_connected() {
        let (sub, client) = subscriber();
        sub.set_handler(counting_handler().0);
        sub.connect().unwrap();
        assert_eq!(sub.state(), LinkState::Subscribed);

        client.reject_subscription("sensors/#", "not authorized");

        assert_eq!(sub.state(), LinkState::Connected);
        let stats = sub.stats();
        assert_eq!(stats.subscribe_attempts, 1);
        assert_eq!(stats.subscribe_failures, 1);

        // The next reconnect tries again
        client.drop_connection("reset");
        client.reconnect();
        assert_eq!(sub.state(), LinkState::Subscribed);
    }

    #[test]
    fn test_rejection_after_close_keeps_closed() {
        let (sub, client) = subscriber();
        sub.set_handler(counting_handler().0);
        sub.connect().unwrap();
        sub.close().unwrap();

        sub.shared.on_subscribe_rejected("sensors/#", "late");
        assert_eq!(sub.state(), LinkState::Closed);
        assert_eq!(client.close_calls(), 1);
    }

    #[test]
    fn test_subscribe_when_not_connected() {
        let (sub, client) = subscriber();

        assert!(matches!(sub.subscribe(), Err(BrokerError::NotConnected)));
        assert_eq!(client.subscribe_calls(), 0);
    }

    #[test]
    fn test_resubscribe_after_reconnect() {
        let (sub, client) = subscriber();
        sub.set_handler(counting_handler().0);
        sub.connect().unwrap();

        client.drop_connection("network unreachable");
        assert_eq!(sub.state(), LinkState::ConnectionLost);

        client.reconnect();
        assert_eq!(sub.state(), LinkState::Subscribed);
        assert_eq!(client.subscriptions().len(), 2);

        let stats = sub.stats();
        assert_eq!(stats.reconnects, 1);
        assert_eq!(stats.connection_losses, 1);
    }

    #[test]
    fn test_failed_subscribe_retried_on_reconnect() {
        let (sub, client) = subscriber();
        sub.set_handler(counting_handler().0);
        client.set_fail_subscribe(true);
        sub.connect().unwrap();

        client.set_fail_subscribe(false);
        client.drop_connection("reset");
        client.reconnect();

        assert_eq!(sub.state(), LinkState::Subscribed);
        assert_eq!(client.subscriptions().len(), 1);
    }

    #[test]
    fn test_messages_reach_handler() {
        let (sub, client) = subscriber();
        let (handler, count) = counting_handler();
        sub.set_handler(handler);
        sub.connect().unwrap();

        assert!(client.deliver("sensors/a", b"1"));
        assert!(client.deliver("sensors/b", b"2"));

        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert_eq!(sub.stats().messages_received, 2);
    }

    #[test]
    fn test_handler_panic_contained() {
        let (sub, client) = subscriber();
        let calls = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&calls);
        sub.set_handler(Arc::new(move |_: &str, payload: &[u8]| {
            c.fetch_add(1, Ordering::SeqCst);
            if payload == b"boom" {
                panic!("handler exploded");
            }
        }));
        sub.connect().unwrap();

        assert!(client.deliver("sensors/x", b"boom"));
        assert!(client.deliver("sensors/x", b"fine"));

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(sub.stats().handler_panics, 1);
    }

    #[test]
    fn test_close_idempotent() {
        let (sub, client) = subscriber();
        sub.set_handler(counting_handler().0);
        sub.connect().unwrap();

        sub.close().unwrap();
        sub.close().unwrap();

        assert_eq!(sub.state(), LinkState::Closed);
        assert_eq!(client.disconnect_calls(), 1);
        assert_eq!(client.close_calls(), 1);
    }

    #[test]
    fn test_close_when_disconnected_only_releases() {
        let (sub, client) = subscriber();

        sub.close().unwrap();

        assert_eq!(client.disconnect_calls(), 0);
        assert_eq!(client.close_calls(), 1);
    }

    #[test]
    fn test_late_events_ignored_after_close() {
        let (sub, _client) = subscriber();
        sub.set_handler(counting_handler().0);
        sub.close().unwrap();

        sub.shared.on_connect_complete(true, "tcp://mock:1883");
        sub.shared.on_connection_lost("late");
        assert_eq!(sub.state(), LinkState::Closed);
        assert!(matches!(sub.connect(), Err(BrokerError::Closed)));
    }
}
