// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Bridge assembly.
//!
//! Owns the subscriber, both sinks and the dispatcher. Shutdown order is
//! inbound first (no new messages), then the log sink, then the time-series
//! sink. A close error is logged and shutdown continues.

use crate::broker::{BrokerClient, BrokerSubscriber, LinkState, MessageHandler, SubscriberStats};
use crate::config::BridgeConfig;
use crate::dispatcher::{DispatchStatsSnapshot, IngestDispatcher};
use crate::error::BrokerError;
use crate::sink::log::{LogProducerFactory, LogSinkClient, LogSinkStats};
use crate::sink::timeseries::{TimeSeriesConnector, TimeSeriesSinkClient};
use std::sync::Arc;

/// Combined counters for periodic reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BridgeStats {
    pub dispatch: DispatchStatsSnapshot,
    pub subscriber: SubscriberStats,
    pub log_sink: LogSinkStats,
    pub timeseries_reinits: u64,
}

/// The assembled ingestion pipeline.
pub struct Bridge<B: BrokerClient + 'static, C: TimeSeriesConnector + 'static> {
    subscriber: BrokerSubscriber<B>,
    log_sink: Arc<LogSinkClient>,
    ts_sink: Arc<TimeSeriesSinkClient<C>>,
    dispatcher: Arc<IngestDispatcher>,
}

impl<B: BrokerClient + 'static, C: TimeSeriesConnector + 'static> Bridge<B, C> {
    /// Build both sinks and register the dispatcher. Does not connect.
    pub fn new(
        config: &BridgeConfig,
        broker: Arc<B>,
        producers: &dyn LogProducerFactory,
        connector: C,
    ) -> Self {
        let log_sink = Arc::new(LogSinkClient::new(&config.log_sink, producers));
        Self::assemble(config, broker, log_sink, connector)
    }

    /// Like [`new`](Self::new), with an already built log sink.
    pub fn assemble(
        config: &BridgeConfig,
        broker: Arc<B>,
        log_sink: Arc<LogSinkClient>,
        connector: C,
    ) -> Self {
        let ts_sink = Arc::new(TimeSeriesSinkClient::new(
            connector,
            config.timeseries.close_timeout(),
        ));
        let dispatcher = Arc::new(IngestDispatcher::new(log_sink.clone(), ts_sink.clone()));

        let subscriber = BrokerSubscriber::new(&config.broker, broker);
        subscriber.set_handler(dispatcher.clone() as Arc<dyn MessageHandler>);

        Self {
            subscriber,
            log_sink,
            ts_sink,
            dispatcher,
        }
    }

    /// Connect the inbound link.
    pub fn start(&self) -> Result<(), BrokerError> {
        self.subscriber.connect()
    }

    pub fn state(&self) -> LinkState {
        self.subscriber.state()
    }

    pub fn subscriber(&self) -> &BrokerSubscriber<B> {
        &self.subscriber
    }

    pub fn log_sink(&self) -> &Arc<LogSinkClient> {
        &self.log_sink
    }

    pub fn timeseries_sink(&self) -> &Arc<TimeSeriesSinkClient<C>> {
        &self.ts_sink
    }

    pub fn dispatcher(&self) -> &Arc<IngestDispatcher> {
        &self.dispatcher
    }

    pub fn stats(&self) -> BridgeStats {
        BridgeStats {
            dispatch: self.dispatcher.stats(),
            subscriber: self.subscriber.stats(),
            log_sink: self.log_sink.stats(),
            timeseries_reinits: self.ts_sink.reinit_count(),
        }
    }

    /// Close everything. Safe to call more than once.
    pub fn shutdown(&self) {
        tracing::info!("Shutting down bridge");

        if let Err(e) = self.subscriber.close() {
            tracing::error!(error = %e, "Error closing broker link");
        }
        if let Err(e) = self.log_sink.close() {
            tracing::error!(error = %e, "Error closing log sink");
        }
        if let Err(e) = self.ts_sink.close() {
            tracing::error!(error = %e, "Error closing time-series sink");
        }

        tracing::info!("Bridge stopped");
    }
}
