// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error types shared by the broker link and the sinks.

use std::any::Any;
use std::time::Duration;
use thiserror::Error;

/// Failure reported by an underlying wire client (broker, producer, store).
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("ping failed: {0}")]
    Ping(String),

    #[error("write buffer full ({0} pending)")]
    BufferFull(usize),

    #[error("invalid point: {0}")]
    InvalidPoint(String),

    #[error("client closed")]
    Closed,

    #[error("{0}")]
    Other(String),
}

/// Sink-level errors.
#[derive(Debug, Error)]
pub enum SinkError {
    /// Required argument missing. Raised to the caller, never swallowed.
    #[error("precondition violated: {0}")]
    Precondition(&'static str),

    /// The sink client could not be (re)initialized.
    #[error("sink unavailable: {0}")]
    Unavailable(String),

    /// The client refused the record at submit time.
    #[error("publish failed: {0}")]
    Publish(#[from] ClientError),

    /// Flushing or releasing the client failed during close.
    #[error("close failed: {0}")]
    Close(#[source] ClientError),
}

/// Broker link errors.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("precondition violated: {0}")]
    Precondition(&'static str),

    #[error("connect to {uri} failed: {reason}")]
    Connect { uri: String, reason: String },

    #[error("connect to {uri} timed out after {timeout:?}")]
    Timeout { uri: String, timeout: Duration },

    #[error("broker client not connected")]
    NotConnected,

    #[error("subscribe to '{filter}' failed: {reason}")]
    Subscribe { filter: String, reason: String },

    #[error("disconnect failed: {0}")]
    Disconnect(String),

    #[error("broker link closed")]
    Closed,
}

/// Render a caught panic payload for logging.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
