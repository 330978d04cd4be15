// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Telemetry reading model.

use serde::Serialize;

/// Tag value written when an optional tag is absent.
pub const UNKNOWN: &str = "unknown";

/// One decoded telemetry sample.
///
/// Built by the codec for each inbound message and handed by reference to
/// both sinks. Never mutated after construction.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Reading {
    /// Measurement kind (e.g. "temperature").
    pub sensor_type: String,
    /// Sensor identifier, also used as the log partition key.
    pub sensor_id: String,
    /// Optional installation site.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    /// Measured value.
    pub value: f64,
    /// Sample time in milliseconds since the Unix epoch.
    pub timestamp: i64,
}

impl Reading {
    /// Create a reading without location.
    pub fn new(
        sensor_type: impl Into<String>,
        sensor_id: impl Into<String>,
        value: f64,
        timestamp: i64,
    ) -> Self {
        Self {
            sensor_type: sensor_type.into(),
            sensor_id: sensor_id.into(),
            location: None,
            value,
            timestamp,
        }
    }

    /// Set the location.
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// Location, or [`UNKNOWN`] when absent.
    pub fn location_or_unknown(&self) -> &str {
        self.location.as_deref().unwrap_or(UNKNOWN)
    }

    /// True when both identifying fields are non-empty.
    pub fn is_complete(&self) -> bool {
        !self.sensor_id.is_empty() && !self.sensor_type.is_empty()
    }
}
