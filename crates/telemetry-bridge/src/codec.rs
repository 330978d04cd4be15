// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Reading codec.
//!
//! Turns raw broker payloads into validated [`Reading`]s. The payload is a
//! JSON object with camelCase keys:
//!
//! ```text
//! {"sensorType":"temperature","location":"growlab","sensorId":"sensor_1",
//!  "value":24.5,"timestamp":1700000000000}
//! ```
//!
//! Missing `value`/`timestamp` default to zero. Unknown keys are ignored.
//! `timestamp` may be written as an integral float (`1.7e12`).

use crate::reading::Reading;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer};
use thiserror::Error;

/// Why a payload was rejected.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Not valid JSON, or a field has the wrong type.
    #[error("malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),

    /// Parsed, but a required field is missing or empty.
    #[error("incomplete reading: missing {0}")]
    Incomplete(&'static str),
}

impl DecodeError {
    /// Short label for logs and counters.
    pub fn kind(&self) -> &'static str {
        match self {
            DecodeError::Malformed(_) => "malformed",
            DecodeError::Incomplete(_) => "incomplete",
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireReading {
    #[serde(default)]
    sensor_type: Option<String>,
    #[serde(default)]
    sensor_id: Option<String>,
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    value: Option<f64>,
    #[serde(default, deserialize_with = "integral_millis")]
    timestamp: Option<i64>,
}

fn integral_millis<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let Some(number) = Option::<serde_json::Number>::deserialize(deserializer)? else {
        return Ok(None);
    };
    if let Some(millis) = number.as_i64() {
        return Ok(Some(millis));
    }
    match number.as_f64() {
        Some(f) if f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 => {
            Ok(Some(f as i64))
        }
        _ => Err(D::Error::custom(format!(
            "timestamp {} is not a whole number of milliseconds",
            number
        ))),
    }
}

/// Decode and validate one payload.
pub fn decode(payload: &[u8]) -> Result<Reading, DecodeError> {
    // A bare `null` parses fine but carries no reading.
    let wire: Option<WireReading> = serde_json::from_slice(payload)?;
    let wire = wire.ok_or(DecodeError::Incomplete("reading"))?;

    let sensor_id = non_empty(wire.sensor_id).ok_or(DecodeError::Incomplete("sensorId"))?;
    let sensor_type = non_empty(wire.sensor_type).ok_or(DecodeError::Incomplete("sensorType"))?;

    Ok(Reading {
        sensor_type,
        sensor_id,
        location: non_empty(wire.location),
        value: wire.value.unwrap_or(0.0),
        timestamp: wire.timestamp.unwrap_or(0),
    })
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.filter(|s| !s.is_empty())
}
