// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Time-series point model and line protocol rendering.
//!
//! ```text
//! measurement,tag1=val1,tag2=val2 field1=val1,field2=val2 timestamp
//! ```
//!
//! Tags are rendered sorted by key. Empty tag values are dropped since the
//! store rejects them.

use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Line protocol rendering errors.
#[derive(Debug, Error, PartialEq)]
pub enum LineProtocolError {
    #[error("measurement name is empty")]
    EmptyMeasurement,

    #[error("point has no fields")]
    NoFields,

    #[error("field '{0}' is not a finite number")]
    NonFiniteField(String),

    #[error("timestamp does not fit the requested precision")]
    TimestampOverflow,
}

/// Timestamp unit of a point or a write request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WritePrecision {
    Ns,
    Us,
    #[default]
    Ms,
    S,
}

impl WritePrecision {
    /// Query parameter value for the write endpoint.
    pub fn as_str(&self) -> &'static str {
        match self {
            WritePrecision::Ns => "ns",
            WritePrecision::Us => "us",
            WritePrecision::Ms => "ms",
            WritePrecision::S => "s",
        }
    }

    fn nanos_per_unit(&self) -> i128 {
        match self {
            WritePrecision::Ns => 1,
            WritePrecision::Us => 1_000,
            WritePrecision::Ms => 1_000_000,
            WritePrecision::S => 1_000_000_000,
        }
    }

    /// Convert `t` expressed in `self` into `target`, truncating.
    pub fn convert(&self, t: i64, target: WritePrecision) -> Result<i64, LineProtocolError> {
        let nanos = i128::from(t) * self.nanos_per_unit();
        i64::try_from(nanos / target.nanos_per_unit())
            .map_err(|_| LineProtocolError::TimestampOverflow)
    }
}

impl fmt::Display for WritePrecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A value stored in a field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Float(f64),
    Integer(i64),
    String(String),
    Boolean(bool),
}

impl FieldValue {
    /// Render for line protocol: floats as-is, integers with an `i` suffix,
    /// strings quoted.
    pub fn to_line_protocol(&self) -> String {
        match self {
            FieldValue::Float(v) => format!("{}", v),
            FieldValue::Integer(v) => format!("{}i", v),
            FieldValue::String(v) => {
                let escaped = v.replace('\\', "\\\\").replace('"', "\\\"");
                format!("\"{}\"", escaped)
            }
            FieldValue::Boolean(v) => v.to_string(),
        }
    }

    fn is_finite(&self) -> bool {
        match self {
            FieldValue::Float(v) => v.is_finite(),
            _ => true,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_line_protocol())
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Float(v)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Integer(v)
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Boolean(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::String(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::String(v)
    }
}

/// One time-series point.
///
/// Fields keep insertion order; tags are keyed and rendered sorted.
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    measurement: String,
    tags: BTreeMap<String, String>,
    fields: Vec<(String, FieldValue)>,
    time: Option<(i64, WritePrecision)>,
}

impl Point {
    /// Start a point for `measurement`.
    pub fn measurement(name: impl Into<String>) -> Self {
        Self {
            measurement: name.into(),
            tags: BTreeMap::new(),
            fields: Vec::new(),
            time: None,
        }
    }

    /// Add or replace a tag.
    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Add or replace a field.
    pub fn field(mut self, key: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        let key = key.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((key, value)),
        }
        self
    }

    /// Set the point time.
    pub fn time(mut self, t: i64, precision: WritePrecision) -> Self {
        self.time = Some((t, precision));
        self
    }

    pub fn measurement_name(&self) -> &str {
        &self.measurement
    }

    pub fn tag_value(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }

    pub fn field_value(&self, key: &str) -> Option<&FieldValue> {
        self.fields.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn timestamp(&self) -> Option<(i64, WritePrecision)> {
        self.time
    }

    /// Render with the point's own precision.
    pub fn to_line_protocol(&self) -> Result<String, LineProtocolError> {
        let precision = self.time.map(|(_, p)| p).unwrap_or_default();
        self.to_line_protocol_at(precision)
    }

    /// Render with the timestamp converted to `precision`.
    pub fn to_line_protocol_at(
        &self,
        precision: WritePrecision,
    ) -> Result<String, LineProtocolError> {
        if self.measurement.is_empty() {
            return Err(LineProtocolError::EmptyMeasurement);
        }
        if self.fields.is_empty() {
            return Err(LineProtocolError::NoFields);
        }
        if let Some((key, _)) = self.fields.iter().find(|(_, v)| !v.is_finite()) {
            return Err(LineProtocolError::NonFiniteField(key.clone()));
        }

        let mut line = escape_measurement(&self.measurement);

        for (key, value) in self.tags.iter().filter(|(_, v)| !v.is_empty()) {
            line.push(',');
            line.push_str(&escape_key(key));
            line.push('=');
            line.push_str(&escape_key(value));
        }

        line.push(' ');
        let fields: Vec<String> = self
            .fields
            .iter()
            .map(|(k, v)| format!("{}={}", escape_key(k), v.to_line_protocol()))
            .collect();
        line.push_str(&fields.join(","));

        if let Some((t, own)) = self.time {
            line.push(' ');
            line.push_str(&own.convert(t, precision)?.to_string());
        }

        Ok(line)
    }
}

/// Measurement names escape commas and spaces.
fn escape_measurement(s: &str) -> String {
    s.replace(',', "\\,").replace(' ', "\\ ")
}

/// Tag keys, tag values and field keys share one escaping rule.
fn escape_key(s: &str) -> String {
    s.replace(',', "\\,")
        .replace('=', "\\=")
        .replace(' ', "\\ ")
}
