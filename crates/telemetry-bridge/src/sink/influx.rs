// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! InfluxDB v2 HTTP client.
//!
//! Points are rendered to line protocol on the caller's thread and handed
//! to a bounded queue. A dedicated `influx-writer` thread batches them and
//! posts to `/api/v2/write` with millisecond precision.

use crate::config::TimeSeriesConfig;
use crate::error::ClientError;
use crate::sink::buffer::BatchBuffer;
use crate::sink::line_protocol::{Point, WritePrecision};
use crate::sink::timeseries::{TimeSeriesClient, TimeSeriesConnector};
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TrySendError};
use parking_lot::Mutex;
use reqwest::blocking::Client;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::Url;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

const HTTP_TIMEOUT: Duration = Duration::from_secs(10);
const PRECISION: WritePrecision = WritePrecision::Ms;

/// Builds [`InfluxHttpClient`]s from configuration.
pub struct InfluxConnector {
    config: TimeSeriesConfig,
}

impl InfluxConnector {
    pub fn new(config: TimeSeriesConfig) -> Self {
        Self { config }
    }
}

impl TimeSeriesConnector for InfluxConnector {
    fn connect(&self) -> Result<Box<dyn TimeSeriesClient>, ClientError> {
        Ok(Box::new(InfluxHttpClient::new(&self.config)?))
    }
}

enum Command {
    Line(String),
    Shutdown(Sender<()>),
}

/// Endpoint details shared by the caller side and the writer thread.
#[derive(Clone)]
struct Endpoint {
    http: Client,
    ping_url: Url,
    write_url: Url,
    auth: String,
}

impl Endpoint {
    fn from_config(config: &TimeSeriesConfig) -> Result<Self, ClientError> {
        let base = config.url.trim_end_matches('/');
        let ping_url = Url::parse(&format!("{}/ping", base))
            .map_err(|e| ClientError::Connect(format!("invalid url '{}': {}", config.url, e)))?;
        let write_url = write_url(base, &config.org, &config.bucket)?;

        let http = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| ClientError::Connect(e.to_string()))?;

        Ok(Self {
            http,
            ping_url,
            write_url,
            auth: format!("Token {}", config.token),
        })
    }

    fn post(&self, batch: &[String]) {
        if batch.is_empty() {
            return;
        }

        let result = self
            .http
            .post(self.write_url.clone())
            .header(AUTHORIZATION, &self.auth)
            .header(CONTENT_TYPE, "text/plain; charset=utf-8")
            .body(batch.join("\n"))
            .send();

        match result {
            Ok(resp) if resp.status().is_success() => {
                tracing::debug!(points = batch.len(), "Batch written");
            }
            Ok(resp) => {
                let status = resp.status();
                let body = resp.text().unwrap_or_default();
                tracing::error!(
                    points = batch.len(),
                    status = %status,
                    body = %body,
                    "Time-series write rejected"
                );
            }
            Err(e) => {
                tracing::error!(points = batch.len(), error = %e, "Time-series write failed");
            }
        }
    }
}

fn write_url(base: &str, org: &str, bucket: &str) -> Result<Url, ClientError> {
    Url::parse_with_params(
        &format!("{}/api/v2/write", base),
        &[("org", org), ("bucket", bucket), ("precision", PRECISION.as_str())],
    )
    .map_err(|e| ClientError::Connect(format!("invalid url '{}': {}", base, e)))
}

/// HTTP client with a background writer thread.
pub struct InfluxHttpClient {
    endpoint: Endpoint,
    tx: Sender<Command>,
    buffer_limit: usize,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl InfluxHttpClient {
    pub fn new(config: &TimeSeriesConfig) -> Result<Self, ClientError> {
        let endpoint = Endpoint::from_config(config)?;
        let buffer_limit = config.buffer_limit.max(1);
        let (tx, rx) = channel::bounded(buffer_limit);

        let buffer = BatchBuffer::new(config.batch_size, config.flush_interval());
        let writer = endpoint.clone();
        let worker = std::thread::Builder::new()
            .name("influx-writer".into())
            .spawn(move || run_writer(writer, rx, buffer))
            .map_err(|e| ClientError::Other(format!("spawn writer thread: {}", e)))?;

        Ok(Self {
            endpoint,
            tx,
            buffer_limit,
            worker: Mutex::new(Some(worker)),
        })
    }
}

impl TimeSeriesClient for InfluxHttpClient {
    fn ping(&self) -> Result<(), ClientError> {
        let resp = self
            .endpoint
            .http
            .get(self.endpoint.ping_url.clone())
            .header(AUTHORIZATION, &self.endpoint.auth)
            .send()
            .map_err(|e| ClientError::Ping(e.to_string()))?;

        if resp.status().is_success() {
            Ok(())
        } else {
            Err(ClientError::Ping(format!("status {}", resp.status())))
        }
    }

    fn write_point(&self, point: Point) -> Result<(), ClientError> {
        let line = point
            .to_line_protocol_at(PRECISION)
            .map_err(|e| ClientError::InvalidPoint(e.to_string()))?;

        match self.tx.try_send(Command::Line(line)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(ClientError::BufferFull(self.buffer_limit)),
            Err(TrySendError::Disconnected(_)) => Err(ClientError::Closed),
        }
    }

    fn close(&self, timeout: Duration) -> Result<(), ClientError> {
        let Some(worker) = self.worker.lock().take() else {
            return Ok(());
        };

        let deadline = Instant::now() + timeout;
        let (ack_tx, ack_rx) = channel::bounded(1);
        if self
            .tx
            .send_timeout(Command::Shutdown(ack_tx), timeout)
            .is_err()
        {
            tracing::warn!("Writer queue stuck, discarding buffered points");
            return Ok(());
        }

        if timeout.is_zero() {
            // Detach; the writer exits on its own once it sees the command.
            return Ok(());
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        match ack_rx.recv_timeout(remaining) {
            Ok(()) => {
                if worker.join().is_err() {
                    tracing::error!("Writer thread panicked");
                }
            }
            Err(_) => {
                tracing::warn!(?timeout, "Flush did not finish in time, discarding buffered points");
            }
        }
        Ok(())
    }
}

fn run_writer(endpoint: Endpoint, rx: Receiver<Command>, mut buffer: BatchBuffer) {
    tracing::debug!("Writer thread started");

    loop {
        let cmd = match buffer.time_until_flush() {
            Some(wait) => rx.recv_timeout(wait),
            None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };

        match cmd {
            Ok(Command::Line(line)) => {
                if let Some(batch) = buffer.add(line) {
                    endpoint.post(&batch);
                }
            }
            Ok(Command::Shutdown(ack)) => {
                endpoint.post(&buffer.flush());
                let _ = ack.send(());
                break;
            }
            Err(RecvTimeoutError::Timeout) => {
                if buffer.should_flush() {
                    endpoint.post(&buffer.flush());
                }
            }
            Err(RecvTimeoutError::Disconnected) => {
                endpoint.post(&buffer.flush());
                break;
            }
        }
    }

    tracing::debug!("Writer thread stopped");
}
