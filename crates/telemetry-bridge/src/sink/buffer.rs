// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Write batching for the time-series writer thread.
//!
//! Lines are flushed when the batch reaches `max_size` or when the oldest
//! pending line has waited `flush_interval`.

use std::time::{Duration, Instant};

/// Pending line protocol batch.
pub struct BatchBuffer {
    lines: Vec<String>,
    max_size: usize,
    flush_interval: Duration,
    oldest: Option<Instant>,
}

impl BatchBuffer {
    /// `max_size` is clamped to at least one line.
    pub fn new(max_size: usize, flush_interval: Duration) -> Self {
        let max_size = max_size.max(1);
        Self {
            lines: Vec::with_capacity(max_size),
            max_size,
            flush_interval,
            oldest: None,
        }
    }

    /// Queue a line. Returns the full batch once `max_size` is reached.
    pub fn add(&mut self, line: String) -> Option<Vec<String>> {
        if self.lines.is_empty() {
            self.oldest = Some(Instant::now());
        }
        self.lines.push(line);
        if self.lines.len() >= self.max_size {
            Some(self.flush())
        } else {
            None
        }
    }

    /// True when a non-empty batch has waited long enough.
    pub fn should_flush(&self) -> bool {
        self.oldest
            .is_some_and(|t| t.elapsed() >= self.flush_interval)
    }

    /// Time left before the pending batch is due, `None` when empty.
    ///
    /// The writer thread uses this as its receive timeout.
    pub fn time_until_flush(&self) -> Option<Duration> {
        self.oldest
            .map(|t| self.flush_interval.saturating_sub(t.elapsed()))
    }

    /// Take every pending line.
    pub fn flush(&mut self) -> Vec<String> {
        self.oldest = None;
        std::mem::replace(&mut self.lines, Vec::with_capacity(self.max_size))
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_based_flush() {
        let mut buf = BatchBuffer::new(2, Duration::from_secs(60));

        assert!(buf.add("a".to_string()).is_none());
        let batch = buf.add("b".to_string()).expect("full batch");

        assert_eq!(batch, vec!["a".to_string(), "b".to_string()]);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_time_based_flush() {
        let mut buf = BatchBuffer::new(100, Duration::ZERO);
        buf.add("a".to_string());

        assert!(buf.should_flush());
        assert_eq!(buf.time_until_flush(), Some(Duration::ZERO));
        assert_eq!(buf.flush().len(), 1);
    }

    #[test]
    fn test_empty_buffer_never_due() {
        let buf = BatchBuffer::new(10, Duration::ZERO);
        assert!(!buf.should_flush());
        assert!(buf.time_until_flush().is_none());
    }

    #[test]
    fn test_deadline_counts_from_first_line() {
        let mut buf = BatchBuffer::new(10, Duration::from_secs(60));
        buf.add("a".to_string());

        let left = buf.time_until_flush().expect("pending");
        assert!(left <= Duration::from_secs(60));
        assert!(left > Duration::from_secs(50));
        assert!(!buf.should_flush());
    }

    #[test]
    fn test_zero_max_size_clamped() {
        let mut buf = BatchBuffer::new(0, Duration::from_secs(60));
        assert!(buf.add("a".to_string()).is_some());
        assert_eq!(buf.len(), 0);
    }
}
