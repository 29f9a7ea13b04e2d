// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Bounded recent-history windows.
//!
//! Each metric kind keeps a fixed-capacity FIFO of its latest readings.
//! Consumers only ever see owned copies (`HistoryWindow`, `BroadcastPayload`),
//! so a slow reader never holds the lock past the copy and never observes a
//! half-applied append.

use crate::reading::{MetricKind, Reading};
use crate::registry::Frame;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

/// Default number of readings kept per kind.
pub const DEFAULT_CAPACITY: usize = 10;

/// Wire form of one reading inside a window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HistoryPoint {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

impl From<&Reading> for HistoryPoint {
    fn from(reading: &Reading) -> Self {
        Self {
            timestamp: reading.timestamp(),
            value: reading.value(),
        }
    }
}

/// Owned copy of one kind's window, oldest first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HistoryWindow(Vec<HistoryPoint>);

impl HistoryWindow {
    pub fn points(&self) -> &[HistoryPoint] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn first(&self) -> Option<&HistoryPoint> {
        self.0.first()
    }

    pub fn last(&self) -> Option<&HistoryPoint> {
        self.0.last()
    }
}

/// Fixed-capacity FIFO of readings for a single metric kind.
///
/// Not synchronized on its own; [`SharedHistory`] provides the exclusion.
#[derive(Debug, Clone)]
pub struct HistoryBuffer {
    points: VecDeque<HistoryPoint>,
    capacity: usize,
}

impl HistoryBuffer {
    /// Create an empty buffer. A zero capacity is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            points: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a reading, evicting the oldest one when full.
    pub fn append(&mut self, reading: &Reading) {
        if self.points.len() == self.capacity {
            self.points.pop_front();
        }
        self.points.push_back(HistoryPoint::from(reading));
    }

    /// Copy the current contents, oldest first.
    pub fn snapshot(&self) -> HistoryWindow {
        HistoryWindow(self.points.iter().copied().collect())
    }

    /// Most recent point, if any.
    pub fn latest(&self) -> Option<HistoryPoint> {
        self.points.back().copied()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Snapshot of every kind's window at one point in time.
///
/// Serializes as `{ "<kind>": [ {timestamp, value}, ... ], ... }`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BroadcastPayload {
    windows: BTreeMap<MetricKind, HistoryWindow>,
}

impl BroadcastPayload {
    /// Window for `kind`; empty if the kind has no readings.
    pub fn window(&self, kind: MetricKind) -> Option<&HistoryWindow> {
        self.windows.get(&kind)
    }

    /// Encode to the JSON text pushed to subscribers.
    pub fn to_frame(&self) -> Result<Frame, serde_json::Error> {
        serde_json::to_string(self).map(Frame::from)
    }

    /// Parse a frame received by a subscriber.
    pub fn from_frame(frame: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(frame)
    }
}

/// History windows for all metric kinds behind one lock.
///
/// Appends and snapshots are atomic with respect to each other, including
/// multi-kind appends from a single producer tick.
#[derive(Debug)]
pub struct SharedHistory {
    buffers: RwLock<BTreeMap<MetricKind, HistoryBuffer>>,
    capacity: usize,
}

impl SharedHistory {
    /// Create empty windows of `capacity` for every known kind.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let buffers = MetricKind::ALL
            .into_iter()
            .map(|kind| (kind, HistoryBuffer::new(capacity)))
            .collect();
        Self {
            buffers: RwLock::new(buffers),
            capacity,
        }
    }

    /// Append one reading to its kind's window.
    pub fn append(&self, reading: &Reading) {
        let mut buffers = self.buffers.write();
        buffers
            .entry(reading.kind())
            .or_insert_with(|| HistoryBuffer::new(self.capacity))
            .append(reading);
    }

    /// Append a batch of readings under a single lock acquisition.
    pub fn append_all(&self, readings: &[Reading]) {
        if readings.is_empty() {
            return;
        }
        let mut buffers = self.buffers.write();
        for reading in readings {
            buffers
                .entry(reading.kind())
                .or_insert_with(|| HistoryBuffer::new(self.capacity))
                .append(reading);
        }
    }

    /// Copy every window.
    pub fn snapshot(&self) -> BroadcastPayload {
        let buffers = self.buffers.read();
        BroadcastPayload {
            windows: buffers
                .iter()
                .map(|(kind, buf)| (*kind, buf.snapshot()))
                .collect(),
        }
    }

    /// Copy a single kind's window.
    pub fn window(&self, kind: MetricKind) -> HistoryWindow {
        self.buffers
            .read()
            .get(&kind)
            .map(HistoryBuffer::snapshot)
            .unwrap_or_default()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for SharedHistory {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn reading_at(kind: MetricKind, secs: i64, value: f64) -> Reading {
        Reading::new(kind, value, Utc.timestamp_opt(secs, 0).unwrap())
    }

    #[test]
    fn test_buffer_keeps_last_n_in_order() {
        for capacity in [1usize, 2, 5, 10] {
            let mut buf = HistoryBuffer::new(capacity);
            let total = capacity * 3 + 1;
            for i in 0..total {
                buf.append(&reading_at(MetricKind::Temperature, i as i64, i as f64));
            }

            let window = buf.snapshot();
            assert_eq!(window.len(), capacity);
            let values: Vec<f64> = window.points().iter().map(|p| p.value).collect();
            let expected: Vec<f64> = ((total - capacity)..total).map(|i| i as f64).collect();
            assert_eq!(values, expected);
        }
    }

    #[test]
    fn test_buffer_partial_fill() {
        let mut buf = HistoryBuffer::new(10);
        assert!(buf.is_empty());
        assert!(buf.latest().is_none());

        buf.append(&reading_at(MetricKind::Humidity, 1, 40.0));
        buf.append(&reading_at(MetricKind::Humidity, 2, 41.0));

        assert_eq!(buf.len(), 2);
        assert_eq!(buf.capacity(), 10);
        assert_eq!(buf.latest().unwrap().value, 41.0);
    }

    #[test]
    fn test_zero_capacity_is_raised() {
        let mut buf = HistoryBuffer::new(0);
        assert_eq!(buf.capacity(), 1);
        buf.append(&reading_at(MetricKind::Humidity, 1, 1.0));
        buf.append(&reading_at(MetricKind::Humidity, 2, 2.0));
        assert_eq!(buf.snapshot().points()[0].value, 2.0);
    }

    #[test]
    fn test_snapshot_is_detached_from_live_buffer() {
        let history = SharedHistory::new(3);
        history.append(&reading_at(MetricKind::Temperature, 1, 20.0));

        let before = history.snapshot();
        history.append(&reading_at(MetricKind::Temperature, 2, 21.0));

        assert_eq!(before.window(MetricKind::Temperature).unwrap().len(), 1);
        assert_eq!(history.window(MetricKind::Temperature).len(), 2);
    }

    #[test]
    fn test_payload_contains_every_kind() {
        let history = SharedHistory::new(4);
        history.append(&reading_at(MetricKind::Temperature, 1, 20.0));

        let payload = history.snapshot();
        let json: serde_json::Value = serde_json::from_str(&payload.to_frame().unwrap()).unwrap();

        assert_eq!(json["temperature"].as_array().unwrap().len(), 1);
        assert_eq!(json["humidity"].as_array().unwrap().len(), 0);
        assert_eq!(json["temperature"][0]["value"], 20.0);
        assert_eq!(json["temperature"][0]["timestamp"], "1970-01-01T00:00:01Z");
    }

    #[test]
    fn test_append_all_is_applied_per_kind() {
        let history = SharedHistory::new(2);
        history.append_all(&[
            reading_at(MetricKind::Temperature, 1, 20.0),
            reading_at(MetricKind::Humidity, 1, 50.0),
            reading_at(MetricKind::Temperature, 2, 21.0),
            reading_at(MetricKind::Temperature, 3, 22.0),
        ]);

        let temps = history.window(MetricKind::Temperature);
        assert_eq!(temps.len(), 2);
        assert_eq!(temps.first().unwrap().value, 21.0);
        assert_eq!(temps.last().unwrap().value, 22.0);
        assert_eq!(history.window(MetricKind::Humidity).len(), 1);
    }

    #[test]
    fn test_frame_preserves_value_bits_and_timestamp() {
        let ts = Utc.timestamp_opt(1_733_220_000, 123_456_789).unwrap();
        let values = [0.1 + 0.2, 23.456_789_012_345_67, f64::MIN_POSITIVE, 1e300, -7.25];

        let history = SharedHistory::new(values.len());
        for v in values {
            history.append(&Reading::new(MetricKind::Temperature, v, ts));
        }

        let frame = history.snapshot().to_frame().unwrap();
        let decoded = BroadcastPayload::from_frame(&frame).unwrap();
        let window = decoded.window(MetricKind::Temperature).unwrap();

        for (point, original) in window.points().iter().zip(values) {
            assert_eq!(point.value.to_bits(), original.to_bits());
            assert_eq!(point.timestamp, ts);
        }
    }
}
