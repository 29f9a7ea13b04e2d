// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Sensor readings and metric kinds.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of physical quantity a reading measures.
///
/// The declaration order is the wire order of a broadcast payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    /// Air temperature in degrees Celsius.
    Temperature,
    /// Relative humidity in percent.
    Humidity,
}

impl MetricKind {
    /// Every known kind, in wire order.
    pub const ALL: [MetricKind; 2] = [MetricKind::Temperature, MetricKind::Humidity];

    /// Lower-case name used on the wire and as the InfluxDB field key.
    pub fn as_str(self) -> &'static str {
        match self {
            MetricKind::Temperature => "temperature",
            MetricKind::Humidity => "humidity",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MetricKind::ALL
            .into_iter()
            .find(|k| k.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown metric kind '{}'", s))
    }
}

/// One timestamped sensor value. Immutable once created.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    kind: MetricKind,
    value: f64,
    timestamp: DateTime<Utc>,
}

impl Reading {
    /// Create a reading taken at `timestamp`.
    pub fn new(kind: MetricKind, value: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            kind,
            value,
            timestamp,
        }
    }

    pub fn kind(&self) -> MetricKind {
        self.kind
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Timestamp in nanoseconds since the Unix epoch.
    ///
    /// Saturates at zero before the epoch and at `u64::MAX` past 2262,
    /// where the nanosecond count no longer fits an `i64`.
    pub fn timestamp_ns(&self) -> u64 {
        match self.timestamp.timestamp_nanos_opt() {
            Some(ns) => ns.max(0) as u64,
            None if self.timestamp.timestamp() < 0 => 0,
            None => u64::MAX,
        }
    }
}
