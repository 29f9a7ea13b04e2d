// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Where readings come from.
//!
//! The producer asks its [`ReadingSource`] for readings once per tick.
//! [`SimulatedSource`] stands in for a sensor; [`IngestSource`] replays
//! measurements posted by an external device through [`IngestHandle`].

use crate::error::InputValidationError;
use crate::reading::{MetricKind, Reading};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc::{self, error::TrySendError};

/// Supplies the readings for one producer tick.
pub trait ReadingSource: Send {
    /// Readings for the tick at `at`. May be empty.
    fn sample(&mut self, at: DateTime<Utc>) -> Vec<Reading>;

    /// Short name for logs.
    fn name(&self) -> &'static str;
}

// ============================================================================
// Simulated sensor
// ============================================================================

/// Bounded random walk for one kind.
#[derive(Debug, Clone, Copy)]
struct Walk {
    kind: MetricKind,
    min: f64,
    max: f64,
    step: f64,
    current: f64,
}

impl Walk {
    fn for_kind(kind: MetricKind) -> Self {
        match kind {
            MetricKind::Temperature => Self {
                kind,
                min: 15.0,
                max: 35.0,
                step: 0.5,
                current: 25.0,
            },
            MetricKind::Humidity => Self {
                kind,
                min: 30.0,
                max: 80.0,
                step: 1.5,
                current: 60.0,
            },
        }
    }

    fn next(&mut self, rng: &mut fastrand::Rng) -> f64 {
        let delta = (rng.f64() * 2.0 - 1.0) * self.step;
        self.current = (self.current + delta).clamp(self.min, self.max);
        // One decimal, like the DHT22 reports.
        (self.current * 10.0).round() / 10.0
    }
}

/// Random-walk generator producing one reading per kind each tick.
pub struct SimulatedSource {
    rng: fastrand::Rng,
    walks: Vec<Walk>,
}

impl SimulatedSource {
    pub fn new() -> Self {
        Self::with_rng(fastrand::Rng::new())
    }

    /// Deterministic generator for tests and reproducible demos.
    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(fastrand::Rng::with_seed(seed))
    }

    fn with_rng(rng: fastrand::Rng) -> Self {
        Self {
            rng,
            walks: MetricKind::ALL.into_iter().map(Walk::for_kind).collect(),
        }
    }
}

impl Default for SimulatedSource {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadingSource for SimulatedSource {
    fn sample(&mut self, at: DateTime<Utc>) -> Vec<Reading> {
        let rng = &mut self.rng;
        self.walks
            .iter_mut()
            .map(|walk| Reading::new(walk.kind, walk.next(rng), at))
            .collect()
    }

    fn name(&self) -> &'static str {
        "simulated"
    }
}

// ============================================================================
// Ingested measurements
// ============================================================================

/// A validated temperature/humidity pair from an external device.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Measurement {
    pub temperature: f64,
    pub humidity: f64,
}

/// Raw ingestion body; both fields are optional until validated.
#[derive(Debug, Clone, Default)]
pub struct MeasurementPayload {
    pub temperature: Option<serde_json::Value>,
    pub humidity: Option<serde_json::Value>,
}

impl Measurement {
    /// Validate an arbitrary JSON body.
    pub fn from_json(value: &serde_json::Value) -> Result<Self, InputValidationError> {
        if !value.is_object() {
            return Err(InputValidationError::NotAnObject);
        }
        let payload = MeasurementPayload {
            temperature: value.get("temperature").cloned(),
            humidity: value.get("humidity").cloned(),
        };
        Self::try_from(payload)
    }

    fn readings(&self, at: DateTime<Utc>) -> [Reading; 2] {
        [
            Reading::new(MetricKind::Temperature, self.temperature, at),
            Reading::new(MetricKind::Humidity, self.humidity, at),
        ]
    }
}

fn numeric_field(
    value: Option<serde_json::Value>,
    field: &'static str,
) -> Result<f64, InputValidationError> {
    match value {
        None | Some(serde_json::Value::Null) => Err(InputValidationError::MissingField(field)),
        Some(v) => v
            .as_f64()
            .filter(|n| n.is_finite())
            .ok_or(InputValidationError::NotANumber { field }),
    }
}

impl TryFrom<MeasurementPayload> for Measurement {
    type Error = InputValidationError;

    fn try_from(payload: MeasurementPayload) -> Result<Self, Self::Error> {
        Ok(Self {
            temperature: numeric_field(payload.temperature, "temperature")?,
            humidity: numeric_field(payload.humidity, "humidity")?,
        })
    }
}

/// Sending side handed to the ingestion endpoint.
#[derive(Debug, Clone)]
pub struct IngestHandle {
    tx: mpsc::Sender<Measurement>,
}

impl IngestHandle {
    /// Queue a measurement for the next tick without waiting.
    pub fn submit(&self, measurement: Measurement) -> Result<(), InputValidationError> {
        self.tx.try_send(measurement).map_err(|e| match e {
            TrySendError::Full(_) => InputValidationError::QueueFull,
            TrySendError::Closed(_) => InputValidationError::Disabled,
        })
    }
}

/// Drains measurements queued since the previous tick.
///
/// Each queued measurement yields one reading per kind, stamped with the
/// tick time; a tick with nothing queued yields nothing.
pub struct IngestSource {
    rx: mpsc::Receiver<Measurement>,
}

impl IngestSource {
    /// Create a source and the handle that feeds it.
    pub fn new(queue_depth: usize) -> (Self, IngestHandle) {
        let (tx, rx) = mpsc::channel(queue_depth.max(1));
        (Self { rx }, IngestHandle { tx })
    }
}

impl ReadingSource for IngestSource {
    fn sample(&mut self, at: DateTime<Utc>) -> Vec<Reading> {
        let mut readings = Vec::new();
        let mut offset = 0;
        while let Ok(m) = self.rx.try_recv() {
            // Keep timestamps strictly increasing within one tick.
            let stamp = at + chrono::Duration::nanoseconds(offset);
            readings.extend(m.readings(stamp));
            offset += 1;
        }
        readings
    }

    fn name(&self) -> &'static str {
        "ingest"
    }
}
