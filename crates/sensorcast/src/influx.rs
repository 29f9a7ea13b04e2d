// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! InfluxDB v2 wire formats.
//!
//! Line Protocol for writes:
//! ```text
//! temperature_readings,device=raspberry-pi temperature=23.5 1733220000000000000
//! ```
//!
//! Flux for the recent-points query, and the CSV dialect the query
//! endpoint answers with.
//!
//! See: <https://docs.influxdata.com/influxdb/v2/reference/syntax/line-protocol/>

use crate::history::HistoryPoint;
use crate::reading::{MetricKind, Reading};
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Measurement name and tag set shared by every point a writer emits.
#[derive(Debug, Clone)]
pub struct PointSchema {
    measurement: String,
    /// Tags, sorted by key for canonical form.
    tags: Vec<(String, String)>,
}

impl PointSchema {
    pub fn new(measurement: impl Into<String>) -> Self {
        Self {
            measurement: measurement.into(),
            tags: Vec::new(),
        }
    }

    /// Add a tag to every point.
    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.push((key.into(), value.into()));
        self.tags.sort_by(|a, b| a.0.cmp(&b.0));
        self
    }

    pub fn measurement(&self) -> &str {
        &self.measurement
    }

    pub fn tag_value(&self, key: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Encode one reading as a Line Protocol line.
    ///
    /// The reading's kind is the field key. Returns `None` for NaN or
    /// infinite values, which Line Protocol cannot carry.
    pub fn encode(&self, reading: &Reading) -> Option<String> {
        let value = reading.value();
        if !value.is_finite() {
            return None;
        }

        let mut line = escape_measurement(&self.measurement);
        for (key, val) in &self.tags {
            line.push(',');
            line.push_str(&escape_key(key));
            line.push('=');
            line.push_str(&escape_key(val));
        }

        line.push(' ');
        line.push_str(&escape_key(reading.kind().as_str()));
        line.push('=');
        // Unsuffixed numbers are floats in Line Protocol.
        line.push_str(&value.to_string());

        line.push(' ');
        line.push_str(&reading.timestamp_ns().to_string());
        Some(line)
    }

    /// Encode a batch as a newline-separated body.
    ///
    /// Returns the body and the number of readings that could not be encoded.
    pub fn encode_batch(&self, readings: &[Reading]) -> (String, usize) {
        let mut body = String::new();
        let mut rejected = 0;
        for reading in readings {
            match self.encode(reading) {
                Some(line) => {
                    if !body.is_empty() {
                        body.push('\n');
                    }
                    body.push_str(&line);
                }
                None => rejected += 1,
            }
        }
        (body, rejected)
    }
}

/// Escape measurement name: commas and spaces.
fn escape_measurement(s: &str) -> String {
    s.replace(',', "\\,").replace(' ', "\\ ")
}

/// Escape tag keys, tag values and field keys: commas, equals signs and spaces.
fn escape_key(s: &str) -> String {
    s.replace(',', "\\,")
        .replace('=', "\\=")
        .replace(' ', "\\ ")
}

/// Quote a string literal for Flux.
fn flux_string(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Flux query for the most recent points of `kind` within `range`, newest first.
pub fn recent_points_query(
    bucket: &str,
    schema: &PointSchema,
    source_tag: &str,
    kind: MetricKind,
    range: Duration,
    limit: usize,
) -> String {
    let mut filter = format!(
        "r._measurement == {} and r._field == {}",
        flux_string(schema.measurement()),
        flux_string(kind.as_str())
    );
    if let Some(source) = schema.tag_value(source_tag) {
        filter.push_str(&format!(" and r.{} == {}", source_tag, flux_string(source)));
    }

    format!(
        "from(bucket: {bucket})\n  |> range(start: -{secs}s)\n  |> filter(fn: (r) => {filter})\n  |> sort(columns: [\"_time\"], desc: true)\n  |> limit(n: {limit})",
        bucket = flux_string(bucket),
        secs = range.as_secs().max(1),
        filter = filter,
        limit = limit.max(1),
    )
}

/// Parse the CSV body returned by `/api/v2/query` into points.
///
/// Annotation rows (`#...`) and blank table separators are skipped; every
/// header row re-establishes the `_time` and `_value` column positions.
/// Rows are returned in response order.
pub fn parse_query_csv(body: &str) -> Result<Vec<HistoryPoint>, String> {
    let mut points = Vec::new();
    let mut columns: Option<(usize, usize)> = None;

    for raw in body.lines() {
        let line = raw.trim_end_matches('\r');
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let cells: Vec<&str> = line.split(',').map(|c| c.trim_matches('"')).collect();
        let time_col = cells.iter().position(|c| *c == "_time");
        let value_col = cells.iter().position(|c| *c == "_value");
        if let (Some(t), Some(v)) = (time_col, value_col) {
            columns = Some((t, v));
            continue;
        }

        let (t, v) = columns.ok_or_else(|| format!("data row before header: '{}'", line))?;
        let time = cells
            .get(t)
            .ok_or_else(|| format!("row missing _time column: '{}'", line))?;
        let value = cells
            .get(v)
            .ok_or_else(|| format!("row missing _value column: '{}'", line))?;

        let timestamp = DateTime::parse_from_rfc3339(time)
            .map_err(|e| format!("bad _time '{}': {}", time, e))?
            .with_timezone(&Utc);
        let value: f64 = value
            .parse()
            .map_err(|e| format!("bad _value '{}': {}", value, e))?;

        points.push(HistoryPoint { timestamp, value });
    }

    Ok(points)
}
