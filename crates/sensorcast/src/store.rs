// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Time-series persistence.
//!
//! [`TimeSeriesStore`] is the backend seam (InfluxDB over HTTP, or an
//! in-process store). [`StoreWriter`] sits in front of it: the producer
//! hands readings to a bounded queue and a single worker task writes them,
//! so store latency and failures never reach the broadcast path.
//!
//! Writes are best-effort. A failed write is logged and counted; there is
//! no retry.

use crate::error::ProvisioningError;
use crate::history::HistoryPoint;
use crate::influx::{self, PointSchema};
use crate::reading::{MetricKind, Reading};
use chrono::Utc;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};

/// Persistence failures.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum StoreError {
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("request timed out")]
    Timeout,

    #[error("store rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("failed to parse store response: {0}")]
    Parse(String),

    #[error("write queue full")]
    Backlog,

    #[error("store writer stopped")]
    Closed,
}

impl From<reqwest::Error> for StoreError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            StoreError::Timeout
        } else if err.is_connect() || err.is_request() {
            StoreError::ConnectionLost(err.to_string())
        } else if err.is_decode() {
            StoreError::Parse(err.to_string())
        } else {
            StoreError::ConnectionLost(err.to_string())
        }
    }
}

/// Backend for durable reading storage.
pub trait TimeSeriesStore: Send + Sync {
    /// Name of the database/bucket written to, for logs.
    fn target(&self) -> String;

    /// Make sure the target bucket exists, creating it if absent.
    fn ensure_bucket(&self) -> BoxFuture<'_, Result<(), StoreError>>;

    /// Persist a batch of readings as one request.
    fn write_batch<'a>(&'a self, readings: &'a [Reading]) -> BoxFuture<'a, Result<(), StoreError>>;

    /// Most recent points of `kind` within `range`, newest first.
    fn recent(
        &self,
        kind: MetricKind,
        range: Duration,
        limit: usize,
    ) -> BoxFuture<'_, Result<Vec<HistoryPoint>, StoreError>>;
}

// ============================================================================
// InfluxDB v2
// ============================================================================

/// Connection settings for [`InfluxStore`].
#[derive(Debug, Clone)]
pub struct InfluxSettings {
    pub url: String,
    pub org: String,
    pub bucket: String,
    pub token: String,
    pub measurement: String,
    /// Tag key identifying the reporting device.
    pub source_key: String,
    /// Tag value identifying the reporting device.
    pub source: String,
    /// Bucket retention for newly created buckets (0 = infinite).
    pub retention_secs: u64,
    pub request_timeout: Duration,
}

/// InfluxDB v2 HTTP API client.
pub struct InfluxStore {
    client: reqwest::Client,
    settings: InfluxSettings,
    schema: PointSchema,
}

#[derive(Deserialize)]
struct BucketList {
    #[serde(default)]
    buckets: Vec<serde_json::Value>,
}

#[derive(Deserialize)]
struct OrgList {
    #[serde(default)]
    orgs: Vec<OrgInfo>,
}

#[derive(Deserialize)]
struct OrgInfo {
    id: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateBucket<'a> {
    #[serde(rename = "orgID")]
    org_id: &'a str,
    name: &'a str,
    retention_rules: Vec<RetentionRule>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RetentionRule {
    #[serde(rename = "type")]
    kind: &'static str,
    every_seconds: u64,
}

impl InfluxStore {
    pub fn new(settings: InfluxSettings) -> Result<Self, StoreError> {
        let client = reqwest::Client::builder()
            .timeout(settings.request_timeout)
            .build()
            .map_err(|e| StoreError::ConnectionLost(e.to_string()))?;
        let schema = PointSchema::new(settings.measurement.clone())
            .tag(settings.source_key.clone(), settings.source.clone());
        Ok(Self {
            client,
            settings,
            schema,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.settings.url.trim_end_matches('/'), path)
    }

    fn auth(&self) -> String {
        format!("Token {}", self.settings.token)
    }

    async fn bucket_exists(&self) -> Result<bool, StoreError> {
        let response = self
            .client
            .get(self.endpoint("/api/v2/buckets"))
            .header(reqwest::header::AUTHORIZATION, self.auth())
            .query(&[
                ("name", self.settings.bucket.as_str()),
                ("org", self.settings.org.as_str()),
            ])
            .send()
            .await?;

        // Unknown org or bucket surfaces as 404 on some server versions.
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(false);
        }
        let response = check_status(response).await?;
        let list: BucketList = response
            .json()
            .await
            .map_err(|e| StoreError::Parse(e.to_string()))?;
        Ok(!list.buckets.is_empty())
    }

    async fn org_id(&self) -> Result<String, StoreError> {
        let response = self
            .client
            .get(self.endpoint("/api/v2/orgs"))
            .header(reqwest::header::AUTHORIZATION, self.auth())
            .query(&[("org", self.settings.org.as_str())])
            .send()
            .await?;
        let response = check_status(response).await?;
        let list: OrgList = response
            .json()
            .await
            .map_err(|e| StoreError::Parse(e.to_string()))?;
        list.orgs
            .into_iter()
            .next()
            .map(|o| o.id)
            .ok_or_else(|| StoreError::SchemaMismatch(format!("unknown org '{}'", self.settings.org)))
    }

    async fn create_bucket(&self) -> Result<(), StoreError> {
        let org_id = self.org_id().await?;
        let retention_rules = if self.settings.retention_secs > 0 {
            vec![RetentionRule {
                kind: "expire",
                every_seconds: self.settings.retention_secs,
            }]
        } else {
            Vec::new()
        };
        let body = CreateBucket {
            org_id: &org_id,
            name: &self.settings.bucket,
            retention_rules,
        };

        let response = self
            .client
            .post(self.endpoint("/api/v2/buckets"))
            .header(reqwest::header::AUTHORIZATION, self.auth())
            .json(&body)
            .send()
            .await?;

        // Lost a creation race with another instance.
        if response.status() == reqwest::StatusCode::CONFLICT
            || response.status() == reqwest::StatusCode::UNPROCESSABLE_ENTITY
        {
            debug!("Bucket '{}' already exists", self.settings.bucket);
            return Ok(());
        }
        check_status(response).await?;
        info!("Created bucket '{}'", self.settings.bucket);
        Ok(())
    }

    async fn write_lines(&self, readings: &[Reading]) -> Result<(), StoreError> {
        let (body, rejected) = self.schema.encode_batch(readings);
        if rejected > 0 {
            return Err(StoreError::SchemaMismatch(format!(
                "{} reading(s) with non-finite values",
                rejected
            )));
        }
        if body.is_empty() {
            return Ok(());
        }

        let response = self
            .client
            .post(self.endpoint("/api/v2/write"))
            .header(reqwest::header::AUTHORIZATION, self.auth())
            .header(reqwest::header::CONTENT_TYPE, "text/plain; charset=utf-8")
            .query(&[
                ("org", self.settings.org.as_str()),
                ("bucket", self.settings.bucket.as_str()),
                ("precision", "ns"),
            ])
            .body(body)
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }

    async fn query_recent(
        &self,
        kind: MetricKind,
        range: Duration,
        limit: usize,
    ) -> Result<Vec<HistoryPoint>, StoreError> {
        let flux = influx::recent_points_query(
            &self.settings.bucket,
            &self.schema,
            &self.settings.source_key,
            kind,
            range,
            limit,
        );

        let response = self
            .client
            .post(self.endpoint("/api/v2/query"))
            .header(reqwest::header::AUTHORIZATION, self.auth())
            .header(reqwest::header::ACCEPT, "application/csv")
            .query(&[("org", self.settings.org.as_str())])
            .json(&serde_json::json!({ "query": flux, "type": "flux" }))
            .send()
            .await?;
        let response = check_status(response).await?;
        let body = response.text().await?;
        influx::parse_query_csv(&body).map_err(StoreError::Parse)
    }
}

/// Map a non-success response to a `StoreError`, keeping the server's message.
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, StoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<serde_json::Value>(&text)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(String::from))
        .unwrap_or(text);

    Err(match status.as_u16() {
        400 | 422 => StoreError::SchemaMismatch(message),
        408 | 504 => StoreError::Timeout,
        502 | 503 => StoreError::ConnectionLost(message),
        code => StoreError::Rejected {
            status: code,
            message,
        },
    })
}

impl TimeSeriesStore for InfluxStore {
    fn target(&self) -> String {
        format!(
            "{}/{}",
            self.settings.url.trim_end_matches('/'),
            self.settings.bucket
        )
    }

    fn ensure_bucket(&self) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(async move {
            if self.bucket_exists().await? {
                debug!("Bucket '{}' found", self.settings.bucket);
                return Ok(());
            }
            self.create_bucket().await
        })
    }

    fn write_batch<'a>(&'a self, readings: &'a [Reading]) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(self.write_lines(readings))
    }

    fn recent(
        &self,
        kind: MetricKind,
        range: Duration,
        limit: usize,
    ) -> BoxFuture<'_, Result<Vec<HistoryPoint>, StoreError>> {
        Box::pin(self.query_recent(kind, range, limit))
    }
}

// ============================================================================
// In-process store
// ============================================================================

/// Points an in-memory store holds before evicting the oldest.
pub const DEFAULT_MEMORY_MAX_POINTS: usize = 100_000;

/// Store that keeps points in memory, for demos without InfluxDB and tests.
///
/// Points older than the retention window are evicted on every write, and
/// the oldest points go first once `max_points` is reached.
#[derive(Debug)]
pub struct MemoryStore {
    points: Mutex<VecDeque<Reading>>,
    /// `None` keeps points until the size cap evicts them.
    retention: Option<Duration>,
    max_points: usize,
    provisioned: AtomicBool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self {
            points: Mutex::new(VecDeque::new()),
            retention: None,
            max_points: DEFAULT_MEMORY_MAX_POINTS,
            provisioned: AtomicBool::new(false),
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store that evicts points older than `retention`; zero keeps them.
    pub fn with_retention(retention: Duration) -> Self {
        Self {
            retention: (!retention.is_zero()).then_some(retention),
            ..Self::default()
        }
    }

    /// Cap the number of points held.
    pub fn max_points(mut self, max_points: usize) -> Self {
        self.max_points = max_points.max(1);
        self
    }

    /// Readings currently held, in write order.
    pub fn readings(&self) -> Vec<Reading> {
        self.points.lock().iter().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.points.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.lock().is_empty()
    }

    pub fn is_provisioned(&self) -> bool {
        self.provisioned.load(Ordering::Relaxed)
    }
}

impl TimeSeriesStore for MemoryStore {
    fn target(&self) -> String {
        "memory".to_string()
    }

    fn ensure_bucket(&self) -> BoxFuture<'_, Result<(), StoreError>> {
        self.provisioned.store(true, Ordering::Relaxed);
        Box::pin(async { Ok(()) })
    }

    fn write_batch<'a>(&'a self, readings: &'a [Reading]) -> BoxFuture<'a, Result<(), StoreError>> {
        let mut points = self.points.lock();
        points.extend(readings.iter().copied());

        let before = points.len();
        if let Some(cutoff) = self
            .retention
            .and_then(|r| chrono::Duration::from_std(r).ok())
            .and_then(|r| Utc::now().checked_sub_signed(r))
        {
            points.retain(|r| r.timestamp() >= cutoff);
        }
        let excess = points.len().saturating_sub(self.max_points);
        points.drain(..excess);

        let evicted = before - points.len();
        if evicted > 0 {
            debug!("Memory store evicted {} point(s), {} held", evicted, points.len());
        }
        drop(points);
        Box::pin(async { Ok(()) })
    }

    fn recent(
        &self,
        kind: MetricKind,
        range: Duration,
        limit: usize,
    ) -> BoxFuture<'_, Result<Vec<HistoryPoint>, StoreError>> {
        let since = chrono::Duration::from_std(range)
            .ok()
            .and_then(|r| Utc::now().checked_sub_signed(r));
        let mut matching: Vec<HistoryPoint> = self
            .points
            .lock()
            .iter()
            .filter(|r| r.kind() == kind)
            .filter(|r| since.map_or(true, |s| r.timestamp() >= s))
            .map(HistoryPoint::from)
            .collect();
        matching.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        matching.truncate(limit);
        Box::pin(async move { Ok(matching) })
    }
}

// ============================================================================
// Writer
// ============================================================================

/// Tuning for [`StoreWriter`].
#[derive(Debug, Clone)]
pub struct StoreWriterConfig {
    /// Readings that may wait for the worker before new ones are dropped.
    pub queue_depth: usize,
    /// Upper bound on one store request.
    pub write_timeout: Duration,
    /// Largest batch the worker sends in one request.
    pub max_batch: usize,
}

impl Default for StoreWriterConfig {
    fn default() -> Self {
        Self {
            queue_depth: 64,
            write_timeout: Duration::from_secs(2),
            max_batch: 32,
        }
    }
}

/// Persistence counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    /// Readings durably written.
    pub written: u64,
    /// Readings whose write failed.
    pub failed: u64,
    /// Readings dropped because the queue was full or closed.
    pub dropped: u64,
}

#[derive(Debug)]
struct Counters {
    written: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
    /// False after a failure until the next success.
    healthy: AtomicBool,
}

impl Counters {
    fn new() -> Self {
        Self {
            written: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            healthy: AtomicBool::new(true),
        }
    }

    fn record(&self, target: &str, count: usize, result: &Result<(), StoreError>) {
        match result {
            Ok(()) => {
                self.written.fetch_add(count as u64, Ordering::Relaxed);
                if !self.healthy.swap(true, Ordering::Relaxed) {
                    info!("Store writes to {} recovered", target);
                }
            }
            Err(e) => {
                self.failed.fetch_add(count as u64, Ordering::Relaxed);
                if self.healthy.swap(false, Ordering::Relaxed) {
                    warn!(
                        "Store write to {} failed ({} reading(s)): {}; repeats logged at debug",
                        target, count, e
                    );
                } else {
                    debug!("Store write to {} failed again: {}", target, e);
                }
            }
        }
    }
}

/// Best-effort, non-blocking front end to a [`TimeSeriesStore`].
///
/// Cloning is cheap; the worker stops once every clone is dropped and the
/// queue has drained.
#[derive(Clone)]
pub struct StoreWriter {
    store: Arc<dyn TimeSeriesStore>,
    tx: mpsc::Sender<Reading>,
    counters: Arc<Counters>,
    write_timeout: Duration,
}

impl fmt::Debug for StoreWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreWriter")
            .field("target", &self.store.target())
            .field("stats", &self.stats())
            .finish()
    }
}

impl StoreWriter {
    /// Start the writer's worker task. Must be called inside a Tokio runtime.
    pub fn spawn(store: Arc<dyn TimeSeriesStore>, config: StoreWriterConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.queue_depth.max(1));
        let counters = Arc::new(Counters::new());

        tokio::spawn(Self::worker(
            store.clone(),
            rx,
            counters.clone(),
            config.write_timeout,
            config.max_batch.max(1),
        ));

        Self {
            store,
            tx,
            counters,
            write_timeout: config.write_timeout,
        }
    }

    async fn worker(
        store: Arc<dyn TimeSeriesStore>,
        mut rx: mpsc::Receiver<Reading>,
        counters: Arc<Counters>,
        write_timeout: Duration,
        max_batch: usize,
    ) {
        let target = store.target();
        debug!("Store writer for {} started", target);

        let mut batch = Vec::with_capacity(max_batch);
        while rx.recv_many(&mut batch, max_batch).await > 0 {
            let result = write_with_timeout(store.as_ref(), &batch, write_timeout).await;
            counters.record(&target, batch.len(), &result);
            batch.clear();
        }

        debug!("Store writer for {} stopped", target);
    }

    /// Queue a reading for persistence without waiting.
    ///
    /// A full queue drops the reading and counts it; the caller is never
    /// blocked.
    pub fn submit(&self, reading: Reading) -> Result<(), StoreError> {
        match self.tx.try_send(reading) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                debug!("Store queue full, dropping {} reading", reading.kind());
                Err(StoreError::Backlog)
            }
            Err(TrySendError::Closed(_)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                Err(StoreError::Closed)
            }
        }
    }

    /// Write one reading now, bypassing the queue.
    pub async fn write(&self, reading: Reading) -> Result<(), StoreError> {
        let result =
            write_with_timeout(self.store.as_ref(), std::slice::from_ref(&reading), self.write_timeout)
                .await;
        self.counters.record(&self.store.target(), 1, &result);
        result
    }

    /// Ensure the target bucket exists. Intended for startup, where failure
    /// is fatal.
    pub async fn provision(&self) -> Result<(), ProvisioningError> {
        let target = self.store.target();
        let result = match tokio::time::timeout(self.write_timeout * 5, self.store.ensure_bucket())
            .await
        {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout),
        };
        result.map_err(|source| ProvisioningError {
            bucket: target,
            source,
        })
    }

    /// Recent points of `kind` from the store, newest first.
    pub async fn recent(
        &self,
        kind: MetricKind,
        range: Duration,
        limit: usize,
    ) -> Result<Vec<HistoryPoint>, StoreError> {
        match tokio::time::timeout(self.write_timeout, self.store.recent(kind, range, limit)).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout),
        }
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            written: self.counters.written.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }

    pub fn target(&self) -> String {
        self.store.target()
    }
}

async fn write_with_timeout(
    store: &dyn TimeSeriesStore,
    readings: &[Reading],
    timeout: Duration,
) -> Result<(), StoreError> {
    match tokio::time::timeout(timeout, store.write_batch(readings)).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    /// Store whose writes never complete.
    struct HangingStore;

    impl TimeSeriesStore for HangingStore {
        fn target(&self) -> String {
            "hanging".into()
        }

        fn ensure_bucket(&self) -> BoxFuture<'_, Result<(), StoreError>> {
            Box::pin(futures::future::pending())
        }

        fn write_batch<'a>(&'a self, _: &'a [Reading]) -> BoxFuture<'a, Result<(), StoreError>> {
            Box::pin(futures::future::pending())
        }

        fn recent(
            &self,
            _: MetricKind,
            _: Duration,
            _: usize,
        ) -> BoxFuture<'_, Result<Vec<HistoryPoint>, StoreError>> {
            Box::pin(futures::future::pending())
        }
    }

    fn reading(secs: i64, value: f64) -> Reading {
        Reading::new(
            MetricKind::Temperature,
            value,
            Utc.timestamp_opt(secs, 0).unwrap(),
        )
    }

    #[tokio::test]
    async fn test_submit_reaches_store() {
        let store = Arc::new(MemoryStore::new());
        let writer = StoreWriter::spawn(store.clone(), StoreWriterConfig::default());

        writer.submit(reading(1, 20.0)).unwrap();
        writer.submit(reading(2, 21.0)).unwrap();

        for _ in 0..100 {
            if store.len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(store.len(), 2);
        assert_eq!(writer.stats().written, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_times_out() {
        let writer = StoreWriter::spawn(
            Arc::new(HangingStore),
            StoreWriterConfig {
                write_timeout: Duration::from_millis(100),
                ..Default::default()
            },
        );

        let result = writer.write(reading(1, 20.0)).await;
        assert_eq!(result, Err(StoreError::Timeout));
        assert_eq!(writer.stats().failed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_queue_drops_without_blocking() {
        let writer = StoreWriter::spawn(
            Arc::new(HangingStore),
            StoreWriterConfig {
                queue_depth: 2,
                max_batch: 1,
                write_timeout: Duration::from_secs(60),
            },
        );

        // The worker may already hold one reading on the hanging write, so the
        // queue takes two or three before refusing.
        let mut accepted = 0;
        while writer.submit(reading(accepted, accepted as f64)).is_ok() {
            accepted += 1;
            tokio::task::yield_now().await;
            assert!(accepted <= 3, "queue never filled");
        }
        assert!(accepted >= 2);
        assert_eq!(writer.stats().dropped, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_provision_failure_is_reported() {
        let writer = StoreWriter::spawn(
            Arc::new(HangingStore),
            StoreWriterConfig {
                write_timeout: Duration::from_millis(10),
                ..Default::default()
            },
        );
        let err = writer.provision().await.unwrap_err();
        assert_eq!(err.bucket, "hanging");
        assert_eq!(err.source, StoreError::Timeout);
    }

    #[tokio::test]
    async fn test_memory_store_recent_is_newest_first() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let old = now - chrono::Duration::hours(2);
        store
            .write_batch(&[
                Reading::new(MetricKind::Temperature, 1.0, old),
                Reading::new(MetricKind::Temperature, 2.0, now - chrono::Duration::seconds(20)),
                Reading::new(MetricKind::Humidity, 50.0, now),
                Reading::new(MetricKind::Temperature, 3.0, now - chrono::Duration::seconds(10)),
            ])
            .await
            .unwrap();

        let points = store
            .recent(MetricKind::Temperature, Duration::from_secs(3600), 10)
            .await
            .unwrap();
        let values: Vec<f64> = points.iter().map(|p| p.value).collect();
        assert_eq!(values, vec![3.0, 2.0]);

        let limited = store
            .recent(MetricKind::Temperature, Duration::from_secs(3600), 1)
            .await
            .unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[tokio::test]
    async fn test_memory_store_evicts_past_retention() {
        let store = MemoryStore::with_retention(Duration::from_secs(60));
        let month_ago = Utc::now() - chrono::Duration::days(30);
        let stale: Vec<Reading> = (0..5_000)
            .map(|i| {
                Reading::new(
                    MetricKind::Temperature,
                    i as f64,
                    month_ago + chrono::Duration::seconds(i),
                )
            })
            .collect();
        store.write_batch(&stale).await.unwrap();
        assert!(store.is_empty());

        let fresh = Reading::new(MetricKind::Humidity, 55.0, Utc::now());
        store.write_batch(&stale[..10]).await.unwrap();
        store.write_batch(std::slice::from_ref(&fresh)).await.unwrap();
        assert_eq!(store.readings(), vec![fresh]);
    }

    #[tokio::test]
    async fn test_memory_store_caps_points() {
        let store = MemoryStore::new().max_points(3);
        let now = Utc::now();
        let batch: Vec<Reading> = (0..5)
            .map(|i| {
                Reading::new(
                    MetricKind::Temperature,
                    i as f64,
                    now + chrono::Duration::milliseconds(i),
                )
            })
            .collect();
        store.write_batch(&batch).await.unwrap();

        let values: Vec<f64> = store.readings().iter().map(|r| r.value()).collect();
        assert_eq!(values, vec![2.0, 3.0, 4.0]);
    }

    #[tokio::test]
    async fn test_memory_store_zero_retention_keeps_old_points() {
        let store = MemoryStore::with_retention(Duration::ZERO);
        store.write_batch(&[reading(1, 20.0)]).await.unwrap();
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_memory_store_provisions() {
        let store = Arc::new(MemoryStore::new());
        let writer = StoreWriter::spawn(store.clone(), StoreWriterConfig::default());
        writer.provision().await.unwrap();
        assert!(store.is_provisioned());
    }

    #[test]
    fn test_influx_store_builds() {
        let store = InfluxStore::new(InfluxSettings {
            url: "http://localhost:8086/".into(),
            org: "org".into(),
            bucket: "iot_data".into(),
            token: "t".into(),
            measurement: "temperature_readings".into(),
            source_key: "device".into(),
            source: "raspberry-pi".into(),
            retention_secs: 0,
            request_timeout: Duration::from_secs(1),
        })
        .unwrap();
        assert_eq!(store.endpoint("/api/v2/write"), "http://localhost:8086/api/v2/write");
        assert_eq!(store.target(), "http://localhost:8086/iot_data");
    }
}
