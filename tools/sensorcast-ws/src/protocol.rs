// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! HTTP request and response bodies.
//!
//! WebSocket frames are produced by the library (`BroadcastPayload`); this
//! module only covers the poll/ingest endpoints around it.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use sensorcast::{
    BroadcastStats, HistoryPoint, InputValidationError, MetricKind, ProducerState, StoreError,
    StoreStats,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Default look-back for `GET /data`.
pub const DEFAULT_RANGE_SECS: u64 = 3600;

/// Default row limit for `GET /data`.
pub const DEFAULT_LIMIT: usize = 20;

/// Upper bound on `limit` accepted from clients.
pub const MAX_LIMIT: usize = 1000;

/// JSON error body.
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    pub code: u16,
}

impl ApiError {
    pub fn new(status: StatusCode, error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code: status.as_u16(),
        }
    }

    pub fn bad_request(error: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self)).into_response()
    }
}

impl From<InputValidationError> for ApiError {
    fn from(err: InputValidationError) -> Self {
        let status = match err {
            InputValidationError::QueueFull => StatusCode::SERVICE_UNAVAILABLE,
            InputValidationError::Disabled => StatusCode::CONFLICT,
            _ => StatusCode::BAD_REQUEST,
        };
        Self::new(status, err.to_string())
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        Self::new(StatusCode::BAD_GATEWAY, format!("store query failed: {}", err))
    }
}

/// Query string for `GET /data`.
#[derive(Debug, Default, Deserialize)]
pub struct DataQuery {
    /// Metric kind; all kinds when absent.
    pub kind: Option<String>,
    /// Look-back window in seconds.
    pub range: Option<u64>,
    pub limit: Option<usize>,
}

impl DataQuery {
    pub fn kinds(&self) -> Result<Vec<MetricKind>, ApiError> {
        match &self.kind {
            None => Ok(MetricKind::ALL.to_vec()),
            Some(raw) => raw
                .parse::<MetricKind>()
                .map(|k| vec![k])
                .map_err(ApiError::bad_request),
        }
    }

    pub fn range_secs(&self) -> u64 {
        self.range.unwrap_or(DEFAULT_RANGE_SECS).max(1)
    }

    pub fn limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
    }
}

/// Points per kind, newest first.
pub type DataResponse = BTreeMap<MetricKind, Vec<HistoryPoint>>;

/// Reply to an accepted ingestion.
#[derive(Debug, Serialize)]
pub struct Accepted {
    pub status: &'static str,
}

impl Accepted {
    pub fn queued() -> Self {
        Self { status: "queued" }
    }
}

/// `GET /health`
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub subscribers: usize,
    pub uptime_secs: u64,
}

/// `GET /stats`
#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub producer: ProducerState,
    pub source: String,
    pub store_target: String,
    pub clients: usize,
    pub max_clients: usize,
    pub broadcast: BroadcastStats,
    pub store: StoreStats,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_query_defaults() {
        let q = DataQuery::default();
        assert_eq!(q.kinds().unwrap(), MetricKind::ALL.to_vec());
        assert_eq!(q.range_secs(), 3600);
        assert_eq!(q.limit(), 20);
    }

    #[test]
    fn test_data_query_parsing() {
        let q = DataQuery {
            kind: Some("Humidity".into()),
            range: Some(0),
            limit: Some(1_000_000),
        };
        assert_eq!(q.kinds().unwrap(), vec![MetricKind::Humidity]);
        assert_eq!(q.range_secs(), 1);
        assert_eq!(q.limit(), MAX_LIMIT);

        let bad = DataQuery {
            kind: Some("pressure".into()),
            ..Default::default()
        };
        assert_eq!(bad.kinds().unwrap_err().code, 400);
    }

    #[test]
    fn test_error_status_mapping() {
        assert_eq!(
            ApiError::from(InputValidationError::MissingField("humidity")).code,
            400
        );
        assert_eq!(ApiError::from(InputValidationError::QueueFull).code, 503);
        assert_eq!(ApiError::from(InputValidationError::Disabled).code, 409);
        assert_eq!(
            ApiError::from(StoreError::ConnectionLost("refused".into())).code,
            502
        );
        assert_eq!(ApiError::from(StoreError::Timeout).code, 502);
    }

    #[test]
    fn test_data_response_keys_are_kind_names() {
        let mut response = DataResponse::new();
        response.insert(MetricKind::Temperature, Vec::new());
        let json = serde_json::to_value(&response).unwrap();
        assert!(json.get("temperature").is_some());
    }
}
