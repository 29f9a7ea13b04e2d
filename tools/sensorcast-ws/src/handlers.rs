// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! HTTP endpoint handlers.

use crate::protocol::{
    Accepted, ApiError, DataQuery, DataResponse, HealthResponse, StatsResponse,
};
use crate::session::ClientSession;
use crate::AppState;
use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        ws::WebSocket,
        Query, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use sensorcast::{InputValidationError, Measurement};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// GET /ws
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    let Some(slot) = state.try_acquire_client() else {
        warn!("Connection rejected: max clients ({}) reached", state.max_clients);
        return ApiError::new(StatusCode::SERVICE_UNAVAILABLE, "Too many connections")
            .into_response();
    };

    ws.on_upgrade(move |socket| async move {
        handle_socket(socket, state).await;
        drop(slot);
    })
    .into_response()
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    info!("Client connected. Total: {}", state.client_count());
    let session = ClientSession::new(
        state.broadcaster.clone(),
        state.send_timeout,
        state.shutdown.clone(),
    );
    session.run(socket).await;
}

/// GET /health
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        subscribers: state.broadcaster.subscriber_count(),
        uptime_secs: state.started.elapsed().as_secs(),
    })
}

/// GET /stats
pub async fn stats(State(state): State<Arc<AppState>>) -> Json<StatsResponse> {
    Json(StatsResponse {
        producer: *state.producer_state.borrow(),
        source: state.source.to_string(),
        store_target: state.writer.target(),
        clients: state.client_count(),
        max_clients: state.max_clients,
        broadcast: state.broadcaster.stats(),
        store: state.writer.stats(),
    })
}

/// POST /data
pub async fn ingest(
    State(state): State<Arc<AppState>>,
    body: Result<Json<serde_json::Value>, JsonRejection>,
) -> Result<(StatusCode, Json<Accepted>), ApiError> {
    let Some(handle) = &state.ingest else {
        return Err(InputValidationError::Disabled.into());
    };
    let Json(value) = body.map_err(|e| ApiError::bad_request(e.body_text()))?;

    let measurement = Measurement::from_json(&value).inspect_err(|e| {
        debug!("Rejected ingestion payload: {}", e);
    })?;
    handle.submit(measurement)?;

    debug!(
        "Queued measurement: temperature={} humidity={}",
        measurement.temperature, measurement.humidity
    );
    Ok((StatusCode::ACCEPTED, Json(Accepted::queued())))
}

/// GET /data
pub async fn recent(
    State(state): State<Arc<AppState>>,
    query: Result<Query<DataQuery>, QueryRejection>,
) -> Result<Json<DataResponse>, ApiError> {
    let Query(query) = query.map_err(|e| ApiError::bad_request(e.body_text()))?;
    let range = Duration::from_secs(query.range_secs());
    let limit = query.limit();

    let mut response = DataResponse::new();
    for kind in query.kinds()? {
        let points = state.writer.recent(kind, range, limit).await.map_err(|e| {
            warn!("Recent {} query failed: {}", kind, e);
            ApiError::from(e)
        })?;
        response.insert(kind, points);
    }
    Ok(Json(response))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_state;
    use sensorcast::{MetricKind, SourceMode};
    use serde_json::json;

    #[tokio::test]
    async fn test_ingest_rejected_in_simulated_mode() {
        let (state, _ingest) = test_state(SourceMode::Simulated, 4);
        let err = ingest(State(state), Ok(Json(json!({"temperature": 1, "humidity": 2}))))
            .await
            .unwrap_err();
        assert_eq!(err.code, 409);
    }

    #[tokio::test]
    async fn test_ingest_validates_and_queues() {
        let (state, _source) = test_state(SourceMode::Ingest, 1);

        let missing = ingest(State(state.clone()), Ok(Json(json!({"temperature": 21.5}))))
            .await
            .unwrap_err();
        assert_eq!(missing.code, 400);
        assert!(missing.error.contains("humidity"));

        let (status, _) = ingest(
            State(state.clone()),
            Ok(Json(json!({"temperature": 21.5, "humidity": 40}))),
        )
        .await
        .unwrap();
        assert_eq!(status, StatusCode::ACCEPTED);

        // Queue depth is one and nothing drains it.
        let full = ingest(
            State(state),
            Ok(Json(json!({"temperature": 22.0, "humidity": 41}))),
        )
        .await
        .unwrap_err();
        assert_eq!(full.code, 503);
    }

    #[tokio::test]
    async fn test_recent_reads_store_newest_first() {
        let (state, _source) = test_state(SourceMode::Simulated, 4);
        let now = chrono::Utc::now();
        for (secs, value) in [(30, 20.0), (20, 21.0), (10, 22.0)] {
            state
                .writer
                .write(sensorcast::Reading::new(
                    MetricKind::Temperature,
                    value,
                    now - chrono::Duration::seconds(secs),
                ))
                .await
                .unwrap();
        }

        let query = DataQuery {
            kind: Some("temperature".into()),
            limit: Some(2),
            ..Default::default()
        };
        let Json(response) = recent(State(state), Ok(Query(query))).await.unwrap();
        let values: Vec<f64> = response[&MetricKind::Temperature]
            .iter()
            .map(|p| p.value)
            .collect();
        assert_eq!(values, vec![22.0, 21.0]);
        assert!(!response.contains_key(&MetricKind::Humidity));
    }

    #[tokio::test]
    async fn test_health_reports_subscribers() {
        let (state, _source) = test_state(SourceMode::Simulated, 4);
        let _sub = state.broadcaster.subscribe("dashboard").unwrap();
        let Json(health) = health(State(state)).await;
        assert_eq!(health.status, "ok");
        assert_eq!(health.subscribers, 1);
    }
}
