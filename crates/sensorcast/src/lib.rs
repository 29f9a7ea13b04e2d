// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Sensorcast - real-time sensor telemetry pipeline.
//!
//! A producer samples one reading per metric kind on a fixed cadence,
//! persists it to InfluxDB, keeps a bounded recent-history window in memory
//! and pushes the whole window to every connected subscriber.
//!
//! ```text
//!                   +--> StoreWriter (queue + worker) --> InfluxDB
//! ReadingSource --> Producer
//!                   +--> SharedHistory --> Broadcaster --> SubscriberRegistry --> sessions
//! ```
//!
//! Persistence is best-effort and never delays a tick; broadcast is the
//! primary side effect. A slow subscriber is disconnected rather than
//! allowed to hold up the others.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use sensorcast::{
//!     Broadcaster, MemoryStore, Producer, SharedHistory, SimulatedSource, StoreWriter,
//! };
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn demo() {
//! let history = Arc::new(SharedHistory::new(10));
//! let broadcaster = Arc::new(Broadcaster::new(history.clone(), 16));
//! let store = StoreWriter::spawn(
//!     Arc::new(MemoryStore::new()),
//!     Default::default(),
//! );
//!
//! let mut sub = broadcaster.subscribe("demo").expect("fresh queue");
//! let producer = Producer::new(
//!     Box::new(SimulatedSource::new()),
//!     history,
//!     store,
//!     broadcaster,
//!     Duration::from_secs(5),
//! );
//! let (_stop, stop_rx) = tokio::sync::watch::channel(false);
//! tokio::spawn(producer.run(stop_rx));
//!
//! while let Some(frame) = sub.receiver.recv().await {
//!     println!("{}", frame);
//! }
//! # }
//! ```

pub mod broadcaster;
pub mod config;
pub mod error;
pub mod history;
pub mod influx;
pub mod producer;
pub mod reading;
pub mod registry;
pub mod source;
pub mod store;

pub use broadcaster::{BroadcastStats, Broadcaster, PublishReport, Subscription};
pub use config::{
    ConfigError, PipelineConfig, SensorcastConfig, ServerConfig, SourceMode, StoreBackend,
    StoreConfig,
};
pub use error::{InputValidationError, ProvisioningError, SubscriberDeliveryError};
pub use history::{BroadcastPayload, HistoryBuffer, HistoryPoint, HistoryWindow, SharedHistory};
pub use producer::{Producer, ProducerState, TickReport};
pub use reading::{MetricKind, Reading};
pub use registry::{Frame, RegistrationToken, Subscriber, SubscriberRegistry};
pub use source::{
    IngestHandle, IngestSource, Measurement, MeasurementPayload, ReadingSource, SimulatedSource,
};
pub use store::{
    InfluxSettings, InfluxStore, MemoryStore, StoreError, StoreStats, StoreWriter, StoreWriterConfig,
    TimeSeriesStore,
};
