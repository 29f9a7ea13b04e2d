// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Periodic producer loop.
//!
//! One task drives every tick in sequence:
//!
//! ```text
//! Idle -> Generating -> Persisting -> Publishing -> Idle
//! ```
//!
//! Persistence only queues readings on the [`StoreWriter`], so a tick never
//! waits on the store. An overrunning tick delays the next one instead of
//! overlapping it.

use crate::broadcaster::{Broadcaster, PublishReport};
use crate::history::SharedHistory;
use crate::reading::Reading;
use crate::source::ReadingSource;
use crate::store::StoreWriter;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

/// Where the producer is within a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProducerState {
    Idle,
    Generating,
    Persisting,
    Publishing,
}

impl fmt::Display for ProducerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProducerState::Idle => "idle",
            ProducerState::Generating => "generating",
            ProducerState::Persisting => "persisting",
            ProducerState::Publishing => "publishing",
        };
        f.write_str(name)
    }
}

/// Outcome of one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    /// 1-based tick number.
    pub tick: u64,
    /// Readings produced by the source.
    pub readings: usize,
    /// Readings handed to the store writer.
    pub queued: usize,
    /// Readings the store writer refused.
    pub store_dropped: usize,
    pub publish: PublishReport,
}

/// Wall-clock time derived from the runtime's monotonic clock.
///
/// Anchored once, so timestamps never go backwards and follow paused time
/// in tests.
#[derive(Debug, Clone, Copy)]
struct TickClock {
    wall: DateTime<Utc>,
    mono: Instant,
}

impl TickClock {
    fn start() -> Self {
        Self {
            wall: Utc::now(),
            mono: Instant::now(),
        }
    }

    fn now(&self) -> DateTime<Utc> {
        let elapsed = chrono::Duration::from_std(self.mono.elapsed())
            .unwrap_or_else(|_| chrono::Duration::zero());
        self.wall + elapsed
    }
}

/// Samples, persists and publishes readings on a fixed period.
pub struct Producer {
    source: Box<dyn ReadingSource>,
    history: Arc<SharedHistory>,
    store: StoreWriter,
    broadcaster: Arc<Broadcaster>,
    period: Duration,
    clock: TickClock,
    state: watch::Sender<ProducerState>,
    ticks: u64,
}

impl Producer {
    /// Create a producer. Must be called inside a Tokio runtime.
    pub fn new(
        source: Box<dyn ReadingSource>,
        history: Arc<SharedHistory>,
        store: StoreWriter,
        broadcaster: Arc<Broadcaster>,
        period: Duration,
    ) -> Self {
        let (state, _) = watch::channel(ProducerState::Idle);
        Self {
            source,
            history,
            store,
            broadcaster,
            period: period.max(Duration::from_millis(1)),
            clock: TickClock::start(),
            state,
            ticks: 0,
        }
    }

    pub fn state(&self) -> ProducerState {
        *self.state.borrow()
    }

    /// Follow state transitions from another task.
    pub fn watch_state(&self) -> watch::Receiver<ProducerState> {
        self.state.subscribe()
    }

    fn enter(&self, state: ProducerState) {
        self.state.send_replace(state);
    }

    /// Run one full cycle now.
    pub fn tick(&mut self) -> TickReport {
        self.ticks += 1;
        let mut report = TickReport {
            tick: self.ticks,
            ..Default::default()
        };

        self.enter(ProducerState::Generating);
        let readings: Vec<Reading> = self.source.sample(self.clock.now());
        report.readings = readings.len();

        self.enter(ProducerState::Persisting);
        for reading in &readings {
            match self.store.submit(*reading) {
                Ok(()) => report.queued += 1,
                Err(_) => report.store_dropped += 1,
            }
        }

        self.enter(ProducerState::Publishing);
        self.history.append_all(&readings);
        report.publish = self.broadcaster.publish(&self.history.snapshot());

        self.enter(ProducerState::Idle);
        debug!(
            "Tick {}: {} reading(s), {} queued, {} delivered, {} dropped subscriber(s)",
            report.tick,
            report.readings,
            report.queued,
            report.publish.delivered,
            report.publish.dropped
        );
        report
    }

    /// Tick every period until `shutdown` turns true or its sender is dropped.
    ///
    /// The first tick runs immediately.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            "Producer started ({} source, period {:?}, store {})",
            self.source.name(),
            self.period,
            self.store.target()
        );

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = interval.tick() => {
                    self.tick();
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("Producer stopped after {} tick(s)", self.ticks);
    }
}
