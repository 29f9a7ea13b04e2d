// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Snapshot fan-out to all registered subscribers.
//!
//! Each publish encodes the payload once and pushes the same frame into every
//! subscriber's bounded queue with `try_send`. A full or closed queue drops
//! that subscriber; nothing is ever awaited, so one stalled connection cannot
//! delay the producer or the other subscribers.
//!
//! Publishing and registration share a gate: a joining subscriber gets the
//! history snapshot and enters the live set in one step, so it sees the
//! current state first and then every later publish, without a gap.

use crate::error::SubscriberDeliveryError;
use crate::history::{BroadcastPayload, SharedHistory};
use crate::registry::{Frame, RegistrationToken, Subscriber, SubscriberRegistry};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

/// Default depth of each subscriber's outbound queue.
pub const DEFAULT_QUEUE_DEPTH: usize = 16;

/// Outcome of a single publish call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PublishReport {
    /// Subscribers the frame was queued for.
    pub delivered: usize,
    /// Subscribers dropped because delivery failed.
    pub dropped: usize,
}

/// Broadcast counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BroadcastStats {
    pub publishes: u64,
    pub frames_delivered: u64,
    pub subscribers_dropped: u64,
    pub subscribers: usize,
}

/// A new subscriber's registration plus the receiving end of its queue.
#[derive(Debug)]
pub struct Subscription {
    pub token: RegistrationToken,
    pub receiver: mpsc::Receiver<Frame>,
}

/// Delivers history snapshots to every registered subscriber.
pub struct Broadcaster {
    history: Arc<SharedHistory>,
    registry: Arc<SubscriberRegistry>,
    queue_depth: usize,
    /// Serializes publish and register.
    gate: Mutex<()>,
    publishes: AtomicU64,
    frames_delivered: AtomicU64,
    subscribers_dropped: AtomicU64,
}

impl Broadcaster {
    /// Create a broadcaster with its own empty registry.
    pub fn new(history: Arc<SharedHistory>, queue_depth: usize) -> Self {
        Self::with_registry(history, Arc::new(SubscriberRegistry::new()), queue_depth)
    }

    /// Create a broadcaster over an existing registry.
    pub fn with_registry(
        history: Arc<SharedHistory>,
        registry: Arc<SubscriberRegistry>,
        queue_depth: usize,
    ) -> Self {
        Self {
            history,
            registry,
            queue_depth: queue_depth.max(1),
            gate: Mutex::new(()),
            publishes: AtomicU64::new(0),
            frames_delivered: AtomicU64::new(0),
            subscribers_dropped: AtomicU64::new(0),
        }
    }

    /// Open a bounded queue for a new connection and register it.
    ///
    /// The first frame on the returned receiver is the current history.
    pub fn subscribe(
        &self,
        label: impl Into<String>,
    ) -> Result<Subscription, SubscriberDeliveryError> {
        let (tx, receiver) = mpsc::channel(self.queue_depth);
        let token = self.register(Subscriber::new(label, tx))?;
        Ok(Subscription { token, receiver })
    }

    /// Register a subscriber, sending it the current history first.
    pub fn register(
        &self,
        subscriber: Subscriber,
    ) -> Result<RegistrationToken, SubscriberDeliveryError> {
        let _gate = self.gate.lock();
        let initial = match self.history.snapshot().to_frame() {
            Ok(frame) => frame,
            Err(e) => {
                error!("Failed to encode initial snapshot: {}", e);
                return Err(SubscriberDeliveryError::Encode(e.to_string()));
            }
        };
        self.registry.register(subscriber, &initial)
    }

    /// Remove a subscriber; safe while a publish is running.
    pub fn deregister(&self, token: RegistrationToken) -> bool {
        self.registry.deregister(token)
    }

    /// Deliver `snapshot` to every registered subscriber.
    pub fn publish(&self, snapshot: &BroadcastPayload) -> PublishReport {
        let frame = match snapshot.to_frame() {
            Ok(frame) => frame,
            Err(e) => {
                error!("Failed to encode broadcast payload: {}", e);
                return PublishReport::default();
            }
        };
        self.publish_frame(&frame)
    }

    /// Deliver an already encoded frame.
    pub fn publish_frame(&self, frame: &Frame) -> PublishReport {
        let _gate = self.gate.lock();
        let mut report = PublishReport::default();

        for (token, subscriber) in self.registry.targets() {
            match subscriber.try_deliver(frame) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    match e {
                        SubscriberDeliveryError::QueueFull => warn!(
                            "Dropping slow subscriber '{}' ({}): {}",
                            subscriber.label(),
                            token,
                            e
                        ),
                        SubscriberDeliveryError::Disconnected
                        | SubscriberDeliveryError::Encode(_) => debug!(
                            "Subscriber '{}' ({}) went away: {}",
                            subscriber.label(),
                            token,
                            e
                        ),
                    }
                    if self.registry.deregister(token) {
                        report.dropped += 1;
                    }
                }
            }
        }

        self.publishes.fetch_add(1, Ordering::Relaxed);
        self.frames_delivered
            .fetch_add(report.delivered as u64, Ordering::Relaxed);
        self.subscribers_dropped
            .fetch_add(report.dropped as u64, Ordering::Relaxed);
        report
    }

    pub fn subscriber_count(&self) -> usize {
        self.registry.len()
    }

    pub fn registry(&self) -> &Arc<SubscriberRegistry> {
        &self.registry
    }

    pub fn history(&self) -> &Arc<SharedHistory> {
        &self.history
    }

    /// Snapshot of the broadcast counters.
    pub fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            publishes: self.publishes.load(Ordering::Relaxed),
            frames_delivered: self.frames_delivered.load(Ordering::Relaxed),
            subscribers_dropped: self.subscribers_dropped.load(Ordering::Relaxed),
            subscribers: self.registry.len(),
        }
    }
}
