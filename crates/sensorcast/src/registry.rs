// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Live subscriber set.
//!
//! The registry is the single source of truth for who receives the next
//! broadcast. Broadcasts iterate over a copy taken by [`SubscriberRegistry::targets`],
//! so registrations and removals never race with an in-flight delivery.

use crate::error::SubscriberDeliveryError;
use dashmap::DashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::debug;

/// One encoded broadcast payload, shared by every subscriber queue.
pub type Frame = Arc<str>;

/// Token returned by `register`, used to deregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegistrationToken(u64);

impl RegistrationToken {
    pub fn id(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for RegistrationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub#{}", self.0)
    }
}

/// Handle to a live connection's outbound path.
#[derive(Debug, Clone)]
pub struct Subscriber {
    label: String,
    tx: mpsc::Sender<Frame>,
}

impl Subscriber {
    /// Wrap the sending half of a subscriber's bounded queue.
    pub fn new(label: impl Into<String>, tx: mpsc::Sender<Frame>) -> Self {
        Self {
            label: label.into(),
            tx,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Queue a frame without waiting.
    pub fn try_deliver(&self, frame: &Frame) -> Result<(), SubscriberDeliveryError> {
        self.tx.try_send(frame.clone()).map_err(|e| match e {
            TrySendError::Full(_) => SubscriberDeliveryError::QueueFull,
            TrySendError::Closed(_) => SubscriberDeliveryError::Disconnected,
        })
    }
}

/// Concurrency-safe set of subscribers.
#[derive(Debug, Default)]
pub struct SubscriberRegistry {
    subscribers: DashMap<RegistrationToken, Subscriber>,
    next_id: AtomicU64,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Send `initial` to the subscriber, then add it to the live set.
    ///
    /// A subscriber whose queue cannot take the initial frame is not
    /// registered.
    pub fn register(
        &self,
        subscriber: Subscriber,
        initial: &Frame,
    ) -> Result<RegistrationToken, SubscriberDeliveryError> {
        subscriber.try_deliver(initial)?;

        let token = RegistrationToken(self.next_id.fetch_add(1, Ordering::Relaxed));
        debug!("Registered subscriber '{}' as {}", subscriber.label(), token);
        self.subscribers.insert(token, subscriber);
        Ok(token)
    }

    /// Remove a subscriber. Returns `false` if it was already gone.
    pub fn deregister(&self, token: RegistrationToken) -> bool {
        match self.subscribers.remove(&token) {
            Some((_, sub)) => {
                debug!("Deregistered subscriber '{}' ({})", sub.label(), token);
                true
            }
            None => false,
        }
    }

    /// Copy of the current set for one broadcast pass.
    pub fn targets(&self) -> Vec<(RegistrationToken, Subscriber)> {
        self.subscribers
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect()
    }

    pub fn contains(&self, token: RegistrationToken) -> bool {
        self.subscribers.contains_key(&token)
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(s: &str) -> Frame {
        Frame::from(s)
    }

    #[test]
    fn test_register_sends_initial_frame_first() {
        let registry = SubscriberRegistry::new();
        let (tx, mut rx) = mpsc::channel(4);

        let token = registry
            .register(Subscriber::new("a", tx), &frame("initial"))
            .unwrap();

        assert!(registry.contains(token));
        assert_eq!(&*rx.try_recv().unwrap(), "initial");
    }

    #[test]
    fn test_register_rejects_closed_subscriber() {
        let registry = SubscriberRegistry::new();
        let (tx, rx) = mpsc::channel(4);
        drop(rx);

        let result = registry.register(Subscriber::new("gone", tx), &frame("x"));
        assert_eq!(result, Err(SubscriberDeliveryError::Disconnected));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_deregister_is_idempotent() {
        let registry = SubscriberRegistry::new();
        let (tx, _rx) = mpsc::channel(4);
        let token = registry.register(Subscriber::new("a", tx), &frame("x")).unwrap();

        assert!(registry.deregister(token));
        assert!(!registry.deregister(token));
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn test_targets_is_a_copy() {
        let registry = SubscriberRegistry::new();
        let mut receivers = Vec::new();
        let mut tokens = Vec::new();
        for i in 0..3 {
            let (tx, rx) = mpsc::channel(4);
            receivers.push(rx);
            tokens.push(
                registry
                    .register(Subscriber::new(format!("s{}", i), tx), &frame("x"))
                    .unwrap(),
            );
        }

        let targets = registry.targets();
        registry.deregister(tokens[1]);

        assert_eq!(targets.len(), 3);
        assert_eq!(registry.len(), 2);
        for (_, sub) in &targets {
            assert!(sub.try_deliver(&frame("y")).is_ok());
        }
    }

    #[test]
    fn test_try_deliver_reports_full_queue() {
        let (tx, _rx) = mpsc::channel(1);
        let sub = Subscriber::new("slow", tx);

        assert!(sub.try_deliver(&frame("1")).is_ok());
        assert_eq!(
            sub.try_deliver(&frame("2")),
            Err(SubscriberDeliveryError::QueueFull)
        );
    }

    #[test]
    fn test_tokens_are_unique() {
        let registry = SubscriberRegistry::new();
        let (tx, _rx) = mpsc::channel(8);
        let a = registry
            .register(Subscriber::new("a", tx.clone()), &frame("x"))
            .unwrap();
        let b = registry.register(Subscriber::new("b", tx), &frame("x")).unwrap();
        assert_ne!(a, b);
        assert_eq!(a.to_string(), format!("sub#{}", a.id()));
    }
}
