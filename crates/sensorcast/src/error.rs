// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Pipeline error types.
//!
//! Store and configuration errors live next to their modules
//! (`store::StoreError`, `config::ConfigError`).

use crate::store::StoreError;
use thiserror::Error;

/// Malformed ingestion payload, rejected at the boundary.
#[derive(Debug, Error, PartialEq)]
pub enum InputValidationError {
    #[error("missing field '{0}'")]
    MissingField(&'static str),

    #[error("field '{field}' must be a finite number")]
    NotANumber { field: &'static str },

    #[error("payload must be a JSON object")]
    NotAnObject,

    #[error("ingest queue is full")]
    QueueFull,

    #[error("ingestion is not enabled")]
    Disabled,
}

/// Delivery to one subscriber failed; that subscriber is dropped.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SubscriberDeliveryError {
    #[error("outbound queue full")]
    QueueFull,

    #[error("subscriber disconnected")]
    Disconnected,

    #[error("failed to encode snapshot: {0}")]
    Encode(String),
}

/// The store bucket could not be ensured at startup.
#[derive(Debug, Error)]
#[error("failed to provision bucket '{bucket}': {source}")]
pub struct ProvisioningError {
    pub bucket: String,
    #[source]
    pub source: StoreError,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delivery_errors_name_their_cause() {
        let encode = SubscriberDeliveryError::Encode("key must be a string".into());
        assert_ne!(encode, SubscriberDeliveryError::Disconnected);
        assert_eq!(
            encode.to_string(),
            "failed to encode snapshot: key must be a string"
        );
        assert_eq!(
            SubscriberDeliveryError::Disconnected.to_string(),
            "subscriber disconnected"
        );
    }
}
