// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

/// Errors surfaced by the forwarder entry points.
///
/// Malformed log content never reaches this type: it is passed through or
/// dropped by the component that sees it. These variants are reserved for
/// payloads the forwarder cannot be wired to at all.
#[derive(Debug, thiserror::Error)]
pub enum ForwarderError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Unsupported trigger: {0}")]
    UnsupportedTrigger(String),

    #[error("Failed to decode payload: {0}")]
    Decode(#[from] base64::DecodeError),

    #[error("Failed to decompress payload: {0}")]
    Decompress(#[from] std::io::Error),

    #[error("Invalid payload: {0}")]
    InvalidPayload(#[from] serde_json::Error),

    #[error("Failed to fetch object s3://{bucket}/{key}: {source}")]
    ObjectFetch {
        bucket: String,
        key: String,
        #[source]
        source: StoreError,
    },

    #[error("Object s3://{bucket}/{key} not found")]
    ObjectNotFound { bucket: String, key: String },
}

/// Errors returned by an [`crate::cache::store::ObjectStore`] backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("object store backend error: {0}")]
    Backend(String),

    #[error("object store serialization error: {0}")]
    Serialization(String),
}

/// Errors returned by a [`crate::cache::fetcher::TagFetcher`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("tag lookup failed: {0}")]
    Api(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}
