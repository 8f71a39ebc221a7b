// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The record shape handed to the outbound transport.

use serde::{Serialize, Serializer};
use serde_json::{Map, Value};

/// Per-payload attributes shared by every record built from it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata {
    pub source: String,
    pub tags: Vec<String>,
    pub host: Option<String>,
    pub service: Option<String>,
}

impl Metadata {
    #[must_use]
    pub fn new(source: &str, tags: Vec<String>) -> Self {
        Self {
            source: source.to_string(),
            tags,
            host: None,
            service: None,
        }
    }

    /// Appends tags after the existing ones.
    pub fn extend_tags<I>(&mut self, tags: I)
    where
        I: IntoIterator<Item = String>,
    {
        self.tags.extend(tags);
    }

    #[must_use]
    pub fn has_tag_key(&self, key: &str) -> bool {
        self.tags
            .iter()
            .any(|tag| crate::tags::tag_key(tag) == key)
    }
}

/// One log record ready for the intake.
///
/// Serialises as `{"message", "ddsource", "ddtags", "host", "service", ...attributes}`
/// with `ddtags` as a comma separated string.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogRecord {
    pub message: Value,
    #[serde(rename = "ddsource")]
    pub source: String,
    #[serde(rename = "ddtags", serialize_with = "serialize_tags")]
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    pub service: String,
    #[serde(flatten)]
    pub attributes: Map<String, Value>,
}

impl LogRecord {
    /// Builds a record from the payload metadata. The service falls back to
    /// the source when no `service:` tag was found.
    #[must_use]
    pub fn new(metadata: &Metadata, message: Value, attributes: Map<String, Value>) -> Self {
        Self {
            message,
            source: metadata.source.clone(),
            tags: metadata.tags.clone(),
            host: metadata.host.clone(),
            service: metadata
                .service
                .clone()
                .unwrap_or_else(|| metadata.source.clone()),
            attributes,
        }
    }
}

fn serialize_tags<S>(tags: &[String], serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&tags.join(","))
}

/// Parses a message that may be JSON; anything else stays a string.
#[must_use]
pub fn parse_message(text: &str) -> Value {
    let trimmed = text.trim_start();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        if let Ok(value) = serde_json::from_str::<Value>(text) {
            return value;
        }
    }
    Value::String(text.to_string())
}
