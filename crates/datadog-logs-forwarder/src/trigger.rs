// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Delivery payload shapes accepted by the forwarder.
//!
//! A [`TriggerEnvelope`] is built once per invocation from the raw JSON the
//! platform hands us. Subscription pushes are decoded (base64) and
//! decompressed (gzip) exactly once here, so the handlers only ever see
//! structured data.

use base64::Engine;
use percent_encoding::percent_decode_str;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::error::ForwarderError;
use crate::extractor::decompress;

/// A single event of a CloudWatch Logs subscription push.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LogEvent {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default)]
    pub message: String,
}

/// Decoded body of a CloudWatch Logs subscription push.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AwsLogs {
    #[serde(default)]
    pub owner: String,
    #[serde(default)]
    pub log_group: String,
    #[serde(default)]
    pub log_stream: String,
    #[serde(default)]
    pub log_events: Vec<LogEvent>,
}

/// Location of an object referenced by an S3 notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectLocation {
    pub bucket: String,
    pub key: String,
}

/// A message delivered through an SNS topic subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicMessage {
    pub topic_arn: Option<String>,
    pub subject: Option<String>,
    pub message: String,
}

/// The shapes of invocation payload the forwarder understands.
#[derive(Debug, Clone, PartialEq)]
pub enum TriggerEnvelope {
    /// CloudWatch Logs subscription filter push (`{"awslogs": {"data": ...}}`).
    SubscriptionPush(AwsLogs),
    /// S3 object-created notification.
    ObjectNotification(ObjectLocation),
    /// SNS notification that does not wrap an S3 notification.
    TopicNotification(Vec<TopicMessage>),
    /// EventBridge event (`{"detail": ...}`), e.g. Security Hub findings.
    Event(Value),
}

impl TriggerEnvelope {
    /// Builds an envelope from the raw invocation payload.
    ///
    /// Returns [`ForwarderError::UnsupportedTrigger`] when the payload matches
    /// none of the known delivery shapes.
    pub fn from_value(event: &Value) -> Result<Self, ForwarderError> {
        if let Some(data) = event.pointer("/awslogs/data").and_then(Value::as_str) {
            return Ok(TriggerEnvelope::SubscriptionPush(decode_awslogs(data)?));
        }

        if let Some(record) = event
            .get("Records")
            .and_then(Value::as_array)
            .and_then(|records| records.first())
        {
            if record.get("s3").is_some() {
                return object_location(record).map(TriggerEnvelope::ObjectNotification);
            }
            if record.get("Sns").is_some() {
                return Ok(topic_envelope(event));
            }
        }

        if event.get("detail").is_some() {
            return Ok(TriggerEnvelope::Event(event.clone()));
        }

        Err(ForwarderError::UnsupportedTrigger(
            "payload is neither an awslogs push, an S3/SNS notification nor an event".to_string(),
        ))
    }
}

/// Decodes `base64(gzip(json))` subscription data.
pub fn decode_awslogs(data: &str) -> Result<AwsLogs, ForwarderError> {
    let compressed = base64::engine::general_purpose::STANDARD.decode(data.trim())?;
    let decompressed = decompress(&compressed)?;
    Ok(serde_json::from_slice(&decompressed)?)
}

fn object_location(record: &Value) -> Result<ObjectLocation, ForwarderError> {
    let bucket = record.pointer("/s3/bucket/name").and_then(Value::as_str);
    let key = record.pointer("/s3/object/key").and_then(Value::as_str);
    match (bucket, key) {
        (Some(bucket), Some(key)) => Ok(ObjectLocation {
            bucket: bucket.to_string(),
            key: unquote_plus(key),
        }),
        _ => Err(ForwarderError::UnsupportedTrigger(
            "S3 notification without bucket name or object key".to_string(),
        )),
    }
}

fn topic_envelope(event: &Value) -> TriggerEnvelope {
    let records = event
        .get("Records")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let messages: Vec<TopicMessage> = records
        .iter()
        .filter_map(|record| record.get("Sns"))
        .map(|sns| TopicMessage {
            topic_arn: sns.get("TopicArn").and_then(Value::as_str).map(String::from),
            subject: sns.get("Subject").and_then(Value::as_str).map(String::from),
            message: sns
                .get("Message")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        })
        .collect();

    // An S3 notification relayed through SNS is handled as if S3 invoked us.
    if let Some(first) = messages.first() {
        if let Ok(inner) = serde_json::from_str::<Value>(&first.message) {
            if let Some(record) = inner
                .get("Records")
                .and_then(Value::as_array)
                .and_then(|records| records.first())
            {
                if record.get("s3").is_some() {
                    if let Ok(location) = object_location(record) {
                        debug!("Unwrapped S3 notification from SNS message");
                        return TriggerEnvelope::ObjectNotification(location);
                    }
                }
            }
        }
    }

    TriggerEnvelope::TopicNotification(messages)
}

/// Decodes an S3 object key as delivered in notifications
/// (`+` for spaces, `%XX` escapes). Invalid escapes are kept verbatim.
pub fn unquote_plus(key: &str) -> String {
    percent_decode_str(&key.replace('+', " "))
        .decode_utf8_lossy()
        .into_owned()
}

/// Identity of the running forwarder, derived from its own function ARN.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ForwarderContext {
    pub invoked_function_arn: Option<String>,
}

impl ForwarderContext {
    #[must_use]
    pub fn new(invoked_function_arn: &str) -> Self {
        Self {
            invoked_function_arn: Some(invoked_function_arn.to_string()),
        }
    }

    fn arn_part(&self, index: usize) -> Option<&str> {
        let arn = self.invoked_function_arn.as_deref()?;
        let parts: Vec<&str> = arn.split(':').collect();
        if parts.len() < 7 {
            return None;
        }
        parts.get(index).copied().filter(|part| !part.is_empty())
    }

    #[must_use]
    pub fn partition(&self) -> Option<&str> {
        self.arn_part(1)
    }

    #[must_use]
    pub fn region(&self) -> Option<&str> {
        self.arn_part(3)
    }

    #[must_use]
    pub fn account_id(&self) -> Option<&str> {
        self.arn_part(4)
    }

    /// Name of the forwarder function itself.
    #[must_use]
    pub fn function_name(&self) -> Option<&str> {
        self.arn_part(6)
    }

    /// Rebuilds the lower-cased ARN of another Lambda function living in the
    /// same account and region as the forwarder.
    #[must_use]
    pub fn lambda_function_arn(&self, function_name: &str) -> Option<String> {
        let arn = self.invoked_function_arn.as_deref()?;
        let (prefix, _) = arn.split_once("function:")?;
        Some(format!("{prefix}function:{}", function_name.to_lowercase()))
    }
}
