// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! # Datadog Logs Forwarder
//!
//! Ingestion core of the serverless log forwarder: turns CloudWatch Logs
//! subscription pushes, S3 object notifications, SNS messages and
//! EventBridge events into tagged [`record::LogRecord`]s.
//!
//! ## Pipeline
//!
//! - [`trigger`]: decodes the invocation payload into a `TriggerEnvelope`
//! - [`sources`]: classifies the originating service from the log group or object key
//! - [`extractor`]: decompresses objects and splits them into structured lines
//! - [`reshapers`]: source specific payload transforms (WAF, Security Hub, Step Functions, Lambda)
//! - [`arn`]: rebuilds the ARN of the resource that wrote an object
//! - [`cache`]: lock protected resource tags cache shared across invocations
//! - [`handlers`]: the per invocation orchestrators
//!
//! The outbound transport, the tagging API clients and the object store
//! client live behind the [`cache::store::ObjectStore`],
//! [`cache::fetcher::TagFetcher`] and [`metrics::MetricsSink`] seams.

#![deny(clippy::all)]
#![deny(clippy::unwrap_used)]
#![deny(unused_extern_crates)]
#![deny(unused_allocation)]
#![deny(unused_assignments)]
#![deny(unused_comparisons)]

pub mod arn;
pub mod cache;
pub mod config;
pub mod error;
pub mod extractor;
pub mod handlers;
pub mod logger;
pub mod metrics;
pub mod record;
pub mod reshapers;
pub mod sources;
pub mod tags;
pub mod trigger;
