// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Internal metrics emitted by the forwarder itself.
//!
//! Emission is fire-and-forget: sinks swallow their own failures so the
//! ingestion path never waits on or fails because of a metric.

use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::ForwarderConfig;

pub const METRIC_PREFIX: &str = "aws.dd_forwarder";

pub const S3_CACHE_FETCH_FAILURE: &str = "s3_cache_fetch_failure";
pub const S3_CACHE_EXPIRED: &str = "s3_cache_expired";
pub const S3_CACHE_LOCK_ACQUIRED: &str = "s3_cache_lock_acquired";
pub const S3_CACHE_LOCK_RELEASED: &str = "s3_cache_lock_released";
pub const S3_CACHE_LOCK_RELEASE_FAILURE: &str = "s3_cache_lock_release_failure";
pub const S3_CACHE_WRITE_FAILURE: &str = "s3_cache_write_failure";
pub const TAGS_FETCH_FAILURE: &str = "tags_fetch_failure";

pub trait MetricsSink: Send + Sync {
    /// Counts one occurrence of `name`. Must not block or panic.
    fn increment(&self, name: &str, tags: &[String]);
}

/// Drops every metric.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetricsSink;

impl MetricsSink for NoopMetricsSink {
    fn increment(&self, _name: &str, _tags: &[String]) {}
}

/// Sends counters to a DogStatsD listener over UDP.
#[derive(Debug)]
pub struct DogStatsDSink {
    socket: UdpSocket,
    target: SocketAddr,
}

impl DogStatsDSink {
    pub fn new(target: SocketAddr) -> std::io::Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.set_nonblocking(true)?;
        Ok(Self { socket, target })
    }
}

impl MetricsSink for DogStatsDSink {
    fn increment(&self, name: &str, tags: &[String]) {
        let payload = format_counter(name, tags);
        if let Err(e) = self.socket.send_to(payload.as_bytes(), self.target) {
            debug!("Failed to send internal metric {name}: {e}");
        }
    }
}

/// DogStatsD sink on the configured port, or a no-op sink when the socket
/// cannot be opened.
#[must_use]
pub fn metrics_sink(config: &ForwarderConfig) -> Arc<dyn MetricsSink> {
    let target = config.dogstatsd_addr();
    match DogStatsDSink::new(target) {
        Ok(sink) => Arc::new(sink),
        Err(e) => {
            warn!("Internal metrics disabled, cannot open socket for {target}: {e}");
            Arc::new(NoopMetricsSink)
        }
    }
}

/// `aws.dd_forwarder.<name>:1|c|#tag1,tag2`
#[must_use]
pub fn format_counter(name: &str, tags: &[String]) -> String {
    if tags.is_empty() {
        format!("{METRIC_PREFIX}.{name}:1|c")
    } else {
        format!("{METRIC_PREFIX}.{name}:1|c|#{}", tags.join(","))
    }
}
