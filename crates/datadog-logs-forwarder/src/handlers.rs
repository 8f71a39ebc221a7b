// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Per invocation entry points.
//!
//! A [`Forwarder`] wires classification, extraction, reshaping and tag
//! enrichment together. Tags are resolved once per payload before any record
//! is produced; records are then built lazily, one per structured line (or
//! per exploded sub-record), in payload order.

use std::collections::VecDeque;
use std::sync::Arc;

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::arn::parse_service_arn;
use crate::cache::fetcher::{StaticTagFetcher, TagFetcher};
use crate::cache::store::ObjectStore;
use crate::cache::{CacheType, TagsCache, TagsCacheConfig};
use crate::config::ForwarderConfig;
use crate::error::ForwarderError;
use crate::extractor::{extract_lines, StructuredLines};
use crate::metrics::{metrics_sink, MetricsSink};
use crate::record::{parse_message, LogRecord, Metadata};
use crate::reshapers::{
    get_lower_cased_lambda_function_name, get_state_machine_arn, get_state_machine_host,
    Reshaper,
};
use crate::sources::{
    find_eks_source, find_s3_source_for_object, parse_event_source, TriggerKind,
    DEFAULT_CLOUDWATCH_SOURCE,
};
use crate::tags::get_service_from_tags_and_remove_duplicates;
use crate::trigger::{AwsLogs, ForwarderContext, LogEvent, ObjectLocation, TopicMessage, TriggerEnvelope};

/// Tag lookup clients, one per cache type.
pub struct TagFetchers {
    pub lambda: Arc<dyn TagFetcher>,
    pub log_group: Arc<dyn TagFetcher>,
    pub step_functions: Arc<dyn TagFetcher>,
}

impl Default for TagFetchers {
    fn default() -> Self {
        let empty: Arc<dyn TagFetcher> = Arc::new(StaticTagFetcher::default());
        Self {
            lambda: Arc::clone(&empty),
            log_group: Arc::clone(&empty),
            step_functions: empty,
        }
    }
}

pub struct Forwarder {
    config: ForwarderConfig,
    context: ForwarderContext,
    store: Arc<dyn ObjectStore>,
    multiline: Option<Regex>,
    lambda_tags: TagsCache,
    log_group_tags: TagsCache,
    step_functions_tags: TagsCache,
}

fn cache_config(config: &ForwarderConfig, context: &ForwarderContext, enabled: bool) -> TagsCacheConfig {
    let (bucket, account, region) = match (&config.cache_bucket, context.account_id(), context.region()) {
        (Some(bucket), Some(account), Some(region)) => {
            (bucket.clone(), account.to_string(), region.to_string())
        }
        _ => {
            return TagsCacheConfig {
                enabled: false,
                bucket: String::new(),
                dirname: config.cache_dirname.clone(),
                account: String::new(),
                region: String::new(),
                ttl: config.tags_cache_ttl,
                lock: config.lock_options(),
            };
        }
    };

    TagsCacheConfig {
        enabled,
        bucket,
        dirname: config.cache_dirname.clone(),
        account,
        region,
        ttl: config.tags_cache_ttl,
        lock: config.lock_options(),
    }
}

lazy_static! {
    /// `/aws/rds/<kind>/<instance>/<log name>`
    static ref RDS_LOG_GROUP_REGEX: Regex =
        Regex::new(r"^/aws/rds/.*/(?P<host>[^/]+)/(?P<name>[^/]+)$").expect("failed creating regex");
}

/// EventBridge `source` such as `aws.securityhub` becomes `securityhub`.
fn event_source(event: &Value) -> String {
    event
        .get("source")
        .and_then(Value::as_str)
        .and_then(|source| source.split('.').nth(1))
        .filter(|service| !service.is_empty())
        .unwrap_or(DEFAULT_CLOUDWATCH_SOURCE)
        .to_string()
}

impl Forwarder {
    pub fn new(
        config: ForwarderConfig,
        context: ForwarderContext,
        store: Arc<dyn ObjectStore>,
        fetchers: TagFetchers,
        metrics: Arc<dyn MetricsSink>,
    ) -> Result<Self, ForwarderError> {
        config.validate()?;
        let multiline = config.multiline_regex()?;
        if config.fetches_tags()
            && (config.cache_bucket.is_none()
                || context.account_id().is_none()
                || context.region().is_none())
        {
            warn!("Tags cache disabled: no cache bucket or unknown forwarder account/region");
        }

        let cache = |cache_type, enabled, fetcher| {
            TagsCache::new(
                cache_type,
                cache_config(&config, &context, enabled),
                Arc::clone(&store),
                fetcher,
                Arc::clone(&metrics),
            )
        };
        let lambda_tags = cache(CacheType::Lambda, config.fetch_lambda_tags, fetchers.lambda);
        let log_group_tags = cache(
            CacheType::LogGroup,
            config.fetch_log_group_tags,
            fetchers.log_group,
        );
        let step_functions_tags = cache(
            CacheType::StepFunctions,
            config.fetch_step_functions_tags,
            fetchers.step_functions,
        );

        Ok(Self {
            config,
            context,
            store,
            multiline,
            lambda_tags,
            log_group_tags,
            step_functions_tags,
        })
    }

    /// Like [`Forwarder::new`], reporting internal metrics to the DogStatsD
    /// port of `config`.
    pub fn from_config(
        config: ForwarderConfig,
        context: ForwarderContext,
        store: Arc<dyn ObjectStore>,
        fetchers: TagFetchers,
    ) -> Result<Self, ForwarderError> {
        let metrics = metrics_sink(&config);
        Self::new(config, context, store, fetchers, metrics)
    }

    /// Dispatches a raw invocation payload to the matching handler.
    pub async fn handle(&self, event: &Value) -> Result<Records, ForwarderError> {
        match TriggerEnvelope::from_value(event)? {
            TriggerEnvelope::SubscriptionPush(logs) => {
                Ok(Records::AwsLogs(self.awslogs_handler(logs).await))
            }
            TriggerEnvelope::ObjectNotification(location) => {
                Ok(Records::S3(self.s3_handler(&location).await?))
            }
            TriggerEnvelope::TopicNotification(messages) => {
                Ok(Records::Batch(self.sns_handler(messages).into_iter()))
            }
            TriggerEnvelope::Event(event) => {
                Ok(Records::Batch(self.events_handler(event).into_iter()))
            }
        }
    }

    fn base_tags(&self) -> Vec<String> {
        let mut tags = Vec::with_capacity(self.config.custom_tags.len() + 2);
        if let Some(name) = self.context.function_name() {
            tags.push(format!("forwardername:{}", name.to_lowercase()));
        }
        tags.push(format!("forwarder_version:{}", env!("CARGO_PKG_VERSION")));
        tags.extend(self.config.custom_tags.iter().cloned());
        tags
    }

    fn finalize(&self, metadata: &mut Metadata) {
        if let Some(source) = &self.config.source_override {
            metadata.source.clone_from(source);
        }
        let service = get_service_from_tags_and_remove_duplicates(metadata);
        metadata.service = Some(service);
    }

    /// Handles a CloudWatch Logs subscription push.
    pub async fn awslogs_handler(&self, logs: AwsLogs) -> AwsLogsRecords {
        let source = parse_event_source(TriggerKind::SubscriptionPush, &logs.log_group);
        let mut metadata = Metadata::new(source, self.base_tags());
        let mut attributes = Map::new();
        attributes.insert(
            "aws".to_string(),
            json!({"awslogs": {
                "logGroup": logs.log_group,
                "logStream": logs.log_stream,
                "owner": logs.owner,
            }}),
        );

        match source {
            "eks" => {
                if let Some(eks_source) = find_eks_source(&logs.log_stream) {
                    metadata.source = eks_source.to_string();
                }
            }
            "appsync" => {
                metadata.host = logs.log_group.rsplit('/').next().map(String::from);
            }
            "stepfunction" => self.enrich_step_functions(&logs, &mut metadata).await,
            "rds" | "mysql" | "mariadb" | "postgresql" => {
                if let Some(captures) = RDS_LOG_GROUP_REGEX.captures(&logs.log_group) {
                    metadata.host = Some(captures["host"].to_string());
                    metadata.tags.push(format!("logname:{}", &captures["name"]));
                }
            }
            _ => {}
        }

        self.enrich_log_group(&logs.log_group, &mut metadata).await;

        // env:none only fills an env tag no earlier step set
        if source == "lambda" || source == DEFAULT_CLOUDWATCH_SOURCE {
            if let Some(function_name) = get_lower_cased_lambda_function_name(&logs) {
                self.enrich_lambda(&function_name, &mut metadata, &mut attributes)
                    .await;
            }
        }

        if metadata.host.is_none() {
            metadata.host = Some(logs.log_group.clone());
        }
        self.finalize(&mut metadata);

        debug!(
            "Forwarding {} events from log group {} as {}",
            logs.log_events.len(),
            logs.log_group,
            metadata.source
        );
        AwsLogsRecords {
            metadata,
            attributes,
            events: logs.log_events.into_iter(),
        }
    }

    async fn enrich_lambda(
        &self,
        function_name: &str,
        metadata: &mut Metadata,
        attributes: &mut Map<String, Value>,
    ) {
        metadata.source = "lambda".to_string();
        metadata.tags.push(format!("functionname:{function_name}"));

        if let Some(arn) = self.context.lambda_function_arn(function_name) {
            attributes.insert("lambda".to_string(), json!({"arn": arn}));
            metadata.extend_tags(self.lambda_tags.get(&arn).await);
            metadata.host = Some(arn);
        }

        if !metadata.has_tag_key("env") {
            metadata.tags.push("env:none".to_string());
        }
    }

    async fn enrich_step_functions(&self, logs: &AwsLogs, metadata: &mut Metadata) {
        let Some(first) = logs.log_events.first() else {
            return;
        };
        let Ok(message) = serde_json::from_str::<Value>(&first.message) else {
            debug!("Step Functions log message is not JSON, skipping state machine enrichment");
            return;
        };

        if let Some(host) = get_state_machine_host(&message) {
            metadata.host = Some(host);
        }
        let state_machine_arn = get_state_machine_arn(&message);
        if !state_machine_arn.is_empty() {
            metadata.extend_tags(self.step_functions_tags.get(&state_machine_arn).await);
        }
    }

    async fn enrich_log_group(&self, log_group: &str, metadata: &mut Metadata) {
        let (Some(partition), Some(region), Some(account)) = (
            self.context.partition(),
            self.context.region(),
            self.context.account_id(),
        ) else {
            return;
        };
        let log_group_arn = format!("arn:{partition}:logs:{region}:{account}:log-group:{log_group}");
        metadata.extend_tags(self.log_group_tags.get(&log_group_arn).await);
    }

    /// Handles an S3 object-created notification.
    ///
    /// A missing or unreadable object is an error; malformed lines inside the
    /// object are passed through.
    pub async fn s3_handler(&self, location: &ObjectLocation) -> Result<S3Records, ForwarderError> {
        let ObjectLocation { bucket, key } = location;
        let object = self
            .store
            .get(bucket, key)
            .await
            .map_err(|source| ForwarderError::ObjectFetch {
                bucket: bucket.clone(),
                key: key.clone(),
                source,
            })?
            .ok_or_else(|| ForwarderError::ObjectNotFound {
                bucket: bucket.clone(),
                key: key.clone(),
            })?;

        let source = find_s3_source_for_object(bucket, key);
        let mut metadata = Metadata::new(source, self.base_tags());
        metadata.host = parse_service_arn(source, key, Some(bucket), &self.context);
        let lines = extract_lines(&object.body, bucket, key, source, self.multiline.as_ref())?;
        self.finalize(&mut metadata);

        let mut attributes = Map::new();
        attributes.insert(
            "aws".to_string(),
            json!({"s3": {"bucket": bucket, "key": key}}),
        );

        Ok(S3Records {
            metadata,
            attributes,
            reshaper: Reshaper::for_source(source),
            lines,
            pending: VecDeque::new(),
        })
    }

    /// Handles an EventBridge event. Security Hub events are split per
    /// finding resource; an event without findings yields nothing.
    #[must_use]
    pub fn events_handler(&self, event: Value) -> Vec<LogRecord> {
        let source = event_source(&event);
        let reshaper = Reshaper::for_source(&source);
        let mut metadata = Metadata::new(&source, self.base_tags());
        self.finalize(&mut metadata);

        let Some(messages) = reshaper.apply(event) else {
            debug!("Event from {source} carries no findings, nothing to forward");
            return Vec::new();
        };
        messages
            .into_iter()
            .map(|message| LogRecord::new(&metadata, message, Map::new()))
            .collect()
    }

    /// Handles SNS notifications that do not wrap an S3 notification.
    #[must_use]
    pub fn sns_handler(&self, messages: Vec<TopicMessage>) -> Vec<LogRecord> {
        let mut metadata = Metadata::new("sns", self.base_tags());
        self.finalize(&mut metadata);

        messages
            .into_iter()
            .map(|topic_message| {
                let mut sns = Map::new();
                if let Some(topic_arn) = topic_message.topic_arn {
                    sns.insert("topic_arn".to_string(), Value::String(topic_arn));
                }
                if let Some(subject) = topic_message.subject {
                    sns.insert("subject".to_string(), Value::String(subject));
                }
                let mut attributes = Map::new();
                attributes.insert("aws".to_string(), json!({ "sns": sns }));
                LogRecord::new(&metadata, parse_message(&topic_message.message), attributes)
            })
            .collect()
    }
}

/// Records of one subscription push, in event order.
#[derive(Debug)]
pub struct AwsLogsRecords {
    metadata: Metadata,
    attributes: Map<String, Value>,
    events: std::vec::IntoIter<LogEvent>,
}

impl AwsLogsRecords {
    #[must_use]
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }
}

impl Iterator for AwsLogsRecords {
    type Item = LogRecord;

    fn next(&mut self) -> Option<LogRecord> {
        let event = self.events.next()?;
        let mut attributes = self.attributes.clone();
        attributes.insert("id".to_string(), Value::String(event.id));
        attributes.insert("timestamp".to_string(), Value::from(event.timestamp));
        Some(LogRecord::new(
            &self.metadata,
            Value::String(event.message),
            attributes,
        ))
    }
}

/// Records of one S3 object, in byte order of the object.
#[derive(Debug)]
pub struct S3Records {
    metadata: Metadata,
    attributes: Map<String, Value>,
    reshaper: Reshaper,
    lines: StructuredLines,
    pending: VecDeque<Value>,
}

impl S3Records {
    #[must_use]
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }
}

impl Iterator for S3Records {
    type Item = LogRecord;

    fn next(&mut self) -> Option<LogRecord> {
        loop {
            if let Some(message) = self.pending.pop_front() {
                return Some(LogRecord::new(
                    &self.metadata,
                    message,
                    self.attributes.clone(),
                ));
            }
            let line = self.lines.next()?;
            if let Some(messages) = self.reshaper.apply(parse_message(&line)) {
                self.pending.extend(messages);
            }
        }
    }
}

/// Records produced by [`Forwarder::handle`].
#[derive(Debug)]
pub enum Records {
    AwsLogs(AwsLogsRecords),
    S3(S3Records),
    Batch(std::vec::IntoIter<LogRecord>),
}

impl Iterator for Records {
    type Item = LogRecord;

    fn next(&mut self) -> Option<LogRecord> {
        match self {
            Records::AwsLogs(records) => records.next(),
            Records::S3(records) => records.next(),
            Records::Batch(records) => records.next(),
        }
    }
}
