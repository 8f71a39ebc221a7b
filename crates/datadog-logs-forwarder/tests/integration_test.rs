// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use base64::Engine;
use datadog_logs_forwarder::{
    cache::{fetcher::TagFetcher, store::InMemoryObjectStore, store::ObjectStore},
    config::ForwarderConfig,
    error::{FetchError, ForwarderError},
    handlers::{Forwarder, TagFetchers},
    metrics::NoopMetricsSink,
    record::LogRecord,
    trigger::ForwarderContext,
};
use flate2::{write::GzEncoder, Compression};
use serde_json::{json, Value};

const FORWARDER_ARN: &str = "arn:aws:lambda:us-east-1:123456789012:function:datadog-forwarder";
const BUCKET: &str = "forwarder-cache";

struct CountingFetcher {
    calls: AtomicUsize,
    tags: HashMap<String, Vec<String>>,
}

#[async_trait::async_trait]
impl TagFetcher for CountingFetcher {
    async fn fetch_all(&self) -> Result<HashMap<String, Vec<String>>, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.tags.clone())
    }
}

fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).expect("failed to write gzip payload");
    encoder.finish().expect("failed to finish gzip payload")
}

fn awslogs_event(payload: &Value) -> Value {
    let data = base64::engine::general_purpose::STANDARD.encode(gzip(payload.to_string().as_bytes()));
    json!({"awslogs": {"data": data}})
}

fn s3_event(bucket: &str, key: &str) -> Value {
    json!({"Records": [{
        "eventSource": "aws:s3",
        "s3": {"bucket": {"name": bucket}, "object": {"key": key}}
    }]})
}

fn forwarder(config: ForwarderConfig, store: Arc<InMemoryObjectStore>, fetchers: TagFetchers) -> Forwarder {
    Forwarder::new(
        config,
        ForwarderContext::new(FORWARDER_ARN),
        store,
        fetchers,
        Arc::new(NoopMetricsSink),
    )
    .expect("failed to build forwarder")
}

async fn collect(forwarder: &Forwarder, event: &Value) -> Vec<LogRecord> {
    forwarder
        .handle(event)
        .await
        .expect("failed to handle event")
        .collect()
}

#[tokio::test]
async fn awslogs_push_produces_one_record_per_event() {
    let forwarder = forwarder(
        ForwarderConfig {
            custom_tags: vec!["env:dev".to_string(), "service:billing".to_string()],
            ..Default::default()
        },
        Arc::new(InMemoryObjectStore::new()),
        TagFetchers::default(),
    );
    let event = awslogs_event(&json!({
        "owner": "123456789012",
        "logGroup": "/aws/rds/instance/billing-db/postgresql",
        "logStream": "billing-db.0",
        "logEvents": [
            {"id": "1", "timestamp": 1_700_000_000_000_i64, "message": "LOG:  checkpoint starting"},
            {"id": "2", "timestamp": 1_700_000_000_001_i64, "message": "LOG:  checkpoint complete"}
        ]
    }));

    let records = collect(&forwarder, &event).await;
    assert_eq!(records.len(), 2);
    assert_eq!(records[1].message, json!("LOG:  checkpoint complete"));

    let serialized = serde_json::to_value(&records[0]).expect("failed to serialize record");
    assert_eq!(serialized["ddsource"], "postgresql");
    assert_eq!(serialized["service"], "billing");
    assert_eq!(serialized["host"], "billing-db");
    assert_eq!(
        serialized["ddtags"],
        "forwardername:datadog-forwarder,forwarder_version:0.1.0,env:dev,service:billing,logname:postgresql"
    );
    assert_eq!(serialized["timestamp"], 1_700_000_000_000_i64);
}

#[tokio::test]
async fn s3_waf_object_with_mixed_delimiters() {
    let store = Arc::new(InMemoryObjectStore::new());
    let first = json!({
        "action": "BLOCK",
        "httpRequest": {"headers": [{"name": "Host", "value": "example.com"}]},
        "ruleGroupList": [
            {"ruleGroupId": "AWS#AWSManagedRulesSQLiRuleSet", "terminatingRule": {"ruleId": "SQLi_BODY", "action": "BLOCK"}},
            {"ruleGroupId": "AWS#AWSManagedRulesSQLiRuleSet", "terminatingRule": {"ruleId": "SQLi_QUERY", "action": "BLOCK"}}
        ]
    });
    let second = json!({"action": "ALLOW", "note": "line\nbreak inside a string"});
    let third = json!({"action": "COUNT"});
    let body = format!("{first}\r{second}\u{0C}\n{third}\u{A0}");
    let key = "AWSLogs/123456789012/WAFLogs/us-east-1/my-web-acl/2024/01/01/00/00/file.log.gz";
    store
        .put("waf-logs", key, gzip(body.as_bytes()))
        .await
        .expect("failed to seed object");
    let forwarder = forwarder(ForwarderConfig::default(), store, TagFetchers::default());

    let records = collect(&forwarder, &s3_event("waf-logs", key)).await;
    assert_eq!(records.len(), 3);
    assert!(records.iter().all(|record| record.source == "waf"));
    assert_eq!(
        records[0].message["httpRequest"]["headers"],
        json!({"Host": "example.com"})
    );
    let merged = records[0].message["ruleGroupList"]["AWS#AWSManagedRulesSQLiRuleSet"]["terminatingRule"]
        .as_object()
        .expect("terminating rules should be a map");
    assert_eq!(
        merged.keys().collect::<Vec<_>>(),
        vec!["SQLi_BODY", "SQLi_QUERY"]
    );
    assert_eq!(records[1].message["note"], "line\nbreak inside a string");
    assert_eq!(records[2].message, json!({"action": "COUNT"}));
}

#[tokio::test]
async fn sns_wrapped_s3_notification_is_routed_to_s3() {
    let store = Arc::new(InMemoryObjectStore::new());
    store
        .put("app-logs", "app/2024/01/01/app.log", b"first\nsecond\n".to_vec())
        .await
        .expect("failed to seed object");
    let forwarder = forwarder(ForwarderConfig::default(), store, TagFetchers::default());
    let event = json!({"Records": [{"Sns": {
        "TopicArn": "arn:aws:sns:us-east-1:123456789012:s3-notifications",
        "Message": s3_event("app-logs", "app/2024/01/01/app.log").to_string()
    }}]});

    let records = collect(&forwarder, &event).await;
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].source, "s3");
    assert_eq!(records[0].host.as_deref(), Some("arn:aws:s3:::app-logs"));
}

#[tokio::test]
async fn missing_object_is_reported() {
    let forwarder = forwarder(
        ForwarderConfig::default(),
        Arc::new(InMemoryObjectStore::new()),
        TagFetchers::default(),
    );
    let result = forwarder.handle(&s3_event("app-logs", "missing.log")).await;
    assert!(matches!(result, Err(ForwarderError::ObjectNotFound { .. })));
}

#[tokio::test]
async fn lambda_tags_snapshot_is_shared_across_invocations() {
    let store = Arc::new(InMemoryObjectStore::new());
    let fetcher = Arc::new(CountingFetcher {
        calls: AtomicUsize::new(0),
        tags: HashMap::from([(
            "arn:aws:lambda:us-east-1:123456789012:function:checkout".to_string(),
            vec!["env:prod".to_string(), "team:payments".to_string()],
        )]),
    });
    let config = ForwarderConfig {
        fetch_lambda_tags: true,
        cache_bucket: Some(BUCKET.to_string()),
        ..Default::default()
    };
    let event = awslogs_event(&json!({
        "owner": "123456789012",
        "logGroup": "/aws/lambda/checkout",
        "logStream": "2024/01/01/[$LATEST]0123456789abcdef",
        "logEvents": [{"id": "1", "timestamp": 1, "message": "REPORT RequestId: 1"}]
    }));

    for _ in 0..2 {
        let fetchers = TagFetchers {
            lambda: fetcher.clone(),
            ..Default::default()
        };
        let forwarder = forwarder(config.clone(), store.clone(), fetchers);
        let records = collect(&forwarder, &event).await;
        assert!(records[0].tags.contains(&"team:payments".to_string()));
        assert!(records[0].tags.contains(&"env:prod".to_string()));
        assert!(!records[0].tags.contains(&"env:none".to_string()));
    }

    assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    assert!(store
        .get(BUCKET, "cache/123456789012/us-east-1/lambda.json")
        .await
        .expect("store should be readable")
        .is_some());
}

#[tokio::test]
async fn security_hub_event_without_findings_forwards_nothing() {
    let forwarder = forwarder(
        ForwarderConfig::default(),
        Arc::new(InMemoryObjectStore::new()),
        TagFetchers::default(),
    );
    let event = json!({"source": "aws.securityhub", "detail": {"findings": []}});
    assert!(collect(&forwarder, &event).await.is_empty());
}
