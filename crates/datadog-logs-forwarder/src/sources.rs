// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Classification of a log's origin service.
//!
//! The source tag is derived from the CloudWatch log group name or the S3
//! object key. Each trigger kind owns an ordered rule table that is
//! evaluated top to bottom against the lower-cased locator; the first
//! matching rule wins, so table order is precedence. For example the
//! CloudTrail file-name rule sits ahead of every substring rule, so a
//! CloudTrail key that happens to contain `waf` or `sns` stays `cloudtrail`.

use lazy_static::lazy_static;
use regex::Regex;

use crate::trigger::TriggerEnvelope;

/// Source used for subscription pushes matching no rule.
pub const DEFAULT_CLOUDWATCH_SOURCE: &str = "cloudwatch";
/// Source used for S3 notifications matching no rule.
pub const DEFAULT_S3_SOURCE: &str = "s3";
/// Source used when the trigger kind is not recognised.
pub const DEFAULT_SOURCE: &str = "aws";

/// The trigger shapes relevant to classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerKind {
    SubscriptionPush,
    ObjectNotification,
    Other,
}

impl TriggerEnvelope {
    #[must_use]
    pub fn kind(&self) -> TriggerKind {
        match self {
            TriggerEnvelope::SubscriptionPush(_) => TriggerKind::SubscriptionPush,
            TriggerEnvelope::ObjectNotification(_) => TriggerKind::ObjectNotification,
            TriggerEnvelope::TopicNotification(_) | TriggerEnvelope::Event(_) => {
                TriggerKind::Other
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Matcher {
    Prefix(&'static str),
    Contains(&'static str),
    PrefixAndContains(&'static str, &'static str),
    CloudTrailFile,
}

impl Matcher {
    fn matches(self, locator: &str) -> bool {
        match self {
            Matcher::Prefix(prefix) => locator.starts_with(prefix),
            Matcher::Contains(needle) => locator.contains(needle),
            Matcher::PrefixAndContains(prefix, needle) => {
                locator.starts_with(prefix) && locator.contains(needle)
            }
            Matcher::CloudTrailFile => is_cloudtrail(locator),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct SourceRule {
    matcher: Matcher,
    source: &'static str,
}

const fn rule(matcher: Matcher, source: &'static str) -> SourceRule {
    SourceRule { matcher, source }
}

/// Rules for CloudWatch log group names, in precedence order.
const CLOUDWATCH_RULES: &[SourceRule] = &[
    // e.g. /aws/rds/instance/my-mariadb/error
    rule(Matcher::PrefixAndContains("/aws/rds", "mariadb"), "mariadb"),
    rule(Matcher::PrefixAndContains("/aws/rds", "mysql"), "mysql"),
    rule(Matcher::PrefixAndContains("/aws/rds", "postgresql"), "postgresql"),
    rule(Matcher::Prefix("/aws/rds"), "rds"),
    // REST API execution logs, e.g. Api-Gateway-Execution-Logs_xxxxxx/dev
    rule(Matcher::Prefix("api-gateway"), "apigateway"),
    // serverless framework access logs, e.g. /aws/api-gateway/my-project
    rule(Matcher::Prefix("/aws/api-gateway"), "apigateway"),
    // serverless framework HTTP API logs, e.g. /aws/http-api/my-project
    rule(Matcher::Prefix("/aws/http-api"), "apigateway"),
    rule(Matcher::Prefix("/aws/vendedlogs/states"), "stepfunction"),
    // e.g. dms-tasks-test-instance
    rule(Matcher::Prefix("dms-tasks"), "dms"),
    // e.g. sns/us-east-1/123456779121/SnsTopicX
    rule(Matcher::Prefix("sns/"), "sns"),
    rule(Matcher::Prefix("/aws/fsx/windows"), "aws.fsx"),
    rule(Matcher::Prefix("/aws/appsync/"), "appsync"),
    rule(Matcher::Prefix("/aws/lambda"), "lambda"),
    rule(Matcher::Prefix("/aws/codebuild"), "codebuild"),
    rule(Matcher::Prefix("/aws/kinesis"), "kinesis"),
    rule(Matcher::Prefix("/aws/docdb"), "docdb"),
    rule(Matcher::Prefix("/aws/eks"), "eks"),
    // the following substrings must appear somewhere in the log group
    rule(Matcher::Contains("network-firewall"), "network-firewall"),
    rule(Matcher::Contains("route53"), "route53"),
    rule(Matcher::Contains("vpc"), "vpc"),
    rule(Matcher::Contains("fargate"), "fargate"),
    rule(Matcher::Contains("cloudtrail"), "cloudtrail"),
    rule(Matcher::Contains("msk"), "msk"),
    rule(Matcher::Contains("elasticsearch"), "elasticsearch"),
    rule(Matcher::Contains("transitgateway"), "transitgateway"),
    rule(Matcher::Contains("verified-access"), "verified-access"),
    rule(Matcher::Contains("bedrock"), "bedrock"),
];

/// Rules for S3 object keys, in precedence order.
const S3_RULES: &[SourceRule] = &[
    rule(Matcher::CloudTrailFile, "cloudtrail"),
    // e.g. AWSLogs/123456779121/elasticloadbalancing/us-east-1/2020/10/02/...
    rule(Matcher::Contains("elasticloadbalancing"), "elb"),
    // e.g. AWSLogs/123456779121/vpcflowlogs/us-east-1/2020/10/02/...
    rule(Matcher::Contains("vpcflowlogs"), "vpc"),
    // e.g. AWSLogs/123456779121/vpcdnsquerylogs/vpc-********/2021/05/11/...
    rule(Matcher::Contains("vpcdnsquerylogs"), "route53"),
    // e.g. 2020/10/02/21/aws-waf-logs-testing-1-2020-10-02-21-25-30-x123x-x456x
    rule(Matcher::Contains("aws-waf-logs"), "waf"),
    // e.g. AWSLogs/123456779121/WAFLogs/us-east-1/xxxxxx-waf/2022/10/11/14/10/...
    rule(Matcher::Contains("waflogs"), "waf"),
    // e.g. AWSLogs/123456779121/redshift/us-east-1/2020/10/21/..._redshift_...
    rule(Matcher::Contains("_redshift_"), "redshift"),
    rule(Matcher::Contains("amazon_documentdb"), "docdb"),
    // e.g. carbon-black-cloud-forwarder/alerts/8436e850-7e78-40e4-b3cd-6ebbc854d0a2.jsonl.gz
    rule(Matcher::Contains("carbon-black"), "carbonblack"),
    // the following substrings must appear in the bucket target prefix
    rule(Matcher::Contains("amazon_codebuild"), "codebuild"),
    rule(Matcher::Contains("amazon_kinesis"), "kinesis"),
    rule(Matcher::Contains("amazon_dms"), "dms"),
    rule(Matcher::Contains("amazon_msk"), "msk"),
    rule(Matcher::Contains("network-firewall"), "network-firewall"),
    rule(Matcher::Contains("cloudfront"), "cloudfront"),
    rule(Matcher::Contains("verified-access"), "verified-access"),
    rule(Matcher::Contains("bedrock"), "bedrock"),
];

fn first_match(rules: &[SourceRule], locator: &str) -> Option<&'static str> {
    rules
        .iter()
        .find(|rule| rule.matcher.matches(locator))
        .map(|rule| rule.source)
}

/// Parses the source that will be assigned to the log in Datadog.
///
/// `key` is the S3 object key for object notifications or the log group
/// name for subscription pushes. Matching is case-insensitive.
#[must_use]
pub fn parse_event_source(kind: TriggerKind, key: &str) -> &'static str {
    let lowercase_key = key.to_lowercase();
    match kind {
        TriggerKind::SubscriptionPush => find_cloudwatch_source(&lowercase_key),
        TriggerKind::ObjectNotification => find_s3_source(&lowercase_key),
        TriggerKind::Other => DEFAULT_SOURCE,
    }
}

/// Classifies a lower-cased CloudWatch log group name.
#[must_use]
pub fn find_cloudwatch_source(log_group: &str) -> &'static str {
    first_match(CLOUDWATCH_RULES, log_group).unwrap_or(DEFAULT_CLOUDWATCH_SOURCE)
}

/// Classifies a lower-cased S3 object key.
#[must_use]
pub fn find_s3_source(key: &str) -> &'static str {
    first_match(S3_RULES, key).unwrap_or(DEFAULT_S3_SOURCE)
}

lazy_static! {
    static ref CLOUDTRAIL_REGEX: Regex = Regex::new(
        r"(?i)\d+_CloudTrail(|-Digest)_\w{2}(|-gov|-cn)-\w{4,9}-\d_(|.+)\d{8}T\d{4,6}Z(|.+)\.json\.gz$"
    )
    .expect("failed creating regex");
}

/// Whether an object key follows the CloudTrail log file naming scheme.
#[must_use]
pub fn is_cloudtrail(key: &str) -> bool {
    CLOUDTRAIL_REGEX.is_match(key)
}

/// Classifies an S3 notification from both bucket and key. Transit gateway
/// flow logs are only recognisable by the bucket name.
#[must_use]
pub fn find_s3_source_for_object(bucket: &str, key: &str) -> &'static str {
    if bucket.to_lowercase().contains("transit-gateway") {
        return "transitgateway";
    }
    parse_event_source(TriggerKind::ObjectNotification, key)
}

const EKS_LOG_STREAM_RULES: &[(&str, &str)] = &[
    ("kube-apiserver-audit-", "kubernetes.audit"),
    ("kube-scheduler-", "kube_scheduler"),
    ("kube-apiserver-", "kube-apiserver"),
    ("kube-controller-manager-", "kube-controller-manager"),
    ("authenticator-", "aws-iam-authenticator"),
];

/// Narrows an `eks` control plane source using the log stream name.
#[must_use]
pub fn find_eks_source(log_stream: &str) -> Option<&'static str> {
    EKS_LOG_STREAM_RULES
        .iter()
        .find(|(prefix, _)| log_stream.starts_with(prefix))
        .map(|(_, source)| *source)
}
