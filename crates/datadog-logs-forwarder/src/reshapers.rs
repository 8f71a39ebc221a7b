// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Source specific transforms applied to parsed log payloads.
//!
//! Message level reshaping is dispatched through [`Reshaper`], one variant
//! per source that needs it. Step Functions and Lambda helpers work on the
//! payload envelope rather than on individual messages and are called by
//! the handlers directly.

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{Map, Value};
use tracing::debug;

use crate::trigger::AwsLogs;

/// Message level transform selected by source tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reshaper {
    Waf,
    SecurityHub,
    Passthrough,
}

impl Reshaper {
    #[must_use]
    pub fn for_source(source: &str) -> Self {
        match source {
            "waf" => Reshaper::Waf,
            "securityhub" => Reshaper::SecurityHub,
            _ => Reshaper::Passthrough,
        }
    }

    /// Applies the transform. `None` means nothing must be forwarded for
    /// this message.
    #[must_use]
    pub fn apply(self, message: Value) -> Option<Vec<Value>> {
        match self {
            Reshaper::Waf => Some(vec![parse_aws_waf_logs(message)]),
            Reshaper::SecurityHub => separate_security_hub_findings(&message),
            Reshaper::Passthrough => Some(vec![message]),
        }
    }
}

/// Rewrites the arrays of objects found in AWS WAF logs into maps so every
/// entry becomes an addressable attribute:
///
/// - `httpRequest.headers`: `[{name, value}]` into `{name: value}`
/// - `nonTerminatingMatchingRules`: keyed by `ruleId`
/// - `rateBasedRuleList`: keyed by `rateBasedRuleName`
/// - `ruleGroupList`: keyed by `ruleGroupId`, entries sharing an id merged
///
/// A string that is not valid JSON, or a non-object value, is returned
/// unchanged.
#[must_use]
pub fn parse_aws_waf_logs(message: Value) -> Value {
    let mut message = match message {
        Value::String(text) => match serde_json::from_str::<Value>(&text) {
            Ok(Value::Object(map)) => map,
            Ok(other) => return other,
            Err(_) => {
                debug!("Argument provided for waf parser is not valid JSON");
                return Value::String(text);
            }
        },
        Value::Object(map) => map,
        other => return other,
    };

    if let Some(Value::Object(http_request)) = message.get_mut("httpRequest") {
        if let Some(headers) = http_request.remove("headers") {
            let headers = match headers {
                Value::Array(entries) if !entries.is_empty() => convert_rule_to_nested_json(Value::Array(entries)),
                other => other,
            };
            http_request.insert("headers".to_string(), headers);
        }
    }

    if let Some(Value::Array(rule_groups)) = message.get("ruleGroupList") {
        if !rule_groups.is_empty() {
            let merged = merge_rule_groups(rule_groups.clone());
            message.insert("ruleGroupList".to_string(), Value::Object(merged));
        }
    }

    for attribute in ["rateBasedRuleList", "nonTerminatingMatchingRules"] {
        if let Some(Value::Array(rules)) = message.get(attribute) {
            if !rules.is_empty() {
                let nested = convert_rule_to_nested_json(Value::Array(rules.clone()));
                message.insert(attribute.to_string(), nested);
            }
        }
    }

    Value::Object(message)
}

const RULE_GROUP_LISTS: [&str; 2] = ["nonTerminatingMatchingRules", "excludedRules"];

/// Nests every rule group under its id. Groups repeating an id are merged
/// into the first one, rules appended in input order.
fn merge_rule_groups(rule_groups: Vec<Value>) -> Map<String, Value> {
    let mut merged: Map<String, Value> = Map::new();

    for rule_group in rule_groups {
        let Value::Object(mut rule_group) = rule_group else {
            continue;
        };
        let group_id = match rule_group.remove("ruleGroupId") {
            Some(Value::String(id)) if !id.is_empty() => id,
            _ => "null".to_string(),
        };
        let Value::Object(group) = merged
            .entry(group_id)
            .or_insert_with(|| Value::Object(Map::new()))
        else {
            continue;
        };

        if let Some(terminating_rule) = rule_group.remove("terminatingRule") {
            if is_truthy(&terminating_rule) {
                extend_nested(group, "terminatingRule", convert_rule_to_nested_json(terminating_rule));
            }
        }

        for attribute in RULE_GROUP_LISTS {
            if let Some(Value::Array(rules)) = rule_group.remove(attribute) {
                extend_nested(group, attribute, convert_rule_to_nested_json(Value::Array(rules)));
            }
        }

        for (key, value) in rule_group {
            group.entry(key).or_insert(value);
        }
    }

    merged
}

fn extend_nested(group: &mut Map<String, Value>, attribute: &str, rules: Value) {
    let Value::Object(rules) = rules else {
        return;
    };
    let entry = group
        .entry(attribute.to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    if let Value::Object(existing) = entry {
        existing.extend(rules);
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
        Value::Number(_) => true,
    }
}

fn take_non_empty_string(entry: &mut Map<String, Value>, key: &str) -> Option<String> {
    match entry.get(key) {
        Some(Value::String(value)) if !value.is_empty() => match entry.remove(key) {
            Some(Value::String(value)) => Some(value),
            _ => None,
        },
        _ => None,
    }
}

/// Converts a rule (or list of rules) into a map keyed by rule identifier.
fn convert_rule_to_nested_json(rule: Value) -> Value {
    let mut nested = Map::new();

    match rule {
        Value::Object(mut entry) => {
            if let Some(rule_id) = take_non_empty_string(&mut entry, "ruleId") {
                nested.insert(rule_id, Value::Object(entry));
                return Value::Object(nested);
            }
            return Value::Object(entry);
        }
        Value::Array(entries) => {
            for entry in entries {
                let Value::Object(mut entry) = entry else {
                    continue;
                };
                if let Some(rule_id) = take_non_empty_string(&mut entry, "ruleId") {
                    nested.insert(rule_id, Value::Object(entry));
                } else if let Some(name) = take_non_empty_string(&mut entry, "rateBasedRuleName") {
                    nested.insert(name, Value::Object(entry));
                } else if let (Some(Value::String(name)), Some(value)) =
                    (entry.get("name"), entry.get("value"))
                {
                    nested.insert(name.clone(), value.clone());
                } else {
                    debug!("Skipping WAF rule entry without an identifier");
                }
            }
        }
        other => return other,
    }

    Value::Object(nested)
}

/// Splits a Security Hub event into one event per (finding, resource) pair.
///
/// Each output is the original event with `detail.findings` replaced by
/// `detail.finding`: the finding without its `Resources` array, plus
/// `resources: {<Type>: <resource>}` holding exactly one resource. Findings
/// without resources are dropped. Returns `None` when the event carries no
/// findings at all.
#[must_use]
pub fn separate_security_hub_findings(event: &Value) -> Option<Vec<Value>> {
    let findings = event
        .pointer("/detail/findings")
        .and_then(Value::as_array)
        .filter(|findings| !findings.is_empty())?;

    let mut base = event.clone();
    if let Some(Value::Object(detail)) = base.get_mut("detail") {
        detail.remove("findings");
    }

    let mut events = Vec::new();
    for finding in findings {
        let Value::Object(finding) = finding else {
            continue;
        };
        let mut finding = finding.clone();
        let resources = match finding.remove("Resources") {
            Some(Value::Array(resources)) if !resources.is_empty() => resources,
            _ => {
                debug!("Dropping Security Hub finding without resources");
                continue;
            }
        };

        for resource in resources {
            let (resource_type, resource) = match resource {
                Value::Object(mut resource) => {
                    let resource_type = match resource.remove("Type") {
                        Some(Value::String(resource_type)) => resource_type,
                        _ => "unknown".to_string(),
                    };
                    (resource_type, Value::Object(resource))
                }
                other => ("unknown".to_string(), other),
            };

            let mut single = finding.clone();
            let mut resources = Map::new();
            resources.insert(resource_type, resource);
            single.insert("resources".to_string(), Value::Object(resources));

            let mut new_event = base.clone();
            if let Some(Value::Object(detail)) = new_event.get_mut("detail") {
                detail.insert("finding".to_string(), Value::Object(single));
            }
            events.push(new_event);
        }
    }

    Some(events)
}

/// Tokens of an execution ARN with the qualifier replaced by `stateMachine`.
/// Colons, forward slashes and backslashes all separate tokens.
fn execution_arn_tokens(message: &Value) -> Option<Vec<&str>> {
    let execution_arn = message.get("execution_arn")?.as_str()?;
    let mut tokens: Vec<&str> = execution_arn.split([':', '/', '\\']).collect();
    if tokens.len() < 7 {
        return None;
    }
    tokens[5] = "stateMachine";
    Some(tokens)
}

/// Derives `arn:<partition>:states:<region>:<account>:stateMachine:<name>`
/// from a Step Functions log message. Returns an empty string when the
/// message has no `execution_arn`.
#[must_use]
pub fn get_state_machine_arn(message: &Value) -> String {
    execution_arn_tokens(message)
        .map(|tokens| tokens[..7].join(":"))
        .unwrap_or_default()
}

/// Host used for Step Functions logs: the execution ARN rewritten under the
/// state machine, without its last token.
#[must_use]
pub fn get_state_machine_host(message: &Value) -> Option<String> {
    execution_arn_tokens(message).map(|tokens| tokens[..tokens.len() - 1].join(":"))
}

lazy_static! {
    /// `yyyy/mm/dd/<function-name>[<version>]<instance id>`
    static ref LAMBDA_LOG_STREAM_REGEX: Regex =
        Regex::new(r"^\d{4}/\d{2}/\d{2}/([^\[\]/]+)\[[^\]]*\]").expect("failed creating regex");
}

/// Resolves the Lambda function name of a subscription push.
///
/// `/aws/lambda/<name>` log groups give the name directly. Customised log
/// groups (possibly shared by several functions) embed the name in the log
/// stream before the `[version]` marker. Non Lambda logs return `None`.
#[must_use]
pub fn get_lower_cased_lambda_function_name(logs: &AwsLogs) -> Option<String> {
    if let Some(name) = logs.log_group.strip_prefix("/aws/lambda/") {
        if !name.is_empty() {
            return Some(name.to_lowercase());
        }
    }

    LAMBDA_LOG_STREAM_REGEX
        .captures(&logs.log_stream)
        .and_then(|captures| captures.get(1))
        .map(|name| name.as_str().to_lowercase())
}
