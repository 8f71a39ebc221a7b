// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Helpers for `key:value` tag lists.

use crate::record::Metadata;

const SERVICE_TAG_PREFIX: &str = "service:";

/// Splits a comma separated tag string, dropping empty entries.
#[must_use]
pub fn parse_tags(tags: &str) -> Vec<String> {
    tags.split(',')
        .map(str::trim)
        .filter(|tag| !tag.is_empty())
        .map(String::from)
        .collect()
}

/// The key of a tag: everything before the first `:`, or the whole tag.
#[must_use]
pub fn tag_key(tag: &str) -> &str {
    tag.split_once(':').map_or(tag, |(key, _)| key)
}

/// Removes tags whose key was already seen, keeping the first occurrence.
#[must_use]
pub fn dedupe_tags_by_key(tags: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    tags.into_iter()
        .filter(|tag| seen.insert(tag_key(tag).to_string()))
        .collect()
}

/// Resolves the service from the first `service:` tag and removes tags with
/// duplicated keys. Defaults to the source when no service tag exists.
pub fn get_service_from_tags_and_remove_duplicates(metadata: &mut Metadata) -> String {
    metadata.tags = dedupe_tags_by_key(std::mem::take(&mut metadata.tags));
    metadata
        .tags
        .iter()
        .find_map(|tag| tag.strip_prefix(SERVICE_TAG_PREFIX))
        .filter(|service| !service.is_empty())
        .map_or_else(|| metadata.source.clone(), String::from)
}

/// Normalises a raw AWS tag key or value:
/// lower-cased, illegal characters replaced with `_`, runs of `_`
/// collapsed, leading `_` (and optionally digits) stripped.
#[must_use]
pub fn sanitize_aws_tag_string(tag: &str, remove_colons: bool, remove_leading_digits: bool) -> String {
    let mut sanitized = String::with_capacity(tag.len());
    for ch in tag.to_lowercase().chars() {
        let legal = ch.is_ascii_alphanumeric()
            || matches!(ch, '_' | '-' | '.' | '/')
            || (ch == ':' && !remove_colons);
        let ch = if legal { ch } else { '_' };
        if ch == '_' && sanitized.ends_with('_') {
            continue;
        }
        sanitized.push(ch);
    }

    sanitized
        .trim_start_matches(|ch: char| ch == '_' || (remove_leading_digits && ch.is_ascii_digit()))
        .to_string()
}

/// Formats an AWS resource tag as a Datadog `key:value` tag.
#[must_use]
pub fn format_aws_tag(key: &str, value: &str) -> String {
    format!(
        "{}:{}",
        sanitize_aws_tag_string(key, true, true),
        sanitize_aws_tag_string(value, false, false)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata(tags: &str) -> Metadata {
        Metadata::new("ecs", parse_tags(tags))
    }

    #[test]
    fn test_get_service_from_tags() {
        let mut metadata = metadata("env:dev,tag,stack:aws:ecs,service:web,version:v1");
        assert_eq!(get_service_from_tags_and_remove_duplicates(&mut metadata), "web");
    }

    #[test]
    fn test_get_service_from_tags_default_to_source() {
        let mut metadata = metadata("env:dev,tag,stack:aws:ecs,version:v1");
        assert_eq!(get_service_from_tags_and_remove_duplicates(&mut metadata), "ecs");
    }

    #[test]
    fn test_get_service_from_tags_removing_duplicates() {
        let mut metadata = metadata("env:dev,tag,stack:aws:ecs,service:web,version:v1,service:other");
        assert_eq!(get_service_from_tags_and_remove_duplicates(&mut metadata), "web");
        assert_eq!(
            metadata.tags.join(","),
            "env:dev,tag,stack:aws:ecs,service:web,version:v1"
        );
    }

    #[test]
    fn test_parse_tags() {
        assert_eq!(parse_tags(" a:b, ,c "), vec!["a:b", "c"]);
        assert!(parse_tags("").is_empty());
    }

    #[test]
    fn test_sanitize_aws_tag_string() {
        assert_eq!(sanitize_aws_tag_string("Team Name", true, true), "team_name");
        assert_eq!(sanitize_aws_tag_string("1st::key", true, true), "st_key");
        assert_eq!(sanitize_aws_tag_string("__a!!b", false, false), "a_b");
        assert_eq!(sanitize_aws_tag_string("123:Value", false, false), "123:value");
    }

    #[test]
    fn test_format_aws_tag() {
        assert_eq!(format_aws_tag("Env", "Prod Stage"), "env:prod_stage");
        assert_eq!(format_aws_tag("aws:cloudformation:stack-name", "my-stack"), "aws_cloudformation_stack-name:my-stack");
    }
}
