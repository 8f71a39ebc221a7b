// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Splits a decompressed S3 object into structured lines.
//!
//! Three layouts are recognised:
//!
//! - **Records envelope** (CloudTrail style): the body is one JSON document
//!   with a `Records` array, and each element becomes its own line.
//! - **WAF**: JSON objects concatenated with historically inconsistent
//!   delimiters (`\n`, `\r`, `\f` or U+00A0). Delimiters only count as a
//!   boundary outside of any object or array.
//! - **Plain text**: one line per newline, empty lines dropped, optionally
//!   grouped by a multiline start pattern.
//!
//! [`StructuredLines`] is a lazy, single-pass iterator over the fragments,
//! in the order they appear in the payload.

use std::io::{self, Read};

use flate2::read::MultiGzDecoder;
use regex::Regex;
use serde_json::Value;
use tracing::debug;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Record delimiters seen in WAF log objects over time.
const WAF_DELIMITERS: [char; 4] = ['\n', '\r', '\u{000C}', '\u{00A0}'];

/// Decompresses gzip data, or returns the input unchanged when it does not
/// carry the gzip magic bytes.
pub fn decompress(data: &[u8]) -> io::Result<Vec<u8>> {
    if !data.starts_with(&GZIP_MAGIC) {
        return Ok(data.to_vec());
    }
    let mut decoder = MultiGzDecoder::new(data);
    let mut decompressed = Vec::new();
    decoder.read_to_end(&mut decompressed)?;
    Ok(decompressed)
}

/// Lazy sequence of text fragments extracted from one payload.
#[derive(Debug)]
pub struct StructuredLines {
    inner: Fragments,
}

#[derive(Debug)]
enum Fragments {
    Records(std::vec::IntoIter<Value>),
    Lines { body: String, pos: usize },
    Waf { body: String, pos: usize },
    Chunks(std::vec::IntoIter<String>),
}

impl Iterator for StructuredLines {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        match &mut self.inner {
            Fragments::Records(records) => records.next().map(|record| match record {
                Value::String(text) => text,
                other => other.to_string(),
            }),
            Fragments::Lines { body, pos } => next_line(body, pos),
            Fragments::Waf { body, pos } => next_waf_record(body, pos),
            Fragments::Chunks(chunks) => chunks.next(),
        }
    }
}

impl StructuredLines {
    /// Splits an already decompressed body.
    #[must_use]
    pub fn new(body: String, source: &str, multiline: Option<&Regex>) -> Self {
        if source == "waf" {
            return Self {
                inner: Fragments::Waf { body, pos: 0 },
            };
        }

        if let Ok(Value::Object(mut document)) = serde_json::from_str::<Value>(&body) {
            if let Some(records) = document.remove("Records") {
                let records = match records {
                    Value::Array(records) => records,
                    _ => {
                        debug!("Records attribute is not an array, skipping payload");
                        Vec::new()
                    }
                };
                return Self {
                    inner: Fragments::Records(records.into_iter()),
                };
            }
        }

        if let Some(pattern) = multiline {
            if pattern.find(&body).is_some_and(|found| found.start() == 0) {
                return Self {
                    inner: Fragments::Chunks(split_multiline(&body, pattern).into_iter()),
                };
            }
            debug!("Multiline pattern does not match the start of the payload, splitting on newlines");
        }

        Self {
            inner: Fragments::Lines { body, pos: 0 },
        }
    }
}

/// Decompresses an S3 object and returns its structured lines.
pub fn extract_lines(
    data: &[u8],
    bucket: &str,
    key: &str,
    source: &str,
    multiline: Option<&Regex>,
) -> io::Result<StructuredLines> {
    let decompressed = decompress(data)?;
    debug!(
        "Extracting {} source lines from s3://{bucket}/{key} ({} bytes)",
        source,
        decompressed.len()
    );
    let body = String::from_utf8_lossy(&decompressed).into_owned();
    Ok(StructuredLines::new(body, source, multiline))
}

/// [`extract_lines`] without multiline grouping.
pub fn get_structured_lines_for_s3_handler(
    data: &[u8],
    bucket: &str,
    key: &str,
    source: &str,
) -> io::Result<StructuredLines> {
    extract_lines(data, bucket, key, source, None)
}

fn next_line(body: &str, pos: &mut usize) -> Option<String> {
    while *pos < body.len() {
        let rest = &body[*pos..];
        let end = rest.find('\n').unwrap_or(rest.len());
        let line = rest[..end].strip_suffix('\r').unwrap_or(&rest[..end]);
        *pos += (end + 1).min(rest.len());
        if !line.is_empty() {
            return Some(line.to_string());
        }
    }
    None
}

/// Whether the delimiter `ch` at `index` is directly followed by a new record.
fn opens_record(rest: &str, index: usize, ch: char) -> bool {
    rest[index + ch.len_utf8()..].starts_with('{')
}

/// Returns the next top-level WAF record, tracking brace and bracket depth
/// (string aware) so delimiters inside a record never split it.
///
/// A truncated record leaves the depth above zero; a delimiter followed by
/// `{` then closes it so later records still come out one by one. Inside a
/// string only raw control delimiters count, since JSON strings cannot hold
/// them.
fn next_waf_record(body: &str, pos: &mut usize) -> Option<String> {
    while *pos < body.len() {
        let rest = &body[*pos..];
        let mut depth: usize = 0;
        let mut in_string = false;
        let mut escaped = false;
        let mut end = rest.len();

        for (index, ch) in rest.char_indices() {
            if in_string {
                if escaped {
                    escaped = false;
                } else if ch == '\\' {
                    escaped = true;
                } else if ch == '"' {
                    in_string = false;
                } else if matches!(ch, '\n' | '\r' | '\u{000C}') && opens_record(rest, index, ch) {
                    end = index;
                    break;
                }
                continue;
            }
            match ch {
                '"' if depth > 0 => in_string = true,
                '{' | '[' => depth += 1,
                '}' | ']' => depth = depth.saturating_sub(1),
                c if WAF_DELIMITERS.contains(&c) && (depth == 0 || opens_record(rest, index, c)) => {
                    end = index;
                    break;
                }
                _ => {}
            }
        }

        let fragment = &rest[..end];
        let delimiter_len = rest[end..].chars().next().map_or(0, char::len_utf8);
        *pos += end + delimiter_len;

        if !fragment.trim().is_empty() {
            return Some(fragment.to_string());
        }
    }
    None
}

/// Splits `body` before every match of `pattern` that starts a line.
fn split_multiline(body: &str, pattern: &Regex) -> Vec<String> {
    let mut starts: Vec<usize> = pattern
        .find_iter(body)
        .map(|found| found.start())
        .filter(|&start| start == 0 || body[..start].ends_with(['\n', '\r', '\u{000C}']))
        .collect();
    starts.dedup();
    starts.push(body.len());

    starts
        .windows(2)
        .map(|bounds| body[bounds[0]..bounds[1]].trim_end_matches(['\n', '\r', '\u{000C}']))
        .filter(|chunk| !chunk.is_empty())
        .map(String::from)
        .collect()
}
