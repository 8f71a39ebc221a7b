// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Tracing formatter for forwarder logs.
//!
//! The forwarder writes its own logs to the same CloudWatch stream as every
//! other Lambda, and CloudWatch starts a new event at each newline. Lines are
//! therefore prefixed with `DD_FORWARDER` and kept on one line, with embedded
//! newlines (common in forwarded payloads echoed at debug level) escaped:
//!
//! ```text
//! DD_FORWARDER | LEVEL | [span_name{span_fields}: ]message event_fields
//! ```

use std::borrow::Cow;
use std::fmt;

use tracing_core::{Event, Subscriber};
use tracing_subscriber::fmt::{
    format::{self, FormatEvent, FormatFields},
    FmtContext, FormattedFields,
};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::EnvFilter;

use crate::error::ForwarderError;

#[derive(Debug, Clone, Copy)]
pub struct Formatter;

fn single_line(text: &str) -> Cow<'_, str> {
    if text.contains(['\n', '\r']) {
        Cow::Owned(text.replace("\r\n", "\n").replace(['\n', '\r'], "\\n"))
    } else {
        Cow::Borrowed(text)
    }
}

impl<S, N> FormatEvent<S, N> for Formatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: format::Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        write!(writer, "DD_FORWARDER | {} | ", event.metadata().level())?;

        for span in ctx.event_scope().into_iter().flat_map(|scope| scope.from_root()) {
            let extensions = span.extensions();
            match extensions.get::<FormattedFields<N>>() {
                Some(fields) if !fields.is_empty() => {
                    write!(writer, "{}{{{}}}: ", span.name(), single_line(fields))?;
                }
                _ => write!(writer, "{}: ", span.name())?,
            }
        }

        let mut fields = String::new();
        ctx.field_format()
            .format_fields(format::Writer::new(&mut fields), event)?;
        writeln!(writer, "{}", single_line(&fields))
    }
}

/// Installs the global subscriber. `RUST_LOG` style directives in
/// `log_level` are accepted.
pub fn init_logging(log_level: &str) -> Result<(), ForwarderError> {
    let filter = EnvFilter::try_new(log_level)
        .map_err(|e| ForwarderError::InvalidConfig(format!("Invalid log level '{log_level}': {e}")))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .event_format(Formatter)
        .try_init()
        .map_err(|e| ForwarderError::InvalidConfig(format!("Failed to install logger: {e}")))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::{Arc, Mutex};
    use tracing::{info, info_span, warn};
    use tracing_core::{dispatcher, Dispatch};

    #[derive(Clone, Default)]
    struct Buffer(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Buffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn capture(emit: impl FnOnce()) -> Vec<String> {
        let buffer = Buffer::default();
        let writer = buffer.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .event_format(Formatter)
            .with_writer(move || writer.clone())
            .finish();

        dispatcher::with_default(&Dispatch::new(subscriber), emit);

        let output = String::from_utf8(buffer.0.lock().unwrap().clone()).unwrap();
        output.lines().map(String::from).collect()
    }

    #[test]
    fn test_formatter_prefix_and_spans() {
        let lines = capture(|| {
            info!("forwarder started");
            let span = info_span!("s3_handler", bucket = "my-bucket");
            let _guard = span.enter();
            warn!(key = "a.log.gz", "object is empty");
        });

        assert_eq!(lines[0], "DD_FORWARDER | INFO | forwarder started");
        assert_eq!(
            lines[1],
            "DD_FORWARDER | WARN | s3_handler{bucket=\"my-bucket\"}: object is empty key=\"a.log.gz\""
        );
    }

    #[test]
    fn test_formatter_keeps_one_line_per_event() {
        let lines = capture(|| {
            info!("Skipping line: {}", "first\r\nsecond\nthird");
        });

        assert_eq!(
            lines,
            vec!["DD_FORWARDER | INFO | Skipping line: first\\nsecond\\nthird"]
        );
    }

    #[test]
    fn test_single_line() {
        assert_eq!(single_line("plain"), "plain");
        assert!(matches!(single_line("plain"), Cow::Borrowed(_)));
        assert_eq!(single_line("a\rb\r\nc"), "a\\nb\\nc");
    }

    #[test]
    fn test_init_logging_rejects_invalid_directive() {
        assert!(init_logging("info,datadog_logs_forwarder=loud").is_err());
    }
}
