//! Diagnostic logging for the harness binary.
//!
//! `tracing` is the operator channel; user-facing output goes through the
//! output sink instead. Workers inherit the parent's stderr, so every line is
//! prefixed with the role of the process that wrote it.

use colored::*;
use std::fmt;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::format::{FormatEvent, FormatFields, Writer};
use tracing_subscriber::fmt::FmtContext;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::EnvFilter;

/// Which side of the link a process is on
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProcessRole {
    Host,
    Fork,
}

impl ProcessRole {
    pub fn tag(&self) -> &'static str {
        match self {
            ProcessRole::Host => "[host]",
            ProcessRole::Fork => "[fork]",
        }
    }
}

/// Event formatter that colors the whole line by level, behind a role tag.
///
/// No timestamps or level names are printed.
pub struct ColorizedFormatter {
    role: ProcessRole,
}

impl ColorizedFormatter {
    pub fn new(role: ProcessRole) -> Self {
        Self { role }
    }
}

impl<S, N> FormatEvent<S, N> for ColorizedFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        // format_fields writes directly, so buffer to color the entire line
        let mut buffer = String::new();
        let mut buf_writer = Writer::new(&mut buffer);
        ctx.format_fields(buf_writer.by_ref(), event)?;

        let colored_output = match *event.metadata().level() {
            Level::INFO => buffer.white(),
            Level::WARN => buffer.yellow(),
            Level::ERROR => buffer.red(),
            Level::DEBUG => buffer.blue(),
            Level::TRACE => buffer.purple(),
        };

        writeln!(writer, "{} {}", self.role.tag().dimmed(), colored_output)
    }
}

/// Filter from `RUST_LOG`, or `warn` (`info` when verbose) if it is unset
pub fn env_filter(verbose: bool) -> EnvFilter {
    let default = if verbose { "info" } else { "warn" };
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
}

/// Install the global subscriber, writing to stderr.
///
/// A subscriber that is already installed (tests, embedding) is left alone.
pub fn init(role: ProcessRole, verbose: bool) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter(verbose))
        .with_writer(std::io::stderr)
        .event_format(ColorizedFormatter::new(role))
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_tags() {
        assert_eq!(ProcessRole::Host.tag(), "[host]");
        assert_eq!(ProcessRole::Fork.tag(), "[fork]");
    }

    #[test]
    fn test_init_twice_is_harmless() {
        init(ProcessRole::Host, false);
        init(ProcessRole::Fork, true);
        tracing::warn!("still logging");
    }
}
