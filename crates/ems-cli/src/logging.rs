//! # ems-cli::logging
//!
//! Initializes the `tracing` subscriber. The human formatter highlights the
//! ambulance/emergency id carried on most engine spans and events; the JSON
//! formatter is the stock `tracing-subscriber` one, picked when piping logs
//! into another tool.

use std::fmt;

use tracing::field::Field;
use tracing::{Event, Subscriber};
use tracing_subscriber::fmt::{format::Writer, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::EnvFilter;

use crate::args::LogFormat;

/// Highlights the `ambulance`/`emergency` id field carried by most engine
/// spans and events, colored by level, with a wall-clock elapsed prefix.
pub struct SimulationFormatter {
    timer: std::time::Instant,
}

impl SimulationFormatter {
    pub fn new() -> Self {
        Self {
            timer: std::time::Instant::now(),
        }
    }

    fn extract_entity_id(event: &Event) -> Option<(&'static str, u64)> {
        let mut visitor = EntityIdExtractor::default();
        event.record(&mut visitor);
        visitor.found
    }
}

#[derive(Default)]
struct EntityIdExtractor {
    found: Option<(&'static str, u64)>,
}

impl tracing::field::Visit for EntityIdExtractor {
    fn record_u64(&mut self, field: &Field, value: u64) {
        match field.name() {
            "ambulance" => self.found = Some(("A", value)),
            "emergency" => self.found = Some(("E", value)),
            _ => {}
        }
    }

    fn record_debug(&mut self, _field: &Field, _value: &dyn fmt::Debug) {}
    fn record_str(&mut self, _field: &Field, _value: &str) {}
    fn record_i64(&mut self, _field: &Field, _value: i64) {}
    fn record_bool(&mut self, _field: &Field, _value: bool) {}
    fn record_error(&mut self, _field: &Field, _value: &(dyn std::error::Error + 'static)) {}
}

impl<S, N> FormatEvent<S, N> for SimulationFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &tracing_subscriber::fmt::FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let elapsed = self.timer.elapsed();
        let metadata = event.metadata();

        write!(writer, "\x1b[90m[{:>8.3}s]\x1b[0m ", elapsed.as_secs_f64())?;

        let level = metadata.level();
        let level_color = match *level {
            tracing::Level::ERROR => "\x1b[31m",
            tracing::Level::WARN => "\x1b[33m",
            tracing::Level::INFO => "\x1b[32m",
            tracing::Level::DEBUG => "\x1b[34m",
            tracing::Level::TRACE => "\x1b[90m",
        };
        write!(writer, "{}[{:>5}]\x1b[0m ", level_color, level)?;

        if let Some((kind, id)) = Self::extract_entity_id(event) {
            write!(writer, "\x1b[35m[{}{}]\x1b[0m ", kind, id)?;
        }

        let target = metadata.target();
        if target != "events" && !target.starts_with(env!("CARGO_PKG_NAME")) {
            write!(writer, "\x1b[90m[{}]\x1b[0m ", target)?;
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;

        writeln!(writer)
    }
}

/// Installs the global `tracing` subscriber for the selected format, reading
/// filter directives from `RUST_LOG` (defaulting to `info`).
pub fn init(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match format {
        LogFormat::Human => tracing_subscriber::fmt()
            .event_format(SimulationFormatter::new())
            .with_ansi(true)
            .with_env_filter(filter)
            .init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
    }
}
