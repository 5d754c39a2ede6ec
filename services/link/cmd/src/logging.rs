//! Console log format for the link binary.
//!
//! Lines look like `[2026-01-01 12:00:00.000] [link-session        ] [ℹ INFO   ] message`.
//! Events may carry a `component` field (see [`component_info!`]) which
//! replaces the service column with `link-<component>`.

use std::fmt;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::{format::Writer, FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;

const COLOR_RESET: &str = "\x1b[0m";
const COLOR_CYAN: &str = "\x1b[36m";
const COLOR_GREEN: &str = "\x1b[32m";
const COLOR_BRIGHT_YELLOW: &str = "\x1b[93m";
const COLOR_BRIGHT_RED: &str = "\x1b[91m";
const COLOR_BRIGHT_GRAY: &str = "\x1b[90m";

const SERVICE_NAME_WIDTH: usize = 20;
const LOG_LEVEL_WIDTH: usize = 9;

/// Log an info event tagged with a component
#[macro_export]
macro_rules! component_info {
    ($component:expr, $($arg:tt)*) => {
        tracing::info!(component = $component, $($arg)*)
    };
}

/// Log a warning tagged with a component
#[macro_export]
macro_rules! component_warn {
    ($component:expr, $($arg:tt)*) => {
        tracing::warn!(component = $component, $($arg)*)
    };
}

/// Log a debug event tagged with a component
#[macro_export]
macro_rules! component_debug {
    ($component:expr, $($arg:tt)*) => {
        tracing::debug!(component = $component, $($arg)*)
    };
}

/// Log an error tagged with a component
#[macro_export]
macro_rules! component_error {
    ($component:expr, $($arg:tt)*) => {
        tracing::error!(component = $component, $($arg)*)
    };
}

/// Fixed-column event formatter
pub struct LinkLogFormatter {
    service_name: String,
    color_enabled: bool,
}

impl LinkLogFormatter {
    /// Create a formatter; colors are used when stdout looks like a terminal
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            color_enabled: is_terminal(),
        }
    }

    /// Create a formatter that never emits ANSI escapes
    pub fn plain(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            color_enabled: false,
        }
    }

    fn format_service_name(&self, component: Option<&str>) -> String {
        let name = match component {
            Some(component) => format!("link-{}", component),
            None => self.service_name.clone(),
        };

        if name.chars().count() > SERVICE_NAME_WIDTH {
            let truncated: String = name.chars().take(SERVICE_NAME_WIDTH - 1).collect();
            format!("{}…", truncated)
        } else {
            format!("{:<width$}", name, width = SERVICE_NAME_WIDTH)
        }
    }

    fn format_level(&self, level: &Level) -> String {
        let label = match *level {
            Level::ERROR => "✗ ERROR",
            Level::WARN => "⚠ WARN",
            Level::INFO => "ℹ INFO",
            Level::DEBUG => "◦ DEBUG",
            Level::TRACE => "◦ TRACE",
        };
        format!("{:<width$}", label, width = LOG_LEVEL_WIDTH)
    }

    fn level_color(&self, level: &Level) -> &'static str {
        if !self.color_enabled {
            return "";
        }
        match *level {
            Level::ERROR => COLOR_BRIGHT_RED,
            Level::WARN => COLOR_BRIGHT_YELLOW,
            Level::INFO => COLOR_GREEN,
            Level::DEBUG | Level::TRACE => COLOR_BRIGHT_GRAY,
        }
    }

    fn render(&self, timestamp: &str, level: &Level, fields: &FieldVisitor) -> String {
        let (cyan, color, reset) = if self.color_enabled {
            (COLOR_CYAN, self.level_color(level), COLOR_RESET)
        } else {
            ("", "", "")
        };
        let mut line = format!(
            "{}[{}] [{}] [{}{}{}] {}",
            cyan,
            timestamp,
            self.format_service_name(fields.component.as_deref()),
            color,
            self.format_level(level),
            reset,
            fields.message
        );
        for (name, value) in &fields.extra {
            line.push_str(&format!(" {}={}", name, value));
        }
        line.push_str(reset);
        line
    }
}

impl<S, N> FormatEvent<S, N> for LinkLogFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let timestamp = chrono::Local::now()
            .format("%Y-%m-%d %H:%M:%S%.3f")
            .to_string();

        let mut fields = FieldVisitor::default();
        event.record(&mut fields);

        writeln!(
            writer,
            "{}",
            self.render(&timestamp, event.metadata().level(), &fields)
        )
    }
}

/// Collects the message, the component tag and any other fields of an event
#[derive(Default)]
struct FieldVisitor {
    message: String,
    component: Option<String>,
    extra: Vec<(&'static str, String)>,
}

fn unquote(s: String) -> String {
    if s.len() >= 2 && s.starts_with('"') && s.ends_with('"') {
        s[1..s.len() - 1].to_string()
    } else {
        s
    }
}

impl tracing::field::Visit for FieldVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn fmt::Debug) {
        let value = unquote(format!("{:?}", value));
        match field.name() {
            "message" => self.message = value,
            "component" => self.component = Some(value),
            name => self.extra.push((name, value)),
        }
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        match field.name() {
            "message" => self.message = value.to_string(),
            "component" => self.component = Some(value.to_string()),
            name => self.extra.push((name, value.to_string())),
        }
    }
}

fn is_terminal() -> bool {
    match std::env::var("TERM") {
        Ok(term) => term != "dumb",
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_column_width() {
        let formatter = LinkLogFormatter::plain("link");
        assert_eq!(formatter.format_service_name(None).len(), SERVICE_NAME_WIDTH);
        assert_eq!(
            formatter.format_service_name(Some("session")).trim_end(),
            "link-session"
        );

        let long = formatter.format_service_name(Some("a-very-long-component-name"));
        assert_eq!(long.chars().count(), SERVICE_NAME_WIDTH);
        assert!(long.ends_with('…'));
    }

    #[test]
    fn test_plain_line_layout() {
        let formatter = LinkLogFormatter::plain("link");
        let fields = FieldVisitor {
            message: "Session 1 connected".to_string(),
            component: Some("call".to_string()),
            extra: vec![("seq", "4".to_string())],
        };
        let line = formatter.render("2026-01-01 00:00:00.000", &Level::INFO, &fields);
        assert!(line.starts_with("[2026-01-01 00:00:00.000] [link-call"));
        assert!(line.contains("[ℹ INFO"));
        assert!(line.ends_with("Session 1 connected seq=4"));
        assert!(!line.contains('\x1b'));
    }
}
