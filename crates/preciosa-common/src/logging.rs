//! Tracing subscriber setup shared by the Preciosa binaries.
//!
//! The filter is taken from, in order: explicit directives on the
//! [`LogConfig`], `RUST_LOG`, then the configured level.

use std::fmt;
use std::str::FromStr;

use tracing::{level_filters::LevelFilter, Level, Subscriber};
use tracing_subscriber::{
    fmt::format::FmtSpan,
    layer::SubscriberExt,
    registry::LookupSpan,
    util::{SubscriberInitExt, TryInitError},
    EnvFilter, Layer,
};

/// How log lines are rendered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Multi-line, for a terminal.
    #[default]
    Pretty,
    /// One line per event.
    Compact,
    /// Newline-delimited JSON.
    Json,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LogFormat::Pretty => "pretty",
            LogFormat::Compact => "compact",
            LogFormat::Json => "json",
        })
    }
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format: {other}")),
        }
    }
}

/// What to log and how.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Level used when no directive matches.
    pub level: Level,
    pub format: LogFormat,
    /// Filter directives, e.g. `preciosa_sw=debug,reqwest=warn`.
    pub directives: Option<String>,
    /// Print file and line of each event.
    pub source_locations: bool,
    /// Emit an event with timings when a span closes.
    pub span_timing: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::default(),
            directives: None,
            source_locations: false,
            span_timing: false,
        }
    }
}

impl LogConfig {
    /// Debug level with source locations and span timings.
    pub fn verbose() -> Self {
        Self {
            level: Level::DEBUG,
            source_locations: true,
            span_timing: true,
            ..Self::default()
        }
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_directives(mut self, directives: impl Into<String>) -> Self {
        self.directives = Some(directives.into());
        self
    }

    fn filter(&self) -> EnvFilter {
        let builder = EnvFilter::builder()
            .with_default_directive(LevelFilter::from_level(self.level).into());
        match &self.directives {
            Some(directives) => builder.parse_lossy(directives),
            None => builder.from_env_lossy(),
        }
    }

    fn layer<S>(&self) -> Box<dyn Layer<S> + Send + Sync>
    where
        S: Subscriber + for<'a> LookupSpan<'a>,
    {
        let spans = if self.span_timing {
            FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        };
        let base = tracing_subscriber::fmt::layer()
            .with_span_events(spans)
            .with_file(self.source_locations)
            .with_line_number(self.source_locations);

        match self.format {
            LogFormat::Pretty => base.pretty().boxed(),
            LogFormat::Compact => base.compact().boxed(),
            LogFormat::Json => base.json().with_current_span(false).boxed(),
        }
    }
}

/// Install the global subscriber. Errors if one is already set.
pub fn try_init_logging(config: LogConfig) -> Result<(), TryInitError> {
    tracing_subscriber::registry()
        .with(config.layer())
        .with(config.filter())
        .try_init()
}

/// Install the global subscriber; a second call is a no-op.
pub fn init_logging(config: LogConfig) {
    if let Err(e) = try_init_logging(config) {
        tracing::debug!(error = %e, "Subscriber already installed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_quiet_pretty() {
        let config = LogConfig::default();
        assert_eq!(config.level, Level::INFO);
        assert_eq!(config.format, LogFormat::Pretty);
        assert!(!config.source_locations);
        assert!(!config.span_timing);
    }

    #[test]
    fn test_verbose_keeps_format_override() {
        let config = LogConfig::verbose().with_format(LogFormat::Json);
        assert_eq!(config.level, Level::DEBUG);
        assert!(config.source_locations);
        assert_eq!(config.format, LogFormat::Json);
    }

    #[test]
    fn test_directives_drive_filter() {
        let config = LogConfig::default().with_directives("preciosa_sw=debug,reqwest=warn");
        let filter = config.filter().to_string();
        assert!(filter.contains("preciosa_sw=debug"));
        assert!(filter.contains("reqwest=warn"));
    }

    #[test]
    fn test_log_format_names() {
        assert_eq!("json".parse::<LogFormat>(), Ok(LogFormat::Json));
        assert_eq!("Compact".parse::<LogFormat>(), Ok(LogFormat::Compact));
        assert_eq!(LogFormat::Compact.to_string(), "compact");
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_second_install_is_rejected() {
        let config = LogConfig::default().with_directives("off");
        assert!(try_init_logging(config.clone()).is_ok());
        assert!(try_init_logging(config.clone()).is_err());
        init_logging(config);
    }
}
