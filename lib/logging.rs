use crate::build_info;
use std::backtrace::Backtrace;
use std::error::Error as StdError;

use tracing_log::LogTracer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Output format for runtime logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Text,
}

impl LogFormat {
    /// Resolves the log format from `LOG_FORMAT` (`json` by default, or `text`).
    fn from_env() -> Self {
        std::env::var("LOG_FORMAT")
            .map(|raw| Self::parse(&raw))
            .unwrap_or(Self::Json)
    }

    fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "text" => Self::Text,
            _ => Self::Json,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Text => "text",
        }
    }
}

/// Initializes process-wide logging and emits one bootstrap event.
///
/// `log` records from dependencies are bridged into `tracing`. `RUST_LOG` overrides
/// `default_level` when set.
pub fn init_logging(service: &str, mode: &str, default_level: &str) -> LogFormat {
    let format = LogFormat::from_env();
    install_subscriber(format, default_level);

    tracing::info!(
        event = "logging_initialized",
        service = %service,
        mode = %mode,
        pid = std::process::id(),
        build_version = build_info::VERSION,
        build_commit = build_info::short_commit_hash(),
        log_format = format.as_str(),
        "initialized logging"
    );

    format
}

fn install_subscriber(format: LogFormat, default_level: &str) {
    let _ = LogTracer::init();

    let result = match format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(default_env_filter(default_level))
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_current_span(true)
                    .with_span_list(false)
                    .flatten_event(true),
            )
            .try_init(),
        LogFormat::Text => tracing_subscriber::registry()
            .with(default_env_filter(default_level))
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .try_init(),
    };

    let _ = result;
}

fn default_env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Builds a multi-line error report with the full source chain and a backtrace.
///
/// Meant for the process boundary, where `%err` alone would hide nested causes such as the
/// socket error under a THORNode request failure.
pub fn format_error_report(err: &(dyn StdError + 'static)) -> String {
    let mut report = format!("error: {err}");

    let mut current_source = err.source();
    let mut source_index = 1usize;
    while let Some(source) = current_source {
        report.push_str(&format!("\ncaused by ({source_index}): {source}"));
        current_source = source.source();
        source_index = source_index.saturating_add(1);
    }

    report.push_str("\nbacktrace:\n");
    report.push_str(&Backtrace::force_capture().to_string());
    report
}
