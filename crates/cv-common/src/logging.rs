//! Structured logging setup
//!
//! Text output for development, JSON output for log aggregation.
//!
//! # Environment Variables
//!
//! - `LOG_FORMAT`: "json" for JSON output, anything else for text (default: text)
//! - `RUST_LOG`: level filter (default: info), e.g. `RUST_LOG=cv_dispatch=debug`
//!
//! Dispatch code logs with structured fields (`route`, `message_id`, `outcome`)
//! so both formats can be filtered per route:
//!
//! ```rust,ignore
//! cv_common::logging::init_logging("cv-consumer");
//! tracing::info!(route = %name, "route started");
//! ```

use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Output format selected by `LOG_FORMAT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl LogFormat {
    pub fn from_env() -> Self {
        Self::parse(&std::env::var("LOG_FORMAT").unwrap_or_default())
    }

    pub fn parse(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("json") {
            LogFormat::Json
        } else {
            LogFormat::Text
        }
    }
}

/// Install the global subscriber for a service.
///
/// Does nothing if a subscriber is already installed, so tests and embedding
/// applications can call it more than once.
pub fn init_logging(service_name: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let format = LogFormat::from_env();
    let installed = match format {
        LogFormat::Json => init_json_logging(env_filter),
        LogFormat::Text => init_text_logging(env_filter),
    };

    if installed {
        tracing::debug!(service = %service_name, format = ?format, "Logging initialized");
    }
}

fn init_json_logging(env_filter: EnvFilter) -> bool {
    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .json()
                .with_current_span(true)
                .with_span_list(true)
                .with_file(true)
                .with_line_number(true)
                .with_target(true)
                .flatten_event(true)
                .with_span_events(FmtSpan::CLOSE)
        )
        .try_init()
        .is_ok()
}

fn init_text_logging(env_filter: EnvFilter) -> bool {
    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(false)
                .with_ansi(true)
        )
        .try_init()
        .is_ok()
}
