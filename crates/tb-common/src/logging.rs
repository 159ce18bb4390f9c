//! Structured Logging Configuration
//!
//! - JSON output for production (`LOG_FORMAT=json`)
//! - Human-readable output for development (default)
//! - `RUST_LOG` level filtering, defaulting to `info`
//!
//! ```rust,ignore
//! use tb_common::logging::init_logging;
//!
//! fn main() {
//!     init_logging("tb-bridge");
//!     tracing::info!(order_id = %id, "Trigger received");
//! }
//! ```
//!
//! Every inbound trigger is processed inside a `trigger` span carrying the
//! topic and order id, so nested log lines inherit the correlation fields.

use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Initialize logging for a binary.
///
/// Reads `LOG_FORMAT` ("json" for JSON, anything else for text) and
/// `RUST_LOG` for filtering. Calling it twice is harmless: the second
/// registration attempt is ignored.
pub fn init_logging(service_name: &str) {
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_default();
    let env_filter = default_filter();

    if log_format.eq_ignore_ascii_case("json") {
        init_json_logging(env_filter);
    } else {
        init_text_logging(env_filter);
    }

    tracing::debug!(service = service_name, format = %log_format, "Logging initialized");
}

fn default_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

fn init_json_logging(env_filter: EnvFilter) {
    let _ = tracing_subscriber::registry()
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
                .with_span_events(FmtSpan::CLOSE),
        )
        .try_init();
}

fn init_text_logging(env_filter: EnvFilter) {
    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .with_ansi(true),
        )
        .try_init();
}
