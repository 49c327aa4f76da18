//! Tracing setup for the CLI.
//!
//! Human-readable console lines by default, JSON lines when asked, with
//! the filter steerable through `RUST_LOG`.

use tracing::Level;
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// How the subscriber renders and filters.
#[derive(Default)]
pub struct LogConfig {
    /// Emit JSON lines instead of the console format.
    pub json: bool,
    /// Default this crate's level to DEBUG instead of INFO.
    pub verbose: bool,
}

/// Install the global tracing subscriber.
///
/// Call once, early in `main()`. A `RUST_LOG` value replaces the computed
/// default filter entirely.
pub fn init(config: LogConfig) {
    let default_level = if config.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("tlgrab={}", default_level.as_str().to_lowercase()))
    });

    if config.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .json()
                    .with_span_events(FmtSpan::CLOSE)
                    .with_current_span(true)
                    .with_target(true),
            )
            .init();
    } else {
        // Console output; targets and thread ids are noise for a CLI.
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .init();
    }
}
