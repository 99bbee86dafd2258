//! Telemetry initialization.
//!
//! Controlled by `DOCMERGE_LOG`:
//! - unset → no-op (tracing disabled, zero overhead)
//! - `"stderr"` → JSON events to stderr
//! - `"pretty"` → human-readable events to stderr
//!
//! The level filter comes from `RUST_LOG` and defaults to `info`. The merge
//! engine itself only emits `tracing` events; installing a subscriber is the
//! embedding service's (or a test's) choice.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

/// Output selected by `DOCMERGE_LOG`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogFormat {
    /// No subscriber installed.
    Off,
    /// JSON lines on stderr.
    Json,
    /// Human-readable lines on stderr.
    Pretty,
}

impl LogFormat {
    /// Interpret a `DOCMERGE_LOG` value.
    #[must_use]
    pub fn from_env_value(value: Option<&str>) -> Self {
        match value {
            None | Some("") => Self::Off,
            Some("pretty") => Self::Pretty,
            Some(_) => Self::Json,
        }
    }
}

/// Initialize tracing based on `DOCMERGE_LOG`. Returns the format in use.
///
/// Safe to call more than once; only the first successful call installs a
/// global subscriber.
#[must_use]
pub fn init() -> LogFormat {
    let format = LogFormat::from_env_value(std::env::var("DOCMERGE_LOG").ok().as_deref());
    let filter = || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let installed = match format {
        LogFormat::Off => return format,
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter())
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_span_events(tracing_subscriber::fmt::format::FmtSpan::CLOSE),
            )
            .try_init(),
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(filter())
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(false),
            )
            .try_init(),
    };
    if installed.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
    format
}
