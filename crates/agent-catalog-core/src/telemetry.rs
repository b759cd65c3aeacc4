//! Tracing subscriber setup for catalog binaries.
//!
//! Library code only emits events; installing a subscriber is left to the
//! binary. [`init_tracing`] is idempotent because the global subscriber can
//! only be set once per process.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Output encoding for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    /// Newline-delimited JSON.
    Json,
}

impl LogFormat {
    pub fn from_json_flag(json: bool) -> Self {
        if json {
            Self::Json
        } else {
            Self::Text
        }
    }
}

/// Build the filter: `RUST_LOG` if set, otherwise `level`.
pub fn env_filter(level: Level) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()))
}

/// Install the global subscriber, writing to stderr so stdout stays free
/// for command output. Later calls are ignored.
pub fn init_tracing(format: LogFormat, level: Level) {
    let filter = env_filter(level);
    let registry = tracing_subscriber::registry().with(filter);

    let installed = match format {
        LogFormat::Json => registry
            .with(fmt::layer().with_writer(std::io::stderr).json())
            .try_init(),
        LogFormat::Text => registry
            .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
            .try_init(),
    };
    if installed.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}
