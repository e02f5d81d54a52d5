use std::env::var;
use std::str::FromStr;

use tracing::{level_filters::LevelFilter, warn};
use tracing_subscriber::{Layer, filter::EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Output format of the log layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "compact" | "text" => Ok(LogFormat::Compact),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format '{other}', expected 'compact' or 'json'")),
        }
    }
}

/// Initialize with INFO as the default level; `RUST_LOG_FORMAT` picks the format
pub fn init_tracing() {
    init_tracing_with(None, LevelFilter::INFO);
}

/// Initialize with an explicit format and default level.
///
/// `RUST_LOG` still overrides the level, and a non-empty `RUST_LOG_FORMAT`
/// overrides `format`.
pub fn init_tracing_with(format: Option<LogFormat>, level: LevelFilter) {
    let env_format = var("RUST_LOG_FORMAT").ok().filter(|v| !v.trim().is_empty());

    let (format, bad_env_format) = match env_format {
        Some(value) => match value.parse::<LogFormat>() {
            Ok(parsed) => (parsed, None),
            Err(e) => (format.unwrap_or_default(), Some(e)),
        },
        None => (format.unwrap_or_default(), None),
    };

    initialize_tracing(format, level);

    if let Some(error) = bad_env_format {
        warn!("Ignoring RUST_LOG_FORMAT: {error}");
    }
}

fn initialize_tracing(format: LogFormat, level: LevelFilter) {
    let env_filter = EnvFilter::builder().with_default_directive(level.into()).from_env_lossy();

    let log_layer = match format {
        LogFormat::Json => tracing_subscriber::fmt::layer().json().with_filter(env_filter).boxed(),
        LogFormat::Compact => tracing_subscriber::fmt::layer()
            .compact()
            .without_time()
            .with_filter(env_filter)
            .boxed(),
    };

    // A second init (tests, embedding) keeps the first subscriber
    if tracing_subscriber::registry().with(log_layer).try_init().is_err() {
        warn!("Tracing subscriber already initialized");
    }
}
