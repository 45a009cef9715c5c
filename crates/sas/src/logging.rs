// Logging - the process-wide tracing subscriber

use thiserror::Error;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt};

/// Filter used when neither `RUST_LOG` nor the configuration sets one
pub const DEFAULT_FILTER: &str = "sas=info,sas_core=info,sas_bypass=info";

#[derive(Error, Debug)]
#[error("Logging is already initialized: {0}")]
pub struct LoggingError(#[from] TryInitError);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogOptions {
    /// Used when `RUST_LOG` is unset or invalid
    pub filter: String,
    pub json: bool,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            filter: DEFAULT_FILTER.to_string(),
            json: false,
        }
    }
}

impl LogOptions {
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = filter.into();
        self
    }

    pub fn with_json(mut self, json: bool) -> Self {
        self.json = json;
        self
    }
}

/// Install the global subscriber. A second call fails.
pub fn init(options: &LogOptions) -> Result<(), LoggingError> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&options.filter));
    let registry = tracing_subscriber::registry().with(filter);

    if options.json {
        registry.with(fmt::layer().json()).try_init()?;
    } else {
        registry.with(fmt::layer()).try_init()?;
    }
    Ok(())
}
