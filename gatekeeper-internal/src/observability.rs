use clap::ValueEnum;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, reload, EnvFilter, Layer, Registry};

use crate::error::{Error, ErrorDetails};

/// Used when `RUST_LOG` is unset
pub const DEFAULT_LOG_FILTER: &str = "gateway=info,gatekeeper_internal=info,warn";
const DEBUG_LOG_FILTER: &str = "gateway=debug,gatekeeper_internal=debug,warn";

#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

type FilteredRegistry = tracing_subscriber::layer::Layered<reload::Layer<EnvFilter, Registry>, Registry>;

/// Handle for raising the log level once the config file has been read.
/// Logging has to start before that so config errors are visible.
pub struct DelayedDebugLogs {
    handle: reload::Handle<EnvFilter, Registry>,
}

impl DelayedDebugLogs {
    pub fn enable_debug(&self) -> Result<(), Error> {
        self.handle
            .modify(|filter| *filter = EnvFilter::new(DEBUG_LOG_FILTER))
            .map_err(|e| {
                Error::new(ErrorDetails::InternalError {
                    message: format!("Failed to enable debug logs: {e}"),
                })
            })
    }
}

pub fn log_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
}

/// Install the global subscriber. Must be called at most once per process.
pub fn setup_logs(log_format: LogFormat) -> Result<DelayedDebugLogs, Error> {
    let (filter, handle) = reload::Layer::new(log_filter());
    let fmt_layer: Box<dyn Layer<FilteredRegistry> + Send + Sync> = match log_format {
        LogFormat::Pretty => fmt::layer().boxed(),
        LogFormat::Json => fmt::layer().json().boxed(),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| {
            Error::new_without_logging(ErrorDetails::InternalError {
                message: format!("Failed to initialize logging: {e}"),
            })
        })?;

    Ok(DelayedDebugLogs { handle })
}
