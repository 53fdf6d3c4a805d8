use clap::Parser;
use mimalloc::MiMalloc;
use std::fmt::Display;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::time::Duration;
use tokio::signal;

use gatekeeper_internal::config::Config;
use gatekeeper_internal::error;
use gatekeeper_internal::gateway_util::{self, AppStateData};
use gatekeeper_internal::observability::{self, LogFormat};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

/// How often ended rate limit windows are swept when `stale_bucket_sweep` is on
const STALE_WINDOW_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Use the config file at the specified path. Incompatible with `--default-config`
    #[arg(long)]
    config_file: Option<PathBuf>,

    /// Use the default config. Incompatible with `--config-file`
    #[arg(long)]
    default_config: bool,

    /// Sets the log format used for all gateway logs.
    #[arg(long)]
    #[arg(value_enum)]
    #[clap(default_value_t = LogFormat::default())]
    log_format: LogFormat,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    // Set up logs immediately, so that we can use `tracing`.
    // Debug logs are enabled later based on the config file
    let delayed_debug_logs =
        observability::setup_logs(args.log_format).expect_pretty("Failed to set up logs");

    tracing::info!("Starting Gatekeeper {}", env!("CARGO_PKG_VERSION"));

    if args.config_file.is_some() && args.default_config {
        tracing::error!("Cannot specify both `--config-file` and `--default-config`");
        std::process::exit(1);
    }

    if !args.default_config && args.config_file.is_none() {
        tracing::warn!("No config-related arguments given. Use `--default-config` to start the gateway with the default config.");
    }

    let config = if let Some(path) = &args.config_file {
        Config::load_from_path(path)
            .await
            .ok() // Don't print the error here, since it was already printed when it was constructed
            .expect_pretty("Failed to load config")
    } else {
        Config::default()
    };

    if config.gateway.debug {
        delayed_debug_logs
            .enable_debug()
            .expect_pretty("Failed to enable debug logs");
    }
    error::set_debug(config.gateway.debug).expect_pretty("Failed to set debug mode");

    let app_state = AppStateData::new();

    let sweeper = if config.gateway.stale_bucket_sweep {
        tracing::info!(
            "Sweeping ended rate limit windows every {}s",
            STALE_WINDOW_SWEEP_INTERVAL.as_secs()
        );
        Some(
            app_state
                .rate_limiter
                .clone()
                .start_stale_window_sweep(STALE_WINDOW_SWEEP_INTERVAL),
        )
    } else {
        None
    };

    let router = gateway_util::build_router(app_state.clone());

    let bind_address = config.gateway.bind_address();
    let listener = match tokio::net::TcpListener::bind(bind_address).await {
        Ok(listener) => listener,
        Err(e) if e.kind() == ErrorKind::AddrInUse => {
            tracing::error!(
                "Failed to bind to socket address {bind_address}: {e}. Tip: Ensure no other process is using port {} or try a different port.",
                bind_address.port()
            );
            std::process::exit(1);
        }
        Err(e) => {
            tracing::error!("Failed to bind to socket address {bind_address}: {e}");
            std::process::exit(1);
        }
    };
    // This will give us the chosen port if the user specified a port of 0
    let actual_bind_address = listener
        .local_addr()
        .expect_pretty("Failed to get bind address from listener");

    let config_path_pretty = if let Some(path) = &args.config_file {
        format!("config file `{}`", path.to_string_lossy())
    } else {
        "no config file".to_string()
    };

    tracing::info!("Gatekeeper is listening on {actual_bind_address} with {config_path_pretty}.");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect_pretty("Failed to start server");

    if let Some(sweeper) = sweeper {
        sweeper.abort();
    }

    let snapshot = app_state.metrics.snapshot();
    tracing::info!(
        admitted = snapshot.admitted,
        rate_limited = snapshot.rate_limited,
        unauthenticated = snapshot.unauthenticated,
        streams_started = snapshot.streams_started,
        streams_completed = snapshot.streams_completed,
        streams_disconnected = snapshot.streams_disconnected,
        "Gatekeeper shut down"
    );
}

pub async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect_pretty("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect_pretty("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM signal");
        }
    };
}

/// We don't allow panic, expect, unwrap, or similar methods in the codebase,
/// except for the private `expect_pretty` method, which is to be used only in
/// main.rs during initialization. After initialization, all errors are handled.
///
/// `expect_pretty` logs the error message and exits with a status code of 1.
trait ExpectPretty<T> {
    fn expect_pretty(self, msg: &str) -> T;
}

impl<T, E: Display> ExpectPretty<T> for Result<T, E> {
    fn expect_pretty(self, msg: &str) -> T {
        match self {
            Ok(value) => value,
            Err(err) => {
                tracing::error!("{msg}: {err}");
                std::process::exit(1);
            }
        }
    }
}

impl<T> ExpectPretty<T> for Option<T> {
    fn expect_pretty(self, msg: &str) -> T {
        match self {
            Some(value) => value,
            None => {
                tracing::error!("{msg}");
                std::process::exit(1);
            }
        }
    }
}
