//! RDMnet broker service daemon.
//!
//! Wires the configuration validator and lifecycle coordinator from
//! `brokerd-core` to the process environment: CLI flags, the tracing
//! subscriber with a reloadable filter, POSIX termination signals and the
//! configuration-file watcher.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{reload, EnvFilter, Registry};

use brokerd_core::config_watcher::ConfigWatcher;
use brokerd_core::error::{BrokerError, BrokerResult};
use brokerd_core::log::TracingLogSink;
use brokerd_core::settings::LogLevel;
use brokerd_core::shell::{BrokerShell, ShellHandle};
use brokerd_core::source::FileConfigSource;

mod host;
use host::BrokerEngineHost;

/// Default location of the broker configuration file.
const DEFAULT_CONFIG_PATH: &str = "/etc/brokerd/broker.conf";

#[derive(Parser)]
#[command(name = "brokerd", version, about = "RDMnet broker service daemon")]
struct Cli {
    /// Path to the broker configuration file
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Run with verbose logging in the foreground
    #[arg(long)]
    debug: bool,
}

type FilterHandle = reload::Handle<EnvFilter, Registry>;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter_handle = match init_tracing(cli.debug) {
        Ok(handle) => handle,
        Err(err) => {
            // Without a log sink the daemon is not operable.
            eprintln!("FATAL: {err}");
            return ExitCode::FAILURE;
        }
    };

    tracing::info!("brokerd {} starting", env!("CARGO_PKG_VERSION"));

    let log = Arc::new(TracingLogSink::with_level_applier(move |level| {
        apply_log_level(&filter_handle, level);
    }));

    let shell = BrokerShell::new(
        Box::new(BrokerEngineHost::default()),
        Box::new(FileConfigSource::new(cli.config.clone())),
        log,
    );
    let handle = shell.handle();

    spawn_signal_listener(handle.clone());

    // Hot reload is best effort; the daemon still runs without it.
    let mut watcher = match ConfigWatcher::new(&cli.config, handle) {
        Ok(watcher) => Some(watcher),
        Err(err) => {
            tracing::warn!("Configuration hot-reload is unavailable: {err}");
            None
        }
    };

    let result = shell.run().await;

    if let Some(watcher) = watcher.as_mut() {
        watcher.stop().await;
    }

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!("Broker exited with an error: {err}");
            ExitCode::FAILURE
        }
    }
}

/// Install the tracing subscriber with a reloadable level filter, so the
/// validated configuration's `log_level` can be applied at runtime.
fn init_tracing(debug: bool) -> BrokerResult<FilterHandle> {
    let default_filter = if debug {
        "brokerd=debug,brokerd_core=debug"
    } else {
        "brokerd=info,brokerd_core=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let (filter_layer, filter_handle) = reload::Layer::new(filter);

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .map_err(|err| BrokerError::LogSetup(err.to_string()))?;

    Ok(filter_handle)
}

fn apply_log_level(filter_handle: &FilterHandle, level: LogLevel) {
    let directive = match level {
        LogLevel::Debug => "debug",
        LogLevel::Info | LogLevel::Notice => "info",
        LogLevel::Warning => "warn",
        LogLevel::Err | LogLevel::Crit | LogLevel::Alert | LogLevel::Emerg => "error",
    };
    match EnvFilter::try_new(directive) {
        Ok(filter) => {
            if let Err(err) = filter_handle.reload(filter) {
                tracing::warn!("Failed to apply log level \"{level}\": {err}");
            }
        }
        Err(err) => tracing::warn!("Failed to build filter for log level \"{level}\": {err}"),
    }
}

/// SIGINT and SIGTERM both request a graceful shutdown; the coordinator
/// honors it ahead of any pending restart.
fn spawn_signal_listener(handle: ShellHandle) {
    tokio::spawn(async move {
        wait_for_termination_signal().await;
        handle.shutdown();
    });
}

#[cfg(unix)]
async fn wait_for_termination_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(err) => {
            tracing::warn!("Failed to install SIGTERM handler: {err}");
            wait_for_interrupt().await;
            return;
        }
    };

    tokio::select! {
        _ = wait_for_interrupt() => {}
        _ = sigterm.recv() => {
            tracing::info!("SIGTERM received.");
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_termination_signal() {
    wait_for_interrupt().await;
}

async fn wait_for_interrupt() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Interrupt received."),
        Err(err) => {
            tracing::warn!("Failed to listen for interrupt signals: {err}");
            // Leave shutdown to the remaining signal handlers, if any.
            std::future::pending::<()>().await;
        }
    }
}
