//! Battery Gauge Daemon - battery time-remaining estimation for Linux.
//!
//! This daemon samples the battery from the kernel power-supply class,
//! keeps a running time-remaining estimate, and serves gauge and status
//! data to local clients over a Unix socket.

use battery_gauge::config::ConfigManager;
use battery_gauge::error::{DaemonError, IpcError};
use battery_gauge::ipc_server::DaemonState;
use battery_gauge::logging;
use battery_gauge::sampler::{SampleSource, SysfsSampler};
use battery_gauge::summary::StatusSummary;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Retry interval for battery discovery in seconds
const DISCOVERY_RETRY_INTERVAL_SECS: u64 = 30;

/// Graceful shutdown timeout in seconds
const SHUTDOWN_TIMEOUT_SECS: u64 = 2;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _log_guard = logging::init_logging().map_err(|e| {
        eprintln!("Failed to initialize logging: {}", e);
        DaemonError::from(e)
    })?;

    info!("Battery gauge daemon starting...");

    let result = run_daemon().await;

    match &result {
        Ok(()) => info!("Battery gauge daemon shut down gracefully"),
        Err(e) => error!("Battery gauge daemon error: {}", e),
    }

    result.map_err(Into::into)
}

async fn run_daemon() -> Result<(), DaemonError> {
    let config_path = ConfigManager::default_path();
    let config_manager = Arc::new(ConfigManager::load_or_default(&config_path)?);
    info!("Configuration loaded from {:?}", config_path);

    let config = config_manager.get();
    let daemon_state = Arc::new(DaemonState::new(Arc::clone(&config_manager)));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(async move {
        if let Err(e) = setup_signal_handlers(shutdown_tx).await {
            error!("Signal handler error: {}", e);
        }
    });

    let ipc_state = Arc::clone(&daemon_state);
    let ipc_shutdown_rx = shutdown_rx.clone();
    let socket_path = config.socket_path.clone();
    let ipc_handle = tokio::spawn(async move {
        run_ipc_server_loop(ipc_state, socket_path, ipc_shutdown_rx).await
    });

    let sampling_state = Arc::clone(&daemon_state);
    let sampling_shutdown_rx = shutdown_rx.clone();
    let sampling_handle = tokio::spawn(async move {
        run_sampling_loop(sampling_state, config.power_supply_path, sampling_shutdown_rx).await
    });

    info!("Battery gauge daemon initialized and running");

    let mut shutdown_rx_main = shutdown_rx.clone();
    shutdown_rx_main.changed().await.ok();

    info!("Shutdown signal received, stopping tasks...");

    let shutdown_timeout = Duration::from_secs(SHUTDOWN_TIMEOUT_SECS);
    let _ = tokio::time::timeout(shutdown_timeout, async {
        let _ = tokio::join!(ipc_handle, sampling_handle);
    })
    .await;

    info!("All tasks stopped");
    Ok(())
}

/// Wait for SIGTERM or SIGINT and broadcast shutdown.
#[cfg(unix)]
async fn setup_signal_handlers(
    shutdown_tx: watch::Sender<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::select! {
        _ = sigterm.recv() => {
            info!("Received SIGTERM");
        }
        _ = sigint.recv() => {
            info!("Received SIGINT");
        }
    }

    let _ = shutdown_tx.send(true);
    Ok(())
}

#[cfg(not(unix))]
async fn setup_signal_handlers(
    shutdown_tx: watch::Sender<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tokio::signal::ctrl_c().await?;
    info!("Received Ctrl+C");
    let _ = shutdown_tx.send(true);
    Ok(())
}

/// Keep the IPC server up, rebinding after failures.
async fn run_ipc_server_loop(
    state: Arc<DaemonState>,
    socket_path: PathBuf,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    info!("IPC server shutting down");
                    break;
                }
            }
            result = run_ipc_server_inner(Arc::clone(&state), &socket_path) => {
                match result {
                    Ok(()) => break,
                    Err(e) => {
                        error!("IPC server error: {}, restarting in 5 seconds", e);
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                }
            }
        }
    }
}

#[cfg(unix)]
async fn run_ipc_server_inner(state: Arc<DaemonState>, socket_path: &Path) -> Result<(), IpcError> {
    let server = battery_gauge::ipc_server::IpcServer::new(socket_path).await?;
    info!("IPC server listening on {:?}", server.socket_path());
    server.run(state).await
}

#[cfg(not(unix))]
async fn run_ipc_server_inner(_state: Arc<DaemonState>, _socket_path: &Path) -> Result<(), IpcError> {
    warn!("IPC server not available on this platform");
    loop {
        tokio::time::sleep(Duration::from_secs(3600)).await;
    }
}

/// Discover the battery, then sample it on the configured interval.
async fn run_sampling_loop(
    state: Arc<DaemonState>,
    power_supply_path: PathBuf,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let retry_interval = Duration::from_secs(DISCOVERY_RETRY_INTERVAL_SECS);

    let sampler = loop {
        if *shutdown_rx.borrow() {
            info!("Sampling shutting down");
            return;
        }

        match SysfsSampler::discover(&power_supply_path) {
            Ok(sampler) => break sampler,
            Err(e) => {
                warn!(
                    "Battery discovery failed: {}, retrying in {} seconds",
                    e, DISCOVERY_RETRY_INTERVAL_SECS
                );
                tokio::select! {
                    _ = shutdown_rx.changed() => {}
                    _ = tokio::time::sleep(retry_interval) => {}
                }
            }
        }
    };

    info!("Monitoring battery at {:?}", sampler.battery_path());

    loop {
        let poll_interval = Duration::from_secs(state.config_manager.get().poll_interval_secs);

        if state.is_running() {
            sample_once(&state, &sampler).await;
        }

        tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    info!("Sampling shutting down");
                    return;
                }
            }
            _ = tokio::time::sleep(poll_interval) => {}
        }
    }
}

async fn sample_once(state: &DaemonState, source: &impl SampleSource) {
    let sample = match source.read_sample() {
        Ok(sample) => sample,
        Err(e) => {
            warn!("Battery sample failed: {}", e);
            return;
        }
    };
    debug!(?sample, "Battery sampled");

    if let Ok(snapshot) = state.ingest(sample).await {
        let summary = StatusSummary::from_snapshot(&snapshot);
        info!(
            level = snapshot.level,
            seconds_to_full = snapshot.seconds_to_full,
            seconds_to_empty = snapshot.seconds_to_empty,
            "{} ({})",
            summary.title,
            summary.text
        );
    }
}
