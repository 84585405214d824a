//! IPC Server module for gauge and notification clients.
//!
//! This module owns the shared daemon state (the estimator behind a single
//! lock) and provides a Unix Domain Socket server that answers status
//! queries and threshold updates.

use crate::config::{Config, ConfigManager};
use crate::error::{EstimatorError, IpcError};
use crate::estimator::{BatteryStateEstimator, EstimateSnapshot, Sample};
use crate::gauge::GaugeModel;
use crate::summary::StatusSummary;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

#[cfg(unix)]
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
#[cfg(unix)]
use tokio::net::{UnixListener, UnixStream};

/// Commands that can be received via IPC.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "command")]
pub enum IpcCommand {
    Start,
    Stop,
    SetThresholds { warning_level: u8, critical_level: u8 },
    GetStatus,
}

/// Configuration portion of status response.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ConfigResponse {
    pub warning_level: u8,
    pub critical_level: u8,
    pub poll_interval_secs: u64,
    pub enabled: bool,
}

impl From<&Config> for ConfigResponse {
    fn from(config: &Config) -> Self {
        Self {
            warning_level: config.warning_level,
            critical_level: config.critical_level,
            poll_interval_secs: config.poll_interval_secs,
            enabled: config.enabled,
        }
    }
}

/// Status response sent to clients.
///
/// `snapshot`, `gauge` and `summary` stay `None` until the first sample has
/// been accepted.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct StatusResponse {
    pub running: bool,
    pub snapshot: Option<EstimateSnapshot>,
    pub gauge: Option<GaugeModel>,
    pub summary: Option<StatusSummary>,
    pub samples_ingested: u64,
    pub samples_rejected: u64,
    pub config: ConfigResponse,
}

/// Shared daemon state accessible by the sampler task and the IPC server.
pub struct DaemonState {
    /// Whether the sampling loop is feeding the estimator
    pub running: AtomicBool,
    /// Battery estimator; the sampling task is its only writer
    pub estimator: RwLock<BatteryStateEstimator>,
    /// Accepted samples since start
    pub samples_ingested: AtomicU64,
    /// Rejected samples since start
    pub samples_rejected: AtomicU64,
    /// Configuration manager
    pub config_manager: Arc<ConfigManager>,
}

impl DaemonState {
    /// Create a new daemon state with the given config manager.
    pub fn new(config_manager: Arc<ConfigManager>) -> Self {
        let config = config_manager.get();
        Self {
            running: AtomicBool::new(config.enabled),
            estimator: RwLock::new(BatteryStateEstimator::new(config.rates)),
            samples_ingested: AtomicU64::new(0),
            samples_rejected: AtomicU64::new(0),
            config_manager,
        }
    }

    /// Feed a sample to the estimator under the write lock.
    pub async fn ingest(&self, sample: Sample) -> Result<EstimateSnapshot, EstimatorError> {
        let mut estimator = self.estimator.write().await;
        match estimator.ingest(sample) {
            Ok(snapshot) => {
                self.samples_ingested.fetch_add(1, Ordering::SeqCst);
                Ok(snapshot)
            }
            Err(e) => {
                self.samples_rejected.fetch_add(1, Ordering::SeqCst);
                warn!("Rejected battery sample: {}", e);
                Err(e)
            }
        }
    }

    /// Latest estimate, or `None` before the first accepted sample.
    pub async fn latest_snapshot(&self) -> Option<EstimateSnapshot> {
        let estimator = self.estimator.read().await;
        estimator
            .state()
            .last_transition_time
            .map(|_| estimator.snapshot())
    }

    /// Get the current status as a StatusResponse.
    pub async fn get_status(&self) -> StatusResponse {
        let config = self.config_manager.get();
        let snapshot = self.latest_snapshot().await;
        let thresholds = config.thresholds();

        StatusResponse {
            running: self.is_running(),
            gauge: snapshot
                .as_ref()
                .map(|s| GaugeModel::from_snapshot(s, &thresholds)),
            summary: snapshot.as_ref().map(StatusSummary::from_snapshot),
            snapshot,
            samples_ingested: self.samples_ingested.load(Ordering::SeqCst),
            samples_rejected: self.samples_rejected.load(Ordering::SeqCst),
            config: ConfigResponse::from(&config),
        }
    }

    /// Resume sampling.
    ///
    /// Resuming from a pause starts a new monitoring session: the estimator
    /// is replaced so the first sample never measures its rate across the
    /// pause. Starting an already running daemon changes nothing.
    pub async fn start(&self) {
        let mut estimator = self.estimator.write().await;
        if !self.running.swap(true, Ordering::SeqCst) {
            *estimator = BatteryStateEstimator::new(self.config_manager.get().rates);
            debug!("Estimator reset for a new monitoring session");
        }
    }

    /// Pause sampling.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// Unix Domain Socket server for IPC.
#[cfg(unix)]
pub struct IpcServer {
    socket_path: PathBuf,
    listener: UnixListener,
}

#[cfg(unix)]
impl IpcServer {
    /// Bind a new IPC server at `path`, replacing any stale socket file.
    pub async fn new(path: &Path) -> Result<Self, IpcError> {
        let socket_path = path.to_path_buf();

        Self::cleanup_socket(&socket_path)?;

        let listener = UnixListener::bind(&socket_path).map_err(|e| IpcError::SocketBindFailed {
            path: socket_path.display().to_string(),
            source: e,
        })?;

        Ok(Self {
            socket_path,
            listener,
        })
    }

    fn cleanup_socket(path: &Path) -> Result<(), IpcError> {
        if path.exists() {
            std::fs::remove_file(path).map_err(|e| IpcError::SocketBindFailed {
                path: path.display().to_string(),
                source: e,
            })?;
        }
        Ok(())
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Accept connections forever, one task per client.
    pub async fn run(&self, state: Arc<DaemonState>) -> Result<(), IpcError> {
        loop {
            match self.listener.accept().await {
                Ok((stream, _addr)) => {
                    let state = Arc::clone(&state);
                    tokio::spawn(async move {
                        if let Err(e) = Self::handle_connection(stream, state).await {
                            warn!("Error handling IPC connection: {}", e);
                        }
                    });
                }
                Err(e) => {
                    tracing::error!("Error accepting IPC connection: {}", e);
                }
            }
        }
    }

    /// Serve newline-delimited JSON commands until the client hangs up.
    async fn handle_connection(stream: UnixStream, state: Arc<DaemonState>) -> Result<(), IpcError> {
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);
        let mut line = String::new();

        while reader.read_line(&mut line).await? > 0 {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                line.clear();
                continue;
            }

            let response = match serde_json::from_str::<IpcCommand>(trimmed) {
                Ok(command) => Self::handle_command(command, &state).await,
                Err(e) => serde_json::json!({
                    "error": IpcError::InvalidCommand(e.to_string()).to_string()
                }),
            };

            let response_str = serde_json::to_string(&response)?;
            writer.write_all(response_str.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await?;

            line.clear();
        }

        Ok(())
    }

    /// Handle a single IPC command and return the response.
    pub async fn handle_command(command: IpcCommand, state: &Arc<DaemonState>) -> serde_json::Value {
        match command {
            IpcCommand::Start => {
                state.start().await;
                tracing::info!("Sampling started via IPC");
                serde_json::json!({ "success": true, "message": "Sampling started" })
            }

            IpcCommand::Stop => {
                state.stop();
                tracing::info!("Sampling stopped via IPC");
                serde_json::json!({ "success": true, "message": "Sampling stopped" })
            }

            IpcCommand::SetThresholds {
                warning_level,
                critical_level,
            } => {
                let mut config = state.config_manager.get();
                config.warning_level = warning_level;
                config.critical_level = critical_level;

                match state.config_manager.update(config) {
                    Ok(()) => {
                        tracing::info!(
                            "Thresholds updated via IPC: warning_level={}, critical_level={}",
                            warning_level,
                            critical_level
                        );
                        serde_json::json!({ "success": true, "message": "Thresholds updated" })
                    }
                    Err(e) => {
                        warn!("Failed to update thresholds via IPC: {}", e);
                        serde_json::json!({
                            "success": false,
                            "error": e.to_string()
                        })
                    }
                }
            }

            IpcCommand::GetStatus => {
                let status = state.get_status().await;
                debug!("Status requested via IPC");
                serde_json::to_value(status).unwrap_or_else(|e| {
                    serde_json::json!({
                        "error": format!("Failed to serialize status: {}", e)
                    })
                })
            }
        }
    }
}

#[cfg(unix)]
impl Drop for IpcServer {
    fn drop(&mut self) {
        if self.socket_path.exists() {
            let _ = std::fs::remove_file(&self.socket_path);
        }
    }
}
