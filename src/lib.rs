//! Battery Gauge - time-remaining estimation for a single laptop battery.
//!
//! The estimator turns periodic battery samples into charging/discharging
//! rates and a remaining-time prediction; the gauge and summary modules
//! derive what a renderer draws and what a status notification says.

pub mod config;
pub mod error;
pub mod estimator;
pub mod gauge;
pub mod ipc_server;
pub mod logging;
pub mod sampler;
pub mod summary;

pub use error::EstimatorError;
pub use estimator::{BatteryStateEstimator, EstimateSnapshot, PlugType, RateDefaults, Sample, Timestamp};
pub use gauge::{color_for, GaugeColor, GaugeModel, Thresholds};
pub use summary::{format_remaining, StatusSummary};
