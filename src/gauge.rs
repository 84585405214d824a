//! Gauge color policy and the render model handed to gauge renderers.

use crate::estimator::EstimateSnapshot;
use serde::{Deserialize, Serialize};

/// Stroke color class of the level arc.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GaugeColor {
    Charging,
    Normal,
    Warning,
    Critical,
}

impl GaugeColor {
    /// Opaque ARGB value drawn for this class.
    pub fn argb(&self) -> u32 {
        match self {
            GaugeColor::Charging => 0xFF92_CD00,
            GaugeColor::Normal => 0xFF2E_A8D9,
            GaugeColor::Warning => 0xFFFF_9900,
            GaugeColor::Critical => 0xFFFF_0000,
        }
    }
}

/// Classify a level against the user's thresholds.
///
/// Charging wins regardless of level; otherwise a level at or above
/// `warning_level` is normal, at or above `critical_level` is a warning,
/// and anything lower is critical.
pub fn color_for(level: u8, is_charging: bool, warning_level: u8, critical_level: u8) -> GaugeColor {
    if is_charging {
        GaugeColor::Charging
    } else if level >= warning_level {
        GaugeColor::Normal
    } else if level >= critical_level {
        GaugeColor::Warning
    } else {
        GaugeColor::Critical
    }
}

/// Warning/critical percentages used for color classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thresholds {
    pub warning_level: u8,
    pub critical_level: u8,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            warning_level: 20,
            critical_level: 10,
        }
    }
}

/// Everything a renderer needs to draw the circular gauge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GaugeModel {
    /// Arc start, degrees clockwise from 3 o'clock (-90 is 12 o'clock)
    pub start_angle: f32,
    /// Arc length in degrees, 360 at 100%
    pub sweep_angle: f32,
    pub color: GaugeColor,
    pub argb: u32,
    /// Centered text, e.g. "42%"
    pub label: String,
}

impl GaugeModel {
    pub const START_ANGLE: f32 = -90.0;

    pub fn from_snapshot(snapshot: &EstimateSnapshot, thresholds: &Thresholds) -> Self {
        let color = color_for(
            snapshot.level,
            snapshot.is_charging,
            thresholds.warning_level,
            thresholds.critical_level,
        );
        Self {
            start_angle: Self::START_ANGLE,
            sweep_angle: sweep_angle(snapshot.level),
            color,
            argb: color.argb(),
            label: format!("{}%", snapshot.level),
        }
    }
}

/// Arc length for a level: 360° scaled by the percentage.
pub fn sweep_angle(level: u8) -> f32 {
    360.0 * f32::from(level) / 100.0
}
