//! Human-readable status text built from an estimate.

use crate::estimator::{EstimateSnapshot, PlugType};
use serde::{Deserialize, Serialize};

/// Title and body of the ongoing status notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSummary {
    pub title: String,
    pub text: String,
}

impl StatusSummary {
    pub fn from_snapshot(snapshot: &EstimateSnapshot) -> Self {
        Self {
            title: remaining_text(snapshot),
            text: charging_text(snapshot).to_string(),
        }
    }
}

/// Format a second count as "Hh Mm". Negative counts render as "0h 0m".
pub fn format_hours_minutes(seconds: i64) -> String {
    let seconds = seconds.max(0);
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    format!("{}h {}m", hours, minutes)
}

/// Remaining time in the snapshot's direction of travel.
pub fn format_remaining(snapshot: &EstimateSnapshot) -> String {
    format_hours_minutes(snapshot.seconds_remaining())
}

pub fn remaining_text(snapshot: &EstimateSnapshot) -> String {
    if snapshot.is_charging {
        format!("Battery Full in {}", format_remaining(snapshot))
    } else {
        format!("Battery empty in {}", format_remaining(snapshot))
    }
}

pub fn charging_text(snapshot: &EstimateSnapshot) -> &'static str {
    match (snapshot.is_charging, snapshot.plug) {
        (false, _) => "Not Charging",
        (true, PlugType::Ac) => "Charging - AC",
        (true, PlugType::Usb) => "Charging - USB",
        (true, PlugType::None) => "Charging",
    }
}
