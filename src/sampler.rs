//! Battery sampling from the Linux power-supply class.
//!
//! Reads charge level, status and online adapters from sysfs and turns them
//! into estimator samples.

use crate::error::SamplerError;
use crate::estimator::{PlugType, Sample, Timestamp};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::debug;

/// Anything that can produce a battery sample on demand.
pub trait SampleSource: Send + Sync {
    fn read_sample(&self) -> Result<Sample, SamplerError>;
}

/// Sample source backed by `/sys/class/power_supply`.
#[derive(Debug, Clone)]
pub struct SysfsSampler {
    /// Root of the power-supply class
    root: PathBuf,
    /// Directory of the battery being monitored
    battery: PathBuf,
}

impl SysfsSampler {
    /// Scan `root` for the first supply whose `type` is `Battery`.
    pub fn discover(root: &Path) -> Result<Self, SamplerError> {
        let mut entries = list_supplies(root)?;
        entries.sort();

        let battery = entries
            .into_iter()
            .find(|path| supply_type(path).as_deref() == Some("Battery"))
            .ok_or_else(|| SamplerError::NoBattery(root.display().to_string()))?;

        debug!("Using battery supply at {:?}", battery);
        Ok(Self {
            root: root.to_path_buf(),
            battery,
        })
    }

    pub fn battery_path(&self) -> &Path {
        &self.battery
    }

    /// Charge level in percent as reported by the kernel.
    pub fn read_capacity(&self) -> Result<i32, SamplerError> {
        let path = self.battery.join("capacity");
        let value = read_attribute(&path)?;
        value.parse::<i32>().map_err(|_| SamplerError::InvalidValue {
            path: path.display().to_string(),
            value,
        })
    }

    /// Whether the battery counts as charging. A full battery on the
    /// charger still counts.
    pub fn read_is_charging(&self) -> Result<bool, SamplerError> {
        let status = read_attribute(&self.battery.join("status"))?;
        Ok(matches!(status.as_str(), "Charging" | "Full"))
    }

    /// Adapter currently feeding the system. Mains wins over USB.
    pub fn read_plug(&self) -> Result<PlugType, SamplerError> {
        let mut plug = PlugType::None;
        for supply in list_supplies(&self.root)? {
            let Some(kind) = supply_type(&supply) else {
                continue;
            };
            let online = read_attribute(&supply.join("online"))
                .map(|value| value == "1")
                .unwrap_or(false);
            if !online {
                continue;
            }

            match kind.as_str() {
                "Mains" => return Ok(PlugType::Ac),
                kind if kind.starts_with("USB") => plug = PlugType::Usb,
                _ => {}
            }
        }
        Ok(plug)
    }
}

impl SampleSource for SysfsSampler {
    fn read_sample(&self) -> Result<Sample, SamplerError> {
        let timestamp =
            Timestamp::from_system_time(SystemTime::now()).ok_or(SamplerError::ClockBeforeEpoch)?;

        Ok(Sample {
            level_percent: self.read_capacity()?,
            is_charging: self.read_is_charging()?,
            plug: self.read_plug()?,
            timestamp,
        })
    }
}

fn list_supplies(root: &Path) -> Result<Vec<PathBuf>, SamplerError> {
    let read_failed = |source: std::io::Error| SamplerError::ReadFailed {
        path: root.display().to_string(),
        source,
    };

    let mut supplies = Vec::new();
    for entry in fs::read_dir(root).map_err(read_failed)? {
        supplies.push(entry.map_err(read_failed)?.path());
    }
    Ok(supplies)
}

fn supply_type(supply: &Path) -> Option<String> {
    read_attribute(&supply.join("type")).ok()
}

fn read_attribute(path: &Path) -> Result<String, SamplerError> {
    fs::read_to_string(path)
        .map(|contents| contents.trim().to_string())
        .map_err(|source| SamplerError::ReadFailed {
            path: path.display().to_string(),
            source,
        })
}
