//! Battery state estimator.
//!
//! This module contains the state machine that turns periodic battery
//! samples into charging/discharging rate estimates and a time-remaining
//! prediction.

use crate::error::EstimatorError;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

/// Seconds per percent assumed while charging from an AC adapter.
pub const DEFAULT_CHARGING_RATE_SECS: i64 = 60;
/// Seconds per percent assumed while charging from USB or an unknown source.
pub const DEFAULT_USB_CHARGING_RATE_SECS: i64 = 4 * 60;
/// Seconds per percent assumed while discharging.
pub const DEFAULT_DISCHARGING_RATE_SECS: i64 = 5 * 60;

/// Power source feeding the battery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlugType {
    #[default]
    None,
    Ac,
    Usb,
}

/// Millisecond instant on an arbitrary epoch.
///
/// Signed so that the distance between two out-of-order instants stays
/// representable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(i64);

impl Timestamp {
    pub const fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    pub const fn from_secs(secs: i64) -> Self {
        Self(secs.saturating_mul(1000))
    }

    pub const fn as_millis(&self) -> i64 {
        self.0
    }

    /// Wall-clock milliseconds since the Unix epoch, or `None` if the clock
    /// reads earlier than the epoch.
    pub fn from_system_time(time: SystemTime) -> Option<Self> {
        let since_epoch = time.duration_since(UNIX_EPOCH).ok()?;
        i64::try_from(since_epoch.as_millis()).ok().map(Self)
    }

    /// Whole seconds from `earlier` to `self`, truncated toward zero.
    /// Negative when `earlier` is actually later.
    pub fn secs_since(&self, earlier: Timestamp) -> i64 {
        self.0.saturating_sub(earlier.0) / 1000
    }
}

/// One observed battery reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sample {
    /// Reported charge level; only 0..=100 is accepted by the estimator.
    pub level_percent: i32,
    pub is_charging: bool,
    pub plug: PlugType,
    pub timestamp: Timestamp,
}

impl Sample {
    pub fn new(level_percent: i32, is_charging: bool, plug: PlugType, timestamp: Timestamp) -> Self {
        Self {
            level_percent,
            is_charging,
            plug,
            timestamp,
        }
    }
}

/// Default rates used on the first sample and after every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateDefaults {
    pub charging_secs: i64,
    pub usb_charging_secs: i64,
    pub discharging_secs: i64,
}

impl Default for RateDefaults {
    fn default() -> Self {
        Self {
            charging_secs: DEFAULT_CHARGING_RATE_SECS,
            usb_charging_secs: DEFAULT_USB_CHARGING_RATE_SECS,
            discharging_secs: DEFAULT_DISCHARGING_RATE_SECS,
        }
    }
}

impl RateDefaults {
    /// Charging rate for the given plug. Anything but AC is treated as USB.
    pub fn charging_for(&self, plug: PlugType) -> i64 {
        match plug {
            PlugType::Ac => self.charging_secs,
            PlugType::Usb | PlugType::None => self.usb_charging_secs,
        }
    }
}

/// State carried between samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EstimatorState {
    /// Last accepted level, always within 0..=100.
    pub level: u8,
    pub is_charging: bool,
    /// Charging flag before the last accepted sample. Starts out as
    /// discharging, so a first charging sample counts as a transition.
    pub previous_is_charging: bool,
    /// Plug seen on the last charging sample.
    pub plug: PlugType,
    pub charging_rate_secs: i64,
    pub discharging_rate_secs: i64,
    /// Timestamp of the last accepted sample.
    pub last_transition_time: Option<Timestamp>,
}

impl EstimatorState {
    fn new(defaults: &RateDefaults) -> Self {
        Self {
            level: 0,
            is_charging: false,
            previous_is_charging: false,
            plug: PlugType::None,
            charging_rate_secs: defaults.charging_secs,
            discharging_rate_secs: defaults.discharging_secs,
            last_transition_time: None,
        }
    }
}

/// Estimator output for one sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EstimateSnapshot {
    pub level: u8,
    pub is_charging: bool,
    pub plug: PlugType,
    pub charging_rate_secs: i64,
    pub discharging_rate_secs: i64,
    /// Linear extrapolation to 100%. Not guaranteed non-negative.
    pub seconds_to_full: i64,
    /// Linear extrapolation to 0%. Not guaranteed non-negative.
    pub seconds_to_empty: i64,
}

impl EstimateSnapshot {
    /// Remaining time in the current direction: to full while charging,
    /// to empty otherwise.
    pub fn seconds_remaining(&self) -> i64 {
        if self.is_charging {
            self.seconds_to_full
        } else {
            self.seconds_to_empty
        }
    }
}

/// Battery state estimator.
///
/// `ingest` is the only operation that mutates the state. The estimator does
/// no locking of its own; concurrent hosts must serialize calls.
#[derive(Debug, Clone)]
pub struct BatteryStateEstimator {
    state: EstimatorState,
    defaults: RateDefaults,
}

impl Default for BatteryStateEstimator {
    fn default() -> Self {
        Self::new(RateDefaults::default())
    }
}

impl BatteryStateEstimator {
    /// Create an estimator for a new monitoring session.
    pub fn new(defaults: RateDefaults) -> Self {
        Self {
            state: EstimatorState::new(&defaults),
            defaults,
        }
    }

    pub fn state(&self) -> &EstimatorState {
        &self.state
    }

    pub fn defaults(&self) -> &RateDefaults {
        &self.defaults
    }

    /// Feed one sample and return the updated estimate.
    ///
    /// A sample whose level is outside 0..=100 is rejected and the state is
    /// left untouched. Out-of-order timestamps are accepted; a level change
    /// after one produces a zero or negative rate.
    ///
    /// # Algorithm
    /// - Charge direction flipped, plug swapped while charging, or first
    ///   sample → both rates reset to their defaults
    /// - Level rose → charging rate = seconds since the previous sample
    /// - Level fell → discharging rate = seconds since the previous sample
    /// - Level unchanged → rates kept
    pub fn ingest(&mut self, sample: Sample) -> Result<EstimateSnapshot, EstimatorError> {
        let level = u8::try_from(sample.level_percent)
            .ok()
            .filter(|level| *level <= 100)
            .ok_or(EstimatorError::InvalidSample {
                level: sample.level_percent,
            })?;

        let state = &mut self.state;

        state.previous_is_charging = state.is_charging;
        state.is_charging = sample.is_charging;
        let charge_state_changed = state.is_charging != state.previous_is_charging;

        let plug_changed =
            sample.is_charging && state.previous_is_charging && sample.plug != state.plug;
        if sample.is_charging {
            state.plug = sample.plug;
        }

        match state.last_transition_time {
            Some(last) if !charge_state_changed && !plug_changed => {
                let elapsed = sample.timestamp.secs_since(last);
                if sample.timestamp < last {
                    warn!(
                        "Non-monotonic battery sample: {}ms is before previous {}ms",
                        sample.timestamp.as_millis(),
                        last.as_millis()
                    );
                }

                if level > state.level {
                    state.charging_rate_secs = elapsed;
                    debug!("Charging rate updated to {}s ({}% -> {}%)", elapsed, state.level, level);
                } else if level < state.level {
                    state.discharging_rate_secs = elapsed;
                    debug!("Discharging rate updated to {}s ({}% -> {}%)", elapsed, state.level, level);
                }
            }
            _ => {
                state.charging_rate_secs = self.defaults.charging_for(state.plug);
                state.discharging_rate_secs = self.defaults.discharging_secs;
                debug!(
                    charge_state_changed,
                    plug_changed,
                    plug = ?state.plug,
                    "Rates reset to defaults (charging {}s, discharging {}s)",
                    state.charging_rate_secs,
                    state.discharging_rate_secs
                );
            }
        }

        state.level = level;
        state.last_transition_time = Some(sample.timestamp);

        Ok(self.snapshot())
    }

    /// Estimate for the current state without ingesting anything.
    pub fn snapshot(&self) -> EstimateSnapshot {
        let state = &self.state;
        let level = i64::from(state.level);
        EstimateSnapshot {
            level: state.level,
            is_charging: state.is_charging,
            plug: state.plug,
            charging_rate_secs: state.charging_rate_secs,
            discharging_rate_secs: state.discharging_rate_secs,
            seconds_to_full: state.charging_rate_secs.saturating_mul(100 - level),
            seconds_to_empty: state.discharging_rate_secs.saturating_mul(level),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sample(level: i32, is_charging: bool, plug: PlugType, secs: i64) -> Sample {
        Sample::new(level, is_charging, plug, Timestamp::from_secs(secs))
    }

    #[test]
    fn test_new_estimator_uses_defaults() {
        let estimator = BatteryStateEstimator::default();
        let state = estimator.state();
        assert_eq!(state.level, 0);
        assert!(!state.is_charging);
        assert!(!state.previous_is_charging);
        assert_eq!(state.plug, PlugType::None);
        assert_eq!(state.charging_rate_secs, DEFAULT_CHARGING_RATE_SECS);
        assert_eq!(state.discharging_rate_secs, DEFAULT_DISCHARGING_RATE_SECS);
        assert!(state.last_transition_time.is_none());
    }

    #[test]
    fn test_first_charging_sample_on_ac() {
        let mut estimator = BatteryStateEstimator::default();
        let snapshot = estimator.ingest(sample(40, true, PlugType::Ac, 0)).unwrap();

        assert_eq!(snapshot.charging_rate_secs, DEFAULT_CHARGING_RATE_SECS);
        assert_eq!(snapshot.discharging_rate_secs, DEFAULT_DISCHARGING_RATE_SECS);
        assert_eq!(snapshot.seconds_to_full, 60 * 60);
        assert_eq!(snapshot.seconds_to_empty, 300 * 40);
    }

    #[test]
    fn test_first_charging_sample_on_usb() {
        let mut estimator = BatteryStateEstimator::default();
        let snapshot = estimator.ingest(sample(40, true, PlugType::Usb, 0)).unwrap();
        assert_eq!(snapshot.charging_rate_secs, DEFAULT_USB_CHARGING_RATE_SECS);
    }

    #[test]
    fn test_first_discharging_sample_uses_usb_charging_default() {
        let mut estimator = BatteryStateEstimator::default();
        let snapshot = estimator.ingest(sample(80, false, PlugType::Ac, 0)).unwrap();

        // Plug is only captured while charging, so no AC plug is known yet
        assert_eq!(snapshot.plug, PlugType::None);
        assert_eq!(snapshot.charging_rate_secs, DEFAULT_USB_CHARGING_RATE_SECS);
        assert_eq!(snapshot.discharging_rate_secs, DEFAULT_DISCHARGING_RATE_SECS);
        assert_eq!(estimator.state().last_transition_time, Some(Timestamp::from_secs(0)));
    }

    #[test]
    fn test_charging_rate_from_elapsed_time() {
        let mut estimator = BatteryStateEstimator::default();
        estimator.ingest(sample(50, true, PlugType::Ac, 0)).unwrap();
        let snapshot = estimator.ingest(sample(55, true, PlugType::Ac, 120)).unwrap();

        assert_eq!(snapshot.charging_rate_secs, 120);
        assert_eq!(snapshot.seconds_to_full, 120 * (100 - 55));
        assert_eq!(snapshot.seconds_to_full, 5400);
        assert_eq!(snapshot.discharging_rate_secs, DEFAULT_DISCHARGING_RATE_SECS);
    }

    #[test]
    fn test_discharging_rate_from_elapsed_time() {
        let mut estimator = BatteryStateEstimator::default();
        estimator.ingest(sample(80, false, PlugType::None, 0)).unwrap();
        let snapshot = estimator.ingest(sample(79, false, PlugType::None, 450)).unwrap();

        assert_eq!(snapshot.discharging_rate_secs, 450);
        assert_eq!(snapshot.seconds_to_empty, 450 * 79);
        assert_eq!(snapshot.charging_rate_secs, DEFAULT_USB_CHARGING_RATE_SECS);
    }

    #[test]
    fn test_elapsed_time_truncates_to_whole_seconds() {
        let mut estimator = BatteryStateEstimator::default();
        estimator
            .ingest(Sample::new(80, false, PlugType::None, Timestamp::from_millis(0)))
            .unwrap();
        let snapshot = estimator
            .ingest(Sample::new(79, false, PlugType::None, Timestamp::from_millis(90_999)))
            .unwrap();
        assert_eq!(snapshot.discharging_rate_secs, 90);
    }

    #[test]
    fn test_charging_to_discharging_resets_discharging_rate() {
        let mut estimator = BatteryStateEstimator::default();
        estimator.ingest(sample(60, false, PlugType::None, 0)).unwrap();
        estimator.ingest(sample(59, false, PlugType::None, 30)).unwrap();
        assert_eq!(estimator.state().discharging_rate_secs, 30);

        estimator.ingest(sample(60, true, PlugType::Ac, 60)).unwrap();
        let snapshot = estimator.ingest(sample(58, false, PlugType::None, 100_000)).unwrap();

        assert_eq!(snapshot.discharging_rate_secs, DEFAULT_DISCHARGING_RATE_SECS);
        // The plug seen while charging is retained after unplugging
        assert_eq!(snapshot.plug, PlugType::Ac);
        assert_eq!(snapshot.charging_rate_secs, DEFAULT_CHARGING_RATE_SECS);
    }

    #[test]
    fn test_plug_change_while_charging_resets_rates() {
        let mut estimator = BatteryStateEstimator::default();
        estimator.ingest(sample(50, true, PlugType::Usb, 0)).unwrap();
        estimator.ingest(sample(51, true, PlugType::Usb, 500)).unwrap();
        assert_eq!(estimator.state().charging_rate_secs, 500);

        let snapshot = estimator.ingest(sample(52, true, PlugType::Ac, 900)).unwrap();
        assert_eq!(snapshot.plug, PlugType::Ac);
        assert_eq!(snapshot.charging_rate_secs, DEFAULT_CHARGING_RATE_SECS);
    }

    #[test]
    fn test_unchanged_level_keeps_rates() {
        let mut estimator = BatteryStateEstimator::default();
        estimator.ingest(sample(50, true, PlugType::Ac, 0)).unwrap();
        estimator.ingest(sample(51, true, PlugType::Ac, 75)).unwrap();
        let snapshot = estimator.ingest(sample(51, true, PlugType::Ac, 600)).unwrap();

        assert_eq!(snapshot.charging_rate_secs, 75);
        assert_eq!(estimator.state().last_transition_time, Some(Timestamp::from_secs(600)));
    }

    #[test]
    fn test_invalid_levels_are_rejected() {
        let mut estimator = BatteryStateEstimator::default();
        estimator.ingest(sample(50, true, PlugType::Ac, 0)).unwrap();
        let before = *estimator.state();

        for level in [-1, 101, i32::MIN, i32::MAX] {
            let result = estimator.ingest(sample(level, false, PlugType::None, 10));
            assert_eq!(result, Err(EstimatorError::InvalidSample { level }));
            assert_eq!(*estimator.state(), before);
        }
    }

    #[test]
    fn test_non_monotonic_timestamp_yields_negative_rate() {
        let mut estimator = BatteryStateEstimator::default();
        estimator.ingest(sample(50, true, PlugType::Ac, 1_000)).unwrap();
        let snapshot = estimator.ingest(sample(51, true, PlugType::Ac, 940)).unwrap();

        assert_eq!(snapshot.charging_rate_secs, -60);
        assert!(snapshot.seconds_to_full < 0);
    }

    #[test]
    fn test_seconds_remaining_follows_direction() {
        let mut estimator = BatteryStateEstimator::default();
        let charging = estimator.ingest(sample(90, true, PlugType::Ac, 0)).unwrap();
        assert_eq!(charging.seconds_remaining(), charging.seconds_to_full);

        let discharging = estimator.ingest(sample(90, false, PlugType::None, 10)).unwrap();
        assert_eq!(discharging.seconds_remaining(), discharging.seconds_to_empty);
    }

    #[test]
    fn test_custom_defaults() {
        let defaults = RateDefaults {
            charging_secs: 30,
            usb_charging_secs: 90,
            discharging_secs: 600,
        };
        let mut estimator = BatteryStateEstimator::new(defaults);
        let snapshot = estimator.ingest(sample(20, true, PlugType::Usb, 0)).unwrap();

        assert_eq!(snapshot.charging_rate_secs, 90);
        assert_eq!(snapshot.discharging_rate_secs, 600);
        assert_eq!(estimator.defaults(), &defaults);
    }

    #[test]
    fn test_timestamp_secs_since() {
        let a = Timestamp::from_millis(1_500);
        let b = Timestamp::from_millis(4_499);
        assert_eq!(b.secs_since(a), 2);
        assert_eq!(a.secs_since(b), -2);
        assert_eq!(a.secs_since(a), 0);
    }

    #[test]
    fn test_timestamp_from_secs_saturates() {
        assert_eq!(Timestamp::from_secs(90).as_millis(), 90_000);
        assert_eq!(Timestamp::from_secs(i64::MAX / 100).as_millis(), i64::MAX);
        assert_eq!(Timestamp::from_secs(i64::MIN / 100).as_millis(), i64::MIN);
    }

    #[test]
    fn test_timestamp_from_system_time() {
        let time = UNIX_EPOCH + std::time::Duration::from_millis(1_234);
        assert_eq!(Timestamp::from_system_time(time), Some(Timestamp::from_millis(1_234)));

        let before_epoch = UNIX_EPOCH - std::time::Duration::from_secs(1);
        assert_eq!(Timestamp::from_system_time(before_epoch), None);
    }

    fn plug_strategy() -> impl Strategy<Value = PlugType> {
        prop_oneof![
            Just(PlugType::None),
            Just(PlugType::Ac),
            Just(PlugType::Usb),
        ]
    }

    // Monotonic sample stream: (level, charging, plug, gap since previous)
    fn sample_stream_strategy() -> impl Strategy<Value = Vec<Sample>> {
        prop::collection::vec((0i32..=100, any::<bool>(), plug_strategy(), 0i64..=3_600_000), 1..40)
            .prop_map(|entries| {
                let mut now = 0i64;
                entries
                    .into_iter()
                    .map(|(level, charging, plug, gap)| {
                        now += gap;
                        Sample::new(level, charging, plug, Timestamp::from_millis(now))
                    })
                    .collect()
            })
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_valid_samples_always_accepted(samples in sample_stream_strategy()) {
            let mut estimator = BatteryStateEstimator::default();
            for sample in samples {
                let snapshot = estimator.ingest(sample);
                prop_assert!(snapshot.is_ok(), "Valid sample rejected: {:?}", sample);
                let snapshot = snapshot.unwrap();
                prop_assert_eq!(i32::from(snapshot.level), sample.level_percent);
                prop_assert_eq!(snapshot.is_charging, sample.is_charging);
                prop_assert!(snapshot.charging_rate_secs >= 0);
                prop_assert!(snapshot.discharging_rate_secs >= 0);
                prop_assert!(snapshot.seconds_to_full >= 0);
                prop_assert!(snapshot.seconds_to_empty >= 0);
            }
        }

        #[test]
        fn prop_invalid_sample_leaves_state_unchanged(
            samples in sample_stream_strategy(),
            bad_level in prop_oneof![i32::MIN..0i32, 101i32..=i32::MAX],
            charging in any::<bool>(),
            plug in plug_strategy(),
        ) {
            let mut estimator = BatteryStateEstimator::default();
            let mut last = Timestamp::from_millis(0);
            for sample in samples {
                last = sample.timestamp;
                estimator.ingest(sample).unwrap();
            }
            let before = *estimator.state();

            let result = estimator.ingest(Sample::new(bad_level, charging, plug, last));
            prop_assert_eq!(result, Err(EstimatorError::InvalidSample { level: bad_level }));
            prop_assert_eq!(*estimator.state(), before);
        }

        #[test]
        fn prop_repeated_sample_keeps_rates(samples in sample_stream_strategy()) {
            let mut estimator = BatteryStateEstimator::default();
            let mut last_sample = None;
            for sample in samples {
                estimator.ingest(sample).unwrap();
                last_sample = Some(sample);
            }
            let sample = last_sample.unwrap();
            let before = *estimator.state();

            estimator.ingest(sample).unwrap();
            let after = estimator.state();
            prop_assert_eq!(after.charging_rate_secs, before.charging_rate_secs);
            prop_assert_eq!(after.discharging_rate_secs, before.discharging_rate_secs);
        }

        #[test]
        fn prop_unplugging_resets_discharging_rate(
            samples in sample_stream_strategy(),
            level in 0i32..=100,
            plug in plug_strategy(),
            gap_ms in 0i64..=86_400_000,
        ) {
            let mut estimator = BatteryStateEstimator::default();
            let mut now = 0i64;
            for sample in samples {
                now = sample.timestamp.as_millis();
                estimator.ingest(sample).unwrap();
            }
            estimator.ingest(Sample::new(level, true, plug, Timestamp::from_millis(now))).unwrap();

            let later = Timestamp::from_millis(now + gap_ms);
            let snapshot = estimator.ingest(Sample::new(level, false, PlugType::None, later)).unwrap();
            prop_assert_eq!(snapshot.discharging_rate_secs, DEFAULT_DISCHARGING_RATE_SECS);
        }

        #[test]
        fn prop_rate_only_refined_in_direction_of_level_change(
            start in 1i32..=99,
            rising in any::<bool>(),
            charging in any::<bool>(),
            plug in plug_strategy(),
            gap_secs in 1i64..=7_200,
        ) {
            let mut estimator = BatteryStateEstimator::default();
            let first = estimator.ingest(Sample::new(start, charging, plug, Timestamp::from_secs(0))).unwrap();
            let next_level = if rising { start + 1 } else { start - 1 };
            let second = estimator
                .ingest(Sample::new(next_level, charging, plug, Timestamp::from_secs(gap_secs)))
                .unwrap();

            if rising {
                prop_assert_eq!(second.charging_rate_secs, gap_secs);
                prop_assert_eq!(second.discharging_rate_secs, first.discharging_rate_secs);
            } else {
                prop_assert_eq!(second.discharging_rate_secs, gap_secs);
                prop_assert_eq!(second.charging_rate_secs, first.charging_rate_secs);
            }
        }
    }
}
