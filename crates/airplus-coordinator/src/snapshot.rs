//! Device state snapshot and values derived from it.

use airplus_core::models::{
    ModelProfile, PRESET_MODE_MANUAL, PROP_FAN_SPEED, PROP_FILTER_CLEAN_NOMINAL,
    PROP_FILTER_CLEAN_REMAINING, PROP_FILTER_REPLACE_NOMINAL, PROP_FILTER_REPLACE_REMAINING,
    PROP_MODE, PROP_POWER,
};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

/// Derived filter life figures.
///
/// A figure is present only when both its nominal and remaining counters were
/// reported and the nominal is positive; absent inputs omit the fields rather
/// than reporting zeros.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterInfo {
    pub clean_percentage: Option<f64>,
    pub clean_hours_remaining: Option<i64>,
    pub clean_hours_total: Option<i64>,
    pub replace_percentage: Option<f64>,
    pub replace_hours_remaining: Option<i64>,
    pub replace_hours_total: Option<i64>,
}

impl FilterInfo {
    /// True when no filter counters were available.
    pub fn is_empty(&self) -> bool {
        self.clean_percentage.is_none() && self.replace_percentage.is_none()
    }
}

/// Snapshot of device state exposed to the host framework.
#[derive(Debug, Clone, Default)]
pub struct DeviceSnapshot {
    /// Raw Status-port properties, keyed by wire key.
    pub state: Map<String, Value>,
    /// Raw filter-port properties, keyed by wire key.
    pub filter: Map<String, Value>,
    /// Whether the broker session is currently usable.
    pub connected: bool,
    /// When the device last reported anything.
    pub last_update: Option<DateTime<Utc>>,
}

impl DeviceSnapshot {
    /// Raw value of a logical property, resolved through the model profile.
    pub fn raw_property(&self, profile: &ModelProfile, property: &str) -> Option<&Value> {
        self.state.get(profile.raw_key(property)?)
    }

    /// Current raw fan speed.
    pub fn fan_speed(&self, profile: &ModelProfile) -> Option<i64> {
        self.raw_property(profile, PROP_FAN_SPEED)?.as_i64()
    }

    /// Current raw mode value.
    pub fn mode_value(&self, profile: &ModelProfile) -> Option<i64> {
        self.raw_property(profile, PROP_MODE)?.as_i64()
    }

    /// Symbolic mode name; unmapped values resolve to the manual sentinel.
    pub fn mode_name<'a>(&self, profile: &'a ModelProfile) -> Option<&'a str> {
        let value = self.mode_value(profile)?;
        Some(profile.mode_name(value).unwrap_or(PRESET_MODE_MANUAL))
    }

    /// Selectable preset mode, hiding the manual sentinel.
    pub fn preset_mode<'a>(&self, profile: &'a ModelProfile) -> Option<&'a str> {
        self.mode_name(profile)
            .filter(|name| *name != PRESET_MODE_MANUAL)
    }

    /// Power state. The power flag wins when reported; otherwise a nonzero
    /// fan speed counts as on.
    pub fn power_on(&self, profile: &ModelProfile) -> Option<bool> {
        if let Some(power) = self.raw_property(profile, PROP_POWER).and_then(Value::as_i64) {
            return Some(power != 0);
        }
        self.fan_speed(profile).map(|speed| speed > 0)
    }

    /// Fan speed as a 1-100 percentage; 0 when the device is off.
    pub fn speed_percentage(&self, profile: &ModelProfile) -> Option<u8> {
        if self.power_on(profile) == Some(false) {
            return Some(0);
        }
        let speed = self.fan_speed(profile)?;
        speed_to_percentage(profile.speeds(), speed)
    }

    /// Derived filter life figures for the active profile.
    pub fn filter_info(&self, profile: &ModelProfile) -> FilterInfo {
        let mut info = FilterInfo::default();

        if let Some((percentage, remaining, nominal)) =
            self.filter_figures(profile, PROP_FILTER_CLEAN_NOMINAL, PROP_FILTER_CLEAN_REMAINING)
        {
            info.clean_percentage = Some(percentage);
            info.clean_hours_remaining = Some(remaining);
            info.clean_hours_total = Some(nominal);
        }

        if let Some((percentage, remaining, nominal)) = self.filter_figures(
            profile,
            PROP_FILTER_REPLACE_NOMINAL,
            PROP_FILTER_REPLACE_REMAINING,
        ) {
            info.replace_percentage = Some(percentage);
            info.replace_hours_remaining = Some(remaining);
            info.replace_hours_total = Some(nominal);
        }

        info
    }

    fn filter_figures(
        &self,
        profile: &ModelProfile,
        nominal_prop: &str,
        remaining_prop: &str,
    ) -> Option<(f64, i64, i64)> {
        let nominal = self
            .filter
            .get(profile.raw_key(nominal_prop)?)
            .and_then(Value::as_i64)?;
        let remaining = self
            .filter
            .get(profile.raw_key(remaining_prop)?)
            .and_then(Value::as_i64)?;
        let percentage = filter_percentage(nominal, remaining)?;
        Some((percentage, remaining, nominal))
    }
}

/// `remaining / nominal * 100`, rounded to one decimal place. `None` unless
/// the nominal is positive.
pub fn filter_percentage(nominal: i64, remaining: i64) -> Option<f64> {
    if nominal <= 0 {
        return None;
    }
    Some((remaining as f64 / nominal as f64 * 1000.0).round() / 10.0)
}

/// Position of `speed` in the ordered speed list as a 1-100 percentage.
pub fn speed_to_percentage(speeds: &[i64], speed: i64) -> Option<u8> {
    let position = speeds.iter().position(|&s| s == speed)?;
    Some((((position + 1) as f64 / speeds.len() as f64) * 100.0).round() as u8)
}

/// Speed value for a 1-100 percentage. Percentage 0 maps to no speed; turning
/// the device off is a power command, not a speed.
pub fn percentage_to_speed(speeds: &[i64], percentage: u8) -> Option<i64> {
    if speeds.is_empty() || percentage == 0 {
        return None;
    }
    let count = speeds.len();
    let index = ((f64::from(percentage.min(100)) / 100.0 * count as f64).ceil() as usize)
        .clamp(1, count)
        - 1;
    Some(speeds[index])
}
