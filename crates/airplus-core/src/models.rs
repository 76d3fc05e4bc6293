//! Model capability catalog.
//!
//! Maps a device's reported model identifier to its wire-level property keys,
//! symbolic mode table, and ordered speed list. Lookup is exact match first,
//! then substring match, then the configured default.

use std::collections::HashMap;
use tracing::{error, warn};

/// Logical property names used throughout the bridge.
pub const PROP_FAN_SPEED: &str = "fan_speed";
pub const PROP_MODE: &str = "mode";
pub const PROP_POWER: &str = "power";
pub const PROP_FILTER_CLEAN_NOMINAL: &str = "filter_clean_nominal";
pub const PROP_FILTER_CLEAN_REMAINING: &str = "filter_clean_remaining";
pub const PROP_FILTER_REPLACE_NOMINAL: &str = "filter_replace_nominal";
pub const PROP_FILTER_REPLACE_REMAINING: &str = "filter_replace_remaining";

/// Sentinel preset for mode values with no symbolic name. Never selectable.
pub const PRESET_MODE_MANUAL: &str = "manual";

/// Capabilities of a single device model.
#[derive(Debug, Clone, Default)]
pub struct ModelProfile {
    /// Display name (the model id the profile was registered under).
    pub name: String,
    /// Logical property name to raw wire key.
    properties: HashMap<String, String>,
    /// Symbolic mode name to wire value, in presentation order.
    modes: Vec<(String, i64)>,
    /// Supported raw speed values, ordered by intensity.
    speeds: Vec<i64>,
}

impl ModelProfile {
    /// Raw wire key for a logical property name.
    pub fn raw_key(&self, property: &str) -> Option<&str> {
        self.properties.get(property).map(String::as_str)
    }

    /// Wire value for a symbolic mode name.
    pub fn mode_value(&self, name: &str) -> Option<i64> {
        self.modes
            .iter()
            .find(|(mode, _)| mode == name)
            .map(|(_, value)| *value)
    }

    /// Symbolic name for a wire mode value.
    pub fn mode_name(&self, value: i64) -> Option<&str> {
        self.modes
            .iter()
            .find(|(_, v)| *v == value)
            .map(|(name, _)| name.as_str())
    }

    /// Selectable preset names, in presentation order.
    pub fn preset_modes(&self) -> Vec<&str> {
        self.modes.iter().map(|(name, _)| name.as_str()).collect()
    }

    /// Supported speed values, ordered by intensity.
    pub fn speeds(&self) -> &[i64] {
        &self.speeds
    }

    /// True for the empty profile returned when no model matched.
    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }
}

/// Catalog of known device models.
#[derive(Debug, Clone)]
pub struct ModelCatalog {
    models: Vec<(String, ModelProfile)>,
    default_model: Option<String>,
}

impl ModelCatalog {
    /// Catalog of the models this bridge knows about.
    pub fn builtin() -> Self {
        let mut catalog = Self {
            models: Vec::new(),
            default_model: Some("AC0650/10".to_string()),
        };

        catalog.register(
            "AC0650/10",
            &[
                (PROP_FAN_SPEED, "D0310D"),
                (PROP_MODE, "D0310C"),
                (PROP_POWER, "D03102"),
                (PROP_FILTER_CLEAN_NOMINAL, "D05408"),
                (PROP_FILTER_CLEAN_REMAINING, "D0540C"),
                (PROP_FILTER_REPLACE_NOMINAL, "D05413"),
                (PROP_FILTER_REPLACE_REMAINING, "D05414"),
            ],
            &[("auto", 0), ("sleep", 17), ("turbo", 18)],
            &[1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18],
        );

        catalog.register(
            "AC3220/10",
            &[
                (PROP_FAN_SPEED, "D0310D"),
                (PROP_MODE, "D0310C"),
                (PROP_POWER, "D03102"),
                (PROP_FILTER_REPLACE_NOMINAL, "D05413"),
                (PROP_FILTER_REPLACE_REMAINING, "D05414"),
            ],
            &[("auto", 0), ("sleep", 17), ("turbo", 18)],
            &[2, 6, 10, 14, 18],
        );

        catalog
    }

    fn register(
        &mut self,
        model_id: &str,
        properties: &[(&str, &str)],
        modes: &[(&str, i64)],
        speeds: &[i64],
    ) {
        let profile = ModelProfile {
            name: model_id.to_string(),
            properties: properties
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            modes: modes
                .iter()
                .map(|(name, value)| (name.to_string(), *value))
                .collect(),
            speeds: speeds.to_vec(),
        };
        self.models.push((model_id.to_string(), profile));
    }

    /// Resolve the profile for a reported model identifier.
    ///
    /// Exact match, then substring match (e.g. a registered `AC0650` matches a
    /// reported `AC0650/10`), then the catalog default, else an empty profile.
    pub fn resolve(&self, model_id: &str) -> ModelProfile {
        if let Some((_, profile)) = self.models.iter().find(|(id, _)| id == model_id) {
            return profile.clone();
        }

        if let Some((_, profile)) = self.models.iter().find(|(id, _)| model_id.contains(id.as_str()))
        {
            return profile.clone();
        }

        if let Some(default) = &self.default_model {
            if let Some((_, profile)) = self.models.iter().find(|(id, _)| id == default) {
                warn!(model = %model_id, default = %default, "Model not found, using default");
                return profile.clone();
            }
        }

        error!(model = %model_id, "Model not found and no default available");
        ModelProfile::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_match() {
        let catalog = ModelCatalog::builtin();
        let profile = catalog.resolve("AC3220/10");
        assert_eq!(profile.name, "AC3220/10");
        assert_eq!(profile.speeds(), &[2, 6, 10, 14, 18]);
    }

    #[test]
    fn test_substring_match() {
        let catalog = ModelCatalog::builtin();
        // A longer reported id should still resolve via containment.
        let profile = catalog.resolve("AC3220/10/B");
        assert_eq!(profile.name, "AC3220/10");
    }

    #[test]
    fn test_default_fallback() {
        let catalog = ModelCatalog::builtin();
        let profile = catalog.resolve("AC9999/99");
        assert_eq!(profile.name, "AC0650/10");
    }

    #[test]
    fn test_mode_resolution() {
        let catalog = ModelCatalog::builtin();
        let profile = catalog.resolve("AC0650/10");
        assert_eq!(profile.mode_value("sleep"), Some(17));
        assert_eq!(profile.mode_name(18), Some("turbo"));
        assert_eq!(profile.mode_name(5), None);
    }

    #[test]
    fn test_raw_keys() {
        let catalog = ModelCatalog::builtin();
        let profile = catalog.resolve("AC0650/10");
        assert_eq!(profile.raw_key(PROP_FAN_SPEED), Some("D0310D"));
        assert_eq!(profile.raw_key("nonexistent"), None);
    }

    #[test]
    fn test_preset_modes_order() {
        let catalog = ModelCatalog::builtin();
        let profile = catalog.resolve("AC0650/10");
        assert_eq!(profile.preset_modes(), vec!["auto", "sleep", "turbo"]);
    }

    #[test]
    fn test_empty_profile() {
        let catalog = ModelCatalog {
            models: Vec::new(),
            default_model: None,
        };
        let profile = catalog.resolve("AC0650/10");
        assert!(profile.is_empty());
        assert!(profile.preset_modes().is_empty());
    }
}
