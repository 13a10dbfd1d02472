//! Tracker thresholds as a flat key/value set.
//!
//! Every key has a default. `STENTOR_<KEY>` environment variables override
//! them (`STENTOR_MIN_AREA=150`), as do explicit `(key, value)` pairs.

use crate::errors::TrackerError;
use serde::Deserialize;

pub const ENV_PREFIX: &str = "STENTOR";

/// Minimum number of history samples before a velocity is computed.
pub const MIN_HISTORY_LEN: usize = 3;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TrackerConfig {
    pub min_area: f64,
    pub max_area: f64,
    pub max_anchor_drift: f64,
    pub memory_seconds: f64,
    pub circ_threshold: f64,
    pub snap_velocity: f64,
    pub history_len: usize,
    pub adaptive_block_size: u32,
    pub adaptive_c: i32,
    pub edge_margin_frac: f64,
    pub edge_margin_min_px: u32,
    pub edge_ignore: bool,
    /// Fraction of the new centroid blended into the anchor per match.
    pub anchor_alpha: f64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            min_area: 100.0,
            max_area: 50_000.0,
            max_anchor_drift: 100.0,
            memory_seconds: 60.0,
            circ_threshold: 0.75,
            snap_velocity: 0.5,
            history_len: 10,
            adaptive_block_size: 31,
            adaptive_c: -5,
            edge_margin_frac: 0.05,
            edge_margin_min_px: 12,
            edge_ignore: false,
            anchor_alpha: 0.001,
        }
    }
}

fn builder_with_defaults() -> Result<config::ConfigBuilder<config::builder::DefaultState>, TrackerError> {
    let d = TrackerConfig::default();
    Ok(config::Config::builder()
        .set_default("min_area", d.min_area)?
        .set_default("max_area", d.max_area)?
        .set_default("max_anchor_drift", d.max_anchor_drift)?
        .set_default("memory_seconds", d.memory_seconds)?
        .set_default("circ_threshold", d.circ_threshold)?
        .set_default("snap_velocity", d.snap_velocity)?
        .set_default("history_len", d.history_len as i64)?
        .set_default("adaptive_block_size", d.adaptive_block_size as i64)?
        .set_default("adaptive_c", d.adaptive_c as i64)?
        .set_default("edge_margin_frac", d.edge_margin_frac)?
        .set_default("edge_margin_min_px", d.edge_margin_min_px as i64)?
        .set_default("edge_ignore", d.edge_ignore)?
        .set_default("anchor_alpha", d.anchor_alpha)?)
}

impl TrackerConfig {
    /// Defaults overridden by `STENTOR_<KEY>` environment variables.
    pub fn from_env() -> Result<Self, TrackerError> {
        let config = builder_with_defaults()?
            .add_source(config::Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?;
        config.try_deserialize::<TrackerConfig>()?.normalized()
    }

    /// Defaults overridden by explicit key/value pairs.
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self, TrackerError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut builder = builder_with_defaults()?;
        for (key, value) in pairs {
            builder = builder.set_override(key.as_ref(), value.as_ref())?;
        }
        builder
            .build()?
            .try_deserialize::<TrackerConfig>()?
            .normalized()
    }

    /// Force the adaptive block size odd and at least 3, clamp the history
    /// window to at least 3 samples, and check the area range.
    pub fn normalized(mut self) -> Result<Self, TrackerError> {
        self.adaptive_block_size = normalize_block_size(self.adaptive_block_size);
        self.history_len = self.history_len.max(MIN_HISTORY_LEN);

        if self.min_area > self.max_area {
            return Err(TrackerError::InvalidConfig(format!(
                "min_area {} exceeds max_area {}",
                self.min_area, self.max_area
            )));
        }
        if self.max_anchor_drift <= 0.0 {
            return Err(TrackerError::InvalidConfig(format!(
                "max_anchor_drift must be positive, got {}",
                self.max_anchor_drift
            )));
        }
        if !(0.0..=1.0).contains(&self.anchor_alpha) {
            return Err(TrackerError::InvalidConfig(format!(
                "anchor_alpha must be within [0, 1], got {}",
                self.anchor_alpha
            )));
        }
        Ok(self)
    }
}

/// Even sizes round up to the next odd value; the result is at least 3.
pub fn normalize_block_size(block_size: u32) -> u32 {
    let odd = if block_size % 2 == 0 {
        block_size + 1
    } else {
        block_size
    };
    odd.max(3)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = TrackerConfig::from_pairs(Vec::<(&str, &str)>::new()).unwrap();
        assert_eq!(config, TrackerConfig::default());
        assert_eq!(config.min_area, 100.0);
        assert_eq!(config.adaptive_c, -5);
        assert!(!config.edge_ignore);
    }

    #[test]
    fn test_pairs_override_defaults() {
        let config = TrackerConfig::from_pairs([
            ("min_area", "150"),
            ("snap_velocity", "0.25"),
            ("edge_ignore", "true"),
            ("adaptive_c", "-7"),
        ])
        .unwrap();
        assert_eq!(config.min_area, 150.0);
        assert_eq!(config.snap_velocity, 0.25);
        assert!(config.edge_ignore);
        assert_eq!(config.adaptive_c, -7);
        assert_eq!(config.max_area, 50_000.0);
    }

    #[test]
    fn test_block_size_forced_odd_and_at_least_three() {
        assert_eq!(normalize_block_size(0), 3);
        assert_eq!(normalize_block_size(1), 3);
        assert_eq!(normalize_block_size(2), 3);
        assert_eq!(normalize_block_size(30), 31);
        assert_eq!(normalize_block_size(31), 31);

        let config = TrackerConfig::from_pairs([("adaptive_block_size", "16")]).unwrap();
        assert_eq!(config.adaptive_block_size, 17);
    }

    #[test]
    fn test_history_len_clamped() {
        let config = TrackerConfig::from_pairs([("history_len", "1")]).unwrap();
        assert_eq!(config.history_len, 3);
    }

    #[test]
    fn test_inverted_area_range_rejected() {
        let result = TrackerConfig::from_pairs([("min_area", "500"), ("max_area", "100")]);
        assert!(matches!(result, Err(TrackerError::InvalidConfig(_))));
    }

    #[test]
    fn test_unparseable_value_is_config_error() {
        let result = TrackerConfig::from_pairs([("history_len", "many")]);
        assert!(matches!(result, Err(TrackerError::Config(_))));
    }

    #[test]
    #[serial]
    fn test_from_env_reads_prefixed_variables() {
        unsafe {
            env::set_var("STENTOR_MAX_ANCHOR_DRIFT", "42.5");
            env::set_var("STENTOR_HISTORY_LEN", "6");
        }
        let config = TrackerConfig::from_env().unwrap();
        assert_eq!(config.max_anchor_drift, 42.5);
        assert_eq!(config.history_len, 6);
        unsafe {
            env::remove_var("STENTOR_MAX_ANCHOR_DRIFT");
            env::remove_var("STENTOR_HISTORY_LEN");
        }
    }
}
