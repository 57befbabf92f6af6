//! Mission configuration.
//!
//! A [`MissionConfig`] is built once, validated, and handed to the clock by
//! value. Every threshold the kernel applies lives here; none are hard-coded.

use crate::fixed::{Fixed64, f64_to_fixed64};
use serde::{Deserialize, Serialize};

/// Errors raised by [`MissionConfig::validate`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("ticks_per_sol must be at least 1")]
    ZeroTicksPerSol,

    #[error("crew_size must be at least 1")]
    ZeroCrew,

    #[error("{field} must be within [0, 1], got {value}")]
    OutOfUnitRange { field: &'static str, value: f64 },

    #[error("{field} must be non-negative and finite, got {value}")]
    Negative { field: &'static str, value: f64 },
}

/// Immutable mission parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MissionConfig {
    pub total_sols: u64,
    pub ticks_per_sol: u32,
    pub crew_size: u32,

    /// Store units draw power from.
    pub power_store: String,
    /// Store whose depletion kills the crew.
    pub oxygen_store: String,
    /// Store whose sustained shortfall kills the crew.
    pub water_store: String,

    /// Fraction of a power or input request that may go unmet before the
    /// unit degrades. Empirical; pending domain review.
    pub shortfall_tolerance: f64,
    /// Litres per crew member per sol.
    pub water_per_crew_per_day: f64,
    /// Sols of cumulative water shortfall the crew survives. Empirical;
    /// pending domain review.
    pub water_shortfall_days: f64,

    /// How many trailing sol summaries the final report keeps.
    pub report_sol_summaries: usize,
    /// Tick records to retain; `None` keeps all of them.
    pub tick_history_capacity: Option<usize>,
}

impl Default for MissionConfig {
    fn default() -> Self {
        Self {
            total_sols: 500,
            ticks_per_sol: 24,
            crew_size: 15,
            power_store: "Power".to_string(),
            oxygen_store: "Oxygen".to_string(),
            water_store: "Potable_Water".to_string(),
            shortfall_tolerance: 0.1,
            water_per_crew_per_day: 3.0,
            water_shortfall_days: 3.0,
            report_sol_summaries: 10,
            tick_history_capacity: None,
        }
    }
}

impl MissionConfig {
    /// Total ticks until the mission ends on its own.
    pub fn total_ticks(&self) -> u64 {
        self.total_sols.saturating_mul(u64::from(self.ticks_per_sol))
    }

    /// Cumulative water shortfall at which a crew of `crew_size` is lost.
    pub fn water_death_threshold(&self, crew_size: u32) -> Fixed64 {
        f64_to_fixed64(self.water_per_crew_per_day * self.water_shortfall_days)
            .saturating_mul(Fixed64::saturating_from_num(crew_size))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ticks_per_sol == 0 {
            return Err(ConfigError::ZeroTicksPerSol);
        }
        if self.crew_size == 0 {
            return Err(ConfigError::ZeroCrew);
        }
        if !(0.0..=1.0).contains(&self.shortfall_tolerance) {
            return Err(ConfigError::OutOfUnitRange {
                field: "shortfall_tolerance",
                value: self.shortfall_tolerance,
            });
        }
        for (field, value) in [
            ("water_per_crew_per_day", self.water_per_crew_per_day),
            ("water_shortfall_days", self.water_shortfall_days),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::Negative { field, value });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = MissionConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.total_ticks(), 12_000);
        assert_eq!(config.water_death_threshold(15), Fixed64::from_num(135));
    }

    #[test]
    fn rejects_bad_values() {
        let zero = MissionConfig {
            ticks_per_sol: 0,
            ..MissionConfig::default()
        };
        assert_eq!(zero.validate(), Err(ConfigError::ZeroTicksPerSol));

        let no_crew = MissionConfig {
            crew_size: 0,
            ..MissionConfig::default()
        };
        assert_eq!(no_crew.validate(), Err(ConfigError::ZeroCrew));

        let tolerance = MissionConfig {
            shortfall_tolerance: 1.5,
            ..MissionConfig::default()
        };
        assert!(matches!(
            tolerance.validate(),
            Err(ConfigError::OutOfUnitRange { field: "shortfall_tolerance", .. })
        ));

        let water = MissionConfig {
            water_shortfall_days: -1.0,
            ..MissionConfig::default()
        };
        assert!(matches!(
            water.validate(),
            Err(ConfigError::Negative { field: "water_shortfall_days", .. })
        ));
    }

    #[test]
    fn missing_fields_take_defaults() {
        let config: MissionConfig =
            serde_json::from_str(r#"{"total_sols": 3, "crew_size": 4}"#).unwrap();
        assert_eq!(config.total_sols, 3);
        assert_eq!(config.crew_size, 4);
        assert_eq!(config.ticks_per_sol, 24);
        assert_eq!(config.power_store, "Power");
    }
}
