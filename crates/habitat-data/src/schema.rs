//! Serde data file structs for mission scenarios.
//!
//! These structs define the on-disk format for a scenario: mission
//! parameters, stores, units and scheduled events. They are deserialized from
//! RON, JSON, or TOML files and then resolved into kernel types by the loader.
//! Quantities are plain `f64` on disk and become fixed-point on resolution.

use habitat_core::config::MissionConfig;
use habitat_core::event::EventKind;
use habitat_core::store::ResourceKind;
use habitat_core::unit::Priority;
use serde::Deserialize;
use std::collections::BTreeMap;

/// A complete scenario file.
#[derive(Debug, Clone, Deserialize)]
pub struct ScenarioData {
    #[serde(default)]
    pub mission: MissionConfig,
    #[serde(default)]
    pub stores: Vec<StoreData>,
    #[serde(default)]
    pub units: Vec<UnitData>,
    #[serde(default)]
    pub events: Vec<EventData>,
    /// Seeded random events added on top of `events`.
    #[serde(default)]
    pub random_events: Option<RandomEventsData>,
    /// Start every unit before the first tick.
    #[serde(default = "default_true")]
    pub start_units: bool,
}

// ===========================================================================
// Stores
// ===========================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct StoreData {
    pub name: String,
    pub kind: ResourceKind,
    pub capacity: f64,
    #[serde(default)]
    pub level: f64,
    #[serde(default)]
    pub reserve: f64,
}

// ===========================================================================
// Units
// ===========================================================================

/// One consume or produce entry of a unit.
#[derive(Debug, Clone, Deserialize)]
pub struct FlowData {
    pub store: String,
    /// Defaults to the kind of the referenced store.
    #[serde(default)]
    pub kind: Option<ResourceKind>,
    pub rate: f64,
    #[serde(default = "default_true")]
    pub required: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UnitData {
    pub name: String,
    pub priority: Priority,
    #[serde(default)]
    pub power: f64,
    #[serde(default)]
    pub consumes: Vec<FlowData>,
    #[serde(default)]
    pub produces: Vec<FlowData>,
    #[serde(default = "default_startup_ticks")]
    pub startup_ticks: u32,
    #[serde(default = "default_one")]
    pub efficiency: f64,
}

// ===========================================================================
// Events
// ===========================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct EventData {
    pub kind: EventKind,
    /// Trigger tick.
    pub tick: u64,
    #[serde(default = "default_duration")]
    pub duration: u64,
    #[serde(default = "default_one")]
    pub severity: f64,
    /// Target unit name.
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub parameters: BTreeMap<String, f64>,
}

/// Random events drawn from the standard template catalog over the whole
/// mission.
#[derive(Debug, Clone, Deserialize)]
pub struct RandomEventsData {
    pub seed: u64,
    #[serde(default = "default_events_per_sol")]
    pub events_per_sol: f64,
    /// Template ids to draw from; empty draws from every template.
    #[serde(default)]
    pub templates: Vec<String>,
    /// Units each template may target, keyed by template id.
    #[serde(default)]
    pub targets: BTreeMap<String, Vec<String>>,
}

// ===========================================================================
// Defaults
// ===========================================================================

fn default_true() -> bool {
    true
}

fn default_one() -> f64 {
    1.0
}

fn default_startup_ticks() -> u32 {
    1
}

fn default_duration() -> u64 {
    1
}

fn default_events_per_sol() -> f64 {
    0.5
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_json_scenario_takes_defaults() {
        let data: ScenarioData = serde_json::from_str(
            r#"{
                "stores": [{"name": "Power", "kind": "electrical_power", "capacity": 100.0}],
                "units": [{"name": "Heater", "priority": "high", "power": 5.0}],
                "events": [{"kind": "dust_storm", "tick": 3}]
            }"#,
        )
        .unwrap();

        assert_eq!(data.mission, MissionConfig::default());
        assert!(data.start_units);
        assert_eq!(data.stores[0].level, 0.0);
        assert_eq!(data.units[0].startup_ticks, 1);
        assert_eq!(data.units[0].efficiency, 1.0);
        assert_eq!(data.events[0].duration, 1);
        assert_eq!(data.events[0].severity, 1.0);
        assert!(data.random_events.is_none());
    }

    #[test]
    fn random_events_take_defaults() {
        let data: ScenarioData =
            ron::from_str("(random_events: Some((seed: 7)))").unwrap();
        let random = data.random_events.unwrap();
        assert_eq!(random.seed, 7);
        assert_eq!(random.events_per_sol, 0.5);
        assert!(random.templates.is_empty());
        assert!(random.targets.is_empty());
    }

    #[test]
    fn crew_change_parses_with_delta() {
        let event: EventData = serde_json::from_str(
            r#"{"kind": {"crew_size_change": {"delta": -2}}, "tick": 10}"#,
        )
        .unwrap();
        assert_eq!(event.kind, EventKind::CrewSizeChange { delta: -2 });
    }

    #[test]
    fn toml_flows_default_to_required() {
        let unit: UnitData = toml::from_str(
            r#"
name = "OGS"
priority = "critical"
power = 5.0

[[consumes]]
store = "Potable_Water"
rate = 1.0

[[produces]]
store = "Oxygen"
rate = 0.8
required = false
"#,
        )
        .unwrap();
        assert!(unit.consumes[0].required);
        assert!(!unit.produces[0].required);
        assert!(unit.consumes[0].kind.is_none());
    }
}
