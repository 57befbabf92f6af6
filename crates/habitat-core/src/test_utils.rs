//! Shared test helpers for integration tests and benchmarks.
//!
//! Gated behind `#[cfg(any(test, feature = "test-utils"))]` so these helpers
//! are available in unit tests, integration tests, and benchmarks (via the
//! `test-utils` feature).

use crate::clock::MissionClock;
use crate::config::MissionConfig;
use crate::fixed::{Fixed64, fixed64_to_f64};
use crate::id::StoreId;
use crate::registry::ResourceRegistry;
use crate::store::{ResourceKind, ResourceStore};
use crate::unit::{PassiveBehavior, Priority, ResourceFlow, UnitSpec};

// ===========================================================================
// Fixed-point helpers
// ===========================================================================

pub fn fixed(v: f64) -> Fixed64 {
    Fixed64::from_num(v)
}

/// Compare a fixed-point value against an f64 within 1e-6.
pub fn approx_eq(actual: Fixed64, expected: f64) -> bool {
    (fixed64_to_f64(actual) - expected).abs() < 1e-6
}

// ===========================================================================
// Store constructors
// ===========================================================================

pub fn store(name: &str, kind: ResourceKind, capacity: f64, level: f64) -> ResourceStore {
    ResourceStore::new(name, kind, fixed(capacity))
        .expect("non-negative capacity")
        .with_level(fixed(level))
}

pub fn power_store(level: f64) -> ResourceStore {
    store("Power", ResourceKind::ElectricalPower, 10_000.0, level)
}

pub fn oxygen_store(level: f64) -> ResourceStore {
    store("Oxygen", ResourceKind::Oxygen, 1_000.0, level)
}

pub fn water_store(level: f64) -> ResourceStore {
    store("Potable_Water", ResourceKind::PotableWater, 5_000.0, level)
}

/// Registry holding the three stores every mission checks.
pub fn life_support_registry() -> (ResourceRegistry, StoreId, StoreId, StoreId) {
    let mut registry = ResourceRegistry::new();
    let power = registry.insert(power_store(5_000.0)).expect("fresh registry");
    let oxygen = registry.insert(oxygen_store(500.0)).expect("fresh registry");
    let water = registry.insert(water_store(2_000.0)).expect("fresh registry");
    (registry, power, oxygen, water)
}

// ===========================================================================
// Unit specs
// ===========================================================================

/// A power-only unit.
pub fn load(name: &str, priority: Priority, kw: f64) -> UnitSpec {
    UnitSpec::new(name, priority).power(fixed(kw))
}

/// Electrolysis-style unit: water in, oxygen out.
pub fn oxygen_generator(name: &str) -> UnitSpec {
    UnitSpec::new(name, Priority::Critical)
        .power(fixed(5.0))
        .consumes(ResourceFlow::new(
            ResourceKind::PotableWater,
            fixed(1.0),
            "Potable_Water",
        ))
        .produces(ResourceFlow::new(ResourceKind::Oxygen, fixed(0.8), "Oxygen"))
}

/// Crew breathing and drinking at fixed rates.
pub fn crew(name: &str) -> UnitSpec {
    UnitSpec::new(name, Priority::Critical)
        .consumes(ResourceFlow::new(ResourceKind::Oxygen, fixed(0.5), "Oxygen"))
        .consumes(ResourceFlow::new(
            ResourceKind::PotableWater,
            fixed(0.5),
            "Potable_Water",
        ))
}

/// Generator feeding the power store.
pub fn solar_array(name: &str, kw: f64) -> UnitSpec {
    UnitSpec::new(name, Priority::High).produces(ResourceFlow::new(
        ResourceKind::ElectricalPower,
        fixed(kw),
        "Power",
    ))
}

// ===========================================================================
// Mission constructors
// ===========================================================================

pub fn short_config(total_sols: u64) -> MissionConfig {
    MissionConfig {
        total_sols,
        crew_size: 4,
        ..MissionConfig::default()
    }
}

/// A small self-sustaining habitat with every unit started.
pub fn small_habitat(total_sols: u64) -> MissionClock {
    let mut clock = MissionClock::new(short_config(total_sols)).expect("valid config");
    clock.add_store(power_store(5_000.0)).expect("unique store");
    clock.add_store(oxygen_store(500.0)).expect("unique store");
    clock.add_store(water_store(2_000.0)).expect("unique store");

    for spec in [
        solar_array("Solar_Array", 20.0),
        oxygen_generator("OGS"),
        crew("Crew"),
        load("Lab", Priority::Low, 8.0),
    ] {
        clock
            .add_unit(spec, Box::new(PassiveBehavior))
            .expect("stores exist");
    }
    clock.units.start_all();
    clock
}

/// Many independent units sharing the life-support stores.
pub fn large_habitat(units: usize, total_sols: u64) -> MissionClock {
    let mut clock = small_habitat(total_sols);
    for i in 0..units {
        let priority = Priority::ALL[i % Priority::ALL.len()];
        clock
            .add_unit(load(&format!("Load_{i}"), priority, 0.5), Box::new(PassiveBehavior))
            .expect("unique unit");
    }
    clock.units.start_all();
    clock
}
