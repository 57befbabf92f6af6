//! Habitat Core -- the resource-flow kernel for closed-habitat missions.
//!
//! This crate provides capacity-bounded resource stores, the production
//! unit state machine with its priority scheduler, time-triggered events,
//! and the mission clock that advances them one tick at a time with
//! deterministic fixed-point arithmetic.
//!
//! # Tick Pipeline
//!
//! Each call to [`clock::MissionClock::tick`] advances the mission by one
//! tick:
//!
//! 1. **Reset** -- Zero every store's per-tick flow counters.
//! 2. **Events** -- Retire expiring events, then activate due ones.
//! 3. **Units** -- Tick every unit, Critical priority first. Each unit draws
//!    power, consumes inputs and produces outputs scaled by its effective
//!    efficiency, then runs its behavior hook.
//! 4. **Record** -- Collect a tick record of stores, units and events.
//! 5. **Terminal checks** -- Oxygen depletion or sustained water shortfall
//!    end the mission.
//! 6. **Time** -- Advance tick, hour and sol; emit sol summaries.
//!
//! # Scarcity Is Not An Error
//!
//! Running short or overflowing is recorded as shortfall/overflow counters
//! and drives units into Degraded; only caller bugs (negative amounts,
//! unknown stores, duplicate names) surface as `Err`.
//!
//! ```rust,ignore
//! let mut clock = MissionClock::new(MissionConfig::default())?;
//! clock.add_store(ResourceStore::new("Power", ResourceKind::ElectricalPower, cap)?)?;
//! clock.add_unit(UnitSpec::new("Heater", Priority::High).power(kw), Box::new(PassiveBehavior))?;
//! clock.units.start_all();
//! clock.run(24)?;
//! ```
//!
//! # Key Types
//!
//! - [`clock::MissionClock`] -- Owns the mission and runs the tick pipeline.
//! - [`store::ResourceStore`] -- Capacity-bounded ledger for one resource.
//! - [`registry::ResourceRegistry`] -- Arena of stores with stable handles.
//! - [`unit::ProductionUnit`] -- State machine moving resources each tick.
//! - [`scheduler::UnitScheduler`] -- Priority buckets and load shedding.
//! - [`event::EventTimeline`] -- Scheduled, active and retired events.
//! - [`generator::RandomEventGenerator`] -- Seeded events from templates.
//! - [`stress::StressRunner`] -- Scripted failure scenarios with pass criteria.
//! - [`fixed::Fixed64`] -- Q32.32 fixed-point type for deterministic math.

pub mod clock;
pub mod config;
pub mod event;
pub mod fixed;
pub mod generator;
pub mod id;
pub mod metrics;
pub mod registry;
pub mod report;
pub mod rng;
pub mod scheduler;
pub mod sim;
pub mod store;
pub mod stress;
pub mod unit;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
