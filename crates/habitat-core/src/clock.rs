//! The mission clock: owns stores, units and events and drives the tick loop.
//!
//! # Tick pipeline
//!
//! Each [`MissionClock::tick`] runs:
//! 1. **Guard** -- refuse to run once the mission has ended
//! 2. **Reset** -- zero every store's per-tick flow counters
//! 3. **Events** -- retire expiring events, then activate due ones
//! 4. **Units** -- tick every unit, Critical bucket first
//! 5. **Record** -- collect a [`TickRecord`]
//! 6. **Terminal checks** -- oxygen depletion or sustained water shortfall
//!    end the mission
//! 7. **Time** -- advance tick and hour; on a sol boundary emit a
//!    [`SolSummary`]
//! 8. **Duration** -- end the mission once the planned ticks are done
//! 9. **Bookkeeping** -- update the state hash and fire tick callbacks
//!
//! Between ticks, callers act as the response layer through the public
//! `stores` and `units` fields: restarting units, clearing malfunctions,
//! shedding load.

use crate::config::{ConfigError, MissionConfig};
use crate::event::{EffectContext, Event, EventTimeline};
use crate::fixed::{Fixed64, Ticks, f64_to_fixed64, fixed64_to_f64};
use crate::id::{StoreId, UnitId};
use crate::registry::{RegistryError, ResourceRegistry};
use crate::report::{
    FinalReport, MissionLog, MissionSummary, ResourceTotals, SolSummary, TickRecord,
};
use crate::scheduler::{SchedulerError, UnitScheduler};
use crate::sim::{MissionState, MissionStatus, StateHash};
use crate::store::{ResourceStore, StoreError};
use crate::unit::{FlowPolicy, ProductionUnit, UnitBehavior, UnitError, UnitSpec};
use std::collections::VecDeque;
use tracing::{error, info};

/// Reason recorded when the planned mission length is reached.
pub const DURATION_COMPLETE: &str = "Mission duration complete";
/// Reason recorded when the oxygen store runs dry.
pub const OXYGEN_DEPLETED: &str = "Crew death: oxygen depleted";
/// Reason recorded when the water shortfall exceeds the survivable limit.
pub const WATER_DEPLETED: &str = "Crew death: water depleted";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ClockError {
    #[error("mission has ended: {reason}")]
    MissionEnded { reason: String },

    #[error("invalid mission config: {0}")]
    InvalidConfig(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Unit(#[from] UnitError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
}

// ---------------------------------------------------------------------------
// Callbacks
// ---------------------------------------------------------------------------

pub type TickCallback = Box<dyn FnMut(&TickRecord)>;
pub type SolCallback = Box<dyn FnMut(&SolSummary)>;
pub type EventCallback = Box<dyn FnMut(&Event)>;
pub type EndCallback = Box<dyn FnMut(&FinalReport)>;

#[derive(Default)]
struct Callbacks {
    tick: Vec<TickCallback>,
    sol: Vec<SolCallback>,
    event: Vec<EventCallback>,
    end: Vec<EndCallback>,
}

impl std::fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Callbacks")
            .field("tick", &self.tick.len())
            .field("sol", &self.sol.len())
            .field("event", &self.event.len())
            .field("end", &self.end.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// MissionClock
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct MissionClock {
    /// All resource stores of the mission.
    pub stores: ResourceRegistry,
    /// All production units of the mission.
    pub units: UnitScheduler,

    config: MissionConfig,
    timeline: EventTimeline,
    state: MissionState,

    tick_records: VecDeque<TickRecord>,
    sol_summaries: Vec<SolSummary>,
    callbacks: Callbacks,
    last_state_hash: u64,

    // Converted once for the tick loop.
    shortfall_tolerance: Fixed64,
}

impl MissionClock {
    /// Create an empty mission. The config is validated and then frozen.
    pub fn new(config: MissionConfig) -> Result<Self, ClockError> {
        config.validate()?;
        let shortfall_tolerance = f64_to_fixed64(config.shortfall_tolerance);
        let state = MissionState::new(config.crew_size);
        Ok(Self {
            stores: ResourceRegistry::new(),
            units: UnitScheduler::new(),
            config,
            timeline: EventTimeline::new(),
            state,
            tick_records: VecDeque::new(),
            sol_summaries: Vec::new(),
            callbacks: Callbacks::default(),
            last_state_hash: StateHash::new().finish(),
            shortfall_tolerance,
        })
    }

    // -----------------------------------------------------------------------
    // Setup
    // -----------------------------------------------------------------------

    pub fn add_store(&mut self, store: ResourceStore) -> Result<StoreId, ClockError> {
        Ok(self.stores.insert(store)?)
    }

    /// Build a unit against the current stores and register it.
    pub fn add_unit(
        &mut self,
        spec: UnitSpec,
        behavior: Box<dyn UnitBehavior>,
    ) -> Result<UnitId, ClockError> {
        let unit = ProductionUnit::new(spec, behavior, &self.stores)?;
        Ok(self.units.insert(unit)?)
    }

    pub fn schedule(&mut self, event: Event) {
        self.timeline.schedule(event);
    }

    pub fn on_tick_complete(&mut self, callback: TickCallback) {
        self.callbacks.tick.push(callback);
    }

    pub fn on_sol_complete(&mut self, callback: SolCallback) {
        self.callbacks.sol.push(callback);
    }

    pub fn on_event_triggered(&mut self, callback: EventCallback) {
        self.callbacks.event.push(callback);
    }

    pub fn on_mission_end(&mut self, callback: EndCallback) {
        self.callbacks.end.push(callback);
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn config(&self) -> &MissionConfig {
        &self.config
    }

    pub fn state(&self) -> &MissionState {
        &self.state
    }

    pub fn timeline(&self) -> &EventTimeline {
        &self.timeline
    }

    pub fn is_ended(&self) -> bool {
        self.state.ended
    }

    pub fn is_paused(&self) -> bool {
        self.state.paused
    }

    /// Retained tick records, oldest first.
    pub fn tick_records(&self) -> impl Iterator<Item = &TickRecord> {
        self.tick_records.iter()
    }

    pub fn sol_summaries(&self) -> &[SolSummary] {
        &self.sol_summaries
    }

    /// Hash computed at the end of the last tick.
    pub fn last_state_hash(&self) -> u64 {
        self.last_state_hash
    }

    // -----------------------------------------------------------------------
    // Control
    // -----------------------------------------------------------------------

    pub fn pause(&mut self) {
        self.state.paused = true;
    }

    pub fn resume(&mut self) {
        self.state.paused = false;
    }

    /// Stop low-priority units until demand fits `power_available`.
    pub fn shed_load(&mut self, power_available: Fixed64) -> Vec<String> {
        self.units.shed_load(power_available)
    }

    /// Run up to `ticks` ticks, stopping early if the mission ends or is
    /// paused. Returns the number of ticks run.
    pub fn run(&mut self, ticks: Ticks) -> Result<Ticks, ClockError> {
        self.ensure_running()?;
        self.state.running = true;
        let mut ran = 0;
        while ran < ticks && !self.state.ended && !self.state.paused {
            if let Err(e) = self.tick() {
                self.state.running = false;
                return Err(e);
            }
            ran += 1;
        }
        self.state.running = false;
        Ok(ran)
    }

    /// Run until the current sol completes.
    pub fn run_sol(&mut self) -> Result<Ticks, ClockError> {
        let remaining = self.config.ticks_per_sol - self.state.hour;
        self.run(u64::from(remaining))
    }

    /// Run every remaining tick and return the final report. Stops early if
    /// paused.
    pub fn run_to_end(&mut self) -> Result<FinalReport, ClockError> {
        let remaining = self.config.total_ticks().saturating_sub(self.state.tick);
        self.run(remaining)?;
        Ok(self.final_report())
    }

    // -----------------------------------------------------------------------
    // Tick
    // -----------------------------------------------------------------------

    /// Advance the mission by one tick.
    pub fn tick(&mut self) -> Result<TickRecord, ClockError> {
        self.ensure_running()?;

        self.stores.reset_all_tick_counters();

        let tick = self.state.tick;
        let power_store = self.stores.id(&self.config.power_store);
        let water_store = self.stores.id(&self.config.water_store);
        let triggered = {
            let mut ctx = EffectContext {
                registry: &mut self.stores,
                units: &mut self.units,
                state: &mut self.state,
                power_store,
                water_store,
            };
            self.timeline.advance(tick, &mut ctx)
        };
        for event in &triggered {
            for callback in &mut self.callbacks.event {
                callback(event);
            }
        }

        let policy = FlowPolicy {
            power_store,
            shortfall_tolerance: self.shortfall_tolerance,
        };
        let unit_metrics = self.units.tick_all(
            &mut self.stores,
            policy,
            self.timeline.conditions(),
            tick,
            self.state.hour,
        )?;

        let record = TickRecord {
            tick,
            sol: self.state.sol,
            hour: self.state.hour,
            stores: self.stores.statuses(),
            units: unit_metrics,
            active_events: self.timeline.active_names(),
            crew_size: self.state.crew_size,
        };
        self.retain_record(record.clone());

        self.check_terminal_conditions(water_store);

        self.state.tick += 1;
        let ticks_per_sol = u64::from(self.config.ticks_per_sol);
        self.state.hour = u32::try_from(self.state.tick % ticks_per_sol).unwrap_or(0);
        if self.state.hour == 0 {
            self.state.sol = self.state.tick / ticks_per_sol;
            self.complete_sol();
        }

        if self.state.tick >= self.config.total_ticks() {
            if !self.state.ended {
                info!(tick = self.state.tick, "mission duration complete");
            }
            self.state.end(DURATION_COMPLETE);
        }

        self.last_state_hash = self.state_hash();
        for callback in &mut self.callbacks.tick {
            callback(&record);
        }

        if self.state.ended {
            let report = self.final_report();
            for callback in &mut self.callbacks.end {
                callback(&report);
            }
        }

        Ok(record)
    }

    fn ensure_running(&self) -> Result<(), ClockError> {
        if self.state.ended {
            return Err(ClockError::MissionEnded {
                reason: self.state.end_reason.clone().unwrap_or_default(),
            });
        }
        Ok(())
    }

    fn retain_record(&mut self, record: TickRecord) {
        if let Some(capacity) = self.config.tick_history_capacity {
            if capacity == 0 {
                return;
            }
            while self.tick_records.len() >= capacity {
                self.tick_records.pop_front();
            }
        }
        self.tick_records.push_back(record);
    }

    fn check_terminal_conditions(&mut self, water_store: Option<StoreId>) {
        if let Some(oxygen) = self.stores.by_name(&self.config.oxygen_store)
            && oxygen.is_empty()
        {
            self.kill_crew(OXYGEN_DEPLETED);
            return;
        }

        if let Some(water) = water_store.and_then(|id| self.stores.get(id)) {
            let limit = self.config.water_death_threshold(self.state.crew_size);
            if water.total_flows().shortfall > limit {
                self.kill_crew(WATER_DEPLETED);
            }
        }
    }

    fn kill_crew(&mut self, reason: &str) {
        error!(tick = self.state.tick, reason, "mission failed");
        self.state.crew_alive = 0;
        self.state.end(reason);
    }

    fn complete_sol(&mut self) {
        let summary = SolSummary {
            sol: self.state.sol,
            store_levels: self
                .stores
                .iter()
                .map(|(_, s)| (s.name().to_string(), fixed64_to_f64(s.level())))
                .collect(),
            operational_units: self.units.operational_units().len(),
            failed_units: self.units.failed_units().len(),
            active_events: self.timeline.active().len(),
            crew_size: self.state.crew_size,
        };
        if summary.sol % 10 == 0 {
            info!(sol = summary.sol, "sol complete");
        }
        for callback in &mut self.callbacks.sol {
            callback(&summary);
        }
        self.sol_summaries.push(summary);
    }

    // -----------------------------------------------------------------------
    // Introspection
    // -----------------------------------------------------------------------

    /// Deterministic hash over mission progress, store ledgers and unit
    /// states. Identical inputs give identical hashes.
    pub fn state_hash(&self) -> u64 {
        let mut hasher = StateHash::new();
        hasher.write_u64(self.state.tick);
        hasher.write_u64(self.state.sol);
        hasher.write_u32(self.state.hour);
        hasher.write_u32(self.state.crew_size);
        hasher.write_u32(self.state.crew_alive);
        hasher.write(&[u8::from(self.state.ended)]);

        for (_, store) in self.stores.iter() {
            let totals = store.total_flows();
            hasher.write_fixed64(store.level());
            hasher.write_fixed64(totals.inflow);
            hasher.write_fixed64(totals.outflow);
            hasher.write_fixed64(totals.overflow);
            hasher.write_fixed64(totals.shortfall);
        }

        for unit in self.units.iter_registered() {
            hasher.write_u32(unit.state() as u32);
            hasher.write_fixed64(unit.malfunction_severity());
            hasher.write_u64(unit.ticks_until_repair());
            hasher.write_fixed64(unit.total_power_consumed());
        }

        hasher.write_u64(self.timeline.active().len() as u64);
        hasher.write_u64(self.timeline.history().len() as u64);
        hasher.finish()
    }

    pub fn status(&self) -> MissionStatus {
        let total_ticks = self.config.total_ticks();
        let progress = if total_ticks == 0 {
            1.0
        } else {
            self.state.tick as f64 / total_ticks as f64
        };
        MissionStatus {
            state: self.state.clone(),
            total_ticks,
            progress,
            operational_units: self.units.operational_units().len(),
            failed_units: self.units.failed_units().len(),
            active_events: self.timeline.active_names(),
            pending_events: self.timeline.pending().count(),
            total_power_demand: fixed64_to_f64(self.units.total_power_demand()),
        }
    }

    pub fn final_report(&self) -> FinalReport {
        let keep = self.config.report_sol_summaries;
        let skip = self.sol_summaries.len().saturating_sub(keep);
        FinalReport {
            mission_summary: MissionSummary {
                ticks_completed: self.state.tick,
                sols_completed: self.state.sol,
                total_sols: self.config.total_sols,
                crew_size: self.state.crew_size,
                crew_alive: self.state.crew_alive,
                ended: self.state.ended,
                end_reason: self.state.end_reason.clone(),
                mission_success: self.state.crew_alive > 0
                    && self.state.sol >= self.config.total_sols,
                state_hash: self.state_hash(),
            },
            resource_totals: self
                .stores
                .iter()
                .map(|(_, s)| {
                    let totals = s.total_flows();
                    ResourceTotals {
                        name: s.name().to_string(),
                        kind: s.kind(),
                        final_level: fixed64_to_f64(s.level()),
                        capacity: fixed64_to_f64(s.capacity()),
                        total_inflow: fixed64_to_f64(totals.inflow),
                        total_outflow: fixed64_to_f64(totals.outflow),
                        total_overflow: fixed64_to_f64(totals.overflow),
                        total_shortfall: fixed64_to_f64(totals.shortfall),
                    }
                })
                .collect(),
            unit_stats: self.units.statuses(),
            event_history: self.timeline.history().to_vec(),
            sol_summaries: self.sol_summaries[skip..].to_vec(),
        }
    }

    /// Final report plus every retained tick record.
    pub fn mission_log(&self) -> MissionLog {
        MissionLog {
            report: self.final_report(),
            ticks: self.tick_records.iter().cloned().collect(),
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
