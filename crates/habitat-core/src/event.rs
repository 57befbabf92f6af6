//! Time-triggered mission events.
//!
//! Events are scheduled ahead of time, activated when the clock reaches
//! their trigger tick, kept active for `duration_ticks`, and then retired
//! into the history. Effects are applied once on activation; the few that
//! describe an ongoing condition are reversed on retirement.
//!
//! # Timing
//!
//! At each tick the timeline first counts down active events and retires
//! those that reach zero, then activates every due pending event. An event
//! triggered at tick `t` with duration `d ≥ 1` is therefore active during
//! ticks `t ..= t + d - 1`. A zero-duration event applies its effect and is
//! retired within its trigger tick.

use crate::fixed::{Fixed64, Ticks, clamp_unit, fixed64_to_f64};
use crate::id::StoreId;
use crate::registry::ResourceRegistry;
use crate::scheduler::UnitScheduler;
use crate::sim::MissionState;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use tracing::{debug, info, warn};

/// Parameter key written by [`EventKind::WaterRestriction`].
pub const RESTRICTION_FACTOR: &str = "restriction_factor";

// ---------------------------------------------------------------------------
// Event kinds
// ---------------------------------------------------------------------------

/// What an event does. Effects are documented per variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Drains the power store to zero.
    PowerOutage,
    /// Scales the power store down by `1 - severity`.
    PowerOutagePartial,
    /// Scales the power store down by `1 - severity`.
    PowerReduction,
    /// Degrades the target unit, or every unit feeding the water store.
    WaterInterruption,
    /// Publishes `restriction_factor = 1 - severity` while active.
    WaterRestriction,
    /// Informational.
    WaterContamination,
    /// Adjusts crew size by `delta`, never below one.
    CrewSizeChange { delta: i32 },
    /// Informational.
    CrewMetabolicIncrease,
    /// Informational.
    CrewEvaDay,
    /// Injects a malfunction into the target unit.
    UnitFailure,
    /// Injects a malfunction into the target unit.
    EquipmentMalfunction,
    /// Informational.
    SensorFailure,
    /// Scales [`Conditions::solar_factor`] while active.
    DustStorm,
    /// Informational.
    RadiationEvent,
}

impl EventKind {
    /// Stable upper-case name used in reports and tick records.
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::PowerOutage => "POWER_OUTAGE_TOTAL",
            EventKind::PowerOutagePartial => "POWER_OUTAGE_PARTIAL",
            EventKind::PowerReduction => "POWER_REDUCTION",
            EventKind::WaterInterruption => "WATER_SUPPLY_INTERRUPTION",
            EventKind::WaterRestriction => "WATER_RESTRICTION",
            EventKind::WaterContamination => "WATER_CONTAMINATION",
            EventKind::CrewSizeChange { delta } if *delta >= 0 => "CREW_SIZE_INCREASE",
            EventKind::CrewSizeChange { .. } => "CREW_SIZE_DECREASE",
            EventKind::CrewMetabolicIncrease => "CREW_METABOLIC_INCREASE",
            EventKind::CrewEvaDay => "CREW_EVA_DAY",
            EventKind::UnitFailure => "UNIT_FAILURE",
            EventKind::EquipmentMalfunction => "EQUIPMENT_MALFUNCTION",
            EventKind::SensorFailure => "SENSOR_FAILURE",
            EventKind::DustStorm => "DUST_STORM",
            EventKind::RadiationEvent => "RADIATION_EVENT",
        }
    }

    /// Whether retiring the event undoes part of its effect.
    pub fn is_reversible(&self) -> bool {
        matches!(self, EventKind::WaterRestriction | EventKind::DustStorm)
    }
}

// ---------------------------------------------------------------------------
// Event
// ---------------------------------------------------------------------------

/// One scheduled occurrence of an [`EventKind`].
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    kind: EventKind,
    trigger_tick: Ticks,
    duration_ticks: Ticks,
    severity: Fixed64,
    target: Option<String>,
    parameters: BTreeMap<String, Fixed64>,

    active: bool,
    ticks_remaining: Ticks,
    /// Index of this occurrence in the timeline history.
    record: usize,
}

impl Event {
    /// A one-tick, full-severity event.
    pub fn new(kind: EventKind, trigger_tick: Ticks) -> Self {
        Self {
            kind,
            trigger_tick,
            duration_ticks: 1,
            severity: Fixed64::ONE,
            target: None,
            parameters: BTreeMap::new(),
            active: false,
            ticks_remaining: 0,
            record: 0,
        }
    }

    pub fn lasting(mut self, duration_ticks: Ticks) -> Self {
        self.duration_ticks = duration_ticks;
        self
    }

    /// Severity, clamped to `[0, 1]`.
    pub fn severity(mut self, severity: Fixed64) -> Self {
        self.severity = clamp_unit(severity);
        self
    }

    pub fn targeting(mut self, unit: impl Into<String>) -> Self {
        self.target = Some(unit.into());
        self
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: Fixed64) -> Self {
        self.parameters.insert(key.into(), value);
        self
    }

    /// Move the trigger `offset` ticks later.
    pub fn delayed_by(mut self, offset: Ticks) -> Self {
        self.trigger_tick = self.trigger_tick.saturating_add(offset);
        self
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    pub fn trigger_tick(&self) -> Ticks {
        self.trigger_tick
    }

    pub fn duration_ticks(&self) -> Ticks {
        self.duration_ticks
    }

    pub fn severity_value(&self) -> Fixed64 {
        self.severity
    }

    pub fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }

    pub fn parameters(&self) -> &BTreeMap<String, Fixed64> {
        &self.parameters
    }

    pub fn parameter(&self, key: &str) -> Option<Fixed64> {
        self.parameters.get(key).copied()
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn ticks_remaining(&self) -> Ticks {
        self.ticks_remaining
    }
}

/// History entry for one event occurrence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub name: String,
    pub kind: EventKind,
    pub trigger_tick: Ticks,
    pub activated_at: Ticks,
    /// Tick at which the event was retired; `None` while still active.
    pub ended_at: Option<Ticks>,
    pub duration_ticks: Ticks,
    pub severity: f64,
    pub target: Option<String>,
}

// ---------------------------------------------------------------------------
// Conditions
// ---------------------------------------------------------------------------

/// Environmental multipliers derived from the active events, exposed to unit
/// behaviors each tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Conditions {
    /// Product of `1 - severity` over active dust storms.
    pub solar_factor: Fixed64,
    /// Smallest `restriction_factor` among active water restrictions.
    pub water_restriction_factor: Fixed64,
}

impl Default for Conditions {
    fn default() -> Self {
        Self {
            solar_factor: Fixed64::ONE,
            water_restriction_factor: Fixed64::ONE,
        }
    }
}

// ---------------------------------------------------------------------------
// Effect context
// ---------------------------------------------------------------------------

/// Everything an event effect may touch.
pub struct EffectContext<'a> {
    pub registry: &'a mut ResourceRegistry,
    pub units: &'a mut UnitScheduler,
    pub state: &'a mut MissionState,
    pub power_store: Option<StoreId>,
    pub water_store: Option<StoreId>,
}

// ---------------------------------------------------------------------------
// Timeline
// ---------------------------------------------------------------------------

/// Pending, active and retired events of a mission.
#[derive(Debug, Default)]
pub struct EventTimeline {
    /// Sorted by trigger tick; ties keep scheduling order.
    pending: VecDeque<Event>,
    active: Vec<Event>,
    history: Vec<EventRecord>,
}

impl EventTimeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an event. Events sharing a trigger tick fire in the order they
    /// were scheduled.
    pub fn schedule(&mut self, mut event: Event) {
        event.active = false;
        event.ticks_remaining = 0;
        let at = self
            .pending
            .partition_point(|e| e.trigger_tick <= event.trigger_tick);
        self.pending.insert(at, event);
    }

    pub fn pending(&self) -> impl Iterator<Item = &Event> {
        self.pending.iter()
    }

    pub fn active(&self) -> &[Event] {
        &self.active
    }

    pub fn history(&self) -> &[EventRecord] {
        &self.history
    }

    pub fn active_names(&self) -> Vec<String> {
        self.active.iter().map(|e| e.name().to_string()).collect()
    }

    /// Multipliers implied by the currently active events.
    pub fn conditions(&self) -> Conditions {
        let mut conditions = Conditions::default();
        for event in &self.active {
            match event.kind {
                EventKind::DustStorm => {
                    conditions.solar_factor *= Fixed64::ONE - event.severity;
                }
                EventKind::WaterRestriction => {
                    if let Some(factor) = event.parameter(RESTRICTION_FACTOR) {
                        conditions.water_restriction_factor =
                            conditions.water_restriction_factor.min(factor);
                    }
                }
                _ => {}
            }
        }
        conditions
    }

    /// Retire expiring events, then activate every event due at `tick`.
    /// Returns the events activated this call.
    pub fn advance(&mut self, tick: Ticks, ctx: &mut EffectContext<'_>) -> Vec<Event> {
        for mut event in std::mem::take(&mut self.active) {
            event.ticks_remaining = event.ticks_remaining.saturating_sub(1);
            if event.ticks_remaining == 0 {
                self.retire(event, tick, ctx);
            } else {
                self.active.push(event);
            }
        }

        let mut triggered = Vec::new();
        while self
            .pending
            .front()
            .is_some_and(|e| e.trigger_tick <= tick)
        {
            let Some(mut event) = self.pending.pop_front() else {
                break;
            };
            event.active = true;
            event.ticks_remaining = event.duration_ticks;
            event.record = self.history.len();
            self.history.push(EventRecord {
                name: event.name().to_string(),
                kind: event.kind,
                trigger_tick: event.trigger_tick,
                activated_at: tick,
                ended_at: None,
                duration_ticks: event.duration_ticks,
                severity: fixed64_to_f64(event.severity),
                target: event.target.clone(),
            });

            warn!(
                event = event.name(),
                tick,
                severity = %event.severity,
                target = event.target.as_deref().unwrap_or("-"),
                "event triggered"
            );
            apply(&mut event, ctx);
            triggered.push(event.clone());

            if event.duration_ticks == 0 {
                self.retire(event, tick, ctx);
            } else {
                self.active.push(event);
            }
        }
        triggered
    }

    fn retire(&mut self, mut event: Event, tick: Ticks, ctx: &mut EffectContext<'_>) {
        reverse(&mut event, ctx);
        event.active = false;
        if let Some(record) = self.history.get_mut(event.record) {
            record.ended_at = Some(tick);
        }
        info!(event = event.name(), tick, "event ended");
    }
}

// ---------------------------------------------------------------------------
// Effects
// ---------------------------------------------------------------------------

fn apply(event: &mut Event, ctx: &mut EffectContext<'_>) {
    match event.kind {
        EventKind::PowerOutage => scale_power(ctx, Fixed64::ZERO),
        EventKind::PowerOutagePartial | EventKind::PowerReduction => {
            scale_power(ctx, Fixed64::ONE - event.severity);
        }
        EventKind::WaterInterruption => match event.target.as_deref() {
            Some(name) => match ctx.units.by_name_mut(name) {
                Some(unit) => unit.set_degraded("water supply interruption"),
                None => warn!(event = event.name(), unit = name, "target unit not found"),
            },
            None => {
                let Some(water) = ctx.water_store else {
                    warn!(event = event.name(), "no water store configured");
                    return;
                };
                for unit in ctx.units.iter_mut() {
                    if unit.produces_into(water) {
                        unit.set_degraded("water supply interruption");
                    }
                }
            }
        },
        EventKind::WaterRestriction => {
            event
                .parameters
                .insert(RESTRICTION_FACTOR.to_string(), Fixed64::ONE - event.severity);
        }
        EventKind::CrewSizeChange { delta } => ctx.state.change_crew(delta),
        EventKind::UnitFailure | EventKind::EquipmentMalfunction => {
            let Some(name) = event.target.as_deref() else {
                warn!(event = event.name(), "malfunction event without a target");
                return;
            };
            match ctx.units.by_name_mut(name) {
                Some(unit) => unit.inject_malfunction(event.severity, event.duration_ticks),
                None => warn!(event = event.name(), unit = name, "target unit not found"),
            }
        }
        EventKind::WaterContamination
        | EventKind::CrewMetabolicIncrease
        | EventKind::CrewEvaDay
        | EventKind::SensorFailure
        | EventKind::DustStorm
        | EventKind::RadiationEvent => {
            debug!(event = event.name(), severity = %event.severity, "informational event");
        }
    }
}

fn reverse(event: &mut Event, _ctx: &mut EffectContext<'_>) {
    match event.kind {
        EventKind::WaterRestriction => {
            event.parameters.remove(RESTRICTION_FACTOR);
        }
        // Dust storms only shape `Conditions`, which stops once retired.
        EventKind::DustStorm => {}
        EventKind::PowerOutage
        | EventKind::PowerOutagePartial
        | EventKind::PowerReduction
        | EventKind::WaterInterruption
        | EventKind::WaterContamination
        | EventKind::CrewSizeChange { .. }
        | EventKind::CrewMetabolicIncrease
        | EventKind::CrewEvaDay
        | EventKind::UnitFailure
        | EventKind::EquipmentMalfunction
        | EventKind::SensorFailure
        | EventKind::RadiationEvent => {}
    }
}

fn scale_power(ctx: &mut EffectContext<'_>, factor: Fixed64) {
    let Some(store) = ctx.power_store.and_then(|id| ctx.registry.get_mut(id)) else {
        warn!("no power store configured");
        return;
    };
    let level = store.level() * factor;
    store.override_level(level);
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixed::f64_to_fixed64 as fixed;
    use crate::store::{ResourceKind, ResourceStore};
    use crate::unit::{
        FlowPolicy, PassiveBehavior, Priority, ProductionUnit, ResourceFlow, UnitSpec, UnitState,
    };

    struct World {
        registry: ResourceRegistry,
        units: UnitScheduler,
        state: MissionState,
    }

    impl World {
        fn new() -> Self {
            let mut registry = ResourceRegistry::new();
            registry
                .insert(
                    ResourceStore::new("Power", ResourceKind::ElectricalPower, fixed(1000.0))
                        .unwrap()
                        .with_level(fixed(800.0)),
                )
                .unwrap();
            registry
                .insert(
                    ResourceStore::new("Potable_Water", ResourceKind::PotableWater, fixed(1000.0))
                        .unwrap()
                        .with_level(fixed(500.0)),
                )
                .unwrap();

            let mut units = UnitScheduler::new();
            let extractor = UnitSpec::new("Extractor", Priority::High).produces(ResourceFlow::new(
                ResourceKind::PotableWater,
                fixed(5.0),
                "Potable_Water",
            ));
            let heater = UnitSpec::new("Heater", Priority::Low);
            for spec in [extractor, heater] {
                units
                    .insert(ProductionUnit::new(spec, Box::new(PassiveBehavior), &registry).unwrap())
                    .unwrap();
            }
            units.start_all();
            let policy = FlowPolicy {
                power_store: registry.id("Power"),
                ..FlowPolicy::default()
            };
            units
                .tick_all(&mut registry, policy, Conditions::default(), 0, 0)
                .unwrap();

            Self {
                registry,
                units,
                state: MissionState::new(4),
            }
        }

        fn advance(&mut self, timeline: &mut EventTimeline, tick: Ticks) -> Vec<Event> {
            let power_store = self.registry.id("Power");
            let water_store = self.registry.id("Potable_Water");
            let mut ctx = EffectContext {
                registry: &mut self.registry,
                units: &mut self.units,
                state: &mut self.state,
                power_store,
                water_store,
            };
            timeline.advance(tick, &mut ctx)
        }

        fn power(&self) -> Fixed64 {
            self.registry.by_name("Power").unwrap().level()
        }
    }

    #[test]
    fn active_window_is_trigger_plus_duration() {
        let mut world = World::new();
        let mut timeline = EventTimeline::new();
        timeline.schedule(Event::new(EventKind::SensorFailure, 10).lasting(5));

        let mut active_ticks = Vec::new();
        for tick in 0..20 {
            world.advance(&mut timeline, tick);
            if !timeline.active_names().is_empty() {
                active_ticks.push(tick);
            }
        }
        assert_eq!(active_ticks, vec![10, 11, 12, 13, 14]);
        assert_eq!(timeline.history()[0].activated_at, 10);
        assert_eq!(timeline.history()[0].ended_at, Some(15));
    }

    #[test]
    fn delayed_events_keep_their_shape() {
        let event = Event::new(EventKind::DustStorm, 4)
            .lasting(6)
            .severity(fixed(0.5))
            .delayed_by(100);
        assert_eq!(event.trigger_tick(), 104);
        assert_eq!(event.duration_ticks(), 6);
        assert_eq!(event.severity_value(), fixed(0.5));
        let late = Event::new(EventKind::DustStorm, Ticks::MAX).delayed_by(1);
        assert_eq!(late.trigger_tick(), Ticks::MAX);
    }

    #[test]
    fn zero_duration_fires_and_retires_same_tick() {
        let mut world = World::new();
        let mut timeline = EventTimeline::new();
        timeline.schedule(Event::new(EventKind::PowerOutage, 3).lasting(0));

        let triggered = world.advance(&mut timeline, 3);

        assert_eq!(triggered.len(), 1);
        assert!(timeline.active().is_empty());
        assert_eq!(world.power(), Fixed64::ZERO);
        assert_eq!(timeline.history()[0].ended_at, Some(3));
    }

    #[test]
    fn ties_fire_in_scheduling_order() {
        let mut world = World::new();
        let mut timeline = EventTimeline::new();
        timeline.schedule(Event::new(EventKind::DustStorm, 5));
        timeline.schedule(Event::new(EventKind::RadiationEvent, 2));
        timeline.schedule(Event::new(EventKind::SensorFailure, 5));

        assert_eq!(world.advance(&mut timeline, 2).len(), 1);
        let names: Vec<&str> = world
            .advance(&mut timeline, 5)
            .iter()
            .map(Event::name)
            .collect();
        assert_eq!(names, vec!["DUST_STORM", "SENSOR_FAILURE"]);
    }

    #[test]
    fn late_events_fire_on_next_advance() {
        let mut world = World::new();
        let mut timeline = EventTimeline::new();
        timeline.schedule(Event::new(EventKind::CrewEvaDay, 1));
        assert_eq!(world.advance(&mut timeline, 7).len(), 1);
        assert_eq!(timeline.pending().count(), 0);
    }

    #[test]
    fn power_reduction_scales_level() {
        let mut world = World::new();
        let mut timeline = EventTimeline::new();
        timeline.schedule(Event::new(EventKind::PowerReduction, 0).severity(fixed(0.25)));
        world.advance(&mut timeline, 0);
        assert_eq!(world.power(), fixed(600.0));
    }

    #[test]
    fn water_interruption_degrades_water_producers() {
        let mut world = World::new();
        let mut timeline = EventTimeline::new();
        timeline.schedule(Event::new(EventKind::WaterInterruption, 0));
        world.advance(&mut timeline, 0);
        assert_eq!(
            world.units.by_name("Extractor").unwrap().state(),
            UnitState::Degraded
        );
        assert_eq!(world.units.by_name("Heater").unwrap().state(), UnitState::Nominal);
    }

    #[test]
    fn water_restriction_publishes_factor_until_retired() {
        let mut world = World::new();
        let mut timeline = EventTimeline::new();
        timeline.schedule(
            Event::new(EventKind::WaterRestriction, 0)
                .lasting(2)
                .severity(fixed(0.3)),
        );

        world.advance(&mut timeline, 0);
        let factor = timeline.active()[0].parameter(RESTRICTION_FACTOR).unwrap();
        assert_eq!(timeline.conditions().water_restriction_factor, factor);
        assert!((fixed64_to_f64(factor) - 0.7).abs() < 1e-6);

        world.advance(&mut timeline, 1);
        world.advance(&mut timeline, 2);
        assert!(timeline.active().is_empty());
        assert_eq!(timeline.conditions(), Conditions::default());
    }

    #[test]
    fn dust_storms_compound_solar_factor() {
        let mut world = World::new();
        let mut timeline = EventTimeline::new();
        timeline.schedule(Event::new(EventKind::DustStorm, 0).lasting(3).severity(fixed(0.5)));
        timeline.schedule(Event::new(EventKind::DustStorm, 0).lasting(3).severity(fixed(0.5)));
        world.advance(&mut timeline, 0);
        assert_eq!(timeline.conditions().solar_factor, fixed(0.25));
    }

    #[test]
    fn malfunction_event_targets_unit() {
        let mut world = World::new();
        let mut timeline = EventTimeline::new();
        timeline.schedule(
            Event::new(EventKind::EquipmentMalfunction, 0)
                .lasting(4)
                .targeting("Heater"),
        );
        world.advance(&mut timeline, 0);
        let heater = world.units.by_name("Heater").unwrap();
        assert_eq!(heater.state(), UnitState::Failed);
        assert_eq!(heater.ticks_until_repair(), 4);
    }

    #[test]
    fn crew_changes_clamp_at_one() {
        let mut world = World::new();
        let mut timeline = EventTimeline::new();
        timeline.schedule(Event::new(EventKind::CrewSizeChange { delta: -10 }, 0));
        timeline.schedule(Event::new(EventKind::CrewSizeChange { delta: 2 }, 1));

        let names: Vec<&str> = world
            .advance(&mut timeline, 0)
            .iter()
            .map(Event::name)
            .collect();
        assert_eq!(names, vec!["CREW_SIZE_DECREASE"]);
        assert_eq!(world.state.crew_size, 1);
        assert_eq!(world.state.crew_alive, 1);

        world.advance(&mut timeline, 1);
        assert_eq!(world.state.crew_size, 3);
        assert_eq!(world.state.crew_alive, 3);
    }

    #[test]
    fn severity_is_clamped_on_build() {
        let event = Event::new(EventKind::PowerReduction, 0).severity(fixed(-2.0));
        assert_eq!(event.severity_value(), Fixed64::ZERO);
    }
}
