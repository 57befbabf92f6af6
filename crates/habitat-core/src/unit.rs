//! Production units: the state machine that moves resources between stores.
//!
//! A [`ProductionUnit`] wraps an immutable [`UnitSpec`] describing what it
//! consumes and produces per tick, and a boxed [`UnitBehavior`] that adds
//! domain-specific work on top. All resource accounting (power draw,
//! consumption, production) happens in [`ProductionUnit::tick`] before the
//! behavior runs, scaled by a single effective efficiency for the tick.
//!
//! Shortages never fail a unit outright. A unit that cannot get its power or
//! required inputs drops to [`UnitState::Degraded`] and keeps producing with
//! whatever it obtained.

use crate::event::Conditions;
use crate::fixed::{Fixed64, Ticks, clamp_unit, fixed64_to_f64, mul_sat};
use crate::id::StoreId;
use crate::metrics::Metrics;
use crate::registry::ResourceRegistry;
use crate::store::{ResourceKind, StoreError};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

// ---------------------------------------------------------------------------
// Priority
// ---------------------------------------------------------------------------

/// Rank used for tick order and load shedding. Critical runs first and is
/// shed last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Critical,
    High,
    Medium,
    Low,
}

impl Priority {
    /// All priorities, highest first.
    pub const ALL: [Priority; 4] = [
        Priority::Critical,
        Priority::High,
        Priority::Medium,
        Priority::Low,
    ];

    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Operating state of a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitState {
    Offline,
    Starting,
    Nominal,
    Degraded,
    Emergency,
    Failed,
    Maintenance,
}

impl UnitState {
    /// Nominal, Degraded and Emergency units move resources.
    pub fn is_operational(self) -> bool {
        matches!(
            self,
            UnitState::Nominal | UnitState::Degraded | UnitState::Emergency
        )
    }

    /// Efficiency multiplier contributed by the state alone.
    pub fn state_factor(self) -> Fixed64 {
        match self {
            UnitState::Nominal => Fixed64::ONE,
            UnitState::Degraded => Fixed64::ONE / 2,
            UnitState::Emergency => Fixed64::ONE / 4,
            UnitState::Offline
            | UnitState::Starting
            | UnitState::Failed
            | UnitState::Maintenance => Fixed64::ZERO,
        }
    }
}

// ---------------------------------------------------------------------------
// Spec
// ---------------------------------------------------------------------------

/// A per-tick consumption or production rate against a named store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceFlow {
    pub kind: ResourceKind,
    /// Units per tick at full efficiency.
    pub rate_per_tick: Fixed64,
    pub store: String,
    /// An unmet required input degrades the unit.
    pub required: bool,
}

impl ResourceFlow {
    /// A required flow.
    pub fn new(kind: ResourceKind, rate_per_tick: Fixed64, store: impl Into<String>) -> Self {
        Self {
            kind,
            rate_per_tick,
            store: store.into(),
            required: true,
        }
    }

    /// Mark the flow as optional.
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }
}

/// Immutable description of a unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitSpec {
    pub name: String,
    pub priority: Priority,
    /// Power drawn per tick at full efficiency.
    pub power_consumption: Fixed64,
    pub consumes: Vec<ResourceFlow>,
    pub produces: Vec<ResourceFlow>,
    pub startup_ticks: u32,
    /// Nominal efficiency in `[0, 1]`.
    pub efficiency: Fixed64,
}

impl UnitSpec {
    pub fn new(name: impl Into<String>, priority: Priority) -> Self {
        Self {
            name: name.into(),
            priority,
            power_consumption: Fixed64::ZERO,
            consumes: Vec::new(),
            produces: Vec::new(),
            startup_ticks: 1,
            efficiency: Fixed64::ONE,
        }
    }

    pub fn power(mut self, consumption: Fixed64) -> Self {
        self.power_consumption = consumption;
        self
    }

    pub fn consumes(mut self, flow: ResourceFlow) -> Self {
        self.consumes.push(flow);
        self
    }

    pub fn produces(mut self, flow: ResourceFlow) -> Self {
        self.produces.push(flow);
        self
    }

    pub fn startup_ticks(mut self, ticks: u32) -> Self {
        self.startup_ticks = ticks;
        self
    }

    pub fn efficiency(mut self, efficiency: Fixed64) -> Self {
        self.efficiency = efficiency;
        self
    }

    fn validate(&self) -> Result<(), UnitError> {
        let invalid = |reason: String| UnitError::InvalidSpec {
            unit: self.name.clone(),
            reason,
        };
        if self.power_consumption.is_negative() {
            return Err(invalid(format!(
                "negative power consumption {}",
                self.power_consumption
            )));
        }
        if self.efficiency.is_negative() || self.efficiency > Fixed64::ONE {
            return Err(invalid(format!("efficiency {} outside [0, 1]", self.efficiency)));
        }
        for flow in self.consumes.iter().chain(&self.produces) {
            if flow.rate_per_tick.is_negative() {
                return Err(invalid(format!(
                    "negative rate {} for store '{}'",
                    flow.rate_per_tick, flow.store
                )));
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors raised while constructing a unit.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum UnitError {
    #[error("unit '{unit}': invalid spec: {reason}")]
    InvalidSpec { unit: String, reason: String },

    #[error("unit '{unit}' references unknown store '{store}'")]
    UnknownStore { unit: String, store: String },
}

// ---------------------------------------------------------------------------
// Behavior extension point
// ---------------------------------------------------------------------------

/// Per-tick environment shared by every unit of a tick.
#[derive(Debug, Clone, Copy)]
pub struct TickEnv {
    pub tick: Ticks,
    pub hour: u32,
    pub policy: FlowPolicy,
    pub conditions: Conditions,
}

/// How a unit draws power and judges shortfalls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowPolicy {
    /// Designated power store; `None` when the mission has none.
    pub power_store: Option<StoreId>,
    /// Fraction of a request that may go unmet before it counts as a shortfall.
    pub shortfall_tolerance: Fixed64,
}

impl Default for FlowPolicy {
    fn default() -> Self {
        Self {
            power_store: None,
            shortfall_tolerance: Fixed64::ONE / 10,
        }
    }
}

/// Context handed to [`UnitBehavior::process_tick`].
pub struct UnitContext<'a> {
    pub unit: &'a str,
    pub tick: Ticks,
    pub hour: u32,
    /// The efficiency that scaled this tick's flows.
    pub efficiency: Fixed64,
    pub registry: &'a mut ResourceRegistry,
    pub conditions: &'a Conditions,
}

/// Domain-specific behavior layered on a unit's resource accounting.
///
/// The kernel has already drawn power, consumed inputs and produced outputs
/// by the time `process_tick` runs.
pub trait UnitBehavior: std::fmt::Debug {
    /// Called once per operational tick. Returned metrics are merged into the
    /// unit's tick metrics.
    fn process_tick(&mut self, ctx: &mut UnitContext<'_>) -> Metrics;

    /// Downcast to `&dyn Any` for typed access to concrete behaviors.
    fn as_any(&self) -> &dyn std::any::Any;

    /// Downcast to `&mut dyn Any` for typed access to concrete behaviors.
    fn as_any_mut(&mut self) -> &mut dyn std::any::Any;
}

/// Behavior for units that are fully described by their flows.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassiveBehavior;

impl UnitBehavior for PassiveBehavior {
    fn process_tick(&mut self, _ctx: &mut UnitContext<'_>) -> Metrics {
        Metrics::new()
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

// ---------------------------------------------------------------------------
// Reporting types
// ---------------------------------------------------------------------------

/// What one unit did during one tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitTickMetrics {
    pub name: String,
    /// State at the end of the tick.
    pub state: UnitState,
    /// Efficiency applied to this tick's flows.
    pub efficiency: f64,
    pub power_shortfall: bool,
    pub input_shortfall: bool,
    #[serde(default, skip_serializing_if = "Metrics::is_empty")]
    pub extra: Metrics,
}

/// Read-only introspection of a unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitStatus {
    pub name: String,
    pub state: UnitState,
    pub priority: Priority,
    pub efficiency: f64,
    pub has_malfunction: bool,
    pub malfunction_severity: f64,
    pub ticks_until_repair: Ticks,
    pub ticks_operational: u64,
    pub ticks_failed: u64,
    pub total_power_consumed: f64,
}

// ---------------------------------------------------------------------------
// ProductionUnit
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
struct Malfunction {
    severity: Fixed64,
    /// 0 means permanent until cleared.
    ticks_until_repair: Ticks,
}

/// A flow resolved to its store handle plus the amount moved last tick.
#[derive(Debug, Clone, Copy)]
struct BoundFlow {
    store: StoreId,
    actual: Fixed64,
}

/// A production/consumption unit driven once per tick.
#[derive(Debug)]
pub struct ProductionUnit {
    spec: UnitSpec,
    state: UnitState,
    startup_ticks_remaining: u32,
    malfunction: Option<Malfunction>,
    consume_bindings: Vec<BoundFlow>,
    produce_bindings: Vec<BoundFlow>,
    behavior: Box<dyn UnitBehavior>,

    ticks_operational: u64,
    ticks_failed: u64,
    total_power_consumed: Fixed64,
}

impl ProductionUnit {
    /// Build a unit, validating the spec and resolving every flow's store
    /// against `registry`.
    pub fn new(
        spec: UnitSpec,
        behavior: Box<dyn UnitBehavior>,
        registry: &ResourceRegistry,
    ) -> Result<Self, UnitError> {
        spec.validate()?;
        let bind = |flows: &[ResourceFlow]| -> Result<Vec<BoundFlow>, UnitError> {
            flows
                .iter()
                .map(|flow| {
                    registry
                        .id(&flow.store)
                        .map(|store| BoundFlow {
                            store,
                            actual: Fixed64::ZERO,
                        })
                        .ok_or_else(|| UnitError::UnknownStore {
                            unit: spec.name.clone(),
                            store: flow.store.clone(),
                        })
                })
                .collect()
        };
        let consume_bindings = bind(&spec.consumes)?;
        let produce_bindings = bind(&spec.produces)?;

        Ok(Self {
            spec,
            state: UnitState::Offline,
            startup_ticks_remaining: 0,
            malfunction: None,
            consume_bindings,
            produce_bindings,
            behavior,
            ticks_operational: 0,
            ticks_failed: 0,
            total_power_consumed: Fixed64::ZERO,
        })
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn priority(&self) -> Priority {
        self.spec.priority
    }

    pub fn spec(&self) -> &UnitSpec {
        &self.spec
    }

    pub fn state(&self) -> UnitState {
        self.state
    }

    pub fn is_operational(&self) -> bool {
        self.state.is_operational()
    }

    pub fn has_malfunction(&self) -> bool {
        self.malfunction.is_some()
    }

    pub fn malfunction_severity(&self) -> Fixed64 {
        self.malfunction.map_or(Fixed64::ZERO, |m| m.severity)
    }

    pub fn ticks_until_repair(&self) -> Ticks {
        self.malfunction.map_or(0, |m| m.ticks_until_repair)
    }

    pub fn startup_ticks_remaining(&self) -> u32 {
        self.startup_ticks_remaining
    }

    pub fn ticks_operational(&self) -> u64 {
        self.ticks_operational
    }

    pub fn ticks_failed(&self) -> u64 {
        self.ticks_failed
    }

    pub fn total_power_consumed(&self) -> Fixed64 {
        self.total_power_consumed
    }

    /// Amounts actually drawn per consume flow during the last operational tick.
    pub fn consumed_last_tick(&self) -> impl Iterator<Item = Fixed64> + '_ {
        self.consume_bindings.iter().map(|b| b.actual)
    }

    /// Amounts actually stored per produce flow during the last operational tick.
    pub fn produced_last_tick(&self) -> impl Iterator<Item = Fixed64> + '_ {
        self.produce_bindings.iter().map(|b| b.actual)
    }

    /// Whether any produce flow targets `store`.
    pub fn produces_into(&self, store: StoreId) -> bool {
        self.produce_bindings.iter().any(|b| b.store == store)
    }

    pub fn behavior(&self) -> &dyn UnitBehavior {
        self.behavior.as_ref()
    }

    pub fn behavior_mut(&mut self) -> &mut dyn UnitBehavior {
        self.behavior.as_mut()
    }

    /// `nominal × state factor × (1 − malfunction severity)`; zero when not
    /// operational.
    pub fn effective_efficiency(&self) -> Fixed64 {
        if !self.is_operational() {
            return Fixed64::ZERO;
        }
        let base = self.spec.efficiency * self.state.state_factor();
        match self.malfunction {
            Some(m) => base * (Fixed64::ONE - m.severity),
            None => base,
        }
    }

    /// Power this unit would draw this tick at its current efficiency.
    pub fn power_demand(&self) -> Fixed64 {
        mul_sat(self.spec.power_consumption, self.effective_efficiency())
    }

    // -----------------------------------------------------------------------
    // Transitions
    // -----------------------------------------------------------------------

    /// Begin the startup sequence. Only valid from Offline.
    pub fn start(&mut self) {
        if self.state == UnitState::Offline {
            self.state = UnitState::Starting;
            self.startup_ticks_remaining = self.spec.startup_ticks;
            info!(unit = %self.spec.name, ticks = self.startup_ticks_remaining, "starting up");
        }
    }

    /// Shut the unit down from any state.
    pub fn stop(&mut self) {
        self.state = UnitState::Offline;
        self.startup_ticks_remaining = 0;
        info!(unit = %self.spec.name, "shut down");
    }

    /// Drop an operational unit to Degraded.
    pub fn set_degraded(&mut self, reason: &str) {
        if self.is_operational() && self.state != UnitState::Degraded {
            self.state = UnitState::Degraded;
            warn!(unit = %self.spec.name, reason, "entering degraded mode");
        }
    }

    /// Enter Emergency from any state except Failed.
    pub fn set_emergency(&mut self, reason: &str) {
        if self.state != UnitState::Failed {
            self.state = UnitState::Emergency;
            warn!(unit = %self.spec.name, reason, "emergency mode");
        }
    }

    /// Take an operating or Offline unit down for scheduled maintenance.
    /// Failed units must be cleared first.
    pub fn enter_maintenance(&mut self) {
        if self.is_operational() || self.state == UnitState::Offline {
            self.state = UnitState::Maintenance;
            info!(unit = %self.spec.name, "maintenance started");
        }
    }

    /// End maintenance; the unit is left Offline and must be started again.
    pub fn finish_maintenance(&mut self) {
        if self.state == UnitState::Maintenance {
            self.state = UnitState::Offline;
            info!(unit = %self.spec.name, "maintenance finished");
        }
    }

    /// Inject a malfunction. Severity is clamped to `[0, 1]`; full severity
    /// fails the unit, anything less degrades it. A duration of 0 lasts until
    /// [`clear_malfunction`](Self::clear_malfunction).
    pub fn inject_malfunction(&mut self, severity: Fixed64, duration_ticks: Ticks) {
        let severity = clamp_unit(severity);
        self.malfunction = Some(Malfunction {
            severity,
            ticks_until_repair: duration_ticks,
        });

        if severity >= Fixed64::ONE {
            self.state = UnitState::Failed;
            error!(unit = %self.spec.name, "failed");
        } else {
            self.set_degraded("malfunction");
        }
    }

    /// Clear any malfunction. Failed units go Offline and need a restart;
    /// Degraded units return to Nominal.
    pub fn clear_malfunction(&mut self) {
        self.malfunction = None;
        match self.state {
            UnitState::Failed => {
                self.state = UnitState::Offline;
                info!(unit = %self.spec.name, "malfunction cleared, awaiting restart");
            }
            UnitState::Degraded => {
                self.state = UnitState::Nominal;
                info!(unit = %self.spec.name, "malfunction cleared, back to nominal");
            }
            _ => {}
        }
    }

    // -----------------------------------------------------------------------
    // Tick
    // -----------------------------------------------------------------------

    /// Run one tick: startup countdown, repair countdown, then power draw,
    /// consumption, production and the behavior hook.
    pub fn tick(
        &mut self,
        registry: &mut ResourceRegistry,
        env: &TickEnv,
    ) -> Result<UnitTickMetrics, StoreError> {
        let mut metrics = UnitTickMetrics {
            name: self.spec.name.clone(),
            state: self.state,
            efficiency: 0.0,
            power_shortfall: false,
            input_shortfall: false,
            extra: Metrics::new(),
        };

        if self.state == UnitState::Starting {
            self.startup_ticks_remaining = self.startup_ticks_remaining.saturating_sub(1);
            if self.startup_ticks_remaining == 0 {
                self.state = UnitState::Nominal;
                info!(unit = %self.spec.name, "startup complete");
            }
            metrics.state = self.state;
            return Ok(metrics);
        }

        self.advance_repair();

        if !self.is_operational() {
            self.ticks_failed += 1;
            metrics.state = self.state;
            return Ok(metrics);
        }

        self.ticks_operational += 1;
        let efficiency = self.effective_efficiency();
        let floor = Fixed64::ONE - clamp_unit(env.policy.shortfall_tolerance);

        if !self.draw_power(registry, env.policy.power_store, efficiency, floor)? {
            self.set_degraded("insufficient power");
            metrics.power_shortfall = true;
        }

        if !self.consume_inputs(registry, efficiency, floor)? {
            self.set_degraded("insufficient inputs");
            metrics.input_shortfall = true;
        }

        self.produce_outputs(registry, efficiency)?;

        let mut ctx = UnitContext {
            unit: &self.spec.name,
            tick: env.tick,
            hour: env.hour,
            efficiency,
            registry,
            conditions: &env.conditions,
        };
        metrics.extra = self.behavior.process_tick(&mut ctx);
        metrics.state = self.state;
        metrics.efficiency = fixed64_to_f64(efficiency);
        Ok(metrics)
    }

    fn advance_repair(&mut self) {
        let Some(malfunction) = self.malfunction.as_mut() else {
            return;
        };
        if malfunction.ticks_until_repair > 0 {
            malfunction.ticks_until_repair -= 1;
            if malfunction.ticks_until_repair == 0 {
                self.clear_malfunction();
            }
        }
    }

    /// Returns false when less than `floor` of the requested power arrived.
    fn draw_power(
        &mut self,
        registry: &mut ResourceRegistry,
        power_store: Option<StoreId>,
        efficiency: Fixed64,
        floor: Fixed64,
    ) -> Result<bool, StoreError> {
        let needed = mul_sat(self.spec.power_consumption, efficiency);
        if needed <= Fixed64::ZERO {
            return Ok(true);
        }

        let Some(store) = power_store.and_then(|id| registry.get_mut(id)) else {
            warn!(unit = %self.spec.name, "no power store");
            return Ok(false);
        };

        let actual = store.remove(needed, false)?;
        self.total_power_consumed = self.total_power_consumed.saturating_add(actual);
        Ok(actual >= needed * floor)
    }

    /// Returns false when any required input fell below `floor` of its request.
    fn consume_inputs(
        &mut self,
        registry: &mut ResourceRegistry,
        efficiency: Fixed64,
        floor: Fixed64,
    ) -> Result<bool, StoreError> {
        let mut satisfied = true;
        for (flow, binding) in self.spec.consumes.iter().zip(&mut self.consume_bindings) {
            let needed = mul_sat(flow.rate_per_tick, efficiency);
            let actual = match registry.get_mut(binding.store) {
                Some(store) => store.remove(needed, false)?,
                None => Fixed64::ZERO,
            };
            binding.actual = actual;
            if flow.required && actual < needed * floor {
                satisfied = false;
            }
        }
        Ok(satisfied)
    }

    fn produce_outputs(
        &mut self,
        registry: &mut ResourceRegistry,
        efficiency: Fixed64,
    ) -> Result<(), StoreError> {
        for (flow, binding) in self.spec.produces.iter().zip(&mut self.produce_bindings) {
            let amount = mul_sat(flow.rate_per_tick, efficiency);
            binding.actual = match registry.get_mut(binding.store) {
                Some(store) => store.add(amount)?,
                None => Fixed64::ZERO,
            };
        }
        Ok(())
    }

    /// Read-only introspection.
    pub fn status(&self) -> UnitStatus {
        UnitStatus {
            name: self.spec.name.clone(),
            state: self.state,
            priority: self.spec.priority,
            efficiency: fixed64_to_f64(self.effective_efficiency()),
            has_malfunction: self.has_malfunction(),
            malfunction_severity: fixed64_to_f64(self.malfunction_severity()),
            ticks_until_repair: self.ticks_until_repair(),
            ticks_operational: self.ticks_operational,
            ticks_failed: self.ticks_failed,
            total_power_consumed: fixed64_to_f64(self.total_power_consumed),
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
