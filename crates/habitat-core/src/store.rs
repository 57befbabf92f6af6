//! Capacity-bounded resource ledgers.
//!
//! A [`ResourceStore`] holds one resource kind. Levels only change through
//! [`ResourceStore::add`], [`ResourceStore::remove`] and
//! [`ResourceStore::transfer_to`], which keep `0 <= level <= capacity` and
//! account every unit that could not be moved as overflow or shortfall.
//! Scarcity is never an error: only negative amounts are rejected.

use crate::fixed::{Fixed64, fixed64_to_f64};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

// ---------------------------------------------------------------------------
// Resource kinds
// ---------------------------------------------------------------------------

/// Types of resources tracked by the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    // -- Gases --
    Oxygen,
    Co2,
    Nitrogen,
    Hydrogen,
    Methane,

    // -- Liquids --
    PotableWater,
    GreyWater,
    WasteWater,
    Milk,

    // -- Food --
    BiomassEdible,
    Potatoes,
    Vegetables,
    Legumes,
    GrainFlour,
    Fodder,
    Eggs,
    Cheese,
    Meat,
    EarthFood,

    // -- Other solids --
    BiomassInedible,
    HumanWaste,
    AnimalWaste,
    NutrientsN,
    NutrientsP,
    NutrientsK,

    // -- Energy --
    ElectricalPower,
    ThermalEnergy,

    // -- Abstract --
    Calories,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Caller bugs detected by a store. Simulated scarcity never produces one.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    #[error("{store}: cannot move negative amount {amount}")]
    InvalidAmount { store: String, amount: Fixed64 },

    #[error("{store}: capacity must be non-negative, got {capacity}")]
    InvalidCapacity { store: String, capacity: Fixed64 },
}

// ---------------------------------------------------------------------------
// Flow counters
// ---------------------------------------------------------------------------

/// Inflow/outflow/overflow/shortfall totals over some window. Counters
/// saturate at `Fixed64::MAX` instead of wrapping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlowCounters {
    pub inflow: Fixed64,
    pub outflow: Fixed64,
    pub overflow: Fixed64,
    pub shortfall: Fixed64,
}

// ---------------------------------------------------------------------------
// Status snapshot
// ---------------------------------------------------------------------------

/// Read-only snapshot of a store, in report units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreStatus {
    pub name: String,
    pub kind: ResourceKind,
    pub level: f64,
    pub capacity: f64,
    pub fill_fraction: f64,
    pub reserve: f64,
    pub available: f64,
    pub is_low: bool,
    pub is_empty: bool,
    pub inflow_this_tick: f64,
    pub outflow_this_tick: f64,
    pub overflow_this_tick: f64,
    pub shortfall_this_tick: f64,
}

// ---------------------------------------------------------------------------
// Hooks
// ---------------------------------------------------------------------------

/// Callback fired with the store's status after a threshold is crossed.
pub type StoreHook = Box<dyn FnMut(&StoreStatus)>;

#[derive(Default)]
struct StoreHooks {
    on_empty: Option<StoreHook>,
    on_low: Option<StoreHook>,
    on_full: Option<StoreHook>,
}

impl std::fmt::Debug for StoreHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tag = |h: &Option<StoreHook>| if h.is_some() { "Some(<fn>)" } else { "None" };
        f.debug_struct("StoreHooks")
            .field("on_empty", &tag(&self.on_empty))
            .field("on_low", &tag(&self.on_low))
            .field("on_full", &tag(&self.on_full))
            .finish()
    }
}

// ---------------------------------------------------------------------------
// ResourceStore
// ---------------------------------------------------------------------------

/// A capacity-bounded ledger for one resource kind.
#[derive(Debug)]
pub struct ResourceStore {
    name: String,
    kind: ResourceKind,
    capacity: Fixed64,
    level: Fixed64,
    /// Protected minimum that ordinary draws will not touch.
    reserve: Fixed64,
    this_tick: FlowCounters,
    totals: FlowCounters,
    hooks: StoreHooks,
}

impl ResourceStore {
    /// Create an empty store. Rejects negative capacity.
    pub fn new(
        name: impl Into<String>,
        kind: ResourceKind,
        capacity: Fixed64,
    ) -> Result<Self, StoreError> {
        let name = name.into();
        if capacity.is_negative() {
            return Err(StoreError::InvalidCapacity {
                store: name,
                capacity,
            });
        }
        Ok(Self {
            name,
            kind,
            capacity,
            level: Fixed64::ZERO,
            reserve: Fixed64::ZERO,
            this_tick: FlowCounters::default(),
            totals: FlowCounters::default(),
            hooks: StoreHooks::default(),
        })
    }

    /// Set the initial level. Values above capacity are clamped.
    pub fn with_level(mut self, level: Fixed64) -> Self {
        if level > self.capacity {
            warn!(
                store = %self.name,
                level = fixed64_to_f64(level),
                capacity = fixed64_to_f64(self.capacity),
                "initial level exceeds capacity, clamping"
            );
        }
        self.level = level.clamp(Fixed64::ZERO, self.capacity);
        self
    }

    /// Set the reserve. A reserve above capacity falls back to 10% of capacity.
    pub fn with_reserve(mut self, reserve: Fixed64) -> Self {
        if reserve > self.capacity {
            warn!(
                store = %self.name,
                reserve = fixed64_to_f64(reserve),
                capacity = fixed64_to_f64(self.capacity),
                "reserve exceeds capacity, using 10% of capacity"
            );
            self.reserve = self.capacity / 10;
        } else {
            self.reserve = reserve.max(Fixed64::ZERO);
        }
        self
    }

    /// Register a hook fired when a removal leaves the store empty.
    pub fn on_empty(&mut self, hook: StoreHook) {
        self.hooks.on_empty = Some(hook);
    }

    /// Register a hook fired when a removal leaves the store at or below reserve.
    pub fn on_low(&mut self, hook: StoreHook) {
        self.hooks.on_low = Some(hook);
    }

    /// Register a hook fired when an addition fills the store.
    pub fn on_full(&mut self, hook: StoreHook) {
        self.hooks.on_full = Some(hook);
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn capacity(&self) -> Fixed64 {
        self.capacity
    }

    pub fn level(&self) -> Fixed64 {
        self.level
    }

    pub fn reserve(&self) -> Fixed64 {
        self.reserve
    }

    /// Amount that can be drawn without touching the reserve.
    pub fn available(&self) -> Fixed64 {
        (self.level - self.reserve).max(Fixed64::ZERO)
    }

    pub fn free_capacity(&self) -> Fixed64 {
        self.capacity - self.level
    }

    /// Level as a fraction of capacity; 0 for a zero-capacity store.
    pub fn fill_fraction(&self) -> Fixed64 {
        if self.capacity == Fixed64::ZERO {
            return Fixed64::ZERO;
        }
        self.level / self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.level <= Fixed64::ZERO
    }

    pub fn is_low(&self) -> bool {
        self.level <= self.reserve
    }

    pub fn is_full(&self) -> bool {
        self.level >= self.capacity
    }

    /// Flows recorded since the last [`reset_tick_counters`](Self::reset_tick_counters).
    pub fn tick_flows(&self) -> FlowCounters {
        self.this_tick
    }

    /// Flows recorded since the store was created.
    pub fn total_flows(&self) -> FlowCounters {
        self.totals
    }

    // -----------------------------------------------------------------------
    // Mutation
    // -----------------------------------------------------------------------

    /// Add up to `amount`. Whatever does not fit is recorded as overflow and
    /// discarded. Returns the amount actually stored.
    pub fn add(&mut self, amount: Fixed64) -> Result<Fixed64, StoreError> {
        self.check_amount(amount)?;

        let actual = amount.min(self.free_capacity());
        let overflow = amount - actual;

        self.level += actual;
        self.this_tick.inflow = self.this_tick.inflow.saturating_add(actual);
        self.totals.inflow = self.totals.inflow.saturating_add(actual);

        if overflow > Fixed64::ZERO {
            self.this_tick.overflow = self.this_tick.overflow.saturating_add(overflow);
            self.totals.overflow = self.totals.overflow.saturating_add(overflow);
            debug!(store = %self.name, overflow = fixed64_to_f64(overflow), "capacity reached");
        }

        if self.is_full() && self.hooks.on_full.is_some() {
            let status = self.status();
            if let Some(hook) = self.hooks.on_full.as_mut() {
                hook(&status);
            }
        }

        Ok(actual)
    }

    /// Remove up to `amount`. Without `allow_reserve` the reserve is off
    /// limits. The unmet remainder is recorded as shortfall. Returns the
    /// amount actually removed.
    pub fn remove(&mut self, amount: Fixed64, allow_reserve: bool) -> Result<Fixed64, StoreError> {
        self.check_amount(amount)?;

        let pool = if allow_reserve {
            self.level
        } else {
            self.available()
        };
        let actual = amount.min(pool);
        let shortfall = amount - actual;

        self.level -= actual;
        self.this_tick.outflow = self.this_tick.outflow.saturating_add(actual);
        self.totals.outflow = self.totals.outflow.saturating_add(actual);

        if shortfall > Fixed64::ZERO {
            self.this_tick.shortfall = self.this_tick.shortfall.saturating_add(shortfall);
            self.totals.shortfall = self.totals.shortfall.saturating_add(shortfall);
            debug!(store = %self.name, shortfall = fixed64_to_f64(shortfall), "insufficient supply");
        }

        if self.is_empty() {
            self.fire_empty();
        } else if self.is_low() {
            self.fire_low();
        }

        Ok(actual)
    }

    /// Move up to `amount` into `target`. Anything the target cannot hold
    /// stays in this store, so the outflow recorded here always equals the
    /// inflow recorded by the target. Returns the amount transferred.
    pub fn transfer_to(
        &mut self,
        target: &mut ResourceStore,
        amount: Fixed64,
        allow_reserve: bool,
    ) -> Result<Fixed64, StoreError> {
        let removed = self.remove(amount, allow_reserve)?;
        let accepted = removed.min(target.free_capacity());
        target.add(accepted)?;

        let excess = removed - accepted;
        if excess > Fixed64::ZERO {
            self.restore(excess);
        }
        Ok(accepted)
    }

    /// Zero the per-tick counters. Cumulative totals are untouched.
    pub fn reset_tick_counters(&mut self) {
        self.this_tick = FlowCounters::default();
    }

    /// Force the level, bypassing flow accounting. Event effects only.
    pub(crate) fn override_level(&mut self, level: Fixed64) {
        self.level = level.clamp(Fixed64::ZERO, self.capacity);
    }

    /// Snapshot of the store in report units.
    pub fn status(&self) -> StoreStatus {
        StoreStatus {
            name: self.name.clone(),
            kind: self.kind,
            level: fixed64_to_f64(self.level),
            capacity: fixed64_to_f64(self.capacity),
            fill_fraction: fixed64_to_f64(self.fill_fraction()),
            reserve: fixed64_to_f64(self.reserve),
            available: fixed64_to_f64(self.available()),
            is_low: self.is_low(),
            is_empty: self.is_empty(),
            inflow_this_tick: fixed64_to_f64(self.this_tick.inflow),
            outflow_this_tick: fixed64_to_f64(self.this_tick.outflow),
            overflow_this_tick: fixed64_to_f64(self.this_tick.overflow),
            shortfall_this_tick: fixed64_to_f64(self.this_tick.shortfall),
        }
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn check_amount(&self, amount: Fixed64) -> Result<(), StoreError> {
        if amount.is_negative() {
            return Err(StoreError::InvalidAmount {
                store: self.name.clone(),
                amount,
            });
        }
        Ok(())
    }

    /// Undo part of a removal that never left the store.
    fn restore(&mut self, amount: Fixed64) {
        self.level += amount;
        self.this_tick.outflow = self.this_tick.outflow.saturating_sub(amount);
        self.totals.outflow = self.totals.outflow.saturating_sub(amount);
    }

    fn fire_empty(&mut self) {
        if self.hooks.on_empty.is_some() {
            let status = self.status();
            if let Some(hook) = self.hooks.on_empty.as_mut() {
                hook(&status);
            }
        }
    }

    fn fire_low(&mut self) {
        if self.hooks.on_low.is_some() {
            let status = self.status();
            if let Some(hook) = self.hooks.on_low.as_mut() {
                hook(&status);
            }
        }
    }
}

impl std::fmt::Display for ResourceStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: {:.1}/{:.1} {:?}",
            self.name,
            fixed64_to_f64(self.level),
            fixed64_to_f64(self.capacity),
            self.kind
        )
    }
}

// ===========================================================================
// Tests
// ===========================================================================
