//! Priority-ordered container of production units.
//!
//! Units live in four fixed buckets. Ticking walks them Critical first,
//! which decides who gets contended resources within a tick; shedding walks
//! them Low first. Within a bucket, registration order is preserved.

use crate::event::Conditions;
use crate::fixed::{Fixed64, Ticks};
use crate::id::UnitId;
use crate::registry::ResourceRegistry;
use crate::store::StoreError;
use crate::unit::{FlowPolicy, Priority, ProductionUnit, TickEnv, UnitStatus, UnitTickMetrics};
use slotmap::SlotMap;
use std::collections::HashMap;
use tracing::warn;

/// Errors raised while registering units.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SchedulerError {
    #[error("unit '{0}' is already registered")]
    DuplicateUnit(String),
}

/// Owns every [`ProductionUnit`] of a mission.
#[derive(Debug, Default)]
pub struct UnitScheduler {
    units: SlotMap<UnitId, ProductionUnit>,
    /// Registration order across all buckets.
    order: Vec<UnitId>,
    buckets: [Vec<UnitId>; 4],
    by_name: HashMap<String, UnitId>,
}

impl UnitScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a unit in its priority bucket. Names must be unique.
    pub fn insert(&mut self, unit: ProductionUnit) -> Result<UnitId, SchedulerError> {
        if self.by_name.contains_key(unit.name()) {
            return Err(SchedulerError::DuplicateUnit(unit.name().to_string()));
        }
        let name = unit.name().to_string();
        let bucket = unit.priority().index();
        let id = self.units.insert(unit);
        self.order.push(id);
        self.buckets[bucket].push(id);
        self.by_name.insert(name, id);
        Ok(id)
    }

    pub fn id(&self, name: &str) -> Option<UnitId> {
        self.by_name.get(name).copied()
    }

    pub fn get(&self, id: UnitId) -> Option<&ProductionUnit> {
        self.units.get(id)
    }

    pub fn get_mut(&mut self, id: UnitId) -> Option<&mut ProductionUnit> {
        self.units.get_mut(id)
    }

    pub fn by_name(&self, name: &str) -> Option<&ProductionUnit> {
        self.id(name).and_then(|id| self.units.get(id))
    }

    pub fn by_name_mut(&mut self, name: &str) -> Option<&mut ProductionUnit> {
        let id = self.id(name)?;
        self.units.get_mut(id)
    }

    /// Units of one priority, in registration order.
    pub fn by_priority(&self, priority: Priority) -> impl Iterator<Item = &ProductionUnit> {
        self.buckets[priority.index()]
            .iter()
            .filter_map(|id| self.units.get(*id))
    }

    /// Units in tick order: Critical bucket first.
    pub fn iter(&self) -> impl Iterator<Item = (UnitId, &ProductionUnit)> {
        self.buckets
            .iter()
            .flatten()
            .filter_map(|id| self.units.get(*id).map(|u| (*id, u)))
    }

    /// Units in registration order.
    pub fn iter_registered(&self) -> impl Iterator<Item = &ProductionUnit> {
        self.order.iter().filter_map(|id| self.units.get(*id))
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut ProductionUnit> {
        self.units.values_mut()
    }

    /// Start every Offline unit.
    pub fn start_all(&mut self) {
        for id in &self.order {
            if let Some(unit) = self.units.get_mut(*id) {
                unit.start();
            }
        }
    }

    /// Tick every unit, bucket by bucket, Critical first.
    pub fn tick_all(
        &mut self,
        registry: &mut ResourceRegistry,
        policy: FlowPolicy,
        conditions: Conditions,
        tick: Ticks,
        hour: u32,
    ) -> Result<Vec<UnitTickMetrics>, StoreError> {
        let env = TickEnv {
            tick,
            hour,
            policy,
            conditions,
        };
        let mut metrics = Vec::with_capacity(self.units.len());
        for bucket in &self.buckets {
            for id in bucket {
                if let Some(unit) = self.units.get_mut(*id) {
                    metrics.push(unit.tick(registry, &env)?);
                }
            }
        }
        Ok(metrics)
    }

    /// Power demand of every operational unit at its current efficiency.
    pub fn total_power_demand(&self) -> Fixed64 {
        self.units
            .values()
            .filter(|u| u.is_operational())
            .map(ProductionUnit::power_demand)
            .fold(Fixed64::ZERO, Fixed64::saturating_add)
    }

    /// Stop operational units, lowest priority first, until demand fits
    /// `power_available`. Returns the names stopped, in stop order. Units
    /// drawing no power are stopped too, so no bucket is shed while a lower
    /// one still runs.
    ///
    /// Greedy: stops as soon as the budget is met, even if a different
    /// selection would have kept more units running.
    pub fn shed_load(&mut self, power_available: Fixed64) -> Vec<String> {
        let mut demand = self.total_power_demand();
        let mut shed = Vec::new();

        for bucket in self.buckets.iter().rev() {
            for id in bucket {
                if demand <= power_available {
                    return shed;
                }
                let Some(unit) = self.units.get_mut(*id) else {
                    continue;
                };
                if !unit.is_operational() {
                    continue;
                }
                let unit_demand = unit.power_demand();
                unit.stop();
                demand = demand.saturating_sub(unit_demand);
                warn!(unit = %unit.name(), demand = %demand, "shed load");
                shed.push(unit.name().to_string());
            }
        }
        shed
    }

    pub fn operational_units(&self) -> Vec<&ProductionUnit> {
        self.iter_registered().filter(|u| u.is_operational()).collect()
    }

    pub fn failed_units(&self) -> Vec<&ProductionUnit> {
        self.iter_registered()
            .filter(|u| u.state() == crate::unit::UnitState::Failed)
            .collect()
    }

    /// Status of every unit, in registration order.
    pub fn statuses(&self) -> Vec<UnitStatus> {
        self.iter_registered().map(ProductionUnit::status).collect()
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}

// ===========================================================================
// Tests
// ===========================================================================
