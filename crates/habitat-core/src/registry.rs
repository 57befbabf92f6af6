//! Arena of resource stores with stable handles.
//!
//! Stores are registered once and never removed. Internal code addresses
//! them by [`StoreId`]; the name index exists for configuration, external
//! lookup and logging.

use crate::fixed::Fixed64;
use crate::id::StoreId;
use crate::store::{ResourceKind, ResourceStore, StoreError, StoreStatus};
use slotmap::SlotMap;
use std::collections::HashMap;

/// Errors raised while registering or addressing stores.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RegistryError {
    #[error("store '{0}' is already registered")]
    DuplicateStore(String),

    #[error("store not found: {0}")]
    UnknownStore(String),

    #[error("cannot transfer store '{0}' into itself")]
    SelfTransfer(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Owns every [`ResourceStore`] of a mission.
#[derive(Debug, Default)]
pub struct ResourceRegistry {
    stores: SlotMap<StoreId, ResourceStore>,
    /// Registration order; all iteration follows it.
    order: Vec<StoreId>,
    by_name: HashMap<String, StoreId>,
    by_kind: HashMap<ResourceKind, Vec<StoreId>>,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a store. Names must be unique.
    pub fn insert(&mut self, store: ResourceStore) -> Result<StoreId, RegistryError> {
        if self.by_name.contains_key(store.name()) {
            return Err(RegistryError::DuplicateStore(store.name().to_string()));
        }
        let name = store.name().to_string();
        let kind = store.kind();
        let id = self.stores.insert(store);
        self.order.push(id);
        self.by_name.insert(name, id);
        self.by_kind.entry(kind).or_default().push(id);
        Ok(id)
    }

    /// Resolve a store name to its handle.
    pub fn id(&self, name: &str) -> Option<StoreId> {
        self.by_name.get(name).copied()
    }

    /// Resolve a store name, failing with [`RegistryError::UnknownStore`].
    pub fn require(&self, name: &str) -> Result<StoreId, RegistryError> {
        self.id(name)
            .ok_or_else(|| RegistryError::UnknownStore(name.to_string()))
    }

    pub fn get(&self, id: StoreId) -> Option<&ResourceStore> {
        self.stores.get(id)
    }

    pub fn get_mut(&mut self, id: StoreId) -> Option<&mut ResourceStore> {
        self.stores.get_mut(id)
    }

    pub fn by_name(&self, name: &str) -> Option<&ResourceStore> {
        self.id(name).and_then(|id| self.stores.get(id))
    }

    pub fn by_name_mut(&mut self, name: &str) -> Option<&mut ResourceStore> {
        let id = self.id(name)?;
        self.stores.get_mut(id)
    }

    /// All stores of a kind, in registration order.
    pub fn by_kind(&self, kind: ResourceKind) -> impl Iterator<Item = &ResourceStore> {
        self.by_kind
            .get(&kind)
            .into_iter()
            .flatten()
            .filter_map(|id| self.stores.get(*id))
    }

    /// Sum of levels across every store of a kind.
    pub fn total_level(&self, kind: ResourceKind) -> Fixed64 {
        self.by_kind(kind)
            .map(ResourceStore::level)
            .fold(Fixed64::ZERO, Fixed64::saturating_add)
    }

    /// Sum of capacities across every store of a kind.
    pub fn total_capacity(&self, kind: ResourceKind) -> Fixed64 {
        self.by_kind(kind)
            .map(ResourceStore::capacity)
            .fold(Fixed64::ZERO, Fixed64::saturating_add)
    }

    /// Move up to `amount` from one store to another of this registry.
    pub fn transfer(
        &mut self,
        from: StoreId,
        to: StoreId,
        amount: Fixed64,
        allow_reserve: bool,
    ) -> Result<Fixed64, RegistryError> {
        if from == to {
            let name = self.stores.get(from).map(|s| s.name().to_string());
            return Err(RegistryError::SelfTransfer(name.unwrap_or_default()));
        }
        let [source, target] = self
            .stores
            .get_disjoint_mut([from, to])
            .ok_or_else(|| RegistryError::UnknownStore(format!("{from:?} or {to:?}")))?;
        Ok(source.transfer_to(target, amount, allow_reserve)?)
    }

    /// Zero per-tick counters on every store.
    pub fn reset_all_tick_counters(&mut self) {
        for store in self.stores.values_mut() {
            store.reset_tick_counters();
        }
    }

    /// Iterate stores in registration order.
    pub fn iter(&self) -> impl Iterator<Item = (StoreId, &ResourceStore)> {
        self.order
            .iter()
            .filter_map(|id| self.stores.get(*id).map(|s| (*id, s)))
    }

    /// Status of every store, in registration order.
    pub fn statuses(&self) -> Vec<StoreStatus> {
        self.iter().map(|(_, s)| s.status()).collect()
    }

    /// Stores at or below their reserve.
    pub fn low_stores(&self) -> Vec<&ResourceStore> {
        self.iter().map(|(_, s)| s).filter(|s| s.is_low()).collect()
    }

    /// Stores with nothing left.
    pub fn empty_stores(&self) -> Vec<&ResourceStore> {
        self.iter().map(|(_, s)| s).filter(|s| s.is_empty()).collect()
    }

    pub fn len(&self) -> usize {
        self.stores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stores.is_empty()
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixed::f64_to_fixed64 as fixed;

    fn store(name: &str, kind: ResourceKind, capacity: f64, level: f64) -> ResourceStore {
        ResourceStore::new(name, kind, fixed(capacity))
            .unwrap()
            .with_level(fixed(level))
    }

    fn sample() -> ResourceRegistry {
        let mut registry = ResourceRegistry::new();
        registry
            .insert(store("Water_Tank_1", ResourceKind::PotableWater, 1000.0, 500.0))
            .unwrap();
        registry
            .insert(store("Water_Tank_2", ResourceKind::PotableWater, 1000.0, 300.0))
            .unwrap();
        registry
            .insert(store("Power", ResourceKind::ElectricalPower, 500.0, 400.0))
            .unwrap();
        registry
    }

    #[test]
    fn lookup_by_name_and_id() {
        let registry = sample();
        let id = registry.id("Power").unwrap();
        assert_eq!(registry.get(id).unwrap().name(), "Power");
        assert_eq!(registry.by_name("Water_Tank_1").unwrap().level(), fixed(500.0));
        assert!(registry.id("Nope").is_none());
        assert!(matches!(
            registry.require("Nope"),
            Err(RegistryError::UnknownStore(name)) if name == "Nope"
        ));
    }

    #[test]
    fn lookup_by_kind_and_totals() {
        let registry = sample();
        assert_eq!(registry.by_kind(ResourceKind::PotableWater).count(), 2);
        assert_eq!(registry.by_kind(ResourceKind::Oxygen).count(), 0);
        assert_eq!(registry.total_level(ResourceKind::PotableWater), fixed(800.0));
        assert_eq!(
            registry.total_capacity(ResourceKind::PotableWater),
            fixed(2000.0)
        );
    }

    #[test]
    fn duplicate_names_rejected() {
        let mut registry = sample();
        let result = registry.insert(store("Power", ResourceKind::ElectricalPower, 1.0, 0.0));
        assert!(matches!(result, Err(RegistryError::DuplicateStore(name)) if name == "Power"));
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn iteration_follows_registration_order() {
        let registry = sample();
        let names: Vec<String> = registry.statuses().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["Water_Tank_1", "Water_Tank_2", "Power"]);
    }

    #[test]
    fn transfer_between_handles() {
        let mut registry = sample();
        let a = registry.id("Water_Tank_1").unwrap();
        let b = registry.id("Water_Tank_2").unwrap();
        let moved = registry.transfer(a, b, fixed(100.0), false).unwrap();
        assert_eq!(moved, fixed(100.0));
        assert_eq!(registry.total_level(ResourceKind::PotableWater), fixed(800.0));
        assert!(matches!(
            registry.transfer(a, a, fixed(1.0), false),
            Err(RegistryError::SelfTransfer(_))
        ));
    }

    #[test]
    fn reset_all_and_low_empty_queries() {
        let mut registry = sample();
        let power = registry.id("Power").unwrap();
        registry.get_mut(power).unwrap().remove(fixed(400.0), true).unwrap();
        assert_eq!(registry.empty_stores().len(), 1);
        assert_eq!(registry.low_stores().len(), 1);

        registry.reset_all_tick_counters();
        assert_eq!(
            registry.get(power).unwrap().tick_flows().outflow,
            Fixed64::ZERO
        );
        assert_eq!(registry.get(power).unwrap().total_flows().outflow, fixed(400.0));
    }
}
