use slotmap::new_key_type;

new_key_type! {
    /// Stable handle to a store in the [`ResourceRegistry`](crate::registry::ResourceRegistry).
    pub struct StoreId;

    /// Stable handle to a unit in the [`UnitScheduler`](crate::scheduler::UnitScheduler).
    pub struct UnitId;
}
