//! Property-based tests for the habitat kernel.
//!
//! Uses proptest to generate random store operations, unit sets and event
//! schedules, then verify ledger and scheduling invariants hold.

use habitat_core::clock::MissionClock;
use habitat_core::event::{Conditions, Event, EventKind};
use habitat_core::fixed::Fixed64;
use habitat_core::generator::RandomEventGenerator;
use habitat_core::registry::ResourceRegistry;
use habitat_core::scheduler::UnitScheduler;
use habitat_core::store::ResourceKind;
use habitat_core::test_utils::*;
use habitat_core::unit::{FlowPolicy, PassiveBehavior, Priority, ProductionUnit};
use proptest::prelude::*;

// ===========================================================================
// Generators
// ===========================================================================

#[derive(Debug, Clone)]
enum StoreOp {
    Add(u32),
    Remove(u32, bool),
    TransferOut(u32),
    TransferIn(u32),
    Reset,
}

fn arb_store_ops(max_ops: usize) -> impl Strategy<Value = Vec<StoreOp>> {
    proptest::collection::vec(
        prop_oneof![
            (0..500u32).prop_map(StoreOp::Add),
            (0..500u32, any::<bool>()).prop_map(|(a, r)| StoreOp::Remove(a, r)),
            (0..500u32).prop_map(StoreOp::TransferOut),
            (0..500u32).prop_map(StoreOp::TransferIn),
            Just(StoreOp::Reset),
        ],
        1..=max_ops,
    )
}

fn arb_priority() -> impl Strategy<Value = Priority> {
    prop_oneof![
        Just(Priority::Critical),
        Just(Priority::High),
        Just(Priority::Medium),
        Just(Priority::Low),
    ]
}

/// (priority, power draw) per unit.
fn arb_loads(max_units: usize) -> impl Strategy<Value = Vec<(Priority, u32)>> {
    proptest::collection::vec((arb_priority(), 0..50u32), 1..=max_units)
}

fn arb_events(max_events: usize) -> impl Strategy<Value = Vec<Event>> {
    proptest::collection::vec(
        (0..6u8, 0..48u64, 0..10u64, 0..=100u32, 0..4usize),
        0..=max_events,
    )
    .prop_map(|specs| {
        specs
            .into_iter()
            .map(|(kind, at, duration, severity, target)| {
                let kind = match kind {
                    0 => EventKind::PowerReduction,
                    1 => EventKind::DustStorm,
                    2 => EventKind::WaterRestriction,
                    3 => EventKind::EquipmentMalfunction,
                    4 => EventKind::WaterInterruption,
                    _ => EventKind::CrewSizeChange { delta: -1 },
                };
                let target = ["OGS", "Crew", "Solar_Array", "Lab"][target];
                Event::new(kind, at)
                    .lasting(duration)
                    .severity(fixed(f64::from(severity) / 100.0))
                    .targeting(target)
            })
            .collect()
    })
}

fn running_scheduler(loads: &[(Priority, u32)]) -> (ResourceRegistry, UnitScheduler) {
    let mut registry = ResourceRegistry::new();
    registry.insert(power_store(10_000.0)).unwrap();
    let mut scheduler = UnitScheduler::new();
    for (i, (priority, kw)) in loads.iter().enumerate() {
        let spec = load(&format!("U{i}"), *priority, f64::from(*kw));
        let unit = ProductionUnit::new(spec, Box::new(PassiveBehavior), &registry).unwrap();
        scheduler.insert(unit).unwrap();
    }
    scheduler.start_all();
    let policy = FlowPolicy {
        power_store: registry.id("Power"),
        ..FlowPolicy::default()
    };
    scheduler
        .tick_all(&mut registry, policy, Conditions::default(), 0, 0)
        .unwrap();
    (registry, scheduler)
}

// ===========================================================================
// Properties
// ===========================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// 0 <= level <= capacity after any sequence of operations, and the
    /// reserve is never breached by ordinary draws.
    #[test]
    fn store_stays_within_bounds(ops in arb_store_ops(60), reserve in 0..200u32) {
        let mut registry = ResourceRegistry::new();
        let a = registry
            .insert(
                store("A", ResourceKind::PotableWater, 1_000.0, 500.0)
                    .with_reserve(fixed(f64::from(reserve))),
            )
            .unwrap();
        let b = registry
            .insert(store("B", ResourceKind::PotableWater, 300.0, 100.0))
            .unwrap();

        for op in ops {
            let before = registry.get(a).unwrap().level();
            match op {
                StoreOp::Add(x) => {
                    registry.get_mut(a).unwrap().add(fixed(f64::from(x))).unwrap();
                }
                StoreOp::Remove(x, allow_reserve) => {
                    registry
                        .get_mut(a)
                        .unwrap()
                        .remove(fixed(f64::from(x)), allow_reserve)
                        .unwrap();
                    if !allow_reserve && before >= registry.get(a).unwrap().reserve() {
                        prop_assert!(
                            registry.get(a).unwrap().level() >= registry.get(a).unwrap().reserve()
                        );
                    }
                }
                StoreOp::TransferOut(x) => {
                    registry.transfer(a, b, fixed(f64::from(x)), false).unwrap();
                }
                StoreOp::TransferIn(x) => {
                    registry.transfer(b, a, fixed(f64::from(x)), true).unwrap();
                }
                StoreOp::Reset => registry.reset_all_tick_counters(),
            }
            for (_, s) in registry.iter() {
                prop_assert!(s.level() >= Fixed64::ZERO);
                prop_assert!(s.level() <= s.capacity());
            }
        }
    }

    /// Amounts near the representable limit saturate the ledgers instead of
    /// overflowing.
    #[test]
    fn huge_amounts_saturate_counters(
        ops in proptest::collection::vec((any::<bool>(), 0..=u32::MAX), 1..20),
    ) {
        let mut store = store("Big", ResourceKind::Oxygen, 1_000.0, 500.0);
        for (is_add, raw) in ops {
            let amount = Fixed64::MAX - Fixed64::from_bits(i64::from(raw));
            if is_add {
                store.add(amount).unwrap();
            } else {
                store.remove(amount, true).unwrap();
            }
            let totals = store.total_flows();
            prop_assert!(store.level() >= Fixed64::ZERO);
            prop_assert!(store.level() <= store.capacity());
            prop_assert!(totals.inflow >= Fixed64::ZERO);
            prop_assert!(totals.outflow >= Fixed64::ZERO);
            prop_assert!(totals.overflow >= Fixed64::ZERO);
            prop_assert!(totals.shortfall >= Fixed64::ZERO);
        }
    }

    /// Transfers never create or destroy resource.
    #[test]
    fn transfer_conserves_mass(
        source_level in 0..1_000u32,
        target_level in 0..1_000u32,
        amount in 0..2_000u32,
    ) {
        let mut source = store("S", ResourceKind::Oxygen, 1_000.0, f64::from(source_level));
        let mut target = store("T", ResourceKind::Oxygen, 1_000.0, f64::from(target_level));
        let total_before = source.level() + target.level();

        let moved = source.transfer_to(&mut target, fixed(f64::from(amount)), false).unwrap();

        prop_assert_eq!(source.level() + target.level(), total_before);
        prop_assert_eq!(source.total_flows().outflow, moved);
        prop_assert_eq!(target.total_flows().inflow, moved);
        prop_assert_eq!(target.total_flows().overflow, Fixed64::ZERO);
    }

    /// Shedding always meets the budget and never stops a higher bucket
    /// while a lower one still runs.
    #[test]
    fn shed_load_respects_priority(loads in arb_loads(20), budget in 0..500u32) {
        let (_, mut scheduler) = running_scheduler(&loads);
        let budget = fixed(f64::from(budget));

        let shed = scheduler.shed_load(budget);

        prop_assert!(scheduler.total_power_demand() <= budget);

        let shed_priorities: Vec<Priority> = shed
            .iter()
            .map(|name| scheduler.by_name(name).unwrap().priority())
            .collect();
        for pair in shed_priorities.windows(2) {
            prop_assert!(pair[0] >= pair[1]);
        }
        if let Some(highest) = shed_priorities.last() {
            for unit in scheduler.iter_registered() {
                if unit.priority() > *highest {
                    prop_assert!(!unit.is_operational());
                }
            }
        }
    }

    /// Same inputs, same hash at every tick.
    #[test]
    fn missions_are_deterministic(events in arb_events(12)) {
        let build = |events: &[Event]| -> MissionClock {
            let mut clock = small_habitat(2);
            for event in events {
                clock.schedule(event.clone());
            }
            clock
        };
        let mut a = build(&events);
        let mut b = build(&events);

        while !a.is_ended() {
            let ra = a.tick().unwrap();
            let rb = b.tick().unwrap();
            prop_assert_eq!(ra, rb);
            prop_assert_eq!(a.last_state_hash(), b.last_state_hash());
        }
        prop_assert!(b.is_ended());
        prop_assert_eq!(a.final_report(), b.final_report());
    }

    /// Generated events land inside the window, in order, with every
    /// drawn value inside its template's range and cooldowns honored.
    #[test]
    fn generated_events_respect_templates(
        seed in any::<u64>(),
        rate in 0.0..6.0f64,
        start in 0..2_000u64,
        duration in 0..1_000u64,
    ) {
        let mut generator = RandomEventGenerator::new(seed, rate, 24).unwrap();
        generator.set_targets("unit_failure", vec!["OGS".into()]).unwrap();
        let templates = generator.templates().to_vec();
        let events = generator.generate(start, duration);

        let mut last_by_name: std::collections::HashMap<&str, u64> = Default::default();
        for (i, event) in events.iter().enumerate() {
            prop_assert!(event.trigger_tick() >= start);
            prop_assert!(event.trigger_tick() < start + duration);
            if i > 0 {
                prop_assert!(events[i - 1].trigger_tick() <= event.trigger_tick());
            }
            let template = templates
                .iter()
                .find(|t| t.kind.name() == event.name())
                .unwrap();
            prop_assert!(event.duration_ticks() >= template.min_duration);
            prop_assert!(event.duration_ticks() <= template.max_duration);
            prop_assert!(event.severity_value() >= template.min_severity);
            prop_assert!(event.severity_value() <= template.max_severity);
            if let Some(previous) = last_by_name.insert(event.name(), event.trigger_tick()) {
                prop_assert!(event.trigger_tick() - previous >= template.cooldown);
            }
        }
    }
}
