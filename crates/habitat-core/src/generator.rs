//! Random event generation from a weighted template catalog.
//!
//! A [`RandomEventGenerator`] draws a Poisson-distributed number of events
//! for every sol in the requested window, places each at a uniform tick of
//! that sol, and picks its template by weight among those off cooldown.
//! Duration, severity, target and integer parameters are drawn from the
//! template's ranges. The same seed and calls always produce the same
//! events.

use crate::event::{Event, EventKind};
use crate::fixed::{Fixed64, Ticks, f64_to_fixed64};
use crate::rng::MissionRng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::debug;

/// Parameter carrying the number of crew joining or leaving.
pub const COUNT: &str = "count";

/// Knuth's method needs more draws as the rate grows; this bounds a sol.
const MAX_EVENTS_PER_SOL: u32 = 64;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GeneratorError {
    #[error("events per sol must be finite and non-negative, got {0}")]
    InvalidRate(f64),

    #[error("ticks per sol must be positive")]
    ZeroTicksPerSol,

    #[error("template '{id}': {detail}")]
    InvalidTemplate { id: String, detail: String },

    #[error("duplicate template '{0}'")]
    DuplicateTemplate(String),

    #[error("unknown template '{0}'")]
    UnknownTemplate(String),
}

// ---------------------------------------------------------------------------
// Templates
// ---------------------------------------------------------------------------

/// Inclusive integer range attached to generated events as a parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterRange {
    pub key: String,
    pub min: u32,
    pub max: u32,
}

/// Blueprint for one kind of random event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventTemplate {
    pub id: String,
    pub kind: EventKind,
    #[serde(default)]
    pub description: String,
    pub min_duration: Ticks,
    pub max_duration: Ticks,
    pub default_duration: Ticks,
    pub min_severity: Fixed64,
    pub max_severity: Fixed64,
    pub default_severity: Fixed64,
    /// Relative selection weight.
    pub weight: Fixed64,
    /// Minimum ticks between two triggers of this template.
    pub cooldown: Ticks,
    /// Units the event may target. Empty means untargeted.
    #[serde(default)]
    pub targets: Vec<String>,
    #[serde(default)]
    pub parameters: Vec<ParameterRange>,
}

impl EventTemplate {
    /// A one-tick, full-severity template with weight 1 and a one-sol
    /// cooldown.
    pub fn new(id: impl Into<String>, kind: EventKind, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            description: description.into(),
            min_duration: 1,
            max_duration: 1,
            default_duration: 1,
            min_severity: Fixed64::ONE,
            max_severity: Fixed64::ONE,
            default_severity: Fixed64::ONE,
            weight: Fixed64::ONE,
            cooldown: 24,
            targets: Vec::new(),
            parameters: Vec::new(),
        }
    }

    pub fn duration(mut self, min: Ticks, max: Ticks, default: Ticks) -> Self {
        self.min_duration = min;
        self.max_duration = max;
        self.default_duration = default;
        self
    }

    /// Severity bounds. Init-time only.
    pub fn severity(mut self, min: f64, max: f64, default: f64) -> Self {
        self.min_severity = f64_to_fixed64(min);
        self.max_severity = f64_to_fixed64(max);
        self.default_severity = f64_to_fixed64(default);
        self
    }

    /// Selection weight. Init-time only.
    pub fn weight(mut self, weight: f64) -> Self {
        self.weight = f64_to_fixed64(weight);
        self
    }

    pub fn cooldown(mut self, ticks: Ticks) -> Self {
        self.cooldown = ticks;
        self
    }

    pub fn targets<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.targets = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn parameter(mut self, key: impl Into<String>, min: u32, max: u32) -> Self {
        self.parameters.push(ParameterRange {
            key: key.into(),
            min,
            max,
        });
        self
    }

    /// Malfunction kinds do nothing without a unit to hit.
    pub fn requires_target(&self) -> bool {
        matches!(
            self.kind,
            EventKind::UnitFailure | EventKind::EquipmentMalfunction
        )
    }

    /// Whether the template can be drawn at all.
    pub fn is_drawable(&self) -> bool {
        self.weight > Fixed64::ZERO && (!self.requires_target() || !self.targets.is_empty())
    }

    /// An event with the template's default duration and severity.
    pub fn instantiate(&self, trigger_tick: Ticks) -> Event {
        let mut event = Event::new(self.kind, trigger_tick)
            .lasting(self.default_duration)
            .severity(self.default_severity);
        if let Some(target) = self.targets.first() {
            event = event.targeting(target.clone());
        }
        event
    }

    pub fn validate(&self) -> Result<(), GeneratorError> {
        let invalid = |detail: &str| GeneratorError::InvalidTemplate {
            id: self.id.clone(),
            detail: detail.to_string(),
        };
        if self.min_duration > self.max_duration
            || !(self.min_duration..=self.max_duration).contains(&self.default_duration)
        {
            return Err(invalid("duration range is inverted or excludes the default"));
        }
        let unit = Fixed64::ZERO..=Fixed64::ONE;
        if !unit.contains(&self.min_severity)
            || !unit.contains(&self.max_severity)
            || self.min_severity > self.max_severity
        {
            return Err(invalid("severity range must lie within [0, 1]"));
        }
        if self.weight < Fixed64::ZERO {
            return Err(invalid("weight must be non-negative"));
        }
        if let Some(p) = self.parameters.iter().find(|p| p.min > p.max) {
            return Err(invalid(&format!("parameter '{}' range is inverted", p.key)));
        }
        Ok(())
    }
}

/// The built-in catalog. Malfunction templates ship without targets and
/// stay undrawable until [`RandomEventGenerator::set_targets`] names units.
pub fn standard_templates() -> Vec<EventTemplate> {
    use EventKind as K;
    vec![
        // Power
        EventTemplate::new("total_power_outage", K::PowerOutage, "Complete loss of power generation")
            .duration(1, 48, 24)
            .weight(0.5)
            .cooldown(72),
        EventTemplate::new("partial_power_outage", K::PowerOutagePartial, "Partial loss of power generation")
            .duration(1, 24, 12)
            .severity(0.3, 0.7, 0.5)
            .cooldown(48),
        EventTemplate::new("power_reduction", K::PowerReduction, "Reduced power availability")
            .duration(6, 48, 24)
            .severity(0.1, 0.5, 0.25)
            .weight(2.0),
        // Water
        EventTemplate::new("water_interruption", K::WaterInterruption, "Water supply interrupted")
            .duration(1, 48, 12)
            .weight(0.8)
            .cooldown(48),
        EventTemplate::new("water_restriction", K::WaterRestriction, "Water allocation restricted")
            .duration(24, 168, 48)
            .severity(0.2, 0.6, 0.4)
            .weight(1.5)
            .cooldown(72),
        EventTemplate::new("water_contamination", K::WaterContamination, "Water supply contaminated")
            .duration(12, 72, 24)
            .severity(0.5, 1.0, 0.7)
            .weight(0.3)
            .cooldown(96),
        // Crew
        EventTemplate::new("crew_increase", K::CrewSizeChange { delta: 1 }, "Additional crew arrive")
            .weight(0.2)
            .cooldown(240)
            .parameter(COUNT, 1, 3),
        EventTemplate::new("crew_decrease", K::CrewSizeChange { delta: -1 }, "Crew members depart")
            .weight(0.2)
            .cooldown(240)
            .parameter(COUNT, 1, 2),
        EventTemplate::new("metabolic_increase", K::CrewMetabolicIncrease, "Crew metabolic demand rises")
            .duration(24, 72, 48)
            .severity(0.1, 0.3, 0.2)
            .cooldown(48),
        EventTemplate::new("eva_day", K::CrewEvaDay, "Extravehicular activity day")
            .duration(8, 12, 10)
            .severity(0.15, 0.25, 0.2)
            .weight(3.0)
            .parameter("crew_count", 2, 4)
            .parameter("eva_hours", 4, 8),
        // Equipment
        EventTemplate::new("unit_failure", K::UnitFailure, "Production unit failure")
            .duration(24, 168, 72)
            .severity(0.5, 1.0, 0.8)
            .weight(0.3)
            .cooldown(120),
        EventTemplate::new("equipment_malfunction", K::EquipmentMalfunction, "Equipment malfunction")
            .duration(6, 48, 24)
            .severity(0.3, 0.7, 0.5)
            .weight(1.5),
        EventTemplate::new("sensor_failure", K::SensorFailure, "Sensor failure")
            .duration(12, 72, 24)
            .severity(0.2, 0.5, 0.3)
            .weight(2.0),
        // Environment
        EventTemplate::new("dust_storm", K::DustStorm, "Dust storm reduces solar output")
            .duration(48, 480, 120)
            .severity(0.3, 0.9, 0.6)
            .weight(0.4)
            .cooldown(240),
        EventTemplate::new("radiation_event", K::RadiationEvent, "Solar particle event")
            .duration(6, 24, 12)
            .severity(0.5, 1.0, 0.7)
            .weight(0.2)
            .cooldown(168),
    ]
}

// ---------------------------------------------------------------------------
// RandomEventGenerator
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct RandomEventGenerator {
    rng: MissionRng,
    templates: Vec<EventTemplate>,
    last_triggered: Vec<Option<Ticks>>,
    events_per_sol: Fixed64,
    ticks_per_sol: Ticks,
    /// `e^-events_per_sol`, the Knuth threshold for one sol.
    empty_sol_probability: Fixed64,
}

impl RandomEventGenerator {
    /// A generator over [`standard_templates`].
    pub fn new(seed: u64, events_per_sol: f64, ticks_per_sol: u32) -> Result<Self, GeneratorError> {
        Self::with_templates(seed, events_per_sol, ticks_per_sol, standard_templates())
    }

    pub fn with_templates(
        seed: u64,
        events_per_sol: f64,
        ticks_per_sol: u32,
        templates: Vec<EventTemplate>,
    ) -> Result<Self, GeneratorError> {
        if !events_per_sol.is_finite() || events_per_sol < 0.0 {
            return Err(GeneratorError::InvalidRate(events_per_sol));
        }
        if ticks_per_sol == 0 {
            return Err(GeneratorError::ZeroTicksPerSol);
        }
        let mut ids = BTreeSet::new();
        for template in &templates {
            template.validate()?;
            if !ids.insert(template.id.as_str()) {
                return Err(GeneratorError::DuplicateTemplate(template.id.clone()));
            }
        }
        Ok(Self {
            rng: MissionRng::new(seed),
            last_triggered: vec![None; templates.len()],
            templates,
            events_per_sol: f64_to_fixed64(events_per_sol),
            ticks_per_sol: Ticks::from(ticks_per_sol),
            empty_sol_probability: f64_to_fixed64((-events_per_sol).exp()),
        })
    }

    /// Keep only the named templates.
    pub fn enable_only<S: AsRef<str>>(&mut self, ids: &[S]) -> Result<(), GeneratorError> {
        for id in ids {
            self.index_of(id.as_ref())?;
        }
        let keep: Vec<bool> = self
            .templates
            .iter()
            .map(|t| ids.iter().any(|id| id.as_ref() == t.id))
            .collect();
        let mut flags = keep.iter();
        self.templates.retain(|_| flags.next().copied().unwrap_or(false));
        let mut flags = keep.iter();
        self.last_triggered
            .retain(|_| flags.next().copied().unwrap_or(false));
        Ok(())
    }

    /// Replace the units a template may target.
    pub fn set_targets(&mut self, id: &str, targets: Vec<String>) -> Result<(), GeneratorError> {
        let index = self.index_of(id)?;
        self.templates[index].targets = targets;
        Ok(())
    }

    pub fn templates(&self) -> &[EventTemplate] {
        &self.templates
    }

    pub fn events_per_sol(&self) -> Fixed64 {
        self.events_per_sol
    }

    pub fn rng(&self) -> &MissionRng {
        &self.rng
    }

    /// Mark a template as triggered at `tick`, starting its cooldown.
    pub fn record(&mut self, id: &str, tick: Ticks) -> Result<(), GeneratorError> {
        let index = self.index_of(id)?;
        self.last_triggered[index] = Some(tick);
        Ok(())
    }

    /// Whether the template is drawable and off cooldown at `tick`.
    pub fn can_generate(&self, id: &str, tick: Ticks) -> bool {
        self.index_of(id)
            .is_ok_and(|index| self.available(index, tick))
    }

    /// Generate events triggering in `[start, start + duration)`, sorted by
    /// trigger tick. Cooldowns carry over between calls.
    pub fn generate(&mut self, start: Ticks, duration: Ticks) -> Vec<Event> {
        let end = start.saturating_add(duration);
        if duration == 0 {
            return Vec::new();
        }

        // Whole sols are drawn and out-of-window triggers dropped, which
        // thins the Poisson process without changing its rate.
        let mut triggers = Vec::new();
        let first_sol = start / self.ticks_per_sol;
        let last_sol = (end - 1) / self.ticks_per_sol;
        for sol in first_sol..=last_sol {
            let sol_start = sol.saturating_mul(self.ticks_per_sol);
            for _ in 0..self.poisson_count() {
                let tick = sol_start.saturating_add(self.rng.below(self.ticks_per_sol));
                if (start..end).contains(&tick) {
                    triggers.push(tick);
                }
            }
        }
        triggers.sort_unstable();

        let mut events = Vec::with_capacity(triggers.len());
        for tick in triggers {
            let weights: Vec<Fixed64> = (0..self.templates.len())
                .map(|i| {
                    if self.available(i, tick) {
                        self.templates[i].weight
                    } else {
                        Fixed64::ZERO
                    }
                })
                .collect();
            let Some(index) = self.rng.pick_weighted(&weights) else {
                debug!(tick, "no event template available");
                continue;
            };
            let event = self.draw(index, tick);
            debug!(tick, template = %self.templates[index].id, "random event generated");
            self.last_triggered[index] = Some(tick);
            events.push(event);
        }
        events
    }

    fn draw(&mut self, index: usize, tick: Ticks) -> Event {
        let template = &self.templates[index];
        let duration = self
            .rng
            .ticks_between(template.min_duration, template.max_duration);
        let severity = self
            .rng
            .fixed_between(template.min_severity, template.max_severity);

        let mut params = Vec::with_capacity(template.parameters.len());
        for range in &template.parameters {
            let lo = u64::from(range.min);
            let hi = u64::from(range.max);
            params.push((range.key.clone(), self.rng.ticks_between(lo, hi)));
        }

        let kind = match template.kind {
            EventKind::CrewSizeChange { delta } => {
                let count = params
                    .iter()
                    .find(|(key, _)| key == COUNT)
                    .map_or(1, |(_, v)| i32::try_from(*v).unwrap_or(i32::MAX));
                EventKind::CrewSizeChange {
                    delta: if delta < 0 { -count } else { count },
                }
            }
            other => other,
        };

        let target = self.rng.pick(&template.targets).cloned();
        let mut event = Event::new(kind, tick).lasting(duration).severity(severity);
        if let Some(target) = target {
            event = event.targeting(target);
        }
        for (key, value) in params {
            event = event.with_parameter(key, Fixed64::saturating_from_num(value));
        }
        event
    }

    /// Poisson draw for one sol by Knuth's product-of-uniforms method.
    fn poisson_count(&mut self) -> u32 {
        if self.events_per_sol <= Fixed64::ZERO {
            return 0;
        }
        let mut count = 0;
        let mut product = self.rng.unit();
        while product > self.empty_sol_probability && count < MAX_EVENTS_PER_SOL {
            count += 1;
            product = product.saturating_mul(self.rng.unit());
        }
        count
    }

    fn available(&self, index: usize, tick: Ticks) -> bool {
        let template = &self.templates[index];
        template.is_drawable()
            && self.last_triggered[index]
                .is_none_or(|last| last.saturating_add(template.cooldown) <= tick)
    }

    fn index_of(&self, id: &str) -> Result<usize, GeneratorError> {
        self.templates
            .iter()
            .position(|t| t.id == id)
            .ok_or_else(|| GeneratorError::UnknownTemplate(id.to_string()))
    }
}

// ===========================================================================
// Tests
// ===========================================================================
