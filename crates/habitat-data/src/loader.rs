//! Resolution pipeline: reads scenario files, resolves cross-references,
//! builds mission clocks.
//!
//! Provides format detection (RON/JSON/TOML), file discovery, and
//! deserialization helpers, plus [`load_scenario`] which turns a scenario file
//! into a validated [`Scenario`] ready to build.

use crate::schema::{EventData, FlowData, RandomEventsData, ScenarioData, StoreData, UnitData};
use habitat_core::clock::{ClockError, MissionClock};
use habitat_core::config::MissionConfig;
use habitat_core::event::Event;
use habitat_core::fixed::{Fixed64, try_f64_to_fixed64};
use habitat_core::generator::{GeneratorError, RandomEventGenerator};
use habitat_core::store::{ResourceKind, ResourceStore};
use habitat_core::unit::{PassiveBehavior, ResourceFlow, UnitSpec};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Base name looked up by [`load_scenario_dir`].
pub const SCENARIO_FILE: &str = "scenario";

// ===========================================================================
// Errors
// ===========================================================================

/// Errors that can occur during scenario loading.
#[derive(Debug, thiserror::Error)]
pub enum DataLoadError {
    /// A required data file was not found in the given directory.
    #[error("required file '{file}' not found in {dir}")]
    MissingRequired { file: String, dir: PathBuf },

    /// The file has an extension we don't support.
    #[error("unsupported format for file: {file}")]
    UnsupportedFormat { file: PathBuf },

    /// Two files with the same base name but different formats exist.
    #[error("conflicting formats: {a} and {b}")]
    ConflictingFormats { a: PathBuf, b: PathBuf },

    /// A deserialization error occurred.
    #[error("parse error in {file}: {detail}")]
    Parse { file: PathBuf, detail: String },

    /// A name reference could not be resolved.
    #[error("unresolved {expected_kind} reference '{name}' in {file}")]
    UnresolvedRef {
        file: PathBuf,
        name: String,
        expected_kind: &'static str,
    },

    /// A duplicate name was found.
    #[error("duplicate {kind} name '{name}' in {file}")]
    DuplicateName {
        file: PathBuf,
        kind: &'static str,
        name: String,
    },

    /// A value is out of range for the kernel.
    #[error("invalid value in {file}: {detail}")]
    InvalidValue { file: PathBuf, detail: String },

    /// An I/O error occurred.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

// ===========================================================================
// Format detection
// ===========================================================================

/// Supported data file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Ron,
    Toml,
    Json,
}

/// Detect the format of a file based on its extension.
pub fn detect_format(path: &Path) -> Result<Format, DataLoadError> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("ron") => Ok(Format::Ron),
        Some("toml") => Ok(Format::Toml),
        Some("json") => Ok(Format::Json),
        _ => Err(DataLoadError::UnsupportedFormat {
            file: path.to_path_buf(),
        }),
    }
}

// ===========================================================================
// File discovery
// ===========================================================================

/// Scan a directory for a data file with the given base name (without extension).
///
/// Returns `Ok(None)` if no file is found, or `Err(ConflictingFormats)` if
/// multiple formats exist for the same base name.
pub fn find_data_file(dir: &Path, base_name: &str) -> Result<Option<PathBuf>, DataLoadError> {
    let mut found: Option<PathBuf> = None;

    for ext in ["ron", "toml", "json"] {
        let candidate = dir.join(format!("{base_name}.{ext}"));
        if candidate.exists() {
            if let Some(existing) = found {
                return Err(DataLoadError::ConflictingFormats {
                    a: existing,
                    b: candidate,
                });
            }
            found = Some(candidate);
        }
    }

    Ok(found)
}

/// Like [`find_data_file`], but returns an error if no file is found.
pub fn require_data_file(dir: &Path, base_name: &str) -> Result<PathBuf, DataLoadError> {
    find_data_file(dir, base_name)?.ok_or_else(|| DataLoadError::MissingRequired {
        file: base_name.to_string(),
        dir: dir.to_path_buf(),
    })
}

// ===========================================================================
// Deserialization
// ===========================================================================

/// Read a file and deserialize it according to its format (detected from extension).
pub fn deserialize_file<T: DeserializeOwned>(path: &Path) -> Result<T, DataLoadError> {
    let format = detect_format(path)?;
    let content = std::fs::read_to_string(path)?;
    let parse_err = |detail: String| DataLoadError::Parse {
        file: path.to_path_buf(),
        detail,
    };

    match format {
        Format::Ron => ron::from_str(&content).map_err(|e| parse_err(e.to_string())),
        Format::Json => serde_json::from_str(&content).map_err(|e| parse_err(e.to_string())),
        Format::Toml => toml::from_str(&content).map_err(|e| parse_err(e.to_string())),
    }
}

// ===========================================================================
// Name resolution helpers
// ===========================================================================

/// Look up a name in a map, returning an `UnresolvedRef` error if not found.
pub fn resolve_name<'a, V>(
    map: &'a HashMap<String, V>,
    name: &str,
    file: &Path,
    expected_kind: &'static str,
) -> Result<&'a V, DataLoadError> {
    map.get(name).ok_or_else(|| DataLoadError::UnresolvedRef {
        file: file.to_path_buf(),
        name: name.to_string(),
        expected_kind,
    })
}

/// Check whether a name already exists in a map, returning a `DuplicateName`
/// error if so.
pub fn check_duplicate<V>(
    map: &HashMap<String, V>,
    name: &str,
    file: &Path,
    kind: &'static str,
) -> Result<(), DataLoadError> {
    if map.contains_key(name) {
        Err(DataLoadError::DuplicateName {
            file: file.to_path_buf(),
            kind,
            name: name.to_string(),
        })
    } else {
        Ok(())
    }
}

// ===========================================================================
// Scenario
// ===========================================================================

/// A store definition resolved to fixed-point quantities.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreSpec {
    pub name: String,
    pub kind: ResourceKind,
    pub capacity: Fixed64,
    pub level: Fixed64,
    pub reserve: Fixed64,
}

/// A validated scenario. Every name reference is known to resolve, so
/// [`Scenario::build`] only fails on kernel-level rejections.
#[derive(Debug, Clone)]
pub struct Scenario {
    pub source: PathBuf,
    pub config: MissionConfig,
    pub stores: Vec<StoreSpec>,
    pub units: Vec<UnitSpec>,
    pub events: Vec<Event>,
    pub start_units: bool,
}

impl Scenario {
    /// Build a fresh mission clock. Units get flow-only behavior. Can be
    /// called repeatedly to replay the same mission.
    pub fn build(&self) -> Result<MissionClock, ClockError> {
        let mut clock = MissionClock::new(self.config.clone())?;
        for spec in &self.stores {
            let store = ResourceStore::new(spec.name.clone(), spec.kind, spec.capacity)?
                .with_level(spec.level)
                .with_reserve(spec.reserve);
            clock.add_store(store)?;
        }
        for spec in &self.units {
            clock.add_unit(spec.clone(), Box::new(PassiveBehavior))?;
        }
        for event in &self.events {
            clock.schedule(event.clone());
        }
        if self.start_units {
            clock.units.start_all();
        }
        info!(
            source = %self.source.display(),
            stores = self.stores.len(),
            units = self.units.len(),
            events = self.events.len(),
            "mission built"
        );
        Ok(clock)
    }
}

/// Load and validate a scenario file (`.ron`, `.toml` or `.json`).
pub fn load_scenario(path: &Path) -> Result<Scenario, DataLoadError> {
    let data: ScenarioData = deserialize_file(path)?;
    resolve_scenario(data, path)
}

/// Load `scenario.{ron,toml,json}` from a directory.
pub fn load_scenario_dir(dir: &Path) -> Result<Scenario, DataLoadError> {
    let path = require_data_file(dir, SCENARIO_FILE)?;
    load_scenario(&path)
}

/// Resolve parsed scenario data against itself.
pub fn resolve_scenario(data: ScenarioData, file: &Path) -> Result<Scenario, DataLoadError> {
    data.mission
        .validate()
        .map_err(|e| invalid(file, format!("mission: {e}")))?;

    let mut store_kinds: HashMap<String, ResourceKind> = HashMap::new();
    let mut stores = Vec::with_capacity(data.stores.len());
    for store in &data.stores {
        check_duplicate(&store_kinds, &store.name, file, "store")?;
        stores.push(resolve_store(store, file)?);
        store_kinds.insert(store.name.clone(), store.kind);
    }

    let mut unit_names: HashMap<String, ()> = HashMap::new();
    let mut units = Vec::with_capacity(data.units.len());
    for unit in &data.units {
        check_duplicate(&unit_names, &unit.name, file, "unit")?;
        units.push(resolve_unit(unit, &store_kinds, file)?);
        unit_names.insert(unit.name.clone(), ());
    }

    let mut events = data
        .events
        .iter()
        .map(|event| resolve_event(event, &unit_names, file))
        .collect::<Result<Vec<_>, _>>()?;
    if let Some(random) = &data.random_events {
        let generated = generate_random_events(random, &data.mission, &unit_names, file)?;
        debug!(file = %file.display(), count = generated.len(), "random events generated");
        events.extend(generated);
    }

    debug!(
        file = %file.display(),
        stores = stores.len(),
        units = units.len(),
        events = events.len(),
        "scenario resolved"
    );

    Ok(Scenario {
        source: file.to_path_buf(),
        config: data.mission,
        stores,
        units,
        events,
        start_units: data.start_units,
    })
}

fn resolve_store(store: &StoreData, file: &Path) -> Result<StoreSpec, DataLoadError> {
    let field = |name: &str| format!("store '{}' {name}", store.name);
    let capacity = quantity(store.capacity, &field("capacity"), file)?;
    let level = quantity(store.level, &field("level"), file)?;
    let reserve = quantity(store.reserve, &field("reserve"), file)?;
    Ok(StoreSpec {
        name: store.name.clone(),
        kind: store.kind,
        capacity,
        level,
        reserve,
    })
}

fn resolve_unit(
    unit: &UnitData,
    store_kinds: &HashMap<String, ResourceKind>,
    file: &Path,
) -> Result<UnitSpec, DataLoadError> {
    let field = |name: &str| format!("unit '{}' {name}", unit.name);
    let mut spec = UnitSpec::new(unit.name.clone(), unit.priority)
        .power(quantity(unit.power, &field("power"), file)?)
        .startup_ticks(unit.startup_ticks)
        .efficiency(fraction(unit.efficiency, &field("efficiency"), file)?);

    for flow in &unit.consumes {
        spec = spec.consumes(resolve_flow(flow, store_kinds, &field("consumes"), file)?);
    }
    for flow in &unit.produces {
        spec = spec.produces(resolve_flow(flow, store_kinds, &field("produces"), file)?);
    }
    Ok(spec)
}

fn resolve_flow(
    flow: &FlowData,
    store_kinds: &HashMap<String, ResourceKind>,
    field: &str,
    file: &Path,
) -> Result<ResourceFlow, DataLoadError> {
    let store_kind = *resolve_name(store_kinds, &flow.store, file, "store")?;
    let rate = quantity(flow.rate, &format!("{field} rate"), file)?;
    let resource = ResourceFlow::new(flow.kind.unwrap_or(store_kind), rate, flow.store.clone());
    Ok(if flow.required {
        resource
    } else {
        resource.optional()
    })
}

fn resolve_event(
    event: &EventData,
    unit_names: &HashMap<String, ()>,
    file: &Path,
) -> Result<Event, DataLoadError> {
    let field = |name: &str| format!("event {} at tick {} {name}", event.kind.name(), event.tick);
    let mut resolved = Event::new(event.kind, event.tick)
        .lasting(event.duration)
        .severity(fraction(event.severity, &field("severity"), file)?);
    if let Some(target) = &event.target {
        resolve_name(unit_names, target, file, "unit")?;
        resolved = resolved.targeting(target.clone());
    }
    for (key, value) in &event.parameters {
        let value = try_f64_to_fixed64(*value)
            .ok_or_else(|| invalid(file, format!("{} '{key}' = {value}", field("parameter"))))?;
        resolved = resolved.with_parameter(key.clone(), value);
    }
    Ok(resolved)
}

/// Draw the scenario's random events for the full mission length. The seed
/// fixes the result, so rebuilding a scenario replays the same events.
fn generate_random_events(
    random: &RandomEventsData,
    mission: &MissionConfig,
    unit_names: &HashMap<String, ()>,
    file: &Path,
) -> Result<Vec<Event>, DataLoadError> {
    let generator_error = |e: GeneratorError| match e {
        GeneratorError::UnknownTemplate(name) => DataLoadError::UnresolvedRef {
            file: file.to_path_buf(),
            name,
            expected_kind: "event template",
        },
        other => invalid(file, format!("random_events: {other}")),
    };

    let mut generator =
        RandomEventGenerator::new(random.seed, random.events_per_sol, mission.ticks_per_sol)
            .map_err(generator_error)?;
    if !random.templates.is_empty() {
        generator
            .enable_only(&random.templates)
            .map_err(generator_error)?;
    }
    for (template, targets) in &random.targets {
        for target in targets {
            resolve_name(unit_names, target, file, "unit")?;
        }
        generator
            .set_targets(template, targets.clone())
            .map_err(generator_error)?;
    }
    Ok(generator.generate(0, mission.total_ticks()))
}

/// A non-negative quantity representable in fixed point.
fn quantity(value: f64, field: &str, file: &Path) -> Result<Fixed64, DataLoadError> {
    match try_f64_to_fixed64(value) {
        Some(v) if !v.is_negative() => Ok(v),
        _ => Err(invalid(
            file,
            format!("{field} must be a non-negative number in range, got {value}"),
        )),
    }
}

/// A value in `[0, 1]`.
fn fraction(value: f64, field: &str, file: &Path) -> Result<Fixed64, DataLoadError> {
    if !(0.0..=1.0).contains(&value) {
        return Err(invalid(file, format!("{field} must be within [0, 1], got {value}")));
    }
    quantity(value, field, file)
}

fn invalid(file: &Path, detail: String) -> DataLoadError {
    DataLoadError::InvalidValue {
        file: file.to_path_buf(),
        detail,
    }
}

// ===========================================================================
// Tests
// ===========================================================================
