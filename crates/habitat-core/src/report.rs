//! Per-tick, per-sol and end-of-mission reporting.
//!
//! Everything here is plain serializable data in report units (`f64`). The
//! clock builds these; callers read them or export them as JSON.

use crate::event::EventRecord;
use crate::fixed::Ticks;
use crate::store::{ResourceKind, StoreStatus};
use crate::unit::{UnitStatus, UnitTickMetrics};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io;

/// Errors raised while exporting reports.
#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("report I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("report serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// What happened during one tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickRecord {
    pub tick: Ticks,
    pub sol: u64,
    pub hour: u32,
    pub stores: Vec<StoreStatus>,
    pub units: Vec<UnitTickMetrics>,
    pub active_events: Vec<String>,
    pub crew_size: u32,
}

/// Rollup emitted when a sol completes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolSummary {
    pub sol: u64,
    /// Store name to level at the end of the sol.
    pub store_levels: BTreeMap<String, f64>,
    pub operational_units: usize,
    pub failed_units: usize,
    pub active_events: usize,
    pub crew_size: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissionSummary {
    pub ticks_completed: Ticks,
    pub sols_completed: u64,
    pub total_sols: u64,
    pub crew_size: u32,
    pub crew_alive: u32,
    pub ended: bool,
    pub end_reason: Option<String>,
    /// Crew alive and every planned sol completed.
    pub mission_success: bool,
    pub state_hash: u64,
}

/// Lifetime flows of one store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceTotals {
    pub name: String,
    pub kind: ResourceKind,
    pub final_level: f64,
    pub capacity: f64,
    pub total_inflow: f64,
    pub total_outflow: f64,
    pub total_overflow: f64,
    pub total_shortfall: f64,
}

/// End-of-mission report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalReport {
    pub mission_summary: MissionSummary,
    pub resource_totals: Vec<ResourceTotals>,
    pub unit_stats: Vec<UnitStatus>,
    pub event_history: Vec<EventRecord>,
    /// Trailing sol summaries, oldest first.
    pub sol_summaries: Vec<SolSummary>,
}

impl FinalReport {
    /// Judge the mission against its end-of-mission criteria.
    pub fn evaluate(&self) -> MissionEvaluation {
        MissionEvaluation::of(self)
    }

    pub fn to_json(&self) -> Result<String, ReportError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn write_json<W: io::Write>(&self, writer: W) -> Result<(), ReportError> {
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

/// Minimum unit uptime and event resolution rate for a resilient mission.
pub const RESILIENCE_THRESHOLD: f64 = 0.8;

/// One end-of-mission criterion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationCriterion {
    pub name: String,
    pub requirement: String,
    /// Achieved ratio in `[0, 1]`.
    pub achieved: f64,
    pub passed: bool,
}

/// Pass/fail verdict and a 0 to 100 score for a finished mission.
///
/// The score weights mission progress 30, crew survival 40, unit uptime 20
/// and resolved events 10.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissionEvaluation {
    pub overall_success: bool,
    pub criteria: Vec<EvaluationCriterion>,
    pub uptime: f64,
    pub events_resolved: f64,
    pub score: f64,
    pub score_breakdown: BTreeMap<String, f64>,
}

impl MissionEvaluation {
    pub const MAX_SCORE: f64 = 100.0;

    fn of(report: &FinalReport) -> Self {
        let summary = &report.mission_summary;
        let progress = ratio(summary.sols_completed as f64, summary.total_sols as f64);
        let survival = ratio(f64::from(summary.crew_alive), f64::from(summary.crew_size));

        let (operational, idle) = report.unit_stats.iter().fold((0u64, 0u64), |(op, idle), u| {
            (op + u.ticks_operational, idle + u.ticks_failed)
        });
        let uptime = ratio(operational as f64, (operational + idle) as f64);
        let resolved = report
            .event_history
            .iter()
            .filter(|r| r.ended_at.is_some())
            .count();
        let events_resolved = ratio(resolved as f64, report.event_history.len() as f64);

        let criteria = vec![
            EvaluationCriterion {
                name: "mission_duration".into(),
                requirement: format!("{} sols", summary.total_sols),
                achieved: progress,
                passed: summary.sols_completed >= summary.total_sols,
            },
            EvaluationCriterion {
                name: "crew_survival".into(),
                requirement: "all crew alive".into(),
                achieved: survival,
                passed: summary.crew_alive > 0 && summary.crew_alive >= summary.crew_size,
            },
            EvaluationCriterion {
                name: "system_resilience".into(),
                requirement: format!(
                    "uptime and resolved events at least {:.0}%",
                    RESILIENCE_THRESHOLD * 100.0
                ),
                achieved: uptime.min(events_resolved),
                passed: uptime >= RESILIENCE_THRESHOLD && events_resolved >= RESILIENCE_THRESHOLD,
            },
        ];

        let score_breakdown: BTreeMap<String, f64> = [
            ("progress", progress * 30.0),
            ("survival", survival * 40.0),
            ("uptime", uptime * 20.0),
            ("events_resolved", events_resolved * 10.0),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        Self {
            overall_success: criteria.iter().all(|c| c.passed),
            criteria,
            uptime,
            events_resolved,
            score: score_breakdown.values().sum(),
            score_breakdown,
        }
    }
}

/// `part / whole` clamped to `[0, 1]`; 1 when there is nothing to count.
fn ratio(part: f64, whole: f64) -> f64 {
    if whole <= 0.0 {
        return 1.0;
    }
    (part / whole).clamp(0.0, 1.0)
}

/// Final report plus the retained tick records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissionLog {
    pub report: FinalReport,
    pub ticks: Vec<TickRecord>,
}

impl MissionLog {
    pub fn write_json<W: io::Write>(&self, mut writer: W) -> Result<(), ReportError> {
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.flush()?;
        Ok(())
    }
}
