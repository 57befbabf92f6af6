use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use habitat_core::clock::MissionClock;
use habitat_core::event::Event;
use habitat_core::report::{FinalReport, SolSummary};
use habitat_core::stress::{StressResult, StressRunner};
use habitat_data::{Scenario, load_scenario};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tracing::info;

// ---------------------------------------------------------------------------
// CLI definition
// ---------------------------------------------------------------------------

#[derive(Parser)]
#[command(name = "habitat", about = "Closed-habitat mission simulator")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a scenario to the end, or for a fixed number of ticks.
    Run {
        /// Scenario file (.ron, .toml or .json).
        scenario: PathBuf,
        /// Stop after this many ticks instead of running to the end.
        #[arg(long)]
        ticks: Option<u64>,
        /// Print a sol summary every N sols.
        #[arg(long, default_value_t = 10)]
        print_every: u64,
        /// Write the final report as JSON to this path.
        #[arg(long)]
        export: Option<PathBuf>,
        /// Include every retained tick record in the export.
        #[arg(long, requires = "export")]
        full_log: bool,
    },
    /// Load and resolve a scenario without running it.
    Check {
        scenario: PathBuf,
    },
    /// Run stress scenarios, each against a fresh build of the habitat.
    Stress {
        #[arg(required_unless_present = "list")]
        scenario: Option<PathBuf>,
        /// Run only these stress scenarios (repeatable). Defaults to all.
        #[arg(long)]
        only: Vec<String>,
        /// Ticks to run before each stress scenario starts.
        #[arg(long, default_value_t = 1)]
        warmup: u64,
        /// List the available stress scenarios and exit.
        #[arg(long)]
        list: bool,
    },
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

fn load(path: &Path) -> Result<Scenario> {
    load_scenario(path).with_context(|| format!("loading scenario: {}", path.display()))
}

fn run(
    path: &Path,
    ticks: Option<u64>,
    print_every: u64,
    export: Option<&Path>,
    full_log: bool,
) -> Result<()> {
    if print_every == 0 {
        bail!("--print-every must be at least 1");
    }
    let scenario = load(path)?;
    let mut clock = scenario.build().context("building mission")?;

    clock.on_sol_complete(Box::new(move |summary: &SolSummary| {
        if summary.sol % print_every == 0 {
            print_sol(summary);
        }
    }));
    clock.on_event_triggered(Box::new(|event: &Event| {
        println!("*** {} at tick={} ***", event.name(), event.trigger_tick());
    }));

    println!(
        "Starting mission: sols={} crew={} stores={} units={} events={}",
        clock.config().total_sols,
        clock.config().crew_size,
        clock.stores.len(),
        clock.units.len(),
        clock.timeline().pending().count(),
    );
    println!("{}", "-".repeat(80));

    let report = match ticks {
        Some(ticks) => {
            clock.run(ticks).context("running mission")?;
            clock.final_report()
        }
        None => clock.run_to_end().context("running mission")?,
    };

    println!("{}", "-".repeat(80));
    print_report(&report);

    if let Some(out) = export {
        export_report(&clock, &report, out, full_log)?;
        println!("Report written to {}", out.display());
    }
    Ok(())
}

fn check(path: &Path) -> Result<()> {
    let scenario = load(path)?;
    scenario.build().context("building mission")?;
    println!(
        "{}: {} stores, {} units, {} events, {} sols",
        path.display(),
        scenario.stores.len(),
        scenario.units.len(),
        scenario.events.len(),
        scenario.config.total_sols,
    );
    Ok(())
}

fn stress(path: Option<&Path>, only: &[String], warmup: u64, list: bool) -> Result<()> {
    let mut runner = StressRunner::new();
    if list {
        for id in runner.list(None) {
            if let Some(s) = runner.scenario(id) {
                println!("{id:<32} {:?}/{:?}  {}", s.category, s.severity, s.name);
            }
        }
        return Ok(());
    }

    let Some(path) = path else {
        bail!("a scenario file is required");
    };
    let scenario = load(path)?;
    let ids: Vec<String> = if only.is_empty() {
        runner.list(None).into_iter().map(String::from).collect()
    } else {
        only.to_vec()
    };

    for id in &ids {
        let mut clock = scenario.build().context("building mission")?;
        clock.run(warmup).context("warming up mission")?;
        let result = runner
            .run(id, &mut clock)
            .with_context(|| format!("stress scenario {id}"))?;
        print_stress(&result);
    }

    let summary = runner.summary();
    println!("{}", "=".repeat(80));
    println!(
        "Scenarios: {}  passed: {}  failed: {}  pass rate: {:.1}%  average score: {:.1}/100",
        summary.total,
        summary.passed,
        summary.failed,
        summary.pass_rate * 100.0,
        summary.average_score,
    );
    println!(
        "OVERALL: {}",
        if summary.suite_passed { "PASS" } else { "FAIL" }
    );
    Ok(())
}

fn export_report(
    clock: &MissionClock,
    report: &FinalReport,
    out: &Path,
    full_log: bool,
) -> Result<()> {
    let file = File::create(out).with_context(|| format!("creating {}", out.display()))?;
    let writer = BufWriter::new(file);
    let written = if full_log {
        clock.mission_log().write_json(writer)
    } else {
        report.write_json(writer)
    };
    written.with_context(|| format!("writing {}", out.display()))?;
    info!(path = %out.display(), full_log, "report exported");
    Ok(())
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

fn print_sol(summary: &SolSummary) {
    let levels: Vec<String> = summary
        .store_levels
        .iter()
        .map(|(name, level)| format!("{name}={level:.1}"))
        .collect();
    println!(
        "[sol={:04}]  crew={}  operational={}  failed={}  events={}  {}",
        summary.sol,
        summary.crew_size,
        summary.operational_units,
        summary.failed_units,
        summary.active_events,
        levels.join("  "),
    );
}

fn print_report(report: &FinalReport) {
    let summary = &report.mission_summary;
    println!(
        "Sols completed: {}/{}  ticks: {}",
        summary.sols_completed, summary.total_sols, summary.ticks_completed
    );
    println!("Crew alive: {}/{}", summary.crew_alive, summary.crew_size);
    println!(
        "Outcome: {} ({})",
        if summary.mission_success { "SUCCESS" } else { "FAILURE" },
        summary.end_reason.as_deref().unwrap_or("not ended"),
    );
    for totals in &report.resource_totals {
        println!(
            "  {:<20} level={:>10.1}/{:<10.1} in={:>10.1} out={:>10.1} overflow={:>8.1} short={:>8.1}",
            totals.name,
            totals.final_level,
            totals.capacity,
            totals.total_inflow,
            totals.total_outflow,
            totals.total_overflow,
            totals.total_shortfall,
        );
    }
    println!("Events triggered: {}", report.event_history.len());
    let evaluation = report.evaluate();
    for criterion in &evaluation.criteria {
        println!(
            "  [{}] {:<18} {:>6.1}%  ({})",
            if criterion.passed { "x" } else { " " },
            criterion.name,
            criterion.achieved * 100.0,
            criterion.requirement,
        );
    }
    println!("Score: {:.1}/100", evaluation.score);
    println!("State hash: {:016x}", summary.state_hash);
}

fn print_stress(result: &StressResult) {
    let recovery = match result.recovery_ticks {
        Some(ticks) => format!("{ticks} ticks"),
        None => "not recovered".to_string(),
    };
    println!(
        "{} {:<32} score={:>5.1}  ticks={}  recovery={}",
        if result.passed { "PASS" } else { "FAIL" },
        result.scenario_id,
        result.score,
        result.ticks_run,
        recovery,
    );
    for outcome in result.outcomes.iter().filter(|o| !o.passed) {
        let actual = outcome
            .actual
            .map_or_else(|| "n/a".to_string(), |v| format!("{v:.3}"));
        println!(
            "     {} actual={} threshold={:.3}",
            outcome.criterion, actual, outcome.threshold
        );
    }
    if let Some(reason) = &result.end_reason {
        println!("     ended: {reason}");
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run {
            scenario,
            ticks,
            print_every,
            export,
            full_log,
        } => run(&scenario, ticks, print_every, export.as_deref(), full_log)?,
        Commands::Check { scenario } => check(&scenario)?,
        Commands::Stress {
            scenario,
            only,
            warmup,
            list,
        } => stress(scenario.as_deref(), &only, warmup, list)?,
    }
    Ok(())
}
