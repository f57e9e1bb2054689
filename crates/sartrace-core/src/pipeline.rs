//! Per-file processing (load → parse → replay) and parallel batches.
//!
//! Files are independent: each one gets its own world built from the shared,
//! read-only scenario, so a batch fans out across the rayon pool with no
//! coordination beyond collecting the reports.

use std::fmt;
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use serde::Serialize;

use crate::parser::{parse, ParseWarning};
use crate::replay::{ReplayEngine, Trajectory};
use crate::scenario::Scenario;
use crate::telemetry::{load_rows, TelemetryRow};
use crate::trace::TraceEvent;

/// How processing one file ended.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum FileOutcome {
    /// Parsed and fully replayed.
    Parsed { events: usize, steps: usize },
    /// Could not load or parse the file, or build a world for it; nothing
    /// was replayed.
    ParseFailed(String),
    /// Replay stopped at event `last_index`.
    ReplayHalted { reason: String, last_index: usize },
}

impl fmt::Display for FileOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileOutcome::Parsed { events, steps } => {
                write!(f, "parsed ({} events, {} steps)", events, steps)
            }
            FileOutcome::ParseFailed(reason) => write!(f, "parse failed: {}", reason),
            FileOutcome::ReplayHalted { reason, last_index } => {
                write!(f, "replay halted at event {}: {}", last_index, reason)
            }
        }
    }
}

/// Everything produced for one file.
#[derive(Debug, Clone)]
pub struct FileReport {
    pub path: Option<PathBuf>,
    pub agent: String,
    pub outcome: FileOutcome,
    pub trace: Vec<TraceEvent>,
    pub trajectory: Trajectory,
    pub warnings: Vec<ParseWarning>,
}

impl FileReport {
    fn failed(path: Option<&Path>, agent: &str, reason: String) -> Self {
        Self {
            path: path.map(Path::to_path_buf),
            agent: agent.to_string(),
            outcome: FileOutcome::ParseFailed(reason),
            trace: Vec::new(),
            trajectory: Trajectory::default(),
            warnings: Vec::new(),
        }
    }
}

/// Parse and replay rows already in memory.
pub fn process_rows(rows: &[TelemetryRow], scenario: &Scenario, agent: &str) -> FileReport {
    let report = match parse(rows, &scenario.graph, &scenario.parser_for(agent)) {
        Ok(report) => report,
        Err(e) => return FileReport::failed(None, agent, e.to_string()),
    };

    let agents = [agent.to_string()];
    let (outcome, trajectory) = match scenario.world(&agents) {
        Ok(mut world) => {
            let mut engine = ReplayEngine::seeded(scenario.seed);
            let out = engine.run(&mut world, &report.events, 0, report.events.len());
            match out.halted {
                None => (
                    FileOutcome::Parsed {
                        events: report.events.len(),
                        steps: out.trajectory.len(),
                    },
                    out.trajectory,
                ),
                Some(err) => (
                    FileOutcome::ReplayHalted {
                        reason: err.to_string(),
                        last_index: err.index().unwrap_or(out.trajectory.len()),
                    },
                    out.trajectory,
                ),
            }
        }
        Err(e) => (
            FileOutcome::ParseFailed(format!("world setup failed: {}", e)),
            Trajectory::default(),
        ),
    };

    FileReport {
        path: None,
        agent: agent.to_string(),
        outcome,
        trace: report.events,
        trajectory,
        warnings: report.warnings,
    }
}

/// Load, parse, and replay one telemetry file.
pub fn process_file(path: &Path, scenario: &Scenario, agent: &str) -> FileReport {
    let mut report = match load_rows(path) {
        Ok(rows) => process_rows(&rows, scenario, agent),
        Err(e) => FileReport::failed(Some(path), agent, e.to_string()),
    };
    report.path = Some(path.to_path_buf());
    match &report.outcome {
        FileOutcome::Parsed { .. } => log::info!("{}: {}", path.display(), report.outcome),
        _ => log::warn!("{}: {}", path.display(), report.outcome),
    }
    report
}

/// Process many files in parallel. Reports come back in input order.
pub fn process_batch(paths: &[PathBuf], scenario: &Scenario, agent: &str) -> Vec<FileReport> {
    paths
        .par_iter()
        .map(|path| process_file(path, scenario, agent))
        .collect()
}
