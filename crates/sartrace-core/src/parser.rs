//! Telemetry parser - raw tick rows to a minimal, time-accounted event trace.
//!
//! Processing order for one agent's rows:
//!
//! 1. keep the agent's rows, sorted by timestamp
//! 2. drop unusable rows (no room, an attempt that never gets a final
//!    result, triage of a victim that is not in view), each one logged
//! 3. normalize room names
//! 4. collapse consecutive duplicates into logical samples
//! 5. emit events per sample: Move(s), then Search, then Triage, then flag sets
//!
//! Every event carries the seconds elapsed since the previous emitted event
//! on its first entry per sample, so durations sum to the span of the trace.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use sartrace_logic::constants::{triage_results, variables};
use sartrace_logic::graph::{Location, LocationGraph};
use sartrace_logic::victims::{Fov, VictimColor};

use crate::telemetry::{TelemetryRow, VisibleVictim};
use crate::trace::{EventKind, TraceEvent};
use crate::world::Value;

/// Parser settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParserConfig {
    /// `player_ID` whose rows are parsed.
    pub agent: String,
    /// Trailing characters stripped from room names (whitespace always is).
    pub room_sentinels: Vec<char>,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            agent: String::new(),
            room_sentinels: vec!['_', '*'],
        }
    }
}

impl ParserConfig {
    pub fn for_agent(agent: &str) -> Self {
        Self {
            agent: agent.to_string(),
            ..Default::default()
        }
    }

    /// Strip surrounding whitespace and trailing sentinel characters.
    pub fn normalize_room(&self, raw: &str) -> String {
        raw.trim()
            .trim_end_matches(|c: char| c.is_whitespace() || self.room_sentinels.contains(&c))
            .to_string()
    }
}

/// Why a row was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DropReason {
    MissingRoom,
    /// `IN_PROGRESS` row with no later final result for the same victim.
    UnresolvedTriage,
    /// Triage flag set for a victim other than the one in view.
    TriageVictimNotInView,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DropReason::MissingRoom => "missing room",
            DropReason::UnresolvedTriage => "triage never resolved",
            DropReason::TriageVictimNotInView => "triaged victim not in view",
        };
        f.write_str(s)
    }
}

/// Non-fatal problems found while parsing.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
pub enum ParseWarning {
    #[error("dropped row {index} at {timestamp}: {reason}")]
    DataQuality {
        index: usize,
        timestamp: f64,
        reason: DropReason,
    },

    #[error("no route of at most two hops from {from} to {to} at {timestamp}")]
    UnreachableMove {
        timestamp: f64,
        from: Location,
        to: Location,
    },
}

/// Fatal parse failures.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("no rows for agent {0}")]
    NoRows(String),

    #[error("every row for agent {0} was dropped")]
    AllRowsDropped(String),
}

/// One logical sample: a run of rows with identical tracked fields.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sample {
    pub timestamp: f64,
    /// Seconds until the next distinct sample (0 for the last).
    pub duration: f64,
    pub room: Location,
    #[serde(skip)]
    pub visible: Vec<VisibleVictim>,
    pub triage_in_progress: bool,
    pub triage_victim: Option<String>,
    pub triage_result: Option<String>,
    /// Raw rows collapsed into this sample.
    pub rows: usize,
}

impl Sample {
    fn from_row(row: &TelemetryRow, room: Location) -> Self {
        Self {
            timestamp: row.timestamp,
            duration: 0.0,
            room,
            visible: row.visible(),
            triage_in_progress: row.triage_in_progress,
            triage_victim: row.event_triage_victim_id.clone(),
            triage_result: row.triage_result.clone(),
            rows: 1,
        }
    }

    /// Same values on every tracked field, ignoring time.
    pub fn same_fields(&self, other: &Sample) -> bool {
        self.room == other.room
            && self.visible == other.visible
            && self.triage_in_progress == other.triage_in_progress
            && self.triage_victim == other.triage_victim
            && self.triage_result == other.triage_result
    }

    pub fn fov(&self) -> Fov {
        self.visible
            .first()
            .map_or(Fov::Nothing, |v| Fov::Victim(v.color))
    }

    /// Color of the victim being triaged: the in-view victim with the
    /// triaged id, else whatever is in view.
    pub fn triage_color(&self) -> Option<VictimColor> {
        let by_id = self.triage_victim.as_deref().and_then(|id| {
            self.visible
                .iter()
                .find(|v| v.id.as_deref() == Some(id))
                .map(|v| v.color)
        });
        by_id.or_else(|| self.fov().color())
    }

    fn final_result(&self) -> Option<&str> {
        self.triage_result
            .as_deref()
            .filter(|r| triage_results::FINAL.contains(r))
    }
}

/// Parser output.
#[derive(Debug, Clone, Default)]
pub struct ParseReport {
    pub events: Vec<TraceEvent>,
    /// The agent's rows that survived filtering, in timestamp order.
    pub rows: Vec<TelemetryRow>,
    pub samples: Vec<Sample>,
    pub warnings: Vec<ParseWarning>,
}

/// Merge consecutive samples with identical tracked fields (keeping the
/// first timestamp) and recompute every duration from the timestamps.
pub fn collapse_duplicates(samples: &[Sample]) -> Vec<Sample> {
    let mut out: Vec<Sample> = Vec::with_capacity(samples.len());
    for s in samples {
        match out.last_mut() {
            Some(last) if last.same_fields(s) => last.rows += s.rows,
            _ => out.push(s.clone()),
        }
    }
    let next_times: Vec<Option<f64>> = out.iter().skip(1).map(|s| Some(s.timestamp)).chain([None]).collect();
    for (s, next) in out.iter_mut().zip(next_times) {
        s.duration = next.map_or(0.0, |t| (t - s.timestamp).max(0.0));
    }
    out
}

fn drop_reason(row: &TelemetryRow, room: &str) -> Option<DropReason> {
    if room.is_empty() {
        return Some(DropReason::MissingRoom);
    }
    if row.triage_in_progress {
        if let Some(id) = row.event_triage_victim_id.as_deref() {
            let visible = row.visible();
            let ids_known = visible.iter().any(|v| v.id.is_some());
            let in_view = visible.iter().any(|v| v.id.as_deref() == Some(id));
            if !in_view && (visible.is_empty() || ids_known) {
                return Some(DropReason::TriageVictimNotInView);
            }
        }
    }
    None
}

/// Marks `IN_PROGRESS` rows whose attempt is abandoned: the next row with
/// any other result carries no final result for the same victim, or the log
/// ends first.
fn unresolved_attempts(rows: &[&TelemetryRow]) -> Vec<bool> {
    let mut unresolved = vec![false; rows.len()];
    // Victim id of the nearest later final result, if that row had one.
    let mut resolution: Option<Option<&str>> = None;
    for (index, row) in rows.iter().enumerate().rev() {
        if row.result_in_progress() {
            let id = row.event_triage_victim_id.as_deref();
            unresolved[index] = match resolution {
                Some(resolved) => id.is_some() && resolved.is_some() && id != resolved,
                None => true,
            };
        } else {
            resolution = row
                .final_result()
                .map(|_| row.event_triage_victim_id.as_deref());
        }
    }
    unresolved
}

/// Parse one agent's rows into an event trace.
pub fn parse(
    rows: &[TelemetryRow],
    graph: &LocationGraph,
    config: &ParserConfig,
) -> Result<ParseReport, ParseError> {
    let mut mine: Vec<&TelemetryRow> = rows
        .iter()
        .filter(|r| r.player_id == config.agent)
        .collect();
    if mine.is_empty() {
        return Err(ParseError::NoRows(config.agent.clone()));
    }
    mine.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));

    let mut report = ParseReport::default();

    let unresolved = unresolved_attempts(&mine);

    let mut kept = Vec::with_capacity(mine.len());
    for (index, row) in mine.iter().enumerate() {
        let room = config.normalize_room(row.room.as_deref().unwrap_or(""));
        let reason = if unresolved[index] && !room.is_empty() {
            Some(DropReason::UnresolvedTriage)
        } else {
            drop_reason(row, &room)
        };
        match reason {
            Some(reason) => {
                log::debug!(
                    "{}: dropping row {} at {}: {}",
                    config.agent,
                    index,
                    row.timestamp,
                    reason
                );
                report.warnings.push(ParseWarning::DataQuality {
                    index,
                    timestamp: row.timestamp,
                    reason,
                });
            }
            None => {
                let mut clean = (*row).clone();
                clean.room = Some(room.clone());
                kept.push(Sample::from_row(&clean, Location::from(room)));
                report.rows.push(clean);
            }
        }
    }
    if !report.warnings.is_empty() {
        log::warn!(
            "{}: dropped {} of {} rows",
            config.agent,
            report.warnings.len(),
            mine.len()
        );
    }
    if kept.is_empty() {
        return Err(ParseError::AllRowsDropped(config.agent.clone()));
    }

    report.samples = collapse_duplicates(&kept);
    let mut emitter = Emitter::new(&config.agent);
    for i in 0..report.samples.len() {
        emitter.sample(&report.samples, i, graph, &mut report.warnings);
    }
    report.events = emitter.events;
    Ok(report)
}

/// Running state while walking samples.
struct Emitter<'a> {
    agent: &'a str,
    events: Vec<TraceEvent>,
    attempt: u32,
    /// FOV the emitted events leave the agent with, when known.
    believed: Option<Fov>,
    last_emit: Option<f64>,
    /// Events of the current sample so far.
    pending: usize,
    sample: usize,
    timestamp: f64,
}

impl<'a> Emitter<'a> {
    fn new(agent: &'a str) -> Self {
        Self {
            agent,
            events: Vec::new(),
            attempt: 0,
            believed: None,
            last_emit: None,
            pending: 0,
            sample: 0,
            timestamp: 0.0,
        }
    }

    fn emit(&mut self, kind: EventKind) {
        let duration = if self.pending == 0 {
            self.last_emit.map_or(0.0, |t| (self.timestamp - t).max(0.0))
        } else {
            0.0
        };
        self.pending += 1;
        self.events.push(TraceEvent {
            timestamp: self.timestamp,
            duration,
            attempt: self.attempt,
            agent: self.agent.to_string(),
            sample: self.sample,
            kind,
        });
    }

    fn search(&mut self, fov: Fov) {
        if self.believed != Some(fov) {
            self.emit(EventKind::Search { observed_fov: fov });
            self.believed = Some(fov);
        }
    }

    fn sample(
        &mut self,
        samples: &[Sample],
        i: usize,
        graph: &LocationGraph,
        warnings: &mut Vec<ParseWarning>,
    ) {
        let s = &samples[i];
        let prev = i.checked_sub(1).map(|p| &samples[p]);
        self.pending = 0;
        self.sample = i;
        self.timestamp = s.timestamp;

        // Moves.
        match prev {
            None => {
                self.emit(EventKind::Move {
                    direction: None,
                    destination: s.room.clone(),
                    observed_fov: Some(s.fov()),
                });
                self.believed = Some(s.fov());
            }
            Some(p) if p.room != s.room => {
                match graph.shortest_route(&p.room, &s.room) {
                    Some(route) => {
                        let hops = route.len();
                        for (n, (direction, destination)) in route.into_iter().enumerate() {
                            let observed_fov = (n + 1 == hops).then(|| s.fov());
                            self.emit(EventKind::Move {
                                direction: Some(direction),
                                destination,
                                observed_fov,
                            });
                        }
                    }
                    None => {
                        log::warn!(
                            "{}: no route from {} to {} at {}, emitting opaque move",
                            self.agent,
                            p.room,
                            s.room,
                            s.timestamp
                        );
                        warnings.push(ParseWarning::UnreachableMove {
                            timestamp: s.timestamp,
                            from: p.room.clone(),
                            to: s.room.clone(),
                        });
                        self.emit(EventKind::Move {
                            direction: None,
                            destination: s.room.clone(),
                            observed_fov: Some(s.fov()),
                        });
                    }
                }
                self.believed = Some(s.fov());
            }
            Some(p) => {
                // Same room: a change in view not explained by moving.
                if p.visible != s.visible {
                    // A victim only leaving view with slot 0 unchanged finds nothing.
                    let discovered = match s.visible.iter().find(|v| !p.visible.contains(v)) {
                        Some(v) => Fov::Victim(v.color),
                        None if s.fov() == p.fov() => Fov::Nothing,
                        None => s.fov(),
                    };
                    self.search(discovered);
                }
            }
        }

        let was_triaging = prev.is_some_and(|p| p.triage_in_progress);
        if s.triage_in_progress && !was_triaging {
            if let Some(color) = s.triage_color() {
                self.search(Fov::Victim(color));
                let attempt_seconds = attempt_length(samples, i);
                self.emit(EventKind::Triage {
                    color,
                    attempt_seconds,
                });
                // Outcome depends on thresholds the parser does not know.
                self.believed = None;
            }
            self.emit(EventKind::FlagSet {
                variable: variables::TRIAGE_IN_PROGRESS.to_string(),
                value: Value::Bool(true),
            });
        } else if !s.triage_in_progress && was_triaging {
            self.emit(EventKind::FlagSet {
                variable: variables::TRIAGE_IN_PROGRESS.to_string(),
                value: Value::Bool(false),
            });
            self.attempt += 1;
        }

        if let Some(result) = s.final_result() {
            let repeated = prev.is_some_and(|p| p.triage_result == s.triage_result);
            if !repeated {
                self.emit(EventKind::FlagSet {
                    variable: variables::TRIAGE_RESULT.to_string(),
                    value: Value::from(result),
                });
            }
        }

        if self.pending > 0 {
            self.last_emit = Some(s.timestamp);
        }
    }
}

/// Seconds from sample `start` until the triage flag drops, the agent leaves
/// the room, or the log ends.
fn attempt_length(samples: &[Sample], start: usize) -> f64 {
    let s = &samples[start];
    let end = samples[start + 1..]
        .iter()
        .find(|n| !n.triage_in_progress || n.room != s.room)
        .map(|n| n.timestamp)
        .unwrap_or_else(|| {
            samples
                .last()
                .map_or(s.timestamp, |l| l.timestamp + l.duration)
        });
    (end - s.timestamp).max(0.0)
}
