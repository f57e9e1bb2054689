//! sartrace Core - Telemetry Trace Reconstruction and Replay
//!
//! Turns tick-sampled telemetry of a search-and-rescue operator into a
//! minimal event trace, then replays that trace against a keyed world state
//! whose victims and agents evolve under the rules in `sartrace-logic`.
//!
//! # Architecture
//!
//! Data flows one way: rows → parser → trace → replay engine → trajectory.
//! - **World**: keyed state with declared domains and registered transition rules
//! - **Dynamics**: the graph and victim rules, registered into a world per file
//! - **Parser**: cleans, de-duplicates, and segments rows into events
//! - **Replay**: checks and applies events in order, halting on the first violation
//!
//! # Example
//!
//! ```rust,no_run
//! use std::path::Path;
//! use sartrace_core::prelude::*;
//!
//! let scenario = ScenarioConfig::from_path(Path::new("scenario.json"))
//!     .unwrap()
//!     .build()
//!     .unwrap();
//! let report = process_file(Path::new("trial.csv"), &scenario, "p1");
//! println!("{}", report.outcome);
//! ```

pub mod action;
pub mod dynamics;
pub mod parser;
pub mod persistence;
pub mod pipeline;
pub mod replay;
pub mod scenario;
pub mod telemetry;
pub mod trace;
pub mod world;

/// Commonly used types for convenient importing
pub mod prelude {
    pub use crate::action::{Action, ActionKind, ActionVerb};
    pub use crate::dynamics::{IllegalAction, RescueWorld};
    pub use crate::parser::{parse, ParseReport, ParseWarning, ParserConfig};
    pub use crate::pipeline::{process_batch, process_file, process_rows, FileOutcome, FileReport};
    pub use crate::replay::{room_sequence, ReplayEngine, ReplayError, ReplayState, Trajectory};
    pub use crate::scenario::{Scenario, ScenarioConfig};
    pub use crate::telemetry::TelemetryRow;
    pub use crate::trace::{EventKind, TraceEvent};
    pub use crate::world::{Domain, StateKey, Trigger, Value, World, WorldError};
}
