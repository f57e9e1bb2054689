//! Pure search-and-rescue world model for sartrace.
//!
//! This crate contains the model logic that is independent of telemetry
//! files, the keyed world state, and replay. Functions take plain data and
//! return results, so the rules can be unit-tested on their own and reused
//! by the replay engine and the headless harness alike.
//!
//! # Module Overview
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`constants`] | Telemetry column names, triage results, state variable names |
//! | [`discovery`] | Discrete distributions, discovery weighting, `reconcile` |
//! | [`error`] | `ConfigurationError`, `InconsistentObservationError` |
//! | [`graph`] | Directional location graph, bounded two-hop routing |
//! | [`rules`] | Triage/expiry thresholds, validation, mission phases |
//! | [`victims`] | Victim colors, per-location counts, triage/expiry/search |

pub mod constants;
pub mod discovery;
pub mod error;
pub mod graph;
pub mod rules;
pub mod victims;

pub use error::{ConfigurationError, InconsistentObservationError};
