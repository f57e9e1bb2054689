//! Error types shared by the model modules.

use thiserror::Error;

use crate::graph::{Direction, Location};
use crate::victims::VictimColor;

/// Bad graph, victim, or rules setup. Always fatal for the file being set up.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigurationError {
    #[error("invalid direction {0:?}")]
    InvalidDirection(String),

    #[error("invalid victim color {0:?}")]
    InvalidColor(String),

    #[error("{origin} already has {existing} to the {direction}, cannot also point at {requested}")]
    ConflictingEdge {
        origin: Location,
        direction: Direction,
        existing: Location,
        requested: Location,
    },

    #[error("location {0} cannot neighbor itself")]
    SelfLoop(Location),

    #[error("victim placement lists differ in length: {locations} locations, {colors} colors")]
    MismatchedVictimLists { locations: usize, colors: usize },

    #[error("unknown location {0}")]
    UnknownLocation(Location),

    #[error("no {kind} threshold configured for {color}")]
    MissingThreshold {
        kind: &'static str,
        color: VictimColor,
    },

    #[error("{kind} threshold configured for {color}, which cannot be triaged or expire")]
    ThresholdForInertColor {
        kind: &'static str,
        color: VictimColor,
    },

    #[error("residual discovery weight must be finite and non-negative, got {0}")]
    InvalidNoneWeight(f64),

    #[error("mission length must be positive")]
    EmptyMission,
}

/// An observed stochastic outcome that the believed distribution gives zero
/// probability.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("observed {observed} is impossible under the current model (possible: {})", .support.join(", "))]
pub struct InconsistentObservationError {
    pub observed: String,
    pub support: Vec<String>,
}
