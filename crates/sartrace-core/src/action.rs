//! Actions an agent can take in the world.

use serde::{Deserialize, Serialize};

use sartrace_logic::graph::{Direction, Location};
use sartrace_logic::victims::VictimColor;

/// What an action does.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ActionKind {
    /// Move one hop. `direction` is `None` for an opaque move between
    /// locations with no short route; `destination` is always set.
    Move {
        direction: Option<Direction>,
        destination: Location,
    },
    /// Look around the current location.
    Search,
    /// Triage a victim of `color` for `attempt_seconds`.
    Triage {
        color: VictimColor,
        attempt_seconds: f64,
    },
}

/// Discriminant of [`ActionKind`], used to key transition rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ActionVerb {
    Move,
    Search,
    Triage,
}

impl ActionKind {
    pub fn verb(&self) -> ActionVerb {
        match self {
            ActionKind::Move { .. } => ActionVerb::Move,
            ActionKind::Search => ActionVerb::Search,
            ActionKind::Triage { .. } => ActionVerb::Triage,
        }
    }
}

/// An agent's action, plus the whole seconds of mission clock it consumes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub agent: String,
    pub kind: ActionKind,
    pub elapsed: u32,
}

impl Action {
    pub fn new(agent: impl Into<String>, kind: ActionKind, elapsed: u32) -> Self {
        Self {
            agent: agent.into(),
            kind,
            elapsed,
        }
    }

    pub fn verb(&self) -> ActionVerb {
        self.kind.verb()
    }
}
