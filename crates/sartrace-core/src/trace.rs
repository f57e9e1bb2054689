//! Reconstructed events: the parser's output and the replay engine's input.

use std::fmt;

use serde::{Deserialize, Serialize};

use sartrace_logic::graph::{Direction, Location};
use sartrace_logic::victims::{Fov, VictimColor};

use crate::action::{Action, ActionKind};
use crate::world::Value;

/// What happened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EventKind {
    /// One hop (or one opaque jump when `direction` is `None`). Only the
    /// hop that lands in the sampled room carries the observed FOV.
    Move {
        direction: Option<Direction>,
        destination: Location,
        observed_fov: Option<Fov>,
    },
    /// A change in view explained by looking around, not by moving.
    Search { observed_fov: Fov },
    /// Start of a triage attempt lasting `attempt_seconds`.
    Triage { color: VictimColor, attempt_seconds: f64 },
    /// Direct assignment of an agent variable.
    FlagSet { variable: String, value: Value },
}

impl EventKind {
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::Move { .. } => "Move",
            EventKind::Search { .. } => "Search",
            EventKind::Triage { .. } => "Triage",
            EventKind::FlagSet { .. } => "FlagSet",
        }
    }
}

/// One reconstructed event. Never mutated after the parser emits it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEvent {
    /// Timestamp (seconds) of the sample the event came from.
    pub timestamp: f64,
    /// Seconds of mission time the event accounts for.
    pub duration: f64,
    /// Triage attempt counter, bumped each time an attempt ends.
    pub attempt: u32,
    pub agent: String,
    /// Index of the logical sample the event came from.
    pub sample: usize,
    pub kind: EventKind,
}

impl TraceEvent {
    /// The action this event applies, consuming `elapsed` whole seconds of
    /// clock. Flag sets are not actions.
    pub fn to_action(&self, elapsed: u32) -> Option<Action> {
        let kind = match &self.kind {
            EventKind::Move {
                direction,
                destination,
                ..
            } => ActionKind::Move {
                direction: *direction,
                destination: destination.clone(),
            },
            EventKind::Search { .. } => ActionKind::Search,
            EventKind::Triage {
                color,
                attempt_seconds,
            } => ActionKind::Triage {
                color: *color,
                attempt_seconds: *attempt_seconds,
            },
            EventKind::FlagSet { .. } => return None,
        };
        Some(Action::new(self.agent.clone(), kind, elapsed))
    }

    /// FOV the trace asserts after this event, if any.
    pub fn observed_fov(&self) -> Option<Fov> {
        match &self.kind {
            EventKind::Move { observed_fov, .. } => *observed_fov,
            EventKind::Search { observed_fov } => Some(*observed_fov),
            _ => None,
        }
    }
}

impl fmt::Display for TraceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:.1}s +{:.1}s #{}] {} ", self.timestamp, self.duration, self.attempt, self.agent)?;
        match &self.kind {
            EventKind::Move {
                direction: Some(d),
                destination,
                ..
            } => write!(f, "Move {} -> {}", d, destination),
            EventKind::Move {
                direction: None,
                destination,
                ..
            } => write!(f, "Move -> {}", destination),
            EventKind::Search { observed_fov } => write!(f, "Search ({})", observed_fov),
            EventKind::Triage {
                color,
                attempt_seconds,
            } => write!(f, "Triage {} for {:.1}s", color, attempt_seconds),
            EventKind::FlagSet { variable, value } => write!(f, "Set {} = {}", variable, value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ActionVerb;

    fn event(kind: EventKind) -> TraceEvent {
        TraceEvent {
            timestamp: 10.0,
            duration: 3.0,
            attempt: 0,
            agent: "p1".to_string(),
            sample: 1,
            kind,
        }
    }

    #[test]
    fn test_to_action() {
        let mv = event(EventKind::Move {
            direction: Some(Direction::East),
            destination: Location::from("R2"),
            observed_fov: Some(Fov::Nothing),
        });
        let action = mv.to_action(3).unwrap();
        assert_eq!(action.verb(), ActionVerb::Move);
        assert_eq!(action.elapsed, 3);
        assert_eq!(mv.observed_fov(), Some(Fov::Nothing));

        let flag = event(EventKind::FlagSet {
            variable: "triage_in_progress".to_string(),
            value: Value::Bool(true),
        });
        assert!(flag.to_action(0).is_none());
        assert_eq!(flag.observed_fov(), None);
    }

    #[test]
    fn test_display() {
        let e = event(EventKind::Triage {
            color: VictimColor::Gold,
            attempt_seconds: 14.0,
        });
        assert_eq!(e.to_string(), "[10.0s +3.0s #0] p1 Triage Gold for 14.0s");
    }
}
