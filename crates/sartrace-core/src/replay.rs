//! Replay engine - drives a [`RescueWorld`] through a reconstructed trace.
//!
//! Replay is strictly sequential. Each event is checked, applied, and
//! recorded with the state it was applied to. The first illegal or
//! unbelievable event halts the engine for good; the trajectory up to that
//! point is returned with the reason.

use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use sartrace_logic::constants::variables;
use sartrace_logic::graph::Location;
use sartrace_logic::InconsistentObservationError;

use crate::dynamics::{IllegalAction, RescueWorld};
use crate::trace::{EventKind, TraceEvent};
use crate::world::{Snapshot, StateKey, Value, WorldError};

/// Engine lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayState {
    NotStarted,
    Running,
    /// Terminal. The file must be replayed from scratch with a new engine.
    Halted,
}

/// Why replay halted.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ReplayError {
    #[error("event {index}: illegal action: {reason}")]
    IllegalAction {
        index: usize,
        #[source]
        reason: IllegalAction,
    },

    #[error("event {index}: unbelievable observation: {source}")]
    UnbelievableObservation { index: usize, source: WorldError },

    #[error("event {index}: inconsistent observation of {key}: {source}")]
    InconsistentObservation {
        index: usize,
        key: StateKey,
        source: InconsistentObservationError,
    },

    #[error("event {index}: {source}")]
    World { index: usize, source: WorldError },

    #[error("event range {start}..{end} is outside a trace of {len} events")]
    BadRange { start: usize, end: usize, len: usize },

    #[error("replay already halted")]
    AlreadyHalted,
}

impl ReplayError {
    /// Index of the offending event, when the error came from one.
    pub fn index(&self) -> Option<usize> {
        match self {
            ReplayError::IllegalAction { index, .. }
            | ReplayError::UnbelievableObservation { index, .. }
            | ReplayError::InconsistentObservation { index, .. }
            | ReplayError::World { index, .. } => Some(*index),
            ReplayError::BadRange { .. } | ReplayError::AlreadyHalted => None,
        }
    }

    fn from_world(index: usize, err: WorldError) -> Self {
        match err {
            WorldError::InconsistentObservation { key, source } => {
                ReplayError::InconsistentObservation { index, key, source }
            }
            other => ReplayError::World {
                index,
                source: other,
            },
        }
    }
}

/// One applied event and the state it was applied to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryStep {
    /// Index of the event in the trace.
    pub index: usize,
    pub snapshot: Snapshot,
    pub event: TraceEvent,
}

/// Ordered (state, event) pairs plus the state after the last step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Trajectory {
    pub steps: Vec<TrajectoryStep>,
    pub final_state: Option<Snapshot>,
}

impl Trajectory {
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// State right after step `k` was applied.
    pub fn state_after(&self, k: usize) -> Option<&Snapshot> {
        match self.steps.get(k + 1) {
            Some(next) => Some(&next.snapshot),
            None if k + 1 == self.steps.len() => self.final_state.as_ref(),
            None => None,
        }
    }
}

/// Result of a run: whatever was applied, and the halt reason if any.
#[derive(Debug, Clone)]
pub struct ReplayOutcome {
    pub trajectory: Trajectory,
    pub halted: Option<ReplayError>,
}

impl ReplayOutcome {
    pub fn is_complete(&self) -> bool {
        self.halted.is_none()
    }

    /// Index of the last event applied, if any was.
    pub fn last_index(&self) -> Option<usize> {
        self.trajectory.steps.last().map(|s| s.index)
    }
}

/// Sequential replay with an injectable random source for unobserved
/// stochastic outcomes.
pub struct ReplayEngine<R: RngCore = ChaCha8Rng> {
    rng: R,
    state: ReplayState,
    /// Seconds of trace time consumed so far.
    elapsed: f64,
}

impl ReplayEngine<ChaCha8Rng> {
    /// Engine drawing from a ChaCha8 stream seeded with `seed`.
    pub fn seeded(seed: u64) -> Self {
        Self::new(ChaCha8Rng::seed_from_u64(seed))
    }
}

impl<R: RngCore> ReplayEngine<R> {
    pub fn new(rng: R) -> Self {
        Self {
            rng,
            state: ReplayState::NotStarted,
            elapsed: 0.0,
        }
    }

    pub fn state(&self) -> ReplayState {
        self.state
    }

    /// Apply `trace[start..end]` to `world`.
    ///
    /// With `start == 0` the first event is an initial-condition assignment:
    /// a Move places the agent, a FlagSet assigns the flag, and no
    /// transition is stepped. The world clock tracks the whole seconds of
    /// cumulative event duration; a fresh engine starting at `start > 0`
    /// counts the durations of `trace[..start]` too.
    pub fn run(
        &mut self,
        world: &mut RescueWorld,
        trace: &[TraceEvent],
        start: usize,
        end: usize,
    ) -> ReplayOutcome {
        let mut trajectory = Trajectory::default();
        if self.state == ReplayState::Halted {
            return ReplayOutcome {
                trajectory,
                halted: Some(ReplayError::AlreadyHalted),
            };
        }
        if start > end || end > trace.len() {
            self.state = ReplayState::Halted;
            return ReplayOutcome {
                trajectory,
                halted: Some(ReplayError::BadRange {
                    start,
                    end,
                    len: trace.len(),
                }),
            };
        }
        if self.state == ReplayState::NotStarted {
            // Resuming mid-trace: the skipped prefix still counts toward time.
            let prior: f64 = trace[..start].iter().map(|e| e.duration.max(0.0)).sum();
            self.elapsed = prior.max(f64::from(world.clock()));
            self.state = ReplayState::Running;
        }

        for (index, event) in trace.iter().enumerate().take(end).skip(start) {
            let snapshot = world.snapshot();
            if let Err(err) = self.apply(world, index, event) {
                log::warn!("{}: replay halted: {}", event.agent, err);
                self.state = ReplayState::Halted;
                trajectory.final_state = Some(world.snapshot());
                return ReplayOutcome {
                    trajectory,
                    halted: Some(err),
                };
            }
            trajectory.steps.push(TrajectoryStep {
                index,
                snapshot,
                event: event.clone(),
            });
        }

        trajectory.final_state = Some(world.snapshot());
        ReplayOutcome {
            trajectory,
            halted: None,
        }
    }

    fn apply(
        &mut self,
        world: &mut RescueWorld,
        index: usize,
        event: &TraceEvent,
    ) -> Result<(), ReplayError> {
        self.elapsed += event.duration.max(0.0);
        let target = self.elapsed.floor().min(f64::from(u32::MAX)) as u32;
        let seconds = target.saturating_sub(world.clock());

        if index == 0 {
            match &event.kind {
                EventKind::Move {
                    destination,
                    observed_fov,
                    ..
                } => {
                    world
                        .tick(seconds, &mut self.rng)
                        .map_err(|e| ReplayError::from_world(index, e))?;
                    return world
                        .place_agent(&event.agent, destination, *observed_fov)
                        .map_err(|e| ReplayError::from_world(index, e));
                }
                EventKind::FlagSet { .. } => {}
                _ => log::debug!("{}: trace starts with {}", event.agent, event.kind.name()),
            }
        }

        match &event.kind {
            EventKind::FlagSet { variable, value } => {
                world
                    .tick(seconds, &mut self.rng)
                    .map_err(|e| ReplayError::from_world(index, e))?;
                world
                    .set_flag(&event.agent, variable, value.clone())
                    .map_err(|source| ReplayError::UnbelievableObservation { index, source })
            }
            _ => {
                let Some(action) = event.to_action(seconds) else {
                    return Ok(());
                };
                world
                    .check_legal(&action)
                    .map_err(|reason| ReplayError::IllegalAction { index, reason })?;
                world
                    .apply(&action, event.observed_fov(), &mut self.rng)
                    .map(|_| ())
                    .map_err(|e| ReplayError::from_world(index, e))
            }
        }
    }
}

/// Room the agent lands in after each sample's last Move, in order.
pub fn room_sequence(trajectory: &Trajectory, agent: &str) -> Vec<Location> {
    let is_move = |e: &TraceEvent| matches!(e.kind, EventKind::Move { .. });
    let steps = &trajectory.steps;
    let mut rooms = Vec::new();
    for (k, step) in steps.iter().enumerate() {
        if !is_move(&step.event) {
            continue;
        }
        let last_hop = steps
            .get(k + 1)
            .map_or(true, |n| n.event.sample != step.event.sample || !is_move(&n.event));
        if !last_hop {
            continue;
        }
        let room = trajectory
            .state_after(k)
            .and_then(|s| s.get(agent, variables::LOCATION))
            .and_then(Value::as_text);
        if let Some(room) = room {
            rooms.push(Location::from(room));
        }
    }
    rooms
}
