//! Search-and-rescue dynamics registered into a [`World`].
//!
//! `RescueWorld` owns one world instance plus the graph and rules it was
//! built from. Every table the rules read lives in this instance (shared
//! read-only through `Arc`), so independent files never touch each other's
//! state.
//!
//! Variables defined per world:
//!
//! | Owner | Name | Domain | Driven by |
//! |-------|------|--------|-----------|
//! | `world` | `phase` | mission phases | clock |
//! | location | `victims_<Color>` | `0..=total` | clock (expiry), Triage |
//! | agent | `location` | all locations | Move |
//! | agent | `fov` | `none` + colors | Move, Search, Triage, default `none` |
//! | agent | `visits_<Location>` | `0..` | Move |
//! | agent | `triage_in_progress` | bool | flag set |
//! | agent | `triage_result` | `none`, `SUCCESSFUL`, `UNSUCCESSFUL` | flag set |

use std::collections::BTreeSet;
use std::sync::Arc;

use rand::RngCore;
use thiserror::Error;

use sartrace_logic::constants::{triage_results, variables};
use sartrace_logic::discovery::{discovery_distribution, reconcile, Distribution};
use sartrace_logic::graph::{Direction, Location, LocationGraph};
use sartrace_logic::rules::{mission_phase, MissionPhase, VictimRules};
use sartrace_logic::victims::{
    expire_counts, triage_legal, triage_outcome_at, ColorCounts, Fov, TriageOutcome, VictimColor,
    VictimTable,
};

use crate::action::{Action, ActionKind, ActionVerb};
use crate::world::{
    Change, Domain, Observations, RuleContext, Snapshot, StateKey, StateView, Trigger, Value,
    World, WorldError,
};

/// Why an action was rejected before stepping.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum IllegalAction {
    #[error("unknown agent {0}")]
    UnknownAgent(String),

    #[error("agent {0} has not been placed")]
    NotPlaced(String),

    #[error("no neighbor {direction} of {from}")]
    NoNeighbor { from: Location, direction: Direction },

    #[error("moving {direction} from {from} reaches {actual}, not {expected}")]
    WrongDestination {
        from: Location,
        direction: Direction,
        expected: Location,
        actual: Location,
    },

    #[error("unknown location {0}")]
    UnknownLocation(Location),

    #[error("cannot triage {color} while seeing {fov}")]
    VictimNotInView { color: VictimColor, fov: Fov },
}

fn fov_value(fov: Fov) -> Value {
    Value::Text(fov.to_string())
}

fn fov_domain() -> Domain {
    let mut values = vec![fov_value(Fov::Nothing)];
    values.extend(VictimColor::ALL.iter().map(|&c| fov_value(Fov::Victim(c))));
    Domain::OneOf(values)
}

fn counts_in(state: &StateView<'_>, location: &Location) -> ColorCounts {
    let mut counts = ColorCounts::default();
    for color in VictimColor::ALL {
        let n = state.int(location.as_str(), &variables::victims(color));
        counts.set(color, u32::try_from(n).unwrap_or(0));
    }
    counts
}

fn location_in(state: &StateView<'_>, agent: &str) -> Option<Location> {
    state.text(agent, variables::LOCATION).map(Location::from)
}

fn discovery_values(counts: &ColorCounts, rules: &VictimRules) -> Distribution<Value> {
    let belief = discovery_distribution(counts, rules.none_weight);
    Distribution::from_weights(belief.outcomes().iter().map(|&(fov, p)| (fov_value(fov), p)))
        .unwrap_or_else(|| Distribution::certain(fov_value(Fov::Nothing)))
}

/// The step's action, if `agent` is the one taking it.
fn acting<'a>(ctx: &RuleContext<'a>, agent: &str) -> Option<&'a Action> {
    ctx.action.filter(|a| a.agent == agent)
}

/// Outcome of the acting agent's triage, evaluated against the current state.
fn triage_in(ctx: &RuleContext<'_>, rules: &VictimRules) -> Option<(Location, VictimColor, TriageOutcome)> {
    let action = ctx.action?;
    let ActionKind::Triage {
        color,
        attempt_seconds,
    } = &action.kind
    else {
        return None;
    };
    let at = location_in(&ctx.state, &action.agent)?;
    let counts = counts_in(&ctx.state, &at);
    let outcome = triage_outcome_at(&counts, *color, *attempt_seconds, ctx.clock, rules);
    Some((at, *color, outcome))
}

/// World state and dynamics for one mission.
pub struct RescueWorld {
    world: World,
    graph: Arc<LocationGraph>,
    rules: Arc<VictimRules>,
    agents: Vec<String>,
    /// Locations carrying victim count variables.
    places: Vec<Location>,
}

impl RescueWorld {
    /// Define every variable, seed victim counts, and register the dynamics.
    pub fn new(
        graph: Arc<LocationGraph>,
        victims: &VictimTable,
        rules: Arc<VictimRules>,
        agents: &[String],
    ) -> Result<Self, WorldError> {
        let mut world = World::new();

        let phase = world.define_variable(
            variables::WORLD,
            variables::PHASE,
            Domain::OneOf(
                MissionPhase::ALL
                    .iter()
                    .map(|p| Value::Text(p.to_string()))
                    .collect(),
            ),
        )?;
        world.set_value(&phase, Value::Text(mission_phase(0, &rules).to_string()))?;
        let r = rules.clone();
        world.register_transition(&phase, Trigger::Clock, move |ctx| {
            Distribution::certain(Value::Text(mission_phase(ctx.clock, &r).to_string()))
        })?;

        let places: Vec<Location> = graph
            .locations()
            .chain(victims.locations())
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        for location in &places {
            let counts = victims.counts_at(location);
            let max = i64::from(counts.total());
            for color in VictimColor::ALL {
                let key = world.define_variable(
                    location.as_str(),
                    &variables::victims(color),
                    Domain::Int { min: 0, max },
                )?;
                world.set_value(&key, Value::Int(i64::from(counts.get(color))))?;
                Self::register_victim_rules(&mut world, &key, location.clone(), color, &rules)?;
            }
        }

        let location_domain = Domain::OneOf(
            graph
                .locations()
                .map(|l| Value::Text(l.to_string()))
                .collect(),
        );
        for agent in agents {
            Self::define_agent(&mut world, agent, &graph, &rules, location_domain.clone())?;
        }

        Ok(Self {
            world,
            graph,
            rules,
            agents: agents.to_vec(),
            places,
        })
    }

    fn register_victim_rules(
        world: &mut World,
        key: &StateKey,
        location: Location,
        color: VictimColor,
        rules: &Arc<VictimRules>,
    ) -> Result<(), WorldError> {
        let (at, r) = (location.clone(), rules.clone());
        world.register_transition(key, Trigger::Clock, move |ctx| {
            let next = expire_counts(counts_in(&ctx.state, &at), ctx.clock, &r);
            Distribution::certain(Value::Int(i64::from(next.get(color))))
        })?;

        let r = rules.clone();
        world.register_transition(key, Trigger::Action(ActionVerb::Triage), move |ctx| {
            match triage_in(ctx, &r) {
                Some((at, target, TriageOutcome::Completed)) if at == location => {
                    let n = ctx.state.int(location.as_str(), &variables::victims(color));
                    if color == target && target.can_transition_to(VictimColor::White) {
                        Distribution::certain(Value::Int(n - 1))
                    } else if color == VictimColor::White {
                        Distribution::certain(Value::Int(n + 1))
                    } else {
                        ctx.unchanged()
                    }
                }
                _ => ctx.unchanged(),
            }
        })
    }

    fn define_agent(
        world: &mut World,
        agent: &str,
        graph: &LocationGraph,
        rules: &Arc<VictimRules>,
        location_domain: Domain,
    ) -> Result<(), WorldError> {
        let location = world.define_variable(agent, variables::LOCATION, location_domain)?;
        let who = agent.to_string();
        world.register_transition(&location, Trigger::Action(ActionVerb::Move), move |ctx| {
            match acting(ctx, &who).map(|a| &a.kind) {
                Some(ActionKind::Move { destination, .. }) => {
                    Distribution::certain(Value::Text(destination.to_string()))
                }
                _ => ctx.unchanged(),
            }
        })?;

        let fov = world.define_variable(agent, variables::FOV, fov_domain())?;
        let (who, r) = (agent.to_string(), rules.clone());
        world.register_transition(&fov, Trigger::Action(ActionVerb::Move), move |ctx| {
            match acting(ctx, &who).map(|a| &a.kind) {
                Some(ActionKind::Move { destination, .. }) => {
                    discovery_values(&counts_in(&ctx.state, destination), &r)
                }
                _ => ctx.unchanged(),
            }
        })?;
        let (who, r) = (agent.to_string(), rules.clone());
        world.register_transition(&fov, Trigger::Action(ActionVerb::Search), move |ctx| {
            match (acting(ctx, &who), location_in(&ctx.state, &who)) {
                (Some(_), Some(at)) => discovery_values(&counts_in(&ctx.state, &at), &r),
                _ => ctx.unchanged(),
            }
        })?;
        let (who, r) = (agent.to_string(), rules.clone());
        world.register_transition(&fov, Trigger::Action(ActionVerb::Triage), move |ctx| {
            if acting(ctx, &who).is_none() {
                return ctx.unchanged();
            }
            match triage_in(ctx, &r) {
                Some((_, _, TriageOutcome::Completed)) => {
                    Distribution::certain(fov_value(Fov::Victim(VictimColor::White)))
                }
                _ => ctx.unchanged(),
            }
        })?;
        world.register_transition(&fov, Trigger::Default, |_| {
            Distribution::certain(fov_value(Fov::Nothing))
        })?;

        for place in graph.locations() {
            let key = world.define_variable(
                agent,
                &variables::visits(place),
                Domain::Int { min: 0, max: i64::MAX },
            )?;
            let (who, place) = (agent.to_string(), place.clone());
            world.register_transition(&key, Trigger::Action(ActionVerb::Move), move |ctx| {
                match acting(ctx, &who).map(|a| &a.kind) {
                    Some(ActionKind::Move { destination, .. }) if *destination == place => {
                        Distribution::certain(Value::Int(ctx.current().as_int().unwrap_or(0) + 1))
                    }
                    _ => ctx.unchanged(),
                }
            })?;
        }

        world.define_variable(agent, variables::TRIAGE_IN_PROGRESS, Domain::Bool)?;
        world.define_variable(
            agent,
            variables::TRIAGE_RESULT,
            Domain::OneOf(vec![
                Value::from(variables::NO_RESULT),
                Value::from(triage_results::SUCCESSFUL),
                Value::from(triage_results::UNSUCCESSFUL),
            ]),
        )?;
        Ok(())
    }

    /// Check an action against the graph and victim legality rules.
    pub fn check_legal(&self, action: &Action) -> Result<(), IllegalAction> {
        if !self.agents.iter().any(|a| *a == action.agent) {
            return Err(IllegalAction::UnknownAgent(action.agent.clone()));
        }
        match &action.kind {
            ActionKind::Move {
                direction: Some(direction),
                destination,
            } => {
                let from = self
                    .agent_location(&action.agent)
                    .ok_or_else(|| IllegalAction::NotPlaced(action.agent.clone()))?;
                let actual = self
                    .graph
                    .neighbor(&from, *direction)
                    .ok_or_else(|| IllegalAction::NoNeighbor {
                        from: from.clone(),
                        direction: *direction,
                    })?;
                if actual != destination {
                    return Err(IllegalAction::WrongDestination {
                        from: from.clone(),
                        direction: *direction,
                        expected: destination.clone(),
                        actual: actual.clone(),
                    });
                }
                Ok(())
            }
            ActionKind::Move {
                direction: None,
                destination,
            } => {
                if self.graph.contains(destination) {
                    Ok(())
                } else {
                    Err(IllegalAction::UnknownLocation(destination.clone()))
                }
            }
            ActionKind::Search => Ok(()),
            ActionKind::Triage { color, .. } => {
                let fov = self.agent_fov(&action.agent).unwrap_or(Fov::Nothing);
                if triage_legal(fov, *color) {
                    Ok(())
                } else {
                    Err(IllegalAction::VictimNotInView { color: *color, fov })
                }
            }
        }
    }

    /// Step the world with an already-legal action. `observed_fov` pins the
    /// stochastic FOV outcome when the trace recorded one.
    pub fn apply(
        &mut self,
        action: &Action,
        observed_fov: Option<Fov>,
        rng: &mut dyn RngCore,
    ) -> Result<Vec<Change>, WorldError> {
        let mut observed = Observations::new();
        if let Some(fov) = observed_fov {
            observed.insert(StateKey::new(action.agent.as_str(), variables::FOV), fov_value(fov));
        }
        self.world.step(Some(action), &observed, rng)
    }

    /// Place an agent directly, with no prior state to transition from.
    /// The first placement counts as a visit. A given `fov` must be possible
    /// at `location`.
    pub fn place_agent(
        &mut self,
        agent: &str,
        location: &Location,
        fov: Option<Fov>,
    ) -> Result<(), WorldError> {
        self.world.set_value(
            &StateKey::new(agent, variables::LOCATION),
            Value::Text(location.to_string()),
        )?;
        let visits = StateKey::new(agent, variables::visits(location));
        let n = self
            .world
            .get_value(&visits)
            .and_then(Value::as_int)
            .unwrap_or(0);
        self.world.set_value(&visits, Value::Int(n + 1))?;

        let fov = fov.unwrap_or(Fov::Nothing);
        let key = StateKey::new(agent, variables::FOV);
        let belief = self.victim_table().discovery_at(location, &self.rules);
        reconcile(&fov, &belief).map_err(|source| WorldError::InconsistentObservation {
            key: key.clone(),
            source,
        })?;
        self.world.set_value(&key, fov_value(fov))
    }

    /// Assign an agent's flag variable (`triage_in_progress`, `triage_result`).
    pub fn set_flag(&mut self, agent: &str, variable: &str, value: Value) -> Result<(), WorldError> {
        self.world.set_value(&StateKey::new(agent, variable), value)
    }

    /// Advance the clock without an action.
    pub fn tick(&mut self, seconds: u32, rng: &mut dyn RngCore) -> Result<Vec<Change>, WorldError> {
        self.world.tick(seconds, rng)
    }

    pub fn agent_location(&self, agent: &str) -> Option<Location> {
        self.world
            .get_value(&StateKey::new(agent, variables::LOCATION))
            .and_then(Value::as_text)
            .map(Location::from)
    }

    pub fn agent_fov(&self, agent: &str) -> Option<Fov> {
        self.world
            .get_value(&StateKey::new(agent, variables::FOV))
            .and_then(Value::as_text)
            .and_then(|s| s.parse().ok())
    }

    pub fn visits(&self, agent: &str, location: &Location) -> i64 {
        self.world
            .get_value(&StateKey::new(agent, variables::visits(location)))
            .and_then(Value::as_int)
            .unwrap_or(0)
    }

    pub fn flag(&self, agent: &str, variable: &str) -> Option<&Value> {
        self.world.get_value(&StateKey::new(agent, variable))
    }

    pub fn phase(&self) -> Option<&str> {
        self.world
            .get_value(&StateKey::new(variables::WORLD, variables::PHASE))
            .and_then(Value::as_text)
    }

    /// Current victim counts, rebuilt from the world variables.
    pub fn victim_table(&self) -> VictimTable {
        let mut table = VictimTable::new();
        for location in &self.places {
            let mut counts = ColorCounts::default();
            for color in VictimColor::ALL {
                let n = self
                    .world
                    .get_value(&StateKey::new(location.as_str(), variables::victims(color)))
                    .and_then(Value::as_int)
                    .unwrap_or(0);
                counts.set(color, u32::try_from(n).unwrap_or(0));
            }
            if counts.total() > 0 {
                table.set_counts(location.clone(), counts);
            }
        }
        table
    }

    pub fn agents(&self) -> &[String] {
        &self.agents
    }

    pub fn graph(&self) -> &LocationGraph {
        &self.graph
    }

    pub fn rules(&self) -> &VictimRules {
        &self.rules
    }

    pub fn clock(&self) -> u32 {
        self.world.clock()
    }

    pub fn snapshot(&self) -> Snapshot {
        self.world.snapshot()
    }

    pub fn world(&self) -> &World {
        &self.world
    }
}
