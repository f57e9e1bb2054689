//! World container - keyed mutable state driven by registered transition rules.
//!
//! State is a map from `(owner, name)` keys to values with declared domains.
//! Dynamics are closures registered per key and per trigger. A step runs in
//! a fixed order:
//!
//! 1. advance the clock by the action's elapsed seconds
//! 2. clock rules (expiry, mission phase) against the current state
//! 3. action rules for the action's verb, against the post-clock state
//! 4. default rules for keys the action did not touch
//!
//! Rules within a phase all read the same pre-phase state and their results
//! are written together, so registration order never matters.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use rand::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use sartrace_logic::discovery::{reconcile, Distribution};
use sartrace_logic::InconsistentObservationError;

use crate::action::{Action, ActionVerb};

/// Key of one state variable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StateKey {
    pub owner: String,
    pub name: String,
}

impl StateKey {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for StateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.owner, self.name)
    }
}

/// A state value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Text(String),
}

impl Value {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Text(s) => f.write_str(s),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

/// Set of values a variable may hold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Domain {
    Bool,
    Int { min: i64, max: i64 },
    OneOf(Vec<Value>),
}

impl Domain {
    pub fn contains(&self, value: &Value) -> bool {
        match (self, value) {
            (Domain::Bool, Value::Bool(_)) => true,
            (Domain::Int { min, max }, Value::Int(i)) => min <= i && i <= max,
            (Domain::OneOf(values), v) => values.contains(v),
            _ => false,
        }
    }

    /// Value a freshly defined variable starts with.
    fn initial_value(&self) -> Option<Value> {
        match self {
            Domain::Bool => Some(Value::Bool(false)),
            Domain::Int { min, max } if min <= max => Some(Value::Int((*min).max(0).min(*max))),
            Domain::Int { .. } => None,
            Domain::OneOf(values) => values.first().cloned(),
        }
    }
}

/// When a transition rule fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Trigger {
    /// Every step and every clock tick, before any action rule.
    Clock,
    /// Steps carrying an action with this verb.
    Action(ActionVerb),
    /// Steps whose action has no rule for the key (including idle steps).
    Default,
}

/// Read-only view of the state handed to rules.
pub struct StateView<'a> {
    vars: &'a BTreeMap<StateKey, Variable>,
}

impl StateView<'_> {
    pub fn get(&self, key: &StateKey) -> Option<&Value> {
        self.vars.get(key).map(|v| &v.value)
    }

    pub fn int(&self, owner: &str, name: &str) -> i64 {
        self.get(&StateKey::new(owner, name))
            .and_then(Value::as_int)
            .unwrap_or(0)
    }

    pub fn text(&self, owner: &str, name: &str) -> Option<&str> {
        self.get(&StateKey::new(owner, name)).and_then(Value::as_text)
    }

    pub fn bool(&self, owner: &str, name: &str) -> bool {
        self.get(&StateKey::new(owner, name))
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

/// Everything a rule may look at.
pub struct RuleContext<'a> {
    pub state: StateView<'a>,
    pub key: &'a StateKey,
    pub action: Option<&'a Action>,
    pub clock: u32,
}

impl RuleContext<'_> {
    /// The key's current value.
    pub fn current(&self) -> Value {
        self.state
            .get(self.key)
            .cloned()
            .unwrap_or(Value::Bool(false))
    }

    /// A certain distribution on the current value.
    pub fn unchanged(&self) -> Distribution<Value> {
        Distribution::certain(self.current())
    }
}

/// A transition rule: the distribution of a key's next value.
pub type Rule = Box<dyn Fn(&RuleContext<'_>) -> Distribution<Value> + Send + Sync>;

/// Outcomes asserted by an observed trace, keyed by the variable they fix.
pub type Observations = BTreeMap<StateKey, Value>;

#[derive(Debug, Clone)]
struct Variable {
    domain: Domain,
    value: Value,
}

/// Errors raised by the world container.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum WorldError {
    #[error("unknown variable {0}")]
    UnknownVariable(StateKey),

    #[error("variable {0} already defined")]
    DuplicateVariable(StateKey),

    #[error("domain of {0} is empty")]
    EmptyDomain(StateKey),

    #[error("value {value} is outside the domain of {key}")]
    OutOfDomain { key: StateKey, value: Value },

    #[error("observation of {key} contradicts the model: {source}")]
    InconsistentObservation {
        key: StateKey,
        #[source]
        source: InconsistentObservationError,
    },
}

/// One variable that changed during a step.
#[derive(Debug, Clone, PartialEq)]
pub struct Change {
    pub key: StateKey,
    pub before: Value,
    pub after: Value,
}

/// Serializable copy of all state values at one point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub clock: u32,
    /// owner → name → value
    pub values: BTreeMap<String, BTreeMap<String, Value>>,
}

impl Snapshot {
    pub fn get(&self, owner: &str, name: &str) -> Option<&Value> {
        self.values.get(owner).and_then(|vars| vars.get(name))
    }
}

/// Keyed world state plus its transition rules and mission clock.
#[derive(Default)]
pub struct World {
    vars: BTreeMap<StateKey, Variable>,
    rules: BTreeMap<Trigger, BTreeMap<StateKey, Rule>>,
    clock: u32,
}

impl World {
    /// Create an empty world at clock 0
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a variable. It starts at its domain's first value (false, the
    /// int closest to zero, or the first listed value).
    pub fn define_variable(
        &mut self,
        owner: &str,
        name: &str,
        domain: Domain,
    ) -> Result<StateKey, WorldError> {
        let key = StateKey::new(owner, name);
        if self.vars.contains_key(&key) {
            return Err(WorldError::DuplicateVariable(key));
        }
        let value = domain
            .initial_value()
            .ok_or_else(|| WorldError::EmptyDomain(key.clone()))?;
        self.vars.insert(key.clone(), Variable { domain, value });
        Ok(key)
    }

    /// Assign a value directly, checking it against the declared domain.
    pub fn set_value(&mut self, key: &StateKey, value: Value) -> Result<(), WorldError> {
        let var = self
            .vars
            .get_mut(key)
            .ok_or_else(|| WorldError::UnknownVariable(key.clone()))?;
        if !var.domain.contains(&value) {
            return Err(WorldError::OutOfDomain {
                key: key.clone(),
                value,
            });
        }
        var.value = value;
        Ok(())
    }

    pub fn get_value(&self, key: &StateKey) -> Option<&Value> {
        self.vars.get(key).map(|v| &v.value)
    }

    pub fn domain(&self, key: &StateKey) -> Option<&Domain> {
        self.vars.get(key).map(|v| &v.domain)
    }

    /// Register the rule computing `key`'s next value under `trigger`.
    /// Registering twice for the same key and trigger replaces the rule.
    pub fn register_transition<F>(
        &mut self,
        key: &StateKey,
        trigger: Trigger,
        rule: F,
    ) -> Result<(), WorldError>
    where
        F: Fn(&RuleContext<'_>) -> Distribution<Value> + Send + Sync + 'static,
    {
        if !self.vars.contains_key(key) {
            return Err(WorldError::UnknownVariable(key.clone()));
        }
        self.rules
            .entry(trigger)
            .or_default()
            .insert(key.clone(), Box::new(rule));
        Ok(())
    }

    /// Advance the clock and apply clock rules, without any action.
    pub fn tick(&mut self, seconds: u32, rng: &mut dyn RngCore) -> Result<Vec<Change>, WorldError> {
        self.clock = self.clock.saturating_add(seconds);
        let updates = self.evaluate(Trigger::Clock, None, &BTreeSet::new(), &Observations::new(), rng)?;
        self.apply(updates)
    }

    /// Advance the world by one action (or an idle step with `None`).
    ///
    /// Stochastic rules resolve to the asserted value in `observed` when one
    /// is given for their key, and are sampled from `rng` otherwise.
    pub fn step(
        &mut self,
        action: Option<&Action>,
        observed: &Observations,
        rng: &mut dyn RngCore,
    ) -> Result<Vec<Change>, WorldError> {
        let mut changes = self.tick(action.map_or(0, |a| a.elapsed), rng)?;

        let mut updates = Vec::new();
        let mut touched = BTreeSet::new();
        if let Some(a) = action {
            let trigger = Trigger::Action(a.verb());
            updates = self.evaluate(trigger, action, &BTreeSet::new(), observed, rng)?;
            if let Some(rules) = self.rules.get(&trigger) {
                touched.extend(rules.keys().cloned());
            }
        }
        updates.extend(self.evaluate(Trigger::Default, action, &touched, observed, rng)?);

        changes.extend(self.apply(updates)?);
        Ok(changes)
    }

    fn evaluate(
        &self,
        trigger: Trigger,
        action: Option<&Action>,
        skip: &BTreeSet<StateKey>,
        observed: &Observations,
        rng: &mut dyn RngCore,
    ) -> Result<Vec<(StateKey, Value)>, WorldError> {
        let Some(rules) = self.rules.get(&trigger) else {
            return Ok(Vec::new());
        };
        let mut updates = Vec::with_capacity(rules.len());
        for (key, rule) in rules {
            if skip.contains(key) {
                continue;
            }
            let ctx = RuleContext {
                state: StateView { vars: &self.vars },
                key,
                action,
                clock: self.clock,
            };
            let next = rule(&ctx);
            let value = match observed.get(key) {
                Some(obs) => {
                    reconcile(obs, &next).map_err(|source| WorldError::InconsistentObservation {
                        key: key.clone(),
                        source,
                    })?;
                    obs.clone()
                }
                None => match next.as_certain() {
                    Some(v) => v.clone(),
                    None => next.sample(rng),
                },
            };
            updates.push((key.clone(), value));
        }
        Ok(updates)
    }

    fn apply(&mut self, updates: Vec<(StateKey, Value)>) -> Result<Vec<Change>, WorldError> {
        // Validate everything first so a failed step leaves the state untouched.
        for (key, value) in &updates {
            let domain = self
                .domain(key)
                .ok_or_else(|| WorldError::UnknownVariable(key.clone()))?;
            if !domain.contains(value) {
                return Err(WorldError::OutOfDomain {
                    key: key.clone(),
                    value: value.clone(),
                });
            }
        }
        let mut changes = Vec::new();
        for (key, value) in updates {
            if let Some(var) = self.vars.get_mut(&key) {
                if var.value != value {
                    changes.push(Change {
                        key,
                        before: std::mem::replace(&mut var.value, value.clone()),
                        after: value,
                    });
                }
            }
        }
        Ok(changes)
    }

    /// Current mission clock in seconds
    pub fn clock(&self) -> u32 {
        self.clock
    }

    /// Number of defined variables
    pub fn variable_count(&self) -> usize {
        self.vars.len()
    }

    /// Copy all current values
    pub fn snapshot(&self) -> Snapshot {
        let mut values: BTreeMap<String, BTreeMap<String, Value>> = BTreeMap::new();
        for (key, var) in &self.vars {
            values
                .entry(key.owner.clone())
                .or_default()
                .insert(key.name.clone(), var.value.clone());
        }
        Snapshot {
            clock: self.clock,
            values,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ActionKind;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn rng() -> ChaCha8Rng {
        ChaCha8Rng::seed_from_u64(0)
    }

    #[test]
    fn test_world_creation() {
        let world = World::new();
        assert_eq!(world.clock(), 0);
        assert_eq!(world.variable_count(), 0);
    }

    #[test]
    fn test_define_and_set() {
        let mut world = World::new();
        let key = world
            .define_variable("a", "count", Domain::Int { min: 0, max: 3 })
            .unwrap();
        assert_eq!(world.get_value(&key), Some(&Value::Int(0)));
        world.set_value(&key, Value::Int(2)).unwrap();
        assert_eq!(world.get_value(&key), Some(&Value::Int(2)));
        let err = world.set_value(&key, Value::Int(4)).unwrap_err();
        assert!(matches!(err, WorldError::OutOfDomain { .. }));
        assert!(matches!(
            world.set_value(&key, Value::Bool(true)),
            Err(WorldError::OutOfDomain { .. })
        ));
    }

    #[test]
    fn test_duplicate_and_unknown() {
        let mut world = World::new();
        world.define_variable("a", "x", Domain::Bool).unwrap();
        assert!(matches!(
            world.define_variable("a", "x", Domain::Bool),
            Err(WorldError::DuplicateVariable(_))
        ));
        let missing = StateKey::new("a", "y");
        assert!(matches!(
            world.set_value(&missing, Value::Bool(true)),
            Err(WorldError::UnknownVariable(_))
        ));
        assert!(world
            .register_transition(&missing, Trigger::Default, |ctx| ctx.unchanged())
            .is_err());
    }

    #[test]
    fn test_empty_domain_rejected() {
        let mut world = World::new();
        assert!(matches!(
            world.define_variable("a", "x", Domain::OneOf(vec![])),
            Err(WorldError::EmptyDomain(_))
        ));
    }

    #[test]
    fn test_default_rule_fires_on_idle_step() {
        let mut world = World::new();
        let key = world
            .define_variable("a", "seen", Domain::OneOf(vec!["none".into(), "x".into()]))
            .unwrap();
        world.set_value(&key, "x".into()).unwrap();
        world
            .register_transition(&key, Trigger::Default, |_| {
                Distribution::certain(Value::from("none"))
            })
            .unwrap();
        let changes = world.step(None, &Observations::new(), &mut rng()).unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(world.get_value(&key), Some(&Value::from("none")));
    }

    #[test]
    fn test_action_rule_overrides_default() {
        let mut world = World::new();
        let key = world
            .define_variable("a", "seen", Domain::OneOf(vec!["none".into(), "x".into()]))
            .unwrap();
        world
            .register_transition(&key, Trigger::Default, |_| {
                Distribution::certain(Value::from("none"))
            })
            .unwrap();
        world
            .register_transition(&key, Trigger::Action(ActionVerb::Search), |_| {
                Distribution::certain(Value::from("x"))
            })
            .unwrap();
        let search = Action::new("a", ActionKind::Search, 0);
        world
            .step(Some(&search), &Observations::new(), &mut rng())
            .unwrap();
        assert_eq!(world.get_value(&key), Some(&Value::from("x")));
    }

    #[test]
    fn test_clock_rules_run_before_action_rules() {
        let mut world = World::new();
        let stock = world
            .define_variable("r", "stock", Domain::Int { min: 0, max: 1 })
            .unwrap();
        let taken = world.define_variable("a", "taken", Domain::Bool).unwrap();
        world.set_value(&stock, Value::Int(1)).unwrap();
        // Stock spoils at clock 10.
        world
            .register_transition(&stock, Trigger::Clock, |ctx| {
                if ctx.clock >= 10 {
                    Distribution::certain(Value::Int(0))
                } else {
                    ctx.unchanged()
                }
            })
            .unwrap();
        world
            .register_transition(&taken, Trigger::Action(ActionVerb::Search), |ctx| {
                Distribution::certain(Value::Bool(ctx.state.int("r", "stock") > 0))
            })
            .unwrap();
        let search = Action::new("a", ActionKind::Search, 10);
        world
            .step(Some(&search), &Observations::new(), &mut rng())
            .unwrap();
        assert_eq!(world.clock(), 10);
        assert_eq!(world.get_value(&taken), Some(&Value::Bool(false)));
    }

    #[test]
    fn test_rules_read_pre_phase_state() {
        let mut world = World::new();
        let a = world.define_variable("x", "a", Domain::Int { min: 0, max: 9 }).unwrap();
        let b = world.define_variable("x", "b", Domain::Int { min: 0, max: 9 }).unwrap();
        world.set_value(&a, Value::Int(1)).unwrap();
        world
            .register_transition(&a, Trigger::Default, |ctx| {
                Distribution::certain(Value::Int(ctx.state.int("x", "a") + 1))
            })
            .unwrap();
        world
            .register_transition(&b, Trigger::Default, |ctx| {
                Distribution::certain(Value::Int(ctx.state.int("x", "a")))
            })
            .unwrap();
        world.step(None, &Observations::new(), &mut rng()).unwrap();
        assert_eq!(world.get_value(&a), Some(&Value::Int(2)));
        assert_eq!(world.get_value(&b), Some(&Value::Int(1)));
    }

    #[test]
    fn test_observation_resolves_stochastic_rule() {
        let mut world = World::new();
        let key = world
            .define_variable("a", "coin", Domain::OneOf(vec!["h".into(), "t".into()]))
            .unwrap();
        world
            .register_transition(&key, Trigger::Default, |_| {
                Distribution::from_weights(vec![(Value::from("h"), 1.0), (Value::from("t"), 1.0)])
                    .unwrap()
            })
            .unwrap();
        let observed = Observations::from([(key.clone(), Value::from("t"))]);
        world.step(None, &observed, &mut rng()).unwrap();
        assert_eq!(world.get_value(&key), Some(&Value::from("t")));
    }

    #[test]
    fn test_impossible_observation_leaves_state() {
        let mut world = World::new();
        let key = world
            .define_variable("a", "coin", Domain::OneOf(vec!["h".into(), "t".into()]))
            .unwrap();
        world
            .register_transition(&key, Trigger::Default, |_| {
                Distribution::certain(Value::from("h"))
            })
            .unwrap();
        let observed = Observations::from([(key.clone(), Value::from("t"))]);
        let err = world.step(None, &observed, &mut rng()).unwrap_err();
        assert!(matches!(err, WorldError::InconsistentObservation { .. }));
        assert_eq!(world.get_value(&key), Some(&Value::from("h")));
    }

    #[test]
    fn test_snapshot() {
        let mut world = World::new();
        let key = world.define_variable("a", "flag", Domain::Bool).unwrap();
        world.set_value(&key, Value::Bool(true)).unwrap();
        world.tick(5, &mut rng()).unwrap();
        let snap = world.snapshot();
        assert_eq!(snap.clock, 5);
        assert_eq!(snap.get("a", "flag"), Some(&Value::Bool(true)));
        assert_eq!(snap.get("a", "missing"), None);
    }
}
