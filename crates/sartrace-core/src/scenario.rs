//! Scenario configuration: graph, victim placement, rules, and agents,
//! loaded from JSON and validated before any telemetry is touched.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use sartrace_logic::graph::{AdjacencySpec, Location, LocationGraph};
use sartrace_logic::rules::{validate_rules, VictimRules};
use sartrace_logic::victims::{VictimSpec, VictimTable};
use sartrace_logic::ConfigurationError;

use crate::dynamics::RescueWorld;
use crate::parser::ParserConfig;
use crate::world::WorldError;

/// Seed used when a scenario names none.
pub const DEFAULT_SEED: u64 = 0;

#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("cannot read scenario {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid scenario JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigurationError),

    #[error("invalid rules: {}", .0.iter().map(|e| e.to_string()).collect::<Vec<_>>().join("; "))]
    InvalidRules(Vec<ConfigurationError>),

    #[error("scenario names {0} agent(s) but no locations")]
    NoLocations(usize),
}

fn no_victims() -> VictimSpec {
    VictimSpec::Table(BTreeMap::new())
}

/// Scenario file contents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioConfig {
    pub adjacency: AdjacencySpec,
    /// Locations with no neighbors, on top of those the adjacency names.
    #[serde(default)]
    pub locations: Vec<String>,
    #[serde(default = "no_victims")]
    pub victims: VictimSpec,
    #[serde(default)]
    pub rules: VictimRules,
    #[serde(default)]
    pub agents: Vec<String>,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub parser: ParserConfig,
}

impl ScenarioConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ScenarioError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_path(path: &Path) -> Result<Self, ScenarioError> {
        let text = std::fs::read_to_string(path).map_err(|source| ScenarioError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    /// Build the graph and victim table and validate the rules.
    pub fn build(&self) -> Result<Scenario, ScenarioError> {
        let mut graph = LocationGraph::build(&self.adjacency)?;
        for name in &self.locations {
            graph.insert_location(Location::from(name.as_str()));
        }
        if !self.agents.is_empty() && graph.location_count() == 0 {
            return Err(ScenarioError::NoLocations(self.agents.len()));
        }

        let errors = validate_rules(&self.rules);
        if !errors.is_empty() {
            return Err(ScenarioError::InvalidRules(errors));
        }

        let victims = VictimTable::from_spec(&self.victims, &graph)?;
        log::info!(
            "scenario: {} locations, {} victims, {} agents",
            graph.location_count(),
            victims.totals_by_color().total(),
            self.agents.len()
        );

        Ok(Scenario {
            graph: Arc::new(graph),
            victims,
            rules: Arc::new(self.rules.clone()),
            agents: self.agents.clone(),
            seed: self.seed.unwrap_or(DEFAULT_SEED),
            parser: self.parser.clone(),
        })
    }
}

/// A validated scenario. Cheap to share across threads; every file gets its
/// own [`RescueWorld`] built from it.
#[derive(Debug, Clone)]
pub struct Scenario {
    pub graph: Arc<LocationGraph>,
    pub victims: VictimTable,
    pub rules: Arc<VictimRules>,
    pub agents: Vec<String>,
    pub seed: u64,
    pub parser: ParserConfig,
}

impl Scenario {
    /// A fresh world modelling `agents`.
    pub fn world(&self, agents: &[String]) -> Result<RescueWorld, WorldError> {
        RescueWorld::new(self.graph.clone(), &self.victims, self.rules.clone(), agents)
    }

    /// Parser settings for one agent.
    pub fn parser_for(&self, agent: &str) -> ParserConfig {
        ParserConfig {
            agent: agent.to_string(),
            ..self.parser.clone()
        }
    }
}
