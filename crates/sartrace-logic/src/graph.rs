//! Directional location graph.
//!
//! `LocationGraph` holds four direction maps (N, E, S, W) built once from
//! adjacency configuration, kept symmetric, and immutable afterward. Route
//! lookup is deliberately bounded to two hops: consecutive telemetry samples
//! are local moves, so anything further apart is reported as unreachable.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;

/// Opaque location identifier (a room or area name).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Location(String);

impl Location {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Location {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for Location {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Compass direction of a move between adjacent locations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Direction {
    North,
    East,
    South,
    West,
}

impl Direction {
    /// All directions in lookup order. Route search tries them in this order,
    /// which makes tie-breaking between equal-length routes deterministic.
    pub const ALL: [Direction; 4] = [
        Direction::North,
        Direction::East,
        Direction::South,
        Direction::West,
    ];

    pub fn opposite(self) -> Self {
        match self {
            Direction::North => Direction::South,
            Direction::East => Direction::West,
            Direction::South => Direction::North,
            Direction::West => Direction::East,
        }
    }

    fn index(self) -> usize {
        match self {
            Direction::North => 0,
            Direction::East => 1,
            Direction::South => 2,
            Direction::West => 3,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Direction::North => "N",
            Direction::East => "E",
            Direction::South => "S",
            Direction::West => "W",
        };
        f.write_str(s)
    }
}

impl FromStr for Direction {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "n" | "north" => Ok(Direction::North),
            "e" | "east" => Ok(Direction::East),
            "s" | "south" => Ok(Direction::South),
            "w" | "west" => Ok(Direction::West),
            _ => Err(ConfigurationError::InvalidDirection(s.to_string())),
        }
    }
}

/// A single declared edge: moving `direction` from `origin` reaches `destination`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    pub origin: Location,
    pub direction: Direction,
    pub destination: Location,
}

impl Edge {
    pub fn new(origin: &str, direction: Direction, destination: &str) -> Self {
        Self {
            origin: Location::from(origin),
            direction,
            destination: Location::from(destination),
        }
    }
}

/// Adjacency configuration as it appears in scenario files.
///
/// Either a list of `[origin, direction, destination]` triples or a
/// `{origin: {direction: destination}}` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AdjacencySpec {
    Triples(Vec<(String, String, String)>),
    Table(BTreeMap<String, BTreeMap<String, String>>),
}

impl AdjacencySpec {
    /// Parse directions and flatten into edges, in declaration order.
    pub fn edges(&self) -> Result<Vec<Edge>, ConfigurationError> {
        let mut edges = Vec::new();
        match self {
            AdjacencySpec::Triples(triples) => {
                for (origin, direction, destination) in triples {
                    edges.push(Edge {
                        origin: Location::from(origin.as_str()),
                        direction: direction.parse()?,
                        destination: Location::from(destination.as_str()),
                    });
                }
            }
            AdjacencySpec::Table(table) => {
                for (origin, dirs) in table {
                    for (direction, destination) in dirs {
                        edges.push(Edge {
                            origin: Location::from(origin.as_str()),
                            direction: direction.parse()?,
                            destination: Location::from(destination.as_str()),
                        });
                    }
                }
            }
        }
        Ok(edges)
    }
}

/// Symmetric directional adjacency over a fixed set of locations.
#[derive(Debug, Clone, Default)]
pub struct LocationGraph {
    /// Indexed by `Direction::index`: origin → neighbor in that direction.
    nbrs: [BTreeMap<Location, Location>; 4],
    locations: BTreeSet<Location>,
}

impl LocationGraph {
    /// Build a graph from adjacency configuration.
    pub fn build(spec: &AdjacencySpec) -> Result<Self, ConfigurationError> {
        Self::from_edges(&spec.edges()?)
    }

    /// Build a graph from parsed edges. Every edge also installs its reverse;
    /// a declaration that contradicts an earlier one (explicitly or through
    /// its reverse) is rejected.
    pub fn from_edges(edges: &[Edge]) -> Result<Self, ConfigurationError> {
        let mut graph = Self::default();
        for edge in edges {
            if edge.origin == edge.destination {
                return Err(ConfigurationError::SelfLoop(edge.origin.clone()));
            }
            graph.link(&edge.origin, edge.direction, &edge.destination)?;
            graph.link(&edge.destination, edge.direction.opposite(), &edge.origin)?;
            graph.locations.insert(edge.origin.clone());
            graph.locations.insert(edge.destination.clone());
        }
        Ok(graph)
    }

    fn link(
        &mut self,
        origin: &Location,
        direction: Direction,
        destination: &Location,
    ) -> Result<(), ConfigurationError> {
        let map = &mut self.nbrs[direction.index()];
        match map.get(origin) {
            Some(existing) if existing != destination => Err(ConfigurationError::ConflictingEdge {
                origin: origin.clone(),
                direction,
                existing: existing.clone(),
                requested: destination.clone(),
            }),
            Some(_) => Ok(()),
            None => {
                map.insert(origin.clone(), destination.clone());
                Ok(())
            }
        }
    }

    /// Register a location that has no declared edges (an isolated room).
    pub fn insert_location(&mut self, location: Location) {
        self.locations.insert(location);
    }

    /// Whether moving `direction` from `location` is possible.
    pub fn is_legal_move(&self, location: &Location, direction: Direction) -> bool {
        self.neighbor(location, direction).is_some()
    }

    /// The neighbor of `location` in `direction`, or `None` if there is none.
    pub fn neighbor(&self, location: &Location, direction: Direction) -> Option<&Location> {
        self.nbrs[direction.index()].get(location)
    }

    /// All (direction, neighbor) pairs of a location, in N/E/S/W order.
    pub fn neighbors(&self, location: &Location) -> Vec<(Direction, &Location)> {
        Direction::ALL
            .iter()
            .filter_map(|&d| self.neighbor(location, d).map(|n| (d, n)))
            .collect()
    }

    /// Directions connecting `src` to `dest` in at most two hops.
    ///
    /// Returns an empty vec if `src == dest` and `None` if unreachable within
    /// two hops.
    pub fn shortest_direction(&self, src: &Location, dest: &Location) -> Option<Vec<Direction>> {
        self.shortest_route(src, dest)
            .map(|route| route.into_iter().map(|(d, _)| d).collect())
    }

    /// Like [`shortest_direction`](Self::shortest_direction), but each hop
    /// also carries the location it lands on.
    pub fn shortest_route(
        &self,
        src: &Location,
        dest: &Location,
    ) -> Option<Vec<(Direction, Location)>> {
        if src == dest {
            return Some(vec![]);
        }

        for d in Direction::ALL {
            if self.neighbor(src, d) == Some(dest) {
                return Some(vec![(d, dest.clone())]);
            }
        }

        for first in Direction::ALL {
            let Some(middle) = self.neighbor(src, first) else {
                continue;
            };
            for second in Direction::ALL {
                if self.neighbor(middle, second) == Some(dest) {
                    return Some(vec![(first, middle.clone()), (second, dest.clone())]);
                }
            }
        }

        None
    }

    /// Check if a location exists in the graph.
    pub fn contains(&self, location: &Location) -> bool {
        self.locations.contains(location)
    }

    /// All known locations, sorted.
    pub fn locations(&self) -> impl Iterator<Item = &Location> {
        self.locations.iter()
    }

    /// Number of locations in the graph.
    pub fn location_count(&self) -> usize {
        self.locations.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loc(s: &str) -> Location {
        Location::from(s)
    }

    fn corridor() -> LocationGraph {
        // R1 -E-> R2 -E-> R3, R2 -S-> R4
        LocationGraph::from_edges(&[
            Edge::new("R1", Direction::East, "R2"),
            Edge::new("R2", Direction::East, "R3"),
            Edge::new("R2", Direction::South, "R4"),
        ])
        .unwrap()
    }

    #[test]
    fn test_reverse_edges_installed() {
        let g = corridor();
        assert_eq!(g.neighbor(&loc("R2"), Direction::West), Some(&loc("R1")));
        assert_eq!(g.neighbor(&loc("R4"), Direction::North), Some(&loc("R2")));
        assert_eq!(g.location_count(), 4);
    }

    #[test]
    fn test_is_legal_move() {
        let g = corridor();
        assert!(g.is_legal_move(&loc("R1"), Direction::East));
        assert!(!g.is_legal_move(&loc("R1"), Direction::North));
        assert!(!g.is_legal_move(&loc("nowhere"), Direction::East));
    }

    #[test]
    fn test_same_location() {
        let g = corridor();
        assert_eq!(g.shortest_direction(&loc("R1"), &loc("R1")), Some(vec![]));
    }

    #[test]
    fn test_adjacent() {
        let g = corridor();
        assert_eq!(
            g.shortest_direction(&loc("R1"), &loc("R2")),
            Some(vec![Direction::East])
        );
    }

    #[test]
    fn test_two_hops() {
        let g = corridor();
        assert_eq!(
            g.shortest_direction(&loc("R1"), &loc("R4")),
            Some(vec![Direction::East, Direction::South])
        );
        let route = g.shortest_route(&loc("R3"), &loc("R1")).unwrap();
        assert_eq!(route[0], (Direction::West, loc("R2")));
        assert_eq!(route[1], (Direction::West, loc("R1")));
    }

    #[test]
    fn test_three_hops_unreachable() {
        // R1 - R2 - R3 - R5: R5 is three hops from R1
        let g = LocationGraph::from_edges(&[
            Edge::new("R1", Direction::East, "R2"),
            Edge::new("R2", Direction::East, "R3"),
            Edge::new("R3", Direction::East, "R5"),
        ])
        .unwrap();
        assert_eq!(g.shortest_direction(&loc("R1"), &loc("R5")), None);
        assert!(g.shortest_direction(&loc("R2"), &loc("R5")).is_some());
    }

    #[test]
    fn test_conflicting_edge_rejected() {
        let err = LocationGraph::from_edges(&[
            Edge::new("R1", Direction::East, "R2"),
            Edge::new("R1", Direction::East, "R3"),
        ])
        .unwrap_err();
        assert!(matches!(err, ConfigurationError::ConflictingEdge { .. }));
    }

    #[test]
    fn test_conflicting_reverse_rejected() {
        // R3 -W-> R2 implies R2 -E-> R3, contradicting R2 -E-> R4
        let err = LocationGraph::from_edges(&[
            Edge::new("R2", Direction::East, "R4"),
            Edge::new("R3", Direction::West, "R2"),
        ])
        .unwrap_err();
        assert!(matches!(err, ConfigurationError::ConflictingEdge { .. }));
    }

    #[test]
    fn test_duplicate_declaration_accepted() {
        let g = LocationGraph::from_edges(&[
            Edge::new("R1", Direction::East, "R2"),
            Edge::new("R2", Direction::West, "R1"),
        ])
        .unwrap();
        assert_eq!(g.neighbors(&loc("R1")).len(), 1);
    }

    #[test]
    fn test_self_loop_rejected() {
        let err = LocationGraph::from_edges(&[Edge::new("R1", Direction::East, "R1")]).unwrap_err();
        assert_eq!(err, ConfigurationError::SelfLoop(loc("R1")));
    }

    #[test]
    fn test_invalid_direction() {
        let spec = AdjacencySpec::Triples(vec![("R1".into(), "up".into(), "R2".into())]);
        assert_eq!(
            LocationGraph::build(&spec).unwrap_err(),
            ConfigurationError::InvalidDirection("up".into())
        );
    }

    #[test]
    fn test_table_and_triples_agree() {
        let triples = AdjacencySpec::Triples(vec![
            ("R1".into(), "E".into(), "R2".into()),
            ("R2".into(), "south".into(), "R4".into()),
        ]);
        let mut table = BTreeMap::new();
        table.insert(
            "R1".to_string(),
            BTreeMap::from([("E".to_string(), "R2".to_string())]),
        );
        table.insert(
            "R2".to_string(),
            BTreeMap::from([("S".to_string(), "R4".to_string())]),
        );
        let a = LocationGraph::build(&triples).unwrap();
        let b = LocationGraph::build(&AdjacencySpec::Table(table)).unwrap();
        for l in a.locations() {
            assert_eq!(a.neighbors(l), b.neighbors(l));
        }
    }

    #[test]
    fn test_spec_deserializes_both_forms() {
        let triples: AdjacencySpec = serde_json::from_str(r#"[["R1","E","R2"]]"#).unwrap();
        assert!(matches!(triples, AdjacencySpec::Triples(_)));
        let table: AdjacencySpec = serde_json::from_str(r#"{"R1":{"E":"R2"}}"#).unwrap();
        assert!(matches!(table, AdjacencySpec::Table(_)));
    }

    #[test]
    fn test_isolated_location() {
        let mut g = corridor();
        g.insert_location(loc("R9"));
        assert!(g.contains(&loc("R9")));
        assert!(g.neighbors(&loc("R9")).is_empty());
        assert_eq!(g.shortest_direction(&loc("R1"), &loc("R9")), None);
    }

    #[test]
    fn test_direction_parse_and_display() {
        for d in Direction::ALL {
            assert_eq!(d.to_string().parse::<Direction>().unwrap(), d);
            assert_eq!(d.opposite().opposite(), d);
        }
        assert_eq!("West".parse::<Direction>().unwrap(), Direction::West);
    }
}
