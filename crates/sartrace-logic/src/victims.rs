//! Victim lifecycle: per-location color counts, triage, expiry, and search.
//!
//! Colors only ever move one way: Green or Gold become Red when they expire
//! and White when triaged. Both transitions move mass between color buckets
//! of one location, so the per-location total never changes.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::discovery::{discovery_distribution, reconcile, Distribution};
use crate::error::{ConfigurationError, InconsistentObservationError};
use crate::graph::{Location, LocationGraph};
use crate::rules::VictimRules;

/// Victim color. Green and Gold are alive; Red is expired; White is saved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum VictimColor {
    Green,
    Gold,
    Red,
    White,
}

impl VictimColor {
    pub const ALL: [VictimColor; 4] = [
        VictimColor::Green,
        VictimColor::Gold,
        VictimColor::Red,
        VictimColor::White,
    ];

    /// Alive colors can be triaged and can expire.
    pub fn is_alive(self) -> bool {
        matches!(self, VictimColor::Green | VictimColor::Gold)
    }

    /// Whether `self → next` is one of the legal lifecycle transitions.
    pub fn can_transition_to(self, next: VictimColor) -> bool {
        self.is_alive() && matches!(next, VictimColor::Red | VictimColor::White)
    }

    fn index(self) -> usize {
        match self {
            VictimColor::Green => 0,
            VictimColor::Gold => 1,
            VictimColor::Red => 2,
            VictimColor::White => 3,
        }
    }
}

impl fmt::Display for VictimColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VictimColor::Green => "Green",
            VictimColor::Gold => "Gold",
            VictimColor::Red => "Red",
            VictimColor::White => "White",
        };
        f.write_str(s)
    }
}

impl FromStr for VictimColor {
    type Err = ConfigurationError;

    /// Accepts color names case-insensitively. "Yellow" is the name some
    /// telemetry sources use for Gold.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "green" => Ok(VictimColor::Green),
            "gold" | "yellow" => Ok(VictimColor::Gold),
            "red" => Ok(VictimColor::Red),
            "white" => Ok(VictimColor::White),
            _ => Err(ConfigurationError::InvalidColor(s.to_string())),
        }
    }
}

/// What an agent currently perceives at its location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Fov {
    Nothing,
    Victim(VictimColor),
}

impl Fov {
    pub fn color(self) -> Option<VictimColor> {
        match self {
            Fov::Nothing => None,
            Fov::Victim(c) => Some(c),
        }
    }
}

impl fmt::Display for Fov {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fov::Nothing => f.write_str("none"),
            Fov::Victim(c) => c.fmt(f),
        }
    }
}

impl FromStr for Fov {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let t = s.trim();
        if t.is_empty() || t.eq_ignore_ascii_case("none") {
            Ok(Fov::Nothing)
        } else {
            t.parse().map(Fov::Victim)
        }
    }
}

/// Victim counts at a single location, one bucket per color.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColorCounts([u32; 4]);

impl ColorCounts {
    pub fn get(&self, color: VictimColor) -> u32 {
        self.0[color.index()]
    }

    pub fn set(&mut self, color: VictimColor, count: u32) {
        self.0[color.index()] = count;
    }

    pub fn add(&mut self, color: VictimColor, count: u32) {
        self.0[color.index()] += count;
    }

    pub fn total(&self) -> u32 {
        self.0.iter().sum()
    }

    /// (color, count) pairs in Green/Gold/Red/White order.
    pub fn iter(&self) -> impl Iterator<Item = (VictimColor, u32)> + '_ {
        VictimColor::ALL.iter().map(move |&c| (c, self.get(c)))
    }
}

/// Result of applying a triage action for some elapsed duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriageOutcome {
    /// Duration met the threshold: one victim moved to White.
    Completed,
    /// Still below the threshold. No count change.
    InProgress,
    /// No victim of that color remains here (never present, or expired).
    NoVictim,
    /// The color has no triage threshold (Red or White).
    NotTriageable,
}

/// Decide what a triage of `color` lasting `duration_elapsed` seconds does,
/// given the counts at the agent's location.
pub fn triage_outcome(
    counts: &ColorCounts,
    color: VictimColor,
    duration_elapsed: f64,
    rules: &VictimRules,
) -> TriageOutcome {
    let Some(threshold) = rules.triage_threshold(color) else {
        return TriageOutcome::NotTriageable;
    };
    if !color.can_transition_to(VictimColor::White) {
        return TriageOutcome::NotTriageable;
    }
    if counts.get(color) == 0 {
        TriageOutcome::NoVictim
    } else if duration_elapsed >= f64::from(threshold) {
        TriageOutcome::Completed
    } else {
        TriageOutcome::InProgress
    }
}

/// Outcome of a triage attempt that starts at `start_clock`. The attempt
/// completes `threshold` seconds later; any color that has expired by that
/// tick is gone before the attempt can be credited.
pub fn triage_outcome_at(
    counts: &ColorCounts,
    color: VictimColor,
    duration_elapsed: f64,
    start_clock: u32,
    rules: &VictimRules,
) -> TriageOutcome {
    let counts = match rules.triage_threshold(color) {
        Some(threshold) => expire_counts(*counts, start_clock.saturating_add(threshold), rules),
        None => *counts,
    };
    triage_outcome(&counts, color, duration_elapsed, rules)
}

/// Apply clock-driven expiry to one location's counts: every alive color
/// whose threshold has been reached moves its remaining count to Red.
pub fn expire_counts(counts: ColorCounts, clock: u32, rules: &VictimRules) -> ColorCounts {
    let mut next = counts;
    for color in VictimColor::ALL {
        if !color.can_transition_to(VictimColor::Red) {
            continue;
        }
        let Some(threshold) = rules.expiry_threshold(color) else {
            continue;
        };
        if clock >= threshold {
            let n = next.get(color);
            next.set(color, 0);
            next.add(VictimColor::Red, n);
        }
    }
    next
}

/// A triage action is legal iff the agent currently sees a victim of the
/// color it is trying to triage.
pub fn triage_legal(fov: Fov, color: VictimColor) -> bool {
    fov == Fov::Victim(color)
}

/// One location/color bucket drained by expiry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expired {
    pub location: Location,
    pub color: VictimColor,
    pub count: u32,
}

/// Victim placement as it appears in scenario files.
///
/// Either parallel `locations`/`colors` lists or a `{location: [colors]}` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VictimSpec {
    Lists {
        locations: Vec<String>,
        colors: Vec<String>,
    },
    Table(BTreeMap<String, Vec<String>>),
}

/// Victim counts for every location, keyed by location then color.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VictimTable {
    counts: BTreeMap<Location, ColorCounts>,
}

impl VictimTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed from parallel lists: victim `i` is at `locations[i]` with `colors[i]`.
    pub fn seed(locations: &[Location], colors: &[VictimColor]) -> Result<Self, ConfigurationError> {
        if locations.len() != colors.len() {
            return Err(ConfigurationError::MismatchedVictimLists {
                locations: locations.len(),
                colors: colors.len(),
            });
        }
        let mut table = Self::new();
        for (loc, &color) in locations.iter().zip(colors) {
            table.counts.entry(loc.clone()).or_default().add(color, 1);
        }
        Ok(table)
    }

    /// Seed from scenario configuration, checking every location exists in
    /// the graph.
    pub fn from_spec(spec: &VictimSpec, graph: &LocationGraph) -> Result<Self, ConfigurationError> {
        let (locations, colors): (Vec<Location>, Vec<VictimColor>) = match spec {
            VictimSpec::Lists { locations, colors } => {
                if locations.len() != colors.len() {
                    return Err(ConfigurationError::MismatchedVictimLists {
                        locations: locations.len(),
                        colors: colors.len(),
                    });
                }
                let colors = colors
                    .iter()
                    .map(|c| c.parse())
                    .collect::<Result<Vec<_>, _>>()?;
                (
                    locations.iter().map(|l| Location::from(l.as_str())).collect(),
                    colors,
                )
            }
            VictimSpec::Table(table) => {
                let mut locations = Vec::new();
                let mut colors = Vec::new();
                for (loc, list) in table {
                    for c in list {
                        locations.push(Location::from(loc.as_str()));
                        colors.push(c.parse()?);
                    }
                }
                (locations, colors)
            }
        };

        if let Some(unknown) = locations.iter().find(|l| !graph.contains(l)) {
            return Err(ConfigurationError::UnknownLocation(unknown.clone()));
        }
        Self::seed(&locations, &colors)
    }

    pub fn count(&self, location: &Location, color: VictimColor) -> u32 {
        self.counts_at(location).get(color)
    }

    /// Counts at a location; all zero for locations with no victims.
    pub fn counts_at(&self, location: &Location) -> ColorCounts {
        self.counts.get(location).copied().unwrap_or_default()
    }

    pub fn set_counts(&mut self, location: Location, counts: ColorCounts) {
        self.counts.insert(location, counts);
    }

    pub fn total_at(&self, location: &Location) -> u32 {
        self.counts_at(location).total()
    }

    /// Sum of each color across all locations.
    pub fn totals_by_color(&self) -> ColorCounts {
        let mut totals = ColorCounts::default();
        for counts in self.counts.values() {
            for (color, n) in counts.iter() {
                totals.add(color, n);
            }
        }
        totals
    }

    /// Locations that have (or had) victims.
    pub fn locations(&self) -> impl Iterator<Item = &Location> {
        self.counts.keys()
    }

    /// Apply a triage of `color` at `location` lasting `duration_elapsed`
    /// seconds. On completion one victim moves to White and `fov` becomes
    /// White; otherwise nothing changes.
    pub fn apply_triage(
        &mut self,
        fov: &mut Fov,
        color: VictimColor,
        location: &Location,
        duration_elapsed: f64,
        rules: &VictimRules,
    ) -> TriageOutcome {
        let counts = self.counts_at(location);
        let outcome = triage_outcome(&counts, color, duration_elapsed, rules);
        if outcome == TriageOutcome::Completed {
            let mut next = counts;
            next.set(color, counts.get(color) - 1);
            next.add(VictimColor::White, 1);
            self.counts.insert(location.clone(), next);
            *fov = Fov::Victim(VictimColor::White);
        }
        outcome
    }

    /// Expire every alive color whose threshold `clock` has reached.
    pub fn apply_expiry(&mut self, clock: u32, rules: &VictimRules) -> Vec<Expired> {
        let mut expired = Vec::new();
        for (location, counts) in self.counts.iter_mut() {
            let next = expire_counts(*counts, clock, rules);
            for color in VictimColor::ALL {
                if !color.can_transition_to(VictimColor::Red) {
                    continue;
                }
                let drained = counts.get(color) - next.get(color);
                if drained > 0 {
                    expired.push(Expired {
                        location: location.clone(),
                        color,
                        count: drained,
                    });
                }
            }
            *counts = next;
        }
        expired
    }

    /// Distribution over what a search at `location` reveals.
    pub fn discovery_at(&self, location: &Location, rules: &VictimRules) -> Distribution<Fov> {
        discovery_distribution(&self.counts_at(location), rules.none_weight)
    }

    /// Resolve a search at `location`. With an observed outcome, the outcome
    /// must be possible; without one, a branch is drawn from `rng`. Counts
    /// are never touched.
    pub fn apply_search<R: Rng + ?Sized>(
        &self,
        location: &Location,
        rules: &VictimRules,
        observed: Option<Fov>,
        rng: &mut R,
    ) -> Result<Fov, InconsistentObservationError> {
        let believed = self.discovery_at(location, rules);
        match observed {
            Some(fov) => reconcile(&fov, &believed).map(|_| fov),
            None => Ok(believed.sample(rng)),
        }
    }
}
