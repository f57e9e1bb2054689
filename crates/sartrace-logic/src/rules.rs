//! Victim dynamics configuration and mission phases.
//!
//! Triage durations and expiry times are configuration data, loaded with the
//! scenario. The two tables are independent: nothing assumes a color's triage
//! time relates to its expiry time.
//!
//! ```
//! use sartrace_logic::rules::{validate_rules, VictimRules};
//!
//! let rules = VictimRules::default();
//! assert!(validate_rules(&rules).is_empty());
//! ```

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;
use crate::victims::VictimColor;

/// Thresholds and weights driving the victim lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VictimRules {
    /// Seconds of sustained triage needed to save a victim of each color.
    pub triage_seconds: BTreeMap<VictimColor, u32>,
    /// Mission clock (seconds) at which untriaged victims of a color expire.
    pub expiry_seconds: BTreeMap<VictimColor, u32>,
    /// Residual weight of "nothing in view" in the discovery distribution.
    pub none_weight: f64,
    /// Mission length in seconds.
    pub mission_seconds: u32,
}

impl Default for VictimRules {
    fn default() -> Self {
        Self {
            triage_seconds: BTreeMap::from([(VictimColor::Green, 7), (VictimColor::Gold, 14)]),
            expiry_seconds: BTreeMap::from([(VictimColor::Green, 600), (VictimColor::Gold, 300)]),
            none_weight: 1.0,
            mission_seconds: 600,
        }
    }
}

impl VictimRules {
    pub fn triage_threshold(&self, color: VictimColor) -> Option<u32> {
        self.triage_seconds.get(&color).copied()
    }

    pub fn expiry_threshold(&self, color: VictimColor) -> Option<u32> {
        self.expiry_seconds.get(&color).copied()
    }

    /// The first time any alive color expires, if any does.
    pub fn earliest_expiry(&self) -> Option<u32> {
        self.expiry_seconds
            .iter()
            .filter(|(c, _)| c.is_alive())
            .map(|(_, &t)| t)
            .min()
    }
}

/// Validate rules, returning all errors found.
pub fn validate_rules(rules: &VictimRules) -> Vec<ConfigurationError> {
    let mut errors = Vec::new();

    for color in VictimColor::ALL {
        let has_triage = rules.triage_seconds.contains_key(&color);
        if color.is_alive() && !has_triage {
            errors.push(ConfigurationError::MissingThreshold {
                kind: "triage",
                color,
            });
        }
        if !color.is_alive() && has_triage {
            errors.push(ConfigurationError::ThresholdForInertColor {
                kind: "triage",
                color,
            });
        }
        if !color.is_alive() && rules.expiry_seconds.contains_key(&color) {
            errors.push(ConfigurationError::ThresholdForInertColor {
                kind: "expiry",
                color,
            });
        }
    }

    if !rules.none_weight.is_finite() || rules.none_weight < 0.0 {
        errors.push(ConfigurationError::InvalidNoneWeight(rules.none_weight));
    }

    if rules.mission_seconds == 0 {
        errors.push(ConfigurationError::EmptyMission);
    }

    errors
}

/// Coarse mission phase, a pure function of the mission clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MissionPhase {
    /// Before any alive color has expired.
    Early,
    /// After the first expiry, before the mission ends.
    Late,
    /// Mission time is up.
    Ended,
}

impl MissionPhase {
    pub const ALL: [MissionPhase; 3] = [MissionPhase::Early, MissionPhase::Late, MissionPhase::Ended];
}

impl fmt::Display for MissionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MissionPhase::Early => "early",
            MissionPhase::Late => "late",
            MissionPhase::Ended => "ended",
        };
        f.write_str(s)
    }
}

/// Mission phase at `clock` seconds.
pub fn mission_phase(clock: u32, rules: &VictimRules) -> MissionPhase {
    if clock >= rules.mission_seconds {
        MissionPhase::Ended
    } else if rules.earliest_expiry().is_some_and(|t| clock >= t) {
        MissionPhase::Late
    } else {
        MissionPhase::Early
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_reference_configuration() {
        let r = VictimRules::default();
        assert_eq!(r.triage_threshold(VictimColor::Green), Some(7));
        assert_eq!(r.triage_threshold(VictimColor::Gold), Some(14));
        assert_eq!(r.expiry_threshold(VictimColor::Green), Some(600));
        assert_eq!(r.expiry_threshold(VictimColor::Gold), Some(300));
        assert_eq!(r.triage_threshold(VictimColor::Red), None);
        assert!(validate_rules(&r).is_empty());
    }

    #[test]
    fn test_missing_triage_threshold() {
        let mut r = VictimRules::default();
        r.triage_seconds.remove(&VictimColor::Gold);
        let errors = validate_rules(&r);
        assert_eq!(
            errors,
            vec![ConfigurationError::MissingThreshold {
                kind: "triage",
                color: VictimColor::Gold
            }]
        );
    }

    #[test]
    fn test_inert_color_threshold_rejected() {
        let mut r = VictimRules::default();
        r.expiry_seconds.insert(VictimColor::White, 10);
        r.triage_seconds.insert(VictimColor::Red, 3);
        assert_eq!(validate_rules(&r).len(), 2);
    }

    #[test]
    fn test_bad_none_weight_and_mission() {
        let r = VictimRules {
            none_weight: f64::NAN,
            mission_seconds: 0,
            ..Default::default()
        };
        assert_eq!(validate_rules(&r).len(), 2);
    }

    #[test]
    fn test_mission_phases() {
        let r = VictimRules::default();
        assert_eq!(mission_phase(0, &r), MissionPhase::Early);
        assert_eq!(mission_phase(299, &r), MissionPhase::Early);
        assert_eq!(mission_phase(300, &r), MissionPhase::Late);
        assert_eq!(mission_phase(599, &r), MissionPhase::Late);
        assert_eq!(mission_phase(600, &r), MissionPhase::Ended);
    }

    #[test]
    fn test_no_expiry_stays_early() {
        let r = VictimRules {
            expiry_seconds: BTreeMap::new(),
            ..Default::default()
        };
        assert_eq!(mission_phase(500, &r), MissionPhase::Early);
    }

    #[test]
    fn test_rules_json_roundtrip_keys() {
        let json = r#"{"triage_seconds":{"Green":5,"Gold":10},"expiry_seconds":{"Gold":120}}"#;
        let r: VictimRules = serde_json::from_str(json).unwrap();
        assert_eq!(r.triage_threshold(VictimColor::Green), Some(5));
        assert_eq!(r.expiry_threshold(VictimColor::Green), None);
        assert_eq!(r.mission_seconds, 600);
    }
}
