//! Discrete distributions over stochastic outcomes and their reconciliation
//! with observations.
//!
//! The discovery distribution is a pure function of one location's color
//! counts: every color present gets weight 1, "nothing in view" gets the
//! configured residual weight, and the result is normalized.

use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::InconsistentObservationError;
use crate::victims::{ColorCounts, Fov, VictimColor};

/// A normalized, non-empty discrete distribution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Distribution<T> {
    outcomes: Vec<(T, f64)>,
}

impl<T: Clone + PartialEq> Distribution<T> {
    /// A distribution with a single outcome of probability 1.
    pub fn certain(value: T) -> Self {
        Self {
            outcomes: vec![(value, 1.0)],
        }
    }

    /// Normalize non-negative weights. Zero weights are dropped and repeated
    /// outcomes merged. Returns `None` if no weight is positive.
    pub fn from_weights(weights: impl IntoIterator<Item = (T, f64)>) -> Option<Self> {
        let mut outcomes: Vec<(T, f64)> = Vec::new();
        for (value, w) in weights {
            if !w.is_finite() || w <= 0.0 {
                continue;
            }
            match outcomes.iter_mut().find(|(v, _)| *v == value) {
                Some((_, acc)) => *acc += w,
                None => outcomes.push((value, w)),
            }
        }
        let total: f64 = outcomes.iter().map(|(_, w)| w).sum();
        if outcomes.is_empty() || total <= 0.0 {
            return None;
        }
        for (_, w) in outcomes.iter_mut() {
            *w /= total;
        }
        Some(Self { outcomes })
    }

    pub fn probability(&self, value: &T) -> f64 {
        self.outcomes
            .iter()
            .find(|(v, _)| v == value)
            .map(|(_, p)| *p)
            .unwrap_or(0.0)
    }

    pub fn outcomes(&self) -> &[(T, f64)] {
        &self.outcomes
    }

    /// Outcomes with nonzero probability, in insertion order.
    pub fn support(&self) -> impl Iterator<Item = &T> {
        self.outcomes.iter().map(|(v, _)| v)
    }

    /// The single outcome, if the distribution is deterministic.
    pub fn as_certain(&self) -> Option<&T> {
        match self.outcomes.as_slice() {
            [(v, _)] => Some(v),
            _ => None,
        }
    }

    /// Draw an outcome using `rng`.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> T {
        let r: f64 = rng.gen();
        let mut acc = 0.0;
        for (value, p) in &self.outcomes {
            acc += p;
            if r < acc {
                return value.clone();
            }
        }
        // Rounding can leave the cumulative sum a hair below 1.
        self.outcomes[self.outcomes.len() - 1].0.clone()
    }
}

/// Collapse a believed distribution onto an observed outcome.
///
/// Succeeds with a certain distribution on `observed` if the belief gives it
/// nonzero probability; otherwise the observation contradicts the model.
pub fn reconcile<T: Clone + PartialEq + fmt::Display>(
    observed: &T,
    believed: &Distribution<T>,
) -> Result<Distribution<T>, InconsistentObservationError> {
    if believed.probability(observed) > 0.0 {
        Ok(Distribution::certain(observed.clone()))
    } else {
        Err(InconsistentObservationError {
            observed: observed.to_string(),
            support: believed.support().map(|v| v.to_string()).collect(),
        })
    }
}

/// What a search reveals at a location with `counts`.
pub fn discovery_distribution(counts: &ColorCounts, none_weight: f64) -> Distribution<Fov> {
    let present: Vec<VictimColor> = counts
        .iter()
        .filter(|&(_, n)| n > 0)
        .map(|(c, _)| c)
        .collect();
    if present.is_empty() {
        return Distribution::certain(Fov::Nothing);
    }
    let weights = present
        .into_iter()
        .map(|c| (Fov::Victim(c), 1.0))
        .chain(std::iter::once((Fov::Nothing, none_weight)));
    Distribution::from_weights(weights).unwrap_or_else(|| Distribution::certain(Fov::Nothing))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn counts(pairs: &[(VictimColor, u32)]) -> ColorCounts {
        let mut c = ColorCounts::default();
        for &(color, n) in pairs {
            c.set(color, n);
        }
        c
    }

    #[test]
    fn test_empty_location_certain_nothing() {
        let d = discovery_distribution(&ColorCounts::default(), 1.0);
        assert_eq!(d.as_certain(), Some(&Fov::Nothing));
    }

    #[test]
    fn test_weights_normalized() {
        let d = discovery_distribution(
            &counts(&[(VictimColor::Green, 3), (VictimColor::Gold, 1)]),
            1.0,
        );
        let green = d.probability(&Fov::Victim(VictimColor::Green));
        let gold = d.probability(&Fov::Victim(VictimColor::Gold));
        let none = d.probability(&Fov::Nothing);
        assert!((green - 1.0 / 3.0).abs() < 1e-9);
        assert!((gold - 1.0 / 3.0).abs() < 1e-9);
        assert!((none - 1.0 / 3.0).abs() < 1e-9);
        assert_eq!(d.probability(&Fov::Victim(VictimColor::Red)), 0.0);
    }

    #[test]
    fn test_zero_residual_weight() {
        let d = discovery_distribution(&counts(&[(VictimColor::White, 1)]), 0.0);
        assert_eq!(d.as_certain(), Some(&Fov::Victim(VictimColor::White)));
    }

    #[test]
    fn test_from_weights_merges_and_drops() {
        let d = Distribution::from_weights(vec![("a", 1.0), ("b", 0.0), ("a", 1.0), ("c", 2.0)])
            .unwrap();
        assert_eq!(d.outcomes().len(), 2);
        assert!((d.probability(&"a") - 0.5).abs() < 1e-9);
        assert_eq!(d.probability(&"b"), 0.0);
        assert!(Distribution::<&str>::from_weights(vec![("a", 0.0)]).is_none());
    }

    #[test]
    fn test_reconcile() {
        let d = discovery_distribution(&counts(&[(VictimColor::Green, 1)]), 1.0);
        let ok = reconcile(&Fov::Victim(VictimColor::Green), &d).unwrap();
        assert_eq!(ok.as_certain(), Some(&Fov::Victim(VictimColor::Green)));
        let err = reconcile(&Fov::Victim(VictimColor::Red), &d).unwrap_err();
        assert_eq!(err.observed, "Red");
        assert_eq!(err.support, vec!["Green".to_string(), "none".to_string()]);
    }

    #[test]
    fn test_sample_stays_in_support() {
        let d = discovery_distribution(&counts(&[(VictimColor::Gold, 2)]), 0.5);
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        for _ in 0..100 {
            let v = d.sample(&mut rng);
            assert!(d.probability(&v) > 0.0);
        }
    }
}
