//! Waiting for a destination to settle and judging its count.

mod checker;

use std::fmt;
use std::time::Duration;

use serde::Serialize;

pub use checker::ConvergenceChecker;

use crate::control::Resource;
use crate::fault::serialize_millis;

/// How an observed count must relate to the expected one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    Equal,
    AtLeast,
    AtMost,
    /// At least the expected count and at most `n` above it.
    WithinDuplicateBound(u64),
}

impl Comparison {
    pub fn holds(&self, count: u64, expected: u64) -> bool {
        match *self {
            Comparison::Equal => count == expected,
            Comparison::AtLeast => count >= expected,
            Comparison::AtMost => count <= expected,
            Comparison::WithinDuplicateBound(n) => {
                count >= expected && count <= expected.saturating_add(n)
            }
        }
    }

    /// Whether a single matching sample is not enough, because the count may still rise
    /// past the bound.
    pub fn needs_stability(&self) -> bool {
        matches!(
            self,
            Comparison::AtMost | Comparison::WithinDuplicateBound(_)
        )
    }
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Comparison::Equal => f.write_str("=="),
            Comparison::AtLeast => f.write_str(">="),
            Comparison::AtMost => f.write_str("<="),
            Comparison::WithinDuplicateBound(n) => write!(f, "within +{n} of"),
        }
    }
}

/// One convergence assertion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CountProbe {
    pub resource: Resource,
    pub expected: u64,
    pub comparison: Comparison,
    /// When false the probe is recorded in the outcome but a timeout does not fail the scenario.
    pub must_converge: bool,
}

impl CountProbe {
    pub fn new(resource: Resource, expected: u64, comparison: Comparison) -> Self {
        Self {
            resource,
            expected,
            comparison,
            must_converge: true,
        }
    }

    /// Turns the probe into an observation: its result is reported but never fails a verdict.
    pub fn observed(mut self) -> Self {
        self.must_converge = false;
        self
    }

    pub fn equal(resource: Resource, expected: u64) -> Self {
        Self::new(resource, expected, Comparison::Equal)
    }

    pub fn at_least(resource: Resource, expected: u64) -> Self {
        Self::new(resource, expected, Comparison::AtLeast)
    }

    pub fn at_most(resource: Resource, expected: u64) -> Self {
        Self::new(resource, expected, Comparison::AtMost)
    }
}

impl fmt::Display for CountProbe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.resource, self.comparison, self.expected)
    }
}

/// A count observed at an offset from the start of the wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Sample {
    #[serde(rename = "at_ms", serialize_with = "serialize_millis")]
    pub at: Duration,
    pub count: u64,
}

/// Result of one [`ConvergenceChecker::wait_for`] call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConvergenceResult {
    pub probe: CountProbe,
    /// Last observed count; zero when no reading succeeded.
    pub final_count: u64,
    pub converged: bool,
    #[serde(rename = "elapsed_ms", serialize_with = "serialize_millis")]
    pub elapsed: Duration,
    pub samples: Vec<Sample>,
}

impl ConvergenceResult {
    /// How far the final count is above the expected one.
    pub fn surplus(&self) -> u64 {
        self.final_count.saturating_sub(self.probe.expected)
    }

    /// How far the final count is below the expected one.
    pub fn deficit(&self) -> u64 {
        self.probe.expected.saturating_sub(self.final_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comparisons_hold_at_their_bounds() {
        assert!(Comparison::Equal.holds(10, 10));
        assert!(!Comparison::Equal.holds(11, 10));
        assert!(Comparison::AtLeast.holds(12, 10));
        assert!(!Comparison::AtLeast.holds(9, 10));
        assert!(Comparison::AtMost.holds(7, 10));
        assert!(!Comparison::AtMost.holds(11, 10));

        let bounded = Comparison::WithinDuplicateBound(5);
        assert!(bounded.holds(10, 10));
        assert!(bounded.holds(15, 10));
        assert!(!bounded.holds(16, 10));
        assert!(!bounded.holds(9, 10));
    }

    #[test]
    fn only_upper_bounds_need_stability() {
        assert!(!Comparison::Equal.needs_stability());
        assert!(!Comparison::AtLeast.needs_stability());
        assert!(Comparison::AtMost.needs_stability());
        assert!(Comparison::WithinDuplicateBound(0).needs_stability());
    }

    #[test]
    fn probes_render_as_assertions() {
        let probe = CountProbe::at_least(Resource::Topic("person".into()), 40_000);
        assert_eq!(probe.to_string(), "topic:person >= 40000");
    }

    #[test]
    fn probes_must_converge_unless_observed() {
        let probe = CountProbe::equal(Resource::Topic("person".into()), 10);
        assert!(probe.must_converge);
        assert!(!probe.observed().must_converge);
    }
}
