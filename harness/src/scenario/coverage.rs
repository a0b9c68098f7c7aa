use std::collections::BTreeMap;
use std::ops::Range;

use serde::Serialize;

use crate::control::Resource;

/// Asserts that every key in `expected` reached `resource` at least once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeyCoverage {
    pub resource: Resource,
    /// Integer field holding the key in each destination record.
    pub field: String,
    pub expected: Range<i64>,
}

impl KeyCoverage {
    pub fn new(resource: Resource, field: impl Into<String>, expected: Range<i64>) -> Self {
        Self {
            resource,
            field: field.into(),
            expected,
        }
    }

    /// Coverage of the `pid` field.
    pub fn pids(resource: Resource, expected: Range<i64>) -> Self {
        Self::new(resource, "pid", expected)
    }

    pub fn analyze(&self, keys: &[i64]) -> CoverageReport {
        let mut occurrences: BTreeMap<i64, u64> = BTreeMap::new();
        for key in keys {
            *occurrences.entry(*key).or_default() += 1;
        }

        let missing = self
            .expected
            .clone()
            .filter(|key| !occurrences.contains_key(key))
            .collect();
        let unexpected = occurrences
            .keys()
            .filter(|key| !self.expected.contains(*key))
            .count() as u64;
        let duplicates = occurrences.into_iter().filter(|(_, n)| *n > 1).collect();

        CoverageReport {
            coverage: self.clone(),
            records: keys.len() as u64,
            missing,
            duplicates,
            unexpected,
        }
    }
}

/// Per-key result of a [`KeyCoverage`] check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CoverageReport {
    pub coverage: KeyCoverage,
    /// Records read back.
    pub records: u64,
    pub missing: Vec<i64>,
    /// Keys seen more than once, with their number of occurrences.
    pub duplicates: BTreeMap<i64, u64>,
    /// Distinct keys outside the expected range.
    pub unexpected: u64,
}

impl CoverageReport {
    /// Duplicates are tolerated; missing keys are not.
    pub fn passed(&self) -> bool {
        self.missing.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coverage() -> KeyCoverage {
        KeyCoverage::pids(Resource::Topic("person".into()), 0..5)
    }

    #[test]
    fn full_coverage_passes_with_duplicates() {
        let report = coverage().analyze(&[0, 1, 1, 2, 3, 4, 4, 4]);
        assert!(report.passed());
        assert_eq!(report.records, 8);
        assert_eq!(report.duplicates, BTreeMap::from([(1, 2), (4, 3)]));
    }

    #[test]
    fn missing_keys_are_listed_in_order() {
        let report = coverage().analyze(&[4, 0, 2, 7]);
        assert!(!report.passed());
        assert_eq!(report.missing, vec![1, 3]);
        assert_eq!(report.unexpected, 1);
    }

    #[test]
    fn empty_destination_misses_everything() {
        let report = coverage().analyze(&[]);
        assert_eq!(report.missing, vec![0, 1, 2, 3, 4]);
    }
}
