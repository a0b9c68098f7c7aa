//! Checks of per-key retention on log-compacted destinations.
//!
//! Compaction only rewrites closed segments. A key whose records all sit in closed segments
//! must be down to a single value once compaction has run, while a key still written in the
//! open head segment may carry one more value until the next pass.

use std::collections::BTreeMap;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentState {
    Closed,
    Open,
}

/// A record read back from a compacted topic, tagged with the state of its segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompactedRecord {
    pub key: String,
    pub value: String,
    pub segment: SegmentState,
}

impl CompactedRecord {
    pub fn new(key: impl Into<String>, value: impl Into<String>, segment: SegmentState) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            segment,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompactionViolation {
    pub key: String,
    pub closed_values: usize,
    pub open_values: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CompactionReport {
    /// Last value read for each key, in log order.
    pub latest: BTreeMap<String, String>,
    pub violations: Vec<CompactionViolation>,
}

impl CompactionReport {
    pub fn passed(&self) -> bool {
        self.violations.is_empty()
    }
}

/// Checks records in log order against the retention rules of a compacted topic.
pub fn check_compaction(records: &[CompactedRecord]) -> CompactionReport {
    // (closed, open) value counts per key
    let mut counts: BTreeMap<&str, (usize, usize)> = BTreeMap::new();
    let mut latest = BTreeMap::new();

    for record in records {
        let entry = counts.entry(record.key.as_str()).or_default();
        match record.segment {
            SegmentState::Closed => entry.0 += 1,
            SegmentState::Open => entry.1 += 1,
        }
        latest.insert(record.key.clone(), record.value.clone());
    }

    let violations = counts
        .into_iter()
        .filter(|(_, (closed, open))| {
            if *open == 0 {
                *closed != 1
            } else {
                *closed > 1 || closed + open > 2
            }
        })
        .map(|(key, (closed_values, open_values))| CompactionViolation {
            key: key.to_string(),
            closed_values,
            open_values,
        })
        .collect();

    CompactionReport { latest, violations }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_only_keys_keep_one_value() {
        let report = check_compaction(&[
            CompactedRecord::new("100", "Lucy", SegmentState::Closed),
            CompactedRecord::new("200", "Ann", SegmentState::Closed),
        ]);
        assert!(report.passed());
        assert_eq!(report.latest["100"], "Lucy");
    }

    #[test]
    fn duplicate_in_closed_segments_is_a_violation() {
        let report = check_compaction(&[
            CompactedRecord::new("100", "Bob", SegmentState::Closed),
            CompactedRecord::new("100", "Lucy", SegmentState::Closed),
        ]);
        assert_eq!(
            report.violations,
            vec![CompactionViolation {
                key: "100".into(),
                closed_values: 2,
                open_values: 0,
            }]
        );
    }

    #[test]
    fn head_segment_may_hold_one_pending_value() {
        let report = check_compaction(&[
            CompactedRecord::new("100", "Bob", SegmentState::Closed),
            CompactedRecord::new("100", "Lucy", SegmentState::Open),
        ]);
        assert!(report.passed());
        assert_eq!(report.latest["100"], "Lucy");

        let report = check_compaction(&[
            CompactedRecord::new("100", "Bob", SegmentState::Open),
            CompactedRecord::new("100", "Lucy", SegmentState::Open),
        ]);
        assert!(report.passed());
    }

    #[test]
    fn more_than_two_values_for_an_active_key_is_a_violation() {
        let report = check_compaction(&[
            CompactedRecord::new("100", "Bob", SegmentState::Closed),
            CompactedRecord::new("100", "Lucy", SegmentState::Open),
            CompactedRecord::new("100", "Eve", SegmentState::Open),
        ]);
        assert!(!report.passed());
    }
}
