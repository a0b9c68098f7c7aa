use std::collections::HashSet;

use crate::compaction::{CompactedRecord, SegmentState};

/// A log-compacted topic: closed segments followed by one open head segment.
#[derive(Debug, Clone, Default)]
pub struct CompactingTopic {
    closed: Vec<Vec<(String, String)>>,
    head: Vec<(String, String)>,
}

impl CompactingTopic {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.head.push((key.into(), value.into()));
    }

    /// Closes the head segment and opens a new one.
    pub fn roll_segment(&mut self) {
        let head = std::mem::take(&mut self.head);
        self.closed.push(head);
    }

    /// Keeps only the last value of each key across the closed segments. The head segment is
    /// left untouched.
    pub fn compact(&mut self) {
        let mut seen = HashSet::new();

        for segment in self.closed.iter_mut().rev() {
            let mut kept: Vec<(String, String)> = segment
                .drain(..)
                .rev()
                .filter(|(key, _)| seen.insert(key.clone()))
                .collect();
            kept.reverse();
            *segment = kept;
        }

        self.closed.retain(|segment| !segment.is_empty());
    }

    /// Every record in log order, tagged with its segment state.
    pub fn records(&self) -> Vec<CompactedRecord> {
        let closed = self
            .closed
            .iter()
            .flatten()
            .map(|(key, value)| CompactedRecord::new(key, value, SegmentState::Closed));
        let open = self
            .head
            .iter()
            .map(|(key, value)| CompactedRecord::new(key, value, SegmentState::Open));

        closed.chain(open).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compaction_keeps_latest_value_per_key() {
        let mut topic = CompactingTopic::new();
        topic.append("1", "a");
        topic.append("2", "b");
        topic.roll_segment();
        topic.append("1", "c");
        topic.roll_segment();
        topic.append("1", "d");

        topic.compact();

        let records: Vec<_> = topic
            .records()
            .into_iter()
            .map(|r| (r.key, r.value, r.segment))
            .collect();
        assert_eq!(
            records,
            vec![
                ("2".to_string(), "b".to_string(), SegmentState::Closed),
                ("1".to_string(), "c".to_string(), SegmentState::Closed),
                ("1".to_string(), "d".to_string(), SegmentState::Open),
            ]
        );
    }
}
