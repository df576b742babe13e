//! The ranking engine.
//!
//! An ordered set of candidate records keyed by (score desc, created_at asc,
//! record_id asc). The created_at tie-break keeps equal-priority records
//! first-come-first-served, so nothing starves behind a stream of
//! same-priority captures.
//!
//! Scores are f64 compared with `total_cmp`; NaN is rejected at the
//! classification boundary, so the ordering is total in practice too.

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};

use crate::classify::Classification;
use crate::store::RecordId;

use super::policy::SelectionPolicy;

#[derive(Debug, Clone, Copy, PartialEq)]
struct RankKey {
    score: f64,
    created_at: u64,
    record_id: RecordId,
}

impl Eq for RankKey {}

impl Ord for RankKey {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .score
            .total_cmp(&self.score)
            .then_with(|| self.created_at.cmp(&other.created_at))
            .then_with(|| self.record_id.cmp(&other.record_id))
    }
}

impl PartialOrd for RankKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Clone)]
struct RankedEntry {
    key: RankKey,
    /// In flight on the link; skipped by `next_for_transmit`.
    pending: bool,
}

/// Priority ranking of Live / PendingTransmit records.
#[derive(Debug, Default)]
pub struct SelectionEngine {
    policy: SelectionPolicy,
    ranked: BTreeSet<RankKey>,
    by_id: HashMap<RecordId, RankedEntry>,
}

impl SelectionEngine {
    pub fn new(policy: SelectionPolicy) -> Self {
        Self {
            policy,
            ranked: BTreeSet::new(),
            by_id: HashMap::new(),
        }
    }

    pub fn policy(&self) -> &SelectionPolicy {
        &self.policy
    }

    /// Score a classification under the current policy.
    pub fn score(&self, classification: &Classification) -> f64 {
        self.policy.score(classification)
    }

    /// Insert or refresh a record's ranking. Idempotent for the same id; a
    /// re-classification under a changed policy moves the record, keeping
    /// its in-flight flag.
    pub fn on_classified(
        &mut self,
        record_id: RecordId,
        classification: &Classification,
        created_at: u64,
    ) {
        let key = RankKey {
            score: self.policy.score(classification),
            created_at,
            record_id,
        };
        let pending = match self.by_id.get(&record_id) {
            Some(existing) => {
                self.ranked.remove(&existing.key);
                existing.pending
            }
            None => false,
        };
        self.ranked.insert(key);
        self.by_id.insert(record_id, RankedEntry { key, pending });
    }

    /// Up to `n` highest-priority records not currently in flight, best
    /// first. Pure: repeated calls with an unchanged ranking return the same
    /// order.
    pub fn next_for_transmit(&self, n: usize) -> Vec<RecordId> {
        self.ranked
            .iter()
            .filter(|key| {
                self.by_id
                    .get(&key.record_id)
                    .map_or(false, |e| !e.pending)
            })
            .take(n)
            .map(|key| key.record_id)
            .collect()
    }

    /// The `k` lowest-priority candidates, lowest first, with their scores.
    /// In-flight records are included: eviction under pressure may cancel an
    /// outstanding request.
    pub fn lowest_priority(&self, k: usize) -> Vec<(RecordId, f64)> {
        self.ranked
            .iter()
            .rev()
            .take(k)
            .map(|key| (key.record_id, key.score))
            .collect()
    }

    /// Remove a record from the ranking (tombstoned for any reason).
    pub fn on_evicted(&mut self, record_id: RecordId) {
        if let Some(entry) = self.by_id.remove(&record_id) {
            self.ranked.remove(&entry.key);
        }
    }

    /// Flag a record as in flight. Returns false for unknown ids.
    pub fn mark_pending(&mut self, record_id: RecordId) -> bool {
        match self.by_id.get_mut(&record_id) {
            Some(entry) => {
                entry.pending = true;
                true
            }
            None => false,
        }
    }

    /// Clear the in-flight flag (rejection or timeout). Returns false for
    /// unknown ids.
    pub fn release_pending(&mut self, record_id: RecordId) -> bool {
        match self.by_id.get_mut(&record_id) {
            Some(entry) => {
                entry.pending = false;
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, record_id: RecordId) -> bool {
        self.by_id.contains_key(&record_id)
    }

    pub fn score_for(&self, record_id: RecordId) -> Option<f64> {
        self.by_id.get(&record_id).map(|e| e.key.score)
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Count of records currently flagged in flight.
    pub fn pending_count(&self) -> usize {
        self.by_id.values().filter(|e| e.pending).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classified(label: &str, confidence: f64) -> Classification {
        Classification::new(label, confidence).unwrap()
    }

    fn engine() -> SelectionEngine {
        SelectionEngine::new(SelectionPolicy::with_weights(&[
            ("wildfire", 1.0),
            ("ship", 0.7),
            ("cloud", 0.1),
        ]))
    }

    #[test]
    fn test_spec_ordering_example() {
        let mut engine = engine();
        engine.on_classified(1, &classified("wildfire", 0.9), 10);
        engine.on_classified(2, &classified("ship", 0.8), 11);
        engine.on_classified(3, &classified("cloud", 0.95), 12);

        // wildfire 0.9, ship 0.56, cloud 0.095
        assert_eq!(engine.next_for_transmit(3), vec![1, 2, 3]);
        assert!((engine.score_for(2).unwrap() - 0.56).abs() < 1e-12);
        assert!((engine.score_for(3).unwrap() - 0.095).abs() < 1e-12);
    }

    #[test]
    fn test_tie_broken_by_age_oldest_first() {
        let mut engine = engine();
        engine.on_classified(5, &classified("wildfire", 0.5), 200);
        engine.on_classified(6, &classified("wildfire", 0.5), 100);
        assert_eq!(engine.next_for_transmit(2), vec![6, 5]);
    }

    #[test]
    fn test_on_classified_idempotent() {
        let mut engine = engine();
        let c = classified("ship", 0.8);
        engine.on_classified(1, &c, 10);
        engine.on_classified(1, &c, 10);
        assert_eq!(engine.len(), 1);
        assert_eq!(engine.next_for_transmit(10), vec![1]);
    }

    #[test]
    fn test_next_for_transmit_restartable() {
        let mut engine = engine();
        engine.on_classified(1, &classified("wildfire", 0.9), 10);
        engine.on_classified(2, &classified("ship", 0.8), 11);
        let first = engine.next_for_transmit(2);
        let second = engine.next_for_transmit(2);
        assert_eq!(first, second);
    }

    #[test]
    fn test_empty_when_no_candidates() {
        let engine = engine();
        assert!(engine.next_for_transmit(3).is_empty());
    }

    #[test]
    fn test_pending_records_skipped_but_ranked() {
        let mut engine = engine();
        engine.on_classified(1, &classified("wildfire", 0.9), 10);
        engine.on_classified(2, &classified("ship", 0.8), 11);
        assert!(engine.mark_pending(1));

        assert_eq!(engine.next_for_transmit(2), vec![2]);
        // Still visible to pressure eviction.
        assert_eq!(engine.lowest_priority(2).len(), 2);

        assert!(engine.release_pending(1));
        assert_eq!(engine.next_for_transmit(2), vec![1, 2]);
    }

    #[test]
    fn test_lowest_priority_order() {
        let mut engine = engine();
        engine.on_classified(1, &classified("wildfire", 0.9), 10);
        engine.on_classified(2, &classified("ship", 0.8), 11);
        engine.on_classified(3, &classified("cloud", 0.95), 12);

        let lowest = engine.lowest_priority(2);
        assert_eq!(lowest[0].0, 3);
        assert_eq!(lowest[1].0, 2);
    }

    #[test]
    fn test_eviction_removes_from_ranking() {
        let mut engine = engine();
        engine.on_classified(1, &classified("wildfire", 0.9), 10);
        engine.on_evicted(1);
        assert!(engine.is_empty());
        assert!(engine.next_for_transmit(1).is_empty());
        // Evicting twice is harmless.
        engine.on_evicted(1);
    }
}
