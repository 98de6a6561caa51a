//! Bounded top-k selection over scored candidates.
//!
//! Maintains a binary heap of at most k entries with the worst survivor at
//! the top, giving O(N log k) selection instead of a full O(N log N) sort.
//! Ties on score are broken by ascending row id so results are deterministic
//! and reproducible for identical table state.

use serde::Serialize;
use std::cmp::Ordering;

/// A single ranked hit: row id plus its score under the query metric.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScoredCandidate {
    pub row_id: u32,
    pub score: f32,
}

/// Ranking direction for scores. Cosine similarity ranks high-to-low,
/// Euclidean distance low-to-high; the selector is parameterized rather
/// than hard-coding either.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreOrdering {
    HigherIsBetter,
    LowerIsBetter,
}

impl ScoreOrdering {
    /// Maps a score to a key where smaller is always better.
    #[inline]
    fn sort_key(self, score: f32) -> f32 {
        match self {
            ScoreOrdering::LowerIsBetter => score,
            ScoreOrdering::HigherIsBetter => -score,
        }
    }
}

/// Total order over candidates: better score first, then ascending row id.
#[inline]
fn rank(ordering: ScoreOrdering, a: &ScoredCandidate, b: &ScoredCandidate) -> Ordering {
    ordering
        .sort_key(a.score)
        .partial_cmp(&ordering.sort_key(b.score))
        .unwrap_or(Ordering::Equal)
        .then(a.row_id.cmp(&b.row_id))
}

/// Selects the k best (row id, score) pairs out of a scored stream.
///
/// The survivors live heap-ordered inside the eventual result vector, worst
/// at index 0; the selector's only allocation is that vector.
pub struct TopKSelector {
    k: usize,
    ordering: ScoreOrdering,
    slots: Vec<ScoredCandidate>,
}

impl TopKSelector {
    pub fn new(k: usize, ordering: ScoreOrdering) -> Self {
        Self {
            k,
            ordering,
            slots: Vec::with_capacity(k.min(1024)),
        }
    }

    /// `a` ranks strictly worse than `b`.
    #[inline]
    fn worse(&self, a: &ScoredCandidate, b: &ScoredCandidate) -> bool {
        rank(self.ordering, a, b) == Ordering::Greater
    }

    /// Consider one candidate. Kept only if it beats the current worst
    /// survivor under the total order (score, then ascending row id).
    pub fn offer(&mut self, row_id: u32, score: f32) {
        if self.k == 0 {
            return;
        }
        let cand = ScoredCandidate { row_id, score };
        if self.slots.len() < self.k {
            self.slots.push(cand);
            self.sift_up(self.slots.len() - 1);
        } else if self.worse(&self.slots[0], &cand) {
            self.slots[0] = cand;
            self.sift_down(0);
        }
    }

    fn sift_up(&mut self, mut i: usize) {
        while i > 0 {
            let parent = (i - 1) / 2;
            if self.worse(&self.slots[i], &self.slots[parent]) {
                self.slots.swap(i, parent);
                i = parent;
            } else {
                break;
            }
        }
    }

    fn sift_down(&mut self, mut i: usize) {
        let len = self.slots.len();
        loop {
            let left = 2 * i + 1;
            let right = left + 1;
            let mut worst = i;
            if left < len && self.worse(&self.slots[left], &self.slots[worst]) {
                worst = left;
            }
            if right < len && self.worse(&self.slots[right], &self.slots[worst]) {
                worst = right;
            }
            if worst == i {
                break;
            }
            self.slots.swap(i, worst);
            i = worst;
        }
    }

    /// The survivors, best first, reusing the selector's own storage.
    pub fn into_sorted(self) -> Vec<ScoredCandidate> {
        let ordering = self.ordering;
        let mut slots = self.slots;
        slots.sort_by(|a, b| rank(ordering, a, b));
        slots
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    /// Reference: full sort under the same total order, truncated to k.
    fn sort_then_truncate(
        scored: &[(u32, f32)],
        k: usize,
        ordering: ScoreOrdering,
    ) -> Vec<ScoredCandidate> {
        let mut all: Vec<ScoredCandidate> = scored
            .iter()
            .map(|&(row_id, score)| ScoredCandidate { row_id, score })
            .collect();
        all.sort_by(|a, b| {
            ordering
                .sort_key(a.score)
                .partial_cmp(&ordering.sort_key(b.score))
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.row_id.cmp(&b.row_id))
        });
        all.truncate(k);
        all
    }

    fn run_selector(
        scored: &[(u32, f32)],
        k: usize,
        ordering: ScoreOrdering,
    ) -> Vec<ScoredCandidate> {
        let mut selector = TopKSelector::new(k, ordering);
        for &(row_id, score) in scored {
            selector.offer(row_id, score);
        }
        selector.into_sorted()
    }

    #[test]
    fn matches_full_sort_for_random_scores() {
        let mut rng = StdRng::seed_from_u64(42);
        let scored: Vec<(u32, f32)> = (0..1000u32).map(|i| (i, rng.gen_range(-1.0..1.0))).collect();

        for ordering in [ScoreOrdering::HigherIsBetter, ScoreOrdering::LowerIsBetter] {
            let got = run_selector(&scored, 10, ordering);
            let expected = sort_then_truncate(&scored, 10, ordering);
            assert_eq!(got, expected);
        }
    }

    #[test]
    fn ties_keep_the_lower_row_id() {
        let scored = vec![(7, 0.5), (3, 0.5), (9, 0.5), (1, 0.1)];
        let got = run_selector(&scored, 2, ScoreOrdering::HigherIsBetter);
        assert_eq!(got.len(), 2);
        assert_eq!(got[0].row_id, 3);
        assert_eq!(got[1].row_id, 7);
    }

    #[test]
    fn k_at_least_n_behaves_as_full_sort() {
        let scored = vec![(0, 3.0), (1, 1.0), (2, 2.0)];
        let got = run_selector(&scored, 10, ScoreOrdering::LowerIsBetter);
        let ids: Vec<u32> = got.iter().map(|c| c.row_id).collect();
        assert_eq!(ids, vec![1, 2, 0]);
    }

    #[test]
    fn k_zero_yields_empty() {
        let got = run_selector(&[(0, 1.0), (1, 2.0)], 0, ScoreOrdering::LowerIsBetter);
        assert!(got.is_empty());
    }

    #[test]
    fn duplicate_scores_across_orderings_match_reference() {
        let mut rng = StdRng::seed_from_u64(7);
        // Coarse quantization forces plenty of exact ties.
        let scored: Vec<(u32, f32)> = (0..500u32)
            .map(|i| (i, (rng.gen_range(0..8) as f32) * 0.125))
            .collect();

        for ordering in [ScoreOrdering::HigherIsBetter, ScoreOrdering::LowerIsBetter] {
            for k in [1, 5, 37, 500] {
                let got = run_selector(&scored, k, ordering);
                let expected = sort_then_truncate(&scored, k, ordering);
                assert_eq!(got, expected, "k={k} ordering={ordering:?}");
            }
        }
    }
}
