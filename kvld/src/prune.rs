use crate::{ConsistencyGraph, ConsistencyMatrix, ConsistencyScorer, KvldParameters};
use log::*;

/// What one pruning round did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Round {
    /// Valid matches when the round started.
    pub valid_before: usize,
    /// Matches the round marked invalid.
    pub invalidated: usize,
}

/// The fixed point reached by [`prune`].
#[derive(Debug, Clone)]
pub struct Pruned {
    pub validity: Vec<bool>,
    pub matrix: ConsistencyMatrix,
    pub rounds: Vec<Round>,
}

impl Pruned {
    /// Indices of the matches that stayed valid, in ascending order.
    pub fn survivors(&self) -> Vec<usize> {
        self.validity
            .iter()
            .enumerate()
            .filter_map(|(ix, &valid)| if valid { Some(ix) } else { None })
            .collect()
    }

    pub fn survivor_count(&self) -> usize {
        self.validity.iter().filter(|&&valid| valid).count()
    }

    /// Fraction of the candidate matches that survived.
    pub fn inlier_rate(&self) -> f64 {
        if self.validity.is_empty() {
            0.0
        } else {
            self.survivor_count() as f64 / self.validity.len() as f64
        }
    }

    /// Mean score over the valid neighbors of `a` that support it.
    ///
    /// Invalid matches and matches without support have a confidence of `0`.
    pub fn confidence(&self, a: usize, min_score: f64) -> f64 {
        if !self.validity.get(a).copied().unwrap_or(false) {
            return 0.0;
        }
        let (count, total) = self
            .matrix
            .neighbors(a)
            .filter(|&(b, score)| self.validity[b] && score >= min_score)
            .fold((0usize, 0.0), |(count, total), (_, score)| {
                (count + 1, total + score)
            });
        if count == 0 {
            0.0
        } else {
            total / count as f64
        }
    }
}

/// Removes every candidate match with fewer than `k` consistent valid
/// neighbors, repeatedly, until none is left to remove.
///
/// Each round makes every candidate pair of valid matches known (see
/// [`ConsistencyScorer::candidate_pairs`]), counts support against
/// the validity at the start of the round, and then invalidates every match
/// below `k` at once. The outcome therefore does not depend on the order in
/// which matches are visited. A match with exactly `k` supporters is kept.
pub fn prune<S>(scorer: &S, len: usize, params: &KvldParameters) -> Pruned
where
    S: ConsistencyScorer + Sync,
{
    let mut graph = ConsistencyGraph::new(scorer, len);
    let mut rounds = Vec::new();
    loop {
        let valid = graph.valid_indices();
        if valid.is_empty() {
            break;
        }
        graph.evaluate_among(&valid);
        let weak: Vec<usize> = valid
            .iter()
            .copied()
            .filter(|&a| graph.support(a, params.min_score) < params.k)
            .collect();
        for &a in &weak {
            graph.invalidate(a);
        }
        debug!(
            "pruning round {}: {} valid, {} invalidated",
            rounds.len(),
            valid.len(),
            weak.len()
        );
        rounds.push(Round {
            valid_before: valid.len(),
            invalidated: weak.len(),
        });
        if weak.is_empty() {
            break;
        }
    }
    let (matrix, validity) = graph.into_parts();
    Pruned {
        validity,
        matrix,
        rounds,
    }
}
