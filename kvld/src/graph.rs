use crate::{Consistency, ConsistencyMatrix, ConsistencyScorer};

/// The consistency graph of one pruning attempt.
///
/// Nodes are candidate matches. An edge is a consistent pair, evaluated
/// lazily through the scorer and cached in the [`ConsistencyMatrix`]. Every
/// node also carries a validity flag which only ever goes from valid to
/// invalid.
pub struct ConsistencyGraph<'a, S> {
    scorer: &'a S,
    matrix: ConsistencyMatrix,
    validity: Vec<bool>,
}

impl<'a, S> ConsistencyGraph<'a, S>
where
    S: ConsistencyScorer,
{
    /// Creates a graph of `len` valid nodes with nothing evaluated.
    pub fn new(scorer: &'a S, len: usize) -> Self {
        Self {
            scorer,
            matrix: ConsistencyMatrix::new(len),
            validity: vec![true; len],
        }
    }

    pub fn len(&self) -> usize {
        self.validity.len()
    }

    pub fn is_empty(&self) -> bool {
        self.validity.is_empty()
    }

    /// The consistency of a pair, evaluating and caching it on first access.
    pub fn consistency(&mut self, a: usize, b: usize) -> Consistency {
        if a == b || a >= self.len() || b >= self.len() {
            return Consistency::Unknown;
        }
        match self.matrix.get(a, b) {
            Consistency::Unknown => {
                let value = match self.scorer.score(a, b) {
                    Consistency::Unknown => Consistency::Inconsistent,
                    value => value,
                };
                self.matrix.insert(a, b, value)
            }
            known => known,
        }
    }

    pub fn is_valid(&self, a: usize) -> bool {
        self.validity.get(a).copied().unwrap_or(false)
    }

    /// Marks a node invalid. Returns whether it was valid before.
    pub fn invalidate(&mut self, a: usize) -> bool {
        match self.validity.get_mut(a) {
            Some(valid) if *valid => {
                *valid = false;
                true
            }
            _ => false,
        }
    }

    pub fn valid_indices(&self) -> Vec<usize> {
        self.validity
            .iter()
            .enumerate()
            .filter_map(|(ix, &valid)| if valid { Some(ix) } else { None })
            .collect()
    }

    pub fn validity(&self) -> &[bool] {
        &self.validity
    }

    pub fn matrix(&self) -> &ConsistencyMatrix {
        &self.matrix
    }

    /// The number of valid nodes consistent with `a` at a score of at least
    /// `min_score`, among those already evaluated.
    pub fn support(&self, a: usize, min_score: f64) -> usize {
        self.matrix
            .neighbors(a)
            .filter(|&(b, score)| self.is_valid(b) && score >= min_score)
            .count()
    }

    /// Returns the matrix and validity flags, consuming the graph.
    pub fn into_parts(self) -> (ConsistencyMatrix, Vec<bool>) {
        (self.matrix, self.validity)
    }

    /// The scorer's candidate pairs among `ids` that are not known yet.
    fn unknown_pairs(&self, ids: &[usize]) -> Vec<(usize, usize)> {
        self.scorer
            .candidate_pairs(ids)
            .into_iter()
            .filter(|&(a, b)| !self.matrix.get(a, b).is_known())
            .collect()
    }
}

#[cfg(not(feature = "rayon"))]
impl<'a, S> ConsistencyGraph<'a, S>
where
    S: ConsistencyScorer,
{
    /// Evaluates every unknown candidate pair among `ids`.
    pub fn evaluate_among(&mut self, ids: &[usize]) {
        for (a, b) in self.unknown_pairs(ids) {
            self.consistency(a, b);
        }
    }
}

#[cfg(feature = "rayon")]
impl<'a, S> ConsistencyGraph<'a, S>
where
    S: ConsistencyScorer + Sync,
{
    /// Evaluates every unknown candidate pair among `ids`.
    ///
    /// Pairs are scored in parallel into a buffer which is merged into the
    /// matrix once all of them are done.
    pub fn evaluate_among(&mut self, ids: &[usize]) {
        use rayon::prelude::*;
        let scorer = self.scorer;
        let scored: Vec<(usize, usize, Consistency)> = self
            .unknown_pairs(ids)
            .into_par_iter()
            .map(|(a, b)| (a, b, scorer.score(a, b)))
            .collect();
        for (a, b, value) in scored {
            let value = match value {
                Consistency::Unknown => Consistency::Inconsistent,
                value => value,
            };
            self.matrix.insert(a, b, value);
        }
    }
}
