use nalgebra::DMatrix;
use std::collections::HashMap;

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

/// Sentinel used in the dense export for a pair that was never evaluated.
pub const UNKNOWN_SENTINEL: f64 = -1.0;
/// Sentinel used in the dense export for a verified incompatibility.
pub const INCONSISTENT_SENTINEL: f64 = -2.0;

/// The relationship between two candidate matches.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub enum Consistency {
    /// Not evaluated yet.
    Unknown,
    /// Evaluated and found incompatible. Never re-evaluated.
    Inconsistent,
    /// Evaluated and found compatible with the given non-negative strength.
    Consistent(f64),
}

impl Consistency {
    /// Builds a consistent value, clamping negative strengths to `0`.
    pub fn consistent(score: f64) -> Self {
        if score.is_nan() {
            Self::Inconsistent
        } else {
            Self::Consistent(score.max(0.0))
        }
    }

    pub fn is_known(self) -> bool {
        !matches!(self, Self::Unknown)
    }

    /// The strength of a consistent pair.
    pub fn score(self) -> Option<f64> {
        match self {
            Self::Consistent(score) => Some(score),
            _ => None,
        }
    }

    /// `-1` for unknown, `-2` for inconsistent, the score otherwise.
    pub fn sentinel(self) -> f64 {
        match self {
            Self::Unknown => UNKNOWN_SENTINEL,
            Self::Inconsistent => INCONSISTENT_SENTINEL,
            Self::Consistent(score) => score,
        }
    }

    /// Inverse of [`Consistency::sentinel`]. Any other negative value is
    /// treated as an incompatibility.
    pub fn from_sentinel(value: f64) -> Self {
        if value == UNKNOWN_SENTINEL {
            Self::Unknown
        } else if value >= 0.0 {
            Self::Consistent(value)
        } else {
            Self::Inconsistent
        }
    }
}

fn key(a: usize, b: usize) -> (u32, u32) {
    if a < b {
        (a as u32, b as u32)
    } else {
        (b as u32, a as u32)
    }
}

/// Cached pairwise consistency between `len` candidate matches.
///
/// Only evaluated pairs are stored, keyed by the unordered pair, so the
/// matrix is symmetric by construction and its memory is bounded by the
/// number of evaluated pairs. Every known entry is written exactly once.
/// Consistent pairs are also linked into a per-match adjacency list which
/// makes support counting linear in the number of neighbors.
#[derive(Debug, Clone, Default)]
pub struct ConsistencyMatrix {
    len: usize,
    cells: HashMap<(u32, u32), Consistency>,
    neighbors: Vec<Vec<(u32, f64)>>,
}

impl ConsistencyMatrix {
    pub fn new(len: usize) -> Self {
        Self {
            len,
            cells: HashMap::new(),
            neighbors: vec![Vec::new(); len],
        }
    }

    /// Number of candidate matches the matrix covers.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of pairs with a known value.
    pub fn evaluated(&self) -> usize {
        self.cells.len()
    }

    /// The cached value for a pair. The diagonal is always unknown.
    pub fn get(&self, a: usize, b: usize) -> Consistency {
        if a == b {
            return Consistency::Unknown;
        }
        self.cells
            .get(&key(a, b))
            .copied()
            .unwrap_or(Consistency::Unknown)
    }

    /// Stores the value of a pair that is not known yet.
    ///
    /// Returns the value now held by the matrix. Writing `Unknown`, writing
    /// the diagonal, or writing a pair that is already known leaves the
    /// matrix untouched.
    pub fn insert(&mut self, a: usize, b: usize, value: Consistency) -> Consistency {
        if a == b || a >= self.len || b >= self.len || !value.is_known() {
            return self.get(a, b);
        }
        let cell = self.cells.entry(key(a, b)).or_insert(Consistency::Unknown);
        if cell.is_known() {
            return *cell;
        }
        *cell = value;
        if let Consistency::Consistent(score) = value {
            self.neighbors[a].push((b as u32, score));
            self.neighbors[b].push((a as u32, score));
        }
        value
    }

    /// Consistent neighbors of `a` with their scores, in evaluation order.
    pub fn neighbors(&self, a: usize) -> impl Iterator<Item = (usize, f64)> + '_ {
        self.neighbors
            .get(a)
            .into_iter()
            .flatten()
            .map(|&(b, score)| (b as usize, score))
    }

    /// All consistent pairs `(a, b, score)` with `a < b`.
    pub fn consistent_pairs(&self) -> impl Iterator<Item = (usize, usize, f64)> + '_ {
        self.neighbors.iter().enumerate().flat_map(|(a, list)| {
            list.iter()
                .filter(move |&&(b, _)| a < b as usize)
                .map(move |&(b, score)| (a, b as usize, score))
        })
    }

    /// Dense `len x len` export using the `-1` / `-2` / score sentinels.
    pub fn to_sentinel_matrix(&self) -> DMatrix<f64> {
        let mut dense = DMatrix::from_element(self.len, self.len, UNKNOWN_SENTINEL);
        for (&(a, b), value) in &self.cells {
            let (a, b) = (a as usize, b as usize);
            dense[(a, b)] = value.sentinel();
            dense[(b, a)] = value.sentinel();
        }
        dense
    }
}
