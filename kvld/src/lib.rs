//! # K-VLD
//!
//! K-VLD (K virtual line descriptors) removes wrong candidate matches between
//! two images by asking every match whether its neighbors agree with it.
//!
//! Two candidate matches define a virtual line: one segment in each image,
//! between the keypoints they use there (see [`kvld_core`]). When both matches
//! are correct the two segments are related by the local similarity of the
//! scene, which the keypoints' own scale and orientation already predict, and
//! the image content sampled along them correlates. A [`VirtualLineScorer`]
//! turns this into a [`Consistency`] for every pair.
//!
//! A match is kept if at least `k` other kept matches are consistent with it.
//! [`prune`] finds the largest such set by removing unsupported matches in
//! rounds. If too few matches remain for the expected inlier rate,
//! [`run_with_retry`] starts over with relaxed parameters.
//!
//! [`Kvld::filter`] bundles all of this for one image pair:
//!
//! ```no_run
//! use kvld::{GrayFloatImage, Kvld};
//! # fn run(a: &image::DynamicImage, b: &image::DynamicImage,
//! #        k1: &[kvld_core::Keypoint], k2: &[kvld_core::Keypoint],
//! #        candidates: &[kvld_core::CandidateMatch]) -> kvld::Result<()> {
//! let image1 = GrayFloatImage::from_dynamic(a);
//! let image2 = GrayFloatImage::from_dynamic(b);
//! let filtered = Kvld::default().filter(&image1, &image2, k1, k2, candidates)?;
//! println!("kept {} matches", filtered.matches.len());
//! # Ok(())
//! # }
//! ```

mod consistency;
mod error;
mod graph;
mod image;
mod params;
mod prune;
mod retry;
mod sampling;
mod scorer;

pub use consistency::*;
pub use error::*;
pub use graph::*;
pub use crate::image::*;
pub use params::*;
pub use prune::*;
pub use retry::*;
pub use sampling::*;
pub use scorer::*;

use float_ord::FloatOrd;
use kvld_core::{CandidateMatch, Keypoint};
use log::*;

/// The matches that survived filtering, with everything needed to inspect
/// how they were chosen.
#[derive(Debug, Clone)]
pub struct Filtered {
    /// The surviving candidate matches, in candidate order.
    pub matches: Vec<CandidateMatch>,
    /// The position of every surviving match in the candidate list.
    pub indices: Vec<usize>,
    /// The confidence of every surviving match, parallel to `matches`.
    pub scores: Vec<f64>,
    /// Validity of every candidate match after the kept attempt.
    pub validity: Vec<bool>,
    /// Every pair the kept attempt evaluated.
    pub consistency: ConsistencyMatrix,
    /// The parameters of the kept attempt.
    pub parameters: KvldParameters,
    /// One report per pruning attempt, the kept attempt last.
    pub attempts: Vec<Attempt>,
    /// Fraction of the candidate matches that survived.
    pub inlier_rate: f64,
}

impl Filtered {
    /// The surviving matches of a filtering result, or none when the
    /// candidates were too few to filter.
    ///
    /// Other errors are passed on.
    pub fn matches_or_empty(result: Result<Self>) -> Result<Vec<CandidateMatch>> {
        match result {
            Ok(filtered) => Ok(filtered.matches),
            Err(KvldError::InsufficientMatches { found, required }) => {
                debug!(
                    "{} candidates are fewer than the {} needed, keeping none",
                    found, required
                );
                Ok(Vec::new())
            }
            Err(e) => Err(e),
        }
    }

    /// Consistent pairs of surviving matches as `(a, b, score)` candidate
    /// indices with `a < b`.
    pub fn consistent_pairs(&self) -> impl Iterator<Item = (usize, usize, f64)> + '_ {
        self.consistency
            .consistent_pairs()
            .filter(move |&(a, b, _)| self.validity[a] && self.validity[b])
    }

    /// Positions into `matches`, from the most to the least confident match.
    pub fn ranked(&self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.matches.len()).collect();
        order.sort_by_key(|&ix| core::cmp::Reverse(FloatOrd(self.scores[ix])));
        order
    }
}

/// K-VLD filtering of the candidate matches of one image pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Kvld {
    pub parameters: KvldParameters,
    /// Pruning attempts made before settling for the last one.
    pub max_attempts: usize,
}

impl Default for Kvld {
    fn default() -> Self {
        Self {
            parameters: KvldParameters::default(),
            max_attempts: 5,
        }
    }
}

impl Kvld {
    pub fn new(parameters: KvldParameters) -> Self {
        Self {
            parameters,
            ..Default::default()
        }
    }

    pub fn max_attempts(self, max_attempts: usize) -> Self {
        Self {
            max_attempts,
            ..self
        }
    }

    /// Filters `candidates`, which index into `keypoints1` and `keypoints2`.
    ///
    /// Returns [`KvldError::InsufficientMatches`] when there are fewer than
    /// `k + 1` candidates, since no match could ever gather its support.
    /// Pruning is skipped and the filtered set is empty: callers that only
    /// need the matches use [`Filtered::matches_or_empty`] and keep the error
    /// out of their own error path, while the error still tells a skipped
    /// run apart from one that rejected every candidate.
    /// Running out of attempts is not an error: the last attempt is returned
    /// and its `inlier_rate` shows how far it fell short.
    pub fn filter(
        &self,
        image1: &GrayFloatImage,
        image2: &GrayFloatImage,
        keypoints1: &[Keypoint],
        keypoints2: &[Keypoint],
        candidates: &[CandidateMatch],
    ) -> Result<Filtered> {
        for (candidate, &CandidateMatch(a, b)) in candidates.iter().enumerate() {
            if a >= keypoints1.len() {
                return Err(KvldError::KeypointOutOfRange {
                    candidate,
                    image: 0,
                    index: a,
                    len: keypoints1.len(),
                });
            }
            if b >= keypoints2.len() {
                return Err(KvldError::KeypointOutOfRange {
                    candidate,
                    image: 1,
                    index: b,
                    len: keypoints2.len(),
                });
            }
        }
        let required = self.parameters.minimum_candidates();
        if candidates.len() < required {
            warn!(
                "only {} candidate matches, K-VLD needs at least {}",
                candidates.len(),
                required
            );
            return Err(KvldError::InsufficientMatches {
                found: candidates.len(),
                required,
            });
        }

        let sampler1 = LineSampler::new(image1);
        let sampler2 = LineSampler::new(image2);
        let outcome = run_with_retry(
            candidates.len(),
            self.parameters,
            self.max_attempts,
            |params| {
                let scorer = VirtualLineScorer::new(
                    (&sampler1, &sampler2),
                    (keypoints1, keypoints2),
                    candidates,
                    *params,
                );
                prune(&scorer, candidates.len(), params)
            },
        );

        let RetryOutcome {
            pruned,
            params,
            attempts,
        } = outcome;
        let indices = pruned.survivors();
        let matches = indices.iter().map(|&ix| candidates[ix]).collect();
        let scores = indices
            .iter()
            .map(|&ix| pruned.confidence(ix, params.min_score))
            .collect();
        let inlier_rate = pruned.inlier_rate();
        info!(
            "K-VLD kept {} of {} candidate matches after {} attempts",
            indices.len(),
            candidates.len(),
            attempts.len()
        );
        Ok(Filtered {
            matches,
            indices,
            scores,
            validity: pruned.validity,
            consistency: pruned.matrix,
            parameters: params,
            attempts,
            inlier_rate,
        })
    }
}
