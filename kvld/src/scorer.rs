use crate::{Consistency, KvldParameters, LineSampler};
use kvld_core::{CandidateMatch, Keypoint};
use log::*;
use nalgebra::{Point2, Vector2};
use std::collections::HashMap;
use std::f64::consts::PI;

/// Computes the consistency of two candidate matches.
///
/// Implementations must be pure: the same pair always gives the same value,
/// whatever the order of the arguments. They never return
/// [`Consistency::Unknown`]; the graph treats it as an incompatibility.
pub trait ConsistencyScorer {
    fn score(&self, a: usize, b: usize) -> Consistency;

    /// The pairs `(a, b)` of `ids`, with `a < b` and in ascending order, that
    /// can be consistent at all. Pairs left out are never scored and never
    /// become neighbors.
    fn candidate_pairs(&self, ids: &[usize]) -> Vec<(usize, usize)> {
        all_pairs(ids)
    }
}

/// Every pair of distinct `ids` as `(low, high)`, in ascending order.
pub fn all_pairs(ids: &[usize]) -> Vec<(usize, usize)> {
    let mut pairs = Vec::with_capacity(ids.len() * ids.len().saturating_sub(1) / 2);
    for (i, &a) in ids.iter().enumerate() {
        for &b in &ids[i + 1..] {
            if a != b {
                pairs.push((a.min(b), a.max(b)));
            }
        }
    }
    pairs.sort_unstable();
    pairs.dedup();
    pairs
}

impl<F> ConsistencyScorer for F
where
    F: Fn(usize, usize) -> Consistency,
{
    fn score(&self, a: usize, b: usize) -> Consistency {
        self(a, b)
    }
}

/// Wraps an angle to `(-PI, PI]`.
pub fn wrap_angle(angle: f64) -> f64 {
    let wrapped = (angle + PI).rem_euclid(2.0 * PI) - PI;
    if wrapped <= -PI {
        wrapped + 2.0 * PI
    } else {
        wrapped
    }
}

/// The virtual line of two candidate matches, one segment per image.
#[derive(Debug, Clone, Copy)]
struct VirtualLine<'a> {
    a1: &'a Keypoint,
    a2: &'a Keypoint,
    b1: &'a Keypoint,
    b2: &'a Keypoint,
}

impl<'a> VirtualLine<'a> {
    fn first(&self) -> Vector2<f64> {
        self.b1.point - self.a1.point
    }

    fn second(&self) -> Vector2<f64> {
        self.b2.point - self.a2.point
    }
}

/// Scores candidate matches by comparing their virtual lines.
///
/// A pair passes only if both segments are long enough, lie inside the
/// neighborhood radius of their image, agree with the scale and orientation
/// change of both matches' own keypoints, and sample correlated image
/// content. The score is the photometric correlation weighted by the
/// geometric agreement.
pub struct VirtualLineScorer<'a> {
    samplers: (&'a LineSampler, &'a LineSampler),
    keypoints: (&'a [Keypoint], &'a [Keypoint]),
    candidates: &'a [CandidateMatch],
    params: KvldParameters,
    radii: (f64, f64),
}

impl<'a> VirtualLineScorer<'a> {
    /// Creates a scorer with the neighborhood radius of each image derived
    /// from the parameters' inlier rate.
    ///
    /// Every candidate must index inside the keypoint lists; otherwise the
    /// pairs it takes part in are inconsistent.
    pub fn new(
        samplers: (&'a LineSampler, &'a LineSampler),
        keypoints: (&'a [Keypoint], &'a [Keypoint]),
        candidates: &'a [CandidateMatch],
        params: KvldParameters,
    ) -> Self {
        let radius = |sampler: &LineSampler, keypoints: usize| {
            let (width, height) = sampler.dimensions();
            params.neighborhood_radius(width, height, keypoints.min(candidates.len()))
        };
        let radii = (
            radius(samplers.0, keypoints.0.len()),
            radius(samplers.1, keypoints.1.len()),
        );
        debug!(
            "virtual line neighborhood radius {:.1} px and {:.1} px",
            radii.0, radii.1
        );
        Self {
            samplers,
            keypoints,
            candidates,
            params,
            radii,
        }
    }

    /// Replaces the neighborhood radii, in pixels, of both images.
    pub fn with_radii(self, first: f64, second: f64) -> Self {
        Self {
            radii: (first, second),
            ..self
        }
    }

    pub fn radii(&self) -> (f64, f64) {
        self.radii
    }

    /// Whether both segments of the line fit in their neighborhood.
    fn within_radii(&self, line: &VirtualLine<'_>) -> bool {
        !(line.first().norm() > self.radii.0) && !(line.second().norm() > self.radii.1)
    }

    fn line(&self, a: usize, b: usize) -> Option<VirtualLine<'a>> {
        let ma = self.candidates.get(a)?;
        let mb = self.candidates.get(b)?;
        let (a1, a2) = ma.resolve(self.keypoints.0, self.keypoints.1)?;
        let (b1, b2) = mb.resolve(self.keypoints.0, self.keypoints.1)?;
        Some(VirtualLine { a1, a2, b1, b2 })
    }

    /// The largest deviation of the virtual line from the similarity implied
    /// by either match, relative to the tolerances. Above `1` is rejected.
    fn distortion(&self, line: &VirtualLine<'_>) -> f64 {
        let s1 = line.first();
        let s2 = line.second();
        let segment_scale = (s2.norm() / s1.norm()).ln();
        let segment_rotation = s2.y.atan2(s2.x) - s1.y.atan2(s1.x);
        let scale_tolerance = self.params.max_scale_distortion.ln().max(f64::EPSILON);
        let rotation_tolerance = self.params.max_orientation_distortion.max(f64::EPSILON);

        [(line.a1, line.a2), (line.b1, line.b2)]
            .iter()
            .map(|&(k1, k2)| {
                let scale = if k1.has_scale() && k2.has_scale() {
                    (segment_scale - (k2.scale / k1.scale).ln()).abs() / scale_tolerance
                } else {
                    0.0
                };
                let rotation = wrap_angle(segment_rotation - (k2.orientation - k1.orientation))
                    .abs()
                    / rotation_tolerance;
                scale.max(rotation)
            })
            .fold(0.0, f64::max)
    }

    fn evaluate(&self, line: &VirtualLine<'_>) -> Consistency {
        let l1 = line.first().norm();
        let l2 = line.second().norm();
        let min_length = self.params.min_segment_length.max(f64::EPSILON);
        if l1 < min_length || l2 < min_length {
            return Consistency::Inconsistent;
        }
        if !self.within_radii(line) {
            return Consistency::Inconsistent;
        }

        let agreement = if self.params.geometry {
            let distortion = self.distortion(line);
            if !(distortion <= 1.0) {
                return Consistency::Inconsistent;
            }
            let agreement = 1.0 - distortion;
            if agreement < self.params.min_geometric {
                return Consistency::Inconsistent;
            }
            agreement
        } else {
            1.0
        };

        let samples = self.params.samples.max(1);
        let p1 = self.samplers.0.profile(line.a1.point, line.b1.point, samples);
        let p2 = self.samplers.1.profile(line.a2.point, line.b2.point, samples);
        match p1.correlation(&p2) {
            Some(correlation) if correlation >= self.params.min_correlation => {
                Consistency::consistent(correlation.max(0.0) * agreement)
            }
            _ => Consistency::Inconsistent,
        }
    }
}

impl<'a> ConsistencyScorer for VirtualLineScorer<'a> {
    fn score(&self, a: usize, b: usize) -> Consistency {
        if a == b {
            return Consistency::Inconsistent;
        }
        // Always walk the line from the lower index so the result is symmetric.
        let (a, b) = if a < b { (a, b) } else { (b, a) };
        let value = match self.line(a, b) {
            Some(line) => self.evaluate(&line),
            None => Consistency::Inconsistent,
        };
        trace!("virtual line ({}, {}) -> {:?}", a, b, value);
        value
    }

    /// Only pairs whose segments fit in both neighborhoods.
    ///
    /// The first image keypoints are bucketed in a grid of cells the size of
    /// the first radius, so only pairs in adjacent cells are measured.
    fn candidate_pairs(&self, ids: &[usize]) -> Vec<(usize, usize)> {
        let radius = self.radii.0;
        if radius <= 0.0 {
            return Vec::new();
        }
        if !radius.is_finite() {
            return all_pairs(ids)
                .into_iter()
                .filter(|&(a, b)| self.line(a, b).map_or(false, |line| self.within_radii(&line)))
                .collect();
        }

        let cell = |point: Point2<f64>| {
            (
                (point.x / radius).floor() as i64,
                (point.y / radius).floor() as i64,
            )
        };
        let mut cells: HashMap<(i64, i64), Vec<usize>> = HashMap::new();
        for &a in ids {
            let keypoint = self
                .candidates
                .get(a)
                .and_then(|m| self.keypoints.0.get(m.0));
            if let Some(keypoint) = keypoint {
                cells.entry(cell(keypoint.point)).or_default().push(a);
            }
        }

        let mut pairs = Vec::new();
        for (&(cx, cy), members) in &cells {
            for dx in -1..=1 {
                for dy in -1..=1 {
                    let others = match cells.get(&(cx.saturating_add(dx), cy.saturating_add(dy))) {
                        Some(others) => others,
                        None => continue,
                    };
                    for &a in members {
                        for &b in others {
                            if a >= b {
                                continue;
                            }
                            if self.line(a, b).map_or(false, |line| self.within_radii(&line)) {
                                pairs.push((a, b));
                            }
                        }
                    }
                }
            }
        }
        pairs.sort_unstable();
        pairs.dedup();
        trace!(
            "{} of {} pairs fit in the neighborhood",
            pairs.len(),
            ids.len() * ids.len().saturating_sub(1) / 2
        );
        pairs
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn angles_wrap_into_half_open_range() {
        assert!((wrap_angle(3.0 * PI) - PI).abs() < 1e-12);
        assert!((wrap_angle(-PI) - PI).abs() < 1e-12);
        assert!((wrap_angle(0.5) - 0.5).abs() < 1e-12);
        assert!((wrap_angle(2.0 * PI - 0.25) + 0.25).abs() < 1e-12);
    }

    #[test]
    fn closures_are_scorers() {
        let scorer = |a: usize, b: usize| {
            if a + b == 3 {
                Consistency::Consistent(1.0)
            } else {
                Consistency::Inconsistent
            }
        };
        assert_eq!(scorer.score(1, 2), Consistency::Consistent(1.0));
        assert_eq!(scorer.score(0, 2), Consistency::Inconsistent);
        assert_eq!(scorer.candidate_pairs(&[2, 0, 1]), vec![(0, 1), (0, 2), (1, 2)]);
    }

    #[test]
    fn duplicate_ids_give_no_pairs_with_themselves() {
        assert_eq!(all_pairs(&[3, 1, 3]), vec![(1, 3)]);
        assert!(all_pairs(&[4]).is_empty());
    }
}
