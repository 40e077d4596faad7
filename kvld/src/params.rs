#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

/// Number of inliers expected, on average, inside the neighborhood radius.
pub const NEIGHBORHOOD_INLIERS: f64 = 3.0;

/// The parameters of one K-VLD pruning attempt.
///
/// A snapshot is never modified while an attempt runs. Between attempts the
/// retry controller derives the next snapshot with [`KvldParameters::relaxed`].
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct KvldParameters {
    /// The expected fraction of candidate matches that are correct.
    ///
    /// An attempt whose surviving fraction is below this is retried with
    /// relaxed parameters. It also sets the neighborhood radius inside which
    /// virtual lines are evaluated.
    #[cfg_attr(feature = "serde-serialize", serde(default = "default_inlier_rate"))]
    pub inlier_rate: f64,
    /// The number of consistent valid neighbors a match needs to stay valid.
    #[cfg_attr(feature = "serde-serialize", serde(default = "default_k"))]
    pub k: usize,
    /// The minimum consistency score for a pair to count as support.
    #[cfg_attr(feature = "serde-serialize", serde(default = "default_min_score"))]
    pub min_score: f64,
    /// The minimum photometric correlation along a virtual line.
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_min_correlation")
    )]
    pub min_correlation: f64,
    /// The minimum geometric agreement in `[0, 1]` of a virtual line.
    #[cfg_attr(feature = "serde-serialize", serde(default = "default_min_geometric"))]
    pub min_geometric: f64,
    /// The largest tolerated ratio between the scale change of a virtual line
    /// and the scale change of a match's own keypoints.
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_max_scale_distortion")
    )]
    pub max_scale_distortion: f64,
    /// The largest tolerated difference, in radians, between the rotation of a
    /// virtual line and the rotation of a match's own keypoints.
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_max_orientation_distortion")
    )]
    pub max_orientation_distortion: f64,
    /// The number of stations sampled along a virtual line.
    #[cfg_attr(feature = "serde-serialize", serde(default = "default_samples"))]
    pub samples: usize,
    /// Virtual lines shorter than this many pixels in either image are degenerate.
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_min_segment_length")
    )]
    pub min_segment_length: f64,
    /// Whether the scale and orientation checks are applied.
    ///
    /// Without them only the photometric correlation decides.
    #[cfg_attr(feature = "serde-serialize", serde(default = "default_geometry"))]
    pub geometry: bool,
}

impl Default for KvldParameters {
    fn default() -> Self {
        Self {
            inlier_rate: default_inlier_rate(),
            k: default_k(),
            min_score: default_min_score(),
            min_correlation: default_min_correlation(),
            min_geometric: default_min_geometric(),
            max_scale_distortion: default_max_scale_distortion(),
            max_orientation_distortion: default_max_orientation_distortion(),
            samples: default_samples(),
            min_segment_length: default_min_segment_length(),
            geometry: default_geometry(),
        }
    }
}

impl KvldParameters {
    /// The parameters of the next attempt after one that kept too few matches.
    ///
    /// The target inlier rate is halved, which also widens the neighborhood
    /// radius, and the support requirement drops to at most two. Every other
    /// tolerance is kept, so the accepted set can only grow.
    pub fn relaxed(&self) -> Self {
        Self {
            inlier_rate: self.inlier_rate / 2.0,
            k: self.k.min(2),
            ..*self
        }
    }

    /// The fewest candidate matches for which pruning can keep anything.
    pub fn minimum_candidates(&self) -> usize {
        self.k + 1
    }

    /// Radius around a keypoint inside which virtual lines are evaluated.
    ///
    /// This is the radius of the disc that holds [`NEIGHBORHOOD_INLIERS`]
    /// correct matches on average, when `features * inlier_rate` correct
    /// matches are spread over a `width x height` image. Degenerate inputs
    /// give an unbounded radius.
    pub fn neighborhood_radius(&self, width: usize, height: usize, features: usize) -> f64 {
        let density = self.inlier_rate * features as f64;
        if density <= 0.0 || !density.is_finite() {
            return f64::INFINITY;
        }
        let area = (width * height) as f64;
        (NEIGHBORHOOD_INLIERS * area / (std::f64::consts::PI * density)).sqrt()
    }
}

fn default_inlier_rate() -> f64 {
    0.04
}

fn default_k() -> usize {
    3
}

fn default_min_score() -> f64 {
    0.0
}

fn default_min_correlation() -> f64 {
    0.5
}

fn default_min_geometric() -> f64 {
    0.0
}

fn default_max_scale_distortion() -> f64 {
    2.0
}

fn default_max_orientation_distortion() -> f64 {
    std::f64::consts::FRAC_PI_4
}

fn default_samples() -> usize {
    10
}

fn default_min_segment_length() -> f64 {
    3.0
}

fn default_geometry() -> bool {
    true
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn relaxation_halves_rate_and_caps_k() {
        let params = KvldParameters::default();
        let relaxed = params.relaxed();
        assert_eq!(relaxed.inlier_rate, 0.02);
        assert_eq!(relaxed.k, 2);
        assert_eq!(relaxed.relaxed().k, 2);
        assert_eq!(relaxed.min_correlation, params.min_correlation);
        let strict_one = KvldParameters { k: 1, ..params };
        assert_eq!(strict_one.relaxed().k, 1);
    }

    #[test]
    fn radius_grows_when_rate_drops() {
        let params = KvldParameters::default();
        let r0 = params.neighborhood_radius(640, 480, 500);
        let r1 = params.relaxed().neighborhood_radius(640, 480, 500);
        assert!((r1 / r0 - std::f64::consts::SQRT_2).abs() < 1e-9);
        let none = KvldParameters {
            inlier_rate: 0.0,
            ..params
        };
        assert!(none.neighborhood_radius(640, 480, 500).is_infinite());
    }
}
