use crate::{ImagePoint, Keypoint};

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

/// An unverified correspondence given as the index of a keypoint in the first
/// image and the index of a keypoint in the second image.
///
/// A candidate is identified by its position in the ordered candidate list,
/// which is the index every consistency structure uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct CandidateMatch(pub usize, pub usize);

impl CandidateMatch {
    /// Looks up the two keypoints this candidate refers to.
    ///
    /// Returns `None` if either index is past the end of its keypoint list.
    pub fn resolve<'a>(
        &self,
        keypoints1: &'a [Keypoint],
        keypoints2: &'a [Keypoint],
    ) -> Option<(&'a Keypoint, &'a Keypoint)> {
        Some((keypoints1.get(self.0)?, keypoints2.get(self.1)?))
    }
}

/// Keypoint match between the two images of a pair
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct FeatureMatch<P>(pub P, pub P);

impl<P: ImagePoint> FeatureMatch<P> {
    /// Both image points, first image then second image.
    pub fn image_points(&self) -> (nalgebra::Point2<f64>, nalgebra::Point2<f64>) {
        (self.0.image_point(), self.1.image_point())
    }
}
