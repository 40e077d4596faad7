use nalgebra::Point2;

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

/// Allows the retrieval of the point on the image the feature came from.
pub trait ImagePoint {
    /// Retrieves the point on the image
    fn image_point(&self) -> Point2<f64>;
}

/// A detected feature on an image frame in pixel coordinates.
///
/// The `scale` is the detector's notion of feature size (for instance the
/// radius of the AKAZE or SIFT support region). A scale of `0.0` means the
/// detector did not provide one, and scale checks are skipped for it.
/// The `orientation` is the dominant orientation in radians.
///
/// Keypoints are produced by an external detector and never modified
/// afterwards. The `image` tag records which view of the pair the keypoint
/// belongs to.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct Keypoint {
    pub point: Point2<f64>,
    pub scale: f64,
    pub orientation: f64,
    pub image: u32,
}

impl Keypoint {
    pub fn new(point: Point2<f64>, scale: f64, orientation: f64) -> Self {
        Self {
            point,
            scale,
            orientation,
            image: 0,
        }
    }

    /// Tags the keypoint with the index of the image it was detected in.
    pub fn in_image(self, image: u32) -> Self {
        Self { image, ..self }
    }

    /// Returns `true` if the detector supplied a usable scale.
    pub fn has_scale(&self) -> bool {
        self.scale > 0.0 && self.scale.is_finite()
    }
}

impl ImagePoint for Keypoint {
    fn image_point(&self) -> Point2<f64> {
        self.point
    }
}

impl ImagePoint for Point2<f64> {
    fn image_point(&self) -> Point2<f64> {
        *self
    }
}
