//! # Two-view geometry
//!
//! Robust estimation of the model relating two images of a scene from pixel
//! matches: a [`FundamentalMatrix`] for general scenes, or a [`Homography`]
//! for planar scenes and camera rotations.
//!
//! The minimal solvers [`SevenPoint`] and [`FourPoint`] implement
//! [`sample_consensus::Estimator`](kvld_core::sample_consensus::Estimator) so
//! they can be used with any consensus algorithm. [`ModelEstimator`] wraps
//! them with a contrario RANSAC ([`orsa::Orsa`]), which chooses the inlier
//! threshold itself, or with ARRSAC when the caller fixes the precision, and
//! finishes with a least squares refit on the inliers.

mod fit;
mod fundamental;
mod homography;
mod linear;
mod normalize;

pub use fit::*;
pub use fundamental::*;
pub use homography::*;
pub use normalize::*;
