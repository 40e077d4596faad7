//! # K-VLD core types
//!
//! This library provides the small set of types that every crate of the
//! K-VLD workspace agrees on: keypoints as produced by a detector, candidate
//! matches as produced by nearest-neighbor descriptor matching, and resolved
//! feature matches as consumed by the two-view estimators.
//!
//! The crate works with `#![no_std]` and holds no algorithms. The
//! [`sample_consensus`] traits are re-exported so that estimators and
//! consensus algorithms across the workspace share the exact same trait
//! definitions.
//!
//! ## Virtual lines
//!
//! Two candidate matches `i` and `j` define one segment in each image, joining
//! the keypoints they use there. This pair of segments is called a virtual
//! line. If both matches are correct and the scene is locally rigid, the two
//! segments are related by a similarity and the image content along them
//! looks the same.
//!
//! ```text
//!   image 1                     image 2
//!
//!   i.0 *------------* j.0       i.1 *
//!                                     \
//!                                      \
//!                                       * j.1
//! ```

#![no_std]

mod keypoint;
mod matches;

pub use keypoint::*;
pub use matches::*;
pub use nalgebra;
pub use sample_consensus;
