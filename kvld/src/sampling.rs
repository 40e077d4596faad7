use crate::image::{gaussian_blur, GrayFloatImage};
use log::*;
use nalgebra::{Point2, Vector2};

/// Number of taps across the line at every station.
pub const LATERAL_TAPS: usize = 3;
/// Smoothing applied to the full resolution image before sampling.
const BASE_SIGMA: f32 = 0.5;
/// Smoothing applied before every halving.
const OCTAVE_SIGMA: f32 = 1.0;
/// Levels stop being built once a side would drop below this.
const MIN_LEVEL_SIZE: usize = 16;
const MAX_LEVELS: usize = 8;
/// Sum of squared deviations below which a profile channel is flat.
const FLAT_VARIANCE: f64 = 1e-10;

#[derive(Debug, Clone)]
struct Level {
    intensity: GrayFloatImage,
    dx: GrayFloatImage,
    dy: GrayFloatImage,
    /// Full resolution pixels per pixel of this level.
    step: f64,
}

impl Level {
    fn new(intensity: GrayFloatImage, step: f64) -> Self {
        let (dx, dy) = intensity.gradients();
        Self {
            intensity,
            dx,
            dy,
            step,
        }
    }

    /// Maps a full resolution position onto this level's pixel grid.
    fn to_level(&self, p: Point2<f64>) -> Point2<f64> {
        let offset = 0.5 * (self.step - 1.0);
        Point2::new((p.x - offset) / self.step, (p.y - offset) / self.step)
    }
}

/// Intensity and gradient profile sampled along one virtual line.
///
/// `intensity` holds one value per tap. `gradient` holds two values per tap:
/// the image gradient projected on the line direction, then on its normal.
/// Both are laid out station by station, lateral taps from left to right,
/// so two profiles taken with the same number of stations line up.
#[derive(Debug, Clone, PartialEq)]
pub struct LineProfile {
    pub intensity: Vec<f32>,
    pub gradient: Vec<f32>,
}

impl LineProfile {
    /// Photometric agreement of two profiles in `[-1, 1]`.
    ///
    /// This is the mean of the normalized correlation of the intensities
    /// and of the projected gradients, over whichever of the two are defined.
    /// Returns `None` if both channels are flat in either profile.
    pub fn correlation(&self, other: &Self) -> Option<f64> {
        let intensity = normalized_correlation(&self.intensity, &other.intensity);
        let gradient = normalized_correlation(&self.gradient, &other.gradient);
        match (intensity, gradient) {
            (Some(a), Some(b)) => Some(0.5 * (a + b)),
            (Some(c), None) | (None, Some(c)) => Some(c),
            (None, None) => None,
        }
    }
}

/// Zero mean normalized cross correlation of two equally long sequences.
///
/// Returns `None` when the lengths differ, when they are empty, or when
/// either sequence has no variance.
pub fn normalized_correlation(a: &[f32], b: &[f32]) -> Option<f64> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }
    let n = a.len() as f64;
    let mean_a = a.iter().map(|&v| f64::from(v)).sum::<f64>() / n;
    let mean_b = b.iter().map(|&v| f64::from(v)).sum::<f64>() / n;
    let (mut ab, mut aa, mut bb) = (0.0, 0.0, 0.0);
    for (&va, &vb) in a.iter().zip(b) {
        let da = f64::from(va) - mean_a;
        let db = f64::from(vb) - mean_b;
        ab += da * db;
        aa += da * da;
        bb += db * db;
    }
    if aa < FLAT_VARIANCE || bb < FLAT_VARIANCE {
        return None;
    }
    Some((ab / (aa * bb).sqrt()).clamp(-1.0, 1.0))
}

/// Samples intensity and gradient along segments of one image.
///
/// A small Gaussian pyramid is built once per image. Every segment is read
/// from the level whose pixel spacing matches the spacing of its taps, so
/// that a segment and its scaled copy in the other image are read at the
/// same relative smoothing.
#[derive(Debug, Clone)]
pub struct LineSampler {
    levels: Vec<Level>,
    dimensions: (usize, usize),
}

impl LineSampler {
    pub fn new(image: &GrayFloatImage) -> Self {
        Self::with_max_levels(image, MAX_LEVELS)
    }

    /// Builds at most `max_levels` pyramid levels (at least one).
    pub fn with_max_levels(image: &GrayFloatImage, max_levels: usize) -> Self {
        let mut levels = vec![Level::new(gaussian_blur(image, BASE_SIGMA), 1.0)];
        while levels.len() < max_levels.max(1) {
            let last = &levels[levels.len() - 1];
            let (width, height) = last.intensity.dimensions();
            if width / 2 < MIN_LEVEL_SIZE || height / 2 < MIN_LEVEL_SIZE {
                break;
            }
            let next = gaussian_blur(&last.intensity, OCTAVE_SIGMA).half_size();
            let step = last.step * 2.0;
            levels.push(Level::new(next, step));
        }
        debug!(
            "built {} sampling levels for a {} x {} image",
            levels.len(),
            image.width(),
            image.height()
        );
        Self {
            levels,
            dimensions: image.dimensions(),
        }
    }

    /// `(width, height)` of the full resolution image.
    pub fn dimensions(&self) -> (usize, usize) {
        self.dimensions
    }

    pub fn levels(&self) -> usize {
        self.levels.len()
    }

    fn level_for_spacing(&self, spacing: f64) -> &Level {
        let ix = if spacing > 1.0 {
            spacing.log2().floor() as usize
        } else {
            0
        };
        &self.levels[ix.min(self.levels.len() - 1)]
    }

    /// Samples `samples` stations along the segment `from -> to`.
    ///
    /// Stations sit at `t = (k + 0.5) / samples`. Each station has
    /// [`LATERAL_TAPS`] taps across the line, spaced by
    /// `length / (2 * samples)` so the pattern scales with the segment.
    pub fn profile(&self, from: Point2<f64>, to: Point2<f64>, samples: usize) -> LineProfile {
        let taps = samples * LATERAL_TAPS;
        let mut profile = LineProfile {
            intensity: Vec::with_capacity(taps),
            gradient: Vec::with_capacity(2 * taps),
        };
        let segment = to - from;
        let length = segment.norm();
        let (along, across) = if length > f64::EPSILON {
            let u = segment / length;
            (u, Vector2::new(-u.y, u.x))
        } else {
            (Vector2::zeros(), Vector2::zeros())
        };
        let spacing = length / (2.0 * samples.max(1) as f64);
        let level = self.level_for_spacing(spacing);
        let half = (LATERAL_TAPS / 2) as f64;
        for k in 0..samples {
            let t = (k as f64 + 0.5) / samples as f64;
            let station = from + segment * t;
            for tap in 0..LATERAL_TAPS {
                let offset = (tap as f64 - half) * spacing;
                let p = level.to_level(station + across * offset);
                let gx = f64::from(level.dx.sample(p.x, p.y));
                let gy = f64::from(level.dy.sample(p.x, p.y));
                let gradient = Vector2::new(gx, gy);
                profile.intensity.push(level.intensity.sample(p.x, p.y));
                profile.gradient.push(gradient.dot(&along) as f32);
                profile.gradient.push(gradient.dot(&across) as f32);
            }
        }
        profile
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texture(x: f64, y: f64) -> f32 {
        (0.5 + 0.25 * (0.21 * x).sin() * (0.17 * y).cos() + 0.2 * (0.05 * (x + 2.0 * y)).sin())
            as f32
    }

    #[test]
    fn correlation_of_identical_sequences_is_one() {
        let a = [0.1, 0.5, 0.2, 0.9, 0.4];
        let c = normalized_correlation(&a, &a).unwrap();
        assert!((c - 1.0).abs() < 1e-9);
    }

    #[test]
    fn correlation_ignores_gain_and_offset() {
        let a = [0.1f32, 0.5, 0.2, 0.9, 0.4];
        let b: Vec<f32> = a.iter().map(|v| 0.3 + 0.5 * v).collect();
        let c = normalized_correlation(&a, &b).unwrap();
        assert!((c - 1.0).abs() < 1e-6);
        let inverted: Vec<f32> = a.iter().map(|v| 1.0 - v).collect();
        let c = normalized_correlation(&a, &inverted).unwrap();
        assert!((c + 1.0).abs() < 1e-6);
    }

    #[test]
    fn flat_sequence_has_no_correlation() {
        assert_eq!(normalized_correlation(&[0.5; 6], &[0.1, 0.2, 0.3, 0.4, 0.5, 0.6]), None);
        assert_eq!(normalized_correlation(&[0.5; 3], &[0.5; 4]), None);
    }

    #[test]
    fn translated_image_gives_same_profile() {
        let image_a = GrayFloatImage::from_fn(128, 128, |x, y| texture(x as f64, y as f64));
        let image_b =
            GrayFloatImage::from_fn(128, 128, |x, y| texture(x as f64 - 7.0, y as f64 - 4.0));
        let sampler_a = LineSampler::with_max_levels(&image_a, 1);
        let sampler_b = LineSampler::with_max_levels(&image_b, 1);
        let from = Point2::new(40.0, 50.0);
        let to = Point2::new(80.0, 70.0);
        let shift = Vector2::new(7.0, 4.0);
        let a = sampler_a.profile(from, to, 10);
        let b = sampler_b.profile(from + shift, to + shift, 10);
        assert_eq!(a.intensity.len(), 10 * LATERAL_TAPS);
        assert_eq!(a.gradient.len(), 20 * LATERAL_TAPS);
        let c = a.correlation(&b).unwrap();
        assert!(c > 0.99, "correlation {}", c);
    }

    #[test]
    fn flat_image_profile_is_undefined() {
        let image = GrayFloatImage::from_fn(64, 64, |_, _| 0.4);
        let sampler = LineSampler::new(&image);
        let p = sampler.profile(Point2::new(10.0, 10.0), Point2::new(50.0, 30.0), 8);
        assert_eq!(p.correlation(&p), None);
    }

    #[test]
    fn pyramid_stops_at_minimum_size() {
        let image = GrayFloatImage::new(100, 40);
        let sampler = LineSampler::new(&image);
        // 100x40 -> 50x20 -> stop (10 < 16).
        assert_eq!(sampler.levels(), 2);
        assert_eq!(sampler.dimensions(), (100, 40));
    }
}
