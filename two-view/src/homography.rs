use crate::linear::{NormalEquations, Row};
use crate::normalize::{hartley_transform, transform};
use derive_more::{AsMut, AsRef, Deref, DerefMut, From, Into};
use kvld_core::{
    sample_consensus::{Estimator, Model},
    FeatureMatch, ImagePoint,
};
use nalgebra::{Matrix3, Point2};

/// Twice the area of a triangle of normalized points below which the
/// points count as collinear.
const COLLINEAR_AREA: f64 = 1e-6;

/// A plane to plane projective transform from the first image to the second,
/// `x' ~ H * x` in homogeneous pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, AsMut, AsRef, Deref, DerefMut, From, Into)]
pub struct Homography(pub Matrix3<f64>);

impl Homography {
    /// Maps a point of the first image into the second image.
    ///
    /// Returns `None` for points mapped to infinity.
    pub fn transfer(&self, point: Point2<f64>) -> Option<Point2<f64>> {
        let mapped = self.0 * point.to_homogeneous();
        if mapped.z.abs() < f64::EPSILON {
            None
        } else {
            Some(Point2::new(mapped.x / mapped.z, mapped.y / mapped.z))
        }
    }

    /// Distance in pixels between `b` and the transfer of `a`.
    pub fn transfer_error(&self, a: Point2<f64>, b: Point2<f64>) -> f64 {
        self.transfer(a)
            .map(|mapped| (mapped - b).norm())
            .unwrap_or(f64::INFINITY)
    }

    /// Scales the matrix so its bottom right entry is `1`, or to a unit
    /// Frobenius norm when that entry vanishes.
    pub fn normalize(self) -> Self {
        let corner = self.0[(2, 2)];
        if corner.abs() > 1e-12 {
            Self(self.0 / corner)
        } else {
            let norm = self.0.norm();
            if norm > 0.0 {
                Self(self.0 / norm)
            } else {
                self
            }
        }
    }
}

impl<P> Model<FeatureMatch<P>> for Homography
where
    P: ImagePoint,
{
    fn residual(&self, data: &FeatureMatch<P>) -> f64 {
        let (a, b) = data.image_points();
        self.transfer_error(a, b)
    }
}

fn transfer_rows(a: Point2<f64>, b: Point2<f64>) -> [Row; 2] {
    let mut first = Row::zeros();
    let mut second = Row::zeros();
    let a = a.to_homogeneous();
    for j in 0..3 {
        first[j] = -a[j];
        first[6 + j] = b.x * a[j];
        second[3 + j] = -a[j];
        second[6 + j] = b.y * a[j];
    }
    [first, second]
}

fn has_collinear_triple(points: &[Point2<f64>]) -> bool {
    let n = points.len();
    for i in 0..n {
        for j in i + 1..n {
            for k in j + 1..n {
                let u = points[j] - points[i];
                let v = points[k] - points[i];
                if (u.x * v.y - u.y * v.x).abs() < COLLINEAR_AREA {
                    return true;
                }
            }
        }
    }
    false
}

/// Direct linear transform over normalized points.
fn dlt<P, I>(data: I, minimum: usize, epsilon: f64, iterations: usize) -> Option<Homography>
where
    P: ImagePoint,
    I: Iterator<Item = FeatureMatch<P>> + Clone,
{
    let t1 = hartley_transform(data.clone().map(|m| m.0.image_point()))?;
    let t2 = hartley_transform(data.clone().map(|m| m.1.image_point()))?;
    let mut equations = NormalEquations::new();
    for m in data {
        let (a, b) = m.image_points();
        for row in &transfer_rows(transform(&t1, a), transform(&t2, b)) {
            equations.push(row);
        }
    }
    if equations.rows() < 2 * minimum {
        return None;
    }
    let [normalized] = equations.null_space::<1>(epsilon, iterations)?;
    let t2_inverse = t2.try_inverse()?;
    Some(Homography(t2_inverse * normalized * t1).normalize())
}

/// The four-point direct linear transform for homography estimation.
///
/// Samples in which three points of either image are collinear give no
/// model.
#[derive(Copy, Clone, Debug)]
pub struct FourPoint {
    pub epsilon: f64,
    pub iterations: usize,
}

impl FourPoint {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn from_matches<P, I>(&self, data: I) -> Option<Homography>
    where
        P: ImagePoint,
        I: Iterator<Item = FeatureMatch<P>> + Clone,
    {
        let data = data.take(4);
        let t1 = hartley_transform(data.clone().map(|m| m.0.image_point()))?;
        let t2 = hartley_transform(data.clone().map(|m| m.1.image_point()))?;
        let (first, second): (Vec<Point2<f64>>, Vec<Point2<f64>>) = data
            .clone()
            .map(|m| {
                let (a, b) = m.image_points();
                (transform(&t1, a), transform(&t2, b))
            })
            .unzip();
        if first.len() < 4 || has_collinear_triple(&first) || has_collinear_triple(&second) {
            return None;
        }
        dlt(data, 4, self.epsilon, self.iterations)
    }
}

impl Default for FourPoint {
    fn default() -> Self {
        Self {
            epsilon: 1e-12,
            iterations: 1000,
        }
    }
}

impl<P> Estimator<FeatureMatch<P>> for FourPoint
where
    P: ImagePoint,
{
    type Model = Homography;
    type ModelIter = Option<Homography>;
    const MIN_SAMPLES: usize = 4;

    fn estimate<I>(&self, data: I) -> Self::ModelIter
    where
        I: Iterator<Item = FeatureMatch<P>> + Clone,
    {
        self.from_matches(data)
    }
}

/// Least squares homography over any number of matches, at least four.
pub fn homography_least_squares<P, I>(data: I, epsilon: f64, iterations: usize) -> Option<Homography>
where
    P: ImagePoint,
    I: Iterator<Item = FeatureMatch<P>> + Clone,
{
    dlt(data, 4, epsilon, iterations)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn transfer_error_of_a_translation() {
        let h = Homography(Matrix3::new(1.0, 0.0, 5.0, 0.0, 1.0, -2.0, 0.0, 0.0, 1.0));
        let a = Point2::new(3.0, 4.0);
        assert!(h.transfer_error(a, Point2::new(8.0, 2.0)) < 1e-12);
        assert!((h.transfer_error(a, Point2::new(11.0, 8.0)) - 5.0).abs() < 1e-12);
    }

    #[test]
    fn points_at_infinity_have_infinite_error() {
        let h = Homography(Matrix3::new(1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 1.0, 0.0, -1.0));
        assert_eq!(h.transfer(Point2::new(1.0, 5.0)), None);
        assert_eq!(h.transfer_error(Point2::new(1.0, 5.0), Point2::origin()), f64::INFINITY);
    }

    #[test]
    fn collinear_samples_are_rejected() {
        let points = [
            Point2::new(0.0, 0.0),
            Point2::new(1.0, 1.0),
            Point2::new(2.0, 2.0),
            Point2::new(0.0, 3.0),
        ];
        let matches: Vec<FeatureMatch<Point2<f64>>> =
            points.iter().map(|&p| FeatureMatch(p, p)).collect();
        assert!(FourPoint::new().from_matches(matches.iter().copied()).is_none());
    }
}
