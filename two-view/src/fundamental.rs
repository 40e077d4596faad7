use crate::linear::{NormalEquations, Row};
use crate::normalize::{hartley_transform, transform};
use arrayvec::ArrayVec;
use derive_more::{AsMut, AsRef, Deref, DerefMut, From, Into};
use kvld_core::{
    sample_consensus::{Estimator, Model},
    FeatureMatch, ImagePoint,
};
use nalgebra::{Matrix3, Point2, Vector3};

/// This stores a fundamental matrix, which is satisfied by the following
/// constraint:
///
/// transpose(x') * F * x = 0
///
/// Where `x` and `x'` are homogeneous pixel coordinates in the first and the
/// second image. `F * x` is the epipolar line in the second image on which
/// the match of `x` has to lie.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, AsMut, AsRef, Deref, DerefMut, From, Into)]
pub struct FundamentalMatrix(pub Matrix3<f64>);

impl FundamentalMatrix {
    /// The epipolar line `(a, b, c)` of `a x + b y + c = 0` in the second image.
    pub fn epipolar_line(&self, point: Point2<f64>) -> Vector3<f64> {
        self.0 * point.to_homogeneous()
    }

    /// Distance in pixels from `b` to the epipolar line of `a`.
    pub fn epipolar_distance(&self, a: Point2<f64>, b: Point2<f64>) -> f64 {
        let line = self.epipolar_line(a);
        let norm = line.xy().norm();
        if norm < f64::EPSILON {
            return f64::INFINITY;
        }
        line.dot(&b.to_homogeneous()).abs() / norm
    }

    /// Scales the matrix to a unit Frobenius norm.
    pub fn normalize(self) -> Self {
        let norm = self.0.norm();
        if norm > 0.0 {
            Self(self.0 / norm)
        } else {
            self
        }
    }

    /// Forces the smallest singular value to zero.
    pub fn enforce_rank2(self, epsilon: f64, max_iterations: usize) -> Option<Self> {
        let mut svd = self.0.try_svd(true, true, epsilon, max_iterations)?;
        svd.singular_values[2] = 0.0;
        svd.recompose().ok().map(Self)
    }
}

impl<P> Model<FeatureMatch<P>> for FundamentalMatrix
where
    P: ImagePoint,
{
    fn residual(&self, data: &FeatureMatch<P>) -> f64 {
        let (a, b) = data.image_points();
        self.epipolar_distance(a, b)
    }
}

/// One row of the epipolar constraint `x'^T F x = 0` in the unknowns of `F`,
/// taken row by row.
fn epipolar_row(a: Point2<f64>, b: Point2<f64>) -> Row {
    let a = a.to_homogeneous();
    let b = b.to_homogeneous();
    let mut row = Row::zeros();
    for i in 0..3 {
        for j in 0..3 {
            row[3 * i + j] = b[i] * a[j];
        }
    }
    row
}

/// Normalization transforms of both images.
fn hartley_pair<P, I>(data: I) -> Option<(Matrix3<f64>, Matrix3<f64>)>
where
    P: ImagePoint,
    I: Iterator<Item = FeatureMatch<P>> + Clone,
{
    let t1 = hartley_transform(data.clone().map(|m| m.0.image_point()))?;
    let t2 = hartley_transform(data.map(|m| m.1.image_point()))?;
    Some((t1, t2))
}

/// Undoes the normalization of a matrix estimated on normalized points.
fn denormalize(normalized: Matrix3<f64>, t1: &Matrix3<f64>, t2: &Matrix3<f64>) -> FundamentalMatrix {
    FundamentalMatrix(t2.transpose() * normalized * t1).normalize()
}

/// Real roots of `a3 x^3 + a2 x^2 + a1 x + a0`.
///
/// Falls back to the quadratic or linear case when the leading coefficients
/// vanish. Every root is polished with a few Newton steps.
pub fn real_cubic_roots(a3: f64, a2: f64, a1: f64, a0: f64) -> ArrayVec<f64, 3> {
    let scale = a3.abs().max(a2.abs()).max(a1.abs()).max(a0.abs());
    let mut roots = ArrayVec::new();
    if scale == 0.0 || !scale.is_finite() {
        return roots;
    }
    let (a3, a2, a1, a0) = (a3 / scale, a2 / scale, a1 / scale, a0 / scale);
    if a3.abs() < 1e-12 {
        if a2.abs() < 1e-12 {
            if a1.abs() > 1e-12 {
                roots.push(-a0 / a1);
            }
            return roots;
        }
        let disc = a1 * a1 - 4.0 * a2 * a0;
        if disc >= 0.0 {
            let sqrt = disc.sqrt();
            roots.push((-a1 + sqrt) / (2.0 * a2));
            if sqrt > 0.0 {
                roots.push((-a1 - sqrt) / (2.0 * a2));
            }
        }
        return roots;
    }

    let (b, c, d) = (a2 / a3, a1 / a3, a0 / a3);
    let p = c - b * b / 3.0;
    let q = 2.0 * b * b * b / 27.0 - b * c / 3.0 + d;
    let disc = q * q / 4.0 + p * p * p / 27.0;
    let shift = -b / 3.0;
    if disc > 0.0 {
        let sqrt = disc.sqrt();
        roots.push((-q / 2.0 + sqrt).cbrt() + (-q / 2.0 - sqrt).cbrt() + shift);
    } else if p.abs() < 1e-15 {
        roots.push(shift);
    } else {
        let r = 2.0 * (-p / 3.0).sqrt();
        let phi = ((3.0 * q / (2.0 * p)) * (-3.0 / p).sqrt()).clamp(-1.0, 1.0).acos() / 3.0;
        for k in 0..3 {
            roots.push(r * (phi - 2.0 * std::f64::consts::PI * k as f64 / 3.0).cos() + shift);
        }
    }

    for root in roots.iter_mut() {
        for _ in 0..3 {
            let value = ((a3 * *root + a2) * *root + a1) * *root + a0;
            let slope = (3.0 * a3 * *root + 2.0 * a2) * *root + a1;
            if slope.abs() < 1e-15 {
                break;
            }
            *root -= value / slope;
        }
    }
    roots
}

/// The seven-point algorithm for fundamental matrix estimation.
///
/// The seven constraints leave a two dimensional null space `a F1 + (1 - a) F2`.
/// The rank constraint `det(F) = 0` is a cubic in `a` with up to three real
/// roots, each of which gives a fundamental matrix of rank two. Points are
/// normalized with Hartley's method first.
#[derive(Copy, Clone, Debug)]
pub struct SevenPoint {
    pub epsilon: f64,
    pub iterations: usize,
}

impl SevenPoint {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn from_matches<P, I>(&self, data: I) -> ArrayVec<FundamentalMatrix, 3>
    where
        P: ImagePoint,
        I: Iterator<Item = FeatureMatch<P>> + Clone,
    {
        let mut models = ArrayVec::new();
        let data = data.take(7);
        let (t1, t2) = match hartley_pair(data.clone()) {
            Some(transforms) => transforms,
            None => return models,
        };
        let mut equations = NormalEquations::new();
        for m in data {
            let (a, b) = m.image_points();
            equations.push(&epipolar_row(transform(&t1, a), transform(&t2, b)));
        }
        if equations.rows() < 7 {
            return models;
        }
        let [f1, f2] = match equations.null_space::<2>(self.epsilon, self.iterations) {
            Some(space) => space,
            None => return models,
        };
        let det = |alpha: f64| (f1 * alpha + f2 * (1.0 - alpha)).determinant();
        let (p0, p1, pm1, p2) = (det(0.0), det(1.0), det(-1.0), det(2.0));
        let a0 = p0;
        let a2 = 0.5 * (p1 + pm1) - a0;
        let s = 0.5 * (p1 - pm1);
        let t = p2 - 4.0 * a2 - a0;
        let a3 = (t - 2.0 * s) / 6.0;
        let a1 = s - a3;
        for alpha in real_cubic_roots(a3, a2, a1, a0) {
            let normalized = f1 * alpha + f2 * (1.0 - alpha);
            models.push(denormalize(normalized, &t1, &t2));
        }
        models
    }
}

impl Default for SevenPoint {
    fn default() -> Self {
        Self {
            epsilon: 1e-12,
            iterations: 1000,
        }
    }
}

impl<P> Estimator<FeatureMatch<P>> for SevenPoint
where
    P: ImagePoint,
{
    type Model = FundamentalMatrix;
    type ModelIter = ArrayVec<FundamentalMatrix, 3>;
    const MIN_SAMPLES: usize = 7;

    fn estimate<I>(&self, data: I) -> Self::ModelIter
    where
        I: Iterator<Item = FeatureMatch<P>> + Clone,
    {
        self.from_matches(data)
    }
}

/// The normalized eight-point algorithm over any number of matches.
///
/// Needs at least eight matches. The result has rank two.
pub fn fundamental_least_squares<P, I>(
    data: I,
    epsilon: f64,
    iterations: usize,
) -> Option<FundamentalMatrix>
where
    P: ImagePoint,
    I: Iterator<Item = FeatureMatch<P>> + Clone,
{
    let (t1, t2) = hartley_pair(data.clone())?;
    let mut equations = NormalEquations::new();
    for m in data {
        let (a, b) = m.image_points();
        equations.push(&epipolar_row(transform(&t1, a), transform(&t2, b)));
    }
    if equations.rows() < 8 {
        return None;
    }
    let [normalized] = equations.null_space::<1>(epsilon, iterations)?;
    let normalized = FundamentalMatrix(normalized).enforce_rank2(epsilon, iterations)?;
    Some(denormalize(normalized.0, &t1, &t2))
}

#[cfg(test)]
mod test {
    use super::*;

    fn poly(roots: &[f64]) -> (f64, f64, f64, f64) {
        // (x - r0)(x - r1)(x - r2)
        let (r0, r1, r2) = (roots[0], roots[1], roots[2]);
        (
            1.0,
            -(r0 + r1 + r2),
            r0 * r1 + r0 * r2 + r1 * r2,
            -r0 * r1 * r2,
        )
    }

    fn sorted(mut roots: ArrayVec<f64, 3>) -> Vec<f64> {
        roots.sort_unstable_by_key(|&r| float_ord::FloatOrd(r));
        roots.to_vec()
    }

    #[test]
    fn cubic_with_three_roots() {
        let (a3, a2, a1, a0) = poly(&[-2.0, 0.5, 3.0]);
        let roots = sorted(real_cubic_roots(a3, a2, a1, a0));
        assert_eq!(roots.len(), 3);
        for (found, expected) in roots.iter().zip(&[-2.0, 0.5, 3.0]) {
            assert!((found - expected).abs() < 1e-9);
        }
    }

    #[test]
    fn cubic_with_one_root() {
        // (x - 1)(x^2 + 1)
        let roots = real_cubic_roots(1.0, -1.0, 1.0, -1.0);
        assert_eq!(roots.len(), 1);
        assert!((roots[0] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn degenerate_cubic_is_quadratic() {
        // 2 (x - 1)(x + 3)
        let roots = sorted(real_cubic_roots(0.0, 2.0, 4.0, -6.0));
        assert_eq!(roots.len(), 2);
        assert!((roots[0] + 3.0).abs() < 1e-12);
        assert!((roots[1] - 1.0).abs() < 1e-12);
        assert!(real_cubic_roots(0.0, 0.0, 0.0, 0.0).is_empty());
    }

    #[test]
    fn epipolar_distance_is_in_pixels() {
        // Pure horizontal motion: epipolar lines are rows.
        let f = FundamentalMatrix(Matrix3::new(0.0, 0.0, 0.0, 0.0, 0.0, -1.0, 0.0, 1.0, 0.0));
        let a = Point2::new(10.0, 20.0);
        assert!(f.epipolar_distance(a, Point2::new(50.0, 20.0)) < 1e-12);
        assert!((f.epipolar_distance(a, Point2::new(50.0, 23.0)) - 3.0).abs() < 1e-12);
    }
}
