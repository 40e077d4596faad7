use nalgebra::{Matrix3, Point2};

/// Computes the similarity of Hartley's normalization.
///
/// The returned transform moves the centroid of the points to the origin
/// and scales them so that their mean distance to it is `sqrt(2)`. Returns
/// `None` for no points or for points that all coincide.
pub fn hartley_transform<I>(points: I) -> Option<Matrix3<f64>>
where
    I: Iterator<Item = Point2<f64>> + Clone,
{
    let (count, sum) = points
        .clone()
        .fold((0usize, Point2::origin().coords), |(count, sum), p| {
            (count + 1, sum + p.coords)
        });
    if count == 0 {
        return None;
    }
    let centroid = sum / count as f64;
    let mean_distance = points.map(|p| (p.coords - centroid).norm()).sum::<f64>() / count as f64;
    if !(mean_distance > 1e-12) {
        return None;
    }
    let s = std::f64::consts::SQRT_2 / mean_distance;
    Some(Matrix3::new(
        s,
        0.0,
        -s * centroid.x,
        0.0,
        s,
        -s * centroid.y,
        0.0,
        0.0,
        1.0,
    ))
}

/// Applies a normalization transform to a point.
pub fn transform(t: &Matrix3<f64>, p: Point2<f64>) -> Point2<f64> {
    Point2::new(
        t[(0, 0)] * p.x + t[(0, 2)],
        t[(1, 1)] * p.y + t[(1, 2)],
    )
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn normalized_points_are_centered_at_unit_scale() {
        let points = [
            Point2::new(10.0, 20.0),
            Point2::new(110.0, 20.0),
            Point2::new(10.0, 220.0),
            Point2::new(300.0, 40.0),
        ];
        let t = hartley_transform(points.iter().copied()).unwrap();
        let normalized: Vec<Point2<f64>> = points.iter().map(|&p| transform(&t, p)).collect();
        let centroid = normalized.iter().map(|p| p.coords).sum::<nalgebra::Vector2<f64>>() / 4.0;
        assert!(centroid.norm() < 1e-12);
        let mean = normalized.iter().map(|p| p.coords.norm()).sum::<f64>() / 4.0;
        assert!((mean - std::f64::consts::SQRT_2).abs() < 1e-12);
    }

    #[test]
    fn coincident_points_cannot_be_normalized() {
        let points = [Point2::new(3.0, 4.0); 5];
        assert!(hartley_transform(points.iter().copied()).is_none());
        assert!(hartley_transform(core::iter::empty()).is_none());
    }
}
