use kvld_core::{sample_consensus::Model, CandidateMatch, FeatureMatch, Keypoint};
use nalgebra::{Matrix3, Point2, Point3, Rotation3, Vector3};
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64;
use two_view::{
    fundamental_least_squares, homography_least_squares, FitError, FourPoint, Homography,
    ModelEstimator, ModelKind, PixelMatch, SevenPoint,
};

const WIDTH: usize = 640;
const HEIGHT: usize = 480;
const FOCAL: f64 = 500.0;

const ROT_MAGNITUDE: f64 = 0.1;
const POINT_BOX_SIZE: f64 = 4.0;
const POINT_DISTANCE: f64 = 4.0;

const EXACT_RESIDUAL: f64 = 1e-4;
const NOISE: f64 = 0.5;

fn project(point: &Point3<f64>) -> Point2<f64> {
    Point2::new(
        FOCAL * point.x / point.z + 0.5 * WIDTH as f64,
        FOCAL * point.y / point.z + 0.5 * HEIGHT as f64,
    )
}

fn jitter(rng: &mut Pcg64, point: Point2<f64>, noise: f64) -> Point2<f64> {
    if noise == 0.0 {
        return point;
    }
    point + nalgebra::Vector2::new(rng.gen_range(-noise..noise), rng.gen_range(-noise..noise))
}

/// A random relative pose viewing points spread in depth.
struct Scene {
    rotation: Rotation3<f64>,
    translation: Vector3<f64>,
}

impl Scene {
    fn random(rng: &mut Pcg64) -> Self {
        let axis = Vector3::new(
            rng.gen_range(-1.0..1.0),
            rng.gen_range(-1.0..1.0),
            rng.gen_range(-1.0..1.0),
        );
        let translation = Vector3::new(
            rng.gen_range(0.5..1.0),
            rng.gen_range(-0.3..0.3),
            rng.gen_range(-0.3..0.3),
        );
        Self {
            rotation: Rotation3::new(axis * ROT_MAGNITUDE),
            translation,
        }
    }

    fn matches(&self, rng: &mut Pcg64, count: usize, noise: f64) -> Vec<PixelMatch> {
        (0..count)
            .map(|_| {
                let point = Point3::new(
                    rng.gen_range(-0.5..0.5) * POINT_BOX_SIZE,
                    rng.gen_range(-0.5..0.5) * POINT_BOX_SIZE,
                    POINT_DISTANCE + rng.gen_range(0.0..1.0) * POINT_BOX_SIZE,
                );
                let moved = self.rotation * point + self.translation;
                let a = jitter(rng, project(&point), noise);
                let b = jitter(rng, project(&moved), noise);
                FeatureMatch(a, b)
            })
            .collect()
    }
}

fn random_homography(rng: &mut Pcg64) -> Homography {
    Homography(Matrix3::new(
        1.0 + rng.gen_range(-0.1..0.1),
        rng.gen_range(-0.1..0.1),
        rng.gen_range(-30.0..30.0),
        rng.gen_range(-0.1..0.1),
        1.0 + rng.gen_range(-0.1..0.1),
        rng.gen_range(-30.0..30.0),
        rng.gen_range(-1e-4..1e-4),
        rng.gen_range(-1e-4..1e-4),
        1.0,
    ))
}

fn pixel(rng: &mut Pcg64) -> Point2<f64> {
    Point2::new(
        rng.gen_range(0.0..WIDTH as f64),
        rng.gen_range(0.0..HEIGHT as f64),
    )
}

fn plane_matches(
    rng: &mut Pcg64,
    homography: &Homography,
    count: usize,
    noise: f64,
) -> Vec<PixelMatch> {
    (0..count)
        .filter_map(|_| {
            let a = pixel(rng);
            let b = homography.transfer(a)?;
            Some(FeatureMatch(jitter(rng, a, noise), jitter(rng, b, noise)))
        })
        .collect()
}

fn outliers(rng: &mut Pcg64, count: usize) -> Vec<PixelMatch> {
    (0..count)
        .map(|_| FeatureMatch(pixel(rng), pixel(rng)))
        .collect()
}

#[test]
fn seven_point_randomized() {
    let mut rng = Pcg64::seed_from_u64(0);
    let solver = SevenPoint::new();
    let rounds = 200;
    let successes = (0..rounds)
        .filter(|_| {
            let scene = Scene::random(&mut rng);
            let matches = scene.matches(&mut rng, 17, 0.0);
            solver
                .from_matches(matches.iter().copied())
                .iter()
                .any(|model| matches.iter().all(|m| model.residual(m) < EXACT_RESIDUAL))
        })
        .count();
    eprintln!("successes: {}", successes);
    assert!(successes > 190);
}

#[test]
fn four_point_randomized() {
    let mut rng = Pcg64::seed_from_u64(1);
    let solver = FourPoint::new();
    let rounds = 200;
    let successes = (0..rounds)
        .filter(|_| {
            let truth = random_homography(&mut rng);
            let matches = plane_matches(&mut rng, &truth, 12, 0.0);
            solver
                .from_matches(matches.iter().copied())
                .map(|model| matches.iter().all(|m| model.residual(m) < EXACT_RESIDUAL))
                .unwrap_or(false)
        })
        .count();
    eprintln!("successes: {}", successes);
    assert!(successes > 190);
}

#[test]
fn least_squares_fits_exact_data() {
    let mut rng = Pcg64::seed_from_u64(2);
    let scene = Scene::random(&mut rng);
    let matches = scene.matches(&mut rng, 30, 0.0);
    let fundamental = fundamental_least_squares(matches.iter().copied(), 1e-12, 1000).unwrap();
    assert!(fundamental.determinant().abs() < 1e-9);
    for m in &matches {
        assert!(fundamental.residual(m) < EXACT_RESIDUAL);
    }

    let truth = random_homography(&mut rng);
    let matches = plane_matches(&mut rng, &truth, 30, 0.0);
    let homography = homography_least_squares(matches.iter().copied(), 1e-12, 1000).unwrap();
    for m in &matches {
        assert!(homography.residual(m) < EXACT_RESIDUAL);
    }
    approx::assert_relative_eq!(homography.0, truth.0, epsilon = 1e-6, max_relative = 1e-6);
}

fn count_split(inliers: &[usize], planted: usize) -> (usize, usize) {
    let true_inliers = inliers.iter().filter(|&&ix| ix < planted).count();
    (true_inliers, inliers.len() - true_inliers)
}

#[test]
fn orsa_fundamental_separates_outliers() {
    let _ = pretty_env_logger::try_init_timed();
    let mut rng = Pcg64::seed_from_u64(3);
    let scene = Scene::random(&mut rng);
    let mut data = scene.matches(&mut rng, 150, NOISE);
    data.extend(outliers(&mut rng, 50));

    let fitted = ModelEstimator::new(ModelKind::Fundamental)
        .fit_matches((WIDTH, HEIGHT), &data)
        .unwrap();
    let (true_inliers, false_inliers) = count_split(&fitted.inliers, 150);
    eprintln!(
        "threshold {:.3}, {} true and {} false inliers",
        fitted.threshold, true_inliers, false_inliers
    );
    assert!(true_inliers >= 135);
    assert!(false_inliers <= 3);
    assert!(fitted.threshold < 3.0);
    assert!(fitted.log_nfa.unwrap() < 0.0);
    for &ix in &fitted.inliers {
        assert!(fitted.accepts(data[ix].0, data[ix].1));
    }
}

#[test]
fn orsa_homography_separates_outliers() {
    let _ = pretty_env_logger::try_init_timed();
    let mut rng = Pcg64::seed_from_u64(4);
    let truth = random_homography(&mut rng);
    let mut data = plane_matches(&mut rng, &truth, 100, NOISE);
    let planted = data.len();
    data.extend(outliers(&mut rng, 60));

    let fitted = ModelEstimator::new(ModelKind::Homography)
        .fit_matches((WIDTH, HEIGHT), &data)
        .unwrap();
    let (true_inliers, false_inliers) = count_split(&fitted.inliers, planted);
    assert!(true_inliers * 10 >= planted * 9);
    assert!(false_inliers <= 1);
    assert!(fitted.threshold < 3.0);
    assert!(fitted.accepts_within(data[0].0, data[0].1, 3.0));
}

#[test]
fn arrsac_uses_fixed_precision() {
    let mut rng = Pcg64::seed_from_u64(5);
    let truth = random_homography(&mut rng);
    let mut data = plane_matches(&mut rng, &truth, 100, NOISE);
    let planted = data.len();
    data.extend(outliers(&mut rng, 60));

    let fitted = ModelEstimator::new(ModelKind::Homography)
        .precision(2.0)
        .fit_matches((WIDTH, HEIGHT), &data)
        .unwrap();
    let (true_inliers, false_inliers) = count_split(&fitted.inliers, planted);
    assert_eq!(fitted.threshold, 2.0);
    assert_eq!(fitted.log_nfa, None);
    assert!(true_inliers * 10 >= planted * 9);
    assert!(false_inliers <= 1);
}

#[test]
fn three_matches_cannot_give_a_fundamental_matrix() {
    let keypoints: Vec<Keypoint> = [(10.0, 10.0), (200.0, 40.0), (90.0, 300.0)]
        .iter()
        .map(|&(x, y)| Keypoint::new(Point2::new(x, y), 2.0, 0.0))
        .collect();
    let filtered: Vec<CandidateMatch> = (0..3).map(|ix| CandidateMatch(ix, ix)).collect();
    let error = two_view::fit((WIDTH, HEIGHT), &keypoints, &keypoints, &filtered, 0.0, false)
        .unwrap_err();
    assert_eq!(
        error,
        FitError::DegenerateConfiguration {
            matches: 3,
            required: 7
        }
    );
    assert!(error.is_degenerate());
    assert_eq!(filtered.len(), 3);

    let error = two_view::fit((WIDTH, HEIGHT), &keypoints, &keypoints, &filtered, 1.0, true)
        .unwrap_err();
    assert_eq!(
        error,
        FitError::DegenerateConfiguration {
            matches: 3,
            required: 4
        }
    );
}

#[test]
fn collinear_matches_give_no_homography() {
    let data: Vec<PixelMatch> = (0..20)
        .map(|ix| {
            let a = Point2::new(10.0 + 20.0 * ix as f64, 50.0 + 5.0 * ix as f64);
            FeatureMatch(a, Point2::new(a.x + 3.0, a.y - 1.0))
        })
        .collect();
    let error = ModelEstimator::new(ModelKind::Homography)
        .iterations(100)
        .fit_matches((WIDTH, HEIGHT), &data)
        .unwrap_err();
    assert!(error.is_degenerate());
}
