use crate::{
    fundamental_least_squares, homography_least_squares, FourPoint, FundamentalMatrix,
    Homography, SevenPoint,
};
use arrsac::Arrsac;
use kvld_core::{
    sample_consensus::{Consensus, Estimator},
    CandidateMatch, FeatureMatch, Keypoint,
};
use log::*;
use nalgebra::{Matrix3, Point2};
use orsa::Orsa;
use rand::SeedableRng;
use rand_pcg::Pcg64;
use thiserror::Error;

pub type PixelMatch = FeatureMatch<Point2<f64>>;

/// The family of the global model relating the two images.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelKind {
    /// Epipolar geometry of a general scene, 7 degrees of freedom.
    Fundamental,
    /// Plane or pure rotation, 8 degrees of freedom.
    Homography,
}

impl ModelKind {
    /// Size of a minimal sample.
    pub fn min_samples(self) -> usize {
        match self {
            Self::Fundamental => <SevenPoint as Estimator<PixelMatch>>::MIN_SAMPLES,
            Self::Homography => <FourPoint as Estimator<PixelMatch>>::MIN_SAMPLES,
        }
    }

    /// Size of the smallest least squares refit.
    fn refit_samples(self) -> usize {
        match self {
            Self::Fundamental => 8,
            Self::Homography => 4,
        }
    }

    /// Hypotheses one minimal sample can produce.
    fn models_per_sample(self) -> usize {
        match self {
            Self::Fundamental => 3,
            Self::Homography => 1,
        }
    }

    /// `log10` of the probability factor and the exponent of the residual,
    /// for a residual measured in the second image of `dimensions`.
    ///
    /// A random point lies within `eps` of an epipolar line with probability
    /// `2 D eps / A`, and within `eps` of a transferred point with
    /// probability `pi eps^2 / A`, where `D` is the image diagonal and `A`
    /// its area.
    fn error_model(self, (width, height): (usize, usize)) -> (f64, f64) {
        let (width, height) = (width.max(1) as f64, height.max(1) as f64);
        let area = width * height;
        match self {
            Self::Fundamental => {
                let diagonal = (width * width + height * height).sqrt();
                ((2.0 * diagonal / area).log10(), 1.0)
            }
            Self::Homography => ((std::f64::consts::PI / area).log10(), 2.0),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FitError {
    #[error("{matches} matches cannot support a model that needs {required}")]
    DegenerateConfiguration { matches: usize, required: usize },
    #[error("no meaningful model explains the {matches} matches")]
    NoConsensus { matches: usize },
}

impl FitError {
    /// Every fit error means the matches did not determine a model.
    pub fn is_degenerate(&self) -> bool {
        matches!(
            self,
            Self::DegenerateConfiguration { .. } | Self::NoConsensus { .. }
        )
    }
}

/// A fitted global model and the precision it was accepted with.
#[derive(Debug, Clone, PartialEq)]
pub struct FittedModel {
    pub kind: ModelKind,
    pub matrix: Matrix3<f64>,
    /// Largest residual, in pixels, of an accepted match.
    pub threshold: f64,
    /// Positions of the accepted matches in the list given to the fit.
    pub inliers: Vec<usize>,
    /// `log10` of the number of false alarms, when the threshold was chosen
    /// automatically.
    pub log_nfa: Option<f64>,
}

impl FittedModel {
    /// Residual in pixels of the match `a -> b`.
    pub fn residual(&self, a: Point2<f64>, b: Point2<f64>) -> f64 {
        match self.kind {
            ModelKind::Fundamental => FundamentalMatrix(self.matrix).epipolar_distance(a, b),
            ModelKind::Homography => Homography(self.matrix).transfer_error(a, b),
        }
    }

    /// Whether `a -> b` agrees with the model within its threshold.
    pub fn accepts(&self, a: Point2<f64>, b: Point2<f64>) -> bool {
        self.accepts_within(a, b, self.threshold)
    }

    pub fn accepts_within(&self, a: Point2<f64>, b: Point2<f64>, precision: f64) -> bool {
        self.residual(a, b) <= precision
    }
}

/// Configures the robust fit of a global model to filtered matches.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelEstimator {
    pub kind: ModelKind,
    /// Inlier threshold in pixels. `0` lets a contrario RANSAC choose it.
    pub precision: f64,
    pub iterations: usize,
    pub seed: u64,
    pub epsilon: f64,
    pub max_iterations: usize,
}

impl Default for ModelEstimator {
    fn default() -> Self {
        Self {
            kind: ModelKind::Fundamental,
            precision: 0.0,
            iterations: 1000,
            seed: 0,
            epsilon: 1e-12,
            max_iterations: 1000,
        }
    }
}

impl ModelEstimator {
    pub fn new(kind: ModelKind) -> Self {
        Self {
            kind,
            ..Default::default()
        }
    }

    pub fn precision(self, precision: f64) -> Self {
        Self { precision, ..self }
    }

    pub fn iterations(self, iterations: usize) -> Self {
        Self { iterations, ..self }
    }

    pub fn seed(self, seed: u64) -> Self {
        Self { seed, ..self }
    }

    /// Fits the model to `matches`, which index into the keypoint lists.
    ///
    /// `dimensions2` is the `(width, height)` of the second image, in which
    /// residuals are measured.
    pub fn fit(
        &self,
        dimensions2: (usize, usize),
        keypoints1: &[Keypoint],
        keypoints2: &[Keypoint],
        matches: &[CandidateMatch],
    ) -> Result<FittedModel, FitError> {
        let data: Vec<PixelMatch> = matches
            .iter()
            .filter_map(|m| m.resolve(keypoints1, keypoints2))
            .map(|(a, b)| FeatureMatch(a.point, b.point))
            .collect();
        if data.len() != matches.len() {
            warn!(
                "{} matches refer to missing keypoints",
                matches.len() - data.len()
            );
            return Err(FitError::DegenerateConfiguration {
                matches: data.len(),
                required: self.kind.min_samples(),
            });
        }
        self.fit_matches(dimensions2, &data)
    }

    /// Fits the model to resolved pixel matches.
    pub fn fit_matches(
        &self,
        dimensions2: (usize, usize),
        data: &[PixelMatch],
    ) -> Result<FittedModel, FitError> {
        let required = self.kind.min_samples();
        if data.len() < required {
            return Err(FitError::DegenerateConfiguration {
                matches: data.len(),
                required,
            });
        }
        let seven_point = SevenPoint {
            epsilon: self.epsilon,
            iterations: self.max_iterations,
        };
        let four_point = FourPoint {
            epsilon: self.epsilon,
            iterations: self.max_iterations,
        };
        let automatic = !(self.precision > 0.0);
        let found = match self.kind {
            ModelKind::Fundamental => self
                .consensus(&seven_point, dimensions2, data)
                .map(|(model, inliers, threshold, log_nfa)| (model.0, inliers, threshold, log_nfa)),
            ModelKind::Homography => self
                .consensus(&four_point, dimensions2, data)
                .map(|(model, inliers, threshold, log_nfa)| (model.0, inliers, threshold, log_nfa)),
        };
        let (matrix, inliers, threshold, log_nfa) = match found {
            Some(found) => found,
            None if automatic => return Err(FitError::NoConsensus { matches: data.len() }),
            None => {
                return Err(FitError::DegenerateConfiguration {
                    matches: data.len(),
                    required,
                })
            }
        };
        let mut fitted = FittedModel {
            kind: self.kind,
            matrix,
            threshold,
            inliers,
            log_nfa,
        };
        self.refine(&mut fitted, data);
        info!(
            "{:?} model accepts {} of {} matches at {:.3} px",
            self.kind,
            fitted.inliers.len(),
            data.len(),
            fitted.threshold
        );
        Ok(fitted)
    }

    /// Runs a contrario RANSAC or, with a fixed precision, ARRSAC.
    #[allow(clippy::type_complexity)]
    fn consensus<E>(
        &self,
        estimator: &E,
        dimensions2: (usize, usize),
        data: &[PixelMatch],
    ) -> Option<(E::Model, Vec<usize>, f64, Option<f64>)>
    where
        E: Estimator<PixelMatch>,
    {
        let rng = Pcg64::seed_from_u64(self.seed);
        if self.precision > 0.0 {
            let mut arrsac = Arrsac::new(self.precision, rng);
            let (model, inliers) = arrsac.model_inliers(estimator, data.iter().copied())?;
            Some((model, inliers.into_iter().collect(), self.precision, None))
        } else {
            let (log_alpha0, exponent) = self.kind.error_model(dimensions2);
            let mut orsa = Orsa::new(rng)
                .iterations(self.iterations)
                .error_model(log_alpha0, exponent)
                .models_per_sample(self.kind.models_per_sample());
            let fit = orsa.fit(estimator, data.iter().copied())?;
            Some((fit.model, fit.inliers, fit.threshold, Some(fit.log_nfa)))
        }
    }

    /// Replaces the model by a least squares fit to its inliers, as long as
    /// that does not lose any inlier at the same threshold.
    fn refine(&self, fitted: &mut FittedModel, data: &[PixelMatch]) {
        if fitted.inliers.len() < self.kind.refit_samples() {
            return;
        }
        let inliers = fitted.inliers.iter().map(|&ix| data[ix]);
        let refit = match self.kind {
            ModelKind::Fundamental => {
                fundamental_least_squares(inliers, self.epsilon, self.max_iterations).map(|f| f.0)
            }
            ModelKind::Homography => {
                homography_least_squares(inliers, self.epsilon, self.max_iterations).map(|h| h.0)
            }
        };
        let refit = match refit {
            Some(matrix) => FittedModel {
                matrix,
                inliers: Vec::new(),
                ..fitted.clone()
            },
            None => return,
        };
        let accepted: Vec<usize> = data
            .iter()
            .enumerate()
            .filter(|(_, m)| refit.accepts(m.0, m.1))
            .map(|(ix, _)| ix)
            .collect();
        if accepted.len() >= fitted.inliers.len() {
            debug!(
                "least squares refit accepts {} matches instead of {}",
                accepted.len(),
                fitted.inliers.len()
            );
            fitted.matrix = refit.matrix;
            fitted.inliers = accepted;
        }
    }
}

/// Fits a fundamental matrix, or a homography when `want_homography`, to
/// `matches` with the given `precision` in pixels (`0` chooses it
/// automatically).
pub fn fit(
    dimensions2: (usize, usize),
    keypoints1: &[Keypoint],
    keypoints2: &[Keypoint],
    matches: &[CandidateMatch],
    precision: f64,
    want_homography: bool,
) -> Result<FittedModel, FitError> {
    let kind = if want_homography {
        ModelKind::Homography
    } else {
        ModelKind::Fundamental
    };
    ModelEstimator::new(kind)
        .precision(precision)
        .fit(dimensions2, keypoints1, keypoints2, matches)
}

