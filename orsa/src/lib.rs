//! # ORSA
//!
//! A contrario RANSAC, also known as ORSA or AC-RANSAC.
//!
//! Plain RANSAC needs an inlier threshold chosen up front. ORSA instead asks,
//! for every hypothesis and every candidate threshold, how many such
//! hypotheses would be expected to explain that many points if the points
//! were pure noise. This number of false alarms (NFA) is
//!
//! ```text
//! NFA(k) = models * (n - m) * C(n, k) * C(k, m) * alpha(eps_k)^(k - m)
//! ```
//!
//! where `n` is the number of points, `m` the minimal sample size, `k` the
//! number of points within the `k`-th smallest residual `eps_k`, and
//! `alpha(eps)` the probability of a random point falling within `eps` of a
//! model. The hypothesis and threshold minimizing the NFA win, and a result
//! is only reported when it is meaningful, that is when `NFA < 1`.
//!
//! All quantities are handled as `log10`. The probability is described by
//! `log10 alpha(eps) = log_alpha0 + error_exponent * log10(eps)`, which
//! covers point-to-line errors (`alpha = 2 D eps / A`, exponent `1`) and
//! point-to-point errors (`alpha = pi eps^2 / A`, exponent `2`).
//!
//! [`Orsa`] implements [`Consensus`] so it can be used with any
//! [`Estimator`] in place of a fixed threshold consensus algorithm.

use float_ord::FloatOrd;
use log::*;
use rand::{seq::index::sample, Rng};
use sample_consensus::{Consensus, Estimator, Model};

/// Residuals are floored to this before taking their logarithm.
const MIN_RESIDUAL: f64 = 1e-12;

/// Table of `log10(n!)` for fast `log10` binomial coefficients.
#[derive(Debug, Clone)]
pub struct LogCombinations {
    log_factorial: Vec<f64>,
}

impl LogCombinations {
    /// Creates the table for coefficients `C(a, b)` with `a <= n`.
    pub fn new(n: usize) -> Self {
        let mut log_factorial = Vec::with_capacity(n + 1);
        log_factorial.push(0.0);
        for i in 1..=n {
            log_factorial.push(log_factorial[i - 1] + (i as f64).log10());
        }
        Self { log_factorial }
    }

    /// `log10 C(n, k)`, negative infinity when `k > n`.
    pub fn log_choose(&self, n: usize, k: usize) -> f64 {
        if k > n || n >= self.log_factorial.len() {
            return f64::NEG_INFINITY;
        }
        self.log_factorial[n] - self.log_factorial[k] - self.log_factorial[n - k]
    }
}

/// The meaningful consensus found by [`Orsa::fit`].
#[derive(Debug, Clone, PartialEq)]
pub struct OrsaFit<M> {
    pub model: M,
    /// Indices of the points within `threshold`, in ascending order.
    pub inliers: Vec<usize>,
    /// The residual threshold minimizing the NFA.
    pub threshold: f64,
    /// `log10` of the number of false alarms, always negative.
    pub log_nfa: f64,
}

/// A contrario RANSAC.
///
/// Nine tenths of the iteration budget draw samples from all points. If a
/// meaningful hypothesis has been found by then, the last tenth draws
/// samples only from its inliers to refine it.
#[derive(Debug, Clone)]
pub struct Orsa<R> {
    rng: R,
    pub iterations: usize,
    pub log_alpha0: f64,
    pub error_exponent: f64,
    /// Residuals above this are never considered as thresholds.
    pub max_threshold: Option<f64>,
    /// Upper bound on the models the estimator returns for one sample.
    pub models_per_sample: usize,
}

impl<R> Orsa<R>
where
    R: Rng,
{
    pub fn new(rng: R) -> Self {
        Self {
            rng,
            iterations: 1000,
            log_alpha0: 0.0,
            error_exponent: 1.0,
            max_threshold: None,
            models_per_sample: 1,
        }
    }

    pub fn iterations(self, iterations: usize) -> Self {
        Self { iterations, ..self }
    }

    /// Sets `log10 alpha(eps) = log_alpha0 + error_exponent * log10(eps)`.
    pub fn error_model(self, log_alpha0: f64, error_exponent: f64) -> Self {
        Self {
            log_alpha0,
            error_exponent,
            ..self
        }
    }

    pub fn max_threshold(self, max_threshold: f64) -> Self {
        Self {
            max_threshold: Some(max_threshold),
            ..self
        }
    }

    pub fn models_per_sample(self, models_per_sample: usize) -> Self {
        Self {
            models_per_sample: models_per_sample.max(1),
            ..self
        }
    }

    /// `log10 alpha(eps)`, capped at probability `1`.
    pub fn log_alpha(&self, residual: f64) -> f64 {
        (self.log_alpha0 + self.error_exponent * residual.max(MIN_RESIDUAL).log10()).min(0.0)
    }

    /// Finds the number of inliers `k` minimizing the NFA for residuals that
    /// are sorted in ascending order.
    ///
    /// Returns `(log_nfa, k, threshold)`.
    fn best_nfa(
        &self,
        residuals: &[(f64, usize)],
        min_samples: usize,
        tables: &LogCombinations,
    ) -> Option<(f64, usize, f64)> {
        let n = residuals.len();
        let log_e0 = ((self.models_per_sample * (n - min_samples)) as f64).log10();
        let mut best: Option<(f64, usize, f64)> = None;
        for k in min_samples + 1..=n {
            let threshold = residuals[k - 1].0;
            if !threshold.is_finite() || self.max_threshold.map_or(false, |max| threshold > max) {
                break;
            }
            let log_nfa = log_e0
                + tables.log_choose(n, k)
                + tables.log_choose(k, min_samples)
                + (k - min_samples) as f64 * self.log_alpha(threshold);
            if best.map_or(true, |(b, _, _)| log_nfa < b) {
                best = Some((log_nfa, k, threshold));
            }
        }
        best
    }

    /// Runs the search and returns the most meaningful hypothesis, if any.
    pub fn fit<E, Data, I>(&mut self, estimator: &E, data: I) -> Option<OrsaFit<E::Model>>
    where
        E: Estimator<Data>,
        Data: Clone,
        I: Iterator<Item = Data>,
    {
        let data: Vec<Data> = data.collect();
        let n = data.len();
        let m = E::MIN_SAMPLES;
        if n <= m {
            debug!("orsa needs more than {} points, got {}", m, n);
            return None;
        }
        let tables = LogCombinations::new(n);
        let reserve = self.iterations / 10;
        let mut budget = self.iterations - reserve;
        let mut refining = false;
        let mut best: Option<OrsaFit<E::Model>> = None;
        let mut residuals: Vec<(f64, usize)> = Vec::with_capacity(n);
        let mut iteration = 0;
        while iteration < budget {
            iteration += 1;
            let indices: Vec<usize> = match (&best, refining) {
                (Some(fit), true) if fit.inliers.len() > m => {
                    sample(&mut self.rng, fit.inliers.len(), m)
                        .into_iter()
                        .map(|ix| fit.inliers[ix])
                        .collect()
                }
                (_, true) => break,
                _ => sample(&mut self.rng, n, m).into_vec(),
            };
            for model in estimator.estimate(indices.iter().map(|&ix| data[ix].clone())) {
                residuals.clear();
                residuals.extend(
                    data.iter()
                        .enumerate()
                        .map(|(ix, point)| (model.residual(point).abs(), ix)),
                );
                residuals.sort_unstable_by_key(|&(residual, _)| FloatOrd(residual));
                let (log_nfa, k, threshold) = match self.best_nfa(&residuals, m, &tables) {
                    Some(found) => found,
                    None => continue,
                };
                if best.as_ref().map_or(true, |fit| log_nfa < fit.log_nfa) {
                    let mut inliers: Vec<usize> = residuals[..k].iter().map(|&(_, ix)| ix).collect();
                    inliers.sort_unstable();
                    trace!(
                        "orsa iteration {}: {} inliers at {:.3}, log10 nfa {:.2}",
                        iteration,
                        k,
                        threshold,
                        log_nfa
                    );
                    best = Some(OrsaFit {
                        model,
                        inliers,
                        threshold,
                        log_nfa,
                    });
                }
            }
            if !refining && iteration == budget && best.as_ref().map_or(false, |fit| fit.log_nfa < 0.0)
            {
                refining = true;
                budget += reserve;
            }
        }
        match best {
            Some(fit) if fit.log_nfa < 0.0 => {
                debug!(
                    "orsa kept {} of {} points at threshold {:.3} (log10 nfa {:.2})",
                    fit.inliers.len(),
                    n,
                    fit.threshold,
                    fit.log_nfa
                );
                Some(fit)
            }
            _ => {
                debug!("orsa found no meaningful model among {} points", n);
                None
            }
        }
    }
}

impl<E, R, Data> Consensus<E, Data> for Orsa<R>
where
    E: Estimator<Data>,
    R: Rng,
    Data: Clone,
{
    type Inliers = Vec<usize>;

    fn model<I>(&mut self, estimator: &E, data: I) -> Option<E::Model>
    where
        I: Iterator<Item = Data> + Clone,
    {
        self.fit(estimator, data).map(|fit| fit.model)
    }

    fn model_inliers<I>(&mut self, estimator: &E, data: I) -> Option<(E::Model, Self::Inliers)>
    where
        I: Iterator<Item = Data> + Clone,
    {
        self.fit(estimator, data).map(|fit| (fit.model, fit.inliers))
    }
}
