use crate::{KvldParameters, Pruned};
use log::*;

/// Summary of one pruning attempt.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Attempt {
    pub params: KvldParameters,
    pub survivors: usize,
    pub inlier_rate: f64,
}

/// The attempt kept by [`run_with_retry`], with the history leading to it.
#[derive(Debug, Clone)]
pub struct RetryOutcome {
    pub pruned: Pruned,
    /// The parameters the kept attempt ran with.
    pub params: KvldParameters,
    pub attempts: Vec<Attempt>,
}

impl RetryOutcome {
    /// Whether the kept attempt reached its target inlier rate.
    pub fn converged(&self) -> bool {
        self.attempts
            .last()
            .map(|attempt| attempt.inlier_rate >= attempt.params.inlier_rate)
            .unwrap_or(false)
    }
}

/// Runs pruning attempts until one keeps at least its target inlier rate.
///
/// Every attempt starts from nothing, with the parameters of the previous
/// attempt [relaxed](KvldParameters::relaxed). After `max_attempts` attempts
/// (at least one) the last attempt is returned as it is.
pub fn run_with_retry<F>(
    len: usize,
    initial: KvldParameters,
    max_attempts: usize,
    mut attempt: F,
) -> RetryOutcome
where
    F: FnMut(&KvldParameters) -> Pruned,
{
    let max_attempts = max_attempts.max(1);
    let mut params = initial;
    let mut attempts = Vec::with_capacity(max_attempts);
    loop {
        let pruned = attempt(&params);
        let survivors = pruned.survivor_count();
        let inlier_rate = if len == 0 {
            0.0
        } else {
            survivors as f64 / len as f64
        };
        info!(
            "attempt {}: kept {} of {} matches ({:.3}, target {:.3}, k {})",
            attempts.len() + 1,
            survivors,
            len,
            inlier_rate,
            params.inlier_rate,
            params.k
        );
        attempts.push(Attempt {
            params,
            survivors,
            inlier_rate,
        });
        if inlier_rate >= params.inlier_rate || attempts.len() >= max_attempts {
            return RetryOutcome {
                pruned,
                params,
                attempts,
            };
        }
        params = params.relaxed();
    }
}
