/*!
The draw-and-weight step of adaptive importance sampling.

[`draw`] pulls a batch from the mixture proposal, evaluates the target's
unnormalized log-density at every point and normalizes the log importance
weights with a stable log-sum-exp. The resulting [`WeightedSampleSet`] keeps
the raw log-weights alongside the normalized ones so batches from independent
workers can be merged and renormalized jointly ([`merge`]), and records the
source component of every draw for the updater's responsibility split.

All operations are pure given the proposal, the target and the random stream,
so [`draw_parallel`] simply fans a batch out over rayon workers with disjoint
seeds and concatenates the results.
*/

use crate::densities::Target;
use crate::errors::PmcError;
use crate::mixture::MixtureProposal;
use crate::stats;
use nalgebra::DVector;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

/// One batch of importance samples: points, raw and normalized weights, and
/// the index of the mixture component each point was drawn from.
#[derive(Debug, Clone)]
pub struct WeightedSampleSet {
    samples: Vec<DVector<f64>>,
    log_weights: Vec<f64>,
    weights: Vec<f64>,
    origins: Vec<usize>,
}

impl WeightedSampleSet {
    /// Builds a set from raw (unnormalized) log-weights, normalizing so the
    /// linear weights sum to one.
    ///
    /// Fails with [`PmcError::DegenerateWeights`] when every log-weight is
    /// negative infinity (the proposal has no overlap with the target) or the
    /// normalization is otherwise non-finite.
    pub fn from_log_weights(
        samples: Vec<DVector<f64>>,
        log_weights: Vec<f64>,
        origins: Vec<usize>,
    ) -> Result<Self, PmcError> {
        debug_assert_eq!(samples.len(), log_weights.len());
        debug_assert_eq!(samples.len(), origins.len());
        let log_norm = stats::log_sum_exp(&log_weights);
        if !log_norm.is_finite() {
            return Err(PmcError::DegenerateWeights);
        }
        let weights: Vec<f64> = log_weights.iter().map(|lw| (lw - log_norm).exp()).collect();
        Ok(Self {
            samples,
            log_weights,
            weights,
            origins,
        })
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn dim(&self) -> usize {
        self.samples.first().map(|s| s.len()).unwrap_or(0)
    }

    pub fn samples(&self) -> &[DVector<f64>] {
        &self.samples
    }

    /// Normalized weights; they sum to one.
    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    /// Raw log-weights before normalization.
    pub fn log_weights(&self) -> &[f64] {
        &self.log_weights
    }

    /// Index of the proposal component each sample was drawn from.
    pub fn origins(&self) -> &[usize] {
        &self.origins
    }

    /// Effective sample size `1 / sum(w_i^2)` of the normalized weights.
    pub fn ess(&self) -> f64 {
        stats::ess(&self.weights)
    }

    /// Normalized perplexity of the weights, the PMC convergence diagnostic.
    pub fn perplexity(&self) -> f64 {
        stats::perplexity(&self.weights)
    }
}

/// Concatenates batches drawn from the same proposal and renormalizes their
/// weights jointly across the merged set (never per batch).
pub fn merge(sets: Vec<WeightedSampleSet>) -> Result<WeightedSampleSet, PmcError> {
    let total: usize = sets.iter().map(|s| s.len()).sum();
    let mut samples = Vec::with_capacity(total);
    let mut log_weights = Vec::with_capacity(total);
    let mut origins = Vec::with_capacity(total);
    for set in sets {
        samples.extend(set.samples);
        log_weights.extend(set.log_weights);
        origins.extend(set.origins);
    }
    WeightedSampleSet::from_log_weights(samples, log_weights, origins)
}

/// Draws `n` samples from the proposal, weighting each by
/// `target_log_density(x) - proposal.log_density(x)` in log-space.
///
/// Deterministic given a seeded rng; the only side effect is rng consumption.
pub fn draw<T: Target, R: Rng>(
    proposal: &MixtureProposal,
    target: &T,
    n: usize,
    rng: &mut R,
) -> Result<WeightedSampleSet, PmcError> {
    let mut samples = Vec::with_capacity(n);
    let mut log_weights = Vec::with_capacity(n);
    let mut origins = Vec::with_capacity(n);
    for _ in 0..n {
        let (k, x) = proposal.sample_indexed(rng);
        let log_w = target.unnorm_log_prob(&x) - proposal.log_prob(&x);
        samples.push(x);
        log_weights.push(log_w);
        origins.push(k);
    }
    WeightedSampleSet::from_log_weights(samples, log_weights, origins)
}

/// Fans [`draw`] out over one rayon worker per seed, each drawing
/// `n_per_worker` samples with its own `SmallRng`, and merges the batches by
/// concatenation with a joint renormalization.
///
/// Reproducible for a fixed set of seeds; no random stream is shared between
/// workers.
pub fn draw_parallel<T: Target + Sync>(
    proposal: &MixtureProposal,
    target: &T,
    n_per_worker: usize,
    seeds: &[u64],
) -> Result<WeightedSampleSet, PmcError> {
    let sets: Vec<WeightedSampleSet> = seeds
        .par_iter()
        .map(|&seed| {
            let mut rng = SmallRng::seed_from_u64(seed);
            draw(proposal, target, n_per_worker, &mut rng)
        })
        .collect::<Result<_, _>>()?;
    merge(sets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::densities::{Component, MvGaussian};
    use approx::assert_abs_diff_eq;
    use nalgebra::DMatrix;

    fn standard_proposal(dim: usize) -> MixtureProposal {
        MixtureProposal::single(Component::Gaussian(
            MvGaussian::new(DVector::zeros(dim), DMatrix::identity(dim, dim)).unwrap(),
        ))
    }

    #[test]
    fn weights_sum_to_one_and_ess_in_range() {
        let proposal = standard_proposal(2);
        let target = |x: &DVector<f64>| -0.5 * x.dot(x) - 0.3 * x[0];
        let mut rng = SmallRng::seed_from_u64(42);
        let set = draw(&proposal, &target, 500, &mut rng).unwrap();

        assert_eq!(set.len(), 500);
        assert_abs_diff_eq!(set.weights().iter().sum::<f64>(), 1.0, epsilon = 1e-9);
        assert!(set.ess() >= 1.0 && set.ess() <= 500.0);
    }

    #[test]
    fn self_proposal_gives_uniform_weights() {
        // Target log-density equals proposal log-density pointwise, so every
        // importance weight is 1/n and ESS is n.
        let proposal = standard_proposal(2);
        let reference = proposal.clone();
        let target = move |x: &DVector<f64>| reference.log_prob(x);
        let mut rng = SmallRng::seed_from_u64(42);
        let n = 1000;
        let set = draw(&proposal, &target, n, &mut rng).unwrap();

        for &w in set.weights() {
            assert_abs_diff_eq!(w, 1.0 / n as f64, epsilon = 1e-12);
        }
        assert_abs_diff_eq!(set.ess(), n as f64, epsilon = 1e-6);
        assert_abs_diff_eq!(set.perplexity(), 1.0, epsilon = 1e-9);
    }

    #[test]
    fn vanished_weights_are_detected() {
        let proposal = standard_proposal(2);
        let target = |_: &DVector<f64>| f64::NEG_INFINITY;
        let mut rng = SmallRng::seed_from_u64(42);
        assert!(matches!(
            draw(&proposal, &target, 100, &mut rng),
            Err(PmcError::DegenerateWeights)
        ));
    }

    #[test]
    fn merge_renormalizes_jointly() {
        let proposal = standard_proposal(1);
        let target = |x: &DVector<f64>| -0.5 * x.dot(x) + 0.2 * x[0];
        let mut rng_a = SmallRng::seed_from_u64(1);
        let mut rng_b = SmallRng::seed_from_u64(2);
        let a = draw(&proposal, &target, 200, &mut rng_a).unwrap();
        let b = draw(&proposal, &target, 300, &mut rng_b).unwrap();
        let merged = merge(vec![a.clone(), b]).unwrap();

        assert_eq!(merged.len(), 500);
        assert_abs_diff_eq!(merged.weights().iter().sum::<f64>(), 1.0, epsilon = 1e-9);
        // Joint renormalization preserves raw log-weights untouched.
        assert_eq!(merged.log_weights()[0], a.log_weights()[0]);
    }

    #[test]
    fn parallel_draw_is_deterministic_for_fixed_seeds() {
        let proposal = standard_proposal(2);
        let target = |x: &DVector<f64>| -0.5 * x.dot(x);
        let seeds = [11u64, 22, 33, 44];
        let first = draw_parallel(&proposal, &target, 250, &seeds).unwrap();
        let second = draw_parallel(&proposal, &target, 250, &seeds).unwrap();

        assert_eq!(first.len(), 1000);
        assert_eq!(first.samples(), second.samples());
        assert_eq!(first.weights(), second.weights());
        assert_abs_diff_eq!(first.weights().iter().sum::<f64>(), 1.0, epsilon = 1e-9);
    }
}
