/*!
# Population Monte Carlo update

The defining PMC step: consume a weighted sample batch and the proposal it was
drawn from, re-estimate every component from responsibility-weighted samples
(an EM-style M-step driven by the importance weights), prune components whose
mixture weight falls below a floor, and report the perplexity of the weights
as the convergence diagnostic.

The updater never mutates the proposal it is given; it returns a fresh
[`MixtureProposal`] so the caller can compare iterations and keep handing the
old value to concurrent readers.

# Examples

```rust
use mini_pmc::densities::{Component, MvGaussian};
use mini_pmc::mixture::MixtureProposal;
use mini_pmc::pmc::{adapt, PmcConfig};
use nalgebra::{DMatrix, DVector};
use rand::rngs::SmallRng;
use rand::SeedableRng;

// Target: standard 2D Gaussian, known only through its unnormalized log-density.
let target = |x: &DVector<f64>| -0.5 * x.dot(x);

// Start from a deliberately too-wide single-component proposal.
let proposal = MixtureProposal::single(Component::Gaussian(
    MvGaussian::new(DVector::zeros(2), DMatrix::identity(2, 2) * 4.0).unwrap(),
));

let mut rng = SmallRng::seed_from_u64(42);
let (adapted, history) =
    adapt(&target, proposal, 1000, 3, &PmcConfig::default(), &mut rng).unwrap();

assert_eq!(history.len(), 3);
assert!((adapted.weights().iter().sum::<f64>() - 1.0).abs() < 1e-9);
```
*/

use crate::densities::Target;
use crate::errors::PmcError;
use crate::history::{History, IterationRecord};
use crate::importance::{self, WeightedSampleSet};
use crate::mixture::MixtureProposal;
use crate::stats;
use indicatif::{ProgressBar, ProgressStyle};
use rand::rngs::SmallRng;

/// How a sample's contribution is split across mixture components.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Responsibilities {
    /// Hard assignment to the component the sample was drawn from.
    Simplified,
    /// Soft assignment `w_k q_k(x) / q(x)` recomputed from the mixture
    /// (Rao-Blackwellized update).
    MixtureWeighted,
}

/// Configuration of the PMC update.
#[derive(Debug, Clone, Copy)]
pub struct PmcConfig {
    /// Responsibility scheme; both are standard PMC variants.
    pub responsibilities: Responsibilities,
    /// Components whose refitted mixture weight falls below this floor are
    /// pruned.
    pub weight_floor: f64,
    /// Variance floor added to refitted covariance diagonals. Zero means
    /// degenerate fits prune the component instead of being regularized.
    pub min_variance: f64,
    /// When set, refitted components closer than this symmetrized KL
    /// divergence are merged after every update
    /// (see [`MixtureProposal::merge_components`]). `None` disables merging.
    pub merge_threshold: Option<f64>,
}

impl Default for PmcConfig {
    fn default() -> Self {
        Self {
            responsibilities: Responsibilities::MixtureWeighted,
            weight_floor: 1e-10,
            min_variance: 0.0,
            merge_threshold: None,
        }
    }
}

/// Per-sample responsibilities toward each component, row-major `n x k`.
fn responsibilities(
    proposal: &MixtureProposal,
    set: &WeightedSampleSet,
    scheme: Responsibilities,
) -> Vec<f64> {
    let k_count = proposal.component_count();
    let n = set.len();
    let mut resp = vec![0.0; n * k_count];
    match scheme {
        Responsibilities::Simplified => {
            for (i, &origin) in set.origins().iter().enumerate() {
                resp[i * k_count + origin] = 1.0;
            }
        }
        Responsibilities::MixtureWeighted => {
            let log_mix_weights: Vec<f64> =
                proposal.weights().iter().map(|w| w.ln()).collect();
            for (i, x) in set.samples().iter().enumerate() {
                let mix_lp = proposal.log_prob(x);
                if mix_lp == f64::NEG_INFINITY {
                    // Point carries no proposal mass; fall back to the draw index.
                    resp[i * k_count + set.origins()[i]] = 1.0;
                    continue;
                }
                for (k, component) in proposal.components().iter().enumerate() {
                    resp[i * k_count + k] =
                        (log_mix_weights[k] + component.log_prob(x) - mix_lp).exp();
                }
            }
        }
    }
    resp
}

/// Performs one PMC update and returns the refitted mixture together with the
/// perplexity of the consumed weights.
///
/// Per-component [`PmcError::DegenerateFit`] failures prune that component;
/// if pruning (by weight floor or fit failure) would remove every component,
/// the update fails with [`PmcError::CollapsedMixture`]. With a
/// `merge_threshold` set, near-duplicate refitted components are merged
/// before the mixture is returned.
pub fn update(
    proposal: &MixtureProposal,
    set: &WeightedSampleSet,
    config: &PmcConfig,
) -> Result<(MixtureProposal, f64), PmcError> {
    let k_count = proposal.component_count();
    let n = set.len();
    let resp = responsibilities(proposal, set, config.responsibilities);

    // New mixture weight of component k: sum_i w_i r_ik, renormalized below
    // by MixtureProposal::new.
    let mut alpha = vec![0.0; k_count];
    for i in 0..n {
        let w = set.weights()[i];
        for k in 0..k_count {
            alpha[k] += w * resp[i * k_count + k];
        }
    }

    let mut new_components = Vec::with_capacity(k_count);
    let mut new_weights = Vec::with_capacity(k_count);
    let mut fit_weights = vec![0.0; n];
    for (k, component) in proposal.components().iter().enumerate() {
        if alpha[k] < config.weight_floor {
            continue;
        }
        for i in 0..n {
            fit_weights[i] = set.weights()[i] * resp[i * k_count + k];
        }
        match component.update(set.samples(), &fit_weights, config.min_variance) {
            Ok(refit) => {
                new_components.push(refit);
                new_weights.push(alpha[k]);
            }
            Err(PmcError::DegenerateFit { .. }) => continue,
            Err(e) => return Err(e),
        }
    }
    if new_components.is_empty() {
        return Err(PmcError::CollapsedMixture);
    }

    let refitted = MixtureProposal::new(new_components, new_weights)?;
    let refitted = match config.merge_threshold {
        Some(threshold) => refitted.merge_components(threshold)?,
        None => refitted,
    };
    Ok((refitted, stats::perplexity(set.weights())))
}

/// Runs `n_iterations` PMC iterations: draw a batch of `n_samples`, update the
/// proposal, record the batch and diagnostics in a [`History`].
///
/// Stopping early on a perplexity or ESS threshold is the caller's decision;
/// the returned history exposes both per iteration.
pub fn adapt<T: Target>(
    target: &T,
    mut proposal: MixtureProposal,
    n_samples: usize,
    n_iterations: usize,
    config: &PmcConfig,
    rng: &mut SmallRng,
) -> Result<(MixtureProposal, History), PmcError> {
    let mut history = History::new();
    for _ in 0..n_iterations {
        let set = importance::draw(&proposal, target, n_samples, rng)?;
        let (refitted, perplexity) = update(&proposal, &set, config)?;
        let ess = set.ess();
        history.push(IterationRecord {
            samples: set,
            proposal: refitted.clone(),
            ess,
            perplexity,
        });
        proposal = refitted;
    }
    Ok((proposal, history))
}

/// Same as [`adapt`], with a progress bar tracking iterations and the latest
/// perplexity.
pub fn adapt_progress<T: Target>(
    target: &T,
    mut proposal: MixtureProposal,
    n_samples: usize,
    n_iterations: usize,
    config: &PmcConfig,
    rng: &mut SmallRng,
) -> Result<(MixtureProposal, History), PmcError> {
    let pb = ProgressBar::new(n_iterations as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
            .unwrap()
            .progress_chars("##-"),
    );

    let mut history = History::new();
    for _ in 0..n_iterations {
        let set = importance::draw(&proposal, target, n_samples, rng)?;
        let (refitted, perplexity) = update(&proposal, &set, config)?;
        let ess = set.ess();
        history.push(IterationRecord {
            samples: set,
            proposal: refitted.clone(),
            ess,
            perplexity,
        });
        proposal = refitted;
        pb.set_message(format!("perplexity {perplexity:.3}"));
        pb.inc(1);
    }
    pb.finish_with_message("Done!");
    Ok((proposal, history))
}
