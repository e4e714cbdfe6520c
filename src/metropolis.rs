/*!
# Metropolis sampler

A local-move Markov chain over the target density, used to generate seed
samples for an initial mixture proposal or diagnostic chains that are
independent of it. Candidates come from a local proposal centered at the
current position; the Metropolis–Hastings criterion accepts or rejects them in
log-space. The proposal-density correction terms are kept so asymmetric local
proposals stay correct (they cancel for the symmetric random walk).

Burn-in is the caller's job: [`MetropolisChain::run`] returns every visited
position starting with the initial state.

# Examples

```rust
use mini_pmc::densities::Proposal;
use mini_pmc::metropolis::{GaussianRandomWalk, MetropolisChain};
use nalgebra::DVector;

let target = |x: &DVector<f64>| -0.5 * x.dot(x);
let proposal = GaussianRandomWalk::new(1.0).unwrap().set_seed(42);
let mut chain = MetropolisChain::new(target, proposal, DVector::zeros(1)).set_seed(42);

let positions = chain.run(100);
assert_eq!(positions.len(), 100);
assert_eq!(positions[0], DVector::zeros(1));
```
*/

use crate::densities::{Component, MvGaussian, MvStudentT, Proposal, Target};
use crate::errors::PmcError;
use crate::mixture::MixtureProposal;
use nalgebra::DVector;
use rand::prelude::*;
use rayon::prelude::*;

/// An isotropic Gaussian random walk: adds independent N(0, std^2) noise to
/// every coordinate of the current position. Symmetric, so its density terms
/// cancel in the acceptance ratio.
#[derive(Debug, Clone)]
pub struct GaussianRandomWalk {
    std: f64,
    step: rand_distr::Normal<f64>,
    rng: SmallRng,
}

impl GaussianRandomWalk {
    /// Creates a walk with the given per-coordinate standard deviation.
    ///
    /// The step size is validated here, once, so sampling cannot fail
    /// mid-run.
    pub fn new(std: f64) -> Result<Self, PmcError> {
        if !std.is_finite() || std <= 0.0 {
            return Err(PmcError::InvalidStepSize(std));
        }
        let step =
            rand_distr::Normal::new(0.0, std).map_err(|_| PmcError::InvalidStepSize(std))?;
        Ok(Self {
            std,
            step,
            rng: SmallRng::from_entropy(),
        })
    }

    pub fn std(&self) -> f64 {
        self.std
    }
}

impl Proposal for GaussianRandomWalk {
    fn sample(&mut self, current: &DVector<f64>) -> DVector<f64> {
        DVector::from_iterator(
            current.len(),
            current.iter().map(|&c| c + self.step.sample(&mut self.rng)),
        )
    }

    fn log_prob(&self, from: &DVector<f64>, to: &DVector<f64>) -> f64 {
        let d = from.len() as f64;
        let var = self.std * self.std;
        let sq_dist: f64 = from
            .iter()
            .zip(to.iter())
            .map(|(&f, &t)| (t - f) * (t - f))
            .sum();
        -0.5 * sq_dist / var - 0.5 * d * (2.0 * std::f64::consts::PI * var).ln()
    }

    fn set_seed(mut self, seed: u64) -> Self {
        self.rng = SmallRng::seed_from_u64(seed);
        self
    }
}

/// A single Metropolis–Hastings chain.
///
/// Keeps the current position, its cached log-target value, and
/// acceptance-count statistics. Each step either moves to the candidate
/// (accept) or stays put (reject).
#[derive(Debug, Clone)]
pub struct MetropolisChain<D, Q> {
    pub target: D,
    pub proposal: Q,
    current: DVector<f64>,
    current_lp: f64,
    accepted: u64,
    rejected: u64,
    pub seed: u64,
    rng: SmallRng,
}

impl<D, Q> MetropolisChain<D, Q>
where
    D: Target,
    Q: Proposal,
{
    /// Creates a chain at `initial`, evaluating the target there once.
    pub fn new(target: D, proposal: Q, initial: DVector<f64>) -> Self {
        let seed = thread_rng().gen::<u64>();
        let current_lp = target.unnorm_log_prob(&initial);
        Self {
            target,
            proposal,
            current: initial,
            current_lp,
            accepted: 0,
            rejected: 0,
            seed,
            rng: SmallRng::seed_from_u64(seed),
        }
    }

    /// Reseeds the accept/reject stream of this chain.
    pub fn set_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self.rng = SmallRng::seed_from_u64(seed);
        self
    }

    /// Performs one Metropolis–Hastings step and returns the (possibly
    /// unchanged) current position.
    ///
    /// The acceptance ratio in log-space is
    /// `[log p(cand) + log q(cur | cand)] - [log p(cur) + log q(cand | cur)]`,
    /// compared against the log of a uniform draw. A candidate outside the
    /// target support is rejected outright; a chain currently outside the
    /// support accepts any in-support candidate.
    pub fn step(&mut self) -> &DVector<f64> {
        let candidate = self.proposal.sample(&self.current);
        let candidate_lp = self.target.unnorm_log_prob(&candidate);

        let accept = if candidate_lp == f64::NEG_INFINITY {
            false
        } else if self.current_lp == f64::NEG_INFINITY {
            true
        } else {
            let log_q_forward = self.proposal.log_prob(&self.current, &candidate);
            let log_q_backward = self.proposal.log_prob(&candidate, &self.current);
            let log_accept_ratio =
                (candidate_lp + log_q_backward) - (self.current_lp + log_q_forward);
            let u: f64 = self.rng.gen();
            log_accept_ratio > u.ln()
        };

        if accept {
            self.current = candidate;
            self.current_lp = candidate_lp;
            self.accepted += 1;
        } else {
            self.rejected += 1;
        }
        &self.current
    }

    /// Runs the chain for `n_steps` visited positions, the initial state
    /// included as the first element. Discarding a burn-in prefix is up to
    /// the caller.
    pub fn run(&mut self, n_steps: usize) -> Vec<DVector<f64>> {
        let mut out = Vec::with_capacity(n_steps);
        if n_steps == 0 {
            return out;
        }
        out.push(self.current.clone());
        for _ in 1..n_steps {
            out.push(self.step().clone());
        }
        out
    }

    pub fn current_state(&self) -> &DVector<f64> {
        &self.current
    }

    pub fn accepted(&self) -> u64 {
        self.accepted
    }

    pub fn rejected(&self) -> u64 {
        self.rejected
    }

    /// Fraction of accepted steps so far; 0 before the first step.
    pub fn acceptance_rate(&self) -> f64 {
        let total = self.accepted + self.rejected;
        if total == 0 {
            return 0.0;
        }
        self.accepted as f64 / total as f64
    }
}

/// Runs one chain per initial position in parallel, each with deterministic
/// per-chain seeds derived from the global seed (chain `i` gets `seed + 2i`
/// for its accept stream and `seed + 2i + 1` for its proposal stream).
pub fn run_chains<D, Q>(
    target: &D,
    proposal: &Q,
    initials: &[DVector<f64>],
    n_steps: usize,
    seed: u64,
) -> Vec<Vec<DVector<f64>>>
where
    D: Target + Clone + Sync,
    Q: Proposal + Clone + Send + Sync,
{
    initials
        .par_iter()
        .enumerate()
        .map(|(i, init)| {
            let chain_proposal = proposal.clone().set_seed(seed + 2 * i as u64 + 1);
            let mut chain = MetropolisChain::new(target.clone(), chain_proposal, init.clone())
                .set_seed(seed + 2 * i as u64);
            chain.run(n_steps)
        })
        .collect()
}

/// Fits one equally-weighted mixture component per chain from its visited
/// positions (unweighted mean and covariance), giving a chain-seeded initial
/// proposal for PMC. `dof` selects the Student-t family; `None` fits
/// Gaussians.
pub fn seed_mixture(
    chains: &[Vec<DVector<f64>>],
    dof: Option<f64>,
) -> Result<MixtureProposal, PmcError> {
    if chains.is_empty() {
        return Err(PmcError::EmptyMixture);
    }
    let mut components = Vec::with_capacity(chains.len());
    for chain in chains {
        let weights = vec![1.0; chain.len()];
        let component = match dof {
            None => Component::Gaussian(MvGaussian::fit(chain, &weights, 0.0)?),
            Some(dof) => Component::StudentT(MvStudentT::fit(chain, &weights, dof, 0.0)?),
        };
        components.push(component);
    }
    let weights = vec![1.0; components.len()];
    MixtureProposal::new(components, weights)
}
