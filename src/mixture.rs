/*!
A weighted mixture of density components used as the importance-sampling
proposal.

Sampling draws a component index from the mixture weights (categorical cumsum
draw) and then delegates to that component; density evaluation is a stable
log-sum-exp over `log(weight_k) + log_prob_k(x)`. After construction and after
every mutation the weights are non-negative and sum to one.

# Examples

```rust
use mini_pmc::densities::{Component, MvGaussian};
use mini_pmc::mixture::MixtureProposal;
use nalgebra::{DMatrix, DVector};
use rand::rngs::SmallRng;
use rand::SeedableRng;

let left = Component::Gaussian(
    MvGaussian::new(DVector::from_vec(vec![-2.0]), DMatrix::identity(1, 1)).unwrap(),
);
let right = Component::Gaussian(
    MvGaussian::new(DVector::from_vec(vec![2.0]), DMatrix::identity(1, 1)).unwrap(),
);
let mixture = MixtureProposal::new(vec![left, right], vec![0.5, 0.5]).unwrap();

let mut rng = SmallRng::seed_from_u64(42);
let x = mixture.sample(&mut rng);
assert_eq!(x.len(), 1);
assert!(mixture.log_prob(&x).is_finite());
```
*/

use crate::densities::{Component, MvGaussian, MvStudentT};
use crate::errors::PmcError;
use crate::stats::log_sum_exp;
use nalgebra::DVector;
use rand::Rng;

/// An ordered collection of (component, mixture-weight) pairs.
///
/// Components are owned exclusively by their mixture. The PMC updater returns
/// a new mixture each iteration instead of mutating in place, so a proposal
/// handed to parallel workers is read-only for the whole iteration.
#[derive(Debug, Clone)]
pub struct MixtureProposal {
    components: Vec<Component>,
    weights: Vec<f64>,
}

impl MixtureProposal {
    /// Builds a mixture from components and relative weights.
    ///
    /// Weights must be non-negative with a positive finite sum; they are
    /// renormalized to sum to one. All components must share one dimension.
    pub fn new(components: Vec<Component>, weights: Vec<f64>) -> Result<Self, PmcError> {
        Self::validate(&components, &weights)?;
        let mut mixture = Self {
            components,
            weights,
        };
        mixture.normalize()?;
        Ok(mixture)
    }

    /// Builds a mixture whose weights already sum to one, keeping their exact
    /// bit patterns. Checkpoint loading depends on this: renormalizing
    /// already-normalized weights perturbs the stored values whenever their
    /// floating-point sum is not exactly 1.0.
    pub(crate) fn from_normalized(
        components: Vec<Component>,
        weights: Vec<f64>,
    ) -> Result<Self, PmcError> {
        Self::validate(&components, &weights)?;
        let sum: f64 = weights.iter().sum();
        if (sum - 1.0).abs() > 1e-9 {
            return Err(PmcError::DegenerateWeights);
        }
        Ok(Self {
            components,
            weights,
        })
    }

    fn validate(components: &[Component], weights: &[f64]) -> Result<(), PmcError> {
        if components.is_empty() {
            return Err(PmcError::EmptyMixture);
        }
        if components.len() != weights.len() {
            return Err(PmcError::DimensionMismatch {
                expected: components.len(),
                got: weights.len(),
            });
        }
        let dim = components[0].dim();
        for c in &components[1..] {
            if c.dim() != dim {
                return Err(PmcError::DimensionMismatch {
                    expected: dim,
                    got: c.dim(),
                });
            }
        }
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(PmcError::DegenerateWeights);
        }
        Ok(())
    }

    /// A mixture with a single component of weight one.
    pub fn single(component: Component) -> Self {
        Self {
            components: vec![component],
            weights: vec![1.0],
        }
    }

    fn normalize(&mut self) -> Result<(), PmcError> {
        let sum: f64 = self.weights.iter().sum();
        if !(sum > 0.0) || !sum.is_finite() {
            return Err(PmcError::DegenerateWeights);
        }
        for w in &mut self.weights {
            *w /= sum;
        }
        Ok(())
    }

    /// Selects a component index by a categorical draw over the weights.
    pub fn select_component<R: Rng>(&self, rng: &mut R) -> usize {
        let r: f64 = rng.gen();
        let mut cum = 0.0;
        for (k, &w) in self.weights.iter().enumerate() {
            cum += w;
            if r < cum {
                return k;
            }
        }
        self.weights.len() - 1
    }

    /// Draws one point from the mixture.
    pub fn sample<R: Rng>(&self, rng: &mut R) -> DVector<f64> {
        let (_, x) = self.sample_indexed(rng);
        x
    }

    /// Draws one point together with the index of the component that
    /// generated it (needed for the updater's responsibility split).
    pub fn sample_indexed<R: Rng>(&self, rng: &mut R) -> (usize, DVector<f64>) {
        let k = self.select_component(rng);
        (k, self.components[k].sample(rng))
    }

    /// Normalized log-density `logsumexp_k(log w_k + log_prob_k(x))`.
    pub fn log_prob(&self, x: &DVector<f64>) -> f64 {
        let terms: Vec<f64> = self
            .components
            .iter()
            .zip(&self.weights)
            .map(|(c, &w)| w.ln() + c.log_prob(x))
            .collect();
        log_sum_exp(&terms)
    }

    /// Appends a component with the given relative weight and renormalizes.
    pub fn add_component(&mut self, component: Component, weight: f64) -> Result<(), PmcError> {
        if component.dim() != self.dim() {
            return Err(PmcError::DimensionMismatch {
                expected: self.dim(),
                got: component.dim(),
            });
        }
        if !weight.is_finite() || weight < 0.0 {
            return Err(PmcError::DegenerateWeights);
        }
        self.components.push(component);
        self.weights.push(weight);
        self.normalize()
    }

    /// Removes the component at `index`, renormalizing the survivors.
    ///
    /// Fails with [`PmcError::EmptyMixture`] if the mixture has only one
    /// component left. An out-of-range index panics.
    pub fn remove_component(&mut self, index: usize) -> Result<Component, PmcError> {
        if self.components.len() == 1 {
            return Err(PmcError::EmptyMixture);
        }
        let removed = self.components.remove(index);
        self.weights.remove(index);
        self.normalize()?;
        Ok(removed)
    }

    /// Greedily merges near-duplicate components and returns the reduced
    /// mixture.
    ///
    /// Closeness is the symmetrized Kullback-Leibler divergence between the
    /// components' Gaussian approximations; the closest same-family pair
    /// below `threshold` is replaced by its moment-matched combination until
    /// no such pair remains. Weights of merged pairs add, so the result stays
    /// normalized and an untouched component keeps its weight bits.
    pub fn merge_components(&self, threshold: f64) -> Result<Self, PmcError> {
        let mut components = self.components.clone();
        let mut weights = self.weights.clone();
        loop {
            let mut best: Option<(usize, usize, f64)> = None;
            for i in 0..components.len() {
                for j in (i + 1)..components.len() {
                    if components[i].family() != components[j].family() {
                        continue;
                    }
                    let divergence = components[i].symmetric_kl(&components[j]);
                    if best.map_or(true, |(_, _, d)| divergence < d) {
                        best = Some((i, j, divergence));
                    }
                }
            }
            match best {
                Some((i, j, divergence)) if divergence < threshold => {
                    let merged =
                        moment_match(&components[i], weights[i], &components[j], weights[j])?;
                    components[i] = merged;
                    weights[i] += weights[j];
                    components.remove(j);
                    weights.remove(j);
                }
                _ => break,
            }
        }
        Self::from_normalized(components, weights)
    }

    pub fn component_count(&self) -> usize {
        self.components.len()
    }

    pub fn dim(&self) -> usize {
        self.components[0].dim()
    }

    pub fn components(&self) -> &[Component] {
        &self.components
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }
}

/// Single component matching the first two moments of a weighted pair. Both
/// components must be of the same family; the merged Student-t carries the
/// weighted average of the two degrees of freedom.
fn moment_match(a: &Component, wa: f64, b: &Component, wb: f64) -> Result<Component, PmcError> {
    let w = wa + wb;
    let mean = (a.mean() * wa + b.mean() * wb) / w;
    let da = a.mean() - &mean;
    let db = b.mean() - &mean;
    let cov = ((a.cov() + &da * da.transpose()) * wa + (b.cov() + &db * db.transpose()) * wb) / w;
    match (a.dof(), b.dof()) {
        (None, _) => Ok(Component::Gaussian(MvGaussian::new(mean, cov)?)),
        (Some(dof_a), dof_b) => {
            let dof = (wa * dof_a + wb * dof_b.unwrap_or(dof_a)) / w;
            Ok(Component::StudentT(MvStudentT::new(mean, cov, dof)?))
        }
    }
}
