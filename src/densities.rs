/*!
Defines the target-density interface and the parametric density components the
mixture proposal is built from: a multivariate Gaussian and a multivariate
Student-t, both with full covariance handled through a cached Cholesky factor.

Every density works in log-space. `log_prob` returns the log of the density
(never the raw density) and weighted re-estimation happens on normalized
weights, so callers never multiply raw densities together.

# Examples

```rust
use mini_pmc::densities::MvGaussian;
use nalgebra::{DMatrix, DVector};

let gauss = MvGaussian::new(
    DVector::from_vec(vec![0.0, 0.0]),
    DMatrix::identity(2, 2),
)
.unwrap();
let lp = gauss.log_prob(&DVector::from_vec(vec![0.0, 0.0]));
// Standard 2D normal at the origin: -ln(2 pi)
assert!((lp + (2.0 * std::f64::consts::PI).ln()).abs() < 1e-12);
```
*/

use crate::errors::PmcError;
use nalgebra::{Cholesky, DMatrix, DVector, Dyn};
use rand::Rng;
use rand_distr::{ChiSquared, Distribution, StandardNormal};
use statrs::function::gamma::ln_gamma;
use std::f64::consts::PI;

/// A target distribution given by its unnormalized log-density.
///
/// Implementations must be deterministic and side-effect free; out-of-support
/// points return negative infinity. Any closure `Fn(&DVector<f64>) -> f64`
/// qualifies.
pub trait Target {
    /// Returns the log of the unnormalized density at `theta`.
    fn unnorm_log_prob(&self, theta: &DVector<f64>) -> f64;
}

impl<F> Target for F
where
    F: Fn(&DVector<f64>) -> f64,
{
    fn unnorm_log_prob(&self, theta: &DVector<f64>) -> f64 {
        self(theta)
    }
}

/// A local proposal for Metropolis-type chains: proposes a candidate given the
/// current position and evaluates log q(to | from).
pub trait Proposal {
    /// Samples a candidate from q(. | current).
    fn sample(&mut self, current: &DVector<f64>) -> DVector<f64>;

    /// Evaluates log q(to | from).
    fn log_prob(&self, from: &DVector<f64>, to: &DVector<f64>) -> f64;

    /// Returns this proposal reseeded with `seed`.
    fn set_seed(self, seed: u64) -> Self
    where
        Self: Sized;
}

/// Weighted mean and covariance of `points`, with weights normalized
/// internally. Returns the effective sample count `(sum w)^2 / sum w^2`
/// alongside the fit.
fn weighted_mean_cov(
    points: &[DVector<f64>],
    weights: &[f64],
    dim: usize,
) -> Result<(DVector<f64>, DMatrix<f64>, f64), PmcError> {
    debug_assert_eq!(points.len(), weights.len());
    let w_sum: f64 = weights.iter().sum();
    let w_sq_sum: f64 = weights.iter().map(|w| w * w).sum();
    if !(w_sum > 0.0) || !w_sum.is_finite() {
        return Err(PmcError::DegenerateFit { n_eff: 0.0, dim });
    }
    let n_eff = w_sum * w_sum / w_sq_sum;

    let mut mean = DVector::zeros(dim);
    for (x, &w) in points.iter().zip(weights) {
        mean += x * (w / w_sum);
    }
    let mut cov = DMatrix::zeros(dim, dim);
    for (x, &w) in points.iter().zip(weights) {
        let diff = x - &mean;
        cov += (&diff * diff.transpose()) * (w / w_sum);
    }
    Ok((mean, cov, n_eff))
}

/// Log-determinant of a matrix from its lower Cholesky factor.
fn chol_log_det(lower: &DMatrix<f64>) -> f64 {
    (0..lower.nrows()).map(|i| 2.0 * lower[(i, i)].ln()).sum()
}

/// A multivariate Gaussian density with full covariance.
///
/// The Cholesky factor of the covariance is computed once at construction and
/// reused for both sampling and density evaluation.
#[derive(Debug, Clone)]
pub struct MvGaussian {
    mean: DVector<f64>,
    cov: DMatrix<f64>,
    chol: Cholesky<f64, Dyn>,
    lower: DMatrix<f64>,
    log_norm: f64,
}

impl MvGaussian {
    /// Creates a Gaussian with the given mean and covariance.
    ///
    /// Fails with [`PmcError::NotPositiveDefinite`] if the covariance has no
    /// Cholesky factorization.
    pub fn new(mean: DVector<f64>, cov: DMatrix<f64>) -> Result<Self, PmcError> {
        let dim = mean.len();
        if cov.nrows() != dim || cov.ncols() != dim {
            return Err(PmcError::DimensionMismatch {
                expected: dim,
                got: cov.nrows(),
            });
        }
        let chol = Cholesky::new(cov.clone()).ok_or(PmcError::NotPositiveDefinite)?;
        let lower = chol.l();
        let log_det = chol_log_det(&lower);
        let log_norm = -0.5 * (dim as f64 * (2.0 * PI).ln() + log_det);
        Ok(Self {
            mean,
            cov,
            chol,
            lower,
            log_norm,
        })
    }

    /// Fits a Gaussian to weighted points (weights normalized internally).
    ///
    /// With `min_variance == 0.0` the fit fails with
    /// [`PmcError::DegenerateFit`] when the effective sample count falls below
    /// the dimension; a positive `min_variance` is added to the covariance
    /// diagonal instead, which keeps far-off refits factorizable.
    pub fn fit(
        points: &[DVector<f64>],
        weights: &[f64],
        min_variance: f64,
    ) -> Result<Self, PmcError> {
        let dim = points.first().map(|p| p.len()).unwrap_or(0);
        let (mean, mut cov, n_eff) = weighted_mean_cov(points, weights, dim)?;
        if min_variance > 0.0 {
            for i in 0..dim {
                cov[(i, i)] += min_variance;
            }
        } else if n_eff < dim as f64 {
            return Err(PmcError::DegenerateFit { n_eff, dim });
        }
        Self::new(mean, cov).map_err(|_| PmcError::DegenerateFit { n_eff, dim })
    }

    /// Draws one point: `mean + L z` with `z` standard normal.
    pub fn sample<R: Rng>(&self, rng: &mut R) -> DVector<f64> {
        let z = DVector::from_iterator(
            self.mean.len(),
            (0..self.mean.len()).map(|_| rng.sample::<f64, _>(StandardNormal)),
        );
        &self.mean + &self.lower * z
    }

    /// Normalized log-density at `x`.
    pub fn log_prob(&self, x: &DVector<f64>) -> f64 {
        let diff = x - &self.mean;
        let mahalanobis_sq = diff.dot(&self.chol.solve(&diff));
        self.log_norm - 0.5 * mahalanobis_sq
    }

    pub fn mean(&self) -> &DVector<f64> {
        &self.mean
    }

    pub fn cov(&self) -> &DMatrix<f64> {
        &self.cov
    }
}

/// A multivariate Student-t density with full scale matrix and fixed degrees
/// of freedom. Heavier tails than the Gaussian make it the safer proposal
/// family when the target may have broad support.
#[derive(Debug, Clone)]
pub struct MvStudentT {
    mean: DVector<f64>,
    scale: DMatrix<f64>,
    dof: f64,
    chol: Cholesky<f64, Dyn>,
    lower: DMatrix<f64>,
    chi_sq: ChiSquared<f64>,
    log_norm: f64,
}

impl MvStudentT {
    /// Creates a Student-t with the given mean, scale matrix and degrees of
    /// freedom.
    pub fn new(mean: DVector<f64>, scale: DMatrix<f64>, dof: f64) -> Result<Self, PmcError> {
        if !dof.is_finite() || dof <= 0.0 {
            return Err(PmcError::InvalidDof(dof));
        }
        let dim = mean.len();
        if scale.nrows() != dim || scale.ncols() != dim {
            return Err(PmcError::DimensionMismatch {
                expected: dim,
                got: scale.nrows(),
            });
        }
        let chol = Cholesky::new(scale.clone()).ok_or(PmcError::NotPositiveDefinite)?;
        let lower = chol.l();
        let chi_sq = ChiSquared::new(dof).map_err(|_| PmcError::InvalidDof(dof))?;
        let log_det = chol_log_det(&lower);
        let d = dim as f64;
        let log_norm = ln_gamma(0.5 * (dof + d))
            - ln_gamma(0.5 * dof)
            - 0.5 * d * (dof * PI).ln()
            - 0.5 * log_det;
        Ok(Self {
            mean,
            scale,
            dof,
            chol,
            lower,
            chi_sq,
            log_norm,
        })
    }

    /// Fits mean and scale to weighted points; degrees of freedom stay fixed.
    /// The scale matrix is fitted as the weighted second moment, like the
    /// Gaussian covariance. See [`MvGaussian::fit`] for the `min_variance`
    /// and failure semantics.
    pub fn fit(
        points: &[DVector<f64>],
        weights: &[f64],
        dof: f64,
        min_variance: f64,
    ) -> Result<Self, PmcError> {
        let dim = points.first().map(|p| p.len()).unwrap_or(0);
        let (mean, mut scale, n_eff) = weighted_mean_cov(points, weights, dim)?;
        if min_variance > 0.0 {
            for i in 0..dim {
                scale[(i, i)] += min_variance;
            }
        } else if n_eff < dim as f64 {
            return Err(PmcError::DegenerateFit { n_eff, dim });
        }
        Self::new(mean, scale, dof).map_err(|e| match e {
            PmcError::InvalidDof(d) => PmcError::InvalidDof(d),
            _ => PmcError::DegenerateFit { n_eff, dim },
        })
    }

    /// Draws one point: `mean + L z * sqrt(dof / v)` with `z` standard normal
    /// and `v` chi-squared with `dof` degrees of freedom.
    pub fn sample<R: Rng>(&self, rng: &mut R) -> DVector<f64> {
        let z = DVector::from_iterator(
            self.mean.len(),
            (0..self.mean.len()).map(|_| rng.sample::<f64, _>(StandardNormal)),
        );
        let v = self.chi_sq.sample(rng);
        &self.mean + (&self.lower * z) * (self.dof / v).sqrt()
    }

    /// Normalized log-density at `x`.
    pub fn log_prob(&self, x: &DVector<f64>) -> f64 {
        let diff = x - &self.mean;
        let mahalanobis_sq = diff.dot(&self.chol.solve(&diff));
        self.log_norm
            - 0.5 * (self.dof + self.mean.len() as f64) * (1.0 + mahalanobis_sq / self.dof).ln()
    }

    pub fn mean(&self) -> &DVector<f64> {
        &self.mean
    }

    pub fn scale(&self) -> &DMatrix<f64> {
        &self.scale
    }

    pub fn dof(&self) -> f64 {
        self.dof
    }
}

/// One component of a mixture proposal.
///
/// The set of families is closed and selected at construction time; dispatch
/// happens over this enum rather than through an open trait object.
#[derive(Debug, Clone)]
pub enum Component {
    Gaussian(MvGaussian),
    StudentT(MvStudentT),
}

impl Component {
    /// Draws one point from the component.
    pub fn sample<R: Rng>(&self, rng: &mut R) -> DVector<f64> {
        match self {
            Component::Gaussian(g) => g.sample(rng),
            Component::StudentT(t) => t.sample(rng),
        }
    }

    /// Normalized log-density at `x`.
    pub fn log_prob(&self, x: &DVector<f64>) -> f64 {
        match self {
            Component::Gaussian(g) => g.log_prob(x),
            Component::StudentT(t) => t.log_prob(x),
        }
    }

    /// Returns a new component of the same family refitted to the weighted
    /// points. Weights are normalized internally.
    pub fn update(
        &self,
        points: &[DVector<f64>],
        weights: &[f64],
        min_variance: f64,
    ) -> Result<Component, PmcError> {
        match self {
            Component::Gaussian(_) => {
                MvGaussian::fit(points, weights, min_variance).map(Component::Gaussian)
            }
            Component::StudentT(t) => {
                MvStudentT::fit(points, weights, t.dof, min_variance).map(Component::StudentT)
            }
        }
    }

    pub fn dim(&self) -> usize {
        match self {
            Component::Gaussian(g) => g.mean.len(),
            Component::StudentT(t) => t.mean.len(),
        }
    }

    pub fn mean(&self) -> &DVector<f64> {
        match self {
            Component::Gaussian(g) => g.mean(),
            Component::StudentT(t) => t.mean(),
        }
    }

    /// Covariance for the Gaussian family, scale matrix for Student-t.
    pub fn cov(&self) -> &DMatrix<f64> {
        match self {
            Component::Gaussian(g) => g.cov(),
            Component::StudentT(t) => t.scale(),
        }
    }

    /// Degrees of freedom, if the family has them.
    pub fn dof(&self) -> Option<f64> {
        match self {
            Component::Gaussian(_) => None,
            Component::StudentT(t) => Some(t.dof),
        }
    }

    /// Stable family tag used in checkpoints.
    pub fn family(&self) -> &'static str {
        match self {
            Component::Gaussian(_) => "gaussian",
            Component::StudentT(_) => "student_t",
        }
    }

    /// Symmetrized Kullback-Leibler divergence between the Gaussian
    /// approximations of two components (the scale matrix stands in for the
    /// covariance in the Student-t case). Zero for identical parameters,
    /// growing with mean separation and shape mismatch; the mixture-reduction
    /// step uses it to find near-duplicate components.
    pub fn symmetric_kl(&self, other: &Component) -> f64 {
        0.5 * (self.gauss_kl_to(other) + other.gauss_kl_to(self))
    }

    /// `KL(self || other)` of the Gaussian approximations.
    fn gauss_kl_to(&self, other: &Component) -> f64 {
        let dim = self.dim() as f64;
        let (chol_other, log_det_other) = other.chol_parts();
        let (_, log_det_self) = self.chol_parts();
        let trace = chol_other.solve(self.cov()).trace();
        let diff = other.mean() - self.mean();
        let mahalanobis_sq = diff.dot(&chol_other.solve(&diff));
        0.5 * (trace + mahalanobis_sq - dim + log_det_other - log_det_self)
    }

    fn chol_parts(&self) -> (&Cholesky<f64, Dyn>, f64) {
        match self {
            Component::Gaussian(g) => (&g.chol, chol_log_det(&g.lower)),
            Component::StudentT(t) => (&t.chol, chol_log_det(&t.lower)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    fn standard_2d() -> MvGaussian {
        MvGaussian::new(DVector::zeros(2), DMatrix::identity(2, 2)).unwrap()
    }

    #[test]
    fn gaussian_log_prob_at_origin() {
        let g = standard_2d();
        let lp = g.log_prob(&DVector::zeros(2));
        assert_abs_diff_eq!(lp, -(2.0 * PI).ln(), epsilon = 1e-12);
    }

    #[test]
    fn gaussian_log_prob_correlated() {
        // Hand-checked against the closed form with cov [[4, 2], [2, 3]].
        let cov = DMatrix::from_row_slice(2, 2, &[4.0, 2.0, 2.0, 3.0]);
        let g = MvGaussian::new(DVector::from_vec(vec![1.0, -1.0]), cov.clone()).unwrap();
        let x = DVector::from_vec(vec![2.0, 0.0]);
        let det: f64 = 8.0;
        let diff = &x - g.mean();
        let inv = cov.try_inverse().unwrap();
        let expected = -(2.0 * PI).ln() - 0.5 * det.ln() - 0.5 * diff.dot(&(&inv * &diff));
        assert_abs_diff_eq!(g.log_prob(&x), expected, epsilon = 1e-12);
    }

    #[test]
    fn gaussian_density_is_finite_and_positive() {
        let g = standard_2d();
        for x in [
            DVector::from_vec(vec![0.0, 0.0]),
            DVector::from_vec(vec![10.0, -10.0]),
            DVector::from_vec(vec![-3.5, 0.1]),
        ] {
            let p = g.log_prob(&x).exp();
            assert!(p.is_finite() && p >= 0.0);
        }
    }

    #[test]
    fn gaussian_rejects_non_positive_definite() {
        let cov = DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 2.0, 1.0]);
        assert!(matches!(
            MvGaussian::new(DVector::zeros(2), cov),
            Err(PmcError::NotPositiveDefinite)
        ));
    }

    #[test]
    fn weighted_fit_recovers_moments() {
        let points = vec![
            DVector::from_vec(vec![0.0, 0.0]),
            DVector::from_vec(vec![2.0, 0.0]),
            DVector::from_vec(vec![0.0, 2.0]),
            DVector::from_vec(vec![2.0, 2.0]),
        ];
        // Unnormalized weights; fit normalizes internally.
        let weights = vec![2.0; 4];
        let g = MvGaussian::fit(&points, &weights, 0.0).unwrap();
        assert_abs_diff_eq!(g.mean()[0], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(g.mean()[1], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(g.cov()[(0, 0)], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(g.cov()[(1, 1)], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(g.cov()[(0, 1)], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn degenerate_fit_when_effective_count_below_dim() {
        let points = vec![
            DVector::from_vec(vec![1.0, 2.0]),
            DVector::from_vec(vec![3.0, 4.0]),
        ];
        // One sample carries all the weight: n_eff ~ 1 < dim = 2.
        let weights = vec![1.0, 1e-12];
        assert!(matches!(
            MvGaussian::fit(&points, &weights, 0.0),
            Err(PmcError::DegenerateFit { .. })
        ));
    }

    #[test]
    fn min_variance_floor_rescues_degenerate_fit() {
        let points = vec![
            DVector::from_vec(vec![1.0, 2.0]),
            DVector::from_vec(vec![3.0, 4.0]),
        ];
        let weights = vec![1.0, 1e-12];
        let g = MvGaussian::fit(&points, &weights, 1e-6).unwrap();
        assert!(g.cov()[(0, 0)] >= 1e-6);
    }

    #[test]
    fn student_t_log_prob_matches_known_value() {
        // 1D t with 3 dof at the mode: Gamma(2) / (Gamma(1.5) sqrt(3 pi)).
        let t = MvStudentT::new(DVector::zeros(1), DMatrix::identity(1, 1), 3.0).unwrap();
        let lp = t.log_prob(&DVector::zeros(1));
        assert_abs_diff_eq!(lp.exp(), 0.3675525969478613, epsilon = 1e-12);
    }

    #[test]
    fn student_t_heavier_tails_than_gaussian() {
        let g = MvGaussian::new(DVector::zeros(1), DMatrix::identity(1, 1)).unwrap();
        let t = MvStudentT::new(DVector::zeros(1), DMatrix::identity(1, 1), 3.0).unwrap();
        let far = DVector::from_vec(vec![6.0]);
        assert!(t.log_prob(&far) > g.log_prob(&far));
    }

    #[test]
    fn student_t_rejects_bad_dof() {
        assert!(matches!(
            MvStudentT::new(DVector::zeros(1), DMatrix::identity(1, 1), 0.0),
            Err(PmcError::InvalidDof(_))
        ));
    }

    #[test]
    fn gaussian_sampling_matches_moments() {
        let mean = DVector::from_vec(vec![1.0, -2.0]);
        let cov = DMatrix::from_row_slice(2, 2, &[2.0, 0.6, 0.6, 1.0]);
        let g = MvGaussian::new(mean.clone(), cov.clone()).unwrap();
        let mut rng = SmallRng::seed_from_u64(7);
        let n = 50_000;
        let samples: Vec<DVector<f64>> = (0..n).map(|_| g.sample(&mut rng)).collect();
        let fitted = MvGaussian::fit(&samples, &vec![1.0; n], 0.0).unwrap();
        assert_abs_diff_eq!(fitted.mean()[0], mean[0], epsilon = 0.05);
        assert_abs_diff_eq!(fitted.mean()[1], mean[1], epsilon = 0.05);
        assert_abs_diff_eq!(fitted.cov()[(0, 1)], cov[(0, 1)], epsilon = 0.05);
    }

    #[test]
    fn symmetric_kl_is_zero_for_identical_and_grows_with_separation() {
        let origin = Component::Gaussian(standard_2d());
        let twin = Component::Gaussian(standard_2d());
        assert_abs_diff_eq!(origin.symmetric_kl(&twin), 0.0, epsilon = 1e-12);

        let near = Component::Gaussian(
            MvGaussian::new(DVector::from_vec(vec![0.1, 0.0]), DMatrix::identity(2, 2)).unwrap(),
        );
        let far = Component::Gaussian(
            MvGaussian::new(DVector::from_vec(vec![3.0, 0.0]), DMatrix::identity(2, 2)).unwrap(),
        );
        assert!(origin.symmetric_kl(&near) < origin.symmetric_kl(&far));
        // Equal unit covariances, mean offset d: symmetric KL is d^2 / 2.
        assert_abs_diff_eq!(origin.symmetric_kl(&far), 4.5, epsilon = 1e-12);
    }

    #[test]
    fn component_update_keeps_family() {
        let points: Vec<DVector<f64>> = (0..20)
            .map(|i| DVector::from_vec(vec![i as f64 * 0.1, (i % 5) as f64]))
            .collect();
        let weights = vec![1.0; 20];
        let t = Component::StudentT(
            MvStudentT::new(DVector::zeros(2), DMatrix::identity(2, 2), 5.0).unwrap(),
        );
        let refit = t.update(&points, &weights, 0.0).unwrap();
        assert_eq!(refit.family(), "student_t");
        assert_eq!(refit.dof(), Some(5.0));
    }
}
