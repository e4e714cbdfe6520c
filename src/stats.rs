//! Provides functions for computing importance-sampling statistics.

use num_traits::Float;

/// Computes `log(sum_i exp(values_i))` stably by subtracting the running
/// maximum before exponentiating.
///
/// Returns negative infinity for an empty slice (the log of an empty sum).
pub fn log_sum_exp<T: Float>(values: &[T]) -> T {
    let mut max = T::neg_infinity();
    for &v in values {
        if v > max {
            max = v;
        }
    }
    // All -inf (or empty): the sum is zero. A +inf term dominates everything.
    if !max.is_finite() {
        return max;
    }
    let mut sum = T::zero();
    for &v in values {
        sum = sum + (v - max).exp();
    }
    max + sum.ln()
}

/// Effective sample size `1 / sum(w_i^2)` of a batch of normalized importance
/// weights. Lies in `[1, n]`: `n` for uniform weights, 1 when a single sample
/// carries all the weight.
pub fn ess<T: Float>(normalized_weights: &[T]) -> T {
    let mut sum_sq = T::zero();
    for &w in normalized_weights {
        sum_sq = sum_sq + w * w;
    }
    T::one() / sum_sq
}

/// Normalized perplexity `exp(-sum_i w_i ln w_i) / n` of a batch of normalized
/// importance weights.
///
/// Values near 1 indicate near-uniform weights (the proposal matches the
/// target well); values near 0 indicate weight concentration on few samples.
/// Zero weights contribute zero entropy.
pub fn perplexity<T: Float>(normalized_weights: &[T]) -> T {
    let mut entropy = T::zero();
    for &w in normalized_weights {
        if w > T::zero() {
            entropy = entropy - w * w.ln();
        }
    }
    entropy.exp() / T::from(normalized_weights.len()).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn log_sum_exp_matches_naive_reference() {
        let values = [-1.2f64, 0.3, -0.7, 2.1];
        let naive = values.iter().map(|v| v.exp()).sum::<f64>().ln();
        assert_abs_diff_eq!(log_sum_exp(&values), naive, epsilon = 1e-12);
    }

    #[test]
    fn log_sum_exp_survives_large_magnitudes() {
        // Naive summation would overflow to inf here.
        let values = [1000.0f64, 1000.0];
        assert_abs_diff_eq!(
            log_sum_exp(&values),
            1000.0 + 2.0f64.ln(),
            epsilon = 1e-12
        );
    }

    #[test]
    fn log_sum_exp_of_empty_is_neg_inf() {
        let values: [f64; 0] = [];
        assert_eq!(log_sum_exp(&values), f64::NEG_INFINITY);
    }

    #[test]
    fn log_sum_exp_all_neg_inf() {
        let values = [f64::NEG_INFINITY, f64::NEG_INFINITY];
        assert_eq!(log_sum_exp(&values), f64::NEG_INFINITY);
    }

    #[test]
    fn ess_ranges() {
        let uniform = [0.25f64; 4];
        assert_abs_diff_eq!(ess(&uniform), 4.0, epsilon = 1e-12);

        let concentrated = [1.0f64, 0.0, 0.0, 0.0];
        assert_abs_diff_eq!(ess(&concentrated), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn perplexity_uniform_is_one() {
        let uniform = [0.1f64; 10];
        assert_abs_diff_eq!(perplexity(&uniform), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn perplexity_concentrated_is_small() {
        let concentrated = [1.0f64, 0.0, 0.0, 0.0];
        assert_abs_diff_eq!(perplexity(&concentrated), 0.25, epsilon = 1e-12);
    }
}
