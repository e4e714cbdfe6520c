/*!
Support indicators: log-density factors that are zero inside a region and
negative infinity outside it.

Composed with an unconstrained log-density through [`restrict`] they confine a
target to a region; the Metropolis step and the importance weights both handle
the resulting negative-infinity values explicitly, so restricted targets need
no special treatment downstream.

# Examples

```rust
use mini_pmc::indicators::{ball, restrict};
use nalgebra::DVector;

// Standard Gaussian truncated to the unit disc.
let target = restrict(|x: &DVector<f64>| -0.5 * x.dot(x), ball(DVector::zeros(2), 1.0));
assert!(target(&DVector::zeros(2)).is_finite());
assert_eq!(target(&DVector::from_vec(vec![2.0, 0.0])), f64::NEG_INFINITY);
```
*/

use nalgebra::DVector;

/// Indicator of the closed ball `|x - center| <= radius`.
pub fn ball(
    center: DVector<f64>,
    radius: f64,
) -> impl Fn(&DVector<f64>) -> f64 + Clone + Send + Sync {
    move |x: &DVector<f64>| {
        if (x - &center).norm() <= radius {
            0.0
        } else {
            f64::NEG_INFINITY
        }
    }
}

/// Indicator of the closed axis-aligned box `lower_i <= x_i <= upper_i`.
///
/// Panics if the bound vectors differ in length.
pub fn hyperrectangle(
    lower: DVector<f64>,
    upper: DVector<f64>,
) -> impl Fn(&DVector<f64>) -> f64 + Clone + Send + Sync {
    assert_eq!(
        lower.len(),
        upper.len(),
        "bounds must share one dimension"
    );
    move |x: &DVector<f64>| {
        let inside = x
            .iter()
            .zip(lower.iter())
            .zip(upper.iter())
            .all(|((&xi, &lo), &hi)| lo <= xi && xi <= hi);
        if inside {
            0.0
        } else {
            f64::NEG_INFINITY
        }
    }
}

/// Restricts a log-density to the support of an indicator. The density is not
/// evaluated outside the support.
pub fn restrict<D, I>(
    density: D,
    indicator: I,
) -> impl Fn(&DVector<f64>) -> f64 + Clone + Send + Sync
where
    D: Fn(&DVector<f64>) -> f64 + Clone + Send + Sync,
    I: Fn(&DVector<f64>) -> f64 + Clone + Send + Sync,
{
    move |x: &DVector<f64>| {
        let inside = indicator(x);
        if inside == f64::NEG_INFINITY {
            inside
        } else {
            density(x) + inside
        }
    }
}
