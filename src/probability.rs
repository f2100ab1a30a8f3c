use ndarray::{Array1, ArrayView1};

/// Linear predictors are clamped to this magnitude before the logistic
/// transform so fitted probabilities never reach exactly 0 or 1.
const LOGIT_CLAMP: f64 = 30.0;

/// Logistic function `1 / (1 + e^-x)`, saturating at ±30 on the logit scale.
///
/// Only the IRLS benchmark uses the clamped form; the moment systems need the
/// exact value and call [`logistic`].
#[inline]
pub fn sigmoid(x: f64) -> f64 {
    let z = x.clamp(-LOGIT_CLAMP, LOGIT_CLAMP);
    1.0 / (1.0 + (-z).exp())
}

/// Elementwise clamped logistic transform of a linear predictor.
#[inline]
pub fn sigmoid_array(eta: ArrayView1<'_, f64>) -> Array1<f64> {
    eta.mapv(sigmoid)
}

/// Logistic function without clamping.
///
/// The exponential is always taken of a non-positive argument, so it never
/// overflows; the result is 0 or 1 only when the true value rounds there.
#[inline]
pub fn logistic(x: f64) -> f64 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

/// Odds `p / (1 - p)` of a probability.
#[inline]
pub fn odds(p: f64) -> f64 {
    p / (1.0 - p)
}

/// Probability of being observed under the odds-ratio parametrization.
///
/// `baseline_logit` is `logit P(R=1 | V=0)`; the odds ratio compares the odds
/// of being observed at `V=0` against `V=1`, so on the logit scale
/// `logit P(R=1 | V=1) = baseline_logit - log_odds_ratio`. This equals
/// `p0 / (p0 + odds_ratio * (1 - p0))` without the cancellation of that form.
/// At `v = 0` the odds ratio drops out. A non-positive odds ratio has no
/// logarithm and yields `NaN` at `v = 1`.
#[inline]
pub fn odds_ratio_propensity(baseline_logit: f64, log_odds_ratio: f64, value: bool) -> f64 {
    if value {
        logistic(baseline_logit - log_odds_ratio)
    } else {
        logistic(baseline_logit)
    }
}
