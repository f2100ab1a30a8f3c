//! Shadow-IPW estimating equations for the two self-censoring models.
//!
//! Each equation has the form `E[h(W) R / pi - h(W)] = 0`, which holds at the
//! true probability of being observed `pi` whenever the shadow variable `W1`
//! is independent of the response indicator given the (possibly missing)
//! response and the covariates. Choosing as many instrument functions `h` as
//! there are unknowns gives a square system for the root finder.

pub mod exposure;
pub mod outcome;

pub use exposure::ExposureMomentSystem;
pub use outcome::OutcomeMomentSystem;

use crate::linalg::utils::kahan_mean;
use crate::types::{BinaryObservation, ParameterVector};
use ndarray::{Array1, ArrayView1, Zip};

/// A square system of moment conditions bound to one dataset.
pub trait ShadowMomentSystem {
    type Params: ParameterVector;

    /// Model name used in logs and errors.
    fn label(&self) -> &'static str;

    /// The response this model conditions on.
    fn response(&self) -> ArrayView1<'_, BinaryObservation>;

    /// Rows whose response is observed; only these evaluate a propensity.
    fn contributing_rows(&self) -> usize {
        self.response().iter().filter(|obs| obs.is_observed()).count()
    }

    /// Fitted probability of being observed per row (`NaN` where the response
    /// is missing).
    fn propensities(&self, params: &Self::Params) -> Array1<f64>;

    /// One sample-average moment per instrument, in instrument order.
    fn residuals(&self, params: &Self::Params) -> Array1<f64>;
}

/// `mean(h * R / pi - h)` over all rows.
///
/// Branches on the observation state: a row with a missing response
/// contributes `-h` and its propensity is never read.
pub(crate) fn shadow_ipw_moment(
    instrument: ArrayView1<'_, f64>,
    propensity: ArrayView1<'_, f64>,
    response: ArrayView1<'_, BinaryObservation>,
) -> f64 {
    let mut terms = Array1::<f64>::zeros(instrument.len());
    Zip::from(&mut terms)
        .and(instrument)
        .and(propensity)
        .and(response)
        .for_each(|t, &h, &pi, obs| {
            *t = if obs.is_observed() { h / pi - h } else { -h };
        });
    kahan_mean(&terms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn missing_rows_ignore_their_propensity() {
        let h = array![2.0, 3.0];
        let pi = array![0.5, f64::NAN];
        let response = array![BinaryObservation::Observed(true), BinaryObservation::Missing];
        let m = shadow_ipw_moment(h.view(), pi.view(), response.view());
        // (2 / 0.5 - 2 - 3) / 2
        assert_eq!(m, -0.5);
    }
}
