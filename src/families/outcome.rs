use super::{ShadowMomentSystem, shadow_ipw_moment};
use crate::inference::predict::predict_outcome_for_partial;
use crate::types::{BinaryObservation, OutcomeParams, PartialDataset};
use ndarray::{Array1, ArrayView1, Zip};

/// Moment conditions for `P(R_Y = 1 | Y, W2)` with shadow `W1`.
///
/// Instruments are `W1·W2`, `W1·W2 + 1`, `W1·W2²` and `W1·W2² + 1`; the
/// shifted copies add the plain response-rate condition to each product.
pub struct OutcomeMomentSystem<'a> {
    data: &'a PartialDataset,
    instruments: [Array1<f64>; 4],
}

impl<'a> OutcomeMomentSystem<'a> {
    pub fn new(data: &'a PartialDataset) -> Self {
        let mut linear = Array1::<f64>::zeros(data.len());
        let mut quadratic = Array1::<f64>::zeros(data.len());
        Zip::from(&mut linear)
            .and(&mut quadratic)
            .and(data.w1())
            .and(data.w2())
            .for_each(|lin, quad, &w1, &w2| {
                *lin = w1 * w2;
                *quad = w1 * w2 * w2;
            });
        let linear_shifted = &linear + 1.0;
        let quadratic_shifted = &quadratic + 1.0;
        Self {
            data,
            instruments: [linear, linear_shifted, quadratic, quadratic_shifted],
        }
    }
}

impl ShadowMomentSystem for OutcomeMomentSystem<'_> {
    type Params = OutcomeParams;

    fn label(&self) -> &'static str {
        "outcome"
    }

    fn response(&self) -> ArrayView1<'_, BinaryObservation> {
        self.data.outcome()
    }

    fn propensities(&self, params: &OutcomeParams) -> Array1<f64> {
        predict_outcome_for_partial(params, self.data)
    }

    fn residuals(&self, params: &OutcomeParams) -> Array1<f64> {
        let propensity = self.propensities(params);
        self.instruments
            .iter()
            .map(|h| shadow_ipw_moment(h.view(), propensity.view(), self.data.outcome()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn residuals_match_hand_computation() {
        let data = PartialDataset::new(
            array![1.0, 1.0],
            array![1.0, 2.0],
            array![BinaryObservation::Missing, BinaryObservation::Missing],
            array![BinaryObservation::Observed(true), BinaryObservation::Missing],
            array![0.0, 0.0],
            array![1.0, 0.0],
        )
        .unwrap();
        let system = OutcomeMomentSystem::new(&data);
        // p1 = 0.5 on the observed row; instruments (1, 2, 1, 2) and (2, 3, 4, 5).
        let r = system.residuals(&OutcomeParams {
            alpha0: 0.0,
            alpha1: 0.0,
            gamma0: 1.0,
            gamma1: 0.0,
        });
        let expected = [-0.5, -0.5, -1.5, -1.5];
        for (got, want) in r.iter().zip(expected) {
            assert_abs_diff_eq!(*got, want, epsilon = 1e-15);
        }
        assert_eq!(system.contributing_rows(), 1);
    }

    #[test]
    fn covariate_dependent_odds_ratio_changes_only_observed_positive_rows() {
        let data = PartialDataset::new(
            array![0.3, -0.7, 1.1],
            array![1.0, -2.0, 0.5],
            array![
                BinaryObservation::Missing,
                BinaryObservation::Missing,
                BinaryObservation::Missing
            ],
            array![
                BinaryObservation::Observed(false),
                BinaryObservation::Missing,
                BinaryObservation::Observed(true)
            ],
            array![0.0, 0.0, 0.0],
            array![1.0, 0.0, 1.0],
        )
        .unwrap();
        let system = OutcomeMomentSystem::new(&data);
        let base = OutcomeParams {
            alpha0: 0.4,
            alpha1: -0.2,
            gamma0: 0.5,
            gamma1: 0.0,
        };
        let pi = system.propensities(&base);
        assert!(pi[1].is_nan());
        let shifted = system.propensities(&OutcomeParams {
            gamma1: 0.3,
            ..base
        });
        // Y = 0 rows do not depend on the odds ratio.
        assert_eq!(pi[0], shifted[0]);
        assert!(pi[2] != shifted[2]);
    }

    #[test]
    fn shifted_instruments_share_the_response_rate_condition() {
        // (W1W2 + 1) - W1W2 and (W1W2² + 1) - W1W2² are both the constant
        // instrument, so the two differences coincide for any parameters.
        let (_, partial) = crate::generative::generate_seeded(2_000, 3).unwrap();
        let system = OutcomeMomentSystem::new(&partial);
        let r = system.residuals(&OutcomeParams {
            alpha0: 0.5,
            alpha1: 0.9,
            gamma0: 0.3,
            gamma1: 0.1,
        });
        assert_abs_diff_eq!(r[1] - r[0], r[3] - r[2], epsilon = 1e-9);
    }
}
