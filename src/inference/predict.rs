use crate::estimate::EstimationError;
use crate::probability::odds_ratio_propensity;
use crate::types::{BinaryObservation, ExposureParams, FullDataset, OutcomeParams, PartialDataset};
use ndarray::{Array1, ArrayView1, Zip};

// Prediction keeps one entry per input row. Where the response the model
// conditions on is `Missing`, the fitted probability is undefined and the entry
// is `NaN`; callers select observed rows before interpreting predictions.

/// Fitted `P(R_A = 1 | A)` for each row.
///
/// `logistic(alpha0)` at `A = 0`, and `logistic(alpha0 - ln gamma)` at `A = 1`,
/// which is `p0 / (p0 + gamma * (1 - p0))` for `p0 = logistic(alpha0)`.
pub fn predict_exposure_propensity(
    params: &ExposureParams,
    exposure: ArrayView1<'_, BinaryObservation>,
) -> Array1<f64> {
    let log_odds_ratio = params.gamma.ln();
    exposure.mapv(|obs| match obs {
        BinaryObservation::Observed(a) => odds_ratio_propensity(params.alpha0, log_odds_ratio, a),
        BinaryObservation::Missing => f64::NAN,
    })
}

fn outcome_propensity_aligned(
    params: &OutcomeParams,
    w2: ArrayView1<'_, f64>,
    outcome: ArrayView1<'_, BinaryObservation>,
) -> Array1<f64> {
    let mut out = Array1::<f64>::zeros(w2.len());
    Zip::from(&mut out)
        .and(w2)
        .and(outcome)
        .for_each(|p, &w2, &obs| {
            *p = match obs {
                BinaryObservation::Observed(y) => odds_ratio_propensity(
                    params.alpha0 + params.alpha1 * w2,
                    params.log_odds_ratio_at(w2),
                    y,
                ),
                BinaryObservation::Missing => f64::NAN,
            };
        });
    out
}

/// Fitted `P(R_Y = 1 | Y, W2)` for each row, with baseline
/// `logistic(alpha0 + alpha1 * W2)` and odds ratio `gamma0 * exp(gamma1 * W2)`.
///
/// Rows with `Y = 1` are `NaN` when `gamma0` is negative.
pub fn predict_outcome_propensity(
    params: &OutcomeParams,
    w2: ArrayView1<'_, f64>,
    outcome: ArrayView1<'_, BinaryObservation>,
) -> Result<Array1<f64>, EstimationError> {
    if w2.len() != outcome.len() {
        return Err(EstimationError::ColumnLengthMismatch {
            column: "Y",
            expected: w2.len(),
            found: outcome.len(),
        });
    }
    Ok(outcome_propensity_aligned(params, w2, outcome))
}

pub fn predict_exposure_for_partial(params: &ExposureParams, data: &PartialDataset) -> Array1<f64> {
    predict_exposure_propensity(params, data.exposure())
}

/// Uses the true exposure, so every row gets a probability.
pub fn predict_exposure_for_full(params: &ExposureParams, data: &FullDataset) -> Array1<f64> {
    predict_exposure_propensity(params, data.exposure_observations().view())
}

pub fn predict_outcome_for_partial(params: &OutcomeParams, data: &PartialDataset) -> Array1<f64> {
    outcome_propensity_aligned(params, data.w2(), data.outcome())
}

/// Uses the true outcome, so every row gets a probability.
pub fn predict_outcome_for_full(params: &OutcomeParams, data: &FullDataset) -> Array1<f64> {
    outcome_propensity_aligned(params, data.w2(), data.outcome_observations().view())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probability::logistic;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn exposure_prediction_follows_odds_ratio_form() {
        let params = ExposureParams {
            alpha0: 0.3,
            gamma: (-2.0f64).exp(),
        };
        let preds = predict_exposure_propensity(
            &params,
            array![
                BinaryObservation::Observed(false),
                BinaryObservation::Observed(true),
                BinaryObservation::Missing
            ]
            .view(),
        );
        assert_abs_diff_eq!(preds[0], logistic(0.3), epsilon = 1e-12);
        assert_abs_diff_eq!(preds[1], logistic(2.3), epsilon = 1e-12);
        assert!(preds[2].is_nan());
    }

    #[test]
    fn outcome_prediction_matches_logistic_mechanism() {
        let params = OutcomeParams {
            alpha0: 0.8,
            alpha1: 1.0,
            gamma0: (-2.0f64).exp(),
            gamma1: 0.0,
        };
        let w2 = array![-1.5, 0.0, 2.0];
        let y = array![
            BinaryObservation::Observed(true),
            BinaryObservation::Observed(false),
            BinaryObservation::Observed(true)
        ];
        let preds = predict_outcome_propensity(&params, w2.view(), y.view()).unwrap();
        assert_abs_diff_eq!(preds[0], logistic(2.0 - 1.5 + 0.8), epsilon = 1e-12);
        assert_abs_diff_eq!(preds[1], logistic(0.8), epsilon = 1e-12);
        assert_abs_diff_eq!(preds[2], logistic(2.0 + 2.0 + 0.8), epsilon = 1e-12);
    }

    #[test]
    fn predictions_stay_in_unit_interval_across_covariate_range() {
        // A negative gamma1 used to drive the odds ratio through zero here.
        let params = OutcomeParams {
            alpha0: -1.0,
            alpha1: 0.7,
            gamma0: 0.4,
            gamma1: -0.6,
        };
        let w2 = Array1::linspace(-6.0, 6.0, 121);
        let y = Array1::from_shape_fn(121, |i| BinaryObservation::Observed(i % 2 == 0));
        let preds = predict_outcome_propensity(&params, w2.view(), y.view()).unwrap();
        for (&p, &w) in preds.iter().zip(w2.iter()) {
            assert!(p > 0.0 && p < 1.0, "p={p} at w2={w}");
        }
    }

    #[test]
    fn covariate_dependent_odds_ratio_is_multiplicative() {
        let params = OutcomeParams {
            alpha0: 0.2,
            alpha1: 0.0,
            gamma0: 0.5,
            gamma1: 0.4,
        };
        let preds = predict_outcome_propensity(
            &params,
            array![2.0].view(),
            array![BinaryObservation::Observed(true)].view(),
        )
        .unwrap();
        let p0 = logistic(0.2);
        let gamma = 0.5 * (0.8f64).exp();
        assert_abs_diff_eq!(preds[0], p0 / (p0 + gamma * (1.0 - p0)), epsilon = 1e-12);
    }

    #[test]
    fn negative_odds_ratio_has_no_propensity() {
        let params = ExposureParams {
            alpha0: 0.0,
            gamma: -1.0,
        };
        let preds = predict_exposure_propensity(
            &params,
            array![BinaryObservation::Observed(false), BinaryObservation::Observed(true)].view(),
        );
        assert_eq!(preds[0], 0.5);
        assert!(preds[1].is_nan());
    }

    #[test]
    fn outcome_prediction_checks_lengths() {
        let params = OutcomeParams::initial_guess();
        let err = predict_outcome_propensity(
            &params,
            array![0.0, 1.0].view(),
            array![BinaryObservation::Missing].view(),
        )
        .unwrap_err();
        assert!(matches!(err, EstimationError::ColumnLengthMismatch { .. }));
    }
}
