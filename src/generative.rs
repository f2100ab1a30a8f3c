use crate::estimate::EstimationError;
use crate::probability::{logistic, odds};
use crate::types::{ExposureParams, FullDataset, OutcomeParams, PartialDataset};
use ndarray::{Array1, Zip};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Bernoulli, Distribution, StandardNormal};
use serde::{Deserialize, Serialize};

/// Coefficients of the fixed causal and missingness structure
/// `W1->W2, W1->A, W2->A, W2->Y, W2->R_Y, A->Y, A->R_A, Y->R_Y`.
///
/// Sampling always uses [`MissingnessDesign::default`]; the struct exists so
/// the parameters implied by the true mechanism are derived from the same
/// constants that drive the simulation.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MissingnessDesign {
    /// `W2 = N(0,1) + shadow_loading * W1`.
    pub shadow_loading: f64,
    /// `logit P(Y=1) = W2 + A + outcome_intercept`.
    pub outcome_intercept: f64,
    /// `logit P(R_A=1) = exposure_self_censoring * A + exposure_missingness_intercept`.
    pub exposure_missingness_intercept: f64,
    pub exposure_self_censoring: f64,
    /// `logit P(R_Y=1) = outcome_self_censoring * Y + outcome_missingness_covariate * W2
    /// + outcome_missingness_intercept`.
    pub outcome_missingness_intercept: f64,
    pub outcome_missingness_covariate: f64,
    pub outcome_self_censoring: f64,
}

impl Default for MissingnessDesign {
    fn default() -> Self {
        Self {
            shadow_loading: 1.4,
            outcome_intercept: -0.4,
            exposure_missingness_intercept: 0.3,
            exposure_self_censoring: 2.0,
            outcome_missingness_intercept: 0.8,
            outcome_missingness_covariate: 1.0,
            outcome_self_censoring: 2.0,
        }
    }
}

impl MissingnessDesign {
    /// Exposure-model parameters the shadow estimator should recover:
    /// `logistic(alpha0) = P(R_A=1|A=0)` and `gamma` equal to the odds of being
    /// observed at `A=0` divided by the odds at `A=1`.
    pub fn true_exposure_params(&self) -> ExposureParams {
        let base = logistic(self.exposure_missingness_intercept);
        let treated = logistic(self.exposure_missingness_intercept + self.exposure_self_censoring);
        ExposureParams {
            alpha0: self.exposure_missingness_intercept,
            gamma: odds(base) / odds(treated),
        }
    }

    /// Outcome-model parameters implied by the logistic `R_Y` mechanism; the
    /// odds ratio does not vary with `W2`, so `gamma1 = 0`.
    pub fn true_outcome_params(&self) -> OutcomeParams {
        OutcomeParams {
            alpha0: self.outcome_missingness_intercept,
            alpha1: self.outcome_missingness_covariate,
            gamma0: (-self.outcome_self_censoring).exp(),
            gamma1: 0.0,
        }
    }
}

fn draw_standard_normal<R: Rng + ?Sized>(size: usize, rng: &mut R) -> Array1<f64> {
    Array1::from_shape_fn(size, |_| Distribution::<f64>::sample(&StandardNormal, rng))
}

fn draw_bernoulli<R: Rng + ?Sized>(
    probabilities: &Array1<f64>,
    column: &str,
    rng: &mut R,
) -> Result<Array1<f64>, EstimationError> {
    let mut out = Array1::<f64>::zeros(probabilities.len());
    for (i, (slot, &p)) in out.iter_mut().zip(probabilities.iter()).enumerate() {
        let dist = Bernoulli::new(p).map_err(|e| {
            EstimationError::InvalidInput(format!(
                "invalid Bernoulli probability for {column} at index {i}: {e}"
            ))
        })?;
        *slot = if dist.sample(rng) { 1.0 } else { 0.0 };
    }
    Ok(out)
}

/// Simulate `size` units from the fixed structure and mask them.
///
/// Columns are drawn in order `W1`, `W2`, `A`, `Y`, `R_A`, `R_Y`, so a given
/// seeded generator always yields the same datasets.
pub fn generate<R: Rng + ?Sized>(
    size: usize,
    rng: &mut R,
) -> Result<(FullDataset, PartialDataset), EstimationError> {
    if size == 0 {
        return Err(EstimationError::InvalidInput(
            "dataset size must be positive".to_string(),
        ));
    }
    let design = MissingnessDesign::default();

    let w1 = draw_standard_normal(size, rng);
    let mut w2 = draw_standard_normal(size, rng);
    w2.scaled_add(design.shadow_loading, &w1);

    let p_a = (&w1 + &w2).mapv(logistic);
    let a = draw_bernoulli(&p_a, "A", rng)?;

    let mut p_y = Array1::<f64>::zeros(size);
    Zip::from(&mut p_y)
        .and(&w2)
        .and(&a)
        .for_each(|p, &w2, &a| *p = logistic(w2 + a + design.outcome_intercept));
    let y = draw_bernoulli(&p_y, "Y", rng)?;

    let p_r_a = a.mapv(|a| {
        logistic(design.exposure_self_censoring * a + design.exposure_missingness_intercept)
    });
    let r_a = draw_bernoulli(&p_r_a, "R_A", rng)?;

    let mut p_r_y = Array1::<f64>::zeros(size);
    Zip::from(&mut p_r_y).and(&y).and(&w2).for_each(|p, &y, &w2| {
        *p = logistic(
            design.outcome_self_censoring * y
                + design.outcome_missingness_covariate * w2
                + design.outcome_missingness_intercept,
        )
    });
    let r_y = draw_bernoulli(&p_r_y, "R_Y", rng)?;

    let full = FullDataset::new(w1, w2, a, y, r_a, r_y)?;
    let partial = PartialDataset::mask(&full);

    let summary = full.summary();
    log::info!(
        "generated {} units: P(A=1)={:.4} P(Y=1)={:.4} P(R_A=1)={:.4} P(R_Y=1)={:.4}",
        summary.rows,
        summary.exposure_rate,
        summary.outcome_rate,
        summary.exposure_observed_rate,
        summary.outcome_observed_rate
    );

    Ok((full, partial))
}

/// [`generate`] with a fresh `StdRng` seeded from `seed`.
pub fn generate_seeded(
    size: usize,
    seed: u64,
) -> Result<(FullDataset, PartialDataset), EstimationError> {
    let mut rng = StdRng::seed_from_u64(seed);
    generate(size, &mut rng)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BinaryObservation;
    use approx::assert_abs_diff_eq;

    #[test]
    fn same_seed_gives_identical_datasets() {
        let (full_a, partial_a) = generate_seeded(500, 7).unwrap();
        let (full_b, partial_b) = generate_seeded(500, 7).unwrap();
        assert_eq!(full_a, full_b);
        assert_eq!(partial_a, partial_b);

        let (full_c, _) = generate_seeded(500, 8).unwrap();
        assert_ne!(full_a, full_c);
    }

    #[test]
    fn zero_size_is_rejected() {
        assert!(matches!(
            generate_seeded(0, 1),
            Err(EstimationError::InvalidInput(_))
        ));
    }

    #[test]
    fn partial_data_agrees_with_full_data() {
        let (full, partial) = generate_seeded(2_000, 11).unwrap();
        assert_eq!(full.len(), partial.len());
        for i in 0..full.len() {
            assert_eq!(full.w1()[i], partial.w1()[i]);
            assert_eq!(full.w2()[i], partial.w2()[i]);
            assert_eq!(full.exposure_indicator()[i], partial.exposure_indicator()[i]);
            assert_eq!(full.outcome_indicator()[i], partial.outcome_indicator()[i]);
            match partial.exposure()[i] {
                BinaryObservation::Observed(v) => {
                    assert_eq!(full.exposure_indicator()[i], 1.0);
                    assert_eq!(full.exposure()[i] == 1.0, v);
                }
                BinaryObservation::Missing => assert_eq!(full.exposure_indicator()[i], 0.0),
            }
            match partial.outcome()[i] {
                BinaryObservation::Observed(v) => {
                    assert_eq!(full.outcome_indicator()[i], 1.0);
                    assert_eq!(full.outcome()[i] == 1.0, v);
                }
                BinaryObservation::Missing => assert_eq!(full.outcome_indicator()[i], 0.0),
            }
        }
    }

    #[test]
    fn shadow_is_correlated_with_covariate() {
        let (full, _) = generate_seeded(20_000, 3).unwrap();
        let w1 = full.w1();
        let w2 = full.w2();
        let n = w1.len() as f64;
        let (m1, m2) = (w1.sum() / n, w2.sum() / n);
        let cov = w1.iter().zip(w2.iter()).map(|(a, b)| (a - m1) * (b - m2)).sum::<f64>() / n;
        // Cov(W1, W2) = 1.4 Var(W1).
        assert_abs_diff_eq!(cov, 1.4, epsilon = 0.06);
    }

    #[test]
    fn true_parameters_follow_mechanism() {
        let design = MissingnessDesign::default();
        let exposure = design.true_exposure_params();
        assert_abs_diff_eq!(exposure.alpha0, 0.3, epsilon = 1e-12);
        assert_abs_diff_eq!(exposure.gamma, (-2.0f64).exp(), epsilon = 1e-12);
        let outcome = design.true_outcome_params();
        assert_eq!(outcome.alpha1, 1.0);
        assert_abs_diff_eq!(outcome.gamma0, (-2.0f64).exp(), epsilon = 1e-15);
    }

    #[test]
    fn conditional_response_rates_match_mechanism() {
        let (full, _) = generate_seeded(50_000, 21).unwrap();
        let untreated = full.exposure_observed_rate_given(false).unwrap();
        let treated = full.exposure_observed_rate_given(true).unwrap();
        assert_abs_diff_eq!(untreated, logistic(0.3), epsilon = 0.02);
        assert_abs_diff_eq!(treated, logistic(2.3), epsilon = 0.02);
    }
}
