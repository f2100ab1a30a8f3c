//! Fully specified logistic regression of `R_Y` on `Y` and `W2`.
//!
//! Only possible on the full data, where `Y` is known for every row. It is
//! the reference the shadow estimator's outcome model is compared against,
//! never an input to it.

use crate::estimate::EstimationError;
use crate::linalg::faer_ndarray::solve_symmetric_system;
use crate::probability::sigmoid_array;
use crate::types::FullDataset;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis, Zip};
use serde::{Deserialize, Serialize};

const MU_EPS: f64 = 1e-12;
const MAX_STEP_HALVINGS: usize = 30;
const SEPARATION_ETA: f64 = 30.0;

fn default_max_iterations() -> usize {
    50
}

fn default_convergence_tolerance() -> f64 {
    1e-10
}

/// Newton / IRLS settings for the benchmark fit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkOptions {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    /// Relative deviance change `|Δdev| / (|dev| + 0.1)` at which the fit stops.
    #[serde(default = "default_convergence_tolerance")]
    pub convergence_tolerance: f64,
}

impl Default for BenchmarkOptions {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            convergence_tolerance: default_convergence_tolerance(),
        }
    }
}

/// A fitted binomial-logit GLM.
#[derive(Debug, Clone, Serialize)]
pub struct LogisticRegression {
    coefficients: Array1<f64>,
    deviance: f64,
    iterations: usize,
}

fn binomial_deviance(y: ArrayView1<'_, f64>, mu: &Array1<f64>) -> f64 {
    let mut dev = 0.0;
    for (&yi, &mi) in y.iter().zip(mu.iter()) {
        let m = mi.clamp(MU_EPS, 1.0 - MU_EPS);
        dev -= 2.0 * (yi * m.ln() + (1.0 - yi) * (1.0 - m).ln());
    }
    dev
}

impl LogisticRegression {
    /// Maximum-likelihood fit of `response` (0/1) on the columns of `design`.
    /// `design` must carry its own intercept column.
    pub fn fit(
        design: ArrayView2<'_, f64>,
        response: ArrayView1<'_, f64>,
        options: &BenchmarkOptions,
    ) -> Result<Self, EstimationError> {
        let (n, p) = design.dim();
        if n != response.len() {
            return Err(EstimationError::InvalidInput(format!(
                "design has {n} rows but the response has {}",
                response.len()
            )));
        }
        if n == 0 || p == 0 {
            return Err(EstimationError::InvalidInput(
                "benchmark regression needs at least one row and one column".to_string(),
            ));
        }
        if response.iter().any(|&v| v != 0.0 && v != 1.0) {
            return Err(EstimationError::InvalidInput(
                "benchmark response must be coded 0/1".to_string(),
            ));
        }

        let mut beta = Array1::<f64>::zeros(p);
        let mut eta = design.dot(&beta);
        let mut mu = sigmoid_array(eta.view());
        let mut deviance = binomial_deviance(response, &mu);
        let mut last_change = f64::INFINITY;

        for iteration in 1..=options.max_iterations {
            let weights = mu.mapv(|m| (m * (1.0 - m)).max(MU_EPS));
            let gradient = design.t().dot(&(&response - &mu));
            let weighted = &design * &weights.view().insert_axis(Axis(1));
            let hessian: Array2<f64> = design.t().dot(&weighted);
            let direction = solve_symmetric_system(&hessian, &gradient)?;

            // Step halving until the deviance does not increase.
            let mut step = 1.0;
            let mut accepted = None;
            for _ in 0..=MAX_STEP_HALVINGS {
                let candidate = &beta + &(&direction * step);
                let cand_eta = design.dot(&candidate);
                let cand_mu = sigmoid_array(cand_eta.view());
                let cand_dev = binomial_deviance(response, &cand_mu);
                if cand_dev.is_finite() && cand_dev <= deviance * (1.0 + 1e-12) {
                    accepted = Some((candidate, cand_eta, cand_mu, cand_dev));
                    break;
                }
                step *= 0.5;
            }
            let Some((candidate, cand_eta, cand_mu, cand_dev)) = accepted else {
                log::debug!("benchmark IRLS stalled at iteration {iteration}");
                break;
            };

            last_change = (deviance - cand_dev).abs();
            let relative = last_change / (cand_dev.abs() + 0.1);
            beta = candidate;
            eta = cand_eta;
            mu = cand_mu;
            deviance = cand_dev;

            let max_abs_eta = eta.iter().fold(0.0f64, |acc, v| acc.max(v.abs()));
            if max_abs_eta > SEPARATION_ETA {
                return Err(EstimationError::PerfectSeparationDetected {
                    iteration,
                    max_abs_eta,
                });
            }

            log::debug!(
                "benchmark IRLS iteration {iteration}: deviance={deviance:.6} step={step}"
            );

            if relative < options.convergence_tolerance {
                return Ok(Self {
                    coefficients: beta,
                    deviance,
                    iterations: iteration,
                });
            }
        }

        Err(EstimationError::BenchmarkDidNotConverge {
            max_iterations: options.max_iterations,
            last_change,
        })
    }

    pub fn coefficients(&self) -> ArrayView1<'_, f64> {
        self.coefficients.view()
    }

    pub fn deviance(&self) -> f64 {
        self.deviance
    }

    pub fn iterations(&self) -> usize {
        self.iterations
    }

    /// Fitted probabilities for the rows of `design`.
    pub fn predict(&self, design: ArrayView2<'_, f64>) -> Result<Array1<f64>, EstimationError> {
        if design.ncols() != self.coefficients.len() {
            return Err(EstimationError::InvalidInput(format!(
                "design has {} columns but the model has {} coefficients",
                design.ncols(),
                self.coefficients.len()
            )));
        }
        Ok(sigmoid_array(design.dot(&self.coefficients).view()))
    }
}

/// Design rows `[1, Y, W2]` for the benchmark `R_Y ~ Y + W2`.
pub fn outcome_missingness_design(w2: ArrayView1<'_, f64>, y: ArrayView1<'_, f64>) -> Array2<f64> {
    let mut x = Array2::<f64>::ones((w2.len(), 3));
    Zip::from(x.rows_mut())
        .and(w2)
        .and(y)
        .for_each(|mut row, &w2, &y| {
            row[1] = y;
            row[2] = w2;
        });
    x
}

/// Fit `R_Y ~ 1 + Y + W2` on the full data.
pub fn fit_outcome_missingness_benchmark(
    full: &FullDataset,
    options: &BenchmarkOptions,
) -> Result<LogisticRegression, EstimationError> {
    let design = outcome_missingness_design(full.w2(), full.outcome());
    LogisticRegression::fit(design.view(), full.outcome_indicator(), options)
}
