//! # Shadow-variable estimation of self-censoring missingness
//!
//! Ties the moment systems in [`crate::families`] to a [`RootFinder`]:
//!
//! 1.  The dataset is checked before any numerics: at least one row must have
//!     the response observed, otherwise no row carries information about the
//!     propensity and the system is degenerate.
//! 2.  The root finder solves the square system from the initial guess in the
//!     search coordinates of [`ParameterVector::to_search_space`], where odds
//!     ratios are on the log scale and therefore always positive. Trial points
//!     where the moments are not finite are rejected by the solver rather than
//!     treated as errors.
//! 3.  The root is checked: parameters must be finite, and every contributing
//!     row must have a propensity strictly inside (0,1). A root that fails
//!     either check is an error, never a fit.
//!
//! Non-convergence is always an error; a poor fit is never returned as a root.

use crate::benchmark::BenchmarkOptions;
use crate::families::{ExposureMomentSystem, OutcomeMomentSystem, ShadowMomentSystem};
use crate::linalg::faer_ndarray::FaerLinalgError;
use crate::solver::{RootFinder, RootFindingError, RootSolverOptions, TrustRegionSolver};
use crate::types::{ExposureParams, OutcomeParams, ParameterVector, PartialDataset};
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error)]
pub enum EstimationError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Required column '{column}' is missing from the dataset")]
    MissingColumn { column: String },

    #[error("Column '{column}' has {found} rows but {expected} were expected")]
    ColumnLengthMismatch {
        column: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("Column '{column}' must be 0 or 1, found {value} at row {row}")]
    NonBinaryValue {
        row: usize,
        column: &'static str,
        value: f64,
    },

    #[error(
        "Row {row}: the response indicator for '{column}' disagrees with whether the value is observed"
    )]
    MaskingViolation { row: usize, column: &'static str },

    #[error(
        "No row has the {response} observed, so the {response} missingness model has no contributing rows"
    )]
    NoObservedRows { response: &'static str },

    #[error("Root finding for the {model} missingness model failed: {source}")]
    RootFindingFailed {
        model: &'static str,
        #[source]
        source: RootFindingError,
    },

    #[error(
        "The {model} missingness root implies a degenerate probability of being observed ({value}) at row {row}"
    )]
    DegenerateProbability {
        model: &'static str,
        row: usize,
        value: f64,
    },

    #[error("The {model} missingness root has non-finite parameters {values:?}")]
    NonFiniteRoot {
        model: &'static str,
        values: Vec<f64>,
    },

    #[error("A linear system solve failed: {0}")]
    LinearSystemSolveFailed(#[from] FaerLinalgError),

    #[error(
        "Perfect or quasi-perfect separation detected while fitting the benchmark regression at iteration {iteration} (max|eta| = {max_abs_eta:.2e})"
    )]
    PerfectSeparationDetected { iteration: usize, max_abs_eta: f64 },

    #[error(
        "The benchmark regression did not converge within {max_iterations} iterations. Last deviance change was {last_change:.6e}."
    )]
    BenchmarkDidNotConverge {
        max_iterations: usize,
        last_change: f64,
    },

    #[error("I/O error: {0}")]
    Io(String),
}

// Ensure Debug prints with actual line breaks by delegating to Display
impl core::fmt::Debug for EstimationError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{self}")
    }
}

/// Everything configurable about a run, loadable from JSON.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimationConfig {
    pub solver: RootSolverOptions,
    pub benchmark: BenchmarkOptions,
    /// Starting point for the exposure model; `(0, 1)` when absent.
    pub exposure_initial: Option<ExposureParams>,
    /// Starting point for the outcome model; `(0, 0, 1, 0)` when absent.
    pub outcome_initial: Option<OutcomeParams>,
}

/// A solved missingness model.
#[derive(Debug, Clone, Serialize)]
pub struct MissingnessFit<P> {
    pub params: P,
    /// Moment conditions re-evaluated at `params`.
    pub residual: Array1<f64>,
    pub residual_norm: f64,
    pub iterations: usize,
    pub function_evaluations: usize,
    /// Rows with the response observed.
    pub contributing_rows: usize,
}

/// Every contributing row must get a propensity strictly inside (0,1).
fn check_root_propensities<S: ShadowMomentSystem>(
    system: &S,
    params: &S::Params,
) -> Result<(), EstimationError> {
    let propensities = system.propensities(params);
    let response = system.response();
    let degenerate = propensities
        .iter()
        .zip(response.iter())
        .enumerate()
        .find(|(_, (p, obs))| obs.is_observed() && !(**p > 0.0 && **p < 1.0));
    match degenerate {
        Some((row, (&value, _))) => Err(EstimationError::DegenerateProbability {
            model: system.label(),
            row,
            value,
        }),
        None => Ok(()),
    }
}

/// Solve `system` from `initial` and validate the root.
pub fn fit_shadow_system<S, R>(
    system: &S,
    initial: S::Params,
    solver: &R,
) -> Result<MissingnessFit<S::Params>, EstimationError>
where
    S: ShadowMomentSystem,
    R: RootFinder,
{
    let model = system.label();
    let contributing_rows = system.contributing_rows();
    if contributing_rows == 0 {
        return Err(EstimationError::NoObservedRows { response: model });
    }
    if !initial.is_finite() {
        return Err(EstimationError::InvalidInput(format!(
            "initial guess for the {model} model is not finite: {initial:?}"
        )));
    }

    let dim = S::Params::dim();
    let start = initial.to_search_space()?;
    let solution = solver
        .solve(
            |x| match S::Params::from_search_space(x) {
                Ok(params) => system.residuals(&params),
                Err(_) => Array1::from_elem(dim, f64::NAN),
            },
            start.view(),
        )
        .map_err(|source| EstimationError::RootFindingFailed { model, source })?;

    let params = S::Params::from_search_space(solution.x.view())?;
    if !params.is_finite() {
        return Err(EstimationError::NonFiniteRoot {
            model,
            values: params.to_array().to_vec(),
        });
    }
    check_root_propensities(system, &params)?;

    log::info!(
        "{} missingness root {:?} after {} iterations ({} evaluations), |F|={:.3e}",
        model,
        params,
        solution.iterations,
        solution.function_evaluations,
        solution.residual_norm
    );

    Ok(MissingnessFit {
        params,
        residual: solution.residual,
        residual_norm: solution.residual_norm,
        iterations: solution.iterations,
        function_evaluations: solution.function_evaluations,
        contributing_rows,
    })
}

/// Estimate `P(R_A = 1 | A)` from partially observed data.
pub fn fit_exposure_missingness(
    data: &PartialDataset,
    initial: Option<ExposureParams>,
    options: &RootSolverOptions,
) -> Result<MissingnessFit<ExposureParams>, EstimationError> {
    if data.is_empty() {
        return Err(EstimationError::InvalidInput(
            "cannot estimate from an empty dataset".to_string(),
        ));
    }
    let system = ExposureMomentSystem::new(data);
    let solver = TrustRegionSolver::new(*options);
    fit_shadow_system(
        &system,
        initial.unwrap_or_else(ExposureParams::initial_guess),
        &solver,
    )
}

/// Estimate `P(R_Y = 1 | Y, W2)` from partially observed data.
pub fn fit_outcome_missingness(
    data: &PartialDataset,
    initial: Option<OutcomeParams>,
    options: &RootSolverOptions,
) -> Result<MissingnessFit<OutcomeParams>, EstimationError> {
    if data.is_empty() {
        return Err(EstimationError::InvalidInput(
            "cannot estimate from an empty dataset".to_string(),
        ));
    }
    let system = OutcomeMomentSystem::new(data);
    let solver = TrustRegionSolver::new(*options);
    fit_shadow_system(
        &system,
        initial.unwrap_or_else(OutcomeParams::initial_guess),
        &solver,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generative::generate_seeded;
    use crate::solver::RootSolution;
    use crate::types::{BinaryObservation, FullDataset};
    use ndarray::{ArrayView1, array};

    /// A finder that never converges, to check error propagation.
    struct Refusing;

    impl RootFinder for Refusing {
        fn solve<F>(
            &self,
            _system: F,
            x0: ArrayView1<'_, f64>,
        ) -> Result<RootSolution, RootFindingError>
        where
            F: Fn(ArrayView1<'_, f64>) -> Array1<f64>,
        {
            Err(RootFindingError::MaxIterationsReached {
                iterations: 0,
                residual_norm: 1.0,
                last_x: x0.to_owned(),
            })
        }
    }

    /// A finder that reports a fixed point in search coordinates as the root.
    struct Landing(Array1<f64>);

    impl RootFinder for Landing {
        fn solve<F>(
            &self,
            system: F,
            _x0: ArrayView1<'_, f64>,
        ) -> Result<RootSolution, RootFindingError>
        where
            F: Fn(ArrayView1<'_, f64>) -> Array1<f64>,
        {
            let residual = system(self.0.view());
            Ok(RootSolution {
                x: self.0.clone(),
                residual_norm: residual.iter().map(|v| v * v).sum::<f64>().sqrt(),
                residual,
                iterations: 1,
                function_evaluations: 1,
            })
        }
    }

    #[test]
    fn all_missing_response_is_a_configuration_error() {
        let full = FullDataset::new(
            array![0.1, 0.2, 0.3],
            array![1.0, 0.0, -1.0],
            array![1.0, 0.0, 1.0],
            array![0.0, 1.0, 1.0],
            array![0.0, 0.0, 0.0],
            array![1.0, 1.0, 1.0],
        )
        .unwrap();
        let partial = PartialDataset::mask(&full);
        assert!(
            partial
                .exposure()
                .iter()
                .all(|obs| *obs == BinaryObservation::Missing)
        );
        let err =
            fit_exposure_missingness(&partial, None, &RootSolverOptions::default()).unwrap_err();
        assert!(matches!(
            err,
            EstimationError::NoObservedRows { response: "exposure" }
        ));
    }

    #[test]
    fn non_convergence_surfaces_as_error() {
        let (_, partial) = generate_seeded(1_000, 2).unwrap();
        let system = ExposureMomentSystem::new(&partial);
        let err = fit_shadow_system(&system, ExposureParams::initial_guess(), &Refusing)
            .unwrap_err();
        assert!(matches!(
            err,
            EstimationError::RootFindingFailed {
                model: "exposure",
                source: RootFindingError::MaxIterationsReached { .. }
            }
        ));
    }

    #[test]
    fn non_finite_initial_guess_is_rejected() {
        let (_, partial) = generate_seeded(200, 4).unwrap();
        let err = fit_exposure_missingness(
            &partial,
            Some(ExposureParams {
                alpha0: f64::INFINITY,
                gamma: 1.0,
            }),
            &RootSolverOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, EstimationError::InvalidInput(_)));
    }

    #[test]
    fn collapsed_odds_ratio_root_is_rejected() {
        // ln(gamma) = -800 underflows gamma to zero, which sends every observed
        // exposed row to probability one.
        let (_, partial) = generate_seeded(1_000, 2).unwrap();
        let system = ExposureMomentSystem::new(&partial);
        let err = fit_shadow_system(
            &system,
            ExposureParams::initial_guess(),
            &Landing(array![0.3, -800.0]),
        )
        .unwrap_err();
        let first_exposed = partial
            .exposure()
            .iter()
            .position(|obs| *obs == BinaryObservation::Observed(true))
            .unwrap();
        match err {
            EstimationError::DegenerateProbability { model, row, value } => {
                assert_eq!(model, "exposure");
                assert_eq!(row, first_exposed);
                assert_eq!(value, 1.0);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn negative_odds_ratio_root_is_rejected() {
        let (_, partial) = generate_seeded(1_000, 2).unwrap();
        let system = OutcomeMomentSystem::new(&partial);
        let params = OutcomeParams {
            alpha0: 0.8,
            alpha1: 1.0,
            gamma0: -0.25,
            gamma1: 0.0,
        };
        let err = check_root_propensities(&system, &params).unwrap_err();
        assert!(matches!(
            err,
            EstimationError::DegenerateProbability { model: "outcome", value, .. } if value.is_nan()
        ));
        // The same baseline with a positive odds ratio passes.
        assert!(
            check_root_propensities(&system, &OutcomeParams { gamma0: 0.25, ..params }).is_ok()
        );
    }

    #[test]
    fn overflowing_root_reports_its_parameters() {
        let (_, partial) = generate_seeded(500, 6).unwrap();
        let system = ExposureMomentSystem::new(&partial);
        let err = fit_shadow_system(
            &system,
            ExposureParams::initial_guess(),
            &Landing(array![0.1, 800.0]),
        )
        .unwrap_err();
        match err {
            EstimationError::NonFiniteRoot { model, values } => {
                assert_eq!(model, "exposure");
                assert_eq!(values[0], 0.1);
                assert_eq!(values[1], f64::INFINITY);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn non_positive_starting_odds_ratio_is_invalid_input() {
        let (_, partial) = generate_seeded(200, 4).unwrap();
        let err = fit_outcome_missingness(
            &partial,
            Some(OutcomeParams {
                alpha0: 0.0,
                alpha1: 0.0,
                gamma0: -1.0,
                gamma1: 0.0,
            }),
            &RootSolverOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, EstimationError::InvalidInput(_)));
    }

    #[test]
    fn outcome_root_is_inside_unit_interval() {
        let (_, partial) = generate_seeded(5_000, 10).unwrap();
        let options = RootSolverOptions::default();
        let fit = fit_outcome_missingness(&partial, None, &options).unwrap();
        assert!(fit.residual_norm <= options.ftol);
        let system = OutcomeMomentSystem::new(&partial);
        for (p, obs) in system.propensities(&fit.params).iter().zip(partial.outcome()) {
            if obs.is_observed() {
                assert!(*p > 0.0 && *p < 1.0, "p={p}");
            }
        }
    }

    #[test]
    fn exposure_root_satisfies_moments() {
        let (_, partial) = generate_seeded(5_000, 10).unwrap();
        let options = RootSolverOptions::default();
        let fit = fit_exposure_missingness(&partial, None, &options).unwrap();
        let system = ExposureMomentSystem::new(&partial);
        let recomputed = system.residuals(&fit.params);
        let norm = recomputed.iter().map(|v| v * v).sum::<f64>().sqrt();
        assert!(norm <= options.ftol, "residual norm {norm:e}");
        assert_eq!(fit.contributing_rows, partial.observed_exposure_count());
    }

    #[test]
    fn config_round_trips_through_json() {
        let config = EstimationConfig {
            exposure_initial: Some(ExposureParams {
                alpha0: 0.1,
                gamma: 0.5,
            }),
            ..EstimationConfig::default()
        };
        let text = serde_json::to_string(&config).unwrap();
        let back: EstimationConfig = serde_json::from_str(&text).unwrap();
        assert_eq!(back, config);
        let partial: EstimationConfig =
            serde_json::from_str(r#"{"solver": {"max_iterations": 20}}"#).unwrap();
        assert_eq!(partial.solver.max_iterations, 20);
        assert!(partial.outcome_initial.is_none());
    }
}
