//! # Trust-region root finding
//!
//! Finds `x` with `F(x) = 0` for a square system `F: R^n -> R^n` by driving
//! the merit function `½‖F(x)‖²` to zero with argmin's trust-region method:
//!
//! 1.  The Jacobian `J` is approximated by forward differences at every
//!     accepted iterate; the merit gradient is `Jᵀ F` and its Hessian is the
//!     Gauss-Newton product `Jᵀ J`.
//! 2.  Each trial step solves the quadratic model inside the current radius
//!     with Steihaug's truncated conjugate gradient.
//! 3.  argmin compares actual to predicted merit reduction to accept the step
//!     and resize the region.
//!
//! Trial points where `F` is not finite get an infinite merit, so they are
//! rejected like any other bad step and the region shrinks. Only
//! `‖F(x)‖₂ ≤ ftol` counts as convergence; anything else is an error carrying
//! the best iterate.

use argmin::core::{
    CostFunction, Executor, Gradient, Hessian, State, TerminationReason, TerminationStatus,
};
use argmin::solver::trustregion::{Steihaug, TrustRegion};
use ndarray::{Array1, Array2, ArrayView1};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use thiserror::Error;

/// Relative residual at which the conjugate-gradient subproblem stops.
const SUBPROBLEM_TOLERANCE: f64 = 1e-14;
/// Minimum ratio of actual to predicted reduction for a step to be accepted
/// (argmin's default).
const ACCEPT_RATIO: f64 = 0.125;

fn default_ftol() -> f64 {
    1e-10
}

fn default_max_iterations() -> usize {
    200
}

fn default_initial_radius() -> f64 {
    1.0
}

fn default_max_radius() -> f64 {
    100.0
}

fn default_fd_epsilon() -> f64 {
    // sqrt of f64 machine epsilon
    1.49e-8
}

/// Tolerances and budgets for [`TrustRegionSolver`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RootSolverOptions {
    /// Convergence threshold on the Euclidean norm of the residual vector.
    #[serde(default = "default_ftol")]
    pub ftol: f64,
    /// Maximum number of trust-region iterations, accepted or not.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    /// Trust radius for the first step, in parameter units.
    #[serde(default = "default_initial_radius")]
    pub initial_radius: f64,
    /// Upper bound the radius may grow to.
    #[serde(default = "default_max_radius")]
    pub max_radius: f64,
    /// Relative step for forward differences.
    #[serde(default = "default_fd_epsilon")]
    pub fd_epsilon: f64,
}

impl Default for RootSolverOptions {
    fn default() -> Self {
        Self {
            ftol: default_ftol(),
            max_iterations: default_max_iterations(),
            initial_radius: default_initial_radius(),
            max_radius: default_max_radius(),
            fd_epsilon: default_fd_epsilon(),
        }
    }
}

/// A converged root.
#[derive(Debug, Clone, Serialize)]
pub struct RootSolution {
    pub x: Array1<f64>,
    /// `F(x)` at the returned point.
    pub residual: Array1<f64>,
    pub residual_norm: f64,
    pub iterations: usize,
    pub function_evaluations: usize,
}

#[derive(Debug, Error)]
pub enum RootFindingError {
    #[error("root finding needs at least one unknown")]
    EmptySystem,

    #[error("system maps {inputs} inputs to {outputs} outputs; a square system is required")]
    DimensionMismatch { inputs: usize, outputs: usize },

    #[error("the system is not finite at the initial point")]
    NonFiniteStart,

    #[error("forward-difference Jacobian column {column} is not finite in either direction")]
    NonFiniteJacobian { column: usize },

    #[error("invalid solver configuration: {0}")]
    InvalidOptions(String),

    #[error("the trust-region iteration failed: {0}")]
    Solver(String),

    #[error(
        "no convergence within {iterations} iterations; last residual norm was {residual_norm:.6e}"
    )]
    MaxIterationsReached {
        iterations: usize,
        residual_norm: f64,
        last_x: Array1<f64>,
    },

    #[error(
        "the merit function stopped decreasing at iteration {iterations} before reaching the tolerance; last residual norm was {residual_norm:.6e}"
    )]
    NoProgress {
        iterations: usize,
        residual_norm: f64,
        last_x: Array1<f64>,
    },
}

impl From<argmin::core::Error> for RootFindingError {
    fn from(err: argmin::core::Error) -> Self {
        // Errors raised by the merit problem travel through argmin unchanged.
        match err.downcast::<RootFindingError>() {
            Ok(inner) => inner,
            Err(other) => RootFindingError::Solver(other.to_string()),
        }
    }
}

/// A multivariate root-finding capability for square systems.
pub trait RootFinder {
    fn solve<F>(&self, system: F, x0: ArrayView1<'_, f64>) -> Result<RootSolution, RootFindingError>
    where
        F: Fn(ArrayView1<'_, f64>) -> Array1<f64>;
}

/// Gauss-Newton trust-region method with a finite-difference Jacobian, run
/// through argmin.
#[derive(Debug, Clone, Default)]
pub struct TrustRegionSolver {
    options: RootSolverOptions,
}

impl TrustRegionSolver {
    pub fn new(options: RootSolverOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &RootSolverOptions {
        &self.options
    }
}

#[inline]
fn all_finite(v: ArrayView1<'_, f64>) -> bool {
    v.iter().all(|x| x.is_finite())
}

#[inline]
fn euclidean_norm(v: ArrayView1<'_, f64>) -> f64 {
    v.iter().map(|x| x * x).sum::<f64>().sqrt()
}

/// Adapts a residual map to argmin's cost/gradient/Hessian traits.
struct MeritProblem<'a, F> {
    system: &'a F,
    dim: usize,
    fd_epsilon: f64,
    evaluations: &'a AtomicUsize,
}

impl<F> MeritProblem<'_, F>
where
    F: Fn(ArrayView1<'_, f64>) -> Array1<f64>,
{
    /// `F(x)`, or `None` when it has the wrong length or a non-finite entry.
    fn residual(&self, x: ArrayView1<'_, f64>) -> Option<Array1<f64>> {
        self.evaluations.fetch_add(1, Ordering::Relaxed);
        let r = (self.system)(x);
        (r.len() == self.dim && all_finite(r.view())).then_some(r)
    }

    /// Residual and forward-difference Jacobian at an accepted iterate.
    fn linearize(&self, x: &[f64]) -> Result<(Array1<f64>, Array2<f64>), RootFindingError> {
        let x = ArrayView1::from(x);
        let fx = self
            .residual(x)
            .ok_or_else(|| RootFindingError::Solver("linearization at a non-finite point".into()))?;
        let mut jac = Array2::<f64>::zeros((self.dim, self.dim));
        let mut shifted = x.to_owned();
        for j in 0..self.dim {
            let h = if x[j] == 0.0 {
                self.fd_epsilon
            } else {
                self.fd_epsilon * x[j].abs()
            };

            shifted[j] = x[j] + h;
            let column = match self.residual(shifted.view()) {
                Some(forward) => (&forward - &fx) / (shifted[j] - x[j]),
                None => {
                    // Step back instead when the forward point leaves the domain.
                    shifted[j] = x[j] - h;
                    let backward = self
                        .residual(shifted.view())
                        .ok_or(RootFindingError::NonFiniteJacobian { column: j })?;
                    (&fx - &backward) / (x[j] - shifted[j])
                }
            };
            shifted[j] = x[j];
            jac.column_mut(j).assign(&column);
        }
        Ok((fx, jac))
    }
}

impl<F> CostFunction for MeritProblem<'_, F>
where
    F: Fn(ArrayView1<'_, f64>) -> Array1<f64>,
{
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, x: &Self::Param) -> Result<Self::Output, argmin::core::Error> {
        if x.iter().any(|v| !v.is_finite()) {
            return Ok(f64::INFINITY);
        }
        Ok(match self.residual(ArrayView1::from(x.as_slice())) {
            Some(r) => 0.5 * r.dot(&r),
            None => f64::INFINITY,
        })
    }
}

impl<F> Gradient for MeritProblem<'_, F>
where
    F: Fn(ArrayView1<'_, f64>) -> Array1<f64>,
{
    type Param = Vec<f64>;
    type Gradient = Vec<f64>;

    fn gradient(&self, x: &Self::Param) -> Result<Self::Gradient, argmin::core::Error> {
        let (fx, jac) = self.linearize(x).map_err(argmin::core::Error::new)?;
        Ok(jac.t().dot(&fx).to_vec())
    }
}

impl<F> Hessian for MeritProblem<'_, F>
where
    F: Fn(ArrayView1<'_, f64>) -> Array1<f64>,
{
    type Param = Vec<f64>;
    type Hessian = Vec<Vec<f64>>;

    fn hessian(&self, x: &Self::Param) -> Result<Self::Hessian, argmin::core::Error> {
        let (_, jac) = self.linearize(x).map_err(argmin::core::Error::new)?;
        let gauss_newton = jac.t().dot(&jac);
        Ok(gauss_newton.rows().into_iter().map(|row| row.to_vec()).collect())
    }
}

fn invalid_options(err: argmin::core::Error) -> RootFindingError {
    RootFindingError::InvalidOptions(err.to_string())
}

impl RootFinder for TrustRegionSolver {
    fn solve<F>(&self, system: F, x0: ArrayView1<'_, f64>) -> Result<RootSolution, RootFindingError>
    where
        F: Fn(ArrayView1<'_, f64>) -> Array1<f64>,
    {
        let opts = &self.options;
        let n = x0.len();
        if n == 0 {
            return Err(RootFindingError::EmptySystem);
        }

        let f0 = system(x0);
        if f0.len() != n {
            return Err(RootFindingError::DimensionMismatch {
                inputs: n,
                outputs: f0.len(),
            });
        }
        if !all_finite(x0) || !all_finite(f0.view()) {
            return Err(RootFindingError::NonFiniteStart);
        }
        let start_norm = euclidean_norm(f0.view());
        if start_norm <= opts.ftol {
            return Ok(RootSolution {
                x: x0.to_owned(),
                residual: f0,
                residual_norm: start_norm,
                iterations: 0,
                function_evaluations: 1,
            });
        }

        let evaluations = AtomicUsize::new(1);
        let problem = MeritProblem {
            system: &system,
            dim: n,
            fd_epsilon: opts.fd_epsilon,
            evaluations: &evaluations,
        };

        let subproblem: Steihaug<Vec<f64>, f64> = Steihaug::new()
            .with_epsilon(SUBPROBLEM_TOLERANCE)
            .map_err(invalid_options)?
            .with_max_iters(2 * n as u64);
        let solver = TrustRegion::new(subproblem)
            .with_radius(opts.initial_radius)
            .map_err(invalid_options)?
            .with_max_radius(opts.max_radius)
            .map_err(invalid_options)?
            .with_eta(ACCEPT_RATIO)
            .map_err(invalid_options)?;

        let target_cost = 0.5 * opts.ftol * opts.ftol;
        let max_iters = opts.max_iterations as u64;
        let res = Executor::new(problem, solver)
            .configure(|state| {
                state
                    .param(x0.to_vec())
                    .max_iters(max_iters)
                    .target_cost(target_cost)
            })
            .run()?;

        let state = res.state();
        let iterations = state.get_iter() as usize;
        let last_improvement = state.get_last_best_iter() as usize;
        let x = state
            .get_best_param()
            .map(|p| Array1::from(p.clone()))
            .unwrap_or_else(|| x0.to_owned());
        let termination = state.get_termination_status().clone();

        let residual = system(x.view());
        evaluations.fetch_add(1, Ordering::Relaxed);
        let residual_norm = if residual.len() == n && all_finite(residual.view()) {
            euclidean_norm(residual.view())
        } else {
            f64::INFINITY
        };
        let function_evaluations = evaluations.load(Ordering::Relaxed);

        log::debug!(
            "trust region finished after {iterations} iterations ({function_evaluations} evaluations): {termination}, |F|={residual_norm:.3e}"
        );

        if residual_norm <= opts.ftol {
            return Ok(RootSolution {
                x,
                residual,
                residual_norm,
                iterations,
                function_evaluations,
            });
        }

        // argmin's trust region only stops on the budget or the target; a
        // best iterate that stopped improving early means the region collapsed.
        let stalled = last_improvement + 1 < iterations;
        match termination {
            TerminationStatus::Terminated(TerminationReason::MaxItersReached) if !stalled => {
                Err(RootFindingError::MaxIterationsReached {
                    iterations,
                    residual_norm,
                    last_x: x,
                })
            }
            _ => Err(RootFindingError::NoProgress {
                iterations: last_improvement,
                residual_norm,
                last_x: x,
            }),
        }
    }
}
