use crate::estimate::EstimationError;
use ndarray::{Array1, ArrayView1, Axis};
use serde::{Deserialize, Serialize};

/// A binary variable that may be unobserved.
///
/// Replaces the `-1` sentinel of the tabular schema; the sentinel only exists
/// at the CSV boundary (see [`BinaryObservation::SENTINEL`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryObservation {
    Observed(bool),
    Missing,
}

impl BinaryObservation {
    /// Code written for a missing value in the tabular schema.
    pub const SENTINEL: i64 = -1;

    /// Decode `0`, `1`, or the sentinel; anything else is rejected.
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Self::Observed(false)),
            1 => Some(Self::Observed(true)),
            Self::SENTINEL => Some(Self::Missing),
            _ => None,
        }
    }

    pub fn code(self) -> i64 {
        match self {
            Self::Observed(v) => i64::from(v),
            Self::Missing => Self::SENTINEL,
        }
    }

    #[inline]
    pub fn is_observed(self) -> bool {
        matches!(self, Self::Observed(_))
    }

    #[inline]
    pub fn value(self) -> Option<bool> {
        match self {
            Self::Observed(v) => Some(v),
            Self::Missing => None,
        }
    }
}

/// Proportions reported after generating or loading a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DatasetSummary {
    pub rows: usize,
    /// Proportion of `A = 1` (among rows with `A` observed for partial data).
    pub exposure_rate: f64,
    /// Proportion of `Y = 1` (among rows with `Y` observed for partial data).
    pub outcome_rate: f64,
    /// Proportion of `R_A = 1`.
    pub exposure_observed_rate: f64,
    /// Proportion of `R_Y = 1`.
    pub outcome_observed_rate: f64,
}

fn check_length(column: &'static str, expected: usize, found: usize) -> Result<(), EstimationError> {
    if expected != found {
        return Err(EstimationError::ColumnLengthMismatch {
            column,
            expected,
            found,
        });
    }
    Ok(())
}

fn check_binary(column: &'static str, values: &Array1<f64>) -> Result<(), EstimationError> {
    match values.iter().position(|&v| v != 0.0 && v != 1.0) {
        Some(row) => Err(EstimationError::NonBinaryValue {
            row,
            column,
            value: values[row],
        }),
        None => Ok(()),
    }
}

fn check_finite(column: &'static str, values: &Array1<f64>) -> Result<(), EstimationError> {
    match values.iter().position(|v| !v.is_finite()) {
        Some(row) => Err(EstimationError::InvalidInput(format!(
            "column {column} has a non-finite value at row {row}"
        ))),
        None => Ok(()),
    }
}

fn mean_or_nan(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
    if count == 0 { f64::NAN } else { sum / count as f64 }
}

/// Every field at its generated value: `W1`, `W2` continuous; `A`, `Y`,
/// `R_A`, `R_Y` coded as `0.0` / `1.0`.
#[derive(Debug, Clone, PartialEq)]
pub struct FullDataset {
    w1: Array1<f64>,
    w2: Array1<f64>,
    a: Array1<f64>,
    y: Array1<f64>,
    r_a: Array1<f64>,
    r_y: Array1<f64>,
}

impl FullDataset {
    pub fn new(
        w1: Array1<f64>,
        w2: Array1<f64>,
        a: Array1<f64>,
        y: Array1<f64>,
        r_a: Array1<f64>,
        r_y: Array1<f64>,
    ) -> Result<Self, EstimationError> {
        let n = w1.len();
        check_length("W2", n, w2.len())?;
        check_length("A", n, a.len())?;
        check_length("Y", n, y.len())?;
        check_length("R_A", n, r_a.len())?;
        check_length("R_Y", n, r_y.len())?;
        check_finite("W1", &w1)?;
        check_finite("W2", &w2)?;
        check_binary("A", &a)?;
        check_binary("Y", &y)?;
        check_binary("R_A", &r_a)?;
        check_binary("R_Y", &r_y)?;
        Ok(Self {
            w1,
            w2,
            a,
            y,
            r_a,
            r_y,
        })
    }

    pub fn len(&self) -> usize {
        self.w1.len()
    }

    pub fn is_empty(&self) -> bool {
        self.w1.is_empty()
    }

    pub fn w1(&self) -> ArrayView1<'_, f64> {
        self.w1.view()
    }

    pub fn w2(&self) -> ArrayView1<'_, f64> {
        self.w2.view()
    }

    pub fn exposure(&self) -> ArrayView1<'_, f64> {
        self.a.view()
    }

    pub fn outcome(&self) -> ArrayView1<'_, f64> {
        self.y.view()
    }

    pub fn exposure_indicator(&self) -> ArrayView1<'_, f64> {
        self.r_a.view()
    }

    pub fn outcome_indicator(&self) -> ArrayView1<'_, f64> {
        self.r_y.view()
    }

    /// Exposure as (always observed) binary observations.
    pub fn exposure_observations(&self) -> Array1<BinaryObservation> {
        self.a.mapv(|v| BinaryObservation::Observed(v == 1.0))
    }

    /// Outcome as (always observed) binary observations.
    pub fn outcome_observations(&self) -> Array1<BinaryObservation> {
        self.y.mapv(|v| BinaryObservation::Observed(v == 1.0))
    }

    /// Empirical `P(R_A = 1 | A = value)`; `None` when no row has `A = value`.
    pub fn exposure_observed_rate_given(&self, value: bool) -> Option<f64> {
        let target = if value { 1.0 } else { 0.0 };
        let rate = mean_or_nan(
            self.a
                .iter()
                .zip(self.r_a.iter())
                .filter(|&(&a, _)| a == target)
                .map(|(_, &r)| r),
        );
        rate.is_finite().then_some(rate)
    }

    pub fn subset(&self, rows: &[usize]) -> Self {
        Self {
            w1: self.w1.select(Axis(0), rows),
            w2: self.w2.select(Axis(0), rows),
            a: self.a.select(Axis(0), rows),
            y: self.y.select(Axis(0), rows),
            r_a: self.r_a.select(Axis(0), rows),
            r_y: self.r_y.select(Axis(0), rows),
        }
    }

    pub fn summary(&self) -> DatasetSummary {
        DatasetSummary {
            rows: self.len(),
            exposure_rate: mean_or_nan(self.a.iter().copied()),
            outcome_rate: mean_or_nan(self.y.iter().copied()),
            exposure_observed_rate: mean_or_nan(self.r_a.iter().copied()),
            outcome_observed_rate: mean_or_nan(self.r_y.iter().copied()),
        }
    }
}

/// The analyst's view: `W1`, `W2`, `R_A`, `R_Y` always observed; `A` and `Y`
/// observed exactly where their indicator is 1.
#[derive(Debug, Clone, PartialEq)]
pub struct PartialDataset {
    w1: Array1<f64>,
    w2: Array1<f64>,
    a: Array1<BinaryObservation>,
    y: Array1<BinaryObservation>,
    r_a: Array1<f64>,
    r_y: Array1<f64>,
}

impl PartialDataset {
    /// Build a partial dataset, rejecting shape errors and any row whose
    /// indicator disagrees with the observation state.
    pub fn new(
        w1: Array1<f64>,
        w2: Array1<f64>,
        a: Array1<BinaryObservation>,
        y: Array1<BinaryObservation>,
        r_a: Array1<f64>,
        r_y: Array1<f64>,
    ) -> Result<Self, EstimationError> {
        let n = w1.len();
        check_length("W2", n, w2.len())?;
        check_length("A", n, a.len())?;
        check_length("Y", n, y.len())?;
        check_length("R_A", n, r_a.len())?;
        check_length("R_Y", n, r_y.len())?;
        check_finite("W1", &w1)?;
        check_finite("W2", &w2)?;
        check_binary("R_A", &r_a)?;
        check_binary("R_Y", &r_y)?;
        for (column, values, indicator) in [("A", &a, &r_a), ("Y", &y, &r_y)] {
            if let Some(row) = values
                .iter()
                .zip(indicator.iter())
                .position(|(obs, &r)| obs.is_observed() != (r == 1.0))
            {
                return Err(EstimationError::MaskingViolation { row, column });
            }
        }
        Ok(Self {
            w1,
            w2,
            a,
            y,
            r_a,
            r_y,
        })
    }

    /// Hide `A` where `R_A = 0` and `Y` where `R_Y = 0`.
    pub fn mask(full: &FullDataset) -> Self {
        let hide = |values: &Array1<f64>, indicator: &Array1<f64>| {
            let mut out = Array1::from_elem(values.len(), BinaryObservation::Missing);
            ndarray::Zip::from(&mut out)
                .and(values)
                .and(indicator)
                .for_each(|slot, &v, &r| {
                    if r == 1.0 {
                        *slot = BinaryObservation::Observed(v == 1.0);
                    }
                });
            out
        };
        Self {
            w1: full.w1.clone(),
            w2: full.w2.clone(),
            a: hide(&full.a, &full.r_a),
            y: hide(&full.y, &full.r_y),
            r_a: full.r_a.clone(),
            r_y: full.r_y.clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.w1.len()
    }

    pub fn is_empty(&self) -> bool {
        self.w1.is_empty()
    }

    pub fn w1(&self) -> ArrayView1<'_, f64> {
        self.w1.view()
    }

    pub fn w2(&self) -> ArrayView1<'_, f64> {
        self.w2.view()
    }

    pub fn exposure(&self) -> ArrayView1<'_, BinaryObservation> {
        self.a.view()
    }

    pub fn outcome(&self) -> ArrayView1<'_, BinaryObservation> {
        self.y.view()
    }

    pub fn exposure_indicator(&self) -> ArrayView1<'_, f64> {
        self.r_a.view()
    }

    pub fn outcome_indicator(&self) -> ArrayView1<'_, f64> {
        self.r_y.view()
    }

    pub fn observed_exposure_count(&self) -> usize {
        self.a.iter().filter(|obs| obs.is_observed()).count()
    }

    pub fn observed_outcome_count(&self) -> usize {
        self.y.iter().filter(|obs| obs.is_observed()).count()
    }

    pub fn rows_with_exposure_observed(&self) -> Vec<usize> {
        (0..self.len()).filter(|&i| self.a[i].is_observed()).collect()
    }

    pub fn rows_with_outcome_observed(&self) -> Vec<usize> {
        (0..self.len()).filter(|&i| self.y[i].is_observed()).collect()
    }

    pub fn subset(&self, rows: &[usize]) -> Self {
        Self {
            w1: self.w1.select(Axis(0), rows),
            w2: self.w2.select(Axis(0), rows),
            a: self.a.select(Axis(0), rows),
            y: self.y.select(Axis(0), rows),
            r_a: self.r_a.select(Axis(0), rows),
            r_y: self.r_y.select(Axis(0), rows),
        }
    }

    /// Complete-case proportions for `A` and `Y`, plus response rates.
    pub fn summary(&self) -> DatasetSummary {
        let observed_rate = |values: &Array1<BinaryObservation>| {
            mean_or_nan(
                values
                    .iter()
                    .filter_map(|obs| obs.value())
                    .map(|v| if v { 1.0 } else { 0.0 }),
            )
        };
        DatasetSummary {
            rows: self.len(),
            exposure_rate: observed_rate(&self.a),
            outcome_rate: observed_rate(&self.y),
            exposure_observed_rate: mean_or_nan(self.r_a.iter().copied()),
            outcome_observed_rate: mean_or_nan(self.r_y.iter().copied()),
        }
    }
}

/// Ordered unknowns of a missingness model.
pub trait ParameterVector: Copy + std::fmt::Debug {
    /// Parameter names in solver order.
    const NAMES: &'static [&'static str];

    fn to_array(&self) -> Array1<f64>;

    fn from_view(values: ArrayView1<'_, f64>) -> Result<Self, EstimationError>;

    fn dim() -> usize {
        Self::NAMES.len()
    }

    fn is_finite(&self) -> bool {
        self.to_array().iter().all(|v| v.is_finite())
    }

    /// Coordinates searched by the root finder. Odds ratios enter on the log
    /// scale, so every trial point has positive odds; a starting odds ratio
    /// that is not positive is rejected.
    fn to_search_space(&self) -> Result<Array1<f64>, EstimationError>;

    /// Inverse of [`ParameterVector::to_search_space`].
    fn from_search_space(values: ArrayView1<'_, f64>) -> Result<Self, EstimationError>;
}

fn positive_log(name: &str, value: f64) -> Result<f64, EstimationError> {
    if value.is_nan() || value <= 0.0 {
        return Err(EstimationError::InvalidInput(format!(
            "odds ratio {name} must be positive, got {value}"
        )));
    }
    Ok(value.ln())
}

fn check_dimension<P: ParameterVector>(values: ArrayView1<'_, f64>) -> Result<(), EstimationError> {
    if values.len() != P::dim() {
        return Err(EstimationError::InvalidInput(format!(
            "expected {} parameters ({}), got {}",
            P::dim(),
            P::NAMES.join(", "),
            values.len()
        )));
    }
    Ok(())
}

/// Exposure-missingness model: `P(R_A=1 | A=0) = logistic(alpha0)` and odds
/// ratio `gamma` between `A=0` and `A=1`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExposureParams {
    pub alpha0: f64,
    pub gamma: f64,
}

impl ExposureParams {
    /// Start at probability one half with no self-censoring.
    pub fn initial_guess() -> Self {
        Self {
            alpha0: 0.0,
            gamma: 1.0,
        }
    }
}

impl ParameterVector for ExposureParams {
    const NAMES: &'static [&'static str] = &["alpha0", "gamma"];

    fn to_array(&self) -> Array1<f64> {
        Array1::from(vec![self.alpha0, self.gamma])
    }

    fn from_view(values: ArrayView1<'_, f64>) -> Result<Self, EstimationError> {
        check_dimension::<Self>(values)?;
        Ok(Self {
            alpha0: values[0],
            gamma: values[1],
        })
    }

    fn to_search_space(&self) -> Result<Array1<f64>, EstimationError> {
        Ok(Array1::from(vec![self.alpha0, positive_log("gamma", self.gamma)?]))
    }

    fn from_search_space(values: ArrayView1<'_, f64>) -> Result<Self, EstimationError> {
        check_dimension::<Self>(values)?;
        Ok(Self {
            alpha0: values[0],
            gamma: values[1].exp(),
        })
    }
}

/// Outcome-missingness model: `P(R_Y=1 | Y=0, W2) = logistic(alpha0 + alpha1*W2)`
/// and odds ratio `gamma0 * exp(gamma1*W2)` between `Y=0` and `Y=1`.
///
/// The odds ratio is log-linear in `W2`, so it stays positive for every
/// covariate value; at `gamma1 = 0` it is the constant `gamma0`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OutcomeParams {
    pub alpha0: f64,
    pub alpha1: f64,
    pub gamma0: f64,
    pub gamma1: f64,
}

impl OutcomeParams {
    /// Start at probability one half with no self-censoring at any `W2`.
    pub fn initial_guess() -> Self {
        Self {
            alpha0: 0.0,
            alpha1: 0.0,
            gamma0: 1.0,
            gamma1: 0.0,
        }
    }

    /// Log odds ratio at covariate value `w2`; `NaN` when `gamma0 < 0`.
    #[inline]
    pub fn log_odds_ratio_at(&self, w2: f64) -> f64 {
        self.gamma0.ln() + self.gamma1 * w2
    }
}

impl ParameterVector for OutcomeParams {
    const NAMES: &'static [&'static str] = &["alpha0", "alpha1", "gamma0", "gamma1"];

    fn to_array(&self) -> Array1<f64> {
        Array1::from(vec![self.alpha0, self.alpha1, self.gamma0, self.gamma1])
    }

    fn from_view(values: ArrayView1<'_, f64>) -> Result<Self, EstimationError> {
        check_dimension::<Self>(values)?;
        Ok(Self {
            alpha0: values[0],
            alpha1: values[1],
            gamma0: values[2],
            gamma1: values[3],
        })
    }

    fn to_search_space(&self) -> Result<Array1<f64>, EstimationError> {
        Ok(Array1::from(vec![
            self.alpha0,
            self.alpha1,
            positive_log("gamma0", self.gamma0)?,
            self.gamma1,
        ]))
    }

    fn from_search_space(values: ArrayView1<'_, f64>) -> Result<Self, EstimationError> {
        check_dimension::<Self>(values)?;
        Ok(Self {
            alpha0: values[0],
            alpha1: values[1],
            gamma0: values[2].exp(),
            gamma1: values[3],
        })
    }
}
