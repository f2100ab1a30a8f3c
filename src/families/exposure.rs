use super::{ShadowMomentSystem, shadow_ipw_moment};
use crate::inference::predict::predict_exposure_propensity;
use crate::types::{BinaryObservation, ExposureParams, PartialDataset};
use ndarray::{Array1, ArrayView1};

/// Moment conditions for `P(R_A = 1 | A)` with shadow `W1` and instruments
/// `W1` and `W1²`.
pub struct ExposureMomentSystem<'a> {
    data: &'a PartialDataset,
    instruments: [Array1<f64>; 2],
}

impl<'a> ExposureMomentSystem<'a> {
    pub fn new(data: &'a PartialDataset) -> Self {
        let w1 = data.w1();
        Self {
            data,
            instruments: [w1.to_owned(), w1.mapv(|v| v * v)],
        }
    }
}

impl ShadowMomentSystem for ExposureMomentSystem<'_> {
    type Params = ExposureParams;

    fn label(&self) -> &'static str {
        "exposure"
    }

    fn response(&self) -> ArrayView1<'_, BinaryObservation> {
        self.data.exposure()
    }

    fn propensities(&self, params: &ExposureParams) -> Array1<f64> {
        predict_exposure_propensity(params, self.response())
    }

    fn residuals(&self, params: &ExposureParams) -> Array1<f64> {
        let propensity = self.propensities(params);
        self.instruments
            .iter()
            .map(|h| shadow_ipw_moment(h.view(), propensity.view(), self.data.exposure()))
            .collect()
    }
}
