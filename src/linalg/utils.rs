use ndarray::{ArrayBase, Data, Ix1};

/// Compensated summation for long reductions over observation rows.
#[derive(Default, Clone, Copy)]
pub(crate) struct KahanSum {
    sum: f64,
    c: f64,
}

impl KahanSum {
    pub(crate) fn add(&mut self, value: f64) {
        let y = value - self.c;
        let t = self.sum + y;
        self.c = (t - self.sum) - y;
        self.sum = t;
    }

    pub(crate) fn sum(self) -> f64 {
        self.sum
    }
}

/// Compensated mean of a 1-D array; `NaN` for an empty array.
pub(crate) fn kahan_mean<S: Data<Elem = f64>>(values: &ArrayBase<S, Ix1>) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let mut acc = KahanSum::default();
    for &v in values.iter() {
        acc.add(v);
    }
    acc.sum() / values.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array1, array};

    #[test]
    fn compensated_sum_keeps_small_terms() {
        let mut acc = KahanSum::default();
        acc.add(1e16);
        for _ in 0..1000 {
            acc.add(1.0);
        }
        acc.add(-1e16);
        assert_eq!(acc.sum(), 1000.0);
    }

    #[test]
    fn mean_of_empty_array_is_nan() {
        let empty = Array1::<f64>::zeros(0);
        assert!(kahan_mean(&empty).is_nan());
        assert_eq!(kahan_mean(&array![1.0, 2.0, 3.0]), 2.0);
    }
}
