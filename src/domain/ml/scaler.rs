use crate::domain::ml::feature_registry::{CLOSE_INDEX, FEATURE_COUNT, matches_training_order};
use ndarray::{Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

/// Per-feature min-max scaler fit at training time, mapping each feature
/// into `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MinMaxScaler {
    pub feature_names: Vec<String>,
    pub data_min: Vec<f64>,
    pub data_max: Vec<f64>,
}

impl MinMaxScaler {
    /// Fit on a `[rows, features]` matrix.
    pub fn fit(data: ArrayView2<f64>, feature_names: &[&str]) -> Self {
        let data_min = data
            .axis_iter(Axis(1))
            .map(|col| col.iter().cloned().fold(f64::INFINITY, f64::min))
            .collect();
        let data_max = data
            .axis_iter(Axis(1))
            .map(|col| col.iter().cloned().fold(f64::NEG_INFINITY, f64::max))
            .collect();
        Self {
            feature_names: feature_names.iter().map(|s| s.to_string()).collect(),
            data_min,
            data_max,
        }
    }

    pub fn n_features(&self) -> usize {
        self.data_min.len()
    }

    /// Describes why this scaler cannot be paired with the feature window,
    /// or `None` if it can.
    pub fn layout_problem(&self) -> Option<String> {
        if self.data_min.len() != FEATURE_COUNT || self.data_max.len() != FEATURE_COUNT {
            return Some(format!(
                "expected {} features, scaler holds min={} max={}",
                FEATURE_COUNT,
                self.data_min.len(),
                self.data_max.len()
            ));
        }
        if !matches_training_order(&self.feature_names) {
            return Some(format!(
                "feature order {:?} differs from training order",
                self.feature_names
            ));
        }
        if self
            .data_min
            .iter()
            .chain(self.data_max.iter())
            .any(|v| !v.is_finite())
        {
            return Some("non-finite min/max".to_string());
        }
        if self
            .data_min
            .iter()
            .zip(self.data_max.iter())
            .any(|(lo, hi)| lo > hi)
        {
            return Some("min greater than max".to_string());
        }
        None
    }

    /// Zero-range features use a unit scale so constant columns map to 0.
    fn scale(&self, feature: usize) -> f64 {
        let range = self.data_max[feature] - self.data_min[feature];
        if range == 0.0 { 1.0 } else { range }
    }

    pub fn scale_value(&self, feature: usize, value: f64) -> f64 {
        (value - self.data_min[feature]) / self.scale(feature)
    }

    pub fn unscale_value(&self, feature: usize, scaled: f64) -> f64 {
        scaled * self.scale(feature) + self.data_min[feature]
    }

    pub fn transform(&self, data: ArrayView2<f64>) -> Array2<f64> {
        let mut out = data.to_owned();
        for (feature, mut col) in out.axis_iter_mut(Axis(1)).enumerate() {
            col.mapv_inplace(|v| self.scale_value(feature, v));
        }
        out
    }

    pub fn inverse_transform(&self, data: ArrayView2<f64>) -> Array2<f64> {
        let mut out = data.to_owned();
        for (feature, mut col) in out.axis_iter_mut(Axis(1)).enumerate() {
            col.mapv_inplace(|v| self.unscale_value(feature, v));
        }
        out
    }

    /// Recovers a price from a scaled model output: the value goes into the
    /// close slot, the other slots are zero, the row is inverse-transformed
    /// and the close slot is read back.
    pub fn unscale_close(&self, scaled: f64) -> f64 {
        let mut row = Array2::<f64>::zeros((1, self.n_features()));
        row[[0, CLOSE_INDEX]] = scaled;
        self.inverse_transform(row.view())[[0, CLOSE_INDEX]]
    }

    pub fn scale_close(&self, price: f64) -> f64 {
        self.scale_value(CLOSE_INDEX, price)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ml::feature_registry::FEATURE_NAMES;
    use ndarray::array;

    fn scaler() -> MinMaxScaler {
        MinMaxScaler {
            feature_names: FEATURE_NAMES.iter().map(|s| s.to_string()).collect(),
            data_min: vec![80.0, 82.0, 85.0, 0.5],
            data_max: vec![180.0, 170.0, 160.0, 9.5],
        }
    }

    #[test]
    fn test_fit_and_transform() {
        let data = array![[1.0, 10.0], [3.0, 10.0], [2.0, 10.0]];
        let scaler = MinMaxScaler::fit(data.view(), &["a", "b"]);
        assert_eq!(scaler.data_min, vec![1.0, 10.0]);
        assert_eq!(scaler.data_max, vec![3.0, 10.0]);

        let scaled = scaler.transform(data.view());
        assert_eq!(scaled[[0, 0]], 0.0);
        assert_eq!(scaled[[1, 0]], 1.0);
        assert_eq!(scaled[[2, 0]], 0.5);
        // Constant column maps to zero rather than NaN
        assert_eq!(scaled[[1, 1]], 0.0);
    }

    #[test]
    fn test_close_round_trip() {
        let scaler = scaler();
        for scaled in [-0.25, 0.0, 0.123_456, 0.5, 0.999, 1.4] {
            let price = scaler.unscale_close(scaled);
            let back = scaler.scale_close(price);
            assert!((back - scaled).abs() < 1e-12, "{} -> {} -> {}", scaled, price, back);
        }
    }

    #[test]
    fn test_unscale_close_ignores_other_slots() {
        let scaler = scaler();
        assert!((scaler.unscale_close(0.5) - 130.0).abs() < 1e-12);
    }

    #[test]
    fn test_layout_problems() {
        assert!(scaler().layout_problem().is_none());

        let mut short = scaler();
        short.data_min.pop();
        assert!(short.layout_problem().unwrap().contains("expected 4"));

        let mut reordered = scaler();
        reordered.feature_names.swap(1, 2);
        assert!(reordered.layout_problem().is_some());
    }
}
