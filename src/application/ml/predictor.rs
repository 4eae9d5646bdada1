use crate::domain::ml::Architecture;
use crate::domain::ml::feature_registry::{FEATURE_COUNT, SEQUENCE_LENGTH};
use ndarray::{Array2, ArrayView2};
use rayon::prelude::*;

/// Interface for sequence models that map one scaled feature window to one
/// scaled next-value estimate.
pub trait SequenceModel: Send + Sync {
    /// Forward pass over a `[SEQUENCE_LENGTH, FEATURE_COUNT]` scaled window.
    /// Pure and deterministic; dropout is inactive at inference.
    fn forward(&self, window: ArrayView2<f64>) -> Result<f64, String>;

    fn architecture(&self) -> Architecture;

    /// Get model name/type
    fn name(&self) -> &str {
        self.architecture().name()
    }

    /// Get model version/id
    fn version(&self) -> &str;

    /// Runs every window in parallel, preserving order.
    fn forward_batch(&self, windows: &[Array2<f64>]) -> Result<Vec<f64>, String> {
        windows.par_iter().map(|w| self.forward(w.view())).collect()
    }
}

/// Rejects windows that do not have the trained input layout.
pub fn check_window(window: &ArrayView2<f64>) -> Result<(), String> {
    let (rows, cols) = window.dim();
    if rows != SEQUENCE_LENGTH || cols != FEATURE_COUNT {
        return Err(format!(
            "window has shape [{}, {}], expected [{}, {}]",
            rows, cols, SEQUENCE_LENGTH, FEATURE_COUNT
        ));
    }
    if window.iter().any(|v| !v.is_finite()) {
        return Err("window contains non-finite values".to_string());
    }
    Ok(())
}
