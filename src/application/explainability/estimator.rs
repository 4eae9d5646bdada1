//! Feature attribution estimators for a single scaled window.

use crate::application::ml::predictor::SequenceModel;
use crate::domain::errors::ForecastError;
use ndarray::{Array2, ArrayView2, Axis};
#[cfg(feature = "shapley")]
use rand::rngs::StdRng;
#[cfg(feature = "shapley")]
use rand::seq::SliceRandom;
#[cfg(feature = "shapley")]
use rand::{Rng, SeedableRng};
#[cfg(feature = "shapley")]
use rayon::prelude::*;

/// Scale applied to the background deviation by the linear approximation.
pub const LINEAR_APPROXIMATION_FACTOR: f64 = 0.1;

/// Per-cell attributions for one sample, in scaled model-output units.
#[derive(Debug, Clone)]
pub struct Attribution {
    /// `[timesteps, features]`
    pub values: Array2<f64>,
}

impl Attribution {
    /// Mean absolute attribution over timesteps, per feature.
    pub fn feature_importance(&self) -> Vec<f64> {
        self.values
            .mapv(f64::abs)
            .mean_axis(Axis(0))
            .map(|m| m.to_vec())
            .unwrap_or_default()
    }
}

/// Computes attributions of `model(sample)` against a background set.
pub trait AttributionEstimator: Send + Sync {
    fn name(&self) -> &str;

    fn attribute(
        &self,
        model: &dyn SequenceModel,
        sample: ArrayView2<f64>,
        background: &[Array2<f64>],
    ) -> Result<Attribution, ForecastError>;
}

/// Element-wise mean of the background windows.
pub fn background_mean(background: &[Array2<f64>]) -> Option<Array2<f64>> {
    let first = background.first()?;
    let sum = background
        .iter()
        .skip(1)
        .fold(first.clone(), |acc, window| acc + window);
    Some(sum / background.len() as f64)
}

/// `(sample - mean(background)) * 0.1`. Model-agnostic and cheap; used when
/// the perturbation estimator is unavailable or fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinearApproximation;

impl AttributionEstimator for LinearApproximation {
    fn name(&self) -> &str {
        "linear-approximation"
    }

    fn attribute(
        &self,
        _model: &dyn SequenceModel,
        sample: ArrayView2<f64>,
        background: &[Array2<f64>],
    ) -> Result<Attribution, ForecastError> {
        let mean = background_mean(background).ok_or_else(|| ForecastError::Internal {
            reason: "empty background".to_string(),
        })?;
        if mean.dim() != sample.dim() {
            return Err(ForecastError::Internal {
                reason: format!(
                    "background shape {:?} differs from sample {:?}",
                    mean.dim(),
                    sample.dim()
                ),
            });
        }
        Ok(Attribution {
            values: (&sample - &mean) * LINEAR_APPROXIMATION_FACTOR,
        })
    }
}

/// Stand-in selected when the crate is built without the `shapley`
/// feature. Always fails so callers take their degraded path.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unavailable;

impl AttributionEstimator for Unavailable {
    fn name(&self) -> &str {
        "unavailable"
    }

    fn attribute(
        &self,
        _model: &dyn SequenceModel,
        _sample: ArrayView2<f64>,
        _background: &[Array2<f64>],
    ) -> Result<Attribution, ForecastError> {
        Err(ForecastError::CapabilityMissing {
            capability: "permutation Shapley estimator (built without the `shapley` feature)"
                .to_string(),
        })
    }
}

/// Sampling budget of the permutation estimator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EstimatorBudget {
    /// Random player orderings per background row.
    pub permutations: usize,
    /// Background rows each ordering is evaluated against.
    pub background_rows: usize,
    /// Consecutive timesteps that act as one player per feature.
    pub timestep_group: usize,
    pub seed: u64,
}

impl Default for EstimatorBudget {
    fn default() -> Self {
        Self {
            permutations: 4,
            background_rows: 8,
            timestep_group: 12,
            seed: 42,
        }
    }
}

/// Monte-Carlo Shapley values by permutation sampling.
///
/// Players are (timestep block, feature) pairs. For each sampled ordering
/// and background row, the sample's values are switched in one player at a
/// time and each player is credited with the change in model output. The
/// attributions of one sweep sum exactly to `f(sample) - f(background row)`.
#[cfg(feature = "shapley")]
#[derive(Debug, Clone, Copy, Default)]
pub struct PermutationShapley {
    budget: EstimatorBudget,
}

#[cfg(feature = "shapley")]
impl PermutationShapley {
    pub fn new(budget: EstimatorBudget) -> Self {
        Self { budget }
    }

    pub fn budget(&self) -> &EstimatorBudget {
        &self.budget
    }

    /// One ordering applied to one background row. Returns the credit of
    /// every player.
    fn sweep(
        model: &dyn SequenceModel,
        sample: ArrayView2<f64>,
        start: &Array2<f64>,
        order: &[usize],
        group: usize,
        features: usize,
    ) -> Result<Vec<f64>, String> {
        let steps = sample.nrows();
        let mut current = start.clone();
        let mut previous = model.forward(current.view())?;
        let mut credit = vec![0.0; order.len()];

        for &player in order {
            let block = player / features;
            let feature = player % features;
            let from = block * group;
            let to = (from + group).min(steps);
            for t in from..to {
                current[[t, feature]] = sample[[t, feature]];
            }
            let value = model.forward(current.view())?;
            credit[player] = value - previous;
            previous = value;
        }
        Ok(credit)
    }
}

#[cfg(feature = "shapley")]
impl AttributionEstimator for PermutationShapley {
    fn name(&self) -> &str {
        "permutation-shapley"
    }

    fn attribute(
        &self,
        model: &dyn SequenceModel,
        sample: ArrayView2<f64>,
        background: &[Array2<f64>],
    ) -> Result<Attribution, ForecastError> {
        let budget = self.budget;
        if background.is_empty() || budget.permutations == 0 || budget.background_rows == 0 {
            return Err(ForecastError::Internal {
                reason: "estimator needs a background and a non-zero budget".to_string(),
            });
        }
        let (steps, features) = sample.dim();
        let group = budget.timestep_group.clamp(1, steps.max(1));
        let blocks = steps.div_ceil(group);
        let players = blocks * features;

        // Draw every (ordering, row) pair up front so results do not depend
        // on how rayon schedules the sweeps.
        let mut rng = StdRng::seed_from_u64(budget.seed);
        let mut sweeps: Vec<(Vec<usize>, usize)> = Vec::new();
        for _ in 0..budget.permutations {
            let mut order: Vec<usize> = (0..players).collect();
            order.shuffle(&mut rng);
            for _ in 0..budget.background_rows.min(background.len()) {
                let row = rng.random_range(0..background.len());
                sweeps.push((order.clone(), row));
            }
        }

        let credits = sweeps
            .par_iter()
            .map(|(order, row)| {
                Self::sweep(model, sample, &background[*row], order, group, features)
            })
            .collect::<Result<Vec<Vec<f64>>, String>>()
            .map_err(|reason| ForecastError::Internal {
                reason: format!("forward pass failed during attribution: {}", reason),
            })?;

        let mut player_credit = vec![0.0; players];
        for credit in &credits {
            for (total, c) in player_credit.iter_mut().zip(credit) {
                *total += c;
            }
        }

        let mut values = Array2::<f64>::zeros((steps, features));
        for (player, total) in player_credit.iter().enumerate() {
            let block = player / features;
            let feature = player % features;
            let from = block * group;
            let to = (from + group).min(steps);
            let per_cell = total / credits.len() as f64 / (to - from) as f64;
            for t in from..to {
                values[[t, feature]] = per_cell;
            }
        }
        Ok(Attribution { values })
    }
}

/// The estimator compiled into this build.
pub fn default_estimator(budget: EstimatorBudget) -> std::sync::Arc<dyn AttributionEstimator> {
    #[cfg(feature = "shapley")]
    {
        std::sync::Arc::new(PermutationShapley::new(budget))
    }
    #[cfg(not(feature = "shapley"))]
    {
        let _ = budget;
        std::sync::Arc::new(Unavailable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ml::Architecture;
    use ndarray::array;

    /// `f(x) = sum(w * x)`, whose exact Shapley values are `w * (x - b)`
    /// for a single background row `b`.
    struct LinearModel {
        weights: Array2<f64>,
    }

    impl SequenceModel for LinearModel {
        fn forward(&self, window: ArrayView2<f64>) -> Result<f64, String> {
            Ok((&window * &self.weights).sum())
        }

        fn architecture(&self) -> Architecture {
            Architecture::StackedRecurrent
        }

        fn version(&self) -> &str {
            "linear-test"
        }
    }

    #[test]
    fn test_linear_approximation() {
        let background = vec![array![[1.0, 2.0], [3.0, 4.0]], array![[3.0, 2.0], [1.0, 0.0]]];
        let sample = array![[4.0, 2.0], [2.0, 7.0]];
        let model = LinearModel {
            weights: Array2::zeros((2, 2)),
        };
        let attr = LinearApproximation
            .attribute(&model, sample.view(), &background)
            .unwrap();
        let expected = array![[0.2, 0.0], [0.0, 0.5]];
        for (a, b) in attr.values.iter().zip(expected.iter()) {
            assert!((a - b).abs() < 1e-12);
        }
    }

    #[test]
    fn test_unavailable_reports_missing_capability() {
        let model = LinearModel {
            weights: Array2::zeros((1, 1)),
        };
        let err = Unavailable
            .attribute(&model, array![[1.0]].view(), &[array![[0.0]]])
            .unwrap_err();
        assert!(matches!(err, ForecastError::CapabilityMissing { .. }));
    }

    #[test]
    fn test_feature_importance_is_mean_absolute() {
        let attr = Attribution {
            values: array![[1.0, -2.0], [-3.0, 0.0]],
        };
        assert_eq!(attr.feature_importance(), vec![2.0, 1.0]);
    }

    #[cfg(feature = "shapley")]
    #[test]
    fn test_permutation_shapley_is_exact_for_linear_models() {
        let weights = array![[0.5, -1.0], [2.0, 0.0], [1.5, 0.25]];
        let model = LinearModel {
            weights: weights.clone(),
        };
        let background = vec![Array2::<f64>::zeros((3, 2))];
        let sample = array![[1.0, 1.0], [2.0, 3.0], [-1.0, 4.0]];
        let estimator = PermutationShapley::new(EstimatorBudget {
            permutations: 3,
            background_rows: 1,
            timestep_group: 1,
            seed: 9,
        });

        let attr = estimator
            .attribute(&model, sample.view(), &background)
            .unwrap();
        let exact = &weights * &sample;
        for (a, b) in attr.values.iter().zip(exact.iter()) {
            assert!((a - b).abs() < 1e-9, "{} vs {}", a, b);
        }
    }

    #[cfg(feature = "shapley")]
    #[test]
    fn test_grouped_attributions_sum_to_output_difference() {
        let model = LinearModel {
            weights: Array2::from_shape_fn((10, 3), |(t, f)| (t as f64 - 4.0) * 0.1 + f as f64),
        };
        let background = vec![
            Array2::from_elem((10, 3), 0.2),
            Array2::from_elem((10, 3), 0.6),
        ];
        let sample = Array2::from_shape_fn((10, 3), |(t, f)| ((t * 3 + f) as f64).sin());
        let estimator = PermutationShapley::new(EstimatorBudget {
            permutations: 2,
            background_rows: 2,
            timestep_group: 4,
            seed: 1,
        });

        let attr = estimator
            .attribute(&model, sample.view(), &background)
            .unwrap();
        // Each sweep sums to f(sample) - f(row); rows are drawn with
        // replacement so compare against the deterministic per-row range
        let fx = model.forward(sample.view()).unwrap();
        let f0 = model.forward(background[0].view()).unwrap();
        let f1 = model.forward(background[1].view()).unwrap();
        let total = attr.values.sum();
        let (lo, hi) = if fx - f0 < fx - f1 {
            (fx - f0, fx - f1)
        } else {
            (fx - f1, fx - f0)
        };
        assert!(total >= lo - 1e-9 && total <= hi + 1e-9);

        // Cells in one block share the block's credit evenly
        assert!((attr.values[[0, 1]] - attr.values[[3, 1]]).abs() < 1e-12);
    }

    #[cfg(feature = "shapley")]
    #[test]
    fn test_seed_makes_estimates_reproducible() {
        let model = LinearModel {
            weights: Array2::from_elem((6, 2), 0.3),
        };
        let background = vec![Array2::zeros((6, 2)), Array2::from_elem((6, 2), 1.0)];
        let sample = Array2::from_elem((6, 2), 0.5);
        let estimator = PermutationShapley::new(EstimatorBudget {
            permutations: 2,
            background_rows: 2,
            timestep_group: 2,
            seed: 77,
        });
        let a = estimator.attribute(&model, sample.view(), &background).unwrap();
        let b = estimator.attribute(&model, sample.view(), &background).unwrap();
        assert_eq!(a.values, b.values);
    }
}
