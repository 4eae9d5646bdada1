use crate::application::ml::layers::LayerSpec;
use crate::domain::ml::Architecture;
use ndarray::{Array1, Array2};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// One named parameter tensor, row-major.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TensorData {
    pub shape: Vec<usize>,
    pub data: Vec<f64>,
}

impl TensorData {
    pub fn element_count(&self) -> usize {
        self.shape.iter().product()
    }
}

/// Serialized network parameters keyed by state-dict name.
///
/// This is the on-disk weights format shared by every architecture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelWeights {
    /// File-name tag of the architecture that produced the tensors.
    pub architecture: String,
    pub tensors: BTreeMap<String, TensorData>,
}

impl ModelWeights {
    pub fn empty(tag: &str) -> Self {
        Self {
            architecture: tag.to_string(),
            tensors: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, name: &str, tensor: TensorData) {
        self.tensors.insert(name.to_string(), tensor);
    }

    /// Random parameters that satisfy the tensor contract of `architecture`,
    /// drawn uniformly from `[-1/sqrt(fan), 1/sqrt(fan)]`.
    pub fn initialize<R: Rng>(architecture: Architecture, rng: &mut R) -> Self {
        let mut weights = Self::empty(architecture.tag());
        for layer in crate::application::ml::networks::layer_specs(architecture) {
            let bound = layer.init_bound();
            for (name, shape) in layer.tensor_shapes() {
                let count = shape.iter().product();
                let data = (0..count)
                    .map(|_| rng.random_range(-bound..=bound))
                    .collect();
                weights.insert(&name, TensorData { shape, data });
            }
        }
        weights
    }

    /// Checks keys, shapes and values against the layers an architecture
    /// expects. Returns a description of every problem found.
    pub fn validate(&self, architecture: Architecture, layers: &[LayerSpec]) -> Result<(), String> {
        let mut problems = Vec::new();

        if !self.architecture.eq_ignore_ascii_case(architecture.tag()) {
            problems.push(format!(
                "file declares architecture '{}', expected '{}'",
                self.architecture,
                architecture.tag()
            ));
        }

        let expected: BTreeMap<String, Vec<usize>> = layers
            .iter()
            .flat_map(|layer| layer.tensor_shapes())
            .collect();

        let missing: BTreeSet<&String> = expected
            .keys()
            .filter(|k| !self.tensors.contains_key(*k))
            .collect();
        if !missing.is_empty() {
            problems.push(format!("missing keys {:?}", missing));
        }

        let unexpected: BTreeSet<&String> = self
            .tensors
            .keys()
            .filter(|k| !expected.contains_key(*k))
            .collect();
        if !unexpected.is_empty() {
            problems.push(format!("unexpected keys {:?}", unexpected));
        }

        for (name, shape) in &expected {
            let Some(tensor) = self.tensors.get(name) else {
                continue;
            };
            if &tensor.shape != shape {
                problems.push(format!(
                    "{} has shape {:?}, expected {:?}",
                    name, tensor.shape, shape
                ));
            } else if tensor.data.len() != tensor.element_count() {
                problems.push(format!(
                    "{} holds {} values for shape {:?}",
                    name,
                    tensor.data.len(),
                    tensor.shape
                ));
            } else if tensor.data.iter().any(|v| !v.is_finite()) {
                problems.push(format!("{} contains non-finite values", name));
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(problems.join("; "))
        }
    }

    fn tensor(&self, name: &str) -> Result<&TensorData, String> {
        self.tensors
            .get(name)
            .ok_or_else(|| format!("missing key {}", name))
    }

    pub fn matrix(&self, name: &str) -> Result<Array2<f64>, String> {
        let tensor = self.tensor(name)?;
        match tensor.shape.as_slice() {
            [rows, cols] => Array2::from_shape_vec((*rows, *cols), tensor.data.clone())
                .map_err(|e| format!("{}: {}", name, e)),
            other => Err(format!("{} has shape {:?}, expected a matrix", name, other)),
        }
    }

    pub fn vector(&self, name: &str) -> Result<Array1<f64>, String> {
        let tensor = self.tensor(name)?;
        match tensor.shape.as_slice() {
            [len] if *len == tensor.data.len() => Ok(Array1::from(tensor.data.clone())),
            other => Err(format!("{} has shape {:?}, expected a vector", name, other)),
        }
    }

    /// Mutable access for building fixtures and fine-grained surgery on
    /// exported weights.
    pub fn tensor_mut(&mut self, name: &str) -> Option<&mut TensorData> {
        self.tensors.get_mut(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ml::networks::layer_specs;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn test_initialized_weights_validate() {
        let mut rng = StdRng::seed_from_u64(7);
        for arch in Architecture::ALL {
            let weights = ModelWeights::initialize(arch, &mut rng);
            assert!(weights.validate(arch, &layer_specs(arch)).is_ok(), "{}", arch);
        }
    }

    #[test]
    fn test_cross_architecture_weights_rejected() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut gru = ModelWeights::initialize(Architecture::GatedRecurrent, &mut rng);
        // Even with a matching tag the gru keys do not satisfy the lstm contract
        gru.architecture = "lstm".to_string();
        let err = gru
            .validate(
                Architecture::StackedRecurrent,
                &layer_specs(Architecture::StackedRecurrent),
            )
            .unwrap_err();
        assert!(err.contains("missing keys"));
        assert!(err.contains("unexpected keys"));
    }

    #[test]
    fn test_wrong_shape_rejected() {
        let mut rng = StdRng::seed_from_u64(11);
        let arch = Architecture::AttentionRecurrent;
        let mut weights = ModelWeights::initialize(arch, &mut rng);
        let fc = weights.tensor_mut("fc.weight").unwrap();
        fc.shape = vec![1, 32];
        fc.data.truncate(32);

        let err = weights.validate(arch, &layer_specs(arch)).unwrap_err();
        assert!(err.contains("fc.weight"));
        assert!(err.contains("[1, 64]"));
    }

    #[test]
    fn test_json_round_trip_keeps_contract() {
        let mut rng = StdRng::seed_from_u64(3);
        let arch = Architecture::GatedRecurrent;
        let weights = ModelWeights::initialize(arch, &mut rng);
        let json = serde_json::to_vec(&weights).unwrap();
        let back: ModelWeights = serde_json::from_slice(&json).unwrap();

        assert!(back.validate(arch, &layer_specs(arch)).is_ok());
        for (name, tensor) in &weights.tensors {
            let restored = &back.tensors[name];
            assert_eq!(tensor.shape, restored.shape);
            for (a, b) in tensor.data.iter().zip(restored.data.iter()) {
                assert!((a - b).abs() < 1e-12);
            }
        }
    }
}
