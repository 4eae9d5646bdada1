use crate::application::ml::layers::{AttentionPooling, GruLayer, LayerSpec, Linear, LstmLayer};
use crate::application::ml::predictor::{SequenceModel, check_window};
use crate::application::ml::weights::ModelWeights;
use crate::domain::ml::Architecture;
use crate::domain::ml::feature_registry::FEATURE_COUNT;
use ndarray::{ArrayView2, Axis};
use std::sync::Arc;

/// Parameterised layers of each architecture, in execution order.
pub fn layer_specs(architecture: Architecture) -> Vec<LayerSpec> {
    match architecture {
        Architecture::StackedRecurrent => vec![
            LayerSpec::Lstm {
                name: "lstm1",
                input: FEATURE_COUNT,
                hidden: 128,
            },
            LayerSpec::Lstm {
                name: "lstm2",
                input: 128,
                hidden: 64,
            },
            LayerSpec::Lstm {
                name: "lstm3",
                input: 64,
                hidden: 32,
            },
            LayerSpec::Linear {
                name: "fc",
                input: 32,
                output: 1,
            },
        ],
        Architecture::GatedRecurrent => vec![
            LayerSpec::Gru {
                name: "gru1",
                input: FEATURE_COUNT,
                hidden: 128,
            },
            LayerSpec::Gru {
                name: "gru2",
                input: 128,
                hidden: 64,
            },
            LayerSpec::Linear {
                name: "fc",
                input: 64,
                output: 1,
            },
        ],
        Architecture::AttentionRecurrent => vec![
            LayerSpec::Lstm {
                name: "lstm1",
                input: FEATURE_COUNT,
                hidden: 128,
            },
            LayerSpec::Linear {
                name: "attention.attention",
                input: 128,
                output: 1,
            },
            LayerSpec::Lstm {
                name: "lstm2",
                input: 128,
                hidden: 64,
            },
            LayerSpec::Linear {
                name: "fc",
                input: 64,
                output: 1,
            },
        ],
    }
}

/// Builds the network for `architecture` from weights that already passed
/// [`ModelWeights::validate`].
pub fn build_network(
    architecture: Architecture,
    weights: &ModelWeights,
) -> Result<Arc<dyn SequenceModel>, String> {
    let version = format!(
        "{}-{}p",
        architecture.tag(),
        weights
            .tensors
            .values()
            .map(|t| t.data.len())
            .sum::<usize>()
    );
    let network: Arc<dyn SequenceModel> = match architecture {
        Architecture::StackedRecurrent => Arc::new(StackedRecurrentNet {
            lstm1: LstmLayer::from_weights(weights, "lstm1")?,
            lstm2: LstmLayer::from_weights(weights, "lstm2")?,
            lstm3: LstmLayer::from_weights(weights, "lstm3")?,
            fc: Linear::from_weights(weights, "fc")?,
            version,
        }),
        Architecture::GatedRecurrent => Arc::new(GatedRecurrentNet {
            gru1: GruLayer::from_weights(weights, "gru1")?,
            gru2: GruLayer::from_weights(weights, "gru2")?,
            fc: Linear::from_weights(weights, "fc")?,
            version,
        }),
        Architecture::AttentionRecurrent => Arc::new(AttentionRecurrentNet {
            lstm1: LstmLayer::from_weights(weights, "lstm1")?,
            attention: AttentionPooling::from_weights(weights, "attention.attention")?,
            lstm2: LstmLayer::from_weights(weights, "lstm2")?,
            fc: Linear::from_weights(weights, "fc")?,
            version,
        }),
    };
    Ok(network)
}

/// LSTM(128) -> LSTM(64) -> LSTM(32) -> last step -> Dense(1)
pub struct StackedRecurrentNet {
    lstm1: LstmLayer,
    lstm2: LstmLayer,
    lstm3: LstmLayer,
    fc: Linear,
    version: String,
}

impl SequenceModel for StackedRecurrentNet {
    fn forward(&self, window: ArrayView2<f64>) -> Result<f64, String> {
        check_window(&window)?;
        let h1 = self.lstm1.forward_sequence(window);
        let h2 = self.lstm2.forward_sequence(h1.view());
        let last = self.lstm3.forward_last(h2.view());
        Ok(self.fc.forward(last.view())[0])
    }

    fn architecture(&self) -> Architecture {
        Architecture::StackedRecurrent
    }

    fn version(&self) -> &str {
        &self.version
    }
}

/// GRU(128) -> GRU(64) -> last step -> Dense(1)
pub struct GatedRecurrentNet {
    gru1: GruLayer,
    gru2: GruLayer,
    fc: Linear,
    version: String,
}

impl SequenceModel for GatedRecurrentNet {
    fn forward(&self, window: ArrayView2<f64>) -> Result<f64, String> {
        check_window(&window)?;
        let h1 = self.gru1.forward_sequence(window);
        let last = self.gru2.forward_last(h1.view());
        Ok(self.fc.forward(last.view())[0])
    }

    fn architecture(&self) -> Architecture {
        Architecture::GatedRecurrent
    }

    fn version(&self) -> &str {
        &self.version
    }
}

/// LSTM(128) -> attention pooling over time -> context as one step into
/// LSTM(64) -> Dense(1)
pub struct AttentionRecurrentNet {
    lstm1: LstmLayer,
    attention: AttentionPooling,
    lstm2: LstmLayer,
    fc: Linear,
    version: String,
}

impl SequenceModel for AttentionRecurrentNet {
    fn forward(&self, window: ArrayView2<f64>) -> Result<f64, String> {
        check_window(&window)?;
        let states = self.lstm1.forward_sequence(window);
        let context = self.attention.forward(states.view()).insert_axis(Axis(0));
        let last = self.lstm2.forward_last(context.view());
        Ok(self.fc.forward(last.view())[0])
    }

    fn architecture(&self) -> Architecture {
        Architecture::AttentionRecurrent
    }

    fn version(&self) -> &str {
        &self.version
    }
}
