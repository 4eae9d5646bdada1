//! Inference-only recurrent building blocks.
//!
//! Parameter layouts follow the PyTorch state-dict convention: a recurrent
//! layer named `lstm1` owns `lstm1.weight_ih_l0` `[G*H, in]`,
//! `lstm1.weight_hh_l0` `[G*H, H]`, `lstm1.bias_ih_l0` `[G*H]` and
//! `lstm1.bias_hh_l0` `[G*H]`, with gates stacked row-wise in i,f,g,o order
//! for LSTM (G = 4) and r,z,n order for GRU (G = 3).

use crate::application::ml::weights::ModelWeights;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis, s};

#[inline]
fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Shape description of one parameterised layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayerSpec {
    Lstm {
        name: &'static str,
        input: usize,
        hidden: usize,
    },
    Gru {
        name: &'static str,
        input: usize,
        hidden: usize,
    },
    Linear {
        name: &'static str,
        input: usize,
        output: usize,
    },
}

impl LayerSpec {
    /// Every tensor this layer owns, with its expected shape.
    pub fn tensor_shapes(&self) -> Vec<(String, Vec<usize>)> {
        match *self {
            LayerSpec::Lstm {
                name,
                input,
                hidden,
            } => recurrent_shapes(name, 4, input, hidden),
            LayerSpec::Gru {
                name,
                input,
                hidden,
            } => recurrent_shapes(name, 3, input, hidden),
            LayerSpec::Linear {
                name,
                input,
                output,
            } => vec![
                (format!("{}.weight", name), vec![output, input]),
                (format!("{}.bias", name), vec![output]),
            ],
        }
    }

    /// Fan-in used for uniform initialisation bounds.
    pub fn init_bound(&self) -> f64 {
        let fan = match *self {
            LayerSpec::Lstm { hidden, .. } | LayerSpec::Gru { hidden, .. } => hidden,
            LayerSpec::Linear { input, .. } => input,
        };
        1.0 / (fan as f64).sqrt()
    }
}

fn recurrent_shapes(
    name: &str,
    gates: usize,
    input: usize,
    hidden: usize,
) -> Vec<(String, Vec<usize>)> {
    vec![
        (format!("{}.weight_ih_l0", name), vec![gates * hidden, input]),
        (format!("{}.weight_hh_l0", name), vec![gates * hidden, hidden]),
        (format!("{}.bias_ih_l0", name), vec![gates * hidden]),
        (format!("{}.bias_hh_l0", name), vec![gates * hidden]),
    ]
}

/// Single-layer unidirectional LSTM, zero initial state.
#[derive(Debug, Clone)]
pub struct LstmLayer {
    /// Transposed to `[in, 4H]` so a whole sequence projects in one product.
    weight_ih_t: Array2<f64>,
    weight_hh: Array2<f64>,
    /// `bias_ih + bias_hh`
    bias: Array1<f64>,
    hidden: usize,
}

impl LstmLayer {
    pub fn from_weights(weights: &ModelWeights, name: &str) -> Result<Self, String> {
        let weight_ih = weights.matrix(&format!("{}.weight_ih_l0", name))?;
        let weight_hh = weights.matrix(&format!("{}.weight_hh_l0", name))?;
        let bias_ih = weights.vector(&format!("{}.bias_ih_l0", name))?;
        let bias_hh = weights.vector(&format!("{}.bias_hh_l0", name))?;
        let hidden = weight_hh.ncols();
        Ok(Self {
            weight_ih_t: weight_ih.reversed_axes(),
            weight_hh,
            bias: bias_ih + bias_hh,
            hidden,
        })
    }

    /// Hidden state at every timestep, `[T, H]`.
    pub fn forward_sequence(&self, inputs: ArrayView2<f64>) -> Array2<f64> {
        let steps = inputs.nrows();
        let h_size = self.hidden;
        let projected = inputs.dot(&self.weight_ih_t) + &self.bias;

        let mut outputs = Array2::<f64>::zeros((steps, h_size));
        let mut h = Array1::<f64>::zeros(h_size);
        let mut c = Array1::<f64>::zeros(h_size);

        for t in 0..steps {
            let gates = &projected.row(t) + &self.weight_hh.dot(&h);
            let i = gates.slice(s![0..h_size]).mapv(sigmoid);
            let f = gates.slice(s![h_size..2 * h_size]).mapv(sigmoid);
            let g = gates.slice(s![2 * h_size..3 * h_size]).mapv(f64::tanh);
            let o = gates.slice(s![3 * h_size..4 * h_size]).mapv(sigmoid);

            c = &f * &c + &i * &g;
            h = &o * &c.mapv(f64::tanh);
            outputs.row_mut(t).assign(&h);
        }
        outputs
    }

    /// Hidden state after the last timestep.
    pub fn forward_last(&self, inputs: ArrayView2<f64>) -> Array1<f64> {
        let outputs = self.forward_sequence(inputs);
        let last = outputs.nrows().saturating_sub(1);
        outputs.row(last).to_owned()
    }
}

/// Single-layer unidirectional GRU, zero initial state.
#[derive(Debug, Clone)]
pub struct GruLayer {
    weight_ih_t: Array2<f64>,
    weight_hh: Array2<f64>,
    bias_ih: Array1<f64>,
    bias_hh: Array1<f64>,
    hidden: usize,
}

impl GruLayer {
    pub fn from_weights(weights: &ModelWeights, name: &str) -> Result<Self, String> {
        let weight_ih = weights.matrix(&format!("{}.weight_ih_l0", name))?;
        let weight_hh = weights.matrix(&format!("{}.weight_hh_l0", name))?;
        let bias_ih = weights.vector(&format!("{}.bias_ih_l0", name))?;
        let bias_hh = weights.vector(&format!("{}.bias_hh_l0", name))?;
        let hidden = weight_hh.ncols();
        Ok(Self {
            weight_ih_t: weight_ih.reversed_axes(),
            weight_hh,
            bias_ih,
            bias_hh,
            hidden,
        })
    }

    pub fn forward_sequence(&self, inputs: ArrayView2<f64>) -> Array2<f64> {
        let steps = inputs.nrows();
        let h_size = self.hidden;
        let projected = inputs.dot(&self.weight_ih_t) + &self.bias_ih;

        let mut outputs = Array2::<f64>::zeros((steps, h_size));
        let mut h = Array1::<f64>::zeros(h_size);

        for t in 0..steps {
            let x_gates = projected.row(t);
            let h_gates = self.weight_hh.dot(&h) + &self.bias_hh;

            let r = (&x_gates.slice(s![0..h_size]) + &h_gates.slice(s![0..h_size]))
                .mapv(sigmoid);
            let z = (&x_gates.slice(s![h_size..2 * h_size])
                + &h_gates.slice(s![h_size..2 * h_size]))
                .mapv(sigmoid);
            // Reset gate applies to the hidden projection including its bias
            let n = (&x_gates.slice(s![2 * h_size..3 * h_size])
                + &(&r * &h_gates.slice(s![2 * h_size..3 * h_size])))
                .mapv(f64::tanh);

            h = &(1.0 - &z) * &n + &z * &h;
            outputs.row_mut(t).assign(&h);
        }
        outputs
    }

    pub fn forward_last(&self, inputs: ArrayView2<f64>) -> Array1<f64> {
        let outputs = self.forward_sequence(inputs);
        let last = outputs.nrows().saturating_sub(1);
        outputs.row(last).to_owned()
    }
}

/// Fully connected layer, `y = W x + b`.
#[derive(Debug, Clone)]
pub struct Linear {
    weight: Array2<f64>,
    bias: Array1<f64>,
}

impl Linear {
    pub fn from_weights(weights: &ModelWeights, name: &str) -> Result<Self, String> {
        Ok(Self {
            weight: weights.matrix(&format!("{}.weight", name))?,
            bias: weights.vector(&format!("{}.bias", name))?,
        })
    }

    pub fn forward(&self, x: ArrayView1<f64>) -> Array1<f64> {
        self.weight.dot(&x) + &self.bias
    }

    /// Applies the layer to every row of `[T, in]`, giving `[T, out]`.
    pub fn forward_rows(&self, x: ArrayView2<f64>) -> Array2<f64> {
        x.dot(&self.weight.t()) + &self.bias
    }
}

/// Additive attention pooling over time: a linear score per timestep,
/// softmax across timesteps, weighted sum of the hidden states.
#[derive(Debug, Clone)]
pub struct AttentionPooling {
    score: Linear,
}

impl AttentionPooling {
    pub fn from_weights(weights: &ModelWeights, name: &str) -> Result<Self, String> {
        Ok(Self {
            score: Linear::from_weights(weights, name)?,
        })
    }

    /// Softmax weights over the timesteps of `[T, H]`.
    pub fn weights(&self, states: ArrayView2<f64>) -> Array1<f64> {
        let scores = self.score.forward_rows(states).column(0).to_owned();
        let max = scores.fold(f64::NEG_INFINITY, |acc, &v| acc.max(v));
        let exp = scores.mapv(|v| (v - max).exp());
        let total = exp.sum();
        exp / total
    }

    /// Context vector `[H]`.
    pub fn forward(&self, states: ArrayView2<f64>) -> Array1<f64> {
        let weights = self.weights(states);
        states
            .axis_iter(Axis(0))
            .zip(weights.iter())
            .fold(Array1::<f64>::zeros(states.ncols()), |acc, (row, w)| {
                acc + &row.mapv(|v| v * w)
            })
    }
}
