use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The fixed set of sequence-model designs the core knows how to run.
///
/// Adding a fourth design means a new variant here plus a matching arm in
/// the network factory; nothing else dispatches on architecture names.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum Architecture {
    /// LSTM(128) -> LSTM(64) -> LSTM(32) -> Dense(1)
    #[default]
    StackedRecurrent,
    /// GRU(128) -> GRU(64) -> Dense(1)
    GatedRecurrent,
    /// LSTM(128) -> softmax attention over time -> LSTM(64) -> Dense(1)
    AttentionRecurrent,
}

impl Architecture {
    pub const ALL: [Architecture; 3] = [
        Architecture::StackedRecurrent,
        Architecture::GatedRecurrent,
        Architecture::AttentionRecurrent,
    ];

    /// Short tag used in artifact file names.
    pub fn tag(&self) -> &'static str {
        match self {
            Architecture::StackedRecurrent => "lstm",
            Architecture::GatedRecurrent => "gru",
            Architecture::AttentionRecurrent => "attention_lstm",
        }
    }

    /// Human-facing name used in responses.
    pub fn name(&self) -> &'static str {
        match self {
            Architecture::StackedRecurrent => "stacked-recurrent",
            Architecture::GatedRecurrent => "gated-recurrent",
            Architecture::AttentionRecurrent => "attention-recurrent",
        }
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for Architecture {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "stacked-recurrent" | "lstm" => Ok(Architecture::StackedRecurrent),
            "gated-recurrent" | "gru" => Ok(Architecture::GatedRecurrent),
            "attention-recurrent" | "attention_lstm" | "attention-lstm" => {
                Ok(Architecture::AttentionRecurrent)
            }
            other => Err(format!(
                "Unknown architecture '{}'. Must be 'stacked-recurrent', 'gated-recurrent' or 'attention-recurrent'",
                other
            )),
        }
    }
}

/// Registry key for one trained artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArtifactKey {
    pub architecture: Architecture,
    symbol: String,
}

impl ArtifactKey {
    pub fn new(architecture: Architecture, symbol: &str) -> Self {
        Self {
            architecture,
            symbol: symbol.trim().to_lowercase(),
        }
    }

    /// Lower-cased symbol, as used on disk.
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// `{tag}_{symbol}`, the shared stem of the weights and scaler files.
    pub fn file_stem(&self) -> String {
        format!("{}_{}", self.architecture.tag(), self.symbol)
    }
}

/// The two files that make up one trained artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactFile {
    Weights,
    Scaler,
}

impl ArtifactFile {
    pub const BOTH: [ArtifactFile; 2] = [ArtifactFile::Weights, ArtifactFile::Scaler];

    pub fn file_name(&self, key: &ArtifactKey) -> String {
        match self {
            ArtifactFile::Weights => format!("{}.json", key.file_stem()),
            ArtifactFile::Scaler => format!("{}_scaler.json", key.file_stem()),
        }
    }
}

impl fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.architecture, self.symbol)
    }
}
