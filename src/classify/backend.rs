use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::sequence::FeatureSequence;
use crate::FeatureVector;

/// Label and confidence returned by a classifier.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    #[serde(rename = "class")]
    pub label: String,
    pub confidence: f32,
}

impl Classification {
    /// Rejects empty labels and confidences outside [0, 1].
    pub fn new(label: impl Into<String>, confidence: f32) -> Result<Self> {
        let label = label.into();
        if label.trim().is_empty() {
            return Err(anyhow!("classifier returned an empty label"));
        }
        if !confidence.is_finite() || !(0.0..=1.0).contains(&confidence) {
            return Err(anyhow!(
                "classifier returned confidence {} outside [0, 1]",
                confidence
            ));
        }
        Ok(Self { label, confidence })
    }
}

/// Interchangeable sequence-model backbones.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelVariant {
    #[default]
    Lstm,
    Transformer,
}

impl ModelVariant {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelVariant::Lstm => "lstm",
            ModelVariant::Transformer => "transformer",
        }
    }
}

impl fmt::Display for ModelVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelVariant {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_lowercase().as_str() {
            "lstm" => Ok(ModelVariant::Lstm),
            "transformer" => Ok(ModelVariant::Transformer),
            other => Err(anyhow!(
                "unknown model variant '{}' (expected lstm or transformer)",
                other
            )),
        }
    }
}

/// Single-frame classifier.
pub trait StaticClassifier: Send + Sync {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    fn classify(&self, vector: &FeatureVector) -> Result<Classification>;
}

/// Sequence classifier.
///
/// Callers hand over a prepared `FeatureSequence`, which is always exactly
/// `SEQUENCE_FRAMES` long; backends do not pad or truncate.
pub trait DynamicClassifier: Send + Sync {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Returns true when the backend can serve a model variant.
    fn supports(&self, variant: ModelVariant) -> bool;

    fn classify(&self, sequence: &FeatureSequence, variant: ModelVariant)
        -> Result<Classification>;
}
