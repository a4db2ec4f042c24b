use anyhow::{anyhow, Result};
use sha2::{Digest, Sha256};

use crate::classify::backend::{
    Classification, DynamicClassifier, ModelVariant, StaticClassifier,
};
use crate::sequence::FeatureSequence;
use crate::FeatureVector;

const DEFAULT_CONFIDENCE: f32 = 0.9;
const DEFAULT_LETTERS: &[&str] = &[
    "A", "B", "C", "D", "E", "F", "G", "H", "I", "J", "K", "L", "M", "N", "O", "P", "Q", "R",
    "S", "T", "U", "V", "W", "X", "Y", "Z",
];
const DEFAULT_WORDS: &[&str] = &["Halo", "Terima Kasih", "Maaf", "Tolong", "Sama-sama"];

fn pick_label<'a>(labels: &'a [String], values: impl Iterator<Item = f32>) -> &'a str {
    let mut hasher = Sha256::new();
    for v in values {
        hasher.update(v.to_le_bytes());
    }
    let digest: [u8; 32] = hasher.finalize().into();
    let idx = u64::from_le_bytes([
        digest[0], digest[1], digest[2], digest[3], digest[4], digest[5], digest[6], digest[7],
    ]) as usize
        % labels.len();
    &labels[idx]
}

fn owned_labels(labels: &[&str]) -> Vec<String> {
    labels.iter().map(|l| l.to_string()).collect()
}

/// Stub single-frame classifier. Hashes the vector onto a fixed label set.
pub struct StubStaticClassifier {
    labels: Vec<String>,
    confidence: f32,
}

impl StubStaticClassifier {
    pub fn new() -> Self {
        Self {
            labels: owned_labels(DEFAULT_LETTERS),
            confidence: DEFAULT_CONFIDENCE,
        }
    }

    pub fn with_labels(labels: Vec<String>, confidence: f32) -> Result<Self> {
        if labels.is_empty() {
            return Err(anyhow!("stub classifier needs at least one label"));
        }
        Classification::new(labels[0].clone(), confidence)?;
        Ok(Self { labels, confidence })
    }
}

impl Default for StubStaticClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl StaticClassifier for StubStaticClassifier {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn classify(&self, vector: &FeatureVector) -> Result<Classification> {
        let label = pick_label(&self.labels, vector.values().iter().copied());
        Classification::new(label, self.confidence)
    }
}

/// Stub sequence classifier. Serves every model variant.
pub struct StubDynamicClassifier {
    labels: Vec<String>,
    confidence: f32,
}

impl StubDynamicClassifier {
    pub fn new() -> Self {
        Self {
            labels: owned_labels(DEFAULT_WORDS),
            confidence: DEFAULT_CONFIDENCE,
        }
    }

    pub fn with_labels(labels: Vec<String>, confidence: f32) -> Result<Self> {
        if labels.is_empty() {
            return Err(anyhow!("stub classifier needs at least one label"));
        }
        Classification::new(labels[0].clone(), confidence)?;
        Ok(Self { labels, confidence })
    }
}

impl Default for StubDynamicClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl DynamicClassifier for StubDynamicClassifier {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn supports(&self, _variant: ModelVariant) -> bool {
        true
    }

    fn classify(
        &self,
        sequence: &FeatureSequence,
        _variant: ModelVariant,
    ) -> Result<Classification> {
        let values = sequence
            .frames()
            .iter()
            .flat_map(|f| f.values().iter().copied());
        let label = pick_label(&self.labels, values);
        Classification::new(label, self.confidence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FEATURE_LEN;

    #[test]
    fn stub_static_is_deterministic() {
        let classifier = StubStaticClassifier::new();
        let v = FeatureVector::new(vec![0.42; FEATURE_LEN]).unwrap();
        let a = classifier.classify(&v).unwrap();
        let b = classifier.classify(&v).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.confidence, DEFAULT_CONFIDENCE);
        assert!(DEFAULT_LETTERS.contains(&a.label.as_str()));
    }

    #[test]
    fn stub_dynamic_uses_configured_labels() {
        let classifier =
            StubDynamicClassifier::with_labels(vec!["Halo".to_string()], 0.75).unwrap();
        let seq = FeatureSequence::prepare(&vec![FeatureVector::zeros(); 3]).unwrap();
        let result = classifier.classify(&seq, ModelVariant::Transformer).unwrap();
        assert_eq!(result.label, "Halo");
        assert_eq!(result.confidence, 0.75);
    }

    #[test]
    fn stub_rejects_invalid_setup() {
        assert!(StubStaticClassifier::with_labels(vec![], 0.9).is_err());
        assert!(StubStaticClassifier::with_labels(vec!["A".to_string()], 1.5).is_err());
    }
}
