//! Fixed-length feature sequences for the dynamic classifier.
//!
//! The dynamic model expects exactly `SEQUENCE_FRAMES` frames. Preparing a sequence
//! is the caller's job: validate every frame, keep the most recent frames when too
//! long, and append zero frames when too short.

use anyhow::{anyhow, Result};

use crate::{validate_features, FeatureVector};

/// Frames expected by the dynamic model.
pub const SEQUENCE_FRAMES: usize = 30;
/// Minimum buffered frames before a dynamic classification is attempted.
pub const MIN_DYNAMIC_FRAMES: usize = 5;
/// Most recent frames taken from the capture buffer for one dynamic request.
pub const DYNAMIC_WINDOW_FRAMES: usize = 15;

#[derive(Clone, Debug, PartialEq)]
pub struct FeatureSequence {
    frames: Vec<FeatureVector>,
    observed: usize,
}

impl FeatureSequence {
    /// Validate and normalize `frames` to `SEQUENCE_FRAMES` entries.
    pub fn prepare(frames: &[FeatureVector]) -> Result<Self> {
        if frames.is_empty() {
            return Err(anyhow!("feature sequence is empty"));
        }
        for (idx, frame) in frames.iter().enumerate() {
            validate_features(frame.values()).map_err(|e| anyhow!("frame {}: {}", idx, e))?;
        }
        let start = frames.len().saturating_sub(SEQUENCE_FRAMES);
        let mut normalized: Vec<FeatureVector> = frames[start..].to_vec();
        let observed = normalized.len();
        normalized.resize(SEQUENCE_FRAMES, FeatureVector::zeros());
        Ok(Self {
            frames: normalized,
            observed,
        })
    }

    /// Build from untyped rows, rejecting any malformed frame.
    pub fn from_rows(rows: Vec<Vec<f32>>) -> Result<Self> {
        let frames = rows
            .into_iter()
            .enumerate()
            .map(|(idx, row)| FeatureVector::new(row).map_err(|e| anyhow!("frame {}: {}", idx, e)))
            .collect::<Result<Vec<_>>>()?;
        Self::prepare(&frames)
    }

    pub fn frames(&self) -> &[FeatureVector] {
        &self.frames
    }

    /// Number of real (non-padding) frames.
    pub fn observed_len(&self) -> usize {
        self.observed
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn to_rows(&self) -> Vec<Vec<f32>> {
        self.frames.iter().map(|f| f.values().to_vec()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FEATURE_LEN;

    fn row(tag: f32) -> Vec<f32> {
        vec![tag; FEATURE_LEN]
    }

    #[test]
    fn short_sequence_is_zero_padded() {
        let seq = FeatureSequence::from_rows((1..=5).map(|i| row(i as f32)).collect()).unwrap();
        assert_eq!(seq.len(), SEQUENCE_FRAMES);
        assert_eq!(seq.observed_len(), 5);
        assert_eq!(seq.frames()[4].values()[0], 5.0);
        assert!(seq.frames()[5..].iter().all(|f| f == &FeatureVector::zeros()));
    }

    #[test]
    fn long_sequence_keeps_most_recent() {
        let seq = FeatureSequence::from_rows((0..45).map(|i| row(i as f32)).collect()).unwrap();
        assert_eq!(seq.len(), SEQUENCE_FRAMES);
        assert_eq!(seq.observed_len(), SEQUENCE_FRAMES);
        assert_eq!(seq.frames()[0].values()[0], 15.0);
        assert_eq!(seq.frames()[29].values()[0], 44.0);
    }

    #[test]
    fn every_frame_has_full_length() {
        let seq = FeatureSequence::from_rows(vec![row(0.3); 12]).unwrap();
        assert!(seq.to_rows().iter().all(|r| r.len() == FEATURE_LEN));
    }

    #[test]
    fn malformed_frames_are_rejected() {
        let mut rows = vec![row(0.1); 6];
        rows[3] = vec![0.1; 42];
        let err = FeatureSequence::from_rows(rows).unwrap_err();
        assert!(err.to_string().contains("frame 3"));

        let mut rows = vec![row(0.1); 6];
        rows[1][7] = f32::NAN;
        assert!(FeatureSequence::from_rows(rows).is_err());
    }

    #[test]
    fn empty_sequence_is_rejected() {
        assert!(FeatureSequence::prepare(&[]).is_err());
    }
}
