use anyhow::Result;
use sha2::{Digest, Sha256};

use crate::extract::backend::{Extraction, LandmarkExtractor};
use crate::frame::Frame;
use crate::{FeatureVector, FEATURE_LEN};

/// Stub backend for testing. Derives stable pseudo-landmarks from a hash of the frame.
///
/// Empty frames yield no hands; every other frame yields `hands_per_frame` vectors.
pub struct StubExtractor {
    hands_per_frame: usize,
}

impl StubExtractor {
    pub fn new() -> Self {
        Self { hands_per_frame: 1 }
    }

    pub fn with_hands(hands_per_frame: usize) -> Self {
        Self { hands_per_frame }
    }
}

impl Default for StubExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl LandmarkExtractor for StubExtractor {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn extract(&self, frame: &Frame) -> Result<Extraction> {
        if frame.is_empty() {
            return Ok(Extraction::no_hands());
        }
        let mut vectors = Vec::with_capacity(self.hands_per_frame);
        for hand in 0..self.hands_per_frame {
            let mut hasher = Sha256::new();
            hasher.update(frame.bytes());
            hasher.update((hand as u64).to_le_bytes());
            let digest: [u8; 32] = hasher.finalize().into();
            let values = (0..FEATURE_LEN)
                .map(|i| digest[i % digest.len()] as f32 / 255.0)
                .collect();
            vectors.push(FeatureVector::new(values)?);
        }
        Ok(Extraction::hands(vectors))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_extractor_is_deterministic() {
        let extractor = StubExtractor::new();
        let a = extractor.extract(&Frame::new(b"frame1".to_vec(), 1)).unwrap();
        let b = extractor.extract(&Frame::new(b"frame1".to_vec(), 2)).unwrap();
        let c = extractor.extract(&Frame::new(b"frame2".to_vec(), 3)).unwrap();

        assert!(a.success);
        assert_eq!(a.vectors.len(), 1);
        assert_eq!(a.vectors, b.vectors);
        assert_ne!(a.vectors, c.vectors);
        assert!(a.vectors[0].values().iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn empty_frame_has_no_hands() {
        let extractor = StubExtractor::with_hands(2);
        let none = extractor.extract(&Frame::new(Vec::new(), 1)).unwrap();
        assert!(none.success);
        assert!(none.vectors.is_empty());

        let two = extractor.extract(&Frame::new(b"x".to_vec(), 2)).unwrap();
        assert_eq!(two.vectors.len(), 2);
        assert_ne!(two.vectors[0], two.vectors[1]);
    }
}
