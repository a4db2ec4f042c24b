//! Bounded feature history for the capture side.
//!
//! `FeatureBuffer` keeps the most recent hand poses for sequence classification:
//! - Holds at most `FEATURE_BUFFER_CAPACITY` vectors
//! - Evicts the oldest vector when full (FIFO)
//! - Owned by exactly one `CaptureScheduler`

use std::collections::VecDeque;

use crate::FeatureVector;

/// Maximum number of feature vectors retained.
pub const FEATURE_BUFFER_CAPACITY: usize = 30;

pub struct FeatureBuffer {
    buffer: VecDeque<FeatureVector>,
    max_vectors: usize,
}

impl FeatureBuffer {
    pub fn new() -> Self {
        Self::with_capacity(FEATURE_BUFFER_CAPACITY)
    }

    pub fn with_capacity(max_vectors: usize) -> Self {
        let max_vectors = max_vectors.max(1);
        Self {
            buffer: VecDeque::with_capacity(max_vectors),
            max_vectors,
        }
    }

    /// Push a vector into the buffer. Evicts the oldest as needed.
    pub fn push(&mut self, vector: FeatureVector) {
        while self.buffer.len() >= self.max_vectors {
            self.buffer.pop_front();
        }
        self.buffer.push_back(vector);
    }

    pub fn extend(&mut self, vectors: impl IntoIterator<Item = FeatureVector>) {
        for vector in vectors {
            self.push(vector);
        }
    }

    /// The most recent `n` vectors (or fewer), oldest first.
    pub fn latest(&self, n: usize) -> Vec<FeatureVector> {
        let skip = self.buffer.len().saturating_sub(n);
        self.buffer.iter().skip(skip).cloned().collect()
    }

    pub fn last(&self) -> Option<&FeatureVector> {
        self.buffer.back()
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.max_vectors
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

impl Default for FeatureBuffer {
    fn default() -> Self {
        Self::new()
    }
}
