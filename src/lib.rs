//! Sign Relay
//!
//! This crate implements the real-time gesture pipeline that turns a noisy stream of
//! hand frames into debounced, confidence-gated sign classification events.
//!
//! # Architecture
//!
//! The pipeline runs on both sides of a client/server boundary:
//!
//! 1. **Capture side** (`capture`): samples frames from a `FrameSource`, keeps a bounded
//!    history of hand feature vectors, and drives independently paced static and dynamic
//!    classification without ever overlapping two requests of the same kind.
//! 2. **Session side** (`session`): per-connection admission gates (rate and frame interval),
//!    a majority-vote smoothing window, and a confidence threshold before emission.
//!
//! Collaborators (landmark extraction, classifiers, transport) sit behind traits.
//! Overload is handled by load shedding: busy ticks and gated frames are dropped, never queued.
//!
//! # Module Structure
//!
//! - `frame`: Frames and frame sources for the capture side
//! - `buffer`: Bounded feature history (`FeatureBuffer`)
//! - `sequence`: Fixed-length sequences for the dynamic classifier
//! - `extract`: Landmark extraction backends
//! - `classify`: Static/dynamic classifier backends and the model registry
//! - `capture`: `CaptureScheduler`
//! - `session`: Settings, gates, smoothing, `SessionRegistry`, `SessionPipeline`
//! - `protocol`: Wire messages
//! - `stream`: JSON-lines stream server
//! - `api`: Operator HTTP API
//! - Core types: `FeatureVector`, `PredictionResult`

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

pub mod api;
pub mod buffer;
pub mod capture;
pub mod classify;
pub mod config;
pub mod extract;
pub mod frame;
pub mod protocol;
pub mod sequence;
pub mod session;
pub mod stream;

pub use buffer::{FeatureBuffer, FEATURE_BUFFER_CAPACITY};
pub use capture::{
    CaptureConfig, CaptureScheduler, CaptureStats, PredictionKind, PublishedPrediction, TickOutcome,
};
pub use classify::{
    Classification, DynamicClassifier, ModelRegistry, ModelVariant, StaticClassifier,
    StubDynamicClassifier, StubStaticClassifier,
};
pub use extract::{Extraction, LandmarkExtractor, ProcessExtractor, StubExtractor};
pub use frame::{Frame, FrameSource, SyntheticSource};
pub use protocol::{FrameMessage, MessageSink, ServerMessage};
pub use sequence::{FeatureSequence, SEQUENCE_FRAMES};
pub use session::{
    ConnectionId, ConnectionSession, ConnectionSettings, PipelineOutcome, SessionError,
    SessionPipeline, SessionRegistry, SettingsUpdate,
};

/// Hand landmarks per pose.
pub const LANDMARK_POINTS: usize = 21;
/// Coordinates per landmark (x, y, z).
pub const LANDMARK_COORDS: usize = 3;
/// Length of a `FeatureVector`.
pub const FEATURE_LEN: usize = LANDMARK_POINTS * LANDMARK_COORDS;

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// -------------------- Feature Vectors --------------------

/// One hand pose: 21 landmarks x 3 coordinates, all finite.
///
/// The invariant is checked at construction, so every `FeatureVector` in the crate
/// is well-formed. Deserialization goes through the same check.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f32>", into = "Vec<f32>")]
pub struct FeatureVector(Vec<f32>);

impl FeatureVector {
    pub fn new(values: Vec<f32>) -> Result<Self> {
        validate_features(&values)?;
        Ok(Self(values))
    }

    /// All-zero vector used to pad short sequences.
    pub fn zeros() -> Self {
        Self(vec![0.0; FEATURE_LEN])
    }

    pub fn values(&self) -> &[f32] {
        &self.0
    }

    pub fn into_inner(self) -> Vec<f32> {
        self.0
    }
}

impl TryFrom<Vec<f32>> for FeatureVector {
    type Error = anyhow::Error;

    fn try_from(values: Vec<f32>) -> Result<Self> {
        Self::new(values)
    }
}

impl From<FeatureVector> for Vec<f32> {
    fn from(vector: FeatureVector) -> Self {
        vector.0
    }
}

/// Checks the feature vector shape: exactly `FEATURE_LEN` finite values.
pub fn validate_features(values: &[f32]) -> Result<()> {
    if values.len() != FEATURE_LEN {
        return Err(anyhow!(
            "feature vector must have {} values, got {}",
            FEATURE_LEN,
            values.len()
        ));
    }
    if let Some(idx) = values.iter().position(|v| !v.is_finite()) {
        return Err(anyhow!("feature vector value at index {} is not finite", idx));
    }
    Ok(())
}

// -------------------- Predictions --------------------

/// A single classification outcome. Never mutated after creation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    pub label: String,
    /// Confidence in [0, 1].
    pub confidence: f32,
    /// Creation time in milliseconds since epoch.
    pub timestamp_ms: u64,
    /// True when produced by the smoothing window rather than a raw classifier call.
    pub smoothed: bool,
    /// Hands found by extraction for the frame this prediction came from.
    pub landmarks_detected: usize,
    pub processing_time_ms: u64,
}

impl PredictionResult {
    pub fn new(
        label: impl Into<String>,
        confidence: f32,
        landmarks_detected: usize,
        processing_time_ms: u64,
    ) -> Self {
        Self {
            label: label.into(),
            confidence,
            timestamp_ms: now_millis(),
            smoothed: false,
            landmarks_detected,
            processing_time_ms,
        }
    }

    /// Derive a smoothed result that keeps this prediction's frame metadata.
    pub fn smoothed_as(&self, label: impl Into<String>, confidence: f32) -> Self {
        Self {
            label: label.into(),
            confidence,
            smoothed: true,
            ..self.clone()
        }
    }
}
