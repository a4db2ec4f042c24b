//! Server-side session layer.
//!
//! Each stream connection owns a `ConnectionSession` held by the shared
//! `SessionRegistry`. Inbound frames pass through `SessionPipeline`:
//! - `gate::admit_frame`: rate and interval admission
//! - extraction and static classification
//! - `SmoothingWindow` when enabled
//! - `gate::gate_emission`: confidence threshold

mod connection;
mod error;
pub mod gate;
mod pipeline;
mod registry;
mod settings;
mod smoothing;

pub use connection::{ConnectionId, ConnectionSession, DropCounters, SessionSnapshot, SessionState};
pub use error::SessionError;
pub use gate::Admission;
pub use pipeline::{FrameCheck, PipelineOutcome, SessionPipeline};
pub use registry::{RegistryStats, SessionRegistry, SharedSession};
pub use settings::{
    ConnectionSettings, SettingsUpdate, MAX_CONFIDENCE_THRESHOLD, MAX_FPS, MAX_PREDICTION_INTERVAL,
    MIN_CONFIDENCE_THRESHOLD, MIN_FPS, MIN_PREDICTION_INTERVAL,
};
pub use smoothing::{SmoothingWindow, MIN_SMOOTHING_VOTES, SMOOTHING_WINDOW};
