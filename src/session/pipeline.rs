//! Server-side frame path for one connection:
//! admission gate, decode, extract, classify, smoothing, emission gate, send.

use anyhow::{Context, Result};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

use super::connection::ConnectionId;
use super::gate::{self, Admission};
use super::registry::{lock_session, SessionRegistry};
use super::settings::ConnectionSettings;
use crate::classify::StaticClassifier;
use crate::extract::LandmarkExtractor;
use crate::frame::Frame;
use crate::protocol::{
    decode_frame, parse_inbound, ControlMessage, FrameMessage, InboundMessage, MessageSink,
    PredictionPayload, ServerMessage,
};
use crate::{now_millis, PredictionResult};

/// What happened to one inbound message.
#[derive(Clone, Debug, PartialEq)]
pub enum PipelineOutcome {
    Emitted(PredictionPayload),
    Dropped(Admission),
    NoHands,
    BelowThreshold,
    /// The session closed while the frame was being processed.
    Discarded,
    /// Reported to the client as an error message.
    Failed(String),
    SettingsUpdated(ConnectionSettings),
    UnknownConnection,
}

/// One frame run through extraction and classification outside any session.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FrameCheck {
    pub processing_successful: bool,
    pub predicted_class: Option<String>,
    pub confidence: f32,
    pub processing_time: u64,
    pub landmarks_detected: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FrameCheck {
    fn unsuccessful(started: Instant, landmarks_detected: usize, error: String) -> Self {
        Self {
            processing_successful: false,
            predicted_class: None,
            confidence: 0.0,
            processing_time: started.elapsed().as_millis() as u64,
            landmarks_detected,
            error: Some(error),
        }
    }
}

pub struct SessionPipeline {
    registry: Arc<SessionRegistry>,
    extractor: Arc<dyn LandmarkExtractor>,
    classifier: Arc<dyn StaticClassifier>,
}

impl SessionPipeline {
    pub fn new(
        registry: Arc<SessionRegistry>,
        extractor: Arc<dyn LandmarkExtractor>,
        classifier: Arc<dyn StaticClassifier>,
    ) -> Self {
        Self {
            registry,
            extractor,
            classifier,
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Handle one raw inbound line. Errors are only returned when the sink fails.
    pub fn handle_line(
        &self,
        id: &ConnectionId,
        line: &str,
        sink: &dyn MessageSink,
    ) -> Result<PipelineOutcome> {
        if !self.registry.touch(id, now_millis()) {
            return Ok(PipelineOutcome::UnknownConnection);
        }
        match parse_inbound(line) {
            Ok(InboundMessage::Frame(frame)) => self.handle_frame(id, &frame, sink),
            Ok(InboundMessage::Control(ControlMessage::Settings { settings })) => {
                match self.registry.update_settings(id, &settings) {
                    Ok(updated) => {
                        sink.send(&ServerMessage::settings_updated(updated.clone()))?;
                        Ok(PipelineOutcome::SettingsUpdated(updated))
                    }
                    Err(e) => self.fail(sink, e.to_string()),
                }
            }
            Err(e) => self.fail(sink, format!("{:#}", e)),
        }
    }

    /// Run one frame message through the gates and collaborators.
    pub fn handle_frame(
        &self,
        id: &ConnectionId,
        message: &FrameMessage,
        sink: &dyn MessageSink,
    ) -> Result<PipelineOutcome> {
        self.handle_frame_at(id, message, sink, now_millis())
    }

    pub(crate) fn handle_frame_at(
        &self,
        id: &ConnectionId,
        message: &FrameMessage,
        sink: &dyn MessageSink,
        now_ms: u64,
    ) -> Result<PipelineOutcome> {
        let Some(session) = self.registry.get(id) else {
            return Ok(PipelineOutcome::UnknownConnection);
        };
        let admission = gate::admit_frame(&mut lock_session(&session), message.frame_number, now_ms);
        if !admission.is_admitted() {
            log::debug!(
                "connection {} frame {} dropped: {:?}",
                id,
                message.frame_number,
                admission
            );
            return Ok(PipelineOutcome::Dropped(admission));
        }

        let started = Instant::now();
        let bytes = match decode_frame(&message.frame) {
            Ok(bytes) => bytes,
            Err(e) => return self.fail(sink, format!("{:#}", e)),
        };
        let frame = Frame::new(bytes, message.frame_number);
        let vectors = match self
            .extractor
            .extract(&frame)
            .and_then(|extraction| extraction.into_vectors())
        {
            Ok(vectors) => vectors,
            Err(e) => {
                log::warn!("connection {} extraction failed: {:#}", id, e);
                return self.fail(sink, format!("{:#}", e));
            }
        };
        let Some(first) = vectors.first() else {
            return Ok(PipelineOutcome::NoHands);
        };
        let classification = match self.classifier.classify(first) {
            Ok(c) => c,
            Err(e) => {
                log::warn!("connection {} classification failed: {:#}", id, e);
                return self.fail(sink, format!("classification failed: {:#}", e));
            }
        };
        let raw = PredictionResult::new(
            classification.label,
            classification.confidence,
            vectors.len(),
            started.elapsed().as_millis() as u64,
        );

        // Late results for a closed connection have no observable effect.
        if !self.registry.contains(id) {
            log::debug!("connection {} closed during processing, result discarded", id);
            return Ok(PipelineOutcome::Discarded);
        }

        // Held through the send so a concurrent close lands either before the
        // open check or after the prediction is written.
        let mut guard = lock_session(&session);
        if !guard.is_open() {
            return Ok(PipelineOutcome::Discarded);
        }
        let result = if guard.settings().smoothing_enabled {
            guard.smoothing.push(raw)
        } else {
            raw
        };
        if !gate::gate_emission(&mut guard, &result) {
            log::debug!(
                "connection {} prediction {} ({:.2}) below threshold",
                id,
                result.label,
                result.confidence
            );
            return Ok(PipelineOutcome::BelowThreshold);
        }

        let payload = PredictionPayload::from_result(&result, message.frame_number);
        sink.send(&ServerMessage::Prediction {
            data: payload.clone(),
        })?;
        drop(guard);
        Ok(PipelineOutcome::Emitted(payload))
    }

    /// Extract and classify one base64 frame with no gates, smoothing or threshold.
    ///
    /// Only an undecodable payload is an error; collaborator failures and frames
    /// without hands are reported as unsuccessful checks.
    pub fn check_frame(&self, payload: &str) -> Result<FrameCheck> {
        let bytes = decode_frame(payload).context("test frame")?;
        let started = Instant::now();
        let vectors = match self
            .extractor
            .extract(&Frame::new(bytes, 0))
            .and_then(|extraction| extraction.into_vectors())
        {
            Ok(vectors) => vectors,
            Err(e) => {
                log::warn!("test frame extraction failed: {:#}", e);
                return Ok(FrameCheck::unsuccessful(started, 0, format!("{:#}", e)));
            }
        };
        let Some(first) = vectors.first() else {
            return Ok(FrameCheck::unsuccessful(
                started,
                0,
                "no hand detected".to_string(),
            ));
        };
        match self.classifier.classify(first) {
            Ok(classification) => Ok(FrameCheck {
                processing_successful: true,
                predicted_class: Some(classification.label),
                confidence: classification.confidence,
                processing_time: started.elapsed().as_millis() as u64,
                landmarks_detected: vectors.len(),
                error: None,
            }),
            Err(e) => {
                log::warn!("test frame classification failed: {:#}", e);
                Ok(FrameCheck::unsuccessful(
                    started,
                    vectors.len(),
                    format!("classification failed: {:#}", e),
                ))
            }
        }
    }

    fn fail(&self, sink: &dyn MessageSink, error: String) -> Result<PipelineOutcome> {
        sink.send(&ServerMessage::error(error.clone()))?;
        Ok(PipelineOutcome::Failed(error))
    }
}
