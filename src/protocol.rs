//! Wire messages for the prediction stream.
//!
//! One JSON object per line. Inbound lines are frame messages unless they carry
//! a `type` field, in which case they are control messages.

use anyhow::{anyhow, Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::net::TcpStream;
use std::sync::mpsc::Sender;
use std::sync::Mutex;

use crate::session::{ConnectionId, ConnectionSettings, SettingsUpdate};
use crate::{now_millis, PredictionResult};

/// `{"frame": "<base64>", "timestamp": 1700000000000, "frameNumber": 15}`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FrameMessage {
    pub frame: String,
    #[serde(default)]
    pub timestamp: f64,
    #[serde(rename = "frameNumber")]
    pub frame_number: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    Settings { settings: SettingsUpdate },
}

#[derive(Clone, Debug, PartialEq)]
pub enum InboundMessage {
    Frame(FrameMessage),
    Control(ControlMessage),
}

pub fn parse_inbound(line: &str) -> Result<InboundMessage> {
    let value: serde_json::Value =
        serde_json::from_str(line).context("message is not valid JSON")?;
    let is_control = value
        .as_object()
        .map(|obj| obj.contains_key("type"))
        .ok_or_else(|| anyhow!("message must be a JSON object"))?;
    if is_control {
        let control = serde_json::from_value(value).context("invalid control message")?;
        Ok(InboundMessage::Control(control))
    } else {
        let frame = serde_json::from_value(value).context("invalid frame message")?;
        Ok(InboundMessage::Frame(frame))
    }
}

/// Decode a frame payload, accepting an optional `data:image/...;base64,` prefix.
pub fn decode_frame(payload: &str) -> Result<Vec<u8>> {
    let trimmed = payload.trim();
    let encoded = match trimmed.strip_prefix("data:") {
        Some(rest) => rest
            .split_once(',')
            .map(|(_, data)| data)
            .ok_or_else(|| anyhow!("data url frame has no payload"))?,
        None => trimmed,
    };
    if encoded.is_empty() {
        return Err(anyhow!("frame payload is empty"));
    }
    STANDARD.decode(encoded).context("frame payload is not valid base64")
}

pub fn encode_frame(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PredictionPayload {
    pub predicted_class: String,
    pub confidence: f32,
    pub landmarks_detected: usize,
    /// Extraction plus classification time in ms.
    pub processing_time: u64,
    pub frame_number: u64,
    pub timestamp: u64,
    #[serde(default)]
    pub smoothed: bool,
}

impl PredictionPayload {
    pub fn from_result(result: &PredictionResult, frame_number: u64) -> Self {
        Self {
            predicted_class: result.label.clone(),
            confidence: result.confidence,
            landmarks_detected: result.landmarks_detected,
            processing_time: result.processing_time_ms,
            frame_number,
            timestamp: result.timestamp_ms,
            smoothed: result.smoothed,
        }
    }
}

/// Outbound message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Connected {
        #[serde(rename = "connectionId")]
        connection_id: ConnectionId,
        settings: ConnectionSettings,
        timestamp: u64,
    },
    Prediction {
        data: PredictionPayload,
    },
    Error {
        error: String,
        timestamp: u64,
    },
    SettingsUpdated {
        settings: ConnectionSettings,
        timestamp: u64,
    },
}

impl ServerMessage {
    pub fn connected(connection_id: ConnectionId, settings: ConnectionSettings) -> Self {
        ServerMessage::Connected {
            connection_id,
            settings,
            timestamp: now_millis(),
        }
    }

    pub fn error(error: impl Into<String>) -> Self {
        ServerMessage::Error {
            error: error.into(),
            timestamp: now_millis(),
        }
    }

    pub fn settings_updated(settings: ConnectionSettings) -> Self {
        ServerMessage::SettingsUpdated {
            settings,
            timestamp: now_millis(),
        }
    }

    pub fn to_line(&self) -> Result<String> {
        let mut line = serde_json::to_string(self).context("encode server message")?;
        line.push('\n');
        Ok(line)
    }
}

/// Ordered per-connection outbound channel.
pub trait MessageSink: Send + Sync {
    fn send(&self, message: &ServerMessage) -> Result<()>;
}

impl MessageSink for Sender<ServerMessage> {
    fn send(&self, message: &ServerMessage) -> Result<()> {
        Sender::send(self, message.clone()).map_err(|_| anyhow!("message receiver dropped"))
    }
}

/// Writes JSON lines to a TCP stream.
pub struct TcpSink {
    stream: Mutex<TcpStream>,
}

impl TcpSink {
    pub fn new(stream: TcpStream) -> Self {
        Self {
            stream: Mutex::new(stream),
        }
    }
}

impl MessageSink for TcpSink {
    fn send(&self, message: &ServerMessage) -> Result<()> {
        let line = message.to_line()?;
        let mut stream = self
            .stream
            .lock()
            .map_err(|_| anyhow!("stream writer lock poisoned"))?;
        stream.write_all(line.as_bytes()).context("write to stream")?;
        stream.flush().context("flush stream")?;
        Ok(())
    }
}
