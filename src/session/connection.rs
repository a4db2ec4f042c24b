use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::error::SessionError;
use super::settings::{ConnectionSettings, SettingsUpdate};
use super::smoothing::SmoothingWindow;

/// Opaque connection identity (random 64-bit, hex encoded).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(String);

impl ConnectionId {
    pub fn generate() -> Self {
        let mut bytes = [0u8; 8];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(format!("conn_{}", hex::encode(bytes)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ConnectionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ConnectionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Open,
    Closed,
}

/// Frames and predictions dropped by the session gates.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DropCounters {
    pub rate_limited: u64,
    pub off_interval: u64,
    pub below_threshold: u64,
}

impl DropCounters {
    pub fn total(&self) -> u64 {
        self.rate_limited + self.off_interval + self.below_threshold
    }

    pub fn add(&mut self, other: &DropCounters) {
        self.rate_limited += other.rate_limited;
        self.off_interval += other.off_interval;
        self.below_threshold += other.below_threshold;
    }
}

/// Per-connection state. Owned by the `SessionRegistry`.
#[derive(Debug)]
pub struct ConnectionSession {
    id: ConnectionId,
    state: SessionState,
    settings: ConnectionSettings,
    pub(crate) smoothing: SmoothingWindow,
    /// Time of the last frame admitted by the rate gate (ms since epoch).
    pub(crate) last_seen_ms: u64,
    /// Time of the last inbound message of any kind, for idle reaping.
    pub(crate) last_activity_ms: u64,
    pub(crate) prediction_count: u64,
    pub(crate) frames_received: u64,
    pub(crate) drops: DropCounters,
    opened_at_ms: u64,
}

impl ConnectionSession {
    pub fn open(id: ConnectionId, settings: ConnectionSettings, now_ms: u64) -> Self {
        Self {
            id,
            state: SessionState::Open,
            settings,
            smoothing: SmoothingWindow::new(),
            last_seen_ms: now_ms,
            last_activity_ms: now_ms,
            prediction_count: 0,
            frames_received: 0,
            drops: DropCounters::default(),
            opened_at_ms: now_ms,
        }
    }

    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == SessionState::Open
    }

    pub fn settings(&self) -> &ConnectionSettings {
        &self.settings
    }

    pub fn prediction_count(&self) -> u64 {
        self.prediction_count
    }

    pub fn drops(&self) -> DropCounters {
        self.drops
    }

    pub fn last_activity_ms(&self) -> u64 {
        self.last_activity_ms
    }

    pub fn touch(&mut self, now_ms: u64) {
        self.last_activity_ms = self.last_activity_ms.max(now_ms);
    }

    /// Apply a partial update. Closed sessions reject every update.
    pub fn update_settings(
        &mut self,
        update: &SettingsUpdate,
    ) -> Result<ConnectionSettings, SessionError> {
        if !self.is_open() {
            return Err(SessionError::Closed(self.id.clone()));
        }
        let next = self.settings.apply(update)?;
        self.settings = next.clone();
        Ok(next)
    }

    /// Mark closed and drop the smoothing history.
    pub fn close(&mut self) {
        self.state = SessionState::Closed;
        self.smoothing.clear();
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            connection_id: self.id.clone(),
            settings: self.settings.clone(),
            prediction_count: self.prediction_count,
            frames_received: self.frames_received,
            drops: self.drops,
            opened_at_ms: self.opened_at_ms,
            last_activity_ms: self.last_activity_ms,
        }
    }
}

/// Read-only view of one session for stats.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub connection_id: ConnectionId,
    pub settings: ConnectionSettings,
    pub prediction_count: u64,
    pub frames_received: u64,
    pub drops: DropCounters,
    pub opened_at_ms: u64,
    pub last_activity_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_distinct() {
        let a = ConnectionId::generate();
        let b = ConnectionId::generate();
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("conn_"));
        assert_eq!(a.as_str().len(), "conn_".len() + 16);
    }

    #[test]
    fn closed_session_rejects_updates() {
        let mut session =
            ConnectionSession::open(ConnectionId::from("c1"), ConnectionSettings::default(), 0);
        session.close();
        let err = session
            .update_settings(&SettingsUpdate {
                max_fps: Some(10),
                ..Default::default()
            })
            .unwrap_err();
        assert_eq!(err, SessionError::Closed(ConnectionId::from("c1")));
        assert_eq!(session.settings().max_fps, 15);
    }

    #[test]
    fn failed_update_keeps_prior_settings() {
        let mut session =
            ConnectionSession::open(ConnectionId::from("c1"), ConnectionSettings::default(), 0);
        let result = session.update_settings(&SettingsUpdate {
            confidence_threshold: Some(1.5),
            ..Default::default()
        });
        assert!(matches!(result, Err(SessionError::InvalidSettings(_))));
        assert_eq!(session.settings().confidence_threshold, 0.7);
    }
}
