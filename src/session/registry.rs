use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use super::connection::{ConnectionId, ConnectionSession, DropCounters, SessionSnapshot};
use super::error::SessionError;
use super::settings::{ConnectionSettings, SettingsUpdate};
use crate::protocol::{MessageSink, ServerMessage};

pub type SharedSession = Arc<Mutex<ConnectionSession>>;

/// Owns every live `ConnectionSession`.
///
/// Connection handlers share one registry through an `Arc`. A session removed
/// from the map is gone for good: late work holding its `Arc` must check
/// `contains` before producing side effects.
///
/// Session, map and counter locks recover from poisoning: every critical section
/// leaves them consistent, and a panicked connection thread must not take the
/// operator API down with it.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<ConnectionId, SharedSession>>,
    /// Outbound channel of each connection, for operator-initiated pushes.
    sinks: RwLock<HashMap<ConnectionId, Arc<dyn MessageSink>>>,
    defaults: ConnectionSettings,
    max_connections: usize,
    closed_predictions: AtomicU64,
    closed_drops: Mutex<DropCounters>,
    opened_total: AtomicU64,
}

/// Aggregate view returned by `SessionRegistry::stats`.
#[derive(Clone, Debug, Serialize)]
pub struct RegistryStats {
    pub active_connections: usize,
    /// Emitted predictions across the registry lifetime, closed sessions included.
    pub total_predictions: u64,
    pub connections_opened: u64,
    /// Mean configured `max_fps` over active connections, 0 when there are none.
    pub average_fps: f64,
    pub drops: DropCounters,
    pub connections: Vec<SessionSnapshot>,
}

pub(crate) fn lock_session(session: &SharedSession) -> MutexGuard<'_, ConnectionSession> {
    session.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl SessionRegistry {
    pub fn new(defaults: ConnectionSettings, max_connections: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            sinks: RwLock::new(HashMap::new()),
            defaults,
            max_connections: max_connections.max(1),
            closed_predictions: AtomicU64::new(0),
            closed_drops: Mutex::new(DropCounters::default()),
            opened_total: AtomicU64::new(0),
        }
    }

    pub fn defaults(&self) -> &ConnectionSettings {
        &self.defaults
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<ConnectionId, SharedSession>> {
        self.sessions
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<ConnectionId, SharedSession>> {
        self.sessions
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_sinks(&self) -> RwLockWriteGuard<'_, HashMap<ConnectionId, Arc<dyn MessageSink>>> {
        self.sinks
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a new connection with the default settings.
    pub fn open(&self, now_ms: u64) -> Result<(ConnectionId, SharedSession), SessionError> {
        self.open_inner(now_ms, None)
    }

    /// Register a new connection whose transport receives operator pushes.
    pub fn open_with_sink(
        &self,
        now_ms: u64,
        sink: Arc<dyn MessageSink>,
    ) -> Result<(ConnectionId, SharedSession), SessionError> {
        self.open_inner(now_ms, Some(sink))
    }

    fn open_inner(
        &self,
        now_ms: u64,
        sink: Option<Arc<dyn MessageSink>>,
    ) -> Result<(ConnectionId, SharedSession), SessionError> {
        let mut sessions = self.write();
        if sessions.len() >= self.max_connections {
            return Err(SessionError::AtCapacity(self.max_connections));
        }
        let mut id = ConnectionId::generate();
        while sessions.contains_key(&id) {
            id = ConnectionId::generate();
        }
        let session = Arc::new(Mutex::new(ConnectionSession::open(
            id.clone(),
            self.defaults.clone(),
            now_ms,
        )));
        sessions.insert(id.clone(), Arc::clone(&session));
        if let Some(sink) = sink {
            self.write_sinks().insert(id.clone(), sink);
        }
        self.opened_total.fetch_add(1, Ordering::Relaxed);
        log::info!("connection {} opened ({} active)", id, sessions.len());
        Ok((id, session))
    }

    pub fn get(&self, id: &ConnectionId) -> Option<SharedSession> {
        self.read().get(id).cloned()
    }

    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.read().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Remove and close a session. Returns its final snapshot, or None if unknown.
    pub fn close(&self, id: &ConnectionId) -> Option<SessionSnapshot> {
        let removed = self.write().remove(id)?;
        self.write_sinks().remove(id);
        let mut session = lock_session(&removed);
        session.close();
        self.closed_predictions
            .fetch_add(session.prediction_count(), Ordering::Relaxed);
        self.closed_drops
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .add(&session.drops());
        let snapshot = session.snapshot();
        log::info!(
            "connection {} closed after {} predictions",
            id,
            snapshot.prediction_count
        );
        Some(snapshot)
    }

    /// Validate and apply a partial settings update to an open session.
    pub fn update_settings(
        &self,
        id: &ConnectionId,
        update: &SettingsUpdate,
    ) -> Result<ConnectionSettings, SessionError> {
        let session = self
            .get(id)
            .ok_or_else(|| SessionError::NotFound(id.clone()))?;
        let mut session = lock_session(&session);
        let settings = session.update_settings(update)?;
        log::info!("connection {} settings updated: {:?}", id, settings);
        Ok(settings)
    }

    /// Apply an operator settings update and push `settings_updated` to the
    /// connection. A failed push is logged; the update itself stands.
    pub fn push_settings(
        &self,
        id: &ConnectionId,
        update: &SettingsUpdate,
    ) -> Result<ConnectionSettings, SessionError> {
        let settings = self.update_settings(id, update)?;
        let sink = self
            .sinks
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(id)
            .cloned();
        if let Some(sink) = sink {
            if let Err(err) = sink.send(&ServerMessage::settings_updated(settings.clone())) {
                log::warn!("connection {} settings push failed: {:#}", id, err);
            }
        }
        Ok(settings)
    }

    pub fn touch(&self, id: &ConnectionId, now_ms: u64) -> bool {
        match self.get(id) {
            Some(session) => {
                lock_session(&session).touch(now_ms);
                true
            }
            None => false,
        }
    }

    /// Close every session with no inbound activity for `idle`. Returns the closed ids.
    pub fn close_idle(&self, now_ms: u64, idle: Duration) -> Vec<ConnectionId> {
        let idle_ms = idle.as_millis() as u64;
        let stale: Vec<ConnectionId> = self
            .read()
            .iter()
            .filter(|(_, session)| {
                now_ms.saturating_sub(lock_session(session).last_activity_ms()) >= idle_ms
            })
            .map(|(id, _)| id.clone())
            .collect();
        for id in &stale {
            log::info!("connection {} idle for {:?}, closing", id, idle);
            self.close(id);
        }
        stale
    }

    /// Read-only snapshot of every session plus lifetime totals.
    pub fn stats(&self) -> RegistryStats {
        let mut connections: Vec<SessionSnapshot> = self
            .read()
            .values()
            .map(|session| lock_session(session).snapshot())
            .collect();
        connections.sort_by(|a, b| a.connection_id.cmp(&b.connection_id));

        let mut drops = *self
            .closed_drops
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut total_predictions = self.closed_predictions.load(Ordering::Relaxed);
        let average_fps = if connections.is_empty() {
            0.0
        } else {
            connections
                .iter()
                .map(|snapshot| f64::from(snapshot.settings.max_fps))
                .sum::<f64>()
                / connections.len() as f64
        };
        for snapshot in &connections {
            drops.add(&snapshot.drops);
            total_predictions += snapshot.prediction_count;
        }
        RegistryStats {
            active_connections: connections.len(),
            total_predictions,
            connections_opened: self.opened_total.load(Ordering::Relaxed),
            average_fps,
            drops,
            connections,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::gate;
    use crate::PredictionResult;

    fn registry() -> SessionRegistry {
        SessionRegistry::new(ConnectionSettings::default(), 4)
    }

    #[test]
    fn open_close_lifecycle() {
        let registry = registry();
        let (id, session) = registry.open(0).unwrap();
        assert!(registry.contains(&id));
        assert_eq!(registry.len(), 1);

        let snapshot = registry.close(&id).unwrap();
        assert_eq!(snapshot.connection_id, id);
        assert!(!registry.contains(&id));
        assert!(!lock_session(&session).is_open());
        assert!(registry.close(&id).is_none());
    }

    #[test]
    fn capacity_is_enforced() {
        let registry = SessionRegistry::new(ConnectionSettings::default(), 1);
        registry.open(0).unwrap();
        assert_eq!(registry.open(0).unwrap_err(), SessionError::AtCapacity(1));
    }

    #[test]
    fn update_unknown_or_closed_connection() {
        let registry = registry();
        let update = SettingsUpdate {
            max_fps: Some(20),
            ..Default::default()
        };
        let missing = ConnectionId::from("nope");
        assert_eq!(
            registry.update_settings(&missing, &update),
            Err(SessionError::NotFound(missing.clone()))
        );

        let (id, _) = registry.open(0).unwrap();
        assert_eq!(registry.update_settings(&id, &update).unwrap().max_fps, 20);
        registry.close(&id);
        assert!(matches!(
            registry.update_settings(&id, &update),
            Err(SessionError::NotFound(_))
        ));
    }

    #[test]
    fn rejected_update_leaves_threshold() {
        let registry = registry();
        let (id, _) = registry.open(0).unwrap();
        let err = registry
            .update_settings(
                &id,
                &SettingsUpdate {
                    confidence_threshold: Some(1.5),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, SessionError::InvalidSettings(_)));
        let stats = registry.stats();
        assert_eq!(stats.connections[0].settings.confidence_threshold, 0.7);
    }

    #[test]
    fn stats_keep_predictions_of_closed_sessions() {
        let registry = registry();
        let (a, session_a) = registry.open(0).unwrap();
        let (_b, _) = registry.open(0).unwrap();
        {
            let mut s = lock_session(&session_a);
            assert!(gate::gate_emission(&mut s, &PredictionResult::new("A", 0.9, 1, 1)));
            assert!(gate::gate_emission(&mut s, &PredictionResult::new("A", 0.9, 1, 1)));
            assert!(!gate::gate_emission(&mut s, &PredictionResult::new("A", 0.1, 1, 1)));
        }
        let stats = registry.stats();
        assert_eq!(stats.active_connections, 2);
        assert_eq!(stats.total_predictions, 2);
        assert_eq!(stats.drops.below_threshold, 1);

        registry.close(&a);
        let stats = registry.stats();
        assert_eq!(stats.active_connections, 1);
        assert_eq!(stats.total_predictions, 2);
        assert_eq!(stats.connections_opened, 2);
        assert_eq!(stats.drops.below_threshold, 1);
    }

    #[test]
    fn idle_sessions_are_reaped() {
        let registry = registry();
        let (stale, _) = registry.open(0).unwrap();
        let (fresh, _) = registry.open(0).unwrap();
        assert!(registry.touch(&fresh, 9_000));
        let closed = registry.close_idle(10_000, Duration::from_secs(5));
        assert_eq!(closed, vec![stale.clone()]);
        assert!(!registry.contains(&stale));
        assert!(registry.contains(&fresh));
    }

    #[test]
    fn operator_update_is_pushed_to_the_connection() {
        let registry = registry();
        let (tx, rx) = std::sync::mpsc::channel::<ServerMessage>();
        let (id, _) = registry.open_with_sink(0, Arc::new(tx)).unwrap();
        let update = SettingsUpdate {
            max_fps: Some(20),
            ..Default::default()
        };
        assert_eq!(registry.push_settings(&id, &update).unwrap().max_fps, 20);
        match rx.try_recv().unwrap() {
            ServerMessage::SettingsUpdated { settings, .. } => assert_eq!(settings.max_fps, 20),
            other => panic!("unexpected {:?}", other),
        }

        // Rejected updates push nothing.
        let bad = SettingsUpdate {
            max_fps: Some(0),
            ..Default::default()
        };
        assert!(registry.push_settings(&id, &bad).is_err());
        assert!(rx.try_recv().is_err());

        // The sink goes away with the session.
        registry.close(&id);
        assert!(registry.push_settings(&id, &update).is_err());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn push_to_a_dropped_receiver_still_applies() {
        let registry = registry();
        let (tx, rx) = std::sync::mpsc::channel::<ServerMessage>();
        let (id, _) = registry.open_with_sink(0, Arc::new(tx)).unwrap();
        drop(rx);
        let update = SettingsUpdate {
            smoothing_enabled: Some(false),
            ..Default::default()
        };
        assert!(!registry.push_settings(&id, &update).unwrap().smoothing_enabled);
    }

    #[test]
    fn average_fps_over_active_connections() {
        let registry = registry();
        assert_eq!(registry.stats().average_fps, 0.0);
        let (a, _) = registry.open(0).unwrap();
        let (_b, _) = registry.open(0).unwrap();
        registry
            .update_settings(
                &a,
                &SettingsUpdate {
                    max_fps: Some(25),
                    ..Default::default()
                },
            )
            .unwrap();
        assert!((registry.stats().average_fps - 20.0).abs() < 1e-9);
        registry.close(&a);
        assert!((registry.stats().average_fps - 15.0).abs() < 1e-9);
    }

    #[test]
    fn poisoned_session_does_not_break_the_registry() {
        let registry = Arc::new(registry());
        let (id, session) = registry.open(0).unwrap();
        let panicked = std::thread::spawn(move || {
            let _held = session.lock().unwrap();
            panic!("connection thread died");
        })
        .join();
        assert!(panicked.is_err());

        assert_eq!(registry.stats().active_connections, 1);
        let update = SettingsUpdate {
            max_fps: Some(10),
            ..Default::default()
        };
        assert_eq!(registry.update_settings(&id, &update).unwrap().max_fps, 10);
        assert!(registry.close(&id).is_some());
    }
}
