use serde::{Deserialize, Serialize};

use super::error::SessionError;

pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.7;
pub const DEFAULT_PREDICTION_INTERVAL: u32 = 5;
pub const DEFAULT_MAX_FPS: u32 = 15;

pub const MIN_CONFIDENCE_THRESHOLD: f32 = 0.1;
pub const MAX_CONFIDENCE_THRESHOLD: f32 = 1.0;
pub const MIN_PREDICTION_INTERVAL: u32 = 1;
pub const MAX_PREDICTION_INTERVAL: u32 = 30;
pub const MIN_FPS: u32 = 1;
pub const MAX_FPS: u32 = 30;

/// Per-connection tuning, mutable at runtime.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConnectionSettings {
    pub confidence_threshold: f32,
    /// Process every N-th frame by sender frame number.
    pub prediction_interval: u32,
    pub smoothing_enabled: bool,
    pub max_fps: u32,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            prediction_interval: DEFAULT_PREDICTION_INTERVAL,
            smoothing_enabled: true,
            max_fps: DEFAULT_MAX_FPS,
        }
    }
}

impl ConnectionSettings {
    /// Minimum spacing between admitted frames, in milliseconds.
    pub fn min_frame_interval_ms(&self) -> f64 {
        1000.0 / self.max_fps as f64
    }

    pub fn validate(&self) -> Result<(), SessionError> {
        check_threshold(self.confidence_threshold)?;
        check_interval(self.prediction_interval)?;
        check_fps(self.max_fps)?;
        Ok(())
    }

    /// Settings with `update` applied. Nothing is applied unless every field is valid.
    pub fn apply(&self, update: &SettingsUpdate) -> Result<ConnectionSettings, SessionError> {
        update.validate()?;
        let mut next = self.clone();
        if let Some(threshold) = update.confidence_threshold {
            next.confidence_threshold = threshold;
        }
        if let Some(interval) = update.prediction_interval {
            next.prediction_interval = interval;
        }
        if let Some(smoothing) = update.smoothing_enabled {
            next.smoothing_enabled = smoothing;
        }
        if let Some(fps) = update.max_fps {
            next.max_fps = fps;
        }
        Ok(next)
    }
}

/// Partial settings update. Absent fields keep their current value.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SettingsUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence_threshold: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prediction_interval: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub smoothing_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_fps: Option<u32>,
}

impl SettingsUpdate {
    pub fn is_empty(&self) -> bool {
        self.confidence_threshold.is_none()
            && self.prediction_interval.is_none()
            && self.smoothing_enabled.is_none()
            && self.max_fps.is_none()
    }

    pub fn validate(&self) -> Result<(), SessionError> {
        if self.is_empty() {
            return Err(SessionError::EmptyUpdate);
        }
        if let Some(threshold) = self.confidence_threshold {
            check_threshold(threshold)?;
        }
        if let Some(interval) = self.prediction_interval {
            check_interval(interval)?;
        }
        if let Some(fps) = self.max_fps {
            check_fps(fps)?;
        }
        Ok(())
    }
}

fn check_threshold(value: f32) -> Result<(), SessionError> {
    if !value.is_finite() || !(MIN_CONFIDENCE_THRESHOLD..=MAX_CONFIDENCE_THRESHOLD).contains(&value)
    {
        return Err(SessionError::InvalidSettings(format!(
            "confidence_threshold must be between {} and {}, got {}",
            MIN_CONFIDENCE_THRESHOLD, MAX_CONFIDENCE_THRESHOLD, value
        )));
    }
    Ok(())
}

fn check_interval(value: u32) -> Result<(), SessionError> {
    if !(MIN_PREDICTION_INTERVAL..=MAX_PREDICTION_INTERVAL).contains(&value) {
        return Err(SessionError::InvalidSettings(format!(
            "prediction_interval must be between {} and {} frames, got {}",
            MIN_PREDICTION_INTERVAL, MAX_PREDICTION_INTERVAL, value
        )));
    }
    Ok(())
}

fn check_fps(value: u32) -> Result<(), SessionError> {
    if !(MIN_FPS..=MAX_FPS).contains(&value) {
        return Err(SessionError::InvalidSettings(format!(
            "max_fps must be between {} and {}, got {}",
            MIN_FPS, MAX_FPS, value
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let settings = ConnectionSettings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.confidence_threshold, 0.7);
        assert_eq!(settings.prediction_interval, 5);
        assert!(settings.smoothing_enabled);
        assert_eq!(settings.max_fps, 15);
    }

    #[test]
    fn apply_merges_present_fields() {
        let settings = ConnectionSettings::default();
        let next = settings
            .apply(&SettingsUpdate {
                max_fps: Some(30),
                smoothing_enabled: Some(false),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(next.max_fps, 30);
        assert!(!next.smoothing_enabled);
        assert_eq!(next.confidence_threshold, settings.confidence_threshold);
        assert_eq!(next.prediction_interval, settings.prediction_interval);
    }

    #[test]
    fn out_of_range_threshold_is_rejected() {
        let settings = ConnectionSettings::default();
        let err = settings
            .apply(&SettingsUpdate {
                confidence_threshold: Some(1.5),
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(err, SessionError::InvalidSettings(ref msg) if msg.contains("confidence_threshold")));
    }

    #[test]
    fn one_bad_field_rejects_whole_update() {
        let settings = ConnectionSettings::default();
        let result = settings.apply(&SettingsUpdate {
            confidence_threshold: Some(0.9),
            max_fps: Some(60),
            ..Default::default()
        });
        assert!(result.is_err());
        assert_eq!(settings.confidence_threshold, 0.7);
    }

    #[test]
    fn range_edges() {
        let ok = SettingsUpdate {
            confidence_threshold: Some(0.1),
            prediction_interval: Some(30),
            max_fps: Some(1),
            smoothing_enabled: None,
        };
        assert!(ok.validate().is_ok());

        for bad in [
            SettingsUpdate {
                confidence_threshold: Some(0.09),
                ..Default::default()
            },
            SettingsUpdate {
                prediction_interval: Some(0),
                ..Default::default()
            },
            SettingsUpdate {
                prediction_interval: Some(31),
                ..Default::default()
            },
            SettingsUpdate {
                max_fps: Some(0),
                ..Default::default()
            },
        ] {
            assert!(bad.validate().is_err(), "{:?} should be rejected", bad);
        }
    }

    #[test]
    fn empty_update_is_rejected() {
        assert_eq!(
            SettingsUpdate::default().validate(),
            Err(SessionError::EmptyUpdate)
        );
    }

    #[test]
    fn unknown_fields_fail_to_parse() {
        let parsed: Result<SettingsUpdate, _> = serde_json::from_str(r#"{"max_fpz": 10}"#);
        assert!(parsed.is_err());
        let parsed: SettingsUpdate = serde_json::from_str(r#"{"max_fps": 10}"#).unwrap();
        assert_eq!(parsed.max_fps, Some(10));
    }

    #[test]
    fn min_frame_interval() {
        let settings = ConnectionSettings {
            max_fps: 20,
            ..Default::default()
        };
        assert_eq!(settings.min_frame_interval_ms(), 50.0);
    }
}
