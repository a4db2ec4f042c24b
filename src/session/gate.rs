//! Admission and emission gates.
//!
//! Inbound frames pass two independent throttles before any extraction runs:
//! 1. Rate: at least `1000 / max_fps` ms since the last admitted frame
//! 2. Interval: `frame_number % prediction_interval == 0`
//!
//! The interval check only runs once the rate check passes, and a frame dropped
//! by the interval check still counts as seen for the rate gate.

use serde::Serialize;

use super::connection::ConnectionSession;
use crate::PredictionResult;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Admission {
    Admitted,
    RateLimited,
    OffInterval,
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admitted)
    }
}

pub fn admit_frame(session: &mut ConnectionSession, frame_number: u64, now_ms: u64) -> Admission {
    session.frames_received += 1;
    let min_interval = session.settings().min_frame_interval_ms();
    let elapsed = now_ms.saturating_sub(session.last_seen_ms) as f64;
    if elapsed < min_interval {
        session.drops.rate_limited += 1;
        return Admission::RateLimited;
    }
    session.last_seen_ms = now_ms;

    let interval = u64::from(session.settings().prediction_interval.max(1));
    if frame_number % interval != 0 {
        session.drops.off_interval += 1;
        return Admission::OffInterval;
    }
    Admission::Admitted
}

/// Returns true and counts the prediction when it clears the session threshold.
pub fn gate_emission(session: &mut ConnectionSession, result: &PredictionResult) -> bool {
    if result.confidence >= session.settings().confidence_threshold {
        session.prediction_count += 1;
        true
    } else {
        session.drops.below_threshold += 1;
        false
    }
}
