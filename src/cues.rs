//! Haptic proximity cues for the focused peer.
//!
//! The scheduler does not own a timer. The caller polls it with the latest
//! frame and `now_ms`, and it answers with the vibration pattern to fire, if
//! any. Closer peers get longer pulses at a faster rate.

use serde::{Deserialize, Serialize};

use crate::types::DisplayFrame;

const MIN_CUE_DISTANCE_M: f64 = 0.5;
const MAX_CUE_DISTANCE_M: f64 = 150.0;
const DOUBLE_PULSE_WITHIN_M: f64 = 5.0;
const DOUBLE_PULSE_GAP_MS: u32 = 90;

/// Pulse/gap durations in ms, alternating, starting with a pulse.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CuePattern {
    pub pattern_ms: Vec<u32>,
    pub interval_ms: i64,
}

pub fn cue_for_distance(distance_m: f64) -> CuePattern {
    let d = distance_m.clamp(MIN_CUE_DISTANCE_M, MAX_CUE_DISTANCE_M);
    let pulse = if d <= 2.0 {
        65
    } else if d <= 5.0 {
        50
    } else {
        35
    };

    let interval_ms = match d {
        d if d > 100.0 => 2400,
        d if d > 50.0 => 1800,
        d if d > 25.0 => 1200,
        d if d > 10.0 => 700,
        d if d > 5.0 => 400,
        d if d > 2.0 => 230,
        _ => 130,
    };

    let pattern_ms = if d <= DOUBLE_PULSE_WITHIN_M {
        vec![pulse, DOUBLE_PULSE_GAP_MS, pulse]
    } else {
        vec![pulse]
    };
    CuePattern { pattern_ms, interval_ms }
}

#[derive(Clone, Debug, Default)]
pub struct CueScheduler {
    enabled: bool,
    focused: Option<String>,
    last_fired_ms: Option<i64>,
    fired: u64,
}

impl CueScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        if !enabled {
            self.last_fired_ms = None;
        }
    }

    /// Lock cues onto one peer, or clear the focus with `None`.
    pub fn focus(&mut self, peer_id: Option<String>) {
        if self.focused != peer_id {
            self.last_fired_ms = None;
        }
        self.focused = peer_id;
    }

    pub fn focused(&self) -> Option<&str> {
        self.focused.as_deref()
    }

    /// Pattern to fire now, if the interval for the current distance has elapsed.
    ///
    /// The first poll after focusing fires immediately.
    pub fn poll(&mut self, frame: &DisplayFrame, now_ms: i64) -> Option<CuePattern> {
        if !self.enabled {
            return None;
        }
        let peer = frame.peer(self.focused.as_deref()?)?;
        let cue = cue_for_distance(peer.distance_m);

        let due = self
            .last_fired_ms
            .map(|last| now_ms - last >= cue.interval_ms)
            .unwrap_or(true);
        if !due {
            return None;
        }
        self.last_fired_ms = Some(now_ms);
        self.fired += 1;
        Some(cue)
    }

    pub fn fired_count(&self) -> u64 {
        self.fired
    }
}
