//! Lat/lng smoothing and the peer outlier gate that runs in front of it.

use serde::{Deserialize, Serialize};

use crate::config::{OutlierConfig, PositionConfig};
use crate::geo::haversine;
use crate::types::LatLng;

/// Exponential smoothing with a hard reset across implausible jumps.
///
/// Cold start and jumps beyond `jump_reset_m` return `next` unchanged; otherwise
/// lat and lng are blended independently.
pub fn smooth(prev: Option<LatLng>, next: LatLng, alpha: f64, jump_reset_m: f64) -> LatLng {
    let Some(prev) = prev else {
        return next;
    };
    if haversine(prev, next) > jump_reset_m {
        return next;
    }
    LatLng {
        lat: prev.lat + alpha * (next.lat - prev.lat),
        lng: prev.lng + alpha * (next.lng - prev.lng),
    }
}

/// One smoothed subject (self, or a single peer).
#[derive(Clone, Debug)]
pub struct PositionSmoother {
    alpha: f64,
    jump_reset_m: f64,
    state: Option<LatLng>,
}

impl PositionSmoother {
    pub fn new(alpha: f64, jump_reset_m: f64) -> Self {
        Self {
            alpha,
            jump_reset_m,
            state: None,
        }
    }

    pub fn for_self(cfg: &PositionConfig) -> Self {
        Self::new(cfg.self_alpha, cfg.jump_reset_m)
    }

    pub fn for_peer(cfg: &PositionConfig) -> Self {
        Self::new(cfg.peer_alpha, cfg.jump_reset_m)
    }

    pub fn update(&mut self, next: LatLng) -> LatLng {
        let smoothed = smooth(self.state, next, self.alpha, self.jump_reset_m);
        self.state = Some(smoothed);
        smoothed
    }

    pub fn position(&self) -> Option<LatLng> {
        self.state
    }

    pub fn reset(&mut self) {
        self.state = None;
    }
}

/// Position anchor that survives bad samples.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LastGood {
    pub position: LatLng,
    pub observed_at_ms: i64,
}

/// Why the gate replaced a raw peer sample with the last-good anchor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Substitution {
    /// Fresh sample with poor reported accuracy.
    PoorAccuracy,
    /// Fresh sample too far from the anchor.
    Jump,
}

/// Result of running a raw peer position through the gate.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GateOutcome {
    pub position: LatLng,
    pub substitution: Option<Substitution>,
}

/// Accuracy gate followed by jump gate.
///
/// Both gates only fire for fresh samples and only when an anchor exists; a
/// peer with no anchor yet always passes through.
pub fn gate(
    raw: LatLng,
    accuracy_m: Option<f64>,
    age_ms: i64,
    last_good: Option<&LastGood>,
    cfg: &OutlierConfig,
) -> GateOutcome {
    let mut outcome = GateOutcome {
        position: raw,
        substitution: None,
    };
    let Some(anchor) = last_good else {
        return outcome;
    };

    if let Some(acc) = accuracy_m {
        if acc > cfg.max_fresh_accuracy_m && age_ms < cfg.accuracy_gate_fresh_ms {
            outcome.position = anchor.position;
            outcome.substitution = Some(Substitution::PoorAccuracy);
        }
    }

    // Measured against the possibly-substituted position, so a substituted sample never trips it.
    if haversine(anchor.position, outcome.position) > cfg.max_fresh_jump_m
        && age_ms < cfg.jump_gate_fresh_ms
    {
        outcome.position = anchor.position;
        outcome.substitution = Some(Substitution::Jump);
    }
    outcome
}

/// Whether a freshly smoothed peer position may become the new anchor.
///
/// Accepts when the peer's own accuracy is good or the sample is stale; a
/// fresh-but-dubious reading keeps the previous anchor.
pub fn qualifies_as_last_good(accuracy_m: Option<f64>, age_ms: i64, cfg: &OutlierConfig) -> bool {
    let acc = accuracy_m.unwrap_or(cfg.assumed_accuracy_m);
    acc < cfg.good_accuracy_m || age_ms > cfg.stale_after_ms
}
