//! Tunable constants for every filter stage.
//!
//! Each section deserializes with `#[serde(default)]`, so a JSON file only has
//! to name the keys it wants to override.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{FusionError, Result};

// ─── Sections ────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PositionConfig {
    /// EMA alpha for the local device's own position.
    pub self_alpha: f64,
    /// EMA alpha for peers (their data already arrives at a lower rate).
    pub peer_alpha: f64,
    /// Jumps larger than this reset the smoother instead of blending (meters).
    pub jump_reset_m: f64,
}

impl Default for PositionConfig {
    fn default() -> Self {
        Self {
            self_alpha: 0.25,
            peer_alpha: 0.35,
            jump_reset_m: 100.0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutlierConfig {
    pub max_fresh_accuracy_m: f64,
    pub accuracy_gate_fresh_ms: i64,
    pub max_fresh_jump_m: f64,
    pub jump_gate_fresh_ms: i64,
    /// Peer accuracy below which the smoothed position becomes the new anchor.
    pub good_accuracy_m: f64,
    /// Samples older than this refresh the anchor regardless of accuracy.
    pub stale_after_ms: i64,
    /// Accuracy assumed for the anchor rule when a peer reports none.
    pub assumed_accuracy_m: f64,
}

impl Default for OutlierConfig {
    fn default() -> Self {
        Self {
            max_fresh_accuracy_m: 120.0,
            accuracy_gate_fresh_ms: 8_000,
            max_fresh_jump_m: 60.0,
            jump_gate_fresh_ms: 6_000,
            good_accuracy_m: 80.0,
            stale_after_ms: 10_000,
            assumed_accuracy_m: 50.0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DistanceConfig {
    /// Fraction of the combined accuracy bubble subtracted from the raw distance.
    pub accuracy_subtract_k: f64,
    pub default_accuracy_m: f64,
    pub median_window: usize,
    pub still_alpha: f64,
    pub moving_alpha: f64,
    /// Local speed under which the device counts as stationary (m/s).
    pub stationary_speed_mps: f64,
}

impl Default for DistanceConfig {
    fn default() -> Self {
        Self {
            accuracy_subtract_k: 0.2,
            default_accuracy_m: 20.0,
            median_window: 3,
            still_alpha: 0.45,
            moving_alpha: 0.65,
            stationary_speed_mps: 0.5,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeadingConfig {
    pub buffer_len: usize,
    pub min_samples: usize,
    /// Circular variance (0 stable .. 1 noisy) below which the compass is trusted.
    pub variance_stable: f64,
    pub course_min_speed_mps: f64,
    pub hint_after_ms: i64,
}

impl Default for HeadingConfig {
    fn default() -> Self {
        Self {
            buffer_len: 12,
            min_samples: 6,
            variance_stable: 0.12,
            course_min_speed_mps: 0.3,
            hint_after_ms: 1_500,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AngleConfig {
    pub alpha: f64,
    pub deadband_deg: f64,
    pub max_step_deg: f64,
    pub fast_speed_mps: f64,
    pub fast_deadband_delta_deg: f64,
    pub fast_step_delta_deg: f64,
    pub fast_alpha_delta: f64,
    pub min_deadband_deg: f64,
    pub min_step_deg: f64,
}

impl Default for AngleConfig {
    fn default() -> Self {
        Self {
            alpha: 0.55,
            deadband_deg: 6.0,
            max_step_deg: 5.0,
            fast_speed_mps: 1.0,
            fast_deadband_delta_deg: 2.0,
            fast_step_delta_deg: 2.0,
            fast_alpha_delta: 0.1,
            min_deadband_deg: 2.0,
            min_step_deg: 4.0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WriteGateConfig {
    pub heartbeat_ms: i64,
    pub motion_min_ms: i64,
    pub min_move_m: f64,
    pub accuracy_improvement_m: f64,
    /// Lifetime of a published document before the transport may expire it.
    pub record_ttl_ms: i64,
}

impl Default for WriteGateConfig {
    fn default() -> Self {
        Self {
            heartbeat_ms: 15_000,
            motion_min_ms: 2_500,
            min_move_m: 3.0,
            accuracy_improvement_m: 5.0,
            record_ttl_ms: 12 * 60 * 60 * 1000,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StalenessConfig {
    pub fresh_below_ms: i64,
    pub aging_below_ms: i64,
    pub hide_after_ms: i64,
    /// How long a hidden peer's filter state is kept before it is discarded.
    pub state_retention_ms: i64,
}

impl Default for StalenessConfig {
    fn default() -> Self {
        Self {
            fresh_below_ms: 30_000,
            aging_below_ms: 120_000,
            hide_after_ms: 300_000,
            state_retention_ms: 60_000,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// No self fix for this long marks the location sampler silent.
    pub geo_silence_ms: i64,
    /// Newest compass sample older than this means the compass is unavailable.
    pub heading_silence_ms: i64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            geo_silence_ms: 30_000,
            heading_silence_ms: 3_000,
        }
    }
}

// ─── Top level ───────────────────────────────────────────────────────────────

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    pub position: PositionConfig,
    pub outlier: OutlierConfig,
    pub distance: DistanceConfig,
    pub heading: HeadingConfig,
    pub angle: AngleConfig,
    pub write_gate: WriteGateConfig,
    pub staleness: StalenessConfig,
    pub health: HealthConfig,
}

impl FusionConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let cfg: FusionConfig = serde_json::from_str(json)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        check_alpha("position.self_alpha", self.position.self_alpha)?;
        check_alpha("position.peer_alpha", self.position.peer_alpha)?;
        check_alpha("distance.still_alpha", self.distance.still_alpha)?;
        check_alpha("distance.moving_alpha", self.distance.moving_alpha)?;
        check_alpha("angle.alpha", self.angle.alpha)?;
        check_alpha("angle.alpha (fast)", self.angle.alpha + self.angle.fast_alpha_delta)?;

        let non_negative = [
            ("position.jump_reset_m", self.position.jump_reset_m),
            ("outlier.max_fresh_accuracy_m", self.outlier.max_fresh_accuracy_m),
            ("outlier.max_fresh_jump_m", self.outlier.max_fresh_jump_m),
            ("outlier.good_accuracy_m", self.outlier.good_accuracy_m),
            ("distance.accuracy_subtract_k", self.distance.accuracy_subtract_k),
            ("distance.default_accuracy_m", self.distance.default_accuracy_m),
            ("distance.stationary_speed_mps", self.distance.stationary_speed_mps),
            ("heading.variance_stable", self.heading.variance_stable),
            ("heading.course_min_speed_mps", self.heading.course_min_speed_mps),
            ("angle.deadband_deg", self.angle.deadband_deg),
            ("angle.max_step_deg", self.angle.max_step_deg),
            ("write_gate.min_move_m", self.write_gate.min_move_m),
            ("write_gate.accuracy_improvement_m", self.write_gate.accuracy_improvement_m),
        ];
        for (name, value) in non_negative {
            if !value.is_finite() || value < 0.0 {
                return Err(FusionError::InvalidConfig(format!(
                    "{name} must be a non-negative number, got {value}"
                )));
            }
        }

        if self.distance.median_window == 0 {
            return Err(FusionError::InvalidConfig(
                "distance.median_window must be at least 1".to_string(),
            ));
        }
        if self.heading.buffer_len == 0 || self.heading.min_samples > self.heading.buffer_len {
            return Err(FusionError::InvalidConfig(format!(
                "heading.min_samples ({}) must fit in heading.buffer_len ({})",
                self.heading.min_samples, self.heading.buffer_len
            )));
        }

        let s = &self.staleness;
        if !(0 < s.fresh_below_ms && s.fresh_below_ms < s.aging_below_ms && s.aging_below_ms < s.hide_after_ms) {
            return Err(FusionError::InvalidConfig(format!(
                "staleness thresholds must be strictly increasing, got {} / {} / {}",
                s.fresh_below_ms, s.aging_below_ms, s.hide_after_ms
            )));
        }
        if self.write_gate.motion_min_ms > self.write_gate.heartbeat_ms {
            return Err(FusionError::InvalidConfig(
                "write_gate.motion_min_ms must not exceed write_gate.heartbeat_ms".to_string(),
            ));
        }
        Ok(())
    }
}

fn check_alpha(name: &str, value: f64) -> Result<()> {
    if value.is_finite() && value > 0.0 && value <= 1.0 {
        Ok(())
    } else {
        Err(FusionError::InvalidConfig(format!(
            "{name} must be in (0, 1], got {value}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        FusionConfig::default().validate().unwrap();
    }

    #[test]
    fn test_partial_json_overrides() {
        let cfg = FusionConfig::from_json_str(
            r#"{ "distance": { "accuracy_subtract_k": 0.5 }, "angle": { "deadband_deg": 4.0 } }"#,
        )
        .unwrap();
        assert_eq!(cfg.distance.accuracy_subtract_k, 0.5);
        assert_eq!(cfg.distance.median_window, 3);
        assert_eq!(cfg.angle.deadband_deg, 4.0);
        assert_eq!(cfg.position, PositionConfig::default());
    }

    #[test]
    fn test_rejects_bad_alpha() {
        let err = FusionConfig::from_json_str(r#"{ "position": { "self_alpha": 0.0 } }"#).unwrap_err();
        assert!(matches!(err, FusionError::InvalidConfig(_)));
    }

    #[test]
    fn test_rejects_unordered_staleness() {
        let mut cfg = FusionConfig::default();
        cfg.staleness.aging_below_ms = cfg.staleness.hide_after_ms;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_rejects_empty_median_window() {
        let mut cfg = FusionConfig::default();
        cfg.distance.median_window = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_malformed_json_is_parse_error() {
        let err = FusionConfig::from_json_str("{ not json").unwrap_err();
        assert!(matches!(err, FusionError::Parse(_)));
    }
}
