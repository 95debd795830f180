use crate::config::AngleConfig;
use crate::geo::{angle_delta, wrap_360};

/// Parameters for one angle smoothing step.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AngleParams {
    pub alpha: f64,
    pub deadband_deg: f64,
    pub max_step_deg: f64,
}

impl AngleParams {
    /// Calmer values while still, wider and quicker ones while moving fast.
    pub fn for_speed(speed_mps: f64, cfg: &AngleConfig) -> Self {
        let fast = speed_mps > cfg.fast_speed_mps;
        let (deadband, step, alpha) = if fast {
            (
                cfg.deadband_deg + cfg.fast_deadband_delta_deg,
                cfg.max_step_deg + cfg.fast_step_delta_deg,
                cfg.alpha + cfg.fast_alpha_delta,
            )
        } else {
            (cfg.deadband_deg, cfg.max_step_deg, cfg.alpha)
        };
        Self {
            alpha: alpha.min(1.0),
            deadband_deg: deadband.max(cfg.min_deadband_deg),
            max_step_deg: step.max(cfg.min_step_deg),
        }
    }
}

/// Deadband + slew-limited angle smoothing on the circle.
///
/// Deltas under the deadband return `prev` untouched; larger ones move by at
/// most `max_step_deg`, scaled by `alpha`.
pub fn smooth_angle(prev: Option<f64>, target: f64, alpha: f64, deadband_deg: f64, max_step_deg: f64) -> f64 {
    let Some(prev) = prev else {
        return wrap_360(target);
    };
    let d = angle_delta(prev, target);
    if d.abs() < deadband_deg {
        return prev;
    }
    let step = d.signum() * d.abs().min(max_step_deg);
    wrap_360(prev + alpha * step)
}

/// Screen rotation for one peer.
#[derive(Clone, Debug, Default)]
pub struct AngleSmoother {
    smoothed: Option<f64>,
}

impl AngleSmoother {
    pub fn new() -> Self {
        Self::default()
    }

    /// Step toward `target`, or hold the last output when `target` is `None`.
    pub fn update(&mut self, target: Option<f64>, params: AngleParams) -> Option<f64> {
        if let Some(target) = target {
            self.smoothed = Some(smooth_angle(
                self.smoothed,
                target,
                params.alpha,
                params.deadband_deg,
                params.max_step_deg,
            ));
        }
        self.smoothed
    }

    pub fn value(&self) -> Option<f64> {
        self.smoothed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_cold_start_returns_target() {
        assert_eq!(smooth_angle(None, 123.0, 0.5, 6.0, 5.0), 123.0);
        assert_eq!(smooth_angle(None, 370.0, 0.5, 6.0, 5.0), 10.0);
    }

    #[test]
    fn test_deadband_holds() {
        assert_eq!(smooth_angle(Some(170.0), 172.0, 0.55, 6.0, 5.0), 170.0);
        // Across the wrap: 358 -> 2 is a 4 degree move
        assert_eq!(smooth_angle(Some(358.0), 2.0, 0.55, 6.0, 5.0), 358.0);
    }

    #[test]
    fn test_slew_limit_caps_rate() {
        let out = smooth_angle(Some(0.0), 90.0, 1.0, 0.0, 5.0);
        assert_abs_diff_eq!(out, 5.0, epsilon = 1e-12);
    }

    #[test]
    fn test_shortest_path_across_north() {
        // 350 -> 20 goes clockwise through 0
        let out = smooth_angle(Some(350.0), 20.0, 1.0, 0.0, 15.0);
        assert_abs_diff_eq!(out, 5.0, epsilon = 1e-9);
        let out = smooth_angle(Some(10.0), 300.0, 1.0, 0.0, 15.0);
        assert_abs_diff_eq!(out, 355.0, epsilon = 1e-9);
    }

    #[test]
    fn test_blend_uses_alpha() {
        let out = smooth_angle(Some(100.0), 110.0, 0.5, 0.0, 20.0);
        assert_abs_diff_eq!(out, 105.0, epsilon = 1e-12);
    }

    #[test]
    fn test_params_adapt_to_speed() {
        let cfg = AngleConfig::default();
        let still = AngleParams::for_speed(0.2, &cfg);
        let fast = AngleParams::for_speed(1.5, &cfg);
        assert_eq!(still.deadband_deg, 6.0);
        assert_eq!(still.max_step_deg, 5.0);
        assert!(fast.deadband_deg > still.deadband_deg);
        assert!(fast.max_step_deg > still.max_step_deg);
        assert!(fast.alpha > still.alpha);
    }

    #[test]
    fn test_params_floors() {
        let cfg = AngleConfig {
            deadband_deg: 0.5,
            max_step_deg: 1.0,
            ..AngleConfig::default()
        };
        let p = AngleParams::for_speed(0.0, &cfg);
        assert_eq!(p.deadband_deg, 2.0);
        assert_eq!(p.max_step_deg, 4.0);
    }

    #[test]
    fn test_smoother_freezes_without_target() {
        let cfg = AngleConfig::default();
        let params = AngleParams::for_speed(0.0, &cfg);
        let mut s = AngleSmoother::new();
        assert_eq!(s.update(None, params), None);
        s.update(Some(40.0), params);
        let held = s.update(Some(80.0), params);
        for _ in 0..10 {
            assert_eq!(s.update(None, params), held);
        }
    }
}
