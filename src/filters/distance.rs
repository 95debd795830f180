//! Display distance between two smoothed positions.
//!
//! Pipeline per sample:
//!   raw haversine → subtract k·σ of the combined accuracy bubble → median of
//!   the last few corrected samples → EMA whose alpha depends on whether the
//!   local device is moving.

use crate::config::DistanceConfig;
use crate::geo::haversine;
use crate::smoothing::{ema, MedianWindow};
use crate::types::LatLng;

/// Combined 1σ uncertainty of two independent fixes.
pub fn combined_sigma(my_accuracy_m: Option<f64>, their_accuracy_m: Option<f64>, default_m: f64) -> f64 {
    let mine = my_accuracy_m.unwrap_or(default_m);
    let theirs = their_accuracy_m.unwrap_or(default_m);
    mine.hypot(theirs)
}

/// Raw distance with part of the accuracy bubble removed, floored at zero.
pub fn bias_corrected(raw_m: f64, sigma_m: f64, k: f64) -> f64 {
    (raw_m - k * sigma_m).max(0.0)
}

/// Intermediate values of one estimator step, kept for diagnostics.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DistanceSample {
    pub raw_m: f64,
    pub corrected_m: f64,
    pub median_m: f64,
    pub smoothed_m: f64,
}

/// Per-peer distance filter state.
#[derive(Clone, Debug)]
pub struct DistanceEstimator {
    window: MedianWindow,
    smoothed: Option<f64>,
}

impl DistanceEstimator {
    pub fn new(cfg: &DistanceConfig) -> Self {
        Self {
            window: MedianWindow::new(cfg.median_window),
            smoothed: None,
        }
    }

    /// Feed one pair of smoothed positions.
    ///
    /// `self_speed_mps` picks the EMA alpha: calm when the local device is
    /// still, responsive when it moves.
    pub fn update(
        &mut self,
        me: LatLng,
        them: LatLng,
        my_accuracy_m: Option<f64>,
        their_accuracy_m: Option<f64>,
        self_speed_mps: f64,
        cfg: &DistanceConfig,
    ) -> DistanceSample {
        let raw_m = haversine(me, them);
        let sigma = combined_sigma(my_accuracy_m, their_accuracy_m, cfg.default_accuracy_m);
        let corrected_m = bias_corrected(raw_m, sigma, cfg.accuracy_subtract_k);
        let median_m = self.window.push(corrected_m);

        let alpha = if self_speed_mps < cfg.stationary_speed_mps {
            cfg.still_alpha
        } else {
            cfg.moving_alpha
        };
        let smoothed_m = ema(self.smoothed, median_m, alpha).max(0.0);
        self.smoothed = Some(smoothed_m);

        DistanceSample {
            raw_m,
            corrected_m,
            median_m,
            smoothed_m,
        }
    }

    pub fn smoothed(&self) -> Option<f64> {
        self.smoothed
    }

    pub fn window(&self) -> &MedianWindow {
        &self.window
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn p(lat: f64, lng: f64) -> LatLng {
        LatLng::new(lat, lng)
    }

    #[test]
    fn test_corrected_distance_hundred_meters_east() {
        let cfg = DistanceConfig::default();
        let mut est = DistanceEstimator::new(&cfg);
        let s = est.update(p(0.0, 0.0), p(0.0, 0.0009), Some(10.0), Some(10.0), 0.0, &cfg);
        assert_abs_diff_eq!(s.raw_m, 100.08, epsilon = 0.05);
        // k = 0.2, sigma = sqrt(200)
        assert_abs_diff_eq!(s.corrected_m, 100.08 - 0.2 * 200f64.sqrt(), epsilon = 0.05);
        assert!(s.smoothed_m > 94.0 && s.smoothed_m < 98.0);
    }

    #[test]
    fn test_missing_accuracy_uses_default() {
        assert_abs_diff_eq!(combined_sigma(None, None, 20.0), 800f64.sqrt(), epsilon = 1e-12);
        assert_abs_diff_eq!(combined_sigma(Some(3.0), Some(4.0), 20.0), 5.0, epsilon = 1e-12);
    }

    #[test]
    fn test_never_negative() {
        let cfg = DistanceConfig {
            accuracy_subtract_k: 0.6,
            ..DistanceConfig::default()
        };
        let mut est = DistanceEstimator::new(&cfg);
        let here = p(51.5, -0.12);
        let offsets = [0.0, 0.00001, 0.00003, 0.0, 0.00002];
        for (i, off) in offsets.iter().enumerate() {
            let s = est.update(here, p(51.5 + off, -0.12), Some(30.0), Some(80.0), i as f64, &cfg);
            assert!(s.corrected_m >= 0.0);
            assert!(s.smoothed_m >= 0.0);
        }
        assert_eq!(est.smoothed(), Some(0.0));
    }

    #[test]
    fn test_single_spike_is_absorbed() {
        let cfg = DistanceConfig {
            accuracy_subtract_k: 0.0,
            ..DistanceConfig::default()
        };
        let mut est = DistanceEstimator::new(&cfg);
        let me = p(0.0, 0.0);
        let steady = p(0.0, 0.0003); // ~33 m
        est.update(me, steady, Some(5.0), Some(5.0), 0.0, &cfg);
        let before = est.update(me, steady, Some(5.0), Some(5.0), 0.0, &cfg).smoothed_m;
        let spike = est.update(me, p(0.0, 0.003), Some(5.0), Some(5.0), 0.0, &cfg);
        assert!(spike.raw_m > 300.0);
        assert_abs_diff_eq!(spike.median_m, before, epsilon = 1e-9);
        assert_abs_diff_eq!(spike.smoothed_m, before, epsilon = 1e-9);
    }

    #[test]
    fn test_moving_alpha_tracks_faster() {
        let cfg = DistanceConfig {
            accuracy_subtract_k: 0.0,
            median_window: 1,
            ..DistanceConfig::default()
        };
        let me = p(0.0, 0.0);
        let start = p(0.0, 0.0009);
        let closer = p(0.0, 0.00045);

        let mut still = DistanceEstimator::new(&cfg);
        still.update(me, start, None, None, 0.0, &cfg);
        let still_d = still.update(me, closer, None, None, 0.0, &cfg).smoothed_m;

        let mut moving = DistanceEstimator::new(&cfg);
        moving.update(me, start, None, None, 2.0, &cfg);
        let moving_d = moving.update(me, closer, None, None, 2.0, &cfg).smoothed_m;

        assert!(moving_d < still_d);
    }
}
