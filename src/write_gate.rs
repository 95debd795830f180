//! Self-publish throttling.
//!
//! Every accepted self fix is offered here; only the ones worth the write go
//! upstream. A heartbeat bounds how stale our document can get for everyone
//! else, a motion trigger publishes real movement sooner.

use serde::{Deserialize, Serialize};

use crate::config::WriteGateConfig;
use crate::geo::haversine;
use crate::types::{LatLng, PublishRecord, RawFix};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishReason {
    First,
    Heartbeat,
    Moved,
    AccuracyImproved,
    Suppressed,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PublishDecision {
    pub reason: PublishReason,
    pub record: Option<PublishRecord>,
}

#[derive(Clone, Copy, Debug)]
struct Published {
    position: LatLng,
    accuracy_m: Option<f64>,
    at_ms: i64,
}

#[derive(Clone, Debug, Default)]
pub struct WriteGate {
    last: Option<Published>,
    published: u64,
    suppressed: u64,
}

impl WriteGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decide whether `fix` should be published at `now_ms`.
    ///
    /// Returns `None` for malformed fixes; they neither publish nor count.
    pub fn offer(&mut self, fix: &RawFix, now_ms: i64, cfg: &WriteGateConfig) -> Option<PublishDecision> {
        if !fix.is_valid() {
            return None;
        }
        let position = fix.position();
        let accuracy_m = fix.accuracy();

        let reason = match self.last {
            None => PublishReason::First,
            Some(last) => {
                let elapsed = now_ms - last.at_ms;
                let moved = haversine(last.position, position);
                let improved = match (last.accuracy_m, accuracy_m) {
                    (Some(before), Some(now)) => before - now > cfg.accuracy_improvement_m,
                    _ => false,
                };
                // Both time bounds are inclusive
                if elapsed >= cfg.heartbeat_ms {
                    PublishReason::Heartbeat
                } else if elapsed >= cfg.motion_min_ms && moved >= cfg.min_move_m {
                    PublishReason::Moved
                } else if elapsed >= cfg.motion_min_ms && improved {
                    PublishReason::AccuracyImproved
                } else {
                    PublishReason::Suppressed
                }
            }
        };

        if reason == PublishReason::Suppressed {
            self.suppressed += 1;
            return Some(PublishDecision { reason, record: None });
        }

        self.last = Some(Published {
            position,
            accuracy_m,
            at_ms: now_ms,
        });
        self.published += 1;
        log::debug!("publishing self fix ({:?})", reason);

        Some(PublishDecision {
            reason,
            record: Some(PublishRecord {
                lat: position.lat,
                lng: position.lng,
                accuracy_m,
                timestamp_ms: now_ms,
                expires_at_ms: now_ms + cfg.record_ttl_ms,
            }),
        })
    }

    pub fn published_count(&self) -> u64 {
        self.published
    }

    pub fn suppressed_count(&self) -> u64 {
        self.suppressed
    }

    pub fn last_published_at(&self) -> Option<i64> {
        self.last.map(|l| l.at_ms)
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fix(lat: f64, lng: f64, acc: Option<f64>) -> RawFix {
        RawFix {
            lat,
            lng,
            accuracy_m: acc,
            speed_mps: None,
            course_deg: None,
            captured_at_ms: 0,
        }
    }

    fn reason(gate: &mut WriteGate, f: &RawFix, now: i64) -> PublishReason {
        gate.offer(f, now, &WriteGateConfig::default()).unwrap().reason
    }

    #[test]
    fn test_first_fix_publishes() {
        let mut gate = WriteGate::new();
        let d = gate.offer(&fix(1.0, 2.0, Some(8.0)), 1_000, &WriteGateConfig::default()).unwrap();
        assert_eq!(d.reason, PublishReason::First);
        let rec = d.record.unwrap();
        assert_eq!(rec.timestamp_ms, 1_000);
        assert_eq!(rec.expires_at_ms, 1_000 + 12 * 60 * 60 * 1000);
        assert_eq!(rec.accuracy_m, Some(8.0));
    }

    #[test]
    fn test_stationary_suppressed_until_heartbeat() {
        let mut gate = WriteGate::new();
        let here = fix(0.0, 0.0, Some(10.0));
        reason(&mut gate, &here, 0);
        assert_eq!(reason(&mut gate, &here, 3_000), PublishReason::Suppressed);
        assert_eq!(reason(&mut gate, &here, 14_999), PublishReason::Suppressed);
        assert_eq!(reason(&mut gate, &here, 15_000), PublishReason::Heartbeat);
        assert_eq!(gate.suppressed_count(), 2);
        assert_eq!(gate.published_count(), 2);
    }

    #[test]
    fn test_motion_trigger_needs_min_interval() {
        let mut gate = WriteGate::new();
        reason(&mut gate, &fix(0.0, 0.0, Some(10.0)), 0);
        // ~5.5 m north
        let moved = fix(0.00005, 0.0, Some(10.0));
        assert_eq!(reason(&mut gate, &moved, 1_000), PublishReason::Suppressed);
        assert_eq!(reason(&mut gate, &moved, 2_500), PublishReason::Moved);
    }

    #[test]
    fn test_small_move_suppressed() {
        let mut gate = WriteGate::new();
        reason(&mut gate, &fix(0.0, 0.0, Some(10.0)), 0);
        // ~1.1 m
        assert_eq!(
            reason(&mut gate, &fix(0.00001, 0.0, Some(10.0)), 5_000),
            PublishReason::Suppressed
        );
    }

    #[test]
    fn test_accuracy_improvement_triggers() {
        let mut gate = WriteGate::new();
        reason(&mut gate, &fix(0.0, 0.0, Some(30.0)), 0);
        assert_eq!(
            reason(&mut gate, &fix(0.0, 0.0, Some(26.0)), 3_000),
            PublishReason::Suppressed
        );
        assert_eq!(
            reason(&mut gate, &fix(0.0, 0.0, Some(20.0)), 3_000),
            PublishReason::AccuracyImproved
        );
    }

    #[test]
    fn test_unknown_accuracy_is_not_improvement() {
        let mut gate = WriteGate::new();
        reason(&mut gate, &fix(0.0, 0.0, None), 0);
        assert_eq!(reason(&mut gate, &fix(0.0, 0.0, Some(3.0)), 3_000), PublishReason::Suppressed);
    }

    #[test]
    fn test_malformed_fix_ignored() {
        let mut gate = WriteGate::new();
        assert!(gate.offer(&fix(f64::NAN, 0.0, None), 0, &WriteGateConfig::default()).is_none());
        assert_eq!(gate.last_published_at(), None);
    }
}
