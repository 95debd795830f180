//! Sampler tasks that feed the fusion engine.
//!
//! Each sampler polls a `SampleSource` on a tokio interval and forwards what
//! it gets as `SensorEvent`s. Sends use `try_send`: a full channel drops the
//! sample, a closed channel ends the task.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::mpsc::Sender;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration};

use crate::geo::{angle_delta, offset_m, wrap_360};
use crate::types::{LatLng, PeerSet, PeerSnapshot, RawFix, RawHeading, SensorEvent};

// ─── Heading preprocessing ───────────────────────────────────────────────────

/// Reported compass accuracies above this are treated as interference.
pub const MAX_COMPASS_ACCURACY_DEG: f64 = 25.0;
pub const BAD_ACCURACY_COOLDOWN_MS: i64 = 1_500;
pub const ORIENTATION_LOW_PASS_ALPHA: f64 = 0.12;

/// One platform orientation callback, before it becomes a compass heading.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrientationReading {
    /// Device rotation around the z axis, counter-clockwise.
    #[serde(default)]
    pub alpha_deg: Option<f64>,
    /// Absolute compass heading, when the platform provides one.
    #[serde(default)]
    pub compass_heading_deg: Option<f64>,
    #[serde(default)]
    pub compass_accuracy_deg: Option<f64>,
    #[serde(default)]
    pub screen_angle_deg: f64,
    pub captured_at_ms: i64,
}

#[derive(Clone, Debug, Default)]
pub struct HeadingPreprocessor {
    last: Option<f64>,
    bad_until_ms: Option<i64>,
}

impl HeadingPreprocessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn process(&mut self, reading: &OrientationReading) -> Option<RawHeading> {
        let now = reading.captured_at_ms;
        if reading
            .compass_accuracy_deg
            .map(|acc| acc > MAX_COMPASS_ACCURACY_DEG)
            .unwrap_or(false)
        {
            log::debug!("compass accuracy too poor, ignoring samples for {} ms", BAD_ACCURACY_COOLDOWN_MS);
            self.bad_until_ms = Some(now + BAD_ACCURACY_COOLDOWN_MS);
            return None;
        }
        if self.bad_until_ms.map(|until| now < until).unwrap_or(false) {
            return None;
        }

        let absolute = reading.compass_heading_deg.filter(|h| h.is_finite());
        let raw = match absolute {
            Some(h) => wrap_360(h),
            None => {
                let alpha = reading.alpha_deg.filter(|a| a.is_finite())?;
                let screen = if reading.screen_angle_deg.is_finite() {
                    wrap_360((reading.screen_angle_deg / 90.0).round() * 90.0)
                } else {
                    0.0
                };
                wrap_360(360.0 - alpha + screen)
            }
        };

        let smoothed = match self.last {
            None => raw,
            Some(prev) => wrap_360(prev + ORIENTATION_LOW_PASS_ALPHA * angle_delta(prev, raw)),
        };
        self.last = Some(smoothed);
        Some(RawHeading {
            heading_deg: smoothed,
            captured_at_ms: now,
        })
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

// ─── Sampler tasks ───────────────────────────────────────────────────────────

pub trait SampleSource: Send + 'static {
    type Sample: Send + 'static;

    /// Next sample at `now_ms`, or `None` when the source has nothing this tick.
    fn read(&mut self, now_ms: i64) -> Option<Self::Sample>;
}

/// Running sampler task. Dropping the handle also ends the task.
pub struct SamplerHandle {
    name: &'static str,
    stop_tx: Option<oneshot::Sender<()>>,
    join: JoinHandle<u64>,
}

impl SamplerHandle {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Stop the task and return how many samples it sent.
    pub async fn stop(mut self) -> u64 {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        match self.join.await {
            Ok(sent) => sent,
            Err(e) => {
                log::warn!("[{}] sampler task failed: {}", self.name, e);
                0
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}

pub fn spawn_geo_sampler<S>(source: S, period: Duration, tx: Sender<SensorEvent>) -> SamplerHandle
where
    S: SampleSource<Sample = RawFix>,
{
    spawn_loop("geo", source, period, tx, |fix| Some(SensorEvent::Fix(fix)))
}

pub fn spawn_heading_sampler<S>(source: S, period: Duration, tx: Sender<SensorEvent>) -> SamplerHandle
where
    S: SampleSource<Sample = OrientationReading>,
{
    let mut pre = HeadingPreprocessor::new();
    spawn_loop("heading", source, period, tx, move |reading| {
        pre.process(&reading).map(SensorEvent::Heading)
    })
}

pub fn spawn_peer_feed<S>(source: S, period: Duration, tx: Sender<SensorEvent>) -> SamplerHandle
where
    S: SampleSource<Sample = PeerSet>,
{
    spawn_loop("peers", source, period, tx, |peers| Some(SensorEvent::Peers { peers }))
}

fn spawn_loop<S, F>(
    name: &'static str,
    mut source: S,
    period: Duration,
    tx: Sender<SensorEvent>,
    mut to_event: F,
) -> SamplerHandle
where
    S: SampleSource,
    F: FnMut(S::Sample) -> Option<SensorEvent> + Send + 'static,
{
    let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
    let join = tokio::spawn(async move {
        let mut ticker = interval(period);
        let mut sent = 0u64;
        loop {
            tokio::select! {
                _ = &mut stop_rx => {
                    log::debug!("[{}] stopped after {} samples", name, sent);
                    break;
                }
                _ = ticker.tick() => {
                    let now_ms = ts_now_ms();
                    let Some(event) = source.read(now_ms).and_then(&mut to_event) else {
                        continue;
                    };
                    match tx.try_send(event) {
                        Ok(_) => {
                            sent += 1;
                            if sent % 100 == 0 {
                                log::debug!("[{}] {} samples", name, sent);
                            }
                        }
                        Err(TrySendError::Closed(_)) => {
                            log::info!("[{}] channel closed after {} samples", name, sent);
                            break;
                        }
                        Err(TrySendError::Full(_)) => {
                            // Channel full, drop this sample
                        }
                    }
                }
            }
        }
        sent
    });

    SamplerHandle {
        name,
        stop_tx: Some(stop_tx),
        join,
    }
}

pub fn ts_now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

// ─── Mock sources ────────────────────────────────────────────────────────────

/// Walks in a straight line from `origin` with slowly varying accuracy.
#[derive(Clone, Debug)]
pub struct MockWalker {
    pub origin: LatLng,
    pub speed_mps: f64,
    pub course_deg: f64,
    pub base_accuracy_m: f64,
    start_ms: Option<i64>,
    seq: u64,
}

impl MockWalker {
    pub fn new(origin: LatLng, speed_mps: f64, course_deg: f64) -> Self {
        Self {
            origin,
            speed_mps,
            course_deg,
            base_accuracy_m: 8.0,
            start_ms: None,
            seq: 0,
        }
    }
}

impl SampleSource for MockWalker {
    type Sample = RawFix;

    fn read(&mut self, now_ms: i64) -> Option<RawFix> {
        let start = *self.start_ms.get_or_insert(now_ms);
        let seq = self.seq as f64;
        self.seq += 1;

        let travelled = self.speed_mps * (now_ms - start) as f64 / 1000.0;
        let course = self.course_deg.to_radians();
        let pos = offset_m(self.origin, travelled * course.sin(), travelled * course.cos());
        Some(RawFix {
            lat: pos.lat,
            lng: pos.lng,
            accuracy_m: Some(self.base_accuracy_m + (seq * 0.3).sin().abs() * 4.0),
            speed_mps: Some(self.speed_mps),
            course_deg: (self.speed_mps > 0.0).then_some(self.course_deg),
            captured_at_ms: now_ms,
        })
    }
}

/// Compass that wobbles around a fixed heading.
#[derive(Clone, Debug)]
pub struct MockCompass {
    pub heading_deg: f64,
    pub wobble_deg: f64,
    seq: u64,
}

impl MockCompass {
    pub fn new(heading_deg: f64, wobble_deg: f64) -> Self {
        Self {
            heading_deg,
            wobble_deg,
            seq: 0,
        }
    }
}

impl SampleSource for MockCompass {
    type Sample = OrientationReading;

    fn read(&mut self, now_ms: i64) -> Option<OrientationReading> {
        let t = self.seq as f64 * 0.05;
        self.seq += 1;
        Some(OrientationReading {
            alpha_deg: None,
            compass_heading_deg: Some(wrap_360(self.heading_deg + (t * 3.0).sin() * self.wobble_deg)),
            compass_accuracy_deg: Some(10.0),
            screen_angle_deg: 0.0,
            captured_at_ms: now_ms,
        })
    }
}

/// One simulated group member, placed relative to the group origin.
#[derive(Clone, Debug)]
pub struct MockMember {
    pub id: String,
    pub east_m: f64,
    pub north_m: f64,
    pub drift_mps: f64,
    pub accuracy_m: Option<f64>,
    /// Member stops publishing after this long, to exercise staleness.
    pub silent_after_ms: Option<i64>,
}

/// Peer snapshot source that republishes each member's document.
#[derive(Clone, Debug)]
pub struct MockGroup {
    pub origin: LatLng,
    pub members: Vec<MockMember>,
    start_ms: Option<i64>,
    last_seen: PeerSet,
}

impl MockGroup {
    pub fn new(origin: LatLng, members: Vec<MockMember>) -> Self {
        Self {
            origin,
            members,
            start_ms: None,
            last_seen: PeerSet::new(),
        }
    }

    /// Three members: one close, one walking away, one that goes quiet.
    pub fn demo(origin: LatLng) -> Self {
        let member = |id: &str, east_m, north_m, drift_mps, accuracy_m, silent_after_ms| MockMember {
            id: id.to_string(),
            east_m,
            north_m,
            drift_mps,
            accuracy_m,
            silent_after_ms,
        };
        Self::new(
            origin,
            vec![
                member("alice", 12.0, 25.0, 0.0, Some(6.0), None),
                member("bob", -80.0, 40.0, 0.8, Some(15.0), None),
                member("carol", 150.0, -120.0, 0.0, None, Some(45_000)),
            ],
        )
    }
}

impl SampleSource for MockGroup {
    type Sample = PeerSet;

    fn read(&mut self, now_ms: i64) -> Option<PeerSet> {
        let start = *self.start_ms.get_or_insert(now_ms);
        let elapsed = now_ms - start;

        for m in &self.members {
            if m.silent_after_ms.map(|limit| elapsed > limit).unwrap_or(false) {
                continue;
            }
            let drift = m.drift_mps * elapsed as f64 / 1000.0;
            let pos = offset_m(self.origin, m.east_m, m.north_m + drift);
            self.last_seen.insert(
                m.id.clone(),
                PeerSnapshot {
                    lat: pos.lat,
                    lng: pos.lng,
                    accuracy_m: m.accuracy_m,
                    updated_at_ms: now_ms,
                },
            );
        }
        Some(self.last_seen.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn reading(alpha: Option<f64>, compass: Option<f64>, accuracy: Option<f64>, t: i64) -> OrientationReading {
        OrientationReading {
            alpha_deg: alpha,
            compass_heading_deg: compass,
            compass_accuracy_deg: accuracy,
            screen_angle_deg: 0.0,
            captured_at_ms: t,
        }
    }

    #[test]
    fn test_alpha_converted_to_compass() {
        let mut pre = HeadingPreprocessor::new();
        let h = pre.process(&reading(Some(90.0), None, None, 0)).unwrap();
        assert_abs_diff_eq!(h.heading_deg, 270.0, epsilon = 1e-9);
    }

    #[test]
    fn test_screen_angle_snapped() {
        let mut pre = HeadingPreprocessor::new();
        let mut r = reading(Some(0.0), None, None, 0);
        r.screen_angle_deg = 85.0;
        let h = pre.process(&r).unwrap();
        assert_abs_diff_eq!(h.heading_deg, 90.0, epsilon = 1e-9);
    }

    #[test]
    fn test_poor_accuracy_starts_cooldown() {
        let mut pre = HeadingPreprocessor::new();
        assert!(pre.process(&reading(None, Some(10.0), Some(40.0), 1_000)).is_none());
        assert!(pre.process(&reading(None, Some(10.0), Some(5.0), 2_000)).is_none());
        assert!(pre.process(&reading(None, Some(10.0), Some(5.0), 2_500)).is_some());
    }

    #[test]
    fn test_low_pass_takes_short_way() {
        let mut pre = HeadingPreprocessor::new();
        pre.process(&reading(None, Some(350.0), None, 0));
        let h = pre.process(&reading(None, Some(10.0), None, 100)).unwrap();
        assert_abs_diff_eq!(h.heading_deg, 352.4, epsilon = 1e-9);
    }

    #[test]
    fn test_non_finite_reading_yields_nothing() {
        let mut pre = HeadingPreprocessor::new();
        assert!(pre.process(&reading(Some(f64::NAN), None, None, 0)).is_none());
        assert!(pre.process(&reading(None, None, None, 0)).is_none());
    }

    #[test]
    fn test_mock_walker_moves_along_course() {
        let origin = LatLng::new(48.0, 2.0);
        let mut walker = MockWalker::new(origin, 1.0, 90.0);
        let first = walker.read(0).unwrap();
        let later = walker.read(10_000).unwrap();
        assert_abs_diff_eq!(crate::geo::haversine(first.position(), later.position()), 10.0, epsilon = 0.05);
        assert!(later.lng > first.lng);
    }

    #[test]
    fn test_mock_group_member_goes_quiet() {
        let mut group = MockGroup::demo(LatLng::new(48.0, 2.0));
        let early = group.read(0).unwrap();
        assert_eq!(early.len(), 3);
        let late = group.read(60_000).unwrap();
        assert_eq!(late["carol"].updated_at_ms, 0);
        assert_eq!(late["alice"].updated_at_ms, 60_000);
    }

    #[tokio::test]
    async fn test_sampler_forwards_and_stops() {
        let (tx, mut rx) = tokio::sync::mpsc::channel(16);
        let handle = spawn_geo_sampler(
            MockWalker::new(LatLng::new(0.0, 0.0), 0.0, 0.0),
            Duration::from_millis(5),
            tx,
        );
        let first = rx.recv().await;
        assert!(matches!(first, Some(SensorEvent::Fix(_))));
        let sent = handle.stop().await;
        assert!(sent >= 1);
    }
}
