// sensor_fusion.rs - Fusion engine for the peer compass
//
// Everything in this module is independent of:
//   - tokio / async runtime
//   - the platform location and orientation APIs
//   - the realtime document store that carries peer positions
//
// It takes raw samples and peer snapshots in, and produces display frames,
// publish decisions and diagnostic events out. Time only enters through the
// `now_ms` argument, so recorded sessions replay deterministically.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::config::FusionConfig;
use crate::error::{FusionError, Result};
use crate::filters::angle::{AngleParams, AngleSmoother};
use crate::filters::distance::DistanceEstimator;
use crate::filters::heading::HeadingArbiter;
use crate::filters::position::{self, LastGood, PositionSmoother, Substitution};
use crate::geo::{bearing, wrap_360};
use crate::health_monitor::{HealthMonitor, HealthReport};
use crate::smoothing::MedianWindow;
use crate::types::{
    DisplayFrame, HeadingSource, LatLng, PeerDisplay, PeerSet, PeerSnapshot, PublishRecord, RawFix,
    RawHeading, SensorEvent, StalenessClass,
};
use crate::write_gate::{PublishReason, WriteGate};

// ─── Events ──────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum FusionEvent {
    SelfFixRejected { captured_at_ms: i64 },
    HeadingRejected { captured_at_ms: i64 },
    PeerSampleRejected { peer_id: String },
    PeerAdded { peer_id: String },
    PeerRemoved { peer_id: String },
    PeerHidden { peer_id: String, age_ms: i64 },
    PeerStateDiscarded { peer_id: String, age_ms: i64 },
    PeerSubstituted { peer_id: String, reason: Substitution, age_ms: i64 },
    HeadingSourceChanged { from: HeadingSource, to: HeadingSource },
    HeadingHintRaised { unstable_for_ms: i64 },
    SamplerSilent { sampler: String },
    SamplerResumed { sampler: String },
    Published { reason: PublishReason },
    PublishSuppressed,
}

// ─── Per-peer state ──────────────────────────────────────────────────────────

/// Filter state owned by the engine for one peer id.
#[derive(Clone, Debug)]
pub struct PeerFilterState {
    smoother: PositionSmoother,
    last_good: Option<LastGood>,
    distance: DistanceEstimator,
    angle: AngleSmoother,
    bearing_deg: Option<f64>,
    excluded: bool,
    hidden: bool,
}

impl PeerFilterState {
    fn new(config: &FusionConfig) -> Self {
        Self {
            smoother: PositionSmoother::for_peer(&config.position),
            last_good: None,
            distance: DistanceEstimator::new(&config.distance),
            angle: AngleSmoother::new(),
            bearing_deg: None,
            excluded: false,
            hidden: false,
        }
    }

    pub fn smoothed_position(&self) -> Option<LatLng> {
        self.smoother.position()
    }

    pub fn last_good(&self) -> Option<&LastGood> {
        self.last_good.as_ref()
    }

    pub fn distance_window(&self) -> &MedianWindow {
        self.distance.window()
    }

    pub fn smoothed_distance(&self) -> Option<f64> {
        self.distance.smoothed()
    }

    pub fn smoothed_angle(&self) -> Option<f64> {
        self.angle.value()
    }

    pub fn bearing(&self) -> Option<f64> {
        self.bearing_deg
    }
}

// ─── Output ──────────────────────────────────────────────────────────────────

#[derive(Clone, Debug)]
pub struct TickResult {
    pub frame: DisplayFrame,
    pub publish: Option<PublishRecord>,
    pub events: Vec<FusionEvent>,
}

// ─── The engine ──────────────────────────────────────────────────────────────

pub struct FusionEngine {
    config: FusionConfig,
    self_id: Option<String>,

    self_smoother: PositionSmoother,
    latest_fix: Option<RawFix>,
    arbiter: HeadingArbiter,
    write_gate: WriteGate,
    health: HealthMonitor,

    peers: HashMap<String, PeerFilterState>,
    snapshot: PeerSet,

    frame: DisplayFrame,
    last_source: HeadingSource,
    hint_raised: bool,
    geo_was_silent: bool,
    heading_was_silent: bool,
}

impl FusionEngine {
    pub fn new(config: FusionConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            self_id: None,
            self_smoother: PositionSmoother::for_self(&config.position),
            latest_fix: None,
            arbiter: HeadingArbiter::new(&config.heading),
            write_gate: WriteGate::new(),
            health: HealthMonitor::new(&config.health),
            peers: HashMap::new(),
            snapshot: PeerSet::new(),
            frame: DisplayFrame::default(),
            last_source: HeadingSource::None,
            hint_raised: false,
            geo_was_silent: true,
            heading_was_silent: true,
            config,
        })
    }

    /// Drop all state from the previous group and start clean.
    ///
    /// `self_id` is filtered out of every peer snapshot, since the shared
    /// document set also contains our own location.
    pub fn start_session(&mut self, self_id: Option<String>) {
        log::info!("starting fusion session (self id {:?})", self_id);
        self.self_id = self_id;
        self.self_smoother.reset();
        self.latest_fix = None;
        self.arbiter.reset();
        self.write_gate.reset();
        self.health.reset();
        self.peers.clear();
        self.snapshot.clear();
        self.frame = DisplayFrame::default();
        self.last_source = HeadingSource::None;
        self.hint_raised = false;
        self.geo_was_silent = true;
        self.heading_was_silent = true;
    }

    // ── Sensor feeds ─────────────────────────────────────────────────────

    pub fn process(&mut self, event: SensorEvent, now_ms: i64) -> TickResult {
        let mut events = Vec::new();
        let mut publish = None;

        match event {
            SensorEvent::Fix(fix) => publish = self.ingest_fix(fix, now_ms, &mut events),
            SensorEvent::Heading(sample) => self.ingest_heading(sample, now_ms, &mut events),
            SensorEvent::Peers { peers } => {
                self.replace_snapshot(peers, &mut events);
                self.run_position_pipeline(now_ms, &mut events);
            }
        }

        self.frame = self.build_frame(now_ms, &mut events);
        TickResult {
            frame: self.frame.clone(),
            publish,
            events,
        }
    }

    pub fn feed_fix(&mut self, fix: RawFix, now_ms: i64) -> TickResult {
        self.process(SensorEvent::Fix(fix), now_ms)
    }

    pub fn feed_heading(&mut self, sample: RawHeading, now_ms: i64) -> TickResult {
        self.process(SensorEvent::Heading(sample), now_ms)
    }

    pub fn feed_peers(&mut self, peers: PeerSet, now_ms: i64) -> TickResult {
        self.process(SensorEvent::Peers { peers }, now_ms)
    }

    /// Rebuild the frame without new input, so staleness and hints advance.
    pub fn refresh(&mut self, now_ms: i64) -> TickResult {
        let mut events = Vec::new();
        self.frame = self.build_frame(now_ms, &mut events);
        TickResult {
            frame: self.frame.clone(),
            publish: None,
            events,
        }
    }

    // ── Queries ──────────────────────────────────────────────────────────

    pub fn frame(&self) -> &DisplayFrame {
        &self.frame
    }

    pub fn filter_state(&self, peer_id: &str) -> Result<&PeerFilterState> {
        self.peers
            .get(peer_id)
            .ok_or_else(|| FusionError::UnknownPeer(peer_id.to_string()))
    }

    /// Forget a peer's filter history; the next snapshot starts it cold.
    pub fn reset_peer(&mut self, peer_id: &str) -> Result<()> {
        self.peers
            .remove(peer_id)
            .map(|_| ())
            .ok_or_else(|| FusionError::UnknownPeer(peer_id.to_string()))
    }

    pub fn tracked_peers(&self) -> impl Iterator<Item = &str> {
        self.peers.keys().map(String::as_str)
    }

    pub fn self_position(&self) -> Option<LatLng> {
        self.self_smoother.position()
    }

    pub fn latest_fix(&self) -> Option<&RawFix> {
        self.latest_fix.as_ref()
    }

    pub fn heading_buffer_len(&self) -> usize {
        self.arbiter.buffer().len()
    }

    pub fn health_report(&self, now_ms: i64) -> HealthReport {
        self.health.check_health(now_ms)
    }

    pub fn health_status(&self, now_ms: i64) -> String {
        self.health.format_status(now_ms)
    }

    pub fn write_gate(&self) -> &WriteGate {
        &self.write_gate
    }

    pub fn config(&self) -> &FusionConfig {
        &self.config
    }

    // ── Internal helpers ─────────────────────────────────────────────────

    fn ingest_fix(&mut self, fix: RawFix, now_ms: i64, events: &mut Vec<FusionEvent>) -> Option<PublishRecord> {
        if !fix.is_valid() {
            log::debug!("dropping non-finite self fix at {}", fix.captured_at_ms);
            self.health.geo.record_rejected(now_ms);
            events.push(FusionEvent::SelfFixRejected { captured_at_ms: fix.captured_at_ms });
            return None;
        }
        self.health.geo.record(now_ms);

        let mut publish = None;
        if let Some(decision) = self.write_gate.offer(&fix, now_ms, &self.config.write_gate) {
            if decision.reason == PublishReason::Suppressed {
                events.push(FusionEvent::PublishSuppressed);
            } else {
                events.push(FusionEvent::Published { reason: decision.reason });
            }
            publish = decision.record;
        }

        self.self_smoother.update(fix.position());
        self.latest_fix = Some(fix);
        self.run_position_pipeline(now_ms, events);
        publish
    }

    fn ingest_heading(&mut self, sample: RawHeading, now_ms: i64, events: &mut Vec<FusionEvent>) {
        if self.arbiter.push_sample(sample) {
            self.health.heading.record(now_ms);
        } else {
            self.health.heading.record_rejected(now_ms);
            events.push(FusionEvent::HeadingRejected { captured_at_ms: sample.captured_at_ms });
        }
    }

    /// Snapshots are authoritative: peers missing from the new set lose their state.
    fn replace_snapshot(&mut self, mut peers: PeerSet, events: &mut Vec<FusionEvent>) {
        if let Some(id) = self.self_id.as_ref() {
            peers.remove(id);
        }
        let gone: Vec<String> = self
            .peers
            .keys()
            .filter(|id| !peers.contains_key(*id))
            .cloned()
            .collect();
        for peer_id in gone {
            log::debug!("peer {} left the snapshot", peer_id);
            self.peers.remove(&peer_id);
            events.push(FusionEvent::PeerRemoved { peer_id });
        }
        self.snapshot = peers;
    }

    fn run_position_pipeline(&mut self, now_ms: i64, events: &mut Vec<FusionEvent>) {
        let Some(me) = self.self_smoother.position() else {
            return;
        };
        let my_accuracy = self.latest_fix.as_ref().and_then(RawFix::accuracy);
        let my_speed = self.latest_fix.as_ref().map(RawFix::speed_or_zero).unwrap_or(0.0);
        let cfg = &self.config;

        for (peer_id, snap) in &self.snapshot {
            if !snap.position().is_finite() {
                log::debug!("dropping non-finite sample for peer {}", peer_id);
                if let Some(state) = self.peers.get_mut(peer_id) {
                    state.excluded = true;
                }
                events.push(FusionEvent::PeerSampleRejected { peer_id: peer_id.clone() });
                continue;
            }

            let age_ms = snap.age_ms(now_ms);
            if StalenessClass::classify(age_ms, &cfg.staleness) == StalenessClass::Hidden {
                continue;
            }

            let state = self.peers.entry(peer_id.clone()).or_insert_with(|| {
                log::debug!("new peer {}", peer_id);
                events.push(FusionEvent::PeerAdded { peer_id: peer_id.clone() });
                PeerFilterState::new(cfg)
            });
            update_peer(state, peer_id, snap, me, my_accuracy, my_speed, age_ms, now_ms, cfg, events);
        }
    }

    /// Drop filter state of peers hidden for longer than the retention window.
    fn discard_expired_peers(&mut self, now_ms: i64, events: &mut Vec<FusionEvent>) {
        let limit = self.config.staleness.hide_after_ms + self.config.staleness.state_retention_ms;
        let expired: Vec<(String, i64)> = self
            .peers
            .keys()
            .filter_map(|id| {
                let age_ms = self.snapshot.get(id)?.age_ms(now_ms);
                (age_ms > limit).then(|| (id.clone(), age_ms))
            })
            .collect();
        for (peer_id, age_ms) in expired {
            log::debug!("discarding filter state of long-hidden peer {}", peer_id);
            self.peers.remove(&peer_id);
            events.push(FusionEvent::PeerStateDiscarded { peer_id, age_ms });
        }
    }

    fn build_frame(&mut self, now_ms: i64, events: &mut Vec<FusionEvent>) -> DisplayFrame {
        self.discard_expired_peers(now_ms, events);
        let geo_silent = self.health.geo.is_silent(now_ms);
        let heading_silent = self.health.heading.is_silent(now_ms);
        self.track_silence(geo_silent, heading_silent, events);

        let course_fix = if geo_silent { None } else { self.latest_fix.as_ref() };
        let status = self
            .arbiter
            .evaluate(now_ms, course_fix, !heading_silent, &self.config.heading);

        if status.source != self.last_source {
            log::debug!("heading source {:?} -> {:?}", self.last_source, status.source);
            events.push(FusionEvent::HeadingSourceChanged {
                from: self.last_source,
                to: status.source,
            });
            self.last_source = status.source;
        }
        if status.show_hint && !self.hint_raised {
            let unstable_for_ms = status.unstable_for_ms.unwrap_or(0);
            log::info!("no stable heading for {} ms, asking user to hold steady", unstable_for_ms);
            events.push(FusionEvent::HeadingHintRaised { unstable_for_ms });
        }
        self.hint_raised = status.show_hint;

        let self_position = self.self_smoother.position();
        let mut peers = Vec::new();
        if self_position.is_some() {
            let speed = self.latest_fix.as_ref().map(RawFix::speed_or_zero).unwrap_or(0.0);
            let params = AngleParams::for_speed(speed, &self.config.angle);

            for (peer_id, state) in self.peers.iter_mut() {
                let Some(snap) = self.snapshot.get(peer_id) else {
                    continue;
                };
                let (Some(bearing_deg), Some(distance_m)) = (state.bearing_deg, state.distance.smoothed()) else {
                    continue;
                };
                if state.excluded {
                    continue;
                }

                let age_ms = snap.age_ms(now_ms);
                let staleness = StalenessClass::classify(age_ms, &self.config.staleness);
                if staleness == StalenessClass::Hidden {
                    if !state.hidden {
                        log::info!("peer {} hidden after {} ms without update", peer_id, age_ms);
                        events.push(FusionEvent::PeerHidden { peer_id: peer_id.clone(), age_ms });
                    }
                    state.hidden = true;
                    continue;
                }
                state.hidden = false;

                let target = status.heading_deg.map(|h| wrap_360(bearing_deg - h));
                let rotation_deg = state.angle.update(target, params).unwrap_or(0.0);

                peers.push(PeerDisplay {
                    peer_id: peer_id.clone(),
                    distance_m,
                    rotation_deg,
                    bearing_deg,
                    staleness,
                    last_seen_ms: snap.updated_at_ms,
                    age_ms,
                });
            }
        }
        peers.sort_by(|a, b| {
            a.distance_m
                .total_cmp(&b.distance_m)
                .then_with(|| a.peer_id.cmp(&b.peer_id))
        });

        DisplayFrame {
            generated_at_ms: now_ms,
            self_position,
            heading: status,
            peers,
            geo_silent,
            heading_silent,
        }
    }

    fn track_silence(&mut self, geo_silent: bool, heading_silent: bool, events: &mut Vec<FusionEvent>) {
        // Samplers start out silent, so the first transition is always a resume.
        let transitions = [
            (&self.health.geo, geo_silent, &mut self.geo_was_silent),
            (&self.health.heading, heading_silent, &mut self.heading_was_silent),
        ];
        for (health, silent, was_silent) in transitions {
            if silent == *was_silent {
                continue;
            }
            let sampler = health.name.clone();
            if silent {
                log::info!("{} sampler went silent", sampler);
                events.push(FusionEvent::SamplerSilent { sampler });
            } else {
                log::info!("{} sampler emitting", sampler);
                events.push(FusionEvent::SamplerResumed { sampler });
            }
            *was_silent = silent;
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn update_peer(
    state: &mut PeerFilterState,
    peer_id: &str,
    snap: &PeerSnapshot,
    me: LatLng,
    my_accuracy: Option<f64>,
    my_speed: f64,
    age_ms: i64,
    now_ms: i64,
    cfg: &FusionConfig,
    events: &mut Vec<FusionEvent>,
) {
    let their_accuracy = snap.accuracy();
    let gated = position::gate(
        snap.position(),
        their_accuracy,
        age_ms,
        state.last_good.as_ref(),
        &cfg.outlier,
    );
    if let Some(reason) = gated.substitution {
        log::debug!("peer {}: substituting last good position ({:?}, age {} ms)", peer_id, reason, age_ms);
        events.push(FusionEvent::PeerSubstituted {
            peer_id: peer_id.to_string(),
            reason,
            age_ms,
        });
    }

    let smoothed = state.smoother.update(gated.position);
    if position::qualifies_as_last_good(their_accuracy, age_ms, &cfg.outlier) {
        state.last_good = Some(LastGood {
            position: smoothed,
            observed_at_ms: now_ms,
        });
    }

    state
        .distance
        .update(me, smoothed, my_accuracy, their_accuracy, my_speed, &cfg.distance);
    state.bearing_deg = Some(bearing(me, smoothed));
    state.excluded = false;
}
