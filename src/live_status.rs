use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::health_monitor::HealthReport;
use crate::presentation::{format_distance, last_seen_label};
use crate::sensor_fusion::FusionEngine;
use crate::types::{HeadingSource, StalenessClass};

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct PeerLine {
    pub peer_id: String,
    pub distance: String,
    pub rotation_deg: f64,
    pub staleness: StalenessClass,
    pub last_seen: Option<String>,
}

/// Snapshot the live binary writes next to its session logs.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct LiveStatus {
    pub timestamp_ms: i64,
    pub uptime_seconds: u64,
    pub fixes: u64,
    pub headings: u64,
    pub peer_updates: u64,
    pub publishes: u64,
    pub suppressed_publishes: u64,
    pub substitutions: u64,
    // Self state
    pub self_lat: Option<f64>,
    pub self_lng: Option<f64>,
    pub heading_deg: Option<f64>,
    pub heading_source: HeadingSource,
    pub heading_variance: Option<f64>,
    pub hold_steady_hint: bool,
    // Health monitoring
    pub health: Option<HealthReport>,
    pub peers: Vec<PeerLine>,
}

impl LiveStatus {
    pub fn new(now_ms: i64) -> Self {
        Self {
            timestamp_ms: now_ms,
            uptime_seconds: 0,
            fixes: 0,
            headings: 0,
            peer_updates: 0,
            publishes: 0,
            suppressed_publishes: 0,
            substitutions: 0,
            self_lat: None,
            self_lng: None,
            heading_deg: None,
            heading_source: HeadingSource::None,
            heading_variance: None,
            hold_steady_hint: false,
            health: None,
            peers: Vec::new(),
        }
    }

    /// Refresh the self, heading, health and peer fields from the engine.
    pub fn update_from(&mut self, engine: &FusionEngine, now_ms: i64) {
        let frame = engine.frame();
        self.timestamp_ms = now_ms;
        self.publishes = engine.write_gate().published_count();
        self.suppressed_publishes = engine.write_gate().suppressed_count();
        self.self_lat = frame.self_position.map(|p| p.lat);
        self.self_lng = frame.self_position.map(|p| p.lng);
        self.heading_deg = frame.heading.heading_deg;
        self.heading_source = frame.heading.source;
        self.heading_variance = frame.heading.variance;
        self.hold_steady_hint = frame.heading.show_hint;
        self.health = Some(engine.health_report(now_ms));
        self.peers = frame
            .peers
            .iter()
            .map(|p| PeerLine {
                peer_id: p.peer_id.clone(),
                distance: format_distance(p.distance_m),
                rotation_deg: p.rotation_deg,
                staleness: p.staleness,
                last_seen: last_seen_label(p.age_ms),
            })
            .collect();
    }

    pub fn save(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}
