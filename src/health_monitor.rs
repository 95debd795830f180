use serde::{Deserialize, Serialize};

use crate::config::HealthConfig;

/// Tracks whether a sampler is still emitting, by sample age only.
#[derive(Clone, Debug)]
pub struct SamplerHealth {
    pub name: String,
    pub silence_threshold_ms: i64,
    last_event_ms: Option<i64>,
    events: u64,
    rejected: u64,
}

impl SamplerHealth {
    pub fn new(name: &str, silence_threshold_ms: i64) -> Self {
        SamplerHealth {
            name: name.to_string(),
            silence_threshold_ms,
            last_event_ms: None,
            events: 0,
            rejected: 0,
        }
    }

    pub fn record(&mut self, now_ms: i64) {
        self.last_event_ms = Some(now_ms);
        self.events += 1;
    }

    /// A malformed sample still proves the sampler is alive, but is counted apart.
    pub fn record_rejected(&mut self, now_ms: i64) {
        self.last_event_ms = Some(now_ms);
        self.rejected += 1;
    }

    pub fn time_since_last_event(&self, now_ms: i64) -> Option<i64> {
        self.last_event_ms.map(|t| (now_ms - t).max(0))
    }

    /// Silent when it never spoke or spoke too long ago.
    pub fn is_silent(&self, now_ms: i64) -> bool {
        self.time_since_last_event(now_ms)
            .map(|d| d > self.silence_threshold_ms)
            .unwrap_or(true)
    }

    pub fn event_count(&self) -> u64 {
        self.events
    }

    pub fn rejected_count(&self) -> u64 {
        self.rejected
    }

    pub fn reset(&mut self) {
        self.last_event_ms = None;
        self.events = 0;
        self.rejected = 0;
    }
}

/// Health of both self samplers.
#[derive(Clone, Debug)]
pub struct HealthMonitor {
    pub geo: SamplerHealth,
    pub heading: SamplerHealth,
}

impl HealthMonitor {
    pub fn new(cfg: &HealthConfig) -> Self {
        HealthMonitor {
            geo: SamplerHealth::new("GPS", cfg.geo_silence_ms),
            heading: SamplerHealth::new("Compass", cfg.heading_silence_ms),
        }
    }

    pub fn check_health(&self, now_ms: i64) -> HealthReport {
        HealthReport {
            geo_healthy: !self.geo.is_silent(now_ms),
            geo_silence_ms: self.geo.time_since_last_event(now_ms),
            geo_events: self.geo.event_count(),
            geo_rejected: self.geo.rejected_count(),

            heading_healthy: !self.heading.is_silent(now_ms),
            heading_silence_ms: self.heading.time_since_last_event(now_ms),
            heading_events: self.heading.event_count(),
            heading_rejected: self.heading.rejected_count(),
        }
    }

    /// Format health status for logging
    pub fn format_status(&self, now_ms: i64) -> String {
        let report = self.check_health(now_ms);
        format!(
            "Health: GPS {} | Compass {}",
            status_label(report.geo_healthy, report.geo_silence_ms),
            status_label(report.heading_healthy, report.heading_silence_ms)
        )
    }

    pub fn reset(&mut self) {
        self.geo.reset();
        self.heading.reset();
    }
}

fn status_label(healthy: bool, silence_ms: Option<i64>) -> String {
    match (healthy, silence_ms) {
        (true, _) => "✓".to_string(),
        (false, Some(ms)) => format!("⚠ (silent {:.1}s)", ms as f64 / 1000.0),
        (false, None) => "✗ (no data)".to_string(),
    }
}

/// Report of sampler health status
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub geo_healthy: bool,
    pub geo_silence_ms: Option<i64>,
    pub geo_events: u64,
    pub geo_rejected: u64,

    pub heading_healthy: bool,
    pub heading_silence_ms: Option<i64>,
    pub heading_events: u64,
    pub heading_rejected: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sampler_silence_detection() {
        let mut health = SamplerHealth::new("test", 1_000);

        // Never heard from
        assert!(health.is_silent(0));

        health.record(5_000);
        assert!(!health.is_silent(5_500));
        assert!(!health.is_silent(6_000));
        assert!(health.is_silent(6_001));

        health.record(6_001);
        assert!(!health.is_silent(6_002));
        assert_eq!(health.event_count(), 2);
    }

    #[test]
    fn test_rejected_samples_count_as_alive() {
        let mut health = SamplerHealth::new("test", 1_000);
        health.record_rejected(100);
        assert!(!health.is_silent(200));
        assert_eq!(health.event_count(), 0);
        assert_eq!(health.rejected_count(), 1);
    }

    #[test]
    fn test_health_monitor() {
        let mut monitor = HealthMonitor::new(&HealthConfig::default());
        monitor.geo.record(0);
        monitor.heading.record(0);

        let report = monitor.check_health(1_000);
        assert!(report.geo_healthy);
        assert!(report.heading_healthy);
        assert!(monitor.format_status(1_000).contains("✓"));

        let report = monitor.check_health(10_000);
        assert!(report.geo_healthy);
        assert!(!report.heading_healthy);
        assert!(monitor.format_status(10_000).contains("silent 10.0s"));
    }
}
