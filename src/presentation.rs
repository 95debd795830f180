//! Text and styling for the compass dial.
//!
//! Rounding lives here, on top of the filtered floats, never inside the filters.

use serde::{Deserialize, Serialize};

use crate::config::HeadingConfig;
use crate::geo::wrap_180;
use crate::types::{HeadingSource, HeadingStatus, RawFix, StalenessClass};

/// Peers within this many degrees of the heading count as straight ahead.
pub const AHEAD_TOLERANCE_DEG: f64 = 8.0;

/// Last-seen text only shows once a peer is this old.
pub const LAST_SEEN_AFTER_MS: i64 = 15_000;

/// Tiered display resolution: 0.1 m under 10 m, 5 m under 100 m, 10 m above.
pub fn round_display(m: f64) -> f64 {
    if m < 10.0 {
        (m * 10.0).round() / 10.0
    } else if m < 100.0 {
        (m / 5.0).round() * 5.0
    } else {
        (m / 10.0).round() * 10.0
    }
}

pub fn format_distance(m: f64) -> String {
    let x = round_display(m.max(0.0));
    if x < 10.0 {
        format!("{:.1} m", x)
    } else if x < 1000.0 {
        format!("{} m", x.round() as i64)
    } else {
        format!("{:.1} km", x / 1000.0)
    }
}

/// "42s" below a minute, "3m05s" above.
pub fn format_last_seen(age_ms: i64) -> String {
    let s = age_ms.max(0) / 1000;
    let (mm, ss) = (s / 60, s % 60);
    if mm > 0 {
        format!("{}m{:02}s", mm, ss)
    } else {
        format!("{}s", ss)
    }
}

pub fn last_seen_label(age_ms: i64) -> Option<String> {
    (age_ms > LAST_SEEN_AFTER_MS).then(|| format_last_seen(age_ms))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnHint {
    HoldSteady,
    Ahead,
    TurnRight,
    TurnLeft,
}

impl TurnHint {
    pub fn label(self) -> &'static str {
        match self {
            TurnHint::HoldSteady => "Hold steady",
            TurnHint::Ahead => "Ahead",
            TurnHint::TurnRight => "Turn right",
            TurnHint::TurnLeft => "Turn left",
        }
    }
}

/// Which way to turn to face a peer at absolute `bearing_deg`.
pub fn turn_hint(bearing_deg: f64, heading_deg: Option<f64>) -> TurnHint {
    let Some(heading) = heading_deg else {
        return TurnHint::HoldSteady;
    };
    let diff = wrap_180(bearing_deg - heading);
    if diff.abs() < AHEAD_TOLERANCE_DEG {
        TurnHint::Ahead
    } else if diff > 0.0 {
        TurnHint::TurnRight
    } else {
        TurnHint::TurnLeft
    }
}

/// Status line under the dial.
///
/// Falls back to the raw GPS course when the arbiter has no heading but the
/// fix still carries one at walking speed.
pub fn heading_status_text(status: &HeadingStatus, fix: Option<&RawFix>, cfg: &HeadingConfig) -> String {
    if let (Some(h), HeadingSource::Compass | HeadingSource::GpsCourse) = (status.heading_deg, status.source) {
        return match status.source {
            HeadingSource::GpsCourse => format!("GPS course: {}°", h.round() as i64),
            _ => format!("Heading: {}°", h.round() as i64),
        };
    }
    match fix
        .filter(|f| f.speed_or_zero() > cfg.course_min_speed_mps)
        .and_then(RawFix::course)
    {
        Some(course) => format!("GPS course: {}°", course.round() as i64),
        None => "Heading: hold steady".to_string(),
    }
}

pub fn opacity(staleness: StalenessClass) -> f64 {
    match staleness {
        StalenessClass::Fresh => 0.95,
        StalenessClass::Aging | StalenessClass::Old => 0.75,
        StalenessClass::Hidden => 0.0,
    }
}

pub fn dashed(staleness: StalenessClass) -> bool {
    matches!(staleness, StalenessClass::Old)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_round_display_tiers() {
        assert_abs_diff_eq!(round_display(3.14), 3.1, epsilon = 1e-9);
        assert_abs_diff_eq!(round_display(9.96), 10.0, epsilon = 1e-9);
        assert_eq!(round_display(47.0), 45.0);
        assert_eq!(round_display(48.0), 50.0);
        assert_eq!(round_display(96.4), 95.0);
        assert_eq!(round_display(123.0), 120.0);
        assert_eq!(round_display(1234.0), 1230.0);
    }

    #[test]
    fn test_format_distance() {
        assert_eq!(format_distance(3.14), "3.1 m");
        assert_eq!(format_distance(96.4), "95 m");
        assert_eq!(format_distance(540.0), "540 m");
        assert_eq!(format_distance(1234.0), "1.2 km");
        assert_eq!(format_distance(-2.0), "0.0 m");
    }

    #[test]
    fn test_last_seen() {
        assert_eq!(format_last_seen(42_500), "42s");
        assert_eq!(format_last_seen(185_000), "3m05s");
        assert_eq!(last_seen_label(15_000), None);
        assert_eq!(last_seen_label(16_000).as_deref(), Some("16s"));
    }

    #[test]
    fn test_turn_hint() {
        assert_eq!(turn_hint(90.0, None), TurnHint::HoldSteady);
        assert_eq!(turn_hint(95.0, Some(90.0)), TurnHint::Ahead);
        assert_eq!(turn_hint(3.0, Some(357.0)), TurnHint::Ahead);
        assert_eq!(turn_hint(120.0, Some(90.0)), TurnHint::TurnRight);
        assert_eq!(turn_hint(20.0, Some(340.0)), TurnHint::TurnRight);
        assert_eq!(turn_hint(300.0, Some(10.0)), TurnHint::TurnLeft);
    }

    #[test]
    fn test_heading_status_text() {
        let cfg = HeadingConfig::default();
        let compass = HeadingStatus {
            heading_deg: Some(41.6),
            source: HeadingSource::Compass,
            ..HeadingStatus::default()
        };
        assert_eq!(heading_status_text(&compass, None, &cfg), "Heading: 42°");
        assert_eq!(heading_status_text(&HeadingStatus::default(), None, &cfg), "Heading: hold steady");

        let walking = RawFix {
            lat: 0.0,
            lng: 0.0,
            accuracy_m: None,
            speed_mps: Some(1.2),
            course_deg: Some(181.0),
            captured_at_ms: 0,
        };
        assert_eq!(
            heading_status_text(&HeadingStatus::default(), Some(&walking), &cfg),
            "GPS course: 181°"
        );
    }

    #[test]
    fn test_styling() {
        assert_eq!(opacity(StalenessClass::Fresh), 0.95);
        assert_eq!(opacity(StalenessClass::Aging), 0.75);
        assert!(!dashed(StalenessClass::Aging));
        assert!(dashed(StalenessClass::Old));
    }
}
