use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// JSON has no NaN or infinity. Non-finite samples are written as `null` and
/// read back as NaN, so recorded logs keep their malformed inputs.
pub(crate) mod nan_as_null {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_finite() {
            serializer.serialize_f64(*value)
        } else {
            serializer.serialize_none()
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::NAN))
    }
}

/// Latitude/longitude pair in degrees.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

impl LatLng {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    pub fn is_finite(&self) -> bool {
        self.lat.is_finite() && self.lng.is_finite()
    }
}

/// Raw location fix from the GeoSampler.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawFix {
    #[serde(with = "nan_as_null")]
    pub lat: f64,
    #[serde(with = "nan_as_null")]
    pub lng: f64,
    #[serde(default)]
    pub accuracy_m: Option<f64>,
    #[serde(default)]
    pub speed_mps: Option<f64>,
    #[serde(default)]
    pub course_deg: Option<f64>,
    pub captured_at_ms: i64,
}

impl RawFix {
    pub fn position(&self) -> LatLng {
        LatLng::new(self.lat, self.lng)
    }

    pub fn is_valid(&self) -> bool {
        self.position().is_finite()
    }

    /// Speed with unknown or nonsensical readings mapped to zero.
    pub fn speed_or_zero(&self) -> f64 {
        match self.speed_mps {
            Some(s) if s.is_finite() && s > 0.0 => s,
            _ => 0.0,
        }
    }

    /// Accuracy when reported and usable.
    pub fn accuracy(&self) -> Option<f64> {
        self.accuracy_m.filter(|a| a.is_finite() && *a >= 0.0)
    }

    /// Travel course normalized to [0, 360), when reported.
    pub fn course(&self) -> Option<f64> {
        self.course_deg
            .filter(|c| c.is_finite())
            .map(crate::geo::wrap_360)
    }
}

/// Compass heading sample, degrees clockwise from true north.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawHeading {
    #[serde(with = "nan_as_null")]
    pub heading_deg: f64,
    pub captured_at_ms: i64,
}

/// One peer's location document as seen through the sync transport.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PeerSnapshot {
    #[serde(with = "nan_as_null")]
    pub lat: f64,
    #[serde(with = "nan_as_null")]
    pub lng: f64,
    #[serde(default)]
    pub accuracy_m: Option<f64>,
    pub updated_at_ms: i64,
}

impl PeerSnapshot {
    pub fn position(&self) -> LatLng {
        LatLng::new(self.lat, self.lng)
    }

    pub fn accuracy(&self) -> Option<f64> {
        self.accuracy_m.filter(|a| a.is_finite() && *a >= 0.0)
    }

    pub fn age_ms(&self, now_ms: i64) -> i64 {
        now_ms - self.updated_at_ms
    }
}

/// Full peer document set for one refresh, keyed by peer id.
pub type PeerSet = HashMap<String, PeerSnapshot>;

/// Self-location record the WriteGate decided to publish upstream.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PublishRecord {
    pub lat: f64,
    pub lng: f64,
    pub accuracy_m: Option<f64>,
    pub timestamp_ms: i64,
    pub expires_at_ms: i64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StalenessClass {
    Fresh,
    Aging,
    Old,
    Hidden,
}

impl StalenessClass {
    /// Bucket a snapshot age. Negative ages (peer clock ahead of ours) count as fresh.
    pub fn classify(age_ms: i64, cfg: &crate::config::StalenessConfig) -> Self {
        if age_ms < cfg.fresh_below_ms {
            StalenessClass::Fresh
        } else if age_ms < cfg.aging_below_ms {
            StalenessClass::Aging
        } else if age_ms < cfg.hide_after_ms {
            StalenessClass::Old
        } else {
            StalenessClass::Hidden
        }
    }

    pub fn is_visible(self) -> bool {
        self != StalenessClass::Hidden
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeadingSource {
    Compass,
    GpsCourse,
    None,
}

/// Per-peer output record, one per visible peer per frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PeerDisplay {
    pub peer_id: String,
    pub distance_m: f64,
    pub rotation_deg: f64,
    pub bearing_deg: f64,
    pub staleness: StalenessClass,
    pub last_seen_ms: i64,
    pub age_ms: i64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HeadingStatus {
    pub heading_deg: Option<f64>,
    pub source: HeadingSource,
    pub variance: Option<f64>,
    pub unstable_for_ms: Option<i64>,
    pub show_hint: bool,
}

impl Default for HeadingStatus {
    fn default() -> Self {
        Self {
            heading_deg: None,
            source: HeadingSource::None,
            variance: None,
            unstable_for_ms: None,
            show_hint: false,
        }
    }
}

/// Everything the compass dial needs for one render.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DisplayFrame {
    pub generated_at_ms: i64,
    pub self_position: Option<LatLng>,
    pub heading: HeadingStatus,
    pub peers: Vec<PeerDisplay>,
    pub geo_silent: bool,
    pub heading_silent: bool,
}

impl DisplayFrame {
    pub fn peer(&self, peer_id: &str) -> Option<&PeerDisplay> {
        self.peers.iter().find(|p| p.peer_id == peer_id)
    }
}

/// Input events accepted by the fusion engine.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SensorEvent {
    Fix(RawFix),
    Heading(RawHeading),
    Peers { peers: PeerSet },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StalenessConfig;

    #[test]
    fn test_staleness_boundaries() {
        let cfg = StalenessConfig::default();
        assert_eq!(StalenessClass::classify(0, &cfg), StalenessClass::Fresh);
        assert_eq!(StalenessClass::classify(29_999, &cfg), StalenessClass::Fresh);
        assert_eq!(StalenessClass::classify(30_000, &cfg), StalenessClass::Aging);
        assert_eq!(StalenessClass::classify(120_000, &cfg), StalenessClass::Old);
        assert_eq!(StalenessClass::classify(299_999, &cfg), StalenessClass::Old);
        assert_eq!(StalenessClass::classify(300_001, &cfg), StalenessClass::Hidden);
    }

    #[test]
    fn test_negative_age_is_fresh() {
        let cfg = StalenessConfig::default();
        assert_eq!(StalenessClass::classify(-5_000, &cfg), StalenessClass::Fresh);
    }

    #[test]
    fn test_fix_optional_fields() {
        let fix = RawFix {
            lat: 1.0,
            lng: 2.0,
            accuracy_m: Some(f64::NAN),
            speed_mps: None,
            course_deg: Some(-90.0),
            captured_at_ms: 0,
        };
        assert_eq!(fix.accuracy(), None);
        assert_eq!(fix.speed_or_zero(), 0.0);
        assert_eq!(fix.course(), Some(270.0));
    }

    #[test]
    fn test_sensor_event_json_shape() {
        let json = r#"{"kind":"heading","heading_deg":12.5,"captured_at_ms":7}"#;
        let ev: SensorEvent = serde_json::from_str(json).unwrap();
        assert_eq!(
            ev,
            SensorEvent::Heading(RawHeading { heading_deg: 12.5, captured_at_ms: 7 })
        );
    }
}
