//! Peer compass fusion engine.
//!
//! Turns noisy self fixes, compass samples and peer location snapshots into a
//! stable list of "where is everyone" arrows: distance, screen rotation and
//! staleness per peer, plus a throttled stream of self-location publishes.

pub mod config;
pub mod cues;
pub mod error;
pub mod filters;
pub mod geo;
pub mod health_monitor;
pub mod live_status;
pub mod presentation;
pub mod sensor_fusion;
pub mod sensors;
pub mod session_log;
pub mod smoothing;
pub mod types;
pub mod write_gate;

pub use config::FusionConfig;
pub use error::{FusionError, Result};
pub use sensor_fusion::{FusionEngine, FusionEvent, PeerFilterState, TickResult};
pub use types::{
    DisplayFrame, HeadingSource, HeadingStatus, LatLng, PeerDisplay, PeerSet, PeerSnapshot, PublishRecord, RawFix,
    RawHeading, SensorEvent, StalenessClass,
};
pub use write_gate::{PublishDecision, PublishReason, WriteGate};
