//! Heading source arbitration.
//!
//! The compass wins when its recent samples agree (low circular variance);
//! otherwise the GPS course is used while the device is actually moving;
//! otherwise there is no heading and the display freezes.

use nalgebra::Vector2;
use std::collections::VecDeque;

use crate::config::HeadingConfig;
use crate::types::{HeadingSource, HeadingStatus, RawFix, RawHeading};

/// Circular variance of angles in degrees: `1 - |mean unit vector|`.
///
/// 0 means all samples point the same way, 1 means they cancel out.
/// Returns `None` for an empty input.
pub fn circular_variance<I>(samples_deg: I) -> Option<f64>
where
    I: IntoIterator<Item = f64>,
{
    let mut sum = Vector2::<f64>::zeros();
    let mut count = 0usize;
    for deg in samples_deg {
        let r = deg.to_radians();
        sum += Vector2::new(r.cos(), r.sin());
        count += 1;
    }
    if count == 0 {
        return None;
    }
    let resultant = sum.norm() / count as f64;
    Some((1.0 - resultant).clamp(0.0, 1.0))
}

/// Rolling window of the most recent compass samples.
#[derive(Clone, Debug)]
pub struct HeadingBuffer {
    samples: VecDeque<RawHeading>,
    capacity: usize,
}

impl HeadingBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a sample; non-finite headings are dropped and return `false`.
    pub fn push(&mut self, sample: RawHeading) -> bool {
        if !sample.heading_deg.is_finite() {
            return false;
        }
        self.samples.push_back(RawHeading {
            heading_deg: crate::geo::wrap_360(sample.heading_deg),
            captured_at_ms: sample.captured_at_ms,
        });
        while self.samples.len() > self.capacity {
            self.samples.pop_front();
        }
        true
    }

    pub fn latest(&self) -> Option<&RawHeading> {
        self.samples.back()
    }

    pub fn variance(&self) -> Option<f64> {
        circular_variance(self.samples.iter().map(|s| s.heading_deg))
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

#[derive(Clone, Debug)]
pub struct HeadingArbiter {
    buffer: HeadingBuffer,
    unstable_since_ms: Option<i64>,
}

impl HeadingArbiter {
    pub fn new(cfg: &HeadingConfig) -> Self {
        Self {
            buffer: HeadingBuffer::new(cfg.buffer_len),
            unstable_since_ms: None,
        }
    }

    pub fn push_sample(&mut self, sample: RawHeading) -> bool {
        self.buffer.push(sample)
    }

    /// Pick this tick's heading.
    ///
    /// `compass_available` is false when the heading sampler has gone silent;
    /// `fix` is the latest self fix, if the location sampler is alive.
    pub fn evaluate(
        &mut self,
        now_ms: i64,
        fix: Option<&RawFix>,
        compass_available: bool,
        cfg: &HeadingConfig,
    ) -> HeadingStatus {
        let variance = self.buffer.variance();

        let compass = self.buffer.latest().filter(|_| {
            compass_available
                && self.buffer.len() >= cfg.min_samples
                && variance.map(|v| v < cfg.variance_stable).unwrap_or(false)
        });

        let (heading_deg, source) = if let Some(sample) = compass {
            (Some(sample.heading_deg), HeadingSource::Compass)
        } else if let Some(course) = fix
            .filter(|f| f.speed_or_zero() > cfg.course_min_speed_mps)
            .and_then(|f| f.course())
        {
            (Some(course), HeadingSource::GpsCourse)
        } else {
            (None, HeadingSource::None)
        };

        let unstable_for_ms = if heading_deg.is_some() {
            self.unstable_since_ms = None;
            None
        } else {
            let since = *self.unstable_since_ms.get_or_insert(now_ms);
            Some((now_ms - since).max(0))
        };

        HeadingStatus {
            heading_deg,
            source,
            variance,
            unstable_for_ms,
            show_hint: unstable_for_ms.map(|ms| ms > cfg.hint_after_ms).unwrap_or(false),
        }
    }

    pub fn buffer(&self) -> &HeadingBuffer {
        &self.buffer
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
        self.unstable_since_ms = None;
    }
}
