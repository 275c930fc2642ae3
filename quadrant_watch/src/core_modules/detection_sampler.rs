// THEORY:
// The `DetectionPointSampler` decides which comparison results are worth
// keeping as points on a region's activity history. A region compared once a
// second produces 86,400 results a day; almost all of them say "nothing new".
// The sampler keeps the ones that carry shape (the first point, every state
// flip, every jump in magnitude, and a heartbeat at least once a minute) and
// caps what is kept per region.
//
// The retained history is a `VecDeque` owned by the caller (the report entry);
// the sampler only reads its tail and trims its head. When the cap is hit it
// drops a whole batch of the oldest points at once, so a long session pays for
// eviction once per batch instead of on every new point.

use crate::config::{DEFAULT_EVICTION_BATCH, DEFAULT_MAX_POINTS_PER_REGION, PipelineConfig};
use crate::core_modules::Timestamp;
use crate::core_modules::region_tracker::ComparisonResult;
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::debug;

/// Change in percentage points that counts as a material magnitude change.
pub const MAGNITUDE_DELTA_PERCENT: f64 = 5.0;
/// Longest gap allowed between two retained points.
pub const MIN_SAMPLE_INTERVAL_SECS: i64 = 60;

/// A retained sample of a region's activity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DetectionPoint {
    pub timestamp: Timestamp,
    pub change_percent: f64,
    pub has_activity: bool,
}

impl From<&ComparisonResult> for DetectionPoint {
    fn from(result: &ComparisonResult) -> Self {
        Self {
            timestamp: result.timestamp,
            change_percent: result.change_percent,
            has_activity: result.has_activity,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DetectionPointSampler {
    max_points_per_region: usize,
    eviction_batch: usize,
    magnitude_delta: f64,
    min_interval: Duration,
}

impl Default for DetectionPointSampler {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_POINTS_PER_REGION, DEFAULT_EVICTION_BATCH)
    }
}

impl DetectionPointSampler {
    pub fn new(max_points_per_region: usize, eviction_batch: usize) -> Self {
        let max_points_per_region = max_points_per_region.max(1);
        Self {
            max_points_per_region,
            // A batch larger than the cap would empty the buffer; smaller than
            // one would never make room.
            eviction_batch: eviction_batch.clamp(1, max_points_per_region),
            magnitude_delta: MAGNITUDE_DELTA_PERCENT,
            min_interval: Duration::seconds(MIN_SAMPLE_INTERVAL_SECS),
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.max_points_per_region, config.eviction_batch)
    }

    pub fn max_points_per_region(&self) -> usize {
        self.max_points_per_region
    }

    pub fn eviction_batch(&self) -> usize {
        self.eviction_batch
    }

    /// The retention rule, evaluated against the last retained point.
    pub fn should_retain(&self, last: Option<&DetectionPoint>, result: &ComparisonResult) -> bool {
        let Some(last) = last else {
            return true;
        };

        result.has_activity != last.has_activity
            || (result.change_percent - last.change_percent).abs() > self.magnitude_delta
            || result.timestamp - last.timestamp >= self.min_interval
    }

    /// Appends `result` to `points` if it passes the retention rule, evicting
    /// the oldest batch first when the buffer is full. Returns whether the
    /// point was kept.
    ///
    /// A region's first result (normally its first capture) always starts the
    /// history. Results older than the newest retained point are skipped so
    /// the history stays ordered by time.
    pub fn maybe_retain(
        &self,
        points: &mut VecDeque<DetectionPoint>,
        result: &ComparisonResult,
    ) -> bool {
        if let Some(last) = points.back() {
            if result.timestamp < last.timestamp {
                debug!(
                    region = %result.region,
                    "out-of-order result not retained"
                );
                return false;
            }
        }
        if !self.should_retain(points.back(), result) {
            return false;
        }

        self.make_room(points);
        points.push_back(DetectionPoint::from(result));
        true
    }

    fn make_room(&self, points: &mut VecDeque<DetectionPoint>) {
        if points.len() < self.max_points_per_region {
            return;
        }
        let excess = points.len() + 1 - self.max_points_per_region;
        let evict = self.eviction_batch.max(excess).min(points.len());
        points.drain(..evict);
        debug!(evicted = evict, remaining = points.len(), "detection points evicted");
    }
}
