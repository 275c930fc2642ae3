//! Engine configuration: detection thresholds plus the memory and queue bounds
//! of the reporting side. Loaded from and saved to JSON.

use crate::error::{ActivityError, ActivityResult};
use serde::{Deserialize, Deserializer, Serialize};
use std::path::Path;
use tracing::warn;

pub const MIN_ACTIVITY_THRESHOLD_PERCENT: f64 = 0.1;
pub const MAX_ACTIVITY_THRESHOLD_PERCENT: f64 = 50.0;
pub const DEFAULT_PIXEL_TOLERANCE: u8 = 10;
pub const DEFAULT_ACTIVITY_THRESHOLD_PERCENT: f64 = 2.0;

pub const DEFAULT_MAX_POINTS_PER_REGION: usize = 5000;
pub const DEFAULT_EVICTION_BATCH: usize = 100;
pub const DEFAULT_EVENT_QUEUE_CAPACITY: usize = 1024;
pub const DEFAULT_BUS_CAPACITY: usize = 64;

/// Widest timeline bucket: one day.
pub const MAX_INTERVAL_MINUTES: i64 = 24 * 60;

/// Thresholds used by the tracker to decide whether a region is "active".
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActivityConfig {
    /// Per-channel absolute difference at or below which a pixel is unchanged.
    /// Out-of-range values in a config file are clamped, not rejected.
    #[serde(deserialize_with = "deserialize_tolerance")]
    pub pixel_tolerance: u8,
    /// Percentage of changed pixels required to call a comparison active.
    pub activity_threshold_percent: f64,
}

impl Default for ActivityConfig {
    fn default() -> Self {
        Self {
            pixel_tolerance: DEFAULT_PIXEL_TOLERANCE,
            activity_threshold_percent: DEFAULT_ACTIVITY_THRESHOLD_PERCENT,
        }
    }
}

impl ActivityConfig {
    /// Builds a config from raw values, clamping both into their valid ranges.
    /// Out-of-range values are never rejected.
    pub fn new(pixel_tolerance: i64, activity_threshold_percent: f64) -> Self {
        Self {
            pixel_tolerance: clamp_tolerance(pixel_tolerance),
            activity_threshold_percent: clamp_threshold(activity_threshold_percent),
        }
    }

    /// Returns a copy with every field forced into range.
    pub fn clamped(self) -> Self {
        Self {
            pixel_tolerance: self.pixel_tolerance,
            activity_threshold_percent: clamp_threshold(self.activity_threshold_percent),
        }
    }
}

fn clamp_tolerance(requested: i64) -> u8 {
    let applied = requested.clamp(0, u8::MAX as i64) as u8;
    if applied as i64 != requested {
        warn!(requested, applied, "pixel tolerance clamped");
    }
    applied
}

fn deserialize_tolerance<'de, D>(deserializer: D) -> Result<u8, D::Error>
where
    D: Deserializer<'de>,
{
    i64::deserialize(deserializer).map(clamp_tolerance)
}

fn clamp_threshold(requested: f64) -> f64 {
    if requested.is_nan() {
        warn!("activity threshold is NaN, using default");
        return DEFAULT_ACTIVITY_THRESHOLD_PERCENT;
    }
    let applied = requested.clamp(MIN_ACTIVITY_THRESHOLD_PERCENT, MAX_ACTIVITY_THRESHOLD_PERCENT);
    if applied != requested {
        warn!(requested, applied, "activity threshold clamped");
    }
    applied
}

/// Bucket sizing for timeline reconstruction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimelineConfig {
    /// Preferred bucket width.
    pub interval_minutes: i64,
    /// Bucket width used when the preferred one would produce too many buckets.
    pub widened_interval_minutes: i64,
    /// Bucket count above which the widened interval kicks in.
    pub max_buckets: usize,
}

impl Default for TimelineConfig {
    fn default() -> Self {
        Self {
            interval_minutes: 1,
            widened_interval_minutes: 5,
            max_buckets: 720,
        }
    }
}

impl TimelineConfig {
    /// Intervals forced into `1..=MAX_INTERVAL_MINUTES`, the widened one never
    /// narrower than the base one.
    pub fn clamped(self) -> Self {
        let interval_minutes = self.interval_minutes.clamp(1, MAX_INTERVAL_MINUTES);
        Self {
            interval_minutes,
            widened_interval_minutes: self
                .widened_interval_minutes
                .clamp(interval_minutes, MAX_INTERVAL_MINUTES),
            max_buckets: self.max_buckets.max(1),
        }
    }
}

/// Configuration for the `ActivityPipeline`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub activity: ActivityConfig,
    /// Upper bound on retained detection points per region.
    pub max_points_per_region: usize,
    /// How many of the oldest points are dropped at once when the cap is hit.
    pub eviction_batch: usize,
    /// Capacity of the tracker -> report builder queue.
    pub event_queue_capacity: usize,
    /// Capacity of each outbound broadcast channel.
    pub bus_capacity: usize,
    pub timeline: TimelineConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            activity: ActivityConfig::default(),
            max_points_per_region: DEFAULT_MAX_POINTS_PER_REGION,
            eviction_batch: DEFAULT_EVICTION_BATCH,
            event_queue_capacity: DEFAULT_EVENT_QUEUE_CAPACITY,
            bus_capacity: DEFAULT_BUS_CAPACITY,
            timeline: TimelineConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Forces every field into a usable range.
    pub fn validated(mut self) -> Self {
        self.activity = self.activity.clamped();
        self.max_points_per_region = self.max_points_per_region.max(1);
        self.eviction_batch = self.eviction_batch.max(1);
        self.event_queue_capacity = self.event_queue_capacity.max(1);
        self.bus_capacity = self.bus_capacity.max(1);
        self.timeline = self.timeline.clamped();
        self
    }
}

/// Load config from a JSON file. Missing fields take their defaults.
pub fn load_config(path: &Path) -> ActivityResult<PipelineConfig> {
    let json = std::fs::read_to_string(path).map_err(|e| ActivityError::config_io(path, e))?;
    let config: PipelineConfig = serde_json::from_str(&json)?;
    Ok(config.validated())
}

/// Save config to disk as pretty-printed JSON.
pub fn save_config(path: &Path, config: &PipelineConfig) -> ActivityResult<()> {
    let json = serde_json::to_string_pretty(config)?;
    std::fs::write(path, json).map_err(|e| ActivityError::config_io(path, e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn tolerance_is_clamped_to_byte_range() {
        assert_eq!(ActivityConfig::new(-5, 2.0).pixel_tolerance, 0);
        assert_eq!(ActivityConfig::new(300, 2.0).pixel_tolerance, 255);
        assert_eq!(ActivityConfig::new(42, 2.0).pixel_tolerance, 42);
    }

    #[test]
    fn threshold_is_clamped_not_rejected() {
        assert_eq!(ActivityConfig::new(10, 0.0).activity_threshold_percent, 0.1);
        assert_eq!(ActivityConfig::new(10, 99.0).activity_threshold_percent, 50.0);
        assert_eq!(ActivityConfig::new(10, 7.5).activity_threshold_percent, 7.5);
        assert_eq!(
            ActivityConfig::new(10, f64::NAN).activity_threshold_percent,
            DEFAULT_ACTIVITY_THRESHOLD_PERCENT
        );
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let tmp = TempDir::new().expect("failed to create temp dir");
        let path = tmp.path().join("activity.json");
        std::fs::write(&path, r#"{ "activity": { "pixel_tolerance": 30 }, "max_points_per_region": 0 }"#)
            .unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.activity.pixel_tolerance, 30);
        assert_eq!(
            config.activity.activity_threshold_percent,
            DEFAULT_ACTIVITY_THRESHOLD_PERCENT
        );
        // Zero would make the sampler useless; validation lifts it to 1.
        assert_eq!(config.max_points_per_region, 1);
        assert_eq!(config.eviction_batch, DEFAULT_EVICTION_BATCH);
    }

    #[test]
    fn out_of_range_tolerance_in_file_is_clamped() {
        let tmp = TempDir::new().expect("failed to create temp dir");
        let path = tmp.path().join("activity.json");

        std::fs::write(
            &path,
            r#"{ "activity": { "pixel_tolerance": 300, "activity_threshold_percent": 2.0 } }"#,
        )
        .unwrap();
        assert_eq!(load_config(&path).unwrap().activity.pixel_tolerance, 255);

        std::fs::write(&path, r#"{ "activity": { "pixel_tolerance": -4, "activity_threshold_percent": 80.0 } }"#)
            .unwrap();
        let config = load_config(&path).unwrap();
        assert_eq!(config.activity.pixel_tolerance, 0);
        assert_eq!(config.activity.activity_threshold_percent, 50.0);
    }

    #[test]
    fn huge_timeline_intervals_are_capped() {
        let tmp = TempDir::new().expect("failed to create temp dir");
        let path = tmp.path().join("activity.json");
        std::fs::write(
            &path,
            r#"{ "timeline": { "interval_minutes": 9223372036854775807, "widened_interval_minutes": 0 } }"#,
        )
        .unwrap();

        let timeline = load_config(&path).unwrap().timeline;
        assert_eq!(timeline.interval_minutes, MAX_INTERVAL_MINUTES);
        assert_eq!(timeline.widened_interval_minutes, MAX_INTERVAL_MINUTES);
    }

    #[test]
    fn save_then_load_preserves_values() {
        let tmp = TempDir::new().expect("failed to create temp dir");
        let path = tmp.path().join("activity.json");
        let mut config = PipelineConfig::default();
        config.activity = ActivityConfig::new(25, 4.5);
        config.timeline.max_buckets = 100;

        save_config(&path, &config).unwrap();
        assert_eq!(load_config(&path).unwrap(), config);
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let tmp = TempDir::new().expect("failed to create temp dir");
        let err = load_config(&tmp.path().join("nope.json")).unwrap_err();
        assert!(matches!(err, ActivityError::ConfigIo { .. }));
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        let tmp = TempDir::new().expect("failed to create temp dir");
        let path = tmp.path().join("broken.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(load_config(&path), Err(ActivityError::ConfigParse(_))));
    }
}
