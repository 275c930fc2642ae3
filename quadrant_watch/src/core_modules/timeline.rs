// THEORY:
// The `TimelineReconstructor` answers the question a chart asks: "how active
// was this region at 10:04?". The report only holds sparse detection points,
// retained when something changed, so most bucket times have no point of their
// own. Each bucket is filled by the first rule that applies:
//
// 1.  **Direct**: points within 30 s of the bucket. Mean change of the active
//     ones, 0 if none of them were active.
// 2.  **Interpolated**: a point on each side no more than 10 min apart. Linear
//     in elapsed time; active if either neighbour was.
// 3.  **Decayed**: only a recent (3 min) active point behind the bucket. Its
//     value fades linearly over 5 min but never below 30%.
// 4.  **Fallback**: the region has no points at all. A value shaped from its
//     activity rate, the hour of day and seeded noise, so the same report
//     always draws the same chart.
//
// Anything else is a quiet bucket (0). The reconstructor holds no state beyond
// its bucket sizing, so it can be shared freely.

use crate::config::TimelineConfig;
use crate::core_modules::Timestamp;
use crate::core_modules::detection_sampler::DetectionPoint;
use crate::core_modules::round_hundredths;
use crate::core_modules::session_report::{ActivityReport, ReportEntry};
use chrono::{Duration, Timelike};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

pub const DIRECT_MATCH_WINDOW_SECS: i64 = 30;
pub const MAX_INTERPOLATION_GAP_SECS: i64 = 10 * 60;
pub const MAX_DECAY_AGE_SECS: i64 = 3 * 60;
const DECAY_SPAN_MINUTES: f64 = 5.0;
const MIN_DECAY_FACTOR: f64 = 0.3;

/// Which rule produced a bucket value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SampleSource {
    Direct,
    Interpolated,
    Decayed,
    Fallback,
    Quiet,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimelineSample {
    pub timestamp: Timestamp,
    /// 0..=100, two decimals.
    pub value: f64,
    pub has_activity: bool,
    pub source: SampleSource,
}

impl TimelineSample {
    fn quiet(timestamp: Timestamp) -> Self {
        Self {
            timestamp,
            value: 0.0,
            has_activity: false,
            source: SampleSource::Quiet,
        }
    }

    fn new(timestamp: Timestamp, value: f64, has_activity: bool, source: SampleSource) -> Self {
        Self {
            timestamp,
            value: round_hundredths(value.clamp(0.0, 100.0)),
            has_activity,
            source,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionSeries {
    pub region: String,
    pub samples: Vec<TimelineSample>,
}

impl RegionSeries {
    pub fn values(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.value).collect()
    }
}

/// Dense, chart-ready series for every region of a report. Every series has
/// exactly one sample per label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Timeline {
    pub interval_minutes: i64,
    pub labels: Vec<String>,
    pub series: Vec<RegionSeries>,
}

impl Timeline {
    pub fn series_for(&self, region: &str) -> Option<&RegionSeries> {
        self.series.iter().find(|s| s.region == region)
    }
}

#[derive(Debug, Clone, Default)]
pub struct TimelineReconstructor {
    config: TimelineConfig,
}

impl TimelineReconstructor {
    pub fn new(config: TimelineConfig) -> Self {
        Self {
            config: config.clamped(),
        }
    }

    /// Bucket width and bucket times for `[start, end]`. The window is
    /// inclusive: buckets start at `start` and the last one is at or before
    /// `end`.
    pub fn buckets(&self, start: Timestamp, end: Timestamp) -> (i64, Vec<Timestamp>) {
        let (start, end) = ordered(start, end);
        let span_secs = (end - start).num_seconds();

        let mut interval_minutes = self.config.interval_minutes;
        if bucket_count(span_secs, interval_minutes) > self.config.max_buckets {
            interval_minutes = self.config.widened_interval_minutes;
        }

        let step = Duration::minutes(interval_minutes);
        let times = (0..bucket_count(span_secs, interval_minutes))
            .map(|i| start + step * i as i32)
            .collect();
        (interval_minutes, times)
    }

    /// `(label, value)` per bucket for one region.
    pub fn reconstruct(&self, entry: &ReportEntry, start: Timestamp, end: Timestamp) -> Vec<(String, f64)> {
        let (start, end) = ordered(start, end);
        let (_, times) = self.buckets(start, end);
        let crosses_midnight = start.date() != end.date();
        times
            .into_iter()
            .map(|t| (label(t, crosses_midnight), self.sample_at(entry, t).value))
            .collect()
    }

    /// Reconstructs every entry of `report` over its own window.
    pub fn reconstruct_report(&self, report: &ActivityReport) -> Timeline {
        let (start, end) = ordered(report.report_start, report.report_end);
        let (interval_minutes, times) = self.buckets(start, end);
        let crosses_midnight = start.date() != end.date();

        let labels = times.iter().map(|t| label(*t, crosses_midnight)).collect();
        let series = report
            .entries
            .iter()
            .map(|entry| RegionSeries {
                region: entry.region.clone(),
                samples: times.iter().map(|t| self.sample_at(entry, *t)).collect(),
            })
            .collect();

        Timeline {
            interval_minutes,
            labels,
            series,
        }
    }

    /// The value of `entry` at an arbitrary instant.
    pub fn sample_at(&self, entry: &ReportEntry, at: Timestamp) -> TimelineSample {
        let points = &entry.detection_points;
        if points.is_empty() {
            return fallback(entry, at);
        }

        if let Some(sample) = direct_match(points, at) {
            return sample;
        }

        // Points are ordered by time, so the neighbours sit either side of
        // the partition point.
        let split = points.partition_point(|p| p.timestamp < at);
        let prior = split.checked_sub(1).and_then(|i| points.get(i));
        let next = points.get(split);

        if let (Some(prior), Some(next)) = (prior, next) {
            if let Some(sample) = interpolate(prior, next, at) {
                return sample;
            }
        }

        if let Some(prior) = prior {
            if let Some(sample) = decay(prior, at) {
                return sample;
            }
        }

        TimelineSample::quiet(at)
    }
}

fn direct_match(points: &VecDeque<DetectionPoint>, at: Timestamp) -> Option<TimelineSample> {
    let window = Duration::seconds(DIRECT_MATCH_WINDOW_SECS);
    let from = points.partition_point(|p| p.timestamp < at - window);
    let to = points.partition_point(|p| p.timestamp <= at + window);
    if from >= to {
        return None;
    }

    let active: Vec<f64> = points
        .range(from..to)
        .filter(|p| p.has_activity)
        .map(|p| p.change_percent)
        .collect();
    if active.is_empty() {
        return Some(TimelineSample::new(at, 0.0, false, SampleSource::Direct));
    }

    let mean = active.iter().sum::<f64>() / active.len() as f64;
    Some(TimelineSample::new(at, mean, true, SampleSource::Direct))
}

fn interpolate(prior: &DetectionPoint, next: &DetectionPoint, at: Timestamp) -> Option<TimelineSample> {
    let gap = next.timestamp - prior.timestamp;
    if gap > Duration::seconds(MAX_INTERPOLATION_GAP_SECS) {
        return None;
    }

    let has_activity = prior.has_activity || next.has_activity;
    if !has_activity {
        return Some(TimelineSample::new(at, 0.0, false, SampleSource::Interpolated));
    }

    let gap_ms = gap.num_milliseconds();
    let ratio = if gap_ms == 0 {
        0.0
    } else {
        (at - prior.timestamp).num_milliseconds() as f64 / gap_ms as f64
    };
    let value = prior.change_percent + (next.change_percent - prior.change_percent) * ratio;
    Some(TimelineSample::new(at, value, true, SampleSource::Interpolated))
}

fn decay(prior: &DetectionPoint, at: Timestamp) -> Option<TimelineSample> {
    let age = at - prior.timestamp;
    if !prior.has_activity || age > Duration::seconds(MAX_DECAY_AGE_SECS) {
        return None;
    }

    let minutes_since = age.num_milliseconds() as f64 / 60_000.0;
    let factor = (1.0 - minutes_since / DECAY_SPAN_MINUTES).max(MIN_DECAY_FACTOR);
    Some(TimelineSample::new(
        at,
        prior.change_percent * factor,
        true,
        SampleSource::Decayed,
    ))
}

fn fallback(entry: &ReportEntry, at: Timestamp) -> TimelineSample {
    let rate = entry.activity_rate();
    if rate <= 0.0 {
        return TimelineSample::new(at, 0.0, false, SampleSource::Fallback);
    }

    let seed = fnv1a(entry.region.as_bytes()) ^ at.and_utc().timestamp() as u64;
    let noise: f64 = StdRng::seed_from_u64(seed).r#gen();
    let value = rate * time_of_day_multiplier(at.hour()) * (0.8 + 0.4 * noise);
    let sample = TimelineSample::new(at, value, false, SampleSource::Fallback);
    TimelineSample {
        has_activity: sample.value > 0.0,
        ..sample
    }
}

/// Typical desk-hours shape: quiet at night, busy mid-morning and afternoon.
pub fn time_of_day_multiplier(hour: u32) -> f64 {
    match hour {
        0..=5 => 0.1,
        6..=8 => 0.5,
        9..=11 => 1.2,
        12..=13 => 0.8,
        14..=17 => 1.1,
        18..=21 => 0.6,
        _ => 0.3,
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    bytes
        .iter()
        .fold(OFFSET, |hash, byte| (hash ^ u64::from(*byte)).wrapping_mul(PRIME))
}

fn bucket_count(span_secs: i64, interval_minutes: i64) -> usize {
    (span_secs / (interval_minutes * 60)) as usize + 1
}

fn ordered(a: Timestamp, b: Timestamp) -> (Timestamp, Timestamp) {
    if a <= b { (a, b) } else { (b, a) }
}

fn label(at: Timestamp, crosses_midnight: bool) -> String {
    if crosses_midnight {
        at.format("%m-%d %H:%M").to_string()
    } else {
        at.format("%H:%M").to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::region_tracker::RegionStats;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32, s: u32) -> Timestamp {
        NaiveDate::from_ymd_opt(2024, 3, 4)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    fn point(ts: Timestamp, change_percent: f64, has_activity: bool) -> DetectionPoint {
        DetectionPoint {
            timestamp: ts,
            change_percent,
            has_activity,
        }
    }

    fn entry(points: Vec<DetectionPoint>, total: u64, activities: u64) -> ReportEntry {
        let mut stats = RegionStats::new("A", at(9, 0, 0));
        stats.total_comparisons = total;
        stats.activity_count = activities;
        ReportEntry {
            region: "A".to_string(),
            stats,
            detection_points: points.into(),
            first_activity_time: at(9, 0, 0),
            last_activity_time: None,
            active_duration_secs: 0,
        }
    }

    #[test]
    fn interpolates_between_neighbours() {
        let entry = entry(
            vec![point(at(10, 0, 0), 1.0, false), point(at(10, 9, 0), 9.0, true)],
            2,
            1,
        );
        let sample = TimelineReconstructor::default().sample_at(&entry, at(10, 4, 30));
        assert_eq!(sample.source, SampleSource::Interpolated);
        assert!((sample.value - 5.0).abs() < 0.01);
        assert!(sample.has_activity);
    }

    #[test]
    fn interpolation_needs_an_active_neighbour() {
        let entry = entry(
            vec![point(at(10, 0, 0), 1.0, false), point(at(10, 4, 0), 1.5, false)],
            2,
            0,
        );
        let sample = TimelineReconstructor::default().sample_at(&entry, at(10, 2, 0));
        assert_eq!(sample.source, SampleSource::Interpolated);
        assert_eq!(sample.value, 0.0);
        assert!(!sample.has_activity);
    }

    #[test]
    fn direct_match_averages_active_points() {
        let entry = entry(
            vec![
                point(at(10, 0, 0), 4.0, true),
                point(at(10, 0, 20), 1.0, false),
                point(at(10, 0, 30), 8.0, true),
                point(at(10, 0, 31), 50.0, true),
            ],
            4,
            3,
        );
        let sample = TimelineReconstructor::default().sample_at(&entry, at(10, 0, 0));
        assert_eq!(sample.source, SampleSource::Direct);
        assert_eq!(sample.value, 6.0);
    }

    #[test]
    fn direct_match_with_only_inactive_points_is_zero() {
        let entry = entry(vec![point(at(10, 0, 10), 1.0, false)], 1, 0);
        let sample = TimelineReconstructor::default().sample_at(&entry, at(10, 0, 0));
        assert_eq!(sample.source, SampleSource::Direct);
        assert_eq!(sample.value, 0.0);
    }

    #[test]
    fn decay_fades_a_recent_active_point() {
        let entry = entry(vec![point(at(10, 0, 0), 20.0, true)], 1, 1);
        let reconstructor = TimelineReconstructor::default();

        let two_min = reconstructor.sample_at(&entry, at(10, 2, 0));
        assert_eq!(two_min.source, SampleSource::Decayed);
        assert_eq!(two_min.value, 12.0);

        let too_old = reconstructor.sample_at(&entry, at(10, 3, 1));
        assert_eq!(too_old.source, SampleSource::Quiet);
        assert_eq!(too_old.value, 0.0);
    }

    #[test]
    fn wide_gap_without_recent_point_is_quiet() {
        let entry = entry(
            vec![point(at(10, 0, 0), 30.0, true), point(at(10, 30, 0), 30.0, true)],
            2,
            2,
        );
        let sample = TimelineReconstructor::default().sample_at(&entry, at(10, 15, 0));
        assert_eq!(sample.source, SampleSource::Quiet);
    }

    #[test]
    fn fallback_is_deterministic_and_bounded() {
        let entry = entry(Vec::new(), 10, 5);
        let reconstructor = TimelineReconstructor::default();
        let first = reconstructor.reconstruct(&entry, at(9, 0, 0), at(12, 0, 0));
        let second = reconstructor.reconstruct(&entry, at(9, 0, 0), at(12, 0, 0));
        assert_eq!(first, second);
        assert!(first.iter().all(|(_, v)| (0.0..=100.0).contains(v)));
        // 50% rate at a 1.2 multiplier lands between 48 and 72.
        let (_, value) = &first[0];
        assert!((48.0..=72.0).contains(value));
    }

    #[test]
    fn fallback_for_an_idle_region_is_zero() {
        let entry = entry(Vec::new(), 10, 0);
        let sample = TimelineReconstructor::default().sample_at(&entry, at(10, 0, 0));
        assert_eq!(sample.source, SampleSource::Fallback);
        assert_eq!(sample.value, 0.0);
    }

    #[test]
    fn buckets_widen_past_the_limit() {
        let reconstructor = TimelineReconstructor::default();
        let (interval, times) = reconstructor.buckets(at(0, 0, 0), at(10, 0, 0));
        assert_eq!(interval, 1);
        assert_eq!(times.len(), 601);

        let (interval, times) = reconstructor.buckets(at(0, 0, 0), at(23, 0, 0));
        assert_eq!(interval, 5);
        assert_eq!(times.len(), 277);
        assert_eq!(times[1], at(0, 5, 0));
    }

    #[test]
    fn oversized_intervals_are_capped_to_a_day() {
        let reconstructor = TimelineReconstructor::new(TimelineConfig {
            interval_minutes: i64::MAX,
            widened_interval_minutes: i64::MAX,
            max_buckets: 1,
        });
        let (interval, times) = reconstructor.buckets(at(0, 0, 0), at(23, 59, 0));
        assert_eq!(interval, 24 * 60);
        assert_eq!(times, vec![at(0, 0, 0)]);
    }

    #[test]
    fn labels_include_date_across_midnight() {
        let entry = entry(Vec::new(), 0, 0);
        let reconstructor = TimelineReconstructor::default();

        let same_day = reconstructor.reconstruct(&entry, at(10, 0, 0), at(10, 2, 0));
        let labels: Vec<&str> = same_day.iter().map(|(l, _)| l.as_str()).collect();
        assert_eq!(labels, vec!["10:00", "10:01", "10:02"]);

        let late = at(23, 59, 0);
        let next_day = reconstructor.reconstruct(&entry, late, late + Duration::minutes(1));
        assert_eq!(next_day[0].0, "03-04 23:59");
        assert_eq!(next_day[1].0, "03-05 00:00");
    }

    #[test]
    fn report_series_are_aligned() {
        let mut report = ActivityReport::new(at(10, 0, 0));
        report.report_end = at(10, 10, 0);
        report.entries.push(entry(vec![point(at(10, 5, 0), 7.0, true)], 3, 1));
        let mut quiet = entry(Vec::new(), 3, 0);
        quiet.region = "B".to_string();
        report.entries.push(quiet);

        let timeline = TimelineReconstructor::default().reconstruct_report(&report);
        assert_eq!(timeline.labels.len(), 11);
        assert!(timeline.series.iter().all(|s| s.samples.len() == 11));
        assert_eq!(timeline.series_for("A").unwrap().values()[5], 7.0);
        assert!(timeline.series_for("B").unwrap().values().iter().all(|v| *v == 0.0));
    }
}
