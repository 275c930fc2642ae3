// THEORY:
// The `session_report` module is the aggregation layer. It turns the stream of
// per-region comparison events into the narrative a dashboard wants: one entry
// per region, each carrying a stats snapshot, a bounded history of detection
// points and the span over which the region was active. Where a tracker only
// knows "now", the report knows "so far".
//
// The `SessionReportBuilder` is the single writer of the live `ActivityReport`.
// Readers never borrow into it; they receive deep copies (`snapshot`), so an
// exporter can take its time while the live report keeps moving. The summary is
// always derived from the entries and recomputed on demand, never updated
// incrementally, which keeps it idempotent.

use crate::core_modules::Timestamp;
use crate::core_modules::detection_sampler::{DetectionPoint, DetectionPointSampler};
use crate::core_modules::region_tracker::{ComparisonEvent, RegionStats};
use crate::core_modules::round_hundredths;
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use uuid::Uuid;

/// Everything the report knows about one region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportEntry {
    pub region: String,
    pub stats: RegionStats,
    pub detection_points: VecDeque<DetectionPoint>,
    /// Timestamp of the first event seen for this region.
    pub first_activity_time: Timestamp,
    pub last_activity_time: Option<Timestamp>,
    /// Seconds from `first_activity_time` to `last_activity_time`.
    pub active_duration_secs: i64,
}

impl ReportEntry {
    fn new(stats: RegionStats, first_seen: Timestamp) -> Self {
        Self {
            region: stats.region.clone(),
            stats,
            detection_points: VecDeque::new(),
            first_activity_time: first_seen,
            last_activity_time: None,
            active_duration_secs: 0,
        }
    }

    pub fn activity_rate(&self) -> f64 {
        self.stats.activity_rate()
    }

    pub fn active_duration(&self) -> Duration {
        Duration::seconds(self.active_duration_secs)
    }

    fn refresh_stats(&mut self, stats: RegionStats) {
        self.last_activity_time = stats.last_activity_time;
        self.active_duration_secs = self
            .last_activity_time
            .map(|last| (last - self.first_activity_time).num_seconds().max(0))
            .unwrap_or(0);
        self.stats = stats;
    }
}

/// Aggregate figures derived from a report's entries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub total_quadrants: usize,
    pub total_comparisons: u64,
    pub total_activities: u64,
    /// Mean of the entries' activity rates.
    pub average_activity_rate: f64,
    /// Entry with the highest activity rate; ties go to the first one seen.
    pub most_active_region: Option<String>,
    /// 0..=100. See [`monitoring_efficiency`].
    pub monitoring_efficiency: f64,
}

impl ReportSummary {
    pub fn from_entries(entries: &[ReportEntry]) -> Self {
        if entries.is_empty() {
            return Self::default();
        }

        let rates: Vec<f64> = entries.iter().map(ReportEntry::activity_rate).collect();
        let most_active_region = entries
            .iter()
            .zip(&rates)
            .fold(None::<(&ReportEntry, f64)>, |best, (entry, &rate)| match best {
                Some((_, best_rate)) if best_rate >= rate => best,
                _ => Some((entry, rate)),
            })
            .map(|(entry, _)| entry.region.clone());

        Self {
            total_quadrants: entries.len(),
            total_comparisons: entries.iter().map(|e| e.stats.total_comparisons).sum(),
            total_activities: entries.iter().map(|e| e.stats.activity_count).sum(),
            average_activity_rate: round_hundredths(mean(&rates)),
            most_active_region,
            monitoring_efficiency: monitoring_efficiency(&rates),
        }
    }
}

/// Coverage times balance, scaled to 0..=100.
///
/// Coverage is the share of regions that saw any activity. Balance is
/// `1 / (1 + cv)` where `cv` is the coefficient of variation of the activity
/// rates, so a session where every region is equally busy scores its full
/// coverage and one where a single region carries all the activity is pulled
/// down.
pub fn monitoring_efficiency(rates: &[f64]) -> f64 {
    if rates.is_empty() {
        return 0.0;
    }
    let average = mean(rates);
    if average <= 0.0 {
        return 0.0;
    }

    let coverage = rates.iter().filter(|r| **r > 0.0).count() as f64 / rates.len() as f64;
    let variance = rates.iter().map(|r| (r - average).powi(2)).sum::<f64>() / rates.len() as f64;
    let cv = variance.sqrt() / average;
    let balance = 1.0 / (1.0 + cv);

    round_hundredths((coverage * balance * 100.0).clamp(0.0, 100.0))
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// The report for one monitoring run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityReport {
    pub id: Uuid,
    pub report_start: Timestamp,
    pub report_end: Timestamp,
    pub entries: Vec<ReportEntry>,
    pub summary: ReportSummary,
}

impl ActivityReport {
    pub fn new(report_start: Timestamp) -> Self {
        Self {
            id: Uuid::new_v4(),
            report_start,
            report_end: report_start,
            entries: Vec::new(),
            summary: ReportSummary::default(),
        }
    }

    /// Recomputes `summary` from the current entries.
    pub fn generate_summary(&mut self) -> &ReportSummary {
        self.summary = ReportSummary::from_entries(&self.entries);
        &self.summary
    }

    pub fn entry(&self, region: &str) -> Option<&ReportEntry> {
        self.entries.iter().find(|e| e.region == region)
    }
}

/// Owns the live report and applies tracker events to it.
#[derive(Debug)]
pub struct SessionReportBuilder {
    report: ActivityReport,
    index: HashMap<String, usize>,
    sampler: DetectionPointSampler,
}

impl SessionReportBuilder {
    pub fn new(sampler: DetectionPointSampler, report_start: Timestamp) -> Self {
        Self {
            report: ActivityReport::new(report_start),
            index: HashMap::new(),
            sampler,
        }
    }

    /// Folds one event into the report and returns the updated entry.
    pub fn apply(&mut self, event: &ComparisonEvent) -> &ReportEntry {
        let timestamp = event.result.timestamp;
        if timestamp > self.report.report_end {
            self.report.report_end = timestamp;
        }
        if timestamp < self.report.report_start {
            self.report.report_start = timestamp;
        }

        let position = match self.index.get(&event.result.region) {
            Some(&position) => position,
            None => {
                self.report
                    .entries
                    .push(ReportEntry::new(event.stats.clone(), timestamp));
                let position = self.report.entries.len() - 1;
                self.index.insert(event.result.region.clone(), position);
                position
            }
        };

        let entry = &mut self.report.entries[position];
        entry.refresh_stats(event.stats.clone());
        self.sampler
            .maybe_retain(&mut entry.detection_points, &event.result);
        entry
    }

    /// A summarised deep copy of the live report.
    pub fn snapshot(&self) -> ActivityReport {
        let mut copy = self.report.clone();
        copy.generate_summary();
        copy
    }

    pub fn generate_summary(&mut self) -> &ReportSummary {
        self.report.generate_summary()
    }

    pub fn report(&self) -> &ActivityReport {
        &self.report
    }

    pub fn entry(&self, region: &str) -> Option<&ReportEntry> {
        self.index
            .get(region)
            .and_then(|&position| self.report.entries.get(position))
    }

    pub fn sampler(&self) -> &DetectionPointSampler {
        &self.sampler
    }

    /// A new report covering `[start, end]`.
    ///
    /// Stats are the current cumulative counters; they are not recomputed for
    /// the window. Only the detection points that fall inside the window are
    /// carried over.
    pub fn generate_historical_report(&self, start: Timestamp, end: Timestamp) -> ActivityReport {
        let (start, end) = if start <= end { (start, end) } else { (end, start) };

        let mut report = ActivityReport::new(start);
        report.report_end = end;
        report.entries = self
            .report
            .entries
            .iter()
            .map(|entry| {
                let mut entry = entry.clone();
                entry
                    .detection_points
                    .retain(|p| p.timestamp >= start && p.timestamp <= end);
                entry
            })
            .collect();
        report.generate_summary();
        report
    }

    /// Starts a fresh report; the sampler settings are kept.
    pub fn reset(&mut self, report_start: Timestamp) {
        self.report = ActivityReport::new(report_start);
        self.index.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::region_tracker::ComparisonResult;
    use chrono::NaiveDate;

    fn at(secs: i64) -> Timestamp {
        NaiveDate::from_ymd_opt(2024, 3, 4)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap()
            + Duration::seconds(secs)
    }

    fn event(region: &str, secs: i64, pct: f64, active: bool, total: u64, activities: u64) -> ComparisonEvent {
        let mut stats = RegionStats::new(region, at(0));
        stats.total_comparisons = total;
        stats.activity_count = activities;
        stats.cumulative_change_on_activity = pct * activities as f64;
        stats.last_activity_time = Some(at(secs));
        ComparisonEvent {
            result: ComparisonResult {
                region: region.to_string(),
                timestamp: at(secs),
                change_percent: pct,
                has_activity: active,
                is_first_capture: false,
            },
            stats,
        }
    }

    fn builder() -> SessionReportBuilder {
        SessionReportBuilder::new(DetectionPointSampler::default(), at(0))
    }

    #[test]
    fn apply_creates_one_entry_per_region() {
        let mut builder = builder();
        builder.apply(&event("A", 1, 3.0, true, 2, 1));
        builder.apply(&event("B", 2, 0.0, false, 2, 0));
        builder.apply(&event("A", 3, 9.0, true, 3, 2));

        let report = builder.report();
        assert_eq!(report.entries.len(), 2);
        assert_eq!(report.report_end, at(3));

        let a = builder.entry("A").unwrap();
        assert_eq!(a.stats.total_comparisons, 3);
        assert_eq!(a.first_activity_time, at(1));
        assert_eq!(a.active_duration_secs, 2);
        assert_eq!(a.detection_points.len(), 2);
    }

    #[test]
    fn snapshot_is_independent_of_live_report() {
        let mut builder = builder();
        builder.apply(&event("A", 1, 3.0, true, 2, 1));
        let mut snapshot = builder.snapshot();

        builder.apply(&event("A", 2, 50.0, true, 3, 2));
        snapshot.entries[0].detection_points.clear();

        assert_eq!(snapshot.entries[0].stats.total_comparisons, 2);
        assert_eq!(builder.entry("A").unwrap().detection_points.len(), 2);
        assert_eq!(snapshot.summary.total_quadrants, 1);
    }

    #[test]
    fn summary_picks_most_active_region() {
        let mut builder = builder();
        builder.apply(&event("A", 1, 3.0, true, 10, 2));
        builder.apply(&event("B", 1, 3.0, true, 10, 8));
        builder.apply(&event("C", 1, 0.0, false, 10, 0));

        let summary = builder.generate_summary().clone();
        assert_eq!(summary.total_quadrants, 3);
        assert_eq!(summary.total_comparisons, 30);
        assert_eq!(summary.total_activities, 10);
        assert_eq!(summary.average_activity_rate, 33.33);
        assert_eq!(summary.most_active_region.as_deref(), Some("B"));
        assert!(summary.monitoring_efficiency > 0.0 && summary.monitoring_efficiency < 100.0);

        // Idempotent.
        assert_eq!(builder.generate_summary(), &summary);
    }

    #[test]
    fn efficiency_bounds() {
        assert_eq!(monitoring_efficiency(&[]), 0.0);
        assert_eq!(monitoring_efficiency(&[0.0, 0.0]), 0.0);
        assert_eq!(monitoring_efficiency(&[40.0, 40.0, 40.0]), 100.0);
        let skewed = monitoring_efficiency(&[90.0, 0.0, 0.0, 0.0]);
        assert!(skewed > 0.0 && skewed < 25.0);
    }

    #[test]
    fn empty_report_has_default_summary() {
        let mut builder = builder();
        assert_eq!(builder.generate_summary(), &ReportSummary::default());
    }

    #[test]
    fn historical_report_filters_points_but_keeps_stats() {
        let mut builder = builder();
        builder.apply(&event("A", 0, 10.0, true, 2, 1));
        builder.apply(&event("A", 120, 0.0, false, 3, 1));
        builder.apply(&event("A", 240, 30.0, true, 4, 2));

        let historical = builder.generate_historical_report(at(200), at(60));
        assert_ne!(historical.id, builder.report().id);
        assert_eq!(historical.report_start, at(60));
        assert_eq!(historical.report_end, at(200));

        let entry = historical.entry("A").unwrap();
        assert_eq!(entry.detection_points.len(), 1);
        assert_eq!(entry.detection_points[0].timestamp, at(120));
        assert_eq!(entry.stats.total_comparisons, 4);
        assert_eq!(historical.summary.total_comparisons, 4);
    }

    #[test]
    fn reset_starts_a_new_report() {
        let mut builder = builder();
        builder.apply(&event("A", 1, 3.0, true, 2, 1));
        let old_id = builder.report().id;
        builder.reset(at(100));
        assert_ne!(builder.report().id, old_id);
        assert!(builder.report().entries.is_empty());
        assert!(builder.entry("A").is_none());
    }
}
