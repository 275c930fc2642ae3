// THEORY:
// The `RegionActivityTracker` is the stateful heart of the detection layer. It
// owns, for every named region, the last frame it saw and the running counters
// that describe how often that region has been active. Each new frame is
// compared against that baseline, the counters are updated, and the baseline is
// replaced. A region behaves like a single learning cell in a grid, except that
// regions are named, arrive in any order and may be compared from several
// threads at once.
//
// Key architectural principles:
// 1.  **Single owner per frame**: a region's baseline `FrameBuffer` lives inside
//     its slot and nowhere else. Replacing it drops the previous one in the same
//     critical section, so at most one baseline per region is ever alive.
// 2.  **Per-region locking**: the region map is read-mostly (`RwLock`), and each
//     slot has its own `Mutex`. Two different regions never contend; two calls
//     for the same region are serialised.
// 3.  **Ordered emission**: the resulting event is handed to the sink while the
//     slot lock is still held. Whatever the sink does with it (queue, broadcast),
//     events of one region leave the tracker in comparison order.
// 4.  **All or nothing**: input is validated before the slot is touched. A
//     rejected frame leaves both baseline and counters untouched.

use crate::config::ActivityConfig;
use crate::core_modules::Timestamp;
use crate::core_modules::frame_buffer::FrameBuffer;
use crate::core_modules::pixel_comparator::{self, ChangePercent};
use crate::core_modules::round_hundredths;
use crate::error::{ActivityError, ActivityResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use tracing::{debug, info};

/// Outcome of comparing one frame against its region's baseline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonResult {
    pub region: String,
    pub timestamp: Timestamp,
    /// 0..=100, two decimals.
    pub change_percent: ChangePercent,
    pub has_activity: bool,
    pub is_first_capture: bool,
}

/// Cumulative counters for one region since its last reset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionStats {
    pub region: String,
    pub total_comparisons: u64,
    pub activity_count: u64,
    pub last_activity_time: Option<Timestamp>,
    /// Sum of `change_percent` over active comparisons only.
    pub cumulative_change_on_activity: f64,
    pub session_start: Timestamp,
}

impl RegionStats {
    pub fn new(region: impl Into<String>, session_start: Timestamp) -> Self {
        Self {
            region: region.into(),
            total_comparisons: 0,
            activity_count: 0,
            last_activity_time: None,
            cumulative_change_on_activity: 0.0,
            session_start,
        }
    }

    /// Share of comparisons that were active, in percent.
    pub fn activity_rate(&self) -> f64 {
        if self.total_comparisons == 0 {
            return 0.0;
        }
        round_hundredths(self.activity_count as f64 / self.total_comparisons as f64 * 100.0)
    }

    /// Mean change percentage over active comparisons.
    pub fn avg_change_on_activity(&self) -> f64 {
        if self.activity_count == 0 {
            return 0.0;
        }
        round_hundredths(self.cumulative_change_on_activity / self.activity_count as f64)
    }
}

/// A comparison result paired with the stats snapshot taken in the same
/// critical section. This is what travels to the report builder.
#[derive(Debug, Clone, PartialEq)]
pub struct ComparisonEvent {
    pub result: ComparisonResult,
    pub stats: RegionStats,
}

/// Receiver of tracker events. Called with the region lock held, so
/// implementations must not block.
pub trait ComparisonSink: Send + Sync {
    fn deliver(&self, event: ComparisonEvent);
}

struct RegionSlot {
    baseline: Option<FrameBuffer>,
    stats: RegionStats,
    last_seen: Timestamp,
}

impl RegionSlot {
    fn new(region: &str, timestamp: Timestamp) -> Self {
        Self {
            baseline: None,
            stats: RegionStats::new(region, timestamp),
            last_seen: timestamp,
        }
    }
}

type SharedSlot = Arc<Mutex<RegionSlot>>;

/// Keeps one baseline frame and one `RegionStats` per region name.
pub struct RegionActivityTracker {
    regions: RwLock<HashMap<String, SharedSlot>>,
    sink: Option<Arc<dyn ComparisonSink>>,
    closed: AtomicBool,
}

impl Default for RegionActivityTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl RegionActivityTracker {
    pub fn new() -> Self {
        Self {
            regions: RwLock::new(HashMap::new()),
            sink: None,
            closed: AtomicBool::new(false),
        }
    }

    /// A tracker that forwards every comparison to `sink`.
    pub fn with_sink(sink: Arc<dyn ComparisonSink>) -> Self {
        Self {
            regions: RwLock::new(HashMap::new()),
            sink: Some(sink),
            closed: AtomicBool::new(false),
        }
    }

    /// Compares `frame` with the region's baseline and makes it the new baseline.
    pub fn compare(
        &self,
        region: &str,
        frame: FrameBuffer,
        timestamp: Timestamp,
        config: &ActivityConfig,
    ) -> ActivityResult<ComparisonResult> {
        self.compare_with_stats(region, frame, timestamp, config)
            .map(|event| event.result)
    }

    /// Like [`compare`](Self::compare) but also returns the stats snapshot.
    pub fn compare_with_stats(
        &self,
        region: &str,
        frame: FrameBuffer,
        timestamp: Timestamp,
        config: &ActivityConfig,
    ) -> ActivityResult<ComparisonEvent> {
        if region.trim().is_empty() {
            return Err(ActivityError::invalid_frame("region name is empty"));
        }
        if self.is_closed() {
            return Err(ActivityError::PipelineClosed);
        }

        let shared = self.slot_for(region, timestamp);
        let mut guard = lock(&shared);
        // `close` may have run its release pass between the check above and
        // taking the slot lock.
        if self.is_closed() {
            return Err(ActivityError::PipelineClosed);
        }
        let slot = &mut *guard;

        let result = match slot.baseline.as_ref() {
            None => {
                slot.stats.total_comparisons += 1;
                slot.stats.last_activity_time = Some(timestamp);
                ComparisonResult {
                    region: region.to_string(),
                    timestamp,
                    change_percent: 0.0,
                    has_activity: false,
                    is_first_capture: true,
                }
            }
            Some(previous) => {
                let change_percent =
                    pixel_comparator::compare(previous, &frame, config.pixel_tolerance);
                let has_activity = change_percent >= config.activity_threshold_percent;

                slot.stats.total_comparisons += 1;
                if has_activity {
                    slot.stats.activity_count += 1;
                    slot.stats.cumulative_change_on_activity += change_percent;
                    slot.stats.last_activity_time = Some(timestamp);
                }

                ComparisonResult {
                    region: region.to_string(),
                    timestamp,
                    change_percent,
                    has_activity,
                    is_first_capture: false,
                }
            }
        };

        // Dropping the old baseline happens here, inside the lock.
        slot.baseline = Some(frame);
        slot.last_seen = timestamp;

        debug!(
            region,
            change_percent = result.change_percent,
            has_activity = result.has_activity,
            first_capture = result.is_first_capture,
            "region compared"
        );

        let event = ComparisonEvent {
            result,
            stats: slot.stats.clone(),
        };
        if let Some(sink) = &self.sink {
            sink.deliver(event.clone());
        }
        Ok(event)
    }

    /// Zeroes a region's counters; its baseline frame is kept.
    /// Returns false if the region has never been seen.
    pub fn reset_stats(&self, region: &str) -> bool {
        let slot = read(&self.regions).get(region).cloned();
        match slot {
            Some(slot) => {
                let mut slot = lock(&slot);
                let last_seen = slot.last_seen;
                slot.stats = RegionStats::new(region, last_seen);
                info!(region, "region stats reset");
                true
            }
            None => false,
        }
    }

    /// Zeroes the counters of every tracked region.
    pub fn reset_all(&self) {
        for (region, slot) in self.snapshot_slots() {
            let mut slot = lock(&slot);
            let last_seen = slot.last_seen;
            slot.stats = RegionStats::new(region.as_str(), last_seen);
        }
        info!("all region stats reset");
    }

    pub fn stats(&self, region: &str) -> Option<RegionStats> {
        let slot = read(&self.regions).get(region).cloned()?;
        let stats = lock(&slot).stats.clone();
        Some(stats)
    }

    pub fn all_stats(&self) -> BTreeMap<String, RegionStats> {
        self.snapshot_slots()
            .into_iter()
            .map(|(region, slot)| {
                let stats = lock(&slot).stats.clone();
                (region, stats)
            })
            .collect()
    }

    pub fn regions(&self) -> Vec<String> {
        let mut names: Vec<String> = read(&self.regions).keys().cloned().collect();
        names.sort();
        names
    }

    pub fn has_baseline(&self, region: &str) -> bool {
        read(&self.regions)
            .get(region)
            .is_some_and(|slot| lock(slot).baseline.is_some())
    }

    /// Drops every baseline frame. Counters survive; the next frame of each
    /// region becomes a first capture again.
    pub fn release_frames(&self) {
        for (_, slot) in self.snapshot_slots() {
            lock(&slot).baseline = None;
        }
    }

    /// Stops accepting frames and drops every baseline. Any comparison that
    /// takes a slot lock after this returns `PipelineClosed`.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.release_frames();
        info!("region tracker closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Forgets every region, frames and counters alike.
    pub fn clear(&self) {
        write(&self.regions).clear();
    }

    fn slot_for(&self, region: &str, timestamp: Timestamp) -> SharedSlot {
        if let Some(slot) = read(&self.regions).get(region) {
            return Arc::clone(slot);
        }
        let mut regions = write(&self.regions);
        Arc::clone(
            regions
                .entry(region.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(RegionSlot::new(region, timestamp)))),
        )
    }

    fn snapshot_slots(&self) -> Vec<(String, SharedSlot)> {
        read(&self.regions)
            .iter()
            .map(|(name, slot)| (name.clone(), Arc::clone(slot)))
            .collect()
    }
}

// The guarded data is plain counters and owned buffers; a panic elsewhere
// cannot leave it half-updated in a way later callers can't read.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}
