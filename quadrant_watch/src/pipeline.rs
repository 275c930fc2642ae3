// THEORY:
// The `pipeline` module is the top-level API of the activity engine. It wires
// the layers together into one object a frame source can talk to:
//
//   submit_frame -> RegionActivityTracker -> (bounded queue) -> SessionReportBuilder
//                          |                                         |
//                          +-> ActivityBus::comparisons              +-> ActivityBus::report_updates
//
// Comparisons run on the caller's thread (or on blocking workers for a batch)
// and never wait for the report side. The tracker hands each event to a queue
// sink while still holding the region lock; a single consumer task drains the
// queue into the builder, so the builder has exactly one writer and sees each
// region's events in comparison order. If the queue is full the event is
// dropped and counted. Nothing is lost from the stats, because every event
// carries the complete cumulative snapshot of its region.

use crate::config::{ActivityConfig, PipelineConfig};
use crate::core_modules::Timestamp;
use crate::core_modules::detection_sampler::DetectionPointSampler;
use crate::core_modules::frame_buffer::FrameBuffer;
use crate::core_modules::region_tracker::{
    ComparisonEvent, ComparisonResult, ComparisonSink, RegionActivityTracker, RegionStats,
};
use crate::core_modules::session_report::{ActivityReport, SessionReportBuilder};
use crate::core_modules::timeline::{Timeline, TimelineReconstructor};
use crate::error::{ActivityError, ActivityResult};
use crate::event_bus::ActivityBus;
use futures::future::join_all;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Semaphore, broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

// Re-export key data structures for the public API.
pub use crate::core_modules::session_report::{ReportEntry, ReportSummary};

/// Work for the report consumer task.
enum ReportCommand {
    Apply(ComparisonEvent),
    Flush(oneshot::Sender<()>),
}

/// Tracker sink: broadcasts the result and queues the event for the builder.
struct QueueSink {
    tx: Mutex<Option<mpsc::Sender<ReportCommand>>>,
    dropped: AtomicU64,
    bus: ActivityBus,
}

impl QueueSink {
    fn sender(&self) -> Option<mpsc::Sender<ReportCommand>> {
        lock(&self.tx).clone()
    }

    fn close(&self) {
        lock(&self.tx).take();
    }
}

impl ComparisonSink for QueueSink {
    fn deliver(&self, event: ComparisonEvent) {
        self.bus.publish_comparison(event.result.clone());

        let guard = lock(&self.tx);
        let Some(tx) = guard.as_ref() else {
            return;
        };
        match tx.try_send(ReportCommand::Apply(event)) {
            Ok(()) => {}
            Err(TrySendError::Full(ReportCommand::Apply(event))) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(
                    region = %event.result.region,
                    dropped,
                    "report queue full, event dropped"
                );
            }
            Err(_) => debug!("report queue closed"),
        }
    }
}

/// The main, top-level struct for the activity engine.
///
/// Must be created from within a Tokio runtime: it spawns the report consumer
/// task.
pub struct ActivityPipeline {
    activity: RwLock<ActivityConfig>,
    tracker: Arc<RegionActivityTracker>,
    builder: Arc<RwLock<SessionReportBuilder>>,
    sink: Arc<QueueSink>,
    bus: ActivityBus,
    timeline: TimelineReconstructor,
    workers: Arc<Semaphore>,
    consumer: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl ActivityPipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self::starting_at(config, chrono::Local::now().naive_local())
    }

    /// Like [`new`](Self::new) but with an explicit report start, for frame
    /// sources that replay recorded time.
    pub fn starting_at(config: PipelineConfig, report_start: Timestamp) -> Self {
        let config = config.validated();
        let bus = ActivityBus::new(config.bus_capacity);
        let (tx, rx) = mpsc::channel(config.event_queue_capacity);

        let sink = Arc::new(QueueSink {
            tx: Mutex::new(Some(tx)),
            dropped: AtomicU64::new(0),
            bus: bus.clone(),
        });
        let tracker = Arc::new(RegionActivityTracker::with_sink(sink.clone()));
        let builder = Arc::new(RwLock::new(SessionReportBuilder::new(
            DetectionPointSampler::from_config(&config),
            report_start,
        )));

        let consumer = tokio::spawn(run_consumer(rx, builder.clone(), bus.clone()));
        let worker_count = num_cpus::get().max(1);

        info!(
            queue_capacity = config.event_queue_capacity,
            max_points_per_region = config.max_points_per_region,
            workers = worker_count,
            "activity pipeline started"
        );

        Self {
            activity: RwLock::new(config.activity),
            tracker,
            builder,
            sink,
            bus,
            timeline: TimelineReconstructor::new(config.timeline),
            workers: Arc::new(Semaphore::new(worker_count)),
            consumer: Mutex::new(Some(consumer)),
            closed: AtomicBool::new(false),
        }
    }

    /// Compares `frame` against the region's previous frame.
    pub fn submit_frame(
        &self,
        region: &str,
        frame: FrameBuffer,
        timestamp: Timestamp,
    ) -> ActivityResult<ComparisonResult> {
        self.ensure_open()?;
        let config = self.config();
        self.tracker.compare(region, frame, timestamp, &config)
    }

    /// Convenience for frame sources that hand over packed RGB bytes.
    pub fn submit_raw(
        &self,
        region: &str,
        data: Vec<u8>,
        width: u32,
        height: u32,
        timestamp: Timestamp,
    ) -> ActivityResult<ComparisonResult> {
        let frame = FrameBuffer::new(width, height, data)?;
        self.submit_frame(region, frame, timestamp)
    }

    /// Compares one frame per region on blocking workers. Results come back in
    /// input order; a failing region does not affect the others.
    pub async fn submit_batch(
        &self,
        frames: Vec<(String, FrameBuffer)>,
        timestamp: Timestamp,
    ) -> Vec<(String, ActivityResult<ComparisonResult>)> {
        if self.ensure_open().is_err() {
            return frames
                .into_iter()
                .map(|(region, _)| (region, Err(ActivityError::PipelineClosed)))
                .collect();
        }

        let config = self.config();
        let tasks = frames.into_iter().map(|(region, frame)| {
            let tracker = Arc::clone(&self.tracker);
            let workers = Arc::clone(&self.workers);
            async move {
                let result =
                    compare_on_worker(tracker, workers, region.clone(), frame, timestamp, config)
                        .await;
                (region, result)
            }
        });

        join_all(tasks).await
    }

    /// Applies new thresholds; both values are clamped into range.
    pub fn set_config(&self, pixel_tolerance: i64, activity_threshold_percent: f64) {
        let config = ActivityConfig::new(pixel_tolerance, activity_threshold_percent);
        *write(&self.activity) = config;
        info!(
            pixel_tolerance = config.pixel_tolerance,
            activity_threshold_percent = config.activity_threshold_percent,
            "activity config updated"
        );
    }

    pub fn config(&self) -> ActivityConfig {
        *read(&self.activity)
    }

    /// A summarised snapshot of the live report.
    pub fn get_report(&self) -> ActivityReport {
        read(&self.builder).snapshot()
    }

    /// Live tracker stats; these are exact even when report events were dropped.
    pub fn get_stats(&self, region: &str) -> Option<RegionStats> {
        self.tracker.stats(region)
    }

    pub fn get_all_stats(&self) -> BTreeMap<String, RegionStats> {
        self.tracker.all_stats()
    }

    pub fn regions(&self) -> Vec<String> {
        self.tracker.regions()
    }

    pub fn historical_report(&self, start: Timestamp, end: Timestamp) -> ActivityReport {
        read(&self.builder).generate_historical_report(start, end)
    }

    /// Dense per-region series over the current report window.
    pub fn timeline(&self) -> Timeline {
        self.timeline.reconstruct_report(&self.get_report())
    }

    pub fn timeline_reconstructor(&self) -> &TimelineReconstructor {
        &self.timeline
    }

    pub fn reset_stats(&self, region: &str) -> bool {
        self.tracker.reset_stats(region)
    }

    pub fn reset_all(&self) {
        self.tracker.reset_all();
    }

    /// Discards the report and starts a new one. Tracker stats are kept.
    pub fn reset_report(&self, report_start: Timestamp) {
        write(&self.builder).reset(report_start);
        info!("activity report reset");
    }

    pub fn subscribe_comparisons(&self) -> broadcast::Receiver<ComparisonResult> {
        self.bus.subscribe_comparisons()
    }

    pub fn subscribe_report_updates(&self) -> broadcast::Receiver<ReportEntry> {
        self.bus.subscribe_report_updates()
    }

    /// Events the report queue had to drop because it was full.
    pub fn dropped_events(&self) -> u64 {
        self.sink.dropped.load(Ordering::Relaxed)
    }

    /// Waits until every event queued so far has reached the report.
    pub async fn flush(&self) -> ActivityResult<()> {
        let tx = self.sink.sender().ok_or(ActivityError::PipelineClosed)?;
        let (done_tx, done_rx) = oneshot::channel();
        tx.send(ReportCommand::Flush(done_tx))
            .await
            .map_err(|_| ActivityError::PipelineClosed)?;
        done_rx.await.map_err(|_| ActivityError::PipelineClosed)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Stops accepting frames, drains the queue into the report, joins the
    /// consumer and releases every retained frame. The report stays readable.
    pub async fn shutdown(&self) -> ActivityResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        self.workers.close();
        self.sink.close();

        let consumer = lock(&self.consumer).take();
        if let Some(consumer) = consumer {
            consumer
                .await
                .map_err(|e| ActivityError::worker(e.to_string()))?;
        }

        // Waits on every region lock, so keep it off the async workers.
        let tracker = Arc::clone(&self.tracker);
        tokio::task::spawn_blocking(move || tracker.close())
            .await
            .map_err(|e| ActivityError::worker(e.to_string()))?;
        info!(dropped_events = self.dropped_events(), "activity pipeline shut down");
        Ok(())
    }

    fn ensure_open(&self) -> ActivityResult<()> {
        if self.is_closed() {
            Err(ActivityError::PipelineClosed)
        } else {
            Ok(())
        }
    }
}

async fn compare_on_worker(
    tracker: Arc<RegionActivityTracker>,
    workers: Arc<Semaphore>,
    region: String,
    frame: FrameBuffer,
    timestamp: Timestamp,
    config: ActivityConfig,
) -> ActivityResult<ComparisonResult> {
    let _permit = workers
        .acquire_owned()
        .await
        .map_err(|_| ActivityError::PipelineClosed)?;
    tokio::task::spawn_blocking(move || tracker.compare(&region, frame, timestamp, &config))
        .await
        .map_err(|e| ActivityError::worker(e.to_string()))?
}

async fn run_consumer(
    mut rx: mpsc::Receiver<ReportCommand>,
    builder: Arc<RwLock<SessionReportBuilder>>,
    bus: ActivityBus,
) {
    while let Some(command) = rx.recv().await {
        match command {
            ReportCommand::Apply(event) => {
                let entry = {
                    let mut builder = write(&builder);
                    let entry = builder.apply(&event);
                    bus.has_report_subscribers().then(|| entry.clone())
                };
                if let Some(entry) = entry {
                    bus.publish_report_update(entry);
                }
            }
            ReportCommand::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    debug!("report consumer drained");
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::helpers::{at, gray, pipeline_at, secs_after};

    #[tokio::test]
    async fn shutdown_releases_every_baseline() {
        let start = at(9, 0, 0);
        let pipeline = pipeline_at(start);
        for (i, region) in ["A", "B"].into_iter().enumerate() {
            pipeline
                .submit_frame(region, gray(4, 4, 10), secs_after(start, i as i64))
                .unwrap();
        }
        assert!(pipeline.tracker.has_baseline("A"));
        assert!(pipeline.tracker.has_baseline("B"));

        pipeline.shutdown().await.unwrap();
        assert!(pipeline.tracker.is_closed());
        assert!(!pipeline.tracker.has_baseline("A"));
        assert!(!pipeline.tracker.has_baseline("B"));
        assert_eq!(pipeline.get_report().entries.len(), 2);
    }

    #[tokio::test]
    async fn late_comparison_after_shutdown_keeps_no_frame() {
        let start = at(9, 0, 0);
        let pipeline = pipeline_at(start);
        pipeline.submit_frame("A", gray(4, 4, 10), start).unwrap();
        pipeline.shutdown().await.unwrap();

        // A comparison that passed the pipeline's open check before shutdown
        // reaches the tracker afterwards.
        let config = pipeline.config();
        let err = pipeline
            .tracker
            .compare("A", gray(4, 4, 200), secs_after(start, 1), &config)
            .unwrap_err();
        assert!(matches!(err, ActivityError::PipelineClosed));
        assert!(!pipeline.tracker.has_baseline("A"));

        let err = pipeline
            .submit_frame("B", gray(4, 4, 10), secs_after(start, 2))
            .unwrap_err();
        assert!(matches!(err, ActivityError::PipelineClosed));
        assert!(pipeline.shutdown().await.is_ok());
    }
}
