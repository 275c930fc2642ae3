// THEORY:
// This file is the main entry point for the `quadrant_watch` library crate.
// It exposes the `ActivityPipeline` and the data it produces (comparison
// results, region stats, activity reports and timelines) as the high-level
// interface a frame source or report exporter talks to.
//
// The algorithmic layers live under `core_modules` and are public so callers
// with their own orchestration can use them directly: the comparator is a pure
// function, the tracker and the report builder are plain structs.

pub mod config;
pub mod core_modules;
pub mod error;
pub mod event_bus;
pub mod pipeline;

#[cfg(test)]
pub(crate) mod tests;

pub use crate::config::{ActivityConfig, PipelineConfig, TimelineConfig, load_config, save_config};
pub use crate::core_modules::Timestamp;
pub use crate::core_modules::detection_sampler::{DetectionPoint, DetectionPointSampler};
pub use crate::core_modules::frame_buffer::FrameBuffer;
pub use crate::core_modules::pixel::pixel::Pixel;
pub use crate::core_modules::region_tracker::{
    ComparisonEvent, ComparisonResult, ComparisonSink, RegionActivityTracker, RegionStats,
};
pub use crate::core_modules::session_report::{
    ActivityReport, ReportEntry, ReportSummary, SessionReportBuilder,
};
pub use crate::core_modules::timeline::{
    RegionSeries, SampleSource, Timeline, TimelineReconstructor, TimelineSample,
};
pub use crate::error::{ActivityError, ActivityResult};
pub use crate::event_bus::ActivityBus;
pub use crate::pipeline::ActivityPipeline;
