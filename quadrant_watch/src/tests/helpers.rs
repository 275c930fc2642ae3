use crate::config::PipelineConfig;
use crate::core_modules::Timestamp;
use crate::core_modules::frame_buffer::FrameBuffer;
use crate::core_modules::pixel::pixel::Pixel;
use crate::pipeline::ActivityPipeline;
use chrono::{Duration, NaiveDate};

pub fn at(h: u32, m: u32, s: u32) -> Timestamp {
    NaiveDate::from_ymd_opt(2024, 3, 4)
        .unwrap()
        .and_hms_opt(h, m, s)
        .unwrap()
}

pub fn secs_after(base: Timestamp, secs: i64) -> Timestamp {
    base + Duration::seconds(secs)
}

pub fn gray(width: u32, height: u32, level: u8) -> FrameBuffer {
    FrameBuffer::filled(width, height, Pixel::new(level, level, level)).unwrap()
}

/// A copy of `base` whose first `count` pixels are inverted.
pub fn with_changed_pixels(base: &FrameBuffer, count: u32) -> FrameBuffer {
    let mut frame = base.clone();
    let (width, _) = frame.dimensions();
    for i in 0..count {
        let (x, y) = (i % width, i / width);
        if let Some(p) = frame.pixel(x, y) {
            frame.set_pixel(x, y, Pixel::new(255 - p.red, 255 - p.green, 255 - p.blue));
        }
    }
    frame
}

pub fn pipeline_at(start: Timestamp) -> ActivityPipeline {
    ActivityPipeline::starting_at(PipelineConfig::default(), start)
}
