pub mod detection_sampler;
pub mod frame_buffer;
pub mod pixel;
pub mod pixel_comparator;
pub mod region_tracker;
pub mod session_report;
pub mod timeline;

/// Wall-clock time supplied by the frame source, interpreted as local time.
pub type Timestamp = chrono::NaiveDateTime;

/// Rounds to two decimal places, the precision every percentage is reported at.
pub(crate) fn round_hundredths(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
