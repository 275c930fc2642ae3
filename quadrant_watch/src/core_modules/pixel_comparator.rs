// THEORY:
// The `PixelComparator` turns two frames of the same region into a single
// number: the percentage of pixels that changed. It is the analytical "lens"
// of the engine, in the same spirit as a pairwise pixel comparer, but applied
// across a whole region at once.
//
// Key architectural principles:
// 1.  **Pure**: no state, no allocation beyond iterator adapters, no I/O. Both
//     frames are borrowed immutably for the duration of the call, so it is safe
//     to run on any thread.
// 2.  **Defined mismatch**: frames of different dimensions are not comparable
//     pixel-by-pixel. That is a normal event (monitor resolution change, region
//     reconfigured) and is reported as a full 100% change without scanning.
// 3.  **Row-wise scan**: rows are compared as slices, padding excluded, so the
//     comparison is independent of each frame's stride.

use crate::core_modules::frame_buffer::FrameBuffer;
use crate::core_modules::pixel::pixel::{CHANNELS, ChannelDelta, Pixel};
use crate::core_modules::round_hundredths;

pub type ChangePercent = f64;

pub const FULL_CHANGE: ChangePercent = 100.0;

/// Raw counts behind a change percentage.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChangeMeasurement {
    pub different_pixels: u64,
    pub total_pixels: u64,
    pub change_percent: ChangePercent,
    pub dimensions_match: bool,
}

/// Percentage of pixels (0..=100, two decimals) whose largest per-channel
/// difference exceeds `tolerance`. Dimension mismatch yields exactly 100.0.
pub fn compare(prev: &FrameBuffer, curr: &FrameBuffer, tolerance: ChannelDelta) -> ChangePercent {
    measure(prev, curr, tolerance).change_percent
}

/// Same as [`compare`], but also returns the pixel counts.
pub fn measure(prev: &FrameBuffer, curr: &FrameBuffer, tolerance: ChannelDelta) -> ChangeMeasurement {
    let total_pixels = curr.pixel_count();

    if prev.dimensions() != curr.dimensions() {
        return ChangeMeasurement {
            different_pixels: total_pixels,
            total_pixels,
            change_percent: FULL_CHANGE,
            dimensions_match: false,
        };
    }

    let different_pixels: u64 = prev
        .rows()
        .zip(curr.rows())
        .map(|(prev_row, curr_row)| count_changed_in_row(prev_row, curr_row, tolerance))
        .sum();

    let change_percent = if total_pixels == 0 {
        0.0
    } else {
        round_hundredths(different_pixels as f64 / total_pixels as f64 * 100.0)
    };

    ChangeMeasurement {
        different_pixels,
        total_pixels,
        change_percent,
        dimensions_match: true,
    }
}

fn count_changed_in_row(prev_row: &[u8], curr_row: &[u8], tolerance: ChannelDelta) -> u64 {
    prev_row
        .chunks_exact(CHANNELS)
        .zip(curr_row.chunks_exact(CHANNELS))
        .filter(|(a, b)| Pixel::from(*a).differs_from(&Pixel::from(*b), tolerance))
        .count() as u64
}
