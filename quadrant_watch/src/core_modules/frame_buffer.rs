// THEORY:
// `FrameBuffer` is the engine's view of one captured region: an owned, packed
// RGB byte buffer with explicit dimensions and row stride. It plays the role the
// `Chunk` plays in a grid pipeline (a rectangular block of pixels) but at region
// granularity, and it is validated once at the boundary so every later scan can
// iterate slices without re-checking lengths.
//
// Layout: pixel `(x, y)` occupies bytes `y * stride + x * 3 .. + 3` in R, G, B
// order. `stride >= width * 3`; padding bytes at the end of a row are never read.

use crate::core_modules::pixel::pixel::{CHANNELS, Pixel};
use crate::error::{ActivityError, ActivityResult};

/// An owned RGB frame for a single region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameBuffer {
    width: u32,
    height: u32,
    stride: usize,
    data: Vec<u8>,
}

impl FrameBuffer {
    /// Wraps tightly packed RGB bytes (`stride == width * 3`).
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> ActivityResult<Self> {
        let stride = (width as usize)
            .checked_mul(CHANNELS)
            .ok_or_else(|| ActivityError::invalid_frame("row size overflows usize"))?;
        Self::with_stride(width, height, stride, data)
    }

    /// Wraps RGB bytes whose rows are `stride` bytes apart.
    pub fn with_stride(width: u32, height: u32, stride: usize, data: Vec<u8>) -> ActivityResult<Self> {
        if width == 0 || height == 0 {
            return Err(ActivityError::invalid_frame(format!(
                "zero-sized frame {width}x{height}"
            )));
        }
        if data.is_empty() {
            return Err(ActivityError::invalid_frame("empty pixel buffer"));
        }

        let row_bytes = width as usize * CHANNELS;
        if stride < row_bytes {
            return Err(ActivityError::invalid_frame(format!(
                "stride {stride} is shorter than a {width}px row ({row_bytes} bytes)"
            )));
        }

        // The last row only needs its pixel bytes, not trailing padding.
        let required = stride
            .checked_mul(height as usize - 1)
            .and_then(|b| b.checked_add(row_bytes))
            .ok_or_else(|| ActivityError::invalid_frame("frame size overflows usize"))?;
        if data.len() < required {
            return Err(ActivityError::invalid_frame(format!(
                "buffer holds {} bytes, {width}x{height} with stride {stride} needs {required}",
                data.len()
            )));
        }

        Ok(Self {
            width,
            height,
            stride,
            data,
        })
    }

    /// Builds a frame from packed RGBA bytes, dropping the alpha channel.
    pub fn from_rgba(width: u32, height: u32, rgba: &[u8]) -> ActivityResult<Self> {
        let expected = width as usize * height as usize * 4;
        if rgba.len() < expected {
            return Err(ActivityError::invalid_frame(format!(
                "RGBA buffer holds {} bytes, expected {expected}",
                rgba.len()
            )));
        }
        let mut data = Vec::with_capacity(width as usize * height as usize * CHANNELS);
        for px in rgba[..expected].chunks_exact(4) {
            data.extend_from_slice(&px[..CHANNELS]);
        }
        Self::new(width, height, data)
    }

    /// Takes ownership of an already-decoded RGB image.
    pub fn from_rgb_image(image: image::RgbImage) -> ActivityResult<Self> {
        let (width, height) = image.dimensions();
        Self::new(width, height, image.into_raw())
    }

    /// Converts any decoded image to RGB and wraps it.
    pub fn from_dynamic_image(image: &image::DynamicImage) -> ActivityResult<Self> {
        Self::from_rgb_image(image.to_rgb8())
    }

    /// A frame where every pixel has the same color.
    pub fn filled(width: u32, height: u32, pixel: Pixel) -> ActivityResult<Self> {
        let rgb: [u8; CHANNELS] = pixel.into();
        let count = width as usize * height as usize;
        let mut data = Vec::with_capacity(count * CHANNELS);
        for _ in 0..count {
            data.extend_from_slice(&rgb);
        }
        Self::new(width, height, data)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn pixel_count(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// The pixel bytes of each row, padding excluded.
    pub fn rows(&self) -> impl Iterator<Item = &[u8]> + '_ {
        let row_bytes = self.width as usize * CHANNELS;
        self.data
            .chunks(self.stride)
            .take(self.height as usize)
            .map(move |row| &row[..row_bytes])
    }

    /// Every pixel in row-major order.
    pub fn pixels(&self) -> impl Iterator<Item = Pixel> + '_ {
        self.rows()
            .flat_map(|row| row.chunks_exact(CHANNELS).map(Pixel::from))
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<Pixel> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let start = y as usize * self.stride + x as usize * CHANNELS;
        self.data.get(start..start + CHANNELS).map(Pixel::from)
    }

    /// Overwrites one pixel. Returns false when `(x, y)` is outside the frame.
    pub fn set_pixel(&mut self, x: u32, y: u32, pixel: Pixel) -> bool {
        if x >= self.width || y >= self.height {
            return false;
        }
        let start = y as usize * self.stride + x as usize * CHANNELS;
        match self.data.get_mut(start..start + CHANNELS) {
            Some(slot) => {
                slot.copy_from_slice(&<[u8; CHANNELS]>::from(pixel));
                true
            }
            None => false,
        }
    }
}
