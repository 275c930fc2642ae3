// THEORY:
// The `Pixel` module is the smallest unit the engine reasons about: one RGB
// sample read out of a region's frame. It is a "dumb" data container plus the
// single pairwise question the change detector needs answered: "does this pixel
// differ from that one by more than the tolerance on any channel?"
//
// Key principles:
// 1) RGB only. Alpha never reaches the engine; frame construction strips it.
// 2) Any-channel semantics. A pixel counts as changed as soon as one channel's
//    absolute difference exceeds the tolerance. Averaging channels would let a
//    strong red shift hide behind stable green and blue.
// 3) Byte-native arithmetic. Differences are computed on `u8` with `abs_diff`,
//    no float conversion on the hot path.

pub mod pixel {
    pub type Channel = u8;
    pub type ChannelDelta = u8;

    pub const CHANNELS: usize = 3;

    /// A single RGB pixel.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub struct Pixel {
        pub red: Channel,
        pub green: Channel,
        pub blue: Channel,
    }

    impl Pixel {
        pub fn new(red: Channel, green: Channel, blue: Channel) -> Self {
            Self { red, green, blue }
        }

        /// Largest absolute per-channel difference between two pixels.
        #[inline]
        pub fn max_channel_delta(&self, other: &Pixel) -> ChannelDelta {
            self.red
                .abs_diff(other.red)
                .max(self.green.abs_diff(other.green))
                .max(self.blue.abs_diff(other.blue))
        }

        /// True if any channel differs by strictly more than `tolerance`.
        #[inline]
        pub fn differs_from(&self, other: &Pixel, tolerance: ChannelDelta) -> bool {
            self.max_channel_delta(other) > tolerance
        }
    }

    impl From<&[u8]> for Pixel {
        /// Reads the first three bytes as R, G, B. Callers slice exactly one
        /// pixel out of a bounds-checked row, so a short slice yields black
        /// channels rather than a panic.
        fn from(bytes: &[u8]) -> Self {
            Pixel::new(
                bytes.first().copied().unwrap_or_default(),
                bytes.get(1).copied().unwrap_or_default(),
                bytes.get(2).copied().unwrap_or_default(),
            )
        }
    }

    impl From<Pixel> for [u8; CHANNELS] {
        fn from(pixel: Pixel) -> Self {
            [pixel.red, pixel.green, pixel.blue]
        }
    }
}
