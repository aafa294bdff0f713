//! Packed XRGB32 pixels.
//!
//! The layout must match the presentation surface bit for bit: `0x00RRGGBB` in a native-endian
//! `u32`, so on little-endian hosts the bytes in memory are `B, G, R, X`.

use crate::config::FadeAmount;

/// One pixel, packed as `0xXXRRGGBB`. The `X` byte is unused and kept at zero.
#[repr(transparent)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Pixel(pub u32);

impl Pixel {
    pub const BLACK: Pixel = Pixel(0);
    pub const WHITE: Pixel = Pixel(0x00FF_FFFF);

    pub const fn from_rgb(r: u8, g: u8, b: u8) -> Self {
        Self(((r as u32) << 16) | ((g as u32) << 8) | b as u32)
    }

    pub const fn red(self) -> u8 {
        (self.0 >> 16) as u8
    }

    pub const fn green(self) -> u8 {
        (self.0 >> 8) as u8
    }

    pub const fn blue(self) -> u8 {
        self.0 as u8
    }

    /// Channels in `[r, g, b]` order.
    pub const fn rgb(self) -> [u8; 3] {
        [self.red(), self.green(), self.blue()]
    }

    /// Perceptual brightness on the 0..=255 scale (BT.709 weights).
    pub fn luma(self) -> f64 {
        0.0722 * f64::from(self.blue()) + 0.7152 * f64::from(self.green())
            + 0.2126 * f64::from(self.red())
    }

    /// Per-channel saturating decay.
    pub fn faded(self, fade: FadeAmount) -> Self {
        Self::from_rgb(
            self.red().saturating_sub(fade.red),
            self.green().saturating_sub(fade.green),
            self.blue().saturating_sub(fade.blue),
        )
    }
}

impl From<u32> for Pixel {
    fn from(v: u32) -> Self {
        Self(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channels_follow_xrgb_layout() {
        let p = Pixel(0x0012_3456);
        assert_eq!(p.red(), 0x12);
        assert_eq!(p.green(), 0x34);
        assert_eq!(p.blue(), 0x56);
        assert_eq!(Pixel::from_rgb(0x12, 0x34, 0x56), p);
    }

    #[test]
    fn luma_weights_green_highest() {
        assert_eq!(Pixel::BLACK.luma(), 0.0);
        assert!((Pixel::WHITE.luma() - 255.0).abs() < 1e-9);
        let r = Pixel::from_rgb(255, 0, 0).luma();
        let g = Pixel::from_rgb(0, 255, 0).luma();
        let b = Pixel::from_rgb(0, 0, 255).luma();
        assert!(g > r && r > b);
    }

    #[test]
    fn fade_saturates_at_zero() {
        let fade = FadeAmount {
            red: 5,
            green: 1,
            blue: 200,
        };
        let p = Pixel::from_rgb(3, 10, 100).faded(fade);
        assert_eq!(p.rgb(), [0, 9, 0]);
    }
}
