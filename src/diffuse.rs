use crate::{
    buffer::FrameBuffer,
    config::{FadeAmount, Kernel3x3},
    foundation::error::{SlimeError, SlimeResult},
    pixel::Pixel,
};

/// Blur `src` with a 3x3 clamp-to-edge stencil, then fade, writing into `dst`.
///
/// Channel arithmetic is integer: the weighted sum is divided with truncation and saturates at
/// 255 when the divisor is smaller than the weight sum; the fade is a saturating subtraction.
pub fn diffuse_and_fade(
    src: &FrameBuffer,
    dst: &mut FrameBuffer,
    kernel: &Kernel3x3,
    fade: FadeAmount,
) -> SlimeResult<()> {
    if src.size() != dst.size() {
        return Err(SlimeError::validation(
            "diffuse_and_fade expects src and dst of equal size",
        ));
    }
    if kernel.divisor == 0 {
        return Err(SlimeError::validation("kernel divisor must be > 0"));
    }

    let w = src.width();
    for y in 0..src.height() {
        for x in 0..w {
            let blurred = blur_at(src, i64::from(x), i64::from(y), kernel);
            dst.set_pixel(x, y, blurred.faded(fade));
        }
    }
    Ok(())
}

/// Blurred value of one pixel, before fading.
pub fn blur_at(src: &FrameBuffer, x: i64, y: i64, kernel: &Kernel3x3) -> Pixel {
    let mut acc = [0u64; 3];
    for dy in -1..=1 {
        for dx in -1..=1 {
            let kw = u64::from(kernel.weight(dx, dy));
            if kw == 0 {
                continue;
            }
            let px = src.clamped_at(x + dx, y + dy).rgb();
            for c in 0..3 {
                acc[c] += kw * u64::from(px[c]);
            }
        }
    }
    let divisor = u64::from(kernel.divisor);
    let [r, g, b] = acc.map(|v| (v / divisor).min(255) as u8);
    Pixel::from_rgb(r, g, b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::GridSize;

    fn grid(w: u32, h: u32) -> GridSize {
        GridSize::new(w, h).unwrap()
    }

    const NO_FADE: FadeAmount = FadeAmount {
        red: 0,
        green: 0,
        blue: 0,
    };

    #[test]
    fn uniform_image_has_no_edge_darkening() {
        let s = grid(5, 4);
        let px = Pixel::from_rgb(200, 100, 50);
        let src = FrameBuffer::filled(s, px);
        let mut dst = FrameBuffer::new(s);
        diffuse_and_fade(&src, &mut dst, &Kernel3x3::BINOMIAL, NO_FADE).unwrap();
        assert!(dst.pixels().iter().all(|&p| p == px));
    }

    #[test]
    fn fade_is_applied_after_blur() {
        let s = grid(3, 3);
        let src = FrameBuffer::filled(s, Pixel::from_rgb(10, 1, 0));
        let mut dst = FrameBuffer::new(s);
        let fade = FadeAmount {
            red: 3,
            green: 2,
            blue: 1,
        };
        diffuse_and_fade(&src, &mut dst, &Kernel3x3::BINOMIAL, fade).unwrap();
        assert!(dst.pixels().iter().all(|&p| p.rgb() == [7, 0, 0]));
    }

    #[test]
    fn single_bright_pixel_spreads_with_truncation() {
        let s = grid(3, 3);
        let mut src = FrameBuffer::new(s);
        src.set_pixel(1, 1, Pixel::from_rgb(160, 0, 0));
        let mut dst = FrameBuffer::new(s);
        diffuse_and_fade(&src, &mut dst, &Kernel3x3::BINOMIAL, NO_FADE).unwrap();

        assert_eq!(dst.pixel_at(1, 1).red(), 40);
        assert_eq!(dst.pixel_at(0, 1).red(), 20);
        assert_eq!(dst.pixel_at(0, 0).red(), 10);
        // 255 * 1 / 16 truncates to 15 rather than rounding to 16.
        src.set_pixel(1, 1, Pixel::from_rgb(255, 0, 0));
        diffuse_and_fade(&src, &mut dst, &Kernel3x3::BINOMIAL, NO_FADE).unwrap();
        assert_eq!(dst.pixel_at(2, 2).red(), 15);
    }

    #[test]
    fn corner_uses_replicated_edges() {
        let s = grid(3, 3);
        let mut src = FrameBuffer::new(s);
        src.set_pixel(0, 0, Pixel::from_rgb(0, 160, 0));
        let mut dst = FrameBuffer::new(s);
        diffuse_and_fade(&src, &mut dst, &Kernel3x3::BINOMIAL, NO_FADE).unwrap();
        // Top-left, top and left taps all replicate the corner: 1 + 2 + 2 + 4 = 9 of 16.
        assert_eq!(dst.pixel_at(0, 0).green(), 90);
    }

    #[test]
    fn channels_stay_bounded_by_blurred_value() {
        let s = grid(6, 6);
        let mut src = FrameBuffer::new(s);
        for (i, p) in src.pixels_mut().iter_mut().enumerate() {
            *p = Pixel((i as u32).wrapping_mul(2_654_435_761) & 0x00FF_FFFF);
        }
        let fade = FadeAmount {
            red: 7,
            green: 0,
            blue: 255,
        };
        let mut dst = FrameBuffer::new(s);
        diffuse_and_fade(&src, &mut dst, &Kernel3x3::BINOMIAL, fade).unwrap();
        for y in 0..6 {
            for x in 0..6 {
                let blurred = blur_at(&src, i64::from(x), i64::from(y), &Kernel3x3::BINOMIAL);
                let out = dst.pixel_at(x, y);
                assert_eq!(out.red(), blurred.red().saturating_sub(7));
                assert_eq!(out.green(), blurred.green());
                assert_eq!(out.blue(), 0);
            }
        }
    }

    #[test]
    fn small_divisor_saturates() {
        let s = grid(2, 2);
        let src = FrameBuffer::filled(s, Pixel::WHITE);
        let mut dst = FrameBuffer::new(s);
        let k = Kernel3x3 {
            weights: [[1; 3]; 3],
            divisor: 1,
        };
        diffuse_and_fade(&src, &mut dst, &k, NO_FADE).unwrap();
        assert!(dst.pixels().iter().all(|&p| p == Pixel::WHITE));
    }

    #[test]
    fn large_weights_do_not_wrap() {
        let s = grid(4, 4);
        let src = FrameBuffer::filled(s, Pixel::WHITE);
        let mut dst = FrameBuffer::new(s);
        let k = Kernel3x3 {
            weights: [[1_800_000; 3]; 3],
            divisor: 16_200_000,
        };
        diffuse_and_fade(&src, &mut dst, &k, NO_FADE).unwrap();
        assert!(dst.pixels().iter().all(|&p| p == Pixel::WHITE));
    }

    #[test]
    fn size_mismatch_is_rejected() {
        let src = FrameBuffer::new(grid(2, 2));
        let mut dst = FrameBuffer::new(grid(3, 2));
        assert!(diffuse_and_fade(&src, &mut dst, &Kernel3x3::BINOMIAL, NO_FADE).is_err());
    }
}
