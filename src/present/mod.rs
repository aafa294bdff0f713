//! Presentation bridge: writable front/back surfaces plus a blocking present-and-flip.
//!
//! The compositor only ever writes the back surface. `present_and_flip` makes the back surface
//! visible and swaps the roles, so the next `surfaces()` call hands out the other one.

use std::time::Duration;

use crate::{
    buffer::{FrameBuffer, GridSize},
    foundation::error::{SlimeError, SlimeResult},
    pixel::Pixel,
};

#[cfg(target_os = "linux")]
pub mod fbdev;
pub mod headless;
pub mod png;

/// Read-only view of a presentable surface. Rows may be padded (`stride >= width`).
#[derive(Debug)]
pub struct Surface<'a> {
    pixels: &'a [Pixel],
    size: GridSize,
    stride: usize,
}

impl<'a> Surface<'a> {
    pub fn new(pixels: &'a [Pixel], size: GridSize, stride: usize) -> SlimeResult<Self> {
        check_extent(pixels.len(), size, stride)?;
        Ok(Self {
            pixels,
            size,
            stride,
        })
    }

    pub fn size(&self) -> GridSize {
        self.size
    }

    pub fn row(&self, y: u32) -> &[Pixel] {
        let start = (y as usize) * self.stride;
        &self.pixels[start..start + self.size.width as usize]
    }

    pub fn pixel_at(&self, x: u32, y: u32) -> Pixel {
        self.row(y)[x as usize]
    }

    /// Copy the visible area into a tightly packed buffer.
    pub fn to_frame_buffer(&self) -> FrameBuffer {
        let mut out = FrameBuffer::new(self.size);
        let w = self.size.width as usize;
        for (y, dst) in out.pixels_mut().chunks_exact_mut(w).enumerate() {
            dst.copy_from_slice(self.row(y as u32));
        }
        out
    }
}

/// Writable view of a presentable surface.
#[derive(Debug)]
pub struct SurfaceMut<'a> {
    pixels: &'a mut [Pixel],
    size: GridSize,
    stride: usize,
}

impl<'a> SurfaceMut<'a> {
    pub fn new(pixels: &'a mut [Pixel], size: GridSize, stride: usize) -> SlimeResult<Self> {
        check_extent(pixels.len(), size, stride)?;
        Ok(Self {
            pixels,
            size,
            stride,
        })
    }

    pub fn size(&self) -> GridSize {
        self.size
    }

    pub fn row_mut(&mut self, y: u32) -> &mut [Pixel] {
        let start = (y as usize) * self.stride;
        &mut self.pixels[start..start + self.size.width as usize]
    }

    pub fn copy_from(&mut self, src: &FrameBuffer) -> SlimeResult<()> {
        if src.size() != self.size {
            return Err(SlimeError::validation(format!(
                "surface is {}x{} but frame is {}x{}",
                self.size.width,
                self.size.height,
                src.width(),
                src.height()
            )));
        }
        if self.stride == self.size.width as usize {
            self.pixels[..src.pixels().len()].copy_from_slice(src.pixels());
            return Ok(());
        }
        for y in 0..self.size.height {
            self.row_mut(y).copy_from_slice(src.row(y));
        }
        Ok(())
    }
}

/// The pair handed out by [`PresentationBackend::surfaces`].
#[derive(Debug)]
pub struct SurfacePair<'a> {
    /// Currently visible surface.
    pub front: Surface<'a>,
    /// Surface the next frame is written into.
    pub back: SurfaceMut<'a>,
}

/// Options shared by presenters that block on vertical refresh.
#[derive(Clone, Copy, Debug)]
pub struct PresentOpts {
    /// Upper bound for one vblank wait. Slower presents are logged.
    pub vsync_timeout: Duration,
}

impl Default for PresentOpts {
    fn default() -> Self {
        Self {
            vsync_timeout: Duration::from_millis(250),
        }
    }
}

/// A double-buffered output the frame driver can present to.
pub trait PresentationBackend {
    fn size(&self) -> GridSize;

    /// Borrow the front (visible) and back (writable) surfaces.
    ///
    /// After [`PresentationBackend::teardown`] the surfaces still have the right shape but no
    /// longer reach the screen.
    fn surfaces(&mut self) -> SurfacePair<'_>;

    /// Show the back surface at the next vertical refresh and swap the roles.
    ///
    /// Blocks until the flip is scheduled.
    fn present_and_flip(&mut self) -> SlimeResult<()>;

    /// Number of completed `present_and_flip` calls.
    fn flip_count(&self) -> u64;

    /// Release every presentation resource. Calling it twice is a no-op.
    fn teardown(&mut self) -> SlimeResult<()>;
}

fn check_extent(len: usize, size: GridSize, stride: usize) -> SlimeResult<()> {
    if stride < size.width as usize {
        return Err(SlimeError::validation("surface stride is smaller than its width"));
    }
    let needed = stride * (size.height as usize - 1) + size.width as usize;
    if len < needed {
        return Err(SlimeError::validation(format!(
            "surface needs {needed} pixels, got {len}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid(w: u32, h: u32) -> GridSize {
        GridSize::new(w, h).unwrap()
    }

    #[test]
    fn padded_rows_are_skipped() {
        let size = grid(2, 3);
        let mut storage = vec![Pixel(0xdead); 4 * 3];
        let mut fb = FrameBuffer::new(size);
        for (i, p) in fb.pixels_mut().iter_mut().enumerate() {
            *p = Pixel(i as u32);
        }

        SurfaceMut::new(&mut storage, size, 4)
            .unwrap()
            .copy_from(&fb)
            .unwrap();

        assert_eq!(&storage[0..2], &[Pixel(0), Pixel(1)]);
        assert_eq!(storage[2], Pixel(0xdead));
        assert_eq!(&storage[4..6], &[Pixel(2), Pixel(3)]);
        assert_eq!(&storage[8..10], &[Pixel(4), Pixel(5)]);

        let view = Surface::new(&storage, size, 4).unwrap();
        assert_eq!(view.to_frame_buffer(), fb);
    }

    #[test]
    fn short_storage_is_rejected() {
        let size = grid(4, 4);
        let storage = vec![Pixel::BLACK; 15];
        assert!(Surface::new(&storage, size, 4).is_err());
        let storage = vec![Pixel::BLACK; 16];
        assert!(Surface::new(&storage, size, 3).is_err());
    }

    #[test]
    fn copy_rejects_mismatched_frame() {
        let mut storage = vec![Pixel::BLACK; 16];
        let mut s = SurfaceMut::new(&mut storage, grid(4, 4), 4).unwrap();
        assert!(s.copy_from(&FrameBuffer::new(grid(2, 2))).is_err());
    }
}
