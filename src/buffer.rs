use crate::{
    foundation::error::{SlimeError, SlimeResult},
    pixel::Pixel,
};

/// Width and height of a pixel grid.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct GridSize {
    pub width: u32,
    pub height: u32,
}

impl GridSize {
    pub fn new(width: u32, height: u32) -> SlimeResult<Self> {
        if width < 2 || height < 2 {
            return Err(SlimeError::validation(format!(
                "grid must be at least 2x2, got {width}x{height}"
            )));
        }
        Ok(Self { width, height })
    }

    pub fn pixel_count(self) -> usize {
        (self.width as usize) * (self.height as usize)
    }

    /// Row-major index of `(x, y)`.
    #[inline]
    pub fn index(self, x: u32, y: u32) -> usize {
        (y as usize) * (self.width as usize) + (x as usize)
    }
}

/// Owned row-major XRGB32 grid.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FrameBuffer {
    size: GridSize,
    pixels: Vec<Pixel>,
}

impl FrameBuffer {
    pub fn new(size: GridSize) -> Self {
        Self {
            size,
            pixels: vec![Pixel::BLACK; size.pixel_count()],
        }
    }

    pub fn filled(size: GridSize, px: Pixel) -> Self {
        Self {
            size,
            pixels: vec![px; size.pixel_count()],
        }
    }

    pub fn size(&self) -> GridSize {
        self.size
    }

    pub fn width(&self) -> u32 {
        self.size.width
    }

    pub fn height(&self) -> u32 {
        self.size.height
    }

    pub fn pixels(&self) -> &[Pixel] {
        &self.pixels
    }

    pub fn pixels_mut(&mut self) -> &mut [Pixel] {
        &mut self.pixels
    }

    /// Panics when `(x, y)` is outside the grid.
    #[inline]
    pub fn pixel_at(&self, x: u32, y: u32) -> Pixel {
        debug_assert!(x < self.size.width && y < self.size.height);
        self.pixels[self.size.index(x, y)]
    }

    #[inline]
    pub fn set_pixel(&mut self, x: u32, y: u32, px: Pixel) {
        debug_assert!(x < self.size.width && y < self.size.height);
        let idx = self.size.index(x, y);
        self.pixels[idx] = px;
    }

    /// Sample with clamp-to-edge addressing: out-of-range coordinates replicate the nearest
    /// in-bounds pixel. This is the only border policy in the crate.
    #[inline]
    pub fn clamped_at(&self, x: i64, y: i64) -> Pixel {
        let cx = x.clamp(0, i64::from(self.size.width) - 1) as u32;
        let cy = y.clamp(0, i64::from(self.size.height) - 1) as u32;
        self.pixels[self.size.index(cx, cy)]
    }

    /// `None` when the continuous point lies outside the grid.
    #[inline]
    pub fn sample(&self, x: f64, y: f64) -> Option<Pixel> {
        if !(x >= 0.0 && y >= 0.0) {
            return None;
        }
        let (xi, yi) = (x as u64, y as u64);
        if xi >= u64::from(self.size.width) || yi >= u64::from(self.size.height) {
            return None;
        }
        Some(self.pixel_at(xi as u32, yi as u32))
    }

    pub fn fill(&mut self, px: Pixel) {
        self.pixels.fill(px);
    }

    pub fn row(&self, y: u32) -> &[Pixel] {
        let w = self.size.width as usize;
        let start = (y as usize) * w;
        &self.pixels[start..start + w]
    }
}

/// Two equally sized buffers whose read/write roles flip every frame.
///
/// After [`FrameBufferPair::swap`], the buffer that was written last frame becomes the read
/// side and the other one is handed out for writing.
#[derive(Clone, Debug)]
pub struct FrameBufferPair {
    buffers: [FrameBuffer; 2],
    write: usize,
}

impl FrameBufferPair {
    pub fn new(size: GridSize) -> Self {
        Self {
            buffers: [FrameBuffer::new(size), FrameBuffer::new(size)],
            write: 0,
        }
    }

    pub fn size(&self) -> GridSize {
        self.buffers[0].size()
    }

    pub fn swap(&mut self) {
        self.write ^= 1;
    }

    /// Index of the buffer currently handed out for writing (0 or 1).
    pub fn write_index(&self) -> usize {
        self.write
    }

    pub fn read(&self) -> &FrameBuffer {
        &self.buffers[self.write ^ 1]
    }

    pub fn write(&self) -> &FrameBuffer {
        &self.buffers[self.write]
    }

    pub fn write_mut(&mut self) -> &mut FrameBuffer {
        &mut self.buffers[self.write]
    }

    /// Borrow `(read, write)` at the same time.
    pub fn split_mut(&mut self) -> (&FrameBuffer, &mut FrameBuffer) {
        let [a, b] = &mut self.buffers;
        if self.write == 0 { (&*b, a) } else { (&*a, b) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn size(w: u32, h: u32) -> GridSize {
        GridSize::new(w, h).unwrap()
    }

    #[test]
    fn degenerate_grid_is_rejected() {
        assert!(GridSize::new(1, 1).is_err());
        assert!(GridSize::new(0, 10).is_err());
        assert!(GridSize::new(2, 2).is_ok());
    }

    #[test]
    fn index_is_row_major() {
        let s = size(10, 10);
        assert_eq!(s.index(6, 5), 56);
        let mut fb = FrameBuffer::new(s);
        fb.set_pixel(6, 5, Pixel::WHITE);
        assert_eq!(fb.pixels()[56], Pixel::WHITE);
        assert_eq!(fb.row(5)[6], Pixel::WHITE);
    }

    #[test]
    fn clamped_at_replicates_edges() {
        let mut fb = FrameBuffer::new(size(3, 2));
        fb.set_pixel(0, 0, Pixel(1));
        fb.set_pixel(2, 1, Pixel(9));
        assert_eq!(fb.clamped_at(-1, -1), Pixel(1));
        assert_eq!(fb.clamped_at(-5, 0), Pixel(1));
        assert_eq!(fb.clamped_at(3, 2), Pixel(9));
        assert_eq!(fb.clamped_at(100, 100), Pixel(9));
    }

    #[test]
    fn sample_rejects_points_outside_grid() {
        let fb = FrameBuffer::filled(size(4, 4), Pixel::WHITE);
        assert_eq!(fb.sample(0.0, 0.0), Some(Pixel::WHITE));
        assert_eq!(fb.sample(3.99, 3.99), Some(Pixel::WHITE));
        assert_eq!(fb.sample(-0.5, 1.0), None);
        assert_eq!(fb.sample(4.0, 1.0), None);
        assert_eq!(fb.sample(1.0, f64::NAN), None);
    }

    #[test]
    fn swap_twice_restores_roles() {
        let mut pair = FrameBufferPair::new(size(4, 4));
        pair.write_mut().fill(Pixel(7));
        let before = pair.write_index();

        pair.swap();
        assert_ne!(pair.write_index(), before);
        assert_eq!(pair.read().pixel_at(0, 0), Pixel(7));

        pair.swap();
        assert_eq!(pair.write_index(), before);
        assert_eq!(pair.write().pixel_at(0, 0), Pixel(7));
    }

    #[test]
    fn split_mut_hands_out_distinct_buffers() {
        let mut pair = FrameBufferPair::new(size(2, 2));
        pair.write_mut().fill(Pixel(3));
        pair.swap();
        let (read, write) = pair.split_mut();
        assert_eq!(read.pixel_at(1, 1), Pixel(3));
        write.fill(Pixel(4));
        assert_eq!(pair.read().pixel_at(1, 1), Pixel(3));
        assert_eq!(pair.write().pixel_at(1, 1), Pixel(4));
    }
}
