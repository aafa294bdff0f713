use crate::{
    buffer::GridSize,
    foundation::error::SlimeResult,
    pixel::Pixel,
    present::{PresentationBackend, Surface, SurfaceMut, SurfacePair},
};

/// In-memory double buffer. Flips are instantaneous.
#[derive(Debug)]
pub struct HeadlessPresenter {
    size: GridSize,
    surfaces: [Vec<Pixel>; 2],
    front: usize,
    flips: u64,
    torn_down: bool,
}

impl HeadlessPresenter {
    pub fn new(size: GridSize) -> Self {
        Self {
            size,
            surfaces: [
                vec![Pixel::BLACK; size.pixel_count()],
                vec![Pixel::BLACK; size.pixel_count()],
            ],
            front: 0,
            flips: 0,
            torn_down: false,
        }
    }

    /// Currently visible pixels, row-major.
    pub fn front_pixels(&self) -> &[Pixel] {
        &self.surfaces[self.front]
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }
}

impl PresentationBackend for HeadlessPresenter {
    fn size(&self) -> GridSize {
        self.size
    }

    fn surfaces(&mut self) -> SurfacePair<'_> {
        let size = self.size;
        let stride = size.width as usize;
        let [a, b] = &mut self.surfaces;
        let (front, back) = if self.front == 0 { (&*a, b) } else { (&*b, a) };
        SurfacePair {
            front: Surface {
                pixels: front,
                size,
                stride,
            },
            back: SurfaceMut {
                pixels: back,
                size,
                stride,
            },
        }
    }

    fn present_and_flip(&mut self) -> SlimeResult<()> {
        self.front ^= 1;
        self.flips += 1;
        Ok(())
    }

    fn flip_count(&self) -> u64 {
        self.flips
    }

    fn teardown(&mut self) -> SlimeResult<()> {
        if !self.torn_down {
            tracing::debug!(flips = self.flips, "headless presenter torn down");
            self.torn_down = true;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::FrameBuffer;

    #[test]
    fn flip_swaps_front_and_back() {
        let size = GridSize::new(3, 2).unwrap();
        let mut p = HeadlessPresenter::new(size);
        let frame = FrameBuffer::filled(size, Pixel::WHITE);

        p.surfaces().back.copy_from(&frame).unwrap();
        assert!(p.front_pixels().iter().all(|&px| px == Pixel::BLACK));

        p.present_and_flip().unwrap();
        assert_eq!(p.flip_count(), 1);
        assert_eq!(p.front_pixels(), frame.pixels());

        let pair = p.surfaces();
        assert_eq!(pair.front.pixel_at(2, 1), Pixel::WHITE);
    }

    #[test]
    fn teardown_is_idempotent() {
        let mut p = HeadlessPresenter::new(GridSize::new(2, 2).unwrap());
        p.teardown().unwrap();
        p.teardown().unwrap();
        assert!(p.is_torn_down());
    }
}
