use std::path::{Path, PathBuf};

use crate::{
    buffer::GridSize,
    foundation::error::{SlimeError, SlimeResult},
    present::{PresentationBackend, Surface, SurfacePair, headless::HeadlessPresenter},
};

/// Headless presenter that writes every `every`-th presented frame to `dir` as PNG.
pub struct PngPresenter {
    inner: HeadlessPresenter,
    dir: PathBuf,
    every: u64,
    written: Vec<PathBuf>,
}

impl PngPresenter {
    pub fn new(size: GridSize, dir: impl Into<PathBuf>, every: u64) -> SlimeResult<Self> {
        if every == 0 {
            return Err(SlimeError::validation("png presenter interval must be >= 1"));
        }
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| {
            SlimeError::setup(format!("create output dir '{}': {e}", dir.display()))
        })?;
        Ok(Self {
            inner: HeadlessPresenter::new(size),
            dir,
            every,
            written: Vec::new(),
        })
    }

    /// Files written so far, in presentation order.
    pub fn written(&self) -> &[PathBuf] {
        &self.written
    }
}

impl PresentationBackend for PngPresenter {
    fn size(&self) -> GridSize {
        self.inner.size()
    }

    fn surfaces(&mut self) -> SurfacePair<'_> {
        self.inner.surfaces()
    }

    fn present_and_flip(&mut self) -> SlimeResult<()> {
        self.inner.present_and_flip()?;
        let n = self.inner.flip_count();
        if n.is_multiple_of(self.every) {
            let path = self.dir.join(format!("frame_{n:06}.png"));
            write_png(&path, &self.inner.surfaces().front)?;
            tracing::debug!(path = %path.display(), "wrote frame");
            self.written.push(path);
        }
        Ok(())
    }

    fn flip_count(&self) -> u64 {
        self.inner.flip_count()
    }

    fn teardown(&mut self) -> SlimeResult<()> {
        self.inner.teardown()
    }
}

/// Save a surface as 8-bit RGB PNG.
pub fn write_png(path: &Path, surface: &Surface<'_>) -> SlimeResult<()> {
    let size = surface.size();
    let mut rgb = Vec::with_capacity(size.pixel_count() * 3);
    for y in 0..size.height {
        for px in surface.row(y) {
            rgb.extend_from_slice(&px.rgb());
        }
    }
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(|e| {
            SlimeError::setup(format!("create output dir '{}': {e}", parent.display()))
        })?;
    }
    image::save_buffer_with_format(
        path,
        &rgb,
        size.width,
        size.height,
        image::ColorType::Rgb8,
        image::ImageFormat::Png,
    )
    .map_err(|e| SlimeError::setup(format!("write png '{}': {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{buffer::FrameBuffer, pixel::Pixel};

    #[test]
    fn writes_every_nth_flip() {
        let dir = PathBuf::from("target").join("png_presenter_test");
        let _ = std::fs::remove_dir_all(&dir);
        let size = GridSize::new(4, 4).unwrap();
        let mut p = PngPresenter::new(size, &dir, 2).unwrap();

        let frame = FrameBuffer::filled(size, Pixel::from_rgb(10, 20, 30));
        for _ in 0..5 {
            p.surfaces().back.copy_from(&frame).unwrap();
            p.present_and_flip().unwrap();
        }

        assert_eq!(p.written().len(), 2);
        let img = image::open(&p.written()[0]).unwrap().to_rgb8();
        assert_eq!(img.dimensions(), (4, 4));
        assert_eq!(img.get_pixel(3, 3).0, [10, 20, 30]);
    }

    #[test]
    fn zero_interval_is_rejected() {
        let size = GridSize::new(2, 2).unwrap();
        assert!(PngPresenter::new(size, "target/png_presenter_zero", 0).is_err());
    }
}
