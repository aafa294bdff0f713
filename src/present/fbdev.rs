//! Linux framebuffer (`/dev/fbN`) presenter.
//!
//! Two pages are stacked in one virtual screen of twice the visible height; flipping pans the
//! visible window between them. Drivers that refuse the taller virtual screen get a single
//! visible page plus an off-screen shadow buffer that is copied in after each vblank.
#![allow(unsafe_code)]

use std::{
    ffi::c_void,
    fs::File,
    num::NonZeroUsize,
    os::fd::AsRawFd,
    path::PathBuf,
    ptr::NonNull,
    time::{Duration, Instant},
};

use nix::{
    errno::Errno,
    sys::mman::{MapFlags, ProtFlags, mmap, munmap},
};

use crate::{
    buffer::GridSize,
    display::DisplayHandle,
    foundation::error::{SlimeError, SlimeResult},
    pixel::Pixel,
    present::{PresentOpts, PresentationBackend, Surface, SurfaceMut, SurfacePair},
};

// Kernel ABI mirrors; most fields are only ever round-tripped back to the driver.
#[allow(dead_code)]
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct FbBitfield {
    offset: u32,
    length: u32,
    msb_right: u32,
}

#[allow(dead_code)]
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct FbVarScreenInfo {
    xres: u32,
    yres: u32,
    xres_virtual: u32,
    yres_virtual: u32,
    xoffset: u32,
    yoffset: u32,
    bits_per_pixel: u32,
    grayscale: u32,
    red: FbBitfield,
    green: FbBitfield,
    blue: FbBitfield,
    transp: FbBitfield,
    nonstd: u32,
    activate: u32,
    height: u32,
    width: u32,
    accel_flags: u32,
    pixclock: u32,
    left_margin: u32,
    right_margin: u32,
    upper_margin: u32,
    lower_margin: u32,
    hsync_len: u32,
    vsync_len: u32,
    sync: u32,
    vmode: u32,
    rotate: u32,
    colorspace: u32,
    reserved: [u32; 4],
}

#[allow(dead_code)]
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
struct FbFixScreenInfo {
    id: [u8; 16],
    smem_start: libc::c_ulong,
    smem_len: u32,
    type_: u32,
    type_aux: u32,
    visual: u32,
    xpanstep: u16,
    ypanstep: u16,
    ywrapstep: u16,
    line_length: u32,
    mmio_start: libc::c_ulong,
    mmio_len: u32,
    accel: u32,
    capabilities: u16,
    reserved: [u16; 2],
}

const FB_ACTIVATE_NOW: u32 = 0;

nix::ioctl_read_bad!(fbioget_vscreeninfo, 0x4600, FbVarScreenInfo);
nix::ioctl_write_ptr_bad!(fbioput_vscreeninfo, 0x4601, FbVarScreenInfo);
nix::ioctl_read_bad!(fbioget_fscreeninfo, 0x4602, FbFixScreenInfo);
nix::ioctl_write_ptr_bad!(fbiopan_display, 0x4606, FbVarScreenInfo);
nix::ioctl_write_ptr!(fbio_waitforvsync, b'F', 0x20, u32);

pub(crate) fn query_var(device: &File) -> SlimeResult<FbVarScreenInfo> {
    let mut var = FbVarScreenInfo::default();
    unsafe { fbioget_vscreeninfo(device.as_raw_fd(), &mut var) }
        .map_err(|e| SlimeError::setup(format!("FBIOGET_VSCREENINFO failed: {e}")))?;
    Ok(var)
}

fn query_fix(device: &File) -> SlimeResult<FbFixScreenInfo> {
    let mut fix = FbFixScreenInfo::default();
    unsafe { fbioget_fscreeninfo(device.as_raw_fd(), &mut fix) }
        .map_err(|e| SlimeError::setup(format!("FBIOGET_FSCREENINFO failed: {e}")))?;
    Ok(fix)
}

impl FbVarScreenInfo {
    pub(crate) fn visible_size(&self) -> (u32, u32) {
        (self.xres, self.yres)
    }

    /// The surface must be XRGB32 with the exact channel offsets [`Pixel`] uses.
    fn check_xrgb32(&self) -> SlimeResult<()> {
        let xrgb = |f: FbBitfield, offset: u32| f.offset == offset && f.length == 8;
        if self.bits_per_pixel != 32
            || !xrgb(self.red, 16)
            || !xrgb(self.green, 8)
            || !xrgb(self.blue, 0)
        {
            return Err(SlimeError::setup(format!(
                "unsupported pixel layout: {} bpp, red@{} green@{} blue@{} (need 32 bpp XRGB)",
                self.bits_per_pixel, self.red.offset, self.green.offset, self.blue.offset
            )));
        }
        Ok(())
    }

    /// Refresh period from the mode timings, if the driver reports them.
    fn refresh_period(&self) -> Option<Duration> {
        if self.pixclock == 0 {
            return None;
        }
        let htotal = u64::from(self.left_margin)
            + u64::from(self.right_margin)
            + u64::from(self.hsync_len)
            + u64::from(self.xres);
        let vtotal = u64::from(self.upper_margin)
            + u64::from(self.lower_margin)
            + u64::from(self.vsync_len)
            + u64::from(self.yres);
        // pixclock is in picoseconds per pixel.
        let picos = u64::from(self.pixclock) * htotal * vtotal;
        (picos > 0).then(|| Duration::from_nanos(picos / 1000))
    }
}

/// Front and back pages of `all`. With a shadow buffer the back page is the shadow and the
/// front is always page 0.
fn split_pages<'a>(
    all: &'a mut [Pixel],
    shadow: Option<&'a mut Vec<Pixel>>,
    front_page: usize,
    page_len: usize,
) -> (&'a [Pixel], &'a mut [Pixel]) {
    match shadow {
        Some(shadow) => (&all[..page_len], shadow.as_mut_slice()),
        None => {
            let (p0, rest) = all.split_at_mut(page_len);
            let p1 = &mut rest[..page_len];
            if front_page == 0 { (&*p0, p1) } else { (&*p1, p0) }
        }
    }
}

struct Mapping {
    ptr: NonNull<c_void>,
    len: usize,
}

impl Mapping {
    fn pixels_mut(&mut self) -> &mut [Pixel] {
        // The mapping is page aligned, `len` bytes long and lives as long as `self`.
        unsafe {
            std::slice::from_raw_parts_mut(self.ptr.as_ptr().cast::<Pixel>(), self.len / 4)
        }
    }
}

impl Drop for Mapping {
    fn drop(&mut self) {
        if let Err(e) = unsafe { munmap(self.ptr, self.len) } {
            tracing::warn!(error = %e, "munmap of framebuffer failed");
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum VsyncMode {
    Ioctl,
    Paced,
}

/// Page-flipping presenter over a memory-mapped Linux framebuffer.
pub struct FbdevPresenter {
    device: File,
    path: PathBuf,
    size: GridSize,
    stride: usize,
    var: FbVarScreenInfo,
    original_var: FbVarScreenInfo,
    map: Option<Mapping>,
    shadow: Option<Vec<Pixel>>,
    /// Stand-in pages handed out once the mapping is gone.
    detached: Vec<Pixel>,
    front: usize,
    vsync: VsyncMode,
    refresh: Duration,
    last_flip: Instant,
    opts: PresentOpts,
    flips: u64,
}

impl FbdevPresenter {
    #[tracing::instrument(skip_all, fields(path = %handle.path.display()))]
    pub fn new(handle: DisplayHandle, opts: PresentOpts) -> SlimeResult<Self> {
        let DisplayHandle { device, path, .. } = handle;
        let original_var = query_var(&device)?;
        original_var.check_xrgb32()?;
        let (w, h) = original_var.visible_size();
        let size = GridSize::new(w, h)?;

        let mut wanted = original_var;
        wanted.yres_virtual = h * 2;
        wanted.xres_virtual = w;
        wanted.yoffset = 0;
        wanted.xoffset = 0;
        wanted.activate = FB_ACTIVATE_NOW;
        if let Err(e) = unsafe { fbioput_vscreeninfo(device.as_raw_fd(), &wanted) } {
            tracing::warn!(error = %e, "driver refused a double-height virtual screen");
        }

        let var = query_var(&device)?;
        var.check_xrgb32()?;
        let fix = query_fix(&device)?;
        if fix.line_length % 4 != 0 {
            return Err(SlimeError::setup(format!(
                "line length {} is not a whole number of pixels",
                fix.line_length
            )));
        }
        let stride = (fix.line_length / 4) as usize;
        let page_bytes = fix.line_length as usize * h as usize;
        let double = var.yres_virtual >= h * 2
            && fix.ypanstep != 0
            && fix.smem_len as usize >= page_bytes * 2;
        let pages = if double { 2 } else { 1 };
        if !double {
            tracing::warn!("panning unavailable, presenting through a shadow buffer");
        }

        let len = NonZeroUsize::new(page_bytes * pages)
            .ok_or_else(|| SlimeError::setup("framebuffer has zero length"))?;
        let ptr = unsafe {
            mmap(
                None,
                len,
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_SHARED,
                &device,
                0,
            )
        }
        .map_err(|e| SlimeError::setup(format!("mmap framebuffer: {e}")))?;
        let map = Mapping {
            ptr,
            len: len.get(),
        };

        let refresh = var.refresh_period().unwrap_or(Duration::from_micros(16_667));
        tracing::info!(
            width = w,
            height = h,
            stride,
            pages,
            refresh_hz = 1.0 / refresh.as_secs_f64(),
            "framebuffer mode"
        );

        let mut presenter = Self {
            device,
            path,
            size,
            stride,
            var,
            original_var,
            map: Some(map),
            shadow: (!double).then(|| vec![Pixel::BLACK; stride * h as usize]),
            detached: Vec::new(),
            front: 0,
            vsync: VsyncMode::Ioctl,
            refresh,
            last_flip: Instant::now(),
            opts,
            flips: 0,
        };
        if double {
            presenter.pan_to(0)?;
        }
        Ok(presenter)
    }

    fn page_len(&self) -> usize {
        self.stride * self.size.height as usize
    }

    fn pan_to(&mut self, page: usize) -> SlimeResult<()> {
        self.var.xoffset = 0;
        self.var.yoffset = page as u32 * self.size.height;
        unsafe { fbiopan_display(self.device.as_raw_fd(), &self.var) }
            .map_err(|e| SlimeError::setup(format!("FBIOPAN_DISPLAY failed: {e}")))?;
        Ok(())
    }

    fn wait_vblank(&mut self) -> SlimeResult<()> {
        if self.vsync == VsyncMode::Ioctl {
            let crtc: u32 = 0;
            match unsafe { fbio_waitforvsync(self.device.as_raw_fd(), &crtc) } {
                Ok(_) => return Ok(()),
                // Interrupted by a signal; the frame loop observes the shutdown flag next.
                Err(Errno::EINTR) => return Ok(()),
                Err(Errno::ENOTTY | Errno::EINVAL | Errno::EOPNOTSUPP) => {
                    tracing::warn!("FBIO_WAITFORVSYNC unsupported, pacing frames by sleeping");
                    self.vsync = VsyncMode::Paced;
                }
                Err(e) => {
                    return Err(SlimeError::setup(format!("FBIO_WAITFORVSYNC failed: {e}")));
                }
            }
        }
        let elapsed = self.last_flip.elapsed();
        let wait = self
            .refresh
            .saturating_sub(elapsed)
            .min(self.opts.vsync_timeout);
        if !wait.is_zero() {
            std::thread::sleep(wait);
        }
        Ok(())
    }
}

impl PresentationBackend for FbdevPresenter {
    fn size(&self) -> GridSize {
        self.size
    }

    fn surfaces(&mut self) -> SurfacePair<'_> {
        let size = self.size;
        let stride = self.stride;
        let page_len = self.page_len();
        let front_page = self.front;
        if self.map.is_none() && self.detached.is_empty() {
            tracing::warn!("framebuffer surfaces requested after teardown; drawing off screen");
            self.detached = vec![Pixel::BLACK; page_len * 2];
        }
        let all = match self.map.as_mut() {
            Some(map) => map.pixels_mut(),
            None => self.detached.as_mut_slice(),
        };
        let (front, back) = split_pages(all, self.shadow.as_mut(), front_page, page_len);
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
        if self.map.is_none() {
            return Err(SlimeError::setup("present after teardown"));
        }
        if self.shadow.is_none() {
            let back = self.front ^ 1;
            self.pan_to(back)?;
            self.wait_vblank()?;
            self.front = back;
        } else {
            self.wait_vblank()?;
            let page_len = self.page_len();
            if let (Some(map), Some(shadow)) = (self.map.as_mut(), self.shadow.as_ref()) {
                map.pixels_mut()[..page_len].copy_from_slice(shadow);
            }
        }
        self.last_flip = Instant::now();
        self.flips += 1;
        Ok(())
    }

    fn flip_count(&self) -> u64 {
        self.flips
    }

    fn teardown(&mut self) -> SlimeResult<()> {
        let Some(mut map) = self.map.take() else {
            return Ok(());
        };
        if self.shadow.is_none() && self.front == 1 {
            let page_len = self.page_len();
            map.pixels_mut().copy_within(page_len..page_len * 2, 0);
            let _ = self.pan_to(0);
        }
        drop(map);
        let mut restore = self.original_var;
        restore.activate = FB_ACTIVATE_NOW;
        if let Err(e) = unsafe { fbioput_vscreeninfo(self.device.as_raw_fd(), &restore) } {
            tracing::warn!(error = %e, "restoring the original screen info failed");
        }
        tracing::info!(path = %self.path.display(), flips = self.flips, "framebuffer released");
        Ok(())
    }
}

impl Drop for FbdevPresenter {
    fn drop(&mut self) {
        let _ = self.teardown();
    }
}
