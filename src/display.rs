//! Display acquisition over Linux framebuffer devices.

use std::{
    fs::{File, OpenOptions},
    path::{Path, PathBuf},
};

use crate::{
    buffer::GridSize,
    foundation::error::{SlimeError, SlimeResult},
    present::fbdev,
};

const DEVICE_DIR: &str = "/dev";

/// An opened output, ready to be handed to a presenter.
#[derive(Debug)]
pub struct DisplayHandle {
    pub device: File,
    pub path: PathBuf,
    pub size: GridSize,
    /// Framebuffer devices are owned outright; nothing is leased from a display server.
    pub is_leased: bool,
}

/// Open the framebuffer selected by `output_index`.
///
/// `0` picks the first device that opens and reports a mode. `k >= 1` picks the k-th device in
/// enumeration order (`/dev/fb0` is 1). Running out of devices is a configuration error.
#[tracing::instrument]
pub fn acquire_display(output_index: usize) -> SlimeResult<DisplayHandle> {
    let devices = list_framebuffers(Path::new(DEVICE_DIR))?;
    if devices.is_empty() {
        return Err(SlimeError::setup("no framebuffer device found under /dev"));
    }

    let handle = match resolve_output_index(devices.len(), output_index)? {
        Some(i) => open_framebuffer(&devices[i])?,
        None => devices
            .iter()
            .find_map(|path| match open_framebuffer(path) {
                Ok(h) => Some(h),
                Err(e) => {
                    tracing::debug!(path = %path.display(), error = %e, "skipping framebuffer");
                    None
                }
            })
            .ok_or_else(|| SlimeError::setup("no usable framebuffer device"))?,
    };

    tracing::info!(
        path = %handle.path.display(),
        width = handle.size.width,
        height = handle.size.height,
        "display acquired"
    );
    Ok(handle)
}

/// Map a user-facing output index onto a position in a list of `count` devices.
///
/// `Ok(None)` means "first usable".
pub fn resolve_output_index(count: usize, output_index: usize) -> SlimeResult<Option<usize>> {
    match output_index {
        0 => Ok(None),
        k if k <= count => Ok(Some(k - 1)),
        k => Err(SlimeError::config(format!(
            "output index {k} out of range: {count} output(s) available"
        ))),
    }
}

/// `fbN` entries of `dir`, sorted by `N`.
pub fn list_framebuffers(dir: &Path) -> SlimeResult<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir)
        .map_err(|e| SlimeError::setup(format!("read '{}': {e}", dir.display())))?;
    let mut found: Vec<(u32, PathBuf)> = entries
        .filter_map(|entry| {
            let entry = entry.ok()?;
            let name = entry.file_name();
            let n = name.to_str()?.strip_prefix("fb")?.parse::<u32>().ok()?;
            Some((n, entry.path()))
        })
        .collect();
    found.sort_by_key(|(n, _)| *n);
    Ok(found.into_iter().map(|(_, p)| p).collect())
}

fn open_framebuffer(path: &Path) -> SlimeResult<DisplayHandle> {
    let device = OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .map_err(|e| SlimeError::setup(format!("open '{}': {e}", path.display())))?;
    let var = fbdev::query_var(&device)?;
    let (w, h) = var.visible_size();
    Ok(DisplayHandle {
        device,
        path: path.to_path_buf(),
        size: GridSize::new(w, h)?,
        is_leased: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_selects_first_usable() {
        assert_eq!(resolve_output_index(3, 0).unwrap(), None);
    }

    #[test]
    fn positive_index_is_one_based() {
        assert_eq!(resolve_output_index(3, 1).unwrap(), Some(0));
        assert_eq!(resolve_output_index(3, 3).unwrap(), Some(2));
    }

    #[test]
    fn out_of_range_index_is_a_config_error() {
        let err = resolve_output_index(2, 3).unwrap_err();
        assert!(matches!(err, SlimeError::Config(_)), "{err}");
        assert!(err.to_string().contains("2 output(s) available"));
    }

    #[test]
    fn framebuffers_sort_numerically() {
        let dir = std::env::temp_dir().join(format!("slime-fb-list-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        for name in ["fb10", "fb2", "fb0", "fbx", "tty0"] {
            std::fs::write(dir.join(name), b"").unwrap();
        }

        let found = list_framebuffers(&dir).unwrap();
        let names: Vec<_> = found
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, ["fb0", "fb2", "fb10"]);

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
