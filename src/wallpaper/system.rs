// src/wallpaper/system.rs
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context};
use log::warn;

use super::WallpaperBackend;

const FALLBACK_DISPLAY_SIZE: (u32, u32) = (1920, 1080);

/// The running desktop's background setting, via the `wallpaper` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemWallpaper;

impl WallpaperBackend for SystemWallpaper {
    fn current(&self) -> anyhow::Result<Option<PathBuf>> {
        let raw = wallpaper::get()
            .map_err(|err| anyhow!("{err}"))
            .context("query desktop wallpaper")?;
        let trimmed = raw.trim();
        let trimmed = trimmed.strip_prefix("file://").unwrap_or(trimmed);
        if trimmed.is_empty() {
            return Ok(None);
        }
        Ok(Some(PathBuf::from(trimmed)))
    }

    fn set(&self, path: &Path) -> anyhow::Result<()> {
        let path_str = path
            .to_str()
            .ok_or_else(|| anyhow!("path is not valid UTF-8"))?;
        wallpaper::set_from_path(path_str)
            .map_err(|err| anyhow!("{err}"))
            .with_context(|| format!("set desktop wallpaper to {path_str}"))
    }

    fn primary_display_size(&self) -> (u32, u32) {
        match display_size() {
            Some(size) => size,
            None => {
                warn!(
                    "Primary display size unavailable, assuming {}x{}.",
                    FALLBACK_DISPLAY_SIZE.0, FALLBACK_DISPLAY_SIZE.1
                );
                FALLBACK_DISPLAY_SIZE
            }
        }
    }
}

#[cfg(target_os = "windows")]
fn display_size() -> Option<(u32, u32)> {
    use windows::Win32::UI::WindowsAndMessaging::{GetSystemMetrics, SM_CXSCREEN, SM_CYSCREEN};

    // SAFETY: GetSystemMetrics has no preconditions and only reads system state.
    let (width, height) = unsafe { (GetSystemMetrics(SM_CXSCREEN), GetSystemMetrics(SM_CYSCREEN)) };
    let width = u32::try_from(width).ok().filter(|w| *w > 0)?;
    let height = u32::try_from(height).ok().filter(|h| *h > 0)?;
    Some((width, height))
}

#[cfg(not(target_os = "windows"))]
fn display_size() -> Option<(u32, u32)> {
    None
}
