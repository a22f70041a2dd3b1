// src/config.rs
use std::{
    path::{Path, PathBuf},
    sync::atomic::{AtomicU32, Ordering},
    time::Duration,
};

use log::debug;

// --- Constants ---
/// Upper bound on how often the wallpaper is rewritten.
pub const FRAME_CADENCE: Duration = Duration::from_nanos(1_000_000_000 / 60);
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(2);

const DIR_ENV_VAR: &str = "LIVE_CAM_WALLPAPER_DIR";
const APP_DIR_NAME: &str = "live-cam-wallpaper";
const SNAPSHOT_FILE: &str = "original_bg.bmp";
const FRAME_FILE: &str = "temp_bg.bmp";
const MARKER_FILE: &str = "session.active";

/// Capture settings shared between the control surface and the worker.
///
/// The camera index is atomic so `set_camera` never tears against a read
/// from the worker.
#[derive(Debug)]
pub struct CaptureConfig {
    camera_index: AtomicU32,
    cadence: Duration,
    read_timeout: Duration,
}

impl CaptureConfig {
    pub fn new(camera_index: u32) -> Self {
        Self {
            camera_index: AtomicU32::new(camera_index),
            cadence: FRAME_CADENCE,
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }

    #[cfg(test)]
    pub fn with_cadence(mut self, cadence: Duration) -> Self {
        self.cadence = cadence;
        self
    }

    pub fn camera_index(&self) -> u32 {
        self.camera_index.load(Ordering::Acquire)
    }

    pub fn set_camera_index(&self, index: u32) {
        self.camera_index.store(index, Ordering::Release);
    }

    /// Puts `previous` back only if nobody asked for another camera meanwhile.
    pub fn revert_camera_index(&self, requested: u32, previous: u32) -> bool {
        self.camera_index
            .compare_exchange(requested, previous, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn cadence(&self) -> Duration {
        self.cadence
    }

    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self::new(0)
    }
}

/// Files the application keeps under its per-user directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppPaths {
    root: PathBuf,
}

impl AppPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolves the working directory from the environment, falling back to
    /// the platform's local data directory.
    pub fn from_env() -> Self {
        let root = std::env::var_os(DIR_ENV_VAR)
            .filter(|value| !value.is_empty())
            .map(PathBuf::from)
            .or_else(|| dirs::data_local_dir().map(|dir| dir.join(APP_DIR_NAME)))
            .or_else(|| dirs::home_dir().map(|home| home.join(format!(".{APP_DIR_NAME}"))))
            .unwrap_or_else(|| std::env::temp_dir().join(APP_DIR_NAME));
        debug!("Using working directory {}", root.display());
        Self::new(root)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn snapshot(&self) -> PathBuf {
        self.root.join(SNAPSHOT_FILE)
    }

    pub fn frame(&self) -> PathBuf {
        self.root.join(FRAME_FILE)
    }

    pub fn marker(&self) -> PathBuf {
        self.root.join(MARKER_FILE)
    }

    /// True when `path` is one of the files this application writes.
    pub fn is_managed(&self, path: &Path) -> bool {
        path == self.snapshot() || path == self.frame()
    }
}
