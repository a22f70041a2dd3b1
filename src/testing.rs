// src/testing.rs
//! In-memory backends for unit tests.

use std::{
    collections::{HashMap, HashSet},
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    thread,
    time::{Duration, Instant},
};

use anyhow::anyhow;
use image::{Rgb, RgbImage};

use crate::{
    camera::{CameraHandle, FrameSource},
    error::{OpenError, ReadError},
    visibility::{WindowInfo, WindowSystem},
    wallpaper::WallpaperBackend,
};

pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    condition()
}

/// Records every wallpaper change together with the top-left pixel of the
/// image at the time it was set.
pub struct FakeWallpaper {
    current: Mutex<Option<PathBuf>>,
    display: Mutex<(u32, u32)>,
    failing: Mutex<Option<PathBuf>>,
    history: Mutex<Vec<(PathBuf, Option<Rgb<u8>>)>>,
}

impl FakeWallpaper {
    pub fn with_current(current: Option<PathBuf>) -> Self {
        Self {
            current: Mutex::new(current),
            display: Mutex::new((16, 9)),
            failing: Mutex::new(None),
            history: Mutex::new(Vec::new()),
        }
    }

    pub fn display(self, width: u32, height: u32) -> Self {
        self.set_display(width, height);
        self
    }

    pub fn set_display(&self, width: u32, height: u32) {
        *self.display.lock().unwrap() = (width, height);
    }

    pub fn fail_sets_for(&self, path: &Path) {
        *self.failing.lock().unwrap() = Some(path.to_path_buf());
    }

    pub fn current_path(&self) -> Option<PathBuf> {
        self.current.lock().unwrap().clone()
    }

    pub fn set_count(&self) -> usize {
        self.history.lock().unwrap().len()
    }

    /// Pixels of every successful set of `path`, oldest first.
    pub fn tints_for(&self, path: &Path) -> Vec<Rgb<u8>> {
        self.history
            .lock()
            .unwrap()
            .iter()
            .filter(|(set, _)| set == path)
            .filter_map(|(_, tint)| *tint)
            .collect()
    }
}

impl WallpaperBackend for FakeWallpaper {
    fn current(&self) -> anyhow::Result<Option<PathBuf>> {
        Ok(self.current_path())
    }

    fn set(&self, path: &Path) -> anyhow::Result<()> {
        if self.failing.lock().unwrap().as_deref() == Some(path) {
            return Err(anyhow!("rejected by fake desktop"));
        }
        let tint = image::open(path).ok().map(|img| *img.to_rgb8().get_pixel(0, 0));
        self.history.lock().unwrap().push((path.to_path_buf(), tint));
        *self.current.lock().unwrap() = Some(path.to_path_buf());
        Ok(())
    }

    fn primary_display_size(&self) -> (u32, u32) {
        *self.display.lock().unwrap()
    }
}

pub struct FakeWindows {
    desktop: Mutex<Option<WindowInfo>>,
    foreground: Mutex<Option<WindowInfo>>,
}

impl FakeWindows {
    /// Starts with the desktop itself focused.
    pub fn new(desktop: WindowInfo) -> Self {
        Self {
            desktop: Mutex::new(Some(desktop)),
            foreground: Mutex::new(Some(desktop)),
        }
    }

    pub fn set_foreground(&self, window: Option<WindowInfo>) {
        *self.foreground.lock().unwrap() = window;
    }
}

impl WindowSystem for FakeWindows {
    fn desktop_window(&self) -> Option<WindowInfo> {
        *self.desktop.lock().unwrap()
    }

    fn foreground_window(&self) -> Option<WindowInfo> {
        *self.foreground.lock().unwrap()
    }
}

/// Colour of every frame produced by camera `index`.
pub fn tint(index: u32) -> Rgb<u8> {
    Rgb([(index as u8).wrapping_mul(50).wrapping_add(5), 100, 200])
}

#[derive(Default)]
struct SourceState {
    available: u32,
    broken: HashSet<u32>,
    fail_after: HashMap<u32, usize>,
    panicking: HashMap<u32, usize>,
    reads: HashMap<u32, usize>,
}

/// Cameras `0..available` open and stream solid frames of their `tint`.
#[derive(Clone, Default)]
pub struct FakeSource {
    state: Arc<Mutex<SourceState>>,
    open_handles: Arc<AtomicUsize>,
}

impl FakeSource {
    pub fn with_cameras(available: u32) -> Self {
        let source = Self::default();
        source.state.lock().unwrap().available = available;
        source
    }

    /// Opens fine but never yields a frame.
    pub fn broken(self, index: u32) -> Self {
        self.state.lock().unwrap().broken.insert(index);
        self
    }

    /// Fails every read after `reads` good frames.
    pub fn fail_after(self, index: u32, reads: usize) -> Self {
        self.state.lock().unwrap().fail_after.insert(index, reads);
        self
    }

    /// Panics inside the read after `reads` good frames.
    pub fn panic_after(self, index: u32, reads: usize) -> Self {
        self.state.lock().unwrap().panicking.insert(index, reads);
        self
    }

    pub fn reads(&self, index: u32) -> usize {
        self.state.lock().unwrap().reads.get(&index).copied().unwrap_or(0)
    }

    pub fn open_handles(&self) -> usize {
        self.open_handles.load(Ordering::SeqCst)
    }
}

impl FrameSource for FakeSource {
    fn open(&self, index: u32) -> Result<Box<dyn CameraHandle>, OpenError> {
        if index >= self.state.lock().unwrap().available {
            return Err(OpenError::Device {
                index,
                reason: "no such device".to_string(),
            });
        }
        self.open_handles.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeCamera {
            index,
            source: self.clone(),
        }))
    }
}

struct FakeCamera {
    index: u32,
    source: FakeSource,
}

impl CameraHandle for FakeCamera {
    fn index(&self) -> u32 {
        self.index
    }

    fn read_frame(&mut self, timeout: Duration) -> Result<RgbImage, ReadError> {
        let mut state = self.source.state.lock().unwrap();
        if state.broken.contains(&self.index) {
            return Err(ReadError::Timeout(timeout));
        }
        let limit = state.fail_after.get(&self.index).copied();
        let panic_at = state.panicking.get(&self.index).copied();
        let reads = state.reads.entry(self.index).or_insert(0);
        if limit.is_some_and(|limit| *reads >= limit) {
            return Err(ReadError::Device("device unplugged".to_string()));
        }
        if panic_at.is_some_and(|at| *reads >= at) {
            // Release the lock first so the fake stays usable after the unwind.
            drop(state);
            panic!("camera {} driver crashed", self.index);
        }
        *reads += 1;
        Ok(RgbImage::from_pixel(4, 4, tint(self.index)))
    }

    fn close(self: Box<Self>) {}
}

impl Drop for FakeCamera {
    fn drop(&mut self) {
        self.source.open_handles.fetch_sub(1, Ordering::SeqCst);
    }
}
