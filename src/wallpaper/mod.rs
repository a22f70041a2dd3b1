// src/wallpaper/mod.rs
//! Desktop background ownership.
//!
//! `WallpaperStore` is the single writer of the OS background while the
//! application runs. It keeps a bitmap copy of whatever the user had before
//! the first session so it can always be put back.

use std::{
    fs, io,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, PoisonError,
    },
    time::SystemTime,
};

use image::{ImageFormat, Rgb, RgbImage};
use log::{debug, info, warn};

use crate::{
    config::AppPaths,
    error::{PublishError, RestoreError, SnapshotError},
};

mod system;

pub use system::SystemWallpaper;

/// The OS calls the store is built on.
pub trait WallpaperBackend: Send + Sync {
    /// Path of the current background image, `None` when the OS reports none.
    fn current(&self) -> anyhow::Result<Option<PathBuf>>;
    fn set(&self, path: &Path) -> anyhow::Result<()>;
    /// Resolution of the primary display in pixels.
    fn primary_display_size(&self) -> (u32, u32);
}

/// What the desktop looked like before the first session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WallpaperSnapshot {
    pub stored_path: PathBuf,
    pub captured_at: SystemTime,
    /// False when the stored image is a synthesized blank. A snapshot kept
    /// from an earlier, unfinished run counts as existing.
    pub had_existing_wallpaper: bool,
}

pub struct WallpaperStore {
    backend: Arc<dyn WallpaperBackend>,
    paths: AppPaths,
    snapshot: Mutex<Option<WallpaperSnapshot>>,
    dirty: AtomicBool,
    /// `.bmp` copy made for the last published non-bitmap name.
    bitmap_copy: Mutex<Option<PathBuf>>,
}

impl WallpaperStore {
    pub fn new(backend: Arc<dyn WallpaperBackend>, paths: AppPaths) -> Self {
        Self {
            backend,
            paths,
            snapshot: Mutex::new(None),
            dirty: AtomicBool::new(false),
            bitmap_copy: Mutex::new(None),
        }
    }

    pub fn paths(&self) -> &AppPaths {
        &self.paths
    }

    pub fn snapshot(&self) -> Option<WallpaperSnapshot> {
        self.snapshot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Records the pre-session wallpaper. Later calls return the first result.
    ///
    /// An on-disk snapshot is preserved instead of recaptured when a previous
    /// run never restored it, or when the OS already points at one of our own
    /// files.
    pub fn capture_initial_snapshot(&self) -> Result<WallpaperSnapshot, SnapshotError> {
        let mut slot = self.snapshot.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = slot.as_ref() {
            debug!("Snapshot already captured at {:?}, skipping.", existing.captured_at);
            return Ok(existing.clone());
        }

        let root = self.paths.root();
        fs::create_dir_all(root).map_err(|source| SnapshotError::Io {
            path: root.to_path_buf(),
            source,
        })?;

        let current = match self.backend.current() {
            Ok(current) => current,
            Err(err) => {
                warn!("Could not query current wallpaper: {:#}", err);
                None
            }
        };

        let stored_path = self.paths.snapshot();
        let unfinished_run = self.paths.marker().exists();
        let points_at_us = current
            .as_deref()
            .is_some_and(|path| self.paths.is_managed(path));

        let had_existing_wallpaper = if stored_path.is_file() && (unfinished_run || points_at_us) {
            warn!(
                "Keeping snapshot {} from an earlier run (unfinished: {}).",
                stored_path.display(),
                unfinished_run
            );
            self.dirty.store(unfinished_run, Ordering::Release);
            true
        } else {
            match current.as_deref().filter(|path| path.is_file()) {
                Some(path) => match image::open(path) {
                    Ok(original) => {
                        save_bitmap(&original.to_rgb8(), &stored_path)?;
                        info!("Saved original wallpaper {} as {}", path.display(), stored_path.display());
                        true
                    }
                    Err(err) => {
                        warn!("Original wallpaper {} is unreadable ({}), using a blank image.", path.display(), err);
                        self.write_blank(&stored_path)?;
                        false
                    }
                },
                None => {
                    info!("No wallpaper file reported by the OS, using a blank image.");
                    self.write_blank(&stored_path)?;
                    false
                }
            }
        };

        let snapshot = WallpaperSnapshot {
            stored_path,
            captured_at: SystemTime::now(),
            had_existing_wallpaper,
        };
        *slot = Some(snapshot.clone());
        Ok(snapshot)
    }

    /// Sets the desktop background to the bitmap at `frame_path`.
    pub fn publish(&self, frame_path: &Path) -> Result<(), PublishError> {
        let target = normalize_bitmap_path(frame_path).map_err(|err| PublishError {
            path: frame_path.to_path_buf(),
            reason: err.to_string(),
        })?;

        if target != frame_path {
            let previous = self
                .bitmap_copy
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .replace(target.clone());
            if let Some(previous) = previous.filter(|previous| *previous != target) {
                remove_copy(&previous);
            }
        }

        if !self.dirty.swap(true, Ordering::AcqRel) {
            if let Err(err) = fs::write(self.paths.marker(), b"") {
                warn!("Could not write session marker: {}", err);
            }
        }

        self.backend.set(&target).map_err(|err| PublishError {
            path: target.clone(),
            reason: format!("{err:#}"),
        })
    }

    /// Puts the snapshot back on the desktop. Safe to call repeatedly.
    pub fn restore(&self) -> Result<(), RestoreError> {
        let path = self
            .snapshot()
            .map(|snapshot| snapshot.stored_path)
            .ok_or(RestoreError::NoSnapshot)?;

        self.backend.set(&path).map_err(|err| RestoreError::Os {
            path: path.clone(),
            reason: format!("{err:#}"),
        })?;

        if self.dirty.swap(false, Ordering::AcqRel) {
            match fs::remove_file(self.paths.marker()) {
                Ok(()) => {}
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => warn!("Could not remove session marker: {}", err),
            }
        }
        // Only now is the desktop off the copy.
        if let Some(copy) = self.bitmap_copy.lock().unwrap_or_else(PoisonError::into_inner).take() {
            remove_copy(&copy);
        }
        info!("Original background restored.");
        Ok(())
    }

    fn write_blank(&self, stored_path: &Path) -> Result<(), SnapshotError> {
        let (width, height) = self.backend.primary_display_size();
        let blank = RgbImage::from_pixel(width.max(1), height.max(1), Rgb([0, 0, 0]));
        save_bitmap(&blank, stored_path)
    }
}

fn save_bitmap(image: &RgbImage, path: &Path) -> Result<(), SnapshotError> {
    image
        .save_with_format(path, ImageFormat::Bmp)
        .map_err(|source| SnapshotError::Encode {
            path: path.to_path_buf(),
            source,
        })
}

fn remove_copy(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => debug!("Removed bitmap copy {}", path.display()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => warn!("Could not remove bitmap copy {}: {}", path.display(), err),
    }
}

/// The OS call wants a `.bmp` name. Anything else is copied next to it
/// byte for byte; pixel data is never re-encoded here. The store deletes
/// the copy on restore.
fn normalize_bitmap_path(path: &Path) -> io::Result<PathBuf> {
    let is_bmp = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("bmp"));
    if is_bmp {
        return Ok(path.to_path_buf());
    }
    let mut name = path.as_os_str().to_owned();
    name.push(".bmp");
    let target = PathBuf::from(name);
    fs::copy(path, &target)?;
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeWallpaper;

    fn store_with(backend: &Arc<FakeWallpaper>, root: &Path) -> WallpaperStore {
        WallpaperStore::new(backend.clone(), AppPaths::new(root))
    }

    #[test]
    fn test_snapshot_copies_existing_wallpaper_as_bitmap() {
        let dir = tempfile::tempdir().unwrap();
        let original = dir.path().join("beach.png");
        RgbImage::from_pixel(8, 4, Rgb([10, 20, 30])).save(&original).unwrap();

        let backend = Arc::new(FakeWallpaper::with_current(Some(original)));
        let store = store_with(&backend, &dir.path().join("state"));
        let snapshot = store.capture_initial_snapshot().unwrap();

        assert!(snapshot.had_existing_wallpaper);
        assert_eq!(snapshot.stored_path.extension().unwrap(), "bmp");
        let stored = image::open(&snapshot.stored_path).unwrap().to_rgb8();
        assert_eq!(stored.dimensions(), (8, 4));
        assert_eq!(stored.get_pixel(0, 0), &Rgb([10, 20, 30]));
    }

    #[test]
    fn test_missing_wallpaper_synthesizes_display_sized_blank() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(FakeWallpaper::with_current(None).display(1366, 768));
        let store = store_with(&backend, dir.path());

        let snapshot = store.capture_initial_snapshot().unwrap();
        assert!(!snapshot.had_existing_wallpaper);
        let blank = image::open(&snapshot.stored_path).unwrap().to_rgb8();
        assert_eq!(blank.dimensions(), (1366, 768));
        assert_eq!(blank.get_pixel(100, 100), &Rgb([0, 0, 0]));

        store.restore().unwrap();
        assert_eq!(backend.current_path(), Some(snapshot.stored_path));
    }

    #[test]
    fn test_unreadable_wallpaper_falls_back_to_blank() {
        let dir = tempfile::tempdir().unwrap();
        let broken = dir.path().join("broken.jpg");
        fs::write(&broken, b"not an image").unwrap();
        let backend = Arc::new(FakeWallpaper::with_current(Some(broken)).display(32, 16));
        let store = store_with(&backend, &dir.path().join("state"));

        let snapshot = store.capture_initial_snapshot().unwrap();
        assert!(!snapshot.had_existing_wallpaper);
        assert_eq!(image::image_dimensions(&snapshot.stored_path).unwrap(), (32, 16));
    }

    #[test]
    fn test_second_capture_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(FakeWallpaper::with_current(None).display(4, 4));
        let store = store_with(&backend, dir.path());

        let first = store.capture_initial_snapshot().unwrap();
        let written = fs::read(&first.stored_path).unwrap();

        backend.set_display(64, 64);
        let second = store.capture_initial_snapshot().unwrap();
        assert_eq!(first, second);
        assert_eq!(fs::read(&second.stored_path).unwrap(), written);
    }

    #[test]
    fn test_unfinished_run_keeps_oldest_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let paths = AppPaths::new(dir.path());
        RgbImage::from_pixel(2, 2, Rgb([200, 0, 0]))
            .save_with_format(paths.snapshot(), ImageFormat::Bmp)
            .unwrap();
        fs::write(paths.marker(), b"").unwrap();

        let newer = dir.path().join("newer.png");
        RgbImage::from_pixel(2, 2, Rgb([0, 200, 0])).save(&newer).unwrap();
        let backend = Arc::new(FakeWallpaper::with_current(Some(newer)));
        let store = store_with(&backend, dir.path());

        let snapshot = store.capture_initial_snapshot().unwrap();
        let kept = image::open(&snapshot.stored_path).unwrap().to_rgb8();
        assert_eq!(kept.get_pixel(0, 0), &Rgb([200, 0, 0]));

        store.restore().unwrap();
        assert!(!paths.marker().exists());
    }

    #[test]
    fn test_restore_twice_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(FakeWallpaper::with_current(None).display(4, 4));
        let store = store_with(&backend, dir.path());
        let snapshot = store.capture_initial_snapshot().unwrap();

        store.restore().unwrap();
        let once = backend.current_path();
        store.restore().unwrap();
        assert_eq!(backend.current_path(), once);
        assert_eq!(once, Some(snapshot.stored_path));
    }

    #[test]
    fn test_restore_without_snapshot_fails() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(FakeWallpaper::with_current(None));
        let store = store_with(&backend, dir.path());
        assert!(matches!(store.restore(), Err(RestoreError::NoSnapshot)));
    }

    #[test]
    fn test_publish_marks_session_and_reports_os_failure() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(FakeWallpaper::with_current(None).display(4, 4));
        let store = store_with(&backend, dir.path());
        store.capture_initial_snapshot().unwrap();

        let frame = store.paths().frame();
        RgbImage::new(4, 4).save_with_format(&frame, ImageFormat::Bmp).unwrap();
        store.publish(&frame).unwrap();
        assert_eq!(backend.current_path(), Some(frame.clone()));
        assert!(store.paths().marker().exists());

        backend.fail_sets_for(&frame);
        let err = store.publish(&frame).unwrap_err();
        assert_eq!(err.path, frame);
    }

    #[test]
    fn test_publish_normalizes_extension() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(FakeWallpaper::with_current(None));
        let store = store_with(&backend, dir.path());

        let frame = dir.path().join("frame.tmp");
        RgbImage::new(2, 2).save_with_format(&frame, ImageFormat::Bmp).unwrap();
        store.publish(&frame).unwrap();

        let published = backend.current_path().unwrap();
        assert_eq!(published, dir.path().join("frame.tmp.bmp"));
        assert_eq!(fs::read(&published).unwrap(), fs::read(&frame).unwrap());
    }

    #[test]
    fn test_restore_deletes_bitmap_copy() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(FakeWallpaper::with_current(None).display(2, 2));
        let store = store_with(&backend, dir.path());
        store.capture_initial_snapshot().unwrap();

        let frame = dir.path().join("frame.tmp");
        RgbImage::new(2, 2).save_with_format(&frame, ImageFormat::Bmp).unwrap();
        store.publish(&frame).unwrap();
        store.publish(&frame).unwrap();
        let copy = dir.path().join("frame.tmp.bmp");
        assert!(copy.exists());

        store.restore().unwrap();
        assert!(!copy.exists());
        assert!(frame.exists());
        assert_eq!(backend.current_path(), store.snapshot().map(|s| s.stored_path));
    }
}
