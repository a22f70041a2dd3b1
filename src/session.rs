// src/session.rs
//! The capture-and-publish loop and its lifecycle.
//!
//! One worker thread per session samples the camera, publishes frames as the
//! desktop background while the desktop is visible, and on every way out
//! closes the camera, deletes the frame artifact and restores the original
//! wallpaper before the session reads as `Idle` again.

use std::{
    fs, io,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, PoisonError},
    thread::{self, JoinHandle},
};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use image::{ImageFormat, RgbImage};
use log::{debug, error, info, warn};
use thiserror::Error;

use crate::{
    camera::{CameraHandle, FrameSource},
    config::CaptureConfig,
    error::{OpenError, SnapshotError},
    visibility::VisibilityOracle,
    wallpaper::WallpaperStore,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Running,
    Stopping,
}

/// Why `start` refused to begin a session.
#[derive(Debug, Error)]
pub enum StartError {
    #[error(transparent)]
    Open(#[from] OpenError),
    #[error("cannot start without a wallpaper snapshot: {0}")]
    Snapshot(#[from] SnapshotError),
}

struct Shared {
    state: Mutex<SessionState>,
    config: CaptureConfig,
    store: Arc<WallpaperStore>,
    oracle: VisibilityOracle,
    source: Arc<dyn FrameSource>,
    frame_path: PathBuf,
}

struct Worker {
    handle: JoinHandle<()>,
    stop_tx: Sender<()>,
}

pub struct CaptureSession {
    shared: Arc<Shared>,
    // Held for the whole of start/stop so control calls never interleave.
    worker: Mutex<Option<Worker>>,
}

impl CaptureSession {
    pub fn new(
        store: Arc<WallpaperStore>,
        oracle: VisibilityOracle,
        source: Arc<dyn FrameSource>,
        config: CaptureConfig,
    ) -> Self {
        let frame_path = store.paths().frame();
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(SessionState::Idle),
                config,
                store,
                oracle,
                source,
                frame_path,
            }),
            worker: Mutex::new(None),
        }
    }

    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    pub fn camera_index(&self) -> u32 {
        self.shared.config.camera_index()
    }

    /// Opens `camera_index` and spawns the worker. No-op while running.
    pub fn start(&self, camera_index: u32) -> Result<(), StartError> {
        let mut worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner);
        if self.shared.state() == SessionState::Running {
            debug!("Capture already running, ignoring start.");
            return Ok(());
        }
        // A session that ended on its own still has a handle to reap.
        if let Some(previous) = worker.take() {
            join_worker(previous);
        }

        if self.shared.store.snapshot().is_none() {
            warn!("Starting before the wallpaper snapshot was taken, taking it now.");
            self.shared.store.capture_initial_snapshot()?;
        }
        remove_artifact(&self.shared.frame_path);

        self.shared.config.set_camera_index(camera_index);
        let camera = self.shared.source.open(camera_index).map_err(|err| {
            error!("Could not start capture: {}", err);
            err
        })?;

        self.shared.set_state(SessionState::Running);
        let (stop_tx, stop_rx) = crossbeam_channel::bounded(1);
        let shared = self.shared.clone();
        let handle = thread::spawn(move || capture_loop(shared, camera, stop_rx));
        *worker = Some(Worker { handle, stop_tx });
        info!("Capture session started on camera {}.", camera_index);
        Ok(())
    }

    /// Signals the worker and waits until it has cleaned up. No-op when idle.
    pub fn stop(&self) {
        let mut worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(active) = worker.take() else {
            debug!("Capture not running, ignoring stop.");
            return;
        };
        {
            let mut state = self.shared.state.lock().unwrap_or_else(PoisonError::into_inner);
            if *state == SessionState::Running {
                *state = SessionState::Stopping;
            }
        }
        let _ = active.stop_tx.try_send(());
        join_worker(active);
        info!("Capture session stopped.");
    }

    /// Applies to the running session before its next frame read.
    pub fn set_camera(&self, camera_index: u32) {
        self.shared.config.set_camera_index(camera_index);
        info!("Camera index changed to {}.", camera_index);
    }

    pub fn enumerate_cameras(&self) -> Vec<u32> {
        self.shared.source.enumerate()
    }

    /// Teardown hook for the hosting window or process.
    pub fn on_close(&self) {
        info!("Close requested, stopping capture.");
        self.stop();
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.stop();
    }
}

fn join_worker(worker: Worker) {
    if let Err(e) = worker.handle.join() {
        error!("Capture worker panicked: {:?}", e);
    }
}

impl Shared {
    fn state(&self) -> SessionState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, next: SessionState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = next;
    }

    /// Reopens the device when `set_camera` picked another index. A failed
    /// switch falls back to the camera that was streaming.
    fn follow_camera_selection(&self, camera: &mut Option<Box<dyn CameraHandle>>) -> Result<(), OpenError> {
        let Some(active) = camera.as_ref().map(|handle| handle.index()) else {
            return Ok(());
        };
        let requested = self.config.camera_index();
        if requested == active {
            return Ok(());
        }

        info!("Switching camera {} -> {}.", active, requested);
        if let Some(old) = camera.take() {
            old.close();
        }
        match self.source.open(requested) {
            Ok(handle) => *camera = Some(handle),
            Err(err) => {
                warn!("Camera {} unavailable ({}), staying on camera {}.", requested, err, active);
                self.config.revert_camera_index(requested, active);
                *camera = Some(self.source.open(active)?);
            }
        }
        Ok(())
    }

    fn publish_frame(&self, frame: &RgbImage) {
        if let Err(err) = frame.save_with_format(&self.frame_path, ImageFormat::Bmp) {
            warn!("Failed to write frame {}: {}", self.frame_path.display(), err);
            return;
        }
        if let Err(err) = self.store.publish(&self.frame_path) {
            warn!("{}", err);
        }
    }

    fn finish(&self, camera: Option<Box<dyn CameraHandle>>) {
        self.set_state(SessionState::Stopping);
        if let Some(camera) = camera {
            camera.close();
        }
        remove_artifact(&self.frame_path);
        if let Err(err) = self.store.restore() {
            error!("{}", err);
        }
        self.set_state(SessionState::Idle);
        info!("Capture session ended.");
    }
}

fn remove_artifact(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => info!("Temporary image deleted."),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => warn!("Failed to delete {}: {}", path.display(), err),
    }
}

/// Runs the session's cleanup when the worker leaves, panics included.
struct SessionGuard {
    shared: Arc<Shared>,
    camera: Option<Box<dyn CameraHandle>>,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.shared.finish(self.camera.take());
    }
}

fn capture_loop(shared: Arc<Shared>, camera: Box<dyn CameraHandle>, stop_rx: Receiver<()>) {
    let mut guard = SessionGuard {
        shared,
        camera: Some(camera),
    };
    let shared = guard.shared.clone();

    while shared.state() == SessionState::Running {
        if shared.oracle.is_desktop_visible() {
            if let Err(err) = shared.follow_camera_selection(&mut guard.camera) {
                error!("Lost the camera while switching: {}", err);
                break;
            }
            let Some(camera) = guard.camera.as_mut() else {
                break;
            };
            match camera.read_frame(shared.config.read_timeout()) {
                Ok(frame) => shared.publish_frame(&frame),
                Err(err) => {
                    error!("Failed to capture image from camera {}: {}", camera.index(), err);
                    break;
                }
            }
        }

        match stop_rx.recv_timeout(shared.config.cadence()) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}
