// src/camera.rs
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use image::RgbImage;
use log::{debug, error, info, warn};
use nokhwa::{
    pixel_format::{RgbFormat, YuyvFormat},
    utils::{CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType, Resolution},
    Camera, NokhwaError,
};

use crate::error::{OpenError, ReadError};

// --- Constants ---
const REQUESTED_WIDTH: u32 = 1280;
const REQUESTED_HEIGHT: u32 = 720;
const REQUESTED_FPS: u32 = 30;
const MAX_ENUMERATED_CAMERAS: u32 = 16;
const ENUMERATE_READ_TIMEOUT: Duration = Duration::from_secs(2);
const CLOSE_GRACE: Duration = Duration::from_millis(500);
const REQUEST_POLL: Duration = Duration::from_millis(50);
const DECODE_BACKOFF: Duration = Duration::from_millis(50);
const READ_TIMEOUT_BACKOFF: Duration = Duration::from_millis(100);

/// An opened camera. Reads block for at most the given timeout.
pub trait CameraHandle: Send {
    fn index(&self) -> u32;
    fn read_frame(&mut self, timeout: Duration) -> Result<RgbImage, ReadError>;
    /// Releases the device.
    fn close(self: Box<Self>);
}

pub trait FrameSource: Send + Sync {
    fn open(&self, index: u32) -> Result<Box<dyn CameraHandle>, OpenError>;

    /// Indices that open and yield a frame, checking upward from 0 and
    /// stopping at the first failure. Not cached.
    fn enumerate(&self) -> Vec<u32> {
        let mut found = Vec::new();
        for index in 0..MAX_ENUMERATED_CAMERAS {
            let mut handle = match self.open(index) {
                Ok(handle) => handle,
                Err(err) => {
                    debug!("Enumeration stopped at camera {}: {}", index, err);
                    break;
                }
            };
            let first_frame = handle.read_frame(ENUMERATE_READ_TIMEOUT);
            handle.close();
            if let Err(err) = first_frame {
                debug!("Enumeration stopped at camera {}: {}", index, err);
                break;
            }
            found.push(index);
        }
        info!("Available cameras: {:?}", found);
        found
    }
}

#[derive(Debug)]
enum CameraThreadMsg {
    Frame(RgbImage),
    Error(String),
}

/// Outcome of one attempt to pull a frame off the device.
#[derive(Debug)]
enum Grab {
    Frame(RgbImage),
    /// Transient; try again after the given pause.
    Retry(Duration),
    Failed(String),
}

/// The device side of a reader thread. Lives and dies on that thread.
trait FrameGrabber {
    fn grab(&mut self) -> Grab;
}

/// Cameras through nokhwa's native backends, each on its own reader thread.
///
/// The reader only touches the device when a read asks for a frame, so a
/// session that stops reading also stops capturing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NokhwaSource;

impl FrameSource for NokhwaSource {
    fn open(&self, index: u32) -> Result<Box<dyn CameraHandle>, OpenError> {
        let camera = spawn_reader(index, move || NokhwaGrabber::open(index))?;
        Ok(Box::new(camera))
    }
}

/// Starts a reader thread around the grabber `open` builds there and waits
/// for it to report whether the device came up.
fn spawn_reader<G, F>(index: u32, open: F) -> Result<NokhwaCamera, OpenError>
where
    G: FrameGrabber,
    F: FnOnce() -> Result<G, OpenError> + Send + 'static,
{
    // One outstanding request at a time, answered by exactly one reply.
    let (request_tx, request_rx) = crossbeam_channel::bounded(1);
    let (reply_tx, reply_rx) = crossbeam_channel::bounded(1);
    let (ready_tx, ready_rx) = crossbeam_channel::bounded(1);
    let (done_tx, done_rx) = crossbeam_channel::bounded(1);
    let stop_signal = Arc::new(AtomicBool::new(false));

    let reader = {
        let stop_signal = stop_signal.clone();
        thread::Builder::new()
            .name(format!("camera-{index}"))
            .spawn(move || {
                match open() {
                    Ok(grabber) => {
                        let _ = ready_tx.send(Ok(()));
                        serve_requests(index, grabber, &request_rx, &reply_tx, &stop_signal);
                    }
                    Err(err) => {
                        error!("{}", err);
                        let _ = ready_tx.send(Err(err));
                    }
                }
                debug!("Camera {} reader finished.", index);
                let _ = done_tx.send(());
            })
            .map_err(|err| OpenError::Device {
                index,
                reason: format!("failed to spawn reader thread: {err}"),
            })?
    };

    match ready_rx.recv() {
        Ok(Ok(())) => Ok(NokhwaCamera {
            index,
            requests: request_tx,
            replies: reply_rx,
            stop_signal,
            done: done_rx,
            reader: Some(reader),
        }),
        Ok(Err(err)) => {
            let _ = reader.join();
            Err(err)
        }
        Err(_) => {
            let _ = reader.join();
            Err(OpenError::ReaderGone { index })
        }
    }
}

/// Answers each request with one captured frame. Idle between requests.
fn serve_requests<G: FrameGrabber>(
    index: u32,
    mut grabber: G,
    requests: &Receiver<()>,
    replies: &Sender<CameraThreadMsg>,
    stop_signal: &AtomicBool,
) {
    while !stop_signal.load(Ordering::Relaxed) {
        match requests.recv_timeout(REQUEST_POLL) {
            Ok(()) => {}
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => return,
        }
        let reply = loop {
            if stop_signal.load(Ordering::Relaxed) {
                return;
            }
            match grabber.grab() {
                Grab::Frame(frame) => break CameraThreadMsg::Frame(frame),
                Grab::Retry(backoff) => thread::sleep(backoff),
                Grab::Failed(reason) => {
                    error!("Camera {} failed to capture frame: {}", index, reason);
                    let _ = replies.try_send(CameraThreadMsg::Error(reason));
                    return;
                }
            }
        };
        // Full only when the reader already answered; the newer frame wins next time.
        let _ = replies.try_send(reply);
    }
}

struct NokhwaCamera {
    index: u32,
    requests: Sender<()>,
    replies: Receiver<CameraThreadMsg>,
    stop_signal: Arc<AtomicBool>,
    done: Receiver<()>,
    reader: Option<JoinHandle<()>>,
}

impl NokhwaCamera {
    fn shutdown(&mut self) {
        let Some(reader) = self.reader.take() else {
            return;
        };
        self.stop_signal.store(true, Ordering::Relaxed);
        match self.done.recv_timeout(CLOSE_GRACE) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if let Err(e) = reader.join() {
                    error!("Camera {} reader thread panicked: {:?}", self.index, e);
                } else {
                    info!("Camera {} released.", self.index);
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    "Camera {} reader is stuck in a device read, detaching it.",
                    self.index
                );
            }
        }
    }
}

impl CameraHandle for NokhwaCamera {
    fn index(&self) -> u32 {
        self.index
    }

    fn read_frame(&mut self, timeout: Duration) -> Result<RgbImage, ReadError> {
        // A reply left over from a read that gave up is older than this request.
        let mut failure = None;
        for stale in self.replies.try_iter() {
            if let CameraThreadMsg::Error(reason) = stale {
                failure = Some(reason);
            }
        }
        if let Some(reason) = failure {
            return Err(ReadError::Device(reason));
        }

        match self.requests.try_send(()) {
            // Full: the previous request is still being served and its reply is ours.
            Ok(()) | Err(TrySendError::Full(())) => {}
            Err(TrySendError::Disconnected(())) => return Err(ReadError::Disconnected),
        }

        match self.replies.recv_timeout(timeout) {
            Ok(CameraThreadMsg::Frame(frame)) => Ok(frame),
            Ok(CameraThreadMsg::Error(reason)) => Err(ReadError::Device(reason)),
            Err(RecvTimeoutError::Timeout) => Err(ReadError::Timeout(timeout)),
            Err(RecvTimeoutError::Disconnected) => Err(ReadError::Disconnected),
        }
    }

    fn close(mut self: Box<Self>) {
        self.shutdown();
    }
}

impl Drop for NokhwaCamera {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// An open nokhwa stream. Stopped when dropped on the reader thread.
struct NokhwaGrabber {
    index: u32,
    camera: Camera,
}

impl NokhwaGrabber {
    fn open(index: u32) -> Result<Self, OpenError> {
        let requested_resolution = Resolution::new(REQUESTED_WIDTH, REQUESTED_HEIGHT);
        let requested_cam_format =
            CameraFormat::new(requested_resolution, FrameFormat::YUYV, REQUESTED_FPS);
        let requested_format =
            RequestedFormat::new::<YuyvFormat>(RequestedFormatType::Closest(requested_cam_format));
        debug!("Requested camera format: {:?}", requested_format);

        let camera_result = Camera::new(CameraIndex::Index(index), requested_format);
        #[cfg(target_os = "macos")]
        let camera_result = camera_result.or_else(|err| {
            warn!(
                "Default backend failed: {}. Trying AVFoundation explicitly...",
                err
            );
            Camera::with_backend(
                CameraIndex::Index(index),
                requested_format,
                nokhwa::utils::ApiBackend::AVFoundation,
            )
        });

        let mut camera = camera_result.map_err(|err| OpenError::Device {
            index,
            reason: err.to_string(),
        })?;
        info!(
            "Camera {} initialized with format {:?}",
            index,
            camera.camera_format()
        );

        camera.open_stream().map_err(|err| OpenError::Stream {
            index,
            reason: err.to_string(),
        })?;
        Ok(Self { index, camera })
    }
}

impl FrameGrabber for NokhwaGrabber {
    fn grab(&mut self) -> Grab {
        match self.camera.frame() {
            Ok(frame) => match frame.decode_image::<RgbFormat>() {
                Ok(decoded) => Grab::Frame(decoded),
                Err(err) => {
                    warn!("Failed to decode frame to RGB: {}", err);
                    Grab::Retry(DECODE_BACKOFF)
                }
            },
            Err(NokhwaError::ReadFrameError(msg)) if msg.contains("Timeout") => {
                warn!("Camera {} frame read timeout.", self.index);
                Grab::Retry(READ_TIMEOUT_BACKOFF)
            }
            Err(err) => Grab::Failed(err.to_string()),
        }
    }
}

impl Drop for NokhwaGrabber {
    fn drop(&mut self) {
        if let Err(e) = self.camera.stop_stream() {
            error!("Failed to stop camera {} stream cleanly: {}", self.index, e);
        }
    }
}
