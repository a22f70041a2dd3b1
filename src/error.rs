// src/error.rs
//! Error taxonomy for the capture pipeline.
//!
//! Only `OpenError` ever reaches the control surface. Everything raised inside
//! the worker is resolved there and shows up in the log and the session state.

use std::{path::PathBuf, time::Duration};

use thiserror::Error;

/// The camera at the requested index could not be brought up.
#[derive(Debug, Error)]
pub enum OpenError {
    #[error("camera {index} could not be opened: {reason}")]
    Device { index: u32, reason: String },
    #[error("camera {index} opened but its stream did not start: {reason}")]
    Stream { index: u32, reason: String },
    #[error("camera {index} reader thread exited before reporting")]
    ReaderGone { index: u32 },
}

/// A mid-session device fault. Ends the session.
#[derive(Debug, Error)]
pub enum ReadError {
    #[error("frame capture failed: {0}")]
    Device(String),
    #[error("no frame arrived within {0:?}")]
    Timeout(Duration),
    #[error("camera reader disconnected")]
    Disconnected,
}

/// The OS rejected a wallpaper update. Logged, never fatal.
#[derive(Debug, Error)]
#[error("failed to set wallpaper to {}: {reason}", path.display())]
pub struct PublishError {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Error)]
pub enum RestoreError {
    #[error("no wallpaper snapshot has been captured")]
    NoSnapshot,
    #[error("failed to restore wallpaper {}: {reason}", path.display())]
    Os { path: PathBuf, reason: String },
}

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("snapshot directory {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write snapshot image {}: {source}", path.display())]
    Encode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}
