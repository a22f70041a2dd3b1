// src/visibility.rs
//! Decides whether a wallpaper update would actually be seen.
//!
//! The check compares the foreground window's bounds against the desktop's.
//! It is a coverage heuristic, not real occlusion: a desktop more than half
//! covered by the active window counts as hidden.

use std::sync::Arc;

use log::debug;

/// Window bounds in screen coordinates; `right`/`bottom` are exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Rect {
    pub const fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self { left, top, right, bottom }
    }

    pub fn width(&self) -> i64 {
        i64::from(self.right) - i64::from(self.left)
    }

    pub fn height(&self) -> i64 {
        i64::from(self.bottom) - i64::from(self.top)
    }

    pub fn area(&self) -> i64 {
        self.width().max(0) * self.height().max(0)
    }

    /// Area shared with `other`, zero when they do not touch.
    pub fn overlap_area(&self, other: &Rect) -> i64 {
        let width = i64::from(self.right.min(other.right)) - i64::from(self.left.max(other.left));
        let height = i64::from(self.bottom.min(other.bottom)) - i64::from(self.top.max(other.top));
        width.max(0) * height.max(0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowInfo {
    pub handle: isize,
    pub rect: Rect,
}

/// Live window-system queries. `None` means the handle is currently invalid.
pub trait WindowSystem: Send + Sync {
    fn desktop_window(&self) -> Option<WindowInfo>;
    fn foreground_window(&self) -> Option<WindowInfo>;
}

pub struct VisibilityOracle {
    windows: Arc<dyn WindowSystem>,
}

impl VisibilityOracle {
    pub fn new(windows: Arc<dyn WindowSystem>) -> Self {
        Self { windows }
    }

    /// Backed by the host's window system.
    pub fn system() -> Self {
        Self::new(Arc::new(SystemWindows::default()))
    }

    pub fn is_desktop_visible(&self) -> bool {
        let Some(desktop) = self.windows.desktop_window() else {
            debug!("Desktop window unavailable, treating as hidden.");
            return false;
        };
        let Some(foreground) = self.windows.foreground_window() else {
            debug!("Foreground window unavailable, treating desktop as hidden.");
            return false;
        };
        desktop_visible(&desktop, &foreground)
    }
}

/// Visible unless the foreground window covers more than half the desktop.
pub fn desktop_visible(desktop: &WindowInfo, foreground: &WindowInfo) -> bool {
    if foreground.handle == desktop.handle {
        return true;
    }
    let desktop_area = desktop.rect.area();
    if desktop_area == 0 || foreground.rect.area() == 0 {
        return false;
    }
    let overlap = desktop.rect.overlap_area(&foreground.rect);
    2 * overlap <= desktop_area
}

#[cfg(target_os = "windows")]
pub type SystemWindows = win32::Win32Windows;
#[cfg(not(target_os = "windows"))]
pub type SystemWindows = BareDesktop;

/// For hosts without a foreground-window query: the desktop is always on top.
#[cfg(not(target_os = "windows"))]
#[derive(Debug, Default)]
pub struct BareDesktop;

#[cfg(not(target_os = "windows"))]
impl WindowSystem for BareDesktop {
    fn desktop_window(&self) -> Option<WindowInfo> {
        Some(WindowInfo {
            handle: 0,
            rect: Rect::default(),
        })
    }

    fn foreground_window(&self) -> Option<WindowInfo> {
        self.desktop_window()
    }
}

#[cfg(target_os = "windows")]
mod win32 {
    use windows::{
        core::{w, PCWSTR},
        Win32::{
            Foundation::{HWND, RECT},
            UI::WindowsAndMessaging::{FindWindowW, GetForegroundWindow, GetWindowRect},
        },
    };

    use super::{Rect, WindowInfo, WindowSystem};

    /// Progman is the shell window that paints the background.
    #[derive(Debug, Default)]
    pub struct Win32Windows;

    fn window_info(hwnd: HWND) -> Option<WindowInfo> {
        if hwnd.is_invalid() {
            return None;
        }
        let mut rect = RECT::default();
        // SAFETY: `rect` is a valid out-pointer; a stale handle makes the call fail, not UB.
        unsafe { GetWindowRect(hwnd, &mut rect) }.ok()?;
        Some(WindowInfo {
            handle: hwnd.0 as isize,
            rect: Rect::new(rect.left, rect.top, rect.right, rect.bottom),
        })
    }

    impl WindowSystem for Win32Windows {
        fn desktop_window(&self) -> Option<WindowInfo> {
            // SAFETY: both arguments are static, null-terminated or null.
            let hwnd = unsafe { FindWindowW(w!("Progman"), PCWSTR::null()) }.ok()?;
            window_info(hwnd)
        }

        fn foreground_window(&self) -> Option<WindowInfo> {
            // SAFETY: no arguments; returns a null handle when nothing has focus.
            window_info(unsafe { GetForegroundWindow() })
        }
    }
}
