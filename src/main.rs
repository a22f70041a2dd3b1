// src/main.rs
#![warn(clippy::all, rust_2018_idioms)]
#![cfg_attr(not(debug_assertions), windows_subsystem = "windows")]

mod camera;
mod config;
mod error;
mod session;
mod ui;
mod visibility;
mod wallpaper;

#[cfg(test)]
mod testing;

use std::sync::Arc;

use anyhow::Context;

use crate::{
    camera::NokhwaSource,
    config::{AppPaths, CaptureConfig},
    session::CaptureSession,
    visibility::VisibilityOracle,
    wallpaper::{SystemWallpaper, WallpaperStore},
};

fn main() -> eframe::Result {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    log::info!("Starting live camera wallpaper");

    let session = match build_session() {
        Ok(session) => session,
        Err(err) => {
            log::error!("Startup failed: {:#}", err);
            std::process::exit(1);
        }
    };

    let native_options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([400.0, 200.0])
            .with_min_inner_size([300.0, 180.0]),
        ..Default::default()
    };

    eframe::run_native(
        "Live Camera Wallpaper",
        native_options,
        Box::new(move |cc| Ok(Box::new(ui::ControlPanelApp::new(cc, session)))),
    )
}

/// Saves the original wallpaper, then wires the session to the host backends.
fn build_session() -> anyhow::Result<CaptureSession> {
    let paths = AppPaths::from_env();
    let store = Arc::new(WallpaperStore::new(Arc::new(SystemWallpaper), paths));
    let snapshot = store
        .capture_initial_snapshot()
        .context("save the original wallpaper")?;
    log::info!(
        "Original wallpaper kept at {} (existing: {})",
        snapshot.stored_path.display(),
        snapshot.had_existing_wallpaper
    );

    Ok(CaptureSession::new(
        store,
        VisibilityOracle::system(),
        Arc::new(NokhwaSource),
        CaptureConfig::default(),
    ))
}
