// src/ui.rs
use std::time::Duration;

use egui::{Align, Color32, Layout};
use log::{error, info};

use crate::session::{CaptureSession, SessionState};

// Workers end sessions on their own, so keep polling the state.
const STATE_POLL_INTERVAL: Duration = Duration::from_millis(250);

pub struct ControlPanelApp {
    session: CaptureSession,
    cameras: Vec<u32>,
    selected: Option<u32>,
    status: Option<String>,
}

impl ControlPanelApp {
    pub fn new(_cc: &eframe::CreationContext<'_>, session: CaptureSession) -> Self {
        info!("Initializing control panel");
        let cameras = session.enumerate_cameras();
        let selected = cameras.first().copied();
        Self {
            session,
            cameras,
            selected,
            status: None,
        }
    }

    fn refresh_cameras(&mut self) {
        self.cameras = self.session.enumerate_cameras();
        if self.selected.map_or(true, |index| !self.cameras.contains(&index)) {
            self.selected = self.cameras.first().copied();
        }
    }

    fn start(&mut self) {
        let Some(index) = self.selected else {
            return;
        };
        self.status = match self.session.start(index) {
            Ok(()) => None,
            Err(err) => {
                error!("Start failed: {}", err);
                Some(err.to_string())
            }
        };
    }

    fn camera_picker(&mut self, ui: &mut egui::Ui, idle: bool) {
        ui.label("Select Camera:");
        if self.cameras.is_empty() {
            ui.label("No camera available");
        } else {
            let before = self.selected;
            egui::ComboBox::from_id_salt("camera_select")
                .selected_text(self.selected.map_or_else(String::new, |i| format!("Camera {i}")))
                .width(160.0)
                .show_ui(ui, |ui| {
                    for &index in &self.cameras {
                        ui.selectable_value(&mut self.selected, Some(index), format!("Camera {index}"));
                    }
                });
            if self.selected != before {
                if let Some(index) = self.selected {
                    self.session.set_camera(index);
                }
            }
        }
        if ui.add_enabled(idle, egui::Button::new("Refresh")).clicked() {
            self.refresh_cameras();
        }
    }
}

impl eframe::App for ControlPanelApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        ctx.request_repaint_after(STATE_POLL_INTERVAL);
        let state = self.session.state();
        let idle = state == SessionState::Idle;

        egui::TopBottomPanel::top("top_panel").show(ctx, |ui| {
            egui::menu::bar(ui, |ui| {
                ui.menu_button("File", |ui| {
                    if ui.button("Quit").clicked() {
                        ctx.send_viewport_cmd(egui::ViewportCommand::Close);
                    }
                });
                ui.add_space(16.0);
                egui::widgets::global_theme_preference_buttons(ui);
            });
        });

        egui::TopBottomPanel::bottom("bottom_panel")
            .resizable(false)
            .show(ctx, |ui| {
                ui.with_layout(Layout::right_to_left(Align::Center), |ui| {
                    ui.label(format!("Session: {state:?}"));
                    ui.add_space(10.0);
                    if !idle {
                        ui.label(format!("Camera {}", self.session.camera_index()));
                    }
                });
            });

        egui::CentralPanel::default().show(ctx, |ui| {
            ui.with_layout(Layout::top_down(Align::Center), |ui| {
                let can_start = idle && self.selected.is_some();
                if ui
                    .add_enabled(can_start, egui::Button::new("Start").min_size([160.0, 0.0].into()))
                    .clicked()
                {
                    self.start();
                }
                if ui
                    .add_enabled(state == SessionState::Running, egui::Button::new("Stop").min_size([160.0, 0.0].into()))
                    .clicked()
                {
                    self.session.stop();
                }
                ui.add_space(8.0);
                self.camera_picker(ui, idle);

                if let Some(status) = &self.status {
                    ui.colored_label(Color32::RED, status.as_str());
                }
            });
        });
    }

    fn on_exit(&mut self, _gl: Option<&eframe::glow::Context>) {
        info!("Exit requested. Stopping capture...");
        self.session.on_close();
    }
}
