//! Overlay window - egui/eframe application.
//!
//! # Architecture
//!
//! [`OverlayApp`] is the top-level [`eframe::App`].  It draws whatever
//! [`PoseSnapshot`] the reactor last published and owns the host controls:
//!
//! * `reactor`     - [`ReactorHandle`] for rule edits and state previews.
//! * `platform_tx` - sends [`PlatformCommand`] to [`crate::platform::run_platform`].
//! * `connection`  - watch of the Twitch [`ConnectionStatus`].
//! * `monitor`     - the [`SpeakingMonitor`]; re-created on device change.
//!
//! # Layout
//!
//! | Area | Content |
//! |------|---------|
//! | Central panel | Pose image on the chroma background |
//! | Right panel (F1) | Connection, microphone, trigger editor, state picker |

use std::time::Duration;

use eframe::egui;
use tokio::sync::{mpsc, watch};

use crate::audio::{list_input_devices, MonitorStatus, SpeakingMonitor};
use crate::config::UiConfig;
use crate::platform::{ConnectionStatus, PlatformCommand};
use crate::reactor::{PoseSnapshot, ReactorError, ReactorHandle};
use crate::triggers::{
    PlatformEventType, RegistryError, RuleUpdate, StateDefinition, DEFAULT_STATE_KEY,
};

// ---------------------------------------------------------------------------
// RuleEditor  (per-state edit buffer)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Feedback {
    Saved,
    Rejected(String),
}

#[derive(Debug, Clone)]
struct RuleEditor {
    key: String,
    label: String,
    command: String,
    event: Option<PlatformEventType>,
    timeout_secs: u64,
    feedback: Option<Feedback>,
}

impl RuleEditor {
    fn from_definition(def: &StateDefinition) -> Self {
        Self {
            key: def.key.clone(),
            label: def.label.clone(),
            command: def.rule.chat_command.clone().unwrap_or_default(),
            event: def.rule.platform_event_type,
            timeout_secs: def.rule.reversion_timeout_secs,
            feedback: None,
        }
    }

    fn is_default(&self) -> bool {
        self.key == DEFAULT_STATE_KEY
    }

    /// The default state's event binding is not editable and is left out.
    fn to_update(&self) -> RuleUpdate {
        let command = self.command.trim();
        let update = RuleUpdate::default()
            .label(self.label.trim())
            .command((!command.is_empty()).then(|| command.to_string()))
            .timeout_secs(self.timeout_secs);
        if self.is_default() {
            update
        } else {
            update.event(self.event)
        }
    }

    fn reload(&mut self, def: &StateDefinition) {
        let feedback = self.feedback.take();
        *self = Self::from_definition(def);
        self.feedback = feedback;
    }
}

/// Text shown to the user for a rejected update.
fn describe_rejection(err: &ReactorError) -> String {
    match err {
        ReactorError::Registry(RegistryError::Conflict { event, occupied_by }) => {
            format!("\"{event}\" is already used by \"{occupied_by}\"; clear it there first")
        }
        other => other.to_string(),
    }
}

/// A live pipeline on the wanted device is kept; anything else is rebuilt.
fn needs_rebuild(current: Option<&str>, running: bool, wanted: Option<&str>) -> bool {
    !(running && current == wanted)
}

enum EditorAction {
    Save(usize),
    Preview(String),
}

// ---------------------------------------------------------------------------
// OverlayApp
// ---------------------------------------------------------------------------

pub struct OverlayApp {
    reactor: ReactorHandle,
    poses: watch::Receiver<PoseSnapshot>,
    connection: watch::Receiver<ConnectionStatus>,
    platform_tx: mpsc::Sender<PlatformCommand>,

    monitor: Option<SpeakingMonitor>,
    devices: Vec<String>,
    selected_device: Option<String>,
    device_error: Option<String>,

    editors: Vec<RuleEditor>,
    show_controls: bool,
    ui: UiConfig,
}

impl OverlayApp {
    /// * `monitor` - already-started microphone pipeline, if any.
    pub fn new(
        reactor: ReactorHandle,
        connection: watch::Receiver<ConnectionStatus>,
        platform_tx: mpsc::Sender<PlatformCommand>,
        monitor: Option<SpeakingMonitor>,
        ui: UiConfig,
    ) -> Self {
        let editors = match reactor.blocking_definitions() {
            Ok(defs) => defs.iter().map(RuleEditor::from_definition).collect(),
            Err(e) => {
                log::error!("ui: could not read trigger table: {e}");
                Vec::new()
            }
        };
        let selected_device = monitor
            .as_ref()
            .and_then(|m| m.device().map(ToOwned::to_owned));

        let mut app = Self {
            poses: reactor.subscribe(),
            reactor,
            connection,
            platform_tx,
            monitor,
            devices: Vec::new(),
            selected_device,
            device_error: None,
            editors,
            show_controls: ui.show_controls,
            ui,
        };
        app.refresh_devices();
        app
    }

    // ── Actions ──────────────────────────────────────────────────────────

    fn send_platform(&self, command: PlatformCommand) {
        if let Err(e) = self.platform_tx.try_send(command) {
            log::warn!("ui: platform command {command:?} dropped: {e}");
        }
    }

    fn refresh_devices(&mut self) {
        match list_input_devices() {
            Ok(devices) => {
                self.devices = devices;
                self.device_error = None;
            }
            Err(e) => {
                log::warn!("ui: {e}");
                self.devices.clear();
                self.device_error = Some(e.to_string());
            }
        }
    }

    fn apply_device(&mut self, device: Option<String>) {
        let Some(monitor) = self.monitor.as_mut() else {
            return;
        };
        if !needs_rebuild(monitor.device(), monitor.is_running(), device.as_deref()) {
            return;
        }
        if let Err(e) = monitor.select_device(device) {
            log::error!("ui: {e}");
            self.device_error = Some(e.to_string());
        }
    }

    fn save_editor(&mut self, index: usize) {
        let Some(editor) = self.editors.get(index) else {
            return;
        };
        let key = editor.key.clone();
        let result = self
            .reactor
            .blocking_update_trigger_rule(&key, editor.to_update());

        let Some(editor) = self.editors.get_mut(index) else {
            return;
        };
        match result {
            Ok(def) => {
                editor.reload(&def);
                editor.feedback = Some(Feedback::Saved);
            }
            Err(e) => editor.feedback = Some(Feedback::Rejected(describe_rejection(&e))),
        }
    }

    fn preview(&self, key: &str) {
        if let Err(e) = self.reactor.blocking_select_state(key) {
            log::warn!("ui: preview of {key} failed: {e}");
        }
    }

    // ── Panels ───────────────────────────────────────────────────────────

    fn draw_avatar(&self, ctx: &egui::Context) {
        let [r, g, b] = self.ui.background;
        let frame = egui::Frame::new().fill(egui::Color32::from_rgb(r, g, b));
        let snapshot = self.poses.borrow().clone();
        let path = self.ui.resolve_pose(snapshot.pose.image());
        let (w, h) = self.ui.avatar_size;

        egui::CentralPanel::default().frame(frame).show(ctx, |ui| {
            ui.centered_and_justified(|ui| {
                ui.add(
                    egui::Image::new(format!("file://{}", path.display()))
                        .fit_to_exact_size(egui::vec2(w, h)),
                );
            });
        });
    }

    fn draw_connection(&self, ui: &mut egui::Ui) {
        let status = self.connection.borrow().clone();
        ui.heading("Twitch");
        let color = match &status {
            ConnectionStatus::Connected { .. } => egui::Color32::from_rgb(80, 200, 120),
            ConnectionStatus::Failed(_) => egui::Color32::from_rgb(255, 136, 68),
            _ => egui::Color32::from_rgb(160, 160, 160),
        };
        ui.colored_label(color, status.label());
        ui.horizontal(|ui| {
            let busy = matches!(
                status,
                ConnectionStatus::Authenticating
                    | ConnectionStatus::Connected { .. }
                    | ConnectionStatus::Reconnecting
            );
            if ui.add_enabled(!busy, egui::Button::new("Connect")).clicked() {
                self.send_platform(PlatformCommand::Connect);
            }
            if ui
                .add_enabled(
                    !matches!(status, ConnectionStatus::Disconnected),
                    egui::Button::new("Disconnect"),
                )
                .clicked()
            {
                self.send_platform(PlatformCommand::Disconnect);
            }
        });
    }

    fn draw_microphone(&mut self, ui: &mut egui::Ui) {
        ui.heading("Microphone");

        let status = self
            .monitor
            .as_ref()
            .map(SpeakingMonitor::status)
            .unwrap_or_default();
        let color = match status {
            MonitorStatus::Running { .. } => egui::Color32::from_rgb(80, 200, 120),
            MonitorStatus::Unavailable(_) => egui::Color32::from_rgb(255, 136, 68),
            MonitorStatus::Stopped => egui::Color32::from_rgb(160, 160, 160),
        };
        ui.colored_label(color, status.label());

        let mut chosen = self.selected_device.clone();
        let mut rescan = false;
        ui.horizontal(|ui| {
            egui::ComboBox::from_id_salt("input-device")
                .selected_text(chosen.as_deref().unwrap_or("System default"))
                .show_ui(ui, |ui| {
                    ui.selectable_value(&mut chosen, None, "System default");
                    for name in &self.devices {
                        ui.selectable_value(&mut chosen, Some(name.clone()), name);
                    }
                });
            rescan = ui.small_button("↻").on_hover_text("Rescan devices").clicked();
        });
        if rescan {
            self.refresh_devices();
            self.apply_device(self.selected_device.clone());
        }
        if chosen != self.selected_device {
            self.selected_device = chosen.clone();
            self.apply_device(chosen);
        }

        if let Some(err) = &self.device_error {
            ui.colored_label(egui::Color32::from_rgb(255, 136, 68), err);
        }

        let speaking = self.poses.borrow().is_speaking;
        ui.label(if speaking { "● speaking" } else { "○ quiet" });
    }

    fn draw_states(&mut self, ui: &mut egui::Ui) {
        ui.heading("States");
        let current = self.poses.borrow().state_key.clone();
        let mut action = None;

        for (index, editor) in self.editors.iter_mut().enumerate() {
            let title = if editor.key == current {
                format!("▶ {} ({})", editor.label, editor.key)
            } else {
                format!("{} ({})", editor.label, editor.key)
            };
            egui::CollapsingHeader::new(title)
                .id_salt(&editor.key)
                .show(ui, |ui| {
                    egui::Grid::new(("rule", index)).num_columns(2).show(ui, |ui| {
                        ui.label("Label");
                        ui.text_edit_singleline(&mut editor.label);
                        ui.end_row();

                        ui.label("Command");
                        ui.text_edit_singleline(&mut editor.command);
                        ui.end_row();

                        ui.label("Event");
                        if editor.is_default() {
                            ui.weak("fallback state");
                        } else {
                            egui::ComboBox::from_id_salt(("event", index))
                                .selected_text(editor.event.map_or("none", |e| e.as_str()))
                                .show_ui(ui, |ui| {
                                    ui.selectable_value(&mut editor.event, None, "none");
                                    for ty in PlatformEventType::ALL {
                                        ui.selectable_value(
                                            &mut editor.event,
                                            Some(ty),
                                            ty.as_str(),
                                        );
                                    }
                                });
                        }
                        ui.end_row();

                        ui.label("Timeout (s)");
                        ui.add(egui::DragValue::new(&mut editor.timeout_secs).range(1..=3600));
                        ui.end_row();
                    });

                    ui.horizontal(|ui| {
                        if ui.button("Save").clicked() {
                            action = Some(EditorAction::Save(index));
                        }
                        if ui.button("Show").clicked() {
                            action = Some(EditorAction::Preview(editor.key.clone()));
                        }
                    });

                    match &editor.feedback {
                        Some(Feedback::Saved) => {
                            ui.colored_label(egui::Color32::from_rgb(80, 200, 120), "Saved");
                        }
                        Some(Feedback::Rejected(msg)) => {
                            ui.colored_label(egui::Color32::from_rgb(255, 136, 68), msg);
                        }
                        None => {}
                    }
                });
        }

        match action {
            Some(EditorAction::Save(index)) => self.save_editor(index),
            Some(EditorAction::Preview(key)) => self.preview(&key),
            None => {}
        }
    }
}

// ---------------------------------------------------------------------------
// eframe::App impl
// ---------------------------------------------------------------------------

impl eframe::App for OverlayApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        if ctx.input(|i| i.key_pressed(egui::Key::F1)) {
            self.show_controls = !self.show_controls;
        }

        // Pose changes trigger their own repaint; this keeps status text fresh.
        ctx.request_repaint_after(Duration::from_millis(250));

        if self.show_controls {
            egui::SidePanel::right("controls")
                .resizable(true)
                .default_width(280.0)
                .show(ctx, |ui| {
                    egui::ScrollArea::vertical().show(ui, |ui| {
                        self.draw_connection(ui);
                        ui.separator();
                        self.draw_microphone(ui);
                        ui.separator();
                        self.draw_states(ui);
                    });
                });
        }

        self.draw_avatar(ctx);
    }

    fn on_exit(&mut self, _gl: Option<&eframe::glow::Context>) {
        log::info!("ui: overlay closing");
        if let Some(mut monitor) = self.monitor.take() {
            monitor.stop();
        }
        self.send_platform(PlatformCommand::Disconnect);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
