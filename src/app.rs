use std::path::PathBuf;
use std::sync::mpsc::Receiver;
use std::time::{Duration, Instant};

use eframe::egui;
use tokio::runtime::Handle;

use crate::api::{ApiError, MediaApi};
use crate::classes::ClassEditor;
use crate::config::AppConfig;
use crate::coords::{self, NotReady, Point, Size};
use crate::draw::{AnnotationMode, DrawState, PointerButton};
use crate::editing::{self, EditDrag, Hit};
use crate::model::{Annotation, AnnotationId, MediaId, ProjectId};
use crate::protocol::PromptLabel;
use crate::session::{AnnotationSession, Inbound, SessionError};
use crate::viewport::Viewport;

/// Time between frames while a video plays.
const PLAYBACK_INTERVAL: Duration = Duration::from_millis(500);

const PROMPT_RADIUS: f32 = 5.0;

const PALETTE: [egui::Color32; 8] = [
    egui::Color32::from_rgb(230, 57, 70),
    egui::Color32::from_rgb(42, 157, 143),
    egui::Color32::from_rgb(233, 196, 106),
    egui::Color32::from_rgb(69, 123, 157),
    egui::Color32::from_rgb(244, 162, 97),
    egui::Color32::from_rgb(131, 56, 236),
    egui::Color32::from_rgb(58, 134, 255),
    egui::Color32::from_rgb(255, 0, 110),
];

const DRAFT_COLOR: egui::Color32 = egui::Color32::from_rgb(255, 221, 0);
const SUGGESTION_COLOR: egui::Color32 = egui::Color32::from_rgb(0, 229, 255);

// ── Canvas geometry ─────────────────────────────────────────────────────────

struct ImageTexture {
    id: MediaId,
    handle: egui::TextureHandle,
    original: Size,
}

enum CanvasImage {
    Empty,
    /// Selected, but its bytes are not in the local cache.
    Missing(MediaId),
    Loaded(ImageTexture),
}

impl CanvasImage {
    fn id(&self) -> Option<&MediaId> {
        match self {
            CanvasImage::Empty => None,
            CanvasImage::Missing(id) => Some(id),
            CanvasImage::Loaded(tex) => Some(&tex.id),
        }
    }
}

/// Where the stage sits on screen this frame.
#[derive(Clone, Copy)]
struct Stage {
    origin: egui::Pos2,
    display: Size,
    original: Size,
}

impl Stage {
    /// Fit the image into `available`, no wider than `max_width`.
    fn fit(origin: egui::Pos2, available: egui::Vec2, max_width: f32, original: Size) -> Stage {
        let aspect = original.height / original.width;
        let mut width = max_width.min(available.x);
        if width * aspect > available.y {
            width = available.y / aspect;
        }
        Stage {
            origin,
            display: Size::new(width, width * aspect),
            original,
        }
    }

    fn frame_rect(&self) -> egui::Rect {
        egui::Rect::from_min_size(self.origin, egui::vec2(self.display.width, self.display.height))
    }

    fn local(&self, pos: egui::Pos2) -> Point {
        Point::new(pos.x - self.origin.x, pos.y - self.origin.y)
    }

    fn to_screen(&self, viewport: &Viewport, display: Point) -> egui::Pos2 {
        let p = viewport.display_to_screen(display);
        egui::pos2(self.origin.x + p.x, self.origin.y + p.y)
    }

    fn to_display(&self, viewport: &Viewport, pos: egui::Pos2) -> Point {
        viewport.screen_to_display(self.local(pos))
    }

    /// Pointer position in original space, held inside the image.
    fn to_original(&self, viewport: &Viewport, pos: egui::Pos2) -> Result<Point, NotReady> {
        let display = editing::clamp_vertex(self.to_display(viewport, pos), self.display, 0.0);
        coords::to_original_point(display, self.display, self.original)
    }
}

/// Placed polygon vertices, then the pointer and back to the first vertex.
fn draft_outline(placed: &[Point], pointer: Option<Point>) -> Vec<Point> {
    let mut out = placed.to_vec();
    if let (Some(first), Some(pointer)) = (placed.first(), pointer) {
        out.push(pointer);
        out.push(*first);
    }
    out
}

fn class_color(classes: &[String], class_name: &str) -> egui::Color32 {
    let index = classes.iter().position(|c| c == class_name).unwrap_or(0);
    PALETTE[index % PALETTE.len()]
}

// ── Deferred UI actions ─────────────────────────────────────────────────────

/// Panels collect what the user asked for while borrowing the session, and
/// the app applies it afterwards.
enum UiAction {
    SetMode(AnnotationMode),
    SelectImage(MediaId),
    SelectVideo(MediaId),
    SelectAnnotation(AnnotationId),
    Reclass {
        id: AnnotationId,
        points: Vec<Point>,
        class_name: String,
    },
    DeleteAnnotation(AnnotationId),
    DeleteImage,
    DeleteVideo,
    UploadImage,
    UploadVideo,
    Rename(String),
    SetDefaultClass(String),
    AddClass(String),
    OpenClassEditor,
    StepFrame { forward: bool },
    TogglePlay,
    SetKeyFrame { frame: usize, key: bool },
    Interpolate,
    ExportCoco,
}

#[derive(Debug, thiserror::Error)]
enum ExportError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("failed to encode export: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("failed to write export: {0}")]
    Write(#[from] std::io::Error),
}

async fn write_coco(api: MediaApi, project_id: ProjectId, path: PathBuf) -> Result<(), ExportError> {
    let coco = api.export_coco(&project_id).await?;
    let bytes = serde_json::to_vec_pretty(&coco)?;
    tokio::fs::write(&path, bytes).await?;
    Ok(())
}

// ── App ─────────────────────────────────────────────────────────────────────

pub struct StudioApp {
    session: AnnotationSession,
    inbox: Receiver<Inbound>,
    api: MediaApi,
    runtime: Handle,
    config: AppConfig,

    image: CanvasImage,
    edit_drag: Option<EditDrag>,
    edit_moved: bool,
    hovered_vertex: Option<(AnnotationId, usize)>,

    class_editor: Option<ClassEditor>,
    class_error: Option<String>,
    new_class: String,
    quick_class: String,
    name_buf: String,

    last_step: Option<Instant>,
    status: Option<String>,
}

impl StudioApp {
    pub fn new(
        session: AnnotationSession,
        inbox: Receiver<Inbound>,
        api: MediaApi,
        runtime: Handle,
        config: AppConfig,
    ) -> Self {
        Self {
            session,
            inbox,
            api,
            runtime,
            config,
            image: CanvasImage::Empty,
            edit_drag: None,
            edit_moved: false,
            hovered_vertex: None,
            class_editor: None,
            class_error: None,
            new_class: String::new(),
            quick_class: String::new(),
            name_buf: String::new(),
            last_step: None,
            status: None,
        }
    }

    fn report(&mut self, what: &str, result: Result<(), SessionError>) {
        if let Err(e) = result {
            tracing::warn!(error = %e, "{what} failed");
            self.status = Some(format!("{what}: {e}"));
        }
    }

    fn drain_inbox(&mut self) {
        let mut received = false;
        while let Ok(inbound) = self.inbox.try_recv() {
            let pushed = matches!(inbound, Inbound::Push(_));
            if let Inbound::MediaFailed(reason) = &inbound {
                self.status = Some(format!("Upload failed: {reason}"));
            }
            self.session.handle_inbound(inbound);
            if let Some(push) = self.session.last_push().filter(|p| pushed && !p.is_ok()) {
                self.status = Some(format!("Backend: {}", push.message));
            }
            received = true;
        }
        if received {
            // Newly cached media may fill a previously missing image.
            if matches!(self.image, CanvasImage::Missing(_)) {
                self.image = CanvasImage::Empty;
            }
            if let Some(project) = self.session.project() {
                if self.name_buf.is_empty() {
                    self.name_buf = project.name.clone();
                }
            }
        }
    }

    fn ensure_texture(&mut self, ctx: &egui::Context) {
        let selected = self.session.selected_image_id().cloned();
        if self.image.id() == selected.as_ref() {
            return;
        }
        self.edit_drag = None;
        self.hovered_vertex = None;
        let Some(id) = selected else {
            self.image = CanvasImage::Empty;
            return;
        };
        let Some(bytes) = self.session.cached_media(&id) else {
            tracing::debug!(image_id = %id, "Image not cached locally");
            self.image = CanvasImage::Missing(id);
            return;
        };
        let decoded = match image::load_from_memory(&bytes) {
            Ok(img) => img,
            Err(e) => {
                tracing::warn!(image_id = %id, error = %e, "Cached image does not decode");
                self.image = CanvasImage::Missing(id);
                return;
            }
        };
        let rgba = decoded.to_rgba8();
        let size = [rgba.width() as usize, rgba.height() as usize];
        let pixels = rgba.as_flat_samples();
        let color_image = egui::ColorImage::from_rgba_unmultiplied(size, pixels.as_slice());
        let handle = ctx.load_texture(format!("media-{id}"), color_image, egui::TextureOptions::LINEAR);
        self.image = CanvasImage::Loaded(ImageTexture {
            id,
            handle,
            original: Size::new(rgba.width() as f32, rgba.height() as f32),
        });
    }

    fn tick_playback(&mut self, ctx: &egui::Context) {
        if !self.session.is_playing() {
            self.last_step = None;
            return;
        }
        let now = Instant::now();
        let due = self.last_step.is_none_or(|t| now.duration_since(t) >= PLAYBACK_INTERVAL);
        if due {
            if self.last_step.is_some() {
                self.session.step_frame(true);
            }
            self.last_step = Some(now);
        }
        ctx.request_repaint_after(PLAYBACK_INTERVAL);
    }

    fn apply(&mut self, action: UiAction) {
        match action {
            UiAction::SetMode(mode) => {
                self.edit_drag = None;
                self.session.set_annotation_mode(mode);
            }
            UiAction::SelectImage(id) => {
                if self.session.selected_video_id().is_some() {
                    self.session.set_selected_video_id(None);
                }
                self.session.set_selected_image_id(Some(id));
            }
            UiAction::SelectVideo(id) => self.session.set_selected_video_id(Some(id)),
            UiAction::SelectAnnotation(id) => self.session.set_selected_annotation_id(Some(id)),
            UiAction::Reclass { id, points, class_name } => {
                let result = self.session.modify_selected_annotation(points, class_name, id);
                self.report("Change class", result);
            }
            UiAction::DeleteAnnotation(id) => {
                self.session.set_selected_annotation_id(Some(id));
                let result = self.session.remove_selected_annotation();
                self.report("Delete annotation", result);
            }
            UiAction::DeleteImage => {
                let result = self.session.remove_selected_image();
                self.report("Delete image", result);
            }
            UiAction::DeleteVideo => {
                let result = self.session.remove_selected_video();
                self.report("Delete video", result);
            }
            UiAction::UploadImage => {
                if let Some(path) = rfd::FileDialog::new()
                    .add_filter("Images", &["png", "jpg", "jpeg", "bmp", "webp"])
                    .pick_file()
                {
                    let result = self.session.upload_image(path);
                    self.report("Upload image", result);
                }
            }
            UiAction::UploadVideo => {
                if let Some(path) = rfd::FileDialog::new()
                    .add_filter("Videos", &["mp4", "mov", "webm", "mkv", "avi"])
                    .pick_file()
                {
                    let method = self.config.sample_method();
                    let result = self.session.upload_video(path, method);
                    self.report("Upload video", result);
                }
            }
            UiAction::Rename(name) => {
                let result = self.session.change_project_name(name);
                self.report("Rename project", result);
            }
            UiAction::SetDefaultClass(class_name) => {
                let result = self.session.set_default_class(class_name);
                self.report("Set default class", result);
            }
            UiAction::AddClass(class_name) => {
                let result = self.session.add_class(class_name);
                self.report("Add class", result);
            }
            UiAction::OpenClassEditor => {
                if let Some(project) = self.session.project() {
                    self.class_editor = Some(ClassEditor::from_project(project));
                    self.class_error = None;
                    self.new_class.clear();
                }
            }
            UiAction::StepFrame { forward } => {
                self.session.set_playing(false);
                self.session.step_frame(forward);
            }
            UiAction::TogglePlay => {
                let playing = self.session.is_playing();
                self.session.set_playing(!playing);
            }
            UiAction::SetKeyFrame { frame, key } => {
                let result = self.session.set_key_frame(frame, key);
                self.report("Set key frame", result);
            }
            UiAction::Interpolate => {
                let result = self.session.interpolate_annotations();
                self.report("Interpolate", result);
            }
            UiAction::ExportCoco => self.export_coco(),
        }
    }

    fn export_coco(&mut self) {
        let Some(project_id) = self.session.project_id().cloned() else {
            return;
        };
        let Some(path) = rfd::FileDialog::new()
            .set_file_name("annotations.json")
            .add_filter("JSON", &["json"])
            .save_file()
        else {
            return;
        };
        let api = self.api.clone();
        self.runtime.spawn(async move {
            match write_coco(api, project_id, path.clone()).await {
                Ok(()) => tracing::info!("Exported COCO annotations to {}", path.display()),
                Err(e) => tracing::error!(error = %e, "COCO export failed"),
            }
        });
    }

    // ── Panels ──────────────────────────────────────────────────────────────

    fn toolbar(&mut self, ctx: &egui::Context, actions: &mut Vec<UiAction>) {
        egui::TopBottomPanel::top("toolbar").show(ctx, |ui| {
            egui::menu::bar(ui, |ui| {
                ui.menu_button("Project", |ui| {
                    if ui.button("Upload image…").clicked() {
                        actions.push(UiAction::UploadImage);
                        ui.close_menu();
                    }
                    if ui.button("Upload video…").clicked() {
                        actions.push(UiAction::UploadVideo);
                        ui.close_menu();
                    }
                    ui.separator();
                    if ui.button("Export COCO…").clicked() {
                        actions.push(UiAction::ExportCoco);
                        ui.close_menu();
                    }
                });
                ui.separator();
                let current = self.session.mode();
                for mode in AnnotationMode::ALL {
                    if ui.selectable_label(current == mode, mode.label()).clicked() && current != mode {
                        actions.push(UiAction::SetMode(mode));
                    }
                }
                ui.separator();
                ui.label(format!("Zoom: {:.0}%", self.session.viewport.zoom * 100.0));
                if self.session.is_loading() {
                    ui.separator();
                    ui.spinner();
                }
                if let Some(status) = &self.status {
                    ui.separator();
                    ui.colored_label(egui::Color32::LIGHT_RED, status);
                }
            });
        });
    }

    fn side_panel(&mut self, ctx: &egui::Context, actions: &mut Vec<UiAction>) {
        egui::SidePanel::left("project")
            .resizable(true)
            .default_width(260.0)
            .show(ctx, |ui| {
                let Some(project) = self.session.project() else {
                    ui.label("Waiting for project…");
                    return;
                };

                ui.heading("Project");
                ui.horizontal(|ui| {
                    ui.text_edit_singleline(&mut self.name_buf);
                    if ui.button("Rename").clicked() && self.name_buf.trim() != project.name {
                        actions.push(UiAction::Rename(self.name_buf.trim().to_string()));
                    }
                });

                ui.separator();
                ui.horizontal(|ui| {
                    ui.label("Default class:");
                    let mut default_class = project.default_class.clone();
                    egui::ComboBox::from_id_salt("default_class")
                        .selected_text(&default_class)
                        .show_ui(ui, |ui| {
                            for class in &project.classes {
                                ui.selectable_value(&mut default_class, class.clone(), class);
                            }
                        });
                    if default_class != project.default_class {
                        actions.push(UiAction::SetDefaultClass(default_class));
                    }
                });
                ui.horizontal(|ui| {
                    ui.add(egui::TextEdit::singleline(&mut self.quick_class).desired_width(120.0));
                    let name = self.quick_class.trim();
                    if ui.add_enabled(!name.is_empty(), egui::Button::new("Add class")).clicked() {
                        actions.push(UiAction::AddClass(name.to_string()));
                        self.quick_class.clear();
                    }
                });
                if ui.button("Edit classes…").clicked() {
                    actions.push(UiAction::OpenClassEditor);
                }

                ui.separator();
                ui.horizontal(|ui| {
                    ui.strong("Images");
                    if ui.small_button("+").clicked() {
                        actions.push(UiAction::UploadImage);
                    }
                    if self.session.selected_video_id().is_none()
                        && self.session.selected_image_id().is_some()
                        && ui.small_button("Delete").clicked()
                    {
                        actions.push(UiAction::DeleteImage);
                    }
                });
                egui::ScrollArea::vertical()
                    .id_salt("images")
                    .max_height(160.0)
                    .show(ui, |ui| {
                        for image in &project.images {
                            let selected = self.session.selected_image_id() == Some(&image.id);
                            if ui.selectable_label(selected, &image.file_name).clicked() && !selected {
                                actions.push(UiAction::SelectImage(image.id.clone()));
                            }
                        }
                    });

                ui.separator();
                ui.horizontal(|ui| {
                    ui.strong("Videos");
                    if ui.small_button("+").clicked() {
                        actions.push(UiAction::UploadVideo);
                    }
                    if self.session.selected_video_id().is_some() && ui.small_button("Delete").clicked() {
                        actions.push(UiAction::DeleteVideo);
                    }
                });
                egui::ScrollArea::vertical()
                    .id_salt("videos")
                    .max_height(120.0)
                    .show(ui, |ui| {
                        for video in &project.videos {
                            let selected = self.session.selected_video_id() == Some(&video.id);
                            let label = format!("{} ({} frames)", video.file_name, video.frame_count());
                            if ui.selectable_label(selected, label).clicked() && !selected {
                                actions.push(UiAction::SelectVideo(video.id.clone()));
                            }
                        }
                    });

                ui.separator();
                ui.strong("Annotations");
                let Some(image) = self.session.selected_image() else {
                    return;
                };
                egui::ScrollArea::vertical().id_salt("annotations").show(ui, |ui| {
                    for (i, annotation) in image.annotations.iter().enumerate() {
                        let selected = self.session.selected_annotation_id() == Some(&annotation.id);
                        ui.horizontal(|ui| {
                            let color = class_color(&project.classes, &annotation.class_name);
                            ui.colored_label(color, "■");
                            if ui.selectable_label(selected, format!("#{}", i + 1)).clicked() {
                                actions.push(UiAction::SelectAnnotation(annotation.id.clone()));
                            }
                            let mut class_name = annotation.class_name.clone();
                            egui::ComboBox::from_id_salt(("class", &annotation.id.0))
                                .selected_text(&class_name)
                                .show_ui(ui, |ui| {
                                    for class in &project.classes {
                                        ui.selectable_value(&mut class_name, class.clone(), class);
                                    }
                                });
                            if class_name != annotation.class_name {
                                actions.push(UiAction::Reclass {
                                    id: annotation.id.clone(),
                                    points: annotation.points.clone(),
                                    class_name,
                                });
                            }
                            if ui.small_button("🗑").clicked() {
                                actions.push(UiAction::DeleteAnnotation(annotation.id.clone()));
                            }
                        });
                    }
                });
            });
    }

    fn video_controls(&mut self, ctx: &egui::Context, actions: &mut Vec<UiAction>) {
        let Some(video) = self.session.selected_video() else {
            return;
        };
        let Some(frame) = self.session.frame_number() else {
            return;
        };
        let count = video.frame_count();
        let is_key = video.frame(frame).is_some_and(|f| f.key_frame);
        let playing = self.session.is_playing();

        egui::TopBottomPanel::bottom("video").show(ctx, |ui| {
            ui.horizontal(|ui| {
                if ui.add_enabled(frame > 0, egui::Button::new("⏮")).clicked() {
                    actions.push(UiAction::StepFrame { forward: false });
                }
                if ui.button(if playing { "⏸" } else { "▶" }).clicked() {
                    actions.push(UiAction::TogglePlay);
                }
                if ui.add_enabled(frame + 1 < count, egui::Button::new("⏭")).clicked() {
                    actions.push(UiAction::StepFrame { forward: true });
                }
                ui.label(format!("Frame {} / {}", frame + 1, count));
                ui.separator();
                let mut key = is_key;
                if ui.checkbox(&mut key, "Key frame").changed() {
                    actions.push(UiAction::SetKeyFrame { frame, key });
                }
                if ui.button("Interpolate").clicked() {
                    actions.push(UiAction::Interpolate);
                }
            });
        });
    }

    fn class_window(&mut self, ctx: &egui::Context) {
        let Some(editor) = self.class_editor.as_mut() else {
            return;
        };
        let project = self.session.project();
        let mut open = true;
        let mut save = None;
        let mut close = false;

        egui::Window::new("Classes")
            .open(&mut open)
            .collapsible(false)
            .resizable(false)
            .show(ctx, |ui| {
                let classes: Vec<String> = editor.classes().to_vec();
                for class in &classes {
                    ui.horizontal(|ui| {
                        let is_default = editor.default_class() == class;
                        if ui.radio(is_default, class).clicked() {
                            if let Err(e) = editor.set_default(class) {
                                self.class_error = Some(e.to_string());
                            }
                        }
                        if ui.small_button("Delete").clicked() {
                            self.class_error = editor.delete(class).err().map(|e| e.to_string());
                        }
                    });
                }
                ui.horizontal(|ui| {
                    ui.text_edit_singleline(&mut self.new_class);
                    if ui.button("Add").clicked() {
                        match editor.add(&self.new_class) {
                            Ok(()) => {
                                self.new_class.clear();
                                self.class_error = None;
                            }
                            Err(e) => self.class_error = Some(e.to_string()),
                        }
                    }
                });
                if let Some(error) = &self.class_error {
                    ui.colored_label(egui::Color32::LIGHT_RED, error);
                }
                ui.separator();
                ui.horizontal(|ui| {
                    let changed = project.is_some_and(|p| editor.differs_from(p));
                    if ui.add_enabled(changed, egui::Button::new("Save")).clicked() {
                        save = Some(editor.save());
                    }
                    if let Some(project) = project {
                        if ui.add_enabled(changed, egui::Button::new("Revert")).clicked() {
                            editor.discard(project);
                            self.class_error = None;
                        }
                    }
                    if ui.button("Cancel").clicked() {
                        close = true;
                    }
                });
            });

        if let Some((classes, default_class)) = save {
            let result = self.session.set_classes(classes, default_class);
            self.report("Save classes", result);
            close = true;
        }
        if close || !open {
            self.class_editor = None;
            self.class_error = None;
        }
    }

    // ── Canvas ──────────────────────────────────────────────────────────────

    fn canvas(&mut self, ctx: &egui::Context) {
        egui::CentralPanel::default().show(ctx, |ui| {
            let (response, painter) = ui.allocate_painter(ui.available_size(), egui::Sense::click_and_drag());
            let canvas_rect = response.rect;
            painter.rect_filled(canvas_rect, 0.0, egui::Color32::from_gray(40));

            let (handle, original) = match &self.image {
                CanvasImage::Loaded(tex) => (tex.handle.id(), tex.original),
                CanvasImage::Missing(id) => {
                    painter.text(
                        canvas_rect.center(),
                        egui::Align2::CENTER_CENTER,
                        format!("Media {id} is not cached on this machine"),
                        egui::FontId::proportional(16.0),
                        egui::Color32::GRAY,
                    );
                    return;
                }
                CanvasImage::Empty => return,
            };
            let stage = Stage::fit(canvas_rect.min, canvas_rect.size(), self.config.display_width, original);
            if !stage.display.is_ready() {
                return;
            }
            let frame = stage.frame_rect();
            let painter = painter.with_clip_rect(frame);

            self.handle_view_input(ctx, &response, &stage);

            let viewport = self.session.viewport;
            let image_rect = egui::Rect::from_min_max(
                stage.to_screen(&viewport, Point::ZERO),
                stage.to_screen(&viewport, Point::new(stage.display.width, stage.display.height)),
            );
            painter.image(
                handle,
                image_rect,
                egui::Rect::from_min_max(egui::pos2(0.0, 0.0), egui::pos2(1.0, 1.0)),
                egui::Color32::WHITE,
            );

            let annotations: Vec<Annotation> = self
                .session
                .selected_image()
                .map(|img| img.annotations.clone())
                .unwrap_or_default();
            let shapes: Vec<(Annotation, Vec<Point>)> = annotations
                .into_iter()
                .filter_map(|a| {
                    let display = coords::to_display_points(&a.points, stage.display, stage.original).ok()?;
                    Some((a, display))
                })
                .collect();

            if response.hovered() || self.edit_drag.is_some() {
                self.handle_pointer(ctx, &stage, &shapes);
            }

            let pointer = ctx
                .input(|i| i.pointer.hover_pos())
                .filter(|_| response.hovered())
                .and_then(|pos| stage.to_original(&viewport, pos).ok());

            self.draw_annotations(&painter, &stage, &shapes);
            self.draw_in_progress(&painter, &stage, pointer);

            if self.session.is_loading() {
                painter.text(
                    frame.left_top() + egui::vec2(8.0, 8.0),
                    egui::Align2::LEFT_TOP,
                    "Working…",
                    egui::FontId::proportional(14.0),
                    egui::Color32::WHITE,
                );
            }
        });
    }

    fn handle_view_input(&mut self, ctx: &egui::Context, response: &egui::Response, stage: &Stage) {
        let (middle_down, delta, scroll, pointer) = ctx.input(|i| {
            (
                i.pointer.middle_down(),
                i.pointer.delta(),
                // Plain wheel is left to scrolling
                if i.modifiers.ctrl { i.raw_scroll_delta.y } else { 0.0 },
                i.pointer.hover_pos(),
            )
        });
        if middle_down && response.hovered() {
            self.session.viewport.pan_by(Point::new(delta.x, delta.y), stage.display);
        }
        if scroll != 0.0 && response.hovered() {
            if let Some(pos) = pointer {
                self.session.viewport.zoom_at(stage.local(pos), scroll > 0.0, stage.display);
            }
        }
    }

    fn handle_pointer(&mut self, ctx: &egui::Context, stage: &Stage, shapes: &[(Annotation, Vec<Point>)]) {
        let (pos, delta, primary_pressed, secondary_pressed, primary_released, primary_down) = ctx.input(|i| {
            (
                i.pointer.hover_pos(),
                i.pointer.delta(),
                i.pointer.button_pressed(egui::PointerButton::Primary),
                i.pointer.button_pressed(egui::PointerButton::Secondary),
                i.pointer.button_released(egui::PointerButton::Primary),
                i.pointer.primary_down(),
            )
        });
        let viewport = self.session.viewport;
        let display = pos.map(|p| stage.to_display(&viewport, p));
        let inside_frame = pos.is_some_and(|p| stage.frame_rect().contains(p));

        if self.session.mode() == AnnotationMode::Select {
            let refs = || shapes.iter().map(|(a, v)| (a, v.as_slice()));
            self.hovered_vertex = match display.and_then(|d| editing::hit_test(refs(), d)) {
                Some(Hit::Vertex { annotation, index }) => Some((annotation, index)),
                _ => None,
            };

            if primary_pressed && inside_frame {
                let hit = display.and_then(|d| editing::hit_test(refs(), d));
                match hit {
                    Some(hit) => {
                        let id = match &hit {
                            Hit::Vertex { annotation, .. } | Hit::Body { annotation } => annotation.clone(),
                        };
                        let vertices = shapes
                            .iter()
                            .find(|(a, _)| a.id == id)
                            .map(|(_, v)| v.as_slice())
                            .unwrap_or(&[]);
                        self.session.set_selected_annotation_id(Some(id));
                        self.edit_drag = EditDrag::begin(hit, vertices);
                        self.edit_moved = false;
                    }
                    None => self.session.set_selected_annotation_id(None),
                }
            }

            if primary_down && delta != egui::Vec2::ZERO {
                if let Some(drag) = self.edit_drag.as_mut() {
                    drag.update(Point::new(delta.x / viewport.zoom, delta.y / viewport.zoom), stage.display);
                    self.edit_moved = true;
                }
            }

            if primary_released {
                if let Some(drag) = self.edit_drag.take() {
                    if self.edit_moved {
                        self.finish_edit(drag, stage, shapes);
                    }
                }
            }
            return;
        }

        let Some(pos) = pos else {
            return;
        };
        let Ok(at) = stage.to_original(&viewport, pos) else {
            return;
        };
        if inside_frame && primary_pressed {
            let result = self.session.pointer_down(at, PointerButton::Primary);
            self.report("Draw", result);
        }
        if inside_frame && secondary_pressed {
            let result = self.session.pointer_down(at, PointerButton::Secondary);
            self.report("Draw", result);
        }
        if delta != egui::Vec2::ZERO {
            self.session.pointer_move(at);
        }
        if primary_released {
            let result = self.session.pointer_up(at);
            self.report("Draw", result);
        }
    }

    fn finish_edit(&mut self, drag: EditDrag, stage: &Stage, shapes: &[(Annotation, Vec<Point>)]) {
        let Some((annotation, _)) = shapes.iter().find(|(a, _)| &a.id == drag.annotation()) else {
            return;
        };
        match drag.finish(stage.display, stage.original, &annotation.points) {
            Ok((id, points)) => {
                let result = self
                    .session
                    .modify_selected_annotation(points, annotation.class_name.clone(), id);
                self.report("Move annotation", result);
            }
            Err(e) => tracing::debug!(error = %e, "Dropped edit"),
        }
    }

    fn draw_annotations(&self, painter: &egui::Painter, stage: &Stage, shapes: &[(Annotation, Vec<Point>)]) {
        let viewport = self.session.viewport;
        let classes = self.session.project().map(|p| p.classes.as_slice()).unwrap_or(&[]);
        let show_vertices = self.session.mode() == AnnotationMode::Select;

        for (annotation, display) in shapes {
            let selected = self.session.selected_annotation_id() == Some(&annotation.id);
            let vertices = match &self.edit_drag {
                Some(drag) if drag.annotation() == &annotation.id => drag.preview(display),
                _ => display.clone(),
            };
            let screen: Vec<egui::Pos2> = vertices.iter().map(|v| stage.to_screen(&viewport, *v)).collect();
            let color = class_color(classes, &annotation.class_name);
            painter.add(egui::Shape::closed_line(
                screen.clone(),
                egui::Stroke::new(editing::stroke_width(selected), color),
            ));

            if !show_vertices {
                continue;
            }
            for (i, pos) in screen.iter().enumerate() {
                let hovered = self
                    .hovered_vertex
                    .as_ref()
                    .is_some_and(|(id, index)| id == &annotation.id && *index == i);
                let radius = if hovered {
                    editing::VERTEX_RADIUS * editing::HOVER_SCALE
                } else {
                    editing::VERTEX_RADIUS
                };
                painter.circle_filled(*pos, radius, color);
                painter.circle_stroke(*pos, radius, egui::Stroke::new(1.0, egui::Color32::WHITE));
            }
        }
    }

    /// `pointer` is in original space.
    fn draw_in_progress(&self, painter: &egui::Painter, stage: &Stage, pointer: Option<Point>) {
        let viewport = self.session.viewport;
        let to_screen = |points: &[Point]| -> Vec<egui::Pos2> {
            coords::to_display_points(points, stage.display, stage.original)
                .map(|display| display.iter().map(|p| stage.to_screen(&viewport, *p)).collect())
                .unwrap_or_default()
        };

        match self.session.draw() {
            DrawState::Idle => {}
            DrawState::Polygon { points } => {
                let Ok(placed) = coords::to_display_points(points, stage.display, stage.original) else {
                    return;
                };
                let pointer = pointer.and_then(|p| coords::to_display_point(p, stage.display, stage.original).ok());
                let outline: Vec<egui::Pos2> = draft_outline(&placed, pointer)
                    .into_iter()
                    .map(|p| stage.to_screen(&viewport, p))
                    .collect();
                painter.add(egui::Shape::line(outline, egui::Stroke::new(editing::STROKE_WIDTH, DRAFT_COLOR)));
                for p in placed {
                    painter.circle_filled(stage.to_screen(&viewport, p), editing::VERTEX_RADIUS, DRAFT_COLOR);
                }
            }
            DrawState::Rectangle { .. } => {
                let screen = to_screen(&self.session.draw().preview());
                painter.add(egui::Shape::closed_line(
                    screen,
                    egui::Stroke::new(editing::STROKE_WIDTH, DRAFT_COLOR),
                ));
            }
            DrawState::Magic {
                points,
                labels,
                suggestions,
            } => {
                for polygon in suggestions {
                    painter.add(egui::Shape::closed_line(
                        to_screen(polygon),
                        egui::Stroke::new(editing::STROKE_WIDTH, SUGGESTION_COLOR),
                    ));
                }
                for (pos, label) in to_screen(points).into_iter().zip(labels) {
                    let color = match label {
                        PromptLabel::Positive => egui::Color32::GREEN,
                        PromptLabel::Negative => egui::Color32::RED,
                    };
                    painter.circle_filled(pos, PROMPT_RADIUS, color);
                }
            }
        }
    }

    fn handle_keys(&mut self, ctx: &egui::Context) {
        if ctx.wants_keyboard_input() {
            return;
        }
        let (space, escape, delete) = ctx.input(|i| {
            (
                i.key_pressed(egui::Key::Space),
                i.key_pressed(egui::Key::Escape),
                i.key_pressed(egui::Key::Delete) || i.key_pressed(egui::Key::Backspace),
            )
        });
        if space {
            let result = self.session.commit_key();
            self.report("Commit", result);
        }
        if escape {
            if self.session.draw().is_idle() && self.edit_drag.is_none() {
                self.session.set_selected_annotation_id(None);
            }
            self.edit_drag = None;
            self.session.cancel_key();
        }
        if delete && self.session.mode() == AnnotationMode::Select && self.session.selected_annotation_id().is_some() {
            let result = self.session.remove_selected_annotation();
            self.report("Delete annotation", result);
        }
    }
}

// ── eframe App impl ────────────────────────────────────────────────────────

impl eframe::App for StudioApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.drain_inbox();
        self.tick_playback(ctx);
        self.ensure_texture(ctx);
        self.handle_keys(ctx);

        let mut actions = Vec::new();
        self.toolbar(ctx, &mut actions);
        self.side_panel(ctx, &mut actions);
        self.video_controls(ctx, &mut actions);
        self.class_window(ctx);
        self.canvas(ctx);

        for action in actions {
            self.apply(action);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::draw::DrawAction;
    use assert_matches::assert_matches;

    #[test]
    fn stage_fits_width_then_height() {
        let original = Size::new(2000.0, 1000.0);
        let wide = Stage::fit(egui::Pos2::ZERO, egui::vec2(1600.0, 1200.0), 1000.0, original);
        assert_eq!(wide.display, Size::new(1000.0, 500.0));

        let short = Stage::fit(egui::Pos2::ZERO, egui::vec2(1600.0, 300.0), 1000.0, original);
        assert_eq!(short.display, Size::new(600.0, 300.0));
    }

    #[test]
    fn stage_round_trips_through_viewport() {
        let stage = Stage::fit(egui::pos2(100.0, 50.0), egui::vec2(800.0, 800.0), 400.0, Size::new(800.0, 400.0));
        let mut viewport = Viewport::default();
        viewport.zoom_at(Point::new(200.0, 100.0), true, stage.display);
        let screen = stage.to_screen(&viewport, Point::new(40.0, 30.0));
        let back = stage.to_display(&viewport, screen);
        assert!((back.x - 40.0).abs() < 1e-3 && (back.y - 30.0).abs() < 1e-3);
    }

    #[test]
    fn pointer_outside_the_image_is_clamped() {
        let stage = Stage::fit(egui::Pos2::ZERO, egui::vec2(1600.0, 1200.0), 1000.0, Size::new(2000.0, 1000.0));
        let viewport = Viewport::default();
        assert_eq!(stage.to_original(&viewport, egui::pos2(1200.0, 700.0)), Ok(Point::new(2000.0, 1000.0)));
        assert_eq!(stage.to_original(&viewport, egui::pos2(-40.0, 100.0)), Ok(Point::new(0.0, 200.0)));
    }

    #[test]
    fn rectangle_released_past_the_edge_stays_on_the_image() {
        let stage = Stage::fit(egui::Pos2::ZERO, egui::vec2(1600.0, 1200.0), 1000.0, Size::new(2000.0, 1000.0));
        let viewport = Viewport::default();
        let mut draw = DrawState::default();

        let press = stage.to_original(&viewport, egui::pos2(900.0, 400.0)).unwrap();
        draw.pointer_down(AnnotationMode::Rectangle, press, PointerButton::Primary);
        let release = stage.to_original(&viewport, egui::pos2(1200.0, 700.0)).unwrap();
        draw.pointer_move(release);

        assert_matches!(draw.pointer_up(release), DrawAction::Commit(corners) if corners == vec![
            Point::new(1800.0, 800.0),
            Point::new(2000.0, 800.0),
            Point::new(2000.0, 1000.0),
            Point::new(1800.0, 1000.0),
        ]);
    }

    #[test]
    fn polygon_draft_closes_through_the_pointer() {
        let placed = [Point::new(0.0, 0.0), Point::new(10.0, 0.0)];
        assert_eq!(
            draft_outline(&placed, Some(Point::new(10.0, 10.0))),
            vec![placed[0], placed[1], Point::new(10.0, 10.0), placed[0]]
        );
        assert_eq!(draft_outline(&placed, None), placed.to_vec());
        assert!(draft_outline(&[], Some(Point::new(1.0, 1.0))).is_empty());
    }

    #[test]
    fn unknown_class_uses_first_color() {
        let classes = vec!["car".to_string(), "person".to_string()];
        assert_eq!(class_color(&classes, "person"), PALETTE[1]);
        assert_eq!(class_color(&classes, "tree"), PALETTE[0]);
    }
}
