mod api;
mod app;
mod blob_cache;
mod channel;
mod classes;
mod config;
mod coords;
mod draw;
mod editing;
mod frames;
mod media;
mod model;
mod protocol;
mod session;
mod viewport;

use std::sync::Arc;

use eframe::egui;

use crate::api::{ApiError, MediaApi};
use crate::app::StudioApp;
use crate::blob_cache::FsBlobStore;
use crate::channel::{ReconnectConfig, SocketChannel};
use crate::config::AppConfig;
use crate::media::HttpMedia;
use crate::model::ProjectId;
use crate::session::{AnnotationSession, Inbox};

#[derive(Debug, thiserror::Error)]
enum StartupError {
    #[error("failed to start async runtime: {0}")]
    Runtime(#[from] std::io::Error),

    #[error("failed to open project: {0}")]
    Project(#[from] ApiError),

    #[error("window failed: {0}")]
    Ui(#[from] eframe::Error),
}

#[cfg(debug_assertions)]
fn setup_logging() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::prelude::*;

    let logs_dir = config::logs_dir();
    if std::fs::create_dir_all(&logs_dir).is_err() {
        eprintln!("Failed to create logs directory {}", logs_dir.display());
        return None;
    }

    let file_appender = tracing_appender::rolling::never(&logs_dir, "annotate-studio.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true)
        .with_level(true);

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stdout)
        .with_ansi(true)
        .with_target(true)
        .with_level(true);

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,annotate_studio=debug"));

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(stdout_layer)
        .init();

    Some(guard)
}

#[cfg(not(debug_assertions))]
fn setup_logging() -> Option<()> {
    use tracing_subscriber::prelude::*;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,annotate_studio=debug"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
    None
}

fn run() -> Result<(), StartupError> {
    let config = AppConfig::load();
    tracing::debug!(?config, "Configuration");

    let runtime = tokio::runtime::Runtime::new()?;
    let api = MediaApi::new(config.api_url.clone());

    let project_id = match std::env::args().nth(1) {
        Some(id) => {
            // Fail before opening a window on an unknown id
            let project = runtime.block_on(api.get_project(&ProjectId(id)))?;
            tracing::info!(project_id = %project.id, name = %project.name, "Opening project");
            project.id
        }
        None => {
            let project = runtime.block_on(api.create_project())?;
            tracing::info!(project_id = %project.id, "Created project");
            project.id
        }
    };

    let title = format!("annotate-studio · {project_id}");
    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([1400.0, 900.0])
            .with_title(&title),
        ..Default::default()
    };

    let handle = runtime.handle().clone();
    eframe::run_native(
        &title,
        options,
        Box::new(move |cc| {
            let ctx = cc.egui_ctx.clone();
            let (inbox, receiver) = Inbox::channel(Some(Arc::new(move || ctx.request_repaint())));

            let blobs = FsBlobStore::open(&config.cache_dir)?;
            let channel = SocketChannel::spawn(
                &handle,
                config.socket_url.clone(),
                inbox.clone(),
                ReconnectConfig::default(),
            );
            let media = HttpMedia::new(api.clone(), handle.clone(), inbox);

            let mut session = AnnotationSession::new(Box::new(channel), Box::new(media), Box::new(blobs));
            session.open_project(project_id)?;

            Ok(Box::new(StudioApp::new(session, receiver, api, handle, config)))
        }),
    )?;

    tracing::info!("Window closed");
    Ok(())
}

fn main() {
    // .env may set RUST_LOG
    let _ = dotenvy::dotenv();
    // Keep the guard alive for the duration of the program
    let _log_guard = setup_logging();

    if let Err(e) = run() {
        tracing::error!("{e}");
        std::process::exit(1);
    }
}
