#[macro_use]
extern crate rocket;

mod camera;
mod config;
mod db;
mod detection;
mod error;
mod frame;
mod frame_reader;
mod logger;
mod motion_detection;
mod repository;
mod web;

use anyhow::Context;
use clap::{Arg, Command};
use log::{info, warn};
use std::path::PathBuf;
use std::sync::Arc;

use crate::camera::CameraService;
use crate::frame_reader::VideoCaptureConnector;
use crate::repository::SqlRepository;
use crate::web::{AppState, StreamSettings};

#[rocket::main]
async fn main() -> anyhow::Result<()> {
    let matches = Command::new("weaponcam")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Network camera capture, detection recording and MJPEG streaming.")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .default_value("settings.toml")
                .help("TOML config file"),
        )
        .get_matches();

    let config_path = matches
        .get_one::<String>("config")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("settings.toml"));
    let loaded = config::load_config(&config_path)?;
    let found = loaded.is_some();
    let cfg = loaded.unwrap_or_default();

    logger::init(logger::parse_level(&cfg.log_level)).context("Failed to install logger")?;
    if found {
        info!("Loaded config from {}", config_path.display());
    } else {
        warn!("No config at {}, using defaults", config_path.display());
    }

    std::fs::create_dir_all(&cfg.storage.snapshot_dir).with_context(|| {
        format!(
            "Failed to create snapshot directory {}",
            cfg.storage.snapshot_dir.display()
        )
    })?;

    let repo = SqlRepository::connect(&cfg.storage.database_url).await?;
    let service = Arc::new(CameraService::new(
        cfg.capture.clone(),
        cfg.storage.snapshot_dir.clone(),
        Arc::new(VideoCaptureConnector::new(
            cfg.capture.open_timeout_ms,
            cfg.capture.read_timeout_ms,
        )),
        detection::build_sink(&cfg.detection),
        Arc::new(repo.clone()),
        tokio::runtime::Handle::current(),
    ));

    camera::reconcile(Arc::clone(&service), &repo).await?;

    let figment = rocket::Config::figment()
        .merge(("address", cfg.server.address.clone()))
        .merge(("port", cfg.server.port));
    let state = AppState {
        service: Arc::clone(&service),
        cameras: Arc::new(repo.clone()),
        detections: Arc::new(repo),
        stream: StreamSettings {
            poll_interval: cfg.stream.poll_interval(),
        },
    };

    let launched = web::build(figment, state).launch().await;

    info!("Stopping cameras");
    let svc = Arc::clone(&service);
    tokio::task::spawn_blocking(move || svc.shutdown()).await?;

    launched?;
    Ok(())
}
