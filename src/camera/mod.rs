//! Camera lifecycle: one capture thread per running camera, the registry
//! that owns them, and the frame bus they publish into.

mod frame_bus;
mod worker;

use frame_bus::FrameBus;
use worker::{CameraWorker, WorkerContext};

use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::runtime::Handle;

use crate::config::CaptureConfig;
use crate::detection::DetectionSink;
use crate::error::{CameraError, StoreError};
use crate::frame_reader::SourceConnector;
use crate::repository::{CameraStatus, CameraTable, DetectionStore};

#[derive(Default)]
struct Registry {
    workers: HashMap<String, CameraWorker>,
    /// Cameras whose connection is being opened, keyed to the generation
    /// the pending start will run as.
    starting: HashMap<String, u64>,
}

type Workers = Mutex<Registry>;

/// Owns the running camera workers and the frame bus they publish to.
///
/// Lifecycle transitions go through the `workers` lock. A start reserves
/// its camera id under the lock and opens the connection outside it, so
/// a slow camera only holds up calls for that same id.
pub struct CameraService {
    workers: Arc<Workers>,
    bus: Arc<FrameBus>,
    connector: Arc<dyn SourceConnector>,
    sink: Arc<dyn DetectionSink>,
    store: Arc<dyn DetectionStore>,
    runtime: Handle,
    snapshot_dir: PathBuf,
    capture: CaptureConfig,
    generation: AtomicU64,
}

impl CameraService {
    pub fn new(
        capture: CaptureConfig,
        snapshot_dir: PathBuf,
        connector: Arc<dyn SourceConnector>,
        sink: Arc<dyn DetectionSink>,
        store: Arc<dyn DetectionStore>,
        runtime: Handle,
    ) -> Self {
        Self {
            workers: Arc::new(Mutex::new(Registry::default())),
            bus: Arc::new(FrameBus::new()),
            connector,
            sink,
            store,
            runtime,
            snapshot_dir,
            capture,
            generation: AtomicU64::new(0),
        }
    }

    fn lock_registry(&self) -> MutexGuard<'_, Registry> {
        self.workers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn bus(&self) -> &FrameBus {
        &self.bus
    }

    /// Opens `url` and launches a capture loop for `camera_id`.
    ///
    /// Returns once the loop thread is running; the first frame may not
    /// have arrived yet. Blocks while the camera connection is opened.
    /// A `stop` for the same id during that time cancels the start.
    pub fn start(&self, camera_id: &str, url: &str) -> Result<(), CameraError> {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        {
            let mut registry = self.lock_registry();
            if registry.starting.contains_key(camera_id) {
                return Err(CameraError::AlreadyRunning(camera_id.to_string()));
            }
            if let Some(existing) = registry.workers.get(camera_id) {
                if existing.is_running() {
                    return Err(CameraError::AlreadyRunning(camera_id.to_string()));
                }
                debug!(
                    "Replacing camera {} worker in state {}",
                    camera_id,
                    existing.state()
                );
                registry.workers.remove(camera_id);
            }
            registry.starting.insert(camera_id.to_string(), generation);
        }

        let mut reservation = Reservation {
            workers: &self.workers,
            camera_id,
            generation,
            armed: true,
        };
        let connected = self.connector.connect(url);

        let mut registry = self.lock_registry();
        reservation.armed = false;
        let reserved = registry.starting.get(camera_id) == Some(&generation);
        if reserved {
            registry.starting.remove(camera_id);
        }

        let mut source = connected.map_err(|e| CameraError::Connection {
            id: camera_id.to_string(),
            reason: format!("{:#}", e),
        })?;
        if !reserved {
            source.release();
            info!("Camera {} was stopped while connecting", camera_id);
            return Err(CameraError::Cancelled(camera_id.to_string()));
        }

        let (mut worker, done_tx) = CameraWorker::new(camera_id, generation);
        let ctx = WorkerContext {
            bus: Arc::clone(&self.bus),
            sink: Arc::clone(&self.sink),
            store: Arc::clone(&self.store),
            runtime: self.runtime.clone(),
            snapshot_dir: self.snapshot_dir.clone(),
            frame_interval: self.capture.frame_interval(),
            jpeg_quality: self.capture.jpeg_quality,
        };
        let on_exit = deregister_hook(Arc::downgrade(&self.workers), camera_id, generation);

        // Spawned under the lock so a stop from the loop itself finds the
        // worker with its thread id set.
        worker.start(source, ctx, done_tx, on_exit)?;
        registry.workers.insert(camera_id.to_string(), worker);
        info!("Started camera {} ({})", camera_id, url);
        Ok(())
    }

    /// Stops the worker for `camera_id`, if any. On return the camera is not
    /// running and has no frame on the bus.
    pub fn stop(&self, camera_id: &str) {
        let worker = {
            let mut registry = self.lock_registry();
            if registry.starting.remove(camera_id).is_some() {
                debug!("Cancelled pending start of camera {}", camera_id);
            }
            match registry.workers.remove(camera_id) {
                Some(worker) => worker,
                None => return,
            }
        };

        if !worker.stop(self.capture.stop_timeout()) {
            warn!(
                "Camera {} is still shutting down; its connection will close when the pending read returns",
                camera_id
            );
        }
        self.bus.remove(camera_id, worker.generation());
        info!("Stopped camera {}", camera_id);
    }

    pub fn is_running(&self, camera_id: &str) -> bool {
        self.lock_registry()
            .workers
            .get(camera_id)
            .map_or(false, CameraWorker::is_running)
    }

    pub fn running_cameras(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .lock_registry()
            .workers
            .values()
            .filter(|w| w.is_running())
            .map(|w| w.camera_id().to_string())
            .collect();
        ids.sort();
        ids
    }

    /// Checks that `url` can be opened without starting anything.
    pub fn probe(&self, url: &str) -> anyhow::Result<()> {
        self.connector.probe(url)
    }

    pub fn shutdown(&self) {
        self.lock_registry().starting.clear();
        for camera_id in self.running_cameras() {
            self.stop(&camera_id);
        }
    }
}

/// Drops a start reservation that was never settled, e.g. when the
/// connector panicked.
struct Reservation<'a> {
    workers: &'a Workers,
    camera_id: &'a str,
    generation: u64,
    armed: bool,
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut registry = self.workers.lock().unwrap_or_else(PoisonError::into_inner);
        if registry.starting.get(self.camera_id) == Some(&self.generation) {
            registry.starting.remove(self.camera_id);
        }
    }
}

/// Removes the worker's registry entry when its loop ends on its own.
fn deregister_hook(workers: Weak<Workers>, camera_id: &str, generation: u64) -> worker::ExitHook {
    let camera_id = camera_id.to_string();
    Box::new(move || {
        let workers = match workers.upgrade() {
            Some(w) => w,
            None => return,
        };
        let mut registry = workers.lock().unwrap_or_else(PoisonError::into_inner);
        if registry.workers.get(&camera_id).map(CameraWorker::generation) == Some(generation) {
            registry.workers.remove(&camera_id);
            debug!("Camera {} removed from registry after its loop exited", camera_id);
        }
    })
}

/// Starts every camera stored as active. Cameras that cannot be reached
/// are marked inactive.
pub async fn reconcile(service: Arc<CameraService>, cameras: &dyn CameraTable) -> Result<(), StoreError> {
    for camera in cameras.list_by_status(CameraStatus::Active).await? {
        let svc = Arc::clone(&service);
        let (id, url) = (camera.id.clone(), camera.url.clone());
        let started = tokio::task::spawn_blocking(move || svc.start(&id, &url)).await;

        match started {
            Ok(Ok(())) | Ok(Err(CameraError::AlreadyRunning(_))) => {}
            Ok(Err(CameraError::Cancelled(_))) => {
                cameras.update_status(&camera.id, CameraStatus::Inactive).await?;
            }
            Ok(Err(e)) => {
                error!("Could not resume camera {}: {}", camera.id, e);
                cameras.update_status(&camera.id, CameraStatus::Inactive).await?;
            }
            Err(e) => error!("Resuming camera {} panicked: {}", camera.id, e),
        }
    }
    Ok(())
}
