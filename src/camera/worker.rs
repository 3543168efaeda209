use bytes::Bytes;
use log::{error, info, trace, warn};
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, ThreadId};
use std::time::Duration;
use strum_macros::Display;
use tokio::runtime::Handle;

use super::frame_bus::FrameBus;
use crate::detection::{write_detection, DetectionSink, Processed};
use crate::frame_reader::{FrameSource, ReadOutcome, SourceStatus};
use crate::repository::DetectionStore;

#[derive(Display, Copy, Clone, Debug, PartialEq, Eq)]
pub enum WorkerState {
    Created,
    Running,
    Stopping,
    Stopped,
}

/// Everything a capture loop needs besides its source.
pub(crate) struct WorkerContext {
    pub bus: Arc<FrameBus>,
    pub sink: Arc<dyn DetectionSink>,
    pub store: Arc<dyn DetectionStore>,
    pub runtime: Handle,
    pub snapshot_dir: PathBuf,
    pub frame_interval: Duration,
    pub jpeg_quality: i32,
}

/// Runs after the loop's teardown, on the worker thread.
pub(crate) type ExitHook = Box<dyn FnOnce() + Send>;

/// Handle to one camera's background capture loop.
pub struct CameraWorker {
    camera_id: String,
    generation: u64,
    state: Arc<Mutex<WorkerState>>,
    cancel: Arc<AtomicBool>,
    done: Receiver<()>,
    thread_id: Option<ThreadId>,
}

impl CameraWorker {
    pub(crate) fn new(camera_id: &str, generation: u64) -> (Self, Sender<()>) {
        let (done_tx, done) = mpsc::channel();
        let worker = Self {
            camera_id: camera_id.to_string(),
            generation,
            state: Arc::new(Mutex::new(WorkerState::Created)),
            cancel: Arc::new(AtomicBool::new(false)),
            done,
            thread_id: None,
        };
        (worker, done_tx)
    }

    /// Launches the capture loop on its own thread. The source is released
    /// by the loop's teardown, including when the spawn itself fails.
    pub(crate) fn start(
        &mut self,
        source: Box<dyn FrameSource>,
        ctx: WorkerContext,
        done_tx: Sender<()>,
        on_exit: ExitHook,
    ) -> std::io::Result<()> {
        self.set_state(WorkerState::Running);
        let capture = CaptureLoop {
            camera_id: self.camera_id.clone(),
            generation: self.generation,
            source: Some(source),
            ctx,
            state: Arc::clone(&self.state),
            cancel: Arc::clone(&self.cancel),
            done_tx: Some(done_tx),
        };

        // If the spawn fails the closure is dropped unrun: the loop's teardown
        // still releases the source but the exit hook is never called.
        let handle = thread::Builder::new()
            .name(format!("camera-{}", self.camera_id))
            .spawn(move || {
                let _exit = ExitGuard(Some(on_exit));
                let mut capture = capture;
                capture.run();
            })?;
        self.thread_id = Some(handle.thread().id());
        Ok(())
    }

    pub fn camera_id(&self) -> &str {
        &self.camera_id
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn state(&self) -> WorkerState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_running(&self) -> bool {
        self.state() == WorkerState::Running
    }

    fn set_state(&self, state: WorkerState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    /// Asks the loop to exit and waits up to `timeout` for it to finish.
    /// Returns false if the loop was still busy when the wait ran out.
    /// Called from the loop's own thread it only requests the exit.
    pub fn stop(&self, timeout: Duration) -> bool {
        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if *state == WorkerState::Running {
                *state = WorkerState::Stopping;
            }
        }
        self.cancel.store(true, Ordering::Release);

        if self.thread_id == Some(thread::current().id()) {
            return true;
        }

        match self.done.recv_timeout(timeout) {
            // a dropped sender also means the loop is gone
            Ok(()) | Err(RecvTimeoutError::Disconnected) => true,
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    "Camera {} capture loop did not exit within {:?}",
                    self.camera_id, timeout
                );
                false
            }
        }
    }
}

#[derive(Debug)]
enum LoopExit {
    Disconnected,
    ReadFailed(String),
    SinkFailed(anyhow::Error),
    EncodeFailed(opencv::Error),
}

struct CaptureLoop {
    camera_id: String,
    generation: u64,
    source: Option<Box<dyn FrameSource>>,
    ctx: WorkerContext,
    state: Arc<Mutex<WorkerState>>,
    cancel: Arc<AtomicBool>,
    done_tx: Option<Sender<()>>,
}

/// Calls the exit hook after the capture loop has been torn down.
struct ExitGuard(Option<ExitHook>);

impl Drop for ExitGuard {
    fn drop(&mut self) {
        if let Some(on_exit) = self.0.take() {
            on_exit();
        }
    }
}

impl CaptureLoop {
    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }

    fn run(&mut self) {
        info!("Camera {} capture loop started", self.camera_id);
        while !self.cancelled() {
            if let Err(exit) = self.step() {
                match exit {
                    LoopExit::Disconnected => warn!("Camera {} disconnected", self.camera_id),
                    other => error!("Camera {} capture loop failed: {:?}", self.camera_id, other),
                }
                break;
            }
            thread::sleep(self.ctx.frame_interval);
        }
    }

    /// One capture, detect, persist, publish cycle.
    fn step(&mut self) -> Result<(), LoopExit> {
        let source = match self.source.as_mut() {
            Some(s) if s.status() == SourceStatus::Opened => s,
            _ => return Err(LoopExit::Disconnected),
        };

        let frame = match source.read() {
            ReadOutcome::Frame(frame) => frame,
            ReadOutcome::ReadFailed(reason) => return Err(LoopExit::ReadFailed(reason)),
            ReadOutcome::Disconnected => return Err(LoopExit::Disconnected),
        };
        trace!("Camera {} frame at {}", self.camera_id, frame.time());
        if self.cancelled() {
            return Ok(());
        }

        let Processed { frame, detection } = self
            .ctx
            .sink
            .process(frame, &self.camera_id)
            .map_err(LoopExit::SinkFailed)?;

        let mut snapshot = None;
        if let Some(info) = detection {
            let written = self.ctx.runtime.block_on(write_detection(
                self.ctx.store.as_ref(),
                &info,
                &self.ctx.snapshot_dir,
            ));
            match written {
                Ok(record) => {
                    info!(
                        "Camera {} detected {} ({:.2}) as {}",
                        self.camera_id, record.weapon_type, record.confidence, record.id
                    );
                    snapshot = Some(record.image_path);
                }
                Err(e) => error!(
                    "Failed to record detection for camera {}: {}",
                    self.camera_id, e
                ),
            }
        }

        let jpeg = frame
            .encode_jpeg(self.ctx.jpeg_quality)
            .map_err(LoopExit::EncodeFailed)?;
        if let Some(path) = snapshot {
            if let Err(e) = fs::write(&path, &jpeg) {
                error!("Failed to write snapshot {}: {}", path, e);
            }
        }

        if !self.cancelled() {
            self.ctx
                .bus
                .publish(&self.camera_id, self.generation, Bytes::from(jpeg));
        }
        Ok(())
    }
}

impl Drop for CaptureLoop {
    // Runs once on every exit path, including unwinding out of `run`.
    fn drop(&mut self) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = WorkerState::Stopped;
        if let Some(mut source) = self.source.take() {
            source.release();
        }
        self.ctx.bus.remove(&self.camera_id, self.generation);
        self.ctx.sink.reset(&self.camera_id);
        info!("Camera {} capture loop stopped", self.camera_id);

        if let Some(done) = self.done_tx.take() {
            let _ = done.send(());
        }
    }
}
