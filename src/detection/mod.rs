//! The seam to the analysis routine that inspects each captured frame.

mod writer;

pub use writer::write_detection;

use crate::config::{DetectionConfig, DetectorKind};
use crate::frame::Frame;
use crate::motion_detection::MotionSink;
use chrono::{DateTime, Local};
use std::sync::Arc;

/// A detection event produced by a sink, before it has an identifier.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionInfo {
    pub timestamp: DateTime<Local>,
    pub weapon_type: String,
    pub confidence: f64,
    pub camera_id: String,
}

/// What a sink hands back for one frame.
#[derive(Debug)]
pub struct Processed {
    pub frame: Frame,
    pub detection: Option<DetectionInfo>,
}

pub trait DetectionSink: Send + Sync {
    /// Annotates `frame` and reports a detection if one was found.
    /// An error here stops the camera's capture loop.
    fn process(&self, frame: Frame, camera_id: &str) -> anyhow::Result<Processed>;

    /// Forgets any per-camera state; called when the camera's loop ends.
    fn reset(&self, _camera_id: &str) {}
}

/// Hands frames back untouched and never detects anything.
pub struct PassthroughSink;

impl DetectionSink for PassthroughSink {
    fn process(&self, frame: Frame, _camera_id: &str) -> anyhow::Result<Processed> {
        Ok(Processed {
            frame,
            detection: None,
        })
    }
}

pub fn build_sink(cfg: &DetectionConfig) -> Arc<dyn DetectionSink> {
    match cfg.kind {
        DetectorKind::None => Arc::new(PassthroughSink),
        DetectorKind::Motion => Arc::new(MotionSink::new(cfg)),
    }
}
