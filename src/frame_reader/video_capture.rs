use anyhow::{bail, Context};
use log::{debug, warn};
use opencv::{core::Vector, prelude::*, videoio};

use super::{FrameSource, ReadOutcome, SourceConnector, SourceStatus};
use crate::frame::Frame;

/// Opens network streams (RTSP, HTTP MJPEG, files) through OpenCV.
pub struct VideoCaptureConnector {
    open_timeout_ms: i32,
    read_timeout_ms: i32,
}

impl VideoCaptureConnector {
    pub fn new(open_timeout_ms: u64, read_timeout_ms: u64) -> Self {
        Self {
            open_timeout_ms: open_timeout_ms.min(i32::MAX as u64) as i32,
            read_timeout_ms: read_timeout_ms.min(i32::MAX as u64) as i32,
        }
    }
}

impl SourceConnector for VideoCaptureConnector {
    fn connect(&self, url: &str) -> anyhow::Result<Box<dyn FrameSource>> {
        let params = Vector::<i32>::from_slice(&[
            videoio::CAP_PROP_OPEN_TIMEOUT_MSEC,
            self.open_timeout_ms,
            videoio::CAP_PROP_READ_TIMEOUT_MSEC,
            self.read_timeout_ms,
        ]);
        let cam = videoio::VideoCapture::from_file_with_params(url, videoio::CAP_ANY, &params)
            .with_context(|| format!("failed to open {}", url))?;

        if !cam.is_opened()? {
            bail!("unable to open camera stream {}", url);
        }
        debug!("Opened video capture for {}", url);

        Ok(Box::new(VideoCaptureSource {
            cam,
            released: false,
        }))
    }
}

pub struct VideoCaptureSource {
    cam: videoio::VideoCapture,
    released: bool,
}

impl FrameSource for VideoCaptureSource {
    fn status(&self) -> SourceStatus {
        if self.released {
            return SourceStatus::Disconnected;
        }
        match self.cam.is_opened() {
            Ok(true) => SourceStatus::Opened,
            _ => SourceStatus::Disconnected,
        }
    }

    fn read(&mut self) -> ReadOutcome {
        if self.released {
            return ReadOutcome::Disconnected;
        }
        let mut img = Mat::default();
        match self.cam.read(&mut img) {
            Ok(true) => match Frame::new(img, None) {
                Ok(frame) if !frame.is_empty() => ReadOutcome::Frame(frame),
                Ok(_) => ReadOutcome::ReadFailed("empty frame".to_string()),
                Err(e) => ReadOutcome::ReadFailed(e.to_string()),
            },
            Ok(false) => ReadOutcome::ReadFailed("no frame returned".to_string()),
            Err(e) => ReadOutcome::ReadFailed(e.to_string()),
        }
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Err(e) = self.cam.release() {
            warn!("Failed to release video capture: {}", e);
        }
    }
}

impl Drop for VideoCaptureSource {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unreachable_url_fails_to_connect() {
        let connector = VideoCaptureConnector::new(500, 500);
        assert!(connector.connect("/nonexistent/camera-stream.mjpg").is_err());
        assert!(connector.probe("/nonexistent/camera-stream.mjpg").is_err());
    }
}
