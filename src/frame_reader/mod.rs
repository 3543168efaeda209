//! Camera connections.
//!
//! A [`SourceConnector`] opens a [`FrameSource`] for a camera URL; the
//! capture loop then pulls frames from it until it reports a failure.

mod video_capture;

pub use video_capture::VideoCaptureConnector;

use crate::frame::Frame;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceStatus {
    Opened,
    Disconnected,
}

#[derive(Debug)]
pub enum ReadOutcome {
    Frame(Frame),
    ReadFailed(String),
    Disconnected,
}

/// A live connection to one camera.
pub trait FrameSource: Send {
    fn status(&self) -> SourceStatus;

    /// Blocks until the next frame arrives or the source gives up.
    fn read(&mut self) -> ReadOutcome;

    /// Closes the connection. Calling it more than once is harmless.
    fn release(&mut self);
}

pub trait SourceConnector: Send + Sync {
    fn connect(&self, url: &str) -> anyhow::Result<Box<dyn FrameSource>>;

    /// Checks that `url` can be opened, releasing the connection right away.
    fn probe(&self, url: &str) -> anyhow::Result<()> {
        let mut source = self.connect(url)?;
        source.release();
        Ok(())
    }
}
