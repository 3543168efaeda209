use bytes::Bytes;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

/// The latest encoded frame of one camera.
#[derive(Clone, Debug, PartialEq)]
pub struct BusFrame {
    /// Generation of the worker that published the frame.
    pub owner: u64,
    /// Increases with every publish for the same camera.
    pub sequence: u64,
    pub jpeg: Bytes,
}

/// Latest-frame-per-camera buffer shared between capture loops and viewers.
#[derive(Default)]
pub struct FrameBus {
    frames: RwLock<HashMap<String, BusFrame>>,
}

impl FrameBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the frame of `camera_id`.
    pub fn publish(&self, camera_id: &str, owner: u64, jpeg: Bytes) {
        let mut frames = self.frames.write().unwrap_or_else(PoisonError::into_inner);
        let sequence = frames.get(camera_id).map_or(1, |f| f.sequence + 1);
        frames.insert(
            camera_id.to_string(),
            BusFrame {
                owner,
                sequence,
                jpeg,
            },
        );
    }

    pub fn latest(&self, camera_id: &str) -> Option<BusFrame> {
        self.frames
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(camera_id)
            .cloned()
    }

    /// Drops the entry for `camera_id` if `owner` published it.
    pub fn remove(&self, camera_id: &str, owner: u64) -> bool {
        let mut frames = self.frames.write().unwrap_or_else(PoisonError::into_inner);
        match frames.get(camera_id) {
            Some(f) if f.owner == owner => {
                frames.remove(camera_id);
                true
            }
            _ => false,
        }
    }

    #[cfg(test)]
    pub fn contains(&self, camera_id: &str) -> bool {
        self.frames
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(camera_id)
    }
}
