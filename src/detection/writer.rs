use super::DetectionInfo;
use crate::error::StoreError;
use crate::repository::{DetectionRecord, DetectionStore};
use chrono::{DateTime, Local};
use log::debug;
use std::path::Path;

/// Insert attempts before a collision is reported to the caller.
pub const MAX_WRITE_ATTEMPTS: u32 = 3;

/// Identifier for the `attempt`-th insert of a detection seen at `ts`,
/// e.g. `det_20240501_101500_000123`, then `..._000123_1`, `..._000123_2`.
pub fn candidate_id(ts: &DateTime<Local>, attempt: u32) -> String {
    let base = format!(
        "det_{}_{:06}",
        ts.format("%Y%m%d_%H%M%S"),
        ts.timestamp_subsec_micros() % 1_000_000
    );
    if attempt == 0 {
        base
    } else {
        format!("{}_{}", base, attempt)
    }
}

pub fn snapshot_path(snapshot_dir: &Path, id: &str) -> String {
    snapshot_dir
        .join(format!("detection_{}.jpg", id))
        .to_string_lossy()
        .into_owned()
}

fn to_record(info: &DetectionInfo, id: String, snapshot_dir: &Path) -> DetectionRecord {
    DetectionRecord {
        image_path: snapshot_path(snapshot_dir, &id),
        id,
        timestamp: info.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
        weapon_type: info.weapon_type.clone(),
        confidence: info.confidence,
        camera_id: info.camera_id.clone(),
    }
}

/// Persists `info` exactly once, regenerating the identifier when the store
/// reports a collision. Gives up after `MAX_WRITE_ATTEMPTS` inserts and
/// returns the last store error.
pub async fn write_detection(
    store: &dyn DetectionStore,
    info: &DetectionInfo,
    snapshot_dir: &Path,
) -> Result<DetectionRecord, StoreError> {
    let mut attempt = 0;
    loop {
        let record = to_record(info, candidate_id(&info.timestamp, attempt), snapshot_dir);
        match store.insert(&record).await {
            Ok(()) => return Ok(record),
            Err(StoreError::UniquenessViolation(reason)) if attempt + 1 < MAX_WRITE_ATTEMPTS => {
                debug!("Detection id {} collided ({}), retrying", record.id, reason);
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
