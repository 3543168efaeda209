mod sql;

pub use sql::SqlRepository;

use crate::error::StoreError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

#[derive(
    Serialize, Deserialize, Display, EnumString, AsRefStr, Copy, Clone, Debug, PartialEq, Eq,
)]
#[serde(rename_all = "lowercase")]
pub enum CameraStatus {
    #[strum(serialize = "active")]
    Active,
    #[strum(serialize = "inactive")]
    Inactive,
}

#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct Camera {
    pub id: String,
    pub name: String,
    pub url: String,
    pub status: CameraStatus,
}

/// A persisted detection event. Never updated once written.
#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct DetectionRecord {
    pub id: String,
    pub timestamp: String,
    pub weapon_type: String,
    pub confidence: f64,
    pub camera_id: String,
    pub image_path: String,
}

#[async_trait]
pub trait DetectionStore: Send + Sync {
    /// Fails with `StoreError::UniquenessViolation` when `record.id` exists.
    async fn insert(&self, record: &DetectionRecord) -> Result<(), StoreError>;

    /// Newest first.
    async fn list_all(&self) -> Result<Vec<DetectionRecord>, StoreError>;
}

#[async_trait]
pub trait CameraTable: Send + Sync {
    async fn list_all(&self) -> Result<Vec<Camera>, StoreError>;
    async fn list_by_status(&self, status: CameraStatus) -> Result<Vec<Camera>, StoreError>;
    async fn get(&self, id: &str) -> Result<Option<Camera>, StoreError>;
    async fn insert(&self, camera: &Camera) -> Result<(), StoreError>;
    async fn update_status(&self, id: &str, status: CameraStatus) -> Result<(), StoreError>;
    async fn delete(&self, id: &str) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn should_parse_lowercase_status() {
        assert_eq!(CameraStatus::Active, CameraStatus::from_str("active").unwrap());
        assert_eq!("inactive", CameraStatus::Inactive.as_ref());
        assert!(CameraStatus::from_str("paused").is_err());
    }

    #[test]
    fn status_serializes_lowercase() {
        assert_eq!("\"active\"", serde_json::to_string(&CameraStatus::Active).unwrap());
    }
}
