use thiserror::Error;

/// Failures of the camera lifecycle operations.
#[derive(Debug, Error)]
pub enum CameraError {
    #[error("camera {0} is already running")]
    AlreadyRunning(String),

    #[error("unable to connect to camera {id}: {reason}")]
    Connection { id: String, reason: String },

    #[error("camera {0} was stopped before its connection opened")]
    Cancelled(String),

    #[error("failed to spawn capture thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Failures reported by the record stores.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("unique constraint violated: {0}")]
    UniquenessViolation(String),

    #[error("record not found: {0}")]
    NotFound(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

impl From<sea_orm::DbErr> for StoreError {
    fn from(err: sea_orm::DbErr) -> Self {
        match err.sql_err() {
            Some(sea_orm::SqlErr::UniqueConstraintViolation(msg)) => {
                StoreError::UniquenessViolation(msg)
            }
            _ => {
                let msg = err.to_string();
                // sqlite reports primary key collisions with its own extended code
                if msg.contains("UNIQUE constraint failed") {
                    StoreError::UniquenessViolation(msg)
                } else {
                    StoreError::Backend(msg)
                }
            }
        }
    }
}
