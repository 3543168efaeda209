use super::{Camera, CameraStatus, CameraTable, DetectionRecord, DetectionStore};
use crate::db::{self, camera, detection};
use crate::error::StoreError;
use async_trait::async_trait;
use log::info;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveValue::Set, ColumnTrait, ConnectOptions, Database, DatabaseConnection, EntityTrait,
    QueryFilter,
};
use std::str::FromStr;

/// SQLite-backed camera table and detection store.
#[derive(Clone)]
pub struct SqlRepository {
    db: DatabaseConnection,
}

impl SqlRepository {
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let mut opts = ConnectOptions::new(url.to_owned());
        opts.sqlx_logging(false);
        if url.contains(":memory:") {
            // each pooled connection would otherwise get its own empty database
            opts.max_connections(1).min_connections(1);
        }
        let db = Database::connect(opts).await?;
        db::create_schema(&db).await?;
        info!("Connected to database {}", url);
        Ok(Self { db })
    }
}

fn to_camera(model: camera::Model) -> Result<Camera, StoreError> {
    let status = CameraStatus::from_str(&model.status).map_err(|_| {
        StoreError::Backend(format!(
            "camera {} has invalid status {:?}",
            model.id, model.status
        ))
    })?;
    Ok(Camera {
        id: model.id,
        name: model.name,
        url: model.url,
        status,
    })
}

fn to_record(model: detection::Model) -> DetectionRecord {
    DetectionRecord {
        id: model.id,
        timestamp: model.timestamp,
        weapon_type: model.weapon_type,
        confidence: model.confidence,
        camera_id: model.camera_id,
        image_path: model.image_path,
    }
}

#[async_trait]
impl DetectionStore for SqlRepository {
    async fn insert(&self, record: &DetectionRecord) -> Result<(), StoreError> {
        let row = detection::ActiveModel {
            id: Set(record.id.clone()),
            timestamp: Set(record.timestamp.clone()),
            weapon_type: Set(record.weapon_type.clone()),
            confidence: Set(record.confidence),
            camera_id: Set(record.camera_id.clone()),
            image_path: Set(record.image_path.clone()),
        };
        detection::Entity::insert(row)
            .exec_without_returning(&self.db)
            .await?;
        Ok(())
    }

    async fn list_all(&self) -> Result<Vec<DetectionRecord>, StoreError> {
        let rows = detection::Entity::find_newest_first().all(&self.db).await?;
        Ok(rows.into_iter().map(to_record).collect())
    }
}

#[async_trait]
impl CameraTable for SqlRepository {
    async fn list_all(&self) -> Result<Vec<Camera>, StoreError> {
        camera::Entity::find()
            .all(&self.db)
            .await?
            .into_iter()
            .map(to_camera)
            .collect()
    }

    async fn list_by_status(&self, status: CameraStatus) -> Result<Vec<Camera>, StoreError> {
        camera::Entity::find_by_status(status.as_ref())
            .all(&self.db)
            .await?
            .into_iter()
            .map(to_camera)
            .collect()
    }

    async fn get(&self, id: &str) -> Result<Option<Camera>, StoreError> {
        camera::Entity::find_by_id(id.to_owned())
            .one(&self.db)
            .await?
            .map(to_camera)
            .transpose()
    }

    async fn insert(&self, cam: &Camera) -> Result<(), StoreError> {
        let row = camera::ActiveModel {
            id: Set(cam.id.clone()),
            name: Set(cam.name.clone()),
            url: Set(cam.url.clone()),
            status: Set(cam.status.to_string()),
        };
        camera::Entity::insert(row)
            .exec_without_returning(&self.db)
            .await?;
        Ok(())
    }

    async fn update_status(&self, id: &str, status: CameraStatus) -> Result<(), StoreError> {
        let result = camera::Entity::update_many()
            .col_expr(camera::Column::Status, Expr::value(status.to_string()))
            .filter(camera::Column::Id.eq(id))
            .exec(&self.db)
            .await?;
        if result.rows_affected == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        camera::Entity::delete_by_id(id.to_owned())
            .exec(&self.db)
            .await?;
        Ok(())
    }
}
