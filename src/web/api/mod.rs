use log::{debug, error, info, warn};
use rocket::http::Status;
use rocket::response::{self, status, Responder};
use rocket::serde::json::{json, Error as JsonError, Json, Value};
use rocket::{Request, State};
use serde::Deserialize;
use std::sync::Arc;

use crate::camera::CameraService;
use crate::error::{CameraError, StoreError};
use crate::repository::{Camera, CameraStatus, CameraTable, DetectionRecord, DetectionStore};

#[derive(Debug)]
pub(crate) struct ApiError {
    status: Status,
    message: String,
}

impl ApiError {
    fn new(status: Status, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(Status::BadRequest, message)
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self::new(Status::NotFound, message)
    }

    fn internal(err: impl std::fmt::Display) -> Self {
        Self::new(Status::InternalServerError, err.to_string())
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::UniquenessViolation(_) => Self::new(Status::Conflict, "record already exists"),
            StoreError::NotFound(id) => Self::not_found(format!("{} not found", id)),
            StoreError::Backend(_) => Self::internal(err),
        }
    }
}

impl<'r> Responder<'r, 'static> for ApiError {
    fn respond_to(self, req: &'r Request<'_>) -> response::Result<'static> {
        if self.status.code >= 500 {
            error!("{} {} failed: {}", req.method(), req.uri(), self.message);
        } else {
            debug!("{} {} rejected: {}", req.method(), req.uri(), self.message);
        }
        status::Custom(self.status, Json(json!({ "error": self.message }))).respond_to(req)
    }
}

type ApiResult<T> = Result<T, ApiError>;

fn parse_body<T>(body: Result<Json<T>, JsonError<'_>>) -> ApiResult<T> {
    body.map(Json::into_inner)
        .map_err(|e| ApiError::bad_request(format!("invalid request body: {}", e)))
}

fn require(field: &str, value: &str) -> ApiResult<()> {
    if value.trim().is_empty() {
        return Err(ApiError::bad_request(format!("missing required field {}", field)));
    }
    Ok(())
}

fn message(text: &str) -> Json<Value> {
    Json(json!({ "message": text }))
}

/// Runs a blocking lifecycle call off the async workers.
async fn lifecycle<T, F>(service: &State<Arc<CameraService>>, op: F) -> ApiResult<T>
where
    F: FnOnce(&CameraService) -> T + Send + 'static,
    T: Send + 'static,
{
    let service = Arc::clone(service.inner());
    rocket::tokio::task::spawn_blocking(move || op(&service))
        .await
        .map_err(ApiError::internal)
}

#[derive(Deserialize, Debug)]
pub(crate) struct NewCamera {
    id: String,
    name: String,
    url: String,
}

#[derive(Deserialize, Debug)]
pub(crate) struct StatusUpdate {
    status: CameraStatus,
}

#[derive(Deserialize, Debug)]
pub(crate) struct NewDetection {
    id: String,
    timestamp: String,
    #[serde(rename = "tipoArma")]
    weapon_type: String,
    #[serde(rename = "porcentaje")]
    confidence: f64,
    #[serde(rename = "camara")]
    camera_id: String,
    image_path: String,
}

#[get("/cameras")]
pub(crate) async fn list_cameras(cameras: &State<Arc<dyn CameraTable>>) -> ApiResult<Json<Vec<Camera>>> {
    Ok(Json(cameras.list_all().await?))
}

#[get("/active_cameras")]
pub(crate) async fn list_active_cameras(
    cameras: &State<Arc<dyn CameraTable>>,
) -> ApiResult<Json<Vec<Camera>>> {
    Ok(Json(cameras.list_by_status(CameraStatus::Active).await?))
}

#[get("/cameras/<id>")]
pub(crate) async fn get_camera(id: String, cameras: &State<Arc<dyn CameraTable>>) -> ApiResult<Json<Camera>> {
    cameras
        .get(&id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("camera {} not found", id)))
}

#[post("/cameras", data = "<body>")]
pub(crate) async fn add_camera(
    body: Result<Json<NewCamera>, JsonError<'_>>,
    service: &State<Arc<CameraService>>,
    cameras: &State<Arc<dyn CameraTable>>,
) -> ApiResult<status::Created<Json<Value>>> {
    let new = parse_body(body)?;
    require("id", &new.id)?;
    require("name", &new.name)?;
    require("url", &new.url)?;

    let url = new.url.clone();
    lifecycle(service, move |svc| svc.probe(&url))
        .await?
        .map_err(|e| ApiError::bad_request(format!("camera is not reachable: {:#}", e)))?;

    cameras
        .insert(&Camera {
            id: new.id.clone(),
            name: new.name,
            url: new.url,
            status: CameraStatus::Inactive,
        })
        .await
        .map_err(|e| match e {
            StoreError::UniquenessViolation(_) => {
                ApiError::new(Status::Conflict, format!("camera {} already exists", new.id))
            }
            other => other.into(),
        })?;

    info!("Registered camera {}", new.id);
    Ok(status::Created::new(format!("/api/cameras/{}", new.id)).body(message("camera added")))
}

#[put("/cameras/<id>", data = "<body>")]
pub(crate) async fn update_camera(
    id: String,
    body: Result<Json<StatusUpdate>, JsonError<'_>>,
    service: &State<Arc<CameraService>>,
    cameras: &State<Arc<dyn CameraTable>>,
) -> ApiResult<Json<Value>> {
    let update = parse_body(body)?;
    let camera = cameras
        .get(&id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("camera {} not found", id)))?;

    let mut started = false;
    match update.status {
        CameraStatus::Active => {
            let (camera_id, url) = (camera.id.clone(), camera.url.clone());
            match lifecycle(service, move |svc| svc.start(&camera_id, &url)).await? {
                Ok(()) => started = true,
                Err(CameraError::AlreadyRunning(_)) => {}
                Err(e @ CameraError::Connection { .. }) => {
                    return Err(ApiError::bad_request(e.to_string()))
                }
                Err(e @ CameraError::Cancelled(_)) => {
                    return Err(ApiError::new(Status::Conflict, e.to_string()))
                }
                Err(e) => return Err(ApiError::internal(e)),
            }
        }
        CameraStatus::Inactive => {
            let camera_id = camera.id.clone();
            lifecycle(service, move |svc| svc.stop(&camera_id)).await?;
        }
    }

    if let Err(e) = cameras.update_status(&id, update.status).await {
        // the registry follows the stored status
        if started {
            warn!("Stopping camera {} after its status update failed: {}", id, e);
            let camera_id = id.clone();
            lifecycle(service, move |svc| svc.stop(&camera_id)).await?;
        }
        return Err(e.into());
    }
    Ok(message("camera updated"))
}

#[delete("/cameras/<id>")]
pub(crate) async fn delete_camera(
    id: String,
    service: &State<Arc<CameraService>>,
    cameras: &State<Arc<dyn CameraTable>>,
) -> ApiResult<Json<Value>> {
    let camera_id = id.clone();
    lifecycle(service, move |svc| svc.stop(&camera_id)).await?;
    cameras.delete(&id).await?;
    info!("Removed camera {}", id);
    Ok(message("camera deleted"))
}

#[post("/detection", data = "<body>")]
pub(crate) async fn add_detection(
    body: Result<Json<NewDetection>, JsonError<'_>>,
    detections: &State<Arc<dyn DetectionStore>>,
) -> ApiResult<status::Created<Json<Value>>> {
    let new = parse_body(body)?;
    require("id", &new.id)?;
    require("timestamp", &new.timestamp)?;
    require("tipoArma", &new.weapon_type)?;
    require("camara", &new.camera_id)?;
    if !(0.0..=1.0).contains(&new.confidence) {
        return Err(ApiError::bad_request("porcentaje must be between 0 and 1"));
    }

    let record = DetectionRecord {
        id: new.id,
        timestamp: new.timestamp,
        weapon_type: new.weapon_type,
        confidence: new.confidence,
        camera_id: new.camera_id,
        image_path: new.image_path,
    };
    detections.insert(&record).await?;
    Ok(status::Created::new(format!("/api/detections/{}", record.id)).body(message("detection recorded")))
}

#[get("/detections")]
pub(crate) async fn list_detections(
    detections: &State<Arc<dyn DetectionStore>>,
) -> ApiResult<Json<Vec<DetectionRecord>>> {
    Ok(Json(detections.list_all().await?))
}
