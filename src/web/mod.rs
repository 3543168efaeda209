use crate::camera::CameraService;
use crate::repository::{CameraTable, DetectionStore};

mod api;
mod stream;

use rocket::figment::Figment;
use rocket::serde::json::{json, Value};
use rocket::{Build, Request, Rocket};
use std::sync::Arc;
use std::time::Duration;

pub struct StreamSettings {
    pub poll_interval: Duration,
}

/// Shared handles the routes are served from.
pub struct AppState {
    pub service: Arc<CameraService>,
    pub cameras: Arc<dyn CameraTable>,
    pub detections: Arc<dyn DetectionStore>,
    pub stream: StreamSettings,
}

#[catch(404)]
fn not_found(req: &Request) -> Value {
    json!({ "error": format!("{} was not found", req.uri()) })
}

#[catch(422)]
fn unprocessable(_req: &Request) -> Value {
    json!({ "error": "request could not be processed" })
}

#[catch(500)]
fn internal_error(_req: &Request) -> Value {
    json!({ "error": "internal server error" })
}

pub fn build(figment: Figment, state: AppState) -> Rocket<Build> {
    rocket::custom(figment)
        .mount(
            "/api",
            routes![
                api::list_cameras,
                api::list_active_cameras,
                api::get_camera,
                api::add_camera,
                api::update_camera,
                api::delete_camera,
                api::add_detection,
                api::list_detections,
            ],
        )
        .mount("/", routes![stream::video_feed])
        .register("/", catchers![not_found, unprocessable, internal_error])
        .manage(state.service)
        .manage(state.cameras)
        .manage(state.detections)
        .manage(state.stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::fakes::{FakeConnector, FakeSink};
    use crate::config::CaptureConfig;
    use crate::detection::DetectionSink;
    use crate::frame_reader::SourceConnector;
    use crate::error::StoreError;
    use crate::repository::{Camera, CameraStatus, SqlRepository};
    use async_trait::async_trait;
    use rocket::http::{ContentType, Status};
    use rocket::local::asynchronous::{Client, LocalResponse};
    use rocket::tokio::io::AsyncReadExt;
    use rocket::tokio::time::timeout;
    use std::path::PathBuf;

    const PART_HEADER: &[u8] = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n";

    struct TestApp {
        client: Client,
        service: Arc<CameraService>,
        repo: SqlRepository,
    }

    async fn app(sink: Arc<dyn DetectionSink>) -> TestApp {
        app_with(sink, |repo| Arc::new(repo)).await
    }

    async fn app_with(
        sink: Arc<dyn DetectionSink>,
        table: impl FnOnce(SqlRepository) -> Arc<dyn CameraTable>,
    ) -> TestApp {
        let repo = SqlRepository::connect("sqlite::memory:").await.unwrap();
        let snapshot_dir: PathBuf = std::env::temp_dir().join("weaponcam-web-test");
        std::fs::create_dir_all(&snapshot_dir).unwrap();

        let service = Arc::new(CameraService::new(
            CaptureConfig {
                frame_interval_ms: 5,
                ..CaptureConfig::default()
            },
            snapshot_dir,
            Arc::new(FakeConnector::default()) as Arc<dyn SourceConnector>,
            sink,
            Arc::new(repo.clone()) as Arc<dyn DetectionStore>,
            rocket::tokio::runtime::Handle::current(),
        ));
        let rocket = build(
            rocket::Config::figment(),
            AppState {
                service: Arc::clone(&service),
                cameras: table(repo.clone()),
                detections: Arc::new(repo.clone()),
                stream: StreamSettings {
                    poll_interval: Duration::from_millis(5),
                },
            },
        );
        TestApp {
            client: Client::tracked(rocket).await.unwrap(),
            service,
            repo,
        }
    }

    async fn add_camera(client: &Client, id: &str, url: &str) -> Status {
        client
            .post("/api/cameras")
            .header(ContentType::JSON)
            .body(json!({ "id": id, "name": format!("{} door", id), "url": url }).to_string())
            .dispatch()
            .await
            .status()
    }

    async fn set_status(client: &Client, id: &str, status: &str) -> Status {
        client
            .put(format!("/api/cameras/{}", id))
            .header(ContentType::JSON)
            .body(json!({ "status": status }).to_string())
            .dispatch()
            .await
            .status()
    }

    async fn read_first_part(response: &mut LocalResponse<'_>) -> Vec<u8> {
        let mut received = Vec::new();
        let mut chunk = vec![0u8; 16 * 1024];
        while received.len() < PART_HEADER.len() + 2 {
            let n = timeout(Duration::from_secs(5), response.read(&mut chunk))
                .await
                .expect("no frame within timeout")
                .unwrap();
            assert!(n > 0, "stream ended before the first frame");
            received.extend_from_slice(&chunk[..n]);
        }
        received
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn camera_crud_round() {
        let app = app(Arc::new(FakeSink::new(false))).await;

        assert_eq!(Status::Created, add_camera(&app.client, "cam1", "fake://cam1").await);
        assert_eq!(Status::Conflict, add_camera(&app.client, "cam1", "fake://cam1").await);
        assert_eq!(Status::BadRequest, add_camera(&app.client, "cam2", "rtsp://10.0.0.9/x").await);

        let listed: Value = app
            .client
            .get("/api/cameras")
            .dispatch()
            .await
            .into_json()
            .await
            .unwrap();
        assert_eq!(json!([{ "id": "cam1", "name": "cam1 door", "url": "fake://cam1", "status": "inactive" }]), listed);

        let missing = app.client.get("/api/cameras/nope").dispatch().await;
        assert_eq!(Status::NotFound, missing.status());

        let deleted = app.client.delete("/api/cameras/cam1").dispatch().await;
        assert_eq!(Status::Ok, deleted.status());
        assert!(app.repo.get("cam1").await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn malformed_bodies_are_client_errors() {
        let app = app(Arc::new(FakeSink::new(false))).await;

        let missing_url = app
            .client
            .post("/api/cameras")
            .header(ContentType::JSON)
            .body(r#"{"id": "cam1", "name": "lobby"}"#)
            .dispatch()
            .await;
        assert_eq!(Status::BadRequest, missing_url.status());
        let body: Value = missing_url.into_json().await.unwrap();
        assert!(body["error"].is_string());

        assert_eq!(Status::Created, add_camera(&app.client, "cam1", "fake://cam1").await);
        assert_eq!(Status::BadRequest, set_status(&app.client, "cam1", "paused").await);
        assert_eq!(Status::NotFound, set_status(&app.client, "ghost", "active").await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn video_feed_streams_until_camera_stops() {
        let app = app(Arc::new(FakeSink::new(false))).await;
        assert_eq!(Status::Created, add_camera(&app.client, "cam1", "fake://cam1").await);

        let not_running = app.client.get("/video_feed/cam1").dispatch().await;
        assert_eq!(Status::NotFound, not_running.status());

        assert_eq!(Status::Ok, set_status(&app.client, "cam1", "active").await);
        assert!(app.service.is_running("cam1"));
        assert_eq!(Status::Ok, set_status(&app.client, "cam1", "active").await);

        let mut feed = app.client.get("/video_feed/cam1").dispatch().await;
        assert_eq!(Status::Ok, feed.status());
        let content_type = feed.headers().get_one("Content-Type").unwrap().to_string();
        assert!(content_type.starts_with("multipart/x-mixed-replace"));
        assert!(content_type.contains("boundary=frame"));

        let first = read_first_part(&mut feed).await;
        assert!(first.starts_with(PART_HEADER));
        assert_eq!(&[0xFF, 0xD8], &first[PART_HEADER.len()..PART_HEADER.len() + 2]);

        assert_eq!(Status::Ok, set_status(&app.client, "cam1", "inactive").await);
        let rest = timeout(Duration::from_secs(5), feed.into_bytes())
            .await
            .expect("stream did not end after stop");
        assert!(rest.is_some());

        assert!(!app.service.is_running("cam1"));
        assert!(app.service.bus().latest("cam1").is_none());
        let stored = app.repo.get("cam1").await.unwrap().unwrap();
        assert_eq!(CameraStatus::Inactive, stored.status);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn detections_from_the_loop_are_listed() {
        let app = app(Arc::new(FakeSink::new(true))).await;
        assert_eq!(Status::Created, add_camera(&app.client, "cam1", "fake://cam1").await);
        assert_eq!(Status::Ok, set_status(&app.client, "cam1", "active").await);

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        let detections = loop {
            let listed: Vec<Value> = app
                .client
                .get("/api/detections")
                .dispatch()
                .await
                .into_json()
                .await
                .unwrap();
            if !listed.is_empty() || std::time::Instant::now() > deadline {
                break listed;
            }
            rocket::tokio::time::sleep(Duration::from_millis(10)).await;
        };
        assert_eq!(Status::Ok, set_status(&app.client, "cam1", "inactive").await);

        assert_eq!(1, detections.len());
        let record = &detections[0];
        assert_eq!("knife", record["weapon_type"]);
        assert_eq!(0.87, record["confidence"]);
        assert_eq!("cam1", record["camera_id"]);
        assert!(record["id"].as_str().unwrap().starts_with("det_"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn direct_detection_insert() {
        let app = app(Arc::new(FakeSink::new(false))).await;
        let body = json!({
            "id": "ext_1",
            "timestamp": "2024-05-01 10:00:00",
            "tipoArma": "pistol",
            "porcentaje": 0.91,
            "camara": "cam9",
            "image_path": "detections/ext_1.jpg"
        })
        .to_string();

        let created = app
            .client
            .post("/api/detection")
            .header(ContentType::JSON)
            .body(body.clone())
            .dispatch()
            .await;
        assert_eq!(Status::Created, created.status());

        let duplicate = app
            .client
            .post("/api/detection")
            .header(ContentType::JSON)
            .body(body)
            .dispatch()
            .await;
        assert_eq!(Status::Conflict, duplicate.status());

        let out_of_range = app
            .client
            .post("/api/detection")
            .header(ContentType::JSON)
            .body(r#"{"id":"ext_2","timestamp":"t","tipoArma":"knife","porcentaje":87,"camara":"c","image_path":""}"#)
            .dispatch()
            .await;
        assert_eq!(Status::BadRequest, out_of_range.status());

        let listed: Vec<Value> = app
            .client
            .get("/api/detections")
            .dispatch()
            .await
            .into_json()
            .await
            .unwrap();
        assert_eq!(1, listed.len());
        assert_eq!("pistol", listed[0]["weapon_type"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn active_cameras_lists_stored_status() {
        let app = app(Arc::new(FakeSink::new(false))).await;
        assert_eq!(Status::Created, add_camera(&app.client, "cam1", "fake://cam1").await);
        assert_eq!(Status::Created, add_camera(&app.client, "cam2", "fake://cam2").await);
        assert_eq!(Status::Ok, set_status(&app.client, "cam2", "active").await);

        let active: Vec<Value> = app
            .client
            .get("/api/active_cameras")
            .dispatch()
            .await
            .into_json()
            .await
            .unwrap();
        assert_eq!(1, active.len());
        assert_eq!("cam2", active[0]["id"]);

        let deleted = app.client.delete("/api/cameras/cam2").dispatch().await;
        assert_eq!(Status::Ok, deleted.status());
        assert!(!app.service.is_running("cam2"));
    }

    /// Stores cameras normally but fails every status write.
    struct StatusWriteFails(SqlRepository);

    #[async_trait]
    impl CameraTable for StatusWriteFails {
        async fn list_all(&self) -> Result<Vec<Camera>, StoreError> {
            CameraTable::list_all(&self.0).await
        }

        async fn list_by_status(&self, status: CameraStatus) -> Result<Vec<Camera>, StoreError> {
            self.0.list_by_status(status).await
        }

        async fn get(&self, id: &str) -> Result<Option<Camera>, StoreError> {
            self.0.get(id).await
        }

        async fn insert(&self, camera: &Camera) -> Result<(), StoreError> {
            CameraTable::insert(&self.0, camera).await
        }

        async fn update_status(&self, _id: &str, _status: CameraStatus) -> Result<(), StoreError> {
            Err(StoreError::Backend("disk full".to_string()))
        }

        async fn delete(&self, id: &str) -> Result<(), StoreError> {
            self.0.delete(id).await
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn failed_status_write_undoes_the_start() {
        let app = app_with(Arc::new(FakeSink::new(false)), |repo| {
            Arc::new(StatusWriteFails(repo))
        })
        .await;
        assert_eq!(Status::Created, add_camera(&app.client, "cam1", "fake://cam1").await);

        let response = app
            .client
            .put("/api/cameras/cam1")
            .header(ContentType::JSON)
            .body(json!({ "status": "active" }).to_string())
            .dispatch()
            .await;
        assert_eq!(Status::InternalServerError, response.status());
        let body: Value = response.into_json().await.unwrap();
        assert!(body["error"].is_string());

        assert!(!app.service.is_running("cam1"));
        assert!(app.service.bus().latest("cam1").is_none());
        let stored = app.repo.get("cam1").await.unwrap().unwrap();
        assert_eq!(CameraStatus::Inactive, stored.status);
    }
}
