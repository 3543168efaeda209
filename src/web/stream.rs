use rocket::http::ContentType;
use rocket::response::stream::ByteStream;
use rocket::tokio::select;
use rocket::tokio::time::interval;
use rocket::{Shutdown, State};
use std::sync::Arc;

use super::StreamSettings;
use crate::camera::CameraService;

const BOUNDARY: &str = "frame";

fn multipart_part(jpeg: &[u8]) -> Vec<u8> {
    let mut part = Vec::with_capacity(jpeg.len() + 64);
    part.extend_from_slice(b"--");
    part.extend_from_slice(BOUNDARY.as_bytes());
    part.extend_from_slice(b"\r\nContent-Type: image/jpeg\r\n\r\n");
    part.extend_from_slice(jpeg);
    part.extend_from_slice(b"\r\n");
    part
}

/// MJPEG feed of a running camera. Ends when the camera stops or the
/// server shuts down; a client going away simply stops the polling.
#[get("/video_feed/<camera_id>")]
pub(crate) fn video_feed(
    camera_id: String,
    service: &State<Arc<CameraService>>,
    settings: &State<StreamSettings>,
    mut shutdown: Shutdown,
) -> Option<(ContentType, ByteStream![Vec<u8>])> {
    if !service.is_running(&camera_id) {
        return None;
    }
    let service = Arc::clone(service.inner());
    let poll_interval = settings.poll_interval;
    let content_type =
        ContentType::new("multipart", "x-mixed-replace").with_params(("boundary", BOUNDARY));

    Some((
        content_type,
        ByteStream! {
            let mut ticker = interval(poll_interval);
            let mut last_sent = None;
            loop {
                select! {
                    _ = ticker.tick() => {},
                    _ = &mut shutdown => break,
                }
                if !service.is_running(&camera_id) {
                    break;
                }
                if let Some(frame) = service.bus().latest(&camera_id) {
                    let version = Some((frame.owner, frame.sequence));
                    if version != last_sent {
                        last_sent = version;
                        yield multipart_part(&frame.jpeg);
                    }
                }
            }
        },
    ))
}
