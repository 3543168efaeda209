use chrono::Local;
use log::{debug, error, trace};
use opencv::{
    core,
    core::{Point, Scalar, Vector, BORDER_CONSTANT},
    imgproc,
    imgproc::{bounding_rect, rectangle, CHAIN_APPROX_SIMPLE, LINE_AA, RETR_TREE, THRESH_BINARY},
    prelude::*,
};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use crate::config::DetectionConfig;
use crate::detection::{DetectionInfo, DetectionSink, Processed};
use crate::frame::Frame;

type Contours = Vector<Vector<Point>>;

/// Frame-differencing motion detector. Keeps one downsampled reference
/// frame per camera; the first frame of a camera only primes it.
pub struct MotionSink {
    previous: Mutex<HashMap<String, Frame>>,
    min_area: f64,
    label: String,
    draw_rectangles: bool,
}

fn absdiff(img1: &Mat, img2: &Mat) -> opencv::Result<Mat> {
    let mut delta = Mat::default();
    core::absdiff(img1, img2, &mut delta)?;
    Ok(delta)
}

fn threshold(img: &Mat) -> opencv::Result<Mat> {
    let mut thresh = Mat::default();
    imgproc::threshold(img, &mut thresh, 25.0, 255.0, THRESH_BINARY)?;
    Ok(thresh)
}

fn dilate(img: &Mat) -> opencv::Result<Mat> {
    let mut dilated = Mat::default();
    imgproc::dilate(
        img,
        &mut dilated,
        &Mat::default(),
        Point::new(-1, -1),
        1,
        BORDER_CONSTANT,
        imgproc::morphology_default_border_value()?,
    )?;
    Ok(dilated)
}

fn find_contours(img: &Mat) -> opencv::Result<Contours> {
    let mut contours = Contours::new();
    imgproc::find_contours(
        img,
        &mut contours,
        RETR_TREE,
        CHAIN_APPROX_SIMPLE,
        Point::new(0, 0),
    )?;
    Ok(contours)
}

/// Maps the largest moving area to a 0..=1 score; a tenth of the frame saturates it.
fn confidence(largest_area: f64, frame_area: f64) -> f64 {
    if frame_area <= 0.0 {
        return 0.0;
    }
    (largest_area / frame_area * 10.0).min(1.0)
}

impl MotionSink {
    pub fn new(cfg: &DetectionConfig) -> Self {
        Self {
            previous: Mutex::new(HashMap::new()),
            min_area: cfg.min_area,
            label: cfg.label.clone(),
            draw_rectangles: cfg.draw_rectangles,
        }
    }

    /// Returns the contours whose area passes the threshold and the largest area seen.
    fn moving_contours(&self, previous: &Frame, current: &Frame) -> opencv::Result<(Contours, f64)> {
        let delta = absdiff(previous.img(), current.img())?;
        let dilated = dilate(&threshold(&delta)?)?;

        let mut moving = Contours::new();
        let mut largest = 0.0_f64;
        for c in find_contours(&dilated)?.iter() {
            let area = imgproc::contour_area(&c, false)?;
            trace!("Contour area {}", area);
            if area >= self.min_area {
                largest = largest.max(area);
                moving.push(c);
            }
        }
        Ok((moving, largest))
    }
}

impl DetectionSink for MotionSink {
    fn process(&self, mut frame: Frame, camera_id: &str) -> anyhow::Result<Processed> {
        let current = frame.downsample()?;

        let previous = {
            let mut previous = self
                .previous
                .lock()
                .map_err(|_| anyhow::anyhow!("motion state lock poisoned"))?;
            previous.insert(camera_id.to_string(), current.try_clone()?)
        };

        let previous = match previous {
            Some(p) if p.width() == current.width() && p.height() == current.height() => p,
            _ => {
                return Ok(Processed {
                    frame,
                    detection: None,
                })
            }
        };

        let (contours, largest) = self.moving_contours(&previous, &current)?;
        if contours.is_empty() {
            return Ok(Processed {
                frame,
                detection: None,
            });
        }

        debug!("Motion detected on camera {}", camera_id);
        if self.draw_rectangles {
            draw_rectangles(&mut frame, &contours);
        }
        let frame_area = f64::from(frame.width()) * f64::from(frame.height());

        Ok(Processed {
            detection: Some(DetectionInfo {
                timestamp: Local::now(),
                weapon_type: self.label.clone(),
                confidence: confidence(largest, frame_area),
                camera_id: camera_id.to_string(),
            }),
            frame,
        })
    }

    fn reset(&self, camera_id: &str) {
        let mut previous = self.previous.lock().unwrap_or_else(PoisonError::into_inner);
        if previous.remove(camera_id).is_some() {
            trace!("Dropped motion reference for camera {}", camera_id);
        }
    }
}

fn draw_rectangles(frame: &mut Frame, contours: &Contours) {
    contours.iter().for_each(|ctr| {
        let rect = match bounding_rect(&ctr) {
            Ok(rect) => rect,
            Err(e) => {
                error!("Failed to get bounding rectangle: {}", e);
                return;
            }
        };

        if let Err(e) = rectangle(
            frame.img_mut(),
            rect,
            Scalar::new(0.0, 255.0, 0.0, 0.0),
            4,
            LINE_AA,
            0,
        ) {
            error!("Failed to draw bounding rectangle: {}", e);
        }
    });
}
