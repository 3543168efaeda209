use chrono::{DateTime, Utc};
use opencv::{
    core::{Size_, Vector, BORDER_DEFAULT},
    imgcodecs::{imencode, IMWRITE_JPEG_QUALITY},
    imgproc::{cvt_color, gaussian_blur, COLOR_BGR2GRAY},
    prelude::*,
    Result,
};
use std::time::SystemTime;

/// A single decoded image with its capture time.
#[derive(Debug)]
pub struct Frame {
    img: Mat,
    time: DateTime<Utc>,
    height: u32,
    width: u32,
}

impl Frame {
    pub fn new(img: Mat, time: Option<DateTime<Utc>>) -> Result<Self> {
        let time = time.unwrap_or_else(|| SystemTime::now().into());
        let size = img.size()?;

        Ok(Self {
            time,
            width: size.width as u32,
            height: size.height as u32,
            img,
        })
    }

    pub fn img(&self) -> &Mat {
        &self.img
    }

    pub fn img_mut(&mut self) -> &mut Mat {
        &mut self.img
    }

    pub fn time(&self) -> DateTime<Utc> {
        self.time
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn try_clone(&self) -> Result<Frame> {
        Ok(Frame {
            img: self.img.try_clone()?,
            ..*self
        })
    }

    pub fn blur(&self) -> Result<Frame> {
        let mut blurred = Mat::default();
        gaussian_blur(
            &self.img,
            &mut blurred,
            Size_::new(21, 21),
            0.0,
            0.0,
            BORDER_DEFAULT,
        )?;
        Ok(Frame {
            img: blurred,
            ..*self
        })
    }

    pub fn grayscale(&self) -> Result<Frame> {
        let mut gray = Mat::default();
        cvt_color(&self.img, &mut gray, COLOR_BGR2GRAY, 0)?;
        Ok(Frame { img: gray, ..*self })
    }

    pub fn downsample(&self) -> Result<Frame> {
        self.grayscale()?.blur()
    }

    /// JPEG-encodes the image. `quality` is clamped to 1..=100.
    pub fn encode_jpeg(&self, quality: i32) -> Result<Vec<u8>> {
        let mut buf = Vector::<u8>::new();
        let params = Vector::<i32>::from_slice(&[IMWRITE_JPEG_QUALITY, quality.clamp(1, 100)]);
        imencode(".jpg", &self.img, &mut buf, &params)?;
        Ok(buf.to_vec())
    }
}
