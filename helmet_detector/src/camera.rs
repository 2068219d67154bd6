use crate::{
    config::CameraConfig,
    poller::{FrameSource, FrameSourceError},
};
use async_trait::async_trait;
use image::RgbImage;
use opencv::{core::Mat, imgproc, prelude::*, videoio};
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("No camera found among device indices {0:?}")]
    NotFound(Vec<i32>),
    #[error("Failed to read frame: {0}")]
    ReadFrameFailed(opencv::Error),
    #[error("Failed to convert frame: {0}")]
    ConvertFrameFailed(String),
    #[error("OpenCV error: {0}")]
    OpenCvError(#[from] opencv::Error),
}

impl From<CameraError> for FrameSourceError {
    fn from(err: CameraError) -> Self {
        match err {
            CameraError::NotFound(_) => FrameSourceError::Open(err.to_string()),
            other => FrameSourceError::Read(other.to_string()),
        }
    }
}

pub struct Camera {
    capture: Mutex<videoio::VideoCapture>,
}

impl Camera {
    /// Opens the configured device, or the first working index below
    /// `probe_limit` when none is configured.
    pub async fn open(config: &CameraConfig) -> Result<Self, CameraError> {
        let candidates: Vec<i32> = match config.device_index {
            Some(index) => vec![index],
            None => (0..config.probe_limit.max(1)).collect(),
        };

        for &index in &candidates {
            tracing::debug!("Trying camera index {}", index);
            let mut capture = match videoio::VideoCapture::new(index, videoio::CAP_ANY) {
                Ok(capture) => capture,
                Err(e) => {
                    tracing::debug!("Camera index {} unavailable: {}", index, e);
                    continue;
                }
            };
            if !capture.is_opened()? {
                capture.release()?;
                continue;
            }

            capture.set(videoio::CAP_PROP_FRAME_WIDTH, config.frame_width as f64)?;
            capture.set(videoio::CAP_PROP_FRAME_HEIGHT, config.frame_height as f64)?;
            tracing::info!("Camera opened on index {}", index);

            return Ok(Self {
                capture: Mutex::new(capture),
            });
        }

        Err(CameraError::NotFound(candidates))
    }

    pub async fn capture_frame(&self) -> Result<Option<RgbImage>, CameraError> {
        let mut cam = self.capture.lock().await;
        let mut frame = Mat::default();
        let grabbed = cam.read(&mut frame).map_err(CameraError::ReadFrameFailed)?;
        if !grabbed || frame.empty() {
            return Ok(None);
        }
        drop(cam);

        mat_to_rgb(&frame).map(Some)
    }
}

fn mat_to_rgb(frame: &Mat) -> Result<RgbImage, CameraError> {
    let mut rgb = Mat::default();
    imgproc::cvt_color_def(frame, &mut rgb, imgproc::COLOR_BGR2RGB)?;

    let (width, height) = (rgb.cols() as u32, rgb.rows() as u32);
    let bytes = rgb.data_bytes()?.to_vec();
    RgbImage::from_raw(width, height, bytes).ok_or_else(|| {
        CameraError::ConvertFrameFailed(format!("unexpected buffer size for {width}x{height}"))
    })
}

#[async_trait]
impl FrameSource for Camera {
    async fn capture(&self) -> Result<Option<RgbImage>, FrameSourceError> {
        Ok(self.capture_frame().await?)
    }
}
