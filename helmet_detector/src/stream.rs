use crate::{
    cache::VerdictCache,
    pipeline::ImageReport,
    poller::{FrameSource, FrameSourceError},
    render::{render_jpeg, RenderError},
};
use bytes::Bytes;
use futures::stream;
use std::{sync::Arc, time::Duration};
use thiserror::Error;
use tokio::time::sleep;

pub const FRAME_BOUNDARY: &str = "frame";

/// MJPEG stream of live frames annotated with the latest cached verdicts.
#[derive(Clone)]
pub struct VideoStream {
    source: Arc<dyn FrameSource>,
    cache: Arc<VerdictCache>,
    video_stream_delay: u64,
    jpeg_quality: u8,
}

#[derive(Error, Debug)]
pub enum VideoStreamError {
    #[error("Frame source error: {0}")]
    FrameSource(#[from] FrameSourceError),
    #[error("Render error: {0}")]
    Render(#[from] RenderError),
    #[error("Http builder error: {0}")]
    HttpBuilderError(String),
    #[error("No camera is configured")]
    Unavailable,
}

impl VideoStream {
    pub fn new(
        source: Arc<dyn FrameSource>,
        cache: Arc<VerdictCache>,
        video_stream_delay: u64,
        jpeg_quality: u8,
    ) -> Self {
        Self {
            source,
            cache,
            video_stream_delay,
            jpeg_quality,
        }
    }

    async fn next_part(&self) -> Result<Option<Bytes>, VideoStreamError> {
        let Some(frame) = self.source.capture().await? else {
            return Ok(None);
        };

        let jpeg = match self.cache.latest() {
            Some(cached) => render_jpeg(&frame, &cached.report, self.jpeg_quality)?,
            None => render_jpeg(&frame, &ImageReport::new(Vec::new(), Vec::new()), self.jpeg_quality)?,
        };

        let part_header = format!(
            "--{}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
            FRAME_BOUNDARY,
            jpeg.len()
        );
        let mut body = part_header.into_bytes();
        body.extend_from_slice(&jpeg);
        body.extend_from_slice(b"\r\n");
        Ok(Some(Bytes::from(body)))
    }

    /// Runs until the client goes away or the source fails. Frames the source
    /// drops are skipped.
    pub fn generate_stream(self) -> impl futures::Stream<Item = Result<Bytes, VideoStreamError>> {
        stream::unfold(Some(self), |state| async move {
            let video = state?;
            loop {
                sleep(Duration::from_millis(video.video_stream_delay)).await;
                match video.next_part().await {
                    Ok(Some(part)) => return Some((Ok(part), Some(video))),
                    Ok(None) => tracing::debug!("No frame from source, waiting for the next one"),
                    Err(e) => {
                        tracing::error!("Error getting frame: {}", e);
                        return Some((Err(e), None));
                    }
                }
            }
        })
    }
}
