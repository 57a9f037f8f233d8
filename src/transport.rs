//! Async boundary between an HTTP layer and the blocking session.
//!
//! Every blocking session call runs on tokio's blocking pool with a deadline,
//! so a viewer that disconnects leaks at most one bounded wait.

use crate::config::CrabStreamConfig;
use crate::errors::CameraError;
use crate::session::CameraSession;
use crate::timing::FramePacer;
use bytes::Bytes;
use futures::stream::{self, Stream};
use std::time::Duration;

/// Multipart boundary used by the `/video` stream.
pub const MJPEG_BOUNDARY: &str = "frame";

pub fn mjpeg_content_type() -> String {
    format!("multipart/x-mixed-replace; boundary={MJPEG_BOUNDARY}")
}

/// Wrap one JPEG as a multipart part.
pub fn mjpeg_part(jpeg: &Bytes) -> Bytes {
    let header = format!(
        "--{boundary}\r\n\
         Content-Type: image/jpeg\r\n\
         Content-Length: {len}\r\n\
         \r\n",
        boundary = MJPEG_BOUNDARY,
        len = jpeg.len()
    );

    let mut part = Vec::with_capacity(header.len() + jpeg.len() + 2);
    part.extend_from_slice(header.as_bytes());
    part.extend_from_slice(jpeg);
    part.extend_from_slice(b"\r\n");
    Bytes::from(part)
}

/// Async handle over a [`CameraSession`].
#[derive(Clone)]
pub struct AsyncCamera {
    session: CameraSession,
    frame_timeout: Duration,
    still_timeout: Duration,
    stream_fps: u32,
}

impl AsyncCamera {
    pub fn new(
        session: CameraSession,
        frame_timeout: Duration,
        still_timeout: Duration,
        stream_fps: u32,
    ) -> Self {
        Self {
            session,
            frame_timeout,
            still_timeout,
            stream_fps,
        }
    }

    pub fn from_config(session: CameraSession, config: &CrabStreamConfig) -> Self {
        Self::new(
            session,
            config.session.frame_timeout(),
            config.session.still_timeout(),
            config.server.stream_fps,
        )
    }

    pub fn session(&self) -> &CameraSession {
        &self.session
    }

    pub async fn video_frame(&self) -> Result<Bytes, CameraError> {
        let session = self.session.clone();
        let timeout = self.frame_timeout;
        blocking(move || session.get_video_frame_timeout(timeout)).await
    }

    pub async fn still_image(&self) -> Result<Bytes, CameraError> {
        let session = self.session.clone();
        let timeout = self.still_timeout;
        blocking(move || session.get_still_image_timeout(timeout)).await
    }

    /// Paced multipart stream for one viewer.
    ///
    /// Each item is a complete part for the newest frame. The viewer keeps a
    /// cursor, so it never repeats a frame and skips frames it was too slow
    /// for. The stream ends after the first error.
    pub fn mjpeg_stream(&self) -> impl Stream<Item = Result<Bytes, CameraError>> + Send + 'static {
        let viewer = Viewer {
            session: self.session.clone(),
            timeout: self.frame_timeout,
            cursor: self.session.frame_cursor(),
            pacer: FramePacer::new(self.stream_fps),
        };

        stream::unfold(Some(viewer), |viewer| async move {
            let mut viewer = viewer?;
            viewer.pacer.tick().await;

            let session = viewer.session.clone();
            let (cursor, timeout) = (viewer.cursor, viewer.timeout);
            match blocking(move || session.get_video_frame_after(cursor, Some(timeout))).await {
                Ok((sequence, frame)) => {
                    viewer.cursor = sequence;
                    Some((Ok(mjpeg_part(&frame)), Some(viewer)))
                }
                Err(e) => {
                    log::info!("Ending MJPEG stream: {}", e);
                    Some((Err(e), None))
                }
            }
        })
    }
}

struct Viewer {
    session: CameraSession,
    timeout: Duration,
    cursor: u64,
    pacer: FramePacer,
}

async fn blocking<T, F>(f: F) -> Result<T, CameraError>
where
    F: FnOnce() -> Result<T, CameraError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await.map_err(|e| {
        CameraError::TransientCaptureFailure(format!("blocking camera task failed: {}", e))
    })?
}
