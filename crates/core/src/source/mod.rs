//! Collaborator contracts: where frames come from and how they become
//! keypoints. Neither the camera nor the pose model lives in this crate.

use std::{fmt, sync::Arc};

use async_trait::async_trait;

use crate::{skeleton::RawKeypoint, Result};

/// One captured image plus its position in time.
#[derive(Clone)]
pub struct VideoFrame {
    /// Milliseconds, monotonically increasing within one source.
    pub timestamp: f64,
    /// Seconds into the source video, when the frame comes from a file.
    pub video_time: Option<f64>,
    pub width: u32,
    pub height: u32,
    /// Packed RGBA.
    pub pixels: Arc<[u8]>,
}

impl VideoFrame {
    pub fn new(timestamp: f64, width: u32, height: u32, pixels: impl Into<Arc<[u8]>>) -> Self {
        Self {
            timestamp,
            video_time: None,
            width,
            height,
            pixels: pixels.into(),
        }
    }

    pub fn with_video_time(mut self, seconds: f64) -> Self {
        self.video_time = Some(seconds);
        self
    }
}

impl fmt::Debug for VideoFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VideoFrame")
            .field("timestamp", &self.timestamp)
            .field("video_time", &self.video_time)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.pixels.len())
            .finish()
    }
}

/// Pull-based frame access, e.g. the frame currently shown by a player.
pub trait FrameSource {
    /// `None` when no frame is available yet.
    fn current_frame(&mut self) -> Option<VideoFrame>;
}

/// The pose-estimation model.
///
/// An empty keypoint list means no person was found in the frame.
#[async_trait]
pub trait PoseEstimator: Send {
    async fn estimate(&mut self, frame: &VideoFrame) -> Result<Vec<RawKeypoint>>;
}
