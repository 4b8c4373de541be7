//! Recorded pose tracks (`.posetrack.json`) and their extraction from video.
//!
//! A recording is validated as a whole before any of its frames reaches an
//! analyzer. Precomputed angles are kept for display; analysis always works
//! from the keypoints.

use std::path::Path;

use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::{
    skeleton::{KeypointName, RawKeypoint, Skeleton},
    source::{PoseEstimator, VideoFrame},
    AnalyzerError, Result,
};

pub const FORMAT_VERSION: &str = "1.0";
pub const SUPPORTED_MODELS: [&str; 2] = ["blazepose", "movenet"];

const HASH_HEX_LEN: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeypointFormat {
    #[serde(rename = "coco-17")]
    Coco17,
    #[serde(rename = "blazepose-33")]
    Blazepose33,
}

impl KeypointFormat {
    pub fn keypoint_count(self) -> usize {
        match self {
            Self::Coco17 => 17,
            Self::Blazepose33 => 33,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingMetadata {
    pub version: String,
    pub model: String,
    pub model_version: String,
    pub keypoint_format: KeypointFormat,
    pub keypoint_count: usize,
    /// Lowercase hex SHA-256 of the source video.
    pub source_video_hash: String,
    pub source_video_name: String,
    /// Seconds.
    pub source_video_duration: f64,
    /// RFC 3339 timestamp of the extraction run.
    pub extracted_at: String,
    pub frame_count: usize,
    pub fps: f64,
    pub video_width: u32,
    pub video_height: u32,
}

/// Angles stored alongside each frame for overlays.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrecomputedAngles {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spine_angle: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arm_to_spine_angle: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arm_to_vertical_angle: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hip_angle: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub knee_angle: Option<f32>,
}

impl PrecomputedAngles {
    pub fn from_skeleton(skeleton: &Skeleton) -> Self {
        Self {
            spine_angle: skeleton.spine_angle(),
            arm_to_spine_angle: skeleton.arm_to_spine_angle(),
            arm_to_vertical_angle: skeleton.arm_to_vertical_angle(),
            hip_angle: skeleton.hip_angle(),
            knee_angle: skeleton.knee_angle(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordedFrame {
    pub frame_index: usize,
    /// Milliseconds since the start of the video.
    pub timestamp: f64,
    /// Seconds since the start of the video.
    pub video_time: f64,
    pub keypoints: Vec<RawKeypoint>,
    /// Mean keypoint confidence.
    pub score: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub angles: Option<PrecomputedAngles>,
}

impl RecordedFrame {
    /// The frame's skeleton, or `None` when no person was detected.
    pub fn skeleton(&self) -> Option<Skeleton> {
        Skeleton::from_raw(&self.keypoints)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recording {
    pub metadata: RecordingMetadata,
    pub frames: Vec<RecordedFrame>,
}

impl Recording {
    /// Parses and validates a recording.
    pub fn from_json(text: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(text)
            .map_err(|err| AnalyzerError::invalid_recording(format!("not JSON: {err}")))?;

        match value.get("frames") {
            Some(frames) if frames.is_array() => {}
            Some(_) => return Err(AnalyzerError::invalid_recording("`frames` is not an array")),
            None => return Err(AnalyzerError::invalid_recording("missing `frames`")),
        }

        let recording: Recording = serde_json::from_value(value)
            .map_err(|err| AnalyzerError::invalid_recording(err.to_string()))?;
        recording.validate()?;
        Ok(recording)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let recording = Self::from_json(&text).map_err(|err| {
            tracing::warn!(path = %path.display(), error = %err, "rejected recording");
            err
        })?;
        tracing::info!(
            path = %path.display(),
            frames = recording.frames.len(),
            fps = recording.metadata.fps,
            "loaded recording"
        );
        Ok(recording)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        let meta = &self.metadata;
        if meta.version != FORMAT_VERSION {
            return Err(AnalyzerError::invalid_recording(format!(
                "unsupported version `{}`",
                meta.version
            )));
        }
        if !SUPPORTED_MODELS.contains(&meta.model.as_str()) {
            return Err(AnalyzerError::invalid_recording(format!(
                "unsupported model `{}`",
                meta.model
            )));
        }
        if !is_sha256_hex(&meta.source_video_hash) {
            return Err(AnalyzerError::invalid_recording(
                "source video hash is not a SHA-256 hex digest",
            ));
        }
        if meta.frame_count != self.frames.len() {
            return Err(AnalyzerError::invalid_recording(format!(
                "frameCount is {} but {} frames are present",
                meta.frame_count,
                self.frames.len()
            )));
        }
        if !meta.fps.is_finite() || meta.fps <= 0.0 {
            return Err(AnalyzerError::invalid_recording(format!(
                "fps must be positive, got {}",
                meta.fps
            )));
        }
        for pair in self.frames.windows(2) {
            if pair[1].frame_index <= pair[0].frame_index {
                return Err(AnalyzerError::invalid_recording(format!(
                    "frame index {} follows {}",
                    pair[1].frame_index, pair[0].frame_index
                )));
            }
        }
        Ok(())
    }

    pub fn fps(&self) -> f64 {
        self.metadata.fps
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Seconds covered by the recording.
    pub fn duration(&self) -> f64 {
        if self.metadata.source_video_duration > 0.0 {
            return self.metadata.source_video_duration;
        }
        self.frames.last().map(|f| f.video_time).unwrap_or(0.0)
    }
}

fn is_sha256_hex(hash: &str) -> bool {
    hash.len() == HASH_HEX_LEN && hash.chars().all(|c| matches!(c, '0'..='9' | 'a'..='f'))
}

/// Keypoints stored for frames in which no person was found.
fn zero_pose(format: KeypointFormat) -> Vec<RawKeypoint> {
    let zero = |name: Option<String>| RawKeypoint {
        name,
        x: 0.0,
        y: 0.0,
        z: None,
        score: 0.0,
    };
    match format {
        KeypointFormat::Coco17 => KeypointName::ALL
            .iter()
            .map(|name| zero(Some(name.as_str().to_string())))
            .collect(),
        KeypointFormat::Blazepose33 => (0..format.keypoint_count()).map(|_| zero(None)).collect(),
    }
}

/// Runs `estimator` over every frame of `frames` and collects a recording.
///
/// Cancelling `cancel` drops everything extracted so far and returns
/// [`AnalyzerError::Aborted`]. Estimator failures are stored as zero-pose
/// frames so frame indices stay contiguous.
pub async fn extract_recording<E, S>(
    estimator: &mut E,
    frames: S,
    mut metadata: RecordingMetadata,
    cancel: &CancellationToken,
) -> Result<Recording>
where
    E: PoseEstimator + ?Sized,
    S: Stream<Item = VideoFrame>,
{
    let mut frames = std::pin::pin!(frames);
    let mut extracted: Vec<RecordedFrame> = Vec::new();
    let format = metadata.keypoint_format;

    loop {
        let frame = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::info!(discarded = extracted.len(), "extraction cancelled");
                return Err(AnalyzerError::Aborted);
            }
            next = frames.next() => match next {
                Some(frame) => frame,
                None => break,
            },
        };

        let estimate = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::info!(discarded = extracted.len(), "extraction cancelled");
                return Err(AnalyzerError::Aborted);
            }
            estimate = estimator.estimate(&frame) => estimate,
        };

        let keypoints = match estimate {
            Ok(keypoints) if !keypoints.is_empty() => keypoints,
            Ok(_) => zero_pose(format),
            Err(err) => {
                tracing::warn!(timestamp = frame.timestamp, error = %err, "pose estimation failed");
                zero_pose(format)
            }
        };

        let score = if keypoints.is_empty() {
            0.0
        } else {
            keypoints.iter().map(|kp| kp.score).sum::<f32>() / keypoints.len() as f32
        };
        let mut recorded = RecordedFrame {
            frame_index: extracted.len(),
            timestamp: frame.timestamp,
            video_time: frame.video_time.unwrap_or(frame.timestamp / 1000.0),
            keypoints,
            score,
            angles: None,
        };
        recorded.angles = recorded
            .skeleton()
            .map(|skeleton| PrecomputedAngles::from_skeleton(&skeleton));
        extracted.push(recorded);
    }

    metadata.frame_count = extracted.len();
    metadata.keypoint_count = format.keypoint_count();
    let recording = Recording {
        metadata,
        frames: extracted,
    };
    recording.validate()?;
    tracing::info!(frames = recording.frames.len(), "extraction finished");
    Ok(recording)
}
