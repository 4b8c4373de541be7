//! Synthetic skeleton sequences with known ground truth.
//!
//! Poses are built in a side view from joint angles so tests can reason about
//! the exact values the analyzer will see.

use std::collections::VecDeque;

use async_trait::async_trait;

use crate::{
    recording::{KeypointFormat, PrecomputedAngles, RecordedFrame, Recording, RecordingMetadata},
    skeleton::{Keypoint, KeypointName, RawKeypoint, Skeleton},
    source::{PoseEstimator, VideoFrame},
    Result,
};

pub const FPS: f64 = 30.0;

const HIP: (f32, f32) = (0.5, 0.55);
const TORSO: f32 = 0.3;
const HEAD: f32 = 0.1;
const UPPER_ARM: f32 = 0.14;
const ARM: f32 = 0.28;
const THIGH: f32 = 0.25;
const SHIN: f32 = 0.24;
const CONFIDENCE: f32 = 0.9;

/// Joint configuration of one synthetic frame, in degrees.
#[derive(Debug, Clone, Copy)]
pub struct PoseSpec {
    /// Forward lean of the torso from vertical.
    pub spine: f32,
    /// Shoulder-to-wrist direction measured from straight up, forward side.
    pub arm: f32,
    /// Thigh direction measured from straight down, forward positive.
    pub left_thigh: f32,
    /// Interior knee angle, 180 is straight.
    pub left_knee: f32,
    pub right_thigh: f32,
    pub right_knee: f32,
}

impl PoseSpec {
    /// Straight legs with the torso hinged forward.
    pub fn hinge(spine: f32, arm: f32) -> Self {
        Self {
            spine,
            arm,
            left_thigh: 0.0,
            left_knee: 180.0,
            right_thigh: 0.0,
            right_knee: 180.0,
        }
    }

    /// Single-leg squat on the left leg with the right leg held out in front.
    /// `depth` runs from 0 (standing) to 1 (full depth).
    pub fn pistol(depth: f32) -> Self {
        Self {
            spine: 10.0 + 30.0 * depth,
            arm: 180.0 - 90.0 * depth,
            left_thigh: 75.0 * depth,
            left_knee: 180.0 - 125.0 * depth,
            right_thigh: 85.0,
            right_knee: 175.0,
        }
    }
}

fn direction_from_up(degrees: f32) -> (f32, f32) {
    let r = degrees.to_radians();
    (r.sin(), -r.cos())
}

fn direction_from_down(degrees: f32) -> (f32, f32) {
    let r = degrees.to_radians();
    (r.sin(), r.cos())
}

fn offset(origin: (f32, f32), dir: (f32, f32), length: f32) -> (f32, f32) {
    (origin.0 + dir.0 * length, origin.1 + dir.1 * length)
}

fn leg(thigh: f32, knee: f32) -> ((f32, f32), (f32, f32)) {
    let knee_point = offset(HIP, direction_from_down(thigh), THIGH);
    let shin = direction_from_down(thigh - (180.0 - knee));
    (knee_point, offset(knee_point, shin, SHIN))
}

pub fn pose(spec: PoseSpec) -> Skeleton {
    let torso = direction_from_up(spec.spine);
    let shoulder = offset(HIP, torso, TORSO);
    let head = offset(shoulder, torso, HEAD);
    let arm = direction_from_up(spec.arm);
    let elbow = offset(shoulder, arm, UPPER_ARM);
    let wrist = offset(shoulder, arm, ARM);
    let (left_knee, left_ankle) = leg(spec.left_thigh, spec.left_knee);
    let (right_knee, right_ankle) = leg(spec.right_thigh, spec.right_knee);

    let at = |p: (f32, f32)| Keypoint::new(p.0, p.1, CONFIDENCE);
    Skeleton::new([
        (KeypointName::Nose, at(head)),
        (KeypointName::LeftEye, at(head)),
        (KeypointName::RightEye, at(head)),
        (KeypointName::LeftEar, at(head)),
        (KeypointName::RightEar, at(head)),
        (KeypointName::LeftShoulder, at(shoulder)),
        (KeypointName::RightShoulder, at(shoulder)),
        (KeypointName::LeftElbow, at(elbow)),
        (KeypointName::RightElbow, at(elbow)),
        (KeypointName::LeftWrist, at(wrist)),
        (KeypointName::RightWrist, at(wrist)),
        (KeypointName::LeftHip, at(HIP)),
        (KeypointName::RightHip, at(HIP)),
        (KeypointName::LeftKnee, at(left_knee)),
        (KeypointName::RightKnee, at(right_knee)),
        (KeypointName::LeftAnkle, at(left_ankle)),
        (KeypointName::RightAnkle, at(right_ankle)),
    ])
}

/// Frames per synthetic swing.
pub const SWING_FRAMES: usize = 40;
/// Frames of standing at the top before the first swing.
pub const LEAD_IN_FRAMES: usize = 4;

/// A kettlebell swing sequence plus the frame index of each rep's deepest
/// hinge.
pub struct SwingSequence {
    pub poses: Vec<PoseSpec>,
    pub bottoms: Vec<usize>,
}

/// One swing per amplitude. The spine follows a raised cosine from 0 up to
/// the amplitude and back, the arms rise to horizontal at the top.
pub fn swing_sequence(amplitudes: &[f32]) -> SwingSequence {
    let mut poses: Vec<PoseSpec> = (0..LEAD_IN_FRAMES)
        .map(|_| PoseSpec::hinge(0.0, 90.0))
        .collect();
    let mut bottoms = Vec::new();

    for amplitude in amplitudes {
        bottoms.push(poses.len() + SWING_FRAMES / 2);
        for k in 0..SWING_FRAMES {
            let theta = 2.0 * std::f32::consts::PI * k as f32 / SWING_FRAMES as f32;
            let spine = amplitude * 0.5 * (1.0 - theta.cos());
            poses.push(PoseSpec::hinge(spine, 90.0 + spine));
        }
    }

    SwingSequence { poses, bottoms }
}

/// The four-rep reference swing set: 164 frames at 30 fps.
pub fn reference_swings() -> SwingSequence {
    swing_sequence(&[80.0, 84.0, 78.0, 82.0])
}

pub fn pistol_sequence(reps: usize) -> Vec<PoseSpec> {
    const REP_FRAMES: usize = 60;
    let mut poses = Vec::new();
    for _ in 0..reps {
        for k in 0..REP_FRAMES {
            let theta = 2.0 * std::f32::consts::PI * k as f32 / REP_FRAMES as f32;
            poses.push(PoseSpec::pistol(0.5 * (1.0 - theta.cos())));
        }
    }
    poses
}

pub fn timestamp_ms(index: usize) -> f64 {
    index as f64 * 1000.0 / FPS
}

pub fn video_time(index: usize) -> f64 {
    index as f64 / FPS
}

pub fn raw_keypoints(spec: PoseSpec) -> Vec<RawKeypoint> {
    pose(spec).to_raw()
}

/// Metadata of a 30 fps COCO-17 recording of `frame_count` frames.
pub fn metadata(frame_count: usize) -> RecordingMetadata {
    RecordingMetadata {
        version: "1.0".to_string(),
        model: "movenet".to_string(),
        model_version: "lightning-4".to_string(),
        keypoint_format: KeypointFormat::Coco17,
        keypoint_count: KeypointName::COUNT,
        source_video_hash: "0123456789abcdef".repeat(4),
        source_video_name: "swings.mp4".to_string(),
        source_video_duration: 0.0,
        extracted_at: "2024-05-01T12:00:00Z".to_string(),
        frame_count,
        fps: FPS,
        video_width: 1280,
        video_height: 720,
    }
}

pub fn recording_from_poses(poses: &[PoseSpec]) -> Recording {
    let frames = poses
        .iter()
        .enumerate()
        .map(|(i, spec)| {
            let skeleton = pose(*spec);
            RecordedFrame {
                frame_index: i,
                timestamp: timestamp_ms(i),
                video_time: video_time(i),
                keypoints: skeleton.to_raw(),
                score: CONFIDENCE,
                angles: Some(PrecomputedAngles::from_skeleton(&skeleton)),
            }
        })
        .collect();
    Recording {
        metadata: metadata(poses.len()),
        frames,
    }
}

/// Blank 2x2 frames at 30 fps.
pub fn video_frames(count: usize) -> Vec<VideoFrame> {
    (0..count)
        .map(|i| VideoFrame::new(timestamp_ms(i), 2, 2, vec![0u8; 16]).with_video_time(video_time(i)))
        .collect()
}

/// Replays a fixed list of estimator answers, then repeats `fallback` (an
/// empty pose unless set).
#[derive(Debug, Default)]
pub struct ScriptedEstimator {
    script: VecDeque<Result<Vec<RawKeypoint>>>,
    fallback: Vec<RawKeypoint>,
    calls: usize,
}

impl ScriptedEstimator {
    pub fn new(script: Vec<Result<Vec<RawKeypoint>>>) -> Self {
        Self {
            script: script.into(),
            ..Self::default()
        }
    }

    pub fn from_poses(poses: &[PoseSpec]) -> Self {
        Self::new(poses.iter().map(|spec| Ok(raw_keypoints(*spec))).collect())
    }

    pub fn repeating(keypoints: Vec<RawKeypoint>) -> Self {
        Self {
            fallback: keypoints,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls
    }
}

#[async_trait]
impl PoseEstimator for ScriptedEstimator {
    async fn estimate(&mut self, _frame: &VideoFrame) -> Result<Vec<RawKeypoint>> {
        self.calls += 1;
        match self.script.pop_front() {
            Some(answer) => answer,
            None => Ok(self.fallback.clone()),
        }
    }
}
