//! One frame's keypoints and the angle computations derived from them.
//!
//! Coordinates follow the image convention used by every pose estimator we
//! consume: `x` grows to the right and `y` grows downwards, so "up" is `-y`.
//! Angles are reported in degrees.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{AnalyzerError, Result};

/// Keypoints below this confidence are treated as missing.
pub const MIN_KEYPOINT_CONFIDENCE: f32 = 0.3;

/// A skeleton needs at least this many confident keypoints to be usable.
pub const MIN_USABLE_KEYPOINTS: usize = 8;

/// Segments shorter than this have no direction.
const NORM_EPSILON: f32 = 1e-6;

/// COCO-17 landmark names, the canonical naming scheme of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeypointName {
    Nose,
    LeftEye,
    RightEye,
    LeftEar,
    RightEar,
    LeftShoulder,
    RightShoulder,
    LeftElbow,
    RightElbow,
    LeftWrist,
    RightWrist,
    LeftHip,
    RightHip,
    LeftKnee,
    RightKnee,
    LeftAnkle,
    RightAnkle,
}

/// BlazePose-33 landmark indices that have a COCO-17 counterpart.
const BLAZEPOSE_TO_COCO: [(usize, KeypointName); KeypointName::COUNT] = [
    (0, KeypointName::Nose),
    (2, KeypointName::LeftEye),
    (5, KeypointName::RightEye),
    (7, KeypointName::LeftEar),
    (8, KeypointName::RightEar),
    (11, KeypointName::LeftShoulder),
    (12, KeypointName::RightShoulder),
    (13, KeypointName::LeftElbow),
    (14, KeypointName::RightElbow),
    (15, KeypointName::LeftWrist),
    (16, KeypointName::RightWrist),
    (23, KeypointName::LeftHip),
    (24, KeypointName::RightHip),
    (25, KeypointName::LeftKnee),
    (26, KeypointName::RightKnee),
    (27, KeypointName::LeftAnkle),
    (28, KeypointName::RightAnkle),
];

const BLAZEPOSE_COUNT: usize = 33;

impl KeypointName {
    pub const COUNT: usize = 17;

    pub const ALL: [KeypointName; KeypointName::COUNT] = [
        Self::Nose,
        Self::LeftEye,
        Self::RightEye,
        Self::LeftEar,
        Self::RightEar,
        Self::LeftShoulder,
        Self::RightShoulder,
        Self::LeftElbow,
        Self::RightElbow,
        Self::LeftWrist,
        Self::RightWrist,
        Self::LeftHip,
        Self::RightHip,
        Self::LeftKnee,
        Self::RightKnee,
        Self::LeftAnkle,
        Self::RightAnkle,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Nose => "nose",
            Self::LeftEye => "left_eye",
            Self::RightEye => "right_eye",
            Self::LeftEar => "left_ear",
            Self::RightEar => "right_ear",
            Self::LeftShoulder => "left_shoulder",
            Self::RightShoulder => "right_shoulder",
            Self::LeftElbow => "left_elbow",
            Self::RightElbow => "right_elbow",
            Self::LeftWrist => "left_wrist",
            Self::RightWrist => "right_wrist",
            Self::LeftHip => "left_hip",
            Self::RightHip => "right_hip",
            Self::LeftKnee => "left_knee",
            Self::RightKnee => "right_knee",
            Self::LeftAnkle => "left_ankle",
            Self::RightAnkle => "right_ankle",
        }
    }

    /// Parses a COCO-17 or BlazePose-33 landmark name. BlazePose-only
    /// landmarks (`left_heel`, `mouth_left`, ...) have no counterpart and
    /// yield `None`.
    pub fn parse(name: &str) -> Option<Self> {
        let name = name.trim();
        Self::ALL
            .iter()
            .copied()
            .find(|candidate| candidate.as_str().eq_ignore_ascii_case(name))
    }

    pub fn from_coco_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn from_blazepose_index(index: usize) -> Option<Self> {
        BLAZEPOSE_TO_COCO
            .iter()
            .find(|(blazepose, _)| *blazepose == index)
            .map(|(_, name)| *name)
    }

    fn slot(self) -> usize {
        self as usize
    }
}

impl fmt::Display for KeypointName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// A single landmark. Immutable once the frame has been built.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Keypoint {
    pub x: f32,
    pub y: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub z: Option<f32>,
    #[serde(rename = "score")]
    pub confidence: f32,
}

impl Keypoint {
    pub fn new(x: f32, y: f32, confidence: f32) -> Self {
        Self {
            x,
            y,
            z: None,
            confidence,
        }
    }

    /// Whether the estimator was confident enough about this landmark.
    pub fn is_confident(&self) -> bool {
        self.confidence >= MIN_KEYPOINT_CONFIDENCE
    }
}

/// Keypoint as emitted by a pose estimator or stored in a recording. The name
/// is optional; unnamed keypoints are resolved by their position in the list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawKeypoint {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub x: f32,
    pub y: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub z: Option<f32>,
    pub score: f32,
}

impl RawKeypoint {
    pub fn named(name: KeypointName, keypoint: Keypoint) -> Self {
        Self {
            name: Some(name.as_str().to_string()),
            x: keypoint.x,
            y: keypoint.y,
            z: keypoint.z,
            score: keypoint.confidence,
        }
    }

    fn keypoint(&self) -> Keypoint {
        Keypoint {
            x: self.x,
            y: self.y,
            z: self.z,
            confidence: self.score,
        }
    }
}

/// Convenience angles with fixed keypoint compositions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuiltinAngle {
    /// Lean of the hip-to-shoulder line away from vertical. 0 is upright,
    /// 90 is horizontal; never negative.
    Spine,
    /// Angle of the shoulder-to-wrist line from vertical. 180 is hanging
    /// straight down, 90 is horizontal.
    ArmToVertical,
    ArmToSpine,
    /// Knee, hip, shoulder on the left side.
    Hip,
    /// Hip, knee, ankle on the left side.
    Knee,
    /// Shoulder midpoint `y` minus mean wrist `y`, positive when the wrists are
    /// above the shoulders. In coordinate units rather than degrees.
    WristHeight,
}

/// The full keypoint set for one frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Skeleton {
    keypoints: [Option<Keypoint>; KeypointName::COUNT],
}

impl Skeleton {
    pub fn new<I>(keypoints: I) -> Self
    where
        I: IntoIterator<Item = (KeypointName, Keypoint)>,
    {
        let mut slots = [None; KeypointName::COUNT];
        for (name, keypoint) in keypoints {
            slots[name.slot()] = Some(keypoint);
        }
        Self { keypoints: slots }
    }

    /// Builds a skeleton from estimator output. Named keypoints are matched by
    /// name; unnamed ones by COCO-17 index, or BlazePose-33 index when the list
    /// has 33 entries. An empty list, or one where every keypoint has zero
    /// confidence, means no person was detected.
    pub fn from_raw(raw: &[RawKeypoint]) -> Option<Self> {
        if raw.iter().all(|kp| kp.score <= 0.0) {
            return None;
        }

        let blazepose_layout = raw.len() == BLAZEPOSE_COUNT;
        let mut slots: [Option<Keypoint>; KeypointName::COUNT] = [None; KeypointName::COUNT];
        for (index, keypoint) in raw.iter().enumerate() {
            let name = match keypoint.name.as_deref() {
                Some(name) => KeypointName::parse(name),
                None if blazepose_layout => KeypointName::from_blazepose_index(index),
                None => KeypointName::from_coco_index(index),
            };
            if let Some(name) = name {
                let slot = &mut slots[name.slot()];
                if slot.is_none() {
                    *slot = Some(keypoint.keypoint());
                }
            }
        }

        Some(Self { keypoints: slots })
    }

    pub fn keypoint(&self, name: KeypointName) -> Option<&Keypoint> {
        self.keypoints[name.slot()].as_ref()
    }

    pub fn keypoints(&self) -> impl Iterator<Item = (KeypointName, &Keypoint)> {
        KeypointName::ALL
            .iter()
            .zip(self.keypoints.iter())
            .filter_map(|(name, keypoint)| keypoint.as_ref().map(|kp| (*name, kp)))
    }

    /// Exports the keypoints in COCO-17 order, the layout recordings use.
    pub fn to_raw(&self) -> Vec<RawKeypoint> {
        self.keypoints()
            .map(|(name, keypoint)| RawKeypoint::named(name, *keypoint))
            .collect()
    }

    pub fn confident_count(&self) -> usize {
        self.keypoints
            .iter()
            .flatten()
            .filter(|kp| kp.is_confident())
            .count()
    }

    /// Enough confident keypoints are present for analysis to be meaningful.
    pub fn is_usable(&self) -> bool {
        self.confident_count() >= MIN_USABLE_KEYPOINTS
    }

    /// Rejects frames carrying NaN or infinite coordinates.
    pub fn ensure_finite(&self) -> Result<()> {
        for (name, keypoint) in self.keypoints() {
            if !keypoint.x.is_finite() || !keypoint.y.is_finite() || !keypoint.confidence.is_finite()
            {
                return Err(AnalyzerError::InvalidFrame(format!(
                    "keypoint `{name}` has non-finite data"
                )));
            }
        }
        Ok(())
    }

    /// Angle at `vertex` between `point1` and `point2`, or `None` when any of
    /// the three is missing, below the confidence floor, or sits on the vertex.
    pub fn angle(&self, point1: KeypointName, vertex: KeypointName, point2: KeypointName) -> Option<f32> {
        let a = self.confident(point1)?;
        let v = self.confident(vertex)?;
        let b = self.confident(point2)?;
        angle_between(a.sub(v), b.sub(v))
    }

    pub fn builtin(&self, angle: BuiltinAngle) -> Option<f32> {
        match angle {
            BuiltinAngle::Spine => self.spine_angle(),
            BuiltinAngle::ArmToVertical => self.arm_to_vertical_angle(),
            BuiltinAngle::ArmToSpine => self.arm_to_spine_angle(),
            BuiltinAngle::Hip => self.hip_angle(),
            BuiltinAngle::Knee => self.knee_angle(),
            BuiltinAngle::WristHeight => self.wrist_height(),
        }
    }

    pub fn spine_angle(&self) -> Option<f32> {
        angle_between(self.spine_vector()?, UP)
    }

    pub fn arm_to_vertical_angle(&self) -> Option<f32> {
        angle_between(self.arm_vector()?, UP)
    }

    pub fn arm_to_spine_angle(&self) -> Option<f32> {
        angle_between(self.arm_vector()?, self.spine_vector()?)
    }

    pub fn hip_angle(&self) -> Option<f32> {
        self.angle(
            KeypointName::LeftKnee,
            KeypointName::LeftHip,
            KeypointName::LeftShoulder,
        )
    }

    pub fn knee_angle(&self) -> Option<f32> {
        self.angle(
            KeypointName::LeftHip,
            KeypointName::LeftKnee,
            KeypointName::LeftAnkle,
        )
    }

    pub fn wrist_height(&self) -> Option<f32> {
        let shoulders = self.midpoint(KeypointName::LeftShoulder, KeypointName::RightShoulder)?;
        let wrists = self.midpoint(KeypointName::LeftWrist, KeypointName::RightWrist)?;
        Some(shoulders.1 - wrists.1)
    }

    fn confident(&self, name: KeypointName) -> Option<Point> {
        self.keypoint(name)
            .filter(|kp| kp.is_confident())
            .map(|kp| (kp.x, kp.y))
    }

    fn midpoint(&self, left: KeypointName, right: KeypointName) -> Option<Point> {
        let l = self.confident(left)?;
        let r = self.confident(right)?;
        Some(((l.0 + r.0) * 0.5, (l.1 + r.1) * 0.5))
    }

    fn spine_vector(&self) -> Option<Point> {
        let shoulders = self.midpoint(KeypointName::LeftShoulder, KeypointName::RightShoulder)?;
        let hips = self.midpoint(KeypointName::LeftHip, KeypointName::RightHip)?;
        Some(shoulders.sub(hips))
    }

    fn arm_vector(&self) -> Option<Point> {
        let shoulders = self.midpoint(KeypointName::LeftShoulder, KeypointName::RightShoulder)?;
        let wrist = self.confident(KeypointName::LeftWrist)?;
        Some(wrist.sub(shoulders))
    }
}

type Point = (f32, f32);

const UP: Point = (0.0, -1.0);

trait PointExt {
    fn sub(self, other: Point) -> Point;
}

impl PointExt for Point {
    fn sub(self, other: Point) -> Point {
        (self.0 - other.0, self.1 - other.1)
    }
}

/// Unsigned angle between two vectors in degrees, independent of their
/// length. `None` if either vector is degenerate.
fn angle_between(a: Point, b: Point) -> Option<f32> {
    let norm_a = a.0.hypot(a.1);
    let norm_b = b.0.hypot(b.1);
    if norm_a < NORM_EPSILON || norm_b < NORM_EPSILON {
        return None;
    }
    let dot = a.0 * b.0 + a.1 * b.1;
    let cos = (dot / (norm_a * norm_b)).clamp(-1.0, 1.0);
    Some(cos.acos().to_degrees())
}
