//! Guesses which registered exercise a stream of skeletons shows.
//!
//! The classifier keeps a sliding window of a few joint angles and scores each
//! exercise from the window's excursions:
//!
//! * kettlebell swing: a large spine excursion with both knees nearly straight
//!   and moving together;
//! * pistol squat: deep flexion of one knee while the other leg stays
//!   extended, i.e. strong left/right knee asymmetry.
//!
//! Confidence is the winning score scaled by how full the window is, so the
//! classifier cannot lock on a handful of frames.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::{
    exercise::ExerciseId,
    skeleton::{KeypointName, Skeleton},
};

/// Confidence at which the classifier stops updating.
pub const LOCK_CONFIDENCE: u8 = 70;

const WINDOW_FRAMES: usize = 90;
/// Frames needed before any guess is made.
const MIN_FRAMES: usize = 10;
/// Frames at which the window counts as full for confidence purposes.
const CONFIDENT_FRAMES: usize = 45;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DetectionResult {
    pub exercise: Option<ExerciseId>,
    /// 0..=100.
    pub confidence: u8,
}

#[derive(Debug, Clone, Copy)]
struct FrameFeatures {
    spine: f32,
    left_knee: f32,
    right_knee: f32,
}

impl FrameFeatures {
    fn extract(skeleton: &Skeleton) -> Option<Self> {
        Some(Self {
            spine: skeleton.spine_angle()?,
            left_knee: skeleton.knee_angle()?,
            right_knee: skeleton.angle(
                KeypointName::RightHip,
                KeypointName::RightKnee,
                KeypointName::RightAnkle,
            )?,
        })
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct WindowSummary {
    spine_range: f32,
    /// Deepest flexion of either knee, 0 when both stay straight.
    knee_bend: f32,
    /// Largest left/right knee angle difference.
    asymmetry: f32,
}

#[derive(Debug)]
pub struct ExerciseClassifier {
    window: VecDeque<FrameFeatures>,
    result: DetectionResult,
    locked: bool,
    manual_override: bool,
}

impl Default for ExerciseClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl ExerciseClassifier {
    pub fn new() -> Self {
        Self {
            window: VecDeque::with_capacity(WINDOW_FRAMES),
            result: DetectionResult::default(),
            locked: false,
            manual_override: false,
        }
    }

    /// Feeds one frame. Once locked the frame is ignored and the locked result
    /// is returned unchanged.
    pub fn process_frame(&mut self, skeleton: &Skeleton) -> DetectionResult {
        if self.locked {
            return self.result;
        }
        let Some(features) = FrameFeatures::extract(skeleton) else {
            return self.result;
        };

        if self.window.len() == WINDOW_FRAMES {
            self.window.pop_front();
        }
        self.window.push_back(features);

        self.result = self.classify();
        if self.result.exercise.is_some() && self.result.confidence >= LOCK_CONFIDENCE {
            self.locked = true;
            tracing::info!(
                exercise = ?self.result.exercise,
                confidence = self.result.confidence,
                "exercise classifier locked"
            );
        }
        self.result
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn result(&self) -> DetectionResult {
        self.result
    }

    pub fn is_manual_override(&self) -> bool {
        self.manual_override
    }

    /// Pins the exercise. The classifier locks at full confidence and the
    /// pipeline stops auto-switching.
    pub fn set_exercise_type(&mut self, exercise: ExerciseId) {
        self.result = DetectionResult {
            exercise: Some(exercise),
            confidence: 100,
        };
        self.locked = true;
        self.manual_override = true;
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    fn classify(&self) -> DetectionResult {
        if self.window.len() < MIN_FRAMES {
            return DetectionResult::default();
        }
        let summary = self.summarize();

        let best = ExerciseId::ALL
            .iter()
            .map(|id| (*id, score(*id, &summary)))
            .fold(None::<(ExerciseId, f32)>, |best, candidate| match best {
                Some(b) if b.1 >= candidate.1 => Some(b),
                _ => Some(candidate),
            });

        match best {
            Some((exercise, score)) if score > 0.0 => {
                let fill = (self.window.len() as f32 / CONFIDENT_FRAMES as f32).min(1.0);
                DetectionResult {
                    exercise: Some(exercise),
                    confidence: (100.0 * score * fill).round().clamp(0.0, 100.0) as u8,
                }
            }
            _ => DetectionResult::default(),
        }
    }

    fn summarize(&self) -> WindowSummary {
        let mut spine_min = f32::MAX;
        let mut spine_max = f32::MIN;
        let mut knee_min = f32::MAX;
        let mut asymmetry = 0.0_f32;

        for frame in &self.window {
            spine_min = spine_min.min(frame.spine);
            spine_max = spine_max.max(frame.spine);
            knee_min = knee_min.min(frame.left_knee).min(frame.right_knee);
            asymmetry = asymmetry.max((frame.left_knee - frame.right_knee).abs());
        }

        WindowSummary {
            spine_range: (spine_max - spine_min).max(0.0),
            knee_bend: (180.0 - knee_min).max(0.0),
            asymmetry,
        }
    }
}

/// Linear ramp from 0 at `lo` to 1 at `hi`.
fn ramp(value: f32, lo: f32, hi: f32) -> f32 {
    ((value - lo) / (hi - lo)).clamp(0.0, 1.0)
}

fn score(exercise: ExerciseId, window: &WindowSummary) -> f32 {
    match exercise {
        ExerciseId::KettlebellSwing => {
            ramp(window.spine_range, 20.0, 60.0)
                * (1.0 - ramp(window.knee_bend, 45.0, 90.0))
                * (1.0 - ramp(window.asymmetry, 20.0, 50.0))
        }
        ExerciseId::PistolSquat => {
            ramp(window.asymmetry, 30.0, 80.0) * ramp(window.knee_bend, 45.0, 100.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{pistol_sequence, pose, reference_swings, PoseSpec};

    #[test]
    fn detects_and_locks_on_swings() {
        let mut classifier = ExerciseClassifier::new();
        let mut locked_at = None;
        for (i, spec) in reference_swings().poses.iter().enumerate() {
            classifier.process_frame(&pose(*spec));
            if classifier.is_locked() && locked_at.is_none() {
                locked_at = Some(i);
            }
        }
        let result = classifier.result();
        assert_eq!(result.exercise, Some(ExerciseId::KettlebellSwing));
        assert!(result.confidence >= LOCK_CONFIDENCE);
        assert!(!classifier.is_manual_override());
        let locked_at = locked_at.unwrap();
        assert!((20..60).contains(&locked_at), "locked at {locked_at}");
    }

    #[test]
    fn detects_pistol_squats() {
        let mut classifier = ExerciseClassifier::new();
        for spec in pistol_sequence(2) {
            classifier.process_frame(&pose(spec));
        }
        assert_eq!(classifier.result().exercise, Some(ExerciseId::PistolSquat));
        assert!(classifier.is_locked());
    }

    #[test]
    fn standing_still_is_not_classified() {
        let mut classifier = ExerciseClassifier::new();
        for _ in 0..120 {
            classifier.process_frame(&pose(PoseSpec::hinge(2.0, 5.0)));
        }
        assert_eq!(classifier.result(), DetectionResult::default());
        assert!(!classifier.is_locked());
    }

    #[test]
    fn needs_a_minimum_number_of_frames() {
        let mut classifier = ExerciseClassifier::new();
        for spine in [0.0, 70.0, 0.0, 70.0, 0.0] {
            classifier.process_frame(&pose(PoseSpec::hinge(spine, 90.0)));
        }
        assert_eq!(classifier.result().exercise, None);
    }

    #[test]
    fn frames_without_usable_keypoints_are_ignored() {
        let mut classifier = ExerciseClassifier::new();
        let result = classifier.process_frame(&Skeleton::new(std::iter::empty()));
        assert_eq!(result, DetectionResult::default());
    }

    #[test]
    fn manual_override_locks_and_ignores_later_frames() {
        let mut classifier = ExerciseClassifier::new();
        classifier.set_exercise_type(ExerciseId::PistolSquat);
        assert!(classifier.is_locked());
        assert!(classifier.is_manual_override());

        for spec in reference_swings().poses {
            classifier.process_frame(&pose(spec));
        }
        assert_eq!(
            classifier.result(),
            DetectionResult {
                exercise: Some(ExerciseId::PistolSquat),
                confidence: 100,
            }
        );

        classifier.reset();
        assert!(!classifier.is_locked());
        assert!(!classifier.is_manual_override());
    }
}
