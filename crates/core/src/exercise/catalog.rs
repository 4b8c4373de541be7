use std::collections::BTreeSet;

use crate::skeleton::{BuiltinAngle, KeypointName};

use super::{
    AngleDefinition, AngleTarget, CycleDetectionConfig, ExerciseDefinition, ExerciseId,
    PhaseAffinity, PhaseDetectionConfig, PositionDefinition, QualityMetricDefinition, RepCriteria,
};

fn names(items: &[&str]) -> BTreeSet<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Hip-hinge swing. The spine lean drives both phase and cycle tracking: it
/// climbs towards horizontal as the bell passes between the legs and returns
/// to vertical at the float.
pub fn kettlebell_swing() -> ExerciseDefinition {
    ExerciseDefinition {
        id: ExerciseId::KettlebellSwing,
        display_name: "Kettlebell Swing".to_string(),
        angles: vec![
            AngleDefinition::builtin("spine", BuiltinAngle::Spine),
            AngleDefinition::builtin("arm", BuiltinAngle::ArmToVertical),
            AngleDefinition::builtin("hip", BuiltinAngle::Hip),
            AngleDefinition::joint(
                "knee",
                KeypointName::LeftHip,
                KeypointName::LeftKnee,
                KeypointName::LeftAnkle,
            ),
        ],
        positions: vec![
            PositionDefinition::new("top", PhaseAffinity::Any)
                .target("spine", AngleTarget::new(0.0, 12.0, 0.5))
                .target("arm", AngleTarget::new(90.0, 25.0, 0.5))
                .with_thumbnail(),
            PositionDefinition::new("connect", PhaseAffinity::Descend)
                .target("spine", AngleTarget::new(30.0, 12.0, 0.5))
                .target("arm", AngleTarget::new(120.0, 25.0, 0.5))
                .with_thumbnail(),
            PositionDefinition::new("bottom", PhaseAffinity::Descend)
                .target("spine", AngleTarget::new(80.0, 15.0, 0.7))
                .target("hip", AngleTarget::new(100.0, 20.0, 0.3))
                .with_thumbnail(),
            PositionDefinition::new("release", PhaseAffinity::Ascend)
                .target("spine", AngleTarget::new(35.0, 12.0, 0.5))
                .target("arm", AngleTarget::new(125.0, 25.0, 0.5))
                .with_thumbnail(),
        ],
        phase_detection: PhaseDetectionConfig {
            primary_angle: "spine".to_string(),
            phase_change_threshold: 1.5,
            increasing_is_descend: true,
        },
        cycle_detection: CycleDetectionConfig {
            primary_angle: "spine".to_string(),
            reset_threshold: 20.0,
            min_cycle_angle: 45.0,
        },
        rep_criteria: RepCriteria {
            required_positions: names(&["top", "bottom"]),
            completion_sequence: ["release".to_string(), "top".to_string()],
            min_rep_duration_ms: 600.0,
            max_rep_duration_ms: 4_000.0,
        },
        quality_metrics: vec![
            QualityMetricDefinition::new("hinge_pattern", 0.4),
            QualityMetricDefinition::new("depth", 0.3),
            QualityMetricDefinition::new("lockout", 0.3),
        ],
    }
}

/// Single-leg squat. Knee flexion drives the phase; the forward lean of the
/// torso, which only rises while the squat is deep, delimits cycles.
pub fn pistol_squat() -> ExerciseDefinition {
    ExerciseDefinition {
        id: ExerciseId::PistolSquat,
        display_name: "Pistol Squat".to_string(),
        angles: vec![
            AngleDefinition::joint(
                "knee",
                KeypointName::LeftHip,
                KeypointName::LeftKnee,
                KeypointName::LeftAnkle,
            ),
            AngleDefinition::builtin("hip", BuiltinAngle::Hip),
            AngleDefinition::builtin("spine", BuiltinAngle::Spine),
        ],
        positions: vec![
            PositionDefinition::new("standing", PhaseAffinity::Any)
                .target("knee", AngleTarget::new(175.0, 12.0, 0.6))
                .target("spine", AngleTarget::new(10.0, 12.0, 0.4))
                .with_thumbnail(),
            PositionDefinition::new("descent", PhaseAffinity::Descend)
                .target("knee", AngleTarget::new(120.0, 20.0, 0.7))
                .target("spine", AngleTarget::new(25.0, 15.0, 0.3)),
            PositionDefinition::new("bottom", PhaseAffinity::Descend)
                .target("knee", AngleTarget::new(60.0, 20.0, 0.7))
                .target("hip", AngleTarget::new(70.0, 25.0, 0.3))
                .with_thumbnail(),
            PositionDefinition::new("ascent", PhaseAffinity::Ascend)
                .target("knee", AngleTarget::new(120.0, 20.0, 0.7))
                .target("spine", AngleTarget::new(25.0, 15.0, 0.3)),
        ],
        phase_detection: PhaseDetectionConfig {
            primary_angle: "knee".to_string(),
            phase_change_threshold: 1.5,
            increasing_is_descend: false,
        },
        cycle_detection: CycleDetectionConfig {
            primary_angle: "spine".to_string(),
            reset_threshold: 15.0,
            min_cycle_angle: 25.0,
        },
        rep_criteria: RepCriteria {
            required_positions: names(&["bottom", "standing"]),
            completion_sequence: ["ascent".to_string(), "standing".to_string()],
            min_rep_duration_ms: 800.0,
            max_rep_duration_ms: 8_000.0,
        },
        quality_metrics: vec![
            QualityMetricDefinition::new("depth", 0.5),
            QualityMetricDefinition::new("torso_upright", 0.3),
            QualityMetricDefinition::new("squat_pattern", 0.2),
        ],
    }
}
