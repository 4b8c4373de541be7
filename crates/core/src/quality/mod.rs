//! Form-quality scoring.
//!
//! Metric names are hard-mapped to score functions; the definition only picks
//! which metrics apply and how they are weighted. A name without a score
//! function scores 0.

use std::collections::BTreeMap;

use crate::exercise::{ExerciseDefinition, QualityMetricDefinition};

pub type AngleMap = BTreeMap<String, f32>;

/// Lean at which `lockout` bottoms out.
const LOCKOUT_LIMIT: f32 = 30.0;
/// Lean tolerated before `torso_upright` starts to drop.
const UPRIGHT_ALLOWANCE: f32 = 45.0;
/// Combined hip and knee flexion below which no movement pattern is scored.
const MIN_PATTERN_FLEXION: f32 = 10.0;
/// `depth` reaches 0 this many tolerances away from the ideal.
const DEPTH_TOLERANCES: f32 = 3.0;

/// Scores every configured metric for one frame.
pub fn score_all(definition: &ExerciseDefinition, angles: &AngleMap) -> BTreeMap<String, f32> {
    definition
        .quality_metrics
        .iter()
        .map(|metric| (metric.name.clone(), score_metric(metric, definition, angles)))
        .collect()
}

pub fn score_metric(
    metric: &QualityMetricDefinition,
    definition: &ExerciseDefinition,
    angles: &AngleMap,
) -> f32 {
    let raw = match metric.name.as_str() {
        "hinge_pattern" => hinge_share(angles),
        "squat_pattern" => hinge_share(angles).map(|hinge| 100.0 - hinge),
        "depth" => depth(definition, angles),
        "lockout" => angles
            .get("spine")
            .map(|spine| 100.0 * (1.0 - spine / LOCKOUT_LIMIT)),
        "torso_upright" => angles.get("spine").map(|spine| {
            let excess = (spine - UPRIGHT_ALLOWANCE).max(0.0);
            100.0 * (1.0 - excess / UPRIGHT_ALLOWANCE)
        }),
        _ => None,
    };

    match raw {
        Some(value) => value.clamp(metric.min, metric.max),
        None => 0.0,
    }
}

/// Weighted average of per-metric scores, each normalised to 0..100 with
/// lower-is-better metrics inverted. `None` when no weight is configured.
pub fn overall(definition: &ExerciseDefinition, scores: &BTreeMap<String, f32>) -> Option<f32> {
    let mut weighted = 0.0;
    let mut total_weight = 0.0;

    for metric in &definition.quality_metrics {
        let span = metric.max - metric.min;
        if metric.weight <= 0.0 || span <= f32::EPSILON {
            continue;
        }
        let value = scores.get(&metric.name).copied().unwrap_or(0.0);
        let mut normalised = ((value - metric.min) / span).clamp(0.0, 1.0);
        if !metric.higher_is_better {
            normalised = 1.0 - normalised;
        }
        weighted += metric.weight * normalised * 100.0;
        total_weight += metric.weight;
    }

    if total_weight > 0.0 {
        Some(weighted / total_weight)
    } else {
        None
    }
}

/// Share of hip flexion in total hip plus knee flexion, 0..100.
fn hinge_share(angles: &AngleMap) -> Option<f32> {
    let hip_flexion = (180.0 - angles.get("hip")?).max(0.0);
    let knee_flexion = (180.0 - angles.get("knee")?).max(0.0);
    let total = hip_flexion + knee_flexion;
    if total < MIN_PATTERN_FLEXION {
        return None;
    }
    Some(100.0 * hip_flexion / total)
}

/// Closeness of the depth angle to the `bottom` position's ideal. The cycle
/// angle is preferred, then the phase angle, whichever `bottom` targets.
fn depth(definition: &ExerciseDefinition, angles: &AngleMap) -> Option<f32> {
    let bottom = definition.position("bottom")?;
    let (angle, target) = [
        &definition.cycle_detection.primary_angle,
        &definition.phase_detection.primary_angle,
    ]
    .into_iter()
    .find_map(|name| bottom.targets.get(name).map(|target| (name, target)))?;

    let deviation = (angles.get(angle)? - target.ideal).abs();
    Some(100.0 * (1.0 - deviation / (DEPTH_TOLERANCES * target.tolerance)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exercise::{ExerciseId, ExerciseRegistry};

    fn angles(pairs: &[(&str, f32)]) -> AngleMap {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn hinge_and_squat_patterns_are_complementary() {
        let swing = ExerciseRegistry::global()
            .get(ExerciseId::KettlebellSwing)
            .unwrap();
        let frame = angles(&[("hip", 100.0), ("knee", 160.0), ("spine", 70.0)]);

        let hinge = score_metric(&QualityMetricDefinition::new("hinge_pattern", 1.0), &swing, &frame);
        let squat = score_metric(&QualityMetricDefinition::new("squat_pattern", 1.0), &swing, &frame);
        assert!((hinge - 80.0).abs() < 1e-3);
        assert!((hinge + squat - 100.0).abs() < 1e-3);
    }

    #[test]
    fn standing_still_scores_no_pattern() {
        let swing = ExerciseRegistry::global()
            .get(ExerciseId::KettlebellSwing)
            .unwrap();
        let frame = angles(&[("hip", 178.0), ("knee", 179.0)]);
        let hinge = score_metric(&QualityMetricDefinition::new("hinge_pattern", 1.0), &swing, &frame);
        assert_eq!(hinge, 0.0);
    }

    #[test]
    fn depth_peaks_at_the_bottom_ideal() {
        let swing = ExerciseRegistry::global()
            .get(ExerciseId::KettlebellSwing)
            .unwrap();
        let metric = QualityMetricDefinition::new("depth", 1.0);
        let at_ideal = score_metric(&metric, &swing, &angles(&[("spine", 80.0)]));
        let shallow = score_metric(&metric, &swing, &angles(&[("spine", 50.0)]));
        let upright = score_metric(&metric, &swing, &angles(&[("spine", 0.0)]));
        assert_eq!(at_ideal, 100.0);
        assert!(shallow < at_ideal && shallow > 0.0);
        assert_eq!(upright, 0.0);
    }

    #[test]
    fn depth_falls_back_to_the_phase_angle() {
        let pistol = ExerciseRegistry::global()
            .get(ExerciseId::PistolSquat)
            .unwrap();
        let metric = QualityMetricDefinition::new("depth", 1.0);
        let deep = score_metric(&metric, &pistol, &angles(&[("knee", 60.0), ("spine", 40.0)]));
        assert_eq!(deep, 100.0);
    }

    #[test]
    fn unknown_metrics_score_zero() {
        let swing = ExerciseRegistry::global()
            .get(ExerciseId::KettlebellSwing)
            .unwrap();
        let metric = QualityMetricDefinition::new("bar_path", 1.0);
        assert_eq!(score_metric(&metric, &swing, &angles(&[("spine", 10.0)])), 0.0);
    }

    #[test]
    fn overall_inverts_lower_is_better_metrics() {
        let mut definition = ExerciseRegistry::global()
            .get(ExerciseId::KettlebellSwing)
            .unwrap()
            .as_ref()
            .clone();
        definition.quality_metrics = vec![
            QualityMetricDefinition::new("lockout", 1.0),
            QualityMetricDefinition {
                higher_is_better: false,
                ..QualityMetricDefinition::new("sway", 1.0)
            },
        ];
        let scores: BTreeMap<String, f32> =
            [("lockout".to_string(), 100.0), ("sway".to_string(), 0.0)].into();
        assert_eq!(overall(&definition, &scores), Some(100.0));

        definition.quality_metrics.clear();
        assert_eq!(overall(&definition, &scores), None);
    }
}
