//! Scores detected checkpoints against hand-annotated ground truth.
//!
//! Annotation files are JSON arrays of `{ "frame_index", "position",
//! "notes"? }` objects. A detection counts as correct when an annotation of
//! the same position lies within the frame tolerance.

use std::{
    collections::{BTreeMap, BTreeSet},
    path::Path,
};

use serde::{Deserialize, Serialize};

use crate::Result;

/// Frames a detection may be off by and still match an annotation.
pub const DEFAULT_FRAME_TOLERANCE: usize = 2;

/// One hand-labelled frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Annotation {
    pub frame_index: usize,
    pub position: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub notes: String,
}

impl Annotation {
    pub fn new(frame_index: usize, position: impl Into<String>) -> Self {
        Self {
            frame_index,
            position: position.into(),
            notes: String::new(),
        }
    }
}

pub fn parse_annotations(text: &str) -> Result<Vec<Annotation>> {
    Ok(serde_json::from_str(text)?)
}

pub fn load_annotations(path: impl AsRef<Path>) -> Result<Vec<Annotation>> {
    let path = path.as_ref();
    let annotations = parse_annotations(&std::fs::read_to_string(path)?)?;
    tracing::info!(path = %path.display(), count = annotations.len(), "loaded annotations");
    Ok(annotations)
}

/// A frame that kept precision or recall below 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Mismatch {
    /// Detected, but no annotation nearby.
    FalsePositive { frame: usize },
    /// Annotated, but nothing detected nearby.
    FalseNegative { frame: usize },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PositionMetrics {
    pub position: String,
    pub true_positives: usize,
    pub false_positives: usize,
    pub false_negatives: usize,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub mismatches: Vec<Mismatch>,
}

impl PositionMetrics {
    /// Compares detected frames with the annotated frames of `position`.
    pub fn evaluate(
        position: &str,
        detected: &BTreeSet<usize>,
        annotations: &[Annotation],
        tolerance: usize,
    ) -> Self {
        let truth: BTreeSet<usize> = annotations
            .iter()
            .filter(|a| a.position == position)
            .map(|a| a.frame_index)
            .collect();
        let near = |frame: usize, others: &BTreeSet<usize>| {
            others.iter().any(|other| other.abs_diff(frame) <= tolerance)
        };

        let mut metrics = Self {
            position: position.to_string(),
            ..Self::default()
        };
        for &frame in detected {
            if near(frame, &truth) {
                metrics.true_positives += 1;
            } else {
                metrics.false_positives += 1;
                metrics.mismatches.push(Mismatch::FalsePositive { frame });
            }
        }
        for &frame in &truth {
            if !near(frame, detected) {
                metrics.false_negatives += 1;
                metrics.mismatches.push(Mismatch::FalseNegative { frame });
            }
        }

        metrics.precision = ratio(
            metrics.true_positives,
            metrics.true_positives + metrics.false_positives,
        );
        metrics.recall = ratio(
            metrics.true_positives,
            metrics.true_positives + metrics.false_negatives,
        );
        metrics.f1 = if metrics.precision + metrics.recall > 0.0 {
            2.0 * metrics.precision * metrics.recall / (metrics.precision + metrics.recall)
        } else {
            0.0
        };
        metrics
    }
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

/// Detection quality of one replay, per annotated position.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Evaluation {
    pub tolerance: usize,
    pub rep_count: u32,
    pub cycles: usize,
    pub positions: Vec<PositionMetrics>,
}

impl Evaluation {
    /// Scores every position that appears in `annotations`. `detected` maps a
    /// position name to the frames chosen for it.
    pub fn new(
        detected: &BTreeMap<String, BTreeSet<usize>>,
        annotations: &[Annotation],
        tolerance: usize,
        rep_count: u32,
        cycles: usize,
    ) -> Self {
        let empty = BTreeSet::new();
        let names: BTreeSet<&str> = annotations.iter().map(|a| a.position.as_str()).collect();
        let positions = names
            .into_iter()
            .map(|name| {
                let frames = detected.get(name).unwrap_or(&empty);
                PositionMetrics::evaluate(name, frames, annotations, tolerance)
            })
            .collect();
        Self {
            tolerance,
            rep_count,
            cycles,
            positions,
        }
    }

    pub fn position(&self, name: &str) -> Option<&PositionMetrics> {
        self.positions.iter().find(|m| m.position == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frames(list: &[usize]) -> BTreeSet<usize> {
        list.iter().copied().collect()
    }

    #[test]
    fn parses_annotation_files_with_optional_notes() {
        let annotations = parse_annotations(
            r#"[
                {"frame_index": 24, "position": "bottom"},
                {"frame_index": 41, "position": "top", "notes": "arms a bit low"}
            ]"#,
        )
        .unwrap();
        assert_eq!(annotations[0], Annotation::new(24, "bottom"));
        assert_eq!(annotations[1].notes, "arms a bit low");

        assert!(parse_annotations(r#"[{"position": "top"}]"#).is_err());
        assert!(parse_annotations("{}").is_err());
    }

    #[test]
    fn matches_within_the_frame_tolerance() {
        let truth = [Annotation::new(10, "bottom"), Annotation::new(50, "bottom")];
        let metrics = PositionMetrics::evaluate("bottom", &frames(&[12, 53]), &truth, 2);

        assert_eq!(metrics.true_positives, 1);
        assert_eq!(metrics.false_positives, 1);
        assert_eq!(metrics.false_negatives, 1);
        assert_eq!(
            metrics.mismatches,
            vec![
                Mismatch::FalsePositive { frame: 53 },
                Mismatch::FalseNegative { frame: 50 },
            ]
        );
        assert!((metrics.precision - 0.5).abs() < 1e-9);
        assert!((metrics.recall - 0.5).abs() < 1e-9);
        assert!((metrics.f1 - 0.5).abs() < 1e-9);
    }

    #[test]
    fn other_positions_are_ignored() {
        let truth = [Annotation::new(10, "top"), Annotation::new(30, "bottom")];
        let metrics = PositionMetrics::evaluate("bottom", &frames(&[30]), &truth, 0);
        assert_eq!(metrics.true_positives, 1);
        assert_eq!(metrics.false_negatives, 0);
        assert_eq!(metrics.f1, 1.0);
    }

    #[test]
    fn nothing_detected_scores_zero() {
        let truth = [Annotation::new(10, "top")];
        let metrics = PositionMetrics::evaluate("top", &BTreeSet::new(), &truth, 2);
        assert_eq!(metrics.precision, 0.0);
        assert_eq!(metrics.recall, 0.0);
        assert_eq!(metrics.f1, 0.0);
        assert_eq!(metrics.false_negatives, 1);
    }

    #[test]
    fn evaluation_covers_each_annotated_position_once() {
        let truth = [
            Annotation::new(5, "top"),
            Annotation::new(20, "bottom"),
            Annotation::new(45, "top"),
        ];
        let mut detected = BTreeMap::new();
        detected.insert("top".to_string(), frames(&[4, 46]));
        detected.insert("release".to_string(), frames(&[30]));

        let evaluation = Evaluation::new(&detected, &truth, DEFAULT_FRAME_TOLERANCE, 1, 1);
        let names: Vec<&str> = evaluation.positions.iter().map(|m| m.position.as_str()).collect();
        assert_eq!(names, vec!["bottom", "top"]);
        assert_eq!(evaluation.position("top").unwrap().f1, 1.0);
        assert_eq!(evaluation.position("bottom").unwrap().false_negatives, 1);
        assert!(evaluation.position("release").is_none());
    }
}
