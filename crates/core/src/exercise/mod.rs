//! Declarative exercise configuration and the registry that serves it.
//!
//! An [`ExerciseDefinition`] is pure data. Every analyzer for an exercise
//! shares the same definition through an [`Arc`]; nothing in here has
//! behaviour beyond lookups and angle measurement.

mod catalog;

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    fmt,
    str::FromStr,
    sync::Arc,
};

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::{
    skeleton::{BuiltinAngle, KeypointName, Skeleton},
    AnalyzerError, Result,
};

/// Identifier of a registered exercise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExerciseId {
    KettlebellSwing,
    PistolSquat,
}

impl ExerciseId {
    pub const ALL: [ExerciseId; 2] = [Self::KettlebellSwing, Self::PistolSquat];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::KettlebellSwing => "kettlebell-swing",
            Self::PistolSquat => "pistol-squat",
        }
    }
}

impl fmt::Display for ExerciseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for ExerciseId {
    type Err = AnalyzerError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|id| id.as_str() == s)
            .ok_or_else(|| AnalyzerError::UnknownExercise(s.to_string()))
    }
}

/// How one tracked angle is measured.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AngleSource {
    /// Angle at `vertex` between `point1` and `point2`.
    Joint {
        point1: KeypointName,
        vertex: KeypointName,
        point2: KeypointName,
    },
    Builtin(BuiltinAngle),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AngleDefinition {
    pub name: String,
    pub source: AngleSource,
}

impl AngleDefinition {
    pub fn joint(
        name: impl Into<String>,
        point1: KeypointName,
        vertex: KeypointName,
        point2: KeypointName,
    ) -> Self {
        Self {
            name: name.into(),
            source: AngleSource::Joint {
                point1,
                vertex,
                point2,
            },
        }
    }

    pub fn builtin(name: impl Into<String>, angle: BuiltinAngle) -> Self {
        Self {
            name: name.into(),
            source: AngleSource::Builtin(angle),
        }
    }

    pub fn measure(&self, skeleton: &Skeleton) -> Option<f32> {
        match self.source {
            AngleSource::Joint {
                point1,
                vertex,
                point2,
            } => skeleton.angle(point1, vertex, point2),
            AngleSource::Builtin(angle) => skeleton.builtin(angle),
        }
    }
}

/// Scoring contract for one angle at one checkpoint position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AngleTarget {
    pub ideal: f32,
    pub tolerance: f32,
    /// In `(0, 1]`.
    pub weight: f32,
}

impl AngleTarget {
    pub fn new(ideal: f32, tolerance: f32, weight: f32) -> Self {
        Self {
            ideal,
            tolerance,
            weight,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseAffinity {
    Descend,
    Ascend,
    Any,
}

/// A named checkpoint within one repetition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionDefinition {
    pub name: String,
    pub phase: PhaseAffinity,
    pub targets: BTreeMap<String, AngleTarget>,
    #[serde(default)]
    pub capture_thumbnail: bool,
}

impl PositionDefinition {
    pub fn new(name: impl Into<String>, phase: PhaseAffinity) -> Self {
        Self {
            name: name.into(),
            phase,
            targets: BTreeMap::new(),
            capture_thumbnail: false,
        }
    }

    pub fn target(mut self, angle: impl Into<String>, target: AngleTarget) -> Self {
        self.targets.insert(angle.into(), target);
        self
    }

    pub fn with_thumbnail(mut self) -> Self {
        self.capture_thumbnail = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseDetectionConfig {
    pub primary_angle: String,
    /// Minimum frame-to-frame change, in degrees, before the phase may flip.
    pub phase_change_threshold: f32,
    pub increasing_is_descend: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleDetectionConfig {
    pub primary_angle: String,
    pub reset_threshold: f32,
    pub min_cycle_angle: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepCriteria {
    pub required_positions: BTreeSet<String>,
    /// `[from, to]`: a rep completes on the frame that moves from the first
    /// position to the second.
    pub completion_sequence: [String; 2],
    pub min_rep_duration_ms: f64,
    pub max_rep_duration_ms: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityMetricDefinition {
    pub name: String,
    pub weight: f32,
    pub min: f32,
    pub max: f32,
    pub higher_is_better: bool,
}

impl QualityMetricDefinition {
    pub fn new(name: impl Into<String>, weight: f32) -> Self {
        Self {
            name: name.into(),
            weight,
            min: 0.0,
            max: 100.0,
            higher_is_better: true,
        }
    }
}

/// Full declarative description of one exercise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExerciseDefinition {
    pub id: ExerciseId,
    pub display_name: String,
    pub angles: Vec<AngleDefinition>,
    pub positions: Vec<PositionDefinition>,
    pub phase_detection: PhaseDetectionConfig,
    pub cycle_detection: CycleDetectionConfig,
    pub rep_criteria: RepCriteria,
    pub quality_metrics: Vec<QualityMetricDefinition>,
}

impl ExerciseDefinition {
    pub fn position(&self, name: &str) -> Option<&PositionDefinition> {
        self.positions.iter().find(|position| position.name == name)
    }
}

static GLOBAL: Lazy<ExerciseRegistry> = Lazy::new(ExerciseRegistry::builtin);

/// Maps exercise identifiers to their definitions.
#[derive(Debug, Default)]
pub struct ExerciseRegistry {
    definitions: HashMap<ExerciseId, Arc<ExerciseDefinition>>,
}

impl ExerciseRegistry {
    pub fn new() -> Self {
        Self {
            definitions: HashMap::new(),
        }
    }

    /// Registry holding every built-in exercise.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(catalog::kettlebell_swing());
        registry.register(catalog::pistol_squat());
        registry
    }

    /// Process-wide registry of built-in exercises.
    pub fn global() -> &'static ExerciseRegistry {
        &GLOBAL
    }

    pub fn register(&mut self, definition: ExerciseDefinition) {
        self.definitions.insert(definition.id, Arc::new(definition));
    }

    pub fn get(&self, id: ExerciseId) -> Result<Arc<ExerciseDefinition>> {
        self.definitions
            .get(&id)
            .cloned()
            .ok_or_else(|| AnalyzerError::UnknownExercise(id.to_string()))
    }

    /// Looks up an identifier string such as `kettlebell-swing`.
    pub fn lookup(&self, id: &str) -> Result<Arc<ExerciseDefinition>> {
        self.get(id.parse()?)
    }

    /// Free-text lookup against identifiers and display names. Case,
    /// whitespace, `-` and `_` are ignored.
    pub fn find_by_name(&self, name: &str) -> Option<Arc<ExerciseDefinition>> {
        let wanted = normalize(name);
        if wanted.is_empty() {
            return None;
        }
        self.ids()
            .into_iter()
            .filter_map(|id| self.definitions.get(&id))
            .find(|definition| {
                normalize(definition.id.as_str()) == wanted
                    || normalize(&definition.display_name) == wanted
            })
            .cloned()
    }

    /// Registered identifiers in a stable order.
    pub fn ids(&self) -> Vec<ExerciseId> {
        let mut ids: Vec<ExerciseId> = self.definitions.keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn contains(&self, id: &str) -> bool {
        id.parse::<ExerciseId>()
            .map(|id| self.definitions.contains_key(&id))
            .unwrap_or(false)
    }
}

fn normalize(name: &str) -> String {
    name.chars()
        .filter(|c| !c.is_whitespace() && *c != '-' && *c != '_')
        .flat_map(char::to_lowercase)
        .collect()
}
