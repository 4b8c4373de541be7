//! The per-exercise form analysis engine.
//!
//! One generic state machine, parameterised by an [`ExerciseDefinition`],
//! turns a time-ordered stream of skeletons into phase, cycle, checkpoint and
//! rep events. Frames must arrive in non-decreasing time order; nothing here
//! detects or repairs out-of-order input.

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    sync::Arc,
};

use serde::{Deserialize, Serialize};

use crate::{
    exercise::{ExerciseDefinition, ExerciseId, PhaseAffinity, PositionDefinition},
    quality::{self, AngleMap},
    skeleton::Skeleton,
    AnalyzerError, Result,
};

/// A position is only reported when its match score is below this value.
pub const POSITION_MATCH_THRESHOLD: f32 = 2.0;

/// Score of a position with no angle targets; it never matches.
pub const UNMATCHABLE_SCORE: f32 = f32::MAX;

/// Coarse direction of the primary tracked angle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Ascend,
    Descend,
}

impl Phase {
    pub fn accepts(self, affinity: PhaseAffinity) -> bool {
        match affinity {
            PhaseAffinity::Any => true,
            PhaseAffinity::Descend => self == Phase::Descend,
            PhaseAffinity::Ascend => self == Phase::Ascend,
        }
    }
}

/// Best frame seen so far for one position within the current cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionCandidate {
    pub position: String,
    pub timestamp: f64,
    pub video_time: Option<f64>,
    pub angles: AngleMap,
    /// Lower is better.
    pub score: f32,
}

pub type CandidateMap = BTreeMap<String, PositionCandidate>;

#[derive(Debug, Clone)]
struct TrackedCandidate {
    candidate: PositionCandidate,
    /// Sequence number of the frame within this analyzer's lifetime.
    frame_seq: u64,
}

/// Everything one call to [`FormAnalyzer::process_frame`] produces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameAnalysis {
    pub position: Option<String>,
    pub rep_count: u32,
    pub rep_completed: bool,
    pub phase: Phase,
    pub angles: AngleMap,
    pub quality: BTreeMap<String, f32>,
    pub cycle_completed: bool,
    /// Candidate snapshot of the cycle that ended on this frame.
    pub cycle_candidates: Option<CandidateMap>,
}

/// Match score of `position` for the given angles. Weighted mean of each
/// target's deviation in units of its tolerance; missing angles count as 0.
pub fn match_score(position: &PositionDefinition, angles: &AngleMap) -> f32 {
    let mut weighted = 0.0;
    let mut total_weight = 0.0;

    for (name, target) in &position.targets {
        let value = angles.get(name).copied().unwrap_or(0.0);
        weighted += target.weight * ((value - target.ideal).abs() / target.tolerance);
        total_weight += target.weight;
    }

    if total_weight > 0.0 {
        weighted / total_weight
    } else {
        UNMATCHABLE_SCORE
    }
}

pub struct FormAnalyzer {
    definition: Arc<ExerciseDefinition>,
    is_descending: bool,
    previous_primary: f32,
    max_cycle_angle: f32,
    candidates: BTreeMap<String, TrackedCandidate>,
    last_cycle: Option<CandidateMap>,
    rep_count: u32,
    seen_positions: BTreeSet<String>,
    last_position: Option<String>,
    last_rep_timestamp: f64,
    frames_processed: u64,
}

impl FormAnalyzer {
    pub fn new(definition: Arc<ExerciseDefinition>) -> Self {
        Self {
            definition,
            is_descending: false,
            previous_primary: 0.0,
            max_cycle_angle: 0.0,
            candidates: BTreeMap::new(),
            last_cycle: None,
            rep_count: 0,
            seen_positions: BTreeSet::new(),
            last_position: None,
            last_rep_timestamp: 0.0,
            frames_processed: 0,
        }
    }

    pub fn definition(&self) -> &Arc<ExerciseDefinition> {
        &self.definition
    }

    pub fn exercise(&self) -> ExerciseId {
        self.definition.id
    }

    pub fn rep_count(&self) -> u32 {
        self.rep_count
    }

    pub fn phase(&self) -> Phase {
        if self.is_descending {
            Phase::Descend
        } else {
            Phase::Ascend
        }
    }

    /// Running maximum of the cycle angle since the last cycle boundary.
    pub fn max_cycle_angle(&self) -> f32 {
        self.max_cycle_angle
    }

    /// Candidates collected so far in the current cycle.
    pub fn candidates(&self) -> CandidateMap {
        snapshot(&self.candidates)
    }

    /// Snapshot taken at the most recent cycle boundary.
    pub fn last_cycle_candidates(&self) -> Option<&CandidateMap> {
        self.last_cycle.as_ref()
    }

    pub fn frames_processed(&self) -> u64 {
        self.frames_processed
    }

    /// Returns all state to construction-time values.
    pub fn reset(&mut self) {
        *self = Self::new(Arc::clone(&self.definition));
    }

    /// Evaluates every configured angle; angles that cannot be measured on
    /// this skeleton are reported as 0.
    pub fn compute_angles(&self, skeleton: &Skeleton) -> AngleMap {
        self.definition
            .angles
            .iter()
            .map(|angle| (angle.name.clone(), angle.measure(skeleton).unwrap_or(0.0)))
            .collect()
    }

    /// Lowest-scoring position compatible with the current phase, if it beats
    /// [`POSITION_MATCH_THRESHOLD`].
    pub fn detect_current_position(&self, angles: &AngleMap) -> Option<&PositionDefinition> {
        let phase = self.phase();
        self.definition
            .positions
            .iter()
            .filter(|position| phase.accepts(position.phase))
            .map(|position| (position, match_score(position, angles)))
            .filter(|(_, score)| *score < POSITION_MATCH_THRESHOLD)
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(position, _)| position)
    }

    /// Runs one frame through the state machine.
    pub fn process_frame(
        &mut self,
        skeleton: &Skeleton,
        timestamp: f64,
        video_time: Option<f64>,
    ) -> Result<FrameAnalysis> {
        if !timestamp.is_finite() {
            return Err(AnalyzerError::InvalidFrame(format!(
                "timestamp {timestamp} is not finite"
            )));
        }
        skeleton.ensure_finite()?;

        let definition = Arc::clone(&self.definition);
        let angles = self.compute_angles(skeleton);
        self.frames_processed += 1;

        self.update_phase(&definition, &angles);

        let cycle_candidates = self.update_cycle(&definition, &angles);
        if cycle_candidates.is_none() {
            self.update_candidates(&definition, &angles, timestamp, video_time);
        }

        let position = self
            .detect_current_position(&angles)
            .map(|position| position.name.clone());
        let rep_completed = self.update_reps(&definition, position.as_deref(), timestamp);
        let quality = quality::score_all(&definition, &angles);

        Ok(FrameAnalysis {
            position,
            rep_count: self.rep_count,
            rep_completed,
            phase: self.phase(),
            angles,
            quality,
            cycle_completed: cycle_candidates.is_some(),
            cycle_candidates,
        })
    }

    fn update_phase(&mut self, definition: &ExerciseDefinition, angles: &AngleMap) {
        let config = &definition.phase_detection;
        let primary = angle_value(angles, &config.primary_angle);

        if (primary - self.previous_primary).abs() > config.phase_change_threshold {
            let increasing = primary > self.previous_primary;
            self.is_descending = increasing == config.increasing_is_descend;
        }
        self.previous_primary = primary;
    }

    /// Returns the finished cycle's candidates when this frame closes a cycle.
    fn update_cycle(
        &mut self,
        definition: &ExerciseDefinition,
        angles: &AngleMap,
    ) -> Option<CandidateMap> {
        let config = &definition.cycle_detection;
        let current = angle_value(angles, &config.primary_angle);
        self.max_cycle_angle = self.max_cycle_angle.max(current);

        if self.max_cycle_angle > config.min_cycle_angle && current < config.reset_threshold {
            tracing::debug!(
                exercise = %definition.id,
                peak = self.max_cycle_angle,
                candidates = self.candidates.len(),
                "cycle completed"
            );
            let finished = snapshot(&self.candidates);
            self.candidates.clear();
            self.max_cycle_angle = 0.0;
            self.last_cycle = Some(finished.clone());
            Some(finished)
        } else {
            None
        }
    }

    fn update_candidates(
        &mut self,
        definition: &ExerciseDefinition,
        angles: &AngleMap,
        timestamp: f64,
        video_time: Option<f64>,
    ) {
        let phase = self.phase();
        for position in definition
            .positions
            .iter()
            .filter(|position| phase.accepts(position.phase))
        {
            let score = match_score(position, angles);
            let improves = self
                .candidates
                .get(&position.name)
                .map(|existing| score < existing.candidate.score)
                .unwrap_or(true);

            if improves {
                self.candidates.insert(
                    position.name.clone(),
                    TrackedCandidate {
                        candidate: PositionCandidate {
                            position: position.name.clone(),
                            timestamp,
                            video_time,
                            angles: angles.clone(),
                            score,
                        },
                        frame_seq: self.frames_processed,
                    },
                );
            }
        }
    }

    fn update_reps(
        &mut self,
        definition: &ExerciseDefinition,
        position: Option<&str>,
        timestamp: f64,
    ) -> bool {
        let Some(current) = position else {
            return false;
        };
        let criteria = &definition.rep_criteria;
        let [from, to] = &criteria.completion_sequence;

        self.seen_positions.insert(current.to_string());
        let sequence_matched =
            self.last_position.as_deref() == Some(from.as_str()) && current == to.as_str();
        self.last_position = Some(current.to_string());

        if !sequence_matched {
            return false;
        }
        if !criteria
            .required_positions
            .iter()
            .all(|required| self.seen_positions.contains(required))
        {
            return false;
        }

        let elapsed = timestamp - self.last_rep_timestamp;
        if elapsed < criteria.min_rep_duration_ms {
            tracing::debug!(elapsed, "rep sequence completed too quickly, ignoring");
            return false;
        }
        if self.rep_count > 0 && elapsed > criteria.max_rep_duration_ms {
            tracing::debug!(elapsed, "rep took too long, restarting rep timer");
            self.start_next_rep(current, timestamp);
            return false;
        }

        self.rep_count += 1;
        self.start_next_rep(current, timestamp);
        tracing::debug!(exercise = %definition.id, rep = self.rep_count, timestamp, "rep counted");
        true
    }

    fn start_next_rep(&mut self, current: &str, timestamp: f64) {
        self.seen_positions.clear();
        self.seen_positions.insert(current.to_string());
        self.last_rep_timestamp = timestamp;
    }
}

fn angle_value(angles: &AngleMap, name: &str) -> f32 {
    angles.get(name).copied().unwrap_or(0.0)
}

fn snapshot(candidates: &BTreeMap<String, TrackedCandidate>) -> CandidateMap {
    candidates
        .iter()
        .map(|(name, tracked)| (name.clone(), tracked.candidate.clone()))
        .collect()
}

impl fmt::Debug for FormAnalyzer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let newest = self.candidates.values().map(|c| c.frame_seq).max();
        f.debug_struct("FormAnalyzer")
            .field("exercise", &self.definition.id)
            .field("phase", &self.phase())
            .field("previous_primary", &self.previous_primary)
            .field("max_cycle_angle", &self.max_cycle_angle)
            .field("candidates", &self.candidates.len())
            .field("newest_candidate_frame", &newest)
            .field("rep_count", &self.rep_count)
            .field("last_position", &self.last_position)
            .field("frames_processed", &self.frames_processed)
            .finish()
    }
}
