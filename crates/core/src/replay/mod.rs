//! Deterministic replay of a recorded pose track through a [`FormAnalyzer`].
//!
//! Frames are fed strictly in recording order. Arbitrary seeks go through
//! [`ReplayEngine::preview`], which never touches analyzer state, or through
//! [`ReplayEngine::rewind_to`], which rebuilds it from the first frame.

use std::{
    collections::{BTreeMap, BTreeSet},
    io::Write,
    sync::Arc,
};

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::{
    analyzer::{CandidateMap, FormAnalyzer, FrameAnalysis, Phase},
    config::ReplayConfig,
    evaluation::{Annotation, Evaluation},
    exercise::ExerciseDefinition,
    quality::AngleMap,
    recording::{PrecomputedAngles, Recording},
    timeline::PlaybackClock,
    AnalyzerError, Result,
};

/// Outcome of feeding one recorded frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReplayStep {
    /// Position of the frame in the recording.
    pub index: usize,
    pub video_time: f64,
    pub position: Option<String>,
    pub rep_count: u32,
    /// `None` when the frame holds no person.
    pub analysis: Option<FrameAnalysis>,
}

impl ReplayStep {
    pub fn rep_completed(&self) -> bool {
        self.analysis.as_ref().map(|a| a.rep_completed).unwrap_or(false)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReplaySummary {
    pub rep_count: u32,
    pub frames_processed: usize,
    /// Frames with no person in them.
    pub frames_empty: usize,
    /// Frames rejected by the analyzer.
    pub frames_skipped: usize,
    /// Candidate snapshot of every completed cycle, in order.
    pub cycles: Vec<CandidateMap>,
}

/// Read-only look at one frame against the analyzer's current phase.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FramePreview {
    pub index: usize,
    pub video_time: f64,
    pub angles: AngleMap,
    pub position: Option<String>,
    pub precomputed: Option<PrecomputedAngles>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackOutcome {
    /// The last frame was reached without looping.
    Finished,
    /// Playback was cancelled; the engine is back at its initial state.
    Cancelled,
}

#[derive(Debug)]
pub struct ReplayEngine {
    recording: Arc<Recording>,
    analyzer: FormAnalyzer,
    last_index: Option<usize>,
}

impl ReplayEngine {
    pub fn new(recording: impl Into<Arc<Recording>>, definition: Arc<ExerciseDefinition>) -> Result<Self> {
        let recording = recording.into();
        recording.validate()?;
        Ok(Self {
            recording,
            analyzer: FormAnalyzer::new(definition),
            last_index: None,
        })
    }

    pub fn recording(&self) -> &Recording {
        &self.recording
    }

    pub fn analyzer(&self) -> &FormAnalyzer {
        &self.analyzer
    }

    pub fn rep_count(&self) -> u32 {
        self.analyzer.rep_count()
    }

    /// Index of the most recently processed frame.
    pub fn last_index(&self) -> Option<usize> {
        self.last_index
    }

    pub fn reset(&mut self) {
        self.analyzer.reset();
        self.last_index = None;
    }

    /// Feeds frame `index` to the analyzer. Indices must not go backwards.
    pub fn process_frame(&mut self, index: usize) -> Result<ReplayStep> {
        let len = self.recording.len();
        let frame = self
            .recording
            .frames
            .get(index)
            .ok_or(AnalyzerError::FrameIndexOutOfRange { index, len })?;
        if let Some(last) = self.last_index {
            if index < last {
                return Err(AnalyzerError::FrameOutOfOrder {
                    requested: index,
                    last,
                });
            }
        }

        let analysis = match frame.skeleton() {
            Some(skeleton) => Some(self.analyzer.process_frame(
                &skeleton,
                frame.timestamp,
                Some(frame.video_time),
            )?),
            None => None,
        };
        self.last_index = Some(index);

        Ok(ReplayStep {
            index,
            video_time: frame.video_time,
            position: analysis.as_ref().and_then(|a| a.position.clone()),
            rep_count: self.analyzer.rep_count(),
            analysis,
        })
    }

    /// Resets and runs every frame in order. Frames the analyzer rejects are
    /// logged and skipped.
    pub fn process_all(&mut self) -> ReplaySummary {
        self.reset();
        let mut summary = ReplaySummary::default();

        for index in 0..self.recording.len() {
            match self.process_frame(index) {
                Ok(step) => {
                    summary.frames_processed += 1;
                    match step.analysis {
                        Some(analysis) => {
                            if let Some(cycle) = analysis.cycle_candidates {
                                summary.cycles.push(cycle);
                            }
                        }
                        None => summary.frames_empty += 1,
                    }
                }
                Err(err) => {
                    tracing::warn!(index, error = %err, "skipping recorded frame");
                    self.last_index = Some(index);
                    summary.frames_skipped += 1;
                }
            }
        }

        summary.rep_count = self.analyzer.rep_count();
        tracing::info!(
            exercise = %self.analyzer.exercise(),
            reps = summary.rep_count,
            cycles = summary.cycles.len(),
            skipped = summary.frames_skipped,
            "replay finished"
        );
        summary
    }

    /// Index of the frame nearest `video_time`. Ties go to the earlier frame.
    /// `None` for an empty recording or a non-finite time.
    pub fn seek(&self, video_time: f64) -> Option<usize> {
        if !video_time.is_finite() {
            return None;
        }
        let mut best: Option<(usize, f64)> = None;
        for (index, frame) in self.recording.frames.iter().enumerate() {
            let distance = (frame.video_time - video_time).abs();
            match best {
                Some((_, best_distance)) if distance >= best_distance => {}
                _ => best = Some((index, distance)),
            }
        }
        best.map(|(index, _)| index)
    }

    /// Angles and detected position of frame `index` without advancing the
    /// analyzer.
    pub fn preview(&self, index: usize) -> Result<FramePreview> {
        let len = self.recording.len();
        let frame = self
            .recording
            .frames
            .get(index)
            .ok_or(AnalyzerError::FrameIndexOutOfRange { index, len })?;

        let (angles, position) = match frame.skeleton() {
            Some(skeleton) => {
                let angles = self.analyzer.compute_angles(&skeleton);
                let position = self
                    .analyzer
                    .detect_current_position(&angles)
                    .map(|p| p.name.clone());
                (angles, position)
            }
            None => (AngleMap::new(), None),
        };

        Ok(FramePreview {
            index,
            video_time: frame.video_time,
            angles,
            position,
            precomputed: frame.angles,
        })
    }

    /// Recording frame index of every cycle candidate in `summary`, grouped
    /// by position.
    pub fn checkpoint_frames(&self, summary: &ReplaySummary) -> BTreeMap<String, BTreeSet<usize>> {
        let mut frames: BTreeMap<String, BTreeSet<usize>> = BTreeMap::new();
        for candidate in summary.cycles.iter().flat_map(|cycle| cycle.values()) {
            let recorded = self
                .recording
                .frames
                .iter()
                .find(|frame| frame.timestamp == candidate.timestamp);
            if let Some(frame) = recorded {
                frames
                    .entry(candidate.position.clone())
                    .or_default()
                    .insert(frame.frame_index);
            }
        }
        frames
    }

    /// Replays the whole recording and scores the chosen checkpoints against
    /// `annotations`.
    pub fn evaluate(&mut self, annotations: &[Annotation], tolerance: usize) -> Evaluation {
        let summary = self.process_all();
        let detected = self.checkpoint_frames(&summary);
        let evaluation = Evaluation::new(
            &detected,
            annotations,
            tolerance,
            summary.rep_count,
            summary.cycles.len(),
        );
        for metrics in &evaluation.positions {
            tracing::info!(
                position = %metrics.position,
                precision = metrics.precision,
                recall = metrics.recall,
                f1 = metrics.f1,
                "checkpoint detection scored"
            );
        }
        evaluation
    }

    /// Annotation template listing every detected checkpoint, ordered by
    /// frame, for hand correction.
    pub fn candidate_annotations(&mut self) -> Vec<Annotation> {
        let summary = self.process_all();
        let mut annotations: Vec<Annotation> = self
            .checkpoint_frames(&summary)
            .into_iter()
            .flat_map(|(position, frames)| {
                frames.into_iter().map(move |frame_index| Annotation {
                    frame_index,
                    position: position.clone(),
                    notes: "detected".to_string(),
                })
            })
            .collect();
        annotations.sort_by_key(|a| a.frame_index);
        annotations
    }

    /// Replays the recording from the start and writes one CSV row per frame:
    /// position, phase, reps and every configured angle. Returns the number of
    /// rows written.
    pub fn write_csv<W: Write>(&mut self, mut out: W) -> Result<usize> {
        self.reset();
        let angle_names: Vec<String> = self
            .analyzer
            .definition()
            .angles
            .iter()
            .map(|angle| angle.name.clone())
            .collect();

        write!(out, "frame_index,video_time,position,phase,rep_count,rep_completed")?;
        for name in &angle_names {
            write!(out, ",{name}")?;
        }
        writeln!(out)?;

        let mut rows = 0;
        for index in 0..self.recording.len() {
            let frame_index = self.recording.frames[index].frame_index;
            let step = match self.process_frame(index) {
                Ok(step) => step,
                Err(err) => {
                    tracing::warn!(index, error = %err, "skipping recorded frame");
                    self.last_index = Some(index);
                    continue;
                }
            };

            write!(out, "{frame_index},{:.3},", step.video_time)?;
            match &step.analysis {
                Some(analysis) => {
                    let phase = match analysis.phase {
                        Phase::Ascend => "ascend",
                        Phase::Descend => "descend",
                    };
                    write!(
                        out,
                        "{},{phase},{},{}",
                        analysis.position.as_deref().unwrap_or(""),
                        step.rep_count,
                        analysis.rep_completed
                    )?;
                    for name in &angle_names {
                        let value = analysis.angles.get(name).copied().unwrap_or(0.0);
                        write!(out, ",{value:.1}")?;
                    }
                }
                None => {
                    write!(out, ",,{},false", step.rep_count)?;
                    for _ in &angle_names {
                        write!(out, ",")?;
                    }
                }
            }
            writeln!(out)?;
            rows += 1;
        }
        Ok(rows)
    }

    /// Rebuilds analyzer state as if frames `0..=index` had just been played.
    pub fn rewind_to(&mut self, index: usize) -> Result<ReplayStep> {
        let len = self.recording.len();
        if index >= len {
            return Err(AnalyzerError::FrameIndexOutOfRange { index, len });
        }
        self.reset();
        for earlier in 0..index {
            if let Err(err) = self.process_frame(earlier) {
                tracing::warn!(index = earlier, error = %err, "skipping recorded frame");
                self.last_index = Some(earlier);
            }
        }
        self.process_frame(index)
    }

    /// Plays the recording at its frame rate scaled by `config.speed`, calling
    /// `on_step` for every frame. Looping resets the analyzer at each pass.
    /// Cancelling returns the engine to its initial state.
    pub async fn play<F>(
        &mut self,
        config: &ReplayConfig,
        cancel: &CancellationToken,
        mut on_step: F,
    ) -> Result<PlaybackOutcome>
    where
        F: FnMut(&ReplayStep),
    {
        let fps = config.fps_override.unwrap_or(self.recording.fps());
        let mut clock = PlaybackClock::new(fps, config.speed)?;
        let interval = clock.frame_interval();
        tracing::info!(fps, speed = config.speed, looped = config.looped, "starting playback");

        if self.recording.is_empty() {
            return Ok(PlaybackOutcome::Finished);
        }

        loop {
            self.reset();
            clock.reset();

            for index in 0..self.recording.len() {
                if index > 0 {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => {
                            self.reset();
                            tracing::info!(index, "playback cancelled");
                            return Ok(PlaybackOutcome::Cancelled);
                        }
                        _ = tokio::time::sleep(interval) => {}
                    }
                } else if cancel.is_cancelled() {
                    self.reset();
                    return Ok(PlaybackOutcome::Cancelled);
                }

                match self.process_frame(index) {
                    Ok(step) => on_step(&step),
                    Err(err) => {
                        tracing::warn!(index, error = %err, "skipping recorded frame");
                        self.last_index = Some(index);
                    }
                }
                clock.advance_frame();
            }

            if !config.looped {
                return Ok(PlaybackOutcome::Finished);
            }
            tracing::debug!(seconds = clock.time_seconds(), "looping playback");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        exercise::{ExerciseId, ExerciseRegistry},
        recording::RecordedFrame,
        test_support::{pose, recording_from_poses, reference_swings, video_time, PoseSpec},
    };

    fn swing_engine(recording: Recording) -> ReplayEngine {
        let definition = ExerciseRegistry::global()
            .get(ExerciseId::KettlebellSwing)
            .unwrap();
        ReplayEngine::new(recording, definition).unwrap()
    }

    fn reference_engine() -> ReplayEngine {
        swing_engine(recording_from_poses(&reference_swings().poses))
    }

    #[test]
    fn batch_matches_sequential_processing() {
        let mut batch = reference_engine();
        let summary = batch.process_all();

        let mut sequential = reference_engine();
        let mut last = None;
        for index in 0..sequential.recording().len() {
            last = Some(sequential.process_frame(index).unwrap());
        }
        assert_eq!(summary.rep_count, sequential.rep_count());
        assert_eq!(last.unwrap().rep_count, summary.rep_count);
        assert_eq!(summary.frames_processed, 164);
        assert_eq!(summary.frames_skipped, 0);
    }

    #[test]
    fn reference_recording_counts_reps_and_bottoms() {
        let sequence = reference_swings();
        let mut engine = reference_engine();
        let summary = engine.process_all();

        assert!((3..=5).contains(&summary.rep_count), "{} reps", summary.rep_count);
        assert_eq!(summary.cycles.len(), sequence.bottoms.len());
        let fps = engine.recording().fps();
        for (cycle, expected) in summary.cycles.iter().zip(&sequence.bottoms) {
            let bottom = cycle.get("bottom").unwrap();
            let frame = (bottom.video_time.unwrap() * fps).round() as usize;
            assert!(frame.abs_diff(*expected) <= 5, "bottom at {frame}, expected {expected}");
        }
    }

    #[test]
    fn backwards_and_out_of_range_indices_are_rejected() {
        let mut engine = reference_engine();
        engine.process_frame(10).unwrap();
        engine.process_frame(10).unwrap();

        let err = engine.process_frame(5).unwrap_err();
        assert!(matches!(
            err,
            AnalyzerError::FrameOutOfOrder {
                requested: 5,
                last: 10
            }
        ));
        let err = engine.process_frame(164).unwrap_err();
        assert!(matches!(
            err,
            AnalyzerError::FrameIndexOutOfRange { index: 164, len: 164 }
        ));
    }

    #[test]
    fn seek_finds_the_nearest_frame() {
        let engine = reference_engine();
        assert_eq!(engine.seek(0.5), Some(15));
        assert_eq!(engine.seek(-3.0), Some(0));
        assert_eq!(engine.seek(100.0), Some(163));
        // Exactly between frames 0 and 1.
        assert_eq!(engine.seek(video_time(1) / 2.0), Some(0));
    }

    #[test]
    fn seek_rejects_non_finite_times() {
        let engine = reference_engine();
        assert_eq!(engine.seek(f64::NAN), None);
        assert_eq!(engine.seek(f64::INFINITY), None);
        assert_eq!(engine.seek(f64::NEG_INFINITY), None);
    }

    #[test]
    fn preview_leaves_the_analyzer_untouched() {
        let mut engine = reference_engine();
        for index in 0..30 {
            engine.process_frame(index).unwrap();
        }
        let frames_before = engine.analyzer().frames_processed();

        let preview = engine.preview(100).unwrap();
        assert_eq!(preview.index, 100);
        assert!(preview.angles.contains_key("spine"));
        assert!(preview.precomputed.is_some());
        assert_eq!(engine.analyzer().frames_processed(), frames_before);
        assert_eq!(engine.last_index(), Some(29));

        engine.process_frame(30).unwrap();
    }

    #[test]
    fn rewind_rebuilds_state_deterministically() {
        let mut engine = reference_engine();
        engine.process_all();

        let rewound = engine.rewind_to(90).unwrap();
        let mut fresh = reference_engine();
        let mut expected = None;
        for index in 0..=90 {
            expected = Some(fresh.process_frame(index).unwrap());
        }
        assert_eq!(Some(rewound), expected);
        assert_eq!(engine.rep_count(), fresh.rep_count());
        assert_eq!(engine.last_index(), Some(90));
    }

    #[test]
    fn empty_frames_do_not_reach_the_analyzer() {
        let mut recording = recording_from_poses(&[PoseSpec::hinge(0.0, 90.0); 3]);
        for kp in &mut recording.frames[1].keypoints {
            kp.score = 0.0;
        }
        let mut engine = swing_engine(recording);
        let summary = engine.process_all();
        assert_eq!(summary.frames_empty, 1);
        assert_eq!(engine.analyzer().frames_processed(), 2);
    }

    #[test]
    fn rejects_invalid_recordings() {
        let mut recording = recording_from_poses(&[PoseSpec::hinge(0.0, 90.0); 3]);
        recording.metadata.fps = 0.0;
        let definition = ExerciseRegistry::global()
            .get(ExerciseId::KettlebellSwing)
            .unwrap();
        let err = ReplayEngine::new(recording, definition).unwrap_err();
        assert!(matches!(err, AnalyzerError::InvalidRecordingFormat(_)));
    }

    #[test]
    fn faulty_frames_are_skipped_in_batch() {
        let mut recording = recording_from_poses(&[PoseSpec::hinge(0.0, 90.0); 4]);
        recording.frames[2] = RecordedFrame {
            timestamp: f64::INFINITY,
            ..recording.frames[2].clone()
        };
        let mut engine = swing_engine(recording);
        let summary = engine.process_all();
        assert_eq!(summary.frames_skipped, 1);
        assert_eq!(summary.frames_processed, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn playback_is_paced_by_fps_and_speed() {
        let mut engine = reference_engine();
        let config = ReplayConfig {
            speed: 2.0,
            ..ReplayConfig::default()
        };
        let cancel = CancellationToken::new();
        let mut steps = Vec::new();

        let started = tokio::time::Instant::now();
        let outcome = engine
            .play(&config, &cancel, |step| steps.push(step.index))
            .await
            .unwrap();
        let elapsed = started.elapsed().as_secs_f64();

        assert_eq!(outcome, PlaybackOutcome::Finished);
        assert_eq!(steps, (0..164).collect::<Vec<_>>());
        // 163 gaps of 1/60 s, give or take timer granularity.
        let expected = 163.0 / 60.0;
        assert!(elapsed >= expected - 1e-3 && elapsed < expected + 0.25, "elapsed {elapsed}");

        let mut batch = reference_engine();
        assert_eq!(engine.rep_count(), batch.process_all().rep_count);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelling_playback_returns_to_idle() {
        let mut engine = reference_engine();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();

        let outcome = engine
            .play(&ReplayConfig::default(), &cancel, |step| {
                if step.index == 60 {
                    trigger.cancel();
                }
            })
            .await
            .unwrap();

        assert_eq!(outcome, PlaybackOutcome::Cancelled);
        assert_eq!(engine.rep_count(), 0);
        assert_eq!(engine.last_index(), None);
        assert_eq!(engine.analyzer().frames_processed(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn looping_playback_restarts_the_count() {
        let mut engine = reference_engine();
        let config = ReplayConfig {
            looped: true,
            speed: 4.0,
            ..ReplayConfig::default()
        };
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let mut passes: Vec<Vec<u32>> = Vec::new();

        engine
            .play(&config, &cancel, |step| {
                if step.index == 0 {
                    passes.push(Vec::new());
                }
                if let Some(pass) = passes.last_mut() {
                    pass.push(step.rep_count);
                }
                if passes.len() == 2 && step.index == 163 {
                    trigger.cancel();
                }
            })
            .await
            .unwrap();

        assert_eq!(passes.len(), 2);
        assert_eq!(passes[0], passes[1]);
        assert_eq!(passes[1][0], 0);
    }

    #[test]
    fn detected_bottoms_score_against_ground_truth() {
        let sequence = reference_swings();
        let mut annotations: Vec<Annotation> = sequence
            .bottoms
            .iter()
            .map(|frame| Annotation::new(*frame, "bottom"))
            .collect();
        // A bottom nobody swung to.
        annotations.push(Annotation::new(2, "bottom"));

        let mut engine = reference_engine();
        let evaluation = engine.evaluate(&annotations, 5);
        assert_eq!(evaluation.cycles, 4);

        let bottom = evaluation.position("bottom").unwrap();
        assert_eq!(bottom.true_positives, 4);
        assert_eq!(bottom.false_positives, 0);
        assert_eq!(bottom.false_negatives, 1);
        assert!((bottom.precision - 1.0).abs() < 1e-9);
        assert!((bottom.recall - 0.8).abs() < 1e-9);

        // Scoring replays from scratch every time.
        assert_eq!(engine.evaluate(&annotations, 5), evaluation);
    }

    #[test]
    fn annotation_template_lists_checkpoints_in_frame_order() {
        let sequence = reference_swings();
        let mut engine = reference_engine();
        let template = engine.candidate_annotations();

        assert!(template.windows(2).all(|w| w[0].frame_index <= w[1].frame_index));
        let bottoms: Vec<usize> = template
            .iter()
            .filter(|a| a.position == "bottom")
            .map(|a| a.frame_index)
            .collect();
        assert_eq!(bottoms.len(), 4);
        for (frame, expected) in bottoms.iter().zip(&sequence.bottoms) {
            assert!(frame.abs_diff(*expected) <= 5);
        }
        assert!(template.iter().any(|a| a.position == "top"));
    }

    #[test]
    fn csv_export_has_a_row_per_frame() {
        let mut engine = reference_engine();
        let mut out = Vec::new();
        let rows = engine.write_csv(&mut out).unwrap();
        assert_eq!(rows, 164);

        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 165);
        assert!(lines[0].starts_with("frame_index,video_time,position,phase,rep_count,rep_completed,"));
        let columns = lines[0].split(',').count();
        assert!(lines[1..].iter().all(|line| line.split(',').count() == columns));
        assert!(lines[1].starts_with("0,0.000,"));

        let reps: Vec<&str> = lines[1..]
            .iter()
            .filter(|line| line.split(',').nth(5) == Some("true"))
            .copied()
            .collect();
        assert_eq!(reps.len(), 4);
        assert_eq!(lines[164].split(',').nth(4), Some("4"));
    }

    #[test]
    fn preview_of_an_empty_frame_has_no_angles() {
        let mut recording = recording_from_poses(&[PoseSpec::hinge(0.0, 90.0); 2]);
        recording.frames[0].keypoints.clear();
        let engine = swing_engine(recording);
        let preview = engine.preview(0).unwrap();
        assert!(preview.angles.is_empty());
        assert_eq!(preview.position, None);

        // The analyzer sees the same skeleton the recording stores.
        let stored = engine.recording().frames[1].skeleton().unwrap();
        assert_eq!(stored, pose(PoseSpec::hinge(0.0, 90.0)));
    }
}
