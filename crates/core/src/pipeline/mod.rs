//! Orchestration: frames in, analysis and events out.
//!
//! A [`Pipeline`] owns exactly one [`FormAnalyzer`] and one
//! [`ExerciseClassifier`]. It is driven in one of three ways, all of which end
//! up in the same private analysis step:
//!
//! * [`Pipeline::run`] consumes a push-based frame stream and publishes
//!   events on the [`EventBus`];
//! * [`Pipeline::process_frame_async`] pulls the current frame from a
//!   [`FrameSource`] and hands the result straight back;
//! * [`Pipeline::process_skeleton_event`] takes an already built skeleton,
//!   runs the classifier and may hot-swap the analyzer.
//!
//! Per-frame faults never escape: the frame is logged and skipped.

mod events;

use std::sync::Arc;

use futures::{Stream, StreamExt};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

pub use events::{CheckpointEvent, DetectionEvent, EventBus, ResultEvent, SkeletonEvent};

use crate::{
    analyzer::{CandidateMap, FormAnalyzer, FrameAnalysis},
    classifier::{DetectionResult, ExerciseClassifier, LOCK_CONFIDENCE},
    config::PipelineConfig,
    exercise::{ExerciseId, ExerciseRegistry},
    skeleton::Skeleton,
    source::{FrameSource, PoseEstimator, VideoFrame},
    AnalyzerError, Result,
};

/// What one processed frame produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineResult {
    pub skeleton: Arc<Skeleton>,
    pub exercise: ExerciseId,
    /// Session rep count, including reps carried over from swapped analyzers.
    pub rep_count: u32,
    pub analysis: FrameAnalysis,
    /// Classifier output for this frame, when the classifier ran.
    pub detection: Option<DetectionResult>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StreamSummary {
    pub frames_received: usize,
    pub frames_analyzed: usize,
    /// Frames with nobody in them.
    pub frames_empty: usize,
    /// Frames dropped because estimation or analysis failed.
    pub frames_skipped: usize,
    pub rep_count: u32,
    pub cancelled: bool,
}

pub struct Pipeline<E> {
    estimator: E,
    config: PipelineConfig,
    registry: &'static ExerciseRegistry,
    analyzer: FormAnalyzer,
    classifier: ExerciseClassifier,
    events: EventBus,
    /// Reps counted by analyzers that have since been swapped out.
    rep_offset: u32,
    /// Most recent cycle snapshot no checkpoint has claimed yet.
    unclaimed_cycle: Option<CandidateMap>,
    /// Rep whose checkpoint waits for its cycle to close.
    pending_checkpoint: Option<PendingCheckpoint>,
}

#[derive(Debug, Clone, Copy)]
struct PendingCheckpoint {
    exercise: ExerciseId,
    rep_number: u32,
}

impl<E: PoseEstimator> Pipeline<E> {
    /// Starts on `config.default_exercise`.
    pub fn new(estimator: E, config: PipelineConfig) -> Result<Self> {
        Self::with_registry(estimator, config, ExerciseRegistry::global())
    }

    /// Like [`Pipeline::new`], resolving exercises in `registry` instead of
    /// the built-in one.
    pub fn with_registry(
        estimator: E,
        config: PipelineConfig,
        registry: &'static ExerciseRegistry,
    ) -> Result<Self> {
        let definition = registry.get(config.default_exercise)?;
        Ok(Self {
            estimator,
            events: EventBus::new(config.event_capacity),
            config,
            registry,
            analyzer: FormAnalyzer::new(definition),
            classifier: ExerciseClassifier::new(),
            rep_offset: 0,
            unclaimed_cycle: None,
            pending_checkpoint: None,
        })
    }

    /// Starts on the exercise named `exercise` (identifier or display name).
    pub fn with_exercise(estimator: E, mut config: PipelineConfig, exercise: &str) -> Result<Self> {
        let definition = ExerciseRegistry::global()
            .find_by_name(exercise)
            .ok_or_else(|| AnalyzerError::UnknownExercise(exercise.to_string()))?;
        config.default_exercise = definition.id;
        Self::new(estimator, config)
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn analyzer(&self) -> &FormAnalyzer {
        &self.analyzer
    }

    pub fn classifier(&self) -> &ExerciseClassifier {
        &self.classifier
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn exercise(&self) -> ExerciseId {
        self.analyzer.exercise()
    }

    pub fn rep_count(&self) -> u32 {
        self.rep_offset + self.analyzer.rep_count()
    }

    /// Back to the default exercise with a fresh analyzer and classifier.
    pub fn reset(&mut self) {
        self.classifier.reset();
        self.rep_offset = 0;
        self.unclaimed_cycle = None;
        self.pending_checkpoint = None;
        match self.registry.get(self.config.default_exercise) {
            Ok(definition) => self.analyzer = FormAnalyzer::new(definition),
            Err(_) => self.analyzer.reset(),
        }
    }

    /// Pins the exercise and switches to it. Automatic switching stays off
    /// until [`Pipeline::reset`].
    pub fn set_exercise_type(&mut self, exercise: ExerciseId) -> Result<()> {
        self.classifier.set_exercise_type(exercise);
        if exercise != self.exercise() {
            self.swap_analyzer(exercise)?;
        }
        Ok(())
    }

    /// Streaming mode. Runs until the stream ends or `cancel` fires.
    pub async fn run<S>(&mut self, frames: S, cancel: &CancellationToken) -> Result<StreamSummary>
    where
        S: Stream<Item = VideoFrame>,
    {
        let mut frames = std::pin::pin!(frames);
        let mut summary = StreamSummary::default();

        loop {
            let frame = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    summary.cancelled = true;
                    break;
                }
                next = frames.next() => match next {
                    Some(frame) => frame,
                    None => break,
                },
            };
            summary.frames_received += 1;

            let estimate = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    summary.cancelled = true;
                    break;
                }
                estimate = self.estimator.estimate(&frame) => estimate,
            };

            let skeleton = match estimate {
                Ok(keypoints) => Skeleton::from_raw(&keypoints),
                Err(err) => {
                    tracing::warn!(timestamp = frame.timestamp, error = %err, "pose estimation failed, skipping frame");
                    summary.frames_skipped += 1;
                    continue;
                }
            };

            let Some(skeleton) = skeleton else {
                self.events.publish_skeleton(SkeletonEvent {
                    skeleton: None,
                    timestamp: frame.timestamp,
                    video_time: frame.video_time,
                });
                summary.frames_empty += 1;
                continue;
            };

            let skeleton = Arc::new(skeleton);
            self.events.publish_skeleton(SkeletonEvent {
                skeleton: Some(Arc::clone(&skeleton)),
                timestamp: frame.timestamp,
                video_time: frame.video_time,
            });

            match self.analyze(skeleton, frame.timestamp, frame.video_time, None) {
                Some(result) => {
                    self.publish(&result, frame.timestamp);
                    summary.frames_analyzed += 1;
                }
                None => summary.frames_skipped += 1,
            }
        }

        self.flush_pending_checkpoint();
        summary.rep_count = self.rep_count();
        tracing::info!(
            frames = summary.frames_received,
            reps = summary.rep_count,
            skipped = summary.frames_skipped,
            cancelled = summary.cancelled,
            "frame stream finished"
        );
        Ok(summary)
    }

    /// Direct mode: analyse whatever frame `source` currently shows. Nothing
    /// is published. `None` when there is no frame, no person, or the frame
    /// had to be skipped.
    pub async fn process_frame_async<S>(&mut self, source: &mut S) -> Option<PipelineResult>
    where
        S: FrameSource + ?Sized,
    {
        let frame = source.current_frame()?;
        let keypoints = match self.estimator.estimate(&frame).await {
            Ok(keypoints) => keypoints,
            Err(err) => {
                tracing::warn!(timestamp = frame.timestamp, error = %err, "pose estimation failed, skipping frame");
                return None;
            }
        };
        let skeleton = Skeleton::from_raw(&keypoints)?;
        self.analyze(Arc::new(skeleton), frame.timestamp, frame.video_time, None)
    }

    /// Injected mode: analyse a skeleton built elsewhere. While the classifier
    /// is unlocked it sees the frame too, and a confident guess for another
    /// exercise replaces the analyzer before this frame is analysed.
    pub fn process_skeleton_event(&mut self, event: SkeletonEvent) -> Option<PipelineResult> {
        let skeleton = event.skeleton?;

        let mut detection = None;
        if !self.classifier.is_locked() {
            let result = self.classifier.process_frame(&skeleton);
            if let Some(detected) = DetectionEvent::from_result(result) {
                self.events.publish_detection(detected);
            }
            self.maybe_hot_swap(result);
            detection = Some(result);
        }

        let result = self.analyze(skeleton, event.timestamp, event.video_time, detection)?;
        self.publish(&result, event.timestamp);
        Some(result)
    }

    fn maybe_hot_swap(&mut self, detection: DetectionResult) {
        let Some(detected) = detection.exercise else {
            return;
        };
        if !self.config.auto_switch
            || self.classifier.is_manual_override()
            || detection.confidence < LOCK_CONFIDENCE
            || detected == self.exercise()
        {
            return;
        }
        if let Err(err) = self.swap_analyzer(detected) {
            tracing::warn!(exercise = %detected, error = %err, "could not switch exercise");
        }
    }

    /// Replaces the analyzer with a fresh one for `exercise`. Must only be
    /// called between frames.
    fn swap_analyzer(&mut self, exercise: ExerciseId) -> Result<()> {
        let definition = self.registry.get(exercise)?;
        let previous = self.analyzer.exercise();
        let previous_reps = self.analyzer.rep_count();

        self.rep_offset = if self.config.carry_reps_across_swap {
            self.rep_offset + previous_reps
        } else {
            0
        };
        self.flush_pending_checkpoint();
        self.unclaimed_cycle = None;
        self.analyzer = FormAnalyzer::new(definition);

        tracing::info!(
            from = %previous,
            to = %exercise,
            carried_reps = self.rep_offset,
            "switched exercise analyzer"
        );
        Ok(())
    }

    /// The single path into the analyzer.
    fn analyze(
        &mut self,
        skeleton: Arc<Skeleton>,
        timestamp: f64,
        video_time: Option<f64>,
        detection: Option<DetectionResult>,
    ) -> Option<PipelineResult> {
        match self.analyzer.process_frame(&skeleton, timestamp, video_time) {
            Ok(analysis) => Some(PipelineResult {
                skeleton,
                exercise: self.analyzer.exercise(),
                rep_count: self.rep_count(),
                analysis,
                detection,
            }),
            Err(err) => {
                tracing::warn!(timestamp, error = %err, "analysis failed, skipping frame");
                None
            }
        }
    }

    /// Publishes the result event and pairs each completed rep with the
    /// cycle it belongs to. Depending on the exercise's thresholds the rep can
    /// complete before or after its cycle closes; a rep that finishes first
    /// waits for the next cycle snapshot.
    fn publish(&mut self, result: &PipelineResult, timestamp: f64) {
        self.events.publish_result(ResultEvent {
            skeleton: Arc::clone(&result.skeleton),
            rep_count: result.rep_count,
            position: result.analysis.position.clone(),
            timestamp,
        });

        if let Some(cycle) = &result.analysis.cycle_candidates {
            match self.pending_checkpoint.take() {
                Some(pending) => self.publish_checkpoint(pending, cycle.clone()),
                None => self.unclaimed_cycle = Some(cycle.clone()),
            }
        }

        if result.analysis.rep_completed {
            let rep = PendingCheckpoint {
                exercise: result.exercise,
                rep_number: result.rep_count,
            };
            match self.unclaimed_cycle.take() {
                Some(cycle) => self.publish_checkpoint(rep, cycle),
                None => {
                    self.flush_pending_checkpoint();
                    self.pending_checkpoint = Some(rep);
                }
            }
        }
    }

    /// Publishes a waiting checkpoint with the cycle collected so far.
    fn flush_pending_checkpoint(&mut self) {
        if let Some(pending) = self.pending_checkpoint.take() {
            tracing::debug!(
                rep = pending.rep_number,
                "publishing checkpoint before its cycle closed"
            );
            let candidates = self.analyzer.candidates();
            self.publish_checkpoint(pending, candidates);
        }
    }

    fn publish_checkpoint(&self, rep: PendingCheckpoint, candidates: CandidateMap) {
        self.events.publish_checkpoint(CheckpointEvent {
            exercise: rep.exercise,
            rep_number: rep.rep_number,
            candidates,
        });
    }
}
