//! Core library for the Swing Analyzer.
//!
//! Turns time-ordered body-pose frames into rep counts, movement checkpoints
//! and form scores. Exercises are described declaratively; one generic
//! analyzer runs every one of them. Each module owns a distinct subsystem
//! (skeleton geometry, exercise registry, the form analyzer, classification,
//! orchestration, recorded replay and scoring against annotations).

pub mod analyzer;
pub mod classifier;
pub mod config;
pub mod error;
pub mod evaluation;
pub mod exercise;
pub mod pipeline;
pub mod quality;
pub mod recording;
pub mod replay;
pub mod skeleton;
pub mod source;
pub mod timeline;

#[cfg(test)]
mod test_support;

pub use analyzer::{
    CandidateMap, FormAnalyzer, FrameAnalysis, Phase, PositionCandidate, POSITION_MATCH_THRESHOLD,
};
pub use classifier::{DetectionResult, ExerciseClassifier, LOCK_CONFIDENCE};
pub use config::{AppConfig, PipelineConfig, ReplayConfig};
pub use error::{AnalyzerError, Result};
pub use evaluation::{Annotation, Evaluation, PositionMetrics, DEFAULT_FRAME_TOLERANCE};
pub use exercise::{ExerciseDefinition, ExerciseId, ExerciseRegistry};
pub use pipeline::{
    CheckpointEvent, DetectionEvent, EventBus, Pipeline, PipelineResult, ResultEvent,
    SkeletonEvent, StreamSummary,
};
pub use recording::{extract_recording, Recording, RecordingMetadata};
pub use replay::{FramePreview, PlaybackOutcome, ReplayEngine, ReplayStep, ReplaySummary};
pub use skeleton::{Keypoint, KeypointName, RawKeypoint, Skeleton};
pub use source::{FrameSource, PoseEstimator, VideoFrame};
pub use timeline::PlaybackClock;
