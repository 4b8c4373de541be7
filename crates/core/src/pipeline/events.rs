use std::sync::Arc;

use serde::Serialize;
use tokio::sync::broadcast;

use crate::{
    analyzer::CandidateMap, classifier::DetectionResult, exercise::ExerciseId, skeleton::Skeleton,
};

/// One frame's skeleton, for overlays. `skeleton` is `None` when nobody was
/// found in the frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkeletonEvent {
    pub skeleton: Option<Arc<Skeleton>>,
    pub timestamp: f64,
    pub video_time: Option<f64>,
}

impl SkeletonEvent {
    pub fn new(skeleton: Skeleton, timestamp: f64, video_time: Option<f64>) -> Self {
        Self {
            skeleton: Some(Arc::new(skeleton)),
            timestamp,
            video_time,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultEvent {
    pub skeleton: Arc<Skeleton>,
    pub rep_count: u32,
    pub position: Option<String>,
    pub timestamp: f64,
}

/// Published when a rep completes, with the best frame of every position in
/// that rep's cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckpointEvent {
    pub exercise: ExerciseId,
    pub rep_number: u32,
    pub candidates: CandidateMap,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DetectionEvent {
    pub exercise: ExerciseId,
    pub confidence: u8,
}

impl DetectionEvent {
    pub fn from_result(result: DetectionResult) -> Option<Self> {
        result.exercise.map(|exercise| Self {
            exercise,
            confidence: result.confidence,
        })
    }
}

/// One broadcast channel per event category. Every subscriber sees every
/// event published after it subscribed; publishing with no subscribers is a
/// no-op.
#[derive(Debug, Clone)]
pub struct EventBus {
    skeletons: broadcast::Sender<SkeletonEvent>,
    results: broadcast::Sender<ResultEvent>,
    checkpoints: broadcast::Sender<CheckpointEvent>,
    detections: broadcast::Sender<DetectionEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            skeletons: broadcast::channel(capacity).0,
            results: broadcast::channel(capacity).0,
            checkpoints: broadcast::channel(capacity).0,
            detections: broadcast::channel(capacity).0,
        }
    }

    pub fn subscribe_skeletons(&self) -> broadcast::Receiver<SkeletonEvent> {
        self.skeletons.subscribe()
    }

    pub fn subscribe_results(&self) -> broadcast::Receiver<ResultEvent> {
        self.results.subscribe()
    }

    pub fn subscribe_checkpoints(&self) -> broadcast::Receiver<CheckpointEvent> {
        self.checkpoints.subscribe()
    }

    pub fn subscribe_detections(&self) -> broadcast::Receiver<DetectionEvent> {
        self.detections.subscribe()
    }

    pub(crate) fn publish_skeleton(&self, event: SkeletonEvent) {
        let _ = self.skeletons.send(event);
    }

    pub(crate) fn publish_result(&self, event: ResultEvent) {
        let _ = self.results.send(event);
    }

    pub(crate) fn publish_checkpoint(&self, event: CheckpointEvent) {
        let _ = self.checkpoints.send(event);
    }

    pub(crate) fn publish_detection(&self, event: DetectionEvent) {
        let _ = self.detections.send(event);
    }
}
