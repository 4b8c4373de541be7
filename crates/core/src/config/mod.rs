use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{exercise::ExerciseId, Result};

/// Top-level configuration structure for the application.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub pipeline: PipelineConfig,
    pub replay: ReplayConfig,
}

impl AppConfig {
    /// Reads a JSON config file. Missing fields take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Ok(serde_json::from_str(&text)?)
    }
}

/// Configuration of the live analysis pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Exercise analysed until the classifier decides otherwise.
    pub default_exercise: ExerciseId,
    /// Replace the analyzer when the classifier locks onto another exercise.
    pub auto_switch: bool,
    /// Keep the rep count when the analyzer is replaced.
    pub carry_reps_across_swap: bool,
    /// Buffered events per subscriber and channel.
    pub event_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            default_exercise: ExerciseId::KettlebellSwing,
            auto_switch: true,
            carry_reps_across_swap: true,
            event_capacity: 256,
        }
    }
}

/// Configuration of recorded playback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayConfig {
    pub speed: f64,
    #[serde(rename = "loop")]
    pub looped: bool,
    /// Pace playback at this rate instead of the recording's own.
    pub fps_override: Option<f64>,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            speed: 1.0,
            looped: false,
            fps_override: None,
        }
    }
}
