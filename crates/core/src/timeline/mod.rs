use std::time::Duration;

use crate::{AnalyzerError, Result};

/// Wall-clock pacing for recorded playback.
#[derive(Debug, Clone)]
pub struct PlaybackClock {
    fps: f64,
    speed: f64,
    time_seconds: f64,
}

impl PlaybackClock {
    pub fn new(fps: f64, speed: f64) -> Result<Self> {
        if !fps.is_finite() || fps <= 0.0 {
            return Err(AnalyzerError::msg(format!("invalid playback fps {fps}")));
        }
        if !speed.is_finite() || speed <= 0.0 {
            return Err(AnalyzerError::msg(format!("invalid playback speed {speed}")));
        }
        Ok(Self {
            fps,
            speed,
            time_seconds: 0.0,
        })
    }

    /// Real time between two frames: `1000 / fps / speed` milliseconds.
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.fps / self.speed)
    }

    pub fn fps(&self) -> f64 {
        self.fps
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    /// Position in media time.
    pub fn time_seconds(&self) -> f64 {
        self.time_seconds
    }

    pub fn reset(&mut self) {
        self.time_seconds = 0.0;
    }

    pub fn advance_frame(&mut self) {
        self.time_seconds += 1.0 / self.fps;
    }
}
