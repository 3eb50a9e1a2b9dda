use std::{fs, path::Path, time::Duration};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::{error::ConfigError, types::ScoringPolicy};

const GRADED_ROUNDS: u32 = 7;
const GRADED_ROUND_SECS: f64 = 10.0;

/// Immutable game settings, built once and handed to the session.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct GameConfig {
    /// Fit percentage that counts as a pass.
    #[serde(default = "default_threshold")]
    pub threshold: f32,
    #[serde(default = "default_round_count")]
    pub round_count: u32,
    #[serde(default = "default_round_duration_secs")]
    pub round_duration_secs: f64,
    #[serde(default = "default_scoring_policy")]
    pub scoring_policy: ScoringPolicy,
    /// One id for every round, or one per round.
    #[serde(default = "default_shape_ids")]
    pub shape_ids: Vec<String>,
    /// Joints reported below this confidence are treated as absent.
    #[serde(default = "default_min_keypoint_confidence")]
    pub min_keypoint_confidence: f32,
    /// Capture-sized body masks covering more of the frame than this are
    /// assumed inverted.
    #[serde(default = "default_mask_inversion_ratio")]
    pub mask_inversion_ratio: f32,
    /// Request a memento snapshot when a graded session completes.
    #[serde(default = "default_capture_on_completion")]
    pub capture_on_completion: bool,
}

fn default_threshold() -> f32 {
    95.0
}

fn default_round_count() -> u32 {
    1
}

fn default_round_duration_secs() -> f64 {
    300.0
}

fn default_scoring_policy() -> ScoringPolicy {
    ScoringPolicy::FirstThresholdPass
}

fn default_shape_ids() -> Vec<String> {
    vec!["sergipe".to_string()]
}

fn default_min_keypoint_confidence() -> f32 {
    0.2
}

fn default_mask_inversion_ratio() -> f32 {
    0.7
}

fn default_capture_on_completion() -> bool {
    true
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            round_count: default_round_count(),
            round_duration_secs: default_round_duration_secs(),
            scoring_policy: default_scoring_policy(),
            shape_ids: default_shape_ids(),
            min_keypoint_confidence: default_min_keypoint_confidence(),
            mask_inversion_ratio: default_mask_inversion_ratio(),
            capture_on_completion: default_capture_on_completion(),
        }
    }
}

impl GameConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config: GameConfig = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse config {}", path.display()))?;
        Ok(config)
    }

    /// Single five-minute session against one silhouette.
    pub fn threshold_mode(shape_id: impl Into<String>) -> Self {
        Self {
            shape_ids: vec![shape_id.into()],
            ..Self::default()
        }
    }

    /// Seven ten-second rounds whose fits are averaged.
    pub fn graded_mode(shape_ids: Vec<String>) -> Self {
        Self {
            round_count: GRADED_ROUNDS,
            round_duration_secs: GRADED_ROUND_SECS,
            scoring_policy: ScoringPolicy::AverageAllRounds,
            shape_ids,
            ..Self::default()
        }
    }

    pub fn round_duration(&self) -> Duration {
        Duration::from_secs_f64(self.round_duration_secs)
    }

    /// Shape for a zero-based round index.
    pub fn shape_for_round(&self, round: usize) -> &str {
        if self.shape_ids.len() == 1 {
            &self.shape_ids[0]
        } else {
            &self.shape_ids[round]
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.threshold.is_finite() || !(0.0..=100.0).contains(&self.threshold) {
            return Err(ConfigError::ThresholdOutOfRange(self.threshold));
        }
        if self.round_count == 0 {
            return Err(ConfigError::NoRounds);
        }
        // Duration::from_secs_f64 panics on non-finite or overflowing input.
        if !self.round_duration_secs.is_finite()
            || self.round_duration_secs <= 0.0
            || self.round_duration_secs > u32::MAX as f64
        {
            return Err(ConfigError::InvalidRoundDuration(self.round_duration_secs));
        }
        if self.shape_ids.is_empty() {
            return Err(ConfigError::NoShapes);
        }
        if self.shape_ids.len() != 1 && self.shape_ids.len() != self.round_count as usize {
            return Err(ConfigError::ShapeCountMismatch {
                shapes: self.shape_ids.len(),
                rounds: self.round_count,
            });
        }
        if !(0.0..=1.0).contains(&self.min_keypoint_confidence) {
            return Err(ConfigError::InvalidConfidence(self.min_keypoint_confidence));
        }
        if !(self.mask_inversion_ratio > 0.0 && self.mask_inversion_ratio <= 1.0) {
            return Err(ConfigError::InvalidInversionRatio(self.mask_inversion_ratio));
        }
        Ok(())
    }
}
