use std::fmt;

use image::GrayImage;
use serde::Deserialize;

#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Point) -> f32 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EvidenceKind {
    Keypoints,
    Mask,
}

impl fmt::Display for EvidenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvidenceKind::Keypoints => f.write_str("keypoint"),
            EvidenceKind::Mask => f.write_str("mask"),
        }
    }
}

/// One joint reported by the pose estimator.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct DetectedJoint {
    pub name: String,
    pub x: f32,
    pub y: f32,
    #[serde(default)]
    pub confidence: Option<f32>,
}

impl DetectedJoint {
    pub fn new(name: impl Into<String>, x: f32, y: f32) -> Self {
        Self {
            name: name.into(),
            x,
            y,
            confidence: None,
        }
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn position(&self) -> Point {
        Point::new(self.x, self.y)
    }
}

/// Whatever the external vision collaborator produced for a frame.
#[derive(Clone, Debug)]
pub enum VisionOutput {
    Keypoints(Vec<DetectedJoint>),
    /// Segmentation output; any non-zero pixel is body.
    Mask(GrayImage),
    /// The estimator ran but found nobody.
    Nothing,
}

impl VisionOutput {
    pub fn kind(&self) -> Option<EvidenceKind> {
        match self {
            VisionOutput::Keypoints(_) => Some(EvidenceKind::Keypoints),
            VisionOutput::Mask(_) => Some(EvidenceKind::Mask),
            VisionOutput::Nothing => None,
        }
    }

    /// Raster size of a mask frame.
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        match self {
            VisionOutput::Mask(image) => Some(image.dimensions()),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MaskCoverage {
    pub overlap: usize,
    pub shape_area: usize,
    pub body_area: usize,
    /// Body pixels outside the shape relative to the shape area, capped at 100.
    pub excess_percent: u8,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FitResult {
    pub fit: f32,
    pub meets_threshold: bool,
    pub coverage: Option<MaskCoverage>,
}

impl FitResult {
    pub fn new(fit: f32, threshold: f32) -> Self {
        let fit = if fit.is_nan() { 0.0 } else { fit.clamp(0.0, 100.0) };
        Self {
            fit,
            meets_threshold: fit >= threshold,
            coverage: None,
        }
    }

    /// Fit for a tick with no usable evidence.
    pub fn zero(threshold: f32) -> Self {
        Self::new(0.0, threshold)
    }

    pub fn with_coverage(mut self, coverage: MaskCoverage) -> Self {
        self.coverage = Some(coverage);
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScoringPolicy {
    /// Every round runs to its deadline; the session reports the mean fit.
    AverageAllRounds,
    /// The first tick at or above the threshold wins the session.
    FirstThresholdPass,
}

impl ScoringPolicy {
    pub fn label(&self) -> &'static str {
        match self {
            ScoringPolicy::AverageAllRounds => "graded",
            ScoringPolicy::FirstThresholdPass => "threshold",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionOutcome {
    InProgress,
    Won,
    Lost,
    Aborted,
}

impl SessionOutcome {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SessionOutcome::InProgress)
    }

    pub fn label(&self) -> &'static str {
        match self {
            SessionOutcome::InProgress => "in progress",
            SessionOutcome::Won => "won",
            SessionOutcome::Lost => "lost",
            SessionOutcome::Aborted => "aborted",
        }
    }
}
