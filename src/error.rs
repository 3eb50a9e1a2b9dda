use thiserror::Error;

use crate::types::EvidenceKind;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ShapeError {
    #[error("shape `{0}` is not registered")]
    NotFound(String),
    #[error("shape `{id}` is corrupt: {reason}")]
    Corrupt { id: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvidenceError {
    #[error("vision output carries {found} data but the active shape needs {expected}")]
    KindMismatch {
        expected: EvidenceKind,
        found: EvidenceKind,
    },
    /// No body signal in the frame. Scored as a zero fit.
    #[error("no body signal in frame")]
    Empty,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScoreError {
    #[error("cannot score {evidence} evidence against a {shape} shape")]
    KindMismatch {
        shape: EvidenceKind,
        evidence: EvidenceKind,
    },
    #[error("evidence raster is {evidence:?} but the shape raster is {shape:?}")]
    DimensionMismatch {
        shape: (u32, u32),
        evidence: (u32, u32),
    },
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("threshold must be within 0..=100, got {0}")]
    ThresholdOutOfRange(f32),
    #[error("round count must be at least 1")]
    NoRounds,
    #[error("round duration must be positive, got {0}s")]
    InvalidRoundDuration(f64),
    #[error("no shape ids configured")]
    NoShapes,
    #[error("{shapes} shape ids given for {rounds} rounds; expected 1 or {rounds}")]
    ShapeCountMismatch { shapes: usize, rounds: u32 },
    #[error("minimum keypoint confidence must be within 0..=1, got {0}")]
    InvalidConfidence(f32),
    #[error("mask inversion ratio must be within (0, 1], got {0}")]
    InvalidInversionRatio(f32),
}

/// Faults that end a session. Per-tick data faults never reach this type.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SessionError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Shape(#[from] ShapeError),
    #[error("session aborted: vision output carries {found} data but shape `{shape_id}` needs {expected}")]
    EvidenceKindMismatch {
        shape_id: String,
        expected: EvidenceKind,
        found: EvidenceKind,
    },
    #[error("session has not been started")]
    NotStarted,
    #[error("session was already started")]
    AlreadyStarted,
    #[error("session was aborted after a configuration fault")]
    Aborted,
}

impl SessionError {
    /// Configuration faults are setup problems the player cannot fix by moving.
    pub fn is_configuration_fault(&self) -> bool {
        matches!(
            self,
            SessionError::Config(_)
                | SessionError::Shape(_)
                | SessionError::EvidenceKindMismatch { .. }
        )
    }
}
