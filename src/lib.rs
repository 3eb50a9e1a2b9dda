pub mod clock;
pub mod config;
pub mod error;
pub mod evidence;
pub mod feedback;
pub mod mask;
pub mod pipeline;
pub mod scoring;
pub mod session;
pub mod shape;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::GameConfig;
pub use error::{ConfigError, EvidenceError, ScoreError, SessionError, ShapeError};
pub use evidence::{Evidence, EvidenceAdapter, ExpectedEvidence};
pub use feedback::{FeedbackEmitter, FeedbackEvent};
pub use scoring::{ScoringStrategy, strategy_for};
pub use session::{Round, RoundEnd, Session, SessionState};
pub use shape::{Anchor, Shape, ShapeRegistry};
pub use types::{
    DetectedJoint, EvidenceKind, FitResult, Point, ScoringPolicy, SessionOutcome, VisionOutput,
};
