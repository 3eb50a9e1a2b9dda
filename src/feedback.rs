use std::time::Duration;

use crate::{
    session::{Round, RoundEnd},
    types::{FitResult, MaskCoverage, ScoringPolicy, SessionOutcome},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventKind {
    RoundStarted,
    Progress,
    RoundResult,
    SessionOutcome,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RoundStartedEvent {
    pub round_number: usize,
    pub round_count: usize,
    pub shape_id: String,
    pub duration: Duration,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ProgressEvent {
    pub round_number: usize,
    pub fit: f32,
    pub meets_threshold: bool,
    /// Fit mapped linearly onto 0.0..=1.0 for the overlay.
    pub overlay_opacity: f32,
    pub remaining: Duration,
    /// True when the frame carried no body signal and was scored as zero.
    pub evidence_missing: bool,
    pub coverage: Option<MaskCoverage>,
}

impl ProgressEvent {
    /// Countdown as `MM:SS`, rounding partial seconds up.
    pub fn remaining_label(&self) -> String {
        let secs = self.remaining.as_secs() + u64::from(self.remaining.subsec_nanos() > 0);
        format!("{:02}:{:02}", secs / 60, secs % 60)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct RoundResultEvent {
    pub round_number: usize,
    pub shape_id: String,
    pub fit: f32,
    pub meets_threshold: bool,
    pub ended_by: RoundEnd,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SessionOutcomeEvent {
    pub outcome: SessionOutcome,
    pub aggregate_score: u32,
    pub round_scores: Vec<f32>,
    /// Ask the I/O collaborator to save a photo of this frame.
    pub should_capture_snapshot: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub enum FeedbackEvent {
    RoundStarted(RoundStartedEvent),
    Progress(ProgressEvent),
    RoundResult(RoundResultEvent),
    SessionOutcome(SessionOutcomeEvent),
}

impl FeedbackEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            FeedbackEvent::RoundStarted(_) => EventKind::RoundStarted,
            FeedbackEvent::Progress(_) => EventKind::Progress,
            FeedbackEvent::RoundResult(_) => EventKind::RoundResult,
            FeedbackEvent::SessionOutcome(_) => EventKind::SessionOutcome,
        }
    }
}

/// What the emitter needs to know about a finished session.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionSummary {
    pub outcome: SessionOutcome,
    pub policy: ScoringPolicy,
    pub aggregate_score: u32,
    pub round_scores: Vec<f32>,
    pub capture_on_completion: bool,
}

/// Turns scorer and state machine output into presentation events.
///
/// Only the kind of the last event is remembered; once a session outcome has
/// been emitted every further call yields nothing.
#[derive(Clone, Debug, Default)]
pub struct FeedbackEmitter {
    last: Option<EventKind>,
}

impl FeedbackEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_event(&self) -> Option<EventKind> {
        self.last
    }

    pub fn finished(&self) -> bool {
        self.last == Some(EventKind::SessionOutcome)
    }

    pub fn on_round_start(&mut self, round: &Round, round_count: usize) -> Option<RoundStartedEvent> {
        self.record(EventKind::RoundStarted)?;
        Some(RoundStartedEvent {
            round_number: round.number(),
            round_count,
            shape_id: round.shape().id().to_owned(),
            duration: round.duration(),
        })
    }

    pub fn on_frame(
        &mut self,
        round_number: usize,
        result: &FitResult,
        remaining: Duration,
        evidence_missing: bool,
    ) -> Option<ProgressEvent> {
        self.record(EventKind::Progress)?;
        Some(ProgressEvent {
            round_number,
            fit: result.fit,
            meets_threshold: result.meets_threshold,
            overlay_opacity: (result.fit / 100.0).clamp(0.0, 1.0),
            remaining,
            evidence_missing,
            coverage: result.coverage,
        })
    }

    pub fn on_round_end(&mut self, round: &Round) -> Option<RoundResultEvent> {
        let ended_by = round.ended_by()?;
        self.record(EventKind::RoundResult)?;
        let result = round.final_result();
        Some(RoundResultEvent {
            round_number: round.number(),
            shape_id: round.shape().id().to_owned(),
            fit: result.fit,
            meets_threshold: result.meets_threshold,
            ended_by,
        })
    }

    pub fn on_session_end(&mut self, summary: &SessionSummary) -> Option<SessionOutcomeEvent> {
        if !summary.outcome.is_terminal() {
            return None;
        }
        self.record(EventKind::SessionOutcome)?;

        let should_capture_snapshot = match (summary.policy, summary.outcome) {
            (ScoringPolicy::FirstThresholdPass, SessionOutcome::Won) => true,
            (ScoringPolicy::AverageAllRounds, SessionOutcome::Won) => {
                summary.capture_on_completion
            }
            _ => false,
        };

        Some(SessionOutcomeEvent {
            outcome: summary.outcome,
            aggregate_score: summary.aggregate_score,
            round_scores: summary.round_scores.clone(),
            should_capture_snapshot,
        })
    }

    fn record(&mut self, kind: EventKind) -> Option<()> {
        if self.finished() {
            log::debug!("dropping {kind:?} event after session outcome");
            return None;
        }
        self.last = Some(kind);
        Some(())
    }
}
