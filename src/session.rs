use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use crate::{
    clock::{Clock, SystemClock},
    config::GameConfig,
    error::{EvidenceError, SessionError},
    evidence::EvidenceAdapter,
    feedback::{FeedbackEmitter, FeedbackEvent, SessionSummary},
    scoring::strategy_for,
    shape::{Shape, ShapeRegistry},
    types::{FitResult, ScoringPolicy, SessionOutcome, VisionOutput},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RoundEnd {
    /// Time ran out; the last in-time fit stands.
    Deadline,
    /// A tick met the threshold before time ran out.
    Threshold,
}

/// One timed attempt at a shape. Frozen once it has ended.
#[derive(Clone, Debug)]
pub struct Round {
    index: usize,
    shape: Arc<Shape>,
    started_at: Instant,
    duration: Duration,
    threshold: f32,
    last: Option<FitResult>,
    ended_by: Option<RoundEnd>,
}

impl Round {
    fn new(
        index: usize,
        shape: Arc<Shape>,
        started_at: Instant,
        duration: Duration,
        threshold: f32,
    ) -> Self {
        Self {
            index,
            shape,
            started_at,
            duration,
            threshold,
            last: None,
            ended_by: None,
        }
    }

    /// One-based position within the session.
    pub fn number(&self) -> usize {
        self.index + 1
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn deadline(&self) -> Instant {
        self.started_at + self.duration
    }

    pub fn remaining(&self, now: Instant) -> Duration {
        self.deadline().saturating_duration_since(now)
    }

    pub fn last_result(&self) -> Option<&FitResult> {
        self.last.as_ref()
    }

    /// The fit this round is scored with. A round that never saw an in-time
    /// tick scores zero.
    pub fn final_result(&self) -> FitResult {
        self.last.unwrap_or_else(|| FitResult::zero(self.threshold))
    }

    pub fn ended_by(&self) -> Option<RoundEnd> {
        self.ended_by
    }

    pub fn is_active(&self) -> bool {
        self.ended_by.is_none()
    }

    fn record(&mut self, result: FitResult) {
        if self.is_active() {
            self.last = Some(result);
        }
    }

    fn finish(&mut self, end: RoundEnd) {
        if self.is_active() {
            self.ended_by = Some(end);
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    NotStarted,
    RoundActive,
    Won,
    Lost,
    Aborted,
}

/// A full game run. Terminal states are final: build a new session to replay.
///
/// Rounds are evaluated inside the tick that reaches their deadline, so the
/// evaluated-but-not-advanced state is never observable between ticks.
pub struct Session<C: Clock = SystemClock> {
    config: GameConfig,
    shapes: Vec<Arc<Shape>>,
    adapter: EvidenceAdapter,
    emitter: FeedbackEmitter,
    clock: C,
    rounds: Vec<Round>,
    state: SessionState,
}

impl<C: Clock> Session<C> {
    /// Validates the configuration and loads every round's shape up front, so
    /// configuration faults surface before any round starts.
    pub fn new(config: GameConfig, registry: &ShapeRegistry, clock: C) -> Result<Self, SessionError> {
        config.validate()?;

        let shapes = (0..config.round_count as usize)
            .map(|round| registry.load(config.shape_for_round(round)))
            .collect::<Result<Vec<_>, _>>()?;

        log::info!(
            "{} session ready: {} round(s) of {:.1}s, threshold {}",
            config.scoring_policy.label(),
            config.round_count,
            config.round_duration_secs,
            config.threshold
        );

        Ok(Self {
            adapter: EvidenceAdapter::from_config(&config),
            config,
            shapes,
            emitter: FeedbackEmitter::new(),
            clock,
            rounds: Vec::new(),
            state: SessionState::NotStarted,
        })
    }

    pub fn config(&self) -> &GameConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn outcome(&self) -> SessionOutcome {
        match self.state {
            SessionState::NotStarted | SessionState::RoundActive => SessionOutcome::InProgress,
            SessionState::Won => SessionOutcome::Won,
            SessionState::Lost => SessionOutcome::Lost,
            SessionState::Aborted => SessionOutcome::Aborted,
        }
    }

    pub fn rounds(&self) -> &[Round] {
        &self.rounds
    }

    pub fn current_round(&self) -> Option<&Round> {
        self.rounds.last().filter(|round| round.is_active())
    }

    /// Time left in the active round.
    pub fn remaining(&self) -> Option<Duration> {
        let now = self.clock.now();
        self.current_round().map(|round| round.remaining(now))
    }

    /// Rounded mean of the final fits of every evaluated round.
    pub fn aggregate_score(&self) -> Option<u32> {
        let scores = self.round_scores();
        if scores.is_empty() {
            return None;
        }
        let mean = scores.iter().map(|&fit| fit as f64).sum::<f64>() / scores.len() as f64;
        Some(mean.round() as u32)
    }

    fn round_scores(&self) -> Vec<f32> {
        self.rounds
            .iter()
            .filter(|round| !round.is_active())
            .map(|round| round.final_result().fit)
            .collect()
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            outcome: self.outcome(),
            policy: self.config.scoring_policy,
            aggregate_score: self.aggregate_score().unwrap_or(0),
            round_scores: self.round_scores(),
            capture_on_completion: self.config.capture_on_completion,
        }
    }

    pub fn start(&mut self) -> Result<Vec<FeedbackEvent>, SessionError> {
        if self.state != SessionState::NotStarted {
            return Err(SessionError::AlreadyStarted);
        }

        let now = self.clock.now();
        let mut events = Vec::new();
        self.start_round(0, now, &mut events);
        Ok(events)
    }

    /// Feeds one frame of vision output through the adapter and scorer.
    ///
    /// Empty frames score zero and the round continues. A frame whose kind
    /// cannot satisfy the active shape aborts the session.
    pub fn tick(&mut self, raw: &VisionOutput) -> Result<Vec<FeedbackEvent>, SessionError> {
        match self.state {
            SessionState::NotStarted => return Err(SessionError::NotStarted),
            SessionState::Aborted => return Err(SessionError::Aborted),
            SessionState::Won | SessionState::Lost => {
                log::debug!("ignoring tick after session ended");
                return Ok(Vec::new());
            }
            SessionState::RoundActive => {}
        }

        let now = self.clock.now();
        let mut events = Vec::new();
        self.close_expired_rounds(now, &mut events);
        if self.state != SessionState::RoundActive {
            return Ok(events);
        }
        let Some(index) = self.rounds.len().checked_sub(1) else {
            return Err(SessionError::NotStarted);
        };

        let shape = Arc::clone(&self.rounds[index].shape);
        let threshold = self.config.threshold;
        let (result, evidence_missing) = match self.adapter.adapt(raw, shape.expected_evidence()) {
            Ok(evidence) => match strategy_for(shape.kind()).score(&shape, &evidence, threshold) {
                Ok(result) => (result, false),
                Err(err) => {
                    log::warn!("scoring failed, counting frame as zero: {err}");
                    (FitResult::zero(threshold), true)
                }
            },
            Err(EvidenceError::Empty) => {
                log::debug!("no body signal in frame");
                (FitResult::zero(threshold), true)
            }
            Err(EvidenceError::KindMismatch { expected, found }) => {
                self.state = SessionState::Aborted;
                log::error!(
                    "aborting session: vision output carries {found} data but shape `{}` needs {expected}",
                    shape.id()
                );
                return Err(SessionError::EvidenceKindMismatch {
                    shape_id: shape.id().to_owned(),
                    expected,
                    found,
                });
            }
        };

        let round = &mut self.rounds[index];
        round.record(result);
        let remaining = round.remaining(now);
        if let Some(event) =
            self.emitter
                .on_frame(round.number(), &result, remaining, evidence_missing)
        {
            events.push(FeedbackEvent::Progress(event));
        }

        if self.config.scoring_policy == ScoringPolicy::FirstThresholdPass && result.meets_threshold
        {
            self.finish_round(RoundEnd::Threshold, now, &mut events);
        }

        Ok(events)
    }

    /// Ends every round whose deadline is at or before `now`. Each following
    /// round starts at the previous deadline, so a stalled feed cannot stretch
    /// the session.
    fn close_expired_rounds(&mut self, now: Instant, events: &mut Vec<FeedbackEvent>) {
        while self.state == SessionState::RoundActive {
            let Some(round) = self.rounds.last() else {
                return;
            };
            let deadline = round.deadline();
            if now < deadline {
                return;
            }
            log::debug!("round {} reached its deadline", round.number());
            self.finish_round(RoundEnd::Deadline, deadline, events);
        }
    }

    fn start_round(&mut self, index: usize, now: Instant, events: &mut Vec<FeedbackEvent>) {
        let round = Round::new(
            index,
            Arc::clone(&self.shapes[index]),
            now,
            self.config.round_duration(),
            self.config.threshold,
        );
        log::info!(
            "round {}/{} started with shape `{}`",
            round.number(),
            self.shapes.len(),
            round.shape().id()
        );
        if let Some(event) = self.emitter.on_round_start(&round, self.shapes.len()) {
            events.push(FeedbackEvent::RoundStarted(event));
        }
        self.rounds.push(round);
        self.state = SessionState::RoundActive;
    }

    fn finish_round(&mut self, end: RoundEnd, now: Instant, events: &mut Vec<FeedbackEvent>) {
        let Some(round) = self.rounds.last_mut() else {
            return;
        };
        round.finish(end);
        let index = round.index;
        log::info!(
            "round {} ended by {:?} with fit {:.1}",
            round.number(),
            end,
            round.final_result().fit
        );
        if let Some(event) = self.emitter.on_round_end(round) {
            events.push(FeedbackEvent::RoundResult(event));
        }

        let has_next = index + 1 < self.shapes.len();
        match (self.config.scoring_policy, end) {
            (ScoringPolicy::FirstThresholdPass, RoundEnd::Threshold) => {
                self.conclude(SessionState::Won, events)
            }
            _ if has_next => self.start_round(index + 1, now, events),
            (ScoringPolicy::FirstThresholdPass, RoundEnd::Deadline) => {
                self.conclude(SessionState::Lost, events)
            }
            (ScoringPolicy::AverageAllRounds, _) => self.conclude(SessionState::Won, events),
        }
    }

    fn conclude(&mut self, state: SessionState, events: &mut Vec<FeedbackEvent>) {
        self.state = state;
        let summary = self.summary();
        log::info!(
            "session {} with aggregate score {}",
            summary.outcome.label(),
            summary.aggregate_score
        );
        if let Some(event) = self.emitter.on_session_end(&summary) {
            events.push(FeedbackEvent::SessionOutcome(event));
        }
    }
}

#[cfg(test)]
mod tests {
    use image::{GrayImage, Luma};

    use super::*;
    use crate::{
        clock::ManualClock,
        error::{ConfigError, ShapeError},
        feedback::{EventKind, SessionOutcomeEvent},
        mask::BinaryMask,
        shape::Anchor,
        types::{DetectedJoint, EvidenceKind},
    };

    const SIDE: u32 = 20;

    fn in_block(x: u32, y: u32) -> bool {
        (5..15).contains(&x) && (5..15).contains(&y)
    }

    fn registry() -> ShapeRegistry {
        let mut registry = ShapeRegistry::new();
        // 100-pixel target, so a body covering k of its pixels fits at exactly k
        registry.register_mask("block", BinaryMask::from_fn(SIDE, SIDE, in_block));
        registry.register_keypoints(
            "star",
            vec![
                Anchor::new("head", 50.0, 10.0, 10.0),
                Anchor::new("left_hand", 10.0, 50.0, 10.0),
                Anchor::new("right_hand", 90.0, 50.0, 10.0),
            ],
        );
        registry
    }

    /// Body mask covering the first `k` target pixels in row-major order.
    fn covering(k: u32) -> VisionOutput {
        VisionOutput::Mask(GrayImage::from_fn(SIDE, SIDE, |x, y| {
            let set = in_block(x, y) && (y - 5) * 10 + (x - 5) < k;
            Luma([if set { 255 } else { 0 }])
        }))
    }

    fn kinds(events: &[FeedbackEvent]) -> Vec<EventKind> {
        events.iter().map(FeedbackEvent::kind).collect()
    }

    fn outcome(events: &[FeedbackEvent]) -> Option<&SessionOutcomeEvent> {
        events.iter().find_map(|event| match event {
            FeedbackEvent::SessionOutcome(outcome) => Some(outcome),
            _ => None,
        })
    }

    fn threshold_session(clock: &ManualClock) -> Session<ManualClock> {
        Session::new(GameConfig::threshold_mode("block"), &registry(), clock.clone()).unwrap()
    }

    #[test]
    fn test_threshold_mode_wins_early() {
        let clock = ManualClock::new();
        let mut session = threshold_session(&clock);
        let started = session.start().unwrap();
        assert_eq!(kinds(&started), vec![EventKind::RoundStarted]);

        clock.advance_secs(1.0);
        let first = session.tick(&VisionOutput::Nothing).unwrap();
        assert_eq!(kinds(&first), vec![EventKind::Progress]);

        clock.advance_secs(1.0);
        let second = session.tick(&covering(60)).unwrap();
        assert_eq!(kinds(&second), vec![EventKind::Progress]);
        assert_eq!(session.state(), SessionState::RoundActive);

        clock.advance_secs(1.0);
        let third = session.tick(&covering(100)).unwrap();
        assert_eq!(
            kinds(&third),
            vec![
                EventKind::Progress,
                EventKind::RoundResult,
                EventKind::SessionOutcome
            ]
        );
        let won = outcome(&third).unwrap();
        assert_eq!(won.outcome, SessionOutcome::Won);
        assert!(won.should_capture_snapshot);
        assert_eq!(won.aggregate_score, 100);
        assert_eq!(session.state(), SessionState::Won);
        assert_eq!(session.rounds()[0].ended_by(), Some(RoundEnd::Threshold));

        clock.advance_secs(1.0);
        assert!(session.tick(&covering(100)).unwrap().is_empty());
    }

    #[test]
    fn test_threshold_mode_loses_at_deadline() {
        let clock = ManualClock::new();
        let mut session = threshold_session(&clock);
        session.start().unwrap();

        for _ in 0..4 {
            clock.advance_secs(60.0);
            let events = session.tick(&covering(94)).unwrap();
            assert_eq!(kinds(&events), vec![EventKind::Progress]);
        }

        clock.advance_secs(59.0);
        let events = session.tick(&covering(90)).unwrap();
        assert_eq!(kinds(&events), vec![EventKind::Progress]);
        assert_eq!(session.remaining(), Some(Duration::from_secs(1)));

        clock.advance_secs(1.0);
        let events = session.tick(&covering(100)).unwrap();
        assert_eq!(
            kinds(&events),
            vec![EventKind::RoundResult, EventKind::SessionOutcome]
        );
        let lost = outcome(&events).unwrap();
        assert_eq!(lost.outcome, SessionOutcome::Lost);
        assert!(!lost.should_capture_snapshot);
        assert_eq!(lost.aggregate_score, 90);
        assert_eq!(session.outcome(), SessionOutcome::Lost);
    }

    #[test]
    fn test_threshold_boundary_is_a_pass() {
        let clock = ManualClock::new();
        let mut session = threshold_session(&clock);
        session.start().unwrap();
        clock.advance_secs(1.0);
        let events = session.tick(&covering(95)).unwrap();
        assert_eq!(outcome(&events).unwrap().outcome, SessionOutcome::Won);
    }

    #[test]
    fn test_graded_mode_averages_rounds() {
        let clock = ManualClock::new();
        let config = GameConfig::graded_mode(vec!["block".to_string()]);
        let mut session = Session::new(config, &registry(), clock.clone()).unwrap();
        session.start().unwrap();

        let fits = [80, 90, 70, 100, 60, 85, 95];
        let mut last_events = Vec::new();
        for (round, &fit) in fits.iter().enumerate() {
            clock.advance_secs(5.0);
            let events = session.tick(&covering(fit)).unwrap();
            assert_eq!(kinds(&events), vec![EventKind::Progress]);

            // the deadline tick closes the round and opens the next one
            clock.advance_secs(5.0);
            last_events = session.tick(&covering(0)).unwrap();
            if round + 1 < fits.len() {
                assert_eq!(
                    kinds(&last_events),
                    vec![
                        EventKind::RoundResult,
                        EventKind::RoundStarted,
                        EventKind::Progress
                    ]
                );
            }
        }

        assert_eq!(
            kinds(&last_events),
            vec![EventKind::RoundResult, EventKind::SessionOutcome]
        );
        let done = outcome(&last_events).unwrap();
        assert_eq!(done.outcome, SessionOutcome::Won);
        assert_eq!(done.aggregate_score, 83);
        assert_eq!(
            done.round_scores,
            vec![80.0, 90.0, 70.0, 100.0, 60.0, 85.0, 95.0]
        );
        assert!(done.should_capture_snapshot);
        assert_eq!(session.rounds().len(), 7);
    }

    #[test]
    fn test_graded_mode_keeps_latest_fit() {
        let clock = ManualClock::new();
        let mut config = GameConfig::graded_mode(vec!["block".to_string()]);
        config.round_count = 1;
        let mut session = Session::new(config, &registry(), clock.clone()).unwrap();
        session.start().unwrap();

        clock.advance_secs(2.0);
        let events = session.tick(&covering(100)).unwrap();
        // a pass does not end a graded round early
        assert_eq!(kinds(&events), vec![EventKind::Progress]);
        clock.advance_secs(2.0);
        session.tick(&covering(40)).unwrap();
        clock.advance_secs(6.0);
        let events = session.tick(&VisionOutput::Nothing).unwrap();
        assert_eq!(outcome(&events).unwrap().aggregate_score, 40);
    }

    #[test]
    fn test_stalled_feed_closes_every_expired_round() {
        let clock = ManualClock::new();
        let config = GameConfig::graded_mode(vec!["block".to_string()]);
        let mut session = Session::new(config, &registry(), clock.clone()).unwrap();
        session.start().unwrap();

        clock.advance_secs(2.0);
        session.tick(&covering(70)).unwrap();
        clock.advance_secs(33.0);
        let events = session.tick(&covering(40)).unwrap();
        assert_eq!(
            kinds(&events),
            vec![
                EventKind::RoundResult,
                EventKind::RoundStarted,
                EventKind::RoundResult,
                EventKind::RoundStarted,
                EventKind::RoundResult,
                EventKind::RoundStarted,
                EventKind::Progress
            ]
        );
        let rounds = session.rounds();
        assert_eq!(rounds.len(), 4);
        assert_eq!(
            rounds[3].started_at() - rounds[0].started_at(),
            Duration::from_secs(30)
        );
        assert_eq!(session.remaining(), Some(Duration::from_secs(5)));

        clock.advance_secs(100.0);
        let events = session.tick(&VisionOutput::Nothing).unwrap();
        let done = outcome(&events).unwrap();
        assert_eq!(
            done.round_scores,
            vec![70.0, 0.0, 0.0, 40.0, 0.0, 0.0, 0.0]
        );
        assert_eq!(done.aggregate_score, 16);
        assert_eq!(session.state(), SessionState::Won);
    }

    #[test]
    fn test_full_cover_of_large_shape_wins() {
        // 80 of 100 pixels belong to the shape
        let rows = |_: u32, y: u32| y < 8;
        let mut registry = registry();
        registry.register_mask("wide", BinaryMask::from_fn(10, 10, rows));
        let frame = |set: &dyn Fn(u32, u32) -> bool| {
            VisionOutput::Mask(GrayImage::from_fn(10, 10, |x, y| {
                Luma([if set(x, y) { 255 } else { 0 }])
            }))
        };

        for body in [frame(&|_: u32, _: u32| true), frame(&rows)] {
            let clock = ManualClock::new();
            let mut session =
                Session::new(GameConfig::threshold_mode("wide"), &registry, clock.clone())
                    .unwrap();
            session.start().unwrap();
            clock.advance_secs(1.0);
            let events = session.tick(&body).unwrap();
            match events.first() {
                Some(FeedbackEvent::Progress(progress)) => {
                    assert_eq!(progress.fit, 100.0);
                    assert!(!progress.evidence_missing);
                }
                other => panic!("unexpected event {other:?}"),
            }
            assert_eq!(outcome(&events).unwrap().outcome, SessionOutcome::Won);
            assert_eq!(session.state(), SessionState::Won);
        }
    }

    #[test]
    fn test_round_without_ticks_scores_zero() {
        let clock = ManualClock::new();
        let mut config = GameConfig::graded_mode(vec!["block".to_string()]);
        config.round_count = 2;
        let mut session = Session::new(config, &registry(), clock.clone()).unwrap();
        session.start().unwrap();

        clock.advance_secs(10.0);
        session.tick(&covering(50)).unwrap();
        clock.advance_secs(3.0);
        session.tick(&covering(50)).unwrap();
        clock.advance_secs(7.0);
        let events = session.tick(&covering(50)).unwrap();
        let done = outcome(&events).unwrap();
        assert_eq!(done.round_scores, vec![0.0, 50.0]);
        assert_eq!(done.aggregate_score, 25);
    }

    #[test]
    fn test_empty_frames_score_zero_and_continue() {
        let clock = ManualClock::new();
        let mut session = threshold_session(&clock);
        session.start().unwrap();
        clock.advance_secs(1.0);
        let events = session.tick(&covering(0)).unwrap();
        match events.as_slice() {
            [FeedbackEvent::Progress(progress)] => {
                assert_eq!(progress.fit, 0.0);
                assert!(progress.evidence_missing);
            }
            other => panic!("unexpected events {other:?}"),
        }
        assert_eq!(session.state(), SessionState::RoundActive);
    }

    #[test]
    fn test_kind_mismatch_aborts_before_any_round_result() {
        let clock = ManualClock::new();
        let mut session = threshold_session(&clock);
        let mut events = session.start().unwrap();
        clock.advance_secs(1.0);
        let keypoints = VisionOutput::Keypoints(vec![DetectedJoint::new("head", 1.0, 1.0)]);
        let err = session.tick(&keypoints).unwrap_err();
        assert_eq!(
            err,
            SessionError::EvidenceKindMismatch {
                shape_id: "block".to_string(),
                expected: EvidenceKind::Mask,
                found: EvidenceKind::Keypoints,
            }
        );
        assert!(err.is_configuration_fault());
        assert_eq!(session.outcome(), SessionOutcome::Aborted);

        clock.advance_secs(1.0);
        assert_eq!(session.tick(&keypoints), Err(SessionError::Aborted));
        events.extend(session.tick(&covering(100)).unwrap_or_default());
        assert!(!kinds(&events).contains(&EventKind::RoundResult));
    }

    #[test]
    fn test_keypoint_session() {
        let clock = ManualClock::new();
        let mut config = GameConfig::threshold_mode("star");
        config.threshold = 90.0;
        let mut session = Session::new(config, &registry(), clock.clone()).unwrap();
        session.start().unwrap();

        clock.advance_secs(1.0);
        let pose = VisionOutput::Keypoints(vec![
            DetectedJoint::new("head", 50.0, 12.0).with_confidence(0.9),
            DetectedJoint::new("left_hand", 12.0, 50.0).with_confidence(0.9),
            DetectedJoint::new("right_hand", 88.0, 50.0).with_confidence(0.9),
        ]);
        let events = session.tick(&pose).unwrap();
        assert_eq!(outcome(&events).unwrap().outcome, SessionOutcome::Won);
    }

    #[test]
    fn test_configuration_faults_surface_at_construction() {
        let clock = ManualClock::new();
        let missing = Session::new(GameConfig::threshold_mode("nope"), &registry(), clock.clone());
        assert!(matches!(
            missing,
            Err(SessionError::Shape(ShapeError::NotFound(id))) if id == "nope"
        ));

        let mut config = GameConfig::threshold_mode("block");
        config.threshold = -1.0;
        assert!(matches!(
            Session::new(config, &registry(), clock.clone()),
            Err(SessionError::Config(ConfigError::ThresholdOutOfRange(_)))
        ));
    }

    #[test]
    fn test_lifecycle_misuse() {
        let clock = ManualClock::new();
        let mut session = threshold_session(&clock);
        assert_eq!(session.tick(&VisionOutput::Nothing), Err(SessionError::NotStarted));
        session.start().unwrap();
        assert_eq!(session.start(), Err(SessionError::AlreadyStarted));
    }
}
