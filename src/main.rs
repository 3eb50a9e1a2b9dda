use std::{path::PathBuf, time::Duration};

use anyhow::{Context, Result, anyhow};
use crossbeam_channel::bounded;
use shape_fit::{
    FeedbackEvent, GameConfig, ManualClock, Session, ShapeRegistry, pipeline::start_replay_stream,
};

const DEFAULT_FPS: f64 = 30.0;

fn main() -> Result<()> {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let usage = || anyhow!("usage: shape-fit <config.json> <shapes-dir> <frames-dir> [fps]");
    let config_path = PathBuf::from(args.next().ok_or_else(usage)?);
    let shapes_dir = PathBuf::from(args.next().ok_or_else(usage)?);
    let frames_dir = PathBuf::from(args.next().ok_or_else(usage)?);
    let fps = match args.next() {
        Some(raw) => raw
            .parse::<f64>()
            .with_context(|| format!("invalid fps `{raw}`"))?,
        None => DEFAULT_FPS,
    };
    if !(fps.is_finite() && fps > 0.0) {
        return Err(anyhow!("fps must be positive, got {fps}"));
    }

    let config = GameConfig::load(&config_path)?;

    let (frame_tx, frame_rx) = bounded(1);
    let stream = start_replay_stream(&frames_dir, frame_tx)?;
    let first = frame_rx
        .recv()
        .with_context(|| format!("no frame decoded from {}", frames_dir.display()))?;

    // Mask recordings fix the capture size that mask shapes must match.
    let mut registry = ShapeRegistry::from_dir(&shapes_dir)?;
    if let Some((width, height)) = first.output.dimensions() {
        log::info!("capture frames are {width}x{height}");
        registry = registry.with_frame_size(width, height);
    }

    let clock = ManualClock::new();
    let mut session = Session::new(config, &registry, clock.clone())?;

    for event in session.start()? {
        report(&event);
    }

    let frame_interval = Duration::from_secs_f64(1.0 / fps);
    for frame in std::iter::once(first).chain(frame_rx.iter()) {
        clock.advance(frame_interval);
        log::trace!("frame {} from {}", frame.index, frame.source.display());
        match session.tick(&frame.output) {
            Ok(events) => events.iter().for_each(report),
            Err(err) => {
                eprintln!("session aborted at frame {}: {err}", frame.index);
                break;
            }
        }
        if session.outcome().is_terminal() {
            break;
        }
    }

    drop(frame_rx);
    stream.stop();

    if !session.outcome().is_terminal() {
        println!(
            "recording ended with the session still running ({:?} left in the round)",
            session.remaining().unwrap_or_default()
        );
    }

    Ok(())
}

fn report(event: &FeedbackEvent) {
    match event {
        FeedbackEvent::RoundStarted(started) => println!(
            "round {}/{}: shape `{}` for {:.0}s",
            started.round_number,
            started.round_count,
            started.shape_id,
            started.duration.as_secs_f64()
        ),
        FeedbackEvent::Progress(progress) => log::debug!(
            "round {} fit {:.1} [{}]{}",
            progress.round_number,
            progress.fit,
            progress.remaining_label(),
            if progress.evidence_missing { " (no body)" } else { "" }
        ),
        FeedbackEvent::RoundResult(result) => println!(
            "round {} `{}`: {:.1}{}",
            result.round_number,
            result.shape_id,
            result.fit,
            if result.meets_threshold { " pass" } else { "" }
        ),
        FeedbackEvent::SessionOutcome(outcome) => {
            println!(
                "session {}: score {} from rounds {:?}",
                outcome.outcome.label(),
                outcome.aggregate_score,
                outcome.round_scores
            );
            if outcome.should_capture_snapshot {
                println!("snapshot requested");
            }
        }
    }
}
