use std::{
    fs,
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};

use anyhow::{Context, Result, anyhow};
use crossbeam_channel::{SendTimeoutError, Sender};

use crate::types::{DetectedJoint, VisionOutput};

const SEND_POLL: Duration = Duration::from_millis(50);

/// Recorded vision output for one frame.
#[derive(Clone, Debug)]
pub struct ReplayFrame {
    pub index: usize,
    pub source: PathBuf,
    pub output: VisionOutput,
}

#[derive(Debug)]
pub struct ReplayStream {
    stop: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl ReplayStream {
    pub fn stop(mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for ReplayStream {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Recorded frames in `dir`: `*.png` body masks and `*.json` keypoint sets,
/// in file-name order.
pub fn list_frames(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut frames = fs::read_dir(dir)
        .with_context(|| format!("failed to read frame directory {}", dir.display()))?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("failed to list frame directory {}", dir.display()))?;
    frames.retain(|path| {
        matches!(
            path.extension()
                .and_then(|e| e.to_str())
                .map(|e| e.to_ascii_lowercase())
                .as_deref(),
            Some("png") | Some("json")
        )
    });
    frames.sort();
    Ok(frames)
}

pub fn decode_frame(path: &Path) -> Result<VisionOutput> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match extension.as_deref() {
        Some("png") => {
            let image = image::open(path)
                .with_context(|| format!("failed to decode mask {}", path.display()))?;
            Ok(VisionOutput::Mask(image.to_luma8()))
        }
        Some("json") => {
            let content = fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            let joints: Vec<DetectedJoint> = serde_json::from_str(&content)
                .with_context(|| format!("failed to parse keypoints {}", path.display()))?;
            Ok(VisionOutput::Keypoints(joints))
        }
        _ => Err(anyhow!("unsupported frame file {}", path.display())),
    }
}

/// Decodes recorded frames on a background thread and hands them over
/// `frame_tx` in order. The stream ends when every frame has been sent or the
/// receiver goes away.
pub fn start_replay_stream(dir: &Path, frame_tx: Sender<ReplayFrame>) -> Result<ReplayStream> {
    // Fail fast before spawning the decoder thread.
    let frames = list_frames(dir)?;
    if frames.is_empty() {
        return Err(anyhow!("no recorded frames in {}", dir.display()));
    }
    log::info!("replaying {} frames from {}", frames.len(), dir.display());

    let stop = Arc::new(AtomicBool::new(false));
    let stop_flag = stop.clone();

    let handle = thread::spawn(move || {
        for (index, source) in frames.into_iter().enumerate() {
            if stop_flag.load(Ordering::Relaxed) {
                break;
            }

            let output = match decode_frame(&source) {
                Ok(output) => output,
                Err(err) => {
                    // Keep the tick cadence; the frame counts as an empty one.
                    log::warn!("failed to decode recorded frame: {err:?}");
                    VisionOutput::Nothing
                }
            };

            let mut frame = ReplayFrame {
                index,
                source,
                output,
            };
            loop {
                match frame_tx.send_timeout(frame, SEND_POLL) {
                    Ok(()) => break,
                    Err(SendTimeoutError::Timeout(pending)) => {
                        if stop_flag.load(Ordering::Relaxed) {
                            return;
                        }
                        frame = pending;
                    }
                    Err(SendTimeoutError::Disconnected(_)) => return,
                }
            }
        }
    });

    Ok(ReplayStream {
        stop,
        handle: Some(handle),
    })
}

#[cfg(test)]
mod tests {
    use std::time::{SystemTime, UNIX_EPOCH};

    use crossbeam_channel::bounded;
    use image::{GrayImage, Luma};

    use super::*;

    fn scratch_dir(name: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        let dir = std::env::temp_dir().join(format!("shape-fit-{name}-{nanos}"));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_list_and_decode_frames() {
        let dir = scratch_dir("frames");
        GrayImage::from_fn(4, 4, |x, _| Luma([if x < 2 { 255 } else { 0 }]))
            .save(dir.join("0001.png"))
            .unwrap();
        fs::write(
            dir.join("0000.json"),
            r#"[{"name":"head","x":1.0,"y":2.0,"confidence":0.8}]"#,
        )
        .unwrap();
        fs::write(dir.join("readme.txt"), "ignored").unwrap();

        let frames = list_frames(&dir).unwrap();
        assert_eq!(frames.len(), 2);
        assert!(frames[0].ends_with("0000.json"));

        match decode_frame(&frames[0]).unwrap() {
            VisionOutput::Keypoints(joints) => {
                assert_eq!(joints.len(), 1);
                assert_eq!(joints[0].confidence, Some(0.8));
            }
            other => panic!("unexpected output {other:?}"),
        }
        match decode_frame(&frames[1]).unwrap() {
            VisionOutput::Mask(mask) => assert_eq!(mask.get_pixel(0, 0), &Luma([255])),
            other => panic!("unexpected output {other:?}"),
        }

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_stream_delivers_frames_in_order() {
        let dir = scratch_dir("stream");
        for i in 0..5 {
            fs::write(dir.join(format!("{i:04}.json")), "[]").unwrap();
        }
        fs::write(dir.join("0005.json"), "{broken").unwrap();

        let (frame_tx, frame_rx) = bounded(1);
        let stream = start_replay_stream(&dir, frame_tx).unwrap();
        let frames: Vec<ReplayFrame> = frame_rx.iter().collect();
        stream.stop();

        let indices: Vec<usize> = frames.iter().map(|f| f.index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3, 4, 5]);
        assert!(matches!(frames[5].output, VisionOutput::Nothing));

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_empty_directory_fails_fast() {
        let dir = scratch_dir("empty");
        let (frame_tx, _frame_rx) = bounded(1);
        assert!(start_replay_stream(&dir, frame_tx).is_err());
        fs::remove_dir_all(&dir).ok();
    }
}
