pub mod replay;

pub use replay::{ReplayFrame, ReplayStream, decode_frame, list_frames, start_replay_stream};
