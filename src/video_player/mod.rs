// SPDX-License-Identifier: MPL-2.0
//! Unified video playback and recording.
//!
//! A [`PlayerHandle`] drives one playback session at a time. Decoding runs on
//! FFmpeg behind the [`MediaEngine`] trait, recording samples the displayed
//! frame at a fixed rate and encodes it to MP4 behind [`FrameWriter`].

mod controller;
mod decoder;
mod encoder;
mod engine;
mod rates;
mod recorder;
mod sampler;
mod snapshot;
mod state;
#[cfg(test)]
mod test_support;
pub mod time_units;

pub use controller::{PlayerBuilder, PlayerHandle, Thumbnailer};
pub use decoder::{FfmpegEngine, FfmpegEngineFactory};
pub use encoder::{FfmpegFrameWriter, FfmpegWriterFactory};
pub use engine::{
    EngineEvent, EngineFactory, EngineState, MediaEngine, MediaOptions, ENGINE_EVENT_CAPACITY,
};
pub use rates::{RecordingFps, SamplerRateHz};
pub use recorder::{
    AppendOutcome, FrameWriter, Recorder, RecordingSession, RecordingStats, RecordingSummary,
    WriterFactory,
};
pub use sampler::FrameSampler;
pub use snapshot::{capture_frame, encode_snapshot, Snapshot};
pub use state::{PlaybackMachine, PlaybackState, PlayerEvent, SessionConfig, Source};
