// SPDX-License-Identifier: MPL-2.0
//! Error taxonomy for the player core.
//!
//! Engine failures surface once through the `error` notification and leave the
//! session terminal. Recording and snapshot failures are returned to the caller
//! of the command that triggered them.

use thiserror::Error as ThisError;

#[derive(Debug, Clone, PartialEq, ThisError)]
pub enum Error {
    /// The source could not be opened (bad locator, unreachable, no video stream).
    #[error("Setup Error: {0}")]
    Setup(String),

    /// The engine failed while playing. Terminal for the session.
    #[error("Playback Error: {0}")]
    Playback(String),

    /// A seek target fell outside `[0, duration]` and was clamped.
    #[error("Seek target {requested_secs:.3}s out of range, clamped to {clamped_secs:.3}s")]
    SeekOutOfRange {
        requested_secs: f64,
        clamped_secs: f64,
    },

    #[error("A recording is already in progress")]
    AlreadyRecording,

    #[error("No recording in progress")]
    NotRecording,

    /// The recording output could not be opened or written.
    #[error("I/O Error: {0}")]
    Io(String),

    /// The encoder could not be flushed or the container trailer written.
    #[error("Finalize Error: {0}")]
    Finalize(String),

    #[error("No frame has been rendered yet")]
    NoFrameAvailable,

    /// The source changed resolution while a recording was active.
    #[error("Frame dimensions changed from {from_width}x{from_height} to {to_width}x{to_height} during recording")]
    FrameDimensionsChanged {
        from_width: u32,
        from_height: u32,
        to_width: u32,
        to_height: u32,
    },

    /// The session hit a terminal error; only a new `setup` is accepted.
    #[error("Session terminated: {0}")]
    SessionTerminated(String),

    #[error("No media source has been set")]
    NoSession,

    /// The controller task is gone (torn down or panicked).
    #[error("Player controller is no longer running")]
    ControllerClosed,

    #[error("Encode Error: {0}")]
    Encode(String),

    #[error("Config Error: {0}")]
    Config(String),
}

impl Error {
    /// Returns the stable code reported to the binding layer.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Error::Setup(_) => "SOURCE_ERROR",
            Error::Playback(_) => "PLAYBACK_ERROR",
            Error::SeekOutOfRange { .. } => "SEEK_OUT_OF_RANGE",
            Error::AlreadyRecording => "ALREADY_RECORDING",
            Error::NotRecording => "NOT_RECORDING",
            Error::Io(_) => "IO_ERROR",
            Error::Finalize(_) => "FINALIZE_ERROR",
            Error::NoFrameAvailable => "NO_FRAME_AVAILABLE",
            Error::FrameDimensionsChanged { .. } => "DIMENSIONS_CHANGED",
            Error::SessionTerminated(_) => "SESSION_TERMINATED",
            Error::NoSession => "NO_SESSION",
            Error::ControllerClosed => "CONTROLLER_CLOSED",
            Error::Encode(_) => "ENCODE_ERROR",
            Error::Config(_) => "CONFIG_ERROR",
        }
    }

    /// Returns the message without the category prefix added by `Display`.
    #[must_use]
    pub fn detail(&self) -> String {
        match self {
            Error::Setup(m)
            | Error::Playback(m)
            | Error::Io(m)
            | Error::Finalize(m)
            | Error::SessionTerminated(m)
            | Error::Encode(m)
            | Error::Config(m) => m.clone(),
            other => other.to_string(),
        }
    }

    /// Returns true for errors that end the playback session.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Error::Setup(_) | Error::Playback(_))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<ffmpeg_next::Error> for Error {
    fn from(err: ffmpeg_next::Error) -> Self {
        Error::Encode(err.to_string())
    }
}

impl From<image_rs::ImageError> for Error {
    fn from(err: image_rs::ImageError) -> Self {
        Error::Encode(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for Error {
    fn from(err: toml::ser::Error) -> Self {
        Error::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
