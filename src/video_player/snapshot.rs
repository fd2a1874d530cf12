// SPDX-License-Identifier: MPL-2.0
//! One-shot still capture of the current frame.

use crate::error::{Error, Result};
use crate::media::frame_export::{encode_frame, generate_default_filename, ExportFormat};
use crate::media::Frame;
use base64::Engine as _;
use std::path::{Path, PathBuf};
use tokio::sync::oneshot;

/// An encoded still image.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub format: ExportFormat,
    pub width: u32,
    pub height: u32,
    /// Source position of the captured frame, in seconds.
    pub position_secs: f64,
    pub bytes: Vec<u8>,
}

impl Snapshot {
    /// Standard base64 of the encoded image, the payload the binding layer
    /// hands to JavaScript.
    #[must_use]
    pub fn to_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(&self.bytes)
    }

    #[must_use]
    pub fn to_data_uri(&self) -> String {
        format!("data:{};base64,{}", self.format.mime_type(), self.to_base64())
    }

    /// Writes the encoded image to `target`. A directory target gets a file
    /// named after `source` and the capture position. Returns the path written.
    pub fn save_to(&self, target: &Path, source: &str) -> Result<PathBuf> {
        let path = if target.is_dir() {
            target.join(generate_default_filename(
                source,
                self.position_secs,
                self.format,
            ))
        } else {
            target.to_path_buf()
        };
        std::fs::write(&path, &self.bytes)
            .map_err(|e| Error::Io(format!("Cannot write {}: {e}", path.display())))?;
        Ok(path)
    }
}

/// Encodes `frame` synchronously.
pub fn encode_snapshot(frame: &Frame, format: ExportFormat) -> Result<Snapshot> {
    let bytes = encode_frame(frame, format)?;
    Ok(Snapshot {
        format,
        width: frame.width,
        height: frame.height,
        position_secs: frame.pts_secs,
        bytes,
    })
}

/// Captures `frame` and delivers the encoded result on `reply`.
///
/// The frame is read by the caller at request time; a missing frame fails
/// immediately with [`Error::NoFrameAvailable`]. Encoding happens on the
/// blocking pool. `reply` receives exactly one value.
pub fn capture_frame(
    frame: Option<Frame>,
    format: ExportFormat,
    reply: oneshot::Sender<Result<Snapshot>>,
) {
    let Some(frame) = frame else {
        let _ = reply.send(Err(Error::NoFrameAvailable));
        return;
    };

    tokio::task::spawn_blocking(move || {
        let result = encode_snapshot(&frame, format);
        if let Err(e) = &result {
            log::warn!("Snapshot encoding failed: {e}");
        }
        if reply.send(result).is_err() {
            log::debug!("Snapshot requester went away");
        }
    });
}
