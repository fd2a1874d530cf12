// SPDX-License-Identifier: MPL-2.0
//! Shared media types and FFmpeg helpers.
//!
//! [`Frame`] is the unit passed between the engine, the frame sampler, the
//! recording pipeline and the snapshot service. Pixel data sits behind an
//! `Arc` so sampling a frame never copies the buffer.

pub mod frame_export;
pub mod video;

use std::sync::Arc;

pub use frame_export::ExportFormat;
pub use video::{extract_thumbnail, extract_video_metadata, init_ffmpeg, VideoMetadata};

/// A rendered video frame in RGBA8 layout.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// RGBA pixel data (width × height × 4 bytes), tightly packed.
    pub rgba_data: Arc<Vec<u8>>,

    /// Frame width in pixels.
    pub width: u32,

    /// Frame height in pixels.
    pub height: u32,

    /// Source presentation timestamp in seconds.
    pub pts_secs: f64,
}

impl Frame {
    #[must_use]
    pub fn new(rgba_data: Arc<Vec<u8>>, width: u32, height: u32, pts_secs: f64) -> Self {
        Self {
            rgba_data,
            width,
            height,
            pts_secs,
        }
    }

    /// Creates a frame filled with a single RGBA color. Mostly useful for tests.
    #[must_use]
    pub fn solid(width: u32, height: u32, rgba: [u8; 4], pts_secs: f64) -> Self {
        let pixels = rgba.repeat((width * height) as usize);
        Self::new(Arc::new(pixels), width, height, pts_secs)
    }

    /// Returns the total size in bytes.
    #[must_use]
    pub fn size_bytes(&self) -> usize {
        self.rgba_data.len()
    }

    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Returns true if the buffer length matches the declared dimensions.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.rgba_data.len() == (self.width as usize) * (self.height as usize) * 4
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_calculates_size() {
        let frame = Frame::solid(1920, 1080, [0, 0, 0, 255], 0.0);
        assert_eq!(frame.size_bytes(), 1920 * 1080 * 4);
        assert_eq!(frame.dimensions(), (1920, 1080));
        assert!(frame.is_consistent());
    }

    #[test]
    fn clone_shares_pixel_buffer() {
        let frame = Frame::solid(4, 4, [255, 0, 0, 255], 1.5);
        let copy = frame.clone();
        assert!(Arc::ptr_eq(&frame.rgba_data, &copy.rgba_data));
    }

    #[test]
    fn inconsistent_buffer_is_detected() {
        let frame = Frame::new(Arc::new(vec![0u8; 10]), 4, 4, 0.0);
        assert!(!frame.is_consistent());
    }
}
