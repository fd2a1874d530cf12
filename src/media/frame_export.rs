// SPDX-License-Identifier: MPL-2.0
//! Still-image encoding of decoded frames.
//!
//! Snapshots are encoded in memory; the binding layer wants bytes, not a
//! file. The CLI names files on disk with [`generate_default_filename`].

use crate::error::{Error, Result};
use crate::media::Frame;
use image_rs::{DynamicImage, ImageBuffer, ImageFormat, Rgba};
use std::io::Cursor;
use std::path::Path;

/// Image container used for snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExportFormat {
    /// Lossless. What the binding layer receives unless told otherwise.
    #[default]
    Png,
    Jpeg,
    WebP,
}

impl ExportFormat {
    #[must_use]
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Png => "png",
            ExportFormat::Jpeg => "jpg",
            ExportFormat::WebP => "webp",
        }
    }

    /// MIME type, used when building `data:` URIs.
    #[must_use]
    pub fn mime_type(&self) -> &'static str {
        match self {
            ExportFormat::Png => "image/png",
            ExportFormat::Jpeg => "image/jpeg",
            ExportFormat::WebP => "image/webp",
        }
    }

    fn image_format(self) -> ImageFormat {
        match self {
            ExportFormat::Png => ImageFormat::Png,
            ExportFormat::Jpeg => ImageFormat::Jpeg,
            ExportFormat::WebP => ImageFormat::WebP,
        }
    }

    #[must_use]
    pub fn from_extension(ext: &str) -> Option<ExportFormat> {
        match ext.to_lowercase().as_str() {
            "png" => Some(ExportFormat::Png),
            "jpg" | "jpeg" => Some(ExportFormat::Jpeg),
            "webp" => Some(ExportFormat::WebP),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Option<ExportFormat> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(Self::from_extension)
    }
}

fn to_dynamic_image(frame: &Frame) -> Result<DynamicImage> {
    let buffer: ImageBuffer<Rgba<u8>, Vec<u8>> =
        ImageBuffer::from_raw(frame.width, frame.height, frame.rgba_data.to_vec()).ok_or_else(
            || {
                Error::Encode(format!(
                    "Frame buffer of {} bytes does not match {}x{}",
                    frame.rgba_data.len(),
                    frame.width,
                    frame.height
                ))
            },
        )?;
    Ok(DynamicImage::ImageRgba8(buffer))
}

/// Encodes `frame` into an in-memory image of the given format.
///
/// JPEG has no alpha channel, so the frame is flattened to RGB first.
pub fn encode_frame(frame: &Frame, format: ExportFormat) -> Result<Vec<u8>> {
    let image = to_dynamic_image(frame)?;
    let mut out = Cursor::new(Vec::new());

    match format {
        ExportFormat::Jpeg => DynamicImage::ImageRgb8(image.to_rgb8())
            .write_to(&mut out, format.image_format())?,
        _ => image.write_to(&mut out, format.image_format())?,
    }

    Ok(out.into_inner())
}

/// Builds `{source_stem}_frame_{MM-SS-mmm}.{ext}` for a snapshot taken at
/// `position_secs`.
#[must_use]
pub fn generate_default_filename(source: &str, position_secs: f64, format: ExportFormat) -> String {
    let stem = Path::new(source)
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .unwrap_or("video");

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let total_ms = (position_secs.max(0.0) * 1000.0).round() as u64;

    format!(
        "{}_frame_{:02}-{:02}-{:03}.{}",
        stem,
        total_ms / 60_000,
        (total_ms % 60_000) / 1000,
        total_ms % 1000,
        format.extension()
    )
}
