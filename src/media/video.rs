// SPDX-License-Identifier: MPL-2.0
//! FFmpeg bootstrap, first-frame thumbnails and container probing.

use crate::error::{Error, Result};
use crate::media::Frame;
use ffmpeg_next::{format, media, software::scaling};
use std::path::Path;
use std::sync::{Arc, Once};

static FFMPEG_INIT: Once = Once::new();

/// Initializes FFmpeg once per process and quiets its logging to errors only.
///
/// Safe to call from any thread, any number of times.
pub fn init_ffmpeg() -> Result<()> {
    let mut init_result: Result<()> = Ok(());

    FFMPEG_INIT.call_once(|| {
        if let Err(e) = ffmpeg_next::init() {
            init_result = Err(Error::Setup(format!("FFmpeg initialization failed: {e}")));
            return;
        }

        // SAFETY: av_log_set_level only stores a global integer.
        unsafe {
            ffmpeg_next::ffi::av_log_set_level(ffmpeg_next::ffi::AV_LOG_ERROR);
        }
        log::debug!("FFmpeg initialized");
    });

    init_result
}

/// Container-level facts about a video source.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoMetadata {
    pub width: u32,
    pub height: u32,
    /// Duration in seconds, 0.0 when the container does not report one (live streams).
    pub duration_secs: f64,
    pub fps: f64,
    pub has_audio: bool,
}

/// Copies a packed RGBA plane out of an FFmpeg frame, dropping row padding.
pub(crate) fn packed_rgba(frame: &ffmpeg_next::frame::Video) -> Vec<u8> {
    let width = frame.width() as usize;
    let height = frame.height() as usize;
    let stride = frame.stride(0);
    let plane = frame.data(0);
    let row_bytes = width * 4;

    if stride == row_bytes {
        return plane[..row_bytes * height].to_vec();
    }

    let mut out = Vec::with_capacity(row_bytes * height);
    for row in plane.chunks(stride).take(height) {
        out.extend_from_slice(&row[..row_bytes]);
    }
    out
}

/// Decodes the first video frame of `locator` into an RGBA [`Frame`].
///
/// Used for the static preview shown before playback starts. Runs to
/// completion on the calling thread, so async callers should wrap it in
/// `spawn_blocking`.
pub fn extract_thumbnail<P: AsRef<Path>>(locator: P) -> Result<Frame> {
    init_ffmpeg()?;

    let locator = locator.as_ref();
    let mut ictx = format::input(&locator)
        .map_err(|e| Error::Setup(format!("Cannot open {}: {e}", locator.display())))?;

    let stream = ictx
        .streams()
        .best(media::Type::Video)
        .ok_or_else(|| Error::Setup("No video stream found".to_string()))?;
    let stream_index = stream.index();
    let time_base = stream.time_base();

    let mut decoder = ffmpeg_next::codec::context::Context::from_parameters(stream.parameters())
        .and_then(|ctx| ctx.decoder().video())
        .map_err(|e| Error::Setup(format!("Cannot create video decoder: {e}")))?;

    let (width, height) = (decoder.width(), decoder.height());
    if width == 0 || height == 0 {
        return Err(Error::Setup(format!(
            "Invalid video dimensions: {width}x{height}"
        )));
    }

    let mut scaler = scaling::Context::get(
        decoder.format(),
        width,
        height,
        format::Pixel::RGBA,
        width,
        height,
        scaling::Flags::BILINEAR,
    )
    .map_err(|e| Error::Setup(format!("Cannot create scaler: {e}")))?;

    let mut decoded = ffmpeg_next::frame::Video::empty();
    let mut rgba = ffmpeg_next::frame::Video::empty();

    for (packet_stream, packet) in ictx.packets() {
        if packet_stream.index() != stream_index {
            continue;
        }
        decoder
            .send_packet(&packet)
            .map_err(|e| Error::Playback(format!("Cannot decode packet: {e}")))?;

        if decoder.receive_frame(&mut decoded).is_ok() {
            scaler
                .run(&decoded, &mut rgba)
                .map_err(|e| Error::Playback(format!("Cannot convert frame: {e}")))?;

            let pts_secs = decoded
                .timestamp()
                .map(|pts| pts as f64 * f64::from(time_base))
                .unwrap_or(0.0)
                .max(0.0);

            log::debug!(
                "Thumbnail extracted from {} ({}x{})",
                locator.display(),
                rgba.width(),
                rgba.height()
            );
            return Ok(Frame::new(
                Arc::new(packed_rgba(&rgba)),
                rgba.width(),
                rgba.height(),
                pts_secs,
            ));
        }
    }

    Err(Error::Setup("Could not decode first frame".to_string()))
}

/// Reads dimensions, duration, frame rate and audio presence without decoding.
pub fn extract_video_metadata<P: AsRef<Path>>(locator: P) -> Result<VideoMetadata> {
    init_ffmpeg()?;

    let locator = locator.as_ref();
    let ictx = format::input(&locator)
        .map_err(|e| Error::Setup(format!("Cannot open {}: {e}", locator.display())))?;

    let stream = ictx
        .streams()
        .best(media::Type::Video)
        .ok_or_else(|| Error::Setup("No video stream found".to_string()))?;

    let decoder = ffmpeg_next::codec::context::Context::from_parameters(stream.parameters())
        .and_then(|ctx| ctx.decoder().video())
        .map_err(|e| Error::Setup(format!("Cannot create video decoder: {e}")))?;

    let (width, height) = (decoder.width(), decoder.height());
    if width == 0 || height == 0 {
        return Err(Error::Setup(format!(
            "Invalid video dimensions: {width}x{height}"
        )));
    }

    let duration_secs = if stream.duration() > 0 {
        stream.duration() as f64 * f64::from(stream.time_base())
    } else if ictx.duration() > 0 {
        ictx.duration() as f64 / f64::from(ffmpeg_next::ffi::AV_TIME_BASE)
    } else {
        0.0
    };

    let rate = stream.avg_frame_rate();
    let fps = if rate.denominator() != 0 {
        f64::from(rate)
    } else {
        0.0
    };

    Ok(VideoMetadata {
        width,
        height,
        duration_secs,
        fps,
        has_audio: ictx.streams().best(media::Type::Audio).is_some(),
    })
}
