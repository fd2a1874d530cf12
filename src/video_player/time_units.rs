// SPDX-License-Identifier: MPL-2.0
//! Time conversions between the binding layer (milliseconds), the player
//! (seconds) and the encoder (frame-index timestamps).

/// Milliseconds per second as f64 for calculations.
pub const MILLIS_PER_SECOND: f64 = 1_000.0;

/// Converts a seek target in milliseconds to seconds.
///
/// ```
/// use unified_player::video_player::time_units::millis_to_secs;
///
/// assert_eq!(millis_to_secs(1_500), 1.5);
/// assert_eq!(millis_to_secs(-20), -0.02);
/// ```
#[inline]
pub fn millis_to_secs(millis: i64) -> f64 {
    millis as f64 / MILLIS_PER_SECOND
}

/// Converts seconds to whole milliseconds, rounding to nearest.
#[inline]
pub fn secs_to_millis(secs: f64) -> i64 {
    (secs * MILLIS_PER_SECOND).round() as i64
}

/// Clamps a position to `[0, duration]`.
///
/// A non-positive duration means "unknown" and only the lower bound applies.
#[inline]
pub fn clamp_position(secs: f64, duration_secs: f64) -> f64 {
    let secs = if secs.is_finite() { secs.max(0.0) } else { 0.0 };
    if duration_secs > 0.0 {
        secs.min(duration_secs)
    } else {
        secs
    }
}

/// Presentation time in seconds of the `index`-th recorded frame.
#[inline]
pub fn frame_index_to_secs(index: i64, fps: u32) -> f64 {
    index as f64 / f64::from(fps.max(1))
}
