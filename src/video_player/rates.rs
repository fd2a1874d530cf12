// SPDX-License-Identifier: MPL-2.0
//! Rate newtypes for the frame sampler and the recording encoder.

use crate::config::{
    DEFAULT_RECORDING_FPS, DEFAULT_SAMPLER_RATE_HZ, MAX_RECORDING_FPS, MAX_SAMPLER_RATE_HZ,
    MIN_RECORDING_FPS, MIN_SAMPLER_RATE_HZ,
};
use std::time::Duration;

/// Frame sampler tick rate in Hz.
///
/// Always within 1–240 Hz; out-of-range values are clamped.
///
/// # Example
///
/// ```
/// use unified_player::video_player::SamplerRateHz;
///
/// assert_eq!(SamplerRateHz::new(60).value(), 60);
/// assert_eq!(SamplerRateHz::new(0).value(), 1);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplerRateHz(u32);

impl SamplerRateHz {
    #[must_use]
    pub fn new(value: u32) -> Self {
        Self(value.clamp(MIN_SAMPLER_RATE_HZ, MAX_SAMPLER_RATE_HZ))
    }

    #[must_use]
    pub fn value(self) -> u32 {
        self.0
    }

    /// Time between two sampler ticks.
    #[must_use]
    pub fn period(self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.0))
    }
}

impl Default for SamplerRateHz {
    fn default() -> Self {
        Self(DEFAULT_SAMPLER_RATE_HZ)
    }
}

/// Nominal frame rate of a recording.
///
/// Recording timestamps are `frame_index / fps`, independent of when the
/// sampler actually ticked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordingFps(u32);

impl RecordingFps {
    #[must_use]
    pub fn new(value: u32) -> Self {
        Self(value.clamp(MIN_RECORDING_FPS, MAX_RECORDING_FPS))
    }

    #[must_use]
    pub fn value(self) -> u32 {
        self.0
    }

    /// Duration of one recorded frame.
    #[must_use]
    pub fn frame_interval(self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.0))
    }
}

impl Default for RecordingFps {
    fn default() -> Self {
        Self(DEFAULT_RECORDING_FPS)
    }
}
