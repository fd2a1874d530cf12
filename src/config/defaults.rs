// SPDX-License-Identifier: MPL-2.0
//! Centralized default values for all configuration constants.
//!
//! This module serves as the single source of truth for default values
//! used across the player. Constants are organized by category.
//!
//! # Categories
//!
//! - **Sampler**: Display-refresh rate driving frame capture
//! - **Recording**: Nominal output frame rate and bit rate
//! - **Progress**: Interval between progress notifications

// ==========================================================================
// Sampler Defaults
// ==========================================================================

/// Default frame sampler rate, matching a common 60 Hz display refresh.
pub const DEFAULT_SAMPLER_RATE_HZ: u32 = 60;

/// Minimum sampler rate.
pub const MIN_SAMPLER_RATE_HZ: u32 = 1;

/// Maximum sampler rate (high refresh panels).
pub const MAX_SAMPLER_RATE_HZ: u32 = 240;

// ==========================================================================
// Recording Defaults
// ==========================================================================

/// Nominal frame rate used to derive recording timestamps.
pub const DEFAULT_RECORDING_FPS: u32 = 30;

/// Minimum recording frame rate.
pub const MIN_RECORDING_FPS: u32 = 1;

/// Maximum recording frame rate.
pub const MAX_RECORDING_FPS: u32 = 120;

/// Target bit rate for recorded video, in bits per second.
pub const DEFAULT_RECORDING_BIT_RATE: usize = 4_000_000;

/// Frames the encoder worker may hold before the pipeline starts dropping.
pub const DEFAULT_ENCODER_QUEUE_FRAMES: usize = 8;

/// Subdirectory (under the user's video directory) for auto-named recordings.
pub const DEFAULT_RECORDINGS_SUBDIR: &str = "recordings";

// ==========================================================================
// Progress Defaults
// ==========================================================================

/// Interval between progress notifications while playing (milliseconds).
pub const DEFAULT_PROGRESS_INTERVAL_MS: u64 = 250;

/// Minimum progress interval (milliseconds).
pub const MIN_PROGRESS_INTERVAL_MS: u64 = 50;

/// Maximum progress interval (milliseconds).
pub const MAX_PROGRESS_INTERVAL_MS: u64 = 5_000;

// ==========================================================================
// Compile-time Validation
// ==========================================================================

const _: () = {
    assert!(MIN_SAMPLER_RATE_HZ > 0);
    assert!(MAX_SAMPLER_RATE_HZ >= MIN_SAMPLER_RATE_HZ);
    assert!(DEFAULT_SAMPLER_RATE_HZ >= MIN_SAMPLER_RATE_HZ);
    assert!(DEFAULT_SAMPLER_RATE_HZ <= MAX_SAMPLER_RATE_HZ);

    assert!(MIN_RECORDING_FPS > 0);
    assert!(MAX_RECORDING_FPS >= MIN_RECORDING_FPS);
    assert!(DEFAULT_RECORDING_FPS >= MIN_RECORDING_FPS);
    assert!(DEFAULT_RECORDING_FPS <= MAX_RECORDING_FPS);
    assert!(DEFAULT_ENCODER_QUEUE_FRAMES > 0);

    assert!(MIN_PROGRESS_INTERVAL_MS > 0);
    assert!(MAX_PROGRESS_INTERVAL_MS >= MIN_PROGRESS_INTERVAL_MS);
    assert!(DEFAULT_PROGRESS_INTERVAL_MS >= MIN_PROGRESS_INTERVAL_MS);
    assert!(DEFAULT_PROGRESS_INTERVAL_MS <= MAX_PROGRESS_INTERVAL_MS);
};
