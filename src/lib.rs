// SPDX-License-Identifier: MPL-2.0
//! `unified_player` is a video player core that can record what it shows.
//!
//! It plays local files and network streams through FFmpeg, reports playback
//! lifecycle events for a UI binding layer, captures still frames and records
//! the displayed picture to MP4.

#![doc(html_root_url = "https://docs.rs/unified_player/0.1.0")]

pub mod config;
pub mod error;
pub mod media;
pub mod video_player;
