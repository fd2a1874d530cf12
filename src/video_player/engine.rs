// SPDX-License-Identifier: MPL-2.0
//! Media engine contract consumed by the playback state machine.
//!
//! An engine opens a source, decodes it on its own schedule and reports what
//! happened through [`EngineEvent`]s. Every event carries the generation of
//! the `load`/`seek` request it belongs to, so the state machine can discard
//! callbacks that were overtaken by a newer request.

use crate::error::Result;
use crate::media::Frame;
use tokio::sync::mpsc;

/// Capacity of the engine → controller event channel.
pub const ENGINE_EVENT_CAPACITY: usize = 32;

/// Raw engine lifecycle states, as reported by the decoder.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineState {
    Opening,
    Buffering,
    Playing,
    Paused,
    Stopped,
    Ended,
    Error(String),
}

/// Asynchronous notification from an engine.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    State { state: EngineState, generation: u64 },

    /// Periodic position report while playing.
    Time {
        current_secs: f64,
        duration_secs: f64,
        generation: u64,
    },
}

impl EngineEvent {
    #[must_use]
    pub fn generation(&self) -> u64 {
        match self {
            EngineEvent::State { generation, .. } | EngineEvent::Time { generation, .. } => {
                *generation
            }
        }
    }
}

/// Opaque engine options, passed through verbatim.
///
/// The FFmpeg engine hands them to the demuxer as an options dictionary
/// (`rtsp_transport=tcp`, `timeout=5000000`, ...).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MediaOptions(Vec<(String, String)>);

impl MediaOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses `key=value` strings. A bare `key` becomes `key=""`.
    #[must_use]
    pub fn from_args<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let pairs = args
            .into_iter()
            .filter_map(|arg| {
                let arg = arg.as_ref().trim();
                if arg.is_empty() {
                    return None;
                }
                let arg = arg.trim_start_matches(':').trim_start_matches("--");
                Some(match arg.split_once('=') {
                    Some((k, v)) => (k.to_string(), v.to_string()),
                    None => (arg.to_string(), String::new()),
                })
            })
            .collect();
        Self(pairs)
    }

    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.push((key.into(), value.into()));
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// The playback engine behind a session.
///
/// All methods are non-blocking. Results of `load`, `play`, `pause` and
/// `seek` are observed later through [`EngineEvent`]s. `play` and `pause` are
/// idempotent.
pub trait MediaEngine: Send {
    /// Starts opening `locator`. Events for this load carry `generation`.
    ///
    /// Returns an error only if the request could not be submitted at all;
    /// open failures arrive as `EngineState::Error`.
    fn load(&mut self, locator: &str, options: &MediaOptions, generation: u64) -> Result<()>;

    fn play(&mut self);

    fn pause(&mut self);

    /// Requests a position change. `millis` is already clamped by the caller.
    fn seek(&mut self, millis: i64, generation: u64);

    /// Current position in seconds, 0.0 before the first frame.
    fn current_time(&self) -> f64;

    /// Duration in seconds, 0.0 while unknown.
    fn duration(&self) -> f64;

    /// Most recently rendered frame, `None` before the first one.
    fn current_frame(&self) -> Option<Frame>;

    /// Releases decoder resources. The engine emits nothing afterwards.
    fn stop(&mut self);
}

/// Creates engines bound to an event channel. One engine per session.
pub trait EngineFactory: Send + Sync {
    fn create(&self, events: mpsc::Sender<EngineEvent>) -> Box<dyn MediaEngine>;
}

impl<F> EngineFactory for F
where
    F: Fn(mpsc::Sender<EngineEvent>) -> Box<dyn MediaEngine> + Send + Sync,
{
    fn create(&self, events: mpsc::Sender<EngineEvent>) -> Box<dyn MediaEngine> {
        self(events)
    }
}
