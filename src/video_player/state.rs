// SPDX-License-Identifier: MPL-2.0
//! Playback state machine.
//!
//! Turns the engine's noisy, possibly duplicated callbacks into a stable
//! lifecycle and edge-triggered [`PlayerEvent`]s:
//!
//! ```text
//! Idle -> Opening -> Ready -> Playing <-> Paused
//!                     \          |         /
//!                      +----> Stalled <---+     (auto-resumes to Playing)
//! Ended, Error: terminal until the next load
//! ```
//!
//! Transitions are computed against an explicit previous-state field, so a
//! notification fires only when the state actually changes.

use super::engine::{EngineEvent, EngineState, MediaEngine, MediaOptions};
use super::time_units::{clamp_position, millis_to_secs};
use crate::error::{Error, Result};
use crate::media::Frame;
use tokio::sync::mpsc;

/// Lifecycle of a player session.
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackState {
    /// No source loaded.
    Idle,
    /// `load` issued, waiting for the first decoded frame.
    Opening,
    /// First frame decoded, not playing yet.
    Ready,
    Playing,
    Paused,
    /// Waiting on the engine to refill its buffers.
    Stalled,
    /// Reached the end of the last item without looping.
    Ended,
    /// Engine failure. Only a new `setup` leaves this state.
    Error { message: String },
}

impl PlaybackState {
    #[must_use]
    pub fn is_playing(&self) -> bool {
        matches!(self, Self::Playing)
    }

    #[must_use]
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }

    /// Returns true once the engine has delivered its first frame.
    #[must_use]
    pub fn is_ready_capable(&self) -> bool {
        matches!(
            self,
            Self::Ready | Self::Playing | Self::Paused | Self::Stalled | Self::Ended
        )
    }

    #[must_use]
    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Error { message } => Some(message),
            _ => None,
        }
    }
}

/// Outbound notification for the binding layer.
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerEvent {
    LoadStart { index: usize },
    ReadyToPlay { duration: f64 },
    Error { code: &'static str, message: String },
    Progress { current_time: f64, duration: f64 },
    PlaybackComplete,
    PlaybackStalled,
    PlaybackResumed,
    Playing,
    Paused,
}

impl PlayerEvent {
    /// Event name as registered by the UI binding.
    #[must_use]
    pub fn binding_name(&self) -> &'static str {
        match self {
            PlayerEvent::LoadStart { .. } => "onLoadStart",
            PlayerEvent::ReadyToPlay { .. } => "onReadyToPlay",
            PlayerEvent::Error { .. } => "onError",
            PlayerEvent::Progress { .. } => "onProgress",
            PlayerEvent::PlaybackComplete => "onPlaybackComplete",
            PlayerEvent::PlaybackStalled => "onPlaybackStalled",
            PlayerEvent::PlaybackResumed => "onPlaybackResumed",
            PlayerEvent::Playing => "onPlaying",
            PlayerEvent::Paused => "onPaused",
        }
    }
}

/// What to play.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    Single(String),
    /// Items play back to back; `loop` wraps to the first item.
    Playlist(Vec<String>),
}

impl Source {
    #[must_use]
    pub fn item(&self, index: usize) -> Option<&str> {
        match self {
            Source::Single(locator) if index == 0 => Some(locator.as_str()),
            Source::Single(_) => None,
            Source::Playlist(items) => items.get(index).map(String::as_str),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Source::Single(_) => 1,
            Source::Playlist(items) => items.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Source::Single(locator) => locator.trim().is_empty(),
            Source::Playlist(items) => items.is_empty(),
        }
    }
}

impl From<&str> for Source {
    fn from(locator: &str) -> Self {
        Source::Single(locator.to_string())
    }
}

impl From<String> for Source {
    fn from(locator: String) -> Self {
        Source::Single(locator)
    }
}

impl From<Vec<String>> for Source {
    fn from(items: Vec<String>) -> Self {
        Source::Playlist(items)
    }
}

/// Everything `setup` receives from the binding layer.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub source: Source,
    pub options: MediaOptions,
    pub autoplay: bool,
    pub loop_playback: bool,
}

impl SessionConfig {
    #[must_use]
    pub fn new(source: impl Into<Source>) -> Self {
        Self {
            source: source.into(),
            options: MediaOptions::default(),
            autoplay: false,
            loop_playback: false,
        }
    }

    #[must_use]
    pub fn autoplay(mut self, autoplay: bool) -> Self {
        self.autoplay = autoplay;
        self
    }

    #[must_use]
    pub fn looping(mut self, loop_playback: bool) -> Self {
        self.loop_playback = loop_playback;
        self
    }

    #[must_use]
    pub fn options(mut self, options: MediaOptions) -> Self {
        self.options = options;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct PendingSeek {
    generation: u64,
    target_secs: f64,
}

/// Owns the engine of one session and tracks its lifecycle.
pub struct PlaybackMachine {
    engine: Box<dyn MediaEngine>,
    events: mpsc::UnboundedSender<PlayerEvent>,
    config: SessionConfig,

    state: PlaybackState,
    previous: PlaybackState,

    /// `readyToPlay` goes out once per session.
    ready_sent: bool,
    /// Play requested before the engine became ready.
    play_when_ready: bool,
    playlist_index: usize,

    /// Latest generation handed to the engine (load or seek).
    generation: u64,
    /// Generation of the most recent load. Older events belong to a previous source.
    load_generation: u64,
    pending_seek: Option<PendingSeek>,
}

impl PlaybackMachine {
    /// Creates an idle machine. Nothing is loaded until [`start`](Self::start).
    pub fn new(
        engine: Box<dyn MediaEngine>,
        events: mpsc::UnboundedSender<PlayerEvent>,
        config: SessionConfig,
    ) -> Self {
        Self {
            engine,
            events,
            config,
            state: PlaybackState::Idle,
            previous: PlaybackState::Idle,
            ready_sent: false,
            play_when_ready: false,
            playlist_index: 0,
            generation: 0,
            load_generation: 0,
            pending_seek: None,
        }
    }

    /// Loads the first item and fires `loadStart`.
    pub fn start(&mut self) -> Result<()> {
        if self.config.source.is_empty() {
            return Err(self.fail("Source locator is empty".to_string()));
        }
        self.ready_sent = false;
        self.play_when_ready = false;
        self.load_item(0)
    }

    pub fn state(&self) -> &PlaybackState {
        &self.state
    }

    pub fn previous_state(&self) -> &PlaybackState {
        &self.previous
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn playlist_index(&self) -> usize {
        self.playlist_index
    }

    /// Returns true while frames should be captured for recording.
    pub fn is_capturing(&self) -> bool {
        self.state.is_playing()
    }

    pub fn current_frame(&self) -> Option<Frame> {
        self.engine.current_frame()
    }

    pub fn duration(&self) -> f64 {
        if self.state.is_ready_capable() {
            self.engine.duration().max(0.0)
        } else {
            0.0
        }
    }

    /// Current position, always within `[0, duration]`.
    ///
    /// While a seek is in flight the target is reported, not the engine's
    /// stale position.
    pub fn current_time(&self) -> f64 {
        if !self.state.is_ready_capable() {
            return 0.0;
        }
        let duration = self.duration();
        match self.pending_seek {
            Some(seek) => clamp_position(seek.target_secs, duration),
            None => clamp_position(self.engine.current_time(), duration),
        }
    }

    pub fn play(&mut self) -> Result<()> {
        self.ensure_live()?;
        match self.state {
            PlaybackState::Opening => self.play_when_ready = true,
            PlaybackState::Playing => {}
            PlaybackState::Ended => {
                self.issue_seek(0.0);
                self.engine.play();
            }
            _ => self.engine.play(),
        }
        Ok(())
    }

    pub fn pause(&mut self) -> Result<()> {
        self.ensure_live()?;
        match self.state {
            PlaybackState::Opening => self.play_when_ready = false,
            PlaybackState::Paused | PlaybackState::Ended => {}
            _ => self.engine.pause(),
        }
        Ok(())
    }

    /// Seeks to `millis`, clamped to `[0, duration]`. Returns the clamped
    /// target in seconds.
    pub fn seek(&mut self, millis: i64) -> Result<f64> {
        self.ensure_live()?;

        let requested = millis_to_secs(millis);
        let clamped = clamp_position(requested, self.engine.duration());
        if (clamped - requested).abs() > f64::EPSILON {
            log::debug!(
                "{}",
                Error::SeekOutOfRange {
                    requested_secs: requested,
                    clamped_secs: clamped,
                }
            );
        }

        self.issue_seek(clamped);
        Ok(clamped)
    }

    /// Feeds one engine callback through the machine.
    pub fn handle_engine_event(&mut self, event: EngineEvent) {
        if matches!(self.state, PlaybackState::Idle | PlaybackState::Error { .. }) {
            return;
        }
        if self.is_stale(&event) {
            log::trace!("Dropping stale engine event {event:?}");
            return;
        }

        if let Some(seek) = self.pending_seek {
            let settles_seek = event.generation() == seek.generation
                && !matches!(
                    event,
                    EngineEvent::State {
                        state: EngineState::Buffering,
                        ..
                    }
                );
            if settles_seek {
                self.pending_seek = None;
            }
        }

        match event {
            EngineEvent::State { state, .. } => self.apply_engine_state(state),
            EngineEvent::Time {
                current_secs,
                duration_secs,
                ..
            } => {
                if self.state.is_playing() && self.pending_seek.is_none() && duration_secs > 0.0
                {
                    self.emit(PlayerEvent::Progress {
                        current_time: clamp_position(current_secs, duration_secs),
                        duration: duration_secs,
                    });
                }
            }
        }
    }

    /// Stops the engine. The machine is unusable afterwards.
    pub fn shutdown(&mut self) {
        self.engine.stop();
        self.pending_seek = None;
        self.previous = std::mem::replace(&mut self.state, PlaybackState::Idle);
    }

    fn is_stale(&self, event: &EngineEvent) -> bool {
        let generation = event.generation();
        if generation < self.load_generation {
            return true;
        }
        match event {
            // A failure after a superseded seek still kills the session.
            EngineEvent::State {
                state: EngineState::Error(_),
                ..
            } => false,
            _ => generation < self.generation,
        }
    }

    fn ensure_live(&self) -> Result<()> {
        match &self.state {
            PlaybackState::Idle => Err(Error::NoSession),
            PlaybackState::Error { message } => Err(Error::SessionTerminated(message.clone())),
            _ => Ok(()),
        }
    }

    fn apply_engine_state(&mut self, engine_state: EngineState) {
        match engine_state {
            EngineState::Opening => {}
            EngineState::Paused => {
                self.mark_ready();
                if self.state == PlaybackState::Opening {
                    self.transition(PlaybackState::Ready);
                    if self.config.autoplay || self.play_when_ready {
                        self.play_when_ready = false;
                        self.engine.play();
                    }
                } else {
                    self.transition(PlaybackState::Paused);
                }
            }
            EngineState::Playing => {
                self.mark_ready();
                self.play_when_ready = false;
                self.transition(PlaybackState::Playing);
            }
            EngineState::Buffering => {
                let stall_capable = matches!(
                    self.state,
                    PlaybackState::Ready | PlaybackState::Playing | PlaybackState::Paused
                );
                if stall_capable && self.pending_seek.is_none() {
                    self.transition(PlaybackState::Stalled);
                }
            }
            EngineState::Stopped => {
                if self.state.is_ready_capable() && self.state != PlaybackState::Ended {
                    self.transition(PlaybackState::Paused);
                }
            }
            EngineState::Ended => self.handle_ended(),
            EngineState::Error(message) => {
                self.fail(message);
            }
        }
    }

    fn mark_ready(&mut self) {
        if !self.ready_sent {
            self.ready_sent = true;
            let duration = self.engine.duration().max(0.0);
            self.emit(PlayerEvent::ReadyToPlay { duration });
        }
    }

    fn handle_ended(&mut self) {
        if !self.state.is_ready_capable() || self.state == PlaybackState::Ended {
            return;
        }

        let next = self.playlist_index + 1;
        if next < self.config.source.len() {
            log::debug!("Advancing playlist to item {next}");
            self.play_when_ready = true;
            if let Err(e) = self.load_item(next) {
                log::warn!("Could not load playlist item {next}: {e}");
            }
        } else if self.config.loop_playback {
            if self.config.source.len() > 1 {
                self.play_when_ready = true;
                if let Err(e) = self.load_item(0) {
                    log::warn!("Could not restart playlist: {e}");
                }
            } else {
                log::debug!("Looping back to start");
                self.issue_seek(0.0);
                self.engine.play();
            }
        } else {
            self.playlist_index = 0;
            self.transition(PlaybackState::Ended);
        }
    }

    fn load_item(&mut self, index: usize) -> Result<()> {
        let locator = match self.config.source.item(index) {
            Some(locator) => locator.to_string(),
            None => return Err(self.fail(format!("No source item at index {index}"))),
        };

        self.generation += 1;
        self.load_generation = self.generation;
        self.pending_seek = None;
        self.playlist_index = index;
        self.previous = std::mem::replace(&mut self.state, PlaybackState::Opening);

        log::info!("Loading source item {index}: {locator}");
        self.emit(PlayerEvent::LoadStart { index });

        let generation = self.generation;
        if let Err(e) = self.engine.load(&locator, &self.config.options, generation) {
            return Err(self.fail(e.detail()));
        }
        Ok(())
    }

    fn issue_seek(&mut self, target_secs: f64) {
        self.generation += 1;
        self.pending_seek = Some(PendingSeek {
            generation: self.generation,
            target_secs,
        });
        let millis = super::time_units::secs_to_millis(target_secs);
        self.engine.seek(millis, self.generation);
    }

    /// Moves to `Error` and fires `error` once. Failures while opening are
    /// reported as source errors.
    fn fail(&mut self, message: String) -> Error {
        let error = match self.state {
            PlaybackState::Idle | PlaybackState::Opening => Error::Setup(message),
            _ => Error::Playback(message),
        };
        if self.state.is_error() {
            return error;
        }

        log::error!("Player session failed: {error}");
        self.pending_seek = None;
        self.previous = std::mem::replace(
            &mut self.state,
            PlaybackState::Error {
                message: error.to_string(),
            },
        );
        self.emit(PlayerEvent::Error {
            code: error.code(),
            message: error.to_string(),
        });
        error
    }

    fn transition(&mut self, next: PlaybackState) {
        if next == self.state {
            return;
        }
        self.previous = std::mem::replace(&mut self.state, next);
        log::debug!("Playback state {:?} -> {:?}", self.previous, self.state);

        match (&self.previous, &self.state) {
            (PlaybackState::Stalled, PlaybackState::Playing) => {
                self.emit(PlayerEvent::PlaybackResumed);
                self.emit(PlayerEvent::Playing);
            }
            (_, PlaybackState::Playing) => self.emit(PlayerEvent::Playing),
            (_, PlaybackState::Paused) => self.emit(PlayerEvent::Paused),
            (_, PlaybackState::Stalled) => self.emit(PlayerEvent::PlaybackStalled),
            (_, PlaybackState::Ended) => self.emit(PlayerEvent::PlaybackComplete),
            _ => {}
        }
    }

    fn emit(&self, event: PlayerEvent) {
        log::trace!("Emitting {}", event.binding_name());
        if self.events.send(event).is_err() {
            log::debug!("Player event receiver dropped");
        }
    }
}

impl Drop for PlaybackMachine {
    fn drop(&mut self) {
        // Idle means never loaded or already shut down.
        if self.state != PlaybackState::Idle {
            self.engine.stop();
        }
    }
}
