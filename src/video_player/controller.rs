// SPDX-License-Identifier: MPL-2.0
//! The player's single serialization point.
//!
//! One tokio task owns the playback machine, the engine, the recorder and
//! the frame sampler. Everything that can change that state arrives through
//! one `select!` and is handled one message at a time. [`PlayerHandle`] is
//! the cloneable front door; every method is a message to that task.

use super::decoder::FfmpegEngineFactory;
use super::encoder::FfmpegWriterFactory;
use super::engine::{EngineEvent, EngineFactory, ENGINE_EVENT_CAPACITY};
use super::recorder::{AppendOutcome, Recorder, RecordingStats, RecordingSummary, WriterFactory};
use super::sampler::FrameSampler;
use super::snapshot::{self, Snapshot};
use super::state::{PlaybackMachine, PlaybackState, PlayerEvent, SessionConfig};
use crate::config::PlayerConfig;
use crate::error::{Error, Result};
use crate::media::{ExportFormat, Frame};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

/// Produces the static preview frame for a source.
pub type Thumbnailer = Arc<dyn Fn(&str) -> Result<Frame> + Send + Sync>;

enum Command {
    Setup {
        config: SessionConfig,
        reply: oneshot::Sender<Result<()>>,
    },
    SetupThumbnail {
        source: String,
        reply: oneshot::Sender<Result<(u32, u32)>>,
    },
    Play {
        reply: oneshot::Sender<Result<()>>,
    },
    Pause {
        reply: oneshot::Sender<Result<()>>,
    },
    Seek {
        millis: i64,
        reply: oneshot::Sender<Result<f64>>,
    },
    CurrentTime {
        reply: oneshot::Sender<f64>,
    },
    Duration {
        reply: oneshot::Sender<f64>,
    },
    State {
        reply: oneshot::Sender<PlaybackState>,
    },
    CaptureFrame {
        format: ExportFormat,
        reply: oneshot::Sender<Result<Snapshot>>,
    },
    StartRecording {
        path: String,
        reply: oneshot::Sender<Result<PathBuf>>,
    },
    StopRecording {
        reply: oneshot::Sender<Result<RecordingSummary>>,
    },
    RecordingStats {
        reply: oneshot::Sender<Option<RecordingStats>>,
    },
    Thumbnail {
        reply: oneshot::Sender<Option<Frame>>,
    },
    Teardown {
        reply: oneshot::Sender<Option<Result<RecordingSummary>>>,
    },
}

struct ThumbnailDone {
    token: u64,
    result: Result<Frame>,
    reply: oneshot::Sender<Result<(u32, u32)>>,
}

/// Configures and spawns a player task.
pub struct PlayerBuilder {
    config: PlayerConfig,
    engines: Option<Arc<dyn EngineFactory>>,
    writers: Option<Arc<dyn WriterFactory>>,
    thumbnailer: Option<Thumbnailer>,
}

impl PlayerBuilder {
    #[must_use]
    pub fn new(config: PlayerConfig) -> Self {
        Self {
            config,
            engines: None,
            writers: None,
            thumbnailer: None,
        }
    }

    #[must_use]
    pub fn engine_factory(mut self, factory: impl EngineFactory + 'static) -> Self {
        self.engines = Some(Arc::new(factory));
        self
    }

    #[must_use]
    pub fn writer_factory(mut self, factory: impl WriterFactory + 'static) -> Self {
        self.writers = Some(Arc::new(factory));
        self
    }

    #[must_use]
    pub fn thumbnailer<F>(mut self, thumbnailer: F) -> Self
    where
        F: Fn(&str) -> Result<Frame> + Send + Sync + 'static,
    {
        self.thumbnailer = Some(Arc::new(thumbnailer));
        self
    }

    /// Spawns the player task on the current tokio runtime.
    ///
    /// Unset collaborators default to the FFmpeg engine, writer and
    /// thumbnail extractor.
    pub fn spawn(self) -> (PlayerHandle, mpsc::UnboundedReceiver<PlayerEvent>) {
        let engines: Arc<dyn EngineFactory> = match self.engines {
            Some(engines) => engines,
            None => Arc::new(FfmpegEngineFactory {
                progress_interval: self.config.progress_interval(),
            }),
        };
        let writers: Arc<dyn WriterFactory> = match self.writers {
            Some(writers) => writers,
            None => Arc::new(FfmpegWriterFactory::default()),
        };
        let thumbnailer: Thumbnailer = match self.thumbnailer {
            Some(thumbnailer) => thumbnailer,
            None => Arc::new(|source: &str| crate::media::extract_thumbnail(source)),
        };

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (thumbnail_tx, thumbnail_rx) = mpsc::unbounded_channel();

        let actor = PlayerActor {
            engines,
            thumbnailer,
            events: event_tx,
            machine: None,
            engine_events: None,
            recorder: Recorder::new(
                writers,
                self.config.recording_fps(),
                self.config.recordings_dir(),
            ),
            sampler: FrameSampler::new(self.config.sampler_rate()),
            thumbnail: None,
            thumbnail_token: 0,
            has_played: false,
            thumbnail_tx,
            thumbnail_rx,
        };
        tokio::spawn(actor.run(command_rx));

        (
            PlayerHandle {
                commands: command_tx,
            },
            event_rx,
        )
    }
}

/// Cloneable control surface of a player task.
///
/// The task ends once every handle is dropped, finalizing any recording.
#[derive(Clone)]
pub struct PlayerHandle {
    commands: mpsc::UnboundedSender<Command>,
}

impl PlayerHandle {
    /// Spawns a player with the FFmpeg engine and writer.
    pub fn spawn(config: PlayerConfig) -> (Self, mpsc::UnboundedReceiver<PlayerEvent>) {
        PlayerBuilder::new(config).spawn()
    }

    async fn request<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .map_err(|_| Error::ControllerClosed)?;
        response.await.map_err(|_| Error::ControllerClosed)
    }

    /// Replaces the current session with `config` and starts loading it.
    pub async fn setup(&self, config: SessionConfig) -> Result<()> {
        self.request(|reply| Command::Setup { config, reply })
            .await?
    }

    /// Extracts the preview frame for `source`. Returns its dimensions.
    pub async fn setup_thumbnail(&self, source: impl Into<String>) -> Result<(u32, u32)> {
        let source = source.into();
        self.request(|reply| Command::SetupThumbnail { source, reply })
            .await?
    }

    pub async fn play(&self) -> Result<()> {
        self.request(|reply| Command::Play { reply }).await?
    }

    pub async fn pause(&self) -> Result<()> {
        self.request(|reply| Command::Pause { reply }).await?
    }

    /// Seeks to `millis`. Returns the clamped target in seconds.
    pub async fn seek(&self, millis: i64) -> Result<f64> {
        self.request(|reply| Command::Seek { millis, reply })
            .await?
    }

    pub async fn current_time(&self) -> Result<f64> {
        self.request(|reply| Command::CurrentTime { reply }).await
    }

    pub async fn duration(&self) -> Result<f64> {
        self.request(|reply| Command::Duration { reply }).await
    }

    pub async fn state(&self) -> Result<PlaybackState> {
        self.request(|reply| Command::State { reply }).await
    }

    /// Captures the current frame as PNG.
    pub async fn capture_frame(&self) -> Result<Snapshot> {
        self.capture_frame_as(ExportFormat::Png).await
    }

    pub async fn capture_frame_as(&self, format: ExportFormat) -> Result<Snapshot> {
        self.request(|reply| Command::CaptureFrame { format, reply })
            .await?
    }

    /// Starts recording. An empty `path` picks a name in the recordings directory.
    pub async fn start_recording(&self, path: impl Into<String>) -> Result<PathBuf> {
        let path = path.into();
        self.request(|reply| Command::StartRecording { path, reply })
            .await?
    }

    pub async fn stop_recording(&self) -> Result<RecordingSummary> {
        self.request(|reply| Command::StopRecording { reply })
            .await?
    }

    pub async fn recording_stats(&self) -> Result<Option<RecordingStats>> {
        self.request(|reply| Command::RecordingStats { reply })
            .await
    }

    /// The preview frame, until playback first reaches `Playing`.
    pub async fn thumbnail(&self) -> Result<Option<Frame>> {
        self.request(|reply| Command::Thumbnail { reply }).await
    }

    /// Releases the engine and finalizes any active recording.
    ///
    /// Returns the outcome of that recording, if one was active.
    pub async fn teardown(&self) -> Result<Option<Result<RecordingSummary>>> {
        self.request(|reply| Command::Teardown { reply }).await
    }

    /// `startRecording` as the UI binding sees it: true when recording began.
    pub async fn start_recording_flag(&self, path: &str) -> bool {
        match self.start_recording(path).await {
            Ok(_) => true,
            Err(e) => {
                log::warn!("startRecording failed: {e}");
                false
            }
        }
    }

    /// `stopRecording` as the UI binding sees it: the output path, or an
    /// empty string on failure.
    pub async fn stop_recording_path(&self) -> String {
        match self.stop_recording().await {
            Ok(summary) => summary.path.to_string_lossy().into_owned(),
            Err(e) => {
                log::warn!("stopRecording failed: {e}");
                String::new()
            }
        }
    }
}

struct PlayerActor {
    engines: Arc<dyn EngineFactory>,
    thumbnailer: Thumbnailer,
    events: mpsc::UnboundedSender<PlayerEvent>,

    machine: Option<PlaybackMachine>,
    engine_events: Option<mpsc::Receiver<EngineEvent>>,
    recorder: Recorder,
    sampler: FrameSampler,

    thumbnail: Option<Frame>,
    /// Bumped on every thumbnail request and teardown; late results are discarded.
    thumbnail_token: u64,
    has_played: bool,
    thumbnail_tx: mpsc::UnboundedSender<ThumbnailDone>,
    thumbnail_rx: mpsc::UnboundedReceiver<ThumbnailDone>,
}

async fn next_engine_event(events: &mut Option<mpsc::Receiver<EngineEvent>>) -> Option<EngineEvent> {
    match events {
        Some(events) => events.recv().await,
        None => std::future::pending().await,
    }
}

impl PlayerActor {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        log::debug!("Player task started");
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                Some(event) = next_engine_event(&mut self.engine_events) => {
                    self.on_engine_event(event);
                }
                _ = self.sampler.tick() => self.on_sampler_tick(),
                Some(done) = self.thumbnail_rx.recv() => self.on_thumbnail(done),
            }
        }
        if let Some(Err(e)) = self.release_session() {
            log::warn!("Recording finalized on shutdown with error: {e}");
        }
        log::debug!("Player task stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Setup { config, reply } => {
                let _ = reply.send(self.setup(config));
            }
            Command::SetupThumbnail { source, reply } => self.setup_thumbnail(source, reply),
            Command::Play { reply } => {
                let _ = reply.send(self.with_machine(PlaybackMachine::play));
            }
            Command::Pause { reply } => {
                let _ = reply.send(self.with_machine(PlaybackMachine::pause));
            }
            Command::Seek { millis, reply } => {
                let _ = reply.send(self.with_machine(|m| m.seek(millis)));
            }
            Command::CurrentTime { reply } => {
                let secs = self.machine.as_ref().map_or(0.0, PlaybackMachine::current_time);
                let _ = reply.send(secs);
            }
            Command::Duration { reply } => {
                let secs = self.machine.as_ref().map_or(0.0, PlaybackMachine::duration);
                let _ = reply.send(secs);
            }
            Command::State { reply } => {
                let state = self
                    .machine
                    .as_ref()
                    .map_or(PlaybackState::Idle, |m| m.state().clone());
                let _ = reply.send(state);
            }
            Command::CaptureFrame { format, reply } => {
                let frame = self.machine.as_ref().and_then(PlaybackMachine::current_frame);
                snapshot::capture_frame(frame, format, reply);
            }
            Command::StartRecording { path, reply } => {
                let _ = reply.send(self.start_recording(&path));
            }
            Command::StopRecording { reply } => {
                self.sampler.deactivate();
                let _ = reply.send(self.recorder.stop());
            }
            Command::RecordingStats { reply } => {
                let _ = reply.send(self.recorder.stats());
            }
            Command::Thumbnail { reply } => {
                let _ = reply.send(self.thumbnail.clone());
            }
            Command::Teardown { reply } => {
                log::info!("Tearing down player session");
                let _ = reply.send(self.release_session());
            }
        }
    }

    fn with_machine<T>(&mut self, op: impl FnOnce(&mut PlaybackMachine) -> Result<T>) -> Result<T> {
        match self.machine.as_mut() {
            Some(machine) => op(machine),
            None => Err(Error::NoSession),
        }
    }

    fn setup(&mut self, config: SessionConfig) -> Result<()> {
        if let Some(Err(e)) = self.release_session() {
            log::warn!("Previous recording finalized with error: {e}");
        }

        let (event_tx, event_rx) = mpsc::channel(ENGINE_EVENT_CAPACITY);
        let engine = self.engines.create(event_tx);
        let mut machine = PlaybackMachine::new(engine, self.events.clone(), config);
        let started = machine.start();

        self.machine = Some(machine);
        self.engine_events = Some(event_rx);
        started
    }

    fn setup_thumbnail(&mut self, source: String, reply: oneshot::Sender<Result<(u32, u32)>>) {
        self.thumbnail_token += 1;
        let token = self.thumbnail_token;
        let thumbnailer = Arc::clone(&self.thumbnailer);
        let done = self.thumbnail_tx.clone();

        tokio::task::spawn_blocking(move || {
            let result = thumbnailer(&source);
            let _ = done.send(ThumbnailDone {
                token,
                result,
                reply,
            });
        });
    }

    fn on_thumbnail(&mut self, done: ThumbnailDone) {
        let response = match done.result {
            Ok(frame) => {
                let dimensions = frame.dimensions();
                if done.token == self.thumbnail_token && !self.has_played {
                    log::debug!("Thumbnail ready ({}x{})", dimensions.0, dimensions.1);
                    self.thumbnail = Some(frame);
                }
                Ok(dimensions)
            }
            Err(e) => {
                log::warn!("Thumbnail extraction failed: {e}");
                Err(e)
            }
        };
        let _ = done.reply.send(response);
    }

    fn start_recording(&mut self, path: &str) -> Result<PathBuf> {
        let (frame, media_time) = match &self.machine {
            Some(machine) => (machine.current_frame(), machine.current_time()),
            None => (None, 0.0),
        };
        let path = self.recorder.start(path, frame.as_ref(), media_time)?;
        self.sampler.activate();
        Ok(path)
    }

    fn on_engine_event(&mut self, event: EngineEvent) {
        let Some(machine) = self.machine.as_mut() else {
            return;
        };
        machine.handle_engine_event(event);

        if machine.state().is_playing() && !self.has_played {
            self.has_played = true;
            self.thumbnail = None;
        }

        if machine.state().is_error() && self.recorder.is_recording() {
            self.sampler.deactivate();
            match self.recorder.stop() {
                Ok(summary) => log::info!(
                    "Playback failed, recording finalized at {}",
                    summary.path.display()
                ),
                Err(e) => log::warn!("Playback failed, recording finalized with error: {e}"),
            }
        }
    }

    fn on_sampler_tick(&mut self) {
        let Some(machine) = self.machine.as_ref() else {
            return;
        };
        let capturing = machine.is_capturing();
        let Some(frame) = FrameSampler::sample(capturing, || machine.current_frame()) else {
            if !capturing {
                self.recorder.pause_clock();
            }
            return;
        };
        let now = tokio::time::Instant::now().into_std();
        if let Some(AppendOutcome::Rejected) = self.recorder.capture_at(&frame, now) {
            // The session has failed; stop() reports why.
            self.sampler.deactivate();
        }
    }

    /// Stops the engine and finalizes any recording. Safe to call when idle.
    fn release_session(&mut self) -> Option<Result<RecordingSummary>> {
        self.sampler.deactivate();
        let recording = self.recorder.release();
        if let Some(mut machine) = self.machine.take() {
            machine.shutdown();
        }
        self.engine_events = None;
        self.thumbnail = None;
        self.thumbnail_token += 1;
        self.has_played = false;
        recording
    }
}
