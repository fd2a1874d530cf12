// SPDX-License-Identifier: MPL-2.0
//! FFmpeg implementation of [`MediaEngine`].
//!
//! Each `load` spawns a decoder loop on the blocking pool (FFmpeg types are
//! not `Send`). The loop paces frames by PTS, publishes the last rendered
//! frame into a shared slot and reports lifecycle changes as
//! generation-tagged [`EngineEvent`]s.

use super::engine::{EngineEvent, EngineFactory, EngineState, MediaEngine, MediaOptions};
use crate::config::DEFAULT_PROGRESS_INTERVAL_MS;
use crate::error::{Error, Result};
use crate::media::video::{init_ffmpeg, packed_rgba};
use crate::media::Frame;
use ffmpeg_next::{format, media, software::scaling, Dictionary, Packet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// Frames decoded past a seek point before giving up on exact positioning.
const MAX_SEEK_DISCARD_FRAMES: usize = 600;

/// Longest single pacing sleep, so commands are never starved by odd PTS gaps.
const MAX_PACING_SLEEP: Duration = Duration::from_millis(250);

const IDLE_POLL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone)]
enum DecoderCommand {
    Play,
    Pause,
    Seek { target_secs: f64, generation: u64 },
    Stop,
}

/// State shared between the engine handle and its decoder loop.
#[derive(Debug, Default)]
struct SharedPlayback {
    frame: Mutex<Option<Frame>>,
    position_bits: AtomicU64,
    duration_bits: AtomicU64,
}

impl SharedPlayback {
    fn publish(&self, frame: Frame) {
        self.position_bits
            .store(frame.pts_secs.max(0.0).to_bits(), Ordering::Release);
        if let Ok(mut slot) = self.frame.lock() {
            *slot = Some(frame);
        }
    }

    fn position(&self) -> f64 {
        f64::from_bits(self.position_bits.load(Ordering::Acquire))
    }

    fn duration(&self) -> f64 {
        f64::from_bits(self.duration_bits.load(Ordering::Acquire))
    }

    fn set_duration(&self, secs: f64) {
        self.duration_bits.store(secs.to_bits(), Ordering::Release);
    }

    fn frame(&self) -> Option<Frame> {
        self.frame.lock().ok().and_then(|slot| slot.clone())
    }
}

/// Builds [`FfmpegEngine`]s.
#[derive(Debug, Clone, Copy)]
pub struct FfmpegEngineFactory {
    pub progress_interval: Duration,
}

impl Default for FfmpegEngineFactory {
    fn default() -> Self {
        Self {
            progress_interval: Duration::from_millis(DEFAULT_PROGRESS_INTERVAL_MS),
        }
    }
}

impl EngineFactory for FfmpegEngineFactory {
    fn create(&self, events: mpsc::Sender<EngineEvent>) -> Box<dyn MediaEngine> {
        Box::new(FfmpegEngine::new(events, self.progress_interval))
    }
}

/// Media engine backed by FFmpeg demuxing and decoding.
pub struct FfmpegEngine {
    events: mpsc::Sender<EngineEvent>,
    progress_interval: Duration,
    shared: Arc<SharedPlayback>,
    commands: Option<mpsc::UnboundedSender<DecoderCommand>>,
}

impl FfmpegEngine {
    pub fn new(events: mpsc::Sender<EngineEvent>, progress_interval: Duration) -> Self {
        Self {
            events,
            progress_interval,
            shared: Arc::new(SharedPlayback::default()),
            commands: None,
        }
    }

    fn send(&self, command: DecoderCommand) {
        if let Some(commands) = &self.commands {
            if commands.send(command).is_err() {
                log::debug!("Decoder loop already exited");
            }
        }
    }
}

impl MediaEngine for FfmpegEngine {
    fn load(&mut self, locator: &str, options: &MediaOptions, generation: u64) -> Result<()> {
        self.stop();

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(SharedPlayback::default());
        let job = DecoderJob {
            locator: locator.to_string(),
            options: options.clone(),
            generation,
            commands: command_rx,
            events: self.events.clone(),
            shared: Arc::clone(&shared),
            progress_interval: self.progress_interval,
        };

        tokio::task::spawn_blocking(move || job.run());

        self.shared = shared;
        self.commands = Some(command_tx);
        Ok(())
    }

    fn play(&mut self) {
        self.send(DecoderCommand::Play);
    }

    fn pause(&mut self) {
        self.send(DecoderCommand::Pause);
    }

    fn seek(&mut self, millis: i64, generation: u64) {
        self.send(DecoderCommand::Seek {
            target_secs: super::time_units::millis_to_secs(millis),
            generation,
        });
    }

    fn current_time(&self) -> f64 {
        self.shared.position()
    }

    fn duration(&self) -> f64 {
        self.shared.duration()
    }

    fn current_frame(&self) -> Option<Frame> {
        self.shared.frame()
    }

    fn stop(&mut self) {
        if let Some(commands) = self.commands.take() {
            if commands.send(DecoderCommand::Stop).is_err() {
                log::debug!("Decoder loop already exited");
            }
        }
    }
}

impl Drop for FfmpegEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Everything one decoder loop needs, moved onto the blocking pool.
struct DecoderJob {
    locator: String,
    options: MediaOptions,
    generation: u64,
    commands: mpsc::UnboundedReceiver<DecoderCommand>,
    events: mpsc::Sender<EngineEvent>,
    shared: Arc<SharedPlayback>,
    progress_interval: Duration,
}

/// Why the loop is exiting.
enum Exit {
    Stopped,
    Failed(String),
}

impl DecoderJob {
    fn emit(&self, state: EngineState) -> bool {
        self.events
            .blocking_send(EngineEvent::State {
                state,
                generation: self.generation,
            })
            .is_ok()
    }

    fn run(mut self) {
        match self.decode() {
            Exit::Stopped => log::debug!("Decoder loop for {} stopped", self.locator),
            Exit::Failed(message) => {
                // Tag the failure with the newest request so it is not dropped as stale.
                while let Ok(command) = self.commands.try_recv() {
                    match command {
                        DecoderCommand::Seek { generation, .. } => self.generation = generation,
                        DecoderCommand::Stop => return,
                        _ => {}
                    }
                }
                log::error!("Decoder for {} failed: {message}", self.locator);
                self.emit(EngineState::Error(message));
            }
        }
    }

    fn decode(&mut self) -> Exit {
        if !self.emit(EngineState::Opening) {
            return Exit::Stopped;
        }

        let mut source = match DecodeSource::open(&self.locator, &self.options) {
            Ok(source) => source,
            Err(e) => return Exit::Failed(e.detail()),
        };
        self.shared.set_duration(source.duration_secs);

        match source.next_frame() {
            Ok(Some(frame)) => self.shared.publish(frame),
            Ok(None) => return Exit::Failed("Source contains no video frames".to_string()),
            Err(e) => return Exit::Failed(e.detail()),
        }
        if !self.emit(EngineState::Paused) {
            return Exit::Stopped;
        }

        let mut playing = false;
        let mut at_end = false;
        // (wall clock, media time) pair the pacing is measured against.
        let mut anchor: Option<(Instant, f64)> = None;
        let mut last_progress = Instant::now();

        loop {
            // Commands are applied as a batch and the resulting state is
            // reported once, so `seek(0)` + `play()` surfaces as Playing only.
            let was_playing = playing;
            let mut seeked = false;
            loop {
                let command = match self.commands.try_recv() {
                    Ok(command) => command,
                    Err(mpsc::error::TryRecvError::Empty) => break,
                    Err(mpsc::error::TryRecvError::Disconnected) => return Exit::Stopped,
                };
                match command {
                    DecoderCommand::Play => {
                        if at_end {
                            if let Err(e) = self.seek_to(&mut source, 0.0) {
                                return Exit::Failed(e.detail());
                            }
                            at_end = false;
                        }
                        playing = true;
                    }
                    DecoderCommand::Pause => playing = false,
                    DecoderCommand::Seek {
                        target_secs,
                        generation,
                    } => {
                        self.generation = generation;
                        if !seeked && !self.emit(EngineState::Buffering) {
                            return Exit::Stopped;
                        }
                        seeked = true;
                        if let Err(e) = self.seek_to(&mut source, target_secs) {
                            return Exit::Failed(e.detail());
                        }
                        at_end = false;
                    }
                    DecoderCommand::Stop => return Exit::Stopped,
                }
            }

            if seeked || playing != was_playing {
                anchor = None;
                let settled = if playing {
                    EngineState::Playing
                } else {
                    EngineState::Paused
                };
                if !self.emit(settled) {
                    return Exit::Stopped;
                }
            }

            if !playing {
                std::thread::sleep(IDLE_POLL);
                continue;
            }

            let frame = match source.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    playing = false;
                    at_end = true;
                    if !self.emit(EngineState::Ended) {
                        return Exit::Stopped;
                    }
                    continue;
                }
                Err(e) => return Exit::Failed(e.detail()),
            };

            let (started, base_pts) = *anchor.get_or_insert((Instant::now(), frame.pts_secs));
            let due = started + Duration::from_secs_f64((frame.pts_secs - base_pts).max(0.0));
            let now = Instant::now();
            if due > now {
                std::thread::sleep((due - now).min(MAX_PACING_SLEEP));
            }

            self.shared.publish(frame);

            let duration = self.shared.duration();
            if duration > 0.0 && last_progress.elapsed() >= self.progress_interval {
                last_progress = Instant::now();
                let event = EngineEvent::Time {
                    current_secs: self.shared.position(),
                    duration_secs: duration,
                    generation: self.generation,
                };
                if self.events.blocking_send(event).is_err() {
                    return Exit::Stopped;
                }
            }
        }
    }

    fn seek_to(&self, source: &mut DecodeSource, target_secs: f64) -> Result<()> {
        if let Some(frame) = source.seek(target_secs)? {
            self.shared.publish(frame);
        }
        Ok(())
    }
}

/// Demuxer, decoder and RGBA converter for one source.
struct DecodeSource {
    ictx: format::context::Input,
    decoder: ffmpeg_next::decoder::Video,
    scaler: Option<scaling::Context>,
    stream_index: usize,
    time_base: f64,
    duration_secs: f64,
    eof_sent: bool,
}

impl DecodeSource {
    fn open(locator: &str, options: &MediaOptions) -> Result<Self> {
        init_ffmpeg()?;

        let mut dictionary = Dictionary::new();
        for (key, value) in options.iter() {
            dictionary.set(key, value);
        }

        let ictx = format::input_with_dictionary(&locator, dictionary)
            .map_err(|e| Error::Setup(format!("Cannot open {locator}: {e}")))?;

        let stream = ictx
            .streams()
            .best(media::Type::Video)
            .ok_or_else(|| Error::Setup("No video stream found".to_string()))?;
        let stream_index = stream.index();
        let time_base = f64::from(stream.time_base());

        let duration_secs = if stream.duration() > 0 {
            stream.duration() as f64 * time_base
        } else if ictx.duration() > 0 {
            ictx.duration() as f64 / f64::from(ffmpeg_next::ffi::AV_TIME_BASE)
        } else {
            0.0
        };

        let decoder = ffmpeg_next::codec::context::Context::from_parameters(stream.parameters())
            .and_then(|ctx| ctx.decoder().video())
            .map_err(|e| Error::Setup(format!("Cannot create video decoder: {e}")))?;

        log::debug!(
            "Opened {locator}: {}x{}, {duration_secs:.2}s",
            decoder.width(),
            decoder.height()
        );

        Ok(Self {
            ictx,
            decoder,
            scaler: None,
            stream_index,
            time_base,
            duration_secs,
            eof_sent: false,
        })
    }

    fn read_packet(&mut self) -> Option<Packet> {
        for (stream, packet) in self.ictx.packets() {
            if stream.index() == self.stream_index {
                return Some(packet);
            }
        }
        None
    }

    /// Decodes the next frame, or `None` at end of stream.
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let mut decoded = ffmpeg_next::frame::Video::empty();
        loop {
            if self.decoder.receive_frame(&mut decoded).is_ok() {
                return self.convert(&decoded).map(Some);
            }
            if self.eof_sent {
                return Ok(None);
            }
            match self.read_packet() {
                Some(packet) => {
                    if let Err(e) = self.decoder.send_packet(&packet) {
                        log::warn!("Skipping undecodable packet: {e}");
                    }
                }
                None => {
                    self.decoder
                        .send_eof()
                        .map_err(|e| Error::Playback(format!("Decoder flush failed: {e}")))?;
                    self.eof_sent = true;
                }
            }
        }
    }

    /// Repositions and returns the first frame at or after `target_secs`.
    fn seek(&mut self, target_secs: f64) -> Result<Option<Frame>> {
        let timestamp = (target_secs.max(0.0) * f64::from(ffmpeg_next::ffi::AV_TIME_BASE)) as i64;
        self.ictx
            .seek(timestamp, ..timestamp)
            .map_err(|e| Error::Playback(format!("Seek failed: {e}")))?;
        self.decoder.flush();
        self.eof_sent = false;

        let mut last = None;
        for _ in 0..MAX_SEEK_DISCARD_FRAMES {
            match self.next_frame()? {
                Some(frame) if frame.pts_secs + 1e-3 >= target_secs => return Ok(Some(frame)),
                Some(frame) => last = Some(frame),
                None => break,
            }
        }
        Ok(last)
    }

    fn convert(&mut self, decoded: &ffmpeg_next::frame::Video) -> Result<Frame> {
        let (width, height) = (decoded.width(), decoded.height());
        let needs_scaler = match &self.scaler {
            Some(scaler) => {
                let input = scaler.input();
                input.width != width || input.height != height || input.format != decoded.format()
            }
            None => true,
        };
        if needs_scaler {
            log::debug!("Creating scaler for {width}x{height}");
            self.scaler = Some(
                scaling::Context::get(
                    decoded.format(),
                    width,
                    height,
                    format::Pixel::RGBA,
                    width,
                    height,
                    scaling::Flags::BILINEAR,
                )
                .map_err(|e| Error::Playback(format!("Cannot create scaler: {e}")))?,
            );
        }

        let mut rgba = ffmpeg_next::frame::Video::empty();
        if let Some(scaler) = self.scaler.as_mut() {
            scaler
                .run(decoded, &mut rgba)
                .map_err(|e| Error::Playback(format!("Cannot convert frame: {e}")))?;
        }

        let pts_secs = decoded
            .timestamp()
            .map(|pts| pts as f64 * self.time_base)
            .unwrap_or(0.0)
            .max(0.0);

        Ok(Frame::new(
            Arc::new(packed_rgba(&rgba)),
            rgba.width(),
            rgba.height(),
            pts_secs,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "tests/data/sample.mp4";

    async fn next_state(rx: &mut mpsc::Receiver<EngineEvent>) -> Option<(EngineState, u64)> {
        loop {
            let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .ok()??;
            if let EngineEvent::State { state, generation } = event {
                return Some((state, generation));
            }
        }
    }

    #[tokio::test]
    async fn missing_file_reports_error_event() {
        let (tx, mut rx) = mpsc::channel(8);
        let mut engine = FfmpegEngine::new(tx, Duration::from_millis(250));
        engine
            .load("/no/such/video.mp4", &MediaOptions::default(), 1)
            .expect("load is submitted");

        assert_eq!(next_state(&mut rx).await, Some((EngineState::Opening, 1)));
        match next_state(&mut rx).await {
            Some((EngineState::Error(message), 1)) => assert!(message.contains("Cannot open")),
            other => panic!("expected error, got {other:?}"),
        }
        assert!(engine.current_frame().is_none());
        assert_eq!(engine.duration(), 0.0);
    }

    #[tokio::test]
    async fn stop_after_the_loop_exited_is_harmless() {
        let (tx, mut rx) = mpsc::channel(8);
        let mut engine = FfmpegEngine::new(tx, Duration::from_millis(250));
        engine
            .load("/no/such/video.mp4", &MediaOptions::default(), 1)
            .expect("load is submitted");
        while let Some((state, _)) = next_state(&mut rx).await {
            if matches!(state, EngineState::Error(_)) {
                break;
            }
        }

        // The loop has returned; its command receiver is gone.
        engine.stop();
        engine.stop();
        engine.play();
        assert!(engine.commands.is_none());
    }

    #[tokio::test]
    async fn sample_opens_paused_with_a_frame() {
        if !std::path::Path::new(SAMPLE).exists() {
            eprintln!("Skipping: {SAMPLE} not found");
            return;
        }
        let (tx, mut rx) = mpsc::channel(32);
        let mut engine = FfmpegEngine::new(tx, Duration::from_millis(100));
        engine
            .load(SAMPLE, &MediaOptions::default(), 3)
            .expect("load");

        assert_eq!(next_state(&mut rx).await, Some((EngineState::Opening, 3)));
        assert_eq!(next_state(&mut rx).await, Some((EngineState::Paused, 3)));
        let frame = engine.current_frame().expect("first frame");
        assert!(frame.is_consistent());

        engine.seek(500, 4);
        assert_eq!(next_state(&mut rx).await, Some((EngineState::Buffering, 4)));
        assert_eq!(next_state(&mut rx).await, Some((EngineState::Paused, 4)));

        engine.play();
        assert_eq!(next_state(&mut rx).await, Some((EngineState::Playing, 4)));
        engine.stop();
    }
}
