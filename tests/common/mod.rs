// SPDX-License-Identifier: MPL-2.0
//! Scripted engine and recording writer shared by the integration tests.
#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use unified_player::config::PlayerConfig;
use unified_player::error::{Error, Result};
use unified_player::media::Frame;
use unified_player::video_player::{
    EngineEvent, EngineFactory, EngineState, FrameWriter, MediaEngine, MediaOptions, PlayerEvent,
    RecordingFps, WriterFactory,
};

pub const CLIP_DURATION_SECS: f64 = 10.0;
pub const CLIP_WIDTH: u32 = 64;
pub const CLIP_HEIGHT: u32 = 48;

/// Config with a 10 Hz sampler and 10 fps recording so each tick is one frame.
pub fn test_config(recordings_dir: &Path) -> PlayerConfig {
    PlayerConfig {
        sampler_rate_hz: Some(10),
        recording_fps: Some(10),
        progress_interval_ms: Some(250),
        recordings_dir: Some(recordings_dir.to_path_buf()),
    }
}

#[derive(Default)]
struct Script {
    events: Option<mpsc::Sender<EngineEvent>>,
    generation: u64,
    playing: bool,
    time: f64,
    frame: Option<Frame>,
    loads: Vec<String>,
    stops: usize,
}

/// Observes and drives the engine a [`scripted_engine`] factory created.
#[derive(Clone, Default)]
pub struct EngineHandle(Arc<Mutex<Script>>);

impl EngineHandle {
    fn lock(&self) -> MutexGuard<'_, Script> {
        self.0.lock().expect("script lock")
    }

    pub fn loads(&self) -> Vec<String> {
        self.lock().loads.clone()
    }

    pub fn stops(&self) -> usize {
        self.lock().stops
    }

    pub fn set_frame(&self, frame: Option<Frame>) {
        self.lock().frame = frame;
    }

    /// Emits `state` for the current generation, as the engine would.
    pub fn emit_state(&self, state: EngineState) {
        let script = self.lock();
        send(&script, EngineEvent::State {
            state,
            generation: script.generation,
        });
    }

    pub fn emit_time(&self, current_secs: f64) {
        let script = self.lock();
        send(&script, EngineEvent::Time {
            current_secs,
            duration_secs: CLIP_DURATION_SECS,
            generation: script.generation,
        });
    }
}

fn send(script: &Script, event: EngineEvent) {
    if let Some(events) = &script.events {
        let _ = events.try_send(event);
    }
}

/// Engine that answers every command immediately, like a local file that
/// decodes instantly.
struct ScriptedEngine {
    script: EngineHandle,
}

impl MediaEngine for ScriptedEngine {
    fn load(&mut self, locator: &str, _options: &MediaOptions, generation: u64) -> Result<()> {
        let mut script = self.script.lock();
        script.generation = generation;
        script.playing = false;
        script.time = 0.0;
        script.loads.push(locator.to_string());
        send(&script, EngineEvent::State {
            state: EngineState::Opening,
            generation,
        });
        if locator.contains("missing") {
            send(&script, EngineEvent::State {
                state: EngineState::Error(format!("Cannot open {locator}")),
                generation,
            });
            return Ok(());
        }
        if script.frame.is_none() {
            script.frame = Some(Frame::solid(CLIP_WIDTH, CLIP_HEIGHT, [0, 128, 255, 255], 0.0));
        }
        send(&script, EngineEvent::State {
            state: EngineState::Paused,
            generation,
        });
        Ok(())
    }

    fn play(&mut self) {
        let mut script = self.script.lock();
        if !script.playing {
            script.playing = true;
            let generation = script.generation;
            send(&script, EngineEvent::State {
                state: EngineState::Playing,
                generation,
            });
        }
    }

    fn pause(&mut self) {
        let mut script = self.script.lock();
        if script.playing {
            script.playing = false;
            let generation = script.generation;
            send(&script, EngineEvent::State {
                state: EngineState::Paused,
                generation,
            });
        }
    }

    fn seek(&mut self, millis: i64, generation: u64) {
        let mut script = self.script.lock();
        script.generation = generation;
        script.time = millis as f64 / 1000.0;
        let settled = if script.playing {
            EngineState::Playing
        } else {
            EngineState::Paused
        };
        send(&script, EngineEvent::State {
            state: EngineState::Buffering,
            generation,
        });
        send(&script, EngineEvent::State {
            state: settled,
            generation,
        });
    }

    fn current_time(&self) -> f64 {
        self.script.lock().time
    }

    fn duration(&self) -> f64 {
        CLIP_DURATION_SECS
    }

    fn current_frame(&self) -> Option<Frame> {
        self.script.lock().frame.clone()
    }

    fn stop(&mut self) {
        let mut script = self.script.lock();
        script.stops += 1;
        script.events = None;
    }
}

/// Returns an engine factory plus a handle onto the most recent engine.
pub fn scripted_engine() -> (impl EngineFactory, EngineHandle) {
    let handle = EngineHandle::default();
    let shared = handle.clone();
    let factory = move |events: mpsc::Sender<EngineEvent>| -> Box<dyn MediaEngine> {
        shared.lock().events = Some(events);
        Box::new(ScriptedEngine {
            script: shared.clone(),
        })
    };
    (factory, handle)
}

#[derive(Default)]
struct WriterState {
    opened: Vec<PathBuf>,
    pts: Vec<i64>,
    finished: usize,
}

/// Shared log of what [`logging_writer`] writers did.
#[derive(Clone, Default)]
pub struct WriterLog(Arc<Mutex<WriterState>>);

impl WriterLog {
    fn lock(&self) -> MutexGuard<'_, WriterState> {
        self.0.lock().expect("writer lock")
    }

    pub fn opened(&self) -> Vec<PathBuf> {
        self.lock().opened.clone()
    }

    pub fn pts(&self) -> Vec<i64> {
        self.lock().pts.clone()
    }

    pub fn finished(&self) -> usize {
        self.lock().finished
    }
}

struct LoggingWriter {
    log: WriterLog,
}

impl FrameWriter for LoggingWriter {
    fn is_ready(&self) -> bool {
        true
    }

    fn append(&mut self, _frame: &Frame, pts: i64) -> Result<()> {
        self.log.lock().pts.push(pts);
        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<()> {
        self.log.lock().finished += 1;
        Ok(())
    }
}

/// Writer factory that creates the output file and logs timestamps.
pub fn logging_writer() -> (impl WriterFactory, WriterLog) {
    let log = WriterLog::default();
    let shared = log.clone();
    let factory = move |path: &Path,
                        _width: u32,
                        _height: u32,
                        _fps: RecordingFps|
          -> Result<Box<dyn FrameWriter>> {
        std::fs::File::create(path).map_err(|e| Error::Io(e.to_string()))?;
        shared.lock().opened.push(path.to_path_buf());
        Ok(Box::new(LoggingWriter {
            log: shared.clone(),
        }))
    };
    (factory, log)
}

/// Waits for the next player event, failing the test after five seconds.
pub async fn next_event(events: &mut mpsc::UnboundedReceiver<PlayerEvent>) -> PlayerEvent {
    tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("timed out waiting for a player event")
        .expect("player event channel closed")
}

/// Collects events until `last` arrives (inclusive).
pub async fn events_until(
    events: &mut mpsc::UnboundedReceiver<PlayerEvent>,
    last: &PlayerEvent,
) -> Vec<PlayerEvent> {
    let mut seen = Vec::new();
    loop {
        let event = next_event(events).await;
        let done = &event == last;
        seen.push(event);
        if done {
            return seen;
        }
    }
}
