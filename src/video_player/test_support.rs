// SPDX-License-Identifier: MPL-2.0
//! In-memory engine and writer doubles for unit tests.

use super::engine::{MediaEngine, MediaOptions};
use super::rates::RecordingFps;
use super::recorder::{FrameWriter, WriterFactory};
use crate::error::{Error, Result};
use crate::media::Frame;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone, PartialEq)]
pub enum EngineCall {
    Load { locator: String, generation: u64 },
    Play,
    Pause,
    Seek { millis: i64, generation: u64 },
    Stop,
}

#[derive(Debug, Default)]
struct EngineInner {
    calls: Vec<EngineCall>,
    duration: f64,
    time: f64,
    frame: Option<Frame>,
    last_generation: u64,
}

/// Engine that records every call and never emits events on its own.
#[derive(Debug, Clone, Default)]
pub struct FakeEngine(Arc<Mutex<EngineInner>>);

impl FakeEngine {
    pub fn new(duration: f64) -> Self {
        let engine = Self::default();
        engine.lock().duration = duration;
        engine
    }

    fn lock(&self) -> MutexGuard<'_, EngineInner> {
        self.0.lock().expect("fake engine lock")
    }

    pub fn calls(&self) -> Vec<EngineCall> {
        self.lock().calls.clone()
    }

    pub fn last_generation(&self) -> u64 {
        self.lock().last_generation
    }

    pub fn set_time(&self, secs: f64) {
        self.lock().time = secs;
    }

    pub fn set_frame(&self, frame: Option<Frame>) {
        self.lock().frame = frame;
    }
}

impl MediaEngine for FakeEngine {
    fn load(&mut self, locator: &str, _options: &MediaOptions, generation: u64) -> Result<()> {
        let mut inner = self.lock();
        inner.last_generation = generation;
        inner.calls.push(EngineCall::Load {
            locator: locator.to_string(),
            generation,
        });
        Ok(())
    }

    fn play(&mut self) {
        self.lock().calls.push(EngineCall::Play);
    }

    fn pause(&mut self) {
        self.lock().calls.push(EngineCall::Pause);
    }

    fn seek(&mut self, millis: i64, generation: u64) {
        let mut inner = self.lock();
        inner.last_generation = generation;
        inner.calls.push(EngineCall::Seek { millis, generation });
    }

    fn current_time(&self) -> f64 {
        self.lock().time
    }

    fn duration(&self) -> f64 {
        self.lock().duration
    }

    fn current_frame(&self) -> Option<Frame> {
        self.lock().frame.clone()
    }

    fn stop(&mut self) {
        self.lock().calls.push(EngineCall::Stop);
    }
}

#[derive(Debug)]
struct WriterInner {
    opened: Vec<PathBuf>,
    appended: Vec<i64>,
    ready: bool,
    finished: usize,
    fail_finish: bool,
}

/// Shared view of everything the fake writers did.
#[derive(Debug, Clone)]
pub struct WriterLog(Arc<Mutex<WriterInner>>);

impl WriterLog {
    fn lock(&self) -> MutexGuard<'_, WriterInner> {
        self.0.lock().expect("writer log lock")
    }

    pub fn opened(&self) -> Vec<PathBuf> {
        self.lock().opened.clone()
    }

    pub fn appended_pts(&self) -> Vec<i64> {
        self.lock().appended.clone()
    }

    pub fn finished(&self) -> usize {
        self.lock().finished
    }

    pub fn set_ready(&self, ready: bool) {
        self.lock().ready = ready;
    }

    pub fn fail_finish(&self, fail: bool) {
        self.lock().fail_finish = fail;
    }
}

/// Writer factory that creates an empty file and logs appended timestamps.
pub struct FakeWriterFactory {
    log: WriterLog,
}

impl FakeWriterFactory {
    pub fn new() -> Self {
        Self {
            log: WriterLog(Arc::new(Mutex::new(WriterInner {
                opened: Vec::new(),
                appended: Vec::new(),
                ready: true,
                finished: 0,
                fail_finish: false,
            }))),
        }
    }

    pub fn log(&self) -> WriterLog {
        self.log.clone()
    }
}

impl WriterFactory for FakeWriterFactory {
    fn open(
        &self,
        path: &Path,
        _width: u32,
        _height: u32,
        _fps: RecordingFps,
    ) -> Result<Box<dyn FrameWriter>> {
        std::fs::File::create(path)?;
        self.log.lock().opened.push(path.to_path_buf());
        Ok(Box::new(FakeWriter {
            log: self.log.clone(),
        }))
    }
}

struct FakeWriter {
    log: WriterLog,
}

impl FrameWriter for FakeWriter {
    fn is_ready(&self) -> bool {
        self.log.lock().ready
    }

    fn append(&mut self, _frame: &Frame, pts: i64) -> Result<()> {
        self.log.lock().appended.push(pts);
        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<()> {
        let mut inner = self.log.lock();
        inner.finished += 1;
        if inner.fail_finish {
            return Err(Error::Finalize("trailer write failed".to_string()));
        }
        Ok(())
    }
}
