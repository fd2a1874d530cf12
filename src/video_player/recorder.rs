// SPDX-License-Identifier: MPL-2.0
//! Recording pipeline: sampled frames in, an encoded video file out.
//!
//! A [`RecordingSession`] exclusively owns its [`FrameWriter`]. Timestamps come
//! from an appended-frame counter at the nominal frame rate, so sampler jitter
//! never produces out-of-order or duplicate PTS values. A [`FramePacer`]
//! maps sampler ticks onto frame slots at that rate, so the file plays back
//! in real time whatever the sampler frequency. When the writer is not ready
//! the frame is dropped and counted instead of queued.

use super::rates::RecordingFps;
use super::time_units::frame_index_to_secs;
use crate::error::{Error, Result};
use crate::media::Frame;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Sink for timestamped frames. Implementations own the encoder and the file.
pub trait FrameWriter: Send {
    /// Returns false while the writer cannot take another frame without
    /// blocking the caller.
    fn is_ready(&self) -> bool;

    /// Queues `frame` with presentation timestamp `pts`, expressed in frame
    /// intervals at the session's nominal rate.
    fn append(&mut self, frame: &Frame, pts: i64) -> Result<()>;

    /// Flushes pending data and writes the container trailer.
    fn finish(self: Box<Self>) -> Result<()>;
}

/// Opens writers for new recording sessions.
pub trait WriterFactory: Send + Sync {
    /// Creates the output file at `path`. Fails with [`Error::Io`] when the
    /// location is not writable.
    fn open(
        &self,
        path: &Path,
        width: u32,
        height: u32,
        fps: RecordingFps,
    ) -> Result<Box<dyn FrameWriter>>;
}

impl<F> WriterFactory for F
where
    F: Fn(&Path, u32, u32, RecordingFps) -> Result<Box<dyn FrameWriter>> + Send + Sync,
{
    fn open(
        &self,
        path: &Path,
        width: u32,
        height: u32,
        fps: RecordingFps,
    ) -> Result<Box<dyn FrameWriter>> {
        self(path, width, height, fps)
    }
}

/// Counters for a recording in progress.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecordingStats {
    pub appended_frames: u64,
    pub dropped_frames: u64,
    /// Wall-clock time since the recording started.
    pub elapsed: Duration,
    /// Playback position when the recording started.
    pub media_start_secs: f64,
    pub fps: RecordingFps,
}

impl RecordingStats {
    /// Length of the encoded video: appended frames times the frame interval.
    #[must_use]
    pub fn recorded_secs(&self) -> f64 {
        frame_index_to_secs(self.appended_frames as i64, self.fps.value())
    }
}

/// Result of a successful `stop_recording`.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordingSummary {
    pub path: PathBuf,
    pub stats: RecordingStats,
}

/// What happened to one sampled frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// Last timestamp written for this sample.
    Appended { pts: i64 },
    /// No frame slot has elapsed since the previous sample.
    NotDue,
    /// Writer applied backpressure.
    Dropped,
    /// The session has failed; frames are no longer accepted.
    Rejected,
}

/// Turns irregular tick instants into whole frame slots at a nominal rate.
///
/// The first tick after creation or [`reset`](Self::reset) claims one slot.
/// Later ticks claim every slot whose start lies within a quarter interval
/// of the tick, at most one second's worth at a time.
#[derive(Debug, Clone)]
pub struct FramePacer {
    interval: Duration,
    max_catch_up: u32,
    next_due: Option<Instant>,
}

impl FramePacer {
    #[must_use]
    pub fn new(fps: RecordingFps) -> Self {
        Self {
            interval: fps.frame_interval(),
            max_catch_up: fps.value(),
            next_due: None,
        }
    }

    /// Number of frame slots due at `now`.
    pub fn due(&mut self, now: Instant) -> u32 {
        let Some(next_due) = self.next_due else {
            self.next_due = Some(now + self.interval);
            return 1;
        };

        let reach = now + self.interval / 4;
        if reach < next_due {
            return 0;
        }
        let lag = reach.duration_since(next_due);
        let slots = 1 + lag.as_nanos() / self.interval.as_nanos().max(1);

        match u32::try_from(slots) {
            Ok(slots) if slots <= self.max_catch_up => {
                self.next_due = Some(next_due + self.interval * slots);
                slots
            }
            _ => {
                log::debug!("Sampler fell {lag:?} behind, resynchronizing");
                self.next_due = Some(now + self.interval);
                self.max_catch_up
            }
        }
    }

    /// Forgets the last slot; the next tick starts a fresh timeline.
    pub fn reset(&mut self) {
        self.next_due = None;
    }
}

/// One active recording.
pub struct RecordingSession {
    path: PathBuf,
    started_at: Instant,
    media_start_secs: f64,
    writer: Option<Box<dyn FrameWriter>>,
    width: u32,
    height: u32,
    fps: RecordingFps,
    next_pts: i64,
    dropped: u64,
    failure: Option<Error>,
    pacer: FramePacer,
}

impl RecordingSession {
    /// Opens a writer sized to `width`×`height`.
    pub fn open(
        factory: &dyn WriterFactory,
        path: PathBuf,
        width: u32,
        height: u32,
        fps: RecordingFps,
        media_start_secs: f64,
    ) -> Result<Self> {
        let writer = factory.open(&path, width, height, fps)?;
        Ok(Self {
            path,
            started_at: Instant::now(),
            media_start_secs,
            writer: Some(writer),
            width,
            height,
            fps,
            next_pts: 0,
            dropped: 0,
            failure: None,
            pacer: FramePacer::new(fps),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// The error that stopped this session from accepting frames, if any.
    pub fn failure(&self) -> Option<&Error> {
        self.failure.as_ref()
    }

    pub fn stats(&self) -> RecordingStats {
        RecordingStats {
            appended_frames: self.next_pts as u64,
            dropped_frames: self.dropped,
            elapsed: self.started_at.elapsed(),
            media_start_secs: self.media_start_secs,
            fps: self.fps,
        }
    }

    /// Timestamps and appends one frame.
    pub fn append(&mut self, frame: &Frame) -> AppendOutcome {
        if self.failure.is_some() {
            return AppendOutcome::Rejected;
        }
        let Some(writer) = self.writer.as_mut() else {
            return AppendOutcome::Rejected;
        };

        if frame.dimensions() != (self.width, self.height) {
            let error = Error::FrameDimensionsChanged {
                from_width: self.width,
                from_height: self.height,
                to_width: frame.width,
                to_height: frame.height,
            };
            log::warn!("Recording to {} failed: {error}", self.path.display());
            self.failure = Some(error);
            return AppendOutcome::Rejected;
        }

        if !writer.is_ready() {
            self.dropped += 1;
            log::trace!(
                "Encoder busy, dropped frame ({} dropped so far)",
                self.dropped
            );
            return AppendOutcome::Dropped;
        }

        let pts = self.next_pts;
        match writer.append(frame, pts) {
            Ok(()) => {
                self.next_pts += 1;
                AppendOutcome::Appended { pts }
            }
            Err(e) => {
                log::warn!("Recording to {} failed: {e}", self.path.display());
                self.failure = Some(e);
                AppendOutcome::Rejected
            }
        }
    }

    /// Appends `frame` once for every frame slot due at `now`.
    ///
    /// When the sampler ticks slower than the nominal rate the frame is
    /// repeated, when it ticks faster some ticks append nothing.
    pub fn append_due(&mut self, frame: &Frame, now: Instant) -> AppendOutcome {
        let slots = self.pacer.due(now);
        let mut outcome = AppendOutcome::NotDue;
        for _ in 0..slots {
            outcome = self.append(frame);
            if outcome == AppendOutcome::Rejected {
                break;
            }
        }
        outcome
    }

    /// Stops the frame clock while no frames are being sampled, so resuming
    /// does not backfill the gap.
    pub fn pause_clock(&mut self) {
        self.pacer.reset();
    }

    /// Finalizes the file and releases the writer.
    ///
    /// A session that failed mid-way is still finalized, then reports its
    /// failure. The file stays on disk either way.
    pub fn finish(mut self) -> Result<RecordingSummary> {
        let finalized = self.finalize();
        let summary = RecordingSummary {
            path: self.path.clone(),
            stats: self.stats(),
        };

        if let Some(failure) = self.failure.take() {
            return Err(failure);
        }
        finalized.map(|()| summary)
    }

    fn finalize(&mut self) -> Result<()> {
        let Some(writer) = self.writer.take() else {
            return Ok(());
        };
        log::debug!(
            "Finalizing {} ({} frames, {} dropped)",
            self.path.display(),
            self.next_pts,
            self.dropped
        );
        writer.finish().map_err(|e| match e {
            Error::Finalize(_) => e,
            other => Error::Finalize(other.to_string()),
        })
    }
}

impl Drop for RecordingSession {
    fn drop(&mut self) {
        if self.writer.is_some() {
            log::warn!(
                "Recording to {} released without stop, finalizing",
                self.path.display()
            );
            if let Err(e) = self.finalize() {
                log::error!("{e}");
            }
        }
    }
}

/// Start/stop front-end for recording sessions. At most one session at a time.
pub struct Recorder {
    factory: Arc<dyn WriterFactory>,
    fps: RecordingFps,
    recordings_dir: PathBuf,
    session: Option<RecordingSession>,
}

impl Recorder {
    pub fn new(factory: Arc<dyn WriterFactory>, fps: RecordingFps, recordings_dir: PathBuf) -> Self {
        Self {
            factory,
            fps,
            recordings_dir,
            session: None,
        }
    }

    pub fn is_recording(&self) -> bool {
        self.session.is_some()
    }

    pub fn stats(&self) -> Option<RecordingStats> {
        self.session.as_ref().map(RecordingSession::stats)
    }

    /// Starts a session sized to `frame`.
    ///
    /// An empty `path` records to `recording_<unix-millis>.mp4` in the
    /// recordings directory.
    pub fn start(
        &mut self,
        path: &str,
        frame: Option<&Frame>,
        media_time_secs: f64,
    ) -> Result<PathBuf> {
        if self.session.is_some() {
            return Err(Error::AlreadyRecording);
        }
        let frame = frame.ok_or(Error::NoFrameAvailable)?;

        let path = self.resolve_output_path(path)?;
        let session = RecordingSession::open(
            self.factory.as_ref(),
            path.clone(),
            frame.width,
            frame.height,
            self.fps,
            media_time_secs,
        )?;

        log::info!(
            "Recording {}x{} @ {} fps to {}",
            frame.width,
            frame.height,
            self.fps.value(),
            path.display()
        );
        self.session = Some(session);
        Ok(path)
    }

    /// Appends one frame to the active session, if any, without pacing.
    pub fn capture(&mut self, frame: &Frame) -> Option<AppendOutcome> {
        self.session.as_mut().map(|session| session.append(frame))
    }

    /// Feeds a frame sampled at `now` into the active session, if any.
    pub fn capture_at(&mut self, frame: &Frame, now: Instant) -> Option<AppendOutcome> {
        self.session
            .as_mut()
            .map(|session| session.append_due(frame, now))
    }

    /// Called on ticks where playback is not producing frames.
    pub fn pause_clock(&mut self) {
        if let Some(session) = self.session.as_mut() {
            session.pause_clock();
        }
    }

    /// Stops the active session and returns the finalized file.
    pub fn stop(&mut self) -> Result<RecordingSummary> {
        let session = self.session.take().ok_or(Error::NotRecording)?;
        let result = session.finish();
        match &result {
            Ok(summary) => log::info!(
                "Recording saved to {} ({} frames, {} dropped)",
                summary.path.display(),
                summary.stats.appended_frames,
                summary.stats.dropped_frames
            ),
            Err(e) => log::warn!("Recording stopped with error: {e}"),
        }
        result
    }

    /// Finalizes any active session during teardown. Returns `None` when idle.
    pub fn release(&mut self) -> Option<Result<RecordingSummary>> {
        self.session.is_some().then(|| self.stop())
    }

    fn resolve_output_path(&self, path: &str) -> Result<PathBuf> {
        let path = if path.trim().is_empty() {
            let millis = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis())
                .unwrap_or_default();
            self.recordings_dir.join(format!("recording_{millis}.mp4"))
        } else {
            PathBuf::from(path)
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                Error::Io(format!("Cannot create {}: {e}", parent.display()))
            })?;
        }
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video_player::test_support::{FakeWriterFactory, WriterLog};
    use tempfile::tempdir;

    fn recorder(dir: &Path) -> (Recorder, WriterLog) {
        let factory = FakeWriterFactory::new();
        let log = factory.log();
        let recorder = Recorder::new(Arc::new(factory), RecordingFps::new(30), dir.to_path_buf());
        (recorder, log)
    }

    fn frame(w: u32, h: u32) -> Frame {
        Frame::solid(w, h, [1, 2, 3, 255], 0.0)
    }

    #[test]
    fn start_requires_a_rendered_frame() {
        let dir = tempdir().expect("temp dir");
        let (mut rec, _) = recorder(dir.path());
        assert_eq!(
            rec.start("out.mp4", None, 0.0),
            Err(Error::NoFrameAvailable)
        );
        assert!(!rec.is_recording());
    }

    #[test]
    fn second_start_fails_and_keeps_first_session() {
        let dir = tempdir().expect("temp dir");
        let (mut rec, log) = recorder(dir.path());
        let first = dir.path().join("first.mp4");
        let f = frame(4, 4);

        rec.start(first.to_str().expect("utf8"), Some(&f), 0.0)
            .expect("first start");
        rec.capture(&f);

        let second = dir.path().join("second.mp4");
        assert_eq!(
            rec.start(second.to_str().expect("utf8"), Some(&f), 0.0),
            Err(Error::AlreadyRecording)
        );
        assert_eq!(rec.stats().map(|s| s.appended_frames), Some(1));

        let summary = rec.stop().expect("stop");
        assert_eq!(summary.path, first);
        assert_eq!(log.opened(), vec![first]);
    }

    #[test]
    fn timestamps_strictly_increase_across_drops() {
        let dir = tempdir().expect("temp dir");
        let (mut rec, log) = recorder(dir.path());
        let f = frame(4, 4);
        rec.start("", Some(&f), 0.0).expect("start");

        for i in 0..20 {
            log.set_ready(i % 3 != 0);
            rec.capture(&f);
        }
        rec.stop().expect("stop");

        let pts = log.appended_pts();
        assert!(!pts.is_empty());
        assert!(pts.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(pts[0], 0);
    }

    #[test]
    fn backpressure_drops_and_counts() {
        let dir = tempdir().expect("temp dir");
        let (mut rec, log) = recorder(dir.path());
        let f = frame(4, 4);
        rec.start("", Some(&f), 0.0).expect("start");

        log.set_ready(false);
        assert_eq!(rec.capture(&f), Some(AppendOutcome::Dropped));
        assert_eq!(rec.capture(&f), Some(AppendOutcome::Dropped));
        log.set_ready(true);
        assert_eq!(rec.capture(&f), Some(AppendOutcome::Appended { pts: 0 }));

        let summary = rec.stop().expect("stop");
        assert_eq!(summary.stats.appended_frames, 1);
        assert_eq!(summary.stats.dropped_frames, 2);
    }

    #[test]
    fn stop_without_session_is_not_recording() {
        let dir = tempdir().expect("temp dir");
        let (mut rec, _) = recorder(dir.path());
        assert_eq!(rec.stop(), Err(Error::NotRecording));
        assert!(rec.release().is_none());
    }

    #[test]
    fn zero_frame_recording_still_finalizes() {
        let dir = tempdir().expect("temp dir");
        let (mut rec, log) = recorder(dir.path());
        rec.start("", Some(&frame(4, 4)), 0.0).expect("start");

        let summary = rec.stop().expect("stop");
        assert_eq!(summary.stats.appended_frames, 0);
        assert_eq!(log.finished(), 1);
    }

    #[test]
    fn finalize_failure_is_reported_and_file_kept() {
        let dir = tempdir().expect("temp dir");
        let (mut rec, log) = recorder(dir.path());
        log.fail_finish(true);
        let path = rec.start("", Some(&frame(4, 4)), 0.0).expect("start");

        assert!(matches!(rec.stop(), Err(Error::Finalize(_))));
        assert!(path.exists());
        assert!(!rec.is_recording());
    }

    #[test]
    fn dimension_change_fails_session_but_finalizes() {
        let dir = tempdir().expect("temp dir");
        let (mut rec, log) = recorder(dir.path());
        rec.start("", Some(&frame(4, 4)), 0.0).expect("start");

        rec.capture(&frame(4, 4));
        assert_eq!(rec.capture(&frame(8, 8)), Some(AppendOutcome::Rejected));
        assert_eq!(rec.capture(&frame(4, 4)), Some(AppendOutcome::Rejected));

        let err = rec.stop().unwrap_err();
        assert!(matches!(err, Error::FrameDimensionsChanged { to_width: 8, .. }));
        assert_eq!(log.appended_pts(), vec![0]);
        assert_eq!(log.finished(), 1);
    }

    #[test]
    fn empty_path_uses_recordings_dir() {
        let dir = tempdir().expect("temp dir");
        let nested = dir.path().join("a").join("b");
        let (mut rec, _) = recorder(&nested);

        let path = rec.start("", Some(&frame(2, 2)), 0.0).expect("start");
        assert_eq!(path.parent(), Some(nested.as_path()));
        let name = path.file_name().and_then(|n| n.to_str()).expect("name");
        assert!(name.starts_with("recording_") && name.ends_with(".mp4"));
        rec.stop().expect("stop");
    }

    #[test]
    fn unwritable_path_is_io_error() {
        let dir = tempdir().expect("temp dir");
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"x").expect("write");
        let (mut rec, _) = recorder(dir.path());

        let target = blocker.join("out.mp4");
        let err = rec
            .start(target.to_str().expect("utf8"), Some(&frame(2, 2)), 0.0)
            .unwrap_err();
        assert!(matches!(err, Error::Io(_)));
        assert!(!rec.is_recording());
    }

    #[test]
    fn dropping_session_finalizes_writer() {
        let dir = tempdir().expect("temp dir");
        let (mut rec, log) = recorder(dir.path());
        rec.start("", Some(&frame(2, 2)), 0.0).expect("start");
        drop(rec);
        assert_eq!(log.finished(), 1);
    }

    fn slots_at(pacer: &mut FramePacer, base: Instant, offsets_ms: &[u64]) -> Vec<u32> {
        offsets_ms
            .iter()
            .map(|ms| pacer.due(base + Duration::from_millis(*ms)))
            .collect()
    }

    #[test]
    fn pacer_handles_irregular_ticks() {
        let mut pacer = FramePacer::new(RecordingFps::new(10));
        let slots = slots_at(
            &mut pacer,
            Instant::now(),
            &[0, 3, 43, 44, 294, 301, 431, 1_800, 1_905],
        );
        // 1.8 s late is more than a second of catch-up: capped and resynced.
        assert_eq!(slots, vec![1, 0, 0, 0, 3, 0, 1, 10, 1]);
    }

    #[test]
    fn pacer_halves_a_sampler_running_at_twice_the_rate() {
        let mut pacer = FramePacer::new(RecordingFps::new(30));
        let period = crate::video_player::SamplerRateHz::new(60).period();
        let base = Instant::now();

        let total: u32 = (1..=60u32).map(|k| pacer.due(base + period * k)).sum();
        assert_eq!(total, 30);
    }

    #[test]
    fn pacer_repeats_frames_for_a_slow_sampler() {
        let mut pacer = FramePacer::new(RecordingFps::new(30));
        let slots = slots_at(&mut pacer, Instant::now(), &[0, 100, 200, 300]);
        assert_eq!(slots, vec![1, 3, 3, 3]);
    }

    #[test]
    fn pacer_reset_starts_a_new_timeline() {
        let mut pacer = FramePacer::new(RecordingFps::new(10));
        let base = Instant::now();
        assert_eq!(pacer.due(base), 1);
        pacer.reset();
        assert_eq!(pacer.due(base + Duration::from_secs(5)), 1);
        assert_eq!(pacer.due(base + Duration::from_millis(5_100)), 1);
    }

    #[test]
    fn paced_capture_keeps_timestamps_gap_free() {
        let dir = tempdir().expect("temp dir");
        let (mut rec, log) = recorder(dir.path());
        let f = frame(4, 4);
        rec.start("", Some(&f), 0.0).expect("start");

        let base = Instant::now();
        for ms in [0, 3, 40, 41, 291, 298, 350, 352, 700] {
            rec.capture_at(&f, base + Duration::from_millis(ms));
        }
        rec.stop().expect("stop");

        let pts = log.appended_pts();
        assert_eq!(pts, (0..pts.len() as i64).collect::<Vec<_>>());
        // 700 ms at 30 fps, starting with a slot at 0.
        assert_eq!(pts.len(), 22);
    }

    #[test]
    fn recorded_duration_follows_frame_count() {
        let stats = RecordingStats {
            appended_frames: 45,
            dropped_frames: 3,
            elapsed: Duration::from_secs(2),
            media_start_secs: 0.0,
            fps: RecordingFps::new(30),
        };
        assert!((stats.recorded_secs() - 1.5).abs() < 1e-9);
    }
}
