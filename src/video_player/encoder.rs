// SPDX-License-Identifier: MPL-2.0
//! FFmpeg-backed [`FrameWriter`]: RGBA frames in, MPEG-4 video in an MP4 file out.
//!
//! FFmpeg contexts are not `Send`, so the muxer and encoder live on a
//! dedicated worker thread. Frames reach it through a bounded queue; the
//! writer reports "not ready" once the queue is full and the recording
//! pipeline drops frames instead of stalling the controller.

use super::rates::RecordingFps;
use super::recorder::{FrameWriter, WriterFactory};
use crate::config::{DEFAULT_ENCODER_QUEUE_FRAMES, DEFAULT_RECORDING_BIT_RATE};
use crate::error::{Error, Result};
use crate::media::Frame;
use ffmpeg_next::{codec, encoder, format, frame, software::scaling, Packet, Rational};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Encoder settings shared by every recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FfmpegWriterFactory {
    pub bit_rate: usize,
    /// Frames that may wait for the encoder before new ones are dropped.
    pub queue_frames: usize,
}

impl Default for FfmpegWriterFactory {
    fn default() -> Self {
        Self {
            bit_rate: DEFAULT_RECORDING_BIT_RATE,
            queue_frames: DEFAULT_ENCODER_QUEUE_FRAMES,
        }
    }
}

impl WriterFactory for FfmpegWriterFactory {
    fn open(
        &self,
        path: &Path,
        width: u32,
        height: u32,
        fps: RecordingFps,
    ) -> Result<Box<dyn FrameWriter>> {
        let writer = FfmpegFrameWriter::open(path, width, height, fps, *self)?;
        Ok(Box::new(writer))
    }
}

type Job = (Frame, i64);

/// Handle to the encoder worker of one recording.
pub struct FfmpegFrameWriter {
    queue: Option<SyncSender<Job>>,
    in_flight: Arc<AtomicUsize>,
    capacity: usize,
    worker: Option<JoinHandle<Result<()>>>,
}

impl FfmpegFrameWriter {
    /// Spawns the worker and waits until the output file is open.
    pub fn open(
        path: &Path,
        width: u32,
        height: u32,
        fps: RecordingFps,
        settings: FfmpegWriterFactory,
    ) -> Result<Self> {
        crate::media::init_ffmpeg()?;

        let capacity = settings.queue_frames.max(1);
        let (queue_tx, queue_rx) = mpsc::sync_channel::<Job>(capacity);
        let (opened_tx, opened_rx) = mpsc::sync_channel::<Result<()>>(1);
        let in_flight = Arc::new(AtomicUsize::new(0));

        let path_buf = path.to_path_buf();
        let worker_in_flight = Arc::clone(&in_flight);
        let worker = thread::Builder::new()
            .name("recording-encoder".to_string())
            .spawn(move || {
                let mut output =
                    match Mp4Output::create(&path_buf, width, height, fps.value(), settings.bit_rate)
                    {
                        Ok(output) => {
                            let _ = opened_tx.send(Ok(()));
                            output
                        }
                        Err(e) => {
                            let _ = opened_tx.send(Err(e.clone()));
                            return Err(e);
                        }
                    };
                encode_loop(&mut output, &queue_rx, &worker_in_flight)
            })?;

        match opened_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                queue: Some(queue_tx),
                in_flight,
                capacity,
                worker: Some(worker),
            }),
            Ok(Err(e)) => {
                let _ = worker.join();
                Err(e)
            }
            Err(_) => {
                let _ = worker.join();
                Err(Error::Io(format!(
                    "Encoder worker for {} exited during setup",
                    path.display()
                )))
            }
        }
    }
}

impl FrameWriter for FfmpegFrameWriter {
    fn is_ready(&self) -> bool {
        self.queue.is_some() && self.in_flight.load(Ordering::Acquire) < self.capacity
    }

    fn append(&mut self, frame: &Frame, pts: i64) -> Result<()> {
        let queue = self
            .queue
            .as_ref()
            .ok_or_else(|| Error::Encode("Writer already finished".to_string()))?;

        self.in_flight.fetch_add(1, Ordering::AcqRel);
        match queue.try_send((frame.clone(), pts)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                self.in_flight.fetch_sub(1, Ordering::AcqRel);
                Err(Error::Encode("Encoder queue is full".to_string()))
            }
            Err(TrySendError::Disconnected(_)) => {
                self.in_flight.fetch_sub(1, Ordering::AcqRel);
                Err(Error::Encode("Encoder worker stopped".to_string()))
            }
        }
    }

    fn finish(mut self: Box<Self>) -> Result<()> {
        self.shutdown()
    }
}

impl FfmpegFrameWriter {
    fn shutdown(&mut self) -> Result<()> {
        // Closing the queue lets the worker drain and write the trailer.
        drop(self.queue.take());
        match self.worker.take() {
            Some(worker) => worker
                .join()
                .map_err(|_| Error::Finalize("Encoder worker panicked".to_string()))?,
            None => Ok(()),
        }
    }
}

impl Drop for FfmpegFrameWriter {
    fn drop(&mut self) {
        if self.worker.is_some() {
            if let Err(e) = self.shutdown() {
                log::error!("Encoder shutdown failed: {e}");
            }
        }
    }
}

fn encode_loop(
    output: &mut Mp4Output,
    queue: &Receiver<Job>,
    in_flight: &AtomicUsize,
) -> Result<()> {
    let mut failure = None;
    for (frame, pts) in queue.iter() {
        let result = output.encode(&frame, pts);
        in_flight.fetch_sub(1, Ordering::AcqRel);
        if let Err(e) = result {
            log::error!("Encoding frame {pts} failed: {e}");
            failure = Some(e);
            break;
        }
    }

    // Finalize even after a failure so whatever was written stays playable.
    let finished = output.finish();
    match failure {
        Some(e) => Err(e),
        None => finished,
    }
}

/// Rejects frames the `width` x `height` encoder cannot take.
fn check_frame(frame: &Frame, width: u32, height: u32) -> Result<()> {
    if frame.dimensions() != (width, height) {
        return Err(Error::FrameDimensionsChanged {
            from_width: width,
            from_height: height,
            to_width: frame.width,
            to_height: frame.height,
        });
    }
    if !frame.is_consistent() {
        return Err(Error::Encode("inconsistent frame buffer".to_string()));
    }
    Ok(())
}

/// Muxer + encoder + colorspace converter for one file. Lives on the worker.
struct Mp4Output {
    path: PathBuf,
    octx: format::context::Output,
    encoder: encoder::video::Encoder,
    scaler: scaling::Context,
    rgba: frame::Video,
    yuv: frame::Video,
    stream_index: usize,
    encoder_time_base: Rational,
    stream_time_base: Rational,
    src_width: u32,
    src_height: u32,
}

impl Mp4Output {
    fn create(path: &Path, width: u32, height: u32, fps: u32, bit_rate: usize) -> Result<Self> {
        let mut octx = format::output(&path)
            .map_err(|e| Error::Io(format!("Cannot open {} for writing: {e}", path.display())))?;

        // YUV 4:2:0 needs even dimensions.
        let out_width = (width & !1).max(2);
        let out_height = (height & !1).max(2);
        let time_base = Rational::new(1, fps.max(1) as i32);

        let codec = encoder::find(codec::Id::MPEG4)
            .ok_or_else(|| Error::Encode("MPEG-4 encoder not available".to_string()))?;
        let global_header = octx
            .format()
            .flags()
            .contains(format::Flags::GLOBAL_HEADER);

        let mut context = codec::context::Context::new_with_codec(codec)
            .encoder()
            .video()?;
        context.set_width(out_width);
        context.set_height(out_height);
        context.set_format(format::Pixel::YUV420P);
        context.set_time_base(time_base);
        context.set_frame_rate(Some(Rational::new(fps.max(1) as i32, 1)));
        context.set_bit_rate(bit_rate);
        context.set_gop(fps.max(1));
        if global_header {
            context.set_flags(codec::Flags::GLOBAL_HEADER);
        }
        let encoder = context.open_as(codec)?;

        let stream_index = {
            let mut stream = octx.add_stream(codec)?;
            stream.set_time_base(time_base);
            stream.set_parameters(&encoder);
            stream.index()
        };

        octx.write_header()
            .map_err(|e| Error::Io(format!("Cannot write header to {}: {e}", path.display())))?;
        let stream_time_base = octx
            .stream(stream_index)
            .map(|s| s.time_base())
            .ok_or_else(|| Error::Encode("Output stream disappeared".to_string()))?;

        let scaler = scaling::Context::get(
            format::Pixel::RGBA,
            width,
            height,
            format::Pixel::YUV420P,
            out_width,
            out_height,
            scaling::Flags::BILINEAR,
        )?;

        log::debug!(
            "Opened {} ({out_width}x{out_height}, stream time base {stream_time_base:?})",
            path.display()
        );

        Ok(Self {
            path: path.to_path_buf(),
            octx,
            encoder,
            scaler,
            rgba: frame::Video::new(format::Pixel::RGBA, width, height),
            yuv: frame::Video::empty(),
            stream_index,
            encoder_time_base: time_base,
            stream_time_base,
            src_width: width,
            src_height: height,
        })
    }

    fn encode(&mut self, frame: &Frame, pts: i64) -> Result<()> {
        check_frame(frame, self.src_width, self.src_height)?;

        let row_bytes = self.src_width as usize * 4;
        let stride = self.rgba.stride(0);
        let plane = self.rgba.data_mut(0);
        for (y, row) in frame.rgba_data.chunks_exact(row_bytes).enumerate() {
            plane[y * stride..y * stride + row_bytes].copy_from_slice(row);
        }

        self.scaler.run(&self.rgba, &mut self.yuv)?;
        self.yuv.set_pts(Some(pts));
        self.encoder.send_frame(&self.yuv)?;
        self.drain_packets()
    }

    fn drain_packets(&mut self) -> Result<()> {
        let mut packet = Packet::empty();
        while self.encoder.receive_packet(&mut packet).is_ok() {
            if packet.duration() == 0 {
                packet.set_duration(1);
            }
            packet.set_stream(self.stream_index);
            packet.rescale_ts(self.encoder_time_base, self.stream_time_base);
            packet.write_interleaved(&mut self.octx)?;
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.encoder
            .send_eof()
            .map_err(|e| Error::Finalize(format!("Cannot flush encoder: {e}")))?;
        self.drain_packets()
            .map_err(|e| Error::Finalize(e.to_string()))?;
        self.octx.write_trailer().map_err(|e| {
            Error::Finalize(format!(
                "Cannot write trailer to {}: {e}",
                self.path.display()
            ))
        })
    }
}
