// SPDX-License-Identifier: MPL-2.0
//! Recording through the real FFmpeg writer and reading the result back.

mod common;

use common::{next_event, scripted_engine, test_config, CLIP_HEIGHT, CLIP_WIDTH};
use std::sync::Arc;
use std::time::Duration;
use unified_player::media::{extract_video_metadata, Frame};
use unified_player::video_player::{
    FfmpegWriterFactory, PlayerBuilder, PlayerEvent, PlayerHandle, Recorder, RecordingFps,
    SessionConfig,
};

fn gradient(width: u32, height: u32, step: u32) -> Frame {
    let mut rgba = Vec::with_capacity((width * height * 4) as usize);
    for y in 0..height {
        for x in 0..width {
            rgba.extend_from_slice(&[
                ((x + step * 8) % 256) as u8,
                ((y * 4) % 256) as u8,
                (step * 20 % 256) as u8,
                255,
            ]);
        }
    }
    Frame::new(Arc::new(rgba), width, height, f64::from(step) / 30.0)
}

#[test]
fn recorded_duration_matches_frame_count() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("ten_frames.mp4");
    let mut recorder = Recorder::new(
        Arc::new(FfmpegWriterFactory::default()),
        RecordingFps::new(30),
        dir.path().to_path_buf(),
    );

    let first = gradient(96, 64, 0);
    recorder
        .start(&path.to_string_lossy(), Some(&first), 0.0)
        .expect("start");

    let mut appended = 0;
    for step in 0..10 {
        // Give the encoder time so no frame is dropped for backpressure.
        let frame = gradient(96, 64, step);
        for _ in 0..200 {
            match recorder.capture(&frame) {
                Some(unified_player::video_player::AppendOutcome::Dropped) => {
                    std::thread::sleep(Duration::from_millis(5));
                }
                _ => {
                    appended += 1;
                    break;
                }
            }
        }
    }
    assert_eq!(appended, 10);

    let summary = recorder.stop().expect("stop");
    assert_eq!(summary.stats.appended_frames, 10);
    approx::assert_relative_eq!(summary.stats.recorded_secs(), 10.0 / 30.0, epsilon = 1e-9);

    let meta = extract_video_metadata(&summary.path).expect("metadata of recording");
    assert_eq!((meta.width, meta.height), (96, 64));
    // Container durations are rounded to the stream time base; stay loose.
    assert!(
        meta.duration_secs > 0.2 && meta.duration_secs < 0.6,
        "duration {}",
        meta.duration_secs
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn player_records_what_it_shows() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (engines, _engine) = scripted_engine();
    let (player, mut events) = PlayerBuilder::new(test_config(dir.path()))
        .engine_factory(engines)
        .spawn();

    player
        .setup(SessionConfig::new("file:///clip.mp4").autoplay(true))
        .await
        .expect("setup");
    loop {
        if next_event(&mut events).await == PlayerEvent::Playing {
            break;
        }
    }

    let path = player.start_recording("").await.expect("start");
    tokio::time::sleep(Duration::from_millis(600)).await;
    let summary = player.stop_recording().await.expect("stop");

    assert_eq!(summary.path, path);
    assert!(summary.stats.appended_frames > 0);
    let meta = extract_video_metadata(&path).expect("metadata of recording");
    assert_eq!((meta.width, meta.height), (CLIP_WIDTH, CLIP_HEIGHT));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn recording_plays_back_through_ffmpeg_engine() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("playback.mp4");
    {
        let mut recorder = Recorder::new(
            Arc::new(FfmpegWriterFactory::default()),
            RecordingFps::new(30),
            dir.path().to_path_buf(),
        );
        let first = gradient(64, 48, 0);
        recorder
            .start(&path.to_string_lossy(), Some(&first), 0.0)
            .expect("start");
        for step in 0..30 {
            let frame = gradient(64, 48, step);
            while let Some(unified_player::video_player::AppendOutcome::Dropped) =
                recorder.capture(&frame)
            {
                std::thread::sleep(Duration::from_millis(5));
            }
        }
        recorder.stop().expect("stop");
    }

    let (player, mut events) = PlayerHandle::spawn(test_config(dir.path()));
    player
        .setup(SessionConfig::new(path.to_string_lossy().into_owned()).autoplay(true))
        .await
        .expect("setup");

    let mut ready = None;
    let mut completed = false;
    while !completed {
        match next_event(&mut events).await {
            PlayerEvent::ReadyToPlay { duration } => ready = Some(duration),
            PlayerEvent::PlaybackComplete => completed = true,
            PlayerEvent::Error { message, .. } => panic!("playback failed: {message}"),
            _ => {}
        }
    }

    let duration = ready.expect("readyToPlay before completion");
    assert!(duration > 0.5 && duration < 1.5, "duration {duration}");

    let snapshot = player.capture_frame().await.expect("last frame");
    assert_eq!((snapshot.width, snapshot.height), (64, 48));
    player.teardown().await.expect("teardown");
}
