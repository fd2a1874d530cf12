// SPDX-License-Identifier: MPL-2.0
use std::ffi::OsString;
use std::path::PathBuf;
use std::time::Duration;
use unified_player::config;
use unified_player::error::{Error, Result};
use unified_player::media::frame_export::ExportFormat;
use unified_player::video_player::{
    MediaOptions, PlayerEvent, PlayerHandle, SessionConfig, Source,
};

const HELP: &str = "\
unified_player: play a video, optionally recording what is shown

USAGE:
  unified_player [OPTIONS] SOURCE [SOURCE...]

Several sources play as a playlist.

OPTIONS:
  --loop                 Restart from the beginning at the end
  --no-autoplay          Open the source without starting playback
  --record SECS          Record the displayed picture for SECS seconds
  --output PATH          Recording output path (default: auto-named)
  --snapshot PATH        Save the first displayed frame to PATH (or into
                         PATH with a generated name if it is a directory)
  --option KEY=VALUE     Demuxer option, may be repeated
  --config PATH          Settings file to use instead of the default
  -h, --help             Print this help
";

struct Args {
    sources: Vec<String>,
    autoplay: bool,
    loop_playback: bool,
    record_secs: Option<f64>,
    output: Option<String>,
    snapshot: Option<PathBuf>,
    options: Vec<String>,
    config_path: Option<PathBuf>,
}

fn parse_args() -> std::result::Result<Option<Args>, pico_args::Error> {
    let mut args = pico_args::Arguments::from_env();
    if args.contains(["-h", "--help"]) {
        return Ok(None);
    }

    let parsed = Args {
        autoplay: !args.contains("--no-autoplay"),
        loop_playback: args.contains("--loop"),
        record_secs: args.opt_value_from_str("--record")?,
        output: args.opt_value_from_str("--output")?,
        snapshot: args.opt_value_from_os_str("--snapshot", |s| {
            Ok::<_, &str>(PathBuf::from(s))
        })?,
        options: args.values_from_str("--option")?,
        config_path: args.opt_value_from_os_str("--config", |s| {
            Ok::<_, &str>(PathBuf::from(s))
        })?,
        sources: args
            .finish()
            .into_iter()
            .filter_map(|s: OsString| s.into_string().ok())
            .collect(),
    };
    Ok(Some(parsed))
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = match parse_args() {
        Ok(Some(args)) if !args.sources.is_empty() => args,
        Ok(_) => {
            print!("{HELP}");
            return;
        }
        Err(e) => {
            eprintln!("Error: {e}\n\n{HELP}");
            std::process::exit(2);
        }
    };

    if let Err(e) = run(args).await {
        eprintln!("Error [{}]: {}", e.code(), e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    let config = match &args.config_path {
        Some(path) => config::load_from_path(path)?,
        None => config::load().unwrap_or_else(|e| {
            log::warn!("Using default settings: {e}");
            config::PlayerConfig::default()
        }),
    };

    let source = if args.sources.len() == 1 {
        Source::Single(args.sources[0].clone())
    } else {
        Source::Playlist(args.sources.clone())
    };
    let session = SessionConfig::new(source)
        .autoplay(args.autoplay)
        .looping(args.loop_playback)
        .options(MediaOptions::from_args(&args.options));

    let (player, mut events) = PlayerHandle::spawn(config);
    player.setup(session).await?;

    let mut snapshot_path = args.snapshot.clone();
    let mut recording_deadline = None;

    loop {
        let deadline = recording_deadline;
        let event = tokio::select! {
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
            () = sleep_until(deadline) => {
                recording_deadline = None;
                finish_recording(&player).await;
                if !args.loop_playback {
                    break;
                }
                continue;
            }
        };

        println!("{:<18} {}", event.binding_name(), describe(&event));

        match event {
            PlayerEvent::Playing => {
                if let Some(path) = snapshot_path.take() {
                    save_snapshot(&player, &path, &args.sources[0]).await;
                }
                if let Some(secs) = args.record_secs {
                    if !player_is_recording(&player).await {
                        let path = args.output.clone().unwrap_or_default();
                        match player.start_recording(path).await {
                            Ok(path) => {
                                println!("recording to {}", path.display());
                                recording_deadline = Some(
                                    tokio::time::Instant::now() + Duration::from_secs_f64(secs),
                                );
                            }
                            Err(e) => log::warn!("Could not start recording: {e}"),
                        }
                    }
                }
            }
            PlayerEvent::PlaybackComplete if !args.loop_playback => break,
            PlayerEvent::Error { .. } => {
                player.teardown().await?;
                return Err(Error::Playback("playback stopped on error".into()));
            }
            _ => {}
        }
    }

    if let Some(Ok(summary)) = player.teardown().await? {
        println!("recording saved to {}", summary.path.display());
    }
    Ok(())
}

async fn sleep_until(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn player_is_recording(player: &PlayerHandle) -> bool {
    matches!(player.recording_stats().await, Ok(Some(_)))
}

async fn finish_recording(player: &PlayerHandle) {
    match player.stop_recording().await {
        Ok(summary) => println!(
            "recording saved to {} ({} frames, {:.2}s)",
            summary.path.display(),
            summary.stats.appended_frames,
            summary.stats.recorded_secs()
        ),
        Err(e) => log::warn!("Recording failed: {e}"),
    }
}

async fn save_snapshot(player: &PlayerHandle, target: &std::path::Path, source: &str) {
    let format = ExportFormat::from_path(target).unwrap_or_default();
    let snapshot = match player.capture_frame_as(format).await {
        Ok(snapshot) => snapshot,
        Err(e) => {
            log::warn!("Snapshot failed: {e}");
            return;
        }
    };
    match snapshot.save_to(target, source) {
        Ok(path) => println!(
            "snapshot {}x{} saved to {}",
            snapshot.width,
            snapshot.height,
            path.display()
        ),
        Err(e) => log::warn!("Could not write snapshot: {e}"),
    }
}

fn describe(event: &PlayerEvent) -> String {
    match event {
        PlayerEvent::LoadStart { index } => format!("item {index}"),
        PlayerEvent::ReadyToPlay { duration } => format!("duration {duration:.2}s"),
        PlayerEvent::Error { code, message } => format!("{code}: {message}"),
        PlayerEvent::Progress {
            current_time,
            duration,
        } => format!("{current_time:.2}/{duration:.2}s"),
        _ => String::new(),
    }
}
