//! Loom Player - command-line front end for the loom media pipeline
//!
//! ## Commands
//!
//! - `loom-player waveform <file>`: compute the amplitude envelope offline
//! - `loom-player play <file> [--seconds N]`: play through the scheduler
//! - `loom-player devices`: list audio output devices
//!
//! Settings are read from `~/.config/loom/pipeline.yaml` when present.

use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};

use loom_core::audio::{get_available_output_devices, start_playback};
use loom_core::config::{default_config_path, load_config, PipelineConfig};
use loom_core::decode::AudioDecoder;
use loom_core::engine::{AudioBus, DecoderExport, GraphPass, Scheduler};
use loom_core::media::{AudioBackend, SymphoniaBackend};
use loom_core::waveform::{compute_waveform, CompositionInfo};
use loom_core::BusId;

/// Composition framerate used for the single-file graph
const FRAMERATE: f64 = 25.0;

const MAIN_BUS: BusId = BusId(0);

/// Width of the printed envelope in characters
const ENVELOPE_COLUMNS: usize = 64;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let config: PipelineConfig = load_config(&default_config_path());

    match args.first().map(String::as_str) {
        Some("waveform") => {
            let file = args.get(1).context("usage: loom-player waveform <file>")?;
            waveform(&config, Path::new(file))
        }
        Some("play") => {
            let file = args
                .get(1)
                .context("usage: loom-player play <file> [--seconds N]")?;
            let seconds = parse_seconds(&args[2..])?;
            play(&config, Path::new(file), seconds)
        }
        Some("devices") => {
            devices();
            Ok(())
        }
        _ => bail!("usage: loom-player <waveform|play|devices> [args]"),
    }
}

fn parse_seconds(rest: &[String]) -> Result<Option<f64>> {
    match rest {
        [] => Ok(None),
        [flag, value] if flag == "--seconds" => {
            let seconds: f64 = value
                .parse()
                .with_context(|| format!("invalid --seconds value: {}", value))?;
            Ok(Some(seconds.max(0.0)))
        }
        _ => bail!("unexpected arguments: {:?}", rest),
    }
}

/// One decoder node exporting straight into the main bus
fn single_file_graph(config: &PipelineConfig, file: &Path) -> Result<(CompositionInfo, f64)> {
    let backend = Arc::new(SymphoniaBackend);
    let duration = backend
        .open_audio(file)
        .with_context(|| format!("Failed to open {:?}", file))?
        .info()
        .duration_seconds()
        .context("Stream does not report a duration")?;

    let decoder = Arc::new(AudioDecoder::new(config.spec(), backend));
    decoder.set_asset(Some(PathBuf::from(file)), Vec::new());
    let node = Arc::new(DecoderExport::new(decoder, MAIN_BUS));

    let info = CompositionInfo {
        enabled: true,
        audio_mixing: true,
        begin_frame: 0,
        end_frame: (duration * FRAMERATE).ceil() as i64,
        framerate: FRAMERATE,
        graph: node,
        buses: vec![AudioBus::main(MAIN_BUS, "Main")],
    };
    Ok((info, duration))
}

fn waveform(config: &PipelineConfig, file: &Path) -> Result<()> {
    let (info, duration) = single_file_graph(config, file)?;
    let stop = AtomicBool::new(false);
    let buckets = compute_waveform(
        &info,
        &config.spec(),
        &config.waveform,
        config.audio.arena_bytes,
        &stop,
    )
    .context("Waveform computation was interrupted")?;

    if buckets.is_empty() {
        println!("{:?}: no audio", file);
        return Ok(());
    }
    let peak = buckets.iter().copied().fold(0.0f32, f32::max);
    let mean = buckets.iter().sum::<f32>() / buckets.len() as f32;
    println!("{:?}", file);
    println!("  duration: {:.2}s", duration);
    println!(
        "  buckets:  {} x {} frames",
        buckets.len(),
        config.waveform.bucket_width
    );
    println!("  peak:     {:.3}", peak);
    println!("  mean:     {:.3}", mean);
    println!("  {}", envelope(&buckets));
    Ok(())
}

/// Bucket maxima squeezed into a fixed number of block characters
fn envelope(buckets: &[f32]) -> String {
    const LEVELS: [char; 8] = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];
    let per_column = buckets.len().div_ceil(ENVELOPE_COLUMNS).max(1);
    buckets
        .chunks(per_column)
        .map(|chunk| {
            let level = chunk.iter().copied().fold(0.0f32, f32::max);
            LEVELS[((level * 7.0).round() as usize).min(7)]
        })
        .collect()
}

fn play(config: &PipelineConfig, file: &Path, seconds: Option<f64>) -> Result<()> {
    let (info, duration) = single_file_graph(config, file)?;
    let spec = config.spec();
    let runner = Arc::new(GraphPass::new(
        info.graph,
        info.buses,
        spec,
        config.audio.arena_bytes,
        FRAMERATE,
    ));
    let scheduler = Scheduler::with_session(runner, spec, config.audio.high_quality_stretch)?;

    let playback = start_playback(&config.audio, scheduler);
    if !playback.is_active() {
        bail!("No audio output available");
    }

    let seconds = seconds.unwrap_or(duration);
    log::info!(
        "Playing {:?} for {:.1}s on {} (~{:.1}ms latency)",
        file,
        seconds,
        playback.device_name().unwrap_or("unknown device"),
        playback.latency_ms()
    );
    std::thread::sleep(Duration::from_secs_f64(seconds));
    Ok(())
}

fn devices() {
    let devices = get_available_output_devices();
    if devices.is_empty() {
        println!("No audio output devices found");
    }
    for device in devices {
        println!("{}", device);
    }
}
