//! cpal output stream driven by the scheduler
//!
//! ```text
//! ┌──────────────────┐   push()    ┌─────────────────────┐
//! │   Control side   │────────────►│   Command Queue     │
//! │  (Playback)      │             │  (lock-free SPSC)   │
//! └──────────────────┘             └──────────┬──────────┘
//!                                             │ pop()
//!                                             ▼
//!                                  ┌─────────────────────┐
//!                                  │  cpal audio thread  │
//!                                  │  (owns Scheduler)   │
//!                                  └─────────────────────┘
//! ```
//!
//! The scheduler always produces whole periods. Device buffers of any other
//! size are served from a carry buffer holding the rest of the last period.

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{BufferSize, SampleFormat, Stream, StreamConfig};

use super::config::AudioSettings;
use super::device::{find_device_by_id, get_cpal_default_device};
use super::error::{AudioError, AudioResult};
use crate::engine::Scheduler;
use crate::types::{AudioSpec, Sample};

/// Capacity of the playback command queue
pub const COMMAND_QUEUE_CAPACITY: usize = 64;

/// Commands sent to the audio thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackCommand {
    /// Drop buffered and outstanding audio (transport jump)
    Reset,
    /// Output silence without running passes
    Pause,
    Resume,
}

/// Create a playback command channel (producer/consumer pair)
pub fn command_channel() -> (
    rtrb::Producer<PlaybackCommand>,
    rtrb::Consumer<PlaybackCommand>,
) {
    rtrb::RingBuffer::new(COMMAND_QUEUE_CAPACITY)
}

/// Handle to a running (or failed) output stream
///
/// Drop it to stop audio. A failed start leaves an inactive handle so the
/// offline paths of the application keep working.
pub struct Playback {
    stream: Option<Stream>,
    commands: Option<rtrb::Producer<PlaybackCommand>>,
    device_name: Option<String>,
    sample_rate: u32,
    buffer_size: u32,
}

impl Playback {
    fn inactive(spec: &AudioSpec) -> Self {
        Self {
            stream: None,
            commands: None,
            device_name: None,
            sample_rate: spec.sample_rate,
            buffer_size: spec.period as u32,
        }
    }

    pub fn is_active(&self) -> bool {
        self.stream.is_some()
    }

    pub fn device_name(&self) -> Option<&str> {
        self.device_name.as_deref()
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Buffer size in frames
    pub fn buffer_size(&self) -> u32 {
        self.buffer_size
    }

    /// One-way output latency in milliseconds
    pub fn latency_ms(&self) -> f32 {
        (self.buffer_size as f32 / self.sample_rate as f32) * 1000.0
    }

    /// Queue a command for the audio thread; false if inactive or full
    pub fn send(&mut self, command: PlaybackCommand) -> bool {
        match self.commands.as_mut() {
            Some(tx) => tx.push(command).is_ok(),
            None => false,
        }
    }
}

/// Start playback of `scheduler` on the configured device
///
/// Never fails: device or stream errors are logged and yield an inactive
/// [`Playback`].
pub fn start_playback(settings: &AudioSettings, scheduler: Scheduler) -> Playback {
    let spec = *scheduler.spec();
    match try_start(settings, scheduler) {
        Ok(playback) => playback,
        Err(e) => {
            log::error!("Audio playback unavailable: {}", e);
            Playback::inactive(&spec)
        }
    }
}

fn try_start(settings: &AudioSettings, scheduler: Scheduler) -> AudioResult<Playback> {
    let spec = *scheduler.spec();
    let device = match &settings.device {
        Some(id) => find_device_by_id(id)?,
        None => get_cpal_default_device()?,
    };
    let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());
    log::info!("Using audio device: {}", device_name);

    let supported = select_output_config(&device, &spec)?;
    let stream_config = StreamConfig {
        channels: supported.channels(),
        sample_rate: supported.sample_rate(),
        buffer_size: BufferSize::Fixed(spec.period as u32),
    };
    log::info!(
        "Audio config: {} device channels ({} pipeline), {}Hz, {} frames (~{:.1}ms latency)",
        stream_config.channels,
        spec.channels,
        spec.sample_rate,
        spec.period,
        settings.latency_ms()
    );

    let (command_tx, command_rx) = command_channel();
    let mut state = OutputState::new(scheduler, command_rx);
    let device_channels = stream_config.channels as usize;

    let stream = device
        .build_output_stream(
            &stream_config,
            move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                state.fill(data, device_channels);
            },
            move |err| {
                log::error!("Audio stream error: {}", err);
            },
            None,
        )
        .map_err(|e| AudioError::StreamBuildError(e.to_string()))?;
    stream
        .play()
        .map_err(|e| AudioError::StreamPlayError(e.to_string()))?;

    log::info!("Audio stream started");
    Ok(Playback {
        stream: Some(stream),
        commands: Some(command_tx),
        device_name: Some(device_name),
        sample_rate: spec.sample_rate,
        buffer_size: spec.period as u32,
    })
}

/// Pick an f32 config running at the pipeline rate, preferring enough channels
fn select_output_config(
    device: &cpal::Device,
    spec: &AudioSpec,
) -> AudioResult<cpal::SupportedStreamConfig> {
    let configs: Vec<_> = device
        .supported_output_configs()
        .map_err(|e| AudioError::ConfigError(e.to_string()))?
        .filter(|c| c.sample_format() == SampleFormat::F32)
        .filter(|c| {
            spec.sample_rate >= c.min_sample_rate().0 && spec.sample_rate <= c.max_sample_rate().0
        })
        .collect();

    let best = configs
        .iter()
        .find(|c| c.channels() >= spec.channels)
        .or_else(|| configs.iter().max_by_key(|c| c.channels()))
        .ok_or_else(|| {
            AudioError::UnsupportedFormat(format!(
                "no f32 output config at {}Hz",
                spec.sample_rate
            ))
        })?;

    Ok(best.clone().with_sample_rate(cpal::SampleRate(spec.sample_rate)))
}

/// State owned exclusively by the audio callback
struct OutputState {
    scheduler: Scheduler,
    commands: rtrb::Consumer<PlaybackCommand>,
    /// Last period produced by the scheduler
    carry: Vec<Sample>,
    /// Read position inside `carry`
    read_pos: usize,
    channels: usize,
    paused: bool,
}

impl OutputState {
    fn new(scheduler: Scheduler, commands: rtrb::Consumer<PlaybackCommand>) -> Self {
        let spec = *scheduler.spec();
        let len = spec.period_samples();
        Self {
            scheduler,
            commands,
            carry: vec![0.0; len],
            read_pos: len,
            channels: spec.channels as usize,
            paused: false,
        }
    }

    fn process_commands(&mut self) {
        while let Ok(command) = self.commands.pop() {
            match command {
                PlaybackCommand::Reset => {
                    self.scheduler.reset();
                    self.read_pos = self.carry.len();
                }
                PlaybackCommand::Pause => self.paused = true,
                PlaybackCommand::Resume => self.paused = false,
            }
        }
    }

    /// Fill an interleaved device buffer with `device_channels` per frame
    ///
    /// The first `min(device, pipeline)` channels are copied, the rest zeroed.
    fn fill(&mut self, data: &mut [f32], device_channels: usize) {
        self.process_commands();
        if self.paused || device_channels == 0 {
            data.fill(0.0);
            return;
        }

        let shared = device_channels.min(self.channels);
        for frame in data.chunks_mut(device_channels) {
            if self.read_pos >= self.carry.len() {
                self.scheduler.process(&mut self.carry);
                self.read_pos = 0;
            }
            let src = &self.carry[self.read_pos..self.read_pos + self.channels];
            frame[..shared].copy_from_slice(&src[..shared]);
            frame[shared..].fill(0.0);
            self.read_pos += self.channels;
        }
    }
}
