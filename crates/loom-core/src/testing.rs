//! Fixtures shared by unit tests across modules

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::media::{
    AudioBackend, AudioStream, AudioStreamInfo, DecodedAudio, MediaError, MediaResult, TimeBase,
};
use crate::types::Artwork;

/// Write a 16-bit WAV whose every sample is `value`
pub(crate) fn write_wav(
    dir: &Path,
    name: &str,
    sample_rate: u32,
    channels: u16,
    frames: usize,
    value: i16,
) -> PathBuf {
    let path = dir.join(name);
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(&path, spec).unwrap();
    for _ in 0..frames * channels as usize {
        writer.write_sample(value).unwrap();
    }
    writer.finalize().unwrap();
    path
}

/// Call counters of a [`FakeAudioBackend`] and its streams
#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub opens: AtomicUsize,
    pub seeks: AtomicUsize,
    pub decodes: AtomicUsize,
}

impl Counters {
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn seeks(&self) -> usize {
        self.seeks.load(Ordering::SeqCst)
    }

    pub fn decodes(&self) -> usize {
        self.decodes.load(Ordering::SeqCst)
    }
}

/// Constant-valued in-memory audio assets; any path but `/missing` opens
#[derive(Clone)]
pub(crate) struct FakeAudioBackend {
    pub sample_rate: u32,
    pub channels: u16,
    /// Channel count reported by the stream info, when it differs from the packets
    pub declared_channels: Option<u16>,
    pub frames: u64,
    pub block: usize,
    pub value: f32,
    /// Every other decode call reports "try again" first
    pub flaky: bool,
    pub artwork: Vec<Artwork>,
    pub counters: Arc<Counters>,
}

impl FakeAudioBackend {
    pub fn new(sample_rate: u32, channels: u16, frames: u64, value: f32) -> Self {
        Self {
            sample_rate,
            channels,
            declared_channels: None,
            frames,
            block: 1000,
            value,
            flaky: false,
            artwork: Vec::new(),
            counters: Arc::new(Counters::default()),
        }
    }
}

impl AudioBackend for FakeAudioBackend {
    fn open_audio(&self, path: &Path) -> MediaResult<Box<dyn AudioStream>> {
        if path == Path::new("/missing") {
            return Err(MediaError::Open {
                path: path.to_path_buf(),
                reason: "not found".to_string(),
            });
        }
        self.counters.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeAudioStream {
            info: AudioStreamInfo {
                sample_rate: self.sample_rate,
                channels: self.declared_channels.unwrap_or(self.channels),
                time_base: TimeBase::new(1, self.sample_rate),
                duration: Some(self.frames),
            },
            backend: self.clone(),
            position: 0,
            stalled: false,
        }))
    }
}

struct FakeAudioStream {
    info: AudioStreamInfo,
    backend: FakeAudioBackend,
    position: u64,
    stalled: bool,
}

impl AudioStream for FakeAudioStream {
    fn info(&self) -> &AudioStreamInfo {
        &self.info
    }

    fn decode_next(&mut self) -> MediaResult<Option<DecodedAudio>> {
        if self.backend.flaky {
            self.stalled = !self.stalled;
            if self.stalled {
                return Err(MediaError::TryAgain);
            }
        }
        if self.position >= self.backend.frames {
            return Ok(None);
        }
        self.backend.counters.decodes.fetch_add(1, Ordering::SeqCst);
        let frames = (self.backend.frames - self.position).min(self.backend.block as u64);
        self.position += frames;
        Ok(Some(DecodedAudio {
            channels: self.backend.channels,
            samples: vec![self.backend.value; frames as usize * self.backend.channels as usize],
        }))
    }

    fn seek(&mut self, ticks: u64) -> MediaResult<()> {
        self.backend.counters.seeks.fetch_add(1, Ordering::SeqCst);
        self.position = ticks.min(self.backend.frames);
        Ok(())
    }

    fn flush(&mut self) {}

    fn artwork(&self) -> Vec<Artwork> {
        self.backend.artwork.clone()
    }
}
