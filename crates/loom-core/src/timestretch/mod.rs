//! Time-stretching via signalsmith-stretch
//!
//! The scheduler buys time under overload by playing already-rendered audio
//! slower. It talks to the stretch engine through [`TimeStretch`]: push
//! rendered periods in, pop device-sized periods out, and change the time
//! ratio between calls.
//!
//! [`TimeStretchSession`] queues pushed input and renders output lazily, in
//! small blocks, at whatever ratio is current when the output is popped.

use std::collections::VecDeque;

use signalsmith_stretch::Stretch;

use crate::types::Sample;

/// Input frames rendered per signalsmith call
const BLOCK_FRAMES: usize = 256;

/// Largest accepted time ratio
pub const MAX_TIME_RATIO: f64 = 16.0;

/// Smallest accepted time ratio
pub const MIN_TIME_RATIO: f64 = 0.25;

/// Time-stretch/pitch-shift engine as seen by the scheduler
///
/// All buffers are interleaved. A time ratio of 2.0 turns one second of
/// input into two seconds of output.
pub trait TimeStretch: Send {
    /// Queue interleaved input
    fn push(&mut self, input: &[Sample]);

    /// Output frames that can be popped at the current ratio
    fn available(&self) -> usize;

    /// Pop up to `out.len()` interleaved samples, returning frames written
    fn pop(&mut self, out: &mut [Sample]) -> usize;

    fn set_time_ratio(&mut self, ratio: f64);
    fn time_ratio(&self) -> f64;

    fn set_pitch_ratio(&mut self, ratio: f64);
    fn pitch_ratio(&self) -> f64;

    /// Drop all queued input and output and the engine's internal state
    fn reset(&mut self);
}

/// signalsmith-stretch session with lazy, ratio-following output
pub struct TimeStretchSession {
    stretcher: Stretch,
    sample_rate: u32,
    channels: usize,
    high_quality: bool,
    /// Quality requested for the next `validate`
    pending_high_quality: bool,
    time_ratio: f64,
    pitch_ratio: f64,
    input: VecDeque<Sample>,
    output: VecDeque<Sample>,
    /// Fractional output frame carried between blocks
    carry: f64,
    scratch_in: Vec<Sample>,
    scratch_out: Vec<Sample>,
}

fn build_stretcher(channels: usize, sample_rate: u32, high_quality: bool) -> Stretch {
    if high_quality {
        Stretch::preset_default(channels as u32, sample_rate)
    } else {
        Stretch::preset_cheaper(channels as u32, sample_rate)
    }
}

impl TimeStretchSession {
    pub fn new(sample_rate: u32, channels: u16, high_quality: bool) -> Self {
        let channels = channels.max(1) as usize;
        Self {
            stretcher: build_stretcher(channels, sample_rate, high_quality),
            sample_rate,
            channels,
            high_quality,
            pending_high_quality: high_quality,
            time_ratio: 1.0,
            pitch_ratio: 1.0,
            input: VecDeque::new(),
            output: VecDeque::new(),
            carry: 0.0,
            scratch_in: Vec::with_capacity(BLOCK_FRAMES * channels),
            scratch_out: Vec::with_capacity((BLOCK_FRAMES as f64 * MAX_TIME_RATIO) as usize * channels + channels),
        }
    }

    /// Select the preset used after the next [`validate`](Self::validate)
    pub fn set_high_quality(&mut self, high_quality: bool) {
        self.pending_high_quality = high_quality;
    }

    pub fn is_high_quality(&self) -> bool {
        self.high_quality
    }

    /// Rebuild the engine if the format or quality changed; returns whether
    /// it was rebuilt
    pub fn validate(&mut self, sample_rate: u32, channels: u16) -> bool {
        let channels = channels.max(1) as usize;
        if sample_rate == self.sample_rate
            && channels == self.channels
            && self.pending_high_quality == self.high_quality
        {
            return false;
        }

        log::debug!(
            "Rebuilding stretcher: {}Hz {}ch ({})",
            sample_rate,
            channels,
            if self.pending_high_quality { "default" } else { "cheaper" }
        );
        self.sample_rate = sample_rate;
        self.channels = channels;
        self.high_quality = self.pending_high_quality;
        self.stretcher = build_stretcher(channels, sample_rate, self.high_quality);
        self.apply_pitch();
        self.input.clear();
        self.output.clear();
        self.carry = 0.0;
        true
    }

    /// Get the input latency in frames
    pub fn input_latency(&self) -> usize {
        self.stretcher.input_latency()
    }

    /// Get the output latency in frames
    pub fn output_latency(&self) -> usize {
        self.stretcher.output_latency()
    }

    fn apply_pitch(&mut self) {
        let semitones = 12.0 * self.pitch_ratio.log2();
        self.stretcher
            .set_transpose_factor_semitones(semitones as f32, None);
    }

    fn input_frames(&self) -> usize {
        self.input.len() / self.channels
    }

    /// Render one block of queued input at the current ratio
    fn render_block(&mut self) {
        let frames = self.input_frames().min(BLOCK_FRAMES);
        if frames == 0 {
            return;
        }

        let exact = frames as f64 * self.time_ratio + self.carry;
        let out_frames = exact.floor() as usize;
        self.carry = exact - out_frames as f64;

        self.scratch_in.clear();
        self.scratch_in.extend(self.input.drain(..frames * self.channels));
        if out_frames == 0 {
            return;
        }

        self.scratch_out.clear();
        self.scratch_out.resize(out_frames * self.channels, 0.0);
        self.stretcher
            .process(&self.scratch_in[..], &mut self.scratch_out[..]);
        self.output.extend(self.scratch_out.iter().copied());
    }
}

impl TimeStretch for TimeStretchSession {
    fn push(&mut self, input: &[Sample]) {
        let whole = input.len() - input.len() % self.channels;
        self.input.extend(&input[..whole]);
    }

    fn available(&self) -> usize {
        let pending = self.input_frames() as f64 * self.time_ratio + self.carry;
        self.output.len() / self.channels + pending.floor() as usize
    }

    fn pop(&mut self, out: &mut [Sample]) -> usize {
        let wanted = out.len() / self.channels;
        while self.output.len() / self.channels < wanted && self.input_frames() > 0 {
            self.render_block();
        }
        let frames = wanted.min(self.output.len() / self.channels);
        let n = frames * self.channels;
        for (dst, src) in out.iter_mut().zip(self.output.drain(..n)) {
            *dst = src;
        }
        frames
    }

    fn set_time_ratio(&mut self, ratio: f64) {
        self.time_ratio = if ratio.is_finite() {
            ratio.clamp(MIN_TIME_RATIO, MAX_TIME_RATIO)
        } else {
            1.0
        };
    }

    fn time_ratio(&self) -> f64 {
        self.time_ratio
    }

    fn set_pitch_ratio(&mut self, ratio: f64) {
        // One octave either way
        self.pitch_ratio = if ratio.is_finite() && ratio > 0.0 {
            ratio.clamp(0.5, 2.0)
        } else {
            1.0
        };
        self.apply_pitch();
    }

    fn pitch_ratio(&self) -> f64 {
        self.pitch_ratio
    }

    fn reset(&mut self) {
        self.stretcher.reset();
        self.input.clear();
        self.output.clear();
        self.carry = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_creation() {
        let session = TimeStretchSession::new(48000, 2, true);
        assert_eq!(session.time_ratio(), 1.0);
        assert_eq!(session.pitch_ratio(), 1.0);
        assert!(session.input_latency() > 0);
        assert!(session.output_latency() > 0);
        assert_eq!(session.available(), 0);
    }

    #[test]
    fn test_stretched_output_length() {
        let mut session = TimeStretchSession::new(48000, 2, false);
        session.set_time_ratio(1.8);
        session.push(&vec![0.0; 4096 * 2]);
        assert_eq!(session.available(), 7372);

        let mut out = vec![1.0; 4096 * 2];
        assert_eq!(session.pop(&mut out), 4096);
        assert_eq!(session.available(), 7372 - 4096);

        let mut rest = vec![0.0; 8192 * 2];
        assert_eq!(session.pop(&mut rest), 7372 - 4096);
        assert_eq!(session.available(), 0);
    }

    #[test]
    fn test_ratio_applies_to_unrendered_input() {
        let mut session = TimeStretchSession::new(48000, 1, false);
        session.push(&vec![0.0; 1024]);
        session.set_time_ratio(2.0);
        assert_eq!(session.available(), 2048);
        session.set_time_ratio(100.0);
        assert_eq!(session.time_ratio(), MAX_TIME_RATIO);
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut session = TimeStretchSession::new(48000, 2, false);
        session.push(&vec![0.0; 2048]);
        session.reset();
        assert_eq!(session.available(), 0);
        let mut out = vec![0.0; 64];
        assert_eq!(session.pop(&mut out), 0);
    }

    #[test]
    fn test_quality_switch_takes_effect_on_validate() {
        let mut session = TimeStretchSession::new(48000, 2, false);
        session.set_high_quality(true);
        assert!(!session.is_high_quality());
        assert!(session.validate(48000, 2));
        assert!(session.is_high_quality());
        assert!(!session.validate(48000, 2));
        assert!(session.validate(44100, 2));
    }

    #[test]
    fn test_pitch_ratio_clamped() {
        let mut session = TimeStretchSession::new(48000, 2, false);
        session.set_pitch_ratio(1.5);
        assert_eq!(session.pitch_ratio(), 1.5);
        session.set_pitch_ratio(8.0);
        assert_eq!(session.pitch_ratio(), 2.0);
        session.set_pitch_ratio(-1.0);
        assert_eq!(session.pitch_ratio(), 1.0);
    }
}
