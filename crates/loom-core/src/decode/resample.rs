//! Resampling FIFO between a decoder and the fixed pipeline format
//!
//! Decoded blocks arrive at the asset's native rate and channel count in
//! arbitrary sizes. The queue remixes them to the pipeline channel count,
//! converts the rate with rubato when the rates differ, and buffers the
//! interleaved result until the decoder pops one whole period.

use std::collections::VecDeque;

use rubato::{FftFixedIn, Resampler};

use crate::media::{MediaError, MediaResult};
use crate::types::Sample;

/// Input chunk size fed to the FFT resampler (frames)
const RESAMPLE_CHUNK: usize = 1024;

/// FFT sub-chunks (rubato quality/latency trade-off)
const RESAMPLE_SUB_CHUNKS: usize = 2;

/// Remix one interleaved block from `in_channels` to `out_channels`, planar
///
/// Mono is duplicated to every output, down-mixes to mono average the
/// inputs, everything else maps channel-for-channel with silent extras.
fn remix_to_planar(
    input: &[Sample],
    in_channels: usize,
    out_channels: usize,
    planes: &mut [Vec<Sample>],
) {
    if in_channels == 0 {
        return;
    }
    for frame in input.chunks_exact(in_channels) {
        for (ch, plane) in planes.iter_mut().enumerate().take(out_channels) {
            let value = if in_channels == 1 {
                frame[0]
            } else if out_channels == 1 {
                frame.iter().sum::<Sample>() / in_channels as Sample
            } else if ch < in_channels {
                frame[ch]
            } else {
                0.0
            };
            plane.push(value);
        }
    }
}

/// FIFO converting decoded audio into pipeline-rate interleaved samples
pub struct ResampleQueue {
    in_rate: u32,
    out_rate: u32,
    in_channels: usize,
    out_channels: usize,
    resampler: Option<FftFixedIn<Sample>>,
    /// Remixed input waiting for a full resampler chunk
    pending: Vec<Vec<Sample>>,
    /// Interleaved output ready to be popped
    output: VecDeque<Sample>,
    /// Leading output frames still to discard (resampler delay)
    skip_frames: usize,
    /// Input frames pushed since the last flush
    frames_in: u64,
    /// Output frames emitted since the last flush
    frames_out: u64,
}

impl ResampleQueue {
    pub fn new(in_rate: u32, in_channels: u16, out_rate: u32, out_channels: u16) -> MediaResult<Self> {
        let out_channels = out_channels.max(1) as usize;
        let resampler = if in_rate != out_rate {
            let resampler = FftFixedIn::<Sample>::new(
                in_rate as usize,
                out_rate as usize,
                RESAMPLE_CHUNK,
                RESAMPLE_SUB_CHUNKS,
                out_channels,
            )
            .map_err(|e| MediaError::Resample(e.to_string()))?;
            Some(resampler)
        } else {
            None
        };

        let skip_frames = resampler.as_ref().map_or(0, |r| r.output_delay());

        Ok(Self {
            in_rate,
            out_rate,
            in_channels: in_channels.max(1) as usize,
            out_channels,
            resampler,
            pending: vec![Vec::new(); out_channels],
            output: VecDeque::new(),
            skip_frames,
            frames_in: 0,
            frames_out: 0,
        })
    }

    /// Whether this queue converts `in_rate`/`in_channels` input
    pub fn matches_input(&self, in_rate: u32, in_channels: u16) -> bool {
        self.in_rate == in_rate && self.in_channels == in_channels.max(1) as usize
    }

    /// Follow a mid-stream channel layout change
    ///
    /// Input is remixed before rate conversion, so the resampler and the
    /// samples already queued stay valid.
    pub fn set_input_channels(&mut self, channels: u16) {
        self.in_channels = channels.max(1) as usize;
    }

    /// Output frames ready to pop
    pub fn available_frames(&self) -> usize {
        self.output.len() / self.out_channels
    }

    /// Push one decoded interleaved block
    pub fn push(&mut self, samples: &[Sample]) -> MediaResult<()> {
        let frames = samples.len() / self.in_channels;
        self.frames_in += frames as u64;

        if self.resampler.is_none() {
            if self.in_channels == self.out_channels {
                self.output.extend(&samples[..frames * self.in_channels]);
            } else {
                remix_to_planar(samples, self.in_channels, self.out_channels, &mut self.pending);
                self.interleave_pending();
            }
            self.frames_out += frames as u64;
            return Ok(());
        }

        remix_to_planar(samples, self.in_channels, self.out_channels, &mut self.pending);
        self.process_full_chunks()
    }

    /// Push the tail of the stream through the resampler at end of input
    pub fn finish(&mut self) -> MediaResult<()> {
        let Some(resampler) = self.resampler.as_mut() else {
            return Ok(());
        };

        let expected = (self.frames_in as f64 * self.out_rate as f64 / self.in_rate as f64).round() as u64;
        let mut rounds = 0;
        while self.frames_out < expected && rounds < 8 {
            let input = std::mem::replace(&mut self.pending, vec![Vec::new(); self.out_channels]);
            let produced = resampler
                .process_partial(Some(input.as_slice()), None)
                .map_err(|e| MediaError::Resample(e.to_string()))?;
            Self::append_output(
                &produced,
                &mut self.output,
                &mut self.skip_frames,
                &mut self.frames_out,
                Some(expected),
            );
            rounds += 1;
        }
        Ok(())
    }

    /// Pop exactly `out.len()` samples if that many are buffered
    pub fn pop_into(&mut self, out: &mut [Sample]) -> bool {
        if self.output.len() < out.len() {
            return false;
        }
        let len = out.len();
        for (dst, src) in out.iter_mut().zip(self.output.drain(..len)) {
            *dst = src;
        }
        true
    }

    /// Pop whatever is buffered (up to `out.len()`), returning samples written
    pub fn drain_into(&mut self, out: &mut [Sample]) -> usize {
        let n = out.len().min(self.output.len());
        for (dst, src) in out.iter_mut().zip(self.output.drain(..n)) {
            *dst = src;
        }
        n
    }

    /// Discard pending input, buffered output and the resampler's delay line
    pub fn flush(&mut self) {
        for plane in &mut self.pending {
            plane.clear();
        }
        self.output.clear();
        self.frames_in = 0;
        self.frames_out = 0;
        if let Some(resampler) = self.resampler.as_mut() {
            resampler.reset();
            self.skip_frames = resampler.output_delay();
        }
    }

    fn interleave_pending(&mut self) {
        let frames = self.pending.first().map_or(0, Vec::len);
        for i in 0..frames {
            for plane in &self.pending {
                self.output.push_back(plane[i]);
            }
        }
        for plane in &mut self.pending {
            plane.clear();
        }
    }

    fn process_full_chunks(&mut self) -> MediaResult<()> {
        let Some(resampler) = self.resampler.as_mut() else {
            return Ok(());
        };

        loop {
            let needed = resampler.input_frames_next();
            if self.pending.first().map_or(0, Vec::len) < needed {
                return Ok(());
            }
            let chunk: Vec<Vec<Sample>> = self
                .pending
                .iter_mut()
                .map(|plane| plane.drain(..needed).collect())
                .collect();
            let produced = resampler
                .process(&chunk, None)
                .map_err(|e| MediaError::Resample(e.to_string()))?;
            Self::append_output(
                &produced,
                &mut self.output,
                &mut self.skip_frames,
                &mut self.frames_out,
                None,
            );
        }
    }

    fn append_output(
        planes: &[Vec<Sample>],
        output: &mut VecDeque<Sample>,
        skip_frames: &mut usize,
        frames_out: &mut u64,
        limit: Option<u64>,
    ) {
        let frames = planes.first().map_or(0, Vec::len);
        let start = (*skip_frames).min(frames);
        *skip_frames -= start;

        for i in start..frames {
            if limit.is_some_and(|limit| *frames_out >= limit) {
                break;
            }
            for plane in planes {
                output.push_back(plane[i]);
            }
            *frames_out += 1;
        }
    }
}
