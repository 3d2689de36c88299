//! Audio decode/resample pipeline
//!
//! One [`AudioDecoder`] per decoder node. Every evaluation instant gets its
//! own [`AudioContext`] (demuxer, decoder, resampler, single-slot cache),
//! so live playback, scrub previews and waveform passes never share stream
//! positions.
//!
//! Per pass:
//!
//! ```text
//! same pass id as last time ─► cached frame
//! pass id != last + 1       ─► needs seek
//! shared seek epoch moved   ─► needs seek (last-writer-wins target)
//! open if asset changed, seek if needed, then
//! decode packets until the resampler holds one period, pop it
//! ```

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::resample::ResampleQueue;
use super::SeekTarget;
use crate::engine::gc::{share_frame, SharedFrame};
use crate::media::{retry_transient, AudioBackend, AudioStream};
use crate::pool::{ContextPool, EvaluationInstant, Namespace};
use crate::types::{Artwork, AudioFrame, AudioSpec};

/// What a graph pass asks of an audio decoder node
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecodeRequest {
    pub pass_id: u64,
    pub instant: EvaluationInstant,
    pub namespace: Namespace,
    /// Composition time of this pass in seconds
    pub position: f64,
    /// Project framerate, used to convert the instant offset to seconds
    pub framerate: f64,
}

impl DecodeRequest {
    /// Live playback request at `position`
    pub fn live(pass_id: u64, position: f64, framerate: f64) -> Self {
        Self {
            pass_id,
            instant: EvaluationInstant::LIVE,
            namespace: Namespace::Realtime,
            position,
            framerate,
        }
    }

    /// Absolute stream time to seek to for this request
    fn seek_seconds(&self, position: f64) -> f64 {
        let offset = if self.framerate > 0.0 {
            self.instant.offset_frames() / self.framerate
        } else {
            0.0
        };
        position + offset
    }
}

/// Decode state of one (node, evaluation instant) pair
pub struct AudioContext {
    path: Option<PathBuf>,
    stream: Option<Box<dyn AudioStream>>,
    queue: Option<ResampleQueue>,
    embedded_artwork: Vec<Artwork>,
    last_pass_id: Option<u64>,
    needs_seeking: bool,
    seek_epoch: u64,
    eof: bool,
    seeks: u64,
    frame: Option<SharedFrame>,
}

impl AudioContext {
    fn new(seek_epoch: u64) -> Self {
        Self {
            path: None,
            stream: None,
            queue: None,
            embedded_artwork: Vec::new(),
            last_pass_id: None,
            needs_seeking: false,
            seek_epoch,
            eof: false,
            seeks: 0,
            frame: None,
        }
    }

    pub fn last_pass_id(&self) -> Option<u64> {
        self.last_pass_id
    }

    /// Seeks performed by this context since creation
    pub fn seek_count(&self) -> u64 {
        self.seeks
    }

    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    fn close(&mut self) {
        self.stream = None;
        self.queue = None;
        self.embedded_artwork.clear();
        self.eof = false;
        self.frame = None;
    }

    /// Bind the context to `path`, reopening when the asset changed.
    /// A failed open is remembered until the asset changes again.
    fn ensure_open(&mut self, backend: &dyn AudioBackend, path: &Path, spec: &AudioSpec) -> bool {
        if self.path.as_deref() == Some(path) {
            return self.stream.is_some();
        }

        self.close();
        self.path = Some(path.to_path_buf());

        let stream = match backend.open_audio(path) {
            Ok(stream) => stream,
            Err(e) => {
                log::warn!("Audio decoder: cannot open {:?}: {}", path, e);
                return false;
            }
        };

        let info = stream.info().clone();
        let queue = match ResampleQueue::new(info.sample_rate, info.channels, spec.sample_rate, spec.channels) {
            Ok(queue) => queue,
            Err(e) => {
                log::warn!("Audio decoder: cannot resample {:?}: {}", path, e);
                return false;
            }
        };

        log::debug!(
            "Audio decoder: opened {:?} ({}Hz, {}ch -> {}Hz, {}ch)",
            path,
            info.sample_rate,
            info.channels,
            spec.sample_rate,
            spec.channels
        );

        self.embedded_artwork = stream.artwork();
        self.stream = Some(stream);
        self.queue = Some(queue);
        true
    }

    fn seek_to(&mut self, seconds: f64) {
        if let Some(stream) = self.stream.as_mut() {
            let ticks = stream.info().time_base.seconds_to_ticks(seconds);
            if let Err(e) = stream.seek(ticks) {
                log::warn!("Audio decoder: seek to {:.3}s failed: {}", seconds, e);
            }
            stream.flush();
        }
        if let Some(queue) = self.queue.as_mut() {
            queue.flush();
        }
        self.eof = false;
        self.needs_seeking = false;
        self.seeks += 1;
        log::debug!("Audio decoder: seeked to {:.3}s", seconds);
    }

    /// Decode until one period is buffered (or the stream ends) and pop it
    fn read_period(&mut self, spec: &AudioSpec) -> Option<Vec<f32>> {
        let (Some(stream), Some(queue)) = (self.stream.as_mut(), self.queue.as_mut()) else {
            return None;
        };

        while queue.available_frames() < spec.period && !self.eof {
            match retry_transient(|| stream.decode_next()) {
                Ok(Some(block)) => {
                    if !queue.matches_input(stream.info().sample_rate, block.channels) {
                        log::debug!("Audio decoder: stream switched to {} channels", block.channels);
                        queue.set_input_channels(block.channels);
                    }
                    if let Err(e) = queue.push(&block.samples) {
                        log::warn!("Audio decoder: resampling failed: {}", e);
                        self.eof = true;
                    }
                }
                Ok(None) => self.eof = true,
                Err(e) => {
                    log::warn!("Audio decoder: decode failed: {}", e);
                    self.eof = true;
                }
            }
            if self.eof {
                if let Err(e) = queue.finish() {
                    log::warn!("Audio decoder: resampler drain failed: {}", e);
                }
            }
        }

        let mut samples = vec![0.0; spec.period_samples()];
        if queue.pop_into(&mut samples) {
            return Some(samples);
        }
        // Last partial period, zero-padded
        if self.eof && queue.drain_into(&mut samples) > 0 {
            return Some(samples);
        }
        None
    }
}

struct AudioState {
    asset: Option<PathBuf>,
    artwork: Vec<Artwork>,
    pool: ContextPool<EvaluationInstant, AudioContext>,
}

/// Audio decoder node: turns an asset into one period per pass
pub struct AudioDecoder {
    spec: AudioSpec,
    backend: Arc<dyn AudioBackend>,
    state: Mutex<AudioState>,
    seek: SeekTarget,
    volume: AtomicU32,
}

impl AudioDecoder {
    pub fn new(spec: AudioSpec, backend: Arc<dyn AudioBackend>) -> Self {
        Self {
            spec,
            backend,
            state: Mutex::new(AudioState {
                asset: None,
                artwork: Vec::new(),
                pool: ContextPool::new(),
            }),
            seek: SeekTarget::new(),
            volume: AtomicU32::new(1.0f32.to_bits()),
        }
    }

    pub fn spec(&self) -> &AudioSpec {
        &self.spec
    }

    /// Bind an asset (and its preview artwork); `None` unbinds and destroys
    /// every context
    pub fn set_asset(&self, path: Option<PathBuf>, artwork: Vec<Artwork>) {
        let mut state = self.state.lock();
        if path.is_none() {
            state.pool.clear();
        }
        state.asset = path;
        state.artwork = artwork;
    }

    pub fn asset(&self) -> Option<PathBuf> {
        self.state.lock().asset.clone()
    }

    pub fn set_volume(&self, volume: f32) {
        self.volume.store(volume.max(0.0).to_bits(), Ordering::Relaxed);
    }

    pub fn volume(&self) -> f32 {
        f32::from_bits(self.volume.load(Ordering::Relaxed))
    }

    /// Request every context to reseek to `seconds` at its next decode call
    pub fn seek(&self, seconds: f64) {
        self.seek.request(seconds);
    }

    /// Produce the period for `request`, or `None` when there is nothing to
    /// play (no asset, unreadable media, end of content)
    pub fn decode_samples(&self, request: &DecodeRequest) -> Option<SharedFrame> {
        let mut guard = self.state.lock();
        let AudioState {
            asset,
            artwork,
            pool,
        } = &mut *guard;
        let asset = asset.as_deref()?;

        let epoch = self.seek.epoch();
        let ctx = pool.get_or_insert_with(request.instant, request.namespace, || {
            AudioContext::new(epoch)
        });

        if ctx.last_pass_id == Some(request.pass_id) {
            return ctx.frame.clone();
        }

        let mut position = request.position;
        if let Some(last) = ctx.last_pass_id {
            if last.wrapping_add(1) != request.pass_id {
                ctx.needs_seeking = true;
            }
        }
        if ctx.seek_epoch != epoch {
            ctx.seek_epoch = epoch;
            ctx.needs_seeking = true;
            position = self.seek.seconds();
        }
        ctx.last_pass_id = Some(request.pass_id);

        let fresh = ctx.path.as_deref() != Some(asset);
        if !ctx.ensure_open(self.backend.as_ref(), asset, &self.spec) {
            ctx.frame = None;
            return None;
        }

        let seconds = request.seek_seconds(position);
        if fresh && seconds > 0.0 {
            ctx.needs_seeking = true;
        }
        if ctx.needs_seeking {
            ctx.seek_to(seconds);
        }

        let Some(mut samples) = ctx.read_period(&self.spec) else {
            ctx.frame = None;
            return None;
        };

        let volume = self.volume();
        if volume != 1.0 {
            for s in &mut samples {
                *s *= volume;
            }
        }

        let mut attached = artwork.clone();
        attached.extend(ctx.embedded_artwork.iter().cloned());

        let frame = share_frame(AudioFrame {
            sample_rate: self.spec.sample_rate,
            channels: self.spec.channels,
            samples,
            artwork: attached,
        });
        ctx.frame = Some(frame.clone());
        Some(frame)
    }

    /// Last frame cached for an instant, without decoding or aging the pool
    pub fn cached_frame(&self, instant: EvaluationInstant, namespace: Namespace) -> Option<SharedFrame> {
        let mut state = self.state.lock();
        state
            .pool
            .get_existing(&instant, namespace)
            .and_then(|ctx| ctx.frame.clone())
    }

    /// Asset duration in frames at `framerate`, from the live context
    pub fn content_duration(&self, framerate: f64) -> Option<f64> {
        let mut state = self.state.lock();
        let ctx = state
            .pool
            .get_existing(&EvaluationInstant::LIVE, Namespace::Realtime)?;
        let seconds = ctx.stream.as_ref()?.info().duration_seconds()?;
        Some(seconds * framerate)
    }

    /// Live contexts of a namespace
    pub fn context_count(&self, namespace: Namespace) -> usize {
        self.state.lock().pool.len(namespace)
    }

    /// Inspect one context without aging the pool
    pub fn with_context<R>(
        &self,
        instant: EvaluationInstant,
        namespace: Namespace,
        f: impl FnOnce(&AudioContext) -> R,
    ) -> Option<R> {
        let mut state = self.state.lock();
        state.pool.get_existing(&instant, namespace).map(|ctx| f(ctx))
    }
}
