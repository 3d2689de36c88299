//! Video decode/seek pipeline
//!
//! Each context indexes the stream's keyframes once when it opens, then
//! serves frame requests by decoding forward from the current position.
//! A demuxer seek is only issued when going backwards, or when jumping
//! more than one frame into a different keyframe's group of pictures.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use super::keyframes::KeyframeIndex;
use super::rescale::{PixelBuffer, PixelPrecision, Rescaler};
use super::{DecodeProgress, SeekTarget};
use crate::media::{retry_transient, Picture, VideoBackend, VideoStream, VideoStreamInfo};
use crate::pool::{ContextPool, EvaluationInstant, Namespace};

/// What a graph pass asks of a video decoder node
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameRequest {
    pub instant: EvaluationInstant,
    pub namespace: Namespace,
    /// Frame number (at the stream's framerate) to present
    pub target_frame: i64,
    /// Decoding only happens on rendering passes; other passes read the cache
    pub rendering_pass: bool,
}

/// Decode state of one (node, evaluation instant) pair
#[derive(Default)]
pub struct VideoContext {
    path: Option<PathBuf>,
    stream: Option<Box<dyn VideoStream>>,
    keyframes: KeyframeIndex,
    rescaler: Option<Rescaler>,
    last_loaded_frame: Option<i64>,
    needs_seeking: bool,
    seek_epoch: u64,
    seeks: u64,
    frame: Option<Arc<PixelBuffer>>,
}

impl VideoContext {
    pub fn keyframes(&self) -> &KeyframeIndex {
        &self.keyframes
    }

    pub fn last_loaded_frame(&self) -> Option<i64> {
        self.last_loaded_frame
    }

    pub fn seek_count(&self) -> u64 {
        self.seeks
    }

    fn info(&self) -> Option<&VideoStreamInfo> {
        self.stream.as_ref().map(|s| s.info())
    }

    fn ensure_open(&mut self, backend: &dyn VideoBackend, path: &Path) -> bool {
        if self.path.as_deref() == Some(path) {
            return self.stream.is_some();
        }

        self.stream = None;
        self.rescaler = None;
        self.frame = None;
        self.last_loaded_frame = None;
        self.keyframes = KeyframeIndex::default();
        self.path = Some(path.to_path_buf());

        let mut stream = match backend.open_video(path) {
            Ok(stream) => stream,
            Err(e) => {
                log::warn!("Video decoder: cannot open {:?}: {}", path, e);
                return false;
            }
        };

        self.keyframes = match KeyframeIndex::scan(stream.as_mut()) {
            Ok(index) => index,
            Err(e) => {
                log::warn!("Video decoder: keyframe scan of {:?} failed: {}", path, e);
                return false;
            }
        };

        log::debug!(
            "Video decoder: opened {:?} ({} keyframes)",
            path,
            self.keyframes.len()
        );
        self.stream = Some(stream);
        true
    }

    /// Seek decision for moving from the last loaded frame to `target`
    fn should_seek(&self, target: i64) -> bool {
        let Some(last) = self.last_loaded_frame else {
            return target > 0;
        };
        let difference = target - last;
        difference < 0 || (difference > 1 && self.keyframes.crosses_keyframe(last, target))
    }

    fn seek_to(&mut self, target: i64) {
        let Some(stream) = self.stream.as_mut() else {
            return;
        };
        let framerate = stream.info().framerate;
        let seconds = if framerate > 0.0 {
            target as f64 / framerate
        } else {
            0.0
        };
        stream.flush();
        if let Err(e) = stream.seek(seconds) {
            log::warn!("Video decoder: seek to frame {} failed: {}", target, e);
        }
        self.last_loaded_frame = None;
        self.needs_seeking = false;
        self.seeks += 1;
        log::debug!("Video decoder: seeked to frame {}", target);
    }

    /// Decode forward until the presented frame reaches `target`
    fn decode_to(&mut self, target: i64, progress: &DecodeProgress) -> Option<Picture> {
        let stream = self.stream.as_mut()?;
        let info = stream.info().clone();
        let to_frame = |pts: i64| (info.time_base.ticks_to_seconds(pts) * info.framerate).round() as i64;

        let mut start: Option<i64> = None;
        let mut latest: Option<Picture> = None;
        progress.set(0.0);

        loop {
            match retry_transient(|| stream.decode_next()) {
                Ok(Some(picture)) => {
                    let frame = to_frame(picture.pts);
                    let first = *start.get_or_insert(frame);
                    let total = (target - first).max(1) as f32;
                    progress.set((frame - first) as f32 / total);
                    latest = Some(picture);
                    if frame >= target {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    log::warn!("Video decoder: decode failed: {}", e);
                    break;
                }
            }
        }

        progress.set(1.0);
        latest
    }
}

struct VideoState {
    asset: Option<PathBuf>,
    precision: PixelPrecision,
    pool: ContextPool<EvaluationInstant, VideoContext>,
}

/// Video decoder node: turns an asset into one pixel buffer per frame
pub struct VideoDecoder {
    backend: Arc<dyn VideoBackend>,
    state: Mutex<VideoState>,
    seek: SeekTarget,
    progress: DecodeProgress,
}

impl VideoDecoder {
    pub fn new(backend: Arc<dyn VideoBackend>, precision: PixelPrecision) -> Self {
        Self {
            backend,
            state: Mutex::new(VideoState {
                asset: None,
                precision,
                pool: ContextPool::new(),
            }),
            seek: SeekTarget::new(),
            progress: DecodeProgress::new(),
        }
    }

    /// Bind an asset; `None` unbinds and destroys every context
    pub fn set_asset(&self, path: Option<PathBuf>) {
        let mut state = self.state.lock();
        if path.is_none() {
            state.pool.clear();
        }
        state.asset = path;
    }

    pub fn set_precision(&self, precision: PixelPrecision) {
        self.state.lock().precision = precision;
    }

    pub fn precision(&self) -> PixelPrecision {
        self.state.lock().precision
    }

    /// Request every context to reseek at its next decode call
    ///
    /// Passes address video by frame, so the reseek lands on the frame that
    /// call asks for; `seconds` only moves the shared target.
    pub fn seek(&self, seconds: f64) {
        self.seek.request(seconds);
    }

    /// Fraction of the current forward decode already done, lock-free
    pub fn decoding_progress(&self) -> f32 {
        self.progress.get()
    }

    /// Present `request.target_frame`, decoding only on rendering passes
    pub fn decode_frame(&self, request: &FrameRequest) -> Option<Arc<PixelBuffer>> {
        let mut guard = self.state.lock();
        let VideoState {
            asset,
            precision,
            pool,
        } = &mut *guard;

        if !request.rendering_pass {
            return pool
                .get_existing(&request.instant, request.namespace)
                .and_then(|ctx| ctx.frame.clone());
        }

        let asset = asset.as_deref()?;
        let epoch = self.seek.epoch();
        let ctx = pool.get_or_insert_with(request.instant, request.namespace, || VideoContext {
            seek_epoch: epoch,
            ..Default::default()
        });

        if !ctx.ensure_open(self.backend.as_ref(), asset) {
            return None;
        }

        if ctx.seek_epoch != epoch {
            ctx.seek_epoch = epoch;
            ctx.needs_seeking = true;
        }

        if ctx.rescaler.as_ref().map(|r| r.precision()) != Some(*precision) {
            let info = ctx.info()?;
            ctx.rescaler = Some(Rescaler::new(info.width, info.height, info.pixel_format, *precision));
            // Cached pixels are in the old precision: decode the frame again
            if ctx.frame.take().is_some() {
                ctx.needs_seeking = true;
            }
        }

        let target = request.target_frame.max(0);
        if !ctx.needs_seeking && ctx.last_loaded_frame == Some(target) && ctx.frame.is_some() {
            return ctx.frame.clone();
        }

        if ctx.needs_seeking || ctx.should_seek(target) {
            ctx.seek_to(target);
        }

        let picture = ctx.decode_to(target, &self.progress)?;
        let rescaler = ctx.rescaler.clone()?;
        if !rescaler.accepts(&picture) {
            // Stream changed shape mid-way
            let rebuilt = Rescaler::new(picture.width, picture.height, picture.format, *precision);
            ctx.rescaler = Some(rebuilt);
        }
        let rescaler = ctx.rescaler.as_ref()?;

        let buffer = ctx
            .frame
            .get_or_insert_with(|| Arc::new(PixelBuffer::new(0, 0, *precision)));
        if let Err(e) = rescaler.convert(&picture, Arc::make_mut(buffer)) {
            log::warn!("Video decoder: conversion failed: {}", e);
            return None;
        }

        ctx.last_loaded_frame = Some(target);
        ctx.frame.clone()
    }

    /// Asset duration in frames at `framerate`
    pub fn content_duration(&self, framerate: f64) -> Option<f64> {
        self.with_live_info(|info| {
            let ticks = info.duration?;
            Some(info.time_base.ticks_to_seconds(ticks as i64) * framerate)
        })
    }

    pub fn content_resolution(&self) -> Option<(u32, u32)> {
        self.with_live_info(|info| Some((info.width, info.height)))
    }

    pub fn content_framerate(&self) -> Option<f64> {
        self.with_live_info(|info| Some(info.framerate))
    }

    pub fn context_count(&self, namespace: Namespace) -> usize {
        self.state.lock().pool.len(namespace)
    }

    /// Inspect one context without aging the pool
    pub fn with_context<R>(
        &self,
        instant: EvaluationInstant,
        namespace: Namespace,
        f: impl FnOnce(&VideoContext) -> R,
    ) -> Option<R> {
        let mut state = self.state.lock();
        state.pool.get_existing(&instant, namespace).map(|ctx| f(ctx))
    }

    fn with_live_info<R>(&self, f: impl FnOnce(&VideoStreamInfo) -> Option<R>) -> Option<R> {
        let mut state = self.state.lock();
        let ctx = state
            .pool
            .get_existing(&EvaluationInstant::LIVE, Namespace::Realtime)?;
        f(ctx.info()?)
    }
}
