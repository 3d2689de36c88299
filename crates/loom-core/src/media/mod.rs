//! Demux/decode seam
//!
//! The pipeline never talks to a codec library directly. Decoder nodes open
//! assets through an [`AudioBackend`] or [`VideoBackend`] and drive the
//! returned stream one packet at a time. Audio ships with a Symphonia
//! backend; video backends are supplied by the embedding application.

mod error;
mod symphonia_backend;

use std::path::Path;
use std::sync::Arc;

pub use error::{MediaError, MediaResult};
pub use symphonia_backend::SymphoniaBackend;

use crate::types::{Artwork, Sample};

/// Rational stream time base (seconds per tick = numer / denom)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeBase {
    pub numer: u32,
    pub denom: u32,
}

impl TimeBase {
    pub fn new(numer: u32, denom: u32) -> Self {
        Self {
            numer: numer.max(1),
            denom: denom.max(1),
        }
    }

    /// Convert seconds to stream ticks, clamping negative times to zero
    pub fn seconds_to_ticks(&self, seconds: f64) -> u64 {
        if !seconds.is_finite() || seconds <= 0.0 {
            return 0;
        }
        (seconds * self.denom as f64 / self.numer as f64).round() as u64
    }

    pub fn ticks_to_seconds(&self, ticks: i64) -> f64 {
        ticks as f64 * self.numer as f64 / self.denom as f64
    }
}

/// Parameters of the first audio stream of an asset
#[derive(Debug, Clone, PartialEq)]
pub struct AudioStreamInfo {
    pub sample_rate: u32,
    pub channels: u16,
    pub time_base: TimeBase,
    /// Stream length in ticks, when the container knows it
    pub duration: Option<u64>,
}

impl AudioStreamInfo {
    pub fn duration_seconds(&self) -> Option<f64> {
        self.duration
            .map(|ticks| self.time_base.ticks_to_seconds(ticks as i64))
    }
}

/// One decoded block of interleaved audio at the stream's native rate
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedAudio {
    pub channels: u16,
    pub samples: Vec<Sample>,
}

/// Opened audio asset, positioned on its first audio stream
pub trait AudioStream: Send {
    fn info(&self) -> &AudioStreamInfo;

    /// Read and decode the next packet. `Ok(None)` is end of stream;
    /// `Err(MediaError::TryAgain)` means the caller should retry.
    fn decode_next(&mut self) -> MediaResult<Option<DecodedAudio>>;

    /// Seek the demuxer to `ticks` in the stream time base
    fn seek(&mut self, ticks: u64) -> MediaResult<()>;

    /// Drop any decoder-internal buffered state
    fn flush(&mut self);

    /// Pictures embedded in the container
    fn artwork(&self) -> Vec<Artwork> {
        Vec::new()
    }
}

/// Opens audio assets
pub trait AudioBackend: Send + Sync {
    fn open_audio(&self, path: &Path) -> MediaResult<Box<dyn AudioStream>>;
}

/// Pixel layout of a decoded picture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Rgb24,
    Rgba,
    /// Planar 4:2:0, limited range
    Yuv420p,
    /// Planar 4:2:0, full range (deprecated "J" variant)
    Yuvj420p,
}

impl PixelFormat {
    /// Map deprecated full-range formats to their limited-range counterpart
    pub fn canonical(self) -> Self {
        match self {
            PixelFormat::Yuvj420p => PixelFormat::Yuv420p,
            other => other,
        }
    }
}

/// Parameters of the first video stream of an asset
#[derive(Debug, Clone, PartialEq)]
pub struct VideoStreamInfo {
    pub width: u32,
    pub height: u32,
    pub framerate: f64,
    pub time_base: TimeBase,
    pub duration: Option<u64>,
    pub pixel_format: PixelFormat,
}

/// Demuxed (not yet decoded) video packet metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketInfo {
    /// Presentation timestamp in stream ticks
    pub pts: i64,
    pub keyframe: bool,
}

/// A decoded picture in its native pixel format
#[derive(Debug, Clone, PartialEq)]
pub struct Picture {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    /// Presentation timestamp in stream ticks
    pub pts: i64,
    /// One plane for packed formats, three (Y, U, V) for planar ones
    pub planes: Vec<Arc<[u8]>>,
    pub strides: Vec<usize>,
}

/// Opened video asset, positioned on its first video stream
pub trait VideoStream: Send {
    fn info(&self) -> &VideoStreamInfo;

    /// Demux the next packet of the video stream without decoding it.
    /// Used for the keyframe scan; `Ok(None)` at end of stream.
    fn next_packet(&mut self) -> MediaResult<Option<PacketInfo>>;

    /// Return the demuxer to the start of the stream
    fn rewind(&mut self) -> MediaResult<()>;

    /// Seek to the keyframe at or before `seconds`
    fn seek(&mut self, seconds: f64) -> MediaResult<()>;

    fn flush(&mut self);

    /// Decode the next picture. `Ok(None)` is end of stream;
    /// `Err(MediaError::TryAgain)` means the caller should retry.
    fn decode_next(&mut self) -> MediaResult<Option<Picture>>;
}

/// Opens video assets
pub trait VideoBackend: Send + Sync {
    fn open_video(&self, path: &Path) -> MediaResult<Box<dyn VideoStream>>;
}

/// Upper bound on consecutive `TryAgain` results tolerated in one call
pub const MAX_TRY_AGAIN: usize = 64;

/// Run `op`, retrying transient "try again" results within the same call
pub fn retry_transient<T>(
    mut op: impl FnMut() -> MediaResult<Option<T>>,
) -> MediaResult<Option<T>> {
    for _ in 0..MAX_TRY_AGAIN {
        match op() {
            Err(MediaError::TryAgain) => continue,
            other => return other,
        }
    }
    Err(MediaError::Decode(format!(
        "decoder still not ready after {} attempts",
        MAX_TRY_AGAIN
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_base_conversion() {
        let tb = TimeBase::new(1, 48000);
        assert_eq!(tb.seconds_to_ticks(1.5), 72000);
        assert_eq!(tb.seconds_to_ticks(-3.0), 0);
        assert!((tb.ticks_to_seconds(24000) - 0.5).abs() < 1e-12);

        let tb = TimeBase::new(1001, 30000);
        assert_eq!(tb.seconds_to_ticks(1.001), 30);
    }

    #[test]
    fn test_retry_transient() {
        let mut attempts = 0;
        let result = retry_transient(|| {
            attempts += 1;
            if attempts < 3 {
                Err(MediaError::TryAgain)
            } else {
                Ok(Some(attempts))
            }
        });
        assert_eq!(result.unwrap(), Some(3));

        let result: MediaResult<Option<()>> = retry_transient(|| Err(MediaError::TryAgain));
        assert!(matches!(result, Err(MediaError::Decode(_))));
    }

    #[test]
    fn test_deprecated_formats_are_canonicalised() {
        assert_eq!(PixelFormat::Yuvj420p.canonical(), PixelFormat::Yuv420p);
        assert_eq!(PixelFormat::Rgba.canonical(), PixelFormat::Rgba);
    }
}
