//! Symphonia audio backend
//!
//! Opens any container/codec Symphonia supports (WAV, FLAC, MP3, AAC/MP4...)
//! and decodes the first audio track packet by packet.

use std::fs::File;
use std::path::Path;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::{MetadataOptions, MetadataRevision};
use symphonia::core::probe::Hint;

use super::{AudioBackend, AudioStream, AudioStreamInfo, DecodedAudio, MediaError, MediaResult, TimeBase};
use crate::types::Artwork;

/// Audio backend decoding through Symphonia
#[derive(Debug, Default, Clone, Copy)]
pub struct SymphoniaBackend;

impl AudioBackend for SymphoniaBackend {
    fn open_audio(&self, path: &Path) -> MediaResult<Box<dyn AudioStream>> {
        Ok(Box::new(SymphoniaStream::open(path)?))
    }
}

struct SymphoniaStream {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    info: AudioStreamInfo,
    sample_buf: Option<SampleBuffer<f32>>,
    artwork: Vec<Artwork>,
}

fn collect_visuals(revision: &MetadataRevision, out: &mut Vec<Artwork>) {
    for visual in revision.visuals() {
        out.push(Artwork::new(visual.media_type.clone(), visual.data.to_vec()));
    }
}

fn is_eof(err: &SymphoniaError) -> bool {
    matches!(err, SymphoniaError::IoError(e) if e.kind() == std::io::ErrorKind::UnexpectedEof)
}

impl SymphoniaStream {
    fn open(path: &Path) -> MediaResult<Self> {
        let open_err = |reason: String| MediaError::Open {
            path: path.to_path_buf(),
            reason,
        };

        let file = File::open(path).map_err(|e| open_err(e.to_string()))?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let mut probed = symphonia::default::get_probe()
            .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
            .map_err(|e| open_err(e.to_string()))?;

        // Tags read ahead of the container (ID3v2) and inside it
        let mut artwork = Vec::new();
        if let Some(revision) = probed.metadata.get().as_ref().and_then(|m| m.current()) {
            collect_visuals(revision, &mut artwork);
        }
        let mut format = probed.format;
        if let Some(revision) = format.metadata().current() {
            collect_visuals(revision, &mut artwork);
        }

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or(MediaError::NoStream("audio"))?;

        let track_id = track.id;
        let params = &track.codec_params;

        let sample_rate = params
            .sample_rate
            .ok_or_else(|| MediaError::Unsupported("unknown sample rate".to_string()))?;
        let channels = params.channels.map(|c| c.count() as u16).unwrap_or(2);
        let time_base = params
            .time_base
            .map(|tb| TimeBase::new(tb.numer, tb.denom))
            .unwrap_or_else(|| TimeBase::new(1, sample_rate));
        let duration = params
            .n_frames
            .map(|n| time_base.seconds_to_ticks(n as f64 / sample_rate as f64));

        let decoder = symphonia::default::get_codecs()
            .make(params, &DecoderOptions::default())
            .map_err(|e| MediaError::Unsupported(e.to_string()))?;

        log::info!(
            "Opened {:?}: {}Hz, {} channels, {} artwork",
            path,
            sample_rate,
            channels,
            artwork.len()
        );

        Ok(Self {
            format,
            decoder,
            track_id,
            info: AudioStreamInfo {
                sample_rate,
                channels,
                time_base,
                duration,
            },
            sample_buf: None,
            artwork,
        })
    }
}

impl AudioStream for SymphoniaStream {
    fn info(&self) -> &AudioStreamInfo {
        &self.info
    }

    fn decode_next(&mut self) -> MediaResult<Option<DecodedAudio>> {
        loop {
            let packet = match self.format.next_packet() {
                Ok(packet) => packet,
                Err(e) if is_eof(&e) => return Ok(None),
                Err(SymphoniaError::ResetRequired) => {
                    self.decoder.reset();
                    return Err(MediaError::TryAgain);
                }
                Err(e) => return Err(MediaError::Decode(e.to_string())),
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = match self.decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(SymphoniaError::DecodeError(e)) => {
                    log::warn!("Skipping corrupt packet: {}", e);
                    return Err(MediaError::TryAgain);
                }
                Err(e) if is_eof(&e) => return Ok(None),
                Err(e) => return Err(MediaError::Decode(e.to_string())),
            };

            if decoded.frames() == 0 {
                continue;
            }

            let spec = *decoded.spec();
            let channels = spec.channels.count();
            let required = decoded.capacity() * channels;
            if self
                .sample_buf
                .as_ref()
                .map_or(true, |buf| buf.capacity() < required)
            {
                self.sample_buf = Some(SampleBuffer::new(decoded.capacity() as u64, spec));
            }

            if let Some(buf) = self.sample_buf.as_mut() {
                buf.copy_interleaved_ref(decoded);
                return Ok(Some(DecodedAudio {
                    channels: channels as u16,
                    samples: buf.samples().to_vec(),
                }));
            }
        }
    }

    fn seek(&mut self, ticks: u64) -> MediaResult<()> {
        self.format
            .seek(
                SeekMode::Accurate,
                SeekTo::TimeStamp {
                    ts: ticks,
                    track_id: self.track_id,
                },
            )
            .map_err(|e| MediaError::Seek(e.to_string()))?;
        self.decoder.reset();
        Ok(())
    }

    fn flush(&mut self) {
        self.decoder.reset();
    }

    fn artwork(&self) -> Vec<Artwork> {
        self.artwork.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::write_wav;

    fn decode_all(stream: &mut dyn AudioStream) -> Vec<f32> {
        let mut out = Vec::new();
        loop {
            match stream.decode_next() {
                Ok(Some(block)) => out.extend_from_slice(&block.samples),
                Ok(None) => break,
                Err(MediaError::TryAgain) => continue,
                Err(e) => panic!("decode failed: {}", e),
            }
        }
        out
    }

    #[test]
    fn test_open_reports_stream_info() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_wav(dir.path(), "tone.wav", 44100, 2, 44100, 1000);

        let stream = SymphoniaBackend.open_audio(&path).unwrap();
        let info = stream.info();
        assert_eq!(info.sample_rate, 44100);
        assert_eq!(info.channels, 2);
        let secs = info.duration_seconds().unwrap();
        assert!((secs - 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_decodes_every_sample() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_wav(dir.path(), "half.wav", 48000, 1, 24000, 16384);

        let mut stream = SymphoniaBackend.open_audio(&path).unwrap();
        let samples = decode_all(stream.as_mut());
        assert_eq!(samples.len(), 24000);
        assert!(samples.iter().all(|s| (s - 0.5).abs() < 1e-3));
    }

    #[test]
    fn test_seek_skips_ahead() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_wav(dir.path(), "long.wav", 48000, 2, 48000, 0);

        let mut stream = SymphoniaBackend.open_audio(&path).unwrap();
        let ticks = stream.info().time_base.seconds_to_ticks(0.5);
        stream.seek(ticks).unwrap();
        let samples = decode_all(stream.as_mut());
        assert!(!samples.is_empty());
        assert!(samples.len() < 48000 * 2);
    }

    #[test]
    fn test_missing_file_is_open_error() {
        let result = SymphoniaBackend.open_audio(Path::new("/nonexistent/audio.wav"));
        assert!(matches!(result, Err(MediaError::Open { .. })));
    }
}
