//! Keyframe index of a video stream

use crate::media::{MediaResult, VideoStream};

/// Sorted presentation frame numbers of every keyframe in a stream
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyframeIndex {
    frames: Vec<i64>,
}

impl KeyframeIndex {
    pub fn from_frames(frames: impl IntoIterator<Item = i64>) -> Self {
        let mut frames: Vec<i64> = frames.into_iter().collect();
        frames.sort_unstable();
        frames.dedup();
        Self { frames }
    }

    /// Demux the whole stream once, collecting keyframe positions, then
    /// rewind it to the start
    pub fn scan(stream: &mut dyn VideoStream) -> MediaResult<Self> {
        let info = stream.info().clone();
        let mut frames = Vec::new();
        while let Some(packet) = stream.next_packet()? {
            if packet.keyframe {
                let seconds = info.time_base.ticks_to_seconds(packet.pts);
                frames.push((seconds * info.framerate).round() as i64);
            }
        }
        stream.rewind()?;
        Ok(Self::from_frames(frames))
    }

    /// Nearest keyframe at or before `frame`
    pub fn preceding(&self, frame: i64) -> Option<i64> {
        let idx = self.frames.partition_point(|&k| k <= frame);
        idx.checked_sub(1).map(|i| self.frames[i])
    }

    /// True when `a` and `b` decode from different keyframes
    pub fn crosses_keyframe(&self, a: i64, b: i64) -> bool {
        self.preceding(a) != self.preceding(b)
    }

    pub fn frames(&self) -> &[i64] {
        &self.frames
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}
