//! Deferred deallocation of decoded frames
//!
//! Decoded audio periods are handed out as `basedrop::Shared` pointers. The
//! audio callback may hold the last reference to a frame (the scheduler
//! replaces its buffered pass output every period), and freeing there would
//! put the allocator on the real-time thread. Dropping a `Shared` only
//! enqueues the pointer; a dedicated collector thread frees it.
//!
//! Pixel buffers never reach the audio thread and stay plain `Arc`s.
//!
//! ```ignore
//! use basedrop::Shared;
//! use loom_core::engine::gc::gc_handle;
//!
//! let frame = Shared::new(&gc_handle(), AudioFrame::silence(&spec));
//! let reader = frame.clone();
//! drop(frame);
//! drop(reader); // queued for the collector, not freed here
//! ```

use basedrop::{Collector, Handle, Shared};
use std::sync::mpsc;
use std::sync::OnceLock;
use std::thread;
use std::time::Duration;

use crate::types::AudioFrame;

/// Decoded period shared between a decoder cache slot and its readers
pub type SharedFrame = Shared<AudioFrame>;

/// Collection interval of the collector thread
const COLLECT_INTERVAL: Duration = Duration::from_millis(100);

static GC_HANDLE: OnceLock<Handle> = OnceLock::new();

fn init_gc() -> Handle {
    let (tx, rx) = mpsc::channel();

    // Collector is !Sync, so it lives and dies on its own thread
    thread::Builder::new()
        .name("loom-gc".to_string())
        .spawn(move || {
            let mut collector = Collector::new();
            tx.send(collector.handle()).expect("Failed to send GC handle");

            log::info!("Frame collector thread started");

            loop {
                collector.collect();
                thread::sleep(COLLECT_INTERVAL);
            }
        })
        .expect("Failed to spawn frame collector thread");

    rx.recv().expect("Failed to receive GC handle")
}

/// Handle for allocating `Shared<T>` values collected off the audio thread
pub fn gc_handle() -> Handle {
    GC_HANDLE.get_or_init(init_gc).clone()
}

/// Wrap a decoded period for sharing
pub fn share_frame(frame: AudioFrame) -> SharedFrame {
    Shared::new(&gc_handle(), frame)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AudioSpec;

    #[test]
    fn test_shared_frame_clones_point_to_same_data() {
        let frame = share_frame(AudioFrame::silence(&AudioSpec::new(48000, 2, 64)));
        let reader = frame.clone();
        assert!(std::ptr::eq(&*frame, &*reader));
        assert_eq!(reader.frames(), 64);
    }
}
