//! Fixed-size sample arena for per-pass scratch buffers
//!
//! Allocated once at startup and reset at the start of every pass, so nodes
//! can grab scratch space on the audio thread without touching the global
//! allocator. Exhaustion is not an error: the caller gets `None` and produces
//! no output for this pass.

use crate::types::Sample;

/// Bump allocator over a preallocated sample buffer
pub struct SampleArena {
    storage: Vec<Sample>,
    used: usize,
    /// Set after the first failed allocation of a pass to keep logging quiet
    exhausted: bool,
}

impl SampleArena {
    /// Arena holding `bytes` worth of samples
    pub fn new(bytes: usize) -> Self {
        let capacity = bytes / std::mem::size_of::<Sample>();
        Self {
            storage: vec![0.0; capacity],
            used: 0,
            exhausted: false,
        }
    }

    /// Capacity in samples
    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    pub fn used(&self) -> usize {
        self.used
    }

    pub fn remaining(&self) -> usize {
        self.storage.len() - self.used
    }

    /// Release every allocation of the previous pass
    pub fn reset(&mut self) {
        self.used = 0;
        self.exhausted = false;
    }

    /// Zeroed slice of `len` samples, or `None` when the arena is full
    pub fn alloc(&mut self, len: usize) -> Option<&mut [Sample]> {
        if len > self.remaining() {
            if !self.exhausted {
                log::warn!(
                    "Sample arena exhausted: requested {} samples, {} of {} left",
                    len,
                    self.remaining(),
                    self.capacity()
                );
                self.exhausted = true;
            }
            return None;
        }
        let start = self.used;
        self.used += len;
        let slice = &mut self.storage[start..self.used];
        slice.fill(0.0);
        Some(slice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_until_exhausted() {
        let mut arena = SampleArena::new(64 * 4);
        assert_eq!(arena.capacity(), 64);

        let a = arena.alloc(40).unwrap();
        a.fill(1.0);
        assert_eq!(arena.remaining(), 24);
        assert!(arena.alloc(25).is_none());
        assert_eq!(arena.alloc(24).unwrap().len(), 24);
        assert!(arena.alloc(1).is_none());
    }

    #[test]
    fn test_reset_returns_zeroed_memory() {
        let mut arena = SampleArena::new(16 * 4);
        arena.alloc(16).unwrap().fill(0.5);
        arena.reset();
        assert_eq!(arena.used(), 0);
        assert!(arena.alloc(16).unwrap().iter().all(|s| *s == 0.0));
    }

    #[test]
    fn test_empty_arena() {
        let mut arena = SampleArena::new(0);
        assert!(arena.alloc(0).is_some());
        assert!(arena.alloc(1).is_none());
    }
}
