//! Keyed decode-context pool with clock-driven eviction
//!
//! Decoder nodes keep one context per evaluation instant: the live playback
//! position, every scrub preview offset, and the waveform precomputation
//! pass. Contexts hold open file handles and demuxer state, so they must
//! survive between passes, but scrub offsets come and go by the thousand.
//!
//! The pool acts as a TTL cache driven by lookups instead of wall time:
//!
//! ```text
//! get(key, ns)
//!   ├─ tick[ns] += 1                       (one aging sweep)
//!   ├─ drop every entry in ns with tick - last_touch > MAX_HEALTH
//!   └─ touch or create `key`               (health back to MAX_HEALTH)
//! ```
//!
//! An entry therefore dies once it goes unaccessed for strictly more than
//! [`MAX_HEALTH`] sweeps of its own namespace. The two namespaces age
//! independently, so waveform lookups can never expire live contexts.

use std::collections::HashMap;
use std::hash::Hash;

use serde::{Deserialize, Serialize};

/// Sweeps an entry survives without being accessed
pub const MAX_HEALTH: u64 = 5;

/// Default quantisation of evaluation instants (steps per frame)
pub const DEFAULT_INSTANT_GRID: u32 = 1000;

/// Disjoint key spaces of the pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Namespace {
    /// Live playback and scrub previews
    Realtime,
    /// Offline waveform precomputation
    Waveform,
}

impl Namespace {
    const COUNT: usize = 2;

    #[inline]
    fn index(self) -> usize {
        match self {
            Namespace::Realtime => 0,
            Namespace::Waveform => 1,
        }
    }
}

/// Time-travel offset distinguishing concurrent evaluations of one graph
///
/// Stored as an integer number of grid steps so that two requests for the
/// "same" offset always hash to the same key, regardless of float noise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EvaluationInstant {
    steps: i64,
    grid: u32,
}

impl EvaluationInstant {
    /// The live playback instant (offset zero)
    pub const LIVE: Self = Self {
        steps: 0,
        grid: DEFAULT_INSTANT_GRID,
    };

    /// Snap a frame offset to `grid` steps per frame
    pub fn from_offset(offset_frames: f64, grid: u32) -> Self {
        let grid = grid.max(1);
        let steps = if offset_frames.is_finite() {
            (offset_frames * grid as f64).round() as i64
        } else {
            0
        };
        Self { steps, grid }
    }

    /// Offset in frames, as snapped
    pub fn offset_frames(&self) -> f64 {
        self.steps as f64 / self.grid as f64
    }

    pub fn is_live(&self) -> bool {
        self.steps == 0
    }
}

impl Default for EvaluationInstant {
    fn default() -> Self {
        Self::LIVE
    }
}

struct Slot<T> {
    last_touch: u64,
    value: T,
}

struct Space<K, T> {
    tick: u64,
    entries: HashMap<K, Slot<T>>,
}

impl<K, T> Default for Space<K, T> {
    fn default() -> Self {
        Self {
            tick: 0,
            entries: HashMap::new(),
        }
    }
}

impl<K: Eq + Hash, T> Space<K, T> {
    /// Advance the clock and drop expired entries, returning how many died
    fn sweep(&mut self) -> usize {
        self.tick += 1;
        let tick = self.tick;
        let before = self.entries.len();
        self.entries
            .retain(|_, slot| tick - slot.last_touch <= MAX_HEALTH);
        before - self.entries.len()
    }
}

/// Pool of per-instant contexts, the sole creator of contexts of type `T`
pub struct ContextPool<K, T> {
    spaces: [Space<K, T>; Namespace::COUNT],
}

impl<K: Eq + Hash + Clone, T> ContextPool<K, T> {
    pub fn new() -> Self {
        Self {
            spaces: [Space::default(), Space::default()],
        }
    }

    /// Age the namespace, then return the context for `key`, creating it
    /// with `make` if it does not exist (or just expired)
    pub fn get_or_insert_with(
        &mut self,
        key: K,
        namespace: Namespace,
        make: impl FnOnce() -> T,
    ) -> &mut T {
        let space = &mut self.spaces[namespace.index()];
        let evicted = space.sweep();
        if evicted > 0 {
            log::trace!("ContextPool: evicted {} {:?} contexts", evicted, namespace);
        }

        let tick = space.tick;
        let slot = space.entries.entry(key).or_insert_with(|| Slot {
            last_touch: tick,
            value: make(),
        });
        slot.last_touch = tick;
        &mut slot.value
    }

    /// Look up a context without aging the namespace or refreshing its health
    pub fn get_existing(&mut self, key: &K, namespace: Namespace) -> Option<&mut T> {
        self.spaces[namespace.index()]
            .entries
            .get_mut(key)
            .map(|slot| &mut slot.value)
    }

    /// Sweeps left before `key` expires (0 means it dies on the next sweep
    /// unless accessed)
    pub fn health(&self, key: &K, namespace: Namespace) -> Option<u64> {
        let space = &self.spaces[namespace.index()];
        space
            .entries
            .get(key)
            .map(|slot| MAX_HEALTH - (space.tick - slot.last_touch))
    }

    /// Visit every live context of a namespace
    pub fn iter_mut(&mut self, namespace: Namespace) -> impl Iterator<Item = (&K, &mut T)> {
        self.spaces[namespace.index()]
            .entries
            .iter_mut()
            .map(|(key, slot)| (key, &mut slot.value))
    }

    /// Visit every live context of both namespaces
    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.spaces
            .iter_mut()
            .flat_map(|space| space.entries.values_mut().map(|slot| &mut slot.value))
    }

    pub fn contains(&self, key: &K, namespace: Namespace) -> bool {
        self.spaces[namespace.index()].entries.contains_key(key)
    }

    pub fn len(&self, namespace: Namespace) -> usize {
        self.spaces[namespace.index()].entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spaces.iter().all(|space| space.entries.is_empty())
    }

    /// Destroy every context in both namespaces
    pub fn clear(&mut self) {
        for space in &mut self.spaces {
            space.entries.clear();
        }
    }
}

impl<K: Eq + Hash + Clone, T: Default> ContextPool<K, T> {
    /// Age the namespace and return the context for `key`
    pub fn get(&mut self, key: K, namespace: Namespace) -> &mut T {
        self.get_or_insert_with(key, namespace, T::default)
    }
}

impl<K: Eq + Hash + Clone, T> Default for ContextPool<K, T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[derive(Default)]
    struct Ctx {
        created: u32,
    }

    #[test]
    fn test_context_survives_five_sweeps() {
        let mut pool: ContextPool<u32, Ctx> = ContextPool::new();
        pool.get(1, Namespace::Realtime).created = 7;

        for _ in 0..5 {
            pool.get(2, Namespace::Realtime);
        }
        assert!(pool.contains(&1, Namespace::Realtime));
        assert_eq!(pool.health(&1, Namespace::Realtime), Some(0));

        // Sixth sweep without access kills it
        pool.get(2, Namespace::Realtime);
        assert!(!pool.contains(&1, Namespace::Realtime));
    }

    #[test]
    fn test_expired_context_is_recreated() {
        let mut pool: ContextPool<u32, Ctx> = ContextPool::new();
        pool.get(1, Namespace::Realtime).created = 7;
        for _ in 0..5 {
            pool.get(2, Namespace::Realtime);
        }
        // Accessing on the sixth sweep is too late: the sweep runs first
        assert_eq!(pool.get(1, Namespace::Realtime).created, 0);
    }

    #[test]
    fn test_access_restores_health() {
        let mut pool: ContextPool<u32, Ctx> = ContextPool::new();
        pool.get(1, Namespace::Realtime).created = 3;
        for _ in 0..4 {
            pool.get(2, Namespace::Realtime);
        }
        assert_eq!(pool.get(1, Namespace::Realtime).created, 3);
        assert_eq!(pool.health(&1, Namespace::Realtime), Some(MAX_HEALTH));
    }

    #[test]
    fn test_namespaces_age_independently() {
        let mut pool: ContextPool<u32, Ctx> = ContextPool::new();
        pool.get(1, Namespace::Realtime).created = 1;
        for _ in 0..100 {
            pool.get(1, Namespace::Waveform);
        }
        assert!(pool.contains(&1, Namespace::Realtime));
        assert_eq!(pool.health(&1, Namespace::Realtime), Some(MAX_HEALTH));
        assert_eq!(pool.get(1, Namespace::Realtime).created, 1);
    }

    #[test]
    fn test_get_existing_does_not_age() {
        let mut pool: ContextPool<u32, Ctx> = ContextPool::new();
        pool.get(1, Namespace::Realtime);
        for _ in 0..20 {
            assert!(pool.get_existing(&1, Namespace::Realtime).is_some());
        }
        assert_eq!(pool.health(&1, Namespace::Realtime), Some(MAX_HEALTH));
        assert!(pool.get_existing(&9, Namespace::Realtime).is_none());
    }

    #[test]
    fn test_eviction_matches_health_model() {
        // Compare against a literal health-counter model over a
        // pseudo-random access sequence
        let mut pool: ContextPool<u32, Ctx> = ContextPool::new();
        let mut model: HashMap<u32, i64> = HashMap::new();
        let mut seed: u32 = 0x2545_f491;

        for _ in 0..2000 {
            seed = seed.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            let key = (seed >> 16) % 12;

            for health in model.values_mut() {
                *health -= 1;
            }
            model.retain(|_, health| *health >= 0);
            model.insert(key, MAX_HEALTH as i64);

            pool.get(key, Namespace::Realtime);

            assert_eq!(pool.len(Namespace::Realtime), model.len());
            for k in model.keys() {
                assert!(pool.contains(k, Namespace::Realtime));
            }
        }
    }

    #[test]
    fn test_clear() {
        let mut pool: ContextPool<u32, Ctx> = ContextPool::new();
        pool.get(1, Namespace::Realtime);
        pool.get(1, Namespace::Waveform);
        assert!(!pool.is_empty());
        pool.clear();
        assert!(pool.is_empty());
    }

    #[test]
    fn test_instant_quantisation() {
        let a = EvaluationInstant::from_offset(12.0, 1000);
        let b = EvaluationInstant::from_offset(12.000_000_1, 1000);
        let c = EvaluationInstant::from_offset(12.01, 1000);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!((c.offset_frames() - 12.01).abs() < 1e-9);
        assert!(EvaluationInstant::from_offset(0.0, 1000).is_live());
        assert_eq!(EvaluationInstant::from_offset(f64::NAN, 1000), EvaluationInstant::LIVE);
    }
}
