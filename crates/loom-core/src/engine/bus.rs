//! Audio bus mixing graph
//!
//! Export nodes add their contribution into exactly one bus per pass. After
//! the graph has been evaluated, a single redirect sweep folds every
//! non-main bus that names a redirect target into that target, and the main
//! bus is handed to the device.
//!
//! Redirects are one hop only: when A redirects to B and B redirects to the
//! main bus, the main bus receives B's own contributions but not A's.

use serde::{Deserialize, Serialize};

use crate::types::{AudioSpec, BusId, Sample};

fn no_redirect() -> i32 {
    -1
}

/// Persistent description of one bus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioBus {
    pub id: BusId,
    pub name: String,
    /// Exactly one bus per project is delivered to the device
    #[serde(default)]
    pub main: bool,
    /// Target bus id; negative means no redirect
    #[serde(default = "no_redirect")]
    pub redirect_id: i32,
    /// Color mark shown next to the bus name
    #[serde(default)]
    pub color: Option<[u8; 3]>,
}

impl AudioBus {
    pub fn new(id: BusId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            main: false,
            redirect_id: no_redirect(),
            color: None,
        }
    }

    pub fn main(id: BusId, name: impl Into<String>) -> Self {
        Self {
            main: true,
            ..Self::new(id, name)
        }
    }

    pub fn with_redirect(mut self, target: BusId) -> Self {
        self.redirect_id = target.0;
        self
    }

    pub fn with_color(mut self, color: [u8; 3]) -> Self {
        self.color = Some(color);
        self
    }

    pub fn redirect(&self) -> Option<BusId> {
        (self.redirect_id >= 0).then_some(BusId(self.redirect_id))
    }
}

/// Anything export nodes can mix into
pub trait MixTarget {
    /// Add `samples` into the bus; returns false for an unknown bus
    fn accumulate(&mut self, bus: BusId, samples: &[Sample]) -> bool;
}

struct BusSlot {
    desc: AudioBus,
    /// Contributions made directly to this bus during the pass
    direct: Vec<Sample>,
    /// `direct` plus redirected buses, valid once resolved
    mixed: Vec<Sample>,
}

/// Per-pass bus buffers
pub struct BusGraph {
    slots: Vec<BusSlot>,
    main: Option<usize>,
    resolved: bool,
}

impl BusGraph {
    pub fn new(buses: Vec<AudioBus>) -> Self {
        let mut graph = Self {
            slots: Vec::new(),
            main: None,
            resolved: false,
        };
        graph.set_buses(buses);
        graph
    }

    /// Replace the bus layout; buffers are sized by the next `begin_pass`
    pub fn set_buses(&mut self, buses: Vec<AudioBus>) {
        let mains = buses.iter().filter(|b| b.main).count();
        if mains != 1 {
            log::warn!("Bus layout has {} main buses, expected exactly one", mains);
        }
        self.slots = buses
            .into_iter()
            .map(|desc| BusSlot {
                desc,
                direct: Vec::new(),
                mixed: Vec::new(),
            })
            .collect();
        self.main = self.slots.iter().position(|s| s.desc.main);
        self.resolved = false;
    }

    pub fn buses(&self) -> impl Iterator<Item = &AudioBus> {
        self.slots.iter().map(|s| &s.desc)
    }

    pub fn main_id(&self) -> Option<BusId> {
        self.main.map(|i| self.slots[i].desc.id)
    }

    fn index_of(&self, id: BusId) -> Option<usize> {
        self.slots.iter().position(|s| s.desc.id == id)
    }

    /// Size every buffer to one period and zero it
    pub fn begin_pass(&mut self, spec: &AudioSpec) {
        let len = spec.period_samples();
        for slot in &mut self.slots {
            slot.direct.clear();
            slot.direct.resize(len, 0.0);
            slot.mixed.clear();
            slot.mixed.resize(len, 0.0);
        }
        self.main = self.slots.iter().position(|s| s.desc.main);
        self.resolved = false;
    }

    /// Fold redirected buses into their targets
    ///
    /// Always recomputed from the direct contributions, so calling it again
    /// on the same pass gives the same result.
    pub fn resolve_redirects(&mut self) {
        for slot in &mut self.slots {
            slot.mixed.copy_from_slice(&slot.direct);
        }
        for src in 0..self.slots.len() {
            if Some(src) == self.main {
                continue;
            }
            let Some(target) = self.slots[src].desc.redirect() else {
                continue;
            };
            let Some(dst) = self.index_of(target) else {
                log::debug!(
                    "Bus {:?} redirects to unknown bus {:?}",
                    self.slots[src].desc.id,
                    target
                );
                continue;
            };
            if dst == src {
                continue;
            }
            let (source, dest) = if src < dst {
                let (lo, hi) = self.slots.split_at_mut(dst);
                (&lo[src], &mut hi[0])
            } else {
                let (lo, hi) = self.slots.split_at_mut(src);
                (&hi[0], &mut lo[dst])
            };
            for (d, s) in dest.mixed.iter_mut().zip(&source.direct) {
                *d += *s;
            }
        }
        self.resolved = true;
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved
    }

    /// Final buffer of a bus (direct contributions until resolved)
    pub fn buffer(&self, id: BusId) -> Option<&[Sample]> {
        let slot = &self.slots[self.index_of(id)?];
        Some(if self.resolved { &slot.mixed } else { &slot.direct })
    }

    /// Copy the main bus into `out`, zero-filling whatever it does not cover
    pub fn copy_main_to(&self, out: &mut [Sample]) {
        let source = self.main_id().and_then(|id| self.buffer(id)).unwrap_or(&[]);
        let n = source.len().min(out.len());
        out[..n].copy_from_slice(&source[..n]);
        out[n..].fill(0.0);
    }
}

impl MixTarget for BusGraph {
    fn accumulate(&mut self, bus: BusId, samples: &[Sample]) -> bool {
        let Some(index) = self.index_of(bus) else {
            return false;
        };
        for (d, s) in self.slots[index].direct.iter_mut().zip(samples) {
            *d += *s;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAIN: BusId = BusId(0);
    const A: BusId = BusId(1);
    const B: BusId = BusId(2);

    fn spec() -> AudioSpec {
        AudioSpec::new(48000, 2, 64)
    }

    fn layout() -> Vec<AudioBus> {
        vec![
            AudioBus::main(MAIN, "Main"),
            AudioBus::new(A, "A").with_redirect(MAIN),
            AudioBus::new(B, "B").with_redirect(A),
        ]
    }

    #[test]
    fn test_redirect_adds_into_main() {
        let mut graph = BusGraph::new(layout());
        graph.begin_pass(&spec());
        assert!(graph.accumulate(A, &[0.5; 128]));
        assert!(graph.accumulate(MAIN, &[0.3; 128]));
        graph.resolve_redirects();

        let mut out = vec![0.0; 128];
        graph.copy_main_to(&mut out);
        assert!(out.iter().all(|s| (s - 0.8).abs() < 1e-6));
    }

    #[test]
    fn test_resolving_twice_does_not_double_count() {
        let mut graph = BusGraph::new(layout());
        graph.begin_pass(&spec());
        graph.accumulate(A, &[0.5; 128]);
        graph.accumulate(MAIN, &[0.3; 128]);
        graph.resolve_redirects();
        graph.resolve_redirects();
        assert!((graph.buffer(MAIN).unwrap()[0] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_redirect_chains_are_single_hop() {
        let mut graph = BusGraph::new(layout());
        graph.begin_pass(&spec());
        graph.accumulate(B, &[0.25; 128]);
        graph.resolve_redirects();
        // B lands in A, but does not travel on to the main bus
        assert!((graph.buffer(A).unwrap()[0] - 0.25).abs() < 1e-6);
        assert_eq!(graph.buffer(MAIN).unwrap()[0], 0.0);
    }

    #[test]
    fn test_contributions_sum_and_pass_resets() {
        let mut graph = BusGraph::new(layout());
        graph.begin_pass(&spec());
        graph.accumulate(MAIN, &[0.1; 128]);
        graph.accumulate(MAIN, &[0.2; 128]);
        graph.resolve_redirects();
        assert!((graph.buffer(MAIN).unwrap()[5] - 0.3).abs() < 1e-6);

        graph.begin_pass(&spec());
        assert!(!graph.is_resolved());
        assert!(graph.buffer(MAIN).unwrap().iter().all(|s| *s == 0.0));
    }

    #[test]
    fn test_unknown_bus_and_missing_main() {
        let mut graph = BusGraph::new(vec![AudioBus::new(A, "A")]);
        graph.begin_pass(&spec());
        assert!(!graph.accumulate(BusId(9), &[1.0; 128]));
        graph.accumulate(A, &[1.0; 128]);
        graph.resolve_redirects();

        let mut out = vec![0.7; 128];
        graph.copy_main_to(&mut out);
        assert!(out.iter().all(|s| *s == 0.0));
    }

    #[test]
    fn test_short_contribution_and_larger_output() {
        let mut graph = BusGraph::new(layout());
        graph.begin_pass(&spec());
        graph.accumulate(MAIN, &[1.0; 10]);
        graph.resolve_redirects();
        let mut out = vec![0.5; 200];
        graph.copy_main_to(&mut out);
        assert_eq!(out[9], 1.0);
        assert_eq!(out[10], 0.0);
        assert_eq!(out[199], 0.0);
    }

    #[test]
    fn test_bus_yaml() {
        let bus = AudioBus::new(A, "Drums").with_redirect(MAIN).with_color([200, 40, 40]);
        let yaml = serde_yaml::to_string(&bus).unwrap();
        let back: AudioBus = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back, bus);

        let minimal: AudioBus = serde_yaml::from_str("id: 3\nname: FX\n").unwrap();
        assert_eq!(minimal.redirect(), None);
        assert!(!minimal.main);
    }
}
