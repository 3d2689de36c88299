//! Waveform precomputation
//!
//! A background thread renders the amplitude envelope of every composition
//! that asks for a refresh. It drives the same graph passes as playback, but
//! with waveform flags, its own pass ids and its own bus buffers. Decoders
//! therefore resolve their contexts in the waveform namespace of the pool and
//! never evict or reseek a live-playback context.
//!
//! ```text
//! request_refresh(id) ──► queue (dedup) ──wake──► "waveform" thread
//!                                                   │ compute_waveform()
//!                                                   ▼
//!                        record(id) ◄──read── records (RwLock)
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use crate::engine::{AudioBus, AudioGraph, GraphPass, PassContext, PipelineError, PipelineResult};
use crate::types::{AudioSpec, CompositionId, Sample};

/// Default bucket width in frames
pub const DEFAULT_BUCKET_WIDTH: usize = 256;

/// Default idle poll interval of the manager thread
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;

/// Waveform settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WaveformSettings {
    /// Frames folded into one bucket
    pub bucket_width: usize,
    /// How long the thread sleeps when there is nothing to do
    pub poll_interval_ms: u64,
}

impl Default for WaveformSettings {
    fn default() -> Self {
        Self {
            bucket_width: DEFAULT_BUCKET_WIDTH,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
        }
    }
}

impl WaveformSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

/// Amplitude envelope of one composition
#[derive(Debug, Clone, PartialEq)]
pub struct WaveformRecord {
    pub composition: CompositionId,
    /// One value in [0, 1] per bucket
    pub buckets: Vec<f32>,
    /// Frames per bucket
    pub bucket_width: usize,
}

/// What the manager needs to know about a composition
#[derive(Clone)]
pub struct CompositionInfo {
    pub enabled: bool,
    /// Whether the composition takes part in audio mixing at all
    pub audio_mixing: bool,
    pub begin_frame: i64,
    pub end_frame: i64,
    pub framerate: f64,
    pub graph: Arc<dyn AudioGraph>,
    pub buses: Vec<AudioBus>,
}

impl CompositionInfo {
    pub fn duration_seconds(&self) -> f64 {
        if self.framerate <= 0.0 {
            return 0.0;
        }
        (self.end_frame - self.begin_frame).max(0) as f64 / self.framerate
    }
}

/// Loaded project as seen by the waveform thread
pub trait WaveformSource: Send + Sync {
    fn composition(&self, id: CompositionId) -> Option<CompositionInfo>;
}

/// Fold one bucket of interleaved samples into a running mix of `|s|`,
/// clamped to `[0, 1]` once the whole bucket is folded
fn fold_bucket(samples: &[Sample]) -> f32 {
    samples
        .iter()
        .fold(0.0f32, |avg, s| (avg + s.abs()) / 2.0)
        .clamp(0.0, 1.0)
}

/// Render the envelope of `info` offline
///
/// Returns `None` when `stop` was raised part way through.
pub fn compute_waveform(
    info: &CompositionInfo,
    spec: &AudioSpec,
    settings: &WaveformSettings,
    arena_bytes: usize,
    stop: &AtomicBool,
) -> Option<Vec<f32>> {
    let runner = GraphPass::new(
        Arc::clone(&info.graph),
        info.buses.clone(),
        *spec,
        arena_bytes,
        info.framerate,
    );
    let bucket_len = settings.bucket_width.max(1) * spec.channels as usize;
    let begin = if info.framerate > 0.0 {
        info.begin_frame as f64 / info.framerate
    } else {
        0.0
    };
    let end = begin + info.duration_seconds();

    let mut out = vec![0.0; spec.period_samples()];
    let mut pending: Vec<Sample> = Vec::with_capacity(spec.period_samples() + bucket_len);
    let mut buckets = Vec::new();
    let mut pass_id = 0u64;
    let mut time = begin;

    while time < end {
        if stop.load(Ordering::Relaxed) {
            return None;
        }
        let context = PassContext::waveform(pass_id, time, info.framerate, pass_id == 0);
        runner.run(context, &mut out);
        pass_id += 1;

        pending.extend_from_slice(&out);
        let whole = pending.len() - pending.len() % bucket_len;
        buckets.extend(pending[..whole].chunks_exact(bucket_len).map(fold_bucket));
        pending.drain(..whole);

        time += spec.period_seconds();
    }
    Some(buckets)
}

struct Shared {
    spec: AudioSpec,
    settings: WaveformSettings,
    arena_bytes: usize,
    project: RwLock<Option<Arc<dyn WaveformSource>>>,
    /// Bumped on every `set_project`, so results for an unloaded project are dropped
    project_generation: AtomicU64,
    /// Dirty composition ids, oldest first, without duplicates
    queue: Mutex<Vec<CompositionId>>,
    records: RwLock<HashMap<CompositionId, Arc<WaveformRecord>>>,
    stop: AtomicBool,
}

/// Owns the waveform thread and its records
pub struct WaveformManager {
    shared: Arc<Shared>,
    wake_tx: Sender<()>,
    thread: Option<JoinHandle<()>>,
}

impl WaveformManager {
    /// Spawn the manager thread
    pub fn spawn(
        spec: AudioSpec,
        settings: WaveformSettings,
        arena_bytes: usize,
    ) -> PipelineResult<Self> {
        let shared = Arc::new(Shared {
            spec,
            settings,
            arena_bytes,
            project: RwLock::new(None),
            project_generation: AtomicU64::new(0),
            queue: Mutex::new(Vec::new()),
            records: RwLock::new(HashMap::new()),
            stop: AtomicBool::new(false),
        });
        let (wake_tx, wake_rx) = channel::unbounded();

        let worker = Arc::clone(&shared);
        let thread = thread::Builder::new()
            .name("waveform".to_string())
            .spawn(move || run(worker, wake_rx))
            .map_err(|source| PipelineError::Spawn {
                name: "waveform",
                source,
            })?;

        Ok(Self {
            shared,
            wake_tx,
            thread: Some(thread),
        })
    }

    /// Load or unload the project; existing records and queued ids are dropped
    pub fn set_project(&self, project: Option<Arc<dyn WaveformSource>>) {
        *self.shared.project.write() = project;
        self.shared.project_generation.fetch_add(1, Ordering::AcqRel);
        self.shared.queue.lock().clear();
        self.shared.records.write().clear();
        let _ = self.wake_tx.send(());
    }

    /// Queue a composition for recomputation
    pub fn request_refresh(&self, id: CompositionId) {
        {
            let mut queue = self.shared.queue.lock();
            if queue.contains(&id) {
                return;
            }
            queue.push(id);
        }
        let _ = self.wake_tx.send(());
    }

    /// Ids waiting to be computed
    pub fn pending(&self) -> usize {
        self.shared.queue.lock().len()
    }

    pub fn erase_record(&self, id: CompositionId) -> Option<Arc<WaveformRecord>> {
        self.shared.records.write().remove(&id)
    }

    pub fn record(&self, id: CompositionId) -> Option<Arc<WaveformRecord>> {
        self.shared.records.read().get(&id).cloned()
    }

    /// Snapshot of every record
    pub fn records(&self) -> HashMap<CompositionId, Arc<WaveformRecord>> {
        self.shared.records.read().clone()
    }

    pub fn is_running(&self) -> bool {
        self.thread.as_ref().map(|h| !h.is_finished()).unwrap_or(false)
    }

    /// Stop the thread and wait for it
    pub fn shutdown(&mut self) {
        self.shared.stop.store(true, Ordering::Release);
        let _ = self.wake_tx.send(());
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                log::error!("Waveform thread panicked");
            }
        }
    }
}

impl Drop for WaveformManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run(shared: Arc<Shared>, wake_rx: Receiver<()>) {
    log::info!("Waveform thread started");
    let poll = shared.settings.poll_interval();

    while !shared.stop.load(Ordering::Acquire) {
        let project = shared.project.read().clone();
        let generation = shared.project_generation.load(Ordering::Acquire);
        let batch = match &project {
            Some(_) => std::mem::take(&mut *shared.queue.lock()),
            None => Vec::new(),
        };

        let Some(project) = project.filter(|_| !batch.is_empty()) else {
            match wake_rx.recv_timeout(poll) {
                Ok(()) | Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        };

        for id in batch {
            if shared.stop.load(Ordering::Acquire) {
                break;
            }
            refresh(&shared, project.as_ref(), id, generation);
        }
    }
    log::info!("Waveform thread stopped");
}

fn refresh(shared: &Shared, project: &dyn WaveformSource, id: CompositionId, generation: u64) {
    let info = match project.composition(id) {
        Some(info) if info.enabled && info.audio_mixing => info,
        _ => {
            shared.records.write().remove(&id);
            return;
        }
    };

    log::debug!(
        "Computing waveform for composition {:?} ({:.1}s)",
        id,
        info.duration_seconds()
    );
    let Some(buckets) = compute_waveform(
        &info,
        &shared.spec,
        &shared.settings,
        shared.arena_bytes,
        &shared.stop,
    ) else {
        return;
    };

    if shared.project_generation.load(Ordering::Acquire) != generation {
        log::debug!("Project changed while computing {:?}, dropping result", id);
        return;
    }
    let record = WaveformRecord {
        composition: id,
        buckets,
        bucket_width: shared.settings.bucket_width,
    };
    shared.records.write().insert(id, Arc::new(record));
}
