//! Real-time audio scheduler
//!
//! Driven once per device period. In the normal case the graph pass runs
//! synchronously inside the callback. When a pass overruns its deadline
//! (half the period), the scheduler switches to serving already-rendered
//! audio through the time-stretch engine at a slower tempo, and catches up
//! by running the next pass on a background worker.
//!
//! # States
//!
//! - **Normal**: run the pass, output it. Overrun: stretch its output by
//!   [`OVERLOAD_FACTOR`] and enter Stretched.
//! - **Stretched**: pop one period from the stretch engine. Once it is down
//!   to `channels` frames or fewer, launch one background pass. While that pass is
//!   outstanding, the ratio grows by [`PENDING_FACTOR`] per callback. A fast
//!   result is output directly and the scheduler returns to Normal; a slow
//!   one is stretched further. Underflow with nothing outstanding falls back
//!   to a synchronous pass.
//!
//! Background results travel back through an rtrb queue stamped with the
//! generation that launched them. [`Scheduler::reset`] bumps the generation,
//! so results of passes launched before a transport jump are dropped.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::error::PipelineResult;
use super::pass::PassRunner;
use crate::timestretch::{TimeStretch, TimeStretchSession, MAX_TIME_RATIO};
use crate::types::{AudioSpec, Sample};

/// Ratio multiplier when a pass overruns the deadline
pub const OVERLOAD_FACTOR: f64 = 1.8;

/// Ratio multiplier per callback while a background pass is outstanding
pub const PENDING_FACTOR: f64 = 1.6;

/// Slope of the ratio picked after a slow synchronous fallback pass
pub const UNDERFLOW_SLOPE: f64 = 1.5;

/// Background results in flight; at most one is outstanding per generation
const RESULT_QUEUE_CAPACITY: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Normal,
    Stretched,
}

/// Counters for diagnostics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub sync_passes: u64,
    pub async_passes: u64,
    pub overruns: u64,
    pub stale_results: u64,
    /// Callbacks where the stretch engine could not fill a whole period
    pub underflows: u64,
}

struct PassResult {
    generation: u64,
    samples: Vec<Sample>,
    elapsed: Duration,
}

pub struct Scheduler {
    runner: Arc<dyn PassRunner>,
    stretch: Box<dyn TimeStretch>,
    spec: AudioSpec,
    deadline: Duration,
    state: SchedulerState,
    generation: u64,
    /// A pass of the current generation is outstanding
    pending: bool,
    /// Background passes still running, stale ones included
    in_flight: Arc<AtomicUsize>,
    workers: rayon::ThreadPool,
    results_tx: Arc<Mutex<rtrb::Producer<PassResult>>>,
    results_rx: rtrb::Consumer<PassResult>,
    /// Output of synchronous passes
    scratch: Vec<Sample>,
    /// Buffer handed to the next background pass
    spare: Option<Vec<Sample>>,
    stats: SchedulerStats,
}

impl Scheduler {
    pub fn new(
        runner: Arc<dyn PassRunner>,
        mut stretch: Box<dyn TimeStretch>,
        spec: AudioSpec,
    ) -> PipelineResult<Self> {
        let workers = rayon::ThreadPoolBuilder::new()
            .num_threads(1)
            .thread_name(|i| format!("audio-pass-{}", i))
            .build()?;
        let (tx, rx) = rtrb::RingBuffer::new(RESULT_QUEUE_CAPACITY);
        let samples = spec.period_samples();

        stretch.set_time_ratio(1.0);
        stretch.reset();

        log::info!(
            "Scheduler ready: {} frames @ {}Hz, deadline {:.2}ms",
            spec.period,
            spec.sample_rate,
            spec.deadline().as_secs_f64() * 1000.0
        );

        Ok(Self {
            runner,
            stretch,
            spec,
            deadline: spec.deadline(),
            state: SchedulerState::Normal,
            generation: 0,
            pending: false,
            in_flight: Arc::new(AtomicUsize::new(0)),
            workers,
            results_tx: Arc::new(Mutex::new(tx)),
            results_rx: rx,
            scratch: vec![0.0; samples],
            spare: Some(vec![0.0; samples]),
            stats: SchedulerStats::default(),
        })
    }

    /// Scheduler backed by a signalsmith stretch session
    pub fn with_session(
        runner: Arc<dyn PassRunner>,
        spec: AudioSpec,
        high_quality: bool,
    ) -> PipelineResult<Self> {
        let session = TimeStretchSession::new(spec.sample_rate, spec.channels, high_quality);
        Self::new(runner, Box::new(session), spec)
    }

    pub fn spec(&self) -> &AudioSpec {
        &self.spec
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn time_ratio(&self) -> f64 {
        self.stretch.time_ratio()
    }

    pub fn has_pending(&self) -> bool {
        self.pending
    }

    pub fn stats(&self) -> SchedulerStats {
        self.stats
    }

    /// Forget buffered audio and outstanding passes (transport seek/stop)
    pub fn reset(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        self.pending = false;
        self.leave_stretch();
        log::debug!("Scheduler reset (generation {})", self.generation);
    }

    /// Produce exactly one period into `out`
    ///
    /// `out` must hold `period × channels` samples; any other length is
    /// filled with silence.
    pub fn process(&mut self, out: &mut [Sample]) {
        if out.len() != self.spec.period_samples() {
            out.fill(0.0);
            return;
        }
        if self.take_result(out) {
            return;
        }
        match self.state {
            SchedulerState::Normal => self.serve_normal(out),
            SchedulerState::Stretched => self.serve_stretched(out),
        }
    }

    /// Apply a finished background pass; returns true if it filled `out`
    fn take_result(&mut self, out: &mut [Sample]) -> bool {
        while let Ok(result) = self.results_rx.pop() {
            if result.generation != self.generation {
                self.stats.stale_results += 1;
                self.spare = Some(result.samples);
                continue;
            }

            self.pending = false;
            let PassResult { samples, elapsed, .. } = result;
            let served = if elapsed > self.deadline {
                self.stats.overruns += 1;
                self.set_ratio(self.stretch.time_ratio() * OVERLOAD_FACTOR);
                self.stretch.push(&samples);
                false
            } else {
                out.copy_from_slice(&samples);
                self.leave_stretch();
                true
            };
            self.spare = Some(samples);
            return served;
        }
        false
    }

    fn serve_normal(&mut self, out: &mut [Sample]) {
        let Some(elapsed) = self.sync_pass() else {
            out.fill(0.0);
            return;
        };
        if elapsed > self.deadline {
            self.stats.overruns += 1;
            self.set_ratio(self.stretch.time_ratio() * OVERLOAD_FACTOR);
            self.state = SchedulerState::Stretched;
            log::debug!(
                "Pass took {:?} (deadline {:?}), stretching at {:.2}",
                elapsed,
                self.deadline,
                self.stretch.time_ratio()
            );
            self.stretch.push(&self.scratch);
            self.pop_period(out);
            self.launch_if_low();
        } else {
            out.copy_from_slice(&self.scratch);
        }
    }

    fn serve_stretched(&mut self, out: &mut [Sample]) {
        if self.pending {
            self.set_ratio(self.stretch.time_ratio() * PENDING_FACTOR);
        }

        if self.stretch.available() >= self.spec.period {
            self.pop_period(out);
            self.launch_if_low();
            return;
        }

        if self.pending {
            self.pop_period(out);
            return;
        }

        // Underflow with nothing outstanding
        let Some(elapsed) = self.sync_pass() else {
            self.pop_period(out);
            return;
        };
        if elapsed > self.deadline {
            self.stats.overruns += 1;
            self.stretch.reset();
            let ratio = 1.0 + UNDERFLOW_SLOPE * elapsed.as_secs_f64() / self.deadline.as_secs_f64();
            self.set_ratio(ratio);
            self.stretch.push(&self.scratch);
            self.pop_period(out);
            self.launch_if_low();
        } else {
            out.copy_from_slice(&self.scratch);
            self.leave_stretch();
        }
    }

    /// Run a pass on this thread; `None` while a stale pass still holds the graph
    fn sync_pass(&mut self) -> Option<Duration> {
        if self.in_flight.load(Ordering::Acquire) > 0 {
            return None;
        }
        let start = Instant::now();
        self.runner.run_pass(&mut self.scratch);
        self.stats.sync_passes += 1;
        Some(start.elapsed())
    }

    fn pop_period(&mut self, out: &mut [Sample]) {
        let frames = self.stretch.pop(out);
        let written = frames * self.spec.channels as usize;
        if written < out.len() {
            self.stats.underflows += 1;
            out[written..].fill(0.0);
        }
    }

    fn launch_if_low(&mut self) {
        if !self.pending && self.stretch.available() <= self.spec.channels as usize {
            self.launch();
        }
    }

    fn launch(&mut self) {
        if self.in_flight.load(Ordering::Acquire) > 0 {
            return;
        }
        let mut buffer = self.spare.take().unwrap_or_default();
        buffer.resize(self.spec.period_samples(), 0.0);

        let runner = Arc::clone(&self.runner);
        let results = Arc::clone(&self.results_tx);
        let in_flight = Arc::clone(&self.in_flight);
        let generation = self.generation;

        in_flight.fetch_add(1, Ordering::AcqRel);
        self.pending = true;
        self.stats.async_passes += 1;

        self.workers.spawn(move || {
            let start = Instant::now();
            runner.run_pass(&mut buffer);
            let elapsed = start.elapsed();
            in_flight.fetch_sub(1, Ordering::AcqRel);

            let result = PassResult {
                generation,
                samples: buffer,
                elapsed,
            };
            if results.lock().push(result).is_err() {
                log::warn!("Pass result queue full, dropping background pass");
            }
        });
    }

    fn set_ratio(&mut self, ratio: f64) {
        self.stretch.set_time_ratio(ratio.min(MAX_TIME_RATIO));
    }

    fn leave_stretch(&mut self) {
        if self.state == SchedulerState::Stretched {
            log::debug!("Scheduler caught up, back to normal");
        }
        self.stretch.reset();
        self.stretch.set_time_ratio(1.0);
        self.state = SchedulerState::Normal;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::thread;

    const SLOW: Duration = Duration::from_millis(20);

    /// Runner that sleeps for scripted durations and fills a constant
    struct ScriptedRunner {
        delays: parking_lot::Mutex<VecDeque<Duration>>,
        runs: AtomicUsize,
        value: Sample,
    }

    impl ScriptedRunner {
        fn new(delays: &[Duration]) -> Arc<Self> {
            Arc::new(Self {
                delays: parking_lot::Mutex::new(delays.iter().copied().collect()),
                runs: AtomicUsize::new(0),
                value: 0.25,
            })
        }

        fn runs(&self) -> usize {
            self.runs.load(Ordering::SeqCst)
        }
    }

    impl PassRunner for ScriptedRunner {
        fn run_pass(&self, out: &mut [Sample]) {
            let delay = self.delays.lock().pop_front().unwrap_or(Duration::ZERO);
            if !delay.is_zero() {
                thread::sleep(delay);
            }
            out.fill(self.value);
            self.runs.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn spec() -> AudioSpec {
        AudioSpec::new(48000, 2, 256)
    }

    /// Stretch stand-in handing input back unchanged, whatever the ratio
    struct PassThrough {
        queued: VecDeque<Sample>,
        channels: usize,
        ratio: f64,
        pitch: f64,
    }

    impl TimeStretch for PassThrough {
        fn push(&mut self, input: &[Sample]) {
            self.queued.extend(input);
        }

        fn available(&self) -> usize {
            self.queued.len() / self.channels
        }

        fn pop(&mut self, out: &mut [Sample]) -> usize {
            let n = out.len().min(self.queued.len()) / self.channels * self.channels;
            for (dst, src) in out.iter_mut().zip(self.queued.drain(..n)) {
                *dst = src;
            }
            n / self.channels
        }

        fn set_time_ratio(&mut self, ratio: f64) {
            self.ratio = ratio;
        }

        fn time_ratio(&self) -> f64 {
            self.ratio
        }

        fn set_pitch_ratio(&mut self, ratio: f64) {
            self.pitch = ratio;
        }

        fn pitch_ratio(&self) -> f64 {
            self.pitch
        }

        fn reset(&mut self) {
            self.queued.clear();
        }
    }

    fn scheduler(runner: Arc<ScriptedRunner>) -> Scheduler {
        Scheduler::with_session(runner, spec(), false).unwrap()
    }

    /// Scheduler whose stretch engine is empty right after each pop
    fn draining_scheduler(runner: Arc<ScriptedRunner>) -> Scheduler {
        let stretch = PassThrough {
            queued: VecDeque::new(),
            channels: spec().channels as usize,
            ratio: 1.0,
            pitch: 1.0,
        };
        Scheduler::new(runner, Box::new(stretch), spec()).unwrap()
    }

    fn period() -> Vec<Sample> {
        vec![Sample::NAN; spec().period_samples()]
    }

    #[test]
    fn test_fast_passes_stay_normal() {
        let runner = ScriptedRunner::new(&[]);
        let mut scheduler = scheduler(runner.clone());
        for _ in 0..10 {
            let mut out = period();
            scheduler.process(&mut out);
            assert!(out.iter().all(|s| *s == 0.25));
            assert_eq!(scheduler.state(), SchedulerState::Normal);
        }
        assert_eq!(runner.runs(), 10);
        assert_eq!(scheduler.stats().sync_passes, 10);
        assert_eq!(scheduler.time_ratio(), 1.0);
    }

    #[test]
    fn test_overrun_enters_stretched_without_launching() {
        let runner = ScriptedRunner::new(&[SLOW]);
        let mut scheduler = scheduler(runner);
        let mut out = period();
        scheduler.process(&mut out);

        assert_eq!(scheduler.state(), SchedulerState::Stretched);
        assert!((scheduler.time_ratio() - OVERLOAD_FACTOR).abs() < 1e-9);
        // 256 frames at 1.8 give 460, one period popped leaves 204
        assert!(scheduler.stretch.available() > spec().channels as usize);
        assert!(!scheduler.has_pending());
        assert_eq!(scheduler.stats().async_passes, 0);
        assert!(out.iter().all(|s| s.is_finite()));
    }

    #[test]
    fn test_short_stretch_tail_falls_back_to_sync_pass() {
        let runner = ScriptedRunner::new(&[SLOW]);
        let mut scheduler = scheduler(runner.clone());
        let mut out = period();
        scheduler.process(&mut out);

        // Less than a period buffered, nothing outstanding
        let mut out = period();
        scheduler.process(&mut out);
        assert_eq!(scheduler.stats().async_passes, 0);
        assert_eq!(scheduler.stats().sync_passes, 2);
        assert_eq!(scheduler.state(), SchedulerState::Normal);
        assert!(out.iter().all(|s| *s == 0.25));
        assert_eq!(runner.runs(), 2);
    }

    #[test]
    fn test_drained_stretch_launches_background_pass() {
        let runner = ScriptedRunner::new(&[SLOW, Duration::from_millis(200)]);
        let mut scheduler = draining_scheduler(runner);
        let mut out = period();
        scheduler.process(&mut out);

        assert_eq!(scheduler.state(), SchedulerState::Stretched);
        assert_eq!(scheduler.stretch.available(), 0);
        assert!(scheduler.has_pending());
        assert_eq!(scheduler.stats().async_passes, 1);
        assert!(out.iter().all(|s| *s == 0.25));
    }

    #[test]
    fn test_outstanding_pass_keeps_stretching() {
        let runner = ScriptedRunner::new(&[SLOW, Duration::from_millis(200)]);
        let mut scheduler = draining_scheduler(runner);
        let mut out = period();
        scheduler.process(&mut out);
        scheduler.process(&mut out);

        assert!((scheduler.time_ratio() - OVERLOAD_FACTOR * PENDING_FACTOR).abs() < 1e-9);
        // Still just the one background pass
        assert_eq!(scheduler.stats().async_passes, 1);
        assert!(out.iter().all(|s| s.is_finite()));
    }

    #[test]
    fn test_fast_background_result_returns_to_normal() {
        let runner = ScriptedRunner::new(&[SLOW]);
        let mut scheduler = draining_scheduler(runner.clone());
        let mut out = period();
        scheduler.process(&mut out);
        assert!(scheduler.has_pending());

        thread::sleep(Duration::from_millis(100));
        let mut out = period();
        scheduler.process(&mut out);
        assert_eq!(scheduler.state(), SchedulerState::Normal);
        assert!(!scheduler.has_pending());
        assert_eq!(scheduler.time_ratio(), 1.0);
        assert!(out.iter().all(|s| *s == 0.25));
        assert_eq!(runner.runs(), 2);
    }

    #[test]
    fn test_slow_background_result_is_stretched_further() {
        let runner = ScriptedRunner::new(&[SLOW, SLOW]);
        let mut scheduler = draining_scheduler(runner);
        let mut out = period();
        scheduler.process(&mut out);

        thread::sleep(Duration::from_millis(150));
        scheduler.process(&mut out);
        assert_eq!(scheduler.state(), SchedulerState::Stretched);
        assert!(
            (scheduler.time_ratio() - OVERLOAD_FACTOR * OVERLOAD_FACTOR).abs() < 1e-9
        );
        assert!(out.iter().all(|s| s.is_finite()));
    }

    #[test]
    fn test_stale_result_ignored_after_reset() {
        let runner = ScriptedRunner::new(&[SLOW, Duration::from_millis(60)]);
        let mut scheduler = draining_scheduler(runner.clone());
        let mut out = period();
        scheduler.process(&mut out);
        assert!(scheduler.has_pending());

        scheduler.reset();
        assert_eq!(scheduler.state(), SchedulerState::Normal);
        assert!(!scheduler.has_pending());

        // The stale pass still holds the graph: silence instead of blocking
        let mut out = period();
        scheduler.process(&mut out);
        assert!(out.iter().all(|s| *s == 0.0));
        assert_eq!(runner.runs(), 1);

        thread::sleep(Duration::from_millis(200));
        let mut out = period();
        scheduler.process(&mut out);
        assert_eq!(scheduler.stats().stale_results, 1);
        assert_eq!(scheduler.state(), SchedulerState::Normal);
        assert!(out.iter().all(|s| *s == 0.25));
        assert_eq!(runner.runs(), 3);
    }

    #[test]
    fn test_underflow_falls_back_to_sync_pass() {
        let runner = ScriptedRunner::new(&[SLOW]);
        let mut scheduler = scheduler(runner.clone());
        scheduler.state = SchedulerState::Stretched;

        let mut out = period();
        scheduler.process(&mut out);
        assert_eq!(runner.runs(), 1);
        assert_eq!(scheduler.state(), SchedulerState::Stretched);
        // 1 + 1.5 * 20ms / 2.67ms, capped
        assert!(scheduler.time_ratio() > 10.0);
        assert!(scheduler.time_ratio() <= MAX_TIME_RATIO);
        assert!(out.iter().all(|s| s.is_finite()));
    }

    #[test]
    fn test_fast_underflow_pass_returns_to_normal() {
        let runner = ScriptedRunner::new(&[]);
        let mut scheduler = scheduler(runner);
        scheduler.state = SchedulerState::Stretched;

        let mut out = period();
        scheduler.process(&mut out);
        assert_eq!(scheduler.state(), SchedulerState::Normal);
        assert!(out.iter().all(|s| *s == 0.25));
    }

    #[test]
    fn test_every_callback_fills_a_whole_period() {
        let mut delays = Vec::new();
        let mut seed = 7u32;
        for _ in 0..60 {
            seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12345);
            delays.push(if (seed >> 16) % 3 == 0 {
                Duration::from_millis(6)
            } else {
                Duration::ZERO
            });
        }
        let runner = ScriptedRunner::new(&delays);
        let mut scheduler = scheduler(runner);

        for i in 0..60 {
            let mut out = period();
            scheduler.process(&mut out);
            assert_eq!(out.len(), spec().period_samples());
            assert!(out.iter().all(|s| s.is_finite()), "callback {} left gaps", i);
            if i % 7 == 0 {
                thread::sleep(Duration::from_millis(3));
            }
        }
    }

    #[test]
    fn test_wrong_length_output_is_silenced() {
        let mut scheduler = scheduler(ScriptedRunner::new(&[]));
        let mut out = vec![1.0; 10];
        scheduler.process(&mut out);
        assert!(out.iter().all(|s| *s == 0.0));
    }
}
