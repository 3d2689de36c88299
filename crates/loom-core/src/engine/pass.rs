//! Graph pass contract
//!
//! The node graph is evaluated once per audio period (or once per video
//! frame). Each evaluation gets a [`PassContext`] flags bag describing what
//! kind of pass it is, and audio passes additionally get the bus graph and a
//! scratch arena through [`AudioPass`].
//!
//! [`GraphPass`] owns the per-pass state (bus buffers, arena, pass counter,
//! transport position) and is what the scheduler and the waveform manager
//! drive.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::arena::SampleArena;
use super::bus::{AudioBus, BusGraph, MixTarget};
use crate::decode::{AudioDecoder, DecodeRequest, FrameRequest};
use crate::pool::{EvaluationInstant, Namespace};
use crate::types::{AudioSpec, BusId, Sample};

/// Flags bag handed to the graph for one pass
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PassContext {
    pub audio_pass: bool,
    pub waveform_pass: bool,
    /// First pass of a waveform computation
    pub waveform_first_pass: bool,
    pub rendering_pass: bool,
    pub allow_media_decoding: bool,
    pub pass_id: u64,
    /// Composition time in seconds
    pub composition_time: f64,
    pub framerate: f64,
    pub instant: EvaluationInstant,
    pub namespace: Namespace,
}

impl PassContext {
    /// Live audio pass
    pub fn audio(pass_id: u64, composition_time: f64, framerate: f64) -> Self {
        Self {
            audio_pass: true,
            waveform_pass: false,
            waveform_first_pass: false,
            rendering_pass: false,
            allow_media_decoding: true,
            pass_id,
            composition_time,
            framerate,
            instant: EvaluationInstant::LIVE,
            namespace: Namespace::Realtime,
        }
    }

    /// Offline waveform pass, isolated in the waveform namespace
    pub fn waveform(pass_id: u64, composition_time: f64, framerate: f64, first: bool) -> Self {
        Self {
            waveform_pass: true,
            waveform_first_pass: first,
            namespace: Namespace::Waveform,
            ..Self::audio(pass_id, composition_time, framerate)
        }
    }

    /// Video rendering pass
    pub fn render(pass_id: u64, composition_time: f64, framerate: f64) -> Self {
        Self {
            audio_pass: false,
            rendering_pass: true,
            ..Self::audio(pass_id, composition_time, framerate)
        }
    }

    pub fn with_instant(mut self, instant: EvaluationInstant) -> Self {
        self.instant = instant;
        self
    }

    pub fn decode_request(&self) -> DecodeRequest {
        DecodeRequest {
            pass_id: self.pass_id,
            instant: self.instant,
            namespace: self.namespace,
            position: self.composition_time,
            framerate: self.framerate,
        }
    }

    /// Video frame wanted by this pass, including the instant's offset
    pub fn frame_request(&self) -> FrameRequest {
        let frame = self.composition_time * self.framerate + self.instant.offset_frames();
        FrameRequest {
            instant: self.instant,
            namespace: self.namespace,
            target_frame: frame.round() as i64,
            rendering_pass: self.rendering_pass,
        }
    }
}

/// Everything an audio node sees during one pass
pub struct AudioPass<'a> {
    pub context: PassContext,
    pub spec: AudioSpec,
    pub mix: &'a mut dyn MixTarget,
    pub arena: &'a mut SampleArena,
}

/// The part of the node graph that contributes audio
pub trait AudioGraph: Send + Sync {
    fn process(&self, pass: &mut AudioPass<'_>);
}

impl AudioGraph for Vec<Arc<dyn AudioGraph>> {
    fn process(&self, pass: &mut AudioPass<'_>) {
        for node in self {
            node.process(pass);
        }
    }
}

/// Something that can fill one period of output
pub trait PassRunner: Send + Sync + 'static {
    /// Fill `out` (one period, interleaved) with the next live pass
    fn run_pass(&self, out: &mut [Sample]);
}

/// Decoder node exporting its frames into a bus
pub struct DecoderExport {
    decoder: Arc<AudioDecoder>,
    bus: BusId,
    /// f32 bits
    gain: AtomicU32,
}

impl DecoderExport {
    pub fn new(decoder: Arc<AudioDecoder>, bus: BusId) -> Self {
        Self {
            decoder,
            bus,
            gain: AtomicU32::new(1.0f32.to_bits()),
        }
    }

    pub fn decoder(&self) -> &Arc<AudioDecoder> {
        &self.decoder
    }

    pub fn bus(&self) -> BusId {
        self.bus
    }

    pub fn set_gain(&self, gain: f32) {
        self.gain.store(gain.max(0.0).to_bits(), Ordering::Relaxed);
    }

    pub fn gain(&self) -> f32 {
        f32::from_bits(self.gain.load(Ordering::Relaxed))
    }
}

impl AudioGraph for DecoderExport {
    fn process(&self, pass: &mut AudioPass<'_>) {
        let context = &pass.context;
        if !context.audio_pass {
            return;
        }
        let frame = if context.allow_media_decoding {
            self.decoder.decode_samples(&context.decode_request())
        } else {
            self.decoder.cached_frame(context.instant, context.namespace)
        };
        let Some(frame) = frame else {
            return;
        };

        let gain = self.gain();
        if gain == 1.0 {
            pass.mix.accumulate(self.bus, &frame.samples);
            return;
        }
        let Some(scratch) = pass.arena.alloc(frame.samples.len()) else {
            return;
        };
        for (dst, src) in scratch.iter_mut().zip(&frame.samples) {
            *dst = *src * gain;
        }
        pass.mix.accumulate(self.bus, scratch);
    }
}

struct PassState {
    buses: BusGraph,
    arena: SampleArena,
}

/// Runs the graph with its bus buffers, arena and pass counter
pub struct GraphPass {
    graph: Arc<dyn AudioGraph>,
    spec: AudioSpec,
    framerate: f64,
    state: Mutex<PassState>,
    next_pass_id: AtomicU64,
    /// Transport position in seconds (f64 bits)
    position: AtomicU64,
}

impl GraphPass {
    pub fn new(
        graph: Arc<dyn AudioGraph>,
        buses: Vec<AudioBus>,
        spec: AudioSpec,
        arena_bytes: usize,
        framerate: f64,
    ) -> Self {
        Self {
            graph,
            spec,
            framerate,
            state: Mutex::new(PassState {
                buses: BusGraph::new(buses),
                arena: SampleArena::new(arena_bytes),
            }),
            next_pass_id: AtomicU64::new(0),
            position: AtomicU64::new(0.0f64.to_bits()),
        }
    }

    pub fn spec(&self) -> &AudioSpec {
        &self.spec
    }

    pub fn framerate(&self) -> f64 {
        self.framerate
    }

    pub fn set_buses(&self, buses: Vec<AudioBus>) {
        self.state.lock().buses.set_buses(buses);
    }

    pub fn buses(&self) -> Vec<AudioBus> {
        self.state.lock().buses.buses().cloned().collect()
    }

    /// Transport position of the next live pass, in seconds
    pub fn position(&self) -> f64 {
        f64::from_bits(self.position.load(Ordering::Acquire))
    }

    /// Pass id the next live pass will use
    pub fn next_pass_id(&self) -> u64 {
        self.next_pass_id.load(Ordering::Acquire)
    }

    /// Move the transport
    ///
    /// One pass id is skipped so every decoder sees a gap and reseeks.
    pub fn seek(&self, seconds: f64) {
        self.position.store(seconds.max(0.0).to_bits(), Ordering::Release);
        self.next_pass_id.fetch_add(1, Ordering::AcqRel);
    }

    /// Evaluate the graph once with `context`, writing the main bus to `out`
    pub fn run(&self, context: PassContext, out: &mut [Sample]) {
        let mut state = self.state.lock();
        let PassState { buses, arena } = &mut *state;
        buses.begin_pass(&self.spec);
        arena.reset();

        let mut pass = AudioPass {
            context,
            spec: self.spec,
            mix: buses,
            arena,
        };
        self.graph.process(&mut pass);

        buses.resolve_redirects();
        buses.copy_main_to(out);
    }

    /// Next live pass at the transport position, advancing it by one period
    pub fn run_live(&self, out: &mut [Sample]) {
        let pass_id = self.next_pass_id.fetch_add(1, Ordering::AcqRel);
        let time = self.position();
        self.position
            .store((time + self.spec.period_seconds()).to_bits(), Ordering::Release);
        self.run(PassContext::audio(pass_id, time, self.framerate), out);
    }
}

impl PassRunner for GraphPass {
    fn run_pass(&self, out: &mut [Sample]) {
        self.run_live(out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeAudioBackend;

    const MAIN: BusId = BusId(0);
    const A: BusId = BusId(1);

    struct Constant(BusId, f32);

    impl AudioGraph for Constant {
        fn process(&self, pass: &mut AudioPass<'_>) {
            let len = pass.spec.period_samples();
            if let Some(scratch) = pass.arena.alloc(len) {
                scratch.fill(self.1);
                pass.mix.accumulate(self.0, scratch);
            }
        }
    }

    fn spec() -> AudioSpec {
        AudioSpec::new(48000, 2, 256)
    }

    fn buses() -> Vec<AudioBus> {
        vec![AudioBus::main(MAIN, "Main"), AudioBus::new(A, "A").with_redirect(MAIN)]
    }

    fn decoder_node(backend: &FakeAudioBackend) -> Arc<DecoderExport> {
        let decoder = Arc::new(AudioDecoder::new(spec(), Arc::new(backend.clone())));
        decoder.set_asset(Some("/clip.wav".into()), Vec::new());
        Arc::new(DecoderExport::new(decoder, A))
    }

    #[test]
    fn test_decoded_audio_reaches_main_through_redirect() {
        let backend = FakeAudioBackend::new(48000, 2, 48000, 0.5);
        let nodes: Vec<Arc<dyn AudioGraph>> =
            vec![decoder_node(&backend), Arc::new(Constant(MAIN, 0.3))];
        let runner = GraphPass::new(Arc::new(nodes), buses(), spec(), 1 << 16, 25.0);

        let mut out = vec![0.0; spec().period_samples()];
        runner.run_live(&mut out);
        assert!(out.iter().all(|s| (s - 0.8).abs() < 1e-6));
        assert_eq!(runner.next_pass_id(), 1);
        assert!((runner.position() - spec().period_seconds()).abs() < 1e-12);
    }

    #[test]
    fn test_transport_seek_reseeks_decoders_once() {
        let backend = FakeAudioBackend::new(48000, 2, 480000, 0.5);
        let node = decoder_node(&backend);
        let runner = GraphPass::new(node.clone(), buses(), spec(), 1 << 16, 25.0);

        let mut out = vec![0.0; spec().period_samples()];
        runner.run_live(&mut out);
        runner.run_live(&mut out);
        assert_eq!(backend.counters.seeks(), 0);

        runner.seek(2.0);
        runner.run_live(&mut out);
        runner.run_live(&mut out);
        assert_eq!(backend.counters.seeks(), 1);
        assert_eq!(runner.next_pass_id(), 5);
    }

    #[test]
    fn test_gain_uses_arena_and_exhaustion_silences_node() {
        let backend = FakeAudioBackend::new(48000, 2, 48000, 0.5);
        let node = decoder_node(&backend);
        node.set_gain(0.5);

        let runner = GraphPass::new(node.clone(), buses(), spec(), 1 << 16, 25.0);
        let mut out = vec![0.0; spec().period_samples()];
        runner.run_live(&mut out);
        assert!(out.iter().all(|s| (s - 0.25).abs() < 1e-6));

        // Arena too small for one period of scratch
        let starved = GraphPass::new(node, buses(), spec(), 16, 25.0);
        starved.run_live(&mut out);
        assert!(out.iter().all(|s| *s == 0.0));
    }

    #[test]
    fn test_non_decoding_pass_reads_cache() {
        let backend = FakeAudioBackend::new(48000, 2, 48000, 0.5);
        let node = decoder_node(&backend);
        let runner = GraphPass::new(node.clone(), buses(), spec(), 1 << 16, 25.0);

        let mut out = vec![0.0; spec().period_samples()];
        runner.run_live(&mut out);
        let decodes = backend.counters.decodes();

        let mut context = PassContext::audio(0, 0.0, 25.0);
        context.allow_media_decoding = false;
        runner.run(context, &mut out);
        assert_eq!(backend.counters.decodes(), decodes);
        assert!((out[0] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_context_constructors() {
        let wf = PassContext::waveform(3, 1.0, 25.0, true);
        assert!(wf.audio_pass && wf.waveform_pass && wf.waveform_first_pass);
        assert_eq!(wf.namespace, Namespace::Waveform);
        assert_eq!(wf.decode_request().pass_id, 3);

        let render = PassContext::render(0, 2.0, 25.0)
            .with_instant(EvaluationInstant::from_offset(5.0, 1000));
        assert!(!render.audio_pass);
        let request = render.frame_request();
        assert_eq!(request.target_frame, 55);
        assert!(request.rendering_pass);
    }
}
