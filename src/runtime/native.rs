use crate::audio::{render_buffer, Recording};
use crate::error::{check_range, Error, Fault, Result};
use crate::synth::algorithm::{Algorithm, AlgorithmSlot, CycleDirection};
use crate::synth::command::Command;
use crate::synth::config::SynthConfig;
use crate::synth::effect::EffectParam;
use crate::synth::envelope::Segment;
use crate::synth::mixer::{
    Frame, MixerParam, PanLaw, RecordingBuffer, MAX_SPARE_CHUNKS, PAN_RANGE,
};
use crate::synth::modulation::ModUnitId;
use crate::synth::note::{NoteEvent, NoteSource};
use crate::synth::operator::{ModParam, OperatorId, MAX_RATIO, MAX_SEMITONE_OFFSET};
use crate::synth::waveform::Waveform;
use crate::synth::wavetable::WavetableDb;
use crate::synth::Synth;
use ringbuf::{traits::*, HeapCons, HeapProd, HeapRb};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Slots in the queue carrying recording memory back to the control side.
const RETURN_QUEUE_CAPACITY: usize = 16;

/// Counters shared between the audio callback and the control side.
#[derive(Debug, Default)]
pub struct EngineStats {
    buffers: AtomicU64,
    faults: AtomicU64,
    busy: AtomicU64,
    rejected_commands: AtomicU64,
    dropped_notes: AtomicU64,
    dropped_frames: AtomicU64,
}

impl EngineStats {
    pub(crate) fn record_fault(&self, fault: Fault) {
        match fault {
            Fault::NonFiniteSample => self.faults.fetch_add(1, Ordering::Relaxed),
            Fault::EngineBusy => self.busy.fetch_add(1, Ordering::Relaxed),
        };
    }

    fn record_rejected(&self) {
        self.rejected_commands.fetch_add(1, Ordering::Relaxed);
    }

    pub fn buffers(&self) -> u64 {
        self.buffers.load(Ordering::Relaxed)
    }

    /// Buffers cut short by a non-finite sample.
    pub fn faults(&self) -> u64 {
        self.faults.load(Ordering::Relaxed)
    }

    /// Buffers filled with silence because the engine was locked elsewhere.
    pub fn busy(&self) -> u64 {
        self.busy.load(Ordering::Relaxed)
    }

    pub fn rejected_commands(&self) -> u64 {
        self.rejected_commands.load(Ordering::Relaxed)
    }

    pub fn dropped_notes(&self) -> u64 {
        self.dropped_notes.load(Ordering::Relaxed)
    }

    /// Frames lost in the current take because no spare chunk was ready.
    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames.load(Ordering::Relaxed)
    }
}

/// Audio-thread side of the engine.
pub struct NativeSynth {
    synth: Synth,
    notes: HeapCons<NoteEvent>,
    commands: HeapCons<Command>,
    returned: HeapProd<RecordingBuffer>,
    stats: Arc<EngineStats>,
}

impl NativeSynth {
    /// Fills one interleaved device buffer. Queued notes and commands are
    /// applied first, so nothing changes in the middle of a buffer.
    pub fn process(&mut self, output: &mut [f32], channels: usize) {
        self.process_note_events();
        self.process_commands();

        if let Err(fault) = render_buffer(&mut self.synth, output, channels) {
            self.stats.record_fault(fault);
        }
        self.collect_chunks();
        self.stats.buffers.fetch_add(1, Ordering::Relaxed);
        self.stats
            .dropped_frames
            .store(self.synth.mixer().dropped_frames(), Ordering::Relaxed);
    }

    fn process_note_events(&mut self) {
        while let Some(event) = self.notes.try_pop() {
            if self.synth.handle_note(&event).is_err() {
                self.stats.record_rejected();
            }
        }
    }

    /// A command hands back at most one buffer, so one is only applied while
    /// the return queue has room. The rest wait in their queue for a later
    /// buffer, which keeps recording memory off this thread's allocator.
    fn process_commands(&mut self) {
        while self.collect_chunks() && self.returned.vacant_len() > 0 {
            let Some(command) = self.commands.try_pop() else {
                break;
            };
            match self.synth.apply(command) {
                Ok(Some(buffer)) => self.hand_back(buffer),
                Ok(None) => {}
                Err(_) => self.stats.record_rejected(),
            }
        }
    }

    /// Moves filled recording chunks onto the return queue, oldest first.
    /// Returns `true` once none are left behind.
    fn collect_chunks(&mut self) -> bool {
        while self.returned.vacant_len() > 0 {
            match self.synth.pop_recording_chunk() {
                Some(chunk) => self.hand_back(RecordingBuffer::Chunk(chunk)),
                None => return true,
            }
        }
        false
    }

    fn hand_back(&mut self, buffer: RecordingBuffer) {
        // callers check for room and this is the only producer
        let pushed = self.returned.try_push(buffer);
        debug_assert!(pushed.is_ok());
    }

    pub fn synth(&self) -> &Synth {
        &self.synth
    }

    pub fn synth_mut(&mut self) -> &mut Synth {
        &mut self.synth
    }

    pub fn stats(&self) -> &Arc<EngineStats> {
        &self.stats
    }
}

/// Producer end of the note queue, owned by one input thread.
pub struct NoteSender {
    producer: HeapProd<NoteEvent>,
    stats: Arc<EngineStats>,
}

impl NoteSender {
    /// Returns `false` and counts the event when the queue is full.
    #[inline]
    pub fn send(&mut self, event: NoteEvent) -> bool {
        if self.producer.try_push(event).is_ok() {
            true
        } else {
            self.stats.dropped_notes.fetch_add(1, Ordering::Relaxed);
            false
        }
    }
}

/// Control side of the engine. Every setter validates before anything is
/// queued, so a rejected call never reaches the audio thread.
pub struct SynthHandle {
    commands: HeapProd<Command>,
    returned: HeapCons<RecordingBuffer>,
    slot: AlgorithmSlot,
    db: Arc<WavetableDb>,
    stats: Arc<EngineStats>,
    sample_rate: u32,
    chunk_frames: usize,
    recording: bool,
    /// Frames of the take in progress, joined from returned chunks.
    pending: Vec<Frame>,
}

impl SynthHandle {
    fn send(&mut self, command: Command) -> Result<()> {
        let name = command.name();
        self.commands.try_push(command).map_err(|_| {
            tracing::warn!(command = name, "Command queue full, dropping command");
            Error::QueueFull
        })
    }

    pub fn note_on(&mut self, note: u8, velocity: u8) -> Result<()> {
        let event = NoteEvent::new(note, velocity, true, NoteSource::Keyboard)?;
        self.send(Command::Note(event))
    }

    pub fn note_off(&mut self, note: u8) -> Result<()> {
        let event = NoteEvent::new(note, 0, false, NoteSource::Keyboard)?;
        self.send(Command::Note(event))
    }

    pub fn set_algorithm(&mut self, index: u8) -> Result<Algorithm> {
        let algorithm = self.slot.publish(index).inspect_err(|e| {
            tracing::warn!(index, error = %e, "Rejected algorithm change");
        })?;
        tracing::info!(algorithm = %algorithm, index, "Algorithm changed");
        Ok(algorithm)
    }

    pub fn cycle_algorithm(&mut self, direction: CycleDirection) -> Algorithm {
        let algorithm = self.slot.load().cycle(direction);
        self.slot.store(algorithm);
        tracing::info!(algorithm = %algorithm, index = algorithm.index(), "Algorithm changed");
        algorithm
    }

    pub fn algorithm(&self) -> Algorithm {
        self.slot.load()
    }

    /// Resolves `name` here so the audio thread only swaps a pointer.
    pub fn set_wavetable(&mut self, op: OperatorId, name: &str) -> Result<()> {
        let table = self.db.lookup(name).inspect_err(|e| {
            tracing::warn!(operator = %op, error = %e, "Rejected wavetable change");
        })?;
        self.send(Command::SetWavetable { op, table })
    }

    pub fn set_active(&mut self, op: OperatorId, active: bool) -> Result<()> {
        self.send(Command::SetActive { op, active })
    }

    pub fn set_silent(&mut self, op: OperatorId) -> Result<()> {
        self.send(Command::SetSilent(op))
    }

    pub fn set_level(&mut self, op: OperatorId, level: f64) -> Result<()> {
        let level = check_range("level", level, 0.0, 1.0)?;
        self.send(Command::SetLevel { op, level })
    }

    pub fn set_ratio(&mut self, op: OperatorId, ratio: f64) -> Result<()> {
        let ratio = check_range("ratio", ratio, 0.0, MAX_RATIO)?;
        self.send(Command::SetRatio { op, ratio })
    }

    pub fn set_frequency_offset(&mut self, op: OperatorId, hz: f64) -> Result<()> {
        let nyquist = self.sample_rate as f64 / 2.0;
        let hz = check_range("frequency offset", hz, -nyquist, nyquist)?;
        self.send(Command::SetFrequencyOffset { op, hz })
    }

    pub fn set_semitone_offset(&mut self, op: OperatorId, semitones: f64) -> Result<()> {
        let semitones = check_range(
            "semitone offset",
            semitones,
            -MAX_SEMITONE_OFFSET,
            MAX_SEMITONE_OFFSET,
        )?;
        self.send(Command::SetSemitoneOffset { op, semitones })
    }

    pub fn set_phase_offset(&mut self, op: OperatorId, degrees: f64) -> Result<()> {
        if !degrees.is_finite() {
            return Err(Error::out_of_range("phase offset", degrees, 0.0, 360.0));
        }
        self.send(Command::SetPhaseOffset { op, degrees })
    }

    pub fn attach_mod(
        &mut self,
        op: OperatorId,
        param: ModParam,
        unit: ModUnitId,
        depth: f64,
    ) -> Result<()> {
        let depth = check_range("mod depth", depth, -1.0, 1.0)?;
        self.send(Command::AttachMod {
            op,
            param,
            unit,
            depth,
        })
    }

    pub fn detach_mod(&mut self, op: OperatorId, param: ModParam, slot: usize) -> Result<()> {
        self.send(Command::DetachMod { op, param, slot })
    }

    pub fn set_mod_depth(
        &mut self,
        op: OperatorId,
        param: ModParam,
        slot: usize,
        depth: f64,
    ) -> Result<()> {
        let depth = check_range("mod depth", depth, -1.0, 1.0)?;
        self.send(Command::SetModDepth {
            op,
            param,
            slot,
            depth,
        })
    }

    pub fn set_envelope_segment(
        &mut self,
        unit: ModUnitId,
        index: usize,
        level: f64,
        seconds: f64,
    ) -> Result<()> {
        let level = check_range("segment level", level, 0.0, 1.0)?;
        let seconds = check_range("segment length", seconds, 0.0, f64::MAX)?;
        let length = (seconds * self.sample_rate as f64).round() as u64;
        self.send(Command::SetEnvelopeSegment {
            unit,
            index,
            segment: Segment::new(level, length),
        })
    }

    pub fn set_sustain_enabled(&mut self, unit: ModUnitId, enabled: bool) -> Result<()> {
        self.send(Command::SetSustainEnabled { unit, enabled })
    }

    pub fn set_lfo_frequency(&mut self, unit: ModUnitId, hz: f64) -> Result<()> {
        let hz = check_range("lfo frequency", hz, 0.0, self.sample_rate as f64 / 2.0)?;
        self.send(Command::SetLfoFrequency { unit, hz })
    }

    pub fn set_lfo_amplitude(&mut self, unit: ModUnitId, amplitude: f64) -> Result<()> {
        let amplitude = check_range("lfo amplitude", amplitude, 0.0, 1.0)?;
        self.send(Command::SetLfoAmplitude { unit, amplitude })
    }

    pub fn set_lfo_waveform(&mut self, unit: ModUnitId, waveform: Waveform) -> Result<()> {
        self.send(Command::SetLfoWaveform { unit, waveform })
    }

    pub fn set_lfo_retrigger(&mut self, unit: ModUnitId, retrigger: bool) -> Result<()> {
        self.send(Command::SetLfoRetrigger { unit, retrigger })
    }

    pub fn set_macro_value(&mut self, unit: ModUnitId, value: f64) -> Result<()> {
        let value = check_range("macro value", value, -1.0, 1.0)?;
        self.send(Command::SetMacroValue { unit, value })
    }

    pub fn set_master_amp(&mut self, amp: f64) -> Result<()> {
        let amp = check_range("master amp", amp, 0.0, 1.0)?;
        self.send(Command::SetMasterAmp(amp))
    }

    pub fn set_pan(&mut self, pan: f64) -> Result<()> {
        let pan = check_range("pan", pan, -PAN_RANGE, PAN_RANGE)?;
        self.send(Command::SetPan(pan))
    }

    pub fn set_pan_law(&mut self, law: PanLaw) -> Result<()> {
        self.send(Command::SetPanLaw(law))
    }

    pub fn attach_mixer_mod(
        &mut self,
        param: MixerParam,
        unit: ModUnitId,
        depth: f64,
    ) -> Result<()> {
        let depth = check_range("mod depth", depth, -1.0, 1.0)?;
        self.send(Command::AttachMixerMod { param, unit, depth })
    }

    pub fn detach_mixer_mod(&mut self, param: MixerParam, slot: usize) -> Result<()> {
        self.send(Command::DetachMixerMod { param, slot })
    }

    pub fn set_mixer_mod_depth(&mut self, param: MixerParam, slot: usize, depth: f64) -> Result<()> {
        let depth = check_range("mod depth", depth, -1.0, 1.0)?;
        self.send(Command::SetMixerModDepth { param, slot, depth })
    }

    pub fn set_bus_gain(&mut self, bus: usize, gain: f64) -> Result<()> {
        let gain = check_range("bus gain", gain, 0.0, 2.0)?;
        self.send(Command::SetBusGain { bus, gain })
    }

    pub fn set_effect_active(&mut self, bus: usize, slot: usize, active: bool) -> Result<()> {
        self.send(Command::SetEffectActive { bus, slot, active })
    }

    pub fn set_effect_param(&mut self, bus: usize, slot: usize, param: EffectParam) -> Result<()> {
        let param = param.validate(self.sample_rate as f64)?;
        self.send(Command::SetEffectParam { bus, slot, param })
    }

    fn allocate_chunk(&self) -> Result<Vec<Frame>> {
        let mut chunk = Vec::new();
        chunk.try_reserve_exact(self.chunk_frames)?;
        Ok(chunk)
    }

    /// Allocates the first chunk and a set of spares here and ships them to
    /// the engine. Poll `take_recording()` while recording so filled chunks
    /// are recycled as new spares.
    pub fn start_recording(&mut self) -> Result<()> {
        if self.recording {
            return Err(Error::AlreadyRecording);
        }
        let first = self.allocate_chunk()?;
        let spares = (0..MAX_SPARE_CHUNKS)
            .map(|_| self.allocate_chunk())
            .collect::<Result<Vec<_>>>()?;

        self.send(Command::StartRecording(first))?;
        self.recording = true;
        for chunk in spares {
            self.send(Command::AddRecordingChunk(chunk))?;
        }
        tracing::info!(chunk_frames = self.chunk_frames, "Recording started");
        Ok(())
    }

    pub fn pause_recording(&mut self) -> Result<()> {
        self.send(Command::PauseRecording)
    }

    /// Asks the engine to stop; collect the take with `take_recording()`.
    pub fn save_recording(&mut self) -> Result<()> {
        self.send(Command::SaveRecording)?;
        self.recording = false;
        Ok(())
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    /// Collects returned recording memory and yields the next finished take,
    /// if any. Filled chunks are joined onto the take in progress and, while
    /// recording, sent back as spares. Unneeded memory is dropped here, off
    /// the audio thread.
    pub fn take_recording(&mut self) -> Option<Recording> {
        while let Some(buffer) = self.returned.try_pop() {
            match buffer {
                RecordingBuffer::Chunk(mut frames) => {
                    self.pending.extend_from_slice(&frames);
                    if self.recording {
                        frames.clear();
                        if let Err(e) = self.send(Command::AddRecordingChunk(frames)) {
                            tracing::warn!(error = %e, "Recording chunk not recycled");
                        }
                    }
                }
                RecordingBuffer::Take(frames) => {
                    self.pending.extend_from_slice(&frames);
                    let frames = std::mem::take(&mut self.pending);
                    if !frames.is_empty() {
                        return Some(Recording::new(frames, self.sample_rate));
                    }
                }
                RecordingBuffer::Spare(_) => {}
            }
        }
        None
    }

    pub fn wavetables(&self) -> &WavetableDb {
        &self.db
    }

    pub fn stats(&self) -> &Arc<EngineStats> {
        &self.stats
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

/// Builds the engine and the three ends that talk to it: the audio-side
/// engine, the control handle, and the note queue producer for MIDI input.
pub fn build(config: &SynthConfig, db: WavetableDb) -> Result<(NativeSynth, SynthHandle, NoteSender)> {
    config.validate()?;
    let slot = AlgorithmSlot::new(Algorithm::new(config.algorithm)?);
    let synth = Synth::new(config, &db, slot.clone())?;
    let stats = Arc::new(EngineStats::default());

    let (note_producer, note_consumer) = HeapRb::<NoteEvent>::new(config.note_queue_capacity).split();
    let (command_producer, command_consumer) =
        HeapRb::<Command>::new(config.command_queue_capacity).split();
    let (return_producer, return_consumer) =
        HeapRb::<RecordingBuffer>::new(RETURN_QUEUE_CAPACITY).split();

    let engine = NativeSynth {
        synth,
        notes: note_consumer,
        commands: command_consumer,
        returned: return_producer,
        stats: Arc::clone(&stats),
    };
    let handle = SynthHandle {
        commands: command_producer,
        returned: return_consumer,
        slot,
        db: Arc::new(db),
        stats: Arc::clone(&stats),
        sample_rate: config.sample_rate,
        chunk_frames: config.recording_chunk_frames(),
        recording: false,
        pending: Vec::new(),
    };
    let notes = NoteSender {
        producer: note_producer,
        stats,
    };
    tracing::debug!(
        sample_rate = config.sample_rate,
        algorithm = config.algorithm,
        "Engine built"
    );
    Ok((engine, handle, notes))
}

#[cfg(feature = "native")]
pub use self::demo::start;

#[cfg(feature = "native")]
mod demo {
    use super::{build, SynthHandle};
    use crate::audio::{AudioBackend, CpalBackend};
    use crate::error::Result;
    use crate::input::{KeyboardHandler, MidiHandler};
    use crate::synth::config::SynthConfig;
    use crate::synth::wavetable::WavetableDb;
    use parking_lot::Mutex;
    use std::io::{stdin, stdout, Write};
    use std::sync::Arc;
    use std::time::Duration;

    /// Runs the engine on the default output device with computer-keyboard and
    /// MIDI input until Escape is pressed.
    pub fn start(config: SynthConfig) -> Result<()> {
        let db = WavetableDb::with_standard_tables(config.wavetable_length)?;
        let (engine, mut handle, notes) = build(&config, db)?;
        let engine = Arc::new(Mutex::new(engine));

        let mut audio_backend = CpalBackend::new(Arc::clone(&engine), config.sample_rate);
        audio_backend.open(None, config.channels, config.frames)?;
        audio_backend.start()?;

        let mut midi_handler = MidiHandler::new(notes);
        if let Err(e) = open_midi(&mut midi_handler) {
            tracing::warn!(error = %e, "MIDI input disabled");
        }

        let mut keyboard_handler = KeyboardHandler::new();
        let mut takes = 0;
        while keyboard_handler.update(&mut handle) {
            save_takes(&mut handle, &mut takes);
            std::thread::sleep(Duration::from_millis(10));
        }

        audio_backend.stop()?;
        audio_backend.close();
        midi_handler.close();
        save_takes(&mut handle, &mut takes);
        let stats = handle.stats();
        tracing::info!(
            buffers = stats.buffers(),
            faults = stats.faults(),
            busy = stats.busy(),
            rejected = stats.rejected_commands(),
            "Engine stopped"
        );
        Ok(())
    }

    fn open_midi(midi_handler: &mut MidiHandler) -> Result<()> {
        let ports = midi_handler.ports()?;
        if ports.is_empty() {
            tracing::info!("No MIDI input ports found");
            return Ok(());
        }

        println!("Available MIDI input ports:");
        for (i, name) in ports.iter().enumerate() {
            println!("{}: {}", i, name);
        }
        print!("Select MIDI input port: ");
        stdout().flush()?;
        let mut input = String::new();
        stdin().read_line(&mut input)?;
        let selection = input.trim().parse::<usize>().unwrap_or(0);
        midi_handler.open(selection)
    }

    fn save_takes(handle: &mut SynthHandle, takes: &mut usize) {
        while let Some(recording) = handle.take_recording() {
            *takes += 1;
            let path = format!("take-{:03}.wav", takes);
            if let Err(e) = recording.write_wav(&path) {
                tracing::error!(path = %path, error = %e, "Failed to write recording");
            }
        }
    }
}
