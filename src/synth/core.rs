use super::algorithm::{Algorithm, AlgorithmSlot, FmRouter};
use super::command::Command;
use super::config::SynthConfig;
use super::delayline::Echo;
use super::effect::Effect;
use super::filter::Biquad;
use super::envelope::Envelope;
use super::mixer::{Frame, Mixer, RecordingBuffer};
use super::modulation::ModBank;
use super::note::{velocity_to_scale, NoteEvent, MAX_NOTE};
use super::operator::{Operator, OperatorId};
use super::wavetable::WavetableDb;
use crate::error::{Error, Fault, Result};
use std::sync::Arc;

/// Notes remembered for last-note priority.
pub const NOTE_STACK_CAPACITY: usize = 16;

/// Wavetable every operator starts on.
pub const DEFAULT_WAVETABLE: &str = "sine";

/// Default effect chain on bus 0, every slot bypassed.
pub const FILTER_SLOT: usize = 0;
pub const ECHO_SLOT: usize = 1;
const FILTER_CUTOFF: f64 = 4000.0;
const ECHO_CAPACITY: f64 = 1.0;
const ECHO_LENGTH: f64 = 0.3;

/// Held keys, most recent last. When full the oldest key is forgotten.
#[derive(Debug, Clone, Default)]
struct NoteStack {
    notes: [u8; NOTE_STACK_CAPACITY],
    len: usize,
}

impl NoteStack {
    fn push(&mut self, note: u8) {
        self.remove(note);
        if self.len == NOTE_STACK_CAPACITY {
            self.notes.copy_within(1.., 0);
            self.len -= 1;
        }
        self.notes[self.len] = note;
        self.len += 1;
    }

    fn remove(&mut self, note: u8) -> bool {
        match self.notes[..self.len].iter().position(|&n| n == note) {
            Some(index) => {
                self.notes.copy_within(index + 1..self.len, index);
                self.len -= 1;
                true
            }
            None => false,
        }
    }

    fn top(&self) -> Option<u8> {
        self.len.checked_sub(1).map(|i| self.notes[i])
    }

    fn as_slice(&self) -> &[u8] {
        &self.notes[..self.len]
    }

    fn clear(&mut self) {
        self.len = 0;
    }
}

/// The monophonic FM voice: operators, modulation, routing, master envelope
/// and mixer, advanced one frame per `tick()`.
pub struct Synth {
    operators: [Operator; 4],
    mods: ModBank,
    router: FmRouter,
    envelope: Envelope,
    velocity_sensitive: bool,
    velocity_curve: f64,
    velocity_scale: f64,
    mixer: Mixer,
    held: NoteStack,
    sample_rate: f64,
}

impl Synth {
    /// Builds the engine. `slot` is shared with whoever switches algorithms.
    pub fn new(config: &SynthConfig, db: &WavetableDb, slot: AlgorithmSlot) -> Result<Self> {
        config.validate()?;
        let sample_rate = config.sample_rate_f64();
        let table = db.lookup(DEFAULT_WAVETABLE)?;
        let operators = OperatorId::ALL.map(|id| Operator::new(id, Arc::clone(&table), sample_rate));

        let mut mixer = Mixer::new();
        mixer.set_master_amp(config.master_amp)?;
        let bus = mixer.bus_mut(0)?;
        for mut effect in [
            Effect::from(Biquad::low_pass(FILTER_CUTOFF, sample_rate)),
            Effect::from(Echo::new(ECHO_CAPACITY, ECHO_LENGTH, sample_rate)?),
        ] {
            effect.set_active(false);
            bus.push_effect(effect);
        }

        Ok(Self {
            operators,
            mods: ModBank::standard(sample_rate),
            router: FmRouter::new(slot),
            envelope: Envelope::adsr(
                config.attack,
                config.decay,
                config.sustain,
                config.release,
                sample_rate,
            )?,
            velocity_sensitive: config.velocity_sensitive,
            velocity_curve: config.velocity_curve,
            velocity_scale: 1.0,
            mixer,
            held: NoteStack::default(),
            sample_rate,
        })
    }

    /// Standalone engine with its own algorithm slot.
    pub fn from_config(config: &SynthConfig, db: &WavetableDb) -> Result<Self> {
        let algorithm = Algorithm::new(config.algorithm)?;
        Self::new(config, db, AlgorithmSlot::new(algorithm))
    }

    pub fn handle_note(&mut self, event: &NoteEvent) -> Result<()> {
        if event.is_on {
            self.note_on(event)
        } else {
            self.note_off(event.note_number);
            Ok(())
        }
    }

    /// Retunes every operator and retriggers all envelopes. Phase is kept so
    /// overlapping notes glide without a click.
    pub fn note_on(&mut self, event: &NoteEvent) -> Result<()> {
        if event.note_number > MAX_NOTE {
            return Err(Error::InvalidNote(event.note_number));
        }
        self.retune(event.note_number)?;
        self.held.push(event.note_number);
        self.velocity_scale =
            velocity_to_scale(event.velocity, self.velocity_sensitive, self.velocity_curve);
        self.mods.note_on();
        self.envelope.note_on();
        Ok(())
    }

    /// Falls back to the previous held key, or releases when none is left.
    /// Releasing a key that is not held is ignored.
    pub fn note_off(&mut self, note: u8) {
        let was_top = self.held.top() == Some(note);
        if !self.held.remove(note) {
            return;
        }
        match self.held.top() {
            Some(previous) if was_top => {
                // previous came through note_on, so it is a valid note
                let _ = self.retune(previous);
            }
            Some(_) => {}
            None => {
                self.mods.note_off();
                self.envelope.note_off();
            }
        }
    }

    fn retune(&mut self, note: u8) -> Result<()> {
        for op in self.operators.iter_mut() {
            op.set_note(note)?;
        }
        Ok(())
    }

    /// Produces one frame.
    #[inline]
    pub fn tick(&mut self) -> std::result::Result<Frame, Fault> {
        let values = self.mods.tick();
        let raw = self.router.tick(&mut self.operators, values);
        let sample = raw * self.envelope.update() * self.velocity_scale;
        if !sample.is_finite() {
            return Err(Fault::NonFiniteSample);
        }
        let frame = self.mixer.process(sample, values);
        if frame.is_finite() {
            Ok(frame)
        } else {
            Err(Fault::NonFiniteSample)
        }
    }

    /// Clears oscillator and effect state after a real-time fault.
    pub fn recover(&mut self) {
        self.operators.iter_mut().for_each(Operator::reset_phase);
        self.mixer.reset();
    }

    /// Silences everything and forgets held keys.
    pub fn reset(&mut self) {
        self.recover();
        self.held.clear();
        self.mods.reset();
        self.envelope.reset();
    }

    /// Applies one control command. A returned buffer (the end of a take, or
    /// recording memory no longer needed) must be disposed of off the audio
    /// thread. Filled chunks are collected separately through
    /// `pop_recording_chunk`, and must be before a `SaveRecording` is applied.
    pub fn apply(&mut self, command: Command) -> Result<Option<RecordingBuffer>> {
        match command {
            Command::Note(event) => self.handle_note(&event)?,
            Command::SetWavetable { op, table } => self.operator_mut(op).set_table(table),
            Command::SetActive { op, active } => self.operator_mut(op).set_active(active),
            Command::SetSilent(op) => self.operator_mut(op).set_silent(),
            Command::SetLevel { op, level } => self.operator_mut(op).set_level(level)?,
            Command::SetRatio { op, ratio } => self.operator_mut(op).set_ratio(ratio)?,
            Command::SetFrequencyOffset { op, hz } => {
                self.operator_mut(op).set_frequency_offset(hz)?
            }
            Command::SetSemitoneOffset { op, semitones } => {
                self.operator_mut(op).set_semitone_offset(semitones)?
            }
            Command::SetPhaseOffset { op, degrees } => {
                self.operator_mut(op).set_phase_offset(degrees)?
            }
            Command::AttachMod {
                op,
                param,
                unit,
                depth,
            } => {
                self.mods.get(unit)?;
                self.operator_mut(op).attach_mod(param, unit, depth)?;
            }
            Command::DetachMod { op, param, slot } => {
                self.operator_mut(op).detach_mod(param, slot)?;
            }
            Command::SetModDepth {
                op,
                param,
                slot,
                depth,
            } => self.operator_mut(op).set_mod_unit_depth(param, slot, depth)?,
            Command::SetEnvelopeSegment {
                unit,
                index,
                segment,
            } => self
                .mods
                .envelope_mut(unit)?
                .set_segment(index, segment.level, segment.length)?,
            Command::SetSustainEnabled { unit, enabled } => {
                self.mods.envelope_mut(unit)?.set_sustain_enabled(enabled)
            }
            Command::SetLfoFrequency { unit, hz } => self.mods.lfo_mut(unit)?.set_frequency(hz)?,
            Command::SetLfoAmplitude { unit, amplitude } => {
                self.mods.lfo_mut(unit)?.set_amplitude(amplitude)?
            }
            Command::SetLfoWaveform { unit, waveform } => {
                self.mods.lfo_mut(unit)?.set_waveform(waveform)
            }
            Command::SetLfoRetrigger { unit, retrigger } => {
                self.mods.lfo_mut(unit)?.set_retrigger(retrigger)
            }
            Command::SetMacroValue { unit, value } => self.mods.macro_mut(unit)?.set_value(value)?,
            Command::SetMasterAmp(amp) => self.mixer.set_master_amp(amp)?,
            Command::SetPan(pan) => self.mixer.set_pan(pan)?,
            Command::SetPanLaw(law) => self.mixer.set_pan_law(law),
            Command::AttachMixerMod { param, unit, depth } => {
                self.mods.get(unit)?;
                self.mixer.attach_mod(param, unit, depth)?;
            }
            Command::DetachMixerMod { param, slot } => {
                self.mixer.detach_mod(param, slot)?;
            }
            Command::SetMixerModDepth { param, slot, depth } => {
                self.mixer.set_mod_unit_depth(param, slot, depth)?
            }
            Command::SetBusGain { bus, gain } => self.mixer.bus_mut(bus)?.set_gain(gain)?,
            Command::SetEffectActive { bus, slot, active } => {
                self.mixer.effect_mut(bus, slot)?.set_active(active)
            }
            Command::SetEffectParam { bus, slot, param } => {
                self.mixer.effect_mut(bus, slot)?.set_param(param)?
            }
            Command::StartRecording(chunk) => {
                return Ok(self
                    .mixer
                    .start_recording_into(chunk)
                    .map(RecordingBuffer::Spare))
            }
            Command::AddRecordingChunk(chunk) => {
                return Ok(self
                    .mixer
                    .add_recording_chunk(chunk)
                    .map(RecordingBuffer::Spare))
            }
            Command::PauseRecording => self.mixer.pause_recording(),
            Command::SaveRecording => {
                return Ok(Some(RecordingBuffer::Take(self.mixer.save_recording())))
            }
        }
        Ok(None)
    }

    /// Oldest filled recording chunk, handed over for collection.
    pub fn pop_recording_chunk(&mut self) -> Option<Vec<Frame>> {
        self.mixer.pop_recording_chunk()
    }

    pub fn operator(&self, id: OperatorId) -> &Operator {
        &self.operators[id.index()]
    }

    pub fn operator_mut(&mut self, id: OperatorId) -> &mut Operator {
        &mut self.operators[id.index()]
    }

    pub fn operators(&self) -> &[Operator; 4] {
        &self.operators
    }

    pub fn mods(&self) -> &ModBank {
        &self.mods
    }

    pub fn mods_mut(&mut self) -> &mut ModBank {
        &mut self.mods
    }

    pub fn mixer(&self) -> &Mixer {
        &self.mixer
    }

    pub fn mixer_mut(&mut self) -> &mut Mixer {
        &mut self.mixer
    }

    pub fn envelope_mut(&mut self) -> &mut Envelope {
        &mut self.envelope
    }

    pub fn algorithm(&self) -> Algorithm {
        self.router.algorithm()
    }

    pub fn algorithm_slot(&self) -> &AlgorithmSlot {
        self.router.slot()
    }

    pub fn held_notes(&self) -> &[u8] {
        self.held.as_slice()
    }

    /// Whether the master envelope is still sounding.
    pub fn is_sounding(&self) -> bool {
        self.envelope.is_active()
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synth::effect::EffectParam;
    use crate::synth::envelope::EnvelopeState;
    use crate::synth::filter::FilterMode;
    use crate::synth::mixer::MixerParam;
    use crate::synth::modulation::ModUnitId;
    use crate::synth::note::NoteSource;
    use crate::synth::waveform::Waveform;

    fn synth() -> Synth {
        let config = SynthConfig::default();
        let db = WavetableDb::with_standard_tables(1024).unwrap();
        Synth::from_config(&config, &db).unwrap()
    }

    fn on(note: u8) -> NoteEvent {
        NoteEvent::new(note, 100, true, NoteSource::Keyboard).unwrap()
    }

    #[test]
    fn silent_until_a_note_arrives() {
        let mut synth = synth();
        for _ in 0..64 {
            assert_eq!(synth.tick().unwrap(), Frame::ZERO);
        }
    }

    #[test]
    fn note_produces_sound_and_release_ends_it() {
        let mut synth = synth();
        synth.note_on(&on(69)).unwrap();
        let peak = (0..4410)
            .map(|_| synth.tick().unwrap().left.abs())
            .fold(0.0, f64::max);
        assert!(peak > 0.01);

        synth.note_off(69);
        // release is 0.3 s
        for _ in 0..(44100 / 2) {
            synth.tick().unwrap();
        }
        assert!(!synth.is_sounding());
        assert_eq!(synth.tick().unwrap(), Frame::ZERO);
    }

    #[test]
    fn last_note_priority() {
        let mut synth = synth();
        synth.note_on(&on(60)).unwrap();
        synth.note_on(&on(64)).unwrap();
        synth.note_on(&on(67)).unwrap();
        synth.tick().unwrap();
        assert_eq!(synth.held_notes(), &[60, 64, 67]);

        synth.note_off(64);
        assert_eq!(synth.held_notes(), &[60, 67]);
        synth.note_off(67);
        synth.tick().unwrap();
        let expected = crate::synth::note::note_to_frequency(60);
        assert!((synth.operator(OperatorId::D).frequency() - expected).abs() < 1e-9);
        assert!(synth.is_sounding());

        synth.note_off(60);
        assert_eq!(synth.envelope_mut().state(), EnvelopeState::Released);
    }

    #[test]
    fn stack_forgets_oldest_when_full() {
        let mut stack = NoteStack::default();
        for note in 0..(NOTE_STACK_CAPACITY as u8 + 2) {
            stack.push(note);
        }
        assert_eq!(stack.as_slice().len(), NOTE_STACK_CAPACITY);
        assert_eq!(stack.as_slice()[0], 2);
        stack.push(5);
        assert_eq!(stack.top(), Some(5));
        assert_eq!(stack.as_slice().len(), NOTE_STACK_CAPACITY);
    }

    #[test]
    fn rejected_command_leaves_state() {
        let mut synth = synth();
        let result = synth.apply(Command::SetLevel {
            op: OperatorId::B,
            level: 3.0,
        });
        assert!(result.is_err());
        assert_eq!(synth.operator(OperatorId::B).level(), 1.0);
        assert!(synth.apply(Command::SetMasterAmp(2.0)).is_err());
        assert_eq!(synth.mixer().master_amp(), 0.65);
    }

    #[test]
    fn recording_commands_round_trip_buffers() {
        let mut synth = synth();
        synth.note_on(&on(57)).unwrap();
        let spare = synth
            .apply(Command::StartRecording(Vec::with_capacity(128)))
            .unwrap();
        assert!(spare.is_none());
        let produced: Vec<Frame> = (0..100).map(|_| synth.tick().unwrap()).collect();
        let saved = synth.apply(Command::SaveRecording).unwrap();
        assert_eq!(saved, Some(RecordingBuffer::Take(produced)));
    }

    #[test]
    fn default_effects_start_bypassed_and_toggle() {
        let mut synth = synth();
        let effects = synth.mixer().bus(0).unwrap().effects();
        let names: Vec<_> = effects.iter().map(Effect::name).collect();
        assert_eq!(names, ["filter", "echo"]);
        assert!(effects.iter().all(|e| !e.is_active()));

        synth
            .apply(Command::SetEffectActive {
                bus: 0,
                slot: ECHO_SLOT,
                active: true,
            })
            .unwrap();
        assert!(synth.mixer().bus(0).unwrap().effects()[ECHO_SLOT].is_active());

        let missing = synth.apply(Command::SetEffectActive {
            bus: 0,
            slot: 7,
            active: true,
        });
        assert!(matches!(missing, Err(Error::UnknownEffect { bus: 0, slot: 7 })));
    }

    #[test]
    fn lfo_sweeps_the_pan() {
        let mut synth = synth();
        let lfo = ModUnitId(4);
        synth
            .apply(Command::SetLfoFrequency { unit: lfo, hz: 50.0 })
            .unwrap();
        synth
            .apply(Command::AttachMixerMod {
                param: MixerParam::Pan,
                unit: lfo,
                depth: 1.0,
            })
            .unwrap();
        synth.note_on(&on(69)).unwrap();

        let frames: Vec<Frame> = (0..2000).map(|_| synth.tick().unwrap()).collect();
        let left_heavy = frames.iter().any(|f| f.left.abs() > 0.05 && f.right.abs() < 1e-3);
        let right_heavy = frames.iter().any(|f| f.right.abs() > 0.05 && f.left.abs() < 1e-3);
        assert!(left_heavy && right_heavy);

        let unknown = synth.apply(Command::AttachMixerMod {
            param: MixerParam::MasterAmp,
            unit: ModUnitId(40),
            depth: 1.0,
        });
        assert!(matches!(unknown, Err(Error::UnknownModUnit(40))));
        assert!(!synth.mixer().dock(MixerParam::MasterAmp).in_use());
    }

    #[test]
    fn take_spans_rotated_chunks() {
        let mut synth = synth();
        synth.note_on(&on(62)).unwrap();
        synth
            .apply(Command::StartRecording(Vec::with_capacity(64)))
            .unwrap();
        for _ in 0..2 {
            let refused = synth
                .apply(Command::AddRecordingChunk(Vec::with_capacity(64)))
                .unwrap();
            assert!(refused.is_none());
        }
        let produced: Vec<Frame> = (0..150).map(|_| synth.tick().unwrap()).collect();

        let mut take = Vec::new();
        while let Some(chunk) = synth.pop_recording_chunk() {
            take.extend(chunk);
        }
        match synth.apply(Command::SaveRecording).unwrap() {
            Some(RecordingBuffer::Take(last)) => take.extend(last),
            other => panic!("expected the end of the take, got {:?}", other),
        }
        assert_eq!(take, produced);
        assert_eq!(synth.mixer().dropped_frames(), 0);
    }

    #[test]
    fn lfo_and_envelope_settings_reach_their_units() {
        let mut synth = synth();
        let lfo = ModUnitId(5);
        synth
            .apply(Command::SetLfoAmplitude {
                unit: lfo,
                amplitude: 0.25,
            })
            .unwrap();
        synth
            .apply(Command::SetLfoWaveform {
                unit: lfo,
                waveform: Waveform::Square,
            })
            .unwrap();
        synth
            .apply(Command::SetLfoRetrigger {
                unit: lfo,
                retrigger: true,
            })
            .unwrap();
        synth
            .apply(Command::SetSustainEnabled {
                unit: ModUnitId(1),
                enabled: false,
            })
            .unwrap();

        let mods = synth.mods_mut();
        let unit = mods.lfo_mut(lfo).unwrap();
        assert_eq!(unit.amplitude(), 0.25);
        assert_eq!(unit.waveform(), Waveform::Square);
        assert!(unit.retrigger());
        assert!(!mods.envelope_mut(ModUnitId(1)).unwrap().sustain_enabled());

        let wrong_kind = synth.apply(Command::SetSustainEnabled {
            unit: lfo,
            enabled: true,
        });
        assert!(matches!(wrong_kind, Err(Error::ModUnitKind(5))));
    }

    #[test]
    fn effect_settings_reach_the_chain() {
        let mut synth = synth();
        synth
            .apply(Command::SetEffectParam {
                bus: 0,
                slot: FILTER_SLOT,
                param: EffectParam::FilterMode(FilterMode::HighPass),
            })
            .unwrap();
        let mismatch = synth.apply(Command::SetEffectParam {
            bus: 0,
            slot: FILTER_SLOT,
            param: EffectParam::Feedback(0.2),
        });
        assert!(matches!(mismatch, Err(Error::EffectParam { .. })));
        synth
            .apply(Command::SetEffectParam {
                bus: 0,
                slot: ECHO_SLOT,
                param: EffectParam::DecayTime(0.5),
            })
            .unwrap();
    }
}
