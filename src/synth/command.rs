use super::effect::EffectParam;
use super::envelope::Segment;
use super::mixer::{Frame, MixerParam, PanLaw};
use super::modulation::ModUnitId;
use super::note::NoteEvent;
use super::operator::{ModParam, OperatorId};
use super::waveform::Waveform;
use super::wavetable::Wavetable;
use std::sync::Arc;

/// An immutable control change, applied by the audio thread between ticks.
///
/// Anything that needs allocating or a lookup (wavetables, recording buffers)
/// is resolved before the command is built.
#[derive(Debug, Clone)]
pub enum Command {
    Note(NoteEvent),
    SetWavetable {
        op: OperatorId,
        table: Arc<Wavetable>,
    },
    SetActive {
        op: OperatorId,
        active: bool,
    },
    SetSilent(OperatorId),
    SetLevel {
        op: OperatorId,
        level: f64,
    },
    SetRatio {
        op: OperatorId,
        ratio: f64,
    },
    SetFrequencyOffset {
        op: OperatorId,
        hz: f64,
    },
    SetSemitoneOffset {
        op: OperatorId,
        semitones: f64,
    },
    SetPhaseOffset {
        op: OperatorId,
        degrees: f64,
    },
    AttachMod {
        op: OperatorId,
        param: ModParam,
        unit: ModUnitId,
        depth: f64,
    },
    DetachMod {
        op: OperatorId,
        param: ModParam,
        slot: usize,
    },
    SetModDepth {
        op: OperatorId,
        param: ModParam,
        slot: usize,
        depth: f64,
    },
    SetEnvelopeSegment {
        unit: ModUnitId,
        index: usize,
        segment: Segment,
    },
    SetSustainEnabled {
        unit: ModUnitId,
        enabled: bool,
    },
    SetLfoFrequency {
        unit: ModUnitId,
        hz: f64,
    },
    SetLfoAmplitude {
        unit: ModUnitId,
        amplitude: f64,
    },
    SetLfoWaveform {
        unit: ModUnitId,
        waveform: Waveform,
    },
    SetLfoRetrigger {
        unit: ModUnitId,
        retrigger: bool,
    },
    SetMacroValue {
        unit: ModUnitId,
        value: f64,
    },
    SetMasterAmp(f64),
    SetPan(f64),
    SetPanLaw(PanLaw),
    AttachMixerMod {
        param: MixerParam,
        unit: ModUnitId,
        depth: f64,
    },
    DetachMixerMod {
        param: MixerParam,
        slot: usize,
    },
    SetMixerModDepth {
        param: MixerParam,
        slot: usize,
        depth: f64,
    },
    SetBusGain {
        bus: usize,
        gain: f64,
    },
    SetEffectActive {
        bus: usize,
        slot: usize,
        active: bool,
    },
    SetEffectParam {
        bus: usize,
        slot: usize,
        param: EffectParam,
    },
    /// Starts recording into a chunk preallocated by the sender.
    StartRecording(Vec<Frame>),
    /// An empty chunk the recorder rotates in when the active one fills up.
    AddRecordingChunk(Vec<Frame>),
    PauseRecording,
    /// Stops recording; the last chunk comes back on the recordings queue.
    SaveRecording,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Note(_) => "note",
            Command::SetWavetable { .. } => "set_wavetable",
            Command::SetActive { .. } => "set_active",
            Command::SetSilent(_) => "set_silent",
            Command::SetLevel { .. } => "set_level",
            Command::SetRatio { .. } => "set_ratio",
            Command::SetFrequencyOffset { .. } => "set_frequency_offset",
            Command::SetSemitoneOffset { .. } => "set_semitone_offset",
            Command::SetPhaseOffset { .. } => "set_phase_offset",
            Command::AttachMod { .. } => "attach_mod",
            Command::DetachMod { .. } => "detach_mod",
            Command::SetModDepth { .. } => "set_mod_depth",
            Command::SetEnvelopeSegment { .. } => "set_envelope_segment",
            Command::SetSustainEnabled { .. } => "set_sustain_enabled",
            Command::SetLfoFrequency { .. } => "set_lfo_frequency",
            Command::SetLfoAmplitude { .. } => "set_lfo_amplitude",
            Command::SetLfoWaveform { .. } => "set_lfo_waveform",
            Command::SetLfoRetrigger { .. } => "set_lfo_retrigger",
            Command::SetMacroValue { .. } => "set_macro_value",
            Command::SetMasterAmp(_) => "set_master_amp",
            Command::SetPan(_) => "set_pan",
            Command::SetPanLaw(_) => "set_pan_law",
            Command::AttachMixerMod { .. } => "attach_mixer_mod",
            Command::DetachMixerMod { .. } => "detach_mixer_mod",
            Command::SetMixerModDepth { .. } => "set_mixer_mod_depth",
            Command::SetBusGain { .. } => "set_bus_gain",
            Command::SetEffectActive { .. } => "set_effect_active",
            Command::SetEffectParam { .. } => "set_effect_param",
            Command::StartRecording(_) => "start_recording",
            Command::AddRecordingChunk(_) => "add_recording_chunk",
            Command::PauseRecording => "pause_recording",
            Command::SaveRecording => "save_recording",
        }
    }
}
