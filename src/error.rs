//! Error types for the engine.
//!
//! `Error` covers configuration and device faults, which are surfaced to the
//! control thread. `Fault` covers real-time faults raised inside `tick()`; the
//! audio bridge turns those into silence.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Unknown wavetable: {0}")]
    UnknownWavetable(String),

    #[error("Wavetable '{0}' has no samples")]
    EmptyWavetable(String),

    #[error("Invalid algorithm: {0}. Must be between 0 and 11")]
    InvalidAlgorithm(u8),

    #[error("Invalid note: {0}. Must be between 0 and 127")]
    InvalidNote(u8),

    #[error("Segment index {index} out of range for {len} segments")]
    SegmentOutOfRange { index: usize, len: usize },

    #[error("Invalid modulation slot {slot} ({len} attached)")]
    InvalidModSlot { slot: usize, len: usize },

    #[error("Modulation dock is full ({0} slots)")]
    ModDockFull(usize),

    #[error("Unknown modulation unit: {0}")]
    UnknownModUnit(usize),

    #[error("Modulation unit {0} has the wrong type for this command")]
    ModUnitKind(usize),

    #[error("{name} out of range: {value} (expected {min} to {max})")]
    OutOfRange {
        name: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("Unknown bus: {0}")]
    UnknownBus(usize),

    #[error("Unknown effect slot {slot} on bus {bus}")]
    UnknownEffect { bus: usize, slot: usize },

    #[error("{effect} has no {param} setting")]
    EffectParam {
        effect: &'static str,
        param: &'static str,
    },

    #[error("A recording is already running")]
    AlreadyRecording,

    #[error("Could not allocate recording memory: {0}")]
    RecordingAlloc(#[from] std::collections::TryReserveError),

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Command queue is full")]
    QueueFull,

    #[error("No audio output device available")]
    NoOutputDevice,

    #[error("Audio device not found: {0}")]
    DeviceNotFound(String),

    #[error("Audio stream is not open")]
    StreamNotOpen,

    #[cfg(feature = "native")]
    #[error("Failed to enumerate devices")]
    Devices(#[from] cpal::DevicesError),

    #[cfg(feature = "native")]
    #[error("Failed to get device name")]
    DeviceName(#[from] cpal::DeviceNameError),

    #[cfg(feature = "native")]
    #[error("Failed to query output config")]
    StreamConfig(#[from] cpal::DefaultStreamConfigError),

    #[cfg(feature = "native")]
    #[error("Failed to build audio stream")]
    BuildStream(#[from] cpal::BuildStreamError),

    #[cfg(feature = "native")]
    #[error("Failed to play audio stream")]
    PlayStream(#[from] cpal::PlayStreamError),

    #[cfg(feature = "native")]
    #[error("Failed to pause audio stream")]
    PauseStream(#[from] cpal::PauseStreamError),

    #[cfg(feature = "native")]
    #[error("Failed to initialize MIDI input")]
    MidiInit(#[from] midir::InitError),

    #[cfg(feature = "native")]
    #[error("Failed to query MIDI port")]
    MidiPortInfo(#[from] midir::PortInfoError),

    #[error("Failed to connect MIDI port: {0}")]
    MidiConnect(String),

    #[error("Invalid MIDI port: {0}")]
    InvalidMidiPort(usize),

    #[error("MIDI port is already open")]
    MidiPortOpen,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),
}

impl Error {
    pub(crate) fn out_of_range(name: &'static str, value: f64, min: f64, max: f64) -> Self {
        Self::OutOfRange {
            name,
            value,
            min,
            max,
        }
    }
}

/// Real-time fault raised while computing a frame.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    #[error("Synthesis produced a non-finite sample")]
    NonFiniteSample,

    #[error("Engine is busy on another thread")]
    EngineBusy,
}

pub type Result<T> = std::result::Result<T, Error>;

/// Returns `value` if it lies in `[min, max]`, else an `OutOfRange` error.
pub(crate) fn check_range(name: &'static str, value: f64, min: f64, max: f64) -> Result<f64> {
    if value.is_finite() && value >= min && value <= max {
        Ok(value)
    } else {
        Err(Error::out_of_range(name, value, min, max))
    }
}
