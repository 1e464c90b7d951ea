//! Downstream signal path: bus effect chains, pan, master amplitude and the
//! recording tee.

use super::effect::Effect;
use super::modulation::{ModDock, ModSlot, ModUnitId};
use crate::error::{check_range, Error, Result};
use crate::synth::prelude::{fmt, PI};
use std::collections::VecDeque;
use std::ops::{Add, AddAssign, Mul};

pub const PAN_RANGE: f64 = 100.0;

/// One stereo output sample.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Frame {
    pub left: f64,
    pub right: f64,
}

impl Frame {
    pub const ZERO: Frame = Frame {
        left: 0.0,
        right: 0.0,
    };

    pub fn new(left: f64, right: f64) -> Self {
        Self { left, right }
    }

    pub fn mono(sample: f64) -> Self {
        Self::new(sample, sample)
    }

    pub fn is_finite(&self) -> bool {
        self.left.is_finite() && self.right.is_finite()
    }
}

impl Add for Frame {
    type Output = Frame;

    fn add(self, rhs: Frame) -> Frame {
        Frame::new(self.left + rhs.left, self.right + rhs.right)
    }
}

impl AddAssign for Frame {
    fn add_assign(&mut self, rhs: Frame) {
        self.left += rhs.left;
        self.right += rhs.right;
    }
}

impl Mul<f64> for Frame {
    type Output = Frame;

    fn mul(self, rhs: f64) -> Frame {
        Frame::new(self.left * rhs, self.right * rhs)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PanLaw {
    Linear,
    /// Constant power.
    #[default]
    Sine,
    Sqrt,
}

impl PanLaw {
    /// Left and right gains for `pan` in `[-100, 100]`.
    pub fn gains(self, pan: f64) -> (f64, f64) {
        let right = (pan + PAN_RANGE) / (2.0 * PAN_RANGE);
        let left = 1.0 - right;
        match self {
            PanLaw::Linear => (left, right),
            PanLaw::Sine => {
                let angle = right * PI / 2.0;
                (angle.cos(), angle.sin())
            }
            PanLaw::Sqrt => (left.sqrt(), right.sqrt()),
        }
    }
}

impl fmt::Display for PanLaw {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PanLaw::Linear => "linear",
            PanLaw::Sine => "sine",
            PanLaw::Sqrt => "sqrt",
        };
        f.write_str(name)
    }
}

/// An effect chain with an output gain.
#[derive(Debug)]
pub struct Bus {
    effects: Vec<Effect>,
    gain: f64,
}

impl Bus {
    pub fn new(effects: Vec<Effect>) -> Self {
        Self { effects, gain: 1.0 }
    }

    pub fn set_gain(&mut self, gain: f64) -> Result<()> {
        self.gain = check_range("bus gain", gain, 0.0, 2.0)?;
        Ok(())
    }

    pub fn gain(&self) -> f64 {
        self.gain
    }

    pub fn effects(&self) -> &[Effect] {
        &self.effects
    }

    pub fn effect_mut(&mut self, slot: usize) -> Option<&mut Effect> {
        self.effects.get_mut(slot)
    }

    /// Appends to the end of the chain and returns the new slot.
    pub fn push_effect(&mut self, effect: impl Into<Effect>) -> usize {
        self.effects.push(effect.into());
        self.effects.len() - 1
    }

    #[inline]
    fn process(&mut self, sample: f64) -> f64 {
        let out = self
            .effects
            .iter_mut()
            .fold(sample, |acc, effect| effect.process(acc));
        out * self.gain
    }

    fn reset(&mut self) {
        self.effects.iter_mut().for_each(Effect::reset);
    }
}

/// Spare chunks the recorder holds ready for rotation.
pub const MAX_SPARE_CHUNKS: usize = 4;
/// Filled chunks parked until the control side collects them.
pub const MAX_FILLED_CHUNKS: usize = 8;

/// Recording memory leaving the audio thread, in take order.
#[derive(Debug, PartialEq)]
pub enum RecordingBuffer {
    /// A filled chunk. The take continues in the next one.
    Chunk(Vec<Frame>),
    /// The last chunk of a saved take.
    Take(Vec<Frame>),
    /// Memory the engine no longer needs.
    Spare(Vec<Frame>),
}

impl RecordingBuffer {
    pub fn into_frames(self) -> Vec<Frame> {
        match self {
            RecordingBuffer::Chunk(frames)
            | RecordingBuffer::Take(frames)
            | RecordingBuffer::Spare(frames) => frames,
        }
    }
}

/// Frame store made of preallocated chunks. When the active chunk fills up a
/// spare takes its place; frames are only dropped (and counted) when no spare
/// is left. Nothing here allocates or frees.
#[derive(Debug)]
struct Recorder {
    active: Vec<Frame>,
    spares: Vec<Vec<Frame>>,
    filled: VecDeque<Vec<Frame>>,
    recording: bool,
    frames: usize,
    dropped: u64,
}

impl Recorder {
    fn new() -> Self {
        Self {
            active: Vec::new(),
            spares: Vec::with_capacity(MAX_SPARE_CHUNKS),
            filled: VecDeque::with_capacity(MAX_FILLED_CHUNKS),
            recording: false,
            frames: 0,
            dropped: 0,
        }
    }

    #[inline]
    fn push(&mut self, frame: Frame) {
        if !self.recording {
            return;
        }
        if self.active.len() == self.active.capacity() {
            self.rotate();
        }
        if self.active.len() < self.active.capacity() {
            self.active.push(frame);
            self.frames += 1;
        } else {
            self.dropped += 1;
        }
    }

    fn rotate(&mut self) {
        if self.filled.len() == MAX_FILLED_CHUNKS {
            return;
        }
        let Some(spare) = self.spares.pop() else {
            return;
        };
        let full = std::mem::replace(&mut self.active, spare);
        if !full.is_empty() {
            self.filled.push_back(full);
        }
    }
}

/// Mixer parameters that accept modulation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MixerParam {
    MasterAmp,
    Pan,
}

impl MixerParam {
    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for MixerParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MixerParam::MasterAmp => f.write_str("master amp"),
            MixerParam::Pan => f.write_str("pan"),
        }
    }
}

#[derive(Debug)]
pub struct Mixer {
    buses: Vec<Bus>,
    /// Master amp `[0, 1]` and pan `[-100, 100]`; the dock base is the set value.
    docks: [ModDock; 2],
    pan_law: PanLaw,
    left_gain: f64,
    right_gain: f64,
    recorder: Recorder,
}

impl Default for Mixer {
    fn default() -> Self {
        Self::new()
    }
}

impl Mixer {
    /// One empty bus at unity gain, centred.
    pub fn new() -> Self {
        let pan_law = PanLaw::default();
        let (left_gain, right_gain) = pan_law.gains(0.0);
        Self {
            buses: vec![Bus::new(Vec::new())],
            docks: [
                ModDock::new(0.0, 1.0, 1.0),
                ModDock::new(-PAN_RANGE, PAN_RANGE, 0.0),
            ],
            pan_law,
            left_gain,
            right_gain,
            recorder: Recorder::new(),
        }
    }

    /// Runs `raw` through every bus and produces one frame. `mod_values`
    /// feeds the master amp and pan docks.
    #[inline]
    pub fn process(&mut self, raw: f64, mod_values: &[f64]) -> Frame {
        let mono: f64 = self.buses.iter_mut().map(|bus| bus.process(raw)).sum();
        let mono = mono * self.docks[MixerParam::MasterAmp.index()].value(mod_values);
        let pan = &self.docks[MixerParam::Pan.index()];
        let (left_gain, right_gain) = if pan.in_use() {
            self.pan_law.gains(pan.value(mod_values))
        } else {
            (self.left_gain, self.right_gain)
        };
        let frame = Frame::new(mono * left_gain, mono * right_gain);
        self.recorder.push(frame);
        frame
    }

    pub fn set_master_amp(&mut self, amp: f64) -> Result<()> {
        let amp = check_range("master amp", amp, 0.0, 1.0)?;
        self.docks[MixerParam::MasterAmp.index()].set_base(amp);
        Ok(())
    }

    pub fn master_amp(&self) -> f64 {
        self.docks[MixerParam::MasterAmp.index()].base()
    }

    pub fn set_pan(&mut self, pan: f64) -> Result<()> {
        let pan = check_range("pan", pan, -PAN_RANGE, PAN_RANGE)?;
        self.docks[MixerParam::Pan.index()].set_base(pan);
        self.update_pan_gains();
        Ok(())
    }

    pub fn pan(&self) -> f64 {
        self.docks[MixerParam::Pan.index()].base()
    }

    pub fn set_pan_law(&mut self, law: PanLaw) {
        self.pan_law = law;
        self.update_pan_gains();
    }

    pub fn pan_law(&self) -> PanLaw {
        self.pan_law
    }

    fn update_pan_gains(&mut self) {
        let (left, right) = self.pan_law.gains(self.pan());
        self.left_gain = left;
        self.right_gain = right;
    }

    pub fn attach_mod(&mut self, param: MixerParam, unit: ModUnitId, depth: f64) -> Result<usize> {
        self.docks[param.index()].attach(unit, depth)
    }

    pub fn detach_mod(&mut self, param: MixerParam, slot: usize) -> Result<ModSlot> {
        self.docks[param.index()].detach(slot)
    }

    pub fn set_mod_unit_depth(&mut self, param: MixerParam, slot: usize, depth: f64) -> Result<()> {
        self.docks[param.index()].set_depth(slot, depth)
    }

    pub fn dock(&self, param: MixerParam) -> &ModDock {
        &self.docks[param.index()]
    }

    pub fn add_bus(&mut self, bus: Bus) -> usize {
        self.buses.push(bus);
        self.buses.len() - 1
    }

    pub fn bus(&self, index: usize) -> Result<&Bus> {
        self.buses.get(index).ok_or(Error::UnknownBus(index))
    }

    pub fn bus_mut(&mut self, index: usize) -> Result<&mut Bus> {
        self.buses.get_mut(index).ok_or(Error::UnknownBus(index))
    }

    pub fn buses(&self) -> &[Bus] {
        &self.buses
    }

    pub fn effect_mut(&mut self, bus: usize, slot: usize) -> Result<&mut Effect> {
        self.bus_mut(bus)?
            .effect_mut(slot)
            .ok_or(Error::UnknownEffect { bus, slot })
    }

    /// Starts a fresh recording with a first chunk of `capacity` frames.
    /// Allocates, so call it from the control side.
    pub fn start_recording(&mut self, capacity: usize) {
        self.start_recording_into(Vec::with_capacity(capacity));
    }

    /// Starts recording into a preallocated chunk, returning the chunk it
    /// replaces so the caller can drop it elsewhere. Filled chunks of an
    /// earlier take must have been collected.
    pub fn start_recording_into(&mut self, mut chunk: Vec<Frame>) -> Option<Vec<Frame>> {
        chunk.clear();
        let previous = std::mem::replace(&mut self.recorder.active, chunk);
        self.recorder.recording = true;
        self.recorder.frames = 0;
        self.recorder.dropped = 0;
        (previous.capacity() > 0).then_some(previous)
    }

    /// Queues an empty chunk for rotation. Returns it when the spare list is
    /// already full.
    pub fn add_recording_chunk(&mut self, mut chunk: Vec<Frame>) -> Option<Vec<Frame>> {
        if self.recorder.spares.len() == MAX_SPARE_CHUNKS {
            return Some(chunk);
        }
        chunk.clear();
        self.recorder.spares.push(chunk);
        None
    }

    /// Oldest filled chunk of the current take, if any.
    pub fn pop_recording_chunk(&mut self) -> Option<Vec<Frame>> {
        self.recorder.filled.pop_front()
    }

    pub fn pause_recording(&mut self) {
        self.recorder.recording = false;
    }

    pub fn resume_recording(&mut self) {
        self.recorder.recording = true;
    }

    /// Stops recording and hands over the active chunk. The take is every
    /// filled chunk popped since the start followed by this one.
    pub fn save_recording(&mut self) -> Vec<Frame> {
        self.recorder.recording = false;
        std::mem::take(&mut self.recorder.active)
    }

    pub fn is_recording(&self) -> bool {
        self.recorder.recording
    }

    /// Frames captured since the last start, across all chunks.
    pub fn recorded_frames(&self) -> usize {
        self.recorder.frames
    }

    pub fn spare_chunks(&self) -> usize {
        self.recorder.spares.len()
    }

    /// Frames lost since the last start because no spare chunk was ready.
    pub fn dropped_frames(&self) -> u64 {
        self.recorder.dropped
    }

    /// Clears all effect state. The recording is left alone.
    pub fn reset(&mut self) {
        self.buses.iter_mut().for_each(Bus::reset);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synth::filter::Biquad;
    use approx::assert_abs_diff_eq;
    use std::f64::consts::FRAC_1_SQRT_2;

    #[test]
    fn centre_pan_laws() {
        let (l, r) = PanLaw::Linear.gains(0.0);
        assert_abs_diff_eq!(l, 0.5);
        assert_abs_diff_eq!(r, 0.5);
        let (l, r) = PanLaw::Sine.gains(0.0);
        assert_abs_diff_eq!(l * l + r * r, 1.0, epsilon = 1e-12);
        let (l, r) = PanLaw::Sqrt.gains(-100.0);
        assert_abs_diff_eq!(l, 1.0);
        assert_abs_diff_eq!(r, 0.0);
    }

    #[test]
    fn master_amp_and_pan_scale_output() {
        let mut mixer = Mixer::new();
        mixer.set_pan_law(PanLaw::Linear);
        mixer.set_master_amp(0.5).unwrap();
        mixer.set_pan(100.0).unwrap();
        let frame = mixer.process(1.0, &[]);
        assert_abs_diff_eq!(frame.left, 0.0);
        assert_abs_diff_eq!(frame.right, 0.5);
        assert!(mixer.set_pan(150.0).is_err());
        assert!(mixer.set_master_amp(-0.1).is_err());
        assert_eq!(mixer.pan(), 100.0);
    }

    #[test]
    fn buses_are_summed_after_gain() {
        let mut mixer = Mixer::new();
        mixer.set_pan_law(PanLaw::Linear);
        let mut bus = Bus::new(Vec::new());
        bus.set_gain(0.5).unwrap();
        mixer.add_bus(bus);
        let frame = mixer.process(1.0, &[]);
        assert_abs_diff_eq!(frame.left + frame.right, 1.5);
    }

    #[test]
    fn bypassed_effect_passes_through() {
        let mut mixer = Mixer::new();
        mixer.set_pan_law(PanLaw::Linear);
        mixer
            .bus_mut(0)
            .unwrap()
            .effects
            .push(Biquad::low_pass(10.0, 44100.0).into());
        mixer.effect_mut(0, 0).unwrap().set_active(false);
        let frame = mixer.process(1.0, &[]);
        assert_abs_diff_eq!(frame.left, 0.5);
        assert!(matches!(
            mixer.effect_mut(0, 3),
            Err(Error::UnknownEffect { bus: 0, slot: 3 })
        ));
        assert!(matches!(mixer.bus_mut(9), Err(Error::UnknownBus(9))));
    }

    #[test]
    fn recording_captures_exactly_the_frames_between_start_and_save() {
        let mut mixer = Mixer::new();
        mixer.process(0.1, &[]);
        mixer.start_recording(16);
        let produced: Vec<Frame> = (0..10).map(|n| mixer.process(n as f64 * 0.01, &[])).collect();
        let recorded = mixer.save_recording();
        mixer.process(0.2, &[]);
        assert_eq!(recorded, produced);
        assert!(!mixer.is_recording());
    }

    #[test]
    fn recording_never_grows_past_capacity() {
        let mut mixer = Mixer::new();
        mixer.start_recording_into(Vec::with_capacity(4));
        for _ in 0..10 {
            mixer.process(0.5, &[]);
        }
        assert_eq!(mixer.recorded_frames(), 4);
        assert_eq!(mixer.dropped_frames(), 6);
        assert_eq!(mixer.save_recording().capacity(), 4);
    }

    #[test]
    fn paused_recording_skips_frames() {
        let mut mixer = Mixer::new();
        mixer.start_recording(8);
        mixer.process(0.1, &[]);
        mixer.pause_recording();
        mixer.process(0.2, &[]);
        mixer.resume_recording();
        mixer.process(0.3, &[]);
        assert_eq!(mixer.save_recording().len(), 2);
    }

    #[test]
    fn restart_hands_back_previous_buffer() {
        let mut mixer = Mixer::new();
        assert!(mixer.start_recording_into(Vec::with_capacity(4)).is_none());
        let previous = mixer.start_recording_into(Vec::with_capacity(8));
        assert_eq!(previous.map(|b| b.capacity()), Some(4));
    }

    #[test]
    fn full_chunk_rotates_to_a_spare() {
        let mut mixer = Mixer::new();
        mixer.start_recording_into(Vec::with_capacity(4));
        for _ in 0..2 {
            assert!(mixer.add_recording_chunk(Vec::with_capacity(4)).is_none());
        }
        let produced: Vec<Frame> = (0..10).map(|n| mixer.process(n as f64 * 0.05, &[])).collect();
        assert_eq!(mixer.recorded_frames(), 10);
        assert_eq!(mixer.dropped_frames(), 0);
        assert_eq!(mixer.spare_chunks(), 0);

        let mut take = Vec::new();
        while let Some(chunk) = mixer.pop_recording_chunk() {
            assert_eq!(chunk.len(), 4);
            take.extend(chunk);
        }
        take.extend(mixer.save_recording());
        assert_eq!(take, produced);
    }

    #[test]
    fn spare_list_is_bounded() {
        let mut mixer = Mixer::new();
        for _ in 0..MAX_SPARE_CHUNKS {
            assert!(mixer.add_recording_chunk(Vec::with_capacity(2)).is_none());
        }
        let refused = mixer.add_recording_chunk(Vec::with_capacity(2));
        assert_eq!(refused.map(|c| c.capacity()), Some(2));
        assert_eq!(mixer.spare_chunks(), MAX_SPARE_CHUNKS);
    }

    #[test]
    fn modulated_pan_moves_the_gains() {
        let mut mixer = Mixer::new();
        mixer.set_pan_law(PanLaw::Linear);
        mixer.attach_mod(MixerParam::Pan, ModUnitId(0), 1.0).unwrap();

        let hard_right = mixer.process(1.0, &[1.0]);
        assert_abs_diff_eq!(hard_right.left, 0.0);
        assert_abs_diff_eq!(hard_right.right, 1.0);
        let hard_left = mixer.process(1.0, &[-1.0]);
        assert_abs_diff_eq!(hard_left.left, 1.0);
        assert_abs_diff_eq!(hard_left.right, 0.0);
        // the set value is untouched
        assert_eq!(mixer.pan(), 0.0);

        mixer.detach_mod(MixerParam::Pan, 0).unwrap();
        let centre = mixer.process(1.0, &[1.0]);
        assert_abs_diff_eq!(centre.left, 0.5);
    }

    #[test]
    fn modulated_master_amp_is_clamped() {
        let mut mixer = Mixer::new();
        mixer.set_master_amp(0.5).unwrap();
        mixer.attach_mod(MixerParam::MasterAmp, ModUnitId(1), -1.0).unwrap();
        let silent = mixer.process(1.0, &[0.0, 1.0]);
        assert_eq!(silent, Frame::ZERO);
        assert!(mixer.set_mod_unit_depth(MixerParam::MasterAmp, 3, 0.5).is_err());
        mixer.set_mod_unit_depth(MixerParam::MasterAmp, 0, 0.25).unwrap();
        let frame = mixer.process(1.0, &[0.0, 1.0]);
        assert_abs_diff_eq!(frame.left + frame.right, 0.75 * 2.0 * FRAC_1_SQRT_2, epsilon = 1e-12);
    }
}
