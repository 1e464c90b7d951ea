use crate::error::{check_range, Error, Result};
use crate::synth::modulation::{ModDock, ModSlot, ModUnitId};
use crate::synth::note::{note_to_frequency, MAX_NOTE};
use crate::synth::prelude::fmt;
use crate::synth::wavetable::{Wavetable, WavetableDb};
use std::sync::Arc;

/// Peak FM index a full-scale modulator can apply to its target.
pub const MAX_MODULATION_INDEX: f64 = 10.0;
pub const MAX_RATIO: f64 = 32.0;
pub const MAX_SEMITONE_OFFSET: f64 = 48.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OperatorId {
    A,
    B,
    C,
    D,
}

impl OperatorId {
    pub const ALL: [OperatorId; 4] = [OperatorId::A, OperatorId::B, OperatorId::C, OperatorId::D];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }
}

impl fmt::Display for OperatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let letter = match self {
            OperatorId::A => "A",
            OperatorId::B => "B",
            OperatorId::C => "C",
            OperatorId::D => "D",
        };
        f.write_str(letter)
    }
}

/// Operator parameters that accept modulation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ModParam {
    Level,
    Ratio,
    PhaseOffset,
}

impl ModParam {
    pub const ALL: [ModParam; 3] = [ModParam::Level, ModParam::Ratio, ModParam::PhaseOffset];

    fn index(self) -> usize {
        self as usize
    }
}

#[derive(Clone, Debug)]
pub struct Operator {
    id: OperatorId,
    table: Arc<Wavetable>,
    sample_rate: f64,
    /// Read position in table samples, `[0, len)`.
    phase: f64,
    note_frequency: f64,
    ratio: f64,
    semitone_factor: f64,
    semitone_offset: f64,
    frequency_offset: f64,
    /// Frequency of the last tick, without FM deviation.
    frequency: f64,
    /// FM deviation in Hz for the next tick only.
    modulation: f64,
    active: bool,
    silent: bool,
    docks: [ModDock; 3],
}

impl Operator {
    pub fn new(id: OperatorId, table: Arc<Wavetable>, sample_rate: f64) -> Self {
        Self {
            id,
            table,
            sample_rate,
            phase: 0.0,
            note_frequency: 0.0,
            ratio: 1.0,
            semitone_factor: 1.0,
            semitone_offset: 0.0,
            frequency_offset: 0.0,
            frequency: 0.0,
            modulation: 0.0,
            active: true,
            silent: false,
            docks: [
                ModDock::new(0.0, 1.0, 1.0),
                ModDock::new(0.0, MAX_RATIO, 1.0),
                ModDock::new(0.0, 360.0, 0.0),
            ],
        }
    }

    pub fn id(&self) -> OperatorId {
        self.id
    }

    /// Retunes to `note` without touching the phase.
    pub fn set_note(&mut self, note: u8) -> Result<()> {
        if note > MAX_NOTE {
            return Err(Error::InvalidNote(note));
        }
        self.note_frequency = note_to_frequency(note);
        self.silent = false;
        Ok(())
    }

    /// Rebinds the wavetable, keeping the relative position within the period.
    pub fn set_table(&mut self, table: Arc<Wavetable>) {
        let scale = table.len() as f64 / self.table.len() as f64;
        self.phase = (self.phase * scale).rem_euclid(table.len() as f64);
        // the old Arc is still held by the database, so this never frees
        self.table = table;
    }

    /// Looks `name` up in `db`; on failure the current table stays bound.
    pub fn set_wavetable(&mut self, db: &WavetableDb, name: &str) -> Result<()> {
        let table = db.lookup(name)?;
        self.set_table(table);
        Ok(())
    }

    pub fn table(&self) -> &Arc<Wavetable> {
        &self.table
    }

    pub fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Forces zero output until the next `set_note` or `set_level`.
    pub fn set_silent(&mut self) {
        self.silent = true;
    }

    pub fn is_silent(&self) -> bool {
        self.silent
    }

    pub fn set_level(&mut self, level: f64) -> Result<()> {
        let level = check_range("level", level, 0.0, 1.0)?;
        self.docks[ModParam::Level.index()].set_base(level);
        self.silent = false;
        Ok(())
    }

    pub fn level(&self) -> f64 {
        self.docks[ModParam::Level.index()].base()
    }

    pub fn set_ratio(&mut self, ratio: f64) -> Result<()> {
        self.ratio = check_range("ratio", ratio, 0.0, MAX_RATIO)?;
        self.docks[ModParam::Ratio.index()].set_base(self.ratio);
        Ok(())
    }

    pub fn ratio(&self) -> f64 {
        self.ratio
    }

    /// Fixed offset in Hz added after the ratio.
    pub fn set_frequency_offset(&mut self, hz: f64) -> Result<()> {
        let nyquist = self.sample_rate / 2.0;
        self.frequency_offset = check_range("frequency offset", hz, -nyquist, nyquist)?;
        Ok(())
    }

    pub fn frequency_offset(&self) -> f64 {
        self.frequency_offset
    }

    pub fn set_semitone_offset(&mut self, semitones: f64) -> Result<()> {
        self.semitone_offset = check_range(
            "semitone offset",
            semitones,
            -MAX_SEMITONE_OFFSET,
            MAX_SEMITONE_OFFSET,
        )?;
        self.semitone_factor = 2f64.powf(self.semitone_offset / 12.0);
        Ok(())
    }

    pub fn semitone_offset(&self) -> f64 {
        self.semitone_offset
    }

    /// Phase offset in degrees, wrapped into `[0, 360)`.
    pub fn set_phase_offset(&mut self, degrees: f64) -> Result<()> {
        if !degrees.is_finite() {
            return Err(Error::out_of_range("phase offset", degrees, 0.0, 360.0));
        }
        self.docks[ModParam::PhaseOffset.index()].set_base(degrees.rem_euclid(360.0));
        Ok(())
    }

    pub fn phase_offset(&self) -> f64 {
        self.docks[ModParam::PhaseOffset.index()].base()
    }

    /// FM deviation in Hz applied to the next tick.
    #[inline]
    pub fn set_modulation(&mut self, hz: f64) {
        self.modulation = hz;
    }

    /// Unmodulated frequency of the last tick in Hz.
    pub fn frequency(&self) -> f64 {
        self.frequency
    }

    pub fn phase(&self) -> f64 {
        self.phase
    }

    pub fn reset_phase(&mut self) {
        self.phase = 0.0;
        self.modulation = 0.0;
    }

    pub fn attach_mod(&mut self, param: ModParam, unit: ModUnitId, depth: f64) -> Result<usize> {
        self.docks[param.index()].attach(unit, depth)
    }

    pub fn detach_mod(&mut self, param: ModParam, slot: usize) -> Result<ModSlot> {
        self.docks[param.index()].detach(slot)
    }

    pub fn set_mod_unit_depth(&mut self, param: ModParam, slot: usize, depth: f64) -> Result<()> {
        self.docks[param.index()].set_depth(slot, depth)
    }

    pub fn dock(&self, param: ModParam) -> &ModDock {
        &self.docks[param.index()]
    }

    /// Produces one sample and advances the phase by one increment.
    /// `mod_values` holds this tick's values of every modulation unit.
    #[inline]
    pub fn tick(&mut self, mod_values: &[f64]) -> f64 {
        if !self.active {
            self.modulation = 0.0;
            return 0.0;
        }

        let level = if self.silent {
            0.0
        } else {
            self.docks[ModParam::Level.index()].value(mod_values)
        };
        let ratio = self.docks[ModParam::Ratio.index()].value(mod_values);
        let offset_degrees = self.docks[ModParam::PhaseOffset.index()].value(mod_values);

        let len = self.table.len() as f64;
        let sample = self
            .table
            .interpolate(self.phase + offset_degrees / 360.0 * len)
            * level;

        self.frequency = self.note_frequency * ratio * self.semitone_factor + self.frequency_offset;
        let increment = (self.frequency + self.modulation) * len / self.sample_rate;
        self.phase = (self.phase + increment).rem_euclid(len);
        if self.phase >= len {
            self.phase = 0.0;
        }
        self.modulation = 0.0;

        sample
    }
}
