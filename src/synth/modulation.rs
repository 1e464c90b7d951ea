//! Generic modulation sources and the docks that route them onto parameters.
//!
//! A `ModBank` owns every `ModUnit` of the engine and is ticked exactly once per
//! sample; the resulting values are handed to each `ModDock` as a slice indexed
//! by `ModUnitId`, so a unit shared by several docks still advances only once.

use crate::error::{check_range, Error, Result};
use crate::synth::envelope::{Envelope, Segment};
use crate::synth::prelude::{fmt, TAU};
use crate::synth::waveform::Waveform;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

const NOISE_SEED: u64 = 0x1f0;

/// Maximum number of units one dock can hold.
pub const MAX_MOD_SLOTS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModUnitId(pub usize);

impl fmt::Display for ModUnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mod#{}", self.0)
    }
}

#[derive(Debug, Clone)]
pub struct Lfo {
    waveform: Waveform,
    frequency: f64,
    amplitude: f64,
    /// Position in cycles, `[0, 1)`.
    phase: f64,
    sample_rate: f64,
    retrigger: bool,
    /// Sample-and-hold source for `Waveform::Noise`, redrawn once per cycle.
    rng: SmallRng,
    held: f64,
}

impl Lfo {
    pub fn new(waveform: Waveform, frequency: f64, sample_rate: f64) -> Self {
        let mut rng = SmallRng::seed_from_u64(NOISE_SEED);
        let held = rng.random_range(-1.0..1.0);
        Self {
            waveform,
            frequency: frequency.max(0.0),
            amplitude: 1.0,
            phase: 0.0,
            sample_rate,
            retrigger: false,
            rng,
            held,
        }
    }

    pub fn set_frequency(&mut self, frequency: f64) -> Result<()> {
        self.frequency = check_range("lfo frequency", frequency, 0.0, self.sample_rate / 2.0)?;
        Ok(())
    }

    pub fn frequency(&self) -> f64 {
        self.frequency
    }

    pub fn set_amplitude(&mut self, amplitude: f64) -> Result<()> {
        self.amplitude = check_range("lfo amplitude", amplitude, 0.0, 1.0)?;
        Ok(())
    }

    pub fn set_waveform(&mut self, waveform: Waveform) {
        self.waveform = waveform;
    }

    /// Restart the cycle on every note-on.
    pub fn set_retrigger(&mut self, retrigger: bool) {
        self.retrigger = retrigger;
    }

    pub fn amplitude(&self) -> f64 {
        self.amplitude
    }

    pub fn waveform(&self) -> Waveform {
        self.waveform
    }

    pub fn retrigger(&self) -> bool {
        self.retrigger
    }

    fn tick(&mut self) -> f64 {
        let shape = match self.waveform {
            Waveform::Noise => self.held,
            waveform => waveform.evaluate(self.phase * TAU),
        };
        self.phase += self.frequency / self.sample_rate;
        if self.phase >= 1.0 {
            self.phase -= self.phase.floor();
            self.held = self.rng.random_range(-1.0..1.0);
        }
        self.amplitude * shape
    }

    fn note_on(&mut self) {
        if self.retrigger {
            self.phase = 0.0;
        }
    }
}

/// Constant control value in `[-1, 1]`, set from the control surface.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Macro {
    value: f64,
}

impl Macro {
    pub fn new(value: f64) -> Result<Self> {
        Ok(Self {
            value: check_range("macro value", value, -1.0, 1.0)?,
        })
    }

    pub fn set_value(&mut self, value: f64) -> Result<()> {
        self.value = check_range("macro value", value, -1.0, 1.0)?;
        Ok(())
    }

    pub fn value(&self) -> f64 {
        self.value
    }
}

#[derive(Debug, Clone)]
pub enum ModUnit {
    Envelope(Envelope),
    Lfo(Lfo),
    Macro(Macro),
}

impl ModUnit {
    /// Advances one sample and returns the new value.
    pub fn tick(&mut self) -> f64 {
        match self {
            ModUnit::Envelope(env) => env.update(),
            ModUnit::Lfo(lfo) => lfo.tick(),
            ModUnit::Macro(m) => m.value,
        }
    }

    pub fn note_on(&mut self) {
        match self {
            ModUnit::Envelope(env) => env.note_on(),
            ModUnit::Lfo(lfo) => lfo.note_on(),
            ModUnit::Macro(_) => {}
        }
    }

    pub fn note_off(&mut self) {
        if let ModUnit::Envelope(env) = self {
            env.note_off();
        }
    }

    pub fn is_active(&self) -> bool {
        match self {
            ModUnit::Envelope(env) => env.is_active(),
            ModUnit::Lfo(_) | ModUnit::Macro(_) => true,
        }
    }

    pub fn reset(&mut self) {
        match self {
            ModUnit::Envelope(env) => env.reset(),
            ModUnit::Lfo(lfo) => lfo.phase = 0.0,
            ModUnit::Macro(_) => {}
        }
    }
}

/// Every modulation unit of the engine plus the values of the current tick.
#[derive(Debug, Clone)]
pub struct ModBank {
    units: Vec<ModUnit>,
    values: Vec<f64>,
}

impl ModBank {
    pub fn new(units: Vec<ModUnit>) -> Self {
        let values = vec![0.0; units.len()];
        Self { units, values }
    }

    /// Four envelopes, two LFOs and two macros, in that order.
    pub fn standard(sample_rate: f64) -> Self {
        let envelope = || {
            let attack = (0.01 * sample_rate) as u64;
            let decay = (0.25 * sample_rate) as u64;
            let release = (0.5 * sample_rate) as u64;
            // levels are constants inside [0, 1]
            Envelope::new(
                vec![
                    Segment::new(1.0, attack),
                    Segment::new(0.5, decay),
                    Segment::new(0.0, release),
                ],
                Some(2),
            )
            .unwrap_or_default()
        };

        let mut units: Vec<ModUnit> = (0..4).map(|_| ModUnit::Envelope(envelope())).collect();
        units.push(ModUnit::Lfo(Lfo::new(Waveform::Sine, 5.0, sample_rate)));
        units.push(ModUnit::Lfo(Lfo::new(Waveform::Triangle, 0.5, sample_rate)));
        units.push(ModUnit::Macro(Macro::default()));
        units.push(ModUnit::Macro(Macro::default()));
        Self::new(units)
    }

    /// Ticks every unit once and returns this sample's values.
    pub fn tick(&mut self) -> &[f64] {
        for (unit, value) in self.units.iter_mut().zip(self.values.iter_mut()) {
            *value = unit.tick();
        }
        &self.values
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn note_on(&mut self) {
        self.units.iter_mut().for_each(ModUnit::note_on);
    }

    pub fn note_off(&mut self) {
        self.units.iter_mut().for_each(ModUnit::note_off);
    }

    pub fn reset(&mut self) {
        self.units.iter_mut().for_each(ModUnit::reset);
        self.values.iter_mut().for_each(|v| *v = 0.0);
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn contains(&self, id: ModUnitId) -> bool {
        id.0 < self.units.len()
    }

    pub fn get(&self, id: ModUnitId) -> Result<&ModUnit> {
        self.units.get(id.0).ok_or(Error::UnknownModUnit(id.0))
    }

    pub fn get_mut(&mut self, id: ModUnitId) -> Result<&mut ModUnit> {
        self.units.get_mut(id.0).ok_or(Error::UnknownModUnit(id.0))
    }

    pub fn envelope_mut(&mut self, id: ModUnitId) -> Result<&mut Envelope> {
        match self.get_mut(id)? {
            ModUnit::Envelope(env) => Ok(env),
            _ => Err(Error::ModUnitKind(id.0)),
        }
    }

    pub fn lfo_mut(&mut self, id: ModUnitId) -> Result<&mut Lfo> {
        match self.get_mut(id)? {
            ModUnit::Lfo(lfo) => Ok(lfo),
            _ => Err(Error::ModUnitKind(id.0)),
        }
    }

    pub fn macro_mut(&mut self, id: ModUnitId) -> Result<&mut Macro> {
        match self.get_mut(id)? {
            ModUnit::Macro(m) => Ok(m),
            _ => Err(Error::ModUnitKind(id.0)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModSlot {
    pub unit: ModUnitId,
    /// Scales the unit's contribution, `[-1, 1]`.
    pub depth: f64,
}

/// Modulation inputs of one parameter.
///
/// With no slots attached the dock yields its base value untouched. Otherwise
/// each slot contributes `base + higher * value * depth`, the contributions are
/// averaged, and the result is clamped to `[lower, higher]`.
#[derive(Debug, Clone, Copy)]
pub struct ModDock {
    slots: [Option<ModSlot>; MAX_MOD_SLOTS],
    len: usize,
    base: f64,
    lower: f64,
    higher: f64,
}

impl ModDock {
    pub fn new(lower: f64, higher: f64, base: f64) -> Self {
        Self {
            slots: [None; MAX_MOD_SLOTS],
            len: 0,
            base,
            lower,
            higher,
        }
    }

    pub fn attach(&mut self, unit: ModUnitId, depth: f64) -> Result<usize> {
        let depth = check_range("mod depth", depth, -1.0, 1.0)?;
        if self.len == MAX_MOD_SLOTS {
            return Err(Error::ModDockFull(MAX_MOD_SLOTS));
        }
        self.slots[self.len] = Some(ModSlot { unit, depth });
        self.len += 1;
        Ok(self.len - 1)
    }

    /// Removes a slot, keeping the order of the remaining ones.
    pub fn detach(&mut self, slot: usize) -> Result<ModSlot> {
        let removed = self.slot(slot)?;
        self.slots.copy_within(slot + 1..self.len, slot);
        self.len -= 1;
        self.slots[self.len] = None;
        Ok(removed)
    }

    pub fn set_depth(&mut self, slot: usize, depth: f64) -> Result<()> {
        let depth = check_range("mod depth", depth, -1.0, 1.0)?;
        let len = self.len;
        match self.slots.get_mut(slot).and_then(Option::as_mut) {
            Some(entry) if slot < len => {
                entry.depth = depth;
                Ok(())
            }
            _ => Err(Error::InvalidModSlot { slot, len }),
        }
    }

    pub fn slot(&self, slot: usize) -> Result<ModSlot> {
        self.slots[..self.len]
            .get(slot)
            .copied()
            .flatten()
            .ok_or(Error::InvalidModSlot {
                slot,
                len: self.len,
            })
    }

    pub fn slots(&self) -> impl Iterator<Item = ModSlot> + '_ {
        self.slots[..self.len].iter().flatten().copied()
    }

    pub fn in_use(&self) -> bool {
        self.len > 0
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn set_base(&mut self, base: f64) {
        self.base = base;
    }

    pub fn base(&self) -> f64 {
        self.base
    }

    pub fn lower(&self) -> f64 {
        self.lower
    }

    pub fn higher(&self) -> f64 {
        self.higher
    }

    /// Modulated value for this tick. Units missing from `values` count as zero.
    #[inline]
    pub fn value(&self, values: &[f64]) -> f64 {
        if self.len == 0 {
            return self.base;
        }
        let sum: f64 = self
            .slots()
            .map(|slot| values.get(slot.unit.0).copied().unwrap_or(0.0) * slot.depth)
            .sum();
        let modulated = self.base + self.higher * sum / self.len as f64;
        modulated.clamp(self.lower, self.higher)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn empty_dock_passes_base_through() {
        let dock = ModDock::new(0.0, 1.0, 0.3);
        assert!(!dock.in_use());
        assert_eq!(dock.value(&[1.0, 1.0]), 0.3);
    }

    #[test]
    fn dock_averages_and_clamps() {
        let mut dock = ModDock::new(0.0, 1.0, 0.5);
        dock.attach(ModUnitId(0), 1.0).unwrap();
        assert_abs_diff_eq!(dock.value(&[0.2]), 0.7);
        // clamped at the top
        assert_eq!(dock.value(&[1.0]), 1.0);

        dock.attach(ModUnitId(1), -1.0).unwrap();
        assert_abs_diff_eq!(dock.value(&[0.4, 0.2]), 0.6);
    }

    #[test]
    fn dock_rejects_overflow_and_bad_slots() {
        let mut dock = ModDock::new(0.0, 1.0, 0.0);
        for i in 0..MAX_MOD_SLOTS {
            assert_eq!(dock.attach(ModUnitId(i), 0.5).unwrap(), i);
        }
        assert!(matches!(
            dock.attach(ModUnitId(9), 0.5),
            Err(Error::ModDockFull(MAX_MOD_SLOTS))
        ));
        assert!(matches!(
            dock.set_depth(7, 0.1),
            Err(Error::InvalidModSlot { slot: 7, len: 4 })
        ));
        assert!(dock.set_depth(0, 2.0).is_err());
        assert_eq!(dock.slot(0).unwrap().depth, 0.5);
    }

    #[test]
    fn detach_keeps_order() {
        let mut dock = ModDock::new(0.0, 1.0, 0.0);
        for i in 0..3 {
            dock.attach(ModUnitId(i), 0.1 * (i + 1) as f64).unwrap();
        }
        let removed = dock.detach(1).unwrap();
        assert_eq!(removed.unit, ModUnitId(1));
        let units: Vec<_> = dock.slots().map(|s| s.unit).collect();
        assert_eq!(units, vec![ModUnitId(0), ModUnitId(2)]);
        assert!(dock.detach(2).is_err());
    }

    #[test]
    fn bank_ticks_each_unit_once() {
        let mut bank = ModBank::standard(1000.0);
        assert_eq!(bank.len(), 8);
        bank.macro_mut(ModUnitId(6)).unwrap().set_value(0.25).unwrap();
        bank.note_on();
        let first = bank.tick().to_vec();
        let second = bank.tick().to_vec();
        // a 10-sample attack moves 0.1 per tick
        assert_abs_diff_eq!(first[0], 0.1, epsilon = 1e-12);
        assert_abs_diff_eq!(second[0], 0.2, epsilon = 1e-12);
        assert_eq!(first[6], 0.25);
    }

    #[test]
    fn bank_checks_unit_kind() {
        let mut bank = ModBank::standard(44100.0);
        assert!(matches!(bank.lfo_mut(ModUnitId(0)), Err(Error::ModUnitKind(0))));
        assert!(matches!(bank.get(ModUnitId(42)), Err(Error::UnknownModUnit(42))));
        assert!(bank.envelope_mut(ModUnitId(3)).is_ok());
    }

    #[test]
    fn lfo_cycles_at_its_frequency() {
        let mut lfo = Lfo::new(Waveform::Sine, 1.0, 4.0);
        let values: Vec<f64> = (0..5).map(|_| lfo.tick()).collect();
        assert_abs_diff_eq!(values[0], 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(values[1], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(values[3], -1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(values[4], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn noise_lfo_holds_one_value_per_cycle() {
        let mut lfo = Lfo::new(Waveform::Noise, 1.0, 4.0);
        let values: Vec<f64> = (0..12).map(|_| lfo.tick()).collect();
        for cycle in values.chunks(4) {
            assert!(cycle.iter().all(|&v| v == cycle[0]));
            assert!((-1.0..1.0).contains(&cycle[0]));
        }
        assert!(values[0] != values[4] || values[4] != values[8]);
        assert!(values.iter().any(|&v| v != 0.0));
    }

    #[test]
    fn lfo_amplitude_scales_and_retrigger_restarts() {
        let mut lfo = Lfo::new(Waveform::Sine, 1.0, 4.0);
        lfo.set_amplitude(0.5).unwrap();
        assert!(lfo.set_amplitude(1.5).is_err());
        lfo.set_retrigger(true);
        lfo.tick();
        assert_abs_diff_eq!(lfo.tick(), 0.5, epsilon = 1e-12);
        lfo.note_on();
        assert_abs_diff_eq!(lfo.tick(), 0.0, epsilon = 1e-12);
    }
}
