//! Single-period lookup tables and the database that owns them.
//!
//! Tables are immutable once built. Every table carries one guard sample (a copy
//! of sample 0) so linear interpolation never has to wrap an index.

use crate::error::{Error, Result};
use crate::synth::prelude::{HashMap, TAU};
use crate::synth::waveform::Waveform;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub struct Wavetable {
    name: String,
    samples: Box<[f64]>,
}

impl Wavetable {
    /// Builds a table from one period of samples.
    pub fn new(name: impl Into<String>, period: Vec<f64>) -> Result<Self> {
        let name = name.into();
        if period.is_empty() {
            return Err(Error::EmptyWavetable(name));
        }
        let mut samples = period;
        samples.push(samples[0]);
        Ok(Self {
            name,
            samples: samples.into_boxed_slice(),
        })
    }

    pub fn from_waveform(waveform: Waveform, length: usize) -> Result<Self> {
        Self::new(waveform.name(), waveform.render(length))
    }

    /// Additive table built from `partials`. With `sigma` set, the Lanczos sigma
    /// factor is applied to each partial to tame Gibbs ripples.
    pub fn additive(
        name: impl Into<String>,
        partials: &[Partial],
        length: usize,
        sigma: bool,
    ) -> Result<Self> {
        let count = partials.len() as f64;
        let fundamental = TAU / length as f64;
        let mut period = vec![0.0; length];
        for partial in partials {
            let mut amp = partial.amplitude;
            if sigma {
                let x = std::f64::consts::PI * partial.number as f64 / count;
                amp *= x.sin() / x;
            }
            let increment = fundamental * partial.number as f64;
            for (n, sample) in period.iter_mut().enumerate() {
                *sample += (partial.phase_offset + increment * n as f64).sin() * amp;
            }
        }
        Self::new(name, period)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of samples in one period (the guard sample is not counted).
    pub fn len(&self) -> usize {
        self.samples.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Linearly interpolated value at fractional `phase` in `[0, len)`.
    /// Out-of-range phases are wrapped.
    #[inline]
    pub fn interpolate(&self, phase: f64) -> f64 {
        let len = self.len() as f64;
        let phase = if (0.0..len).contains(&phase) {
            phase
        } else {
            // rem_euclid can round up to exactly len for tiny negative inputs
            let wrapped = phase.rem_euclid(len);
            if wrapped >= len {
                0.0
            } else {
                wrapped
            }
        };
        let index = phase as usize;
        let frac = phase - index as f64;
        // index + 1 is at most len, which is the guard sample
        let a = self.samples[index];
        let b = self.samples[index + 1];
        a + (b - a) * frac
    }

    pub fn samples(&self) -> &[f64] {
        &self.samples[..self.len()]
    }
}

/// One sine partial of an additive table.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Partial {
    pub number: u32,
    pub amplitude: f64,
    pub phase_offset: f64,
}

impl Partial {
    pub fn new(number: u32, amplitude: f64) -> Self {
        Self {
            number,
            amplitude,
            phase_offset: 0.0,
        }
    }
}

/// Read-only table store keyed by name. Lookups are a single hash probe.
#[derive(Debug, Default, Clone)]
pub struct WavetableDb {
    tables: HashMap<String, Arc<Wavetable>>,
}

impl WavetableDb {
    pub fn new() -> Self {
        Self::default()
    }

    /// Database holding every `Waveform` plus additive square/saw tables.
    pub fn with_standard_tables(length: usize) -> Result<Self> {
        let mut db = Self::new();
        for waveform in Waveform::ALL {
            db.insert(Wavetable::from_waveform(waveform, length)?);
        }

        let odd: Vec<Partial> = (0..32)
            .map(|k| {
                let n = 2 * k + 1;
                Partial::new(n, 4.0 / (std::f64::consts::PI * n as f64))
            })
            .collect();
        db.insert(Wavetable::additive("square_additive", &odd, length, true)?);

        let all: Vec<Partial> = (1..=64)
            .map(|n| Partial::new(n, 2.0 / (std::f64::consts::PI * n as f64)))
            .collect();
        db.insert(Wavetable::additive("saw_additive", &all, length, true)?);

        Ok(db)
    }

    pub fn insert(&mut self, table: Wavetable) -> Arc<Wavetable> {
        let table = Arc::new(table);
        self.tables
            .insert(table.name().to_string(), Arc::clone(&table));
        table
    }

    pub fn get(&self, name: &str) -> Option<Arc<Wavetable>> {
        self.tables.get(name).cloned()
    }

    pub fn lookup(&self, name: &str) -> Result<Arc<Wavetable>> {
        self.get(name)
            .ok_or_else(|| Error::UnknownWavetable(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}
