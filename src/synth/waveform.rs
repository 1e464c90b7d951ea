use crate::synth::prelude::{noise_source, PI, TAU};

/// Mathematical waveforms used to fill the standard wavetables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Waveform {
    Sine,
    Square,
    Sawtooth,
    SawtoothSmooth,
    Triangle,
    Noise,
}

impl Waveform {
    pub const ALL: [Waveform; 6] = [
        Waveform::Sine,
        Waveform::Square,
        Waveform::Sawtooth,
        Waveform::SawtoothSmooth,
        Waveform::Triangle,
        Waveform::Noise,
    ];

    /// Key under which the rendered table is stored in the database.
    pub fn name(self) -> &'static str {
        match self {
            Waveform::Sine => "sine",
            Waveform::Square => "square",
            Waveform::Sawtooth => "saw",
            Waveform::SawtoothSmooth => "saw_smooth",
            Waveform::Triangle => "triangle",
            Waveform::Noise => "noise",
        }
    }

    /// Value at `phase` radians. Noise has no closed form and returns 0 here.
    pub fn evaluate(self, phase: f64) -> f64 {
        match self {
            Waveform::Sine => phase.sin(),
            Waveform::Square => {
                if phase.sin() >= 0.0 {
                    1.0
                } else {
                    -1.0
                }
            }
            Waveform::Sawtooth => {
                let cycles = phase / TAU;
                2.0 * (cycles - (cycles + 0.5).floor())
            }
            Waveform::SawtoothSmooth => 0.75 * phase.sin() / (1.25 + phase.cos()),
            Waveform::Triangle => (2.0 / PI) * phase.sin().asin(),
            Waveform::Noise => 0.0,
        }
    }

    /// Renders one period into `length` samples.
    pub fn render(self, length: usize) -> Vec<f64> {
        match self {
            Waveform::Noise => {
                let mut next = noise_source(0x5eed);
                (0..length).map(|_| next()).collect()
            }
            _ => {
                let increment = TAU / length as f64;
                (0..length)
                    .map(|n| self.evaluate(increment * n as f64))
                    .collect()
            }
        }
    }
}
