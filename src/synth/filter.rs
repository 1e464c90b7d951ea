use crate::error::{check_range, Result};
use crate::synth::prelude::TAU;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterMode {
    LowPass,
    HighPass,
    BandPass,
}

/// Two-pole IIR filter (Direct Form I) with RBJ cookbook coefficients.
#[derive(Clone, Debug)]
pub struct Biquad {
    mode: FilterMode,
    cutoff: f64,
    q: f64,
    sample_rate: f64,
    dry_wet: f64,
    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,
    x1: f64,
    x2: f64,
    y1: f64,
    y2: f64,
}

impl Biquad {
    pub fn new(mode: FilterMode, cutoff: f64, q: f64, sample_rate: f64) -> Self {
        let mut filter = Self {
            mode,
            cutoff,
            q: q.max(0.01),
            sample_rate: sample_rate.max(1.0),
            dry_wet: 1.0,
            b0: 1.0,
            b1: 0.0,
            b2: 0.0,
            a1: 0.0,
            a2: 0.0,
            x1: 0.0,
            x2: 0.0,
            y1: 0.0,
            y2: 0.0,
        };
        filter.calc_coefficients();
        filter
    }

    pub fn low_pass(cutoff: f64, sample_rate: f64) -> Self {
        Self::new(FilterMode::LowPass, cutoff, std::f64::consts::FRAC_1_SQRT_2, sample_rate)
    }

    pub fn high_pass(cutoff: f64, sample_rate: f64) -> Self {
        Self::new(FilterMode::HighPass, cutoff, std::f64::consts::FRAC_1_SQRT_2, sample_rate)
    }

    pub fn band_pass(center: f64, q: f64, sample_rate: f64) -> Self {
        Self::new(FilterMode::BandPass, center, q, sample_rate)
    }

    fn calc_coefficients(&mut self) {
        // Clamp cutoff to avoid issues, ensure it's below Nyquist
        let cutoff = self.cutoff.clamp(1.0, self.sample_rate * 0.49);
        let omega = TAU * cutoff / self.sample_rate;
        let cos_omega = omega.cos();
        let sin_omega = omega.sin();
        let alpha = sin_omega / (2.0 * self.q);

        let (b0, b1, b2) = match self.mode {
            FilterMode::LowPass => (
                (1.0 - cos_omega) / 2.0,
                1.0 - cos_omega,
                (1.0 - cos_omega) / 2.0,
            ),
            FilterMode::HighPass => (
                (1.0 + cos_omega) / 2.0,
                -(1.0 + cos_omega),
                (1.0 + cos_omega) / 2.0,
            ),
            // constant 0 dB peak gain
            FilterMode::BandPass => (alpha, 0.0, -alpha),
        };
        let a0 = 1.0 + alpha;
        self.b0 = b0 / a0;
        self.b1 = b1 / a0;
        self.b2 = b2 / a0;
        self.a1 = -2.0 * cos_omega / a0;
        self.a2 = (1.0 - alpha) / a0;
    }

    pub fn set_cutoff(&mut self, cutoff: f64) -> Result<()> {
        self.cutoff = check_range("cutoff", cutoff, 0.0, self.sample_rate / 2.0)?;
        self.calc_coefficients();
        Ok(())
    }

    pub fn set_q(&mut self, q: f64) -> Result<()> {
        self.q = check_range("q", q, 0.01, 20.0)?;
        self.calc_coefficients();
        Ok(())
    }

    pub fn set_mode(&mut self, mode: FilterMode) {
        self.mode = mode;
        self.calc_coefficients();
    }

    pub fn set_dry_wet(&mut self, amount: f64) -> Result<()> {
        self.dry_wet = check_range("dry/wet", amount, 0.0, 1.0)?;
        Ok(())
    }

    pub fn mode(&self) -> FilterMode {
        self.mode
    }

    pub fn cutoff(&self) -> f64 {
        self.cutoff
    }

    /// Processes a single sample.
    #[inline]
    pub fn process(&mut self, input: f64) -> f64 {
        // y[n] = b0*x[n] + b1*x[n-1] + b2*x[n-2] - a1*y[n-1] - a2*y[n-2]
        let output = self.b0 * input + self.b1 * self.x1 + self.b2 * self.x2
            - self.a1 * self.y1
            - self.a2 * self.y2;

        self.x2 = self.x1;
        self.x1 = input;
        self.y2 = self.y1;
        self.y1 = output;

        input * (1.0 - self.dry_wet) + output * self.dry_wet
    }

    pub fn reset(&mut self) {
        self.x1 = 0.0;
        self.x2 = 0.0;
        self.y1 = 0.0;
        self.y2 = 0.0;
    }
}
