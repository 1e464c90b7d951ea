use crate::error::{check_range, Result};

// Smallest delay the fractional read supports
const MIN_DELAY_SAMPLES: f64 = 1.0;
// Extra slots so the interpolation neighbour is never the write slot
const INTERPOLATION_POINTS_MARGIN: usize = 2;

/// Circular buffer with a fractional, linearly interpolated read tap.
/// The buffer is sized once at construction and never reallocated.
#[derive(Clone, Debug)]
pub struct DelayLine {
    buffer: Box<[f64]>,
    write_pos: usize,
    delay_samples: f64,
}

impl DelayLine {
    pub fn new(max_delay_samples: usize) -> Self {
        let len = max_delay_samples.max(1) + INTERPOLATION_POINTS_MARGIN;
        Self {
            buffer: vec![0.0; len].into_boxed_slice(),
            write_pos: 0,
            delay_samples: MIN_DELAY_SAMPLES,
        }
    }

    /// Longest delay this line can hold.
    pub fn max_delay_samples(&self) -> f64 {
        (self.buffer.len() - INTERPOLATION_POINTS_MARGIN) as f64
    }

    pub fn set_delay_samples(&mut self, delay_samples: f64) -> Result<()> {
        self.delay_samples = check_range(
            "delay length",
            delay_samples,
            MIN_DELAY_SAMPLES,
            self.max_delay_samples(),
        )?;
        Ok(())
    }

    pub fn delay_samples(&self) -> f64 {
        self.delay_samples
    }

    pub fn reset(&mut self) {
        self.buffer.fill(0.0);
        self.write_pos = 0;
    }

    /// Value written `delay_samples` ago.
    #[inline]
    pub fn read(&self) -> f64 {
        let len = self.buffer.len() as f64;
        let read_pos = (self.write_pos as f64 - self.delay_samples).rem_euclid(len);
        let idx0 = (read_pos.floor() as usize).min(self.buffer.len() - 1);
        let idx1 = (idx0 + 1) % self.buffer.len();
        let fraction = read_pos - idx0 as f64;
        let val0 = self.buffer[idx0];
        let val1 = self.buffer[idx1];
        val0 + fraction * (val1 - val0)
    }

    #[inline]
    pub fn write(&mut self, sample: f64) {
        self.buffer[self.write_pos] = sample;
        self.write_pos = (self.write_pos + 1) % self.buffer.len();
    }
}

#[inline]
fn dry_wet(dry: f64, wet: f64, amount: f64) -> f64 {
    dry * (1.0 - amount) + wet * amount
}

/// Feedback delay. The repeats decay by `decay_rate` every `decay_time`.
#[derive(Clone, Debug)]
pub struct Delay {
    line: DelayLine,
    sample_rate: f64,
    feedback: f64,
    decay_rate: f64,
    decay_time: f64,
    decay_value: f64,
    dry_wet: f64,
}

impl Delay {
    /// `capacity` and `length` are in seconds.
    pub fn new(capacity: f64, length: f64, sample_rate: f64) -> Result<Self> {
        let capacity_samples = (capacity.max(0.0) * sample_rate).ceil() as usize;
        let mut delay = Self {
            line: DelayLine::new(capacity_samples),
            sample_rate,
            feedback: 0.5,
            decay_rate: 1.0,
            decay_time: 0.0,
            decay_value: 1.0,
            dry_wet: 0.5,
        };
        delay.set_length(length)?;
        Ok(delay)
    }

    pub fn set_length(&mut self, seconds: f64) -> Result<()> {
        self.line.set_delay_samples(seconds * self.sample_rate)?;
        self.calc_decay();
        Ok(())
    }

    pub fn length(&self) -> f64 {
        self.line.delay_samples() / self.sample_rate
    }

    pub fn set_feedback(&mut self, feedback: f64) -> Result<()> {
        self.feedback = check_range("feedback", feedback, 0.0, 1.0)?;
        Ok(())
    }

    pub fn set_decay_rate(&mut self, rate: f64) -> Result<()> {
        self.decay_rate = check_range("decay rate", rate, 0.0, 1.0)?;
        self.calc_decay();
        Ok(())
    }

    /// Seconds over which the repeats fall by `decay_rate`. Zero disables decay.
    pub fn set_decay_time(&mut self, seconds: f64) -> Result<()> {
        self.decay_time = check_range("decay time", seconds, 0.0, f64::MAX)? * self.sample_rate;
        self.calc_decay();
        Ok(())
    }

    pub fn set_dry_wet(&mut self, amount: f64) -> Result<()> {
        self.dry_wet = check_range("dry/wet", amount, 0.0, 1.0)?;
        Ok(())
    }

    fn calc_decay(&mut self) {
        self.decay_value = if self.decay_time == 0.0 {
            1.0
        } else {
            self.decay_rate
                .powf(self.line.delay_samples() / self.decay_time)
        };
    }

    /// Delayed signal only, before the dry/wet mix.
    #[inline]
    fn wet(&mut self, sample: f64) -> f64 {
        let output = self.line.read() * self.decay_value;
        self.line.write(sample + output * self.feedback);
        output
    }

    #[inline]
    pub fn process(&mut self, sample: f64) -> f64 {
        let wet = self.wet(sample);
        dry_wet(sample, wet, self.dry_wet)
    }

    pub fn reset(&mut self) {
        self.line.reset();
    }
}

/// Delay whose wet path keeps the dry signal on top of the repeats.
#[derive(Clone, Debug)]
pub struct Echo {
    delay: Delay,
}

impl Echo {
    pub fn new(capacity: f64, length: f64, sample_rate: f64) -> Result<Self> {
        Ok(Self {
            delay: Delay::new(capacity, length, sample_rate)?,
        })
    }

    pub fn delay_mut(&mut self) -> &mut Delay {
        &mut self.delay
    }

    #[inline]
    pub fn process(&mut self, sample: f64) -> f64 {
        let wet = sample + self.delay.wet(sample);
        dry_wet(sample, wet, self.delay.dry_wet)
    }

    pub fn reset(&mut self) {
        self.delay.reset();
    }
}
