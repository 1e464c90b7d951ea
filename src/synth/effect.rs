use super::delayline::{Delay, Echo};
use super::filter::{Biquad, FilterMode};
use crate::error::{check_range, Error, Result};

#[derive(Debug)]
pub enum EffectType {
    Filter(Biquad),
    Delay(Delay),
    Echo(Echo),
}

/// A runtime-adjustable effect setting. Times are in seconds.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum EffectParam {
    FilterMode(FilterMode),
    Cutoff(f64),
    Q(f64),
    DelayLength(f64),
    Feedback(f64),
    DecayRate(f64),
    DecayTime(f64),
    DryWet(f64),
}

impl EffectParam {
    pub fn name(&self) -> &'static str {
        match self {
            EffectParam::FilterMode(_) => "filter mode",
            EffectParam::Cutoff(_) => "cutoff",
            EffectParam::Q(_) => "q",
            EffectParam::DelayLength(_) => "delay length",
            EffectParam::Feedback(_) => "feedback",
            EffectParam::DecayRate(_) => "decay rate",
            EffectParam::DecayTime(_) => "decay time",
            EffectParam::DryWet(_) => "dry/wet",
        }
    }

    /// Range check that needs no effect instance. Delay lengths are bounded
    /// again by the line they are applied to.
    pub fn validate(self, sample_rate: f64) -> Result<Self> {
        match self {
            EffectParam::FilterMode(_) => {}
            EffectParam::Cutoff(hz) => {
                check_range("cutoff", hz, 0.0, sample_rate / 2.0)?;
            }
            EffectParam::Q(q) => {
                check_range("q", q, 0.01, 20.0)?;
            }
            EffectParam::DelayLength(seconds) | EffectParam::DecayTime(seconds) => {
                check_range(self.name(), seconds, 0.0, f64::MAX)?;
            }
            EffectParam::Feedback(amount)
            | EffectParam::DecayRate(amount)
            | EffectParam::DryWet(amount) => {
                check_range(self.name(), amount, 0.0, 1.0)?;
            }
        }
        Ok(self)
    }
}

/// One slot of a bus effect chain. Bypassed slots pass samples through.
#[derive(Debug)]
pub struct Effect {
    pub effect: EffectType,
    active: bool,
}

impl Effect {
    pub fn new(effect: EffectType) -> Self {
        Self {
            effect,
            active: true,
        }
    }

    #[inline]
    pub fn process(&mut self, sample: f64) -> f64 {
        if !self.active {
            return sample;
        }
        match &mut self.effect {
            EffectType::Filter(filter) => filter.process(sample),
            EffectType::Delay(delay) => delay.process(sample),
            EffectType::Echo(echo) => echo.process(sample),
        }
    }

    pub fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Clears filter memory and delay lines.
    pub fn reset(&mut self) {
        match &mut self.effect {
            EffectType::Filter(filter) => filter.reset(),
            EffectType::Delay(delay) => delay.reset(),
            EffectType::Echo(echo) => echo.reset(),
        }
    }

    /// Applies `param`, or fails with `EffectParam` when this kind of effect
    /// has no such setting. A failed call leaves the effect unchanged.
    pub fn set_param(&mut self, param: EffectParam) -> Result<()> {
        let name = self.name();
        let delay = match &mut self.effect {
            EffectType::Filter(filter) => {
                return match param {
                    EffectParam::FilterMode(mode) => {
                        filter.set_mode(mode);
                        Ok(())
                    }
                    EffectParam::Cutoff(hz) => filter.set_cutoff(hz),
                    EffectParam::Q(q) => filter.set_q(q),
                    EffectParam::DryWet(amount) => filter.set_dry_wet(amount),
                    _ => Err(Error::EffectParam {
                        effect: name,
                        param: param.name(),
                    }),
                };
            }
            EffectType::Delay(delay) => delay,
            EffectType::Echo(echo) => echo.delay_mut(),
        };
        match param {
            EffectParam::DelayLength(seconds) => delay.set_length(seconds),
            EffectParam::Feedback(amount) => delay.set_feedback(amount),
            EffectParam::DecayRate(rate) => delay.set_decay_rate(rate),
            EffectParam::DecayTime(seconds) => delay.set_decay_time(seconds),
            EffectParam::DryWet(amount) => delay.set_dry_wet(amount),
            _ => Err(Error::EffectParam {
                effect: name,
                param: param.name(),
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        match self.effect {
            EffectType::Filter(_) => "filter",
            EffectType::Delay(_) => "delay",
            EffectType::Echo(_) => "echo",
        }
    }
}

impl From<Biquad> for Effect {
    fn from(filter: Biquad) -> Self {
        Self::new(EffectType::Filter(filter))
    }
}

impl From<Delay> for Effect {
    fn from(delay: Delay) -> Self {
        Self::new(EffectType::Delay(delay))
    }
}

impl From<Echo> for Effect {
    fn from(echo: Echo) -> Self {
        Self::new(EffectType::Echo(echo))
    }
}
