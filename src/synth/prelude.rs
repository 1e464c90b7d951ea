// Shared constants and small helpers for the synthesis modules

pub use std::collections::HashMap;
pub use std::fmt;

pub use core::f64::consts::{PI, TAU};

/// Reference pitch for MIDI note 69 (A4).
pub const A4_FREQUENCY: f64 = 440.0;
pub const A4_NOTE: u8 = 69;

/// Deterministic noise source for table generation.
pub fn noise_source(seed: u64) -> impl FnMut() -> f64 {
    use rand::rngs::SmallRng;
    use rand::{Rng, SeedableRng};
    let mut rng = SmallRng::seed_from_u64(seed);
    move || rng.random_range(-1.0..1.0)
}

/// Converts a length in seconds to a whole number of samples.
pub fn seconds_to_samples(seconds: f64, sample_rate: f64) -> u64 {
    (seconds.max(0.0) * sample_rate).round() as u64
}
