use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Longest recording chunk a config may ask for.
pub const MAX_RECORDING_CHUNK_SECONDS: f64 = 600.0;

/// Engine configuration, loadable from JSON. Missing fields take defaults.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthConfig {
    pub sample_rate: u32,
    pub channels: u16,
    /// Frames per device buffer.
    pub frames: u32,
    pub wavetable_length: usize,
    pub note_queue_capacity: usize,
    pub command_queue_capacity: usize,
    pub master_amp: f64,
    pub algorithm: u8,
    /// Length of each preallocated recording chunk. A take may span any
    /// number of chunks.
    pub recording_chunk_seconds: f64,
    pub velocity_sensitive: bool,
    pub velocity_curve: f64,
    /// Master amplitude envelope (seconds, sustain level).
    pub attack: f64,
    pub decay: f64,
    pub sustain: f64,
    pub release: f64,
}

impl Default for SynthConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            channels: 2,
            frames: 256,
            wavetable_length: 4096,
            note_queue_capacity: 128,
            command_queue_capacity: 256,
            master_amp: 0.65,
            algorithm: 0,
            recording_chunk_seconds: 5.0,
            velocity_sensitive: true,
            velocity_curve: 1.5,
            attack: 0.01,
            decay: 0.1,
            sustain: 0.8,
            release: 0.3,
        }
    }
}

impl SynthConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(Error::InvalidConfig("sample_rate must be > 0".into()));
        }
        if self.channels == 0 {
            return Err(Error::InvalidConfig("channels must be > 0".into()));
        }
        if self.frames == 0 {
            return Err(Error::InvalidConfig("frames must be > 0".into()));
        }
        if self.wavetable_length < 2 {
            return Err(Error::InvalidConfig(
                "wavetable_length must be at least 2".into(),
            ));
        }
        if self.note_queue_capacity == 0 || self.command_queue_capacity == 0 {
            return Err(Error::InvalidConfig("queue capacities must be > 0".into()));
        }
        if !(0.0..=1.0).contains(&self.master_amp) {
            return Err(Error::InvalidConfig(format!(
                "master_amp {} not in 0..=1",
                self.master_amp
            )));
        }
        if self.algorithm > 11 {
            return Err(Error::InvalidAlgorithm(self.algorithm));
        }
        if !(0.0..=1.0).contains(&self.sustain) {
            return Err(Error::InvalidConfig(format!(
                "sustain {} not in 0..=1",
                self.sustain
            )));
        }
        for (name, value) in [
            ("attack", self.attack),
            ("decay", self.decay),
            ("release", self.release),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(Error::InvalidConfig(format!("{name} must be >= 0")));
            }
        }
        if !(self.recording_chunk_seconds > 0.0
            && self.recording_chunk_seconds <= MAX_RECORDING_CHUNK_SECONDS)
        {
            return Err(Error::InvalidConfig(format!(
                "recording_chunk_seconds {} not in (0, {}]",
                self.recording_chunk_seconds, MAX_RECORDING_CHUNK_SECONDS
            )));
        }
        Ok(())
    }

    pub fn sample_rate_f64(&self) -> f64 {
        self.sample_rate as f64
    }

    /// Frames per recording chunk, at least one.
    pub fn recording_chunk_frames(&self) -> usize {
        ((self.recording_chunk_seconds * self.sample_rate as f64).ceil() as usize).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_fills_defaults() {
        let config = SynthConfig::from_json_str(r#"{ "sample_rate": 48000, "algorithm": 5 }"#)
            .unwrap();
        assert_eq!(config.sample_rate, 48000);
        assert_eq!(config.algorithm, 5);
        assert_eq!(config.frames, SynthConfig::default().frames);
    }

    #[test]
    fn rejects_bad_algorithm() {
        let err = SynthConfig::from_json_str(r#"{ "algorithm": 12 }"#).unwrap_err();
        assert!(matches!(err, Error::InvalidAlgorithm(12)));
    }

    #[test]
    fn rejects_zero_frames() {
        assert!(SynthConfig::from_json_str(r#"{ "frames": 0 }"#).is_err());
    }

    #[test]
    fn recording_chunk_length_is_bounded() {
        for json in [
            r#"{ "recording_chunk_seconds": 1e300 }"#,
            r#"{ "recording_chunk_seconds": 0.0 }"#,
            r#"{ "recording_chunk_seconds": -2.0 }"#,
        ] {
            let err = SynthConfig::from_json_str(json).unwrap_err();
            assert!(matches!(err, Error::InvalidConfig(_)), "{json}");
        }
        let config = SynthConfig::from_json_str(r#"{ "recording_chunk_seconds": 0.01 }"#).unwrap();
        assert_eq!(config.recording_chunk_frames(), 441);
    }
}
