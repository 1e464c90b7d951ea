//! Multi-segment envelope.
//!
//! Each segment ramps linearly from the level the envelope had when the segment
//! was entered to the segment's target level, over a whole number of samples.
//! Using integer lengths keeps long notes free of accumulated rounding drift.

use crate::error::{check_range, Error, Result};
use crate::synth::prelude::seconds_to_samples;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Segment {
    pub level: f64,
    pub length: u64,
}

impl Segment {
    pub fn new(level: f64, length: u64) -> Self {
        Self { level, length }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeState {
    Idle,
    Running,
    Released,
    Done,
}

#[derive(Debug, Clone)]
pub struct Envelope {
    segments: Vec<Segment>,
    release: Option<usize>,
    sustain_enabled: bool,
    state: EnvelopeState,
    current: usize,
    position: u64,
    start_level: f64,
    level: f64,
}

impl Envelope {
    /// `release` designates the segment note-off jumps to.
    pub fn new(segments: Vec<Segment>, release: Option<usize>) -> Result<Self> {
        for segment in &segments {
            check_range("segment level", segment.level, 0.0, 1.0)?;
        }
        if let Some(index) = release {
            if index >= segments.len() {
                return Err(Error::SegmentOutOfRange {
                    index,
                    len: segments.len(),
                });
            }
        }
        Ok(Self {
            segments,
            release,
            sustain_enabled: release.is_some(),
            state: EnvelopeState::Idle,
            current: 0,
            position: 0,
            start_level: 0.0,
            level: 0.0,
        })
    }

    /// Attack/decay/sustain/release envelope; times in seconds.
    pub fn adsr(
        attack: f64,
        decay: f64,
        sustain: f64,
        release: f64,
        sample_rate: f64,
    ) -> Result<Self> {
        let sustain = check_range("sustain", sustain, 0.0, 1.0)?;
        Self::new(
            vec![
                Segment::new(1.0, seconds_to_samples(attack, sample_rate)),
                Segment::new(sustain, seconds_to_samples(decay, sample_rate)),
                Segment::new(0.0, seconds_to_samples(release, sample_rate)),
            ],
            Some(2),
        )
    }

    /// Restarts from segment 0, overriding any release in flight.
    pub fn note_on(&mut self) {
        self.state = EnvelopeState::Running;
        self.enter(0);
    }

    /// Jumps to the release segment unless already there or past it.
    pub fn note_off(&mut self) {
        if self.state != EnvelopeState::Running {
            return;
        }
        if let Some(release) = self.release {
            if self.current < release {
                self.enter(release);
            }
            if self.state == EnvelopeState::Running {
                self.state = EnvelopeState::Released;
            }
        }
    }

    fn enter(&mut self, index: usize) {
        self.current = index;
        self.position = 0;
        self.start_level = self.level;
        if index >= self.segments.len() {
            self.state = EnvelopeState::Done;
        } else if Some(index) == self.release && self.state == EnvelopeState::Running {
            self.state = EnvelopeState::Released;
        }
    }

    /// Whether the envelope is parked at the end of the segment before release.
    fn holding(&self) -> bool {
        self.sustain_enabled
            && self.state == EnvelopeState::Running
            && self.release == Some(self.current + 1)
            && self.position >= self.segments[self.current].length
    }

    /// Advances one sample and returns the new level.
    pub fn update(&mut self) -> f64 {
        if !self.is_active() || self.holding() {
            return self.level;
        }

        // finished segments (including zero-length ones) hand over before stepping
        while self.position >= self.segments[self.current].length {
            self.level = self.segments[self.current].level;
            if self.release == Some(self.current + 1) && self.sustain_enabled {
                return self.level;
            }
            self.enter(self.current + 1);
            if self.state == EnvelopeState::Done {
                return self.level;
            }
        }

        let segment = self.segments[self.current];
        self.position += 1;
        self.level = if self.position == segment.length {
            segment.level
        } else {
            let t = self.position as f64 / segment.length as f64;
            self.start_level + (segment.level - self.start_level) * t
        };

        // hand over right away so the state reflects completion
        if self.position == segment.length
            && !(self.sustain_enabled && self.release == Some(self.current + 1))
            && self.current + 1 >= self.segments.len()
        {
            self.enter(self.current + 1);
        }

        self.level
    }

    pub fn level(&self) -> f64 {
        self.level
    }

    pub fn state(&self) -> EnvelopeState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        !matches!(self.state, EnvelopeState::Idle | EnvelopeState::Done)
    }

    pub fn current_segment(&self) -> usize {
        self.current
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn release_segment(&self) -> Option<usize> {
        self.release
    }

    pub fn set_sustain_enabled(&mut self, enabled: bool) {
        self.sustain_enabled = enabled;
    }

    pub fn sustain_enabled(&self) -> bool {
        self.sustain_enabled
    }

    /// Replaces one segment's target level and length.
    pub fn set_segment(&mut self, index: usize, level: f64, length: u64) -> Result<()> {
        let len = self.segments.len();
        let segment = self
            .segments
            .get_mut(index)
            .ok_or(Error::SegmentOutOfRange { index, len })?;
        segment.level = check_range("segment level", level, 0.0, 1.0)?;
        segment.length = length;
        if index == self.current {
            self.position = self.position.min(length);
        }
        Ok(())
    }

    /// Returns to `Idle` at level zero.
    pub fn reset(&mut self) {
        self.state = EnvelopeState::Idle;
        self.current = 0;
        self.position = 0;
        self.start_level = 0.0;
        self.level = 0.0;
    }
}

impl Default for Envelope {
    fn default() -> Self {
        Self {
            segments: vec![
                Segment::new(1.0, 441),
                Segment::new(0.7, 4410),
                Segment::new(0.0, 8820),
            ],
            release: Some(2),
            sustain_enabled: true,
            state: EnvelopeState::Idle,
            current: 0,
            position: 0,
            start_level: 0.0,
            level: 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rise_and_fall() -> Envelope {
        Envelope::new(vec![Segment::new(1.0, 1000), Segment::new(0.0, 2000)], None).unwrap()
    }

    #[test]
    fn hits_segment_targets_exactly() {
        let mut env = rise_and_fall();
        env.note_on();
        let levels: Vec<f64> = (0..3000).map(|_| env.update()).collect();
        assert_eq!(levels[999], 1.0);
        assert_eq!(levels[2999], 0.0);
        assert!(levels[..1000].windows(2).all(|w| w[0] <= w[1]));
        assert!(levels[999..].windows(2).all(|w| w[0] >= w[1]));
        assert_eq!(env.state(), EnvelopeState::Done);
        assert!(!env.is_active());
    }

    #[test]
    fn boundary_sample_is_not_repeated() {
        let mut env = rise_and_fall();
        env.note_on();
        for _ in 0..1000 {
            env.update();
        }
        let after = env.update();
        assert!(after < 1.0);
        assert_eq!(env.current_segment(), 1);
    }

    #[test]
    fn idle_outputs_zero() {
        let mut env = rise_and_fall();
        assert_eq!(env.update(), 0.0);
        assert_eq!(env.state(), EnvelopeState::Idle);
        env.note_off();
        assert_eq!(env.state(), EnvelopeState::Idle);
    }

    #[test]
    fn sustain_holds_until_note_off() {
        let mut env = Envelope::new(
            vec![
                Segment::new(1.0, 10),
                Segment::new(0.5, 10),
                Segment::new(0.0, 10),
            ],
            Some(2),
        )
        .unwrap();
        env.note_on();
        for _ in 0..100 {
            env.update();
        }
        assert_eq!(env.level(), 0.5);
        assert_eq!(env.state(), EnvelopeState::Running);

        env.note_off();
        assert_eq!(env.state(), EnvelopeState::Released);
        assert_eq!(env.current_segment(), 2);
        let levels: Vec<f64> = (0..10).map(|_| env.update()).collect();
        assert_eq!(levels[9], 0.0);
        assert_eq!(env.state(), EnvelopeState::Done);
    }

    #[test]
    fn without_sustain_release_follows_on_its_own() {
        let mut env = Envelope::new(
            vec![
                Segment::new(1.0, 10),
                Segment::new(0.5, 10),
                Segment::new(0.0, 10),
            ],
            Some(2),
        )
        .unwrap();
        env.set_sustain_enabled(false);
        assert!(!env.sustain_enabled());
        env.note_on();
        let levels: Vec<f64> = (0..30).map(|_| env.update()).collect();
        assert_eq!(levels[19], 0.5);
        assert_eq!(levels[29], 0.0);
        assert_eq!(env.state(), EnvelopeState::Done);
    }

    #[test]
    fn early_note_off_releases_from_current_level() {
        let mut env = Envelope::new(
            vec![Segment::new(1.0, 100), Segment::new(0.0, 100)],
            Some(1),
        )
        .unwrap();
        env.note_on();
        for _ in 0..50 {
            env.update();
        }
        let before = env.level();
        env.note_off();
        let first = env.update();
        assert!(first < before);
        assert!((before - first) < 0.01);
    }

    #[test]
    fn note_on_resets_a_release_in_flight() {
        let mut env = Envelope::adsr(0.001, 0.001, 0.5, 0.01, 10000.0).unwrap();
        env.note_on();
        for _ in 0..30 {
            env.update();
        }
        env.note_off();
        env.update();
        env.note_on();
        assert_eq!(env.state(), EnvelopeState::Running);
        assert_eq!(env.current_segment(), 0);
    }

    #[test]
    fn zero_length_segment_is_skipped() {
        let mut env =
            Envelope::new(vec![Segment::new(1.0, 0), Segment::new(0.0, 4)], None).unwrap();
        env.note_on();
        let first = env.update();
        assert_eq!(first, 0.75);
    }

    #[test]
    fn set_segment_rejects_bad_index() {
        let mut env = rise_and_fall();
        assert!(matches!(
            env.set_segment(5, 0.5, 10),
            Err(Error::SegmentOutOfRange { index: 5, len: 2 })
        ));
        assert_eq!(env.segments()[0], Segment::new(1.0, 1000));
    }

    #[test]
    fn release_index_must_exist() {
        assert!(Envelope::new(vec![Segment::new(1.0, 10)], Some(3)).is_err());
    }
}
