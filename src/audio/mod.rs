//! Bridge between the synthesis pipeline and an audio device.

#[cfg(feature = "native")]
mod cpal_backend;
#[cfg(feature = "native")]
pub use self::cpal_backend::CpalBackend;

use crate::error::{Fault, Result};
use crate::synth::{Frame, Synth};
use hound::{SampleFormat, WavSpec, WavWriter};
use std::path::Path;

pub trait AudioBackend {
    /// Opens `device` (the default output when `None`) without starting it.
    fn open(&mut self, device: Option<&str>, channels: u16, frames: u32) -> Result<()>;
    fn close(&mut self);
    fn start(&mut self) -> Result<()>;
    /// Pauses output. The callback in flight is allowed to finish.
    fn stop(&mut self) -> Result<()>;
}

/// Anything that produces frames on demand.
pub trait FrameSource {
    fn next_frame(&mut self) -> std::result::Result<Frame, Fault>;

    /// Called once after a fault, before the next buffer.
    fn recover(&mut self) {}
}

impl FrameSource for Synth {
    #[inline]
    fn next_frame(&mut self) -> std::result::Result<Frame, Fault> {
        self.tick()
    }

    fn recover(&mut self) {
        Synth::recover(self);
    }
}

/// Fills an interleaved device buffer, one `next_frame()` per frame.
///
/// Channel 0 gets the left sample and channel 1 the right; a mono device gets
/// their average and any further channels stay silent. On a fault the rest of
/// the buffer is zeroed and the fault is returned for counting.
#[inline]
pub fn render_buffer<S: FrameSource + ?Sized>(
    source: &mut S,
    out: &mut [f32],
    channels: usize,
) -> std::result::Result<(), Fault> {
    if channels == 0 {
        out.fill(0.0);
        return Ok(());
    }
    for (i, chunk) in out.chunks_mut(channels).enumerate() {
        let frame = match source.next_frame() {
            Ok(frame) => frame,
            Err(fault) => {
                out[i * channels..].fill(0.0);
                source.recover();
                return Err(fault);
            }
        };
        match chunk {
            [mono] => *mono = (0.5 * (frame.left + frame.right)) as f32,
            [left, right, rest @ ..] => {
                *left = frame.left as f32;
                *right = frame.right as f32;
                rest.fill(0.0);
            }
            [] => {}
        }
    }
    Ok(())
}

/// A finished recording, written out on the control side.
#[derive(Debug, Clone, PartialEq)]
pub struct Recording {
    frames: Vec<Frame>,
    sample_rate: u32,
}

impl Recording {
    pub fn new(frames: Vec<Frame>, sample_rate: u32) -> Self {
        Self {
            frames,
            sample_rate,
        }
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Length in seconds.
    pub fn duration(&self) -> f64 {
        self.frames.len() as f64 / self.sample_rate as f64
    }

    /// Writes a 32-bit float stereo WAV file.
    pub fn write_wav(&self, path: impl AsRef<Path>) -> Result<()> {
        let spec = WavSpec {
            channels: 2,
            sample_rate: self.sample_rate,
            bits_per_sample: 32,
            sample_format: SampleFormat::Float,
        };
        let mut writer = WavWriter::create(path.as_ref(), spec)?;
        for frame in &self.frames {
            writer.write_sample(frame.left as f32)?;
            writer.write_sample(frame.right as f32)?;
        }
        writer.finalize()?;
        tracing::info!(
            path = %path.as_ref().display(),
            frames = self.frames.len(),
            "Recording saved"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Ramp {
        next: f64,
        fail_at: Option<usize>,
        produced: usize,
        recovered: bool,
    }

    impl Ramp {
        fn new(fail_at: Option<usize>) -> Self {
            Self {
                next: 0.0,
                fail_at,
                produced: 0,
                recovered: false,
            }
        }
    }

    impl FrameSource for Ramp {
        fn next_frame(&mut self) -> std::result::Result<Frame, Fault> {
            if self.fail_at == Some(self.produced) {
                return Err(Fault::NonFiniteSample);
            }
            self.produced += 1;
            self.next += 0.125;
            Ok(Frame::new(self.next, -self.next))
        }

        fn recover(&mut self) {
            self.recovered = true;
        }
    }

    #[test]
    fn interleaves_one_frame_per_chunk() {
        let mut source = Ramp::new(None);
        let mut out = [1.0f32; 8];
        render_buffer(&mut source, &mut out, 2).unwrap();
        assert_eq!(source.produced, 4);
        assert_eq!(out, [0.125, -0.125, 0.25, -0.25, 0.375, -0.375, 0.5, -0.5]);
    }

    #[test]
    fn mono_and_surround_layouts() {
        let mut source = Ramp::new(None);
        let mut mono = [1.0f32; 3];
        render_buffer(&mut source, &mut mono, 1).unwrap();
        assert_eq!(mono, [0.0; 3]);

        let mut quad = [1.0f32; 8];
        render_buffer(&mut source, &mut quad, 4).unwrap();
        assert_eq!(quad[2..4], [0.0, 0.0]);
        assert_eq!(quad[4], 0.625);
    }

    #[test]
    fn fault_silences_rest_of_buffer() {
        let mut source = Ramp::new(Some(2));
        let mut out = [1.0f32; 8];
        let result = render_buffer(&mut source, &mut out, 2);
        assert_eq!(result, Err(Fault::NonFiniteSample));
        assert_eq!(out[..4], [0.125, -0.125, 0.25, -0.25]);
        assert_eq!(out[4..], [0.0; 4]);
        assert!(source.recovered);
    }

    #[test]
    fn wav_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("take.wav");
        let frames: Vec<Frame> = (0..32).map(|n| Frame::new(n as f64 / 32.0, 0.0)).collect();
        let recording = Recording::new(frames, 48000);
        recording.write_wav(&path).unwrap();

        let mut reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().channels, 2);
        assert_eq!(reader.spec().sample_rate, 48000);
        let samples: Vec<f32> = reader.samples::<f32>().map(|s| s.unwrap()).collect();
        assert_eq!(samples.len(), 64);
        assert_eq!(samples[2], 1.0 / 32.0);
    }
}
